pub mod batch;
pub mod model;
pub mod service;

pub use batch::{BatchItemOutcome, BatchSummary};
pub use model::{CalculateRequest, CalculateResponse, CalculationView, ErrorView, MatchedFactorView};
pub use service::CalculationService;
