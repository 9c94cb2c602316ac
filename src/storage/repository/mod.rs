pub mod calculation_repo;
pub mod factor_repo;

pub use calculation_repo::{CalculationRepository, NewCalculation};
pub use factor_repo::{FactorDefinition, FactorIngestResult, FactorRepository};
