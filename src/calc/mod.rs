pub mod calculator;
pub mod units;

pub use calculator::{calculate, EmissionResult};
pub use units::{convert_quantity, normalize_unit, CalcError};
