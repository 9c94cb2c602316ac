pub mod calculation_record;
pub mod emission_factor;

pub use calculation_record::Entity as CalculationRecord;
pub use emission_factor::Entity as EmissionFactor;
