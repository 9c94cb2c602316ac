use crate::calc::units::{convert_quantity, CalcError};
use crate::matching::model::MatchResult;
use log::debug;
use serde::{Deserialize, Serialize};

/// 一次计算的产物。分气体量各自独立：因子表里哪个气体有值就算哪个，
/// 缺失的保持 None，不从总量反推。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmissionResult {
    /// 换算到因子单位之后实际参与计算的数量
    pub effective_quantity: f64,
    pub factor_unit: String,
    pub emission_factor: f64,
    pub total_emissions: f64,
    pub emissions_unit: String,
    pub co2_emissions: Option<f64>,
    pub ch4_emissions: Option<f64>,
    pub n2o_emissions: Option<f64>,
    pub scope: Option<i32>,
}

/// total = quantity × factor。数量先换算到因子单位，换算表查不到就失败。
pub fn calculate(
    quantity: f64,
    unit: &str,
    matched: &MatchResult,
) -> Result<EmissionResult, CalcError> {
    match matched {
        MatchResult::Embedding(c) => {
            let q = convert_quantity(quantity, unit, &c.snapshot.unit)?;
            let result = EmissionResult {
                effective_quantity: q,
                factor_unit: c.snapshot.unit.clone(),
                emission_factor: c.snapshot.total_factor,
                total_emissions: q * c.snapshot.total_factor,
                emissions_unit: c.snapshot.ghg_unit.clone(),
                co2_emissions: c.snapshot.co2_factor.map(|f| q * f),
                ch4_emissions: c.snapshot.ch4_factor.map(|f| q * f),
                n2o_emissions: c.snapshot.n2o_factor.map(|f| q * f),
                scope: c.snapshot.scope,
            };
            debug!(
                "计算: {} {} × {} = {} {}",
                q,
                result.factor_unit,
                result.emission_factor,
                result.total_emissions,
                result.emissions_unit
            );
            Ok(result)
        }
        MatchResult::Reasoning(r) => {
            let q = convert_quantity(quantity, unit, &r.unit)?;
            Ok(EmissionResult {
                effective_quantity: q,
                factor_unit: r.unit.clone(),
                emission_factor: r.factor_value,
                total_emissions: q * r.factor_value,
                emissions_unit: r.ghg_unit.clone(),
                co2_emissions: None,
                ch4_emissions: None,
                n2o_emissions: None,
                scope: r.scope,
            })
        }
    }
}
