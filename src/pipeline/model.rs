use crate::calc::EmissionResult;
use crate::matching::model::{Candidate, MatchResult, ReconcileError};
use crate::matching::Reconciliation;
use crate::parse::model::ParsedActivity;
use serde::{Deserialize, Serialize};

/// 一条计算请求。entry_id 由上游台账系统提供，用于追溯同一凭证的多次重算
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalculateRequest {
    pub raw_input: String,
    pub company_id: String,
    #[serde(default)]
    pub entry_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalculationView {
    pub quantity: f64,
    pub unit: String,
    pub emission_factor: f64,
    pub total_emissions: f64,
    pub emissions_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_emissions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ch4_emissions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n2o_emissions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<i32>,
    pub confidence_score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchedFactorView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor_id: Option<i32>,
    pub description: String,
    pub source: String,
    pub year_published: Option<i32>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// 失败响应的载荷：除了错误分型，还带上失败点之前已经算出来的上下文，
/// 让调用方能据此修正输入而不是面对一个裸错误码
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorView {
    pub kind: String,
    pub message: String,
    /// 原始输入原样带回，让复核者能改了重提
    pub raw_input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_data: Option<ParsedActivity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub success: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<CalculationView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_factor: Option<MatchedFactorView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_matches: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
    pub processing_time_ms: i64,
}

fn suggestion_for(err: &ReconcileError) -> Option<String> {
    let s = match err {
        ReconcileError::InvalidInput(_) => "提供非空且不超长的活动描述",
        ReconcileError::InsufficientData { .. } => "补充数量和单位，例如“100L 柴油”而不是“一些柴油”",
        ReconcileError::NoMatch { .. } => "补充燃料种类/地区等细节，或向因子目录摄取更贴近的因子",
        ReconcileError::UnitMismatch { .. } => "用因子口径的单位重新填报数量，或扩充单位换算表",
        ReconcileError::EmbeddingModelMismatch { .. } => "用当前嵌入模型重跑 embed backfill 重建目录向量",
        _ => return None,
    };
    Some(s.to_string())
}

impl CalculateResponse {
    pub fn from_error(err: ReconcileError, raw_input: &str, processing_time_ms: i64) -> Self {
        let status = err.http_status();
        let kind = err.kind().to_string();
        let message = err.to_string();
        let (parsed_data, rejected_candidates, suggestion) = match &err {
            ReconcileError::InsufficientData { parsed, .. } => {
                (Some(parsed.clone()), Vec::new(), suggestion_for(&err))
            }
            ReconcileError::NoMatch {
                parsed,
                embedding_candidates,
                ..
            } => (
                Some(parsed.clone()),
                embedding_candidates.clone(),
                suggestion_for(&err),
            ),
            _ => (None, Vec::new(), suggestion_for(&err)),
        };
        Self {
            success: false,
            status,
            record_id: None,
            calculation: None,
            matched_factor: None,
            alternative_matches: Vec::new(),
            error: Some(ErrorView {
                kind,
                message,
                raw_input: raw_input.to_string(),
                parsed_data,
                rejected_candidates,
                suggestion,
            }),
            processing_time_ms,
        }
    }

    pub fn from_success(
        rec: &Reconciliation,
        emission: &EmissionResult,
        record_id: i32,
        processing_time_ms: i64,
    ) -> Self {
        let matched_factor = match &rec.result {
            MatchResult::Embedding(c) => MatchedFactorView {
                factor_id: c.snapshot.factor_id,
                description: c.snapshot.description.clone(),
                source: c.snapshot.source.clone(),
                year_published: Some(c.snapshot.year_published),
                method: rec.result.method().to_string(),
                similarity: Some(c.similarity),
            },
            MatchResult::Reasoning(r) => MatchedFactorView {
                factor_id: None,
                description: r.source.clone(),
                source: r.source.clone(),
                year_published: None,
                method: rec.result.method().to_string(),
                similarity: None,
            },
        };
        Self {
            success: true,
            status: 200,
            record_id: Some(record_id),
            calculation: Some(CalculationView {
                quantity: emission.effective_quantity,
                unit: emission.factor_unit.clone(),
                emission_factor: emission.emission_factor,
                total_emissions: emission.total_emissions,
                emissions_unit: emission.emissions_unit.clone(),
                co2_emissions: emission.co2_emissions,
                ch4_emissions: emission.ch4_emissions,
                n2o_emissions: emission.n2o_emissions,
                scope: emission.scope,
                confidence_score: rec.combined_confidence,
            }),
            matched_factor: Some(matched_factor),
            alternative_matches: rec.alternatives.clone(),
            error: None,
            processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::model::ActivityCategory;

    fn parsed() -> ParsedActivity {
        ParsedActivity {
            category: ActivityCategory::Fuel,
            subcategory: None,
            fuel_type: Some("diesel".to_string()),
            quantity: 0.0,
            unit: "".to_string(),
            description: "some diesel usage".to_string(),
            confidence: 0.2,
        }
    }

    #[test]
    fn insufficient_data_carries_parsed_context() {
        let resp = CalculateResponse::from_error(
            ReconcileError::InsufficientData {
                parsed: parsed(),
                confidence: 0.2,
            },
            "some diesel usage",
            12,
        );
        assert!(!resp.success);
        assert_eq!(resp.status, 400);
        let err = resp.error.unwrap();
        assert_eq!(err.kind, "INSUFFICIENT_DATA");
        assert_eq!(err.raw_input, "some diesel usage");
        assert!(err.parsed_data.is_some());
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn no_match_carries_rejected_candidates() {
        let cand = Candidate {
            snapshot: crate::matching::model::FactorSnapshot {
                factor_id: Some(7),
                description: "Diesel".to_string(),
                source: "DEFRA".to_string(),
                year_published: 2024,
                unit: "L".to_string(),
                ghg_unit: "kg CO2e".to_string(),
                co2_factor: None,
                ch4_factor: None,
                n2o_factor: None,
                total_factor: 2.68,
                scope: Some(1),
                category_depth: 2,
            },
            similarity: 0.55,
        };
        let resp = CalculateResponse::from_error(
            ReconcileError::NoMatch {
                parsed: parsed(),
                embedding_candidates: vec![cand],
                reasoning_note: Some("no cited result".to_string()),
            },
            "100L diesel",
            30,
        );
        assert_eq!(resp.status, 404);
        let err = resp.error.unwrap();
        assert_eq!(err.rejected_candidates.len(), 1);
        assert!((err.rejected_candidates[0].similarity - 0.55).abs() < 1e-9);
    }

    #[test]
    fn infrastructure_error_has_no_suggestion() {
        let resp =
            CalculateResponse::from_error(ReconcileError::Infrastructure("down".into()), "x", 5);
        assert_eq!(resp.status, 500);
        assert!(resp.error.unwrap().suggestion.is_none());
    }
}
