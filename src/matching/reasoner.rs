use crate::config::Config;
use crate::llm::{ChatRequest, LlmProvider};
use crate::matching::model::{ReasoningResult, ReconcileError};
use crate::parse::model::ParsedActivity;
use crate::parse::parser::extract_json_block;
use crate::parse::prompt::PromptBuilder;
use log::debug;
use serde::Deserialize;

const SYSTEM_PROMPT: &str =
    "You are a carbon accounting expert citing authoritative emission factors. Output only JSON.";

#[derive(Debug, Deserialize)]
struct RawReasoning {
    factor_value: Option<f64>,
    unit: Option<String>,
    #[serde(default)]
    ghg_unit: Option<String>,
    source: Option<String>,
    #[serde(default)]
    scope: Option<i32>,
    confidence: Option<f64>,
}

/// 推理输出 → ReasoningResult；Ok(None) 表示按规则判 NoMatch（如无出处）
pub fn parse_reasoning_output(text: &str) -> Result<Option<ReasoningResult>, String> {
    let block = extract_json_block(text).ok_or_else(|| "no JSON object found".to_string())?;
    let raw: RawReasoning =
        serde_json::from_str(&block).map_err(|e| format!("json deserialize failed: {e}"))?;

    // 无出处的数值主张进不了审计链：置信再高也按 NoMatch 处理
    let source = raw.source.map(|s| s.trim().to_string()).unwrap_or_default();
    if source.is_empty() {
        return Ok(None);
    }

    let factor_value = raw
        .factor_value
        .ok_or_else(|| "missing factor_value".to_string())?;
    if !factor_value.is_finite() || factor_value < 0.0 {
        return Err(format!("factor_value not non-negative: {factor_value}"));
    }

    let unit = raw
        .unit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "missing unit".to_string())?;

    let scope = match raw.scope {
        Some(s) if (1..=3).contains(&s) => Some(s),
        Some(_) => None,
        None => None,
    };

    let confidence = raw
        .confidence
        .ok_or_else(|| "missing confidence".to_string())?
        .clamp(0.0, 1.0);

    Ok(Some(ReasoningResult {
        factor_value,
        unit,
        ghg_unit: raw
            .ghg_unit
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| "kg CO2e".to_string()),
        source,
        scope,
        confidence,
    }))
}

/// 推理匹配路径：不访问目录，由模型凭训练知识给出带出处的权威因子。
/// 比嵌入检索贵且慢，调用方可以整体跳过。
pub struct ReasoningMatcher<P: LlmProvider> {
    provider: P,
    model: String,
    timeout: std::time::Duration,
}

impl<P: LlmProvider> ReasoningMatcher<P> {
    pub fn new(provider: P, cfg: &Config) -> Self {
        Self {
            provider,
            model: cfg.chat_model.clone(),
            timeout: cfg.reasoning_timeout,
        }
    }

    /// Ok(None) = 推理路径无可用结果（非错误）；Err = 基础设施/输出不合规
    pub async fn match_activity(
        &self,
        parsed: &ParsedActivity,
    ) -> Result<Option<ReasoningResult>, ReconcileError> {
        let resp = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                system: SYSTEM_PROMPT.to_string(),
                user: PromptBuilder::build_reasoning_match(parsed),
                temperature: 0.0,
                max_tokens: 512,
                timeout: self.timeout,
            })
            .await
            .map_err(ReconcileError::from)?;

        match parse_reasoning_output(&resp.text) {
            Ok(Some(result)) => {
                debug!(
                    "推理匹配: {} → {} {} ({}, 置信 {:.2})",
                    parsed.description,
                    result.factor_value,
                    result.ghg_unit,
                    result.source,
                    result.confidence
                );
                Ok(Some(result))
            }
            Ok(None) => {
                debug!("推理匹配无出处，按 NoMatch 处理: {}", parsed.description);
                Ok(None)
            }
            Err(reason) => Err(ReconcileError::MalformedOutput(reason)),
        }
    }
}
