use crate::config::Config;
use crate::llm::{ChatRequest, LlmProvider};
use crate::parse::model::ParseError;
use crate::parse::parser::extract_json_block;
use crate::parse::prompt::PromptBuilder;
use log::warn;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str =
    "You extract carbon accounting entries from document text. Output only JSON.";

/// 必填字段：缺任何一个该条目即标记待人工复核
const REQUIRED_FIELDS: [&str; 4] = ["date", "type", "amount", "amount_unit"];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedEntry {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub region: Option<String>,
    pub amount: f64,
    pub amount_unit: Option<String>,
    pub year: Option<i32>,
    pub supplier: Option<String>,
    pub energy_source: Option<String>,
    pub invoice_id: Option<String>,
    pub description: Option<String>,
    /// 本条目缺失的必填字段
    pub missing_fields: Vec<String>,
}

impl ExtractedEntry {
    /// 拼成流水线可直接消化的自由文本输入
    pub fn as_raw_input(&self) -> String {
        let mut parts = Vec::new();
        if self.amount > 0.0 {
            parts.push(format!(
                "{} {}",
                self.amount,
                self.amount_unit.as_deref().unwrap_or("")
            ));
        }
        if let Some(t) = &self.entry_type {
            parts.push(t.clone());
        }
        if let Some(d) = &self.description {
            parts.push(d.clone());
        }
        parts.join(" ").trim().to_string()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExtractionReport {
    pub entries: Vec<ExtractedEntry>,
    pub confidence: f64,
    pub requires_review: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "type", default)]
    entry_type: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    amount_unit: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    supplier: Option<String>,
    #[serde(default)]
    energy_source: Option<String>,
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    entries: Vec<RawEntry>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn clean(v: Option<String>) -> Option<String> {
    v.and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() || t.eq_ignore_ascii_case("unknown") {
            None
        } else {
            Some(t)
        }
    })
}

pub fn parse_extraction_output(text: &str) -> Result<ExtractionReport, String> {
    let block = extract_json_block(text).ok_or_else(|| "no JSON object found".to_string())?;
    let raw: RawReport =
        serde_json::from_str(&block).map_err(|e| format!("json deserialize failed: {e}"))?;

    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    for (i, e) in raw.entries.into_iter().enumerate() {
        let amount = e.amount.unwrap_or(0.0);
        if !amount.is_finite() || amount < 0.0 {
            warnings.push(format!("entry {i}: invalid amount, dropped"));
            continue;
        }
        let mut entry = ExtractedEntry {
            date: clean(e.date),
            entry_type: clean(e.entry_type),
            region: clean(e.region),
            amount,
            amount_unit: clean(e.amount_unit),
            year: e.year,
            supplier: clean(e.supplier),
            energy_source: clean(e.energy_source),
            invoice_id: clean(e.invoice_id),
            description: clean(e.description),
            missing_fields: Vec::new(),
        };
        for field in REQUIRED_FIELDS {
            let missing = match field {
                "date" => entry.date.is_none(),
                "type" => entry.entry_type.is_none(),
                "amount" => entry.amount == 0.0,
                "amount_unit" => entry.amount_unit.is_none(),
                _ => false,
            };
            if missing {
                entry.missing_fields.push(field.to_string());
            }
        }
        entries.push(entry);
    }

    let requires_review = entries.iter().any(|e| !e.missing_fields.is_empty());
    Ok(ExtractionReport {
        confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        requires_review,
        entries,
        warnings,
    })
}

pub struct DocumentExtractor<P: LlmProvider> {
    provider: P,
    model: String,
    timeout: std::time::Duration,
}

impl<P: LlmProvider> DocumentExtractor<P> {
    pub fn new(provider: P, cfg: &Config) -> Self {
        Self {
            provider,
            model: cfg.chat_model.clone(),
            timeout: cfg.reasoning_timeout,
        }
    }

    pub async fn extract(&self, document_text: &str) -> Result<ExtractionReport, ParseError> {
        let trimmed = document_text.trim();
        if trimmed.is_empty() {
            return Err(ParseError::InvalidInput("empty document text".to_string()));
        }

        let resp = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                system: SYSTEM_PROMPT.to_string(),
                user: PromptBuilder::build_document_extraction(trimmed),
                temperature: 0.0,
                max_tokens: 2048,
                timeout: self.timeout,
            })
            .await?;

        parse_extraction_output(&resp.text).map_err(|reason| {
            warn!("文档抽取输出未通过校验: {}", reason);
            ParseError::MalformedOutput(reason)
        })
    }
}
