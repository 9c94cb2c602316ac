use crate::llm::LlmError;
use crate::parse::model::{ParseError, ParsedActivity};
use crate::storage::entity::emission_factor::Model as FactorModel;
use serde::{Deserialize, Serialize};

/// 匹配时拷贝的因子数值快照：因子之后被删除/修订也不影响已落库的计算
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorSnapshot {
    pub factor_id: Option<i32>,
    pub description: String,
    pub source: String,
    pub year_published: i32,
    pub unit: String,
    pub ghg_unit: String,
    pub co2_factor: Option<f64>,
    pub ch4_factor: Option<f64>,
    pub n2o_factor: Option<f64>,
    pub total_factor: f64,
    pub scope: Option<i32>,
    /// 类目路径非空层级数，检索并列时更深者胜
    pub category_depth: usize,
}

impl From<&FactorModel> for FactorSnapshot {
    fn from(m: &FactorModel) -> Self {
        Self {
            factor_id: Some(m.id),
            description: m.description.clone(),
            source: m.source.clone(),
            year_published: m.year_published,
            unit: m.unit.clone(),
            ghg_unit: m.ghg_unit.clone(),
            co2_factor: m.co2_factor,
            ch4_factor: m.ch4_factor,
            n2o_factor: m.n2o_factor,
            total_factor: m.total_factor,
            scope: m.scope,
            category_depth: m.category_depth(),
        }
    }
}

/// 嵌入检索路径的候选
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub snapshot: FactorSnapshot,
    pub similarity: f64,
}

/// 推理路径的结果；source 为空的结果在解析阶段就被判为 NoMatch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub factor_value: f64,
    pub unit: String,
    pub ghg_unit: String,
    pub source: String,
    pub scope: Option<i32>,
    pub confidence: f64,
}

/// 两条路径的异构结果在此归一，下游计算不再关心来源
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum MatchResult {
    #[serde(rename = "EMBEDDING")]
    Embedding(Candidate),
    #[serde(rename = "REASONING")]
    Reasoning(ReasoningResult),
}

impl MatchResult {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "EMBEDDING",
            Self::Reasoning(_) => "REASONING",
        }
    }

    /// 路径各自口径的匹配置信：嵌入路径用相似度，推理路径用自报置信
    pub fn match_confidence(&self) -> f64 {
        match self {
            Self::Embedding(c) => c.similarity,
            Self::Reasoning(r) => r.confidence,
        }
    }

    pub fn scope(&self) -> Option<i32> {
        match self {
            Self::Embedding(c) => c.snapshot.scope,
            Self::Reasoning(r) => r.scope,
        }
    }
}

/// 固定的合成置信公式：解析置信 × 匹配置信
pub fn combined_confidence(parse_confidence: f64, match_confidence: f64) -> f64 {
    (parse_confidence * match_confidence).clamp(0.0, 1.0)
}

/// 匹配偏好：先走哪条路径；另一条作为回退
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPreference {
    EmbeddingFirst,
    ReasoningFirst,
}

#[derive(Clone, Copy, Debug)]
pub struct MatchPolicy {
    pub preference: MatchPreference,
    /// true：两条路径并发跑、按合成置信取胜；false：首选接受即停
    pub concurrent: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            preference: MatchPreference::EmbeddingFirst,
            concurrent: true,
        }
    }
}

/// 整条流水线的错误分型；Infrastructure 与 NoMatch 是不同的失败，不得互相吞并
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// 解析置信不足且无数量，不做任何匹配尝试
    #[error("insufficient data: parse confidence {confidence:.2} with zero quantity")]
    InsufficientData {
        parsed: ParsedActivity,
        confidence: f64,
    },
    #[error("malformed llm output: {0}")]
    MalformedOutput(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("embedding model mismatch: catalog not built with {expected}")]
    EmbeddingModelMismatch { expected: String },
    /// 两条路径都尝试过且都未达标；附带诊断上下文，绝不裸 404
    #[error("no confident match found")]
    NoMatch {
        parsed: ParsedActivity,
        embedding_candidates: Vec<Candidate>,
        reasoning_note: Option<String>,
    },
    #[error("unit mismatch: no conversion from '{from}' to '{to}'")]
    UnitMismatch { from: String, to: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl ReconcileError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::InsufficientData { .. } => 400,
            Self::NoMatch { .. } => 404,
            Self::MalformedOutput(_)
            | Self::Infrastructure(_)
            | Self::EmbeddingModelMismatch { .. }
            | Self::UnitMismatch { .. }
            | Self::Storage(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::MalformedOutput(_) => "MALFORMED_OUTPUT",
            Self::Infrastructure(_) => "INFRASTRUCTURE",
            Self::EmbeddingModelMismatch { .. } => "EMBEDDING_MODEL_MISMATCH",
            Self::NoMatch { .. } => "NO_MATCH",
            Self::UnitMismatch { .. } => "UNIT_MISMATCH",
            Self::Storage(_) => "STORAGE",
        }
    }
}

impl From<ParseError> for ReconcileError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidInput(msg) => Self::InvalidInput(msg),
            ParseError::MalformedOutput(msg) => Self::MalformedOutput(msg),
            ParseError::Llm(le) => Self::from(le),
        }
    }
}

impl From<LlmError> for ReconcileError {
    fn from(e: LlmError) -> Self {
        if e.is_infrastructure() {
            Self::Infrastructure(e.to_string())
        } else {
            Self::MalformedOutput(e.to_string())
        }
    }
}
