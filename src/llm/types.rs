use async_trait::async_trait;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次调用的硬超时；超时按 LlmError::Timeout 上报，不做静默降级
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub text: String,
    pub raw: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("missing env {0}")]
    MissingEnv(&'static str),
    #[error("http error: {0}")]
    Http(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 基础设施类错误（网络/超时/限流/5xx），与模型输出不合规区分开
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_) | LlmError::Timeout(_) | LlmError::RateLimited | LlmError::Unauthorized
        )
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 返回固定维度向量；模型 id 由调用方与目录侧比对
    async fn embed(&self, model: &str, text: &str, timeout: Duration) -> Result<Vec<f32>, LlmError>;
}
