use crate::llm::types::{ChatRequest, ChatResponse, LlmError, LlmProvider};
use crate::llm::{OpenAiProvider, OpenRouterProvider};
use async_trait::async_trait;

#[derive(Clone)]
pub enum InnerProvider {
    OpenAi(OpenAiProvider),
    OpenRouter(OpenRouterProvider),
}

/// 按 LLM_PROVIDER 选择聊天后端；嵌入始终走 OpenAI 兼容端点（见 OpenAiProvider）
#[derive(Clone)]
pub struct AnyProvider {
    inner: InnerProvider,
}

impl AnyProvider {
    pub fn from_env() -> Result<Self, LlmError> {
        let which = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .to_lowercase();
        match which.as_str() {
            "openrouter" => {
                let p = OpenRouterProvider::from_env()?;
                Ok(Self {
                    inner: InnerProvider::OpenRouter(p),
                })
            }
            _ => {
                let p = OpenAiProvider::from_env()?;
                Ok(Self {
                    inner: InnerProvider::OpenAi(p),
                })
            }
        }
    }
}

#[async_trait]
impl LlmProvider for AnyProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        match &self.inner {
            InnerProvider::OpenAi(p) => p.chat(req).await,
            InnerProvider::OpenRouter(p) => p.chat(req).await,
        }
    }
}
