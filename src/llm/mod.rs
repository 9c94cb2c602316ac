pub mod openai;
pub mod openrouter;
pub mod types;
pub mod unified;

pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;
pub use types::{ChatRequest, ChatResponse, EmbeddingProvider, LlmError, LlmProvider};
pub use unified::AnyProvider;

pub(crate) fn build_llm_http_client() -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();

    if let Ok(raw) = std::env::var("LLM_PROXY") {
        let t = raw.trim();
        if !t.is_empty() {
            let url = if t.contains("://") {
                t.to_string()
            } else {
                format!("socks5h://{}", t)
            };
            let proxy = reqwest::Proxy::all(&url).map_err(|e| LlmError::Http(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
    }

    builder.build().map_err(|e| LlmError::Http(e.to_string()))
}

pub(crate) fn split_env_keys(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(|c| c == ',' || c == ';' || c == '\n' || c == '\t' || c == ' ')
            .map(|x| x.trim().to_string())
            .filter(|x| !x.is_empty())
            .collect::<Vec<_>>()
    })
    .unwrap_or_default()
}
