use crate::llm::types::{
    ChatRequest, ChatResponse, EmbeddingProvider, LlmError, LlmProvider,
};
use crate::llm::{build_llm_http_client, split_env_keys};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// OpenAI 兼容端点：chat/completions + embeddings 共用同一批 key
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    api_keys: Vec<String>,
    index: Arc<AtomicUsize>,
}

impl OpenAiProvider {
    pub fn from_env() -> Result<Self, LlmError> {
        let api_keys = split_env_keys(std::env::var("OPENAI_API_KEYS").ok());
        let api_key = if api_keys.is_empty() {
            std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::MissingEnv("OPENAI_API_KEY"))?
        } else {
            api_keys[0].clone()
        };
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: build_llm_http_client()?,
            api_key,
            base_url,
            api_keys,
            index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn next_key(&self) -> String {
        if self.api_keys.is_empty() {
            self.api_key.clone()
        } else {
            let i = self.index.fetch_add(1, Ordering::Relaxed);
            self.api_keys[i % self.api_keys.len()].clone()
        }
    }

    /// 超时在本调用点重试一次（而非整条流水线重试），仍失败按 Timeout 上报
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, LlmError> {
        for attempt in 0..2 {
            let key = self.next_key();
            match self
                .client
                .post(url)
                .bearer_auth(&key)
                .header("Content-Type", "application/json")
                .timeout(timeout)
                .json(body)
                .send()
                .await
            {
                Ok(r) => return Ok(r),
                Err(e) if e.is_timeout() && attempt == 0 => continue,
                Err(e) if e.is_timeout() => return Err(LlmError::Timeout(timeout)),
                Err(e) => return Err(LlmError::Http(e.to_string())),
            }
        }
        Err(LlmError::Timeout(timeout))
    }
}

async fn read_success_body(resp: reqwest::Response) -> Result<String, LlmError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(LlmError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => return Err(LlmError::RateLimited),
        _ => {}
    }
    let status = resp.status();
    let raw = resp
        .text()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(LlmError::Http(format!("{} {}", status.as_u16(), raw)));
    }
    Ok(raw)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": req.model,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.user}
            ]
        });

        let resp = self.post_json(&url, &body, req.timeout).await?;
        let raw = read_success_body(resp).await?;

        let v: Value = serde_json::from_str(&raw)
            .map_err(|e| LlmError::InvalidResponse(format!("json parse failed: {e}, raw={raw}")))?;

        let text = v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|x| x.as_str())
            .ok_or_else(|| {
                LlmError::InvalidResponse(format!("missing choices[0].message.content, raw={raw}"))
            })?
            .to_string();

        Ok(ChatResponse {
            text,
            raw: Some(raw),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(
        &self,
        model: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let resp = self.post_json(&url, &body, timeout).await?;
        let raw = read_success_body(resp).await?;

        let v: Value = serde_json::from_str(&raw)
            .map_err(|e| LlmError::InvalidResponse(format!("json parse failed: {e}, raw={raw}")))?;

        let arr = v
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                LlmError::InvalidResponse(format!("missing data[0].embedding, raw={raw}"))
            })?;

        let mut out = Vec::with_capacity(arr.len());
        for x in arr {
            let f = x.as_f64().ok_or_else(|| {
                LlmError::InvalidResponse("non-numeric embedding component".to_string())
            })?;
            out.push(f as f32);
        }
        if out.is_empty() {
            return Err(LlmError::InvalidResponse("empty embedding".to_string()));
        }
        Ok(out)
    }
}
