use crate::config::Config;
use crate::llm::{ChatRequest, LlmProvider};
use crate::parse::model::{ParseError, ParsedActivity};
use crate::parse::parser::parse_activity_output;
use crate::parse::prompt::PromptBuilder;
use log::warn;

const SYSTEM_PROMPT: &str =
    "You extract structured emission activity records from free text. Output only JSON.";

pub struct ActivityParser<P: LlmProvider> {
    provider: P,
    model: String,
    timeout: std::time::Duration,
    max_input_len: usize,
}

impl<P: LlmProvider> ActivityParser<P> {
    pub fn new(provider: P, cfg: &Config) -> Self {
        Self {
            provider,
            model: cfg.chat_model.clone(),
            timeout: cfg.parse_timeout,
            max_input_len: cfg.max_input_len,
        }
    }

    /// 长度校验 → 抽取调用 → 校验失败带严格提醒重试一次 → MalformedOutput
    pub async fn parse(&self, raw_input: &str) -> Result<ParsedActivity, ParseError> {
        let trimmed = raw_input.trim();
        if trimmed.is_empty() {
            return Err(ParseError::InvalidInput("empty input".to_string()));
        }
        if trimmed.len() > self.max_input_len {
            return Err(ParseError::InvalidInput(format!(
                "input too long: {} > {}",
                trimmed.len(),
                self.max_input_len
            )));
        }

        let resp = self
            .provider
            .chat(self.request(PromptBuilder::build_activity_extraction(trimmed)))
            .await?;

        let first_reject = match parse_activity_output(&resp.text) {
            Ok(parsed) => return Ok(parsed),
            Err(reason) => reason,
        };
        warn!("活动抽取首次输出未通过校验: {}", first_reject);

        let retry = self
            .provider
            .chat(self.request(PromptBuilder::build_activity_extraction_strict(
                trimmed,
                &first_reject,
            )))
            .await?;

        parse_activity_output(&retry.text).map_err(|reason| {
            warn!("活动抽取重试输出仍未通过校验: {}", reason);
            ParseError::MalformedOutput(reason)
        })
    }

    fn request(&self, user: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            user,
            temperature: 0.0,
            max_tokens: 512,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 按调用次数依次返回预置文本的假 provider
    struct ScriptedProvider {
        outputs: Vec<String>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, LlmError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self
                .outputs
                .get(i)
                .cloned()
                .unwrap_or_else(|| "{}".to_string());
            Ok(ChatResponse { text, raw: None })
        }
    }

    fn parser_with(outputs: Vec<&str>) -> (ActivityParser<ScriptedProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = ScriptedProvider {
            outputs: outputs.into_iter().map(|s| s.to_string()).collect(),
            calls: calls.clone(),
        };
        (ActivityParser::new(provider, &Config::default()), calls)
    }

    const GOOD: &str = r#"{"category":"fuel","fuel_type":"diesel","quantity":100,"unit":"L","description":"diesel for vehicles","confidence":0.9}"#;

    #[tokio::test]
    async fn empty_input_rejected_before_any_call() {
        let (parser, calls) = parser_with(vec![GOOD]);
        let err = parser.parse("   ").await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_input_rejected_before_any_call() {
        let (parser, calls) = parser_with(vec![GOOD]);
        let big = "x".repeat(3000);
        let err = parser.parse(&big).await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn good_output_needs_single_call() {
        let (parser, calls) = parser_with(vec![GOOD]);
        let p = parser.parse("100L diesel for vehicles").await.unwrap();
        assert_eq!(p.quantity, 100.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_then_good_retries_once() {
        let (parser, calls) = parser_with(vec!["sorry, here is prose", GOOD]);
        let p = parser.parse("100L diesel for vehicles").await.unwrap();
        assert_eq!(p.quantity, 100.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_twice_fails_with_malformed_output() {
        let (parser, calls) = parser_with(vec!["prose", "still prose"]);
        let err = parser.parse("100L diesel").await.unwrap_err();
        assert!(matches!(err, ParseError::MalformedOutput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
