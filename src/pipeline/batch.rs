use crate::catalog::CatalogSearch;
use crate::llm::{EmbeddingProvider, LlmProvider};
use crate::pipeline::model::{CalculateRequest, CalculateResponse};
use crate::pipeline::service::CalculationService;
use futures::future::join_all;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    /// 输入列表中的下标，结果顺序与输入顺序一致
    pub index: usize,
    pub response: CalculateResponse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItemOutcome>,
}

impl<P, E, C> CalculationService<P, E, C>
where
    P: LlmProvider + Clone,
    E: EmbeddingProvider,
    C: CatalogSearch,
{
    /// 批量计算：固定大小分片并发，片间停顿给外部 API 降压。
    /// 单条失败只记入该条的结果，不中断批次。
    pub async fn calculate_batch(&self, requests: &[CalculateRequest]) -> BatchSummary {
        let concurrency = self.batch_concurrency().max(1);
        let pause = self.batch_pause();
        let chunk_count = requests.len().div_ceil(concurrency);
        info!(
            "🚀 批量计算: {} 条, 并发 {}, 分 {} 片",
            requests.len(),
            concurrency,
            chunk_count
        );

        let mut items = Vec::with_capacity(requests.len());
        for (chunk_idx, chunk) in requests.chunks(concurrency).enumerate() {
            if chunk_idx > 0 {
                sleep(pause).await;
            }
            let responses = join_all(chunk.iter().map(|req| self.calculate(req))).await;
            for (offset, response) in responses.into_iter().enumerate() {
                items.push(BatchItemOutcome {
                    index: chunk_idx * concurrency + offset,
                    response,
                });
            }
        }

        let succeeded = items.iter().filter(|i| i.response.success).count();
        let summary = BatchSummary {
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            items,
        };
        info!(
            "批量计算结束: 成功 {}/{}, 失败 {}",
            summary.succeeded, summary.total, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::Config;
    use crate::llm::{ChatRequest, ChatResponse, LlmError};
    use crate::matching::model::{FactorSnapshot, MatchPolicy};
    use crate::storage::establish_connection;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone)]
    struct KeyedChat {
        rules: Vec<(&'static str, Result<&'static str, ()>)>,
    }

    #[async_trait]
    impl LlmProvider for KeyedChat {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            for (needle, out) in &self.rules {
                if req.user.contains(needle) {
                    return match out {
                        Ok(text) => Ok(ChatResponse {
                            text: text.to_string(),
                            raw: None,
                        }),
                        Err(()) => Err(LlmError::Timeout(req.timeout)),
                    };
                }
            }
            Err(LlmError::InvalidResponse("no rule matched".to_string()))
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(
            &self,
            _model: &str,
            _text: &str,
            _timeout: Duration,
        ) -> Result<Vec<f32>, LlmError> {
            Ok(self.0.clone())
        }
    }

    const PARSE_DIESEL: &str = r#"{"category":"fuel","fuel_type":"diesel","quantity":100,"unit":"L","description":"standby diesel generator run","confidence":0.9}"#;
    const REASON_UNCITED: &str = r#"{"factor_value":2.7,"unit":"L","source":"","confidence":0.9}"#;

    async fn batch_service() -> CalculationService<KeyedChat, FixedEmbedder, MemoryCatalog> {
        let cfg = Config {
            database_url: "sqlite::memory:".to_string(),
            embedding_dimension: 3,
            batch_concurrency: 2,
            batch_pause: Duration::from_millis(1),
            ..Config::default()
        };
        let db = Arc::new(establish_connection(&cfg.database_url).await.unwrap());
        let mut catalog = MemoryCatalog::new("text-embedding-3-small");
        catalog.push(
            FactorSnapshot {
                factor_id: Some(1),
                description: "Diesel, average biofuel blend".to_string(),
                source: "DEFRA".to_string(),
                year_published: 2024,
                unit: "L".to_string(),
                ghg_unit: "kg CO2e".to_string(),
                co2_factor: None,
                ch4_factor: None,
                n2o_factor: None,
                total_factor: 2.68,
                scope: Some(1),
                category_depth: 3,
            },
            vec![1.0, 0.0, 0.0],
        );
        let chat = KeyedChat {
            rules: vec![
                ("provider-outage", Err(())),
                ("standby diesel generator run", Ok(REASON_UNCITED)),
                ("diesel", Ok(PARSE_DIESEL)),
            ],
        };
        CalculationService::new(
            db,
            chat,
            FixedEmbedder(vec![1.0, 0.0, 0.0]),
            catalog,
            MatchPolicy::default(),
            cfg,
        )
    }

    fn req(raw: &str) -> CalculateRequest {
        CalculateRequest {
            raw_input: raw.to_string(),
            company_id: "acme".to_string(),
            entry_id: None,
        }
    }

    #[tokio::test]
    async fn one_failing_item_does_not_poison_the_batch() {
        let svc = batch_service().await;
        let requests = vec![
            req("100L diesel truck 1"),
            req("100L diesel truck 2"),
            req("100L diesel provider-outage"),
            req("100L diesel truck 4"),
            req("100L diesel truck 5"),
        ];
        let summary = svc.calculate_batch(&requests).await;
        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);

        // 失败条目保留自己的错误分型，顺序与输入一致
        let failed = &summary.items[2];
        assert_eq!(failed.index, 2);
        assert!(!failed.response.success);
        assert_eq!(
            failed.response.error.as_ref().unwrap().kind,
            "INFRASTRUCTURE"
        );
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let svc = batch_service().await;
        let summary = svc.calculate_batch(&[]).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.items.is_empty());
    }
}
