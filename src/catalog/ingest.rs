use crate::config::Config;
use crate::llm::EmbeddingProvider;
use crate::storage::repository::{FactorDefinition, FactorIngestResult, FactorRepository};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::time::sleep;

#[derive(Debug, Default, Clone)]
pub struct BackfillResult {
    pub embedded: usize,
    pub failed: usize,
}

/// 目录摄取与嵌入回填。摄取只追加；嵌入一经写入不原地改写，
/// 换嵌入模型时由回填批次整体重建（find_unembedded 会把旧模型行捞出来）。
pub struct CatalogIngestor<E: EmbeddingProvider> {
    db: Arc<DatabaseConnection>,
    embedder: E,
    cfg: Config,
}

impl<E: EmbeddingProvider> CatalogIngestor<E> {
    pub fn new(db: Arc<DatabaseConnection>, embedder: E, cfg: Config) -> Self {
        Self { db, embedder, cfg }
    }

    /// 从 JSON 文件（FactorDefinition 数组）载入因子
    pub async fn ingest_file(&self, path: &str) -> anyhow::Result<FactorIngestResult> {
        let raw = tokio::fs::read_to_string(path).await?;
        let defs: Vec<FactorDefinition> = serde_json::from_str(&raw)?;
        let total = defs.len();
        let result = FactorRepository::insert_batch(self.db.as_ref(), defs).await?;
        info!(
            "目录摄取完成: 共 {} 条, 入库 {}, 拒绝 {}",
            total,
            result.inserted,
            result.rejected.len()
        );
        for reason in &result.rejected {
            warn!("拒绝因子: {}", reason);
        }
        Ok(result)
    }

    /// 嵌入回填：小批扫描未嵌入因子，批间停顿，单条失败不拖垮整批。
    /// 失败的行本轮不再重试，每行只计一次失败
    pub async fn backfill_embeddings(&self) -> anyhow::Result<BackfillResult> {
        let model_id = self.cfg.embedding_model.clone();
        let batch = self.cfg.batch_concurrency as u64;
        let mut result = BackfillResult::default();
        let mut failed_ids: Vec<i32> = Vec::new();

        loop {
            let rows =
                FactorRepository::find_unembedded(self.db.as_ref(), &model_id, &failed_ids, batch)
                    .await?;
            if rows.is_empty() {
                break;
            }

            let mut batch_embedded = 0usize;
            for row in &rows {
                match self
                    .embedder
                    .embed(&model_id, &row.description, self.cfg.embed_timeout)
                    .await
                {
                    Ok(vec) => {
                        if vec.len() != self.cfg.embedding_dimension {
                            warn!(
                                "因子 {} 嵌入维度异常: {} != {}",
                                row.id,
                                vec.len(),
                                self.cfg.embedding_dimension
                            );
                            failed_ids.push(row.id);
                            result.failed += 1;
                            continue;
                        }
                        FactorRepository::set_embedding(self.db.as_ref(), row.id, &model_id, &vec)
                            .await?;
                        result.embedded += 1;
                        batch_embedded += 1;
                    }
                    Err(e) => {
                        warn!("因子 {} 嵌入失败: {}", row.id, e);
                        failed_ids.push(row.id);
                        result.failed += 1;
                    }
                }
            }

            // 整批没有任何进展就收尾，否则会对着故障后端死循环空转
            if batch_embedded == 0 {
                warn!("本批嵌入无进展，提前结束回填");
                break;
            }

            sleep(self.cfg.batch_pause).await;
        }

        info!(
            "嵌入回填完成: 成功 {}, 失败 {}",
            result.embedded, result.failed
        );
        Ok(result)
    }
}
