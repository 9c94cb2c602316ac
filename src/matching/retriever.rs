use crate::catalog::{CatalogError, CatalogSearch};
use crate::config::Config;
use crate::llm::EmbeddingProvider;
use crate::matching::model::{Candidate, ReconcileError};
use log::debug;

/// 嵌入检索路径：描述文本 → 查询向量 → 目录相似度检索。
/// 空候选集代表“没有足够相近的因子”，与基础设施故障严格区分。
pub struct EmbeddingRetriever<E: EmbeddingProvider, C: CatalogSearch> {
    embedder: E,
    catalog: C,
    model_id: String,
    dimension: usize,
    timeout: std::time::Duration,
}

impl<E: EmbeddingProvider, C: CatalogSearch> EmbeddingRetriever<E, C> {
    pub fn new(embedder: E, catalog: C, cfg: &Config) -> Self {
        Self {
            embedder,
            catalog,
            model_id: cfg.embedding_model.clone(),
            dimension: cfg.embedding_dimension,
            timeout: cfg.embed_timeout,
        }
    }

    pub async fn retrieve(
        &self,
        description: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<Candidate>, ReconcileError> {
        let query = self
            .embedder
            .embed(&self.model_id, description, self.timeout)
            .await
            .map_err(ReconcileError::from)?;

        // 查询侧维度错了说明配置与嵌入模型不一致，属正确性问题
        if query.len() != self.dimension {
            return Err(ReconcileError::Infrastructure(format!(
                "embedding dimension {} != configured {}",
                query.len(),
                self.dimension
            )));
        }

        let candidates = self
            .catalog
            .search(&query, &self.model_id, min_similarity, top_k)
            .await
            .map_err(|e| match e {
                CatalogError::ModelMismatch { expected } => {
                    ReconcileError::EmbeddingModelMismatch { expected }
                }
                CatalogError::Unavailable(msg) => ReconcileError::Infrastructure(msg),
            })?;

        debug!(
            "嵌入检索: '{}' → {} 个候选 (阈值 {})",
            description,
            candidates.len(),
            min_similarity
        );
        Ok(candidates)
    }
}
