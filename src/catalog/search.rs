use crate::matching::model::{Candidate, FactorSnapshot};
use crate::storage::repository::FactorRepository;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// 目录侧向量不是用当前嵌入模型构建的：正确性问题，必须硬失败
    #[error("catalog embeddings not built with model {expected}")]
    ModelMismatch { expected: String },
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// 相似度检索原语：输入查询向量与阈值，输出按序候选。
/// 空结果不是错误（代表没有足够相近的因子），基础设施故障才是。
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search(
        &self,
        query: &[f32],
        model_id: &str,
        min_similarity: f64,
        max_results: usize,
    ) -> Result<Vec<Candidate>, CatalogError>;
}

/// 余弦相似度；维度不一致或零向量返回 None
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}

/// 排序：相似度降序 → 类目更深 → 年份更新。阈值为闭区间（== 阈值接受）
pub fn rank_candidates(mut hits: Vec<Candidate>, min_similarity: f64, max: usize) -> Vec<Candidate> {
    hits.retain(|c| c.similarity >= min_similarity);
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.snapshot.category_depth.cmp(&a.snapshot.category_depth))
            .then(b.snapshot.year_published.cmp(&a.snapshot.year_published))
    });
    hits.truncate(max);
    hits
}

/// 默认后端：对 sqlite 目录做进程内余弦扫描（托管向量库的本地等价物）
#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogSearch for DbCatalog {
    async fn search(
        &self,
        query: &[f32],
        model_id: &str,
        min_similarity: f64,
        max_results: usize,
    ) -> Result<Vec<Candidate>, CatalogError> {
        let rows = FactorRepository::load_embedded(self.db.as_ref(), model_id)
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        if rows.is_empty() {
            // 区分“目录为空”与“目录是旧模型写的”——后者是版本错配
            let foreign = FactorRepository::count_foreign_embeddings(self.db.as_ref(), model_id)
                .await
                .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
            if foreign > 0 {
                return Err(CatalogError::ModelMismatch {
                    expected: model_id.to_string(),
                });
            }
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for row in &rows {
            let Some(json) = &row.embedding_json else {
                continue;
            };
            let Ok(vec) = serde_json::from_str::<Vec<f32>>(json) else {
                continue;
            };
            if let Some(sim) = cosine_similarity(query, &vec) {
                hits.push(Candidate {
                    snapshot: FactorSnapshot::from(row),
                    similarity: sim,
                });
            }
        }
        Ok(rank_candidates(hits, min_similarity, max_results))
    }
}

/// 内存目录：固件与测试注入用
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    pub model_id: String,
    pub factors: Vec<(FactorSnapshot, Vec<f32>)>,
}

impl MemoryCatalog {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            factors: Vec::new(),
        }
    }

    pub fn push(&mut self, snapshot: FactorSnapshot, embedding: Vec<f32>) {
        self.factors.push((snapshot, embedding));
    }
}

#[async_trait]
impl CatalogSearch for MemoryCatalog {
    async fn search(
        &self,
        query: &[f32],
        model_id: &str,
        min_similarity: f64,
        max_results: usize,
    ) -> Result<Vec<Candidate>, CatalogError> {
        if model_id != self.model_id {
            return Err(CatalogError::ModelMismatch {
                expected: model_id.to_string(),
            });
        }
        let mut hits = Vec::new();
        for (snapshot, vec) in &self.factors {
            if let Some(sim) = cosine_similarity(query, vec) {
                hits.push(Candidate {
                    snapshot: snapshot.clone(),
                    similarity: sim,
                });
            }
        }
        Ok(rank_candidates(hits, min_similarity, max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(desc: &str, depth: usize, year: i32) -> FactorSnapshot {
        FactorSnapshot {
            factor_id: Some(1),
            description: desc.to_string(),
            source: "DEFRA".to_string(),
            year_published: year,
            unit: "L".to_string(),
            ghg_unit: "kg CO2e".to_string(),
            co2_factor: None,
            ch4_factor: None,
            n2o_factor: None,
            total_factor: 2.68,
            scope: Some(1),
            category_depth: depth,
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3f32, 0.4, 0.5];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn cosine_rejects_dimension_mismatch_and_zero_norm() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn threshold_is_inclusive() {
        let hits = vec![
            Candidate {
                snapshot: snap("at threshold", 1, 2024),
                similarity: 0.6,
            },
            Candidate {
                snapshot: snap("below threshold", 1, 2024),
                similarity: 0.6 - 1e-9,
            },
        ];
        let ranked = rank_candidates(hits, 0.6, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].snapshot.description, "at threshold");
    }

    #[test]
    fn ties_break_on_category_depth_then_year() {
        let hits = vec![
            Candidate {
                snapshot: snap("shallow old", 1, 2020),
                similarity: 0.8,
            },
            Candidate {
                snapshot: snap("deep", 3, 2020),
                similarity: 0.8,
            },
            Candidate {
                snapshot: snap("shallow new", 1, 2024),
                similarity: 0.8,
            },
        ];
        let ranked = rank_candidates(hits, 0.6, 10);
        assert_eq!(ranked[0].snapshot.description, "deep");
        assert_eq!(ranked[1].snapshot.description, "shallow new");
        assert_eq!(ranked[2].snapshot.description, "shallow old");
    }

    #[tokio::test]
    async fn memory_catalog_rejects_foreign_model() {
        let catalog = MemoryCatalog::new("text-embedding-3-small");
        let err = catalog
            .search(&[1.0, 0.0], "some-other-model", 0.6, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::ModelMismatch { .. }));
    }
}
