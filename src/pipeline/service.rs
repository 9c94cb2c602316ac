use crate::calc;
use crate::catalog::CatalogSearch;
use crate::config::Config;
use crate::llm::{EmbeddingProvider, LlmProvider};
use crate::matching::model::{MatchPolicy, MatchResult, ReconcileError};
use crate::matching::HybridReconciler;
use crate::pipeline::model::{CalculateRequest, CalculateResponse};
use crate::storage::repository::{CalculationRepository, NewCalculation};
use log::{error, info};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Instant;

/// 端到端计算服务：解析 → 匹配 → 计算 → 落库。
/// 任何一步失败都折算成带分型与上下文的失败响应，不向上抛裸错误。
pub struct CalculationService<P, E, C>
where
    P: LlmProvider + Clone,
    E: EmbeddingProvider,
    C: CatalogSearch,
{
    db: Arc<DatabaseConnection>,
    reconciler: HybridReconciler<P, E, C>,
    policy: MatchPolicy,
    cfg: Config,
}

impl<P, E, C> CalculationService<P, E, C>
where
    P: LlmProvider + Clone,
    E: EmbeddingProvider,
    C: CatalogSearch,
{
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: P,
        embedder: E,
        catalog: C,
        policy: MatchPolicy,
        cfg: Config,
    ) -> Self {
        let reconciler = HybridReconciler::new(provider, embedder, catalog, &cfg);
        Self {
            db,
            reconciler,
            policy,
            cfg,
        }
    }

    pub(crate) fn batch_concurrency(&self) -> usize {
        self.cfg.batch_concurrency
    }

    pub(crate) fn batch_pause(&self) -> std::time::Duration {
        self.cfg.batch_pause
    }

    pub async fn calculate(&self, req: &CalculateRequest) -> CalculateResponse {
        let started = Instant::now();

        let rec = match self.reconciler.reconcile(&req.raw_input, self.policy).await {
            Ok(rec) => rec,
            Err(e) => {
                let ms = started.elapsed().as_millis() as i64;
                info!("✗ 计算失败 [{}] ({}ms): {}", e.kind(), ms, e);
                return CalculateResponse::from_error(e, &req.raw_input, ms);
            }
        };

        let emission = match calc::calculate(rec.parsed.quantity, &rec.parsed.unit, &rec.result) {
            Ok(em) => em,
            Err(e) => {
                let ms = started.elapsed().as_millis() as i64;
                let e = ReconcileError::from(e);
                info!("✗ 计算失败 [{}] ({}ms): {}", e.kind(), ms, e);
                return CalculateResponse::from_error(e, &req.raw_input, ms);
            }
        };

        let ms = started.elapsed().as_millis() as i64;
        let parsed_json = match serde_json::to_string(&rec.parsed) {
            Ok(j) => j,
            Err(e) => {
                error!("解析结果序列化失败: {}", e);
                return CalculateResponse::from_error(
                    ReconcileError::Storage(e.to_string()),
                    &req.raw_input,
                    ms,
                );
            }
        };

        let (matched_factor_id, similarity_score, factor_source, embedding_model) =
            match &rec.result {
                MatchResult::Embedding(c) => (
                    c.snapshot.factor_id,
                    Some(c.similarity),
                    c.snapshot.source.clone(),
                    Some(self.cfg.embedding_model.clone()),
                ),
                MatchResult::Reasoning(r) => (None, None, r.source.clone(), None),
            };

        let new_rec = NewCalculation {
            company_id: req.company_id.clone(),
            entry_id: req.entry_id.clone(),
            raw_input: req.raw_input.clone(),
            parsed_json,
            method: rec.result.method().to_string(),
            matched_factor_id,
            similarity_score,
            quantity: emission.effective_quantity,
            unit: emission.factor_unit.clone(),
            emission_factor: emission.emission_factor,
            total_emissions: emission.total_emissions,
            emissions_unit: emission.emissions_unit.clone(),
            co2_emissions: emission.co2_emissions,
            ch4_emissions: emission.ch4_emissions,
            n2o_emissions: emission.n2o_emissions,
            scope: emission.scope,
            confidence_score: rec.combined_confidence,
            factor_source,
            chat_model: self.cfg.chat_model.clone(),
            embedding_model,
            processing_time_ms: ms,
        };

        let record_id = match CalculationRepository::insert(self.db.as_ref(), new_rec).await {
            Ok(id) => id,
            Err(e) => {
                error!("计算记录落库失败: {}", e);
                return CalculateResponse::from_error(
                    ReconcileError::Storage(e.to_string()),
                    &req.raw_input,
                    ms,
                );
            }
        };

        info!(
            "✓ 计算完成 #{}: {} → {:.3} {} ({}, 置信 {:.2}, {}ms)",
            record_id,
            req.raw_input,
            emission.total_emissions,
            emission.emissions_unit,
            rec.result.method(),
            rec.combined_confidence,
            ms
        );
        CalculateResponse::from_success(&rec, &emission, record_id, ms)
    }
}
