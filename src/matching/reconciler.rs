use crate::catalog::CatalogSearch;
use crate::config::Config;
use crate::llm::{EmbeddingProvider, LlmProvider};
use crate::matching::model::{
    combined_confidence, Candidate, MatchPolicy, MatchPreference, MatchResult, ReconcileError,
};
use crate::matching::reasoner::ReasoningMatcher;
use crate::matching::retriever::EmbeddingRetriever;
use crate::parse::model::ParsedActivity;
use crate::parse::service::ActivityParser;
use log::{debug, warn};

/// 对账结果：归一后的匹配 + 合成置信 + 备选候选（诊断/展示用）
#[derive(Clone, Debug)]
pub struct Reconciliation {
    pub parsed: ParsedActivity,
    pub result: MatchResult,
    pub combined_confidence: f64,
    pub alternatives: Vec<Candidate>,
}

/// 单路径的尝试结果（内部）：接受 / 无结果 / 基础设施故障
enum PathOutcome<T> {
    Accepted(T),
    Empty,
    Infra(ReconcileError),
}

/// 混合对账器：PARSING → MATCHING → {MATCHED, NO_MATCH, ERROR}。
/// 相同输入、相同目录快照与配置下结果可复现。
pub struct HybridReconciler<P, E, C>
where
    P: LlmProvider + Clone,
    E: EmbeddingProvider,
    C: CatalogSearch,
{
    parser: ActivityParser<P>,
    retriever: EmbeddingRetriever<E, C>,
    reasoner: ReasoningMatcher<P>,
    similarity_threshold: f64,
    parse_confidence_threshold: f64,
    top_k: usize,
}

impl<P, E, C> HybridReconciler<P, E, C>
where
    P: LlmProvider + Clone,
    E: EmbeddingProvider,
    C: CatalogSearch,
{
    pub fn new(provider: P, embedder: E, catalog: C, cfg: &Config) -> Self {
        Self {
            parser: ActivityParser::new(provider.clone(), cfg),
            retriever: EmbeddingRetriever::new(embedder, catalog, cfg),
            reasoner: ReasoningMatcher::new(provider, cfg),
            similarity_threshold: cfg.similarity_threshold,
            parse_confidence_threshold: cfg.parse_confidence_threshold,
            top_k: cfg.match_top_k,
        }
    }

    pub async fn reconcile(
        &self,
        raw_input: &str,
        policy: MatchPolicy,
    ) -> Result<Reconciliation, ReconcileError> {
        // PARSING
        let parsed = self.parser.parse(raw_input).await?;
        debug!(
            "解析完成: category={} quantity={} unit={} confidence={:.2}",
            parsed.category, parsed.quantity, parsed.unit, parsed.confidence
        );

        // 低置信且无数量：不值得对零数量做匹配，直接快败
        if parsed.confidence < self.parse_confidence_threshold && parsed.quantity == 0.0 {
            return Err(ReconcileError::InsufficientData {
                confidence: parsed.confidence,
                parsed,
            });
        }

        // MATCHING
        if policy.concurrent {
            self.reconcile_concurrent(parsed, policy.preference).await
        } else {
            self.reconcile_sequential(parsed, policy.preference).await
        }
    }

    /// 阈值过滤在本层做：低于线的候选保留下来作为 NoMatch 诊断上下文
    async fn run_embedding(&self, parsed: &ParsedActivity) -> (PathOutcome<Candidate>, Vec<Candidate>) {
        match self.retriever.retrieve(&parsed.description, self.top_k, 0.0).await {
            Ok(ranked) => {
                let (accepted, rest): (Vec<_>, Vec<_>) = ranked
                    .into_iter()
                    .partition(|c| c.similarity >= self.similarity_threshold);
                let mut iter = accepted.into_iter();
                match iter.next() {
                    Some(top) => {
                        // 除 top 外的达标候选 + 未达标候选都算备选，顺序即排序
                        let mut alternatives: Vec<Candidate> = iter.collect();
                        alternatives.extend(rest);
                        (PathOutcome::Accepted(top), alternatives)
                    }
                    None => (PathOutcome::Empty, rest),
                }
            }
            Err(e) => (PathOutcome::Infra(e), Vec::new()),
        }
    }

    async fn run_reasoning(&self, parsed: &ParsedActivity) -> PathOutcome<crate::matching::model::ReasoningResult> {
        match self.reasoner.match_activity(parsed).await {
            Ok(Some(r)) => PathOutcome::Accepted(r),
            Ok(None) => PathOutcome::Empty,
            Err(e) => PathOutcome::Infra(e),
        }
    }

    /// 两路并发，join 后按固定公式裁决；不允许无限等待（超时在各自调用点处理）
    async fn reconcile_concurrent(
        &self,
        parsed: ParsedActivity,
        preference: MatchPreference,
    ) -> Result<Reconciliation, ReconcileError> {
        let ((emb, below), rsn) = tokio::join!(
            self.run_embedding(&parsed),
            self.run_reasoning(&parsed)
        );
        self.decide(parsed, emb, below, rsn, preference)
    }

    /// 首选路径接受即停；未接受或基础设施故障时回退另一路径
    async fn reconcile_sequential(
        &self,
        parsed: ParsedActivity,
        preference: MatchPreference,
    ) -> Result<Reconciliation, ReconcileError> {
        match preference {
            MatchPreference::EmbeddingFirst => {
                let (emb, below) = self.run_embedding(&parsed).await;
                if let PathOutcome::Accepted(top) = emb {
                    return Ok(self.accept_embedding(parsed, top, below));
                }
                let rsn = self.run_reasoning(&parsed).await;
                self.decide(parsed, emb, below, rsn, preference)
            }
            MatchPreference::ReasoningFirst => {
                let rsn = self.run_reasoning(&parsed).await;
                if let PathOutcome::Accepted(r) = rsn {
                    return Ok(self.accept_reasoning(parsed, r));
                }
                let (emb, below) = self.run_embedding(&parsed).await;
                self.decide(parsed, emb, below, rsn, preference)
            }
        }
    }

    fn accept_embedding(
        &self,
        parsed: ParsedActivity,
        top: Candidate,
        alternatives: Vec<Candidate>,
    ) -> Reconciliation {
        let combined = combined_confidence(parsed.confidence, top.similarity);
        Reconciliation {
            parsed,
            result: MatchResult::Embedding(top),
            combined_confidence: combined,
            alternatives,
        }
    }

    fn accept_reasoning(
        &self,
        parsed: ParsedActivity,
        r: crate::matching::model::ReasoningResult,
    ) -> Reconciliation {
        let combined = combined_confidence(parsed.confidence, r.confidence);
        Reconciliation {
            parsed,
            result: MatchResult::Reasoning(r),
            combined_confidence: combined,
            alternatives: Vec::new(),
        }
    }

    /// 统一裁决。双路都接受时取合成置信更高者，持平按偏好；
    /// 双路都无果但有基础设施故障时上报故障而不是 NoMatch。
    fn decide(
        &self,
        parsed: ParsedActivity,
        emb: PathOutcome<Candidate>,
        other_candidates: Vec<Candidate>,
        rsn: PathOutcome<crate::matching::model::ReasoningResult>,
        preference: MatchPreference,
    ) -> Result<Reconciliation, ReconcileError> {
        match (emb, rsn) {
            (PathOutcome::Accepted(top), PathOutcome::Accepted(r)) => {
                let ce = combined_confidence(parsed.confidence, top.similarity);
                let cr = combined_confidence(parsed.confidence, r.confidence);
                if top.snapshot.scope != r.scope {
                    warn!(
                        "两路 scope 不一致: embedding={:?} reasoning={:?}，以胜出路径为准",
                        top.snapshot.scope, r.scope
                    );
                }
                let embedding_wins = match ce.partial_cmp(&cr) {
                    Some(std::cmp::Ordering::Greater) => true,
                    Some(std::cmp::Ordering::Less) => false,
                    _ => preference == MatchPreference::EmbeddingFirst,
                };
                if embedding_wins {
                    Ok(self.accept_embedding(parsed, top, other_candidates))
                } else {
                    Ok(self.accept_reasoning(parsed, r))
                }
            }
            (PathOutcome::Accepted(top), rsn) => {
                // 另一路的故障不吞掉，记下来再采用本路结果
                if let PathOutcome::Infra(e) = rsn {
                    warn!("推理路径故障，采用嵌入路径结果: {}", e);
                }
                Ok(self.accept_embedding(parsed, top, other_candidates))
            }
            (emb, PathOutcome::Accepted(r)) => {
                if let PathOutcome::Infra(e) = emb {
                    warn!("嵌入路径故障，采用推理路径结果: {}", e);
                }
                Ok(self.accept_reasoning(parsed, r))
            }
            (PathOutcome::Infra(e), PathOutcome::Empty) => Err(e),
            (PathOutcome::Empty, PathOutcome::Infra(e)) => Err(e),
            (PathOutcome::Infra(e), PathOutcome::Infra(e2)) => {
                warn!("两路均故障, 推理路径: {}", e2);
                Err(e)
            }
            (PathOutcome::Empty, PathOutcome::Empty) => Err(ReconcileError::NoMatch {
                parsed,
                embedding_candidates: other_candidates,
                reasoning_note: Some("reasoning path produced no cited result".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::llm::{ChatRequest, ChatResponse, LlmError};
    use crate::matching::model::FactorSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// 聊天假件：按调用顺序回放脚本
    #[derive(Clone)]
    struct ScriptedChat {
        outputs: Arc<Vec<String>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedChat {
        fn new(outputs: Vec<&str>) -> Self {
            Self {
                outputs: Arc::new(outputs.into_iter().map(|s| s.to_string()).collect()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedChat {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, LlmError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                text: self
                    .outputs
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| "{}".to_string()),
                raw: None,
            })
        }
    }

    /// 嵌入假件：固定向量 + 调用计数（验证门控时确实没发起检索）
    struct CountingEmbedder {
        vector: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::llm::EmbeddingProvider for CountingEmbedder {
        async fn embed(
            &self,
            _model: &str,
            _text: &str,
            _timeout: Duration,
        ) -> Result<Vec<f32>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl crate::llm::EmbeddingProvider for DownEmbedder {
        async fn embed(
            &self,
            _model: &str,
            _text: &str,
            timeout: Duration,
        ) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Timeout(timeout))
        }
    }

    fn cfg() -> Config {
        Config {
            embedding_dimension: 3,
            ..Config::default()
        }
    }

    fn diesel_snapshot(similarity_axis: Vec<f32>) -> (FactorSnapshot, Vec<f32>) {
        (
            FactorSnapshot {
                factor_id: Some(42),
                description: "Diesel, average biofuel blend".to_string(),
                source: "DEFRA".to_string(),
                year_published: 2024,
                unit: "L".to_string(),
                ghg_unit: "kg CO2e".to_string(),
                co2_factor: Some(2.51),
                ch4_factor: Some(0.002),
                n2o_factor: Some(0.03),
                total_factor: 2.68,
                scope: Some(1),
                category_depth: 3,
            },
            similarity_axis,
        )
    }

    const PARSE_DIESEL: &str = r#"{"category":"fuel","fuel_type":"diesel","quantity":100,"unit":"L","description":"diesel fuel for vehicles","confidence":0.9}"#;
    const PARSE_VAGUE: &str = r#"{"category":"fuel","quantity":0,"unit":"L","description":"some diesel usage","confidence":0.2}"#;
    const REASON_CITED: &str = r#"{"factor_value":2.7,"unit":"L","ghg_unit":"kg CO2e","source":"DEFRA 2024","scope":1,"confidence":0.8}"#;
    const REASON_UNCITED: &str = r#"{"factor_value":2.7,"unit":"L","source":"","confidence":0.99}"#;

    fn catalog_with_diesel(axis: Vec<f32>) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new("text-embedding-3-small");
        let (snap, vec) = diesel_snapshot(axis);
        catalog.push(snap, vec);
        catalog
    }

    #[tokio::test]
    async fn embedding_first_accepts_close_candidate() {
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_CITED]);
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let rec = HybridReconciler::new(chat, embedder, catalog_with_diesel(vec![1.0, 0.05, 0.0]), &cfg());
        let got = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap();
        match &got.result {
            MatchResult::Embedding(c) => {
                assert_eq!(c.snapshot.factor_id, Some(42));
                assert!(c.similarity > 0.99);
            }
            other => panic!("expected embedding result, got {other:?}"),
        }
        // 合成置信 = 解析置信 × 相似度
        assert!((got.combined_confidence - 0.9 * got.result.match_confidence()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn insufficient_data_fails_fast_without_retrieval() {
        let chat = ScriptedChat::new(vec![PARSE_VAGUE]);
        let embed_calls = Arc::new(AtomicUsize::new(0));
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: embed_calls.clone(),
        };
        let rec = HybridReconciler::new(chat, embedder, catalog_with_diesel(vec![1.0, 0.0, 0.0]), &cfg());
        let err = rec
            .reconcile("some diesel usage", MatchPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InsufficientData { .. }));
        assert_eq!(embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn below_threshold_and_uncited_reasoning_is_no_match_with_context() {
        // 目录向量与查询夹角大：相似度 ≈ 0.55 < 0.6
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_UNCITED]);
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let catalog = catalog_with_diesel(vec![0.55, (1.0f32 - 0.55 * 0.55).sqrt(), 0.0]);
        let rec = HybridReconciler::new(chat, embedder, catalog, &cfg());
        let err = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap_err();
        match err {
            ReconcileError::NoMatch {
                parsed,
                embedding_candidates,
                reasoning_note,
            } => {
                assert_eq!(parsed.quantity, 100.0);
                assert_eq!(embedding_candidates.len(), 1);
                assert!(embedding_candidates[0].similarity < 0.6);
                assert!(reasoning_note.is_some());
            }
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn similarity_exactly_at_threshold_is_accepted() {
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_UNCITED]);
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        // cos = 0.6 精确命中阈值（闭区间）
        let catalog = catalog_with_diesel(vec![0.6, 0.8, 0.0]);
        let rec = HybridReconciler::new(chat, embedder, catalog, &cfg());
        let got = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap();
        assert!(matches!(got.result, MatchResult::Embedding(_)));
        assert!((got.result.match_confidence() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn both_paths_succeed_higher_combined_confidence_wins() {
        // 嵌入相似度 ≈ 0.62, 推理自报 0.8 → 推理胜
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_CITED]);
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let catalog = catalog_with_diesel(vec![0.62, (1.0f32 - 0.62 * 0.62).sqrt(), 0.0]);
        let rec = HybridReconciler::new(chat, embedder, catalog, &cfg());
        let got = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap();
        match &got.result {
            MatchResult::Reasoning(r) => assert_eq!(r.source, "DEFRA 2024"),
            other => panic!("expected reasoning result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_embedding_first_skips_reasoning_on_accept() {
        let chat = ScriptedChat::new(vec![PARSE_DIESEL]);
        let chat_calls = chat.calls.clone();
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let rec = HybridReconciler::new(chat, embedder, catalog_with_diesel(vec![1.0, 0.0, 0.0]), &cfg());
        let policy = MatchPolicy {
            preference: MatchPreference::EmbeddingFirst,
            concurrent: false,
        };
        let got = rec.reconcile("100L diesel", policy).await.unwrap();
        assert!(matches!(got.result, MatchResult::Embedding(_)));
        // 只有解析那一次 chat 调用，推理路径被跳过
        assert_eq!(chat_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retrieval_outage_falls_back_to_reasoning() {
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_CITED]);
        let rec = HybridReconciler::new(
            chat,
            DownEmbedder,
            MemoryCatalog::new("text-embedding-3-small"),
            &cfg(),
        );
        let got = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap();
        assert!(matches!(got.result, MatchResult::Reasoning(_)));
    }

    #[tokio::test]
    async fn retrieval_outage_with_uncited_reasoning_surfaces_infrastructure() {
        let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_UNCITED]);
        let rec = HybridReconciler::new(
            chat,
            DownEmbedder,
            MemoryCatalog::new("text-embedding-3-small"),
            &cfg(),
        );
        let err = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Infrastructure(_)));
    }

    /// 首次调用返回解析结果，之后的调用（推理路径）全部超时
    #[derive(Clone)]
    struct ParseThenOutageChat {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for ParseThenOutageChat {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ChatResponse {
                    text: PARSE_DIESEL.to_string(),
                    raw: None,
                })
            } else {
                Err(LlmError::Timeout(req.timeout))
            }
        }
    }

    #[tokio::test]
    async fn reasoning_outage_does_not_poison_embedding_accept() {
        let chat = ParseThenOutageChat {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let embedder = CountingEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let rec = HybridReconciler::new(
            chat,
            embedder,
            catalog_with_diesel(vec![1.0, 0.05, 0.0]),
            &cfg(),
        );
        let got = rec
            .reconcile("100L diesel for vehicles", MatchPolicy::default())
            .await
            .unwrap();
        assert!(matches!(got.result, MatchResult::Embedding(_)));
    }

    #[tokio::test]
    async fn repeated_runs_are_deterministic() {
        for _ in 0..2 {
            let chat = ScriptedChat::new(vec![PARSE_DIESEL, REASON_CITED]);
            let embedder = CountingEmbedder {
                vector: vec![1.0, 0.0, 0.0],
                calls: Arc::new(AtomicUsize::new(0)),
            };
            let rec = HybridReconciler::new(
                chat,
                embedder,
                catalog_with_diesel(vec![1.0, 0.05, 0.0]),
                &cfg(),
            );
            let got = rec
                .reconcile("100L diesel for vehicles", MatchPolicy::default())
                .await
                .unwrap();
            match &got.result {
                MatchResult::Embedding(c) => assert_eq!(c.snapshot.factor_id, Some(42)),
                other => panic!("nondeterministic outcome: {other:?}"),
            }
            assert!((got.combined_confidence - 0.9 * got.result.match_confidence()).abs() < 1e-9);
        }
    }
}
