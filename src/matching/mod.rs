pub mod model;
pub mod reasoner;
pub mod reconciler;
pub mod retriever;

pub use model::{
    combined_confidence, Candidate, FactorSnapshot, MatchPolicy, MatchPreference, MatchResult,
    ReasoningResult, ReconcileError,
};
pub use reasoner::ReasoningMatcher;
pub use reconciler::{HybridReconciler, Reconciliation};
pub use retriever::EmbeddingRetriever;
