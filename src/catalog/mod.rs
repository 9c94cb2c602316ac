pub mod ingest;
pub mod search;

pub use ingest::CatalogIngestor;
pub use search::{cosine_similarity, CatalogError, CatalogSearch, DbCatalog, MemoryCatalog};
