mod calc;
mod catalog;
mod commands;
mod config;
mod llm;
mod matching;
mod parse;
mod pipeline;
mod storage;

use crate::catalog::{CatalogIngestor, DbCatalog};
use crate::commands::app_command::USAGE;
use crate::commands::AppCommand;
use crate::config::Config;
use crate::llm::{AnyProvider, OpenAiProvider};
use crate::matching::model::{MatchPolicy, MatchPreference};
use crate::parse::document::DocumentExtractor;
use crate::pipeline::model::CalculateRequest;
use crate::pipeline::CalculationService;
use crate::storage::establish_connection;
use crate::storage::repository::{CalculationRepository, FactorRepository};
use log::info;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;

/// 批量请求文件里的一行；company_id 来自命令行参数
#[derive(Debug, Deserialize)]
struct BatchFileItem {
    raw_input: String,
    #[serde(default)]
    entry_id: Option<String>,
}

fn policy_from_env() -> MatchPolicy {
    let preference = match std::env::var("MATCH_PREFERENCE")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "reasoning" => MatchPreference::ReasoningFirst,
        _ => MatchPreference::EmbeddingFirst,
    };
    let concurrent = std::env::var("MATCH_CONCURRENT")
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "off"))
        .unwrap_or(true);
    MatchPolicy {
        preference,
        concurrent,
    }
}

fn build_service(
    db: Arc<DatabaseConnection>,
    cfg: &Config,
) -> anyhow::Result<CalculationService<AnyProvider, OpenAiProvider, DbCatalog>> {
    let chat = AnyProvider::from_env()?;
    // 嵌入始终走 OpenAI 兼容端点
    let embedder = OpenAiProvider::from_env()?;
    let catalog = DbCatalog::new(db.clone());
    Ok(CalculationService::new(
        db,
        chat,
        embedder,
        catalog,
        policy_from_env(),
        cfg.clone(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_calculate(
    db: Arc<DatabaseConnection>,
    cfg: &Config,
    company_id: String,
    text: String,
) -> anyhow::Result<bool> {
    let service = build_service(db, cfg)?;
    let resp = service
        .calculate(&CalculateRequest {
            raw_input: text,
            company_id,
            entry_id: None,
        })
        .await;
    print_json(&resp)?;
    Ok(resp.success)
}

async fn run_batch(
    db: Arc<DatabaseConnection>,
    cfg: &Config,
    company_id: String,
    path: String,
) -> anyhow::Result<bool> {
    let raw = tokio::fs::read_to_string(&path).await?;
    let items: Vec<BatchFileItem> = serde_json::from_str(&raw)?;
    let requests: Vec<CalculateRequest> = items
        .into_iter()
        .map(|item| CalculateRequest {
            raw_input: item.raw_input,
            company_id: company_id.clone(),
            entry_id: item.entry_id,
        })
        .collect();

    let service = build_service(db, cfg)?;
    let summary = service.calculate_batch(&requests).await;
    let all_ok = summary.failed == 0;
    print_json(&summary)?;
    Ok(all_ok)
}

async fn run_extract(cfg: &Config, path: String) -> anyhow::Result<bool> {
    let text = tokio::fs::read_to_string(&path).await?;
    let extractor = DocumentExtractor::new(AnyProvider::from_env()?, cfg);
    let report = extractor.extract(&text).await?;
    if report.requires_review {
        info!("⚠ 抽取结果有缺失字段，需人工复核");
    }
    for entry in report.entries.iter().filter(|e| e.missing_fields.is_empty()) {
        info!("可直接送入 calculate: {}", entry.as_raw_input());
    }
    print_json(&report)?;
    Ok(true)
}

async fn run_ingest(
    db: Arc<DatabaseConnection>,
    cfg: &Config,
    path: String,
) -> anyhow::Result<bool> {
    let embedder = OpenAiProvider::from_env()?;
    let ingestor = CatalogIngestor::new(db, embedder, cfg.clone());
    let result = ingestor.ingest_file(&path).await?;
    println!(
        "入库 {} 条, 拒绝 {} 条",
        result.inserted,
        result.rejected.len()
    );
    Ok(true)
}

async fn run_backfill(db: Arc<DatabaseConnection>, cfg: &Config) -> anyhow::Result<bool> {
    let embedder = OpenAiProvider::from_env()?;
    let ingestor = CatalogIngestor::new(db, embedder, cfg.clone());
    let result = ingestor.backfill_embeddings().await?;
    println!("嵌入 {} 条, 失败 {} 条", result.embedded, result.failed);
    Ok(result.failed == 0)
}

async fn run_records(
    db: Arc<DatabaseConnection>,
    company_id: String,
    limit: u64,
) -> anyhow::Result<bool> {
    let rows = CalculationRepository::recent_for_company(db.as_ref(), &company_id, limit).await?;
    print_json(&rows)?;
    Ok(true)
}

async fn run_stats(db: Arc<DatabaseConnection>) -> anyhow::Result<bool> {
    let (factors_total, factors_embedded) = FactorRepository::counts(db.as_ref()).await?;
    let (embedding, reasoning) = CalculationRepository::method_counts(db.as_ref()).await?;
    print_json(&serde_json::json!({
        "factors": { "total": factors_total, "embedded": factors_embedded },
        "calculations": { "embedding": embedding, "reasoning": reasoning },
    }))?;
    Ok(true)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("carbonmatch", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .filter_module("sea_orm", log::LevelFilter::Warn)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args
        .join(" ")
        .parse::<AppCommand>()
        .unwrap_or(AppCommand::Help);

    match cmd {
        AppCommand::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        AppCommand::Unknown(msg) => {
            eprintln!("{msg}");
            eprintln!();
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
        _ => {}
    }

    let cfg = Config::from_env();

    // extract 不碰存储，不在这里建库；其余命令才打开连接
    let ok = match cmd {
        AppCommand::Extract { path } => run_extract(&cfg, path).await?,
        cmd => {
            let db = Arc::new(establish_connection(&cfg.database_url).await?);
            match cmd {
                AppCommand::Calculate { company_id, text } => {
                    run_calculate(db, &cfg, company_id, text).await?
                }
                AppCommand::Batch { company_id, path } => {
                    run_batch(db, &cfg, company_id, path).await?
                }
                AppCommand::Ingest { path } => run_ingest(db, &cfg, path).await?,
                AppCommand::EmbedBackfill => run_backfill(db, &cfg).await?,
                AppCommand::Records { company_id, limit } => {
                    run_records(db, company_id, limit).await?
                }
                AppCommand::Stats => run_stats(db).await?,
                AppCommand::Extract { .. } | AppCommand::Help | AppCommand::Unknown(_) => {
                    unreachable!()
                }
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
