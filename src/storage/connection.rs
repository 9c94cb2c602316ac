use crate::storage::entity::{calculation_record, emission_factor};
use log::info;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Info);

    let db = Database::connect(opt).await?;

    // 启用 WAL 模式
    let _ = sea_orm::ConnectionTrait::execute(
        &db,
        sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ),
    )
    .await?;

    // 创建表（如果不存在）
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = builder.build(
        schema
            .create_table_from_entity(emission_factor::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    let stmt = builder.build(
        schema
            .create_table_from_entity(calculation_record::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    // 嵌入回填按 embedding_model 扫未处理行
    let _ = sea_orm::ConnectionTrait::execute(
        &db,
        sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_emission_factors_embedding_model ON emission_factors(embedding_model);".to_string(),
        ),
    )
    .await?;

    // 调用方按 (entry_id, calculated_at) 去重与审计回查
    let _ = sea_orm::ConnectionTrait::execute(
        &db,
        sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_calculation_records_entry ON calculation_records(entry_id, calculated_at);".to_string(),
        ),
    )
    .await?;

    info!("Database connection established with WAL mode and table initialized.");

    Ok(db)
}
