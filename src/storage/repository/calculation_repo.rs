use crate::storage::entity::calculation_record::{
    self, ActiveModel as RecordActiveModel, Entity as CalculationRecord, Model as RecordModel,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

/// 待落库的一条计算结果；insert 时补 calculated_at
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewCalculation {
    pub company_id: String,
    pub entry_id: Option<String>,
    pub raw_input: String,
    pub parsed_json: String,
    pub method: String,
    pub matched_factor_id: Option<i32>,
    pub similarity_score: Option<f64>,
    pub quantity: f64,
    pub unit: String,
    pub emission_factor: f64,
    pub total_emissions: f64,
    pub emissions_unit: String,
    pub co2_emissions: Option<f64>,
    pub ch4_emissions: Option<f64>,
    pub n2o_emissions: Option<f64>,
    pub scope: Option<i32>,
    pub confidence_score: f64,
    pub factor_source: String,
    pub chat_model: String,
    pub embedding_model: Option<String>,
    pub processing_time_ms: i64,
}

pub struct CalculationRepository;

impl CalculationRepository {
    /// 只追加：同一 entry 重算会落新行，去重交给调用方按 (entry_id, calculated_at)
    pub async fn insert(
        db: &DatabaseConnection,
        rec: NewCalculation,
    ) -> Result<i32, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let model = RecordActiveModel {
            company_id: Set(rec.company_id),
            entry_id: Set(rec.entry_id),
            raw_input: Set(rec.raw_input),
            parsed_json: Set(rec.parsed_json),
            method: Set(rec.method),
            matched_factor_id: Set(rec.matched_factor_id),
            similarity_score: Set(rec.similarity_score),
            quantity: Set(rec.quantity),
            unit: Set(rec.unit),
            emission_factor: Set(rec.emission_factor),
            total_emissions: Set(rec.total_emissions),
            emissions_unit: Set(rec.emissions_unit),
            co2_emissions: Set(rec.co2_emissions),
            ch4_emissions: Set(rec.ch4_emissions),
            n2o_emissions: Set(rec.n2o_emissions),
            scope: Set(rec.scope),
            confidence_score: Set(rec.confidence_score),
            factor_source: Set(rec.factor_source),
            chat_model: Set(rec.chat_model),
            embedding_model: Set(rec.embedding_model),
            processing_time_ms: Set(rec.processing_time_ms),
            calculated_at: Set(now),
            ..Default::default()
        };
        let inserted = model.insert(db).await?;
        Ok(inserted.id)
    }

    pub async fn recent_for_company(
        db: &DatabaseConnection,
        company_id: &str,
        limit: u64,
    ) -> Result<Vec<RecordModel>, sea_orm::DbErr> {
        CalculationRecord::find()
            .filter(calculation_record::Column::CompanyId.eq(company_id))
            .order_by_desc(calculation_record::Column::CalculatedAt)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn find_by_entry(
        db: &DatabaseConnection,
        entry_id: &str,
    ) -> Result<Vec<RecordModel>, sea_orm::DbErr> {
        CalculationRecord::find()
            .filter(calculation_record::Column::EntryId.eq(entry_id))
            .order_by_desc(calculation_record::Column::CalculatedAt)
            .all(db)
            .await
    }

    pub async fn method_counts(db: &DatabaseConnection) -> Result<(u64, u64), sea_orm::DbErr> {
        let embedding = CalculationRecord::find()
            .filter(calculation_record::Column::Method.eq("EMBEDDING"))
            .count(db)
            .await?;
        let reasoning = CalculationRecord::find()
            .filter(calculation_record::Column::Method.eq("REASONING"))
            .count(db)
            .await?;
        Ok((embedding, reasoning))
    }
}
