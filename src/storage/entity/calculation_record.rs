use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 只追加不修改：重算产生新记录，旧记录留作审计
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "calculation_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub company_id: String,
    #[sea_orm(nullable)]
    pub entry_id: Option<String>,
    /// 审计用原始输入，入库后不可变
    pub raw_input: String,
    /// ParsedActivity 快照（JSON），归本记录所有
    pub parsed_json: String,
    pub method: String, // EMBEDDING / REASONING
    /// 软引用：因子删除不得级联孤儿化，数值字段在计算时已拷贝
    #[sea_orm(nullable)]
    pub matched_factor_id: Option<i32>,
    #[sea_orm(nullable)]
    pub similarity_score: Option<f64>,
    pub quantity: f64,
    pub unit: String,
    /// 生效乘数（已含单位换算），total_emissions 随时可由 quantity × emission_factor 复算
    pub emission_factor: f64,
    pub total_emissions: f64,
    pub emissions_unit: String,
    #[sea_orm(nullable)]
    pub co2_emissions: Option<f64>,
    #[sea_orm(nullable)]
    pub ch4_emissions: Option<f64>,
    #[sea_orm(nullable)]
    pub n2o_emissions: Option<f64>,
    #[sea_orm(nullable)]
    pub scope: Option<i32>,
    pub confidence_score: f64,
    pub factor_source: String,
    pub chat_model: String,
    #[sea_orm(nullable)]
    pub embedding_model: Option<String>,
    pub processing_time_ms: i64,
    pub calculated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
