use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "emission_factors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub source: String, // DEFRA / EPA / IPCC ...
    pub year_published: i32,
    #[sea_orm(nullable)]
    pub region: Option<String>,
    pub category_l1: String,
    #[sea_orm(nullable)]
    pub category_l2: Option<String>,
    #[sea_orm(nullable)]
    pub category_l3: Option<String>,
    #[sea_orm(nullable)]
    pub category_l4: Option<String>,
    #[sea_orm(nullable)]
    pub subcategory: Option<String>,
    #[sea_orm(nullable)]
    pub fuel_type: Option<String>,
    pub description: String,
    pub unit: String,     // 活动量单位，如 L / kWh / km
    pub ghg_unit: String, // 排放量单位，通常 kg CO2e

    // 分气体因子，各自可缺
    #[sea_orm(nullable)]
    pub co2_factor: Option<f64>,
    #[sea_orm(nullable)]
    pub ch4_factor: Option<f64>,
    #[sea_orm(nullable)]
    pub n2o_factor: Option<f64>,
    /// 权威乘数，恒为非负
    pub total_factor: f64,
    #[sea_orm(nullable)]
    pub scope: Option<i32>, // 1/2/3

    // 嵌入异步回填；一经写入不原地改写，模型换版走修正批次
    #[sea_orm(nullable)]
    pub embedding_json: Option<String>,
    #[sea_orm(nullable)]
    pub embedding_model: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 类目路径上非空层级数，用于相同相似度时的并列裁决
    pub fn category_depth(&self) -> usize {
        1 + [&self.category_l2, &self.category_l3, &self.category_l4]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }
}
