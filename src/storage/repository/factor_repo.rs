use crate::storage::entity::emission_factor::{
    self, ActiveModel as FactorActiveModel, Entity as EmissionFactor, Model as FactorModel,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

/// 目录摄取用的因子定义（JSON 文件里的一行）
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FactorDefinition {
    pub source: String,
    pub year_published: i32,
    #[serde(default)]
    pub region: Option<String>,
    pub category_l1: String,
    #[serde(default)]
    pub category_l2: Option<String>,
    #[serde(default)]
    pub category_l3: Option<String>,
    #[serde(default)]
    pub category_l4: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    pub description: String,
    pub unit: String,
    pub ghg_unit: String,
    #[serde(default)]
    pub co2_factor: Option<f64>,
    #[serde(default)]
    pub ch4_factor: Option<f64>,
    #[serde(default)]
    pub n2o_factor: Option<f64>,
    pub total_factor: f64,
    #[serde(default)]
    pub scope: Option<i32>,
}

impl FactorDefinition {
    /// total_factor 必须存在且非负；scope 只允许 1/2/3
    pub fn validate(&self) -> Result<(), String> {
        if !self.total_factor.is_finite() || self.total_factor < 0.0 {
            return Err(format!(
                "total_factor must be non-negative, got {}",
                self.total_factor
            ));
        }
        if self.description.trim().is_empty() {
            return Err("empty description".to_string());
        }
        if self.unit.trim().is_empty() {
            return Err("empty unit".to_string());
        }
        if let Some(s) = self.scope {
            if !(1..=3).contains(&s) {
                return Err(format!("scope must be 1/2/3, got {s}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FactorIngestResult {
    pub inserted: usize,
    pub rejected: Vec<String>,
}

pub struct FactorRepository;

impl FactorRepository {
    pub async fn insert_batch(
        db: &DatabaseConnection,
        defs: Vec<FactorDefinition>,
    ) -> Result<FactorIngestResult, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let mut result = FactorIngestResult::default();
        let mut models = Vec::new();

        for (i, def) in defs.into_iter().enumerate() {
            if let Err(reason) = def.validate() {
                if result.rejected.len() < 10 {
                    result.rejected.push(format!("row {i}: {reason}"));
                } else {
                    result.rejected.push(format!("row {i}: (truncated)"));
                }
                continue;
            }
            models.push(FactorActiveModel {
                source: Set(def.source),
                year_published: Set(def.year_published),
                region: Set(def.region),
                category_l1: Set(def.category_l1),
                category_l2: Set(def.category_l2),
                category_l3: Set(def.category_l3),
                category_l4: Set(def.category_l4),
                subcategory: Set(def.subcategory),
                fuel_type: Set(def.fuel_type),
                description: Set(def.description),
                unit: Set(def.unit),
                ghg_unit: Set(def.ghg_unit),
                co2_factor: Set(def.co2_factor),
                ch4_factor: Set(def.ch4_factor),
                n2o_factor: Set(def.n2o_factor),
                total_factor: Set(def.total_factor),
                scope: Set(def.scope),
                embedding_json: Set(None),
                embedding_model: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            });
        }

        result.inserted = models.len();
        if !models.is_empty() {
            EmissionFactor::insert_many(models).exec(db).await?;
        }
        Ok(result)
    }

    /// 未用当前模型嵌入的因子（含从未嵌入和旧模型残留），回填任务的扫表入口。
    /// exclude 是本轮已失败的行，排除掉免得堵住扫描窗口
    pub async fn find_unembedded(
        db: &DatabaseConnection,
        model_id: &str,
        exclude: &[i32],
        limit: u64,
    ) -> Result<Vec<FactorModel>, sea_orm::DbErr> {
        EmissionFactor::find()
            .filter(
                emission_factor::Column::EmbeddingModel
                    .is_null()
                    .or(emission_factor::Column::EmbeddingModel.ne(model_id)),
            )
            .filter(emission_factor::Column::Id.is_not_in(exclude.iter().copied()))
            .limit(limit)
            .all(db)
            .await
    }

    /// 回填写入：带模型 id 落库，这是检索侧做版本比对的依据
    pub async fn set_embedding(
        db: &DatabaseConnection,
        id: i32,
        model_id: &str,
        embedding: &[f32],
    ) -> Result<(), sea_orm::DbErr> {
        let json = serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_string());
        let now = Utc::now().timestamp();
        EmissionFactor::update_many()
            .col_expr(emission_factor::Column::EmbeddingJson, Expr::value(json))
            .col_expr(
                emission_factor::Column::EmbeddingModel,
                Expr::value(model_id.to_string()),
            )
            .col_expr(emission_factor::Column::UpdatedAt, Expr::value(now))
            .filter(emission_factor::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// 当前模型已嵌入的全部因子，供相似度扫描
    pub async fn load_embedded(
        db: &DatabaseConnection,
        model_id: &str,
    ) -> Result<Vec<FactorModel>, sea_orm::DbErr> {
        EmissionFactor::find()
            .filter(emission_factor::Column::EmbeddingJson.is_not_null())
            .filter(emission_factor::Column::EmbeddingModel.eq(model_id))
            .all(db)
            .await
    }

    /// 是否存在用其它嵌入模型写入的行：有则属于版本错配，检索必须拒绝
    pub async fn count_foreign_embeddings(
        db: &DatabaseConnection,
        model_id: &str,
    ) -> Result<u64, sea_orm::DbErr> {
        EmissionFactor::find()
            .filter(emission_factor::Column::EmbeddingJson.is_not_null())
            .filter(emission_factor::Column::EmbeddingModel.ne(model_id))
            .count(db)
            .await
    }

    pub async fn counts(db: &DatabaseConnection) -> Result<(u64, u64), sea_orm::DbErr> {
        let total = EmissionFactor::find().count(db).await?;
        let embedded = EmissionFactor::find()
            .filter(emission_factor::Column::EmbeddingJson.is_not_null())
            .count(db)
            .await?;
        Ok((total, embedded))
    }
}
