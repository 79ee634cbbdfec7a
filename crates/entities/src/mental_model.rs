use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Curated per-entity or per-theme summary. At most one model per
/// `(bank_id, entity_id)` when `entity_id` is set.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mental_models")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub bank_id: Uuid,
  pub name: String,
  pub description: String,
  pub content: String,
  pub source_query: String,
  pub embedding: Option<PgVector>,
  pub entity_id: Option<Uuid>,
  pub source_observation_ids: Vec<Uuid>,
  pub tags: Vec<String>,
  pub max_tokens: i32,
  pub refresh_after_consolidation: bool,
  pub last_refreshed_at: Option<DateTimeWithTimeZone>,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::bank::Entity",
    from = "Column::BankId",
    to = "super::bank::Column::Id"
  )]
  Bank,
  #[sea_orm(
    belongs_to = "super::entity::Entity",
    from = "Column::EntityId",
    to = "super::entity::Column::Id"
  )]
  GraphEntity,
}

impl Related<super::bank::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Bank.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
