use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One recorded piece of knowledge. `fact_type` distinguishes raw facts
/// (`world`, `experience`) from consolidated `observation` rows; the
/// observation-only columns stay at their defaults on raw facts.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memory_units")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub bank_id: Uuid,
  pub document_id: Option<Uuid>,
  pub text: String,
  pub context: Option<String>,
  pub embedding: Option<PgVector>,
  pub fact_type: String,
  pub fact_kind: Option<String>,
  pub what: Option<String>,
  pub who: Vec<String>,
  pub when_description: Option<String>,
  pub where_description: Option<String>,
  pub why_description: Option<String>,
  pub event_date: Option<DateTimeWithTimeZone>,
  pub occurred_start: Option<DateTimeWithTimeZone>,
  pub occurred_end: Option<DateTimeWithTimeZone>,
  pub mentioned_at: DateTimeWithTimeZone,
  pub proof_count: i32,
  pub source_memory_ids: Vec<Uuid>,
  /// append-only list of `{at, change}` records
  pub history: Json,
  pub confidence_score: Option<f32>,
  pub consolidated_at: Option<DateTimeWithTimeZone>,
  pub tags: Vec<String>,
  pub metadata: Json,
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
  #[sea_orm(has_many = "super::chunk::Entity")]
  Chunk,
  #[sea_orm(has_many = "super::unit_entity::Entity")]
  UnitEntity,
}

impl Related<super::chunk::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Chunk.def()
  }
}

impl Related<super::bank::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Bank.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
