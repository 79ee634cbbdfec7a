use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pre-split passage of a unit's text, embedded for `expand`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub unit_id: Uuid,
  pub chunk_index: i32,
  pub text: String,
  pub embedding: Option<PgVector>,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::memory_unit::Entity",
    from = "Column::UnitId",
    to = "super::memory_unit::Column::Id"
  )]
  MemoryUnit,
}

impl Related<super::memory_unit::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::MemoryUnit.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
