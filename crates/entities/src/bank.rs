use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "banks")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub name: String,
  pub mission: String,
  pub background: String,
  /// `{skepticism, literalism, empathy}`, each 1..=5
  pub disposition: Json,
  pub directives: Vec<String>,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::memory_unit::Entity")]
  MemoryUnit,
  #[sea_orm(has_many = "super::entity::Entity")]
  GraphEntity,
  #[sea_orm(has_many = "super::mental_model::Entity")]
  MentalModel,
}

impl Related<super::memory_unit::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::MemoryUnit.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
