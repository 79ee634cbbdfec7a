use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Symmetric pair edge, canonicalized with `entity_a_id < entity_b_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entity_cooccurrences")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub entity_a_id: Uuid,
  #[sea_orm(primary_key, auto_increment = false)]
  pub entity_b_id: Uuid,
  pub cooccurrence_count: i32,
  pub last_cooccurred: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::entity::Entity",
    from = "Column::EntityAId",
    to = "super::entity::Column::Id"
  )]
  EntityA,
  #[sea_orm(
    belongs_to = "super::entity::Entity",
    from = "Column::EntityBId",
    to = "super::entity::Column::Id"
  )]
  EntityB,
}

impl ActiveModelBehavior for ActiveModel {}
