use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Directed edge in the unit graph. `entity_id` records provenance for
/// entity-derived edges and is nulled (not cascaded) when the entity goes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memory_links")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub from_unit_id: Uuid,
  pub to_unit_id: Uuid,
  pub link_type: String,
  pub entity_id: Option<Uuid>,
  pub weight: f32,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::memory_unit::Entity",
    from = "Column::FromUnitId",
    to = "super::memory_unit::Column::Id"
  )]
  FromUnit,
  #[sea_orm(
    belongs_to = "super::memory_unit::Entity",
    from = "Column::ToUnitId",
    to = "super::memory_unit::Column::Id"
  )]
  ToUnit,
}

impl ActiveModelBehavior for ActiveModel {}
