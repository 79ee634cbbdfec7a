use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Canonical named thing (person, organization, ...) within a bank.
/// Uniqueness is case-insensitive on `(bank_id, lower(canonical_name))`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entities")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub bank_id: Uuid,
  pub canonical_name: String,
  pub entity_type: String,
  pub mention_count: i32,
  pub first_seen: DateTimeWithTimeZone,
  pub last_seen: DateTimeWithTimeZone,
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
  #[sea_orm(has_many = "super::unit_entity::Entity")]
  UnitEntity,
}

impl Related<super::bank::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Bank.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
