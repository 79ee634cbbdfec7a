use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable job record. Deliberately has no `updated_at`; progress is read
/// from `started_at` / `completed_at`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "async_operations")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub bank_id: Uuid,
  pub operation_type: String,
  pub status: String,
  pub worker_id: Option<String>,
  pub payload: Json,
  pub result: Option<Json>,
  pub error_message: Option<String>,
  pub created_at: DateTimeWithTimeZone,
  pub started_at: Option<DateTimeWithTimeZone>,
  pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::bank::Entity",
    from = "Column::BankId",
    to = "super::bank::Column::Id"
  )]
  Bank,
}

impl ActiveModelBehavior for ActiveModel {}
