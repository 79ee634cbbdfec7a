use chrono::Utc;
use engram_entities::entity;
use engram_shared::EngramError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, ExprTrait,
  FromQueryResult, QueryFilter, Set, Statement,
  prelude::Expr,
};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Minimum trigram similarity for treating a new mention as an alias of an
/// existing entity.
const ALIAS_SIMILARITY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EntityType {
  Person,
  Organization,
  Location,
  Concept,
  Event,
  #[default]
  Other,
}

#[derive(Debug, Clone)]
pub struct ResolvedEntity {
  pub id: Uuid,
  pub canonical_name: String,
  pub entity_type: EntityType,
  pub is_new: bool,
}

#[derive(FromQueryResult)]
struct SimilarEntityRow {
  id: Uuid,
  canonical_name: String,
  entity_type: String,
}

async fn bump_mention<C: ConnectionTrait>(entity_id: Uuid, db: &C) -> Result<(), EngramError> {
  entity::Entity::update_many()
    .col_expr(
      entity::Column::MentionCount,
      Expr::col(entity::Column::MentionCount).add(1),
    )
    .col_expr(entity::Column::LastSeen, Expr::value(Utc::now()))
    .filter(entity::Column::Id.eq(entity_id))
    .exec(db)
    .await?;

  Ok(())
}

/// Resolve a mention to its canonical entity row, creating one when neither
/// an exact nor a trigram match exists.
///
/// Runs on any `ConnectionTrait` so Retain can keep the resolution inside the
/// unit-insert transaction; a failed insert then never leaves orphan entities.
pub async fn resolve_entity<C: ConnectionTrait>(
  bank_id: Uuid,
  name: &str,
  type_hint: Option<EntityType>,
  db: &C,
) -> Result<ResolvedEntity, EngramError> {
  let name = name.trim();
  if name.is_empty() {
    return Err(EngramError::invalid_input("entity name is empty"));
  }

  // 1. Exact case-insensitive match
  let exact = entity::Entity::find()
    .filter(entity::Column::BankId.eq(bank_id))
    .filter(Expr::cust_with_values(
      "lower(canonical_name) = lower(?)",
      [name],
    ))
    .one(db)
    .await?;

  if let Some(existing) = exact {
    bump_mention(existing.id, db).await?;
    return Ok(ResolvedEntity {
      id: existing.id,
      entity_type: existing.entity_type.parse().unwrap_or_default(),
      canonical_name: existing.canonical_name,
      is_new: false,
    });
  }

  // 2. Trigram alias match
  let stmt = Statement::from_sql_and_values(
    DbBackend::Postgres,
    r"
    SELECT id, canonical_name, entity_type
    FROM entities
    WHERE bank_id = $1 AND similarity(canonical_name, $2) >= $3
    ORDER BY similarity(canonical_name, $2) DESC
    LIMIT 1;
    ",
    vec![bank_id.into(), name.into(), ALIAS_SIMILARITY_THRESHOLD.into()],
  );

  if let Some(row) = db.query_one_raw(stmt).await? {
    let similar = SimilarEntityRow::from_query_result(&row, "")?;
    tracing::debug!(
      mention = name,
      canonical = %similar.canonical_name,
      "Resolved entity mention as alias"
    );
    bump_mention(similar.id, db).await?;
    return Ok(ResolvedEntity {
      id: similar.id,
      entity_type: similar.entity_type.parse().unwrap_or_default(),
      canonical_name: similar.canonical_name,
      is_new: false,
    });
  }

  // 3. New entity
  let id = Uuid::now_v7();
  let now = Utc::now();
  let entity_type = type_hint.unwrap_or_default();

  entity::ActiveModel {
    id: Set(id),
    bank_id: Set(bank_id),
    canonical_name: Set(name.to_owned()),
    entity_type: Set(entity_type.to_string()),
    mention_count: Set(1),
    first_seen: Set(now.into()),
    last_seen: Set(now.into()),
    created_at: Set(now.into()),
    updated_at: Set(now.into()),
  }
  .insert(db)
  .await?;

  Ok(ResolvedEntity {
    id,
    canonical_name: name.to_owned(),
    entity_type,
    is_new: true,
  })
}

#[cfg(test)]
mod tests {
  use super::EntityType;

  #[test]
  fn entity_type_round_trips_through_strings() {
    assert_eq!("person".parse::<EntityType>().unwrap(), EntityType::Person);
    assert_eq!(EntityType::Organization.to_string(), "organization");
  }

  #[test]
  fn unknown_entity_type_defaults_to_other() {
    assert_eq!(
      "deity".parse::<EntityType>().unwrap_or_default(),
      EntityType::Other
    );
  }
}
