use chrono::Utc;
use engram_ai::embed;
use engram_entities::{memory_unit, mental_model};
use engram_shared::EngramError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
  FromQueryResult, IntoActiveModel, QueryFilter, Set, Statement,
  sea_query::{ArrayType, Value},
};
use uuid::Uuid;

use crate::bank::Bank;
use crate::reflect::{ReflectScope, reflect_scoped};

use super::MentalModel;

/// Observations an entity needs before it earns a mental model.
const OBSERVATION_THRESHOLD: i64 = 5;

/// Per-consolidation-run job caps, bounding tail latency.
const MAX_REFRESHES_PER_RUN: usize = 3;
const MAX_GENERATIONS_PER_RUN: usize = 2;

/// Reflect output shorter than this is not worth persisting.
const MIN_CONTENT_CHARS: usize = 50;

/// Trigram similarity on names above which a would-be model is a duplicate.
const NAME_DEDUP_SIMILARITY: f64 = 0.8;

/// Mental-model jobs run Reflect with a tightened iteration cap.
const MODEL_JOB_MAX_ITERATIONS: usize = 5;

#[derive(Debug, Default)]
pub struct LifecycleOutcome {
  pub generated: Vec<Uuid>,
  pub refreshed: Vec<Uuid>,
}

fn uuid_array(ids: &[Uuid]) -> Value {
  Value::Array(
    ArrayType::Uuid,
    Some(Box::new(ids.iter().map(|&id| id.into()).collect::<Vec<Value>>())),
  )
}

/// Tags shared by every contributing observation. An empty slice means no
/// contributors, which yields no tags.
fn tag_intersection(tag_sets: &[Vec<String>]) -> Vec<String> {
  let Some((first, rest)) = tag_sets.split_first() else {
    return Vec::new();
  };
  first
    .iter()
    .filter(|tag| rest.iter().all(|set| set.contains(tag)))
    .cloned()
    .collect()
}

#[derive(FromQueryResult)]
struct CandidateRow {
  id: Uuid,
  canonical_name: String,
}

#[derive(FromQueryResult)]
struct EntityIdRow {
  entity_id: Uuid,
}

async fn touched_entity_ids(
  touched_observations: &[Uuid],
  db: &DatabaseConnection,
) -> Result<Vec<Uuid>, EngramError> {
  let stmt = Statement::from_sql_and_values(
    DbBackend::Postgres,
    "SELECT DISTINCT entity_id FROM unit_entities WHERE unit_id = ANY($1::uuid[]);",
    vec![uuid_array(touched_observations)],
  );
  let rows = db.query_all_raw(stmt).await?;
  let mut ids = Vec::with_capacity(rows.len());
  for row in rows {
    ids.push(EntityIdRow::from_query_result(&row, "")?.entity_id);
  }
  Ok(ids)
}

/// Entities from the touched set with enough observations and no model yet.
/// The LEFT JOIN is the first duplicate-defense layer; the application
/// re-check and the unique index are the second and third.
async fn generation_candidates(
  bank_id: Uuid,
  entity_ids: &[Uuid],
  db: &DatabaseConnection,
) -> Result<Vec<CandidateRow>, EngramError> {
  let stmt = Statement::from_sql_and_values(
    DbBackend::Postgres,
    r"
    SELECT e.id, e.canonical_name
    FROM entities e
    LEFT JOIN mental_models mm ON mm.entity_id = e.id AND mm.bank_id = e.bank_id
    WHERE e.bank_id = $1
      AND e.id = ANY($2::uuid[])
      AND mm.id IS NULL
      AND (
        SELECT count(*)
        FROM unit_entities ue
        JOIN memory_units mu ON mu.id = ue.unit_id
        WHERE ue.entity_id = e.id AND mu.fact_type = 'observation'
      ) >= $3
    ORDER BY e.mention_count DESC
    LIMIT $4;
    ",
    vec![
      bank_id.into(),
      uuid_array(entity_ids),
      OBSERVATION_THRESHOLD.into(),
      (MAX_GENERATIONS_PER_RUN as i64).into(),
    ],
  );

  let rows = db.query_all_raw(stmt).await?;
  let mut candidates = Vec::with_capacity(rows.len());
  for row in rows {
    candidates.push(CandidateRow::from_query_result(&row, "")?);
  }
  Ok(candidates)
}

/// Restrict cited evidence to observation units of this bank and collect
/// their ids and tags.
async fn cited_observations(
  bank_id: Uuid,
  cited_ids: &[Uuid],
  db: &DatabaseConnection,
) -> Result<(Vec<Uuid>, Vec<Vec<String>>), EngramError> {
  if cited_ids.is_empty() {
    return Ok((vec![], vec![]));
  }

  let models = memory_unit::Entity::find()
    .filter(memory_unit::Column::BankId.eq(bank_id))
    .filter(memory_unit::Column::Id.is_in(cited_ids.iter().copied()))
    .filter(memory_unit::Column::FactType.eq("observation"))
    .all(db)
    .await?;

  let ids = models.iter().map(|m| m.id).collect();
  let tags = models.into_iter().map(|m| m.tags).collect();
  Ok((ids, tags))
}

async fn name_is_taken(
  bank_id: Uuid,
  name: &str,
  db: &DatabaseConnection,
) -> Result<bool, EngramError> {
  let stmt = Statement::from_sql_and_values(
    DbBackend::Postgres,
    "SELECT id FROM mental_models WHERE bank_id = $1 AND similarity(name, $2) >= $3 LIMIT 1;",
    vec![bank_id.into(), name.into(), NAME_DEDUP_SIMILARITY.into()],
  );
  Ok(db.query_one_raw(stmt).await?.is_some())
}

async fn generate_for_entity(
  bank: &Bank,
  entity_id: Uuid,
  canonical_name: &str,
  db: &DatabaseConnection,
) -> Result<Option<Uuid>, EngramError> {
  // Application-level duplicate re-checks behind the candidate SQL.
  if MentalModel::find_by_entity(bank.id, entity_id, db).await?.is_some() {
    return Ok(None);
  }
  if name_is_taken(bank.id, canonical_name, db).await? {
    tracing::debug!(name = canonical_name, "Similar-named mental model exists, skipping");
    return Ok(None);
  }

  let source_query = format!(
    "What is known about {canonical_name}? Cover durable facts, relationships, and recent changes."
  );

  let outcome = reflect_scoped(
    bank,
    &source_query,
    Some(MODEL_JOB_MAX_ITERATIONS),
    ReflectScope::default(),
    db,
  )
  .await?;

  if outcome.answer.chars().count() < MIN_CONTENT_CHARS {
    tracing::debug!(
      entity_id = %entity_id,
      chars = outcome.answer.chars().count(),
      "Generated content too thin, skipping mental model"
    );
    return Ok(None);
  }

  let (observation_ids, tag_sets) = cited_observations(bank.id, &outcome.cited_ids, db).await?;
  let tags = tag_intersection(&tag_sets);
  let embedding = embed(&outcome.answer).await?;
  let now = Utc::now();

  let active = mental_model::ActiveModel {
    id: Set(Uuid::now_v7()),
    bank_id: Set(bank.id),
    name: Set(canonical_name.to_owned()),
    description: Set(format!("What this bank knows about {canonical_name}")),
    content: Set(outcome.answer),
    source_query: Set(source_query),
    embedding: Set(Some(embedding)),
    entity_id: Set(Some(entity_id)),
    source_observation_ids: Set(observation_ids),
    tags: Set(tags),
    max_tokens: Set(2048),
    refresh_after_consolidation: Set(true),
    last_refreshed_at: Set(Some(now.into())),
    created_at: Set(now.into()),
    updated_at: Set(now.into()),
  };

  let model = MentalModel::insert_or_recover(active, bank.id, entity_id, db).await?;
  tracing::info!(bank_id = %bank.id, entity_id = %entity_id, model_id = %model.id, "Generated mental model");
  Ok(Some(model.id))
}

async fn refresh_model(
  bank: &Bank,
  model: MentalModel,
  db: &DatabaseConnection,
) -> Result<Option<Uuid>, EngramError> {
  // Tagged models refresh under strict tag matching so scoped content never
  // mixes with out-of-scope data.
  let scope = ReflectScope {
    tags: (!model.tags.is_empty()).then(|| model.tags.clone()),
  };

  let outcome = reflect_scoped(
    bank,
    &model.source_query,
    Some(MODEL_JOB_MAX_ITERATIONS),
    scope,
    db,
  )
  .await?;

  if outcome.answer.chars().count() < MIN_CONTENT_CHARS {
    tracing::debug!(model_id = %model.id, "Refresh produced thin content, keeping the old model");
    return Ok(None);
  }

  let (observation_ids, _) = cited_observations(bank.id, &outcome.cited_ids, db).await?;
  let embedding = embed(&outcome.answer).await?;
  let model_id = model.id;

  let existing = mental_model::Entity::find_by_id(model_id)
    .one(db)
    .await?
    .ok_or_else(|| EngramError::new(anyhow::anyhow!("mental model {model_id} vanished")))?;

  let mut active = existing.into_active_model();
  active.content = Set(outcome.answer);
  active.embedding = Set(Some(embedding));
  active.source_observation_ids = Set(observation_ids);
  active.last_refreshed_at = Set(Some(Utc::now().into()));
  active.update(db).await?;

  tracing::info!(bank_id = %bank.id, model_id = %model_id, "Refreshed mental model");
  Ok(Some(model_id))
}

/// Post-consolidation lifecycle pass: refresh models whose entities were
/// touched, then generate models for entities that crossed the observation
/// threshold. Both job classes are capped per run.
pub async fn run_lifecycle(
  bank: &Bank,
  touched_observations: &[Uuid],
  db: &DatabaseConnection,
) -> Result<LifecycleOutcome, EngramError> {
  let mut outcome = LifecycleOutcome::default();
  if touched_observations.is_empty() {
    return Ok(outcome);
  }

  let entity_ids = touched_entity_ids(touched_observations, db).await?;
  if entity_ids.is_empty() {
    return Ok(outcome);
  }

  // Refreshes first: stale curated content is worse than missing content.
  let refresh_targets = mental_model::Entity::find()
    .filter(mental_model::Column::BankId.eq(bank.id))
    .filter(mental_model::Column::RefreshAfterConsolidation.eq(true))
    .filter(mental_model::Column::EntityId.is_in(entity_ids.iter().copied()))
    .all(db)
    .await?;

  for target in refresh_targets.into_iter().take(MAX_REFRESHES_PER_RUN) {
    match refresh_model(bank, MentalModel::from_model(target), db).await {
      Ok(Some(id)) => outcome.refreshed.push(id),
      Ok(None) => {}
      Err(err) => {
        tracing::warn!(bank_id = %bank.id, error = %err, "Mental model refresh failed");
      }
    }
  }

  for candidate in generation_candidates(bank.id, &entity_ids, db).await? {
    match generate_for_entity(bank, candidate.id, &candidate.canonical_name, db).await {
      Ok(Some(id)) => outcome.generated.push(id),
      Ok(None) => {}
      Err(err) => {
        tracing::warn!(
          bank_id = %bank.id,
          entity_id = %candidate.id,
          error = %err,
          "Mental model generation failed"
        );
      }
    }
  }

  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use super::tag_intersection;

  fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
  }

  #[test]
  fn intersection_keeps_shared_tags_only() {
    let sets = vec![tags(&["work", "team"]), tags(&["work", "personal"])];
    assert_eq!(tag_intersection(&sets), tags(&["work"]));
  }

  #[test]
  fn single_contributor_keeps_all_tags() {
    let sets = vec![tags(&["work", "team"])];
    assert_eq!(tag_intersection(&sets), tags(&["work", "team"]));
  }

  #[test]
  fn no_contributors_means_no_tags() {
    assert!(tag_intersection(&[]).is_empty());
  }

  #[test]
  fn disjoint_sets_intersect_to_nothing() {
    let sets = vec![tags(&["a"]), tags(&["b"])];
    assert!(tag_intersection(&sets).is_empty());
  }
}
