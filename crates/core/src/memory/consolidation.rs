use std::collections::HashSet;
use std::fmt::Write;

use chrono::Utc;
use engram_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage, embed_many, generate_object,
};
use engram_entities::{memory_unit, unit_entity};
use engram_shared::{EngramError, config};
use schemars::JsonSchema;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
  IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
  TransactionTrait, prelude::PgVector,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::bank::Bank;

use super::links::{link_temporal_neighbors, record_cooccurrences};
use super::{FactType, HistoryEntry, MemoryUnit, RecallFilters, RecallLimits, recall, write_permits};

/// Facts consolidated per batch.
pub const CONSOLIDATION_BATCH_SIZE: u64 = 10;

/// Existing observations offered to the classifier per fact.
const OBSERVATION_CONTEXT_LIMIT: usize = 50;

/// Token ceiling for the classifier's observation context.
const OBSERVATION_CONTEXT_TOKENS: usize = 16_384;

// ──────────────────────────────────────────────────
// LLM classification types
// ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConsolidationOutput {
  pub actions: Vec<ConsolidationAction>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConsolidationAction {
  /// What to do with this learning: "create", "update", or "skip"
  pub action: ActionKind,
  /// ID of the existing observation (required for update)
  pub learning_id: Option<String>,
  /// Full replacement text of the observation
  pub text: String,
  /// One sentence explaining the decision
  pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  /// Durable knowledge with no matching observation
  Create,
  /// An existing observation absorbs this fact (reinforcement, update, or contradiction)
  Update,
  /// Redundant or ephemeral; leaves no observation behind
  Skip,
}

// ──────────────────────────────────────────────────
// Classification prompt
// ──────────────────────────────────────────────────

const CONSOLIDATION_SYSTEM_PROMPT: &str = "\
You are consolidating one new fact into long-term observations.

Given the existing observations and a new fact, decide what durable
knowledge the fact contributes:

1. \"create\": the fact carries durable knowledge no observation covers yet.
   Write the new observation text.
2. \"update\": an existing observation should absorb the fact. Include its ID
   in learning_id and write the full replacement text.
3. \"skip\": the fact is redundant with an observation, or too ephemeral to
   keep (\"the user is hungry\" is state, not knowledge).

Rules:
- Extract DURABLE knowledge only. Transient states are always \"skip\".
- Never merge facts about different persons. Compare the who lists; if the
  subjects differ, the observations stay separate.
- Never merge unrelated topics into one observation, even about one person.
- On contradiction, keep both states in the text with a temporal marker:
  \"used to work at X; now works at Y\". Contradiction is an update, never a
  silent overwrite that loses the earlier state.
- Replacement text must stand alone; it fully replaces the old text.
- Return one action per distinct piece of durable knowledge, or a single
  \"skip\" when nothing is worth keeping.";

fn build_classification_messages(
  bank: &Bank,
  fact: &MemoryUnit,
  observations: &[MemoryUnit],
) -> Vec<ChatCompletionRequestMessage> {
  let mut observations_section = String::new();
  if observations.is_empty() {
    observations_section.push_str("No observations yet.");
  } else {
    for obs in observations {
      let _ = writeln!(
        observations_section,
        "- [ID: {}] (who: {}) {}",
        obs.id,
        obs.who.join(", "),
        obs.text
      );
    }
  }

  let mut fact_section = String::new();
  let _ = writeln!(fact_section, "Text: {}", fact.text);
  if let Some(what) = &fact.what {
    let _ = writeln!(fact_section, "What: {what}");
  }
  let _ = writeln!(fact_section, "Who: {}", fact.who.join(", "));
  if let Some(when) = &fact.when_description {
    let _ = writeln!(fact_section, "When: {when}");
  }
  if let Some(where_) = &fact.where_description {
    let _ = writeln!(fact_section, "Where: {where_}");
  }
  if let Some(why) = &fact.why_description {
    let _ = writeln!(fact_section, "Why: {why}");
  }
  if let Some(event_date) = fact.event_date {
    let _ = writeln!(fact_section, "Event date: {}", event_date.to_rfc3339());
  }

  let user_content = format!(
    "Mission framing:\n{}\n\n== Existing observations ==\n{observations_section}\n\n== New fact ==\n{fact_section}",
    bank.mission
  );

  vec![
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
      CONSOLIDATION_SYSTEM_PROMPT,
    )),
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(user_content)),
  ]
}

// ──────────────────────────────────────────────────
// Unconsolidated queue access
// ──────────────────────────────────────────────────

pub async fn count_unconsolidated<C: ConnectionTrait>(
  bank_id: Uuid,
  db: &C,
) -> Result<u64, EngramError> {
  let count = memory_unit::Entity::find()
    .filter(memory_unit::Column::BankId.eq(bank_id))
    .filter(memory_unit::Column::ConsolidatedAt.is_null())
    .filter(memory_unit::Column::FactType.is_in(["world", "experience"]))
    .count(db)
    .await?;
  Ok(count)
}

/// Oldest unconsolidated facts first, one batch at a time.
pub async fn fetch_unconsolidated_batch<C: ConnectionTrait>(
  bank_id: Uuid,
  db: &C,
) -> Result<Vec<MemoryUnit>, EngramError> {
  let models = memory_unit::Entity::find()
    .filter(memory_unit::Column::BankId.eq(bank_id))
    .filter(memory_unit::Column::ConsolidatedAt.is_null())
    .filter(memory_unit::Column::FactType.is_in(["world", "experience"]))
    .order_by_asc(memory_unit::Column::CreatedAt)
    .limit(CONSOLIDATION_BATCH_SIZE)
    .all(db)
    .await?;

  models.into_iter().map(MemoryUnit::from_model).collect()
}

// ──────────────────────────────────────────────────
// Action application
// ──────────────────────────────────────────────────

async fn fact_entity_ids<C: ConnectionTrait>(
  fact_id: Uuid,
  db: &C,
) -> Result<Vec<Uuid>, EngramError> {
  let rows = unit_entity::Entity::find()
    .filter(unit_entity::Column::UnitId.eq(fact_id))
    .all(db)
    .await?;
  Ok(rows.into_iter().map(|r| r.entity_id).collect())
}

/// Every entity on the source fact becomes associated with the observation.
async fn inherit_entity_links<C: ConnectionTrait>(
  observation_id: Uuid,
  entity_ids: &[Uuid],
  db: &C,
) -> Result<(), EngramError> {
  for &entity_id in entity_ids {
    let stmt = Statement::from_sql_and_values(
      DbBackend::Postgres,
      r"
      INSERT INTO unit_entities (unit_id, entity_id)
      VALUES ($1, $2)
      ON CONFLICT DO NOTHING;
      ",
      vec![observation_id.into(), entity_id.into()],
    );
    db.execute_raw(stmt).await?;
  }
  Ok(())
}

async fn create_observation<C: ConnectionTrait>(
  bank: &Bank,
  fact: &MemoryUnit,
  action: &ConsolidationAction,
  embedding: PgVector,
  db: &C,
) -> Result<Uuid, EngramError> {
  let id = Uuid::now_v7();
  let now = Utc::now();

  memory_unit::ActiveModel {
    id: Set(id),
    bank_id: Set(bank.id),
    document_id: Set(None),
    text: Set(action.text.clone()),
    context: Set(None),
    embedding: Set(Some(embedding)),
    fact_type: Set(FactType::Observation.to_string()),
    fact_kind: Set(None),
    what: Set(fact.what.clone()),
    who: Set(fact.who.clone()),
    when_description: Set(None),
    where_description: Set(None),
    why_description: Set(None),
    event_date: Set(None),
    occurred_start: Set(fact.event_date.map(Into::into)),
    occurred_end: Set(fact.event_date.map(Into::into)),
    mentioned_at: Set(now.into()),
    proof_count: Set(1),
    source_memory_ids: Set(vec![fact.id]),
    history: Set(serde_json::Value::Array(vec![])),
    confidence_score: Set(None),
    consolidated_at: Set(None),
    tags: Set(fact.tags.clone()),
    metadata: Set(serde_json::Value::Object(Default::default())),
    created_at: Set(now.into()),
    updated_at: Set(now.into()),
  }
  .insert(db)
  .await?;

  tracing::debug!(observation_id = %id, reason = %action.reason, "Created observation");
  Ok(id)
}

async fn update_observation<C: ConnectionTrait>(
  bank: &Bank,
  fact: &MemoryUnit,
  observation_id: Uuid,
  action: &ConsolidationAction,
  embedding: PgVector,
  db: &C,
) -> Result<Option<Uuid>, EngramError> {
  let Some(model) = memory_unit::Entity::find_by_id(observation_id).one(db).await? else {
    tracing::warn!(observation_id = %observation_id, "Update target vanished, skipping");
    return Ok(None);
  };
  if model.bank_id != bank.id || model.fact_type != FactType::Observation.to_string() {
    tracing::warn!(observation_id = %observation_id, "Update target is not an observation of this bank, skipping");
    return Ok(None);
  }

  let mut source_ids = model.source_memory_ids.clone();
  if !source_ids.contains(&fact.id) {
    source_ids.push(fact.id);
  }
  let proof_count = source_ids.len() as i32;

  let mut history: Vec<HistoryEntry> =
    serde_json::from_value(model.history.clone()).unwrap_or_default();
  history.push(HistoryEntry {
    at: Utc::now(),
    change: action.reason.clone(),
  });

  let mut who = model.who.clone();
  for name in &fact.who {
    if !who.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
      who.push(name.clone());
    }
  }
  let mut tags = model.tags.clone();
  for tag in &fact.tags {
    if !tags.contains(tag) {
      tags.push(tag.clone());
    }
  }

  let mut active = model.into_active_model();
  active.text = Set(action.text.clone());
  active.embedding = Set(Some(embedding));
  active.source_memory_ids = Set(source_ids);
  active.proof_count = Set(proof_count);
  active.history = Set(serde_json::to_value(&history)?);
  active.who = Set(who);
  active.tags = Set(tags);
  active.update(db).await?;

  tracing::debug!(observation_id = %observation_id, reason = %action.reason, "Updated observation");
  Ok(Some(observation_id))
}

/// Validate the classifier's target id against the observations it was
/// actually shown. Hallucinated ids demote the action to `create`.
fn validated_target(action: &ConsolidationAction, valid_ids: &HashSet<Uuid>) -> Option<Uuid> {
  let target = action
    .learning_id
    .as_deref()
    .and_then(|s| Uuid::parse_str(s).ok())
    .filter(|id| valid_ids.contains(id));

  if action.learning_id.is_some() && target.is_none() {
    tracing::warn!(
      learning_id = ?action.learning_id,
      "Classifier returned an unknown observation id, treating as create"
    );
  }
  target
}

// ──────────────────────────────────────────────────
// Per-fact consolidation
// ──────────────────────────────────────────────────

/// Consolidate one fact: classify it against existing observations, apply
/// the resulting actions, and stamp `consolidated_at`, all in one
/// transaction. Returns the observation ids the fact touched.
pub async fn consolidate_fact(
  bank: &Bank,
  fact: &MemoryUnit,
  db: &DatabaseConnection,
) -> Result<Vec<Uuid>, EngramError> {
  // 1. Context: existing observations closest to this fact.
  let observations: Vec<MemoryUnit> = recall(
    bank.id,
    &fact.text,
    &RecallLimits {
      max_results: OBSERVATION_CONTEXT_LIMIT,
      max_tokens: OBSERVATION_CONTEXT_TOKENS,
    },
    &RecallFilters {
      fact_types: Some(vec![FactType::Observation]),
      ..Default::default()
    },
    db,
  )
  .await?
  .into_iter()
  .map(|r| r.unit)
  .collect();

  let valid_ids: HashSet<Uuid> = observations.iter().map(|o| o.id).collect();

  // 2. Classify.
  let output = generate_object::<ConsolidationOutput>(
    &config::consolidation_model()?,
    build_classification_messages(bank, fact, &observations),
    "fact_consolidation".to_owned(),
    Some("Fold one fact into durable observations".to_owned()),
  )
  .await?;

  // 3. Embed replacement texts before the transaction opens.
  let embed_texts: Vec<String> = output
    .actions
    .iter()
    .filter(|a| a.action != ActionKind::Skip)
    .map(|a| a.text.clone())
    .collect();
  let mut embeddings = embed_many(&embed_texts).await?.into_iter();

  let entity_ids = fact_entity_ids(fact.id, db).await?;

  // 4. Apply everything atomically, stamping the fact exactly once.
  let _permit = write_permits().acquire().await.map_err(EngramError::new)?;
  let txn = db.begin().await?;

  let mut touched = Vec::new();

  for action in &output.actions {
    match action.action {
      ActionKind::Skip => {
        tracing::debug!(fact_id = %fact.id, reason = %action.reason, "Fact classified redundant");
      }
      ActionKind::Create => {
        let embedding = embeddings
          .next()
          .ok_or_else(|| EngramError::new(anyhow::anyhow!("embedding underrun")))?;
        let id = create_observation(bank, fact, action, embedding, &txn).await?;
        touched.push(id);
      }
      ActionKind::Update => {
        let embedding = embeddings
          .next()
          .ok_or_else(|| EngramError::new(anyhow::anyhow!("embedding underrun")))?;
        match validated_target(action, &valid_ids) {
          Some(target) => {
            if let Some(id) =
              update_observation(bank, fact, target, action, embedding, &txn).await?
            {
              touched.push(id);
            }
          }
          None => {
            let id = create_observation(bank, fact, action, embedding, &txn).await?;
            touched.push(id);
          }
        }
      }
    }
  }

  for &observation_id in &touched {
    inherit_entity_links(observation_id, &entity_ids, &txn).await?;
  }

  memory_unit::ActiveModel {
    id: Set(fact.id),
    consolidated_at: Set(Some(Utc::now().into())),
    ..Default::default()
  }
  .update(&txn)
  .await?;

  txn.commit().await?;

  // 5. Graph maintenance outside the critical section.
  for &observation_id in &touched {
    link_temporal_neighbors(bank.id, observation_id, Utc::now(), &entity_ids, db).await?;
  }
  record_cooccurrences(&entity_ids, db).await?;

  Ok(touched)
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use uuid::Uuid;

  use super::{ActionKind, ConsolidationAction, validated_target};

  fn action(learning_id: Option<String>) -> ConsolidationAction {
    ConsolidationAction {
      action: ActionKind::Update,
      learning_id,
      text: "Alice works at Acme.".to_owned(),
      reason: "reinforced".to_owned(),
    }
  }

  #[test]
  fn known_target_is_accepted() {
    let id = Uuid::now_v7();
    let valid: HashSet<Uuid> = [id].into_iter().collect();
    assert_eq!(validated_target(&action(Some(id.to_string())), &valid), Some(id));
  }

  #[test]
  fn hallucinated_target_is_rejected() {
    let valid: HashSet<Uuid> = [Uuid::now_v7()].into_iter().collect();
    assert_eq!(
      validated_target(&action(Some(Uuid::now_v7().to_string())), &valid),
      None
    );
  }

  #[test]
  fn garbage_target_is_rejected() {
    let valid = HashSet::new();
    assert_eq!(validated_target(&action(Some("obs-1".to_owned())), &valid), None);
  }

  #[test]
  fn absent_target_is_none() {
    let valid = HashSet::new();
    assert_eq!(validated_target(&action(None), &valid), None);
  }

  #[test]
  fn action_kind_parses_snake_case() {
    let parsed: ActionKind = serde_json::from_str("\"skip\"").unwrap();
    assert_eq!(parsed, ActionKind::Skip);
  }
}
