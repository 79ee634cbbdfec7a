mod retain;
pub use retain::{RetainOutcome, retain};

mod recall;
pub use recall::{RecallFilters, RecallLimits, RecalledUnit, TagsMatch, recall};

pub mod consolidation;
pub mod chunks;
pub mod links;

use chrono::{DateTime, Utc};
use engram_entities::memory_unit;
use engram_shared::EngramError;
use sea_orm::prelude::PgVector;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Process-wide cap on concurrent write-path pipelines (Retain persists,
/// consolidation applies).
static WRITE_PERMITS: Semaphore = Semaphore::const_new(5);

pub(crate) fn write_permits() -> &'static Semaphore {
  &WRITE_PERMITS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FactType {
  /// Raw fact about the world.
  World,
  /// Raw fact about a shared experience.
  Experience,
  /// Durable, consolidator-curated knowledge.
  Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
  Event,
  Conversation,
}

/// Append-only record of an observation mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub at: DateTime<Utc>,
  pub change: String,
}

/// Domain view over a `memory_units` row.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryUnit {
  pub id: Uuid,
  pub bank_id: Uuid,
  pub document_id: Option<Uuid>,
  pub text: String,
  pub context: Option<String>,
  #[serde(skip)]
  pub embedding: Option<PgVector>,
  pub fact_type: FactType,
  pub fact_kind: Option<FactKind>,
  pub what: Option<String>,
  pub who: Vec<String>,
  pub when_description: Option<String>,
  pub where_description: Option<String>,
  pub why_description: Option<String>,
  pub event_date: Option<DateTime<Utc>>,
  pub occurred_start: Option<DateTime<Utc>>,
  pub occurred_end: Option<DateTime<Utc>>,
  pub mentioned_at: DateTime<Utc>,
  pub proof_count: i32,
  pub source_memory_ids: Vec<Uuid>,
  pub history: Vec<HistoryEntry>,
  pub confidence_score: Option<f32>,
  pub consolidated_at: Option<DateTime<Utc>>,
  pub tags: Vec<String>,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

impl MemoryUnit {
  pub fn from_model(model: memory_unit::Model) -> Result<Self, EngramError> {
    let fact_type = model
      .fact_type
      .parse()
      .map_err(|_| EngramError::new(anyhow::anyhow!("bad fact_type {:?}", model.fact_type)))?;
    let fact_kind = model.fact_kind.as_deref().map(str::parse).transpose().ok().flatten();

    Ok(Self {
      id: model.id,
      bank_id: model.bank_id,
      document_id: model.document_id,
      text: model.text,
      context: model.context,
      embedding: model.embedding,
      fact_type,
      fact_kind,
      what: model.what,
      who: model.who,
      when_description: model.when_description,
      where_description: model.where_description,
      why_description: model.why_description,
      event_date: model.event_date.map(|dt| dt.with_timezone(&Utc)),
      occurred_start: model.occurred_start.map(|dt| dt.with_timezone(&Utc)),
      occurred_end: model.occurred_end.map(|dt| dt.with_timezone(&Utc)),
      mentioned_at: model.mentioned_at.with_timezone(&Utc),
      proof_count: model.proof_count,
      source_memory_ids: model.source_memory_ids,
      history: serde_json::from_value(model.history).unwrap_or_default(),
      confidence_score: model.confidence_score,
      consolidated_at: model.consolidated_at.map(|dt| dt.with_timezone(&Utc)),
      tags: model.tags,
      metadata: model.metadata,
      created_at: model.created_at.with_timezone(&Utc),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::{FactKind, FactType};

  #[test]
  fn fact_type_round_trips() {
    assert_eq!("world".parse::<FactType>().unwrap(), FactType::World);
    assert_eq!(FactType::Observation.to_string(), "observation");
  }

  #[test]
  fn fact_kind_rejects_unknown_values() {
    assert!("rumor".parse::<FactKind>().is_err());
  }
}
