use engram_ai::embed;
use engram_entities::memory_unit;
use engram_shared::{EngramError, estimate_tokens};
use sea_orm::{
  ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement,
  sea_query::{ArrayType, Value},
};
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{FactType, MemoryUnit};

/// Number of candidates fetched per search leg (lexical and vector) before
/// RRF merging.
const RETRIEVAL_CANDIDATE_LIMIT: i64 = 100;

/// Hard ceiling on results per call regardless of the requested cap.
const MAX_RESULTS_CEILING: usize = 100;

/// Process-wide cap on concurrent recall statements.
static SEARCH_PERMITS: Semaphore = Semaphore::const_new(32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagsMatch {
  /// Any requested tag present.
  #[default]
  Any,
  /// Every requested tag present; untagged rows excluded. Used by tagged
  /// mental-model refreshes to keep scoped data from leaking.
  AllStrict,
}

#[derive(Debug, Clone, Default)]
pub struct RecallFilters {
  pub fact_types: Option<Vec<FactType>>,
  pub tags: Option<Vec<String>>,
  pub tags_match: TagsMatch,
}

#[derive(Debug, Clone)]
pub struct RecallLimits {
  pub max_results: usize,
  pub max_tokens: usize,
}

impl Default for RecallLimits {
  fn default() -> Self {
    Self {
      max_results: 20,
      max_tokens: 4096,
    }
  }
}

/// One recalled unit with its fused score and the per-channel ranks that
/// produced it.
#[derive(Debug, Clone)]
pub struct RecalledUnit {
  pub unit: MemoryUnit,
  pub score: f64,
  pub semantic_rank: Option<i64>,
  pub lexical_rank: Option<i64>,
}

fn nullable_text_array(values: Option<Vec<String>>) -> Value {
  Value::Array(
    ArrayType::String,
    values.map(|v| Box::new(v.into_iter().map(Into::into).collect::<Vec<Value>>())),
  )
}

/// Walk fused results in score order, stopping at the result cap or the
/// token budget. The first hit is always kept so one long unit cannot turn a
/// successful search into an empty one.
fn assemble_within_budget(results: Vec<RecalledUnit>, limits: &RecallLimits) -> Vec<RecalledUnit> {
  let max_results = limits.max_results.min(MAX_RESULTS_CEILING);
  let mut out: Vec<RecalledUnit> = Vec::new();
  let mut spent = 0usize;

  for result in results {
    if out.len() >= max_results {
      break;
    }
    let cost = estimate_tokens(&result.unit.text);
    if !out.is_empty() && spent + cost > limits.max_tokens {
      break;
    }
    spent += cost;
    out.push(result);
  }

  out
}

/// Hybrid retrieval: lexical websearch + vector ANN fused with RRF (k=60),
/// ties broken by recency. Read-only.
pub async fn recall(
  bank_id: Uuid,
  query: &str,
  limits: &RecallLimits,
  filters: &RecallFilters,
  db: &DatabaseConnection,
) -> Result<Vec<RecalledUnit>, EngramError> {
  if query.trim().is_empty() {
    return Err(EngramError::invalid_input("query is empty"));
  }

  let query_embedding = embed(query).await?;

  let tags_predicate = match filters.tags_match {
    TagsMatch::Any => "tags && $6",
    TagsMatch::AllStrict => "tags @> $6 AND cardinality(tags) > 0",
  };

  let sql = format!(
    r"
    WITH
    fulltext AS (
      SELECT id, ROW_NUMBER() OVER (
        ORDER BY ts_rank_cd(search_vector, websearch_to_tsquery('english', $1)) DESC
      ) AS r
      FROM memory_units
      WHERE bank_id = $2
        AND search_vector @@ websearch_to_tsquery('english', $1)
        AND ($5::text[] IS NULL OR fact_type = ANY($5))
        AND ($6::text[] IS NULL OR ({tags_predicate}))
      LIMIT $3
    ),
    semantic AS (
      SELECT id, ROW_NUMBER() OVER (ORDER BY embedding <=> $4) AS r
      FROM memory_units
      WHERE bank_id = $2
        AND embedding IS NOT NULL
        AND ($5::text[] IS NULL OR fact_type = ANY($5))
        AND ($6::text[] IS NULL OR ({tags_predicate}))
      LIMIT $3
    ),
    rrf_score AS (
      SELECT id,
             f.r AS lexical_rank,
             s.r AS semantic_rank,
             coalesce(1.0 / (60 + f.r), 0) + coalesce(1.0 / (60 + s.r), 0) AS score
      FROM fulltext f
      FULL OUTER JOIN semantic s USING (id)
    )
    SELECT
      m.id, m.bank_id, m.document_id, m.text, m.context, m.embedding,
      m.fact_type, m.fact_kind, m.what, m.who, m.when_description,
      m.where_description, m.why_description, m.event_date, m.occurred_start,
      m.occurred_end, m.mentioned_at, m.proof_count, m.source_memory_ids,
      m.history, m.confidence_score, m.consolidated_at, m.tags, m.metadata,
      m.created_at, m.updated_at,
      r.score AS score, r.lexical_rank, r.semantic_rank
    FROM rrf_score r
    JOIN memory_units m USING (id)
    ORDER BY r.score DESC, m.created_at DESC
    LIMIT $7;
    "
  );

  let fact_types = filters
    .fact_types
    .as_ref()
    .map(|types| types.iter().map(ToString::to_string).collect::<Vec<_>>());

  let stmt = Statement::from_sql_and_values(
    DbBackend::Postgres,
    sql,
    vec![
      query.to_owned().into(),               // $1
      bank_id.into(),                        // $2
      RETRIEVAL_CANDIDATE_LIMIT.into(),      // $3
      query_embedding.into(),                // $4
      nullable_text_array(fact_types),       // $5
      nullable_text_array(filters.tags.clone()), // $6
      (limits.max_results.min(MAX_RESULTS_CEILING) as i64).into(), // $7
    ],
  );

  let _permit = SEARCH_PERMITS.acquire().await.map_err(EngramError::new)?;
  let rows = db.query_all_raw(stmt).await?;

  let mut results = Vec::with_capacity(rows.len());
  for row in rows {
    let model = memory_unit::Model::from_query_result(&row, "")?;
    let score: f64 = row.try_get("", "score")?;
    let lexical_rank: Option<i64> = row.try_get("", "lexical_rank")?;
    let semantic_rank: Option<i64> = row.try_get("", "semantic_rank")?;
    results.push(RecalledUnit {
      unit: MemoryUnit::from_model(model)?,
      score,
      semantic_rank,
      lexical_rank,
    });
  }

  Ok(assemble_within_budget(results, limits))
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use uuid::Uuid;

  use super::*;

  fn recalled(text: &str, score: f64) -> RecalledUnit {
    RecalledUnit {
      unit: MemoryUnit {
        id: Uuid::now_v7(),
        bank_id: Uuid::now_v7(),
        document_id: None,
        text: text.to_owned(),
        context: None,
        embedding: None,
        fact_type: FactType::World,
        fact_kind: None,
        what: None,
        who: vec![],
        when_description: None,
        where_description: None,
        why_description: None,
        event_date: None,
        occurred_start: None,
        occurred_end: None,
        mentioned_at: Utc::now(),
        proof_count: 0,
        source_memory_ids: vec![],
        history: vec![],
        confidence_score: None,
        consolidated_at: None,
        tags: vec![],
        metadata: serde_json::Value::Null,
        created_at: Utc::now(),
      },
      score,
      semantic_rank: None,
      lexical_rank: None,
    }
  }

  #[test]
  fn respects_result_cap() {
    let results = (0..10).map(|i| recalled("short", 1.0 - i as f64 * 0.01)).collect();
    let limits = RecallLimits { max_results: 3, max_tokens: 10_000 };
    assert_eq!(assemble_within_budget(results, &limits).len(), 3);
  }

  #[test]
  fn stops_at_token_budget() {
    // ~25 tokens each (100 chars / 4)
    let long = "x".repeat(100);
    let results = (0..10).map(|_| recalled(&long, 1.0)).collect();
    let limits = RecallLimits { max_results: 100, max_tokens: 60 };
    // 25 tokens each: two fit under 60, the third would land at 75
    assert_eq!(assemble_within_budget(results, &limits).len(), 2);
  }

  #[test]
  fn first_hit_survives_tiny_budget() {
    let long = "x".repeat(4000);
    let results = vec![recalled(&long, 1.0), recalled(&long, 0.9)];
    let limits = RecallLimits { max_results: 10, max_tokens: 10 };
    assert_eq!(assemble_within_budget(results, &limits).len(), 1);
  }

  #[test]
  fn empty_input_stays_empty() {
    let limits = RecallLimits::default();
    assert!(assemble_within_budget(vec![], &limits).is_empty());
  }
}
