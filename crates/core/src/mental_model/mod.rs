mod lifecycle;
pub use lifecycle::{LifecycleOutcome, run_lifecycle};

use chrono::{DateTime, Utc};
use engram_entities::mental_model;
use engram_shared::{EngramError, ErrorKind};
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
  FromQueryResult, QueryFilter, SqlErr, Statement,
  sea_query::{ArrayType, Value},
};
use uuid::Uuid;

/// Candidates per search leg before RRF merging.
const SEARCH_CANDIDATE_LIMIT: i64 = 50;

/// Curated summary for one entity or theme, refreshed by the lifecycle.
#[derive(Debug, Clone)]
pub struct MentalModel {
  pub id: Uuid,
  pub bank_id: Uuid,
  pub name: String,
  pub description: String,
  pub content: String,
  pub source_query: String,
  pub entity_id: Option<Uuid>,
  pub source_observation_ids: Vec<Uuid>,
  pub tags: Vec<String>,
  pub max_tokens: i32,
  pub refresh_after_consolidation: bool,
  pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl MentalModel {
  #[must_use]
  pub fn from_model(model: mental_model::Model) -> Self {
    Self {
      id: model.id,
      bank_id: model.bank_id,
      name: model.name,
      description: model.description,
      content: model.content,
      source_query: model.source_query,
      entity_id: model.entity_id,
      source_observation_ids: model.source_observation_ids,
      tags: model.tags,
      max_tokens: model.max_tokens,
      refresh_after_consolidation: model.refresh_after_consolidation,
      last_refreshed_at: model.last_refreshed_at.map(|dt| dt.with_timezone(&Utc)),
    }
  }

  pub async fn find_by_entity<C: ConnectionTrait>(
    bank_id: Uuid,
    entity_id: Uuid,
    db: &C,
  ) -> Result<Option<Self>, EngramError> {
    let model = mental_model::Entity::find()
      .filter(mental_model::Column::BankId.eq(bank_id))
      .filter(mental_model::Column::EntityId.eq(entity_id))
      .one(db)
      .await?;
    Ok(model.map(Self::from_model))
  }

  /// Hybrid search over models: lexical websearch on name + content, vector
  /// ANN on the model embedding, RRF-fused.
  ///
  /// `required_tags` restricts hits to models carrying every listed tag,
  /// untagged models excluded. Used by tag-scoped Reflect invocations.
  pub async fn search(
    bank_id: Uuid,
    query: &str,
    limit: usize,
    required_tags: Option<&[String]>,
    db: &DatabaseConnection,
  ) -> Result<Vec<(Self, f64)>, EngramError> {
    let query_embedding = engram_ai::embed(query).await?;

    let sql = r"
    WITH
    fulltext AS (
      SELECT id, ROW_NUMBER() OVER (
        ORDER BY ts_rank_cd(
          to_tsvector('english', name || ' ' || content),
          websearch_to_tsquery('english', $1)
        ) DESC
      ) AS r
      FROM mental_models
      WHERE bank_id = $2
        AND to_tsvector('english', name || ' ' || content) @@ websearch_to_tsquery('english', $1)
        AND ($6::text[] IS NULL OR (tags @> $6 AND cardinality(tags) > 0))
      LIMIT $3
    ),
    semantic AS (
      SELECT id, ROW_NUMBER() OVER (ORDER BY embedding <=> $4) AS r
      FROM mental_models
      WHERE bank_id = $2 AND embedding IS NOT NULL
        AND ($6::text[] IS NULL OR (tags @> $6 AND cardinality(tags) > 0))
      LIMIT $3
    ),
    rrf_score AS (
      SELECT id,
             coalesce(1.0 / (60 + f.r), 0) + coalesce(1.0 / (60 + s.r), 0) AS score
      FROM fulltext f
      FULL OUTER JOIN semantic s USING (id)
    )
    SELECT
      m.id, m.bank_id, m.name, m.description, m.content, m.source_query,
      m.embedding, m.entity_id, m.source_observation_ids, m.tags,
      m.max_tokens, m.refresh_after_consolidation, m.last_refreshed_at,
      m.created_at, m.updated_at,
      r.score AS score
    FROM rrf_score r
    JOIN mental_models m USING (id)
    ORDER BY r.score DESC
    LIMIT $5;
    ";

    let required_tags = Value::Array(
      ArrayType::String,
      required_tags.map(|tags| {
        Box::new(tags.iter().map(|t| t.clone().into()).collect::<Vec<Value>>())
      }),
    );

    let stmt = Statement::from_sql_and_values(
      DbBackend::Postgres,
      sql,
      vec![
        query.to_owned().into(),           // $1
        bank_id.into(),                    // $2
        SEARCH_CANDIDATE_LIMIT.into(),     // $3
        query_embedding.into(),            // $4
        (limit as i64).into(),             // $5
        required_tags,                     // $6
      ],
    );

    let rows = db.query_all_raw(stmt).await?;
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
      let model = mental_model::Model::from_query_result(&row, "")?;
      let score: f64 = row.try_get("", "score")?;
      results.push((Self::from_model(model), score));
    }

    Ok(results)
  }

  /// Insert a per-entity model, recovering from the unique-index race: the
  /// loser reloads and returns the winner's row.
  pub async fn insert_or_recover<C: ConnectionTrait>(
    active: mental_model::ActiveModel,
    bank_id: Uuid,
    entity_id: Uuid,
    db: &C,
  ) -> Result<Self, EngramError> {
    match active.insert(db).await {
      Ok(model) => Ok(Self::from_model(model)),
      Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
        tracing::info!(
          bank_id = %bank_id,
          entity_id = %entity_id,
          "Lost mental-model insert race, returning the winner"
        );
        Self::find_by_entity(bank_id, entity_id, db)
          .await?
          .ok_or_else(|| {
            EngramError::with_kind(
              ErrorKind::ConcurrencyConflict,
              anyhow::anyhow!("winner row vanished for entity {entity_id}"),
            )
          })
      }
      Err(err) => Err(err.into()),
    }
  }
}
