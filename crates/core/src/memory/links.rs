use chrono::{DateTime, Duration, Utc};
use engram_shared::EngramError;
use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Temporal link weight halves roughly each month of gap.
const TEMPORAL_DECAY_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LinkType {
  Temporal,
  Semantic,
  Entity,
  Causes,
  CausedBy,
}

/// Weight for a temporal edge spanning `gap`: `exp(-gap_days / 30)`, clamped
/// into [0, 1]. Negative gaps (clock skew) count as zero gap.
#[must_use]
pub fn temporal_weight(gap: Duration) -> f32 {
  let days = gap.num_seconds().max(0) as f64 / 86_400.0;
  (-days / TEMPORAL_DECAY_DAYS).exp().clamp(0.0, 1.0) as f32
}

/// Canonical co-occurrence pair ordering: smaller id first.
#[must_use]
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
  if a < b { (a, b) } else { (b, a) }
}

#[derive(FromQueryResult)]
struct NeighborRow {
  id: Uuid,
  created_at: chrono::DateTime<chrono::FixedOffset>,
}

/// Link the observation to the previous observation about each entity with a
/// gap-decayed temporal edge. Replays are absorbed by the unique tuple.
pub async fn link_temporal_neighbors<C: ConnectionTrait>(
  bank_id: Uuid,
  observation_id: Uuid,
  observation_created_at: DateTime<Utc>,
  entity_ids: &[Uuid],
  db: &C,
) -> Result<(), EngramError> {
  for &entity_id in entity_ids {
    let stmt = Statement::from_sql_and_values(
      DbBackend::Postgres,
      r"
      SELECT mu.id, mu.created_at
      FROM memory_units mu
      JOIN unit_entities ue ON ue.unit_id = mu.id
      WHERE mu.bank_id = $1
        AND ue.entity_id = $2
        AND mu.fact_type = 'observation'
        AND mu.id <> $3
      ORDER BY mu.created_at DESC
      LIMIT 1;
      ",
      vec![bank_id.into(), entity_id.into(), observation_id.into()],
    );

    let Some(row) = db.query_one_raw(stmt).await? else {
      continue;
    };
    let neighbor = NeighborRow::from_query_result(&row, "")?;

    let gap = observation_created_at - neighbor.created_at.with_timezone(&Utc);
    let weight = temporal_weight(gap);

    let insert = Statement::from_sql_and_values(
      DbBackend::Postgres,
      r"
      INSERT INTO memory_links (id, from_unit_id, to_unit_id, link_type, entity_id, weight)
      VALUES ($1, $2, $3, $4, $5, $6)
      ON CONFLICT DO NOTHING;
      ",
      vec![
        Uuid::now_v7().into(),
        neighbor.id.into(),
        observation_id.into(),
        LinkType::Temporal.to_string().into(),
        entity_id.into(),
        f64::from(weight).into(),
      ],
    );
    db.execute_raw(insert).await?;
  }

  Ok(())
}

/// Bump the joint-appearance counter for every entity pair on a unit.
pub async fn record_cooccurrences<C: ConnectionTrait>(
  entity_ids: &[Uuid],
  db: &C,
) -> Result<(), EngramError> {
  for (i, &a) in entity_ids.iter().enumerate() {
    for &b in &entity_ids[i + 1..] {
      if a == b {
        continue;
      }
      let (first, second) = canonical_pair(a, b);
      let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        r"
        INSERT INTO entity_cooccurrences (entity_a_id, entity_b_id, cooccurrence_count, last_cooccurred)
        VALUES ($1, $2, 1, now())
        ON CONFLICT (entity_a_id, entity_b_id)
        DO UPDATE SET cooccurrence_count = entity_cooccurrences.cooccurrence_count + 1,
                      last_cooccurred = now();
        ",
        vec![first.into(), second.into()],
      );
      db.execute_raw(stmt).await?;
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use uuid::Uuid;

  use super::{LinkType, canonical_pair, temporal_weight};

  #[test]
  fn weight_is_one_at_zero_gap() {
    assert!((temporal_weight(Duration::zero()) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn weight_decays_with_gap() {
    let month = temporal_weight(Duration::days(30));
    let quarter = temporal_weight(Duration::days(90));
    assert!((month - (-1.0_f32).exp()).abs() < 1e-4);
    assert!(quarter < month);
    assert!(quarter > 0.0);
  }

  #[test]
  fn negative_gap_counts_as_zero() {
    assert!((temporal_weight(Duration::days(-5)) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn pair_ordering_is_canonical() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
    let (first, second) = canonical_pair(a, b);
    assert!(first < second);
  }

  #[test]
  fn link_type_serializes_snake_case() {
    assert_eq!(LinkType::CausedBy.to_string(), "caused_by");
    assert_eq!("temporal".parse::<LinkType>().unwrap(), LinkType::Temporal);
  }
}
