use std::collections::HashSet;

use chrono::Utc;
use engram_core::memory::consolidation::{
  CONSOLIDATION_BATCH_SIZE, consolidate_fact, count_unconsolidated, fetch_unconsolidated_batch,
};
use engram_core::mental_model::run_lifecycle;
use engram_core::Bank;
use engram_entities::async_operation;
use engram_shared::EngramError;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

/// Outcome of one consolidation sweep across all banks.
#[derive(Debug, Default)]
pub struct RunSummary {
  pub banks: usize,
  pub facts_processed: usize,
  pub observations_touched: usize,
  pub fact_failures: usize,
  pub models_generated: usize,
  pub models_refreshed: usize,
}

fn worker_id() -> String {
  format!("engram-worker-{}", std::process::id())
}

// ──────────────────────────────────────────────────
// async_operations bookkeeping
// ──────────────────────────────────────────────────

async fn begin_operation(
  bank_id: Uuid,
  pending: u64,
  db: &DatabaseConnection,
) -> Result<Uuid, EngramError> {
  let id = Uuid::now_v7();
  let now = Utc::now();

  async_operation::ActiveModel {
    id: Set(id),
    bank_id: Set(bank_id),
    operation_type: Set("consolidation_run".to_owned()),
    status: Set("processing".to_owned()),
    worker_id: Set(Some(worker_id())),
    payload: Set(json!({ "pending_facts": pending })),
    result: Set(None),
    error_message: Set(None),
    created_at: Set(now.into()),
    started_at: Set(Some(now.into())),
    completed_at: Set(None),
  }
  .insert(db)
  .await?;

  Ok(id)
}

async fn complete_operation(
  operation_id: Uuid,
  result: serde_json::Value,
  db: &DatabaseConnection,
) -> Result<(), EngramError> {
  async_operation::ActiveModel {
    id: Set(operation_id),
    status: Set("completed".to_owned()),
    result: Set(Some(result)),
    completed_at: Set(Some(Utc::now().into())),
    ..Default::default()
  }
  .update(db)
  .await?;
  Ok(())
}

async fn fail_operation(operation_id: Uuid, error: &EngramError, db: &DatabaseConnection) {
  let outcome = async_operation::ActiveModel {
    id: Set(operation_id),
    status: Set("failed".to_owned()),
    error_message: Set(Some(error.to_string())),
    completed_at: Set(Some(Utc::now().into())),
    ..Default::default()
  }
  .update(db)
  .await;

  if let Err(update_err) = outcome {
    tracing::error!(
      operation_id = %operation_id,
      error = %update_err,
      "Failed to mark async operation as failed"
    );
  }
}

// ──────────────────────────────────────────────────
// Per-bank run
// ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BankRunStats {
  facts_processed: usize,
  fact_failures: usize,
  touched: Vec<Uuid>,
  models_generated: usize,
  models_refreshed: usize,
}

async fn consolidate_bank(
  bank_id: Uuid,
  db: &DatabaseConnection,
  shutdown: &watch::Receiver<bool>,
) -> Result<BankRunStats, EngramError> {
  let mut stats = BankRunStats::default();

  let bank = Bank::load(bank_id, db).await?;
  let pending = count_unconsolidated(bank_id, db).await?;
  if pending == 0 {
    return Ok(stats);
  }

  let operation_id = begin_operation(bank_id, pending, db).await?;
  tracing::info!(bank_id = %bank_id, pending, "Consolidating bank");

  // Bound the sweep by the initial queue depth so facts that keep failing
  // cannot spin the run forever; they stay unconsolidated for the next one.
  let max_batches = pending.div_ceil(CONSOLIDATION_BATCH_SIZE) + 1;
  let mut attempted: HashSet<Uuid> = HashSet::new();

  'batches: for _ in 0..max_batches {
    let batch: Vec<_> = fetch_unconsolidated_batch(bank_id, db)
      .await?
      .into_iter()
      .filter(|fact| !attempted.contains(&fact.id))
      .collect();
    if batch.is_empty() {
      break;
    }

    for fact in batch {
      if *shutdown.borrow() {
        tracing::info!(bank_id = %bank_id, "Shutdown requested, leaving remaining facts for the next run");
        break 'batches;
      }

      attempted.insert(fact.id);
      match consolidate_fact(&bank, &fact, db).await {
        Ok(touched) => {
          stats.facts_processed += 1;
          stats.touched.extend(touched);
        }
        Err(err) => {
          // The fact keeps consolidated_at = NULL; a later run retries it.
          stats.fact_failures += 1;
          tracing::warn!(
            bank_id = %bank_id,
            fact_id = %fact.id,
            error = %err,
            "Fact consolidation failed, will retry next run"
          );
        }
      }
    }
  }

  stats.touched.sort_unstable();
  stats.touched.dedup();

  match run_lifecycle(&bank, &stats.touched, db).await {
    Ok(lifecycle) => {
      stats.models_generated = lifecycle.generated.len();
      stats.models_refreshed = lifecycle.refreshed.len();
    }
    Err(err) => {
      tracing::warn!(bank_id = %bank_id, error = %err, "Mental model lifecycle failed");
    }
  }

  let result = json!({
    "facts_processed": stats.facts_processed,
    "fact_failures": stats.fact_failures,
    "observations_touched": stats.touched.len(),
    "models_generated": stats.models_generated,
    "models_refreshed": stats.models_refreshed,
  });

  if stats.facts_processed == 0 && stats.fact_failures > 0 {
    fail_operation(
      operation_id,
      &EngramError::new(anyhow::anyhow!(
        "all {} facts in the run failed",
        stats.fact_failures
      )),
      db,
    )
    .await;
  } else {
    complete_operation(operation_id, result, db).await?;
  }

  Ok(stats)
}

// ──────────────────────────────────────────────────
// Run entry points
// ──────────────────────────────────────────────────

/// Manual entry point: one full sweep, no scheduler required.
pub async fn run_consolidation_once(db: &DatabaseConnection) -> Result<RunSummary, EngramError> {
  let (_tx, rx) = watch::channel(false);
  run_with_shutdown(db, rx).await
}

pub(crate) async fn run_with_shutdown(
  db: &DatabaseConnection,
  shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, EngramError> {
  let mut summary = RunSummary::default();

  for bank_id in Bank::all_ids(db).await? {
    if *shutdown.borrow() {
      break;
    }

    match consolidate_bank(bank_id, db, &shutdown).await {
      Ok(stats) => {
        if stats.facts_processed > 0 || stats.fact_failures > 0 {
          summary.banks += 1;
        }
        summary.facts_processed += stats.facts_processed;
        summary.fact_failures += stats.fact_failures;
        summary.observations_touched += stats.touched.len();
        summary.models_generated += stats.models_generated;
        summary.models_refreshed += stats.models_refreshed;
      }
      Err(err) => {
        tracing::error!(bank_id = %bank_id, error = %err, "Bank consolidation failed");
      }
    }
  }

  Ok(summary)
}
