use engram_core::{
  Bank, FactType, RecallFilters, RecallLimits, RecalledUnit, ReflectOutcome, RetainOutcome,
};
use engram_migration::{Migrator, MigratorTrait};
use engram_shared::{APP_ENV, EngramError, config};
use engram_worker::Scheduler;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

/// Process-level handle to the memory engine: a connection pool plus the
/// single consolidation task. All caller-facing operations are scoped to a
/// UUID-shaped bank id and never touch state outside that bank.
pub struct Engine {
  db: DatabaseConnection,
  scheduler: Option<Scheduler>,
}

fn parse_bank_id(raw: &str) -> Result<Uuid, EngramError> {
  raw
    .parse::<Uuid>()
    .map_err(|_| EngramError::invalid_input(format!("bank id {raw:?} is not a UUID")))
}

impl Engine {
  /// Open the pool, apply migrations, and start the consolidation scheduler.
  /// The scheduler guard makes a second initialize share the single task
  /// rather than spawning another.
  pub async fn initialize() -> Result<Self, EngramError> {
    let db = Database::connect(APP_ENV.database_url.as_str()).await?;
    Migrator::up(&db, None).await?;

    let scheduler = Scheduler::start(db.clone(), config::consolidation_interval_secs());

    Ok(Self { db, scheduler })
  }

  /// Stop the scheduler first, then drop the pool.
  pub async fn close(self) {
    if let Some(scheduler) = self.scheduler {
      scheduler.stop().await;
    }
    if let Err(err) = self.db.close().await {
      tracing::warn!(error = %err, "Closing the database pool failed");
    }
  }

  /// Extract and persist facts from one conversational turn.
  pub async fn retain(
    &self,
    bank_id: &str,
    content: &str,
    context: Option<&str>,
  ) -> Result<RetainOutcome, EngramError> {
    let bank = Bank::load(parse_bank_id(bank_id)?, &self.db).await?;
    engram_core::retain(&bank, content, context, &self.db).await
  }

  /// Hybrid search over the bank's memory.
  pub async fn recall(
    &self,
    bank_id: &str,
    query: &str,
    max_results: Option<usize>,
    fact_types: Option<Vec<FactType>>,
    tags: Option<Vec<String>>,
  ) -> Result<Vec<RecalledUnit>, EngramError> {
    let bank_id = parse_bank_id(bank_id)?;
    let limits = RecallLimits {
      max_results: max_results.unwrap_or_else(|| RecallLimits::default().max_results),
      ..Default::default()
    };
    let filters = RecallFilters {
      fact_types,
      tags,
      ..Default::default()
    };
    engram_core::recall(bank_id, query, &limits, &filters, &self.db).await
  }

  /// Grounded question answering over the bank's memory.
  pub async fn reflect(
    &self,
    bank_id: &str,
    query: &str,
    max_iterations: Option<usize>,
  ) -> Result<ReflectOutcome, EngramError> {
    let bank = Bank::load(parse_bank_id(bank_id)?, &self.db).await?;
    engram_core::reflect(&bank, query, max_iterations, &self.db).await
  }

  #[must_use]
  pub const fn database(&self) -> &DatabaseConnection {
    &self.db
  }
}

#[cfg(test)]
mod tests {
  use engram_shared::ErrorKind;

  use super::parse_bank_id;

  #[test]
  fn well_formed_uuid_parses() {
    assert!(parse_bank_id("0aeb2b4c-5c8b-4f2e-9e68-3a9d2f6c1a01").is_ok());
  }

  #[test]
  fn malformed_bank_id_is_invalid_input() {
    let err = parse_bank_id("bank-1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
  }
}
