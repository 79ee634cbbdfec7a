mod run;
pub use run::{RunSummary, run_consolidation_once};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One consolidation task per process.
static SCHEDULER_STARTED: AtomicBool = AtomicBool::new(false);

/// Long-lived periodic consolidation task with cooperative shutdown.
pub struct Scheduler {
  shutdown_tx: watch::Sender<bool>,
  handle: JoinHandle<()>,
}

impl Scheduler {
  /// Start the periodic task. Returns `None` when one is already running;
  /// starting twice is a no-op by contract.
  pub fn start(db: DatabaseConnection, interval_secs: u64) -> Option<Self> {
    if SCHEDULER_STARTED
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      tracing::warn!("Consolidation scheduler already running, ignoring start");
      return None;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler_loop(db, interval_secs, shutdown_rx));

    tracing::info!(interval_secs, "Consolidation scheduler started");
    Some(Self {
      shutdown_tx,
      handle,
    })
  }

  /// Signal the task and wait for it to drain. The current fact finishes;
  /// remaining work waits for the next process.
  pub async fn stop(self) {
    let _ = self.shutdown_tx.send(true);
    if let Err(err) = self.handle.await {
      tracing::error!(error = %err, "Consolidation scheduler task panicked");
    }
    SCHEDULER_STARTED.store(false, Ordering::SeqCst);
    tracing::info!("Consolidation scheduler stopped");
  }
}

async fn scheduler_loop(
  db: DatabaseConnection,
  interval_secs: u64,
  mut shutdown_rx: watch::Receiver<bool>,
) {
  let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
  // The first tick fires immediately; skip it so startup isn't a thundering run.
  ticker.tick().await;

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        match run::run_with_shutdown(&db, shutdown_rx.clone()).await {
          Ok(summary) => {
            if summary.facts_processed > 0 {
              tracing::info!(
                banks = summary.banks,
                facts = summary.facts_processed,
                touched = summary.observations_touched,
                failures = summary.fact_failures,
                "Consolidation run finished"
              );
            }
          }
          Err(err) => {
            tracing::error!(error = %err, "Consolidation run failed");
          }
        }
      }
      changed = shutdown_rx.changed() => {
        if changed.is_err() || *shutdown_rx.borrow() {
          break;
        }
      }
    }
  }
}
