use clap::Parser;
use engram::Engine;
use engram_migration::{Migrator, MigratorTrait};
use engram_shared::config;
use engram_worker::run_consolidation_once;
use sea_orm::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Consolidation scheduler for the engram memory engine.
#[derive(Debug, Parser)]
#[command(name = "engram", version)]
struct Cli {
  /// Run a single consolidation pass and exit
  #[arg(long, conflicts_with = "interval")]
  once: bool,

  /// Run the scheduler with this interval in seconds
  /// (default: CONSOLIDATION_INTERVAL_SECONDS or 300)
  #[arg(long)]
  interval: Option<u64>,
}

const EXIT_OK: i32 = 0;
const EXIT_OPERATIONAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;

async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c()
      .await
      .expect("failed to install Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install signal handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }
}

fn check_configuration() -> Result<(), String> {
  dotenvy::dotenv().ok();

  for key in ["DATABASE_URL", "OPENAI_BASE_URL", "OPENAI_API_KEY"] {
    if std::env::var(key).is_err() {
      return Err(format!("env {key} must be set"));
    }
  }
  config::check().map_err(|err| err.to_string())
}

async fn run(cli: Cli) -> i32 {
  if let Err(err) = check_configuration() {
    tracing::error!(error = %err, "Configuration error");
    return EXIT_CONFIG;
  }

  if cli.once {
    let db = match Database::connect(std::env::var("DATABASE_URL").expect("checked above")).await {
      Ok(db) => db,
      Err(err) => {
        tracing::error!(error = %err, "Database connection failed");
        return EXIT_OPERATIONAL;
      }
    };
    if let Err(err) = Migrator::up(&db, None).await {
      tracing::error!(error = %err, "Migration failed");
      return EXIT_OPERATIONAL;
    }

    return match run_consolidation_once(&db).await {
      Ok(summary) => {
        tracing::info!(
          banks = summary.banks,
          facts = summary.facts_processed,
          failures = summary.fact_failures,
          models_generated = summary.models_generated,
          models_refreshed = summary.models_refreshed,
          "Single consolidation pass finished"
        );
        EXIT_OK
      }
      Err(err) => {
        tracing::error!(error = %err, "Consolidation pass failed");
        EXIT_OPERATIONAL
      }
    };
  }

  let engine = match Engine::initialize().await {
    Ok(engine) => engine,
    Err(err) => {
      tracing::error!(error = %err, "Engine initialization failed");
      return EXIT_OPERATIONAL;
    }
  };

  tracing::info!("engram running; Ctrl+C to stop");
  shutdown_signal().await;
  engine.close().await;

  EXIT_OK
}

fn main() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
    )
    .with(tracing_error::ErrorLayer::default())
    .with(tracing_subscriber::fmt::layer())
    .init();

  let cli = Cli::parse();

  if let Some(interval) = cli.interval {
    // SAFETY: no other threads exist yet; the runtime spawns its workers below.
    unsafe {
      std::env::set_var("CONSOLIDATION_INTERVAL_SECONDS", interval.to_string());
    }
  }

  let runtime = tokio::runtime::Runtime::new().expect("failed to build the tokio runtime");
  let code = runtime.block_on(run(cli));
  runtime.shutdown_background();
  std::process::exit(code);
}
