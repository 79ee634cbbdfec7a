//! Model identifiers and tunables, resolved at call time.
//!
//! These are deliberately not fields of [`crate::APP_ENV`]: reading them per
//! call means a late `dotenvy::dotenv()` load still takes effect, and no
//! pipeline behavior depends on module initialization order.

use std::env;

use crate::{EngramError, ErrorKind};

/// Default consolidation interval when `CONSOLIDATION_INTERVAL_SECONDS` is unset.
pub const DEFAULT_CONSOLIDATION_INTERVAL_SECS: u64 = 300;

fn required_model(key: &str) -> Result<String, EngramError> {
  env::var(key).map_err(|_| {
    EngramError::with_kind(
      ErrorKind::InvalidInput,
      anyhow::anyhow!("env {key} must be set"),
    )
  })
}

/// Small model for 5W1H fact extraction.
pub fn extraction_model() -> Result<String, EngramError> {
  required_model("EXTRACTION_MODEL_ID")
}

/// Small model for observation classification and directive post-checks.
pub fn consolidation_model() -> Result<String, EngramError> {
  required_model("CONSOLIDATION_MODEL_ID")
}

/// Large model driving the Reflect tool-use loop.
pub fn reflect_model() -> Result<String, EngramError> {
  required_model("REFLECT_MODEL_ID")
}

/// Optional re-ranking model. Falls back to the consolidation model.
pub fn rerank_model() -> Result<String, EngramError> {
  match env::var("RERANK_MODEL_ID") {
    Ok(id) => Ok(id),
    Err(_) => consolidation_model(),
  }
}

/// Embedding model identifier.
pub fn embedding_model() -> Result<String, EngramError> {
  required_model("EMBEDDING_MODEL_ID")
}

/// Seconds between consolidation runs.
pub fn consolidation_interval_secs() -> u64 {
  env::var("CONSOLIDATION_INTERVAL_SECONDS")
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(DEFAULT_CONSOLIDATION_INTERVAL_SECS)
}

/// Verify every required model id is present. Used by the binary to map
/// missing configuration onto its dedicated exit code before any work starts.
pub fn check() -> Result<(), EngramError> {
  extraction_model()?;
  consolidation_model()?;
  reflect_model()?;
  embedding_model()?;
  Ok(())
}
