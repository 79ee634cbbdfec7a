use anyhow::anyhow;
use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
use engram_shared::{EngramError, config};
use sea_orm::prelude::PgVector;

use crate::client::{client, embed_permits};
use crate::embed_shared::{check_inputs, process_embedding};

/// Embed multiple texts in a single API call.
///
/// Returns one `PgVector` per input, in the same order.
pub async fn embed_many(inputs: &[String]) -> Result<Vec<PgVector>, EngramError> {
  if inputs.is_empty() {
    return Ok(vec![]);
  }
  check_inputs(inputs)?;

  let request = CreateEmbeddingRequestArgs::default()
    .model(config::embedding_model()?)
    .input(inputs.to_vec())
    .dimensions(1024u32)
    .build()?;

  let _permit = embed_permits().acquire().await.map_err(EngramError::upstream)?;

  let response = client()
    .embeddings()
    .create(request)
    .await
    .map_err(EngramError::upstream)?;

  // Sort by index to ensure ordering matches input
  let mut data = response.data;
  data.sort_by_key(|e| e.index);

  if data.len() != inputs.len() {
    return Err(EngramError::upstream(anyhow!(
      "embedding count mismatch: expected {}, got {}",
      inputs.len(),
      data.len()
    )));
  }

  let mut vectors = Vec::with_capacity(data.len());
  for e in data {
    vectors.push(PgVector::from(process_embedding(e.embedding)?));
  }
  Ok(vectors)
}
