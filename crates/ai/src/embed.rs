use anyhow::anyhow;
use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
use engram_shared::{EngramError, config};
use sea_orm::prelude::PgVector;

use crate::client::{client, embed_permits};
use crate::embed_shared::process_embedding;

pub async fn embed(input: &str) -> Result<PgVector, EngramError> {
  if input.trim().is_empty() {
    return Err(EngramError::invalid_input("embedding input is empty"));
  }

  let request = CreateEmbeddingRequestArgs::default()
    .model(config::embedding_model()?)
    .input(input)
    .dimensions(1024u32)
    .build()?;

  let _permit = embed_permits().acquire().await.map_err(EngramError::upstream)?;

  let embedding = client()
    .embeddings()
    .create(request)
    .await
    .map_err(EngramError::upstream)?
    .data
    .into_iter()
    .map(|e| e.embedding)
    .next_back()
    .ok_or_else(|| EngramError::upstream(anyhow!("empty embedding")))?;

  let processed = process_embedding(embedding)?;
  Ok(PgVector::from(processed))
}
