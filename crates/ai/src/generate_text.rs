use anyhow::anyhow;
use async_openai::types::chat::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs};
use engram_shared::EngramError;

use crate::client::client;

pub async fn generate_text(
  model: &str,
  messages: Vec<ChatCompletionRequestMessage>,
) -> Result<String, EngramError> {
  let request = CreateChatCompletionRequestArgs::default()
    .model(model)
    .messages(messages)
    .build()?;

  client()
    .chat()
    .create(request)
    .await
    .map_err(EngramError::upstream)
    .map(|r| r.choices.into_iter())?
    .filter_map(|c| c.message.content)
    .next_back()
    .ok_or_else(|| EngramError::upstream(anyhow!("empty message content")))
}
