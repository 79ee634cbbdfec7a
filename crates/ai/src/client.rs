use std::sync::OnceLock;

use async_openai::{Client, config::OpenAIConfig};
use engram_shared::APP_ENV;
use tokio::sync::Semaphore;

/// Process-wide cap on in-flight embedding requests.
const EMBED_CONCURRENCY: usize = 5;

static CLIENT: OnceLock<Client<OpenAIConfig>> = OnceLock::new();

static EMBED_PERMITS: Semaphore = Semaphore::const_new(EMBED_CONCURRENCY);

/// Shared OpenAI-compatible client, initialized on first touch.
pub(crate) fn client() -> &'static Client<OpenAIConfig> {
  CLIENT.get_or_init(|| {
    let config = OpenAIConfig::new()
      .with_api_key(&APP_ENV.openai_api_key)
      .with_api_base(&APP_ENV.openai_base_url);

    Client::with_config(config)
  })
}

pub(crate) fn embed_permits() -> &'static Semaphore {
  &EMBED_PERMITS
}
