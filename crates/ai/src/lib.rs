// Re-export async_openai types for consumers
pub use async_openai::types::chat::{
  ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
  ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
  ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
};

mod client;

mod cosine_similarity;
pub use cosine_similarity::cosine_similarity;

mod embed;
pub use embed::embed;

mod embed_many;
pub use embed_many::embed_many;

mod embed_shared;

mod generate_object;
pub use generate_object::generate_object;

mod generate_text;
pub use generate_text::generate_text;

mod chat_step;
pub use chat_step::{AssistantTurn, ToolInvocation, ToolSpec, chat_step};

mod json_relaxed;
pub use json_relaxed::extract_json;
