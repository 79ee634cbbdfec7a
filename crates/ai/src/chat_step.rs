use async_openai::types::chat::{
  ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
  ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionTool,
  ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use engram_shared::EngramError;

use crate::client::client;

/// One tool the model may call, with its JSON-schema parameters.
#[derive(Debug, Clone)]
pub struct ToolSpec {
  pub name: &'static str,
  pub description: &'static str,
  pub parameters: serde_json::Value,
}

impl ToolSpec {
  fn to_chat_tool(&self) -> ChatCompletionTool {
    ChatCompletionTool {
      function: FunctionObject {
        name: self.name.to_owned(),
        description: Some(self.description.to_owned()),
        parameters: Some(self.parameters.clone()),
        strict: None,
      },
    }
  }
}

/// A tool call requested by the model during one turn.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
  pub id: String,
  pub name: String,
  /// Raw JSON argument string, decoded by the dispatcher.
  pub arguments: String,
}

/// The model's side of one conversation turn: either tool requests (the
/// caller must execute them and echo every result back before the next
/// turn) or a final assistant message.
#[derive(Debug, Clone)]
pub struct AssistantTurn {
  pub content: Option<String>,
  pub tool_calls: Vec<ToolInvocation>,
}

impl AssistantTurn {
  /// Rebuild the request-side assistant message that must precede the tool
  /// result messages in the next request.
  pub fn to_request_message(&self) -> Result<ChatCompletionRequestMessage, EngramError> {
    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
    if let Some(content) = &self.content {
      args.content(content.clone());
    }
    if !self.tool_calls.is_empty() {
      args.tool_calls(
        self
          .tool_calls
          .iter()
          .map(|call| {
            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
              id: call.id.clone(),
              function: FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
              },
            })
          })
          .collect::<Vec<_>>(),
      );
    }
    Ok(ChatCompletionRequestMessage::Assistant(args.build()?))
  }
}

/// Run one tool-use turn against the large model.
pub async fn chat_step(
  model: &str,
  messages: Vec<ChatCompletionRequestMessage>,
  tools: &[ToolSpec],
) -> Result<AssistantTurn, EngramError> {
  let request = CreateChatCompletionRequestArgs::default()
    .model(model)
    .messages(messages)
    .tools(
      tools
        .iter()
        .map(|tool| ChatCompletionTools::Function(tool.to_chat_tool()))
        .collect::<Vec<_>>(),
    )
    .build()?;

  let message = client()
    .chat()
    .create(request)
    .await
    .map_err(EngramError::upstream)?
    .choices
    .into_iter()
    .next()
    .ok_or_else(|| EngramError::upstream(anyhow::anyhow!("empty choices")))?
    .message;

  let tool_calls: Vec<ToolInvocation> = message
    .tool_calls
    .unwrap_or_default()
    .into_iter()
    .filter_map(|call| match call {
      ChatCompletionMessageToolCalls::Function(call) => Some(ToolInvocation {
        id: call.id,
        name: call.function.name,
        arguments: call.function.arguments,
      }),
      ChatCompletionMessageToolCalls::Custom(_) => None,
    })
    .collect();

  tracing::debug!(
    tool_calls = tool_calls.len(),
    finalized = tool_calls.is_empty(),
    "Chat turn completed"
  );

  Ok(AssistantTurn {
    content: message.content,
    tool_calls,
  })
}
