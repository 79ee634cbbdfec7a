mod disposition;
pub use disposition::stance_sentences;

mod guardrails;
pub use guardrails::{check_directives, filter_citations, is_trivial_answer};

mod tools;
pub use tools::{DONE_TOOL, tool_catalog};

use std::collections::HashSet;
use std::fmt::Write;
use std::time::Duration;

use engram_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage, chat_step,
};
use engram_shared::{EngramError, config};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::bank::Bank;

use self::tools::{DoneArgs, dispatch};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// End-to-end wall clock for one invocation.
const REFLECT_TIMEOUT_SECS: u64 = 300;

const NO_CONFIDENT_ANSWER: &str =
  "I could not reach a confident answer from the available memory.";

/// Retrieval scope for the invocation. A tag-scoped invocation (mental-model
/// refresh) pins observation searches to strict tag matching.
#[derive(Debug, Clone, Default)]
pub struct ReflectScope {
  pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ReflectOutcome {
  pub answer: String,
  pub cited_ids: Vec<Uuid>,
  pub iterations: usize,
}

fn build_system_prompt(bank: &Bank) -> String {
  let mut prompt = String::from(
    "You answer questions from this memory bank's long-term memory. Gather \
     evidence with the tools before answering; never answer substantive \
     questions from assumption.\n",
  );

  if !bank.mission.is_empty() {
    let _ = write!(prompt, "\nMission: {}\n", bank.mission);
  }
  if !bank.background.is_empty() {
    let _ = write!(prompt, "Background: {}\n", bank.background);
  }

  let stances = stance_sentences(bank.disposition);
  if !stances.is_empty() {
    prompt.push('\n');
    for stance in stances {
      let _ = writeln!(prompt, "- {stance}");
    }
  }

  if !bank.directives.is_empty() {
    prompt.push_str("\nStanding directives:\n");
    for (i, directive) in bank.directives.iter().enumerate() {
      let _ = writeln!(prompt, "{}. {directive}", i + 1);
    }
  }

  prompt.push_str(
    "\nWhen you have enough evidence, call done with the answer and the ids \
     of every result it rests on. If the memory does not support an answer, \
     call done and say so plainly.",
  );

  prompt
}

fn tool_result_message(
  tool_call_id: &str,
  content: String,
) -> Result<ChatCompletionRequestMessage, EngramError> {
  Ok(ChatCompletionRequestMessage::Tool(
    ChatCompletionRequestToolMessageArgs::default()
      .tool_call_id(tool_call_id.to_owned())
      .content(content)
      .build()?,
  ))
}

/// Bounded tool-use loop over the bank's memory.
pub async fn reflect(
  bank: &Bank,
  query: &str,
  max_iterations: Option<usize>,
  db: &DatabaseConnection,
) -> Result<ReflectOutcome, EngramError> {
  reflect_scoped(bank, query, max_iterations, ReflectScope::default(), db).await
}

/// Like [`reflect`], with an explicit retrieval scope. Used by the
/// mental-model lifecycle.
pub async fn reflect_scoped(
  bank: &Bank,
  query: &str,
  max_iterations: Option<usize>,
  scope: ReflectScope,
  db: &DatabaseConnection,
) -> Result<ReflectOutcome, EngramError> {
  if query.trim().is_empty() {
    return Err(EngramError::invalid_input("query is empty"));
  }

  tokio::time::timeout(
    Duration::from_secs(REFLECT_TIMEOUT_SECS),
    run_loop(bank, query, max_iterations, scope, db),
  )
  .await
  .map_err(|_| EngramError::timeout("reflect exceeded its wall clock"))?
}

async fn run_loop(
  bank: &Bank,
  query: &str,
  max_iterations: Option<usize>,
  scope: ReflectScope,
  db: &DatabaseConnection,
) -> Result<ReflectOutcome, EngramError> {
  let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1);
  let model = config::reflect_model()?;
  let catalog = tool_catalog();

  let mut messages = vec![
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
      build_system_prompt(bank),
    )),
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(query.to_owned())),
  ];

  // Ids returned by tool calls in this invocation; the only citable set.
  let mut evidence: HashSet<Uuid> = HashSet::new();
  let mut directive_retried = false;

  for iteration in 1..=max_iterations {
    let turn = chat_step(&model, messages.clone(), &catalog).await?;

    if turn.tool_calls.is_empty() {
      // The model answered in prose without finalizing. An uncertainty
      // admission stands on its own; anything substantive must go through
      // the done guardrails.
      if let Some(content) = &turn.content
        && is_trivial_answer(content)
      {
        return Ok(ReflectOutcome {
          answer: content.clone(),
          cited_ids: vec![],
          iterations: iteration,
        });
      }
      messages.push(turn.to_request_message()?);
      messages.push(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessage::from(
          "Use the tools to gather evidence, then finalize by calling done with your cited ids."
            .to_owned(),
        ),
      ));
      continue;
    }

    messages.push(turn.to_request_message()?);

    for call in &turn.tool_calls {
      if call.name == DONE_TOOL {
        let Ok(args) = serde_json::from_str::<DoneArgs>(&call.arguments) else {
          messages.push(tool_result_message(
            &call.id,
            "error: done requires an answer string and a cited_ids array".to_owned(),
          )?);
          continue;
        };

        let (cited_ids, stripped) = filter_citations(&args.cited_ids, &evidence);
        if stripped > 0 {
          tracing::warn!(
            bank_id = %bank.id,
            stripped,
            "Stripped citations that no tool call returned"
          );
        }

        if cited_ids.is_empty() && !is_trivial_answer(&args.answer) {
          messages.push(tool_result_message(
            &call.id,
            "rejected: none of the cited ids came from your tool results. Gather \
             evidence that supports the answer, or admit uncertainty."
              .to_owned(),
          )?);
          continue;
        }

        if let Some(violated) = check_directives(bank, &args.answer).await? {
          if directive_retried {
            tracing::warn!(bank_id = %bank.id, violated, "Directive check failed twice");
            return Ok(ReflectOutcome {
              answer: NO_CONFIDENT_ANSWER.to_owned(),
              cited_ids: vec![],
              iterations: iteration,
            });
          }
          directive_retried = true;
          messages.push(tool_result_message(
            &call.id,
            format!("rejected: the answer violates a standing directive ({violated}). Revise and call done again."),
          )?);
          continue;
        }

        return Ok(ReflectOutcome {
          answer: args.answer,
          cited_ids,
          iterations: iteration,
        });
      }

      // Serial execution: one tool at a time, result echoed before the next
      // turn sees anything.
      let output = dispatch(bank, &scope, call, db).await?;
      evidence.extend(output.evidence_ids.iter().copied());
      messages.push(tool_result_message(&call.id, output.text)?);
    }
  }

  tracing::info!(bank_id = %bank.id, max_iterations, "Reflect exhausted its iteration cap");
  Ok(ReflectOutcome {
    answer: NO_CONFIDENT_ANSWER.to_owned(),
    cited_ids: vec![],
    iterations: max_iterations,
  })
}

#[cfg(test)]
mod tests {
  use crate::bank::{Bank, Disposition};

  use super::build_system_prompt;

  fn bank() -> Bank {
    Bank {
      id: uuid::Uuid::now_v7(),
      name: "test".to_owned(),
      mission: "Remember the team's world.".to_owned(),
      background: String::new(),
      disposition: Disposition {
        skepticism: 5,
        literalism: 3,
        empathy: 3,
      },
      directives: vec!["Never reveal raw ids.".to_owned()],
    }
  }

  #[test]
  fn system_prompt_carries_persona() {
    let prompt = build_system_prompt(&bank());
    assert!(prompt.contains("Remember the team's world."));
    assert!(prompt.contains("two independent sources"));
    assert!(prompt.contains("1. Never reveal raw ids."));
  }

  #[test]
  fn neutral_disposition_leaves_no_stance_lines() {
    let mut bank = bank();
    bank.disposition = Disposition::default();
    let prompt = build_system_prompt(&bank);
    assert!(!prompt.contains("two independent sources"));
    assert!(!prompt.contains("face value"));
  }
}
