use std::collections::HashSet;

use engram_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage, generate_object,
};
use engram_shared::{EngramError, config};
use schemars::JsonSchema;
use serde::Deserialize;
use uuid::Uuid;

use crate::bank::Bank;

/// Keep only cited ids that some earlier tool call actually returned.
/// Returns the surviving ids and how many were stripped.
pub fn filter_citations(cited: &[String], evidence: &HashSet<Uuid>) -> (Vec<Uuid>, usize) {
  let mut valid = Vec::new();
  let mut stripped = 0usize;

  for raw in cited {
    match raw.parse::<Uuid>() {
      Ok(id) if evidence.contains(&id) => {
        if !valid.contains(&id) {
          valid.push(id);
        }
      }
      _ => stripped += 1,
    }
  }

  (valid, stripped)
}

/// An answer that admits uncertainty needs no evidence; anything substantive
/// does.
#[must_use]
pub fn is_trivial_answer(answer: &str) -> bool {
  let lowered = answer.to_lowercase();
  const UNCERTAINTY_MARKERS: [&str; 6] = [
    "i don't know",
    "i do not know",
    "not sure",
    "no information",
    "couldn't find",
    "could not find",
  ];

  lowered.chars().count() < 40
    || UNCERTAINTY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DirectiveVerdict {
  /// Whether the answer complies with every directive
  compliant: bool,
  /// The directive being violated, when not compliant
  violated_directive: Option<String>,
}

const DIRECTIVE_CHECK_SYSTEM_PROMPT: &str = "\
You check a drafted answer against a list of standing directives. Report
whether the answer complies with every directive. Judge only the directives
given; do not invent new requirements.";

/// Post-check the drafted answer against the bank's directives. Returns the
/// violated directive when the check fails, `None` when it passes.
pub async fn check_directives(bank: &Bank, answer: &str) -> Result<Option<String>, EngramError> {
  if bank.directives.is_empty() {
    return Ok(None);
  }

  let directives = bank
    .directives
    .iter()
    .enumerate()
    .map(|(i, d)| format!("{}. {d}", i + 1))
    .collect::<Vec<_>>()
    .join("\n");

  let user = format!("== Directives ==\n{directives}\n\n== Drafted answer ==\n{answer}");

  let verdict = generate_object::<DirectiveVerdict>(
    &config::consolidation_model()?,
    vec![
      ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
        DIRECTIVE_CHECK_SYSTEM_PROMPT,
      )),
      ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(user)),
    ],
    "directive_check".to_owned(),
    Some("Check a drafted answer against persona directives".to_owned()),
  )
  .await?;

  if verdict.compliant {
    Ok(None)
  } else {
    Ok(Some(
      verdict
        .violated_directive
        .unwrap_or_else(|| "an unspecified directive".to_owned()),
    ))
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use uuid::Uuid;

  use super::{filter_citations, is_trivial_answer};

  #[test]
  fn keeps_only_seen_ids() {
    let seen = Uuid::now_v7();
    let unseen = Uuid::now_v7();
    let evidence: HashSet<Uuid> = [seen].into_iter().collect();

    let (valid, stripped) =
      filter_citations(&[seen.to_string(), unseen.to_string()], &evidence);
    assert_eq!(valid, vec![seen]);
    assert_eq!(stripped, 1);
  }

  #[test]
  fn strips_malformed_ids() {
    let evidence = HashSet::new();
    let (valid, stripped) = filter_citations(&["not-a-uuid".to_owned()], &evidence);
    assert!(valid.is_empty());
    assert_eq!(stripped, 1);
  }

  #[test]
  fn deduplicates_repeated_citations() {
    let seen = Uuid::now_v7();
    let evidence: HashSet<Uuid> = [seen].into_iter().collect();
    let (valid, stripped) =
      filter_citations(&[seen.to_string(), seen.to_string()], &evidence);
    assert_eq!(valid.len(), 1);
    assert_eq!(stripped, 0);
  }

  #[test]
  fn uncertainty_admissions_are_trivial() {
    assert!(is_trivial_answer("I don't know."));
    assert!(is_trivial_answer(
      "I could not find anything about that topic in my memory, sorry about that."
    ));
  }

  #[test]
  fn substantive_answers_are_not_trivial() {
    assert!(!is_trivial_answer(
      "Alice joined Acme in June 2024 as an engineer and was promoted to staff engineer in March 2025."
    ));
  }
}
