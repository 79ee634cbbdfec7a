use std::fmt::Write;

use chrono::Utc;
use chrono_humanize::HumanTime;
use engram_ai::{ToolInvocation, ToolSpec};
use engram_shared::EngramError;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::bank::Bank;
use crate::memory::chunks::expand;
use crate::memory::{FactType, RecallFilters, RecallLimits, RecalledUnit, TagsMatch, recall};
use crate::mental_model::MentalModel;

use super::ReflectScope;

const SEARCH_MODELS_CAP: usize = 20;
const SEARCH_OBSERVATIONS_CAP: usize = 50;
const RECALL_CAP: usize = 100;

pub const DONE_TOOL: &str = "done";

/// The fixed five-tool catalog. Bank identity is injected by the dispatcher,
/// never exposed as a parameter the model could set.
pub fn tool_catalog() -> Vec<ToolSpec> {
  vec![
    ToolSpec {
      name: "search_mental_models",
      description: "Search curated mental models (per-entity and per-theme summaries). Best first stop for questions about a known person or topic.",
      parameters: json!({
        "type": "object",
        "properties": {
          "query": { "type": "string", "description": "Search query" },
          "max_results": { "type": "integer", "description": "Result cap, at most 20" }
        },
        "required": ["query"]
      }),
    },
    ToolSpec {
      name: "search_observations",
      description: "Search consolidated observations: durable, deduplicated knowledge with provenance.",
      parameters: json!({
        "type": "object",
        "properties": {
          "query": { "type": "string", "description": "Search query" },
          "max_results": { "type": "integer", "description": "Result cap, at most 50" },
          "tags": { "type": "array", "items": { "type": "string" }, "description": "Restrict to observations carrying any of these tags" }
        },
        "required": ["query"]
      }),
    },
    ToolSpec {
      name: "recall",
      description: "Search raw recorded facts (observations excluded). Use to check details an observation summarizes away.",
      parameters: json!({
        "type": "object",
        "properties": {
          "query": { "type": "string", "description": "Search query" },
          "max_results": { "type": "integer", "description": "Result cap, at most 100" },
          "fact_types": { "type": "array", "items": { "type": "string", "enum": ["world", "experience"] } },
          "tags": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["query"]
      }),
    },
    ToolSpec {
      name: "expand",
      description: "Fetch a unit's full text plus its chunk passages by id. The id must come from an earlier result.",
      parameters: json!({
        "type": "object",
        "properties": {
          "unit_id": { "type": "string", "description": "Unit id from an earlier tool result" }
        },
        "required": ["unit_id"]
      }),
    },
    ToolSpec {
      name: DONE_TOOL,
      description: "Finalize with your answer. Cite the ids of every result the answer rests on; uncited claims will be challenged.",
      parameters: json!({
        "type": "object",
        "properties": {
          "answer": { "type": "string", "description": "Final grounded answer" },
          "cited_ids": { "type": "array", "items": { "type": "string" }, "description": "Ids of results supporting the answer" }
        },
        "required": ["answer", "cited_ids"]
      }),
    },
  ]
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
  query: String,
  max_results: Option<usize>,
  tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RecallArgs {
  query: String,
  max_results: Option<usize>,
  fact_types: Option<Vec<String>>,
  tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ExpandArgs {
  unit_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DoneArgs {
  pub answer: String,
  pub cited_ids: Vec<String>,
}

/// Result of one executed tool call: the text echoed to the model and the
/// ids that become citable evidence.
#[derive(Debug)]
pub struct ToolOutput {
  pub text: String,
  pub evidence_ids: Vec<Uuid>,
}

impl ToolOutput {
  fn message(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      evidence_ids: Vec::new(),
    }
  }
}

fn clamp_limit(requested: Option<usize>, cap: usize) -> usize {
  requested.unwrap_or(cap).clamp(1, cap)
}

fn format_units(results: &[RecalledUnit]) -> String {
  if results.is_empty() {
    return "No results.".to_owned();
  }

  let mut out = String::new();
  let now = Utc::now();
  for (rank, result) in results.iter().enumerate() {
    let relative = HumanTime::from(now.signed_duration_since(result.unit.mentioned_at));
    let _ = writeln!(
      out,
      "## Result {} [id: {}, score: {:.3}, type: {}]",
      rank + 1,
      result.unit.id,
      result.score,
      result.unit.fact_type
    );
    let _ = writeln!(out, "**When:** {relative}");
    if !result.unit.who.is_empty() {
      let _ = writeln!(out, "**Who:** {}", result.unit.who.join(", "));
    }
    let _ = writeln!(out, "{}", result.unit.text);
    let _ = writeln!(out);
  }
  out.trim_end().to_owned()
}

fn format_models(results: &[(MentalModel, f64)]) -> String {
  if results.is_empty() {
    return "No mental models matched.".to_owned();
  }

  let mut out = String::new();
  for (rank, (model, score)) in results.iter().enumerate() {
    let _ = writeln!(
      out,
      "## Mental model {} [id: {}, score: {:.3}] {}",
      rank + 1,
      model.id,
      score,
      model.name
    );
    let _ = writeln!(out, "{}", model.content);
    let _ = writeln!(out);
  }
  out.trim_end().to_owned()
}

/// Unit searches honor the invocation scope: a tag-scoped refresh locks tag
/// matching to all-strict over the scope tags (model-supplied tags ignored)
/// so out-of-scope rows never leak in.
fn scoped_filters(
  fact_types: Vec<FactType>,
  requested_tags: Option<Vec<String>>,
  scope: &ReflectScope,
) -> RecallFilters {
  match &scope.tags {
    Some(scope_tags) => RecallFilters {
      fact_types: Some(fact_types),
      tags: Some(scope_tags.clone()),
      tags_match: TagsMatch::AllStrict,
    },
    None => RecallFilters {
      fact_types: Some(fact_types),
      tags: requested_tags,
      tags_match: TagsMatch::Any,
    },
  }
}

/// Execute one non-`done` tool call. Malformed arguments come back as a tool
/// message instead of an error so the model can correct itself.
pub async fn dispatch(
  bank: &Bank,
  scope: &ReflectScope,
  call: &ToolInvocation,
  db: &DatabaseConnection,
) -> Result<ToolOutput, EngramError> {
  match call.name.as_str() {
    "search_mental_models" => {
      let Ok(args) = serde_json::from_str::<SearchArgs>(&call.arguments) else {
        return Ok(ToolOutput::message("error: arguments must include a query string"));
      };
      let limit = clamp_limit(args.max_results, SEARCH_MODELS_CAP);
      let results =
        MentalModel::search(bank.id, &args.query, limit, scope.tags.as_deref(), db).await?;
      Ok(ToolOutput {
        evidence_ids: results.iter().map(|(m, _)| m.id).collect(),
        text: format_models(&results),
      })
    }

    "search_observations" => {
      let Ok(args) = serde_json::from_str::<SearchArgs>(&call.arguments) else {
        return Ok(ToolOutput::message("error: arguments must include a query string"));
      };
      let limits = RecallLimits {
        max_results: clamp_limit(args.max_results, SEARCH_OBSERVATIONS_CAP),
        ..Default::default()
      };
      let results = recall(
        bank.id,
        &args.query,
        &limits,
        &scoped_filters(vec![FactType::Observation], args.tags, scope),
        db,
      )
      .await?;
      Ok(ToolOutput {
        evidence_ids: results.iter().map(|r| r.unit.id).collect(),
        text: format_units(&results),
      })
    }

    "recall" => {
      let Ok(args) = serde_json::from_str::<RecallArgs>(&call.arguments) else {
        return Ok(ToolOutput::message("error: arguments must include a query string"));
      };
      // Raw-fact search never returns observations regardless of the request.
      let allowed = [FactType::World, FactType::Experience];
      let fact_types = match args.fact_types {
        Some(requested) => {
          let picked: Vec<FactType> = requested
            .iter()
            .filter_map(|t| t.parse().ok())
            .filter(|t| allowed.contains(t))
            .collect();
          if picked.is_empty() { allowed.to_vec() } else { picked }
        }
        None => allowed.to_vec(),
      };
      let limits = RecallLimits {
        max_results: clamp_limit(args.max_results, RECALL_CAP),
        ..Default::default()
      };
      let filters = scoped_filters(fact_types, args.tags, scope);
      let results = recall(bank.id, &args.query, &limits, &filters, db).await?;
      Ok(ToolOutput {
        evidence_ids: results.iter().map(|r| r.unit.id).collect(),
        text: format_units(&results),
      })
    }

    "expand" => {
      let unit_id = serde_json::from_str::<ExpandArgs>(&call.arguments)
        .ok()
        .and_then(|args| args.unit_id.parse::<Uuid>().ok());
      let Some(unit_id) = unit_id else {
        return Ok(ToolOutput::message("error: unit_id must be a UUID from an earlier result"));
      };
      match expand(bank.id, unit_id, scope.tags.as_deref(), db).await {
        Ok(expanded) => {
          let mut text = format!("## Unit {}\n{}\n", expanded.unit.id, expanded.unit.text);
          if !expanded.chunks.is_empty() {
            let _ = writeln!(text, "\n### Passages");
            for (i, chunk) in expanded.chunks.iter().enumerate() {
              let _ = writeln!(text, "[{}] {}", i + 1, chunk);
            }
          }
          Ok(ToolOutput {
            evidence_ids: vec![expanded.unit.id],
            text,
          })
        }
        // Out-of-bank, out-of-scope, or unknown ids read as not-found; nothing leaks.
        Err(_) => Ok(ToolOutput::message("error: no such unit in this memory bank")),
      }
    }

    other => Ok(ToolOutput::message(format!("error: unknown tool {other}"))),
  }
}

#[cfg(test)]
mod tests {
  use crate::memory::{FactType, TagsMatch};
  use crate::reflect::ReflectScope;

  use super::{RECALL_CAP, SEARCH_MODELS_CAP, clamp_limit, scoped_filters, tool_catalog};

  fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
  }

  #[test]
  fn catalog_is_fixed_and_bank_free() {
    let catalog = tool_catalog();
    let names: Vec<&str> = catalog.iter().map(|t| t.name).collect();
    assert_eq!(
      names,
      vec!["search_mental_models", "search_observations", "recall", "expand", "done"]
    );
    for tool in &catalog {
      assert!(
        !tool.parameters.to_string().contains("bank_id"),
        "{} must not expose bank identity",
        tool.name
      );
    }
  }

  #[test]
  fn limits_clamp_to_their_caps() {
    assert_eq!(clamp_limit(Some(500), RECALL_CAP), 100);
    assert_eq!(clamp_limit(Some(3), SEARCH_MODELS_CAP), 3);
    assert_eq!(clamp_limit(Some(0), SEARCH_MODELS_CAP), 1);
    assert_eq!(clamp_limit(None, SEARCH_MODELS_CAP), 20);
  }

  #[test]
  fn scope_overrides_requested_tags_with_all_strict() {
    let scope = ReflectScope {
      tags: Some(tags(&["work"])),
    };
    let filters = scoped_filters(
      vec![FactType::World, FactType::Experience],
      Some(tags(&["personal"])),
      &scope,
    );
    assert_eq!(filters.tags, Some(tags(&["work"])));
    assert_eq!(filters.tags_match, TagsMatch::AllStrict);
  }

  #[test]
  fn unscoped_invocation_passes_requested_tags_through() {
    let filters = scoped_filters(
      vec![FactType::Observation],
      Some(tags(&["personal"])),
      &ReflectScope::default(),
    );
    assert_eq!(filters.tags, Some(tags(&["personal"])));
    assert_eq!(filters.tags_match, TagsMatch::Any);
  }

}
