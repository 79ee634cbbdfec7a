use chrono::Utc;
use engram_ai::embed_many;
use engram_entities::{chunk, memory_unit};
use engram_shared::EngramError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::MemoryUnit;

/// Target chunk size in characters; chunks overlap so sentence fragments at
/// a boundary appear in both neighbors.
const CHUNK_SIZE: usize = 1200;
const CHUNK_OVERLAP: usize = 200;

/// Upper bound on chunks returned by one expand call.
const EXPAND_CHUNK_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct ExpandedUnit {
  pub unit: MemoryUnit,
  pub chunks: Vec<String>,
}

/// Split text into overlapping passages, snapping each boundary back to the
/// nearest whitespace so words stay whole.
#[must_use]
pub fn split_text(text: &str) -> Vec<String> {
  let chars: Vec<char> = text.chars().collect();
  if chars.len() <= CHUNK_SIZE {
    return vec![text.to_owned()];
  }

  let mut chunks = Vec::new();
  let mut start = 0usize;

  while start < chars.len() {
    let hard_end = (start + CHUNK_SIZE).min(chars.len());
    let mut end = hard_end;

    if hard_end < chars.len() {
      // snap back to whitespace, but never collapse the chunk entirely
      while end > start + CHUNK_SIZE / 2 && !chars[end - 1].is_whitespace() {
        end -= 1;
      }
      if end == start + CHUNK_SIZE / 2 {
        end = hard_end;
      }
    }

    let chunk: String = chars[start..end].iter().collect();
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
      chunks.push(trimmed.to_owned());
    }

    if end >= chars.len() {
      break;
    }
    start = end.saturating_sub(CHUNK_OVERLAP);
  }

  chunks
}

/// Whether a unit's tags satisfy a tag requirement: every required tag
/// present, untagged units excluded. No requirement admits everything.
pub(crate) fn tags_satisfy(unit_tags: &[String], required: Option<&[String]>) -> bool {
  match required {
    Some(required) => {
      !unit_tags.is_empty() && required.iter().all(|tag| unit_tags.contains(tag))
    }
    None => true,
  }
}

/// Return a unit's full text and its chunk passages, producing the chunks on
/// first request. The unit must belong to `bank_id`; a `required_tags`
/// constraint (tag-scoped Reflect) is checked before any chunking work, and
/// out-of-scope units read as unknown.
pub async fn expand(
  bank_id: Uuid,
  unit_id: Uuid,
  required_tags: Option<&[String]>,
  db: &DatabaseConnection,
) -> Result<ExpandedUnit, EngramError> {
  let model = memory_unit::Entity::find_by_id(unit_id)
    .one(db)
    .await?
    .filter(|m| m.bank_id == bank_id)
    .filter(|m| tags_satisfy(&m.tags, required_tags))
    .ok_or_else(|| EngramError::invalid_input(format!("unknown unit {unit_id}")))?;

  let unit = MemoryUnit::from_model(model)?;

  let existing = chunk::Entity::find()
    .filter(chunk::Column::UnitId.eq(unit_id))
    .order_by_asc(chunk::Column::ChunkIndex)
    .all(db)
    .await?;

  let chunks = if existing.is_empty() {
    let pieces = split_text(&unit.text);
    let embeddings = embed_many(&pieces).await?;
    let now = Utc::now();

    for (index, (piece, embedding)) in pieces.iter().zip(embeddings).enumerate() {
      chunk::ActiveModel {
        id: Set(Uuid::now_v7()),
        unit_id: Set(unit_id),
        chunk_index: Set(index as i32),
        text: Set(piece.clone()),
        embedding: Set(Some(embedding)),
        created_at: Set(now.into()),
      }
      .insert(db)
      .await?;
    }

    pieces
  } else {
    existing.into_iter().map(|c| c.text).collect()
  };

  Ok(ExpandedUnit {
    unit,
    chunks: chunks.into_iter().take(EXPAND_CHUNK_LIMIT).collect(),
  })
}

#[cfg(test)]
mod tests {
  use super::{CHUNK_OVERLAP, CHUNK_SIZE, split_text, tags_satisfy};

  fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
  }

  #[test]
  fn tag_requirement_excludes_untagged_and_partial_units() {
    let required = tags(&["work", "team"]);
    assert!(tags_satisfy(&tags(&["work", "team", "extra"]), Some(&required)));
    assert!(!tags_satisfy(&tags(&["work"]), Some(&required)));
    assert!(!tags_satisfy(&[], Some(&required)));
  }

  #[test]
  fn no_tag_requirement_admits_everything() {
    assert!(tags_satisfy(&[], None));
    assert!(tags_satisfy(&tags(&["anything"]), None));
  }

  #[test]
  fn short_text_is_one_chunk() {
    let chunks = split_text("just a sentence");
    assert_eq!(chunks, vec!["just a sentence".to_owned()]);
  }

  #[test]
  fn long_text_produces_overlapping_chunks() {
    let text = "word ".repeat(1000); // 5000 chars
    let chunks = split_text(&text);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
      assert!(chunk.chars().count() <= CHUNK_SIZE);
    }
    // consecutive chunks share the overlap region
    let tail: String = chunks[0]
      .chars()
      .skip(chunks[0].chars().count().saturating_sub(CHUNK_OVERLAP / 2))
      .collect();
    assert!(chunks[1].contains(tail.trim()));
  }

  #[test]
  fn boundaries_do_not_split_words() {
    let text = "supercalifragilistic ".repeat(200);
    for chunk in split_text(&text) {
      assert!(chunk.split_whitespace().all(|w| w == "supercalifragilistic"));
    }
  }

  #[test]
  fn covers_the_whole_text() {
    let text = "alpha bravo charlie delta ".repeat(300);
    let chunks = split_text(&text);
    let first = chunks.first().unwrap();
    let last = chunks.last().unwrap();
    assert!(text.trim_end().starts_with(first.split_whitespace().next().unwrap()));
    assert!(text.trim_end().ends_with(last.split_whitespace().last().unwrap()));
  }
}
