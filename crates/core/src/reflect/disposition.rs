use crate::bank::Disposition;

/// Project the disposition triple onto stance sentences for the system
/// prompt. Neutral axes (3) contribute nothing. The exact wording is pinned
/// by the tests below; prompts must stay reproducible across runs.
#[must_use]
pub fn stance_sentences(disposition: Disposition) -> Vec<String> {
  let d = disposition.clamped();
  let mut sentences = Vec::new();

  match d.skepticism {
    1 | 2 => sentences.push(
      "Take recalled evidence at face value; a single source is enough for a direct answer."
        .to_owned(),
    ),
    4 | 5 => sentences.push(
      "Prefer hedged claims; demand at least two independent sources before asserting anything strongly."
        .to_owned(),
    ),
    _ => {}
  }

  match d.literalism {
    1 | 2 => sentences.push(
      "Read between the lines: address what the question is really after, not only its literal wording."
        .to_owned(),
    ),
    4 | 5 => sentences.push(
      "Answer exactly what was asked, no more; do not volunteer adjacent information.".to_owned(),
    ),
    _ => {}
  }

  match d.empathy {
    1 | 2 => sentences.push("Keep the tone factual and neutral; skip emotional framing.".to_owned()),
    4 | 5 => sentences.push(
      "Acknowledge the feelings behind the question before answering it.".to_owned(),
    ),
    _ => {}
  }

  sentences
}

#[cfg(test)]
mod tests {
  use crate::bank::Disposition;

  use super::stance_sentences;

  #[test]
  fn neutral_disposition_adds_nothing() {
    assert!(stance_sentences(Disposition::default()).is_empty());
  }

  #[test]
  fn high_skepticism_demands_sources() {
    let sentences = stance_sentences(Disposition {
      skepticism: 5,
      literalism: 3,
      empathy: 3,
    });
    assert_eq!(sentences.len(), 1);
    assert!(sentences[0].contains("two independent sources"));
  }

  #[test]
  fn all_axes_contribute_when_non_neutral() {
    let sentences = stance_sentences(Disposition {
      skepticism: 1,
      literalism: 5,
      empathy: 1,
    });
    assert_eq!(sentences.len(), 3);
  }

  #[test]
  fn mapping_is_stable() {
    let sentences = stance_sentences(Disposition {
      skepticism: 4,
      literalism: 3,
      empathy: 3,
    });
    assert_eq!(
      sentences,
      vec![
        "Prefer hedged claims; demand at least two independent sources before asserting anything strongly."
          .to_owned()
      ]
    );
  }
}
