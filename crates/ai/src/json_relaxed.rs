/// Extract the JSON payload from model output that may carry prose or code
/// fences around it.
///
/// Strategy: strip markdown fences if present, then slice from the first
/// `{` or `[` to the matching region's last `}` or `]`. Returns the trimmed
/// input unchanged when no such region exists (the caller's serde parse
/// reports the real error).
#[must_use]
pub fn extract_json(raw: &str) -> &str {
  let mut s = raw.trim();

  if let Some(rest) = s.strip_prefix("```") {
    // drop the info string ("json", "jsonc", ...) up to the first newline
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    s = rest.strip_suffix("```").unwrap_or(rest).trim();
  }

  let open = s.find(['{', '[']);
  let close = s.rfind(['}', ']']);
  match (open, close) {
    (Some(start), Some(end)) if start < end => &s[start..=end],
    _ => s,
  }
}

#[cfg(test)]
mod tests {
  use super::extract_json;

  #[test]
  fn passes_clean_json_through() {
    assert_eq!(extract_json(r#"{"a": 1}"#), r#"{"a": 1}"#);
  }

  #[test]
  fn strips_code_fences() {
    let raw = "```json\n[{\"a\": 1}]\n```";
    assert_eq!(extract_json(raw), "[{\"a\": 1}]");
  }

  #[test]
  fn strips_leading_and_trailing_prose() {
    let raw = "Here are the facts:\n[{\"a\": 1}]\nLet me know if you need more.";
    assert_eq!(extract_json(raw), "[{\"a\": 1}]");
  }

  #[test]
  fn leaves_json_free_text_alone() {
    assert_eq!(extract_json("no structured output"), "no structured output");
  }
}
