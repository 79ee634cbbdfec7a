use std::fmt::Display;

/// Classification of an engine failure, used by callers to decide whether to
/// retry, recover, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Caller-supplied input was malformed. Never retried.
  InvalidInput,
  /// The LLM or embedding provider failed.
  UpstreamUnavailable,
  /// A unique-index race was lost. Recoverable: reload the winner's row.
  ConcurrencyConflict,
  /// A Reflect finalization was rejected by the evidence or directive checks.
  GuardrailRejected,
  /// A wall-clock deadline was exceeded.
  Timeout,
  /// Invariant violation or unexpected internal failure.
  Fatal,
}

impl Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::InvalidInput => "invalid_input",
      Self::UpstreamUnavailable => "upstream_unavailable",
      Self::ConcurrencyConflict => "concurrency_conflict",
      Self::GuardrailRejected => "guardrail_rejected",
      Self::Timeout => "timeout",
      Self::Fatal => "fatal",
    };
    write!(f, "{s}")
  }
}

#[derive(Debug)]
pub struct EngramError {
  err: anyhow::Error,
  kind: ErrorKind,
}

impl EngramError {
  /// Create with `Fatal` classification
  pub fn new<E: Into<anyhow::Error>>(err: E) -> Self {
    Self {
      err: err.into(),
      kind: ErrorKind::Fatal,
    }
  }

  /// Create with explicit classification
  pub fn with_kind<E: Into<anyhow::Error>>(kind: ErrorKind, err: E) -> Self {
    Self {
      err: err.into(),
      kind,
    }
  }

  pub fn invalid_input(msg: impl Into<String>) -> Self {
    Self::with_kind(ErrorKind::InvalidInput, anyhow::anyhow!(msg.into()))
  }

  pub fn upstream<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::UpstreamUnavailable, err)
  }

  pub fn conflict(msg: impl Into<String>) -> Self {
    Self::with_kind(ErrorKind::ConcurrencyConflict, anyhow::anyhow!(msg.into()))
  }

  pub fn guardrail(msg: impl Into<String>) -> Self {
    Self::with_kind(ErrorKind::GuardrailRejected, anyhow::anyhow!(msg.into()))
  }

  pub fn timeout(msg: impl Into<String>) -> Self {
    Self::with_kind(ErrorKind::Timeout, anyhow::anyhow!(msg.into()))
  }

  #[must_use]
  pub const fn kind(&self) -> ErrorKind {
    self.kind
  }

  /// Re-tag an error produced by a lower layer, keeping its cause chain.
  #[must_use]
  pub fn into_kind(mut self, kind: ErrorKind) -> Self {
    self.kind = kind;
    self
  }
}

impl Display for EngramError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "[{}] {}", self.kind, self.err)
  }
}

impl<E> From<E> for EngramError
where
  E: Into<anyhow::Error>,
{
  fn from(err: E) -> Self {
    Self::new(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_survives_construction() {
    let err = EngramError::invalid_input("bank id is not a UUID");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().starts_with("[invalid_input]"));
  }

  #[test]
  fn question_mark_conversion_defaults_to_fatal() {
    fn inner() -> Result<(), EngramError> {
      let _: i32 = "nope".parse()?;
      Ok(())
    }
    assert_eq!(inner().unwrap_err().kind(), ErrorKind::Fatal);
  }

  #[test]
  fn retagging_keeps_message() {
    let err = EngramError::new(anyhow::anyhow!("boom")).into_kind(ErrorKind::Timeout);
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("boom"));
  }
}
