use engram_shared::{EngramError, ErrorKind};

/// Target dimension for embeddings.
pub(crate) const TARGET_DIM: usize = 1024;
/// Threshold for determining if L2 normalization is needed.
const L2_NORM_TOLERANCE: f32 = 1e-6;

/// Process embedding vector to ensure it's L2 normalized with exactly 1024 dimensions.
///
/// - If dim > 1024: truncate to 1024 and L2 normalize
/// - If dim == 1024: check if already L2 normalized, normalize if not
/// - If dim < 1024: provider returned a malformed vector
pub(crate) fn process_embedding(mut vec: Vec<f32>) -> Result<Vec<f32>, EngramError> {
  match vec.len() {
    d if d > TARGET_DIM => {
      vec.truncate(TARGET_DIM);
      l2_normalize(&mut vec);
      Ok(vec)
    }
    d if d == TARGET_DIM => {
      let norm_sq: f32 = vec.iter().map(|x| x * x).sum();
      if (norm_sq - 1.0).abs() > L2_NORM_TOLERANCE {
        l2_normalize(&mut vec);
      }
      Ok(vec)
    }
    d => Err(EngramError::with_kind(
      ErrorKind::UpstreamUnavailable,
      anyhow::anyhow!("embedding dimension {} is less than required {}", d, TARGET_DIM),
    )),
  }
}

/// L2 normalize a vector in-place.
fn l2_normalize(vec: &mut [f32]) {
  let norm_sq: f32 = vec.iter().map(|x| x * x).sum();
  let norm = norm_sq.sqrt();
  if norm > 1e-12 {
    for x in vec.iter_mut() {
      *x /= norm;
    }
  }
}

/// Reject empty or whitespace-only inputs before they reach the provider.
/// Zero vectors for empty strings poison ANN indexes silently; failing loud
/// here keeps that class of bug at the boundary.
pub(crate) fn check_inputs(inputs: &[String]) -> Result<(), EngramError> {
  for (i, input) in inputs.iter().enumerate() {
    if input.trim().is_empty() {
      return Err(EngramError::invalid_input(format!(
        "embedding input {i} is empty"
      )));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::{TARGET_DIM, check_inputs, process_embedding};

  #[test]
  fn oversized_vector_is_truncated_and_normalized() {
    let vec = vec![1.0_f32; TARGET_DIM + 512];
    let out = process_embedding(vec).unwrap();
    assert_eq!(out.len(), TARGET_DIM);
    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
  }

  #[test]
  fn undersized_vector_is_rejected() {
    assert!(process_embedding(vec![1.0_f32; 512]).is_err());
  }

  #[test]
  fn empty_input_is_rejected() {
    let inputs = vec!["fine".to_owned(), "   ".to_owned()];
    assert!(check_inputs(&inputs).is_err());
    assert!(check_inputs(&inputs[..1]).is_ok());
  }
}
