use crate::all::*;

pub fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() { return None }
  Some(values.iter().sum::<f64>() / values.len() as f64)
}

// Population standard deviation, same as numpy's default.
pub fn standard_deviation(values: &[f64]) -> Option<f64> {
  let m = mean(values)?;
  let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
  Some(variance.sqrt())
}

pub fn mean_vector(vectors: &[Vector2d]) -> Option<Vector2d> {
  if vectors.is_empty() { return None }
  let sum = vectors.iter().fold(Vector2d::zeros(), |acc, v| acc + v);
  Some(sum / vectors.len() as f64)
}
