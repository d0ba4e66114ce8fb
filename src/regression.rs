// Damped least squares (Levenberg-Marquardt) for small models of the form
// `target ≈ f(input, params)`, with a numerically differentiated Jacobian.
// The model does not have to be linear in its parameters.

use crate::all::*;

const MAX_ITERATIONS: usize = 200;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e12;
const STEP_TOLERANCE: f64 = 1e-12;
const COST_TOLERANCE: f64 = 1e-15;
const RANK_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct FitResult {
  pub params: DVector<f64>,
  // Half of the sum of squared residuals.
  pub cost: f64,
  pub initial_cost: f64,
  pub iterations: usize,
}

// Fits `model` to the samples starting from an all-ones parameter vector.
#[allow(non_snake_case)]
pub fn fit_least_squares<F>(
  inputs: &[Vector2d],
  targets: &[f64],
  param_count: usize,
  model: F,
) -> Result<FitResult>
where F: Fn(&Vector2d, &DVector<f64>) -> f64 {
  assert_eq!(inputs.len(), targets.len());
  let fit_failed = |reason: String| -> anyhow::Error { GazeError::FitFailed { reason }.into() };
  if inputs.len() < param_count {
    return Err(fit_failed(format!(
      "{} samples for {} parameters, the problem is under-determined", inputs.len(), param_count)));
  }

  let residuals = |params: &DVector<f64>| -> DVector<f64> {
    DVector::from_iterator(inputs.len(), inputs.iter().zip(targets)
      .map(|(input, target)| target - model(input, params)))
  };
  let cost_of = |r: &DVector<f64>| 0.5 * r.norm_squared();

  let mut params = DVector::from_element(param_count, 1.);
  let mut r = residuals(&params);
  let mut cost = cost_of(&r);
  let initial_cost = cost;

  let J0 = jacobian(&params, &residuals);
  let rank = J0.clone().svd(false, false).rank(RANK_TOLERANCE * J0.norm().max(1.));
  if rank < param_count {
    return Err(fit_failed(format!(
      "design has rank {} for {} parameters, the problem is under-determined", rank, param_count)));
  }

  let mut damping = INITIAL_DAMPING;
  let mut iterations = 0;
  while iterations < MAX_ITERATIONS && cost > 0. {
    iterations += 1;
    let J = jacobian(&params, &residuals);
    let JtJ = J.transpose() * &J;
    let g = J.transpose() * &r;

    let mut accepted = None;
    while damping <= MAX_DAMPING {
      let mut A = JtJ.clone();
      for i in 0..param_count {
        A[(i, i)] += damping * JtJ[(i, i)].max(1e-12);
      }
      if let Some(delta) = A.lu().solve(&(-&g)) {
        let candidate = &params + &delta;
        let candidate_r = residuals(&candidate);
        let candidate_cost = cost_of(&candidate_r);
        if candidate_cost.is_finite() && candidate_cost < cost {
          accepted = Some((candidate, candidate_r, candidate_cost, delta));
          damping = (damping / 10.).max(1e-15);
          break;
        }
      }
      damping *= 10.;
    }

    let (candidate, candidate_r, candidate_cost, delta) = match accepted {
      Some(x) => x,
      // No step decreases the cost: at a minimum, or stuck.
      None => break,
    };
    let cost_change = cost - candidate_cost;
    params = candidate;
    r = candidate_r;
    cost = candidate_cost;
    if delta.norm() <= STEP_TOLERANCE * (params.norm() + STEP_TOLERANCE) { break }
    if cost_change <= COST_TOLERANCE * cost { break }
  }

  if cost >= initial_cost && initial_cost > COST_TOLERANCE {
    return Err(fit_failed(format!("residuals did not decrease from cost {:e}", initial_cost)));
  }
  debug!("Least squares fit: cost {:e} -> {:e} in {} iterations.", initial_cost, cost, iterations);
  Ok(FitResult {
    params,
    cost,
    initial_cost,
    iterations,
  })
}

// Central differences of the residual vector.
#[allow(non_snake_case)]
fn jacobian<R>(params: &DVector<f64>, residuals: &R) -> DMatrix<f64>
where R: Fn(&DVector<f64>) -> DVector<f64> {
  let n = residuals(params).len();
  let mut J = DMatrix::zeros(n, params.len());
  for j in 0..params.len() {
    let h = 1e-6 * (1. + params[j].abs());
    let mut plus = params.clone();
    let mut minus = params.clone();
    plus[j] += h;
    minus[j] -= h;
    let column = (residuals(&plus) - residuals(&minus)) / (2. * h);
    J.set_column(j, &column);
  }
  J
}

#[cfg(test)]
mod tests {
  use super::*;

  fn line(input: &Vector2d, p: &DVector<f64>) -> f64 {
    p[0] + p[1] * input[0] + p[2] * input[1]
  }

  #[test]
  fn test_fit_linear() {
    let inputs: Vec<Vector2d> = (0..6)
      .map(|i| Vector2d::new(i as f64 - 2.5, (i * i) as f64 * 0.3))
      .collect();
    let targets: Vec<f64> = inputs.iter().map(|v| 100. + 50. * v[0] - 7. * v[1]).collect();
    let fit = fit_least_squares(&inputs, &targets, 3, line).unwrap();
    assert!((fit.params[0] - 100.).abs() < 1e-6);
    assert!((fit.params[1] - 50.).abs() < 1e-6);
    assert!((fit.params[2] + 7.).abs() < 1e-6);
    assert!(fit.cost < 1e-9);
    assert!(fit.initial_cost > fit.cost);
  }

  #[test]
  fn test_fit_nonlinear() {
    // Exponential model, not linear in its parameters.
    let model = |input: &Vector2d, p: &DVector<f64>| p[0] * (p[1] * input[0]).exp();
    let inputs: Vec<Vector2d> = (0..8).map(|i| Vector2d::new(i as f64 * 0.25, 0.)).collect();
    let targets: Vec<f64> = inputs.iter().map(|v| 2. * (0.7 * v[0]).exp()).collect();
    let fit = fit_least_squares(&inputs, &targets, 2, model).unwrap();
    assert!((fit.params[0] - 2.).abs() < 1e-5);
    assert!((fit.params[1] - 0.7).abs() < 1e-5);
  }

  #[test]
  fn test_under_determined() {
    let inputs = vec![Vector2d::new(1., 2.), Vector2d::new(3., 4.)];
    let err = fit_least_squares(&inputs, &[1., 2.], 3, line).unwrap_err();
    assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::FitFailed { .. })));

    // Enough samples, but all on one line.
    let inputs: Vec<Vector2d> = (0..5).map(|i| Vector2d::new(i as f64, 2. * i as f64)).collect();
    let targets: Vec<f64> = inputs.iter().map(|v| v[0]).collect();
    let err = fit_least_squares(&inputs, &targets, 3, line).unwrap_err();
    assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::FitFailed { .. })));
  }
}
