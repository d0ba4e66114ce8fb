use crate::all::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolynomialForm {
  // c0 + c1*ex + c2*ey + c3*ex*ey + c4*ex^2 + c5*ey^2
  Quadratic,
  // c0 + c1*ex + c2*ey
  Linear,
}

impl PolynomialForm {
  pub fn param_count(&self) -> usize {
    match self {
      PolynomialForm::Quadratic => 6,
      PolynomialForm::Linear => 3,
    }
  }

  pub fn evaluate(&self, eye_vector: &Vector2d, c: &DVector<f64>) -> f64 {
    let (ex, ey) = (eye_vector[0], eye_vector[1]);
    match self {
      PolynomialForm::Quadratic => {
        c[0] + c[1] * ex + c[2] * ey + c[3] * ex * ey + c[4] * ex * ex + c[5] * ey * ey
      },
      PolynomialForm::Linear => c[0] + c[1] * ex + c[2] * ey,
    }
  }
}

// Two independent regressions, one per screen axis, each trained on the mean
// eye-vector of every calibration point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolynomialMapper {
  pub form: PolynomialForm,
  params_x: Option<DVector<f64>>,
  params_y: Option<DVector<f64>>,
}

impl PolynomialMapper {
  pub fn new(form: PolynomialForm) -> PolynomialMapper {
    debug!("Polynomial mapper ready ({} parameters).", form.param_count());
    PolynomialMapper {
      form,
      params_x: None,
      params_y: None,
    }
  }

  pub fn train_from_data(&mut self, observations: &[Observation], is_left: bool) -> Result<()> {
    let mut eye_vectors = vec![];
    let mut xs = vec![];
    let mut ys = vec![];
    for (index, observation) in observations.iter().enumerate() {
      eye_vectors.push(observation.require_mean_eye_vector(index, is_left)?);
      xs.push(observation.screen_point[0]);
      ys.push(observation.screen_point[1]);
    }
    let form = self.form;
    let model = move |v: &Vector2d, c: &DVector<f64>| form.evaluate(v, c);
    let fit_x = fit_least_squares(&eye_vectors, &xs, form.param_count(), model)
      .context("Fitting the horizontal screen coordinate failed.")?;
    let fit_y = fit_least_squares(&eye_vectors, &ys, form.param_count(), model)
      .context("Fitting the vertical screen coordinate failed.")?;
    debug!("Trained {} polynomial mapper on {} points, residual costs {:e}, {:e}.",
      eye_name(is_left), observations.len(), fit_x.cost, fit_y.cost);
    self.params_x = Some(fit_x.params);
    self.params_y = Some(fit_y.params);
    Ok(())
  }

  pub fn is_trained(&self) -> bool {
    self.params_x.is_some() && self.params_y.is_some()
  }

  pub fn map_point(&self, eye_vector: &Vector2d) -> Result<Vector2d> {
    match (&self.params_x, &self.params_y) {
      (Some(px), Some(py)) => Ok(Vector2d::new(
        self.form.evaluate(eye_vector, px),
        self.form.evaluate(eye_vector, py),
      )),
      _ => Err(GazeError::MapperNotTrained.into()),
    }
  }
}

#[cfg(test)]
pub mod tests {
  use super::*;

  // Observations with a single exact sample per eye.
  pub fn synthetic_observations<F: Fn(&Vector2d) -> Vector2d>(
    eye_vectors: &[Vector2d],
    screen: F,
  ) -> Vec<Observation> {
    eye_vectors.iter().map(|v| Observation {
      screen_point: screen(v),
      left_eyevectors: vec![*v],
      right_eyevectors: vec![*v],
    }).collect()
  }

  pub fn grid(nx: usize, ny: usize, scale: f64) -> Vec<Vector2d> {
    let mut points = vec![];
    for j in 0..ny {
      for i in 0..nx {
        points.push(Vector2d::new(
          scale * (i as f64 - (nx - 1) as f64 / 2.),
          scale * (j as f64 - (ny - 1) as f64 / 2.),
        ));
      }
    }
    points
  }

  fn linear_screen(v: &Vector2d) -> Vector2d {
    Vector2d::new(100. + 50. * v[0], 200. + 30. * v[1])
  }

  #[test]
  fn test_recovers_linear_mapping() {
    let observations = synthetic_observations(&grid(2, 2, 4.), linear_screen);
    let mut mapper = PolynomialMapper::new(PolynomialForm::Linear);
    assert!(!mapper.is_trained());
    mapper.train_from_data(&observations, false).unwrap();
    for observation in &observations {
      let mapped = mapper.map_point(&observation.right_eyevectors[0]).unwrap();
      assert!((mapped - observation.screen_point).norm() < 1e-3);
    }
    let mapped = mapper.map_point(&Vector2d::new(1., -1.)).unwrap();
    assert!((mapped - Vector2d::new(150., 170.)).norm() < 1e-3);

    let mut quadratic = PolynomialMapper::new(PolynomialForm::Quadratic);
    let observations = synthetic_observations(&grid(3, 3, 4.), linear_screen);
    quadratic.train_from_data(&observations, true).unwrap();
    let mapped = quadratic.map_point(&Vector2d::new(1., -1.)).unwrap();
    assert!((mapped - Vector2d::new(150., 170.)).norm() < 1e-3);
  }

  #[test]
  fn test_recovers_quadratic_mapping() {
    let screen = |v: &Vector2d| Vector2d::new(
      680. + 60. * v[0] + 2. * v[0] * v[1] - 1.5 * v[0] * v[0],
      380. - 45. * v[1] + 0.5 * v[1] * v[1] + 3. * v[0],
    );
    let observations = synthetic_observations(&grid(3, 3, 5.), screen);
    let mut mapper = PolynomialMapper::new(PolynomialForm::Quadratic);
    mapper.train_from_data(&observations, false).unwrap();
    let query = Vector2d::new(2., 3.);
    assert!((mapper.map_point(&query).unwrap() - screen(&query)).norm() < 1e-3);
  }

  #[test]
  fn test_fit_failures() {
    let mut mapper = PolynomialMapper::new(PolynomialForm::Quadratic);
    assert!(matches!(
      mapper.map_point(&Vector2d::zeros()).unwrap_err().downcast_ref::<GazeError>(),
      Some(GazeError::MapperNotTrained)
    ));

    // Four points cannot determine six coefficients.
    let observations = synthetic_observations(&grid(2, 2, 4.), linear_screen);
    let err = mapper.train_from_data(&observations, false).unwrap_err();
    assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::FitFailed { .. })));
    assert!(!mapper.is_trained());

    // An empty calibration point is reported instead of treated as zero.
    let mut observations = synthetic_observations(&grid(3, 3, 4.), linear_screen);
    observations[4].right_eyevectors.clear();
    let err = mapper.train_from_data(&observations, false).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<GazeError>(),
      Some(GazeError::CalibrationPointFailed { index: 4, .. })
    ));
  }
}
