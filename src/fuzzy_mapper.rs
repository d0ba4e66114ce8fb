use crate::all::*;

const TOP_N: usize = 3;
const NORMALIZATION_EPSILON: f64 = 1e-9;

// Distance-weighted interpolation between the calibration points closest to
// the query in eye-vector space.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FuzzyMapper {
  screen_points: Vec<Vector2d>,
  eye_vectors: Vec<Vector2d>,
  // Largest distance between two stored eye-vectors.
  neighbourhood: f64,
}

impl FuzzyMapper {
  pub fn new() -> FuzzyMapper {
    debug!("Fuzzy mapper ready.");
    FuzzyMapper::default()
  }

  pub fn train_from_data(&mut self, observations: &[Observation], is_left: bool) -> Result<()> {
    if observations.is_empty() {
      return Err(GazeError::NotEnoughPoints { needed: 1, found: 0 }.into());
    }
    let mut screen_points = vec![];
    let mut eye_vectors = vec![];
    for (index, observation) in observations.iter().enumerate() {
      eye_vectors.push(observation.require_mean_eye_vector(index, is_left)?);
      screen_points.push(observation.screen_point);
    }
    let mut neighbourhood: f64 = 0.;
    for i in 0..eye_vectors.len() {
      for j in (i + 1)..eye_vectors.len() {
        neighbourhood = neighbourhood.max((eye_vectors[i] - eye_vectors[j]).norm());
      }
    }
    debug!("Trained {} fuzzy mapper on {} points, neighbourhood {:.3}.",
      eye_name(is_left), eye_vectors.len(), neighbourhood);
    self.screen_points = screen_points;
    self.eye_vectors = eye_vectors;
    self.neighbourhood = neighbourhood;
    Ok(())
  }

  pub fn is_trained(&self) -> bool {
    !self.eye_vectors.is_empty()
  }

  pub fn map_point(&self, eye_vector: &Vector2d) -> Result<Vector2d> {
    if !self.is_trained() {
      return Err(GazeError::MapperNotTrained.into());
    }
    let weights: Vec<f64> = self.eye_vectors.iter().map(|v| {
      // Coincident calibration points are all equally close.
      if self.neighbourhood > 0. { (-(v - eye_vector).norm() / self.neighbourhood).exp() } else { 1. }
    }).collect();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));

    let mut sum = Vector2d::zeros();
    let mut normalization = NORMALIZATION_EPSILON;
    for &i in order.iter().take(TOP_N) {
      sum += weights[i] * self.screen_points[i];
      normalization += weights[i];
    }
    Ok(sum / normalization)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::poly_mapper::tests::{grid, synthetic_observations};

  #[test]
  fn test_single_point() {
    let observations = synthetic_observations(&[Vector2d::new(1., 2.)], |_| Vector2d::new(300., 200.));
    let mut mapper = FuzzyMapper::new();
    mapper.train_from_data(&observations, true).unwrap();
    for query in [Vector2d::new(1., 2.), Vector2d::new(-40., 7.)] {
      let mapped = mapper.map_point(&query).unwrap();
      assert!(mapped.iter().all(|x| x.is_finite()));
      assert!((mapped - Vector2d::new(300., 200.)).norm() < 1e-6);
    }
  }

  #[test]
  fn test_interpolates_nearest_points() {
    let screen = |v: &Vector2d| Vector2d::new(683. + 100. * v[0], 384. + 60. * v[1]);
    let observations = synthetic_observations(&grid(3, 3, 2.), screen);
    let mut mapper = FuzzyMapper::new();
    mapper.train_from_data(&observations, false).unwrap();

    // Near a calibration point the output leans toward its screen point but
    // stays inside the hull of the three nearest ones.
    let mapped = mapper.map_point(&Vector2d::new(1.9, 1.9)).unwrap();
    let corner = screen(&Vector2d::new(2., 2.));
    let center = screen(&Vector2d::zeros());
    assert!((mapped - corner).norm() < (mapped - center).norm());
    assert!(mapped[0] <= corner[0] + 1e-9 && mapped[1] <= corner[1] + 1e-9);
    assert!(mapped[0] >= screen(&Vector2d::new(0., 0.))[0]);

    // Only the top three contribute, so the far corner has no pull.
    let mapped = mapper.map_point(&Vector2d::new(-2., -2.)).unwrap();
    assert!(mapped[0] < 683. && mapped[1] < 384.);
  }

  #[test]
  fn test_failures() {
    let mapper = FuzzyMapper::new();
    assert!(mapper.map_point(&Vector2d::zeros()).is_err());
    let mut mapper = FuzzyMapper::new();
    assert!(mapper.train_from_data(&[], false).is_err());

    let mut observations = synthetic_observations(&grid(2, 2, 1.), |v| *v);
    observations[2].left_eyevectors.clear();
    let err = mapper.train_from_data(&observations, true).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<GazeError>(),
      Some(GazeError::CalibrationPointFailed { index: 2, .. })
    ));
    assert!(!mapper.is_trained());
    mapper.train_from_data(&observations, false).unwrap();
    assert!(mapper.is_trained());
  }
}
