use crate::all::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(clap::ValueEnum)]
pub enum RecencyWeighting {
  // Simple moving average.
  Constant,
  // Weight `index + 1`, the newest face weighs the most.
  Linear,
}

impl RecencyWeighting {
  // `index` counts from the oldest face in the history.
  pub fn weight(&self, index: usize) -> u32 {
    match self {
      RecencyWeighting::Constant => 1,
      RecencyWeighting::Linear => (index as u32).saturating_add(1),
    }
  }
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
  // Number of faces averaged. 1 disables smoothing.
  pub smoothing_window: usize,
  pub weighting: RecencyWeighting,
  // Number of mapped points the centroid is computed over.
  pub centroid_window: usize,
}

impl TrackerConfig {
  pub fn from_parameters() -> TrackerConfig {
    let p = PARAMETER_SET.lock().unwrap();
    TrackerConfig {
      smoothing_window: p.smoothing_window,
      weighting: p.smoothing_weights,
      centroid_window: p.centroid_window,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GazeMapping {
  pub right: Vector2d,
  pub left: Vector2d,
  pub centroid: Vector2d,
}

pub struct Tracker {
  config: TrackerConfig,
  right_mapper: Mapper,
  left_mapper: Mapper,
  history: VecDeque<Face>,
  centroid_history: VecDeque<Vector2d>,
}

impl Tracker {
  pub fn new(right_mapper: Mapper, left_mapper: Mapper, config: TrackerConfig) -> Result<Tracker> {
    if !right_mapper.is_trained() || !left_mapper.is_trained() {
      return Err(GazeError::MapperNotTrained.into());
    }
    let config = TrackerConfig {
      smoothing_window: config.smoothing_window.max(1),
      centroid_window: config.centroid_window.max(1),
      ..config
    };
    debug!("Tracker smoothing over {} faces ({:?}), centroid over {} points.",
      config.smoothing_window, config.weighting, config.centroid_window);
    Ok(Tracker {
      history: VecDeque::with_capacity(config.smoothing_window),
      centroid_history: VecDeque::with_capacity(config.centroid_window),
      config,
      right_mapper,
      left_mapper,
    })
  }

  pub fn update(&mut self, face: Face) {
    if self.history.len() == self.config.smoothing_window {
      self.history.pop_front();
    }
    self.history.push_back(face);
  }

  // The latest face, or the weighted average of the history with image
  // coordinates rounded to whole pixels.
  pub fn current_face(&self) -> Option<Face> {
    if self.config.smoothing_window == 1 {
      return self.history.back().cloned();
    }
    let weighted: Vec<(&Face, u32)> = self.history.iter().enumerate()
      .map(|(i, face)| (face, self.config.weighting.weight(i)))
      .collect();
    average_faces(&weighted)
  }

  pub fn has_eyes(&self) -> bool {
    self.current_face().map_or(false, |face| face.has_both_eyes())
  }

  // `None` when the current face lacks an eye. The centroid history is left
  // untouched in that case.
  pub fn get_onscreen_gaze_mapping(&mut self) -> Result<Option<GazeMapping>> {
    let face = match self.current_face() {
      Some(face) => face,
      None => return Ok(None),
    };
    let (right_eye, left_eye) = match (&face.right_eye, &face.left_eye) {
      (Some(r), Some(l)) => (r, l),
      _ => return Ok(None),
    };
    let right = self.right_mapper.map_point(&right_eye.eye_vector())?;
    let left = self.left_mapper.map_point(&left_eye.eye_vector())?;
    for point in [right, left] {
      if self.centroid_history.len() == self.config.centroid_window {
        self.centroid_history.pop_front();
      }
      self.centroid_history.push_back(point);
    }
    let sum = self.centroid_history.iter().fold(Vector2d::zeros(), |acc, p| acc + p);
    let centroid = sum / self.centroid_history.len() as f64;
    Ok(Some(GazeMapping { right, left, centroid }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::face::tests::eye_with_vector;
  use crate::poly_mapper::tests::{grid, synthetic_observations};

  // Maps eye-vectors to the screen with the identity.
  fn identity_mappers() -> (Mapper, Mapper) {
    let observations = synthetic_observations(&grid(3, 3, 10.), |v| *v);
    train_pair(MapperKind::PolyLin, &NeuralConfig::default(), &observations).unwrap()
  }

  fn config(smoothing_window: usize, weighting: RecencyWeighting, centroid_window: usize) -> TrackerConfig {
    TrackerConfig { smoothing_window, weighting, centroid_window }
  }

  fn face(right: Option<Vector2d>, left: Option<Vector2d>) -> Face {
    Face::with_eyes(
      right.map(|v| eye_with_vector(true, Vector2d::zeros(), v)),
      left.map(|v| eye_with_vector(false, Vector2d::zeros(), v)),
    )
  }

  fn both(x: f64, y: f64) -> Face {
    face(Some(Vector2d::new(x, y)), Some(Vector2d::new(x, y)))
  }

  fn close(a: Vector2d, b: Vector2d) -> bool {
    (a - b).norm() < 1e-4
  }

  #[test]
  fn test_untrained_mappers_rejected() {
    let (right, _) = identity_mappers();
    let untrained = Mapper::new(MapperKind::Fuzzy);
    let err = Tracker::new(right, untrained, config(1, RecencyWeighting::Constant, 4)).err().unwrap();
    assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::MapperNotTrained)));
  }

  #[test]
  fn test_moving_average() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(3, RecencyWeighting::Constant, 10)).unwrap();
    assert!(tracker.current_face().is_none());
    assert_eq!(tracker.get_onscreen_gaze_mapping().unwrap(), None);

    tracker.update(both(4., 4.));
    tracker.update(both(5., 5.));
    tracker.update(both(6., 6.));
    let eye = tracker.current_face().unwrap().right_eye.unwrap();
    assert_eq!(eye.eye_vector(), Vector2d::new(5., 5.));
    assert_eq!(eye.area, Rect::new(100, 50, 40, 30));

    // The oldest face falls out of the window, (5 + 6 + 8) / 3 rounds to 6.
    tracker.update(both(8., 8.));
    let eye = tracker.current_face().unwrap().left_eye.unwrap();
    assert_eq!(eye.inner_corner_relative, Vector2d::new(6., 6.));
  }

  #[test]
  fn test_linear_weighting() {
    assert_eq!(RecencyWeighting::Linear.weight(0), 1);
    assert_eq!(RecencyWeighting::Linear.weight(2), 3);
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(2, RecencyWeighting::Linear, 10)).unwrap();
    tracker.update(both(0., 0.));
    tracker.update(both(9., 3.));
    // (0 * 1 + 9 * 2) / 3 and (0 * 1 + 3 * 2) / 3.
    let face = tracker.current_face().unwrap();
    assert_eq!(face.right_eye.unwrap().eye_vector(), Vector2d::new(6., 2.));
  }

  #[test]
  fn test_pupils_are_averaged() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(2, RecencyWeighting::Constant, 10)).unwrap();
    for pupil in [Vector2d::new(0., 0.), Vector2d::new(10., 10.)] {
      tracker.update(Face::with_eyes(
        Some(eye_with_vector(true, pupil, Vector2d::zeros())),
        Some(eye_with_vector(false, pupil, Vector2d::zeros())),
      ));
    }
    let face = tracker.current_face().unwrap();
    assert_eq!(face.right_eye.unwrap().pupil_relative, Vector2d::new(5., 5.));
    assert_eq!(face.left_eye.unwrap().pupil_relative, Vector2d::new(5., 5.));
  }

  #[test]
  fn test_long_linear_window() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(2100, RecencyWeighting::Linear, 10)).unwrap();
    let mut face = both(3., 1.);
    face.right_eye.as_mut().unwrap().area = Rect::new(1000, 700, 50, 30);
    for _ in 0..2100 {
      tracker.update(face.clone());
    }
    let eye = tracker.current_face().unwrap().right_eye.unwrap();
    assert_eq!(eye.area, Rect::new(1000, 700, 50, 30));
    assert_eq!(eye.eye_vector(), Vector2d::new(3., 1.));
    assert!(tracker.get_onscreen_gaze_mapping().unwrap().is_some());
  }

  #[test]
  fn test_no_smoothing() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(1, RecencyWeighting::Constant, 10)).unwrap();
    tracker.update(both(1.4, 2.6));
    tracker.update(both(3.2, 4.7));
    // The literal latest face, not rounded.
    let face = tracker.current_face().unwrap();
    assert_eq!(face.right_eye.unwrap().eye_vector(), Vector2d::new(3.2, 4.7));
  }

  #[test]
  fn test_centroid() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(1, RecencyWeighting::Constant, 4)).unwrap();
    tracker.update(face(Some(Vector2d::new(2., 0.)), Some(Vector2d::new(4., 0.))));
    let mapping = tracker.get_onscreen_gaze_mapping().unwrap().unwrap();
    assert!(close(mapping.right, Vector2d::new(2., 0.)));
    assert!(close(mapping.left, Vector2d::new(4., 0.)));
    assert!(close(mapping.centroid, Vector2d::new(3., 0.)));

    tracker.update(both(10., 10.));
    let mapping = tracker.get_onscreen_gaze_mapping().unwrap().unwrap();
    assert!(close(mapping.centroid, Vector2d::new(6.5, 5.)));

    // The first two points are evicted.
    tracker.update(both(10., 10.));
    let mapping = tracker.get_onscreen_gaze_mapping().unwrap().unwrap();
    assert!(close(mapping.centroid, Vector2d::new(10., 10.)));
  }

  #[test]
  fn test_missing_eye_keeps_centroid() {
    let (right, left) = identity_mappers();
    let mut tracker = Tracker::new(right, left, config(1, RecencyWeighting::Constant, 4)).unwrap();
    tracker.update(both(2., 2.));
    tracker.get_onscreen_gaze_mapping().unwrap().unwrap();

    tracker.update(face(Some(Vector2d::new(8., 8.)), None));
    assert!(!tracker.has_eyes());
    assert_eq!(tracker.get_onscreen_gaze_mapping().unwrap(), None);

    tracker.update(both(4., 4.));
    assert!(tracker.has_eyes());
    let mapping = tracker.get_onscreen_gaze_mapping().unwrap().unwrap();
    assert!(close(mapping.centroid, Vector2d::new(3., 3.)));
  }
}
