use crate::all::*;

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(clap::ValueEnum)]
pub enum MapperKind {
  PolyQuad,
  PolyLin,
  Neural,
  Fuzzy,
}

impl MapperKind {
  pub fn name(&self) -> &'static str {
    match self {
      MapperKind::PolyQuad => "poly-quad",
      MapperKind::PolyLin => "poly-lin",
      MapperKind::Neural => "neural",
      MapperKind::Fuzzy => "fuzzy",
    }
  }
}

impl fmt::Display for MapperKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

// The closed set of mapping strategies. Each instance serves one eye.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Mapper {
  Polynomial(PolynomialMapper),
  Neural(NeuralMapper),
  Fuzzy(FuzzyMapper),
}

impl Mapper {
  pub fn new(kind: MapperKind) -> Mapper {
    Mapper::with_neural_config(kind, NeuralConfig::from_parameters())
  }

  pub fn with_neural_config(kind: MapperKind, neural_config: NeuralConfig) -> Mapper {
    match kind {
      MapperKind::PolyQuad => Mapper::Polynomial(PolynomialMapper::new(PolynomialForm::Quadratic)),
      MapperKind::PolyLin => Mapper::Polynomial(PolynomialMapper::new(PolynomialForm::Linear)),
      MapperKind::Neural => Mapper::Neural(NeuralMapper::new(neural_config)),
      MapperKind::Fuzzy => Mapper::Fuzzy(FuzzyMapper::new()),
    }
  }

  pub fn kind(&self) -> MapperKind {
    match self {
      Mapper::Polynomial(m) => match m.form {
        PolynomialForm::Quadratic => MapperKind::PolyQuad,
        PolynomialForm::Linear => MapperKind::PolyLin,
      },
      Mapper::Neural(_) => MapperKind::Neural,
      Mapper::Fuzzy(_) => MapperKind::Fuzzy,
    }
  }

  // Optional global preparation over all observations, before the per-eye
  // training calls.
  pub fn before_training(&mut self, observations: &[Observation]) -> Result<()> {
    match self {
      Mapper::Neural(m) => m.before_training(observations),
      Mapper::Polynomial(_) | Mapper::Fuzzy(_) => Ok(()),
    }
  }

  pub fn train_from_data(&mut self, observations: &[Observation], is_left: bool) -> Result<()> {
    match self {
      Mapper::Polynomial(m) => m.train_from_data(observations, is_left),
      Mapper::Neural(m) => m.train_from_data(observations, is_left),
      Mapper::Fuzzy(m) => m.train_from_data(observations, is_left),
    }
  }

  pub fn is_trained(&self) -> bool {
    match self {
      Mapper::Polynomial(m) => m.is_trained(),
      Mapper::Neural(m) => m.is_trained(),
      Mapper::Fuzzy(m) => m.is_trained(),
    }
  }

  pub fn map_point(&self, eye_vector: &Vector2d) -> Result<Vector2d> {
    match self {
      Mapper::Polynomial(m) => m.map_point(eye_vector),
      Mapper::Neural(m) => m.map_point(eye_vector),
      Mapper::Fuzzy(m) => m.map_point(eye_vector),
    }
  }
}

// Right and left eye mappers, in that order.
pub type MapperPair = (Mapper, Mapper);

// Trains one mapper per eye. All failing calibration points are logged
// before the first failure is returned.
pub fn train_pair(kind: MapperKind, neural_config: &NeuralConfig, observations: &[Observation]) -> Result<MapperPair> {
  if observations.is_empty() {
    return Err(GazeError::NotEnoughPoints { needed: 1, found: 0 }.into());
  }
  let mut first_failure = None;
  for (index, observation) in observations.iter().enumerate() {
    for is_left in [false, true] {
      if let Err(err) = observation.require_mean_eye_vector(index, is_left) {
        warn!("{}", err);
        first_failure.get_or_insert(err);
      }
    }
  }
  if let Some(err) = first_failure {
    return Err(err);
  }

  let mut right = Mapper::with_neural_config(kind, neural_config.clone());
  let mut left = Mapper::with_neural_config(kind, neural_config.clone());
  right.before_training(observations)?;
  left.before_training(observations)?;
  right.train_from_data(observations, false)
    .with_context(|| format!("Training the right eye {} mapper failed.", kind))?;
  left.train_from_data(observations, true)
    .with_context(|| format!("Training the left eye {} mapper failed.", kind))?;
  info!("Trained {} mappers on {} calibration points.", kind, observations.len());
  Ok((right, left))
}

// `calibration.dat` + `bag` -> `calibration.dat.bag`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut s = path.as_os_str().to_os_string();
  s.push(".");
  s.push(suffix);
  PathBuf::from(s)
}

pub fn mapper_parameters_path(storage_path: &Path, kind: MapperKind) -> PathBuf {
  with_suffix(storage_path, kind.name())
}

pub fn save_mapper_parameters(path: &Path, mappers: &MapperPair) -> Result<()> {
  let file = File::create(path)
    .with_context(|| format!("Failed to create mapper parameters {}.", path.display()))?;
  bincode::serialize_into(BufWriter::new(file), mappers)
    .with_context(|| format!("Failed to write mapper parameters {}.", path.display()))?;
  Ok(())
}

pub fn load_mapper_parameters(path: &Path, kind: MapperKind) -> Result<MapperPair> {
  let persistence_error = |reason: String| GazeError::Persistence {
    path: path.to_path_buf(),
    reason,
  };
  let file = File::open(path).map_err(|err| persistence_error(err.to_string()))?;
  let (right, left): MapperPair = bincode::deserialize_from(BufReader::new(file))
    .map_err(|err| persistence_error(format!("corrupt mapper parameters ({})", err)))?;
  for found in [right.kind(), left.kind()] {
    if found != kind {
      return Err(GazeError::MapperMismatch { expected: kind, found }.into());
    }
  }
  if !right.is_trained() || !left.is_trained() {
    return Err(persistence_error("mapper parameters are untrained".to_string()).into());
  }
  Ok((right, left))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::poly_mapper::tests::{grid, synthetic_observations};

  fn observations() -> Vec<Observation> {
    synthetic_observations(&grid(3, 3, 4.), |v| Vector2d::new(100. + 50. * v[0], 200. + 30. * v[1]))
  }

  fn quick_neural() -> NeuralConfig {
    NeuralConfig { epochs: 50, ..NeuralConfig::default() }
  }

  #[test]
  fn test_kinds() {
    for kind in [MapperKind::PolyQuad, MapperKind::PolyLin, MapperKind::Neural, MapperKind::Fuzzy] {
      let mapper = Mapper::with_neural_config(kind, quick_neural());
      assert_eq!(mapper.kind(), kind);
      assert!(!mapper.is_trained());
      let err = mapper.map_point(&Vector2d::zeros()).unwrap_err();
      assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::MapperNotTrained)));
    }
    assert_eq!(MapperKind::PolyQuad.to_string(), "poly-quad");
  }

  #[test]
  fn test_train_pair() {
    let observations = observations();
    for kind in [MapperKind::PolyQuad, MapperKind::PolyLin, MapperKind::Neural, MapperKind::Fuzzy] {
      let (right, left) = train_pair(kind, &quick_neural(), &observations).unwrap();
      assert!(right.is_trained() && left.is_trained());
    }
    let (right, _) = train_pair(MapperKind::PolyLin, &quick_neural(), &observations).unwrap();
    let mapped = right.map_point(&Vector2d::new(1., 1.)).unwrap();
    assert!((mapped - Vector2d::new(150., 230.)).norm() < 1e-3);

    let mut broken = observations.clone();
    broken[1].left_eyevectors.clear();
    broken[5].right_eyevectors.clear();
    let err = train_pair(MapperKind::Fuzzy, &quick_neural(), &broken).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<GazeError>(),
      Some(GazeError::CalibrationPointFailed { index: 1, .. })
    ));
    assert!(train_pair(MapperKind::Fuzzy, &quick_neural(), &[]).is_err());
  }

  #[test]
  fn test_parameters_file() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("calibration.dat");
    let path = mapper_parameters_path(&storage, MapperKind::Fuzzy);
    assert_eq!(path, dir.path().join("calibration.dat.fuzzy"));

    let pair = train_pair(MapperKind::Fuzzy, &quick_neural(), &observations()).unwrap();
    save_mapper_parameters(&path, &pair).unwrap();
    let (right, _) = load_mapper_parameters(&path, MapperKind::Fuzzy).unwrap();
    let q = Vector2d::new(0.5, -1.);
    assert_eq!(right.map_point(&q).unwrap(), pair.0.map_point(&q).unwrap());

    let err = load_mapper_parameters(&path, MapperKind::PolyQuad).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<GazeError>(),
      Some(GazeError::MapperMismatch { expected: MapperKind::PolyQuad, found: MapperKind::Fuzzy })
    ));
    let err = load_mapper_parameters(&dir.path().join("nothing"), MapperKind::Fuzzy).unwrap_err();
    assert!(matches!(err.downcast_ref::<GazeError>(), Some(GazeError::Persistence { .. })));
  }
}
