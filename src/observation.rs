use crate::all::*;

use std::collections::BTreeMap;

const DATASET_VERSION: u32 = 1;

// Raw samples gathered while the subject looked at one calibration target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub screen_point: Vector2d,
  pub left_eyevectors: Vec<Vector2d>,
  pub right_eyevectors: Vec<Vector2d>,
}

impl Observation {
  pub fn eye_vectors(&self, is_left: bool) -> &[Vector2d] {
    if is_left { &self.left_eyevectors } else { &self.right_eyevectors }
  }

  pub fn mean_eye_vector(&self, is_left: bool) -> Option<Vector2d> {
    mean_vector(self.eye_vectors(is_left))
  }

  // Like `mean_eye_vector()` but an empty sample list is a calibration point
  // failure. `index` is only used for reporting.
  pub fn require_mean_eye_vector(&self, index: usize, is_left: bool) -> Result<Vector2d> {
    self.mean_eye_vector(is_left).ok_or_else(|| GazeError::CalibrationPointFailed {
      index,
      screen_point: self.screen_point,
      eye: eye_name(is_left),
    }.into())
  }

  pub fn is_complete(&self) -> bool {
    !self.left_eyevectors.is_empty() && !self.right_eyevectors.is_empty()
  }
}

// Keeps the samples whose x and y both lie within `m` standard deviations
// of the per-axis mean.
pub fn remove_outliers(samples: &[Vector2d], m: f64) -> Vec<Vector2d> {
  let xs: Vec<f64> = samples.iter().map(|v| v[0]).collect();
  let ys: Vec<f64> = samples.iter().map(|v| v[1]).collect();
  let (mean_x, std_x) = match (mean(&xs), standard_deviation(&xs)) {
    (Some(mean), Some(std)) => (mean, std),
    _ => return vec![],
  };
  let (mean_y, std_y) = match (mean(&ys), standard_deviation(&ys)) {
    (Some(mean), Some(std)) => (mean, std),
    _ => return vec![],
  };
  samples.iter()
    .filter(|v| (v[0] - mean_x).abs() <= m * std_x && (v[1] - mean_y).abs() <= m * std_y)
    .copied()
    .collect()
}

#[derive(Clone, Debug)]
pub struct CaptureConfig {
  pub outlier_m: f64,
  // Pause between processed frames. The frame source refreshes on its own
  // thread, so this only bounds how often the latest frame is sampled.
  pub sample_interval: Duration,
}

impl CaptureConfig {
  pub fn from_parameters() -> CaptureConfig {
    let p = PARAMETER_SET.lock().unwrap();
    CaptureConfig {
      outlier_m: p.outlier_m,
      sample_interval: Duration::from_millis(p.sample_interval_ms),
    }
  }
}

// Diagnostics of one capture window.
#[derive(Clone, Debug)]
pub struct CaptureStats {
  pub screen_point: Vector2d,
  pub started: Instant,
  pub finished: Instant,
  pub frames: usize,
  // Frames where both eyes were found.
  pub detections: usize,
  pub rejected_left: usize,
  pub rejected_right: usize,
  // Count per detection method label.
  pub methods: BTreeMap<String, usize>,
}

impl CaptureStats {
  pub fn detection_failures(&self) -> usize {
    self.frames - self.detections
  }

  pub fn detection_failure_rate(&self) -> f64 {
    if self.frames == 0 { return 1. }
    self.detection_failures() as f64 / self.frames as f64
  }
}

pub fn capture_observation(
  processor: &mut dyn FrameProcessor,
  duration: Duration,
  screen_point: Vector2d,
  config: &CaptureConfig,
) -> (Observation, CaptureStats) {
  let mut left = vec![];
  let mut right = vec![];
  let mut stats = CaptureStats {
    screen_point,
    started: Instant::now(),
    finished: Instant::now(),
    frames: 0,
    detections: 0,
    rejected_left: 0,
    rejected_right: 0,
    methods: BTreeMap::new(),
  };
  while stats.started.elapsed() < duration {
    let detection = processor.process_frame();
    stats.frames += 1;
    *stats.methods.entry(detection.method).or_insert(0) += 1;
    if let Some(face) = detection.face {
      if let (Some(right_eye), Some(left_eye)) = (&face.right_eye, &face.left_eye) {
        right.push(right_eye.eye_vector());
        left.push(left_eye.eye_vector());
        stats.detections += 1;
      }
    }
    if !config.sample_interval.is_zero() {
      std::thread::sleep(config.sample_interval);
    }
  }
  stats.finished = Instant::now();

  let left_eyevectors = remove_outliers(&left, config.outlier_m);
  let right_eyevectors = remove_outliers(&right, config.outlier_m);
  stats.rejected_left = left.len() - left_eyevectors.len();
  stats.rejected_right = right.len() - right_eyevectors.len();
  let observation = Observation {
    screen_point,
    left_eyevectors,
    right_eyevectors,
  };
  (observation, stats)
}

#[derive(Serialize, Deserialize)]
struct CalibrationDataset {
  version: u32,
  observations: Vec<Observation>,
}

pub fn save_observations(path: &Path, observations: &[Observation]) -> Result<()> {
  let dataset = CalibrationDataset {
    version: DATASET_VERSION,
    observations: observations.to_vec(),
  };
  let file = File::create(path)
    .with_context(|| format!("Failed to create calibration dataset {}.", path.display()))?;
  bincode::serialize_into(BufWriter::new(file), &dataset)
    .with_context(|| format!("Failed to write calibration dataset {}.", path.display()))?;
  Ok(())
}

pub fn load_observations(path: &Path) -> Result<Vec<Observation>> {
  let persistence_error = |reason: String| GazeError::Persistence {
    path: path.to_path_buf(),
    reason,
  };
  let file = File::open(path).map_err(|err| persistence_error(err.to_string()))?;
  let dataset: CalibrationDataset = bincode::deserialize_from(BufReader::new(file))
    .map_err(|err| persistence_error(format!("corrupt dataset ({})", err)))?;
  if dataset.version != DATASET_VERSION {
    return Err(persistence_error(format!("unsupported dataset version {}", dataset.version)).into());
  }
  if dataset.observations.is_empty() {
    return Err(persistence_error("dataset contains no observations".to_string()).into());
  }
  Ok(dataset.observations)
}
