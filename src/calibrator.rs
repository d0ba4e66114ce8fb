use crate::all::*;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::MutexGuard;
use std::thread::{self, JoinHandle};

use rand::seq::SliceRandom;

#[derive(Clone, Debug)]
pub struct CalibratorConfig {
  pub capture: CaptureConfig,
  pub neural: NeuralConfig,
  // Observations go to `<storage_path>.bag`, trained mappers to
  // `<storage_path>.<mapper kind>`.
  pub storage_path: PathBuf,
  pub screen_width: f64,
  pub screen_height: f64,
  pub pixels_per_cm: f64,
}

impl CalibratorConfig {
  pub fn from_parameters() -> CalibratorConfig {
    let capture = CaptureConfig::from_parameters();
    let neural = NeuralConfig::from_parameters();
    let p = PARAMETER_SET.lock().unwrap();
    CalibratorConfig {
      capture,
      neural,
      storage_path: PathBuf::from(&p.storage_path),
      screen_width: p.screen_width as f64,
      screen_height: p.screen_height as f64,
      pixels_per_cm: p.pixels_per_cm,
    }
  }

  pub fn dataset_path(&self) -> PathBuf {
    with_suffix(&self.storage_path, "bag")
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibratorState {
  Idle,
  // Index of the point being captured.
  Capturing(usize),
  Trained,
}

// Everything a capture worker touches. Guarded by one lock for the whole
// capture body.
struct Session {
  processor: Box<dyn FrameProcessor>,
  observations: Vec<Observation>,
  stats: Vec<CaptureStats>,
}

enum WorkerCmd {
  Capture {
    duration: Duration,
    wait_before: Duration,
    screen_point: Vector2d,
  },
  // Answered once every earlier command has finished.
  Flush(mpsc::Sender<()>),
  Shutdown,
}

pub struct Calibrator {
  config: CalibratorConfig,
  session: Arc<Mutex<Session>>,
  state: Arc<Mutex<CalibratorState>>,
  commands: Mutex<mpsc::Sender<WorkerCmd>>,
  shutdown: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
  mappers: Option<MapperPair>,
  // Number of observations already written by `save_mapping_parameters()`.
  saved_count: usize,
}

impl Calibrator {
  pub fn new(processor: Box<dyn FrameProcessor>, config: CalibratorConfig) -> Result<Calibrator> {
    let session = Arc::new(Mutex::new(Session {
      processor,
      observations: vec![],
      stats: vec![],
    }));
    let state = Arc::new(Mutex::new(CalibratorState::Idle));
    let shutdown = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::channel();
    let worker = {
      let session = Arc::clone(&session);
      let state = Arc::clone(&state);
      let shutdown = Arc::clone(&shutdown);
      let capture_config = config.capture.clone();
      thread::Builder::new()
        .name("capture-worker".to_string())
        .spawn(move || capture_worker(receiver, session, state, shutdown, capture_config))
        .context("Failed to spawn calibration capture worker.")?
    };
    info!("Calibrator ready, storing data at {}.", config.storage_path.display());
    Ok(Calibrator {
      config,
      session,
      state,
      commands: Mutex::new(sender),
      shutdown,
      worker: Some(worker),
      mappers: None,
      saved_count: 0,
    })
  }

  // Schedules a capture and returns immediately. Captures run one at a time
  // in the order they were requested.
  pub fn capture_point(&self, duration: Duration, wait_before: Duration, screen_point: Vector2d) -> Result<()> {
    self.send(WorkerCmd::Capture { duration, wait_before, screen_point })
  }

  // Blocks until all captures requested so far have finished.
  pub fn wait_idle(&self) -> Result<()> {
    let (sender, receiver) = mpsc::channel();
    self.send(WorkerCmd::Flush(sender))?;
    receiver.recv().map_err(|_| anyhow!("Calibration capture worker stopped."))
  }

  pub fn state(&self) -> CalibratorState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  // Blocks while a capture is in progress.
  pub fn observations(&self) -> Result<Vec<Observation>> {
    Ok(self.lock_session()?.observations.clone())
  }

  pub fn capture_stats(&self) -> Result<Vec<CaptureStats>> {
    Ok(self.lock_session()?.stats.clone())
  }

  pub fn mappers(&self) -> Option<&MapperPair> {
    self.mappers.as_ref()
  }

  // Trains a right and a left eye mapper from everything captured so far.
  pub fn compute_mapping_parameters(&mut self, kind: MapperKind) -> Result<MapperPair> {
    self.wait_idle()?;
    let observations = self.observations()?;
    let mappers = train_pair(kind, &self.config.neural, &observations)?;
    self.mappers = Some(mappers.clone());
    self.set_state(CalibratorState::Trained);
    Ok(mappers)
  }

  // Writes the observation dataset, and the trained mappers if there are any.
  pub fn save_mapping_parameters(&mut self) -> Result<()> {
    self.wait_idle()?;
    let observations = self.observations()?;
    let path = self.config.dataset_path();
    save_observations(&path, &observations)?;
    self.saved_count = observations.len();
    debug!("Observation data (over)written to file {}.", path.display());
    if let Some(mappers) = &self.mappers {
      let path = mapper_parameters_path(&self.config.storage_path, mappers.0.kind());
      save_mapper_parameters(&path, mappers)?;
      debug!("Mapper parameters written to file {}.", path.display());
    }
    Ok(())
  }

  // Trains fresh mappers from the persisted dataset and measures them on the
  // points captured after the last save, or on the persisted points when
  // there are none.
  pub fn evaluate_calibration(&mut self, distance_cm: f64, kind: MapperKind) -> Result<EvaluationReport> {
    self.wait_idle()?;
    let persisted = load_observations(&self.config.dataset_path())?;
    let (right, left) = train_pair(kind, &self.config.neural, &persisted)
      .context("Training mappers from the persisted calibration failed.")?;

    let (targets, stats) = {
      let session = self.lock_session()?;
      let start = self.saved_count.min(session.observations.len());
      let selected = if session.observations.len() > start {
        let stats_start = start.min(session.stats.len());
        (session.observations[start..].to_vec(), session.stats[stats_start..].to_vec())
      }
      else {
        info!("No test round captured, evaluating on the calibration points.");
        (persisted.clone(), session.stats.clone())
      };
      selected
    };

    let mut errors = vec![];
    let mut failed_points = 0;
    for (index, target) in targets.iter().enumerate() {
      let eye_vectors = (target.mean_eye_vector(false), target.mean_eye_vector(true));
      let (right_vector, left_vector) = match eye_vectors {
        (Some(r), Some(l)) => (r, l),
        _ => {
          warn!("Test point #{} at ({:.0}, {:.0}) has no usable samples.",
            index, target.screen_point[0], target.screen_point[1]);
          failed_points += 1;
          continue;
        },
      };
      let estimate = (right.map_point(&right_vector)? + left.map_point(&left_vector)?) / 2.;
      let error = (estimate - target.screen_point).norm();
      debug!("Test point #{} at ({:.0}, {:.0}): estimate ({:.1}, {:.1}), error {:.1} px.",
        index, target.screen_point[0], target.screen_point[1], estimate[0], estimate[1], error);
      errors.push(error);
    }
    let mean_pixel_error = mean(&errors).ok_or(GazeError::NotEnoughPoints {
      needed: 1,
      found: 0,
    })?;

    let distance_pixels = distance_cm * self.config.pixels_per_cm;
    let diagonal = self.config.screen_width.hypot(self.config.screen_height);
    let total = targets.len() as f64;
    let tiers = ACCURACY_TIERS.iter().map(|&(name, fraction)| {
      let within = errors.iter().filter(|e| **e <= fraction * diagonal).count();
      AccuracyTier { name, fraction_of_diagonal: fraction, share: within as f64 / total }
    }).collect();
    let frames: usize = stats.iter().map(|s| s.frames).sum();
    let failures: usize = stats.iter().map(|s| s.detection_failures()).sum();

    let report = EvaluationReport {
      mapper: kind,
      points: targets.len(),
      failed_points,
      mean_pixel_error,
      angular_error_degrees: (mean_pixel_error / distance_pixels).atan().to_degrees(),
      tiers,
      detection_failure_rate: if frames > 0 { failures as f64 / frames as f64 } else { 0. },
    };
    info!("{}", report);
    Ok(report)
  }

  fn send(&self, cmd: WorkerCmd) -> Result<()> {
    let commands = self.commands.lock().map_err(|_| anyhow!("Calibrator command lock poisoned."))?;
    commands.send(cmd).map_err(|_| anyhow!("Calibration capture worker stopped."))
  }

  fn lock_session(&self) -> Result<MutexGuard<Session>> {
    self.session.lock().map_err(|_| anyhow!("A calibration capture worker panicked."))
  }

  fn set_state(&self, new_state: CalibratorState) {
    if let Ok(mut state) = self.state.lock() {
      *state = new_state;
    }
  }
}

impl Drop for Calibrator {
  // Queued captures are abandoned, an in-flight one is allowed to finish.
  fn drop(&mut self) {
    self.shutdown.store(true, Ordering::Relaxed);
    let _ = self.send(WorkerCmd::Shutdown);
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        warn!("Calibration capture worker panicked.");
      }
    }
  }
}

fn capture_worker(
  receiver: mpsc::Receiver<WorkerCmd>,
  session: Arc<Mutex<Session>>,
  state: Arc<Mutex<CalibratorState>>,
  shutdown: Arc<AtomicBool>,
  config: CaptureConfig,
) {
  for cmd in receiver {
    match cmd {
      WorkerCmd::Capture { duration, wait_before, screen_point } => {
        if shutdown.load(Ordering::Relaxed) { continue }
        let mut session = match session.lock() {
          Ok(session) => session,
          Err(_) => {
            error!("Calibration session lock poisoned, stopping capture worker.");
            break;
          },
        };
        let index = session.observations.len();
        // Trained mappers stay valid while test points are captured.
        let mut resting = CalibratorState::Idle;
        if let Ok(mut state) = state.lock() {
          if *state == CalibratorState::Trained {
            resting = CalibratorState::Trained;
          }
          *state = CalibratorState::Capturing(index);
        }
        thread::sleep(wait_before);
        info!("Acquiring point #{} at ({:.0}, {:.0}).", index, screen_point[0], screen_point[1]);
        let (observation, stats) = capture_observation(
          session.processor.as_mut(), duration, screen_point, &config);
        debug!("Point #{}: {} frames, {} detections ({}), kept {} right and {} left samples, rejected {} and {}.",
          index, stats.frames, stats.detections, format_methods(&stats.methods),
          observation.right_eyevectors.len(), observation.left_eyevectors.len(),
          stats.rejected_right, stats.rejected_left);
        if !observation.is_complete() {
          warn!("Point #{} at ({:.0}, {:.0}) has no usable samples for at least one eye.",
            index, screen_point[0], screen_point[1]);
        }
        session.observations.push(observation);
        session.stats.push(stats);
        if let Ok(mut state) = state.lock() {
          *state = resting;
        }
        info!("Acquired point #{}.", index);
      },
      WorkerCmd::Flush(done) => {
        let _ = done.send(());
      },
      WorkerCmd::Shutdown => break,
    }
  }
  debug!("Capture worker stopped.");
}

fn format_methods(methods: &std::collections::BTreeMap<String, usize>) -> String {
  methods.iter().map(|(method, count)| format!("{}: {}", method, count)).collect::<Vec<_>>().join(", ")
}

// Named share of points within a fraction of the screen diagonal.
const ACCURACY_TIERS: [(&str, f64); 3] = [
  ("excellent", 0.05),
  ("good", 0.10),
  ("fair", 0.25),
];

#[derive(Clone, Debug)]
pub struct AccuracyTier {
  pub name: &'static str,
  pub fraction_of_diagonal: f64,
  // Fraction of all evaluated points, failed ones included.
  pub share: f64,
}

#[derive(Clone, Debug)]
pub struct EvaluationReport {
  pub mapper: MapperKind,
  pub points: usize,
  pub failed_points: usize,
  pub mean_pixel_error: f64,
  pub angular_error_degrees: f64,
  pub tiers: Vec<AccuracyTier>,
  pub detection_failure_rate: f64,
}

impl fmt::Display for EvaluationReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{} mapper on {} points ({} failed): mean error {:.1} px, {:.2} degrees",
      self.mapper, self.points, self.failed_points, self.mean_pixel_error, self.angular_error_degrees)?;
    for tier in &self.tiers {
      write!(f, ", {} {:.0}%", tier.name, 100. * tier.share)?;
    }
    write!(f, ", detection failures {:.0}%.", 100. * self.detection_failure_rate)
  }
}

// The 3x3 grid of guidance targets, inset from the screen edges, in a
// random visiting order.
pub fn calibration_targets<R: rand::Rng>(
  width: f64,
  height: f64,
  radius: f64,
  padding: f64,
  rng: &mut R,
) -> Vec<Vector2d> {
  let inset = radius + padding;
  let mut targets = vec![];
  for y in [height - inset, height / 2., inset] {
    for x in [inset, width / 2., width - inset] {
      targets.push(Vector2d::new(x, y));
    }
  }
  targets.shuffle(rng);
  targets
}
