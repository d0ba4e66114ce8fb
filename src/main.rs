mod all;
mod calibrator;
mod error;
mod face;
mod frame;
mod fuzzy_mapper;
mod input;
mod mapper;
mod math;
mod neural_mapper;
mod observation;
mod parameters;
mod poly_mapper;
mod regression;
mod tracker;
mod types;
mod util;

use all::*;

#[macro_use] extern crate lazy_static;
use clap::Parser;

#[derive(Parser)]
struct Args {
  // JSON lines of recorded eye-feature detections.
  #[clap(short)]
  input_path: String,
  #[clap(long, default_value = "info")]
  log_level: LevelFilter,
  #[clap(subcommand)]
  command: Command,
  #[clap(flatten)]
  parameters: ParameterSet,
}

#[derive(clap::Subcommand)]
enum Command {
  // Guided calibration, optionally followed by a test round.
  Calibrate {
    // Distance of the subject from the screen in centimeters. Enables the
    // test round.
    #[clap(long)]
    test_distance: Option<f64>,
  },
  // Test round against a previously saved calibration.
  Evaluate {
    #[clap(long)]
    distance: f64,
  },
  // Print the on-screen gaze for every frame.
  Track,
}

fn handle_error(err: &anyhow::Error) {
  for (i, e) in err.chain().enumerate() {
    println!("  {}: {}", i + 1, e);
  }
}

fn main() {
  if let Err(err) = run() {
    handle_error(&err);
  }
}

fn run() -> Result<()> {
  let args = Args::parse();
  *PARAMETER_SET.lock().unwrap() = args.parameters.clone();

  env_logger::Builder::new()
    .filter_level(args.log_level)
    .format(util::format_log)
    .init();

  let input_path = Path::new(&args.input_path);
  match args.command {
    Command::Calibrate { test_distance } => calibrate(input_path, test_distance),
    Command::Evaluate { distance } => evaluate(input_path, distance),
    Command::Track => track(input_path),
  }
}

fn open_pipeline(input_path: &Path) -> Result<FramePipeline<RecordedFrame, RecordedExtractor>> {
  let realtime = PARAMETER_SET.lock().unwrap().realtime;
  let input = Input::new(input_path, realtime)?;
  // Without pacing, every recorded frame is handed to the reader in turn.
  let source = FrameSource::start(input, !realtime)?;
  Ok(FramePipeline::new(source, RecordedExtractor))
}

fn guidance_targets() -> Vec<Vector2d> {
  let p = PARAMETER_SET.lock().unwrap().clone();
  calibration_targets(
    p.screen_width as f64,
    p.screen_height as f64,
    p.target_radius,
    p.target_padding,
    &mut rand::thread_rng(),
  )
}

fn capture_round(calibrator: &Calibrator, targets: &[Vector2d], round: &str) -> Result<()> {
  let p = PARAMETER_SET.lock().unwrap().clone();
  // Sample a little longer than the target is shown.
  let duration = Duration::from_secs_f64(p.capture_interval * 1.2);
  let wait_before = Duration::from_secs_f64(p.wait_before);
  for (i, target) in targets.iter().enumerate() {
    info!("{} target {}/{} at ({:.0}, {:.0}).", round, i + 1, targets.len(), target[0], target[1]);
    calibrator.capture_point(duration, wait_before, *target)?;
  }
  calibrator.wait_idle()
}

fn calibrate(input_path: &Path, test_distance: Option<f64>) -> Result<()> {
  let kind = PARAMETER_SET.lock().unwrap().mapper;
  let pipeline = open_pipeline(input_path)?;
  let mut calibrator = Calibrator::new(Box::new(pipeline), CalibratorConfig::from_parameters())?;
  let targets = guidance_targets();
  capture_round(&calibrator, &targets, "Calibration")?;

  // The dataset is worth keeping even if some point failed.
  if let Err(err) = calibrator.compute_mapping_parameters(kind) {
    warn!("Could not train {} mappers, saving the observations only.", kind);
    handle_error(&err);
  }
  calibrator.save_mapping_parameters()?;

  if let Some(distance) = test_distance {
    capture_round(&calibrator, &targets, "Test")?;
    let report = calibrator.evaluate_calibration(distance, kind)?;
    println!("{}", report);
  }
  Ok(())
}

fn evaluate(input_path: &Path, distance: f64) -> Result<()> {
  let kind = PARAMETER_SET.lock().unwrap().mapper;
  let pipeline = open_pipeline(input_path)?;
  let mut calibrator = Calibrator::new(Box::new(pipeline), CalibratorConfig::from_parameters())?;
  capture_round(&calibrator, &guidance_targets(), "Test")?;
  let report = calibrator.evaluate_calibration(distance, kind)?;
  println!("{}", report);
  Ok(())
}

fn load_mappers() -> Result<MapperPair> {
  let config = CalibratorConfig::from_parameters();
  let kind = PARAMETER_SET.lock().unwrap().mapper;
  let path = mapper_parameters_path(&config.storage_path, kind);
  match load_mapper_parameters(&path, kind) {
    Ok(mappers) => {
      info!("Loaded {} mappers from {}.", kind, path.display());
      Ok(mappers)
    },
    Err(err) => {
      if let Some(GazeError::MapperMismatch { .. }) = err.downcast_ref::<GazeError>() {
        return Err(err);
      }
      info!("No usable {} mapper parameters ({}), training from the dataset.", kind, err);
      let observations = load_observations(&config.dataset_path())?;
      train_pair(kind, &config.neural, &observations)
    },
  }
}

fn track(input_path: &Path) -> Result<()> {
  let (right, left) = load_mappers()?;
  let mut tracker = Tracker::new(right, left, TrackerConfig::from_parameters())?;
  let mut pipeline = open_pipeline(input_path)?;
  let mut last_number = None;
  let mut frames = 0;
  let mut failures = 0;
  loop {
    // Checked before reading so that the last frame is not missed.
    let finished = pipeline.is_finished();
    let detection = match pipeline.process_new_frame(&mut last_number) {
      Some(detection) => detection,
      None if finished => break,
      None => {
        std::thread::sleep(Duration::from_millis(1));
        continue;
      },
    };
    frames += 1;
    let face = match detection.face {
      Some(face) => face,
      None => {
        failures += 1;
        continue;
      },
    };
    tracker.update(face);
    if let Some(gaze) = tracker.get_onscreen_gaze_mapping()? {
      println!("{} {:.1} {:.1} {:.1} {:.1} {:.1} {:.1}", frames,
        gaze.right[0], gaze.right[1], gaze.left[0], gaze.left[1], gaze.centroid[0], gaze.centroid[1]);
    }
  }
  info!("Tracked {} frames, no face in {}.", frames, failures);
  Ok(())
}
