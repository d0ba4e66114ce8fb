use crate::all::*;

use clap::Parser;

lazy_static! {
  pub static ref PARAMETER_SET: Mutex<ParameterSet> = Mutex::new(ParameterSet::default());
}

#[derive(Clone, Debug)]
#[derive(clap::Parser)]
pub struct ParameterSet {
  // Capture.
  #[clap(long, default_value = "1.0")]
  pub outlier_m: f64,
  #[clap(long, default_value = "10")]
  pub sample_interval_ms: u64,

  // Calibration session.
  #[clap(long, default_value = "calibration.dat")]
  pub storage_path: String,
  #[clap(long, value_enum, default_value = "poly-quad")]
  pub mapper: MapperKind,
  #[clap(long, default_value = "1366")]
  pub screen_width: u32,
  #[clap(long, default_value = "768")]
  pub screen_height: u32,
  #[clap(long, default_value = "30")]
  pub target_radius: f64,
  #[clap(long, default_value = "20")]
  pub target_padding: f64,
  // Seconds the subject looks at each target.
  #[clap(long, default_value = "5")]
  pub capture_interval: f64,
  // Seconds between showing a target and sampling it.
  #[clap(long, default_value = "1")]
  pub wait_before: f64,
  #[clap(long, default_value = "37.8")]
  pub pixels_per_cm: f64,

  // Tracker.
  #[clap(long, default_value = "5")]
  pub smoothing_window: usize,
  #[clap(long, value_enum, default_value = "constant")]
  pub smoothing_weights: RecencyWeighting,
  #[clap(long, default_value = "10")]
  pub centroid_window: usize,

  // Neural mapper.
  #[clap(long, default_value = "8")]
  pub neural_hidden1: usize,
  #[clap(long, default_value = "4")]
  pub neural_hidden2: usize,
  #[clap(long, default_value = "2000")]
  pub neural_epochs: usize,
  #[clap(long, default_value = "0.01")]
  pub neural_learning_rate: f64,
  #[clap(long, default_value = "0")]
  pub neural_seed: u64,

  // Replay recorded input at its original pace. Otherwise frames are
  // replayed one per read, as fast as the calibrator or tracker samples them.
  #[clap(long)]
  pub realtime: bool,
}

impl Default for ParameterSet {
  fn default() -> ParameterSet {
    ParameterSet::parse_from(["eyemap"])
  }
}
