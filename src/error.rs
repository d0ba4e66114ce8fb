use crate::all::*;

// Failure kinds that callers need to tell apart. They travel inside
// `anyhow::Error` and can be recovered with `downcast_ref::<GazeError>()`.
#[derive(Debug, thiserror::Error)]
pub enum GazeError {
  #[error("Calibration point #{index} at {screen_point:?} has no usable {eye} eye samples.")]
  CalibrationPointFailed {
    index: usize,
    screen_point: Vector2d,
    eye: &'static str,
  },
  #[error("Fitting failed: {reason}")]
  FitFailed { reason: String },
  #[error("Mapper has not been trained.")]
  MapperNotTrained,
  #[error("Mapper parameters were produced by {found}, expected {expected}.")]
  MapperMismatch { expected: MapperKind, found: MapperKind },
  #[error("Not enough calibration points: needed {needed}, found {found}.")]
  NotEnoughPoints { needed: usize, found: usize },
  #[error("Failed to use {}: {reason}", .path.display())]
  Persistence { path: PathBuf, reason: String },
}

pub fn eye_name(is_left: bool) -> &'static str {
  if is_left { "left" } else { "right" }
}
