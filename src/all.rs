// NOTE This kind of import-all file isn't a common Rust idiom.

pub use crate::{
  calibrator::*,
  error::*,
  face::*,
  frame::*,
  fuzzy_mapper::*,
  input::*,
  mapper::*,
  math::*,
  neural_mapper::*,
  observation::*,
  parameters::*,
  poly_mapper::*,
  regression::*,
  tracker::*,
  types::*,
  util::*,
};

pub use {
  std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
  },
  log::{debug, error, info, warn, LevelFilter},
  nalgebra::{DMatrix, DVector},
  serde::{Deserialize, Serialize},
  anyhow::{anyhow, bail, Context as AnyhowContext, Result},
};
