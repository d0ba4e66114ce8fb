use crate::all::*;

// One line of a recorded session: the output of an upstream eye-feature
// extractor for a single camera frame.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecordedFrame {
  pub time: f64,
  #[serde(default)]
  pub method: String,
  #[serde(default)]
  pub face: Option<Face>,
}

// Reads JSON lines of `RecordedFrame`s, optionally pacing them by their
// timestamps to imitate a live camera.
pub struct Input {
  reader: BufReader<File>,
  line: String,
  realtime: bool,
  started: Option<(Instant, f64)>,
  last_time: Option<f64>,
}

impl Input {
  pub fn new(path: &Path, realtime: bool) -> Result<Input> {
    let file = File::open(path)
      .with_context(|| format!("Failed to open input file {}.", path.display()))?;
    Ok(Input {
      reader: BufReader::new(file),
      line: String::new(),
      realtime,
      started: None,
      last_time: None,
    })
  }

  // Not using `impl Iterator` to allow returning `Result`.
  // End of data is signaled by `Result::Ok(Option::None)`.
  pub fn next(&mut self) -> Result<Option<RecordedFrame>> {
    loop {
      self.line.clear();
      match self.reader.read_line(&mut self.line) {
        Ok(0) => return Ok(None),
        Err(err) => bail!("Failed to read line. {}", err),
        _ => {},
      }
      if self.line.trim().is_empty() { continue }
      let frame: RecordedFrame = serde_json::from_str(&self.line)
        .context(format!("Input::next JSON deserialization failed for line: {}", self.line))?;
      if let Some(last_time) = self.last_time {
        if frame.time <= last_time {
          warn!("Ignoring unordered/duplicated frame at time {}.", frame.time);
          continue;
        }
      }
      self.last_time = Some(frame.time);
      return Ok(Some(frame));
    }
  }

  fn wait_until(&mut self, time: f64) {
    let (start_instant, start_time) = *self.started.get_or_insert((Instant::now(), time));
    let due = Duration::from_secs_f64((time - start_time).max(0.));
    let elapsed = start_instant.elapsed();
    if due > elapsed {
      std::thread::sleep(due - elapsed);
    }
  }
}

impl FrameGrabber for Input {
  type Frame = RecordedFrame;

  fn grab(&mut self) -> Result<Option<RecordedFrame>> {
    let frame = self.next()?;
    if let (true, Some(frame)) = (self.realtime, &frame) {
      self.wait_until(frame.time);
    }
    Ok(frame)
  }
}

// Recorded frames already hold the extractor output.
pub struct RecordedExtractor;

impl EyeFeatureExtractor<RecordedFrame> for RecordedExtractor {
  fn extract(&mut self, frame: &RecordedFrame) -> Detection {
    let method = if frame.method.is_empty() { "recorded" } else { frame.method.as_str() };
    match &frame.face {
      Some(face) => Detection::found(face.clone(), method),
      None => Detection::not_found(method),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::face::tests::eye_with_vector;
  use std::io::Write;

  #[test]
  fn test_read_recording() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let lines = [
      r#"{"time": 0.0, "method": "gave up", "face": null}"#,
      "",
      r#"{"time": 0.033, "method": "equalized", "face": {"right_eye": {"is_right": true,
        "area": {"x": 10, "y": 20, "width": 30, "height": 20}, "pupil_relative": [15.0, 10.0],
        "inner_corner_relative": [2.0, 11.0], "outer_corner_relative": [28.0, 10.0]}}}"#,
      r#"{"time": 0.02, "face": null}"#,
    ];
    for line in lines {
      writeln!(file, "{}", line.replace('\n', " ")).unwrap();
    }
    file.flush().unwrap();

    let mut input = Input::new(file.path(), false).unwrap();
    let mut extractor = RecordedExtractor;
    let first = input.next().unwrap().unwrap();
    let detection = extractor.extract(&first);
    assert!(detection.face.is_none());
    assert_eq!(detection.method, "gave up");

    let second = input.next().unwrap().unwrap();
    let face = extractor.extract(&second).face.unwrap();
    assert_eq!(face.right_eye.unwrap().eye_vector(), Vector2d::new(-13., 1.));
    assert!(face.left_eye.is_none());
    assert!(face.landmarks.is_empty());

    // The out-of-order line is skipped.
    assert!(input.next().unwrap().is_none());
  }

  #[test]
  fn test_bad_line_is_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "not json").unwrap();
    file.flush().unwrap();
    let mut input = Input::new(file.path(), false).unwrap();
    assert!(input.grab().is_err());
  }

  #[test]
  fn test_unpaced_replay_spreads_over_captures() {
    // The eye-vector x coordinate grows with the frame index.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..3000 {
      let eye = |is_right| Some(eye_with_vector(is_right, Vector2d::zeros(), Vector2d::new(i as f64, 1.)));
      let frame = RecordedFrame {
        time: i as f64 / 30.,
        method: "recorded".to_string(),
        face: Some(Face::with_eyes(eye(true), eye(false))),
      };
      writeln!(file, "{}", serde_json::to_string(&frame).unwrap()).unwrap();
    }
    file.flush().unwrap();

    let input = Input::new(file.path(), false).unwrap();
    let source = FrameSource::start(input, true).unwrap();
    let mut pipeline = FramePipeline::new(source, RecordedExtractor);
    let config = CaptureConfig { outlier_m: 1e9, sample_interval: Duration::from_millis(1) };
    let targets = [Vector2d::new(100., 100.), Vector2d::new(500., 100.), Vector2d::new(900., 100.)];
    let mut means = vec![];
    for target in targets {
      let (observation, stats) = capture_observation(&mut pipeline, Duration::from_millis(30), target, &config);
      assert!(stats.detections > 0);
      means.push(observation.mean_eye_vector(false).unwrap()[0]);
    }
    // Each target sees its own stretch of the recording, not the last frame.
    assert!(means[0] < means[1] && means[1] < means[2], "{:?}", means);
    assert!(means[2] < 2999.);
    assert!(!pipeline.is_finished());
  }
}
