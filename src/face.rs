use crate::all::*;

// One detected eye. The pupil and corner points are relative to `area`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Eye {
  pub is_right: bool,
  pub area: Rect,
  pub pupil_relative: Vector2d,
  pub inner_corner_relative: Vector2d,
  pub outer_corner_relative: Vector2d,
}

impl Eye {
  pub fn new(area: Rect, is_right: bool) -> Eye {
    Eye {
      is_right,
      area,
      pupil_relative: Vector2d::zeros(),
      inner_corner_relative: Vector2d::zeros(),
      outer_corner_relative: Vector2d::zeros(),
    }
  }

  // The calibration signal. Independent of where `area` sits in the image.
  pub fn eye_vector(&self) -> Vector2d {
    self.inner_corner_relative - self.pupil_relative
  }

  pub fn pupil(&self) -> Vector2d {
    self.area.origin() + self.pupil_relative
  }

  pub fn inner_corner(&self) -> Vector2d {
    self.area.origin() + self.inner_corner_relative
  }

  pub fn outer_corner(&self) -> Vector2d {
    self.area.origin() + self.outer_corner_relative
  }

  pub fn relative_area_center(&self) -> Vector2d {
    Vector2d::new(self.area.width as f64 / 2., self.area.height as f64 / 2.)
  }

  pub fn absolute_area_center(&self) -> Vector2d {
    self.area.origin() + self.relative_area_center()
  }

  // On screen the right eye's inner corner is its leftmost one, and the
  // left eye's inner corner is its rightmost one.
  pub fn set_leftmost_corner(&mut self, point: Vector2d) {
    if self.is_right {
      self.inner_corner_relative = point;
    }
    else {
      self.outer_corner_relative = point;
    }
  }

  pub fn set_rightmost_corner(&mut self, point: Vector2d) {
    if self.is_right {
      self.outer_corner_relative = point;
    }
    else {
      self.inner_corner_relative = point;
    }
  }
}

// Observation of a single processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Face {
  // 68-point landmark layout when a landmark detector was used, else empty.
  pub landmarks: Vec<Vector2d>,
  pub right_eye: Option<Eye>,
  pub left_eye: Option<Eye>,
  pub orientation: Vector3d,
  pub translation: Vector3d,
  pub head_pose: Vector2d,
}

impl Face {
  // Identity element of `add_faces`.
  pub fn zero() -> Face {
    Face {
      landmarks: vec![],
      right_eye: None,
      left_eye: None,
      orientation: Vector3d::zeros(),
      translation: Vector3d::zeros(),
      head_pose: Vector2d::zeros(),
    }
  }

  pub fn with_eyes(right_eye: Option<Eye>, left_eye: Option<Eye>) -> Face {
    Face {
      right_eye,
      left_eye,
      ..Face::zero()
    }
  }

  pub fn has_both_eyes(&self) -> bool {
    self.right_eye.is_some() && self.left_eye.is_some()
  }
}

impl Default for Face {
  fn default() -> Face {
    Face::zero()
  }
}

// The functions below are statistical aggregation used by the tracker's
// smoothing. They carry no physical meaning beyond interpolating positions.
// Rounding happens only in the divisions.

pub fn add_eyes(a: &Eye, b: &Eye) -> Eye {
  Eye {
    is_right: a.is_right,
    area: Rect::new(
      a.area.x + b.area.x,
      a.area.y + b.area.y,
      a.area.width + b.area.width,
      a.area.height + b.area.height,
    ),
    pupil_relative: a.pupil_relative + b.pupil_relative,
    inner_corner_relative: a.inner_corner_relative + b.inner_corner_relative,
    outer_corner_relative: a.outer_corner_relative + b.outer_corner_relative,
  }
}

pub fn scale_eye(eye: &Eye, k: u32) -> Eye {
  let ki = k as i32;
  let kf = k as f64;
  Eye {
    is_right: eye.is_right,
    area: Rect::new(eye.area.x * ki, eye.area.y * ki, eye.area.width * ki, eye.area.height * ki),
    pupil_relative: eye.pupil_relative * kf,
    inner_corner_relative: eye.inner_corner_relative * kf,
    outer_corner_relative: eye.outer_corner_relative * kf,
  }
}

// Divides and rounds every coordinate to whole pixels.
pub fn divide_eye(eye: &Eye, d: u32) -> Eye {
  let d = d.max(1) as f64;
  let div = |v: i32| (v as f64 / d).round() as i32;
  Eye {
    is_right: eye.is_right,
    area: Rect::new(div(eye.area.x), div(eye.area.y), div(eye.area.width), div(eye.area.height)),
    pupil_relative: round_vector(&(eye.pupil_relative / d)),
    inner_corner_relative: round_vector(&(eye.inner_corner_relative / d)),
    outer_corner_relative: round_vector(&(eye.outer_corner_relative / d)),
  }
}

fn add_optional_eyes(a: &Option<Eye>, b: &Option<Eye>) -> Option<Eye> {
  match (a, b) {
    (Some(a), Some(b)) => Some(add_eyes(a, b)),
    (Some(x), None) | (None, Some(x)) => Some(x.clone()),
    (None, None) => None,
  }
}

// A missing eye or empty landmark list acts as zero. When both landmark lists
// are present but differ in length, the first one is kept.
pub fn add_faces(a: &Face, b: &Face) -> Face {
  let landmarks = if a.landmarks.is_empty() {
    b.landmarks.clone()
  }
  else if b.landmarks.is_empty() || a.landmarks.len() != b.landmarks.len() {
    a.landmarks.clone()
  }
  else {
    a.landmarks.iter().zip(&b.landmarks).map(|(p, q)| p + q).collect()
  };
  Face {
    landmarks,
    right_eye: add_optional_eyes(&a.right_eye, &b.right_eye),
    left_eye: add_optional_eyes(&a.left_eye, &b.left_eye),
    orientation: a.orientation + b.orientation,
    translation: a.translation + b.translation,
    head_pose: a.head_pose + b.head_pose,
  }
}

pub fn scale_face(face: &Face, k: u32) -> Face {
  let kf = k as f64;
  Face {
    landmarks: face.landmarks.iter().map(|p| p * kf).collect(),
    right_eye: face.right_eye.as_ref().map(|e| scale_eye(e, k)),
    left_eye: face.left_eye.as_ref().map(|e| scale_eye(e, k)),
    orientation: face.orientation * kf,
    translation: face.translation * kf,
    head_pose: face.head_pose * kf,
  }
}

pub fn divide_face(face: &Face, d: u32) -> Face {
  let df = d.max(1) as f64;
  Face {
    landmarks: face.landmarks.iter().map(|p| round_vector(&(p / df))).collect(),
    right_eye: face.right_eye.as_ref().map(|e| divide_eye(e, d)),
    left_eye: face.left_eye.as_ref().map(|e| divide_eye(e, d)),
    orientation: face.orientation / df,
    translation: face.translation / df,
    head_pose: round_vector(&(face.head_pose / df)),
  }
}

// Weighted sum of one eye. Kept in floating point because the sum of
// weighted rectangles over a long window does not fit in `i32`.
struct EyeSum {
  is_right: bool,
  area: [f64; 4],
  pupil: Vector2d,
  inner_corner: Vector2d,
  outer_corner: Vector2d,
  weight: f64,
}

impl EyeSum {
  fn new(is_right: bool) -> EyeSum {
    EyeSum {
      is_right,
      area: [0.; 4],
      pupil: Vector2d::zeros(),
      inner_corner: Vector2d::zeros(),
      outer_corner: Vector2d::zeros(),
      weight: 0.,
    }
  }

  fn add(&mut self, eye: &Eye, w: f64) {
    let a = eye.area;
    for (sum, v) in self.area.iter_mut().zip([a.x, a.y, a.width, a.height]) {
      *sum += w * v as f64;
    }
    self.pupil += eye.pupil_relative * w;
    self.inner_corner += eye.inner_corner_relative * w;
    self.outer_corner += eye.outer_corner_relative * w;
    self.weight += w;
  }

  fn average(&self) -> Eye {
    let d = self.weight;
    let div = |v: f64| (v / d).round() as i32;
    Eye {
      is_right: self.is_right,
      area: Rect::new(div(self.area[0]), div(self.area[1]), div(self.area[2]), div(self.area[3])),
      pupil_relative: round_vector(&(self.pupil / d)),
      inner_corner_relative: round_vector(&(self.inner_corner / d)),
      outer_corner_relative: round_vector(&(self.outer_corner / d)),
    }
  }
}

fn add_optional_eye(sum: &mut Option<EyeSum>, eye: &Option<Eye>, w: f64) {
  if let Some(eye) = eye {
    sum.get_or_insert_with(|| EyeSum::new(eye.is_right)).add(eye, w);
  }
}

// Weighted average with image coordinates rounded, the 3d pose stays
// real-valued. Each eye is normalized by the weights of the faces where it
// was present, so a missing eye in one frame does not pull the average
// towards the origin. Landmark lists of a different length than the first
// one are ignored.
pub fn average_faces(faces: &[(&Face, u32)]) -> Option<Face> {
  let mut total = 0.;
  let mut landmarks: Vec<Vector2d> = vec![];
  let mut landmarks_total = 0.;
  let mut right_eye = None;
  let mut left_eye = None;
  let mut orientation = Vector3d::zeros();
  let mut translation = Vector3d::zeros();
  let mut head_pose = Vector2d::zeros();
  for (face, weight) in faces {
    if *weight == 0 { continue }
    let w = *weight as f64;
    if !face.landmarks.is_empty() {
      if landmarks.is_empty() {
        landmarks = vec![Vector2d::zeros(); face.landmarks.len()];
      }
      if landmarks.len() == face.landmarks.len() {
        for (sum, p) in landmarks.iter_mut().zip(&face.landmarks) {
          *sum += p * w;
        }
        landmarks_total += w;
      }
    }
    add_optional_eye(&mut right_eye, &face.right_eye, w);
    add_optional_eye(&mut left_eye, &face.left_eye, w);
    orientation += face.orientation * w;
    translation += face.translation * w;
    head_pose += face.head_pose * w;
    total += w;
  }
  if total == 0. { return None }
  Some(Face {
    landmarks: landmarks.iter().map(|p| round_vector(&(p / landmarks_total))).collect(),
    right_eye: right_eye.map(|sum| sum.average()),
    left_eye: left_eye.map(|sum| sum.average()),
    orientation: orientation / total,
    translation: translation / total,
    head_pose: round_vector(&(head_pose / total)),
  })
}
