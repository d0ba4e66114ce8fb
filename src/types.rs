use crate::all::*;

// Eigen-like aliases.
pub type Vector2d = nalgebra::Vector2::<f64>;
pub type Vector3d = nalgebra::Vector3::<f64>;

// Image-space region in whole pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rect {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Rect {
    Rect { x, y, width, height }
  }

  pub fn origin(&self) -> Vector2d {
    Vector2d::new(self.x as f64, self.y as f64)
  }
}

pub fn round_vector(v: &Vector2d) -> Vector2d {
  v.map(|x| x.round())
}
