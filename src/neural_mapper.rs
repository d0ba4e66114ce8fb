// Small feed-forward regressor from eye-vector to screen point: two ReLU
// hidden layers and a linear output, trained with full-batch Adam on mean
// squared error.

use crate::all::*;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
const CONVERGED_LOSS: f64 = 1e-10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeuralConfig {
  pub hidden_sizes: [usize; 2],
  pub epochs: usize,
  pub learning_rate: f64,
  pub seed: u64,
}

impl NeuralConfig {
  pub fn from_parameters() -> NeuralConfig {
    let p = PARAMETER_SET.lock().unwrap();
    NeuralConfig {
      hidden_sizes: [p.neural_hidden1, p.neural_hidden2],
      epochs: p.neural_epochs,
      learning_rate: p.neural_learning_rate,
      seed: p.neural_seed,
    }
  }
}

impl Default for NeuralConfig {
  fn default() -> NeuralConfig {
    NeuralConfig {
      hidden_sizes: [8, 4],
      epochs: 2000,
      learning_rate: 0.01,
      seed: 0,
    }
  }
}

// Per-dimension standardization to zero mean and unit variance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScaler {
  mean: Vector2d,
  scale: Vector2d,
}

impl StandardScaler {
  pub fn fit(samples: &[Vector2d]) -> Option<StandardScaler> {
    let xs: Vec<f64> = samples.iter().map(|v| v[0]).collect();
    let ys: Vec<f64> = samples.iter().map(|v| v[1]).collect();
    // Constant dimensions are only centered.
    let scale = |std: f64| if std > 0. { std } else { 1. };
    Some(StandardScaler {
      mean: Vector2d::new(mean(&xs)?, mean(&ys)?),
      scale: Vector2d::new(scale(standard_deviation(&xs)?), scale(standard_deviation(&ys)?)),
    })
  }

  pub fn transform(&self, v: &Vector2d) -> Vector2d {
    (v - self.mean).component_div(&self.scale)
  }

  pub fn inverse_transform(&self, v: &Vector2d) -> Vector2d {
    v.component_mul(&self.scale) + self.mean
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Layer {
  // Input size by output size.
  weights: DMatrix<f64>,
  bias: DVector<f64>,
}

impl Layer {
  fn zeros_like(other: &Layer) -> Layer {
    Layer {
      weights: DMatrix::zeros(other.weights.nrows(), other.weights.ncols()),
      bias: DVector::zeros(other.bias.len()),
    }
  }

  // He-uniform initialization.
  fn random(inputs: usize, outputs: usize, rng: &mut Xoshiro256PlusPlus) -> Layer {
    let limit = (6. / inputs as f64).sqrt();
    Layer {
      weights: DMatrix::from_fn(inputs, outputs, |_, _| rng.gen_range(-limit..limit)),
      bias: DVector::from_element(outputs, 0.01),
    }
  }

  // Rows of `x` are samples.
  fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut z = x * &self.weights;
    for mut row in z.row_iter_mut() {
      for (value, b) in row.iter_mut().zip(self.bias.iter()) {
        *value += b;
      }
    }
    z
  }
}

fn relu(z: &DMatrix<f64>) -> DMatrix<f64> {
  z.map(|v| v.max(0.))
}

fn relu_mask(z: &DMatrix<f64>) -> DMatrix<f64> {
  z.map(|v| if v > 0. { 1. } else { 0. })
}

fn column_sums(m: &DMatrix<f64>) -> DVector<f64> {
  DVector::from_iterator(m.ncols(), m.column_iter().map(|c| c.sum()))
}

struct Adam {
  first: Vec<Layer>,
  second: Vec<Layer>,
  step: i32,
}

impl Adam {
  fn new(layers: &[Layer]) -> Adam {
    Adam {
      first: layers.iter().map(Layer::zeros_like).collect(),
      second: layers.iter().map(Layer::zeros_like).collect(),
      step: 0,
    }
  }

  fn update(&mut self, layers: &mut [Layer], gradients: &[Layer], learning_rate: f64) {
    self.step += 1;
    let c1 = 1. - ADAM_BETA1.powi(self.step);
    let c2 = 1. - ADAM_BETA2.powi(self.step);
    let apply = |p: &mut f64, g: f64, m: &mut f64, v: &mut f64| {
      *m = ADAM_BETA1 * *m + (1. - ADAM_BETA1) * g;
      *v = ADAM_BETA2 * *v + (1. - ADAM_BETA2) * g * g;
      *p -= learning_rate * (*m / c1) / ((*v / c2).sqrt() + ADAM_EPSILON);
    };
    for i in 0..layers.len() {
      let (layer, gradient) = (&mut layers[i], &gradients[i]);
      let (first, second) = (&mut self.first[i], &mut self.second[i]);
      for (((p, g), m), v) in layer.weights.iter_mut()
        .zip(gradient.weights.iter())
        .zip(first.weights.iter_mut())
        .zip(second.weights.iter_mut())
      {
        apply(p, *g, m, v);
      }
      for (((p, g), m), v) in layer.bias.iter_mut()
        .zip(gradient.bias.iter())
        .zip(first.bias.iter_mut())
        .zip(second.bias.iter_mut())
      {
        apply(p, *g, m, v);
      }
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeuralMapper {
  config: NeuralConfig,
  input_scaler: Option<StandardScaler>,
  output_scaler: Option<StandardScaler>,
  layers: Vec<Layer>,
}

impl NeuralMapper {
  pub fn new(config: NeuralConfig) -> NeuralMapper {
    NeuralMapper {
      config,
      input_scaler: None,
      output_scaler: None,
      layers: vec![],
    }
  }

  // Fits the scalers once over the samples of both eyes, so that the left and
  // right models see inputs in the same units.
  pub fn before_training(&mut self, observations: &[Observation]) -> Result<()> {
    debug!("Preparing data scalers.");
    let mut inputs = vec![];
    let mut outputs = vec![];
    for observation in observations {
      for v in observation.right_eyevectors.iter().chain(&observation.left_eyevectors) {
        inputs.push(*v);
        outputs.push(observation.screen_point);
      }
    }
    let not_enough = || GazeError::NotEnoughPoints { needed: 1, found: 0 };
    self.input_scaler = Some(StandardScaler::fit(&inputs).ok_or_else(not_enough)?);
    self.output_scaler = Some(StandardScaler::fit(&outputs).ok_or_else(not_enough)?);
    Ok(())
  }

  // Every retained sample is a separate training example.
  pub fn train_from_data(&mut self, observations: &[Observation], is_left: bool) -> Result<()> {
    if self.input_scaler.is_none() || self.output_scaler.is_none() {
      debug!("Scalers not prepared, fitting them on the training data.");
      self.before_training(observations)?;
    }
    let (input_scaler, output_scaler) = match (&self.input_scaler, &self.output_scaler) {
      (Some(i), Some(o)) => (i, o),
      _ => bail!("Neural mapper scalers are missing."),
    };

    let mut inputs = vec![];
    let mut outputs = vec![];
    for (index, observation) in observations.iter().enumerate() {
      let domain = observation.eye_vectors(is_left);
      if domain.is_empty() {
        return Err(GazeError::CalibrationPointFailed {
          index,
          screen_point: observation.screen_point,
          eye: eye_name(is_left),
        }.into());
      }
      debug!("Training {} neural model with {} samples, target ({:.1}, {:.1}).",
        eye_name(is_left), domain.len(), observation.screen_point[0], observation.screen_point[1]);
      for v in domain {
        inputs.push(input_scaler.transform(v));
        outputs.push(output_scaler.transform(&observation.screen_point));
      }
    }
    if inputs.is_empty() {
      return Err(GazeError::NotEnoughPoints { needed: 1, found: 0 }.into());
    }
    let x = DMatrix::from_fn(inputs.len(), 2, |i, j| inputs[i][j]);
    let y = DMatrix::from_fn(outputs.len(), 2, |i, j| outputs[i][j]);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
    let [h1, h2] = self.config.hidden_sizes;
    let mut layers = vec![
      Layer::random(2, h1, &mut rng),
      Layer::random(h1, h2, &mut rng),
      Layer::random(h2, 2, &mut rng),
    ];
    let mut adam = Adam::new(&layers);
    let mut loss = f64::INFINITY;
    for _ in 0..self.config.epochs {
      let (epoch_loss, gradients) = loss_and_gradients(&layers, &x, &y);
      loss = epoch_loss;
      if !loss.is_finite() {
        return Err(GazeError::FitFailed { reason: "neural training diverged".to_string() }.into());
      }
      if loss < CONVERGED_LOSS { break }
      adam.update(&mut layers, &gradients, self.config.learning_rate);
    }
    debug!("Trained {} neural model on {} samples, final loss {:e}.", eye_name(is_left), inputs.len(), loss);
    self.layers = layers;
    Ok(())
  }

  pub fn is_trained(&self) -> bool {
    !self.layers.is_empty() && self.input_scaler.is_some() && self.output_scaler.is_some()
  }

  pub fn map_point(&self, eye_vector: &Vector2d) -> Result<Vector2d> {
    let (input_scaler, output_scaler) = match (&self.input_scaler, &self.output_scaler) {
      (Some(i), Some(o)) if !self.layers.is_empty() => (i, o),
      _ => return Err(GazeError::MapperNotTrained.into()),
    };
    let v = input_scaler.transform(eye_vector);
    let x = DMatrix::from_row_slice(1, 2, &[v[0], v[1]]);
    let y = predict(&self.layers, &x);
    Ok(output_scaler.inverse_transform(&Vector2d::new(y[(0, 0)], y[(0, 1)])))
  }
}

fn predict(layers: &[Layer], x: &DMatrix<f64>) -> DMatrix<f64> {
  let mut a = x.clone();
  for (i, layer) in layers.iter().enumerate() {
    let z = layer.forward(&a);
    a = if i + 1 < layers.len() { relu(&z) } else { z };
  }
  a
}

// Half mean squared error over the batch and its gradients.
fn loss_and_gradients(layers: &[Layer], x: &DMatrix<f64>, y: &DMatrix<f64>) -> (f64, Vec<Layer>) {
  let n = x.nrows() as f64;
  let mut activations = vec![x.clone()];
  let mut pre_activations = vec![];
  for (i, layer) in layers.iter().enumerate() {
    let z = layer.forward(&activations[i]);
    let a = if i + 1 < layers.len() { relu(&z) } else { z.clone() };
    pre_activations.push(z);
    activations.push(a);
  }
  let error = &activations[layers.len()] - y;
  let loss = 0.5 * error.norm_squared() / n;

  let mut gradients: Vec<Layer> = layers.iter().map(Layer::zeros_like).collect();
  let mut delta = error / n;
  for i in (0..layers.len()).rev() {
    gradients[i].weights = activations[i].transpose() * &delta;
    gradients[i].bias = column_sums(&delta);
    if i > 0 {
      delta = (&delta * layers[i].weights.transpose()).component_mul(&relu_mask(&pre_activations[i - 1]));
    }
  }
  (loss, gradients)
}
