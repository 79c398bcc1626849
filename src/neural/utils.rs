// projeto: lstmforecast
// file: src/neural/utils.rs
// Error handling, activations, Adam optimizer and weight initialisation

use ndarray::{Array, Array1, Array2, ArrayD, Dimension, ShapeError, Zip};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty or degenerate series: {0}")]
    EmptyOrDegenerateSeries(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Model not ready: {0}")]
    UntrainedModelUse(String),

    #[error("Model artifact '{path}' could not be loaded: {reason}")]
    ArtifactNotFound { path: String, reason: String },

    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ShapeError> for ForecastError {
    fn from(err: ShapeError) -> Self {
        ForecastError::ShapeMismatch {
            expected: "compatible array layout".to_string(),
            actual: err.to_string(),
        }
    }
}

impl ForecastError {
    pub fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ForecastError::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Adam with one pair of moment buffers per named parameter.
///
/// `begin_step` advances the shared timestep once per mini-batch; every
/// parameter updated during that batch uses the same bias correction.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn set_learning_rate(&mut self, new_lr: f64) {
        self.learning_rate = new_lr;
    }

    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Applies one Adam update to `param` in place.
    pub fn update<D: Dimension>(
        &mut self,
        param_name: &str,
        param: &mut Array<f64, D>,
        gradient: &Array<f64, D>,
    ) {
        let (beta1, beta2, epsilon, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let step = self.t.max(1) as i32;
        let bias1 = 1.0 - beta1.powi(step);
        let bias2 = 1.0 - beta2.powi(step);

        let g = gradient.view().into_dyn();
        let m = self.m.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(g.raw_dim()));
        let v = self.v.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(g.raw_dim()));

        Zip::from(&mut *m).and(&g).for_each(|m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        Zip::from(&mut *v).and(&g).for_each(|v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let mut p = param.view_mut().into_dyn();
        Zip::from(&mut p).and(&*m).and(&*v).for_each(|p, &m, &v| {
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
        });
    }

    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

pub fn sigmoid(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(sigmoid_scalar)
}

pub fn tanh(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(f64::tanh)
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    if x > 500.0 { 1.0 } else if x < -500.0 { 0.0 } else { 1.0 / (1.0 + (-x).exp()) }
}

/// Outer product `a ⊗ b` as a `(a.len(), b.len())` matrix.
pub fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(ndarray::Axis(1));
    let row = b.view().insert_axis(ndarray::Axis(0));
    col.dot(&row)
}

/// Glorot (Xavier) uniform init for a `(fan_out, fan_in)` matrix.
pub fn glorot_uniform<R: Rng>(fan_out: usize, fan_in: usize, rng: &mut R) -> Result<Array2<f64>, ForecastError> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let dist = Uniform::new(-limit, limit)
        .map_err(|e| ForecastError::InvalidParameter(format!("Invalid init range: {}", e)))?;
    Ok(Array2::from_shape_fn((fan_out, fan_in), |_| dist.sample(rng)))
}

pub fn validate_values(values: &[f64], name: &str) -> Result<(), ForecastError> {
    if values.is_empty() {
        return Err(ForecastError::EmptyOrDegenerateSeries(format!("{} is empty", name)));
    }

    for (i, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(ForecastError::InvalidParameter(
                format!("{} contains a non-finite value at position {}", name, i)
            ));
        }
    }

    Ok(())
}

pub fn ensure_positive(value: usize, name: &str) -> Result<(), ForecastError> {
    if value == 0 {
        return Err(ForecastError::InvalidParameter(format!("{} must be a positive integer", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array2};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut optimizer = AdamOptimizer::new(0.1, 0.9, 0.999, 1e-7);
        let mut param = arr1(&[1.0, -1.0, 0.5]);
        let gradient = arr1(&[0.5, -0.5, 0.0]);

        optimizer.begin_step();
        optimizer.update("w", &mut param, &gradient);

        // First Adam step moves each weight by ~lr in the sign of -grad
        assert!((param[0] - 0.9).abs() < 1e-6);
        assert!((param[1] + 0.9).abs() < 1e-6);
        assert_eq!(param[2], 0.5);
        assert_eq!(optimizer.t, 1);
    }

    #[test]
    fn test_adam_reset() {
        let mut optimizer = AdamOptimizer::new(0.001, 0.9, 0.999, 1e-7);
        let mut param = Array2::<f64>::ones((2, 2));
        let gradient = Array2::<f64>::ones((2, 2));
        optimizer.begin_step();
        optimizer.update("w", &mut param, &gradient);
        optimizer.set_learning_rate(0.01);
        assert_eq!(optimizer.learning_rate, 0.01);

        optimizer.reset();
        assert_eq!(optimizer.t, 0);
        assert!(optimizer.m.is_empty());
    }

    #[test]
    fn test_activation_functions() {
        let x = arr1(&[-1.0, 0.0, 1.0]);
        let sig = sigmoid(&x);
        assert!(sig[0] < 0.5);
        assert!((sig[1] - 0.5).abs() < 1e-12);
        assert!(sig[2] > 0.5);

        let th = tanh(&x);
        assert!(th[0] < 0.0);
        assert!(th[1].abs() < 1e-12);
        assert!(th[2] > 0.0);
    }

    #[test]
    fn test_outer_product() {
        let m = outer(&arr1(&[1.0, 2.0]), &arr1(&[3.0, 4.0, 5.0]));
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[1, 2]], 10.0);
    }

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = glorot_uniform(4, 8, &mut rng).unwrap();
        let limit = (6.0f64 / 12.0).sqrt();
        assert_eq!(w.dim(), (4, 8));
        assert!(w.iter().all(|&x| x.abs() <= limit));
    }

    #[test]
    fn test_value_validation() {
        assert!(validate_values(&[1.0, 2.0], "test").is_ok());
        assert!(matches!(
            validate_values(&[], "test"),
            Err(ForecastError::EmptyOrDegenerateSeries(_))
        ));
        assert!(matches!(
            validate_values(&[1.0, f64::NAN], "test"),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!(ensure_positive(0, "epochs").is_err());
    }
}
