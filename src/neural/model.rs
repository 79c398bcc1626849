// projeto: lstmforecast
// file: src/neural/model.rs
// Stacked LSTM regressor: forward pass, BPTT, Adam training and forecasting

use chrono::{Days, NaiveDate, Utc};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, Array3, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use crate::neural::data::MinMaxScaler;
use crate::neural::storage::{self, ModelArtifact};
use crate::neural::utils::{
    ensure_positive, glorot_uniform, outer, sigmoid, tanh, AdamOptimizer, ForecastError,
};

const GATE_MATRICES: [&str; 8] = ["w_ii", "w_if", "w_ig", "w_io", "w_hi", "w_hf", "w_hg", "w_ho"];
const GATE_BIASES: [&str; 4] = ["b_i", "b_f", "b_g", "b_o"];

/// Weights of one LSTM layer, one matrix per gate. Input matrices are
/// `(units, input_size)`, recurrent ones `(units, units)`.
///
/// The same struct carries gradients during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub w_ii: Array2<f64>,  // Input gate input weights
    pub w_if: Array2<f64>,  // Forget gate input weights
    pub w_ig: Array2<f64>,  // Cell gate input weights
    pub w_io: Array2<f64>,  // Output gate input weights
    pub w_hi: Array2<f64>,  // Input gate hidden weights
    pub w_hf: Array2<f64>,  // Forget gate hidden weights
    pub w_hg: Array2<f64>,  // Cell gate hidden weights
    pub w_ho: Array2<f64>,  // Output gate hidden weights
    pub b_i: Array1<f64>,   // Input gate bias
    pub b_f: Array1<f64>,   // Forget gate bias
    pub b_g: Array1<f64>,   // Cell gate bias
    pub b_o: Array1<f64>,   // Output gate bias
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayerWeights {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub lstm_layers: Vec<LstmLayerWeights>,
    pub dense_layers: Vec<DenseLayerWeights>,
}

/// Per-timestep values kept for backpropagation through time.
#[derive(Debug, Clone)]
struct LstmStepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
}

#[derive(Debug, Clone)]
struct ForwardCache {
    lstm: Vec<Vec<LstmStepCache>>,
    dense_inputs: Vec<Array1<f64>>,
}

impl LstmLayerWeights {
    /// Glorot-uniform kernels sized over all four gates, zero biases, forget bias 1.
    fn init(input_size: usize, units: usize, rng: &mut StdRng) -> Result<Self, ForecastError> {
        let kernel = glorot_uniform(4 * units, input_size, rng)?;
        let recurrent = glorot_uniform(4 * units, units, rng)?;
        let gate = |m: &Array2<f64>, k: usize| m.slice(s![k * units..(k + 1) * units, ..]).to_owned();

        Ok(LstmLayerWeights {
            w_ii: gate(&kernel, 0),
            w_if: gate(&kernel, 1),
            w_ig: gate(&kernel, 2),
            w_io: gate(&kernel, 3),
            w_hi: gate(&recurrent, 0),
            w_hf: gate(&recurrent, 1),
            w_hg: gate(&recurrent, 2),
            w_ho: gate(&recurrent, 3),
            b_i: Array1::zeros(units),
            b_f: Array1::ones(units),
            b_g: Array1::zeros(units),
            b_o: Array1::zeros(units),
        })
    }

    fn zeros_like(&self) -> Self {
        LstmLayerWeights {
            w_ii: Array2::zeros(self.w_ii.raw_dim()),
            w_if: Array2::zeros(self.w_if.raw_dim()),
            w_ig: Array2::zeros(self.w_ig.raw_dim()),
            w_io: Array2::zeros(self.w_io.raw_dim()),
            w_hi: Array2::zeros(self.w_hi.raw_dim()),
            w_hf: Array2::zeros(self.w_hf.raw_dim()),
            w_hg: Array2::zeros(self.w_hg.raw_dim()),
            w_ho: Array2::zeros(self.w_ho.raw_dim()),
            b_i: Array1::zeros(self.b_i.raw_dim()),
            b_f: Array1::zeros(self.b_f.raw_dim()),
            b_g: Array1::zeros(self.b_g.raw_dim()),
            b_o: Array1::zeros(self.b_o.raw_dim()),
        }
    }

    pub fn units(&self) -> usize {
        self.b_i.len()
    }

    pub fn input_size(&self) -> usize {
        self.w_ii.ncols()
    }

    fn matrices(&self) -> [&Array2<f64>; 8] {
        [&self.w_ii, &self.w_if, &self.w_ig, &self.w_io, &self.w_hi, &self.w_hf, &self.w_hg, &self.w_ho]
    }

    fn matrices_mut(&mut self) -> [&mut Array2<f64>; 8] {
        [
            &mut self.w_ii, &mut self.w_if, &mut self.w_ig, &mut self.w_io,
            &mut self.w_hi, &mut self.w_hf, &mut self.w_hg, &mut self.w_ho,
        ]
    }

    fn biases(&self) -> [&Array1<f64>; 4] {
        [&self.b_i, &self.b_f, &self.b_g, &self.b_o]
    }

    fn biases_mut(&mut self) -> [&mut Array1<f64>; 4] {
        [&mut self.b_i, &mut self.b_f, &mut self.b_g, &mut self.b_o]
    }

    /// Gate activations `(i, f, g, o)` for one timestep.
    fn gates(&self, x: &Array1<f64>, h: &Array1<f64>) -> (Array1<f64>, Array1<f64>, Array1<f64>, Array1<f64>) {
        let i = sigmoid(&(self.w_ii.dot(x) + self.w_hi.dot(h) + &self.b_i));
        let f = sigmoid(&(self.w_if.dot(x) + self.w_hf.dot(h) + &self.b_f));
        let g = tanh(&(self.w_ig.dot(x) + self.w_hg.dot(h) + &self.b_g));
        let o = sigmoid(&(self.w_io.dot(x) + self.w_ho.dot(h) + &self.b_o));
        (i, f, g, o)
    }

    /// Runs the layer over a sequence. Returns every hidden state and the last one.
    fn forward_sequence(&self, inputs: &[Array1<f64>]) -> (Vec<Array1<f64>>, Array1<f64>) {
        let mut h = Array1::zeros(self.units());
        let mut c = Array1::zeros(self.units());
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let (i, f, g, o) = self.gates(x, &h);
            c = &f * &c + &i * &g;
            h = &o * &tanh(&c);
            outputs.push(h.clone());
        }

        (outputs, h)
    }

    fn forward_sequence_cached(&self, inputs: &[Array1<f64>]) -> (Vec<Array1<f64>>, Array1<f64>, Vec<LstmStepCache>) {
        let mut h: Array1<f64> = Array1::zeros(self.units());
        let mut c: Array1<f64> = Array1::zeros(self.units());
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut steps = Vec::with_capacity(inputs.len());

        for x in inputs {
            let (i, f, g, o) = self.gates(x, &h);
            let c_next = &f * &c + &i * &g;
            let tanh_c = tanh(&c_next);
            let h_next = &o * &tanh_c;

            steps.push(LstmStepCache { x: x.clone(), h_prev: h, c_prev: c, i, f, g, o, tanh_c });
            outputs.push(h_next.clone());
            h = h_next;
            c = c_next;
        }

        (outputs, h, steps)
    }

    /// Backpropagation through time for one layer.
    ///
    /// `d_outputs[t]` is dL/dh_t arriving from above. Gradients are added into
    /// `grads`; the return value is dL/dx_t for the layer below.
    fn backward_sequence(
        &self,
        steps: &[LstmStepCache],
        d_outputs: &[Array1<f64>],
        grads: &mut LstmLayerWeights,
    ) -> Vec<Array1<f64>> {
        let units = self.units();
        let mut dh_next: Array1<f64> = Array1::zeros(units);
        let mut dc_next: Array1<f64> = Array1::zeros(units);
        let mut d_inputs = vec![Array1::zeros(self.input_size()); steps.len()];

        for t in (0..steps.len()).rev() {
            let step = &steps[t];
            let dh = &d_outputs[t] + &dh_next;

            let d_o = &dh * &step.tanh_c;
            let dtanh_c = step.tanh_c.mapv(|v| 1.0 - v * v);
            let dc = &dh * &step.o * &dtanh_c + &dc_next;

            let d_f = &dc * &step.c_prev;
            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            dc_next = &dc * &step.f;

            // Pre-activation gradients
            let da_i = d_i * &step.i.mapv(|v| v * (1.0 - v));
            let da_f = d_f * &step.f.mapv(|v| v * (1.0 - v));
            let da_g = d_g * &step.g.mapv(|v| 1.0 - v * v);
            let da_o = d_o * &step.o.mapv(|v| v * (1.0 - v));

            grads.w_ii += &outer(&da_i, &step.x);
            grads.w_if += &outer(&da_f, &step.x);
            grads.w_ig += &outer(&da_g, &step.x);
            grads.w_io += &outer(&da_o, &step.x);
            grads.w_hi += &outer(&da_i, &step.h_prev);
            grads.w_hf += &outer(&da_f, &step.h_prev);
            grads.w_hg += &outer(&da_g, &step.h_prev);
            grads.w_ho += &outer(&da_o, &step.h_prev);
            grads.b_i += &da_i;
            grads.b_f += &da_f;
            grads.b_g += &da_g;
            grads.b_o += &da_o;

            d_inputs[t] = self.w_ii.t().dot(&da_i)
                + self.w_if.t().dot(&da_f)
                + self.w_ig.t().dot(&da_g)
                + self.w_io.t().dot(&da_o);
            dh_next = self.w_hi.t().dot(&da_i)
                + self.w_hf.t().dot(&da_f)
                + self.w_hg.t().dot(&da_g)
                + self.w_ho.t().dot(&da_o);
        }

        d_inputs
    }
}

impl DenseLayerWeights {
    fn init(input_size: usize, units: usize, rng: &mut StdRng) -> Result<Self, ForecastError> {
        Ok(DenseLayerWeights {
            w: glorot_uniform(units, input_size, rng)?,
            b: Array1::zeros(units),
        })
    }

    fn zeros_like(&self) -> Self {
        DenseLayerWeights {
            w: Array2::zeros(self.w.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
        }
    }

    fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        self.w.dot(input) + &self.b
    }
}

impl NetworkWeights {
    /// LSTM stack over a univariate input, then `dense_units` linear units and one output.
    pub fn init(config: &NetworkConfig, rng: &mut StdRng) -> Result<Self, ForecastError> {
        let mut lstm_layers = Vec::with_capacity(config.lstm_units.len());
        let mut input_size = 1;
        for &units in &config.lstm_units {
            lstm_layers.push(LstmLayerWeights::init(input_size, units, rng)?);
            input_size = units;
        }

        let dense_layers = vec![
            DenseLayerWeights::init(input_size, config.dense_units, rng)?,
            DenseLayerWeights::init(config.dense_units, 1, rng)?,
        ];

        Ok(NetworkWeights { lstm_layers, dense_layers })
    }

    pub fn zeros_like(&self) -> Self {
        NetworkWeights {
            lstm_layers: self.lstm_layers.iter().map(LstmLayerWeights::zeros_like).collect(),
            dense_layers: self.dense_layers.iter().map(DenseLayerWeights::zeros_like).collect(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        let lstm: usize = self.lstm_layers.iter()
            .map(|l| l.matrices().iter().map(|m| m.len()).sum::<usize>()
                + l.biases().iter().map(|b| b.len()).sum::<usize>())
            .sum();
        let dense: usize = self.dense_layers.iter().map(|l| l.w.len() + l.b.len()).sum();
        lstm + dense
    }

    pub fn accumulate(&mut self, other: &NetworkWeights) {
        for (layer, delta) in self.lstm_layers.iter_mut().zip(&other.lstm_layers) {
            for (m, d) in layer.matrices_mut().into_iter().zip(delta.matrices()) {
                *m += d;
            }
            for (b, d) in layer.biases_mut().into_iter().zip(delta.biases()) {
                *b += d;
            }
        }
        for (layer, delta) in self.dense_layers.iter_mut().zip(&other.dense_layers) {
            layer.w += &delta.w;
            layer.b += &delta.b;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for layer in &mut self.lstm_layers {
            for m in layer.matrices_mut() {
                *m *= factor;
            }
            for b in layer.biases_mut() {
                *b *= factor;
            }
        }
        for layer in &mut self.dense_layers {
            layer.w *= factor;
            layer.b *= factor;
        }
    }

    pub fn global_norm(&self) -> f64 {
        let mut total = 0.0;
        for layer in &self.lstm_layers {
            total += layer.matrices().iter().map(|m| m.mapv(|x| x * x).sum()).sum::<f64>();
            total += layer.biases().iter().map(|b| b.mapv(|x| x * x).sum()).sum::<f64>();
        }
        for layer in &self.dense_layers {
            total += layer.w.mapv(|x| x * x).sum() + layer.b.mapv(|x| x * x).sum();
        }
        total.sqrt()
    }

    fn apply_adam(&mut self, grads: &NetworkWeights, optimizer: &mut AdamOptimizer) {
        for (idx, (layer, grad)) in self.lstm_layers.iter_mut().zip(&grads.lstm_layers).enumerate() {
            for ((name, param), g) in GATE_MATRICES.iter().zip(layer.matrices_mut()).zip(grad.matrices()) {
                optimizer.update(&format!("lstm{}.{}", idx, name), param, g);
            }
            for ((name, param), g) in GATE_BIASES.iter().zip(layer.biases_mut()).zip(grad.biases()) {
                optimizer.update(&format!("lstm{}.{}", idx, name), param, g);
            }
        }
        for (idx, (layer, grad)) in self.dense_layers.iter_mut().zip(&grads.dense_layers).enumerate() {
            optimizer.update(&format!("dense{}.w", idx), &mut layer.w, &grad.w);
            optimizer.update(&format!("dense{}.b", idx), &mut layer.b, &grad.b);
        }
    }

    fn input_sequence(window: ArrayView1<f64>) -> Vec<Array1<f64>> {
        window.iter().map(|&v| Array1::from_elem(1, v)).collect()
    }

    /// Scaled prediction for one lookback window.
    pub fn forward(&self, window: ArrayView1<f64>) -> f64 {
        let mut sequence = Self::input_sequence(window);
        let mut last = Array1::zeros(0);
        for layer in &self.lstm_layers {
            let (outputs, h) = layer.forward_sequence(&sequence);
            sequence = outputs;
            last = h;
        }

        let mut activation = last;
        for layer in &self.dense_layers {
            activation = layer.forward(&activation);
        }
        activation[0]
    }

    fn forward_cached(&self, window: ArrayView1<f64>) -> (f64, ForwardCache) {
        let mut sequence = Self::input_sequence(window);
        let mut last = Array1::zeros(0);
        let mut lstm = Vec::with_capacity(self.lstm_layers.len());
        for layer in &self.lstm_layers {
            let (outputs, h, steps) = layer.forward_sequence_cached(&sequence);
            lstm.push(steps);
            sequence = outputs;
            last = h;
        }

        let mut dense_inputs = Vec::with_capacity(self.dense_layers.len());
        let mut activation = last;
        for layer in &self.dense_layers {
            let next = layer.forward(&activation);
            dense_inputs.push(activation);
            activation = next;
        }

        (activation[0], ForwardCache { lstm, dense_inputs })
    }

    /// Gradients of the loss for one sample given dL/dprediction.
    fn backward(&self, cache: &ForwardCache, d_pred: f64) -> NetworkWeights {
        let mut grads = self.zeros_like();

        let mut delta = Array1::from_elem(1, d_pred);
        for (k, layer) in self.dense_layers.iter().enumerate().rev() {
            grads.dense_layers[k].w += &outer(&delta, &cache.dense_inputs[k]);
            grads.dense_layers[k].b += &delta;
            delta = layer.w.t().dot(&delta);
        }

        // Only the last hidden state of the top LSTM feeds the dense head
        let timesteps = cache.lstm.first().map_or(0, |steps| steps.len());
        let mut d_outputs: Vec<Array1<f64>> = (0..timesteps)
            .map(|_| Array1::zeros(delta.len()))
            .collect();
        if let Some(last) = d_outputs.last_mut() {
            *last = delta;
        }

        for (k, layer) in self.lstm_layers.iter().enumerate().rev() {
            d_outputs = layer.backward_sequence(&cache.lstm[k], &d_outputs, &mut grads.lstm_layers[k]);
        }

        grads
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub lstm_units: Vec<usize>,
    pub dense_units: usize,
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            lstm_units: vec![128, 64],
            dense_units: 25,
            seed: None,
        }
    }
}

impl NetworkConfig {
    fn validate(&self) -> Result<(), ForecastError> {
        if self.lstm_units.is_empty() {
            return Err(ForecastError::InvalidParameter("At least one LSTM layer is required".to_string()));
        }
        for &units in &self.lstm_units {
            ensure_positive(units, "LSTM units")?;
        }
        ensure_positive(self.dense_units, "dense units")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub clip_norm: Option<f64>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            clip_norm: None,
        }
    }
}

impl CompileOptions {
    fn validate(&self) -> Result<(), ForecastError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ForecastError::InvalidParameter(
                format!("Learning rate must be positive, got {}", self.learning_rate)
            ));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ForecastError::InvalidParameter(format!("{} must be in [0, 1), got {}", name, beta)));
            }
        }
        if !(self.epsilon > 0.0) {
            return Err(ForecastError::InvalidParameter(format!("epsilon must be positive, got {}", self.epsilon)));
        }
        if let Some(clip) = self.clip_norm {
            if !(clip.is_finite() && clip > 0.0) {
                return Err(ForecastError::InvalidParameter(format!("clip_norm must be positive, got {}", clip)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Untrained,
    Built,
    Compiled,
    Trained,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
}

impl TrainingHistory {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_close: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.predicted_close).collect()
    }
}

/// Regressor lifecycle: `Untrained → Built → Compiled → Trained`.
pub struct LstmRegressor {
    config: NetworkConfig,
    state: ModelState,
    timesteps: usize,
    weights: Option<NetworkWeights>,
    optimizer: Option<AdamOptimizer>,
    clip_norm: Option<f64>,
    epochs_trained: usize,
    rng: StdRng,
}

impl LstmRegressor {
    pub fn new(config: NetworkConfig) -> Result<Self, ForecastError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(LstmRegressor {
            config,
            state: ModelState::Untrained,
            timesteps: 0,
            weights: None,
            optimizer: None,
            clip_norm: None,
            epochs_trained: 0,
            rng,
        })
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    pub fn weights(&self) -> Option<&NetworkWeights> {
        self.weights.as_ref()
    }

    pub fn num_parameters(&self) -> usize {
        self.weights.as_ref().map_or(0, NetworkWeights::num_parameters)
    }

    /// Fresh weights for windows of `timesteps` values. Discards any previous training.
    pub fn build(&mut self, timesteps: usize) -> Result<(), ForecastError> {
        ensure_positive(timesteps, "timesteps")?;
        let weights = NetworkWeights::init(&self.config, &mut self.rng)?;

        info!("🛠️ [Model] Built LSTM{:?} → Dense({}) → Dense(1) for {} timesteps, {} parameters",
              self.config.lstm_units, self.config.dense_units, timesteps, weights.num_parameters());

        self.weights = Some(weights);
        self.timesteps = timesteps;
        self.optimizer = None;
        self.epochs_trained = 0;
        self.state = ModelState::Built;
        Ok(())
    }

    pub fn compile(&mut self, options: CompileOptions) -> Result<(), ForecastError> {
        if self.state == ModelState::Untrained {
            return Err(ForecastError::UntrainedModelUse(
                "compile requires a built model; call build first".to_string()
            ));
        }
        options.validate()?;

        self.optimizer = Some(AdamOptimizer::new(
            options.learning_rate, options.beta1, options.beta2, options.epsilon,
        ));
        self.clip_norm = options.clip_norm;
        self.state = ModelState::Compiled;

        info!("⚙️ [Model] Compiled with Adam (lr {}, clip_norm {:?}) and MSE loss",
              options.learning_rate, options.clip_norm);
        Ok(())
    }

    fn check_input(&self, x: &Array3<f64>) -> Result<usize, ForecastError> {
        let (n, timesteps, features) = x.dim();
        if timesteps != self.timesteps || features != 1 {
            return Err(ForecastError::shape(
                format!("(samples, {}, 1)", self.timesteps),
                format!("({}, {}, {})", n, timesteps, features),
            ));
        }
        Ok(n)
    }

    pub fn fit(
        &mut self,
        x: &Array3<f64>,
        y: &Array1<f64>,
        batch_size: usize,
        epochs: usize,
    ) -> Result<TrainingHistory, ForecastError> {
        if !matches!(self.state, ModelState::Compiled | ModelState::Trained) || self.optimizer.is_none() {
            return Err(ForecastError::UntrainedModelUse(
                "fit requires a compiled model; call compile first".to_string()
            ));
        }
        ensure_positive(batch_size, "batch_size")?;
        ensure_positive(epochs, "epochs")?;

        let n = self.check_input(x)?;
        if y.len() != n {
            return Err(ForecastError::shape(format!("{} targets", n), format!("{} targets", y.len())));
        }
        if n == 0 {
            return Err(ForecastError::EmptyOrDegenerateSeries("No training samples".to_string()));
        }

        let (Some(weights), Some(optimizer)) = (self.weights.as_mut(), self.optimizer.as_mut()) else {
            return Err(ForecastError::UntrainedModelUse("Model has no weights".to_string()));
        };

        info!("🚀 [Model] Training on {} samples, batch size {}, {} epochs", n, batch_size, epochs);

        let mut history = TrainingHistory::default();
        let mut order: Vec<usize> = (0..n).collect();

        for epoch in 0..epochs {
            order.shuffle(&mut self.rng);
            let mut squared_error = 0.0;

            for batch in order.chunks(batch_size) {
                let scale = 2.0 / batch.len() as f64;
                let network: &NetworkWeights = weights;

                // Per-sample gradients in parallel; summed below in batch order
                let results: Vec<(f64, NetworkWeights)> = batch
                    .par_iter()
                    .map(|&idx| {
                        let (pred, cache) = network.forward_cached(x.slice(s![idx, .., 0]));
                        let err = pred - y[idx];
                        (err * err, network.backward(&cache, scale * err))
                    })
                    .collect();

                let mut grads = network.zeros_like();
                for (sq, sample_grads) in &results {
                    squared_error += sq;
                    grads.accumulate(sample_grads);
                }

                if let Some(max_norm) = self.clip_norm {
                    let norm = grads.global_norm();
                    if norm > max_norm {
                        grads.scale(max_norm / norm);
                    }
                }

                optimizer.begin_step();
                weights.apply_adam(&grads, optimizer);
            }

            let loss = squared_error / n as f64;
            if !loss.is_finite() {
                warn!("⚠️ [Model] Non-finite loss at epoch {}", epoch + 1);
            }
            info!("📉 [Model] Epoch {}/{} - loss: {:.6}", epoch + 1, epochs, loss);
            history.loss.push(loss);
        }

        self.epochs_trained += epochs;
        self.state = ModelState::Trained;
        info!("✅ [Model] Training finished ({} epochs total)", self.epochs_trained);
        Ok(history)
    }

    /// Build, compile and fit in one call.
    pub fn train(
        &mut self,
        x: &Array3<f64>,
        y: &Array1<f64>,
        batch_size: usize,
        epochs: usize,
        options: CompileOptions,
    ) -> Result<TrainingHistory, ForecastError> {
        let (_, timesteps, _) = x.dim();
        self.build(timesteps)?;
        self.compile(options)?;
        self.fit(x, y, batch_size, epochs)
    }

    fn trained_weights(&self, operation: &str) -> Result<&NetworkWeights, ForecastError> {
        match (&self.state, &self.weights) {
            (ModelState::Trained, Some(weights)) => Ok(weights),
            _ => Err(ForecastError::UntrainedModelUse(
                format!("{} requires a trained model (state is {:?})", operation, self.state)
            )),
        }
    }

    pub fn predict_scaled(&self, x: &Array3<f64>) -> Result<Array1<f64>, ForecastError> {
        let weights = self.trained_weights("predict")?;
        let n = self.check_input(x)?;

        let predictions: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|idx| weights.forward(x.slice(s![idx, .., 0])))
            .collect();

        debug!("🔮 [Model] Predicted {} samples", n);
        Ok(Array1::from(predictions))
    }

    pub fn predict(&self, x: &Array3<f64>, scaler: &MinMaxScaler) -> Result<Array1<f64>, ForecastError> {
        let scaled = self.predict_scaled(x)?;
        Ok(scaler.inverse_transform(&scaled))
    }

    /// Autoregressive forecast: each prediction is appended to the window
    /// and the oldest value dropped.
    pub fn forecast(
        &self,
        seed: ArrayView1<f64>,
        scaler: &MinMaxScaler,
        n_steps: usize,
        start_date: NaiveDate,
    ) -> Result<Forecast, ForecastError> {
        let weights = self.trained_weights("forecast")?;
        if n_steps == 0 {
            return Err(ForecastError::InvalidParameter("Forecast horizon must be positive".to_string()));
        }
        if seed.len() != self.timesteps {
            return Err(ForecastError::shape(
                format!("seed window of {} values", self.timesteps),
                format!("{} values", seed.len()),
            ));
        }

        let mut window: VecDeque<f64> = seed.iter().copied().collect();
        let mut scaled = Vec::with_capacity(n_steps);
        for _ in 0..n_steps {
            let next = weights.forward(ArrayView1::from(&*window.make_contiguous()));
            scaled.push(next);
            window.pop_front();
            window.push_back(next);
        }

        let prices = scaler.inverse_transform(&Array1::from(scaled));
        let mut points = Vec::with_capacity(n_steps);
        for (k, &predicted_close) in prices.iter().enumerate() {
            let date = start_date.checked_add_days(Days::new(k as u64 + 1)).ok_or_else(|| {
                ForecastError::InvalidParameter(format!("Forecast date overflow after {}", start_date))
            })?;
            points.push(ForecastPoint { date, predicted_close });
        }

        info!("📈 [Model] Forecast {} days after {}", n_steps, start_date);
        Ok(Forecast { points })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ForecastError> {
        let weights = self.trained_weights("save")?;
        let artifact = ModelArtifact {
            format_version: storage::ARTIFACT_VERSION,
            config: self.config.clone(),
            timesteps: self.timesteps,
            weights: weights.clone(),
            epochs_trained: self.epochs_trained,
            saved_at: Utc::now().to_rfc3339(),
        };
        storage::save_artifact(&artifact, path.as_ref())
    }

    /// Restores a trained model. The optimizer state is not persisted; call
    /// `compile` before fitting further.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ForecastError> {
        let artifact = storage::load_artifact(path.as_ref())?;
        let mut model = LstmRegressor::new(artifact.config)?;
        model.timesteps = artifact.timesteps;
        model.weights = Some(artifact.weights);
        model.epochs_trained = artifact.epochs_trained;
        model.state = ModelState::Trained;

        info!("📂 [Model] Loaded model trained for {} epochs (saved {})",
              model.epochs_trained, artifact.saved_at);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{fit_scale, make_windows, reshape};

    fn tiny_config(seed: u64) -> NetworkConfig {
        NetworkConfig { lstm_units: vec![6, 4], dense_units: 3, seed: Some(seed) }
    }

    fn sine_data(timesteps: usize) -> (Array3<f64>, Array1<f64>, MinMaxScaler, Array1<f64>) {
        let values: Vec<f64> = (0..60).map(|i| 50.0 + 10.0 * (i as f64 * 0.3).sin()).collect();
        let scaled = fit_scale(&values).unwrap();
        let data = make_windows(&scaled.values, &values, 50, timesteps).unwrap();
        (reshape(&data.x_train).unwrap(), data.y_train, scaled.scaler, data.last_window)
    }

    fn options(lr: f64) -> CompileOptions {
        CompileOptions { learning_rate: lr, ..CompileOptions::default() }
    }

    #[test]
    fn test_default_architecture_parameters() {
        let mut model = LstmRegressor::new(NetworkConfig { seed: Some(1), ..NetworkConfig::default() }).unwrap();
        model.build(60).unwrap();
        // LSTM(128): 4*(128*1 + 128*128 + 128), LSTM(64): 4*(64*128 + 64*64 + 64),
        // Dense(25): 64*25 + 25, Dense(1): 25 + 1
        assert_eq!(model.num_parameters(), 66_560 + 49_408 + 1_625 + 26);
        assert_eq!(model.state(), ModelState::Built);

        let weights = model.weights().unwrap();
        assert!(weights.lstm_layers[0].b_f.iter().all(|&b| b == 1.0));
        assert!(weights.lstm_layers[0].b_i.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_state_machine_guards() {
        let mut model = LstmRegressor::new(tiny_config(3)).unwrap();
        let (x, y, scaler, last) = sine_data(5);

        assert!(matches!(model.compile(CompileOptions::default()), Err(ForecastError::UntrainedModelUse(_))));
        assert!(matches!(model.fit(&x, &y, 8, 1), Err(ForecastError::UntrainedModelUse(_))));
        assert!(matches!(model.predict_scaled(&x), Err(ForecastError::UntrainedModelUse(_))));
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(matches!(model.forecast(last.view(), &scaler, 3, start), Err(ForecastError::UntrainedModelUse(_))));

        model.build(5).unwrap();
        assert!(matches!(model.fit(&x, &y, 8, 1), Err(ForecastError::UntrainedModelUse(_))));
        assert!(matches!(model.predict_scaled(&x), Err(ForecastError::UntrainedModelUse(_))));
        assert!(matches!(model.save("/tmp/never_written.bin"), Err(ForecastError::UntrainedModelUse(_))));
    }

    #[test]
    fn test_fit_validation() {
        let mut model = LstmRegressor::new(tiny_config(4)).unwrap();
        let (x, y, _, _) = sine_data(5);
        model.build(5).unwrap();
        model.compile(options(0.01)).unwrap();

        assert!(matches!(model.fit(&x, &y, 0, 1), Err(ForecastError::InvalidParameter(_))));
        assert!(matches!(model.fit(&x, &y, 8, 0), Err(ForecastError::InvalidParameter(_))));

        let short_y = y.slice(s![1..]).to_owned();
        assert!(matches!(model.fit(&x, &short_y, 8, 1), Err(ForecastError::ShapeMismatch { .. })));

        let wrong_x = Array3::<f64>::zeros((x.dim().0, 4, 1));
        assert!(matches!(model.fit(&wrong_x, &y, 8, 1), Err(ForecastError::ShapeMismatch { .. })));

        let bad = CompileOptions { learning_rate: 0.0, ..CompileOptions::default() };
        assert!(matches!(model.compile(bad), Err(ForecastError::InvalidParameter(_))));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = NetworkConfig { lstm_units: vec![3, 2], dense_units: 2, seed: None };
        let weights = NetworkWeights::init(&config, &mut rng).unwrap();
        let window = Array1::from(vec![0.1, 0.5, 0.3, 0.9]);
        let target = 0.4;

        let loss = |w: &NetworkWeights| {
            let err = w.forward(window.view()) - target;
            err * err
        };

        let (pred, cache) = weights.forward_cached(window.view());
        let grads = weights.backward(&cache, 2.0 * (pred - target));
        let eps = 1e-6;

        let check = |analytic: f64, perturb: &dyn Fn(&mut NetworkWeights, f64)| {
            let mut plus = weights.clone();
            perturb(&mut plus, eps);
            let mut minus = weights.clone();
            perturb(&mut minus, -eps);
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - analytic).abs() < 1e-6 + 1e-4 * numeric.abs(),
                    "numeric {} vs analytic {}", numeric, analytic);
        };

        check(grads.lstm_layers[0].w_ii[[1, 0]], &|w, d| w.lstm_layers[0].w_ii[[1, 0]] += d);
        check(grads.lstm_layers[0].w_hf[[2, 1]], &|w, d| w.lstm_layers[0].w_hf[[2, 1]] += d);
        check(grads.lstm_layers[0].b_f[0], &|w, d| w.lstm_layers[0].b_f[0] += d);
        check(grads.lstm_layers[1].w_ig[[0, 2]], &|w, d| w.lstm_layers[1].w_ig[[0, 2]] += d);
        check(grads.lstm_layers[1].w_ho[[1, 0]], &|w, d| w.lstm_layers[1].w_ho[[1, 0]] += d);
        check(grads.lstm_layers[1].b_o[1], &|w, d| w.lstm_layers[1].b_o[1] += d);
        check(grads.dense_layers[0].w[[1, 1]], &|w, d| w.dense_layers[0].w[[1, 1]] += d);
        check(grads.dense_layers[1].b[0], &|w, d| w.dense_layers[1].b[0] += d);
    }

    #[test]
    fn test_training_reduces_loss() {
        let (x, y, _, _) = sine_data(5);
        let mut model = LstmRegressor::new(tiny_config(42)).unwrap();
        let history = model.train(&x, &y, 8, 40, options(0.01)).unwrap();

        assert_eq!(history.loss.len(), 40);
        assert!(history.loss.iter().all(|l| l.is_finite()));
        assert!(history.final_loss().unwrap() < history.loss[0]);
        assert_eq!(model.state(), ModelState::Trained);
        assert_eq!(model.epochs_trained(), 40);
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let (x, y, _, _) = sine_data(5);
        let mut a = LstmRegressor::new(tiny_config(9)).unwrap();
        let mut b = LstmRegressor::new(tiny_config(9)).unwrap();
        a.train(&x, &y, 8, 3, options(0.01)).unwrap();
        b.train(&x, &y, 8, 3, options(0.01)).unwrap();
        assert_eq!(a.predict_scaled(&x).unwrap(), b.predict_scaled(&x).unwrap());
    }

    #[test]
    fn test_forecast_dates_and_determinism() {
        let (x, y, scaler, last) = sine_data(5);
        let mut model = LstmRegressor::new(tiny_config(5)).unwrap();
        model.train(&x, &y, 8, 2, options(0.01)).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let first = model.forecast(last.view(), &scaler, 5, start).unwrap();
        let second = model.forecast(last.view(), &scaler, 5, start).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert_eq!(first.points[0].date, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        assert_eq!(first.points[2].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        for pair in first.points.windows(2) {
            assert_eq!(pair[1].date, pair[0].date + Days::new(1));
        }

        // One-step forecast equals a direct prediction on the seed window
        let one = model.forecast(last.view(), &scaler, 1, start).unwrap();
        let direct = model.predict(&last.to_owned().into_shape_with_order((1, 5, 1)).unwrap(), &scaler).unwrap();
        assert_eq!(one.points[0].predicted_close, direct[0]);

        assert!(matches!(model.forecast(last.view(), &scaler, 0, start), Err(ForecastError::InvalidParameter(_))));
        let short = last.slice(s![1..]);
        assert!(matches!(model.forecast(short, &scaler, 3, start), Err(ForecastError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_predict_on_empty_batch() {
        let (x, y, _, _) = sine_data(5);
        let mut model = LstmRegressor::new(tiny_config(6)).unwrap();
        model.train(&x, &y, 16, 1, options(0.01)).unwrap();
        let empty = Array3::<f64>::zeros((0, 5, 1));
        assert!(model.predict_scaled(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_reproduces_predictions() {
        let (x, y, scaler, _) = sine_data(5);
        let mut model = LstmRegressor::new(tiny_config(8)).unwrap();
        model.train(&x, &y, 8, 2, options(0.01)).unwrap();

        let path = std::env::temp_dir().join(format!("lstmforecast_model_{}.bin", std::process::id()));
        model.save(&path).unwrap();
        let loaded = LstmRegressor::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.state(), ModelState::Trained);
        assert_eq!(loaded.timesteps(), 5);
        assert_eq!(loaded.epochs_trained(), 2);
        assert_eq!(model.predict(&x, &scaler).unwrap(), loaded.predict(&x, &scaler).unwrap());
    }
}
