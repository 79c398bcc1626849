// projeto: lstmforecast
// file: src/config.rs
// Pipeline configuration: TOML file with defaults, overridden by CLI flags

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::eda::DecompositionModel;
use crate::ingest::DEFAULT_START_DATE;
use crate::neural::model::{CompileOptions, NetworkConfig};
use crate::neural::utils::ForecastError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub ticker: String,
    pub start_date: String,
    pub table: String,
    pub csv: Option<PathBuf>,
    pub sqlite: Option<PathBuf>,
    pub pg_conn: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            ticker: "IOC.NS".to_string(),
            start_date: DEFAULT_START_DATE.to_string(),
            table: "ioc".to_string(),
            csv: None,
            sqlite: None,
            pg_conn: None,
        }
    }
}

impl DataConfig {
    pub fn start(&self) -> Result<NaiveDate, ForecastError> {
        NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d")
            .map_err(|e| ForecastError::Config(format!("Invalid start_date '{}': {}", self.start_date, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub lstm_units: Vec<usize>,
    pub dense_units: usize,
    pub seed: Option<u64>,
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let network = NetworkConfig::default();
        ModelConfig {
            lstm_units: network.lstm_units,
            dense_units: network.dense_units,
            seed: network.seed,
            path: PathBuf::from("lstm_model.bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub split_ratio: f64,
    pub lookback: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub clip_norm: Option<f64>,
    pub forecast_days: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            split_ratio: 0.85,
            lookback: 60,
            batch_size: 32,
            epochs: 10,
            learning_rate: CompileOptions::default().learning_rate,
            clip_norm: None,
            forecast_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdaConfig {
    pub lags: usize,
    pub period: usize,
    pub model: DecompositionModel,
    pub log_prices: bool,
}

impl Default for EdaConfig {
    fn default() -> Self {
        EdaConfig { lags: 40, period: 365, model: DecompositionModel::Multiplicative, log_prices: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub plot: String,
    pub loss_plot: String,
    pub forecast_csv: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("."),
            plot: "forecast.html".to_string(),
            loss_plot: "loss.html".to_string(),
            forecast_csv: "forecast.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub eda: EdaConfig,
    pub output: OutputConfig,
}

/// Values given explicitly on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ticker: Option<String>,
    pub start_date: Option<String>,
    pub table: Option<String>,
    pub csv: Option<PathBuf>,
    pub sqlite: Option<PathBuf>,
    pub pg_conn: Option<String>,
    pub split_ratio: Option<f64>,
    pub lookback: Option<usize>,
    pub batch_size: Option<usize>,
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub forecast_days: Option<usize>,
    pub seed: Option<u64>,
    pub model_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub lags: Option<usize>,
    pub period: Option<usize>,
    pub log_prices: Option<bool>,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ForecastError> {
        toml::from_str(text).map_err(|e| ForecastError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ForecastError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        info!("⚙️ Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ForecastError> {
        toml::to_string_pretty(self).map_err(|e| ForecastError::Config(e.to_string()))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            ticker, start_date, table, csv, sqlite, pg_conn, split_ratio, lookback, batch_size,
            epochs, learning_rate, forecast_days, seed, model_path, output_dir, lags, period,
            log_prices,
        } = overrides;

        if let Some(v) = ticker { self.data.ticker = v; }
        if let Some(v) = start_date { self.data.start_date = v; }
        if let Some(v) = table { self.data.table = v; }
        if csv.is_some() { self.data.csv = csv; }
        if sqlite.is_some() { self.data.sqlite = sqlite; }
        if pg_conn.is_some() { self.data.pg_conn = pg_conn; }
        if let Some(v) = split_ratio { self.training.split_ratio = v; }
        if let Some(v) = lookback { self.training.lookback = v; }
        if let Some(v) = batch_size { self.training.batch_size = v; }
        if let Some(v) = epochs { self.training.epochs = v; }
        if let Some(v) = learning_rate { self.training.learning_rate = v; }
        if let Some(v) = forecast_days { self.training.forecast_days = v; }
        if seed.is_some() { self.model.seed = seed; }
        if let Some(v) = model_path { self.model.path = v; }
        if let Some(v) = output_dir { self.output.dir = v; }
        if let Some(v) = lags { self.eda.lags = v; }
        if let Some(v) = period { self.eda.period = v; }
        if let Some(v) = log_prices { self.eda.log_prices = v; }
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            lstm_units: self.model.lstm_units.clone(),
            dense_units: self.model.dense_units,
            seed: self.model.seed,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            learning_rate: self.training.learning_rate,
            clip_norm: self.training.clip_norm,
            ..CompileOptions::default()
        }
    }
}
