// projeto: lstmforecast
// file: src/neural/mod.rs
// Module declarations for the LSTM forecasting core

pub mod utils;    // Error type, Adam optimizer and activation helpers
pub mod storage;  // Model artifacts and relational price stores (SQLite, PostgreSQL)
pub mod metrics;  // RMSE, MSE, MAE, MAPE and R² between actual and predicted prices
pub mod model;    // Stacked LSTM regressor: build, compile, fit, predict, forecast
pub mod data;     // Price series, MinMax scaling and supervised windows

// Re-export commonly used items for convenience
pub use model::{CompileOptions, Forecast, ForecastPoint, LstmRegressor, ModelState, NetworkConfig, TrainingHistory};
pub use metrics::{ErrorMetrics, MetricsReport};
pub use utils::{AdamOptimizer, ForecastError};
pub use data::{MinMaxScaler, OhlcvBar, PreProcess, PricePoint, TestRow, TimeSeries, WindowedData};
pub use storage::{ModelArtifact, PostgresStore, PriceStore, SqliteStore};
