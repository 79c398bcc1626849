// projeto: lstmforecast
// file: src/lib.rs
// Stock closing-price forecasting with a stacked LSTM

pub mod config;    // TOML configuration and command-line overrides
pub mod eda;       // Decomposition, correlograms and stationarity tests
pub mod ingest;    // Market data download and CSV input/output
pub mod neural;    // Preprocessing, model, metrics and storage
pub mod pipeline;  // End-to-end ingest → train → evaluate → forecast
pub mod plot;      // HTML charts
