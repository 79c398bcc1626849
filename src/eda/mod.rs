// projeto: lstmforecast
// file: src/eda/mod.rs
// Exploratory analysis of the closing-price column

pub mod autocorrelation;  // ACF / PACF with confidence bands
pub mod decomposition;    // Trend / seasonal / residual split
pub mod stationarity;     // ADF test and differencing order

pub use autocorrelation::{acf, pacf, Correlogram};
pub use decomposition::{decompose, Decomposition, DecompositionModel};
pub use stationarity::{adf_test, ndiffs, AdfOptions, AdfResult, Autolag, CriticalValues};

use log::info;
use std::fmt::Write;
use crate::neural::data::TimeSeries;
use crate::neural::utils::ForecastError;

pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_MAX_D: usize = 2;

/// Analysis helpers bound to one closing-price series.
pub struct Eda<'a> {
    series: &'a TimeSeries,
    closes: Vec<f64>,
}

impl<'a> Eda<'a> {
    pub fn new(series: &'a TimeSeries) -> Result<Self, ForecastError> {
        if series.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries("Nothing to analyse".to_string()));
        }
        Ok(Eda { series, closes: series.closes() })
    }

    /// Same analyses on `ln(close)`. Every close must be positive.
    pub fn on_log_closes(series: &'a TimeSeries) -> Result<Self, ForecastError> {
        if series.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries("Nothing to analyse".to_string()));
        }
        if series.points().iter().any(|p| p.close <= 0.0) {
            return Err(ForecastError::InvalidParameter(
                "Log prices need strictly positive closes".to_string()
            ));
        }
        Ok(Eda { series, closes: series.log_closes() })
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    pub fn decomposition(&self, model: DecompositionModel, period: usize) -> Result<Decomposition, ForecastError> {
        let result = decompose(&self.closes, model, period)?;
        let seasonal_range = result.seasonal.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        info!("🧩 Decomposition ({}, period {}) - trend {:.4} → {:.4}, seasonal range [{:.4}, {:.4}]",
              model, period,
              result.trend[0], result.trend[result.trend.len() - 1],
              seasonal_range.0, seasonal_range.1);
        Ok(result)
    }

    pub fn acf(&self, lags: usize) -> Result<Correlogram, ForecastError> {
        let result = acf(&self.closes, lags)?;
        info!("🔁 ACF up to lag {} - significant lags: {:?}", lags, result.significant_lags());
        Ok(result)
    }

    pub fn pacf(&self, lags: usize) -> Result<Correlogram, ForecastError> {
        let result = pacf(&self.closes, lags)?;
        info!("🔁 PACF up to lag {} - significant lags: {:?}", lags, result.significant_lags());
        Ok(result)
    }

    pub fn acf_pacf(&self, lags: usize) -> Result<(Correlogram, Correlogram), ForecastError> {
        Ok((self.acf(lags)?, self.pacf(lags)?))
    }

    pub fn adfuller_test(&self) -> Result<AdfResult, ForecastError> {
        let result = adf_test(&self.closes, &AdfOptions::default())?;
        info!("🧪 ADF test:");
        info!("   ├── Test statistic: {:.6}", result.statistic);
        info!("   ├── p-value: {:.6}", result.p_value);
        info!("   ├── Lags used: {}", result.used_lag);
        info!("   └── Observations used: {}", result.n_obs);
        Ok(result)
    }

    pub fn deg_of_diff(&self) -> Result<usize, ForecastError> {
        let d = ndiffs(&self.closes, DEFAULT_ALPHA, DEFAULT_MAX_D)?;
        info!("📐 The degree of differencing is {}", d);
        Ok(d)
    }

    /// Plain-text report of stationarity, differencing order and correlograms.
    pub fn summary(&self, lags: usize) -> Result<String, ForecastError> {
        let adf = self.adfuller_test()?;
        let d = self.deg_of_diff()?;
        let (acf, pacf) = self.acf_pacf(lags)?;

        let mut out = String::new();
        let fmt_err = |e: std::fmt::Error| ForecastError::Computation(e.to_string());
        let first = self.series.points().first().map(|p| p.date.to_string()).unwrap_or_default();
        let last = self.series.latest_date().map(|d| d.to_string()).unwrap_or_default();

        writeln!(out, "Series: {} observations ({} .. {})", self.closes.len(), first, last).map_err(fmt_err)?;
        writeln!(out, "ADF test statistic: {:.6}", adf.statistic).map_err(fmt_err)?;
        writeln!(out, "p-value: {:.6}", adf.p_value).map_err(fmt_err)?;
        writeln!(out, "Lags used: {}", adf.used_lag).map_err(fmt_err)?;
        writeln!(out, "Observations used: {}", adf.n_obs).map_err(fmt_err)?;
        writeln!(out, "Critical values: 1% {:.4}, 5% {:.4}, 10% {:.4}",
                 adf.critical_values.one_pct, adf.critical_values.five_pct, adf.critical_values.ten_pct)
            .map_err(fmt_err)?;
        writeln!(out, "Stationary at 5%: {}", adf.is_stationary(DEFAULT_ALPHA)).map_err(fmt_err)?;
        writeln!(out, "Degree of differencing: {}", d).map_err(fmt_err)?;
        writeln!(out, "ACF significant lags: {:?}", acf.significant_lags()).map_err(fmt_err)?;
        writeln!(out, "PACF significant lags: {:?}", pacf.significant_lags()).map_err(fmt_err)?;
        Ok(out)
    }
}
