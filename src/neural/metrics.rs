// projeto: lstmforecast
// file: src/neural/metrics.rs
// Error metrics between actual and predicted prices

use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::neural::utils::ForecastError;

/// Paired actual/predicted values of equal, non-zero length.
#[derive(Debug, Clone)]
pub struct ErrorMetrics<'a> {
    actual: &'a [f64],
    predicted: &'a [f64],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub rmse: f64,
    pub mse: f64,
    pub mae: f64,
    pub mape: Option<f64>,
    pub r_squared: f64,
}

impl<'a> ErrorMetrics<'a> {
    pub fn new(actual: &'a [f64], predicted: &'a [f64]) -> Result<Self, ForecastError> {
        if actual.len() != predicted.len() {
            return Err(ForecastError::shape(
                format!("{} predictions", actual.len()),
                format!("{} predictions", predicted.len()),
            ));
        }
        if actual.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries(
                "No observations to evaluate".to_string()
            ));
        }

        Ok(ErrorMetrics { actual, predicted })
    }

    fn n(&self) -> f64 {
        self.actual.len() as f64
    }

    fn errors(&self) -> impl Iterator<Item = f64> + '_ {
        self.actual.iter().zip(self.predicted).map(|(a, p)| a - p)
    }

    pub fn mse(&self) -> f64 {
        self.errors().map(|e| e * e).sum::<f64>() / self.n()
    }

    pub fn rmse(&self) -> f64 {
        self.mse().sqrt()
    }

    pub fn mae(&self) -> f64 {
        self.errors().map(f64::abs).sum::<f64>() / self.n()
    }

    /// Mean absolute percentage error, in percent.
    pub fn mape(&self) -> Result<f64, ForecastError> {
        if let Some(pos) = self.actual.iter().position(|&a| a == 0.0) {
            return Err(ForecastError::DivisionByZero(
                format!("MAPE is undefined: actual value at position {} is zero", pos)
            ));
        }

        let total: f64 = self.actual.iter().zip(self.predicted)
            .map(|(a, p)| ((a - p) / a).abs())
            .sum();
        Ok(total / self.n() * 100.0)
    }

    /// Coefficient of determination. A constant actual series yields 0 for a
    /// perfect fit and negative infinity otherwise.
    pub fn r_squared(&self) -> f64 {
        let mean = self.actual.iter().sum::<f64>() / self.n();
        let ss_res: f64 = self.errors().map(|e| e * e).sum();
        let ss_tot: f64 = self.actual.iter().map(|a| (a - mean).powi(2)).sum();

        if ss_tot == 0.0 {
            return if ss_res == 0.0 { 0.0 } else { f64::NEG_INFINITY };
        }
        1.0 - ss_res / ss_tot
    }

    pub fn all(&self) -> MetricsReport {
        let mape = match self.mape() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("⚠️ [Metrics] {}", e);
                None
            }
        };

        let report = MetricsReport {
            rmse: self.rmse(),
            mse: self.mse(),
            mae: self.mae(),
            mape,
            r_squared: self.r_squared(),
        };
        report.log();
        report
    }
}

impl MetricsReport {
    pub fn log(&self) {
        info!("📊 [Metrics] Evaluation:");
        info!("   ├── RMSE: {:.6}", self.rmse);
        info!("   ├── MSE: {:.6}", self.mse);
        info!("   ├── MAE: {:.6}", self.mae);
        match self.mape {
            Some(mape) => info!("   ├── MAPE: {:.4}%", mape),
            None => info!("   ├── MAPE: undefined"),
        }
        info!("   └── R²: {:.6}", self.r_squared);
    }
}
