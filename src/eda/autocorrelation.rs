// projeto: lstmforecast
// file: src/eda/autocorrelation.rs
// Sample ACF / PACF with 95% confidence bands

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use crate::neural::utils::{validate_values, ForecastError};

/// Correlation by lag, starting at lag 0, with `(lower, upper)` bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlogram {
    pub values: Vec<f64>,
    pub confint: Vec<(f64, f64)>,
}

impl Correlogram {
    pub fn nlags(&self) -> usize {
        self.values.len().saturating_sub(1)
    }

    /// Lags ≥ 1 whose correlation lies outside the band.
    pub fn significant_lags(&self) -> Vec<usize> {
        self.values.iter().zip(&self.confint).enumerate().skip(1)
            .filter(|(_, (value, band))| value.abs() > (band.1 - band.0) / 2.0)
            .map(|(lag, _)| lag)
            .collect()
    }
}

fn z_975() -> Result<f64, ForecastError> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ForecastError::Computation(format!("Normal distribution: {}", e)))?;
    Ok(normal.inverse_cdf(0.975))
}

fn check_input(values: &[f64], nlags: usize) -> Result<f64, ForecastError> {
    validate_values(values, "correlogram input")?;
    if nlags == 0 {
        return Err(ForecastError::InvalidParameter("nlags must be positive".to_string()));
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let c0 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if c0 == 0.0 {
        return Err(ForecastError::EmptyOrDegenerateSeries(
            "Autocorrelation is undefined for a constant series".to_string()
        ));
    }
    Ok(mean)
}

/// Biased autocorrelation `r_k = c_k / c_0` for `k = 0..=nlags`.
fn autocorrelation(values: &[f64], mean: f64, nlags: usize) -> Vec<f64> {
    let n = values.len();
    let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let acov: Vec<f64> = (0..=nlags)
        .map(|k| (0..n - k).map(|t| centred[t] * centred[t + k]).sum::<f64>() / n as f64)
        .collect();
    acov.iter().map(|c| c / acov[0]).collect()
}

/// ACF with Bartlett-formula bands.
pub fn acf(values: &[f64], nlags: usize) -> Result<Correlogram, ForecastError> {
    let mean = check_input(values, nlags)?;
    let n = values.len();
    if nlags >= n {
        return Err(ForecastError::InvalidParameter(
            format!("nlags {} must be smaller than the series length {}", nlags, n)
        ));
    }

    let r = autocorrelation(values, mean, nlags);
    let z = z_975()?;

    let mut confint = Vec::with_capacity(nlags + 1);
    confint.push((r[0], r[0]));
    let mut cumulative = 0.0;
    for k in 1..=nlags {
        // var(r_k) = (1 + 2 Σ_{j<k} r_j²) / n
        if k > 1 {
            cumulative += r[k - 1].powi(2);
        }
        let width = z * ((1.0 + 2.0 * cumulative) / n as f64).sqrt();
        confint.push((r[k] - width, r[k] + width));
    }

    Ok(Correlogram { values: r, confint })
}

/// PACF by Yule-Walker (Durbin-Levinson on the biased ACF).
pub fn pacf(values: &[f64], nlags: usize) -> Result<Correlogram, ForecastError> {
    let mean = check_input(values, nlags)?;
    let n = values.len();
    if nlags >= n / 2 {
        return Err(ForecastError::InvalidParameter(
            format!("nlags {} must be smaller than half the series length ({})", nlags, n / 2)
        ));
    }

    let r = autocorrelation(values, mean, nlags);
    let mut partial = vec![1.0; nlags + 1];
    let mut phi: Vec<f64> = Vec::with_capacity(nlags);

    for k in 1..=nlags {
        let num = r[k] - (1..k).map(|j| phi[j - 1] * r[k - j]).sum::<f64>();
        let den = 1.0 - (1..k).map(|j| phi[j - 1] * r[j]).sum::<f64>();
        if den == 0.0 {
            return Err(ForecastError::Computation(format!("Durbin-Levinson recursion broke down at lag {}", k)));
        }
        let phi_kk = num / den;

        let previous = phi.clone();
        for j in 1..k {
            phi[j - 1] = previous[j - 1] - phi_kk * previous[k - j - 1];
        }
        phi.push(phi_kk);
        partial[k] = phi_kk;
    }

    let width = z_975()? / (n as f64).sqrt();
    let confint = partial.iter().enumerate()
        .map(|(k, &p)| if k == 0 { (p, p) } else { (p - width, p + width) })
        .collect();

    Ok(Correlogram { values: partial, confint })
}
