// projeto: lstmforecast
// file: src/eda/decomposition.rs
// Classical seasonal decomposition with moving-average trend

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::neural::utils::{validate_values, ForecastError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionModel {
    Additive,
    Multiplicative,
}

impl FromStr for DecompositionModel {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "additive" | "add" => Ok(DecompositionModel::Additive),
            "multiplicative" | "mul" => Ok(DecompositionModel::Multiplicative),
            other => Err(ForecastError::InvalidParameter(format!("Unknown decomposition model '{}'", other))),
        }
    }
}

impl fmt::Display for DecompositionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompositionModel::Additive => write!(f, "additive"),
            DecompositionModel::Multiplicative => write!(f, "multiplicative"),
        }
    }
}

/// Every component has the length of the observed series.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub observed: Array1<f64>,
    pub trend: Array1<f64>,
    pub seasonal: Array1<f64>,
    pub residual: Array1<f64>,
    pub period: usize,
    pub model: DecompositionModel,
}

/// Centred moving average. Entries within half a window of either end are `None`.
fn centred_moving_average(values: &[f64], period: usize) -> (Vec<Option<f64>>, usize) {
    let weights: Vec<f64> = if period % 2 == 0 {
        let mut w = vec![1.0 / period as f64; period + 1];
        w[0] = 0.5 / period as f64;
        w[period] = 0.5 / period as f64;
        w
    } else {
        vec![1.0 / period as f64; period]
    };

    let half = weights.len() / 2;
    let n = values.len();
    let trend = (0..n)
        .map(|t| {
            if t < half || t + half >= n {
                None
            } else {
                Some(weights.iter().enumerate().map(|(k, w)| w * values[t - half + k]).sum())
            }
        })
        .collect();
    (trend, half)
}

/// Least-squares line through `(x, y[x])` for `x` in `range`. Flat for a single point.
fn fit_line(trend: &[f64], range: std::ops::Range<usize>) -> (f64, f64) {
    let m = range.len() as f64;
    let mean_x = range.clone().map(|x| x as f64).sum::<f64>() / m;
    let mean_y = range.clone().map(|x| trend[x]).sum::<f64>() / m;
    let sxx: f64 = range.clone().map(|x| (x as f64 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return (0.0, mean_y);
    }
    let sxy: f64 = range.map(|x| (x as f64 - mean_x) * (trend[x] - mean_y)).sum();
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

/// Fills undefined trend ends with lines fitted on the nearest `npoints` defined values.
fn extrapolate_trend(partial: &[Option<f64>], half: usize, npoints: usize) -> Vec<f64> {
    let n = partial.len();
    let mut trend: Vec<f64> = partial.iter().map(|v| v.unwrap_or(0.0)).collect();
    if half == 0 {
        return trend;
    }

    let front = half;
    let back = n - 1 - half;

    let front_last = (front + npoints).min(back);
    let (slope, intercept) = fit_line(&trend, front..front_last.max(front + 1));
    for (x, value) in trend.iter_mut().enumerate().take(front) {
        *value = slope * x as f64 + intercept;
    }

    let back_first = back.saturating_sub(npoints).max(front);
    let (slope, intercept) = fit_line(&trend, back_first..back.max(back_first + 1));
    for (x, value) in trend.iter_mut().enumerate().skip(back + 1) {
        *value = slope * x as f64 + intercept;
    }

    trend
}

pub fn decompose(values: &[f64], model: DecompositionModel, period: usize) -> Result<Decomposition, ForecastError> {
    validate_values(values, "decomposition input")?;
    if period == 0 {
        return Err(ForecastError::InvalidParameter("Period must be a positive integer".to_string()));
    }
    let n = values.len();
    if 2 * period > n {
        return Err(ForecastError::InvalidParameter(
            format!("Period {} needs at least {} observations (two full cycles), got {}", period, 2 * period, n)
        ));
    }
    if model == DecompositionModel::Multiplicative && values.iter().any(|&v| v <= 0.0) {
        return Err(ForecastError::InvalidParameter(
            "Multiplicative decomposition requires strictly positive values".to_string()
        ));
    }

    let (partial, half) = centred_moving_average(values, period);
    let trend = Array1::from(extrapolate_trend(&partial, half, (period - 1).max(1)));
    let observed = Array1::from(values.to_vec());

    let detrended = match model {
        DecompositionModel::Additive => &observed - &trend,
        DecompositionModel::Multiplicative => &observed / &trend,
    };

    let mut phase_means: Array1<f64> = (0..period)
        .map(|phase| {
            let cycle = detrended.slice(s![phase..;period]);
            cycle.sum() / cycle.len() as f64
        })
        .collect();
    let centre = phase_means.sum() / period as f64;
    match model {
        DecompositionModel::Additive => phase_means -= centre,
        DecompositionModel::Multiplicative => phase_means /= centre,
    }

    let seasonal: Array1<f64> = (0..n).map(|t| phase_means[t % period]).collect();
    let residual = match model {
        DecompositionModel::Additive => &detrended - &seasonal,
        DecompositionModel::Multiplicative => &detrended / &seasonal,
    };

    Ok(Decomposition { observed, trend, seasonal, residual, period, model })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seasonal_series(n: usize, period: usize) -> Vec<f64> {
        (0..n)
            .map(|t| {
                let phase = (t % period) as f64;
                100.0 + 0.5 * t as f64 + 3.0 * (phase - (period as f64 - 1.0) / 2.0)
            })
            .collect()
    }

    #[test]
    fn test_additive_components_sum_to_observed() {
        let values = seasonal_series(48, 4);
        let d = decompose(&values, DecompositionModel::Additive, 4).unwrap();

        assert_eq!(d.trend.len(), 48);
        assert_eq!(d.seasonal.len(), 48);
        assert_eq!(d.residual.len(), 48);
        for t in 0..48 {
            let rebuilt = d.trend[t] + d.seasonal[t] + d.residual[t];
            assert!((rebuilt - values[t]).abs() < 1e-9);
        }
        assert!(d.trend.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_linear_trend_recovered() {
        let values = seasonal_series(40, 4);
        let d = decompose(&values, DecompositionModel::Additive, 4).unwrap();
        // Centred average of a linear trend plus a zero-mean cycle is the line itself,
        // and the extrapolated ends continue it
        for t in 0..40 {
            assert!((d.trend[t] - (100.0 + 0.5 * t as f64)).abs() < 1e-9);
        }
        // Seasonal pattern is zero-mean and repeats with the period
        let first_cycle: f64 = d.seasonal.slice(s![0..4]).sum();
        assert!(first_cycle.abs() < 1e-9);
        assert!((d.seasonal[1] - d.seasonal[5]).abs() < 1e-12);
    }

    #[test]
    fn test_odd_period() {
        let values = seasonal_series(35, 5);
        let d = decompose(&values, DecompositionModel::Additive, 5).unwrap();
        assert!((d.trend[0] - 100.0).abs() < 1e-9);
        assert!((d.trend[34] - (100.0 + 0.5 * 34.0)).abs() < 1e-9);
    }

    #[test]
    fn test_trend_ends_fit_on_period_minus_one_points() {
        // Period 3 on t²: defined trend is t² + 2/3 on 1..=6, each end line uses two points
        let values: Vec<f64> = (0..8).map(|t| (t * t) as f64).collect();
        let d = decompose(&values, DecompositionModel::Additive, 3).unwrap();

        assert!((d.trend[3] - (9.0 + 2.0 / 3.0)).abs() < 1e-9);
        // Line through t = 1, 2
        assert!((d.trend[0] - (-4.0 / 3.0)).abs() < 1e-9);
        // Line through t = 4, 5
        assert!((d.trend[7] - 131.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_multiplicative() {
        let values: Vec<f64> = (0..36)
            .map(|t| (50.0 + t as f64) * if t % 3 == 0 { 1.1 } else { 0.95 })
            .collect();
        let d = decompose(&values, DecompositionModel::Multiplicative, 3).unwrap();
        for t in 0..36 {
            let rebuilt = d.trend[t] * d.seasonal[t] * d.residual[t];
            assert!((rebuilt - values[t]).abs() < 1e-9);
        }
        let mean_seasonal = d.seasonal.slice(s![0..3]).sum() / 3.0;
        assert!((mean_seasonal - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_arguments() {
        let values = seasonal_series(10, 2);
        assert!(matches!(
            decompose(&values, DecompositionModel::Additive, 0),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!(matches!(
            decompose(&values, DecompositionModel::Additive, 6),
            Err(ForecastError::InvalidParameter(_))
        ));
        let with_zero = [1.0, 0.0, 2.0, 3.0, 1.0, 2.0];
        assert!(matches!(
            decompose(&with_zero, DecompositionModel::Multiplicative, 2),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!("additive".parse::<DecompositionModel>().is_ok());
        assert!("cubic".parse::<DecompositionModel>().is_err());
    }
}
