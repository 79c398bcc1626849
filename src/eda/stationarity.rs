// projeto: lstmforecast
// file: src/eda/stationarity.rs
// Augmented Dickey-Fuller test and differencing-order estimation

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use crate::neural::utils::{validate_values, ForecastError};

// MacKinnon (1994) p-value surface, regression with constant, one variable
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

// MacKinnon (2010) critical-value response surfaces: b0 + b1/n + b2/n² + b3/n³
const CRIT_1: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
const CRIT_5: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.040];
const CRIT_10: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Autolag {
    Aic,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdfOptions {
    pub max_lag: Option<usize>,
    pub autolag: Autolag,
}

impl Default for AdfOptions {
    fn default() -> Self {
        AdfOptions { max_lag: None, autolag: Autolag::Aic }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    pub one_pct: f64,
    pub five_pct: f64,
    pub ten_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    pub n_obs: usize,
    pub critical_values: CriticalValues,
    pub ic_best: Option<f64>,
}

impl AdfResult {
    pub fn is_stationary(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

struct OlsFit {
    params: DVector<f64>,
    t_values: DVector<f64>,
    ssr: f64,
    nobs: usize,
}

impl OlsFit {
    fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        let k = self.params.len() as f64;
        let llf = -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0);
        -2.0 * llf + 2.0 * k
    }
}

fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, ForecastError> {
    let (nobs, k) = x.shape();
    if nobs <= k {
        return Err(ForecastError::Computation(
            format!("Regression has {} observations for {} regressors", nobs, k)
        ));
    }

    let xtx_inv = (x.transpose() * x).try_inverse().ok_or_else(|| {
        ForecastError::Computation("Singular design matrix in ADF regression".to_string())
    })?;
    let params = &xtx_inv * x.transpose() * y;
    let resid = y - x * &params;
    let ssr = resid.dot(&resid);
    let sigma2 = ssr / (nobs - k) as f64;

    let t_values = DVector::from_iterator(k, (0..k).map(|j| params[j] / (sigma2 * xtx_inv[(j, j)]).sqrt()));
    Ok(OlsFit { params, t_values, ssr, nobs })
}

/// Rows `t = start..diffs.len()` of `Δy_t = β·y_{t-1} + Σγ_j·Δy_{t-j} + α`.
/// Columns: level, `lags` lagged differences, constant.
fn design(values: &[f64], diffs: &[f64], start: usize, lags: usize) -> (DMatrix<f64>, DVector<f64>) {
    let rows = diffs.len() - start;
    let cols = lags + 2;
    let x = DMatrix::from_fn(rows, cols, |r, c| {
        let t = start + r;
        match c {
            0 => values[t],
            c if c <= lags => diffs[t - c],
            _ => 1.0,
        }
    });
    let y = DVector::from_iterator(rows, diffs[start..].iter().copied());
    (x, y)
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// MacKinnon approximate p-value for the constant-only ADF regression.
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let coefs: &[f64] = if statistic <= TAU_STAR { &TAU_SMALL_P } else { &TAU_LARGE_P };
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(polyval(coefs, statistic)),
        Err(_) => f64::NAN,
    }
}

pub fn mackinnon_critical_values(nobs: usize) -> CriticalValues {
    let inv = 1.0 / nobs as f64;
    let surface = |b: &[f64; 4]| b[0] + b[1] * inv + b[2] * inv.powi(2) + b[3] * inv.powi(3);
    CriticalValues {
        one_pct: surface(&CRIT_1),
        five_pct: surface(&CRIT_5),
        ten_pct: surface(&CRIT_10),
    }
}

pub fn adf_test(values: &[f64], options: &AdfOptions) -> Result<AdfResult, ForecastError> {
    validate_values(values, "ADF input")?;
    let n = values.len();
    if n < 4 {
        return Err(ForecastError::EmptyOrDegenerateSeries(
            format!("ADF needs at least 4 observations, got {}", n)
        ));
    }
    if is_constant(values) {
        return Err(ForecastError::EmptyOrDegenerateSeries(
            "ADF test is undefined for a constant series".to_string()
        ));
    }

    let lag_cap = n / 2 - 2;
    let max_lag = match options.max_lag {
        Some(lag) if lag > lag_cap => {
            return Err(ForecastError::InvalidParameter(
                format!("max_lag {} exceeds {} for {} observations", lag, lag_cap, n)
            ));
        }
        Some(lag) => lag,
        None => {
            let default = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
            default.min(lag_cap)
        }
    };

    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let (used_lag, ic_best) = match options.autolag {
        Autolag::Aic => {
            // Every candidate is fitted on the sample of the longest lag
            let mut best: Option<(f64, usize)> = None;
            for lags in 0..=max_lag {
                let (x, y) = design(values, &diffs, max_lag, lags);
                let aic = ols(&x, &y)?.aic();
                if best.is_none_or(|(best_aic, _)| aic < best_aic) {
                    best = Some((aic, lags));
                }
            }
            match best {
                Some((aic, lags)) => (lags, Some(aic)),
                None => (max_lag, None),
            }
        }
        Autolag::None => (max_lag, None),
    };

    let (x, y) = design(values, &diffs, used_lag, used_lag);
    let fit = ols(&x, &y)?;
    let statistic = fit.t_values[0];
    if !statistic.is_finite() {
        return Err(ForecastError::Computation("ADF statistic is not finite".to_string()));
    }

    debug!("🧪 ADF regression - lag {}, nobs {}, level coefficient {:.6}", used_lag, fit.nobs, fit.params[0]);

    Ok(AdfResult {
        statistic,
        p_value: mackinnon_p_value(statistic),
        used_lag,
        n_obs: fit.nobs,
        critical_values: mackinnon_critical_values(fit.nobs),
        ic_best,
    })
}

/// Number of differences needed before the ADF test rejects a unit root at `alpha`.
pub fn ndiffs(values: &[f64], alpha: f64, max_d: usize) -> Result<usize, ForecastError> {
    if max_d == 0 {
        return Err(ForecastError::InvalidParameter("max_d must be positive".to_string()));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(ForecastError::InvalidParameter(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    validate_values(values, "ndiffs input")?;

    let mut series = values.to_vec();
    if is_constant(&series) {
        return Ok(0);
    }

    let mut d = 0;
    let mut p_value = adf_test(&series, &AdfOptions::default())?.p_value;
    while p_value >= alpha && d < max_d {
        d += 1;
        series = series.windows(2).map(|w| w[1] - w[0]).collect();
        if is_constant(&series) {
            return Ok(d);
        }
        p_value = adf_test(&series, &AdfOptions::default())?.p_value;
    }

    Ok(d)
}
