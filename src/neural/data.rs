// projeto: lstmforecast
// file: src/neural/data.rs
// Price series, min-max scaling, train/test split and lookback windows

use chrono::NaiveDate;
use log::{debug, info};
use ndarray::{s, Array1, Array2, Array3, ArrayView1};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use crate::neural::utils::{validate_values, ForecastError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily OHLCV bar as delivered by the market-data source and stored in SQL/CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: i64,
}

/// Closing prices keyed by date: ascending, no duplicate dates, finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    points: Vec<PricePoint>,
}

impl TimeSeries {
    pub fn from_points(mut points: Vec<PricePoint>) -> Result<Self, ForecastError> {
        points.sort_by_key(|p| p.date);

        let mut seen = HashSet::with_capacity(points.len());
        for point in &points {
            if !seen.insert(point.date) {
                return Err(ForecastError::InvalidParameter(
                    format!("Duplicate date in series: {}", point.date)
                ));
            }
            if !point.close.is_finite() {
                return Err(ForecastError::InvalidParameter(
                    format!("Non-finite close on {}", point.date)
                ));
            }
        }

        Ok(TimeSeries { points })
    }

    pub fn from_bars(bars: &[OhlcvBar]) -> Result<Self, ForecastError> {
        Self::from_points(
            bars.iter()
                .map(|bar| PricePoint { date: bar.date, close: bar.close })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn log_closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close.ln()).collect()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn slice(&self, range: Range<usize>) -> TimeSeries {
        TimeSeries { points: self.points[range].to_vec() }
    }
}

/// Linear map of a fitted range onto [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Result<Self, ForecastError> {
        if values.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries(
                "Cannot fit a scaler on an empty series".to_string()
            ));
        }
        validate_values(values, "scaler input")?;

        let arr = ArrayView1::from(values);
        let min = *arr.min()
            .map_err(|e| ForecastError::EmptyOrDegenerateSeries(e.to_string()))?;
        let max = *arr.max()
            .map_err(|e| ForecastError::EmptyOrDegenerateSeries(e.to_string()))?;

        if max == min {
            return Err(ForecastError::EmptyOrDegenerateSeries(
                format!("Constant series (every value is {}) cannot be min-max scaled", min)
            ));
        }

        Ok(MinMaxScaler { min, max })
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn transform_value(&self, x: f64) -> f64 {
        (x - self.min) / self.range()
    }

    pub fn inverse_value(&self, y: f64) -> f64 {
        y * self.range() + self.min
    }

    pub fn transform(&self, values: &[f64]) -> Array1<f64> {
        values.iter().map(|&x| self.transform_value(x)).collect()
    }

    pub fn inverse_transform(&self, scaled: &Array1<f64>) -> Array1<f64> {
        scaled.mapv(|y| self.inverse_value(y))
    }
}

/// Scaled closing prices together with the transform that produced them.
#[derive(Debug, Clone)]
pub struct ScaledSeries {
    pub values: Array1<f64>,
    pub scaler: MinMaxScaler,
}

impl ScaledSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Supervised windows. Train targets are scaled; test targets are real prices.
#[derive(Debug, Clone)]
pub struct WindowedData {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
    pub last_window: Array1<f64>,
}

/// One row of the test frame: real close next to the model's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestRow {
    pub date: NaiveDate,
    pub close: f64,
    pub prediction: f64,
}

pub fn fit_scale(values: &[f64]) -> Result<ScaledSeries, ForecastError> {
    let scaler = MinMaxScaler::fit(values)?;
    let scaled = scaler.transform(values);
    debug!("📏 MinMax fitted - min: {:.4}, max: {:.4}", scaler.min, scaler.max);
    Ok(ScaledSeries { values: scaled, scaler })
}

/// `train_len = ceil(n * ratio)` for a ratio in (0, 1].
pub fn split(n: usize, ratio: f64) -> Result<usize, ForecastError> {
    if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
        return Err(ForecastError::InvalidParameter(
            format!("Split ratio must be in (0, 1], got {}", ratio)
        ));
    }
    if n == 0 {
        return Err(ForecastError::EmptyOrDegenerateSeries(
            "Cannot split an empty series".to_string()
        ));
    }

    Ok(((n as f64) * ratio).ceil() as usize)
}

fn sliding_windows(values: ArrayView1<f64>, lookback: usize) -> Array2<f64> {
    let rows = values.len().saturating_sub(lookback);
    let mut windows = Array2::zeros((rows, lookback));
    for i in 0..rows {
        windows.row_mut(i).assign(&values.slice(s![i..i + lookback]));
    }
    windows
}

pub fn make_windows(
    scaled: &Array1<f64>,
    closes: &[f64],
    train_len: usize,
    lookback: usize,
) -> Result<WindowedData, ForecastError> {
    let n = scaled.len();
    if closes.len() != n {
        return Err(ForecastError::shape(
            format!("{} closing prices", n),
            format!("{} closing prices", closes.len()),
        ));
    }
    if lookback == 0 {
        return Err(ForecastError::InvalidParameter("Lookback window must be positive".to_string()));
    }
    if train_len > n {
        return Err(ForecastError::InvalidParameter(
            format!("Train length {} exceeds series length {}", train_len, n)
        ));
    }
    if lookback >= train_len {
        return Err(ForecastError::InvalidParameter(
            format!("Lookback {} leaves no training windows (train length {})", lookback, train_len)
        ));
    }

    let x_train = sliding_windows(scaled.slice(s![..train_len]), lookback);
    let y_train = scaled.slice(s![lookback..train_len]).to_owned();

    // Test inputs may reach back across the split; test targets never do
    let x_test = sliding_windows(scaled.slice(s![train_len - lookback..]), lookback);
    let y_test = Array1::from(closes[train_len..].to_vec());

    let last_window = scaled.slice(s![n - lookback..]).to_owned();

    debug!("🔧 Windows - train: {}, test: {}, lookback: {}", x_train.nrows(), x_test.nrows(), lookback);
    Ok(WindowedData { x_train, y_train, x_test, y_test, last_window })
}

/// `(samples, timesteps)` → `(samples, timesteps, 1)`.
pub fn reshape(array: &Array2<f64>) -> Result<Array3<f64>, ForecastError> {
    let (rows, cols) = array.dim();
    Ok(array.to_owned().into_shape_with_order((rows, cols, 1))?)
}

/// Holds one series, its single fitted scaler and the split index.
#[derive(Debug, Clone)]
pub struct PreProcess {
    series: TimeSeries,
    scaled: ScaledSeries,
    latest_date: NaiveDate,
    train_len: usize,
}

impl PreProcess {
    pub fn new(series: &TimeSeries, split_by: f64) -> Result<Self, ForecastError> {
        let latest_date = series.latest_date().ok_or_else(|| {
            ForecastError::EmptyOrDegenerateSeries("Series has no observations".to_string())
        })?;
        let train_len = split(series.len(), split_by)?;
        let scaled = fit_scale(&series.closes())?;

        info!("🔄 PreProcess ready - {} observations, train length {}, last date {}",
              series.len(), train_len, latest_date);

        Ok(PreProcess { series: series.clone(), scaled, latest_date, train_len })
    }

    pub fn close_arr(&self) -> Vec<f64> {
        self.series.closes()
    }

    pub fn scaled(&self) -> &ScaledSeries {
        &self.scaled
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaled.scaler
    }

    pub fn train_len(&self) -> usize {
        self.train_len
    }

    pub fn latest_date(&self) -> NaiveDate {
        self.latest_date
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub fn tt_split(&self, lookback_window: usize) -> Result<WindowedData, ForecastError> {
        make_windows(&self.scaled.values, &self.close_arr(), self.train_len, lookback_window)
    }

    /// Training slice of the series and test rows carrying `predictions`.
    pub fn train_test(&self, predictions: &Array1<f64>) -> Result<(TimeSeries, Vec<TestRow>), ForecastError> {
        let n = self.series.len();
        let expected = n - self.train_len;
        if predictions.len() != expected {
            return Err(ForecastError::shape(
                format!("{} test predictions", expected),
                format!("{} predictions", predictions.len()),
            ));
        }

        let train = self.series.slice(0..self.train_len);
        let test = self.series.points()[self.train_len..]
            .iter()
            .zip(predictions.iter())
            .map(|(point, &prediction)| TestRow { date: point.date, close: point.close, prediction })
            .collect();

        Ok((train, test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_of(values: &[f64]) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        TimeSeries::from_points(
            values.iter().enumerate()
                .map(|(i, &close)| PricePoint {
                    date: start + chrono::Days::new(i as u64),
                    close,
                })
                .collect(),
        ).unwrap()
    }

    #[test]
    fn test_series_sorted_and_unique() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series = TimeSeries::from_points(vec![
            PricePoint { date: d1, close: 2.0 },
            PricePoint { date: d0, close: 1.0 },
        ]).unwrap();
        assert_eq!(series.dates(), vec![d0, d1]);
        assert_eq!(series.latest_date(), Some(d1));

        let dup = TimeSeries::from_points(vec![
            PricePoint { date: d0, close: 1.0 },
            PricePoint { date: d0, close: 3.0 },
        ]);
        assert!(matches!(dup, Err(ForecastError::InvalidParameter(_))));
    }

    #[test]
    fn test_scaling_round_trip() {
        let values = [10.0, 12.5, 11.0, 20.0, 15.25];
        let scaled = fit_scale(&values).unwrap();
        assert_eq!(scaled.values[0], 0.0);
        assert_eq!(scaled.values[3], 1.0);

        let restored = scaled.scaler.inverse_transform(&scaled.values);
        for (a, b) in values.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_scaling_rejects_empty_and_constant() {
        assert!(matches!(fit_scale(&[]), Err(ForecastError::EmptyOrDegenerateSeries(_))));
        assert!(matches!(fit_scale(&[3.0, 3.0, 3.0]), Err(ForecastError::EmptyOrDegenerateSeries(_))));
    }

    #[test]
    fn test_split_boundaries() {
        assert_eq!(split(10, 0.85).unwrap(), 9);
        assert_eq!(split(100, 0.85).unwrap(), 85);
        assert_eq!(split(10, 1.0).unwrap(), 10);
        assert!(matches!(split(10, 0.0), Err(ForecastError::InvalidParameter(_))));
        assert!(matches!(split(10, 1.2), Err(ForecastError::InvalidParameter(_))));
        assert!(matches!(split(10, f64::NAN), Err(ForecastError::InvalidParameter(_))));
        assert!(matches!(split(0, 0.5), Err(ForecastError::EmptyOrDegenerateSeries(_))));
    }

    #[test]
    fn test_window_shapes() {
        let values: Vec<f64> = (0..20).map(|i| i as f64 * 1.5 + 3.0).collect();
        let scaled = fit_scale(&values).unwrap();
        let train_len = split(values.len(), 0.8).unwrap();
        let lookback = 4;

        let data = make_windows(&scaled.values, &values, train_len, lookback).unwrap();
        assert_eq!(data.x_train.dim(), (train_len - lookback, lookback));
        assert_eq!(data.y_train.len(), train_len - lookback);
        assert_eq!(data.x_test.dim(), (values.len() - train_len, lookback));
        assert_eq!(data.y_test.len(), values.len() - train_len);
        assert_eq!(data.last_window.len(), lookback);
    }

    #[test]
    fn test_window_contents() {
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let scaled = fit_scale(&values).unwrap();
        let data = make_windows(&scaled.values, &values, 8, 3).unwrap();

        // First training window and its target
        assert_eq!(data.x_train.row(0).to_vec(), scaled.values.slice(s![0..3]).to_vec());
        assert_eq!(data.y_train[0], scaled.values[3]);
        // First test window crosses the split boundary
        assert_eq!(data.x_test.row(0).to_vec(), scaled.values.slice(s![5..8]).to_vec());
        // Test targets stay in price units
        assert_eq!(data.y_test.to_vec(), vec![8.0, 9.0]);
        assert_eq!(data.last_window.to_vec(), scaled.values.slice(s![7..10]).to_vec());
    }

    #[test]
    fn test_full_ratio_gives_empty_test_set() {
        let values: Vec<f64> = (0..12).map(|i| (i as f64).sin() + 2.0).collect();
        let scaled = fit_scale(&values).unwrap();
        let train_len = split(values.len(), 1.0).unwrap();
        let data = make_windows(&scaled.values, &values, train_len, 3).unwrap();
        assert_eq!(data.x_test.nrows(), 0);
        assert_eq!(data.x_test.ncols(), 3);
        assert!(data.y_test.is_empty());
    }

    #[test]
    fn test_lookback_validation() {
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let scaled = fit_scale(&values).unwrap();
        assert!(matches!(
            make_windows(&scaled.values, &values, 5, 5),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!(matches!(
            make_windows(&scaled.values, &values, 5, 0),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!(matches!(
            make_windows(&scaled.values, &values, 11, 2),
            Err(ForecastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reshape_adds_feature_axis() {
        let x = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let x3 = reshape(&x).unwrap();
        assert_eq!(x3.dim(), (2, 3, 1));
        assert_eq!(x3[[1, 2, 0]], 6.0);
    }

    #[test]
    fn test_preprocess_train_test() {
        let series = series_of(&[5.0, 6.0, 7.0, 6.5, 8.0, 9.0, 8.5, 10.0, 11.0, 10.5]);
        let pre = PreProcess::new(&series, 0.8).unwrap();
        assert_eq!(pre.train_len(), 8);
        assert_eq!(pre.latest_date(), series.latest_date().unwrap());

        let (train, test) = pre.train_test(&Array1::from(vec![10.9, 10.4])).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test[0].close, 11.0);
        assert_eq!(test[1].prediction, 10.4);

        assert!(matches!(
            pre.train_test(&Array1::from(vec![1.0])),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }
}
