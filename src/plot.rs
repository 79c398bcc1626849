// projeto: lstmforecast
// file: src/plot.rs
// HTML charts: price curves, loss history, decomposition and correlograms

use log::info;
use plotly::common::{Mode, Title};
use plotly::layout::Axis;
use plotly::{Layout, Plot, Scatter};
use std::path::Path;
use chrono::NaiveDate;
use crate::eda::{Correlogram, Decomposition};
use crate::neural::data::{TestRow, TimeSeries};
use crate::neural::model::{Forecast, TrainingHistory};
use crate::neural::utils::ForecastError;

fn date_labels<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>) -> Vec<String> {
    dates.into_iter().map(|d| d.to_string()).collect()
}

fn line(x: Vec<String>, y: Vec<f64>, name: &str) -> Box<Scatter<String, f64>> {
    Scatter::new(x, y).name(name).mode(Mode::Lines)
}

fn layout(title: &str, x_title: &str, y_title: &str) -> Layout {
    Layout::new()
        .title(Title::with_text(title))
        .x_axis(Axis::new().title(Title::with_text(x_title)))
        .y_axis(Axis::new().title(Title::with_text(y_title)))
}

fn write(plot: &Plot, path: &Path) -> Result<(), ForecastError> {
    std::fs::write(path, plot.to_html())?;
    info!("🖼️ Chart written to {}", path.display());
    Ok(())
}

/// Training closes, actual and predicted test closes, and the forecast.
pub fn ts_plot<P: AsRef<Path>>(
    train: &TimeSeries,
    test_rows: &[TestRow],
    forecast: &Forecast,
    path: P,
) -> Result<(), ForecastError> {
    let mut plot = Plot::new();

    let train_dates = train.dates();
    plot.add_trace(line(date_labels(&train_dates), train.closes(), "Training"));

    let test_dates = date_labels(test_rows.iter().map(|r| &r.date));
    plot.add_trace(line(test_dates.clone(), test_rows.iter().map(|r| r.close).collect(), "Actual"));
    plot.add_trace(line(test_dates, test_rows.iter().map(|r| r.prediction).collect(), "Predicted"));

    let forecast_dates = date_labels(forecast.points.iter().map(|p| &p.date));
    plot.add_trace(line(forecast_dates, forecast.values(), "Forecast"));

    plot.set_layout(layout("Model", "Date", "Close Price"));
    write(&plot, path.as_ref())
}

pub fn loss_plot<P: AsRef<Path>>(history: &TrainingHistory, path: P) -> Result<(), ForecastError> {
    let mut plot = Plot::new();
    let epochs: Vec<String> = (1..=history.loss.len()).map(|e| e.to_string()).collect();
    plot.add_trace(line(epochs, history.loss.clone(), "Training Loss"));
    plot.set_layout(layout("LSTM Training Loss", "Epoch", "MSE"));
    write(&plot, path.as_ref())
}

pub fn decomposition_plot<P: AsRef<Path>>(
    decomposition: &Decomposition,
    dates: &[NaiveDate],
    path: P,
) -> Result<(), ForecastError> {
    if dates.len() != decomposition.observed.len() {
        return Err(ForecastError::shape(
            format!("{} dates", decomposition.observed.len()),
            format!("{} dates", dates.len()),
        ));
    }

    let x = date_labels(dates);
    let mut plot = Plot::new();
    plot.add_trace(line(x.clone(), decomposition.observed.to_vec(), "Observed"));
    plot.add_trace(line(x.clone(), decomposition.trend.to_vec(), "Trend"));
    plot.add_trace(line(x.clone(), decomposition.seasonal.to_vec(), "Seasonal"));
    plot.add_trace(line(x, decomposition.residual.to_vec(), "Residual"));

    let title = format!("Decomposition ({}, period {})", decomposition.model, decomposition.period);
    plot.set_layout(layout(&title, "Date", "Close"));
    write(&plot, path.as_ref())
}

/// Correlation stems as markers with their confidence bands.
pub fn correlogram_plot<P: AsRef<Path>>(
    correlogram: &Correlogram,
    title: &str,
    path: P,
) -> Result<(), ForecastError> {
    let lags: Vec<String> = (0..correlogram.values.len()).map(|k| k.to_string()).collect();
    let mut plot = Plot::new();

    plot.add_trace(
        Scatter::new(lags.clone(), correlogram.values.clone())
            .name(title)
            .mode(Mode::Markers),
    );
    plot.add_trace(line(lags.clone(), correlogram.confint.iter().map(|b| b.0).collect(), "Lower 95%"));
    plot.add_trace(line(lags, correlogram.confint.iter().map(|b| b.1).collect(), "Upper 95%"));

    plot.set_layout(layout(title, "Lag", "Correlation"));
    write(&plot, path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eda::acf;
    use crate::neural::data::PricePoint;
    use crate::neural::model::ForecastPoint;
    use chrono::Days;

    #[test]
    fn test_ts_plot_writes_all_curves() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let train = TimeSeries::from_points(
            (0..5).map(|i| PricePoint { date: start + Days::new(i), close: 10.0 + i as f64 }).collect(),
        ).unwrap();
        let test_rows = vec![
            TestRow { date: start + Days::new(5), close: 15.0, prediction: 14.8 },
            TestRow { date: start + Days::new(6), close: 16.0, prediction: 15.7 },
        ];
        let forecast = Forecast {
            points: vec![ForecastPoint { date: start + Days::new(7), predicted_close: 16.4 }],
        };

        let path = std::env::temp_dir().join(format!("lstmforecast_plot_{}.html", std::process::id()));
        ts_plot(&train, &test_rows, &forecast, &path).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        for name in ["Training", "Actual", "Predicted", "Forecast", "Close Price"] {
            assert!(html.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_correlogram_and_loss_plots() {
        let values: Vec<f64> = (0..50).map(|i| (i as f64 * 0.4).sin()).collect();
        let correlogram = acf(&values, 10).unwrap();
        let dir = std::env::temp_dir();
        let acf_path = dir.join(format!("lstmforecast_acf_{}.html", std::process::id()));
        correlogram_plot(&correlogram, "ACF", &acf_path).unwrap();
        assert!(std::fs::read_to_string(&acf_path).unwrap().contains("Upper 95%"));
        std::fs::remove_file(&acf_path).ok();

        let history = TrainingHistory { loss: vec![0.5, 0.2, 0.1] };
        let loss_path = dir.join(format!("lstmforecast_loss_{}.html", std::process::id()));
        loss_plot(&history, &loss_path).unwrap();
        assert!(std::fs::read_to_string(&loss_path).unwrap().contains("Training Loss"));
        std::fs::remove_file(&loss_path).ok();
    }
}
