// projeto: lstmforecast
// file: src/pipeline.rs
// Pipeline stages: ingest, explore and run (train → evaluate → forecast)

use log::{error, info, warn};
use postgres::{Client, NoTls};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Instant;
use crate::config::{DataConfig, PipelineConfig};
use crate::eda::{Decomposition, Eda};
use crate::ingest::{self, MarketDataSource, YahooFinance};
use crate::neural::data::{reshape, PreProcess, TestRow, TimeSeries};
use crate::neural::metrics::{ErrorMetrics, MetricsReport};
use crate::neural::model::{Forecast, LstmRegressor, TrainingHistory};
use crate::neural::storage::{PostgresStore, PriceStore, SqliteStore};
use crate::neural::utils::ForecastError;
use crate::plot;

/// Where price tables live. Checked in order: CSV file, SQLite, PostgreSQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Csv(PathBuf),
    Sqlite(PathBuf),
    Postgres(String),
    Download,
}

impl Backend {
    pub fn from_config(data: &DataConfig) -> Self {
        if let Some(path) = &data.csv {
            Backend::Csv(path.clone())
        } else if let Some(path) = &data.sqlite {
            Backend::Sqlite(path.clone())
        } else if let Some(conn) = &data.pg_conn {
            Backend::Postgres(conn.clone())
        } else {
            Backend::Download
        }
    }
}

fn stage<T>(name: &str, result: Result<T, ForecastError>) -> Result<T, ForecastError> {
    if let Err(e) = &result {
        error!("❌ {} stage failed: {}", name, e);
    }
    result
}

/// Downloads bars for the configured ticker and stores them in the configured backend.
pub fn ingest(source: &dyn MarketDataSource, data: &DataConfig) -> Result<usize, ForecastError> {
    let start = stage("ingest", data.start())?;

    let rows = match Backend::from_config(data) {
        Backend::Csv(path) => {
            let bars = stage("ingest", source.download(&data.ticker, start))?;
            stage("ingest", ingest::write_csv(&path, &bars))?;
            info!("✅ {} rows of {} written to {}", bars.len(), data.ticker, path.display());
            bars.len()
        }
        Backend::Sqlite(path) => {
            let conn = stage("ingest", Connection::open(&path).map_err(ForecastError::from))?;
            let mut store = SqliteStore::new(&conn);
            stage("ingest", ingest::download_and_push(source, &mut store, &data.ticker, start, &data.table))?
        }
        Backend::Postgres(conn) => {
            let mut client = stage("ingest", Client::connect(&conn, NoTls).map_err(ForecastError::from))?;
            let mut store = PostgresStore::new(&mut client);
            stage("ingest", ingest::download_and_push(source, &mut store, &data.ticker, start, &data.table))?
        }
        Backend::Download => {
            return stage("ingest", Err(ForecastError::InvalidParameter(
                "No destination configured; pass --csv, --sqlite or --pg-conn".to_string()
            )));
        }
    };
    Ok(rows)
}

/// Closing-price series from the configured backend, downloading when none is set.
pub fn load_series(data: &DataConfig) -> Result<TimeSeries, ForecastError> {
    let result = match Backend::from_config(data) {
        Backend::Csv(path) => ingest::read_csv(&path).and_then(|bars| TimeSeries::from_bars(&bars)),
        Backend::Sqlite(path) => Connection::open(&path)
            .map_err(ForecastError::from)
            .and_then(|conn| SqliteStore::new(&conn).load_series(&data.table)),
        Backend::Postgres(conn) => Client::connect(&conn, NoTls)
            .map_err(ForecastError::from)
            .and_then(|mut client| PostgresStore::new(&mut client).load_series(&data.table)),
        Backend::Download => data.start().and_then(|start| {
            let bars = YahooFinance::new()?.download(&data.ticker, start)?;
            TimeSeries::from_bars(&bars)
        }),
    };

    let series = stage("load", result)?;
    if series.is_empty() {
        return stage("load", Err(ForecastError::EmptyOrDegenerateSeries("Loaded series is empty".to_string())));
    }
    info!("📥 Loaded {} observations ({} .. {})",
          series.len(),
          series.points()[0].date,
          series.points()[series.len() - 1].date);
    Ok(series)
}

#[derive(Debug, Clone)]
pub struct ExploreReport {
    pub summary: String,
    pub decomposition: Option<Decomposition>,
    pub plots: Vec<PathBuf>,
}

/// Stationarity report, decomposition and correlogram charts.
pub fn explore(series: &TimeSeries, config: &PipelineConfig) -> Result<ExploreReport, ForecastError> {
    let eda = if config.eda.log_prices {
        info!("🔎 Exploring log closing prices");
        stage("explore", Eda::on_log_closes(series))?
    } else {
        stage("explore", Eda::new(series))?
    };
    let n = series.len();
    stage("explore", std::fs::create_dir_all(&config.output.dir).map_err(ForecastError::from))?;

    // PACF needs fewer than n/2 lags
    let lags = config.eda.lags.min((n / 2).saturating_sub(1));
    if lags < config.eda.lags {
        warn!("⚠️ Lags reduced from {} to {} for {} observations", config.eda.lags, lags, n);
    }

    let summary = stage("explore", eda.summary(lags))?;
    let mut plots = Vec::new();

    let (acf, pacf) = stage("explore", eda.acf_pacf(lags))?;
    for (name, correlogram) in [("ACF", &acf), ("PACF", &pacf)] {
        let path = config.output.file(&format!("{}.html", name.to_lowercase()));
        stage("explore", plot::correlogram_plot(correlogram, name, &path))?;
        plots.push(path);
    }

    let period = config.eda.period;
    let decomposition = if n >= 2 * period {
        let result = stage("explore", eda.decomposition(config.eda.model, period))?;
        let path = config.output.file("decomposition.html");
        stage("explore", plot::decomposition_plot(&result, &series.dates(), &path))?;
        plots.push(path);
        Some(result)
    } else {
        warn!("⚠️ Decomposition skipped: {} observations, period {} needs at least {}", n, period, 2 * period);
        None
    };

    Ok(ExploreReport { summary, decomposition, plots })
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub history: TrainingHistory,
    pub metrics: Option<MetricsReport>,
    pub train: TimeSeries,
    pub test_rows: Vec<TestRow>,
    pub forecast: Forecast,
    pub model_path: PathBuf,
    pub plot_path: PathBuf,
    pub forecast_csv: PathBuf,
}

/// Preprocess, train, save, evaluate on the test partition, forecast and chart.
pub fn run(series: &TimeSeries, config: &PipelineConfig) -> Result<RunReport, ForecastError> {
    let training = &config.training;
    let start_time = Instant::now();

    let pre = stage("preprocess", PreProcess::new(series, training.split_ratio))?;
    let windows = stage("preprocess", pre.tt_split(training.lookback))?;
    let x_train = stage("preprocess", reshape(&windows.x_train))?;
    let x_test = stage("preprocess", reshape(&windows.x_test))?;

    let mut model = stage("train", LstmRegressor::new(config.network()))?;
    let history = stage("train", model.train(
        &x_train,
        &windows.y_train,
        training.batch_size,
        training.epochs,
        config.compile_options(),
    ))?;

    stage("save", model.save(&config.model.path))?;
    info!("💾 Model saved to {}", config.model.path.display());

    let predictions = stage("predict", model.predict(&x_test, pre.scaler()))?;

    let metrics = if windows.y_test.is_empty() {
        warn!("⚠️ Test partition is empty; evaluation skipped");
        None
    } else {
        let actual = windows.y_test.to_vec();
        let predicted = predictions.to_vec();
        Some(stage("evaluate", ErrorMetrics::new(&actual, &predicted))?.all())
    };

    let forecast = stage("forecast", model.forecast(
        windows.last_window.view(),
        pre.scaler(),
        training.forecast_days,
        pre.latest_date(),
    ))?;

    let (train, test_rows) = stage("plot", pre.train_test(&predictions))?;
    stage("plot", std::fs::create_dir_all(&config.output.dir).map_err(ForecastError::from))?;
    let forecast_csv = config.output.file(&config.output.forecast_csv);
    let plot_path = config.output.file(&config.output.plot);
    stage("plot", ingest::write_forecast_csv(&forecast_csv, &forecast))?;
    stage("plot", plot::ts_plot(&train, &test_rows, &forecast, &plot_path))?;
    stage("plot", plot::loss_plot(&history, config.output.file(&config.output.loss_plot)))?;

    info!("🏁 Pipeline finished in {:.2?}", start_time.elapsed());
    info!("   ├── Final loss: {:.6}", history.final_loss().unwrap_or(f64::NAN));
    info!("   ├── Test rows: {}", test_rows.len());
    info!("   └── Forecast: {} days from {}", forecast.len(), pre.latest_date());

    Ok(RunReport {
        history,
        metrics,
        train,
        test_rows,
        forecast,
        model_path: config.model.path.clone(),
        plot_path,
        forecast_csv,
    })
}
