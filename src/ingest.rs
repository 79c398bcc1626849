// projeto: lstmforecast
// file: src/ingest.rs
// OHLCV download from Yahoo Finance, CSV files and store loading

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use crate::neural::data::OhlcvBar;
use crate::neural::model::Forecast;
use crate::neural::storage::PriceStore;
use crate::neural::utils::ForecastError;

pub const DEFAULT_START_DATE: &str = "2015-04-01";
const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Source of daily OHLCV bars for a ticker.
pub trait MarketDataSource {
    fn download(&self, ticker: &str, start: NaiveDate) -> Result<Vec<OhlcvBar>, ForecastError>;
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    adjclose: Vec<Option<f64>>,
}

/// Converts a chart payload into bars. Rows with any missing field are skipped.
pub fn parse_chart(body: &str) -> Result<Vec<OhlcvBar>, ForecastError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| ForecastError::Serialization(format!("Invalid chart response: {}", e)))?;

    if let Some(err) = response.chart.error {
        return Err(ForecastError::InvalidParameter(format!("Market data error [{}]: {}", err.code, err.description)));
    }

    let data = response.chart.result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ForecastError::EmptyOrDegenerateSeries("Chart response has no result".to_string()))?;
    let quote = data.indicators.quote.into_iter().next()
        .ok_or_else(|| ForecastError::EmptyOrDegenerateSeries("Chart response has no quotes".to_string()))?;
    let adjclose = data.indicators.adjclose
        .and_then(|a| a.into_iter().next())
        .map(|a| a.adjclose);

    let mut bars = Vec::with_capacity(data.timestamp.len());
    let mut skipped = 0;
    for (i, &ts) in data.timestamp.iter().enumerate() {
        let field = |col: &Vec<Option<f64>>| col.get(i).copied().flatten();
        let close = field(&quote.close);
        let adj_close = match &adjclose {
            Some(col) => field(col),
            None => close,
        };
        let date = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive());

        match (date, field(&quote.open), field(&quote.high), field(&quote.low), close, adj_close,
               quote.volume.get(i).copied().flatten()) {
            (Some(date), Some(open), Some(high), Some(low), Some(close), Some(adj_close), Some(volume)) => {
                bars.push(OhlcvBar { date, open, high, low, close, adj_close, volume });
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("⚠️ Skipped {} incomplete rows in chart response", skipped);
    }
    Ok(bars)
}

#[derive(Debug, Clone)]
pub struct YahooFinance {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl YahooFinance {
    pub fn new() -> Result<Self, ForecastError> {
        Self::with_base_url(YAHOO_CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ForecastError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; lstmforecast)")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(YahooFinance { base_url: base_url.trim_end_matches('/').to_string(), client })
    }
}

impl MarketDataSource for YahooFinance {
    fn download(&self, ticker: &str, start: NaiveDate) -> Result<Vec<OhlcvBar>, ForecastError> {
        if ticker.trim().is_empty() {
            return Err(ForecastError::InvalidParameter("Ticker must not be empty".to_string()));
        }

        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = Utc::now().timestamp();
        let url = format!("{}/{}", self.base_url, ticker);
        info!("📥 Downloading {} from {} ...", ticker, start);

        let body = self.client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()?
            .error_for_status()?
            .text()?;

        let bars = parse_chart(&body)?;
        if bars.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries(format!("No data returned for {}", ticker)));
        }

        info!("✅ Downloaded {} bars for {}", bars.len(), ticker);
        Ok(bars)
    }
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<OhlcvBar>, ForecastError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let bars = reader.deserialize().collect::<Result<Vec<OhlcvBar>, _>>()?;
    info!("📄 Read {} rows from {}", bars.len(), path.display());
    Ok(bars)
}

pub fn write_csv<P: AsRef<Path>>(path: P, bars: &[OhlcvBar]) -> Result<(), ForecastError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    debug!("📄 Wrote {} rows to {}", bars.len(), path.as_ref().display());
    Ok(())
}

pub fn write_forecast_csv<P: AsRef<Path>>(path: P, forecast: &Forecast) -> Result<(), ForecastError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for point in &forecast.points {
        writer.serialize(point)?;
    }
    writer.flush()?;
    info!("💾 Forecast of {} days written to {}", forecast.len(), path.as_ref().display());
    Ok(())
}

pub fn download_and_push(
    source: &dyn MarketDataSource,
    store: &mut dyn PriceStore,
    ticker: &str,
    start: NaiveDate,
    table: &str,
) -> Result<usize, ForecastError> {
    let bars = source.download(ticker, start)?;
    let rows = store.push(table, &bars)?;
    info!("✅ {} rows of {} stored in '{}'", rows, ticker, table);
    Ok(rows)
}
