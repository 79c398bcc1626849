// projeto: lstmforecast
// file: src/neural/storage.rs
// Model artifact persistence (bincode) and price tables in SQLite / PostgreSQL

use log::{debug, info};
use postgres::Client;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use crate::neural::data::{OhlcvBar, TimeSeries};
use crate::neural::model::{NetworkConfig, NetworkWeights};
use crate::neural::utils::ForecastError;

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub config: NetworkConfig,
    pub timesteps: usize,
    pub weights: NetworkWeights,
    pub epochs_trained: usize,
    pub saved_at: String,
}

pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<(), ForecastError> {
    info!("💾 [Storage] Saving model artifact to {}", path.display());

    let mut writer = BufWriter::new(File::create(path)?);
    let bytes = bincode::serde::encode_into_std_write(artifact, &mut writer, bincode::config::standard())
        .map_err(|e| ForecastError::Serialization(format!("Failed to encode model artifact: {}", e)))?;
    writer.flush()?;

    debug!("💾 [Storage] Wrote {} bytes", bytes);
    Ok(())
}

pub fn load_artifact(path: &Path) -> Result<ModelArtifact, ForecastError> {
    info!("📂 [Storage] Loading model artifact from {}", path.display());

    let not_found = |reason: String| ForecastError::ArtifactNotFound {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| not_found(e.to_string()))?;
    let mut reader = BufReader::new(file);
    let artifact: ModelArtifact = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
        .map_err(|e| not_found(format!("corrupt artifact: {}", e)))?;

    if artifact.format_version != ARTIFACT_VERSION {
        return Err(not_found(format!(
            "unsupported format version {} (expected {})",
            artifact.format_version, ARTIFACT_VERSION
        )));
    }
    if artifact.timesteps == 0 {
        return Err(not_found("artifact has zero timesteps".to_string()));
    }
    check_weight_shapes(&artifact.config, &artifact.weights)
        .map_err(|reason| not_found(format!("weights do not match configuration: {}", reason)))?;

    Ok(artifact)
}

fn expect_dims(name: &str, actual: (usize, usize), expected: (usize, usize)) -> Result<(), String> {
    if actual != expected {
        return Err(format!("{} is {:?}, expected {:?}", name, actual, expected));
    }
    Ok(())
}

/// Every matrix and bias must fit the LSTM stack and dense head described by `config`.
fn check_weight_shapes(config: &NetworkConfig, weights: &NetworkWeights) -> Result<(), String> {
    if weights.lstm_layers.len() != config.lstm_units.len() {
        return Err(format!("{} LSTM layers for {} configured",
                           weights.lstm_layers.len(), config.lstm_units.len()));
    }

    let mut input_size = 1;
    for (k, (layer, &units)) in weights.lstm_layers.iter().zip(&config.lstm_units).enumerate() {
        let input = [("w_ii", &layer.w_ii), ("w_if", &layer.w_if), ("w_ig", &layer.w_ig), ("w_io", &layer.w_io)];
        for (name, m) in input {
            expect_dims(&format!("lstm{}.{}", k, name), m.dim(), (units, input_size))?;
        }
        let hidden = [("w_hi", &layer.w_hi), ("w_hf", &layer.w_hf), ("w_hg", &layer.w_hg), ("w_ho", &layer.w_ho)];
        for (name, m) in hidden {
            expect_dims(&format!("lstm{}.{}", k, name), m.dim(), (units, units))?;
        }
        let biases = [("b_i", &layer.b_i), ("b_f", &layer.b_f), ("b_g", &layer.b_g), ("b_o", &layer.b_o)];
        for (name, b) in biases {
            expect_dims(&format!("lstm{}.{}", k, name), (b.len(), 1), (units, 1))?;
        }
        input_size = units;
    }

    if weights.dense_layers.len() != 2 {
        return Err(format!("{} dense layers, expected 2", weights.dense_layers.len()));
    }
    let expected = [(config.dense_units, input_size), (1, config.dense_units)];
    for (k, (layer, dims)) in weights.dense_layers.iter().zip(expected).enumerate() {
        expect_dims(&format!("dense{}.w", k), layer.w.dim(), dims)?;
        expect_dims(&format!("dense{}.b", k), (layer.b.len(), 1), (dims.0, 1))?;
    }
    Ok(())
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted.
pub fn validate_table_name(table: &str) -> Result<(), ForecastError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    };

    if !valid {
        return Err(ForecastError::InvalidParameter(format!("Invalid table name '{}'", table)));
    }
    Ok(())
}

/// Relational store for OHLCV tables. `push` replaces the table contents.
pub trait PriceStore {
    fn push(&mut self, table: &str, bars: &[OhlcvBar]) -> Result<usize, ForecastError>;

    fn load_bars(&mut self, table: &str) -> Result<Vec<OhlcvBar>, ForecastError>;

    fn load_series(&mut self, table: &str) -> Result<TimeSeries, ForecastError> {
        let bars = self.load_bars(table)?;
        if bars.is_empty() {
            return Err(ForecastError::EmptyOrDegenerateSeries(format!("Table '{}' has no rows", table)));
        }
        TimeSeries::from_bars(&bars)
    }
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }
}

impl PriceStore for SqliteStore<'_> {
    fn push(&mut self, table: &str, bars: &[OhlcvBar]) -> Result<usize, ForecastError> {
        validate_table_name(table)?;
        info!("💾 [Storage] Writing {} rows to SQLite table '{}'", bars.len(), table);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                date TEXT PRIMARY KEY,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                adj_close REAL NOT NULL,
                volume INTEGER NOT NULL
             );"
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} (date, open, high, low, close, adj_close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))?;
            for bar in bars {
                stmt.execute(params![bar.date, bar.open, bar.high, bar.low, bar.close, bar.adj_close, bar.volume])?;
            }
        }
        tx.commit()?;

        Ok(bars.len())
    }

    fn load_bars(&mut self, table: &str) -> Result<Vec<OhlcvBar>, ForecastError> {
        validate_table_name(table)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT date, open, high, low, close, adj_close, volume FROM {table} ORDER BY date"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(OhlcvBar {
                date: row.get(0)?,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                adj_close: row.get(5)?,
                volume: row.get(6)?,
            })
        })?;

        let bars = rows.collect::<Result<Vec<_>, _>>()?;
        debug!("📂 [Storage] Read {} rows from SQLite table '{}'", bars.len(), table);
        Ok(bars)
    }
}

pub struct PostgresStore<'c> {
    client: &'c mut Client,
}

impl<'c> PostgresStore<'c> {
    pub fn new(client: &'c mut Client) -> Self {
        PostgresStore { client }
    }
}

impl PriceStore for PostgresStore<'_> {
    fn push(&mut self, table: &str, bars: &[OhlcvBar]) -> Result<usize, ForecastError> {
        validate_table_name(table)?;
        info!("💾 [Storage] Writing {} rows to PostgreSQL table '{}'", bars.len(), table);

        let mut transaction = self.client.transaction()?;
        transaction.batch_execute(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                date DATE PRIMARY KEY,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                adj_close DOUBLE PRECISION NOT NULL,
                volume BIGINT NOT NULL
             );"
        ))?;

        let insert = transaction.prepare(&format!(
            "INSERT INTO {table} (date, open, high, low, close, adj_close, volume)
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))?;
        for bar in bars {
            transaction.execute(
                &insert,
                &[&bar.date, &bar.open, &bar.high, &bar.low, &bar.close, &bar.adj_close, &bar.volume],
            )?;
        }
        transaction.commit()?;

        Ok(bars.len())
    }

    fn load_bars(&mut self, table: &str) -> Result<Vec<OhlcvBar>, ForecastError> {
        validate_table_name(table)?;

        let rows = self.client.query(
            &format!("SELECT date, open, high, low, close, adj_close, volume FROM {table} ORDER BY date"),
            &[],
        )?;

        let bars: Vec<OhlcvBar> = rows.iter()
            .map(|row| OhlcvBar {
                date: row.get("date"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                adj_close: row.get("adj_close"),
                volume: row.get("volume"),
            })
            .collect();

        debug!("📂 [Storage] Read {} rows from PostgreSQL table '{}'", bars.len(), table);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn bar(day: u32, close: f64) -> OhlcvBar {
        OhlcvBar {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            adj_close: close,
            volume: 1_000 * day as i64,
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("aapl").is_ok());
        assert!(validate_table_name("_prices_2024").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1abc").is_err());
        assert!(validate_table_name("aapl; DROP TABLE x").is_err());
        assert!(validate_table_name("bad-name").is_err());
    }

    #[test]
    fn test_sqlite_push_and_load() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        let bars = vec![bar(5, 101.0), bar(4, 100.0), bar(6, 99.5)];

        assert_eq!(store.push("aapl", &bars).unwrap(), 3);
        let loaded = store.load_bars("aapl").unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0], bar(4, 100.0));

        let series = store.load_series("aapl").unwrap();
        assert_eq!(series.closes(), vec![100.0, 101.0, 99.5]);
    }

    #[test]
    fn test_sqlite_push_replaces_table() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        store.push("prices", &[bar(1, 10.0), bar(2, 11.0)]).unwrap();
        store.push("prices", &[bar(3, 12.0)]).unwrap();

        let loaded = store.load_bars("prices").unwrap();
        assert_eq!(loaded, vec![bar(3, 12.0)]);
    }

    #[test]
    fn test_sqlite_empty_table() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        store.push("empty", &[]).unwrap();
        assert!(matches!(store.load_series("empty"), Err(ForecastError::EmptyOrDegenerateSeries(_))));
        assert!(matches!(store.load_bars("no such"), Err(ForecastError::InvalidParameter(_))));
    }

    #[test]
    fn test_artifact_round_trip() {
        let config = NetworkConfig { lstm_units: vec![3], dense_units: 2, seed: Some(1) };
        let mut rng = StdRng::seed_from_u64(1);
        let artifact = ModelArtifact {
            format_version: ARTIFACT_VERSION,
            weights: NetworkWeights::init(&config, &mut rng).unwrap(),
            config,
            timesteps: 4,
            epochs_trained: 7,
            saved_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        let path = std::env::temp_dir().join(format!("lstmforecast_artifact_{}.bin", std::process::id()));
        save_artifact(&artifact, &path).unwrap();
        let loaded = load_artifact(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_mismatched_weights_rejected_at_load() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = NetworkConfig { lstm_units: vec![4], dense_units: 2, seed: Some(3) };
        let other = NetworkConfig { lstm_units: vec![3], dense_units: 2, seed: Some(3) };
        let mut weights = NetworkWeights::init(&config, &mut rng).unwrap();
        weights.dense_layers = NetworkWeights::init(&other, &mut rng).unwrap().dense_layers;

        let artifact = ModelArtifact {
            format_version: ARTIFACT_VERSION,
            config,
            timesteps: 5,
            weights,
            epochs_trained: 1,
            saved_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        let path = std::env::temp_dir().join(format!("lstmforecast_mismatch_{}.bin", std::process::id()));
        save_artifact(&artifact, &path).unwrap();
        let result = load_artifact(&path);
        std::fs::remove_file(&path).ok();

        match result {
            Err(ForecastError::ArtifactNotFound { reason, .. }) => assert!(reason.contains("dense0.w"), "{}", reason),
            other => panic!("expected ArtifactNotFound, got {:?}", other.map(|a| a.timesteps)),
        }
    }

    #[test]
    fn test_first_layer_input_size_checked() {
        let mut rng = StdRng::seed_from_u64(4);
        let config = NetworkConfig { lstm_units: vec![3, 2], dense_units: 2, seed: Some(4) };
        let mut weights = NetworkWeights::init(&config, &mut rng).unwrap();
        assert!(check_weight_shapes(&config, &weights).is_ok());

        weights.lstm_layers[0].w_if = ndarray::Array2::zeros((3, 2));
        let err = check_weight_shapes(&config, &weights).unwrap_err();
        assert!(err.contains("lstm0.w_if"), "{}", err);

        weights.lstm_layers.pop();
        assert!(check_weight_shapes(&config, &weights).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_reports_failed_final_write() {
        let config = NetworkConfig { lstm_units: vec![2], dense_units: 2, seed: Some(5) };
        let mut rng = StdRng::seed_from_u64(5);
        let artifact = ModelArtifact {
            format_version: ARTIFACT_VERSION,
            weights: NetworkWeights::init(&config, &mut rng).unwrap(),
            config,
            timesteps: 3,
            epochs_trained: 1,
            saved_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        // Small enough to stay buffered until the flush; /dev/full rejects it with ENOSPC
        let result = save_artifact(&artifact, Path::new("/dev/full"));
        assert!(matches!(result, Err(ForecastError::Io(_))));
    }

    #[test]
    fn test_missing_and_corrupt_artifact() {
        let missing = std::env::temp_dir().join("lstmforecast_does_not_exist.bin");
        assert!(matches!(load_artifact(&missing), Err(ForecastError::ArtifactNotFound { .. })));

        let corrupt = std::env::temp_dir().join(format!("lstmforecast_corrupt_{}.bin", std::process::id()));
        std::fs::write(&corrupt, b"not a model").unwrap();
        let result = load_artifact(&corrupt);
        std::fs::remove_file(&corrupt).ok();
        assert!(matches!(result, Err(ForecastError::ArtifactNotFound { .. })));
    }
}
