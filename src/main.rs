// projeto: lstmforecast
// file: src/main.rs
// Command-line entry point: ingest, explore and run the forecasting pipeline

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use lstmforecast::config::{Overrides, PipelineConfig};
use lstmforecast::ingest::YahooFinance;
use lstmforecast::neural::utils::ForecastError;
use lstmforecast::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "lstm-forecast",
    version,
    about = "Previsão de preços de fechamento com LSTM empilhada",
    long_about = "Baixa cotações históricas, executa análise exploratória, treina uma rede LSTM sobre janelas de preços normalizados e gera uma previsão autorregressiva."
)]
struct Cli {
    /// Modo verboso de logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Arquivo de configuração TOML
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Baixa cotações e grava no destino configurado
    Ingest(DataArgs),
    /// Decomposição, ACF/PACF e teste ADF sobre os fechamentos
    Explore {
        #[command(flatten)]
        data: DataArgs,

        /// Número de lags do correlograma
        #[arg(long)]
        lags: Option<usize>,

        /// Período sazonal da decomposição
        #[arg(long)]
        period: Option<usize>,

        /// Diretório dos gráficos gerados
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Analisa o logaritmo dos fechamentos
        #[arg(long)]
        log_prices: bool,
    },
    /// Treina, avalia, salva o modelo e gera a previsão
    Run {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        training: RunArgs,
    },
}

#[derive(Args, Debug, Default)]
struct DataArgs {
    /// Ticker do ativo (ex: IOC.NS, AAPL)
    #[arg(long)]
    ticker: Option<String>,

    /// Data inicial do download (AAAA-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Tabela SQL com as cotações
    #[arg(long)]
    table: Option<String>,

    /// Arquivo CSV com as cotações
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Banco SQLite com as cotações
    #[arg(long)]
    sqlite: Option<PathBuf>,

    /// String de conexão PostgreSQL
    #[arg(long)]
    pg_conn: Option<String>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Número de épocas de treinamento
    #[arg(long)]
    epochs: Option<usize>,

    /// Tamanho da janela de entrada (dias)
    #[arg(long)]
    lookback: Option<usize>,

    /// Tamanho do lote para treinamento
    #[arg(long)]
    batch_size: Option<usize>,

    /// Proporção dos dados para treinamento
    #[arg(long)]
    split: Option<f64>,

    /// Taxa de aprendizado do Adam
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Dias a prever após a última data
    #[arg(long)]
    forecast_days: Option<usize>,

    /// Semente para inicialização e embaralhamento
    #[arg(long)]
    seed: Option<u64>,

    /// Caminho do arquivo do modelo
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Diretório do CSV de previsão e dos gráficos
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl DataArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            ticker: self.ticker,
            start_date: self.start,
            table: self.table,
            csv: self.csv,
            sqlite: self.sqlite,
            pg_conn: self.pg_conn,
            ..Overrides::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    if let Err(e) = execute(cli) {
        error!("❌ Pipeline aborted: {}", e);
        std::process::exit(1);
    }
    info!("✅ Done in {:.2?}", start_time.elapsed());
}

fn execute(cli: Cli) -> Result<(), ForecastError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Ingest(data) => {
            config.apply(data.into_overrides());
            info!("📥 Ingesting {} from {}", config.data.ticker, config.data.start_date);
            let source = YahooFinance::new()?;
            let rows = pipeline::ingest(&source, &config.data)?;
            info!("📦 {} rows ingested", rows);
        }
        Command::Explore { data, lags, period, output_dir, log_prices } => {
            config.apply(Overrides {
                lags,
                period,
                output_dir,
                log_prices: log_prices.then_some(true),
                ..data.into_overrides()
            });
            let series = pipeline::load_series(&config.data)?;
            let report = pipeline::explore(&series, &config)?;
            println!("{}", report.summary);
            info!("🖼️ {} charts written to {}", report.plots.len(), config.output.dir.display());
        }
        Command::Run { data, training } => {
            config.apply(Overrides {
                split_ratio: training.split,
                lookback: training.lookback,
                batch_size: training.batch_size,
                epochs: training.epochs,
                learning_rate: training.learning_rate,
                forecast_days: training.forecast_days,
                seed: training.seed,
                model_path: training.model_path,
                output_dir: training.output_dir,
                ..data.into_overrides()
            });
            log_run_config(&config);

            let series = pipeline::load_series(&config.data)?;
            let report = pipeline::run(&series, &config)?;
            info!("📁 Outputs:");
            info!("   ├── Model: {}", report.model_path.display());
            info!("   ├── Forecast: {}", report.forecast_csv.display());
            info!("   └── Chart: {}", report.plot_path.display());
        }
    }
    Ok(())
}

fn log_run_config(config: &PipelineConfig) {
    let t = &config.training;
    info!("🚀 LSTM forecast for {}", config.data.ticker);
    info!("   ├── Network: LSTM{:?} → Dense({}) → Dense(1)", config.model.lstm_units, config.model.dense_units);
    info!("   ├── Lookback: {} days, split ratio: {}", t.lookback, t.split_ratio);
    info!("   ├── Epochs: {}, batch size: {}, learning rate: {}", t.epochs, t.batch_size, t.learning_rate);
    info!("   └── Forecast horizon: {} days", t.forecast_days);
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
