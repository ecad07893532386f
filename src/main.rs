use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emx_maker::config::{Config, LoggerConfig};
use emx_maker::engine::Engine;

#[derive(Debug, Parser)]
#[command(name = "emx-maker", about = "EMX market-making engine")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

/// The worker guard must stay alive for the file layer to flush.
fn init_logging(cfg: &LoggerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match &cfg.logging_folder {
        Some(folder) => {
            let appender = tracing_appender::rolling::daily(folder, format!("{}.log", cfg.name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config =
        Config::load(&args.config).with_context(|| format!("loading {:?}", args.config))?;
    let _guard = init_logging(&config.logger);

    info!(
        instrument = %config.strategy.instrument_name,
        exchange = %config.adapter.name,
        "configuration loaded"
    );

    let mut engine = Engine::new(config);
    engine.run().await.context("engine stopped with an error")?;

    info!("clean stop");
    Ok(())
}
