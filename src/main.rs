use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossrun_cli::{coverage_adapter, exit_code, load_config, serve, RunConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// crossrun - run test suites against connected browsers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Log output format
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Test file patterns (overrides `include`)
    #[arg(value_name = "PATTERN")]
    include: Vec<String>,

    /// Directory the patterns are relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Address to listen on
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Pause in milliseconds before every queued tool
    #[arg(long)]
    slow: Option<u64>,

    /// Stop at the first failing test
    #[arg(long)]
    bail: bool,

    /// Keep serving and run the suite for every new browser
    #[arg(short, long)]
    watch: bool,

    /// Collect coverage from each browser before it is released
    #[arg(long)]
    coverage: bool,

    /// Page the browsers should open
    #[arg(long)]
    url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(level: &str, debug: bool, format: LogFormat) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    Ok(())
}

/// Flags win over the environment, which wins over the file.
fn apply_flags(config: &mut RunConfig, cli: &Cli) {
    if !cli.include.is_empty() {
        config.include = cli.include.clone();
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(slow) = cli.slow {
        config.slow = slow;
    }
    if let Some(url) = &cli.url {
        config.url = Some(url.clone());
    }
    config.bail |= cli.bail;
    config.watch |= cli.watch;
    config.coverage |= cli.coverage;
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = load_config(cli.config.as_deref()).await?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    apply_flags(&mut config, &cli);
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    let runner = crossrun_cli::test_runner(&config, &cli.root)?;
    let coverage = coverage_adapter(&config)?;
    let reports = serve(config, runner, coverage).await?;

    for report in &reports {
        info!(
            token = %report.token,
            passed = report.passed,
            failed = report.failed,
            "session report"
        );
    }
    Ok(exit_code(&reports))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug, cli.log_format)?;
    info!("Starting crossrun v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("Command failed: {:#}", err);
            std::process::exit(1);
        }
    }
}
