use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cormorant::config::Config;
use cormorant::http;
use cormorant::state::App;

const DEFAULT_LOG_FILTER: &str = "cormorant=info,cormorant_storage=info,cormorant_catalog=info";

/// Multi-tenant columnar storage backend.
#[derive(Debug, Parser)]
#[command(name = "cormorant", version)]
struct Args {
    /// Bind address override (otherwise CORMORANT_HOST/CORMORANT_PORT).
    #[arg(long)]
    bind: Option<String>,

    /// Verbose logging to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::from_env();
    let bind = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.host, config.port));

    let app = App::new(config).context("Failed to initialize application state")?;
    let router = http::router(app);

    tracing::info!(%bind, "cormorant listening");
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
