//! Vigil threat-intelligence ingestion server.
//!
//! Serves the HTTP surface in `sx9_threat_ingest::scheduler` for manual
//! bucket/adapter invocation and diagnostics. `--bucket` runs one bucket
//! directly and exits, without starting the HTTP listener.

use std::net::SocketAddr;

use clap::Parser;
use tracing::info;

use sx9_threat_ingest::config::Config;
use sx9_threat_ingest::scheduler::{self, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "sx9-threat-ingest-server")]
#[command(about = "Vigil threat-intelligence ingestion engine")]
#[command(version)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8787)]
    port: u16,

    /// Run one bucket (critical|main|daily|weekly) directly and exit,
    /// instead of starting the HTTP listener.
    #[arg(long)]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("sx9_threat_ingest=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    if let Some(bucket) = args.bucket {
        info!(bucket = %bucket, "running bucket directly");
        let dispatcher = Dispatcher::new(config);
        let results = dispatcher.run_bucket(&bucket).await;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    info!("Starting Vigil threat-intelligence ingestion engine");
    info!("  Port: {}", args.port);

    let dispatcher = Dispatcher::new(config);
    let dispatch_config = Config::from_env()?;

    let app = scheduler::router(dispatcher, dispatch_config);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
