// Runs the integrity harness against a file until it fails, hits the iteration ceiling,
// or gets Ctrl-C. Exits non-zero on failure.
//
//   RUST_LOG=info cargo run --release --example probe -- /path/to/bigfile

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use streamcheck::{ContentCheck, HarnessOpts, StreamIntegrityHarness};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// File to stream repeatedly.
    path: PathBuf,

    #[arg(long, default_value_t = streamcheck::DEFAULT_MAX_ITERATIONS)]
    max_iterations: u64,

    #[arg(long, default_value_t = streamcheck::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Fail if a single chunk takes longer than this many milliseconds.
    #[arg(long)]
    chunk_timeout_ms: Option<u64>,

    /// Fail if a whole iteration takes longer than this many milliseconds.
    #[arg(long)]
    iteration_timeout_ms: Option<u64>,

    /// Also compare a BLAKE3 digest of every iteration with the first one.
    #[arg(long)]
    digest: bool,

    /// Serve prometheus metrics on this address.
    #[arg(long)]
    prometheus: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    if let Some(addr) = args.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install prometheus recorder/exporter")?;
    }

    let opts = HarnessOpts {
        chunk_size: Some(args.chunk_size),
        max_iterations: Some(
            NonZeroU64::new(args.max_iterations).context("max_iterations must be positive")?,
        ),
        chunk_timeout: args.chunk_timeout_ms.map(Duration::from_millis),
        iteration_timeout: args.iteration_timeout_ms.map(Duration::from_millis),
        content_check: if args.digest {
            ContentCheck::Digest
        } else {
            ContentCheck::LengthOnly
        },
        ..Default::default()
    };

    let token = opts.cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping the run");
            token.cancel();
        }
    });

    let harness = StreamIntegrityHarness::new(opts).context("invalid options")?;
    let report = harness
        .run(&args.path)
        .await
        .with_context(|| format!("test failed on {:?}", args.path))?;

    info!(
        iterations = report.iterations_succeeded,
        bytes = report.bytes_verified,
        outcome = ?report.outcome,
        "done"
    );
    Ok(())
}
