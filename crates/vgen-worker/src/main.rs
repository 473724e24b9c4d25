//! Video generation worker binary.
//!
//! Reads seeds (one per line) from a file argument or stdin, runs them as a
//! batch and prints a JSON report.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use vgen_media::{EncoderConfig, FfmpegEncoder};
use vgen_models::{Seed, TaskRequest};
use vgen_store::open_store;
use vgen_worker::logging::init_tracing;
use vgen_worker::metrics::install_prometheus;
use vgen_worker::stages::StyleCatalog;
use vgen_worker::{
    BatchCoordinator, CancelToken, PipelineConfig, ProviderSet, ProviderSettings,
    TaskOrchestrator, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting vgen-worker");

    let worker = WorkerConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    let settings = ProviderSettings::from_env();
    info!("Worker config: {:?}", worker);

    if let Some(addr) = &worker.metrics_addr {
        install_prometheus(addr)?;
    }

    let store = open_store(&worker.store)
        .await
        .with_context(|| format!("opening task store {}", worker.store))?;
    let providers = ProviderSet::from_settings(&settings, &pipeline)?;
    let styles = match &pipeline.style_file {
        Some(path) => StyleCatalog::with_file(path).await?,
        None => StyleCatalog::builtin(),
    };
    info!(
        styles = %styles.names().collect::<Vec<_>>().join(","),
        default = %pipeline.default_style,
        "Style templates loaded"
    );
    let encoder = Arc::new(FfmpegEncoder::new(EncoderConfig {
        timeout: pipeline.encoder_timeout,
        ..EncoderConfig::default()
    }));

    let requests = read_seeds(std::env::args().nth(1))
        .await?
        .into_iter()
        .map(TaskRequest::new)
        .collect::<Vec<_>>();
    if requests.is_empty() {
        anyhow::bail!("no seeds given");
    }

    let shutdown_timeout = worker.shutdown_timeout;
    let orchestrator = Arc::new(
        TaskOrchestrator::new(pipeline, worker, providers, encoder, store).with_styles(styles),
    );
    let coordinator = BatchCoordinator::new(orchestrator);

    let batch_token = CancelToken::new();
    let handle = coordinator.submit_with_token(requests, batch_token.clone());
    info!(
        tasks = handle.task_ids().len(),
        concurrency = coordinator.concurrency(),
        "Batch running"
    );

    // First Ctrl-C cancels; in-flight stages get shutdown_timeout to wind down
    let signal_token = batch_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling batch");
            signal_token.cancel();
            tokio::time::sleep(shutdown_timeout).await;
            warn!("Shutdown timeout elapsed, exiting");
            std::process::exit(130);
        }
    });

    let report = handle.wait().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let counts = report.counts();
    info!(
        done = counts.done,
        failed = counts.failed,
        cancelled = counts.cancelled,
        "Worker shutdown complete"
    );
    if counts.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn read_seeds(path: Option<String>) -> anyhow::Result<Vec<Seed>> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading seeds from {}", path))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("reading seeds from stdin")?;
            text
        }
    };

    Ok(text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(Seed::parse)
        .collect())
}
