//! `relay-worker` -- ComfyUI job runner.
//!
//! Reads job documents from stdin, one JSON document per line, runs each
//! through ComfyUI, and writes one result document per line to stdout.
//! Logs go to stderr. See [`WorkerConfig::from_env`] for settings.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::readiness::ReadinessGate;
use relay_worker::config::WorkerConfig;
use relay_worker::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=info,relay_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        output_dir = %config.output_dir.display(),
        "Starting relay-worker",
    );

    let api = ComfyUIApi::new(config.api_url.clone()).with_timeouts(config.request_timeouts);
    let gate = Arc::new(ReadinessGate::default());
    let orchestrator = Orchestrator::new(&config, Arc::new(api), gate);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let result = orchestrator.handle(&line).await;
        let mut json = match serde_json::to_string(&result) {
            Ok(json) => json,
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        };
        json.push('\n');
        stdout.write_all(json.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("Input closed, exiting");
    Ok(())
}
