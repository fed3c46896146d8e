//! Docsift server binary
//!
//! Run with: cargo run -p docsift --bin docsift-server

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsift::{
    config::PipelineConfig,
    server::DocsiftServer,
    shutdown::{ShutdownCoordinator, ShutdownOutcome},
    ProcessingOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsift=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = PipelineConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Max concurrent jobs: {}", config.queue.max_concurrent_jobs);
    tracing::info!(
        "  - Conversion/OCR concurrency: {}/{}",
        config.extraction.conversion_concurrency,
        config.extraction.ocr_concurrency
    );
    tracing::info!("  - Temp dir: {}", config.resources.temp_dir.display());

    let orchestrator = Arc::new(ProcessingOrchestrator::new(&config));

    // Check host tools for the OCR fallback
    let report = orchestrator.engine().dependencies().check_system_dependencies().await;
    match report.missing_message() {
        None => tracing::info!(
            "OCR fallback available (converter: {})",
            report
                .preferred_backend()
                .map(|b| b.to_string())
                .unwrap_or_default()
        ),
        Some(missing) => {
            tracing::warn!("Scanned PDFs and images will fail: {}", missing);
        }
    }

    let resources = Arc::clone(orchestrator.resources());
    let orphans = resources.temp_files().sweep_orphans().await;
    if orphans > 0 {
        tracing::info!("Removed {} leftover temp files", orphans);
    }

    let background = CancellationToken::new();
    let background_tasks = resources.spawn_background(&background);

    let server = DocsiftServer::new(config.clone(), Arc::clone(&orchestrator));
    let state = server.state().clone();
    let http_stop = CancellationToken::new();
    let stop_signal = http_stop.clone();
    let mut http = tokio::spawn(server.serve(async move { stop_signal.cancelled().await }));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        result = &mut http => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited"),
                Ok(Err(e)) => tracing::error!("HTTP server failed: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
            }
        }
    }

    let mut coordinator = ShutdownCoordinator::new(config.shutdown.timeout());

    {
        let orchestrator = Arc::clone(&orchestrator);
        coordinator.register("stop accepting", 0, move || async move {
            state.set_ready(false);
            http_stop.cancel();
            if !http.is_finished() {
                let _ = http.await;
            }
            orchestrator.stop_accepting();
            Ok(())
        });
    }
    {
        let orchestrator = Arc::clone(&orchestrator);
        coordinator.register("cancel extraction", 10, move || async move {
            orchestrator.engine().shutdown();
            // Cancelled jobs settle quickly once their commands are killed
            orchestrator.drain(std::time::Duration::from_secs(5)).await;
            Ok(())
        });
    }
    coordinator.register("stop sweepers", 20, move || async move {
        background.cancel();
        for task in background_tasks {
            let _ = task.await;
        }
        Ok(())
    });
    coordinator.register("final cleanup", 30, move || async move {
        let report = resources.shutdown().await;
        tracing::info!(
            "Removed {} temp artifacts ({} bytes), {} remain",
            report.removed,
            report.bytes_freed,
            report.remaining
        );
        Ok(())
    });

    match coordinator.run().await {
        ShutdownOutcome::Completed { failed } if failed.is_empty() => Ok(()),
        ShutdownOutcome::Completed { failed } => {
            tracing::warn!("Shutdown finished with failed steps: {}", failed.join(", "));
            Ok(())
        }
        ShutdownOutcome::TimedOut { pending } => {
            tracing::error!("Shutdown timed out in {}; exiting", pending);
            std::process::exit(1);
        }
    }
}
