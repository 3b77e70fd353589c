#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::producer::producer_loop;
use server::service::{RelayService, router};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use wwtkdr_core::directory::MemoryDirectory;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Producer id the demo producer registers under.
const DEMO_PRODUCER: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let directory = MemoryDirectory::with_session_buffer(config.request_buffer_size);
    let service = RelayService::new(Arc::new(directory.clone()), &config);

    if let Some(demo) = config.demo.clone() {
        let producer = directory.spawn(DEMO_PRODUCER);
        tokio::spawn(producer_loop(producer, demo, service.shutdown_token()));
    }

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let app = router(service.clone(), &config.base_url);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting relay on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting relay on http://{}{}wwtkdr/",
            config.server_addr,
            config.base_url
        );
    }
}

async fn shutdown_signal(service: RelayService, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    service.shutdown().await;
    providers.shutdown();
}
