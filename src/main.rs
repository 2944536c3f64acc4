//! Tenant Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes client, and runs the Tenant controller and metrics server.

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tenant_operator::{
    config::{LogFormat, OperatorConfig},
    controllers::{tenant_controller, Context},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env()?;

    init_tracing(config.log_format);

    info!("Starting Tenant Operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let context = Context::new(client, config.clone());

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let controller_handle = tokio::spawn(tenant_controller::run(context.clone()));

    tokio::select! {
        _ = controller_handle => {
            error!("Tenant controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    context.shutdown.cancel();

    info!("Tenant Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tenant_operator=debug,kube=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
