//! violence-registry: HTTP server for the registration form.
//!
//! Configuration is read from the environment (and `.env`); see
//! [`violence_registry::config`] for the variables.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use violence_registry::{
    build_router, AppConfig, AppState, FormSchema, SubmissionService, WritePath,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "violence_registry=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let schema = FormSchema::from_file(&config.schema_path)
        .with_context(|| format!("loading form schema {}", config.schema_path.display()))?;
    info!(
        path = %config.schema_path.display(),
        steps = schema.step_count(),
        "form schema loaded"
    );

    let write_path = WritePath::from_config(&config)?;
    info!(
        mode = config.mode.as_str(),
        backend = write_path.describe(),
        "write path ready"
    );

    let service = SubmissionService::new(Arc::new(schema), config.layout.clone(), write_path);
    let app = build_router(AppState::new(service));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    info!("violence-registry listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
