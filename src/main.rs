// # PartGrid Server
//
// Main entry point: builds the service container, initializes all
// subsystems in dependency order, attaches Redis when reachable, and serves
// the HTTP/WebSocket surface until shutdown.

use partgrid::api;
use partgrid::config::Settings;
use partgrid::logging;
use partgrid::services::ServiceContainer;
use partgrid::{Result, VERSION};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    logging::init(&settings)?;

    info!(version = VERSION, "starting PartGrid server");

    let container = ServiceContainer::build(settings.clone())?;
    container.initialize_all().await?;

    // Redis is optional at startup: without it the node runs single-process
    // with the in-memory cache backend.
    match container.attach_redis().await {
        Ok(_listener) => info!("Redis attached: cache backend and chat fan-out active"),
        Err(err) => warn!(error = %err, "Redis unavailable, running with in-memory backends"),
    }

    let app = api::router(container.clone());
    let addr = format!("0.0.0.0:{}", settings.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| partgrid::AppError::Network(format!("cannot bind {}: {}", addr, e)))?;
    info!(addr = %addr, "listening");

    let shutdown_container = container.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    if let Err(err) = serve.await {
        error!(error = %err, "server error");
    }

    shutdown_container.shutdown_all().await;
    info!("shutdown complete");
    Ok(())
}
