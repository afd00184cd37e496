use slugline::{
    api::{self, AppState},
    config,
    url_service::url_service_capsule,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let (url_service, url_host, addr) = container.read((
        url_service_capsule,
        config::url_host_capsule,
        config::addr_capsule,
    ));
    let app = api::router(AppState {
        url_service,
        url_host: url_host.clone(),
    });

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, host = %url_host, "Started listening on TCP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(?err, "Failed to listen for shutdown signal");
    }
}
