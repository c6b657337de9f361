use tokio::signal;
use tracing_subscriber::EnvFilter;
use warmap_client::surface::HeadlessSurface;
use warmap_client::{ConnectionStatus, EventStreamConsumer, HttpEntityClient, LiveMap, MapConfig, Sources};

const MAP_CONTAINER: &str = "map";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = MapConfig::from_env();
    tracing::info!(
        api = %config.api_base_url,
        stream = %config.stream.url,
        max_retries = ?config.stream.max_retries,
        "Starting warmap client"
    );

    let client = match HttpEntityClient::new(&config.api_base_url, config.http_timeout) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build API client");
            return;
        }
    };
    let consumer = match EventStreamConsumer::new(config.stream.clone()) {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(error = %e, "failed to build stream client");
            return;
        }
    };

    let mut map = LiveMap::new(Sources::http(client), HeadlessSurface::new(), &config);
    match map.start(MAP_CONTAINER).await {
        Ok(report) => tracing::info!(
            nodes = report.nodes_added,
            edges = report.edges_added,
            "Initial map rendered"
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to start live map");
            return;
        }
    }

    let listeners = map.listen(&consumer);
    let mut status = consumer.status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            match current {
                ConnectionStatus::Failed => tracing::error!("event stream gave up reconnecting"),
                other => tracing::info!(status = ?other, "event stream status"),
            }
        }
    });
    consumer.connect();

    map.run(shutdown_signal()).await;

    consumer.disconnect();
    status_task.abort();
    for listener in listeners {
        listener.abort();
    }
    tracing::info!("Client shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
