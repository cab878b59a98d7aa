mod config;
mod dispatch;
mod push;
mod store;

use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting lamp-notify bridge (store={}, watch={}, tokens={})",
        config.store.base_url, config.store.event_path, config.store.tokens_path,
    );

    // Channel from the watch task to the dispatch loop
    let (change_tx, mut change_rx) = mpsc::channel::<store::LampChange>(100);

    let store_client = store::client::StoreClient::new(&config.store);
    let push_client = push::client::PushClient::new(&config.push);

    let watcher = store_client.clone();
    let watch_handle = tokio::spawn(async move {
        watcher.run(change_tx).await;
    });

    let dispatcher =
        dispatch::Dispatcher::new(store_client, push_client, config.product_name.clone());

    // Main loop: dispatch observed changes + handle shutdown
    loop {
        tokio::select! {
            Some(change) = change_rx.recv() => {
                dispatcher.handle_change(change).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    watch_handle.abort();
    info!("lamp-notify bridge stopped");
}
