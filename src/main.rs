use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aceradio::common::WallClock;
use aceradio::config::Config;
use aceradio::providers::LocalSongStorage;
use aceradio::queue::GenerationQueue;
use aceradio::session::autodj::AutoDjWorker;
use aceradio::session::{RadioLimits, RadioManager};
use aceradio::stream::Broadcaster;
use aceradio::transport::{AppState, http_server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let default_level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let clock = Arc::new(WallClock);

    let (manager, autodj_rx) = RadioManager::new(
        config.radio.settings.clone(),
        config.radio.owner_secret.clone(),
        RadioLimits {
            history: config.radio.history_limit,
            chat: config.radio.chat_limit,
        },
        clock.clone(),
    );

    let gen_queue = GenerationQueue::new(config.generation.clone(), clock.clone());

    AutoDjWorker {
        manager: manager.clone(),
        gen_queue,
        clock: clock.clone(),
    }
    .spawn(autodj_rx);

    let storage = Arc::new(LocalSongStorage::new(config.storage.audio_dir.clone()));
    let poll_interval = Duration::from_millis(config.radio.poll_interval_ms);
    let broadcaster = Broadcaster::new(manager.clone(), storage, poll_interval);
    tokio::spawn(broadcaster.clone().run());

    // Low-water checks also fire on a timer so an idle station still
    // requests filler ahead of the current song's end.
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                manager.poll_auto_dj();
            }
        });
    }

    let address = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let state = Arc::new(AppState {
        manager,
        broadcaster,
    });
    let app = http_server::router(state);

    info!("ACERADIO server listening on {}", address);
    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
