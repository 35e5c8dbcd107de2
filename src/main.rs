use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use tokio::sync::watch;

use shockosc::chatbox::Chatbox;
use shockosc::config::{Config, ConfigStore};
use shockosc::engine::Engine;
use shockosc::live::{LiveControlManager, LoggingControlApi};
use shockosc::osc::transport::OscTransport;
use shockosc::oscquery::discovery::OscQueryService;
use shockosc::oscquery::server::QueryServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config_path = env::var("SHOCKOSC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("shockosc.json"));
    let config = load_config(&config_path);
    let store = ConfigStore::new(config);
    {
        let path = config_path.clone();
        store.set_saver(Box::new(move |config| {
            match serde_json::to_string_pretty(config) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&path, json) {
                        warn!("failed to write {}: {e}", path.display());
                    }
                }
                Err(e) => warn!("failed to serialize config: {e}"),
            }
        }));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transport = OscTransport::new(Arc::clone(&store))
        .await
        .map_err(std::io::Error::other)?;

    let service_name = store.read().await.osc.service_name.clone();
    let query_server = QueryServer::spawn(service_name.clone(), transport.local_port())
        .await
        .map_err(std::io::Error::other)?;

    let discovery = match OscQueryService::start(
        &service_name,
        transport.local_port(),
        query_server.port,
    ) {
        Ok((service, events)) => match service.spawn_loops(shutdown_rx.clone()) {
            Ok(_handles) => Some((service, events)),
            Err(e) => {
                warn!("discovery loops failed to start: {e}");
                None
            }
        },
        Err(e) => {
            warn!("mDNS discovery unavailable: {e}");
            None
        }
    };

    // Headless dry run: commands and frames are logged instead of hitting a
    // remote API. Embedders inject their own ControlApi here.
    let live = LiveControlManager::new(Arc::new(LoggingControlApi), shutdown_rx);
    let chatbox = Chatbox::new(Arc::clone(&store), Arc::clone(&transport));
    let engine = Engine::new(store, transport, live, chatbox, shutdown_tx);

    let (discovery_service, wiring) = match discovery {
        Some((service, events)) => {
            let refetch = service.refetch_handle();
            (Some(service), Some((events, refetch)))
        }
        None => (None, None),
    };
    engine.start(wiring).await;
    info!("running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.shutdown().await;
    if let Some(service) = discovery_service {
        service.stop();
    }
    query_server.stop().await;
    Ok(())
}

fn load_config(path: &PathBuf) -> Config {
    match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(config) => {
                info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("invalid config in {}: {e}; using defaults", path.display());
                Config::default()
            }
        },
        Err(_) => {
            info!("no config at {}, using defaults", path.display());
            Config::default()
        }
    }
}
