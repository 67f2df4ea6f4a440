mod config;
mod dispatcher;
mod mqtt;
mod state;
mod supervisor;
mod wiser;

use std::sync::Arc;

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
        "Starting wiser-to-mqtt bridge (mqtt={}:{}, wiser={}, prefix={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.wiser.host,
        config.mqtt.topic_prefix,
    );

    let api = match wiser::api::WiserClient::new(
        config.api_base_url(),
        config.wiser.token.clone(),
        config.request_timeout(),
    ) {
        Ok(api) => api,
        Err(e) => {
            error!("Failed to create Wiser API client: {}", e);
            std::process::exit(1);
        }
    };

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::client::MqttMessage>(100);
    let (status_tx, status_rx) = mpsc::channel::<wiser::StatusUpdate>(200);

    // MQTT event loop: subscriptions, inbound commands, status publishing
    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, status_rx).await;
    });

    let cache = Arc::new(state::DeviceCache::new());

    // Wiser event stream, restarted forever
    let listener = Arc::new(wiser::listener::EventListener::new(
        config.websocket_url(),
        config.wiser.token.clone(),
        cache.clone(),
    ));
    let policy = config.reconnect_policy();
    let ws_handle = tokio::spawn(async move {
        supervisor::supervise("Wiser event stream", policy, move || {
            let listener = listener.clone();
            let status_tx = status_tx.clone();
            async move { listener.run_session(&status_tx).await }
        })
        .await;
    });

    let dispatcher = dispatcher::Dispatcher::new(api, cache, config.lights_topic());

    // Main loop: dispatch MQTT commands one at a time + handle shutdown
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to register SIGTERM handler");
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                dispatcher.handle(&msg.topic, &msg.payload).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    ws_handle.abort();
    mqtt_handle.abort();
    info!("wiser-to-mqtt bridge stopped");
}
