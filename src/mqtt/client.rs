use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::wiser::StatusUpdate;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(60));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // LWT: bridge goes "offline" when the broker loses us.
        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the command topics on every
    /// connect, forwards incoming publishes through `command_tx`, and
    /// publishes the status updates received from `status_rx` as retained
    /// messages.
    ///
    /// Requests are queued with `try_*` so a full request queue during a
    /// broker outage drops messages instead of stalling the event loop.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut status_rx: mpsc::Receiver<StatusUpdate>,
    ) {
        let subscribe_topics = self.config.command_topics();
        let bridge_topic = self.config.bridge_status_topic();

        let mut announce_pending = false;
        let mut reconnect_pending = false;
        let reconnect_wait = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(reconnect_wait);

        loop {
            if announce_pending {
                announce_pending = !self.announce(&bridge_topic, &subscribe_topics);
            }

            tokio::select! {
                event = self.eventloop.poll(), if !reconnect_pending => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            announce_pending = true;
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let payload = String::from_utf8_lossy(&publish.payload).to_string();
                            info!("MQTT command on {}: {}", publish.topic, payload);
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload,
                            };
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting in {:?}", e, RECONNECT_DELAY);
                            reconnect_wait.as_mut().reset(Instant::now() + RECONNECT_DELAY);
                            reconnect_pending = true;
                        }
                    }
                }
                _ = &mut reconnect_wait, if reconnect_pending => {
                    reconnect_pending = false;
                }
                Some(update) = status_rx.recv() => {
                    let message = match encode_status(&self.config, &update) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Failed to encode status {:?}: {}", update, e);
                            continue;
                        }
                    };
                    info!("Publishing {}: {}", message.topic, message.payload);
                    if let Err(e) = self.client.try_publish(
                        message.topic.as_str(),
                        QoS::AtMostOnce,
                        message.retain,
                        message.payload.into_bytes(),
                    ) {
                        warn!("Dropping status for {}: {}", message.topic, e);
                    }
                }
            }
        }
    }

    /// Queue the online status and the command subscriptions. Returns
    /// `false` when the request queue was full and it must be retried.
    fn announce(&self, bridge_topic: &str, subscribe_topics: &[String]) -> bool {
        let mut queued = true;

        if let Err(e) = self
            .client
            .try_publish(bridge_topic, QoS::AtLeastOnce, true, "online")
        {
            warn!("Failed to queue online status: {}", e);
            queued = false;
        }

        for topic in subscribe_topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                warn!("Failed to queue subscription to {}: {}", topic, e);
                queued = false;
            }
        }
        queued
    }
}

/// A status update ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Topic, JSON payload and retain flag for a status update.
pub fn encode_status(
    config: &Config,
    update: &StatusUpdate,
) -> Result<StatusMessage, serde_json::Error> {
    let (topic, payload) = match update {
        StatusUpdate::Shutter(status) => (
            config.shutter_status_topic(&status.id),
            serde_json::to_string(status)?,
        ),
        StatusUpdate::Light(status) => (
            config.light_status_topic(&status.id),
            serde_json::to_string(status)?,
        ),
    };
    Ok(StatusMessage {
        topic,
        payload,
        retain: true,
    })
}
