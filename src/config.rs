use std::env;
use std::time::Duration;

use crate::supervisor::RestartPolicy;
use crate::wiser::DeviceId;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub wiser: WiserConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct WiserConfig {
    /// Controller address, `host` or `host:port`.
    pub host: String,
    /// Bearer token without the `Bearer ` scheme.
    pub token: String,
    pub request_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String, String> {
    lookup(key).ok_or_else(|| format!("{key} environment variable is required"))
}

fn optional(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.is_empty())
}

fn or_default<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, String> {
        let token = required(lookup, "WISER_TOKEN")?;
        let token = token
            .strip_prefix("Bearer ")
            .unwrap_or(token.as_str())
            .trim()
            .to_string();

        let reconnect_delay_secs = or_default(lookup, "WISER_RECONNECT_DELAY_SECS", 5);

        let config = Self {
            mqtt: MqttConfig {
                broker_host: required(lookup, "MQTT_BROKER_HOST")?,
                broker_port: or_default(lookup, "MQTT_BROKER_PORT", 1883),
                username: optional(lookup, "MQTT_USERNAME"),
                password: optional(lookup, "MQTT_PASSWORD"),
                topic_prefix: or_default(lookup, "MQTT_TOPIC_PREFIX", "wiser".to_string()),
                client_id: or_default(lookup, "MQTT_CLIENT_ID", "wiser-to-mqtt".to_string()),
            },
            wiser: WiserConfig {
                host: required(lookup, "WISER_HOST")?,
                token,
                request_timeout_secs: or_default(lookup, "WISER_REQUEST_TIMEOUT_SECS", 5),
                reconnect_delay_secs,
                reconnect_max_delay_secs: or_default(
                    lookup,
                    "WISER_RECONNECT_MAX_DELAY_SECS",
                    reconnect_delay_secs,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.wiser.host.is_empty() {
            return Err("WISER_HOST must not be empty".into());
        }
        if self.wiser.token.is_empty() {
            return Err("WISER_TOKEN must not be empty".into());
        }
        if self.wiser.request_timeout_secs == 0 {
            return Err("WISER_REQUEST_TIMEOUT_SECS must be > 0".into());
        }
        if self.wiser.reconnect_delay_secs == 0 {
            return Err("WISER_RECONNECT_DELAY_SECS must be > 0".into());
        }
        if self.wiser.reconnect_max_delay_secs < self.wiser.reconnect_delay_secs {
            return Err(
                "WISER_RECONNECT_MAX_DELAY_SECS must be >= WISER_RECONNECT_DELAY_SECS".into(),
            );
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> String {
        format!("http://{}", self.wiser.host)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}/api", self.wiser.host)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.wiser.request_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> RestartPolicy {
        RestartPolicy::fixed(Duration::from_secs(self.wiser.reconnect_delay_secs))
            .with_max_delay(Duration::from_secs(self.wiser.reconnect_max_delay_secs))
    }

    pub fn shutters_topic(&self) -> String {
        format!("{}/shutters", self.mqtt.topic_prefix)
    }

    pub fn lights_topic(&self) -> String {
        format!("{}/lights", self.mqtt.topic_prefix)
    }

    pub fn command_topics(&self) -> [String; 2] {
        [
            format!("{}/+", self.shutters_topic()),
            format!("{}/+", self.lights_topic()),
        ]
    }

    pub fn shutter_status_topic(&self, id: &DeviceId) -> String {
        format!("{}/{}/status", self.shutters_topic(), id)
    }

    pub fn light_status_topic(&self, id: &DeviceId) -> String {
        format!("{}/{}/status", self.lights_topic(), id)
    }

    pub fn bridge_status_topic(&self) -> String {
        format!("{}/bridge/status", self.mqtt.topic_prefix)
    }
}
