pub mod api;
pub mod events;
pub mod listener;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest shutter level reported by the controller (fully closed).
pub const WISER_MAX_LEVEL: u32 = 10_000;

/// Level percentage assumed for a shutter that has not reported yet.
pub const DEFAULT_TOGGLE_LEVEL: u8 = 50;

/// Brightness sent when a light is switched on without an explicit `bri`.
pub const DEFAULT_ON_BRIGHTNESS: u32 = 1000;

/// Identifier of a Wiser load. Kept in the JSON shape it arrived in so it
/// is echoed back unchanged in status payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Number(u64),
    Text(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Number(n) => write!(f, "{n}"),
            DeviceId::Text(s) => f.write_str(s),
        }
    }
}

/// Shutter button as received on MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutterButton {
    Up,
    Down,
    Stop,
    Toggle,
    /// Any other controller button, passed through as a click.
    Other(String),
}

impl From<String> for ShutterButton {
    fn from(button: String) -> Self {
        match button.as_str() {
            "up" => ShutterButton::Up,
            "down" => ShutterButton::Down,
            "stop" => ShutterButton::Stop,
            "toggle" => ShutterButton::Toggle,
            _ => ShutterButton::Other(button),
        }
    }
}

impl ShutterButton {
    /// Resolve `toggle` against the last known level (in percent).
    pub fn resolve(self, level_percent: Option<u8>) -> ShutterAction {
        match self {
            ShutterButton::Up => ShutterAction::Up,
            ShutterButton::Down => ShutterAction::Down,
            ShutterButton::Stop => ShutterAction::Stop,
            ShutterButton::Toggle => resolve_toggle(level_percent),
            ShutterButton::Other(button) => ShutterAction::Other(button),
        }
    }
}

/// Toggle rule: below the midpoint the shutter goes up, otherwise down.
pub fn resolve_toggle(level_percent: Option<u8>) -> ShutterAction {
    if level_percent.unwrap_or(DEFAULT_TOGGLE_LEVEL) < DEFAULT_TOGGLE_LEVEL {
        ShutterAction::Up
    } else {
        ShutterAction::Down
    }
}

/// Convert a controller level (0..=10000) into a percentage.
pub fn level_percent(level: u32) -> u8 {
    let clamped = level.min(WISER_MAX_LEVEL);
    // clamped * 100 / 10000 fits in 0..=100
    (clamped * 100 / WISER_MAX_LEVEL) as u8
}

/// A shutter button after toggle resolution, as sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutterAction {
    Up,
    Down,
    Stop,
    Other(String),
}

impl ShutterAction {
    /// Movement buttons are held (`press`), everything else is a short `click`.
    pub fn event(&self) -> ShutterEvent {
        match self {
            ShutterAction::Up | ShutterAction::Down => ShutterEvent::Press,
            ShutterAction::Stop | ShutterAction::Other(_) => ShutterEvent::Click,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ShutterAction::Up => "up",
            ShutterAction::Down => "down",
            ShutterAction::Stop => "stop",
            ShutterAction::Other(button) => button,
        }
    }
}

impl fmt::Display for ShutterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterEvent {
    Press,
    Click,
}

/// Target state for a light channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightCommand {
    pub on: bool,
    pub brightness: u32,
}

impl LightCommand {
    /// A missing `state` means off; a missing brightness follows the state.
    pub fn resolve(state: Option<bool>, brightness: Option<u32>) -> Self {
        let on = state.unwrap_or(false);
        let brightness = brightness.unwrap_or(if on { DEFAULT_ON_BRIGHTNESS } else { 0 });
        Self { on, brightness }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutterStatus {
    pub id: DeviceId,
    pub level: u32,
    pub moving: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightStatus {
    pub id: DeviceId,
    pub state: bool,
    pub bri: u32,
}

impl LightStatus {
    pub fn from_brightness(id: DeviceId, bri: u32) -> Self {
        Self {
            id,
            state: bri > 0,
            bri,
        }
    }
}

/// A state change from the controller, ready to publish to MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Shutter(ShutterStatus),
    Light(LightStatus),
}
