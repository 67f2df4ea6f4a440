//! Decoding of the controller's WebSocket event frames.

use serde::Deserialize;

use super::{DeviceId, LightStatus, ShutterStatus, StatusUpdate};

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    load: Option<RawLoad>,
}

#[derive(Deserialize)]
struct RawLoad {
    id: DeviceId,
    state: RawLoadState,
}

#[derive(Deserialize)]
struct RawLoadState {
    #[serde(default)]
    level: Option<u32>,
    #[serde(default)]
    moving: Option<String>,
    #[serde(default)]
    bri: Option<u32>,
}

/// Extract the status updates carried by one event frame.
///
/// Frames that are not `{"load": {"id": .., "state": {..}}}` yield nothing.
/// A load state with both `level` and `bri` yields a shutter and a light
/// update, in that order.
pub fn parse_event(text: &str) -> Vec<StatusUpdate> {
    let Ok(event) = serde_json::from_str::<RawEvent>(text) else {
        return Vec::new();
    };
    let Some(load) = event.load else {
        return Vec::new();
    };

    let mut updates = Vec::with_capacity(2);
    if let Some(level) = load.state.level {
        updates.push(StatusUpdate::Shutter(ShutterStatus {
            id: load.id.clone(),
            level,
            moving: load.state.moving.unwrap_or_else(|| "stop".to_string()),
        }));
    }
    if let Some(bri) = load.state.bri {
        updates.push(StatusUpdate::Light(LightStatus::from_brightness(load.id, bri)));
    }
    updates
}
