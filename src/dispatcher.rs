use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::state::DeviceCache;
use crate::wiser::api::{ApiError, WiserApi};
use crate::wiser::{DeviceId, LightCommand, ShutterAction, ShutterButton};

#[derive(Deserialize)]
struct LightRequest {
    id: DeviceId,
    #[serde(default)]
    state: Option<bool>,
    #[serde(default)]
    bri: Option<u32>,
}

#[derive(Deserialize)]
struct ShutterRequest {
    id: DeviceId,
    #[serde(default)]
    button: Option<String>,
}

/// What the dispatcher did with one MQTT command.
#[derive(Debug)]
pub enum Outcome {
    LightSent(LightCommand),
    ShutterSent(ShutterAction),
    /// Same action as the last one sent to this shutter.
    Duplicate(ShutterAction),
    /// Shutter message without a button.
    Ignored,
    Malformed(String),
    Failed(ApiError),
}

/// Translates MQTT command messages into Wiser API calls.
pub struct Dispatcher<A> {
    api: A,
    cache: Arc<DeviceCache>,
    lights_topic: String,
}

impl<A: WiserApi> Dispatcher<A> {
    pub fn new(api: A, cache: Arc<DeviceCache>, lights_topic: impl Into<String>) -> Self {
        Self {
            api,
            cache,
            lights_topic: lights_topic.into(),
        }
    }

    /// Handle one command. Every failure is logged here and reported in the
    /// returned [`Outcome`]; nothing is propagated to the MQTT loop.
    pub async fn handle(&self, topic: &str, payload: &str) -> Outcome {
        let outcome = if topic.starts_with(&self.lights_topic) {
            self.handle_light(topic, payload).await
        } else {
            self.handle_shutter(topic, payload).await
        };

        if let Outcome::Malformed(reason) = &outcome {
            warn!("Dropping malformed command on {}: {}", topic, reason);
        }
        outcome
    }

    async fn handle_light(&self, topic: &str, payload: &str) -> Outcome {
        let request: LightRequest = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => return Outcome::Malformed(e.to_string()),
        };
        let command = LightCommand::resolve(request.state, request.bri);
        info!("Light command on {}: {} -> {:?}", topic, request.id, command);

        match self.api.set_light(&request.id, command).await {
            Ok(()) => {
                info!(
                    "Light {} switched {} with brightness {}",
                    request.id,
                    if command.on { "on" } else { "off" },
                    command.brightness
                );
                Outcome::LightSent(command)
            }
            Err(e) => {
                warn!("Failed to set light {}: {}", request.id, e);
                Outcome::Failed(e)
            }
        }
    }

    async fn handle_shutter(&self, topic: &str, payload: &str) -> Outcome {
        let request: ShutterRequest = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => return Outcome::Malformed(e.to_string()),
        };
        let Some(raw_button) = request.button.filter(|b| !b.is_empty()) else {
            debug!("Shutter command on {} without button, ignoring", topic);
            return Outcome::Ignored;
        };
        let button = ShutterButton::from(raw_button);
        let is_toggle = button == ShutterButton::Toggle;

        let id = request.id;
        let action = button.resolve(self.cache.last_level(&id));
        if is_toggle {
            info!("Toggle for shutter {} resolved to {}", id, action);
        }

        if self.cache.last_action(&id).as_ref() == Some(&action) {
            warn!("Ignoring command: shutter {} is already on {}", id, action);
            return Outcome::Duplicate(action);
        }

        let result = self.api.move_shutter(&id, &action).await;
        self.cache.record_action(id.clone(), action.clone());

        match result {
            Ok(()) => {
                info!("Shutter {} -> {} ({:?})", id, action, action.event());
                Outcome::ShutterSent(action)
            }
            Err(e) => {
                warn!("Failed to move shutter {}: {}", id, e);
                Outcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Shutter(DeviceId, ShutterAction),
        Light(DeviceId, LightCommand),
    }

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<Call>>,
        fail_with_status: Option<u16>,
    }

    impl FakeApi {
        fn failing(status: u16) -> Self {
            Self {
                fail_with_status: Some(status),
                ..Default::default()
            }
        }

        fn result(&self) -> Result<(), ApiError> {
            match self.fail_with_status {
                Some(status) => Err(ApiError::Status {
                    status,
                    body: "boom".into(),
                }),
                None => Ok(()),
            }
        }
    }

    impl WiserApi for Arc<FakeApi> {
        async fn move_shutter(&self, id: &DeviceId, action: &ShutterAction) -> Result<(), ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Shutter(id.clone(), action.clone()));
            self.result()
        }

        async fn set_light(&self, id: &DeviceId, command: LightCommand) -> Result<(), ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Light(id.clone(), command));
            self.result()
        }
    }

    fn make_dispatcher(api: FakeApi) -> (Dispatcher<Arc<FakeApi>>, Arc<FakeApi>, Arc<DeviceCache>) {
        let api = Arc::new(api);
        let cache = Arc::new(DeviceCache::new());
        let dispatcher = Dispatcher::new(api.clone(), cache.clone(), "wiser/lights");
        (dispatcher, api, cache)
    }

    fn calls(api: &FakeApi) -> Vec<Call> {
        api.calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn should_move_shutter_and_remember_action() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());

        let outcome = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"up"}"#)
            .await;

        assert!(matches!(outcome, Outcome::ShutterSent(ShutterAction::Up)));
        assert_eq!(calls(&api), vec![Call::Shutter(DeviceId::Number(3), ShutterAction::Up)]);
        assert_eq!(cache.last_action(&DeviceId::Number(3)), Some(ShutterAction::Up));
    }

    #[tokio::test]
    async fn should_suppress_repeated_shutter_action() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());

        dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"down"}"#)
            .await;
        let outcome = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"down"}"#)
            .await;

        assert!(matches!(outcome, Outcome::Duplicate(ShutterAction::Down)));
        assert_eq!(calls(&api).len(), 1);
        assert_eq!(cache.last_action(&DeviceId::Number(3)), Some(ShutterAction::Down));
    }

    #[tokio::test]
    async fn should_send_changed_shutter_actions() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());

        dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"down"}"#)
            .await;
        dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"stop"}"#)
            .await;

        assert_eq!(
            calls(&api),
            vec![
                Call::Shutter(DeviceId::Number(3), ShutterAction::Down),
                Call::Shutter(DeviceId::Number(3), ShutterAction::Stop),
            ]
        );
        assert_eq!(cache.last_action(&DeviceId::Number(3)), Some(ShutterAction::Stop));
    }

    #[tokio::test]
    async fn should_not_mix_up_devices_when_suppressing() {
        let (dispatcher, api, _cache) = make_dispatcher(FakeApi::default());

        dispatcher
            .handle("wiser/shutters/1", r#"{"id":1,"button":"up"}"#)
            .await;
        dispatcher
            .handle("wiser/shutters/2", r#"{"id":2,"button":"up"}"#)
            .await;

        assert_eq!(calls(&api).len(), 2);
    }

    #[tokio::test]
    async fn should_resolve_toggle_from_cached_level() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());
        cache.record_level(DeviceId::Number(4), 20);
        cache.record_level(DeviceId::Number(5), 80);

        let low = dispatcher
            .handle("wiser/shutters/4", r#"{"id":4,"button":"toggle"}"#)
            .await;
        let high = dispatcher
            .handle("wiser/shutters/5", r#"{"id":5,"button":"toggle"}"#)
            .await;

        assert!(matches!(low, Outcome::ShutterSent(ShutterAction::Up)));
        assert!(matches!(high, Outcome::ShutterSent(ShutterAction::Down)));
        assert_eq!(calls(&api).len(), 2);
    }

    #[tokio::test]
    async fn should_resolve_toggle_to_down_without_level() {
        let (dispatcher, api, _cache) = make_dispatcher(FakeApi::default());

        let outcome = dispatcher
            .handle("wiser/shutters/6", r#"{"id":6,"button":"toggle"}"#)
            .await;

        assert!(matches!(outcome, Outcome::ShutterSent(ShutterAction::Down)));
        assert_eq!(calls(&api), vec![Call::Shutter(DeviceId::Number(6), ShutterAction::Down)]);
    }

    #[tokio::test]
    async fn should_suppress_toggle_resolving_to_last_action() {
        let (dispatcher, api, _cache) = make_dispatcher(FakeApi::default());

        dispatcher
            .handle("wiser/shutters/6", r#"{"id":6,"button":"down"}"#)
            .await;
        let outcome = dispatcher
            .handle("wiser/shutters/6", r#"{"id":6,"button":"toggle"}"#)
            .await;

        assert!(matches!(outcome, Outcome::Duplicate(ShutterAction::Down)));
        assert_eq!(calls(&api).len(), 1);
    }

    #[tokio::test]
    async fn should_ignore_shutter_command_without_button() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());

        let missing = dispatcher.handle("wiser/shutters/3", r#"{"id":3}"#).await;
        let empty = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":""}"#)
            .await;

        assert!(matches!(missing, Outcome::Ignored));
        assert!(matches!(empty, Outcome::Ignored));
        assert!(calls(&api).is_empty());
        assert_eq!(cache.last_action(&DeviceId::Number(3)), None);
    }

    #[tokio::test]
    async fn should_drop_malformed_commands_without_side_effects() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());

        let invalid_json = dispatcher.handle("wiser/shutters/3", "{not json").await;
        let missing_id = dispatcher
            .handle("wiser/shutters/3", r#"{"button":"up"}"#)
            .await;
        let light_without_id = dispatcher
            .handle("wiser/lights/3", r#"{"state":true}"#)
            .await;

        for outcome in [invalid_json, missing_id, light_without_id] {
            assert!(matches!(outcome, Outcome::Malformed(_)), "{outcome:?}");
        }
        assert!(calls(&api).is_empty());
        assert_eq!(cache.last_action(&DeviceId::Number(3)), None);
    }

    #[tokio::test]
    async fn should_forward_unknown_button_as_is() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::default());
        let sideways = ShutterAction::Other("sideways".into());

        let first = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"sideways"}"#)
            .await;
        let repeated = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"sideways"}"#)
            .await;

        assert!(matches!(first, Outcome::ShutterSent(ShutterAction::Other(ref b)) if b == "sideways"));
        assert!(matches!(repeated, Outcome::Duplicate(_)));
        assert_eq!(calls(&api), vec![Call::Shutter(DeviceId::Number(3), sideways.clone())]);
        assert_eq!(cache.last_action(&DeviceId::Number(3)), Some(sideways));
    }

    #[tokio::test]
    async fn should_default_light_brightness_from_state() {
        let (dispatcher, api, _cache) = make_dispatcher(FakeApi::default());

        dispatcher
            .handle("wiser/lights/9", r#"{"id":9,"state":true}"#)
            .await;
        dispatcher
            .handle("wiser/lights/9", r#"{"id":9,"state":false}"#)
            .await;
        dispatcher
            .handle("wiser/lights/9", r#"{"id":9,"state":true,"bri":300}"#)
            .await;

        assert_eq!(
            calls(&api),
            vec![
                Call::Light(DeviceId::Number(9), LightCommand { on: true, brightness: 1000 }),
                Call::Light(DeviceId::Number(9), LightCommand { on: false, brightness: 0 }),
                Call::Light(DeviceId::Number(9), LightCommand { on: true, brightness: 300 }),
            ]
        );
    }

    #[tokio::test]
    async fn should_not_suppress_repeated_light_commands() {
        let (dispatcher, api, _cache) = make_dispatcher(FakeApi::default());

        for _ in 0..2 {
            let outcome = dispatcher
                .handle("wiser/lights/9", r#"{"id":9,"state":true}"#)
                .await;
            assert!(matches!(outcome, Outcome::LightSent(_)));
        }
        assert_eq!(calls(&api).len(), 2);
    }

    #[tokio::test]
    async fn should_report_api_failure_and_keep_cache() {
        let (dispatcher, api, cache) = make_dispatcher(FakeApi::failing(500));

        let shutter = dispatcher
            .handle("wiser/shutters/3", r#"{"id":3,"button":"up"}"#)
            .await;
        let light = dispatcher
            .handle("wiser/lights/4", r#"{"id":4,"state":true}"#)
            .await;

        assert!(matches!(
            shutter,
            Outcome::Failed(ApiError::Status { status: 500, .. })
        ));
        assert!(matches!(light, Outcome::Failed(_)));
        assert_eq!(calls(&api).len(), 2);
        assert_eq!(cache.last_action(&DeviceId::Number(3)), Some(ShutterAction::Up));
    }
}
