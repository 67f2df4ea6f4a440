use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, InvalidHeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use super::events::parse_event;
use super::{StatusUpdate, level_percent};
use crate::state::DeviceCache;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid authorization header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("could not connect: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("connection closed by controller: {0}")]
    Closed(String),
    #[error("status channel closed")]
    StatusChannelClosed,
}

/// Listens to the controller's event stream and turns load state changes
/// into status updates.
pub struct EventListener {
    url: String,
    token: String,
    cache: Arc<DeviceCache>,
}

impl EventListener {
    pub fn new(url: impl Into<String>, token: impl Into<String>, cache: Arc<DeviceCache>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            cache,
        }
    }

    /// Run one connection until it fails or is closed. Never returns `Ok`
    /// while the controller keeps the stream open.
    pub async fn run_session(
        &self,
        status_tx: &mpsc::Sender<StatusUpdate>,
    ) -> Result<(), SessionError> {
        info!("Connecting to Wiser event stream at {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(SessionError::Connect)?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.token))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (mut stream, _response) = connect_async(request)
            .await
            .map_err(SessionError::Connect)?;
        info!("Connected to Wiser event stream");

        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => self.handle_frame(text.as_str(), status_tx).await?,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(SessionError::Closed(reason));
                }
                other => debug!("Ignoring non-text frame: {:?}", other),
            }
        }

        Err(SessionError::Closed("stream ended".into()))
    }

    async fn handle_frame(
        &self,
        text: &str,
        status_tx: &mpsc::Sender<StatusUpdate>,
    ) -> Result<(), SessionError> {
        debug!("Wiser event: {}", text);

        let updates = parse_event(text);
        if updates.is_empty() {
            debug!("No load state in event, skipping");
            return Ok(());
        }

        for update in updates {
            if let StatusUpdate::Shutter(status) = &update {
                self.cache
                    .record_level(status.id.clone(), level_percent(status.level));
            }
            status_tx
                .send(update)
                .await
                .map_err(|_| SessionError::StatusChannelClosed)?;
        }
        Ok(())
    }
}
