use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use super::{DeviceId, LightCommand, ShutterAction, ShutterEvent};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("controller answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Control operations of the Wiser REST API.
pub trait WiserApi: Send + Sync {
    /// Move or stop a shutter.
    fn move_shutter(
        &self,
        id: &DeviceId,
        action: &ShutterAction,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Switch a light and set its brightness.
    fn set_light(
        &self,
        id: &DeviceId,
        command: LightCommand,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Serialize)]
struct CtrlBody<'a> {
    button: &'a str,
    event: ShutterEvent,
}

#[derive(Serialize)]
struct TargetStateBody {
    state: &'static str,
    bri: u32,
}

pub struct WiserClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WiserClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "PUT");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl WiserApi for WiserClient {
    async fn move_shutter(&self, id: &DeviceId, action: &ShutterAction) -> Result<(), ApiError> {
        let body = CtrlBody {
            button: action.as_str(),
            event: action.event(),
        };
        self.put(&format!("/api/loads/{id}/ctrl"), &body).await
    }

    async fn set_light(&self, id: &DeviceId, command: LightCommand) -> Result<(), ApiError> {
        let body = TargetStateBody {
            state: if command.on { "on" } else { "off" },
            bri: command.brightness,
        };
        self.put(&format!("/api/loads/{id}/target_state"), &body)
            .await
    }
}
