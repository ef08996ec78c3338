use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::constants::STORAGE_ANON_ID;
use crate::error::SdkError;
use crate::links::OriginatorInfo;
use crate::storage::StorageManager;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TrackingEvent {
    Initialized,
    Request,
    RequestMobile,
    Reconnect,
    Authorized,
    Rejected,
    Terminated,
    Disconnected,
    ConnectionFailed,
    UseExtension,
    UseInAppBrowser,
    ExtensionUtilized,
}

impl TrackingEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "sdk_initialized",
            Self::Request => "sdk_connect_request_started",
            Self::RequestMobile => "sdk_connect_request_started_mobile",
            Self::Reconnect => "sdk_reconnect_request_started",
            Self::Authorized => "sdk_connection_authorized",
            Self::Rejected => "sdk_connection_rejected",
            Self::Terminated => "sdk_connection_terminated",
            Self::Disconnected => "sdk_disconnected",
            Self::ConnectionFailed => "sdk_connection_failed",
            Self::UseExtension => "sdk_use_extension",
            Self::UseInAppBrowser => "sdk_use_inapp_browser",
            Self::ExtensionUtilized => "sdk_extension_utilized",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnalyticsPayload {
    pub event: &'static str,
    pub server_url: String,
    #[serde(flatten)]
    pub originator: OriginatorInfo,
    #[serde(skip_serializing_if = "JsonValue::is_null")]
    pub params: JsonValue,
}

/// Where tracking events go. Delivery is fire-and-forget.
pub trait AnalyticsSink: Send + Sync {
    fn send(&self, payload: AnalyticsPayload) -> Result<(), SdkError>;
}

/// Sink that writes each event to the debug log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn send(&self, payload: AnalyticsPayload) -> Result<(), SdkError> {
        log::debug!("[analytics] {} {}", payload.event, payload.params);
        Ok(())
    }
}

pub struct Analytics {
    enabled: bool,
    server_url: String,
    originator: OriginatorInfo,
    sink: Arc<dyn AnalyticsSink>,
}

impl Analytics {
    pub fn new(
        enabled: bool,
        server_url: impl Into<String>,
        originator: OriginatorInfo,
        sink: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self { enabled, server_url: server_url.into(), originator, sink }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn originator(&self) -> &OriginatorInfo {
        &self.originator
    }

    pub fn send(&self, event: TrackingEvent) {
        self.send_with(event, JsonValue::Null);
    }

    /// Dispatches an event when analytics is enabled. Failures are logged.
    pub fn send_with(&self, event: TrackingEvent, params: JsonValue) {
        if !self.enabled {
            return;
        }
        let payload = AnalyticsPayload {
            event: event.as_str(),
            server_url: self.server_url.clone(),
            originator: self.originator.clone(),
            params,
        };
        if let Err(err) = self.sink.send(payload) {
            log::warn!("[Analytics] failed to send {}: {err}", event.as_str());
        }
    }
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("enabled", &self.enabled)
            .field("server_url", &self.server_url)
            .finish()
    }
}

pub fn generate_anon_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reuses the stored anonymous id or mints and stores a new one.
pub async fn resolve_anon_id(storage: Option<&dyn StorageManager>) -> String {
    let Some(storage) = storage else {
        return generate_anon_id();
    };
    match storage.item(STORAGE_ANON_ID).await {
        Ok(Some(existing)) if !existing.is_empty() => return existing,
        Ok(_) => {}
        Err(err) => log::warn!("[Analytics] unable to read anon id: {err}"),
    }
    let anon_id = generate_anon_id();
    if let Err(err) = storage.set_item(STORAGE_ANON_ID, &anon_id).await {
        log::warn!("[Analytics] unable to persist anon id: {err}");
    }
    anon_id
}
