use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::error::SdkError;
use crate::events::ProviderEvent;

/// A JSON-RPC request as submitted by a dapp.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub params: JsonValue,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: JsonValue) -> Self {
        Self { method: method.into(), params }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderState {
    pub is_connected: bool,
    pub initialized: bool,
    pub accounts: Vec<String>,
    pub chain_id: Option<String>,
}

/// The request-capable object exposed to the dapp.
///
/// JSON-RPC dispatch is opaque to the connection core; it only drives the
/// lifecycle hooks below.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn request(&self, args: RequestArguments) -> Result<JsonValue, SdkError>;

    /// Forces the provider into a connected state without waiting on the wallet.
    fn set_connected(&self);

    /// Moves the provider to a disconnected state. `terminate` also drops
    /// cached accounts and chain.
    fn handle_disconnect(&self, terminate: bool);

    /// Seeds accounts and chain as announced by the wallet, without a
    /// round trip.
    fn initialize_state(&self, accounts: Vec<String>, chain_id: String);

    /// Re-reads chain and account state from the wallet.
    async fn force_initialize_state(&self) -> Result<(), SdkError>;

    fn emit(&self, event: ProviderEvent);

    fn state(&self) -> ProviderState;

    /// Events this provider raises on its own, when it is a standalone
    /// source such as a browser extension.
    fn subscribe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}
