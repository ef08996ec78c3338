//! Contract of the external transport session object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{CommunicationLayerPreference, DappMetadata, LoggingOptions};
use crate::error::SdkError;
use crate::platform::PlatformType;
use crate::provider::RequestArguments;

/// A persisted dapp-to-wallet pairing.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub channel_id: String,
    pub local_key: Option<String>,
    /// Unix epoch milliseconds of the last wallet activity on this channel.
    pub last_active: Option<u64>,
    pub valid_until: Option<u64>,
    pub relay_persistence: Option<bool>,
}

impl ChannelConfig {
    pub fn has_channel(&self) -> bool {
        !self.channel_id.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub channel_id: String,
    pub pub_key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub public_key: String,
    pub peer_public_key: Option<String>,
    pub keys_exchanged: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectOptions {
    pub terminate: bool,
    pub send_message: bool,
}

impl DisconnectOptions {
    pub fn terminate() -> Self {
        Self { terminate: true, send_message: true }
    }
}

/// Lifecycle events a connector raises on behalf of the wallet.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ConnectorEvent {
    Otp(String),
    /// First message of an accepted wallet: its accounts and chain.
    WalletInit { accounts: Vec<String>, chain_id: String },
    Authorized,
    Terminate,
    ClientsDisconnected,
    ClientsReady,
    Rejected,
    SdkRpcCall(RequestArguments),
    ConnectionStatus(JsonValue),
    ServiceStatus(JsonValue),
}

impl ConnectorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Otp(_) => "otp",
            Self::WalletInit { .. } => "wallet_init",
            Self::Authorized => "authorized",
            Self::Terminate => "terminate",
            Self::ClientsDisconnected => "clients_disconnected",
            Self::ClientsReady => "clients_ready",
            Self::Rejected => "rejected",
            Self::SdkRpcCall(_) => "sdk_rpc_call",
            Self::ConnectionStatus(_) => "connection_status",
            Self::ServiceStatus(_) => "service_status",
        }
    }
}

/// Session transport to the wallet.
///
/// Events are delivered through `tokio::sync::broadcast`; dropping a
/// receiver is the unsubscribe.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts silent resumption of a previously known channel.
    async fn originator_session_connect(&self) -> Result<Option<ChannelConfig>, SdkError>;

    /// Mints a brand-new channel.
    async fn generate_channel_id_connect(&self) -> Result<ChannelDescriptor, SdkError>;

    fn key_info(&self) -> Option<KeyInfo>;

    fn channel_config(&self) -> Option<ChannelConfig>;

    fn is_ready(&self) -> bool;

    fn is_authorized(&self) -> bool;

    fn is_paused(&self) -> bool;

    async fn disconnect(&self, options: DisconnectOptions) -> Result<(), SdkError>;

    /// Restores channel and key state persisted by a previous page load.
    async fn init_from_dapp_storage(&self) -> Result<(), SdkError>;

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent>;

    async fn ping(&self) -> Result<(), SdkError> {
        Ok(())
    }

    fn service_status(&self) -> JsonValue {
        JsonValue::Null
    }

    fn reset_keys(&self) {}
}

/// Everything a connector needs to open a session on behalf of the dapp.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectorConfig {
    pub platform_type: PlatformType,
    pub communication_layer_preference: CommunicationLayerPreference,
    pub communication_server_url: String,
    pub sdk_version: String,
    pub context: String,
    pub dapp_metadata: DappMetadata,
    pub transports: Vec<String>,
    pub enable_analytics: bool,
    pub anon_id: Option<String>,
    pub storage_enabled: bool,
    pub logging: LoggingOptions,
    /// ECIES private key restored from a persisted channel.
    pub private_key: Option<String>,
    /// Channel the dapp persisted after its last authorization.
    pub persisted_channel: Option<ChannelConfig>,
}

pub trait ConnectorFactory: Send + Sync {
    fn create(&self, config: ConnectorConfig) -> Result<Arc<dyn Connector>, SdkError>;
}
