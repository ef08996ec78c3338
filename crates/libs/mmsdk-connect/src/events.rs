use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Reason carried by an SDK-level provider update.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ProviderUpdateType {
    Terminate,
    Extension,
    Initialized,
}

impl ProviderUpdateType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "terminate",
            Self::Extension => "extension",
            Self::Initialized => "initialized",
        }
    }
}

impl fmt::Display for ProviderUpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published on the SDK's own broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SdkEvent {
    ProviderUpdate { kind: ProviderUpdateType },
    ConnectWithResponse { error: String },
    ConnectionStatus { status: JsonValue },
    ServiceStatus { status: JsonValue },
}

impl SdkEvent {
    pub fn provider_update(kind: ProviderUpdateType) -> Self {
        Self::ProviderUpdate { kind }
    }
}

/// EIP-1193 style events a provider surfaces to the dapp.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
#[non_exhaustive]
pub enum ProviderEvent {
    Connecting,
    Connect { chain_id: Option<String> },
    Connected,
    DisplayUri(String),
    ChainChanged(String),
    AccountsChanged(Vec<String>),
    Disconnect,
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connect { .. } => "connect",
            Self::Connected => "connected",
            Self::DisplayUri(_) => "display_uri",
            Self::ChainChanged(_) => "chainChanged",
            Self::AccountsChanged(_) => "accountsChanged",
            Self::Disconnect => "disconnect",
        }
    }
}
