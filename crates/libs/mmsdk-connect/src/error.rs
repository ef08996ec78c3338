use crate::events::ProviderUpdateType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC error code a wallet uses when the user dismisses a request.
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC style error payload surfaced to dapp callers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED_CODE, "User rejected the request.")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Errors returned by the connection core and the SDK façade.
///
/// Configuration and state-invariant variants are programmer errors and
/// surface synchronously. Rejection and switch variants are the recoverable
/// outcomes of a connection attempt. Collaborator variants wrap failures
/// reported by a connector, provider, storage backend or platform host.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum SdkError {
    #[error("no connector defined")]
    NoConnector,

    #[error("invalid remote connector")]
    InvalidConnector,

    #[error("connection not started. run start_connection() first.")]
    ConnectionNotStarted,

    #[error("no universal link available, please call eth_requestAccounts first")]
    UniversalLinkUnavailable,

    #[error("you must provide dapp metadata (name and/or url)")]
    MissingDappMetadata,

    #[error("invalid dapp metadata: {message}")]
    InvalidDappMetadata { message: String },

    #[error("{accessor} called before the sdk was initialized")]
    NotInitialized { accessor: String },

    #[error("sdk state invalid -- undefined provider")]
    ProviderUnavailable,

    #[error("platform manager not available")]
    PlatformUnavailable,

    #[error("connection rejected by the wallet")]
    Rejected,

    #[error("{0}")]
    UserRejected(RpcError),

    #[error("connection flow switched to {0}")]
    ProviderSwitched(ProviderUpdateType),

    #[error("connection attempt superseded by a newer one")]
    Superseded,

    #[error("rpc error: {0}")]
    Rpc(RpcError),

    #[error("connector error: {message}")]
    Connector { message: String },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("host error: {message}")]
    Host { message: String },

    #[error("invalid config: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SdkError {
    /// Returns `true` for transient collaborator failures that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connector { .. } | Self::Storage { .. } | Self::Host { .. } | Self::Superseded
        )
    }

    /// Returns `true` when the wallet or the user declined the connection.
    pub fn is_user_rejection(&self) -> bool {
        match self {
            Self::Rejected | Self::UserRejected(_) => true,
            Self::Rpc(err) => err.code == USER_REJECTED_CODE,
            _ => false,
        }
    }

    /// The JSON-RPC payload carried by this error, if any.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::UserRejected(err) | Self::Rpc(err) => Some(err),
            _ => None,
        }
    }

    pub fn user_rejected() -> Self {
        Self::UserRejected(RpcError::user_rejected())
    }

    pub fn not_initialized(accessor: impl Into<String>) -> Self {
        Self::NotInitialized { accessor: accessor.into() }
    }

    pub fn invalid_dapp_metadata(message: impl Into<String>) -> Self {
        Self::InvalidDappMetadata { message: message.into() }
    }

    pub fn connector(message: impl Into<String>) -> Self {
        Self::Connector { message: message.into() }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::Host { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl From<toml::de::Error> for SdkError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
