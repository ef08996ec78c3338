//! Connection lifecycle orchestration for dapps talking to a MetaMask wallet.
//!
//! [`MetaMaskSdk`] bootstraps the platform, storage, analytics and the
//! [`RemoteConnection`], then picks how to reach the wallet: the browser
//! extension, a deeplink, an OTP-guarded resume of a known channel or the
//! install prompt. Transport, rendering and JSON-RPC dispatch stay behind
//! the [`Connector`], [`ModalFactory`] and [`Provider`] seams.

#![allow(clippy::result_large_err)]

pub mod analytics;
pub mod config;
pub mod connector;
pub mod constants;
pub mod error;
pub mod events;
pub mod installer;
pub mod links;
pub mod loopback;
pub mod modal;
pub mod platform;
pub mod provider;
pub mod remote;
pub mod sdk;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testing;

pub use analytics::{Analytics, AnalyticsPayload, AnalyticsSink, LogSink, TrackingEvent};
pub use config::{
    CommunicationLayerPreference, DappMetadata, LoggingOptions, SdkOptions, StorageOptions,
};
pub use connector::{
    ChannelConfig, ChannelDescriptor, Connector, ConnectorConfig, ConnectorEvent,
    ConnectorFactory, DisconnectOptions, KeyInfo,
};
pub use error::{RpcError, SdkError, USER_REJECTED_CODE};
pub use events::{ProviderEvent, ProviderUpdateType, SdkEvent};
pub use installer::Installer;
pub use links::{ConnectionLinks, LinkParams, OriginatorInfo};
pub use loopback::{
    Approval, LoopbackConnector, LoopbackConnectorFactory, LoopbackProvider, LoopbackWallet,
};
pub use modal::{
    InstallModal, InstallModalArgs, LogModalFactory, ModalFactory, ModalHook, PendingModal,
    PendingModalArgs,
};
pub use platform::{
    HeadlessHost, PageInfo, PlatformCapabilities, PlatformHost, PlatformManager, PlatformType,
};
pub use provider::{Provider, ProviderState, RequestArguments};
pub use remote::{
    ConnectionStrategy, RemoteConnection, RemoteConnectionOptions, RemoteHooks,
    StartConnectionExtras,
};
pub use sdk::{MetaMaskSdk, SdkServices};
pub use state::SessionStatus;
pub use storage::{FileStorage, MemoryStorage, StorageManager};
