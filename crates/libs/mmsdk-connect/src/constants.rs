use std::time::Duration;

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const METAMASK_CONNECT_BASE_URL: &str = "https://metamask.app.link/connect";
pub const METAMASK_DEEPLINK_BASE: &str = "metamask://connect";
pub const METAMASK_EXTENSION_DOWNLOAD_URL: &str = "https://metamask.io/download/";
pub const METAMASK_MOBILE_INSTALL_URL: &str = "https://metamask.app.link/";
pub const DEFAULT_SERVER_URL: &str = "https://metamask-sdk.api.cx.metamask.io/";

/// Link protocol version advertised in every connection link.
pub const LINK_PROTOCOL_VERSION: u8 = 2;

/// A channel active within this window resumes without an OTP prompt.
pub const OTP_TRUST_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const OTP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Slow-path telemetry deadline for the modal installer; never aborts the flow.
pub const CONNECTION_TELEMETRY_TIMEOUT: Duration = Duration::from_secs(60);

pub const STORAGE_PROVIDER_TYPE: &str = "providerType";
pub const STORAGE_DAPP_CHAIN_ID: &str = "chainId";
pub const STORAGE_DAPP_SELECTED_ADDRESS: &str = "selectedAddress";
pub const STORAGE_ANON_ID: &str = "anonId";

pub const PROVIDER_TYPE_EXTENSION: &str = "extension";

pub const RPC_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
pub const RPC_CONNECT_SIGN: &str = "metamask_connectSign";
pub const RPC_CONNECT_WITH: &str = "metamask_connectWith";
pub const RPC_GET_PERMISSIONS: &str = "wallet_getPermissions";
pub const RPC_REVOKE_PERMISSIONS: &str = "wallet_revokePermissions";

pub const EVENT_CHANNEL_CAPACITY: usize = 64;
