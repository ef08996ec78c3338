//! An in-process wallet that answers a dapp without any relay or device.
//!
//! [`LoopbackWallet`] holds the wallet side: accounts, chain and whether it
//! approves connections. [`LoopbackConnectorFactory`] and
//! [`LoopbackProvider`] expose it through the connector and provider seams,
//! so an SDK built on them runs the full connection lifecycle offline.

use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use crate::connector::{
    ChannelConfig, ChannelDescriptor, Connector, ConnectorConfig, ConnectorEvent,
    ConnectorFactory, DisconnectOptions, KeyInfo,
};
use crate::constants::{
    EVENT_CHANNEL_CAPACITY, RPC_CONNECT_SIGN, RPC_CONNECT_WITH, RPC_GET_PERMISSIONS,
    RPC_REQUEST_ACCOUNTS, RPC_REVOKE_PERMISSIONS,
};
use crate::error::{RpcError, SdkError};
use crate::events::ProviderEvent;
use crate::provider::{Provider, ProviderState, RequestArguments};

const DEFAULT_RESPONSE_DELAY: Duration = Duration::from_millis(25);
const DEFAULT_ACCOUNT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
const DEFAULT_CHAIN_ID: &str = "0x1";

/// How the loopback wallet answers a connection request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Approval {
    #[default]
    Approve,
    Reject,
    /// Never answers; events are raised by hand through [`LoopbackConnector::raise`].
    Manual,
}

/// Shared wallet state behind a loopback connector and provider.
#[derive(Debug)]
pub struct LoopbackWallet {
    approval: Approval,
    response_delay: Duration,
    accounts: Vec<String>,
    chain_id: String,
    otp: String,
    channel: Mutex<Option<ChannelConfig>>,
    authorized: AtomicBool,
}

impl Default for LoopbackWallet {
    fn default() -> Self {
        Self::new(Approval::Approve)
    }
}

impl LoopbackWallet {
    pub fn new(approval: Approval) -> Self {
        Self {
            approval,
            response_delay: DEFAULT_RESPONSE_DELAY,
            accounts: vec![DEFAULT_ACCOUNT.to_owned()],
            chain_id: DEFAULT_CHAIN_ID.to_owned(),
            otp: "123456".to_owned(),
            channel: Mutex::new(None),
            authorized: AtomicBool::new(false),
        }
    }

    pub fn with_accounts(mut self, accounts: Vec<String>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    /// How long the wallet takes to answer once a channel is open.
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Seeds a channel the wallet has seen before, as if restored from storage.
    pub fn with_known_channel(self, channel: ChannelConfig) -> Self {
        *self.channel.lock().expect("channel mutex poisoned") = Some(channel);
        self
    }

    pub fn approval(&self) -> Approval {
        self.approval
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> Option<ChannelConfig> {
        self.channel.lock().expect("channel mutex poisoned").clone()
    }

    fn touch_channel(&self) {
        if let Some(channel) = self.channel.lock().expect("channel mutex poisoned").as_mut() {
            channel.last_active = Some(epoch_ms());
        }
    }

    fn forget_channel(&self) {
        self.channel.lock().expect("channel mutex poisoned").take();
        self.authorized.store(false, Ordering::Release);
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Connector bound to a [`LoopbackWallet`].
pub struct LoopbackConnector {
    wallet: Arc<LoopbackWallet>,
    config: ConnectorConfig,
    public_key: String,
    ready: AtomicBool,
    events: broadcast::Sender<ConnectorEvent>,
}

impl std::fmt::Debug for LoopbackConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnector")
            .field("platform", &self.config.platform_type)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish()
    }
}

impl LoopbackConnector {
    pub fn new(wallet: Arc<LoopbackWallet>, config: ConnectorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let public_key = format!("02{}", random_hex(32));
        Self { wallet, config, public_key, ready: AtomicBool::new(false), events }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Delivers `event` to subscribers as if the wallet had sent it.
    pub fn raise(&self, event: ConnectorEvent) {
        let _ = self.events.send(event);
    }

    /// Plays the wallet's answer after the configured delay. Resumed
    /// channels get a one-time code first.
    fn answer(&self, resumed: bool) {
        if self.wallet.approval == Approval::Manual {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("[LoopbackConnector] no async runtime, wallet stays silent");
            return;
        };
        let wallet = self.wallet.clone();
        let events = self.events.clone();
        handle.spawn(async move {
            tokio::time::sleep(wallet.response_delay).await;
            match wallet.approval {
                Approval::Approve => {
                    if resumed {
                        let _ = events.send(ConnectorEvent::Otp(wallet.otp.clone()));
                    } else {
                        let _ = events.send(ConnectorEvent::ClientsReady);
                    }
                    wallet.authorized.store(true, Ordering::Release);
                    wallet.touch_channel();
                    let _ = events.send(ConnectorEvent::Authorized);
                }
                Approval::Reject => {
                    let _ = events.send(ConnectorEvent::Rejected);
                }
                Approval::Manual => {}
            }
        });
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn originator_session_connect(&self) -> Result<Option<ChannelConfig>, SdkError> {
        let channel = self.wallet.channel();
        if channel.as_ref().is_some_and(ChannelConfig::has_channel) {
            self.ready.store(true, Ordering::Release);
            self.answer(true);
        }
        Ok(channel)
    }

    async fn generate_channel_id_connect(&self) -> Result<ChannelDescriptor, SdkError> {
        let channel_id = random_hex(16);
        let channel = ChannelConfig {
            channel_id: channel_id.clone(),
            local_key: Some(self.public_key.clone()),
            last_active: None,
            valid_until: None,
            relay_persistence: None,
        };
        *self.wallet.channel.lock().expect("channel mutex poisoned") = Some(channel);
        self.ready.store(true, Ordering::Release);
        self.answer(false);
        Ok(ChannelDescriptor { channel_id, pub_key: Some(self.public_key.clone()) })
    }

    fn key_info(&self) -> Option<KeyInfo> {
        Some(KeyInfo {
            public_key: self.public_key.clone(),
            peer_public_key: self.wallet.is_authorized().then(|| "03loopback".to_owned()),
            keys_exchanged: self.wallet.is_authorized(),
        })
    }

    fn channel_config(&self) -> Option<ChannelConfig> {
        self.wallet.channel()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn is_authorized(&self) -> bool {
        self.wallet.is_authorized()
    }

    fn is_paused(&self) -> bool {
        false
    }

    async fn disconnect(&self, options: DisconnectOptions) -> Result<(), SdkError> {
        self.ready.store(false, Ordering::Release);
        if options.terminate {
            self.wallet.forget_channel();
        }
        Ok(())
    }

    async fn init_from_dapp_storage(&self) -> Result<(), SdkError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }

    fn service_status(&self) -> JsonValue {
        json!({ "connected": self.is_ready(), "authorized": self.is_authorized() })
    }
}

/// Creates [`LoopbackConnector`]s and keeps the latest one reachable.
#[derive(Default)]
pub struct LoopbackConnectorFactory {
    wallet: Arc<LoopbackWallet>,
    last: Mutex<Option<Arc<LoopbackConnector>>>,
}

impl LoopbackConnectorFactory {
    pub fn new(wallet: Arc<LoopbackWallet>) -> Self {
        Self { wallet, last: Mutex::new(None) }
    }

    pub fn wallet(&self) -> &Arc<LoopbackWallet> {
        &self.wallet
    }

    pub fn last(&self) -> Option<Arc<LoopbackConnector>> {
        self.last.lock().expect("connector mutex poisoned").clone()
    }
}

impl ConnectorFactory for LoopbackConnectorFactory {
    fn create(&self, config: ConnectorConfig) -> Result<Arc<dyn Connector>, SdkError> {
        log::debug!(
            "[LoopbackConnectorFactory] new connector for {} ({})",
            config.dapp_metadata.name.as_deref().unwrap_or("unnamed dapp"),
            config.platform_type.as_str()
        );
        let connector = Arc::new(LoopbackConnector::new(self.wallet.clone(), config));
        *self.last.lock().expect("connector mutex poisoned") = Some(connector.clone());
        Ok(connector)
    }
}

/// Provider that answers from a [`LoopbackWallet`].
pub struct LoopbackProvider {
    wallet: Arc<LoopbackWallet>,
    state: Mutex<ProviderState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl LoopbackProvider {
    pub fn new(wallet: Arc<LoopbackWallet>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { wallet, state: Mutex::new(ProviderState::default()), events }
    }

    fn expose_accounts(&self) -> Vec<String> {
        let accounts = self.wallet.accounts.clone();
        let changed = {
            let mut state = self.state.lock().expect("provider state mutex poisoned");
            let changed = state.accounts != accounts;
            state.accounts = accounts.clone();
            state.chain_id = Some(self.wallet.chain_id.clone());
            state.is_connected = true;
            changed
        };
        if changed {
            self.emit(ProviderEvent::AccountsChanged(accounts.clone()));
        }
        accounts
    }

    fn require_approval(&self) -> Result<(), SdkError> {
        match self.wallet.approval {
            Approval::Reject => Err(SdkError::user_rejected()),
            Approval::Approve | Approval::Manual => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for LoopbackProvider {
    async fn request(&self, args: RequestArguments) -> Result<JsonValue, SdkError> {
        log::debug!("[LoopbackProvider] {}", args.method);
        match args.method.as_str() {
            RPC_REQUEST_ACCOUNTS => {
                self.require_approval()?;
                Ok(json!(self.expose_accounts()))
            }
            "eth_accounts" => {
                Ok(json!(self.state.lock().expect("provider state mutex poisoned").accounts))
            }
            "eth_chainId" => Ok(json!(self.wallet.chain_id)),
            RPC_CONNECT_SIGN => {
                self.require_approval()?;
                self.expose_accounts();
                let message = args
                    .params
                    .get(0)
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| SdkError::Rpc(RpcError::new(-32602, "missing message")))?;
                // Not a real signature; the loopback wallet holds no keys.
                Ok(json!(format!("0x{}", hex::encode(message.as_bytes()))))
            }
            RPC_CONNECT_WITH => {
                self.require_approval()?;
                self.expose_accounts();
                let inner = args.params.get(0).cloned().unwrap_or(JsonValue::Null);
                let inner: RequestArguments = serde_json::from_value(inner)
                    .map_err(|err| SdkError::Rpc(RpcError::new(-32602, err.to_string())))?;
                self.request(inner).await
            }
            RPC_GET_PERMISSIONS => Ok(json!([{ "parentCapability": "eth_accounts" }])),
            RPC_REVOKE_PERMISSIONS => {
                self.state.lock().expect("provider state mutex poisoned").accounts.clear();
                self.emit(ProviderEvent::AccountsChanged(Vec::new()));
                Ok(JsonValue::Null)
            }
            "personal_sign" => {
                let message = args.params.get(0).cloned().unwrap_or(JsonValue::Null);
                Ok(json!(format!("0x{}", hex::encode(message.to_string()))))
            }
            other => Err(SdkError::Rpc(RpcError::new(
                -32601,
                format!("method {other} is not supported by the loopback wallet"),
            ))),
        }
    }

    fn set_connected(&self) {
        let chain_id = {
            let mut state = self.state.lock().expect("provider state mutex poisoned");
            state.is_connected = true;
            state.initialized = true;
            state.chain_id.get_or_insert_with(|| self.wallet.chain_id.clone()).clone()
        };
        self.emit(ProviderEvent::Connect { chain_id: Some(chain_id) });
    }

    fn handle_disconnect(&self, terminate: bool) {
        {
            let mut state = self.state.lock().expect("provider state mutex poisoned");
            state.is_connected = false;
            if terminate {
                state.accounts.clear();
                state.chain_id = None;
            }
        }
        self.emit(ProviderEvent::Disconnect);
    }

    fn initialize_state(&self, accounts: Vec<String>, chain_id: String) {
        let mut state = self.state.lock().expect("provider state mutex poisoned");
        state.initialized = true;
        state.accounts = accounts;
        state.chain_id = Some(chain_id);
    }

    async fn force_initialize_state(&self) -> Result<(), SdkError> {
        {
            let mut state = self.state.lock().expect("provider state mutex poisoned");
            state.initialized = true;
            state.chain_id = Some(self.wallet.chain_id.clone());
        }
        self.emit(ProviderEvent::ChainChanged(self.wallet.chain_id.clone()));
        Ok(())
    }

    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> ProviderState {
        self.state.lock().expect("provider state mutex poisoned").clone()
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}
