//! Session orchestration against a remote wallet.

mod initializer;
mod listeners;
mod modals;
mod otp;
mod strategy;

pub use strategy::{select_strategy, ConnectionStrategy, StartConnectionExtras};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::analytics::Analytics;
use crate::config::{CommunicationLayerPreference, DappMetadata, LoggingOptions};
use crate::connector::{ChannelConfig, Connector, ConnectorFactory, DisconnectOptions, KeyInfo};
use crate::constants::{DEFAULT_SERVER_URL, EVENT_CHANNEL_CAPACITY};
use crate::error::SdkError;
use crate::events::SdkEvent;
use crate::links::OriginatorInfo;
use crate::modal::{LogModalFactory, ModalFactory, ModalHook};
use crate::platform::PlatformManager;
use crate::provider::Provider;
use crate::state::{RemoteConnectionState, SessionStatus, Transition};
use crate::storage::StorageManager;

/// Callbacks into the owning SDK, fired from modal actions.
#[derive(Clone, Default)]
pub struct RemoteHooks {
    /// The user closed the OTP prompt.
    pub on_pending_modal_disconnect: Option<ModalHook>,
    /// The user asked to terminate from the install prompt.
    pub terminate: Option<ModalHook>,
    /// The user picked the browser extension from the select prompt.
    pub connect_with_extension: Option<ModalHook>,
}

pub struct RemoteConnectionOptions {
    pub communication_layer_preference: CommunicationLayerPreference,
    pub use_deeplink: bool,
    pub prefer_desktop: bool,
    pub communication_server_url: String,
    pub transports: Vec<String>,
    pub dapp_metadata: DappMetadata,
    pub sdk_version: String,
    pub storage_enabled: bool,
    pub logging: LoggingOptions,
    pub platform: PlatformManager,
    pub analytics: Arc<Analytics>,
    pub storage: Option<Arc<dyn StorageManager>>,
    pub provider: Arc<dyn Provider>,
    pub connector_factory: Arc<dyn ConnectorFactory>,
    pub modals: Arc<dyn ModalFactory>,
    pub events: broadcast::Sender<SdkEvent>,
    pub hooks: RemoteHooks,
}

impl RemoteConnectionOptions {
    pub fn new(
        platform: PlatformManager,
        analytics: Arc<Analytics>,
        provider: Arc<dyn Provider>,
        connector_factory: Arc<dyn ConnectorFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            communication_layer_preference: CommunicationLayerPreference::Socket,
            use_deeplink: false,
            prefer_desktop: false,
            communication_server_url: DEFAULT_SERVER_URL.to_owned(),
            transports: Vec::new(),
            dapp_metadata: DappMetadata::default(),
            sdk_version: crate::constants::SDK_VERSION.to_owned(),
            storage_enabled: true,
            logging: LoggingOptions::default(),
            platform,
            analytics,
            storage: None,
            provider,
            connector_factory,
            modals: Arc::new(LogModalFactory),
            events,
            hooks: RemoteHooks::default(),
        }
    }
}

struct Inner {
    options: RemoteConnectionOptions,
    debug: bool,
    state: Mutex<RemoteConnectionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the session state of one dapp-to-wallet connection and drives it
/// through connect, reconnect and disconnect.
#[derive(Clone)]
pub struct RemoteConnection {
    inner: Arc<Inner>,
}

impl RemoteConnection {
    pub fn new(options: RemoteConnectionOptions) -> Self {
        let state = RemoteConnectionState::new(
            options.platform.clone(),
            options.communication_layer_preference,
            options.use_deeplink,
            options.prefer_desktop,
        );
        let debug = options.logging.runtime().remote_layer || options.logging.debug_enabled();
        Self {
            inner: Arc::new(Inner {
                options,
                debug,
                state: Mutex::new(state),
                listener: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn options(&self) -> &RemoteConnectionOptions {
        &self.inner.options
    }

    pub(crate) fn debug(&self) -> bool {
        self.inner.debug
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RemoteConnectionState> {
        self.inner.state.lock().expect("remote connection state mutex poisoned")
    }

    /// Applies `transition`, then unmounts whatever modals it detached.
    pub(crate) fn apply(&self, transition: Transition) -> bool {
        let outcome = self.state().apply(transition);
        outcome.detached.unmount();
        outcome.changed
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.options.provider
    }

    pub fn analytics(&self) -> &Arc<Analytics> {
        &self.inner.options.analytics
    }

    pub fn platform_manager(&self) -> &PlatformManager {
        &self.inner.options.platform
    }

    pub fn originator_info(&self) -> OriginatorInfo {
        self.inner.options.analytics.originator().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status().clone()
    }

    /// Loads the persisted channel, creates the connector and attaches the
    /// event listeners.
    pub async fn init_remote_communication(&self) -> Result<(), SdkError> {
        let persisted_channel = match &self.inner.options.storage {
            Some(storage) => match storage.channel_config().await {
                Ok(config) => config.filter(ChannelConfig::has_channel),
                Err(err) => {
                    log::warn!("[RemoteConnection: init_remote_communication()] {err}");
                    None
                }
            },
            None => None,
        };

        let connector = self.initialize_connector(persisted_channel)?;
        connector.init_from_dapp_storage().await?;
        self.setup_listeners();
        Ok(())
    }

    pub fn connector(&self) -> Result<Arc<dyn Connector>, SdkError> {
        self.state().connector().cloned().ok_or(SdkError::InvalidConnector)
    }

    pub fn has_connector(&self) -> bool {
        self.state().connector().is_some()
    }

    pub fn universal_link(&self) -> Result<String, SdkError> {
        self.state().universal_link().map(str::to_owned).ok_or(SdkError::ConnectionNotStarted)
    }

    pub fn qrcode_link(&self) -> Option<String> {
        self.state().qrcode_link().map(str::to_owned)
    }

    pub fn channel_config(&self) -> Option<ChannelConfig> {
        self.connector().ok().and_then(|connector| connector.channel_config())
    }

    pub fn key_info(&self) -> Option<KeyInfo> {
        self.connector().ok().and_then(|connector| connector.key_info())
    }

    pub fn is_connected(&self) -> bool {
        self.connector().map(|connector| connector.is_ready()).unwrap_or(false)
    }

    pub fn is_authorized(&self) -> bool {
        self.state().authorized()
    }

    pub fn is_paused(&self) -> bool {
        self.connector().map(|connector| connector.is_paused()).unwrap_or(false)
    }

    /// Tears the session down. With `terminate` the provider is forced into
    /// a terminated state and the pending modal is gone before the
    /// connector hears about it.
    pub async fn disconnect(&self, options: DisconnectOptions) -> Result<(), SdkError> {
        if self.debug() {
            log::debug!("[RemoteConnection: disconnect()] {options:?}");
        }
        if options.terminate {
            self.provider().handle_disconnect(true);
        }
        self.apply(Transition::Disconnected { terminate: options.terminate });

        let connector = self.state().connector().cloned();
        let result = match connector {
            Some(connector) => connector.disconnect(options).await,
            None => Ok(()),
        };
        if options.terminate {
            self.forget_persisted_channel().await;
        }
        self.cleanup_connector(options.terminate);
        result
    }

    /// Writes the connector's channel to storage once the wallet accepted it.
    pub(crate) fn persist_channel(&self) {
        let Some(storage) = self.inner.options.storage.clone() else {
            return;
        };
        let Some(config) = self.channel_config().filter(ChannelConfig::has_channel) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = storage.persist_channel_config(&config).await {
                log::warn!("[RemoteConnection: persist_channel()] {err}");
            }
        });
    }

    pub(crate) async fn forget_persisted_channel(&self) {
        if let Some(storage) = &self.inner.options.storage {
            if let Err(err) = storage.terminate().await {
                log::warn!("[RemoteConnection: forget_persisted_channel()] {err}");
            }
        }
    }
}
