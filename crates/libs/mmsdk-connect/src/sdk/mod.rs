//! The dapp-facing SDK handle.
//!
//! [`MetaMaskSdk`] runs the initialization pipeline once, then routes
//! connect, sign and terminate requests either to the browser extension or
//! through a [`RemoteConnection`] to MetaMask mobile.

mod extension;
mod initializer;
#[cfg(test)]
mod tests;

use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;

use crate::analytics::{Analytics, AnalyticsSink, LogSink, TrackingEvent};
use crate::config::{DappMetadata, SdkOptions};
use crate::connector::{ChannelConfig, ConnectorFactory, DisconnectOptions, KeyInfo};
use crate::constants::{
    EVENT_CHANNEL_CAPACITY, RPC_CONNECT_SIGN, RPC_CONNECT_WITH, RPC_REQUEST_ACCOUNTS,
};
use crate::error::SdkError;
use crate::events::{ProviderUpdateType, SdkEvent};
use crate::installer::Installer;
use crate::modal::{LogModalFactory, ModalFactory};
use crate::platform::{HeadlessHost, PlatformHost, PlatformManager};
use crate::provider::{Provider, RequestArguments};
use crate::remote::{RemoteConnection, StartConnectionExtras};
use crate::storage::StorageManager;

/// Collaborators the SDK is built on. Everything except the provider and
/// the connector factory has a headless default.
#[derive(Clone)]
pub struct SdkServices {
    pub provider: Arc<dyn Provider>,
    pub connector_factory: Arc<dyn ConnectorFactory>,
    pub modals: Arc<dyn ModalFactory>,
    pub host: Arc<dyn PlatformHost>,
    /// Overrides the storage picked from `SdkOptions::storage`.
    pub storage: Option<Arc<dyn StorageManager>>,
    pub analytics_sink: Arc<dyn AnalyticsSink>,
}

impl SdkServices {
    pub fn new(provider: Arc<dyn Provider>, connector_factory: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            provider,
            connector_factory,
            modals: Arc::new(LogModalFactory),
            host: Arc::new(HeadlessHost),
            storage: None,
            analytics_sink: Arc::new(LogSink),
        }
    }

    pub fn with_modals(mut self, modals: Arc<dyn ModalFactory>) -> Self {
        self.modals = modals;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn PlatformHost>) -> Self {
        self.host = host;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageManager>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_analytics_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics_sink = sink;
        self
    }
}

/// Everything the pipeline resolves, filled in step by step.
#[derive(Default)]
struct Slots {
    platform: Option<PlatformManager>,
    analytics: Option<Arc<Analytics>>,
    storage: Option<Arc<dyn StorageManager>>,
    remote: Option<RemoteConnection>,
    installer: Option<Arc<Installer>>,
    active_provider: Option<Arc<dyn Provider>>,
    sdk_provider: Option<Arc<dyn Provider>>,
    extension: Option<Arc<dyn Provider>>,
    extension_active: bool,
    dapp_metadata: DappMetadata,
    debug: bool,
    extension_forwarder: Option<JoinHandle<()>>,
}

struct SdkInner {
    options: Mutex<SdkOptions>,
    services: SdkServices,
    events: broadcast::Sender<SdkEvent>,
    slots: Mutex<Slots>,
    initialized: AtomicBool,
    init: OnceCell<Result<(), SdkError>>,
}

impl Drop for SdkInner {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(forwarder) = slots.extension_forwarder.take() {
            forwarder.abort();
        }
    }
}

#[derive(Clone)]
pub struct MetaMaskSdk {
    inner: Arc<SdkInner>,
}

impl MetaMaskSdk {
    /// Builds the SDK and, inside a tokio runtime, starts initializing it in
    /// the background.
    ///
    /// Dapp metadata falls back to the hosting page; without a page and
    /// without a name or url this fails with
    /// [`SdkError::MissingDappMetadata`].
    pub fn new(mut options: SdkOptions, services: SdkServices) -> Result<Self, SdkError> {
        if options.dapp_metadata.is_empty() {
            let page = services.host.page_info().ok_or(SdkError::MissingDappMetadata)?;
            options.dapp_metadata.url = page.url;
            options.dapp_metadata.name = page.title;
        }
        options.dapp_metadata.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sdk = Self {
            inner: Arc::new(SdkInner {
                options: Mutex::new(options),
                services,
                events,
                slots: Mutex::new(Slots::default()),
                initialized: AtomicBool::new(false),
                init: OnceCell::new(),
            }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let background = sdk.clone();
            handle.spawn(async move {
                if let Err(err) = background.init().await {
                    log::error!("[MetaMaskSdk: new()] error during initialization: {err}");
                }
            });
        }
        Ok(sdk)
    }

    fn from_weak(weak: &Weak<SdkInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<SdkInner> {
        Arc::downgrade(&self.inner)
    }

    fn options(&self) -> MutexGuard<'_, SdkOptions> {
        self.inner.options.lock().expect("sdk options mutex poisoned")
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.slots.lock().expect("sdk slots mutex poisoned")
    }

    fn services(&self) -> &SdkServices {
        &self.inner.services
    }

    fn emit(&self, event: SdkEvent) {
        let _ = self.inner.events.send(event);
    }

    fn track(&self, event: TrackingEvent) {
        let analytics = self.slots().analytics.clone();
        if let Some(analytics) = analytics {
            analytics.send(event);
        }
    }

    fn debug(&self) -> bool {
        self.slots().debug
    }

    /// Runs the initialization pipeline. Concurrent and later callers share
    /// the first run's outcome.
    pub async fn init(&self) -> Result<(), SdkError> {
        self.inner
            .init
            .get_or_init(|| initializer::perform_sdk_initialization(self.clone()))
            .await
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.inner.events.subscribe()
    }

    /// Asks the wallet for accounts, connecting first when needed.
    pub async fn connect(&self) -> Result<JsonValue, SdkError> {
        let request = RequestArguments::new(RPC_REQUEST_ACCOUNTS, json!([]));
        self.request_with_connection(request, None).await
    }

    /// Connects and has the wallet sign `message` in the same approval.
    pub async fn connect_and_sign(&self, message: &str) -> Result<JsonValue, SdkError> {
        let request = RequestArguments::new(RPC_CONNECT_SIGN, json!([message]));
        self.request_with_connection(request.clone(), Some(request)).await
    }

    /// Connects and runs `request` in the same approval.
    pub async fn connect_with(&self, request: RequestArguments) -> Result<JsonValue, SdkError> {
        let wrapped = RequestArguments::new(RPC_CONNECT_WITH, json!([request]));
        self.request_with_connection(wrapped.clone(), Some(wrapped)).await
    }

    async fn request_with_connection(
        &self,
        request: RequestArguments,
        connect_with: Option<RequestArguments>,
    ) -> Result<JsonValue, SdkError> {
        self.init().await?;
        let (remote, extension_active) = {
            let slots = self.slots();
            (slots.remote.clone(), slots.extension_active)
        };

        if let (Some(remote), false) = (remote, extension_active) {
            match self.ensure_session(&remote, StartConnectionExtras { connect_with }).await {
                Ok(()) => {}
                Err(SdkError::ProviderSwitched(ProviderUpdateType::Extension))
                    if self.slots().extension_active =>
                {
                    if self.debug() {
                        log::debug!("[MetaMaskSdk: connect()] switched to the extension");
                    }
                }
                Err(err) => return Err(err),
            }
        }
        self.provider()?.request(request).await
    }

    async fn ensure_session(
        &self,
        remote: &RemoteConnection,
        extras: StartConnectionExtras,
    ) -> Result<(), SdkError> {
        if !remote.has_connector() {
            remote.init_remote_communication().await?;
        }
        if remote.is_authorized() {
            return Ok(());
        }
        let installer =
            self.slots().installer.clone().ok_or_else(|| SdkError::not_initialized("installer"))?;
        if installer.redirect_to_proper_install(remote, extras).await? {
            Ok(())
        } else {
            Err(SdkError::ProviderSwitched(ProviderUpdateType::Extension))
        }
    }

    /// Restarts the connection when the channel is not ready.
    pub async fn resume(&self) -> Result<(), SdkError> {
        self.init().await?;
        let remote = self.remote()?;
        if !remote.has_connector() {
            remote.init_remote_communication().await?;
        }
        if remote.is_connected() {
            return Ok(());
        }
        if self.debug() {
            log::debug!("[MetaMaskSdk: resume()] resuming channel");
        }
        remote.start_connection(StartConnectionExtras::default()).await
    }

    pub async fn disconnect(&self) -> Result<(), SdkError> {
        let remote = self.slots().remote.clone();
        match remote {
            Some(remote) => remote.disconnect(DisconnectOptions::default()).await,
            None => Ok(()),
        }
    }

    /// The link shown to the user: the deeplink when `use_deeplink` is set,
    /// the universal link otherwise.
    pub fn universal_link(&self) -> Result<String, SdkError> {
        let remote = self.slots().remote.clone();
        remote.and_then(|remote| remote.qrcode_link()).ok_or(SdkError::UniversalLinkUnavailable)
    }

    pub fn channel_id(&self) -> Option<String> {
        self.channel_config().map(|config| config.channel_id).filter(|id| !id.is_empty())
    }

    pub fn is_authorized(&self) -> bool {
        let remote = self.slots().remote.clone();
        remote.is_some_and(|remote| remote.is_authorized())
    }

    pub fn is_extension_active(&self) -> bool {
        self.slots().extension_active
    }

    /// The provider requests should go to right now.
    pub fn provider(&self) -> Result<Arc<dyn Provider>, SdkError> {
        self.slots().active_provider.clone().ok_or(SdkError::ProviderUnavailable)
    }

    /// The SDK's own provider, whichever provider is active.
    pub fn mobile_provider(&self) -> Result<Arc<dyn Provider>, SdkError> {
        self.slots().sdk_provider.clone().ok_or_else(|| SdkError::not_initialized("mobile_provider"))
    }

    pub fn remote_connection(&self) -> Option<RemoteConnection> {
        self.slots().remote.clone()
    }

    pub fn dapp_metadata(&self) -> DappMetadata {
        let slots = self.slots();
        if slots.platform.is_some() {
            return slots.dapp_metadata.clone();
        }
        drop(slots);
        self.options().dapp_metadata.clone()
    }

    pub fn channel_config(&self) -> Option<ChannelConfig> {
        let remote = self.slots().remote.clone();
        remote.and_then(|remote| remote.channel_config())
    }

    pub fn key_info(&self) -> Option<KeyInfo> {
        let remote = self.slots().remote.clone();
        remote.and_then(|remote| remote.key_info())
    }

    pub async fn ping(&self) -> Result<(), SdkError> {
        self.remote()?.connector()?.ping().await
    }

    pub fn reset_keys(&self) -> Result<(), SdkError> {
        self.remote()?.connector()?.reset_keys();
        Ok(())
    }

    fn remote(&self) -> Result<RemoteConnection, SdkError> {
        self.slots().remote.clone().ok_or_else(|| SdkError::not_initialized("remote_connection"))
    }

    async fn remove_stored(&self, key: &str) {
        let storage = self.slots().storage.clone();
        if let Some(storage) = storage {
            if let Err(err) = storage.remove_item(key).await {
                log::warn!("[MetaMaskSdk] can't remove {key}: {err}");
            }
        }
    }

    async fn set_stored(&self, key: &str, value: &str) {
        let storage = self.slots().storage.clone();
        if let Some(storage) = storage {
            if let Err(err) = storage.set_item(key, value).await {
                log::warn!("[MetaMaskSdk] can't persist {key}: {err}");
            }
        }
    }
}
