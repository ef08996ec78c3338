//! Recording doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::analytics::{Analytics, AnalyticsPayload, AnalyticsSink};
use crate::connector::{
    ChannelConfig, ChannelDescriptor, Connector, ConnectorConfig, ConnectorEvent,
    ConnectorFactory, DisconnectOptions, KeyInfo,
};
use crate::error::SdkError;
use crate::events::ProviderEvent;
use crate::links::OriginatorInfo;
use crate::modal::{
    InstallModal, InstallModalArgs, ModalFactory, ModalHook, PendingModal, PendingModalArgs,
};
use crate::platform::{PageInfo, PlatformHost, PlatformManager, PlatformType};
use crate::provider::{Provider, ProviderState, RequestArguments};
use crate::remote::{RemoteConnection, RemoteConnectionOptions};
use crate::sdk::SdkServices;

/// Ordered log of side effects across every double.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal mutex poisoned").push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal mutex poisoned").clone()
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|recorded| recorded == entry)
    }

    pub(crate) fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|recorded| *recorded == entry).count()
    }
}

/// Waits, in small steps, until `condition` holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached");
}

pub(crate) async fn settle<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future).await.expect("future did not settle")
}

pub(crate) struct MockConnector {
    journal: Journal,
    events: broadcast::Sender<ConnectorEvent>,
    pub(crate) session: Mutex<Option<ChannelConfig>>,
    pub(crate) ready: AtomicBool,
    pub(crate) originator_calls: AtomicUsize,
    pub(crate) generate_calls: AtomicUsize,
    pub(crate) disconnects: Mutex<Vec<DisconnectOptions>>,
    /// Raised from inside `generate_channel_id_connect`, before it returns.
    pub(crate) answer_on_generate: Mutex<Vec<ConnectorEvent>>,
}

impl MockConnector {
    pub(crate) fn new(journal: Journal) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            journal,
            events,
            session: Mutex::new(None),
            ready: AtomicBool::new(false),
            originator_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            disconnects: Mutex::new(Vec::new()),
            answer_on_generate: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_session(self, session: ChannelConfig) -> Self {
        *self.session.lock().expect("session mutex poisoned") = Some(session);
        self
    }

    pub(crate) fn emit(&self, event: ConnectorEvent) {
        self.events.send(event).expect("no connector listeners");
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn originator_session_connect(&self) -> Result<Option<ChannelConfig>, SdkError> {
        self.originator_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.session.lock().expect("session mutex poisoned").clone())
    }

    async fn generate_channel_id_connect(&self) -> Result<ChannelDescriptor, SdkError> {
        let sequence = self.generate_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let answers =
            std::mem::take(&mut *self.answer_on_generate.lock().expect("answers mutex poisoned"));
        for event in answers {
            let _ = self.events.send(event);
            tokio::task::yield_now().await;
        }
        Ok(ChannelDescriptor { channel_id: format!("channel-{sequence}"), pub_key: None })
    }

    fn key_info(&self) -> Option<KeyInfo> {
        Some(KeyInfo { public_key: "02cafe".to_owned(), ..KeyInfo::default() })
    }

    fn channel_config(&self) -> Option<ChannelConfig> {
        self.session.lock().expect("session mutex poisoned").clone()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn is_authorized(&self) -> bool {
        false
    }

    fn is_paused(&self) -> bool {
        false
    }

    async fn disconnect(&self, options: DisconnectOptions) -> Result<(), SdkError> {
        self.journal.record("connector.disconnect");
        self.disconnects.lock().expect("disconnects mutex poisoned").push(options);
        Ok(())
    }

    async fn init_from_dapp_storage(&self) -> Result<(), SdkError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }
}

pub(crate) struct MockConnectorFactory {
    pub(crate) connector: Arc<MockConnector>,
    pub(crate) configs: Mutex<Vec<ConnectorConfig>>,
}

impl ConnectorFactory for MockConnectorFactory {
    fn create(&self, config: ConnectorConfig) -> Result<Arc<dyn Connector>, SdkError> {
        self.configs.lock().expect("configs mutex poisoned").push(config);
        Ok(self.connector.clone())
    }
}

impl MockConnectorFactory {
    pub(crate) fn creates(&self) -> usize {
        self.configs.lock().expect("configs mutex poisoned").len()
    }
}

pub(crate) struct MockProvider {
    name: &'static str,
    journal: Journal,
    connected: AtomicBool,
    pub(crate) stall_requests: AtomicBool,
    pub(crate) requests: Mutex<Vec<RequestArguments>>,
    pub(crate) responses: Mutex<VecDeque<Result<JsonValue, SdkError>>>,
    pub(crate) force_init_error: Mutex<Option<SdkError>>,
    pub(crate) emitted: Mutex<Vec<ProviderEvent>>,
    pub(crate) disconnects: Mutex<Vec<bool>>,
    pub(crate) initial_state: Mutex<Option<(Vec<String>, String)>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockProvider {
    pub(crate) fn new(name: &'static str, journal: Journal) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            name,
            journal,
            connected: AtomicBool::new(false),
            stall_requests: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            force_init_error: Mutex::new(None),
            emitted: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            initial_state: Mutex::new(None),
            events,
        }
    }

    pub(crate) fn queue_response(&self, response: Result<JsonValue, SdkError>) {
        self.responses.lock().expect("responses mutex poisoned").push_back(response);
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .iter()
            .map(|request| request.method.clone())
            .collect()
    }

    pub(crate) fn raise(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn request(&self, args: RequestArguments) -> Result<JsonValue, SdkError> {
        self.journal.record(format!("{}.request:{}", self.name, args.method));
        let method = args.method.clone();
        self.requests.lock().expect("requests mutex poisoned").push(args);
        if self.stall_requests.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if let Some(response) = self.responses.lock().expect("responses mutex poisoned").pop_front()
        {
            return response;
        }
        match method.as_str() {
            "eth_requestAccounts" => Ok(json!(["0xabc"])),
            _ => Ok(JsonValue::Null),
        }
    }

    fn set_connected(&self) {
        self.journal.record(format!("{}.set_connected", self.name));
        self.connected.store(true, Ordering::Relaxed);
    }

    fn handle_disconnect(&self, terminate: bool) {
        self.journal.record(format!("{}.handle_disconnect:{terminate}", self.name));
        self.connected.store(false, Ordering::Relaxed);
        self.disconnects.lock().expect("disconnects mutex poisoned").push(terminate);
    }

    fn initialize_state(&self, accounts: Vec<String>, chain_id: String) {
        self.journal.record(format!("{}.initialize_state:{chain_id}", self.name));
        *self.initial_state.lock().expect("initial state mutex poisoned") =
            Some((accounts, chain_id));
    }

    async fn force_initialize_state(&self) -> Result<(), SdkError> {
        self.journal.record(format!("{}.force_initialize_state", self.name));
        match self.force_init_error.lock().expect("force_init mutex poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn emit(&self, event: ProviderEvent) {
        self.emitted.lock().expect("emitted mutex poisoned").push(event);
    }

    fn state(&self) -> ProviderState {
        ProviderState {
            is_connected: self.is_connected(),
            chain_id: Some("0x1".to_owned()),
            ..ProviderState::default()
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

pub(crate) struct MockPendingModal {
    journal: Journal,
    pub(crate) mounts: Mutex<Vec<bool>>,
    pub(crate) otp_values: Mutex<Vec<String>>,
    pub(crate) on_disconnect: Option<ModalHook>,
}

impl PendingModal for MockPendingModal {
    fn mount(&self, display_otp: bool) {
        self.journal.record("pending.mount");
        self.mounts.lock().expect("mounts mutex poisoned").push(display_otp);
    }

    fn unmount(&self) {
        self.journal.record("pending.unmount");
    }

    fn update_otp_value(&self, otp: &str) {
        self.journal.record(format!("pending.otp:{otp}"));
        self.otp_values.lock().expect("otp mutex poisoned").push(otp.to_owned());
    }
}

pub(crate) struct MockInstallModal {
    journal: Journal,
    pub(crate) args: InstallModalArgs,
    pub(crate) mounts: Mutex<Vec<String>>,
    pub(crate) unmounts: Mutex<Vec<bool>>,
}

impl InstallModal for MockInstallModal {
    fn mount(&self, link: &str) {
        self.journal.record("install.mount");
        self.mounts.lock().expect("mounts mutex poisoned").push(link.to_owned());
    }

    fn unmount(&self, should_terminate: bool) {
        self.journal.record("install.unmount");
        self.unmounts.lock().expect("unmounts mutex poisoned").push(should_terminate);
    }
}

pub(crate) struct MockModals {
    journal: Journal,
    pub(crate) pending: Mutex<Vec<Arc<MockPendingModal>>>,
    pub(crate) install: Mutex<Vec<Arc<MockInstallModal>>>,
}

impl MockModals {
    pub(crate) fn new(journal: Journal) -> Self {
        Self { journal, pending: Mutex::new(Vec::new()), install: Mutex::new(Vec::new()) }
    }

    pub(crate) fn last_pending(&self) -> Option<Arc<MockPendingModal>> {
        self.pending.lock().expect("pending mutex poisoned").last().cloned()
    }

    pub(crate) fn last_install(&self) -> Option<Arc<MockInstallModal>> {
        self.install.lock().expect("install mutex poisoned").last().cloned()
    }

    pub(crate) fn install_created(&self) -> usize {
        self.install.lock().expect("install mutex poisoned").len()
    }

    pub(crate) fn pending_created(&self) -> usize {
        self.pending.lock().expect("pending mutex poisoned").len()
    }
}

impl ModalFactory for MockModals {
    fn otp(&self, args: PendingModalArgs) -> Option<Arc<dyn PendingModal>> {
        let modal = Arc::new(MockPendingModal {
            journal: self.journal.clone(),
            mounts: Mutex::new(Vec::new()),
            otp_values: Mutex::new(Vec::new()),
            on_disconnect: args.on_disconnect,
        });
        self.pending.lock().expect("pending mutex poisoned").push(modal.clone());
        Some(modal)
    }

    fn install(&self, args: InstallModalArgs) -> Option<Arc<dyn InstallModal>> {
        let modal = Arc::new(MockInstallModal {
            journal: self.journal.clone(),
            args,
            mounts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
        });
        self.install.lock().expect("install mutex poisoned").push(modal.clone());
        Some(modal)
    }
}

pub(crate) struct MockHost {
    pub(crate) platform: PlatformType,
    pub(crate) page: Option<PageInfo>,
    pub(crate) extension: Option<Arc<MockProvider>>,
    pub(crate) injected: Option<Arc<MockProvider>>,
    pub(crate) opened: Mutex<Vec<(String, String)>>,
    pub(crate) alerts: Mutex<Vec<String>>,
}

impl MockHost {
    pub(crate) fn new(platform: PlatformType) -> Self {
        Self {
            platform,
            page: None,
            extension: None,
            injected: None,
            opened: Mutex::new(Vec::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().expect("opened mutex poisoned").clone()
    }

    pub(crate) fn alerts(&self) -> Vec<String> {
        self.alerts.lock().expect("alerts mutex poisoned").clone()
    }
}

impl PlatformHost for MockHost {
    fn platform_type(&self) -> PlatformType {
        self.platform
    }

    fn page_info(&self) -> Option<PageInfo> {
        self.page.clone()
    }

    fn open_link(&self, url: &str, target: &str) -> Result<(), SdkError> {
        self.opened.lock().expect("opened mutex poisoned").push((url.to_owned(), target.to_owned()));
        Ok(())
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().expect("alerts mutex poisoned").push(message.to_owned());
    }

    fn extension_provider(&self) -> Option<Arc<dyn Provider>> {
        self.extension.clone().map(|provider| provider as Arc<dyn Provider>)
    }

    fn injected_provider(&self) -> Option<Arc<dyn Provider>> {
        self.injected.clone().map(|provider| provider as Arc<dyn Provider>)
    }
}

#[derive(Default)]
pub(crate) struct CollectingSink {
    events: Mutex<Vec<&'static str>>,
}

impl CollectingSink {
    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("events mutex poisoned").clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.events().into_iter().filter(|sent| *sent == event).count()
    }
}

impl AnalyticsSink for CollectingSink {
    fn send(&self, payload: AnalyticsPayload) -> Result<(), SdkError> {
        self.events.lock().expect("events mutex poisoned").push(payload.event);
        Ok(())
    }
}

/// One of every double, wired to a shared journal.
pub(crate) struct Harness {
    pub(crate) journal: Journal,
    pub(crate) connector: Arc<MockConnector>,
    pub(crate) factory: Arc<MockConnectorFactory>,
    pub(crate) provider: Arc<MockProvider>,
    pub(crate) modals: Arc<MockModals>,
    pub(crate) host: Arc<MockHost>,
    pub(crate) sink: Arc<CollectingSink>,
}

impl Harness {
    pub(crate) fn new(platform: PlatformType) -> Self {
        Self::build(MockHost::new(platform), None)
    }

    pub(crate) fn with_session(platform: PlatformType, session: ChannelConfig) -> Self {
        Self::build(MockHost::new(platform), Some(session))
    }

    pub(crate) fn with_host(host: MockHost) -> Self {
        Self::build(host, None)
    }

    fn build(host: MockHost, session: Option<ChannelConfig>) -> Self {
        let journal = Journal::default();
        let mut connector = MockConnector::new(journal.clone());
        if let Some(session) = session {
            connector = connector.with_session(session);
        }
        let connector = Arc::new(connector);
        Self {
            factory: Arc::new(MockConnectorFactory {
                connector: connector.clone(),
                configs: Mutex::new(Vec::new()),
            }),
            connector,
            provider: Arc::new(MockProvider::new("provider", journal.clone())),
            modals: Arc::new(MockModals::new(journal.clone())),
            host: Arc::new(host),
            sink: Arc::new(CollectingSink::default()),
            journal,
        }
    }

    pub(crate) fn platform(&self) -> PlatformManager {
        PlatformManager::new(self.host.clone(), false, false)
    }

    pub(crate) fn remote_options(&self) -> RemoteConnectionOptions {
        let analytics = Arc::new(Analytics::new(
            true,
            "https://analytics.test",
            OriginatorInfo { platform: self.host.platform.as_str().to_owned(), ..OriginatorInfo::default() },
            self.sink.clone(),
        ));
        let mut options = RemoteConnectionOptions::new(
            self.platform(),
            analytics,
            self.provider.clone(),
            self.factory.clone(),
        );
        options.modals = self.modals.clone();
        options
    }

    pub(crate) fn remote(&self) -> RemoteConnection {
        RemoteConnection::new(self.remote_options())
    }

    pub(crate) async fn connected_remote(&self) -> RemoteConnection {
        let remote = self.remote();
        remote.init_remote_communication().await.expect("init remote communication");
        remote
    }

    pub(crate) fn services(&self) -> SdkServices {
        SdkServices::new(self.provider.clone(), self.factory.clone())
            .with_modals(self.modals.clone())
            .with_host(self.host.clone())
            .with_analytics_sink(self.sink.clone())
    }
}
