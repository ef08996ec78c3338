use super::*;
use crate::config::DappMetadata;
use crate::connector::ConnectorEvent;
use crate::constants::{
    PROVIDER_TYPE_EXTENSION, STORAGE_DAPP_CHAIN_ID, STORAGE_DAPP_SELECTED_ADDRESS,
    STORAGE_PROVIDER_TYPE,
};
use crate::events::ProviderEvent;
use crate::links::LinkParams;
use crate::platform::{PageInfo, PlatformType};
use crate::storage::MemoryStorage;
use crate::testing::{settle, wait_until, Harness, Journal, MockHost, MockProvider};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::TryRecvError;

fn options() -> SdkOptions {
    SdkOptions {
        dapp_metadata: DappMetadata {
            name: Some("Test Dapp".to_owned()),
            url: Some("https://dapp.test".to_owned()),
            ..DappMetadata::default()
        },
        ..SdkOptions::default()
    }
}

fn sdk(harness: &Harness) -> MetaMaskSdk {
    MetaMaskSdk::new(options(), harness.services()).expect("sdk")
}

fn host_with_extension(platform: PlatformType) -> (MockHost, Arc<MockProvider>) {
    let extension = Arc::new(MockProvider::new("extension", Journal::default()));
    let mut host = MockHost::new(platform);
    host.extension = Some(extension.clone());
    (host, extension)
}

fn minute_ago() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock");
    now.as_millis() as u64 - 60 * 1000
}

async fn stored(storage: &MemoryStorage, key: &str) -> Option<String> {
    storage.item(key).await.expect("storage item")
}

#[test]
fn construction_requires_metadata_or_a_page() {
    let harness = Harness::new(PlatformType::NonBrowser);
    let err = MetaMaskSdk::new(SdkOptions::default(), harness.services()).err();
    assert_eq!(err, Some(SdkError::MissingDappMetadata));
}

#[test]
fn construction_falls_back_to_page_metadata() {
    let mut host = MockHost::new(PlatformType::DesktopWeb);
    host.page = Some(PageInfo {
        url: Some("https://page.test/app".to_owned()),
        title: Some("Page Title".to_owned()),
        favicon: None,
    });
    let harness = Harness::with_host(host);
    let sdk = MetaMaskSdk::new(SdkOptions::default(), harness.services()).expect("sdk");
    let metadata = sdk.dapp_metadata();
    assert_eq!(metadata.url.as_deref(), Some("https://page.test/app"));
    assert_eq!(metadata.name.as_deref(), Some("Page Title"));
    assert!(!sdk.is_initialized());
}

#[test]
fn construction_rejects_non_http_urls() {
    let harness = Harness::new(PlatformType::NonBrowser);
    let mut options = options();
    options.dapp_metadata.url = Some("ftp://dapp.test".to_owned());
    let err = MetaMaskSdk::new(options, harness.services()).err().expect("error");
    assert!(matches!(err, SdkError::InvalidDappMetadata { .. }));
}

#[test]
fn accessors_before_init() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let sdk = sdk(&harness);
    assert_eq!(sdk.universal_link(), Err(SdkError::UniversalLinkUnavailable));
    assert!(matches!(sdk.mobile_provider(), Err(SdkError::NotInitialized { .. })));
    assert!(matches!(sdk.provider(), Err(SdkError::ProviderUnavailable)));
    assert!(!sdk.is_authorized());
    assert_eq!(sdk.channel_id(), None);
}

#[tokio::test]
async fn init_runs_the_pipeline_once() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let sdk = sdk(&harness);
    let mut events = sdk.subscribe();

    let (first, second, third) = tokio::join!(sdk.init(), sdk.init(), sdk.init());
    first.expect("init");
    second.expect("init");
    third.expect("init");
    sdk.init().await.expect("init again");

    assert!(sdk.is_initialized());
    assert_eq!(harness.factory.creates(), 1);
    assert_eq!(harness.sink.count("sdk_initialized"), 1);
    assert_eq!(
        events.try_recv().expect("initialized event"),
        SdkEvent::provider_update(ProviderUpdateType::Initialized)
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(sdk.remote_connection().is_some());
    assert!(sdk.mobile_provider().is_ok());
}

#[tokio::test]
async fn pipeline_hands_options_to_the_connector() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let mut options = options();
    options.logging.developer_mode = true;
    options.transports = vec!["websocket".to_owned()];
    let sdk = MetaMaskSdk::new(options, harness.services()).expect("sdk");
    sdk.init().await.expect("init");

    let configs = harness.factory.configs.lock().expect("configs").clone();
    assert_eq!(configs.len(), 1);
    let config = &configs[0];
    assert_eq!(config.context, "dapp");
    assert_eq!(config.platform_type, PlatformType::DesktopWeb);
    assert_eq!(config.transports, vec!["websocket".to_owned()]);
    assert!(config.logging.remote_layer && config.logging.ecies_layer);
    assert_eq!(config.dapp_metadata.name.as_deref(), Some("Test Dapp"));
    assert!(config.anon_id.is_some());
}

#[tokio::test]
async fn in_app_browser_uses_the_injected_provider() {
    let injected = Arc::new(MockProvider::new("injected", Journal::default()));
    let mut host = MockHost::new(PlatformType::MetaMaskMobileWebview);
    host.injected = Some(injected.clone());
    let harness = Harness::with_host(host);
    let sdk = sdk(&harness);

    sdk.init().await.expect("init");
    assert!(sdk.is_initialized());
    assert!(sdk.remote_connection().is_none());
    assert_eq!(harness.factory.creates(), 0);
    assert_eq!(harness.sink.count("sdk_use_inapp_browser"), 1);

    let accounts = sdk.connect().await.expect("connect");
    assert_eq!(accounts, json!(["0xabc"]));
    assert_eq!(injected.methods(), vec!["eth_requestAccounts".to_owned()]);

    let mut events = sdk.subscribe();
    sdk.terminate().await.expect("terminate");
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn extension_only_skips_the_remote_connection() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    let harness = Harness::with_host(host);
    let mut options = options();
    options.extension_only = true;
    let sdk = MetaMaskSdk::new(options, harness.services()).expect("sdk");

    sdk.init().await.expect("init");
    assert!(sdk.is_extension_active());
    assert!(sdk.remote_connection().is_none());
    assert_eq!(harness.sink.count("sdk_use_extension"), 1);

    sdk.connect().await.expect("connect");
    assert_eq!(extension.methods(), vec!["eth_requestAccounts".to_owned()]);
    assert!(harness.provider.methods().is_empty());
}

#[tokio::test]
async fn connect_waits_for_the_install_prompt_to_resolve() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let sdk = sdk(&harness);

    let connect = {
        let sdk = sdk.clone();
        tokio::spawn(async move { sdk.connect().await })
    };
    wait_until(|| harness.modals.install_created() == 1).await;
    assert!(sdk.universal_link().expect("link").contains("channelId=channel-1"));
    harness.connector.emit(ConnectorEvent::Authorized);

    let accounts = settle(connect).await.expect("join").expect("connect");
    assert_eq!(accounts, json!(["0xabc"]));
    assert!(sdk.is_authorized());
    assert_eq!(harness.provider.methods(), vec!["eth_requestAccounts".to_owned()]);
}

#[tokio::test]
async fn connect_skips_negotiation_once_authorized() {
    let harness = Harness::with_session(
        PlatformType::DesktopWeb,
        crate::connector::ChannelConfig {
            channel_id: "known".to_owned(),
            last_active: Some(minute_ago()),
            ..Default::default()
        },
    );
    let sdk = sdk(&harness);

    settle(sdk.connect()).await.expect("first connect");
    settle(sdk.connect()).await.expect("second connect");

    assert_eq!(harness.connector.originator_calls.load(Ordering::Relaxed), 1);
    assert_eq!(sdk.channel_id().as_deref(), Some("known"));
}

#[tokio::test]
async fn connect_and_sign_carries_the_message_in_the_link() {
    let harness = Harness::with_session(PlatformType::MobileWeb, Default::default());
    let sdk = sdk(&harness);

    settle(sdk.connect_and_sign("hello")).await.expect("connect and sign");

    let request = harness.provider.requests.lock().expect("requests").last().cloned();
    assert_eq!(request, Some(RequestArguments::new(RPC_CONNECT_SIGN, json!(["hello"]))));
    let link = LinkParams::from_link(&sdk.universal_link().expect("link")).expect("decode");
    assert_eq!(link.rpc.map(|rpc| rpc.method), Some(RPC_CONNECT_SIGN.to_owned()));
    assert_eq!(harness.host.opened().len(), 1);
}

#[tokio::test]
async fn connect_with_wraps_the_request() {
    let harness = Harness::with_session(PlatformType::MobileWeb, Default::default());
    let sdk = sdk(&harness);
    let inner = RequestArguments::new("eth_sendTransaction", json!([{ "to": "0x1" }]));

    settle(sdk.connect_with(inner)).await.expect("connect with");

    let request = harness.provider.requests.lock().expect("requests").last().cloned();
    assert_eq!(
        request,
        Some(RequestArguments::new(
            RPC_CONNECT_WITH,
            json!([{ "method": "eth_sendTransaction", "params": [{ "to": "0x1" }] }])
        ))
    );
}

#[tokio::test]
async fn terminate_clears_storage_and_disconnects() {
    let harness = Harness::with_session(PlatformType::MobileWeb, Default::default());
    let storage = Arc::new(MemoryStorage::new());
    for key in [STORAGE_PROVIDER_TYPE, STORAGE_DAPP_CHAIN_ID, STORAGE_DAPP_SELECTED_ADDRESS] {
        storage.set_item(key, "value").await.expect("seed");
    }
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");
    sdk.init().await.expect("init");
    let mut events = sdk.subscribe();

    sdk.terminate().await.expect("terminate");

    assert_eq!(
        events.try_recv().expect("terminate event"),
        SdkEvent::provider_update(ProviderUpdateType::Terminate)
    );
    assert_eq!(
        *harness.connector.disconnects.lock().expect("disconnects"),
        vec![DisconnectOptions { terminate: true, send_message: true }]
    );
    for key in [STORAGE_PROVIDER_TYPE, STORAGE_DAPP_CHAIN_ID, STORAGE_DAPP_SELECTED_ADDRESS] {
        assert_eq!(stored(&storage, key).await, None);
    }
    let journal = &harness.journal;
    assert!(
        journal.position("provider.handle_disconnect:true") < journal.position("connector.disconnect")
    );
}

#[tokio::test]
async fn connect_after_terminate_starts_over() {
    let harness = Harness::with_session(PlatformType::MobileWeb, Default::default());
    let sdk = sdk(&harness);
    settle(sdk.connect()).await.expect("connect");
    sdk.terminate().await.expect("terminate");

    settle(sdk.connect()).await.expect("reconnect");
    assert_eq!(harness.factory.creates(), 2);
    assert_eq!(harness.host.opened().len(), 2);
}

#[tokio::test]
async fn extension_rejection_restores_the_sdk_provider() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    extension.queue_response(Err(SdkError::user_rejected()));
    let harness = Harness::with_host(host);
    let storage = Arc::new(MemoryStorage::new());
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");
    sdk.init().await.expect("init");
    let mut events = sdk.subscribe();

    let err = sdk.connect_with_extension_provider().await.unwrap_err();

    assert!(err.is_user_rejection());
    assert!(!sdk.is_extension_active());
    let provider = sdk.provider().expect("provider");
    provider.request(RequestArguments::new("eth_chainId", json!([]))).await.expect("request");
    assert_eq!(harness.provider.methods(), vec!["eth_chainId".to_owned()]);
    assert!(matches!(
        events.try_recv().expect("response event"),
        SdkEvent::ConnectWithResponse { .. }
    ));
    assert_eq!(harness.sink.count("sdk_connection_rejected"), 1);
    assert_eq!(stored(&storage, STORAGE_PROVIDER_TYPE).await, None);
}

#[tokio::test]
async fn extension_session_round_trip() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    let harness = Harness::with_host(host);
    let storage = Arc::new(MemoryStorage::new());
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");
    sdk.init().await.expect("init");
    let mut events = sdk.subscribe();

    sdk.connect_with_extension_provider().await.expect("extension connect");
    assert!(sdk.is_extension_active());
    assert_eq!(
        stored(&storage, STORAGE_PROVIDER_TYPE).await.as_deref(),
        Some(PROVIDER_TYPE_EXTENSION)
    );
    assert_eq!(
        events.try_recv().expect("extension event"),
        SdkEvent::provider_update(ProviderUpdateType::Extension)
    );
    assert_eq!(harness.sink.count("sdk_use_extension"), 1);

    sdk.connect().await.expect("connect through extension");
    assert_eq!(extension.methods(), vec!["eth_requestAccounts".to_owned(); 2]);

    sdk.terminate().await.expect("terminate");
    assert_eq!(extension.methods().last().map(String::as_str), Some("wallet_revokePermissions"));
    assert!(!sdk.is_extension_active());
    assert_eq!(
        events.try_recv().expect("terminate event"),
        SdkEvent::provider_update(ProviderUpdateType::Terminate)
    );
    assert!(harness.connector.disconnects.lock().expect("disconnects").is_empty());
    assert_eq!(stored(&storage, STORAGE_PROVIDER_TYPE).await, None);
}

#[tokio::test]
async fn stored_preference_reconnects_the_extension() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    let harness = Harness::with_host(host);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(STORAGE_PROVIDER_TYPE, PROVIDER_TYPE_EXTENSION).await.expect("seed");
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");

    sdk.init().await.expect("init");
    wait_until(|| sdk.is_extension_active()).await;
    assert_eq!(harness.sink.count("sdk_extension_utilized"), 1);
    assert_eq!(extension.methods(), vec!["eth_requestAccounts".to_owned()]);
}

#[tokio::test]
async fn failed_extension_reconnect_forgets_the_preference() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    extension.queue_response(Err(SdkError::provider("extension locked")));
    let harness = Harness::with_host(host);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(STORAGE_PROVIDER_TYPE, PROVIDER_TYPE_EXTENSION).await.expect("seed");
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");

    sdk.init().await.expect("init");
    for _ in 0..200 {
        if stored(&storage, STORAGE_PROVIDER_TYPE).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stored(&storage, STORAGE_PROVIDER_TYPE).await, None);
    assert!(!sdk.is_extension_active());
}

#[tokio::test]
async fn extension_events_reach_the_sdk_provider() {
    let (host, extension) = host_with_extension(PlatformType::DesktopWeb);
    let harness = Harness::with_host(host);
    let storage = Arc::new(MemoryStorage::new());
    let sdk = MetaMaskSdk::new(options(), harness.services().with_storage(storage.clone()))
        .expect("sdk");
    sdk.init().await.expect("init");
    sdk.connect_with_extension_provider().await.expect("extension connect");

    extension.raise(ProviderEvent::ChainChanged("0x5".to_owned()));
    extension.raise(ProviderEvent::AccountsChanged(Vec::new()));
    wait_until(|| harness.provider.emitted.lock().expect("emitted").len() == 2).await;

    assert_eq!(
        *harness.provider.emitted.lock().expect("emitted"),
        vec![
            ProviderEvent::ChainChanged("0x5".to_owned()),
            ProviderEvent::AccountsChanged(Vec::new())
        ]
    );
    for _ in 0..200 {
        if stored(&storage, STORAGE_PROVIDER_TYPE).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stored(&storage, STORAGE_PROVIDER_TYPE).await, None);
}

#[tokio::test(start_paused = true)]
async fn check_installation_immediately_connects_on_desktop_web() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let mut options = options();
    options.check_installation_immediately = true;
    let sdk = MetaMaskSdk::new(options, harness.services()).expect("sdk");

    sdk.init().await.expect("init");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.connector.originator_calls.load(Ordering::Relaxed), 0);
    tokio::time::sleep(Duration::from_millis(600)).await;
    wait_until(|| harness.modals.install_created() == 1).await;
    assert_eq!(harness.connector.originator_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn check_installation_immediately_is_ignored_elsewhere() {
    let harness = Harness::new(PlatformType::NonBrowser);
    let mut options = options();
    options.check_installation_immediately = true;
    let sdk = MetaMaskSdk::new(options, harness.services()).expect("sdk");

    sdk.init().await.expect("init");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.connector.originator_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn closing_the_otp_prompt_terminates_the_session() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let sdk = sdk(&harness);
    sdk.init().await.expect("init");
    let mut events = sdk.subscribe();

    harness.connector.emit(ConnectorEvent::Otp("8080".to_owned()));
    wait_until(|| harness.modals.pending_created() == 1).await;
    let pending = harness.modals.last_pending().expect("pending modal");
    let on_disconnect = pending.on_disconnect.clone().expect("disconnect hook");
    on_disconnect();

    wait_until(|| harness.connector.disconnects.lock().expect("disconnects").len() == 1).await;
    assert_eq!(
        events.try_recv().expect("terminate event"),
        SdkEvent::provider_update(ProviderUpdateType::Terminate)
    );
}

#[tokio::test]
async fn resume_restarts_only_unready_channels() {
    let harness = Harness::with_session(PlatformType::MobileWeb, Default::default());
    let sdk = sdk(&harness);

    settle(sdk.resume()).await.expect("resume");
    assert_eq!(harness.host.opened().len(), 1);

    harness.connector.ready.store(true, Ordering::Relaxed);
    settle(sdk.resume()).await.expect("resume");
    assert_eq!(harness.host.opened().len(), 1);
}

#[tokio::test]
async fn disconnect_keeps_the_session_resumable() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let sdk = sdk(&harness);
    sdk.disconnect().await.expect("disconnect before init");
    sdk.init().await.expect("init");

    sdk.disconnect().await.expect("disconnect");
    assert_eq!(
        *harness.connector.disconnects.lock().expect("disconnects"),
        vec![DisconnectOptions::default()]
    );
    assert!(sdk.remote_connection().is_some_and(|remote| remote.has_connector()));
}

#[tokio::test]
async fn universal_link_follows_the_deeplink_preference() {
    let harness = Harness::new(PlatformType::DesktopWeb);
    let mut options = options();
    options.use_deeplink = true;
    let sdk = MetaMaskSdk::new(options, harness.services()).expect("sdk");

    let connect = {
        let sdk = sdk.clone();
        tokio::spawn(async move { sdk.connect().await })
    };
    wait_until(|| harness.modals.install_created() == 1).await;

    let link = sdk.universal_link().expect("link");
    assert!(link.starts_with("metamask://connect?"), "{link}");
    assert_eq!(LinkParams::from_link(&link).expect("decode").channel_id, "channel-1");
    harness.connector.emit(ConnectorEvent::Authorized);
    settle(connect).await.expect("join").expect("connect");
}
