//! The ordered bootstrap pipeline behind [`MetaMaskSdk::init`].

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::MetaMaskSdk;
use crate::analytics::{resolve_anon_id, Analytics, TrackingEvent};
use crate::config::{DappMetadata, SdkOptions};
use crate::constants::{PROVIDER_TYPE_EXTENSION, SDK_VERSION, STORAGE_PROVIDER_TYPE};
use crate::error::SdkError;
use crate::events::{ProviderUpdateType, SdkEvent};
use crate::installer::Installer;
use crate::links::OriginatorInfo;
use crate::modal::ModalHook;
use crate::platform::PlatformManager;
use crate::provider::Provider;
use crate::remote::{RemoteConnection, RemoteConnectionOptions, RemoteHooks};
use crate::storage::{FileStorage, MemoryStorage, StorageManager};

/// Outcome of probing for the browser extension.
#[derive(Default)]
struct ExtensionPreferences {
    prefer_extension: bool,
    should_return: bool,
    extension: Option<Arc<dyn Provider>>,
}

pub(super) async fn perform_sdk_initialization(sdk: MetaMaskSdk) -> Result<(), SdkError> {
    let options = {
        let mut options = sdk.options();
        options.apply_defaults();
        options.clone()
    };
    if options.enable_debug.is_some() {
        log::warn!("enable_debug is removed. Please use enable_analytics instead.");
    }
    let debug = options.logging.debug_enabled();
    sdk.slots().debug = debug;
    if debug {
        log::debug!("[MetaMaskSdk: perform_sdk_initialization()] {options:?}");
    }

    let platform = setup_platform_manager(&sdk, &options, debug);
    let storage = setup_storage_manager(&sdk, &options);
    let analytics = setup_analytics(&sdk, &options, &platform, storage.as_deref()).await;
    let dapp_metadata = setup_dapp_metadata(&sdk, &options, &platform)?;

    let preferences =
        setup_extension_preferences(&sdk, &options, &platform, storage.as_deref(), &analytics)
            .await;
    if preferences.should_return {
        return Ok(());
    }

    let remote = setup_remote_connection_and_installer(
        &sdk,
        &options,
        &platform,
        &analytics,
        storage,
        dapp_metadata,
        preferences.extension.is_some(),
    );
    initialize_provider_and_event_listeners(&sdk, &remote).await?;
    handle_auto_and_extension_connections(
        &sdk,
        &options,
        &platform,
        &analytics,
        preferences.prefer_extension,
    );

    sdk.emit(SdkEvent::provider_update(ProviderUpdateType::Initialized));
    Ok(())
}

fn setup_platform_manager(sdk: &MetaMaskSdk, options: &SdkOptions, debug: bool) -> PlatformManager {
    let platform = PlatformManager::new(sdk.services().host.clone(), options.use_deeplink, debug);
    if debug {
        log::debug!(
            "[MetaMaskSdk: setup_platform_manager()] {:?}",
            platform.capabilities()
        );
    }
    sdk.slots().platform = Some(platform.clone());
    platform
}

fn setup_storage_manager(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
) -> Option<Arc<dyn StorageManager>> {
    if !options.storage.enabled {
        return None;
    }
    let storage: Arc<dyn StorageManager> = match (&sdk.services().storage, &options.storage.path) {
        (Some(injected), _) => injected.clone(),
        (None, Some(path)) => Arc::new(FileStorage::new(path.clone())),
        (None, None) => Arc::new(MemoryStorage::new()),
    };
    sdk.slots().storage = Some(storage.clone());
    Some(storage)
}

async fn setup_analytics(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
    platform: &PlatformManager,
    storage: Option<&dyn StorageManager>,
) -> Arc<Analytics> {
    let anon_id = resolve_anon_id(storage).await;
    let metadata = &options.dapp_metadata;
    let originator = OriginatorInfo {
        url: metadata.url.clone(),
        title: metadata.name.clone(),
        icon: metadata.icon_url.clone(),
        dapp_id: metadata.url.as_deref().and_then(dapp_id_from_url),
        platform: platform.platform_type().as_str().to_owned(),
        source: options.source.clone(),
        api_version: SDK_VERSION.to_owned(),
        anon_id: Some(anon_id),
    };
    let analytics = Arc::new(Analytics::new(
        options.enable_analytics,
        options.server_url(),
        originator,
        sdk.services().analytics_sink.clone(),
    ));
    analytics.send(TrackingEvent::Initialized);
    sdk.slots().analytics = Some(analytics.clone());
    analytics
}

fn dapp_id_from_url(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|parsed| parsed.host_str().map(str::to_owned))
}

fn setup_dapp_metadata(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
    platform: &PlatformManager,
) -> Result<DappMetadata, SdkError> {
    let mut metadata = options.dapp_metadata.clone();
    if platform.is_browser() {
        if let Some(page) = platform.page_info() {
            if metadata.url.is_none() {
                metadata.url = page.url;
            }
            if metadata.name.is_none() {
                metadata.name = page.title;
            }
            if metadata.icon_url.is_none() && metadata.base64_icon.is_none() {
                metadata.icon_url = page.favicon;
            }
        }
    }
    metadata.validate()?;
    sdk.slots().dapp_metadata = metadata.clone();
    Ok(metadata)
}

async fn setup_extension_preferences(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
    platform: &PlatformManager,
    storage: Option<&dyn StorageManager>,
    analytics: &Analytics,
) -> ExtensionPreferences {
    let mut preferences = ExtensionPreferences::default();
    let host = platform.host();

    if platform.is_metamask_mobile_webview() {
        analytics.send(TrackingEvent::UseInAppBrowser);
        sdk.slots().active_provider = host.injected_provider();
        sdk.inner.initialized.store(true, Ordering::Release);
        preferences.should_return = true;
    } else if platform.is_browser() {
        if let Some(extension) = host.extension_provider() {
            preferences.prefer_extension = match storage {
                Some(storage) => matches!(
                    storage.item(STORAGE_PROVIDER_TYPE).await,
                    Ok(Some(kind)) if kind == PROVIDER_TYPE_EXTENSION
                ),
                None => false,
            };
            sdk.forward_extension_events(&extension);
            sdk.slots().extension = Some(extension.clone());
            preferences.extension = Some(extension);
        }
    }

    if let (Some(extension), true) = (&preferences.extension, options.extension_only) {
        if options.logging.developer_mode {
            log::warn!("extension only, skipping remote connection setup");
        }
        analytics.send(TrackingEvent::UseExtension);
        {
            let mut slots = sdk.slots();
            slots.active_provider = Some(extension.clone());
            slots.extension_active = true;
        }
        sdk.inner.initialized.store(true, Ordering::Release);
        preferences.should_return = true;
    }
    preferences
}

fn setup_remote_connection_and_installer(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
    platform: &PlatformManager,
    analytics: &Arc<Analytics>,
    storage: Option<Arc<dyn StorageManager>>,
    dapp_metadata: DappMetadata,
    extension_found: bool,
) -> RemoteConnection {
    let services = sdk.services();
    let mut remote_options = RemoteConnectionOptions::new(
        platform.clone(),
        analytics.clone(),
        services.provider.clone(),
        services.connector_factory.clone(),
    );
    remote_options.communication_layer_preference = options.communication_layer_preference;
    remote_options.use_deeplink = options.use_deeplink;
    remote_options.prefer_desktop = options.prefer_desktop;
    remote_options.communication_server_url = options.server_url().to_owned();
    remote_options.transports = options.transports.clone();
    remote_options.dapp_metadata = dapp_metadata;
    remote_options.storage_enabled = options.storage.enabled;
    remote_options.logging = options.logging.runtime();
    remote_options.storage = storage;
    remote_options.modals = services.modals.clone();
    remote_options.events = sdk.inner.events.clone();
    remote_options.hooks = RemoteHooks {
        on_pending_modal_disconnect: Some(sdk_hook(sdk, "terminate", terminate_action)),
        terminate: Some(sdk_hook(sdk, "terminate", terminate_action)),
        connect_with_extension: extension_found
            .then(|| sdk_hook(sdk, "connect_with_extension", connect_with_extension_action)),
    };

    let remote = RemoteConnection::new(remote_options);
    let installer = Installer::new(platform.clone(), options.prefer_desktop, sdk.debug());
    {
        let mut slots = sdk.slots();
        slots.remote = Some(remote.clone());
        slots.installer = Some(Arc::new(installer));
    }
    remote
}

async fn terminate_action(sdk: MetaMaskSdk) -> Result<(), SdkError> {
    sdk.terminate().await
}

async fn connect_with_extension_action(sdk: MetaMaskSdk) -> Result<(), SdkError> {
    sdk.connect_with_extension_provider().await.map(|_| ())
}

/// Wraps an SDK action as a modal callback. The action runs on the current
/// runtime and only while the SDK is alive.
fn sdk_hook<F, Fut>(sdk: &MetaMaskSdk, name: &'static str, action: F) -> ModalHook
where
    F: Fn(MetaMaskSdk) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SdkError>> + Send + 'static,
{
    let weak = sdk.downgrade();
    Arc::new(move || {
        let Some(sdk) = MetaMaskSdk::from_weak(&weak) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("[MetaMaskSdk: {name}] no async runtime to run on");
            return;
        };
        let task = action(sdk);
        handle.spawn(async move {
            if let Err(err) = task.await {
                log::warn!("[MetaMaskSdk: {name}] {err}");
            }
        });
    })
}

async fn initialize_provider_and_event_listeners(
    sdk: &MetaMaskSdk,
    remote: &RemoteConnection,
) -> Result<(), SdkError> {
    {
        let mut slots = sdk.slots();
        let provider = sdk.services().provider.clone();
        slots.sdk_provider = Some(provider.clone());
        slots.active_provider = Some(provider);
    }
    remote.init_remote_communication().await
}

fn handle_auto_and_extension_connections(
    sdk: &MetaMaskSdk,
    options: &SdkOptions,
    platform: &PlatformManager,
    analytics: &Analytics,
    prefer_extension: bool,
) {
    if prefer_extension {
        if sdk.debug() {
            log::debug!("[MetaMaskSdk: perform_sdk_initialization()] prefer extension, connecting");
        }
        analytics.send(TrackingEvent::ExtensionUtilized);
        let background = sdk.clone();
        tokio::spawn(async move {
            if let Err(err) = background.connect_with_extension_provider().await {
                log::warn!("can't connect with MetaMask extension: {err}");
                background.remove_stored(STORAGE_PROVIDER_TYPE).await;
            }
        });
    } else if options.check_installation_immediately {
        if platform.is_desktop_web() {
            if sdk.debug() {
                log::debug!("[MetaMaskSdk: perform_sdk_initialization()] check installation now");
            }
            let (remote, installer) = {
                let slots = sdk.slots();
                (slots.remote.clone(), slots.installer.clone())
            };
            if let (Some(remote), Some(installer)) = (remote, installer) {
                let debug = sdk.debug();
                tokio::spawn(async move {
                    if let Err(err) = installer.start(&remote, true).await {
                        if debug {
                            log::debug!("[MetaMaskSdk] installation check failed: {err}");
                        }
                    }
                });
            }
        } else {
            log::warn!("check_installation_immediately is only honored on desktop web, ignoring");
        }
    }
    sdk.inner.initialized.store(true, Ordering::Release);
}
