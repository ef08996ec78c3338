use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::MetaMaskSdk;
use crate::analytics::TrackingEvent;
use crate::connector::DisconnectOptions;
use crate::constants::{
    PROVIDER_TYPE_EXTENSION, RPC_REQUEST_ACCOUNTS, RPC_REVOKE_PERMISSIONS,
    STORAGE_DAPP_CHAIN_ID, STORAGE_DAPP_SELECTED_ADDRESS, STORAGE_PROVIDER_TYPE,
};
use crate::error::SdkError;
use crate::events::{ProviderEvent, ProviderUpdateType, SdkEvent};
use crate::provider::{Provider, RequestArguments};

impl MetaMaskSdk {
    /// Switches requests over to the browser extension and asks it for
    /// accounts. The SDK provider is restored if the extension refuses.
    pub async fn connect_with_extension_provider(&self) -> Result<JsonValue, SdkError> {
        let known = self.slots().extension.clone();
        let extension = known
            .or_else(|| self.services().host.extension_provider())
            .ok_or(SdkError::ProviderUnavailable)?;
        if self.debug() {
            log::debug!("[MetaMaskSdk: connect_with_extension_provider()]");
        }

        let previous = {
            let mut slots = self.slots();
            if slots.sdk_provider.is_none() {
                slots.sdk_provider = Some(self.services().provider.clone());
            }
            slots.active_provider.replace(extension.clone())
        };

        match extension.request(RequestArguments::new(RPC_REQUEST_ACCOUNTS, json!([]))).await {
            Ok(accounts) => {
                self.set_stored(STORAGE_PROVIDER_TYPE, PROVIDER_TYPE_EXTENSION).await;
                self.slots().extension_active = true;
                self.emit(SdkEvent::provider_update(ProviderUpdateType::Extension));
                self.track(TrackingEvent::UseExtension);
                Ok(accounts)
            }
            Err(err) => {
                {
                    let mut slots = self.slots();
                    let restored = previous.or_else(|| slots.sdk_provider.clone());
                    slots.active_provider = restored;
                }
                self.emit(SdkEvent::ConnectWithResponse { error: err.to_string() });
                self.track(TrackingEvent::Rejected);
                Err(err)
            }
        }
    }

    /// Ends the session with the wallet and forgets the stored dapp state.
    ///
    /// With the extension active this revokes its permissions and falls back
    /// to the SDK provider instead. Nothing happens inside the MetaMask
    /// in-app browser.
    pub async fn terminate(&self) -> Result<(), SdkError> {
        let (in_app_browser, extension_active, active, remote) = {
            let slots = self.slots();
            (
                slots.platform.as_ref().is_some_and(|platform| platform.is_metamask_mobile_webview()),
                slots.extension_active,
                slots.active_provider.clone(),
                slots.remote.clone(),
            )
        };
        if in_app_browser {
            return Ok(());
        }
        if self.debug() {
            log::debug!("[MetaMaskSdk: terminate()] extension_active={extension_active}");
        }

        for key in [STORAGE_PROVIDER_TYPE, STORAGE_DAPP_CHAIN_ID, STORAGE_DAPP_SELECTED_ADDRESS] {
            self.remove_stored(key).await;
        }

        if extension_active {
            if let Some(active) = active {
                let revoke =
                    RequestArguments::new(RPC_REVOKE_PERMISSIONS, json!([{ "eth_accounts": {} }]));
                if let Err(err) = active.request(revoke).await {
                    log::warn!("[MetaMaskSdk: terminate()] can't revoke permissions: {err}");
                }
            }
            let extension_only = self.options().extension_only;
            if extension_only {
                return Ok(());
            }
            {
                let mut slots = self.slots();
                let sdk_provider = slots.sdk_provider.clone();
                slots.active_provider = sdk_provider;
                slots.extension_active = false;
            }
            self.emit(SdkEvent::provider_update(ProviderUpdateType::Terminate));
            return Ok(());
        }

        self.emit(SdkEvent::provider_update(ProviderUpdateType::Terminate));
        match remote {
            Some(remote) => {
                remote
                    .disconnect(DisconnectOptions { terminate: true, send_message: true })
                    .await
            }
            None => Ok(()),
        }
    }

    /// Re-emits the extension's events on the SDK provider, which is where
    /// most dapps listen.
    pub(super) fn forward_extension_events(&self, extension: &Arc<dyn Provider>) {
        let Some(mut events) = extension.subscribe() else {
            return;
        };
        let weak = self.downgrade();
        let forwarder = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[MetaMaskSdk: extension] skipped {skipped} extension events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(sdk) = MetaMaskSdk::from_weak(&weak) else {
                    break;
                };
                sdk.on_extension_event(event).await;
            }
        });
        if let Some(previous) = self.slots().extension_forwarder.replace(forwarder) {
            previous.abort();
        }
    }

    async fn on_extension_event(&self, event: ProviderEvent) {
        if self.debug() {
            log::debug!("[MetaMaskSdk: extension] propagate {}", event.name());
        }
        // An empty account list while connected through the extension means
        // the user revoked the dapp's permissions there.
        let revoked = matches!(&event, ProviderEvent::AccountsChanged(accounts) if accounts.is_empty())
            && self.is_extension_active();
        self.services().provider.emit(event);
        if revoked {
            log::info!("extension permissions revoked, dropping the stored provider preference");
            self.remove_stored(STORAGE_PROVIDER_TYPE).await;
        }
    }
}
