use tokio::sync::broadcast::error::RecvError;

use super::RemoteConnection;
use crate::analytics::TrackingEvent;
use crate::connector::ConnectorEvent;
use crate::events::{ProviderEvent, SdkEvent};
use crate::provider::RequestArguments;
use crate::state::Transition;

impl RemoteConnection {
    /// Subscribes to the connector's events. Returns `false` when a listener
    /// is already attached or there is no connector yet.
    pub(crate) fn setup_listeners(&self) -> bool {
        let connector = {
            let mut state = self.state();
            if state.listener_attached {
                return false;
            }
            let Some(connector) = state.connector().cloned() else {
                return false;
            };
            state.listener_attached = true;
            connector
        };

        let mut events = connector.subscribe();
        let weak = self.downgrade();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(remote) = RemoteConnection::from_weak(&weak) else {
                            break;
                        };
                        remote.handle_connector_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[RemoteConnection: listener] skipped {skipped} connector events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) =
            self.inner.listener.lock().expect("listener mutex poisoned").replace(listener)
        {
            previous.abort();
        }
        true
    }

    /// Reacts to one connector event. Never fails; collaborator errors are
    /// logged. State changes happen inline; provider round trips run on
    /// their own tasks so a slow wallet call cannot hold up later events.
    pub(crate) fn handle_connector_event(&self, event: ConnectorEvent) {
        if self.debug() {
            log::debug!("[RemoteConnection: listener] {}", event.name());
        }
        let secure = self.platform_manager().is_secure();

        match event {
            ConnectorEvent::Otp(otp) => {
                if secure {
                    return;
                }
                self.on_otp(otp);
            }
            ConnectorEvent::SdkRpcCall(request) => self.forward_rpc_call(request),
            ConnectorEvent::WalletInit { accounts, chain_id } => {
                let provider = self.provider();
                provider.set_connected();
                provider.initialize_state(accounts.clone(), chain_id.clone());
                provider.emit(ProviderEvent::ChainChanged(chain_id));
                provider.emit(ProviderEvent::AccountsChanged(accounts));
            }
            ConnectorEvent::Authorized => self.on_authorized(),
            ConnectorEvent::ClientsDisconnected => {
                if secure {
                    return;
                }
                self.provider().handle_disconnect(false);
                self.apply(Transition::ClientsDisconnected);
                let pending = self.state().pending_modal().cloned();
                if let Some(pending) = pending {
                    pending.update_otp_value("");
                }
                self.analytics().send(TrackingEvent::Disconnected);
            }
            ConnectorEvent::Terminate => self.on_terminate(),
            ConnectorEvent::ConnectionStatus(status) => {
                let _ = self.options().events.send(SdkEvent::ConnectionStatus { status });
            }
            ConnectorEvent::ServiceStatus(status) => {
                let _ = self.options().events.send(SdkEvent::ServiceStatus { status });
            }
            ConnectorEvent::ClientsReady | ConnectorEvent::Rejected => {}
        }
    }

    fn on_otp(&self, otp: String) {
        if !self.apply(Transition::OtpReceived(otp.clone())) {
            return;
        }
        let mounted = self.state().pending_modal().is_some();
        if !mounted {
            if let Some(modal) = self.pending_modal_or_create() {
                modal.mount(true);
            }
        }
        self.render_otp(&otp);
    }

    fn forward_rpc_call(&self, request: RequestArguments) {
        let provider = self.provider().clone();
        let weak = self.downgrade();
        tokio::spawn(async move {
            let method = request.method.clone();
            if let Err(err) = provider.request(request).await {
                log::warn!("[RemoteConnection: listener] sdk rpc call {method} failed: {err}");
            }
            let Some(remote) = RemoteConnection::from_weak(&weak) else {
                return;
            };
            let pending = remote.state().pending_modal().cloned();
            if let Some(pending) = pending {
                pending.unmount();
            }
        });
    }

    fn on_authorized(&self) {
        self.apply(Transition::Authorized);
        let provider = self.provider().clone();
        provider.set_connected();
        provider.emit(ProviderEvent::Connect { chain_id: provider.state().chain_id });
        self.analytics().send(TrackingEvent::Authorized);
        self.persist_channel();

        let debug = self.debug();
        tokio::spawn(async move {
            if let Err(err) = provider.force_initialize_state().await {
                if debug {
                    log::debug!("[RemoteConnection: listener] provider already initialized: {err}");
                }
            }
        });
    }

    fn on_terminate(&self) {
        self.apply(Transition::Terminated);
        let weak = self.downgrade();
        tokio::spawn(async move {
            if let Some(remote) = RemoteConnection::from_weak(&weak) {
                remote.forget_persisted_channel().await;
            }
        });
        self.provider().handle_disconnect(true);
        self.analytics().send(TrackingEvent::Terminated);
        self.platform_manager().notify_user("MetaMask connection terminated by the wallet");
    }
}
