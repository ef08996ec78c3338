use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::RemoteConnection;
use crate::analytics::TrackingEvent;
use crate::connector::{ChannelConfig, ConnectorEvent};
use crate::constants::CONNECTION_TELEMETRY_TIMEOUT;
use crate::error::SdkError;
use crate::events::{ProviderEvent, ProviderUpdateType, SdkEvent};
use crate::links::{ConnectionLinks, LinkParams};
use crate::provider::RequestArguments;
use crate::state::Transition;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// Hand the link straight to the wallet app; no modal.
    Deeplink,
    /// A channel existed before; resume it, with an OTP prompt when stale.
    OtpReconnect { last_active: u64 },
    /// Cold start: show the QR / install prompt and wait for the wallet.
    ModalInstaller,
}

/// Priority cascade: secure platforms always deeplink, a previously active
/// channel reconnects, anything else gets the install prompt.
pub fn select_strategy(secure: bool, channel: Option<&ChannelConfig>) -> ConnectionStrategy {
    if secure {
        return ConnectionStrategy::Deeplink;
    }
    match channel.and_then(|config| config.last_active) {
        Some(last_active) => ConnectionStrategy::OtpReconnect { last_active },
        None => ConnectionStrategy::ModalInstaller,
    }
}

/// Event streams of one attempt, opened before negotiation so nothing the
/// wallet answers in the meantime is missed.
pub(crate) struct AttemptEvents {
    connector: broadcast::Receiver<ConnectorEvent>,
    sdk: broadcast::Receiver<SdkEvent>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartConnectionExtras {
    /// Request the wallet runs as soon as the channel opens.
    pub connect_with: Option<RequestArguments>,
}

impl RemoteConnection {
    /// Negotiates a channel and runs the strategy the platform and session
    /// history call for.
    ///
    /// Resolves once the attempt is visible and actionable: a modal is
    /// mounted, an OTP resume is under way or a deeplink has been
    /// dispatched. Starting a new attempt supersedes the one in flight.
    pub async fn start_connection(&self, extras: StartConnectionExtras) -> Result<(), SdkError> {
        let connector = self.state().connector().cloned().ok_or(SdkError::NoConnector)?;

        let cancel = {
            let mut state = self.state();
            let token = state.begin_attempt();
            let outcome = state.apply(Transition::BeginNegotiation);
            drop(state);
            outcome.detached.unmount();
            token
        };
        let attempt_events = AttemptEvents {
            connector: connector.subscribe(),
            sdk: self.options().events.subscribe(),
        };
        self.provider().emit(ProviderEvent::Connecting);

        let channel_config = connector.originator_session_connect().await?;
        let (channel_id, pubkey) = match channel_config.as_ref().filter(|config| config.has_channel())
        {
            Some(config) => (config.channel_id.clone(), None),
            None => {
                let channel = connector.generate_channel_id_connect().await?;
                (channel.channel_id, channel.pub_key)
            }
        };
        let pubkey = pubkey
            .or_else(|| connector.key_info().map(|info| info.public_key))
            .unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(SdkError::Superseded);
        }

        let params = LinkParams::new(channel_id, self.options().communication_layer_preference, pubkey)
            .with_originator_info(self.originator_info())
            .with_rpc(extras.connect_with);
        let links = ConnectionLinks::build(&params)?;
        self.state().set_links(links.universal_link.clone(), links.deeplink.clone());

        let strategy =
            select_strategy(self.platform_manager().is_secure(), channel_config.as_ref());
        if self.debug() {
            log::debug!(
                "[RemoteConnection: start_connection()] channel={} strategy={strategy:?}",
                params.channel_id
            );
        }

        match strategy {
            ConnectionStrategy::Deeplink => {
                self.connect_with_deeplink(&links);
                Ok(())
            }
            ConnectionStrategy::OtpReconnect { last_active } => {
                self.reconnect_with_modal_otp(Some(last_active), &cancel).await
            }
            ConnectionStrategy::ModalInstaller => {
                let link = links.qrcode_link(self.state().use_deeplink).to_owned();
                self.connect_with_modal_installer(link, attempt_events, &cancel).await
            }
        }
    }

    pub(crate) fn connect_with_deeplink(&self, links: &ConnectionLinks) {
        self.apply(Transition::AwaitApproval);
        self.analytics().send(TrackingEvent::RequestMobile);
        self.platform_manager().open_deeplink(&links.universal_link, &links.deeplink, Some("_self"));
    }

    /// Shows the install prompt and races wallet events against SDK-level
    /// provider switches. The telemetry deadline only reports; it never
    /// ends the race.
    pub(crate) async fn connect_with_modal_installer(
        &self,
        link: String,
        events: AttemptEvents,
        cancel: &CancellationToken,
    ) -> Result<(), SdkError> {
        let AttemptEvents { connector: mut connector_events, sdk: mut sdk_events } = events;
        if self.state().authorized() {
            return Ok(());
        }

        self.apply(Transition::AwaitApproval);
        self.analytics().send(TrackingEvent::Request);
        self.provider().emit(ProviderEvent::DisplayUri(link.clone()));
        self.show_install_modal(&link);

        let deadline = tokio::time::sleep(CONNECTION_TELEMETRY_TIMEOUT);
        tokio::pin!(deadline);
        let mut reported_slow = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SdkError::Superseded),
                event = connector_events.recv() => match event {
                    Ok(ConnectorEvent::Authorized) | Ok(ConnectorEvent::ClientsReady) => return Ok(()),
                    Ok(ConnectorEvent::Rejected) => {
                        self.analytics().send(TrackingEvent::Rejected);
                        return Err(SdkError::Rejected);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[RemoteConnection: connect_with_modal_installer()] skipped {skipped} connector events");
                    }
                    Err(RecvError::Closed) => {
                        return Err(SdkError::connector("connector event stream closed"));
                    }
                },
                event = sdk_events.recv() => match event {
                    Ok(SdkEvent::ProviderUpdate { kind: ProviderUpdateType::Terminate }) => {
                        return Err(SdkError::user_rejected());
                    }
                    Ok(SdkEvent::ProviderUpdate { kind: ProviderUpdateType::Initialized }) => {}
                    Ok(SdkEvent::ProviderUpdate { kind }) => {
                        return Err(SdkError::ProviderSwitched(kind));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        return Err(SdkError::internal("sdk event channel closed"));
                    }
                },
                _ = &mut deadline, if !reported_slow => {
                    reported_slow = true;
                    self.analytics().send_with(
                        TrackingEvent::ConnectionFailed,
                        json!({ "after_secs": CONNECTION_TELEMETRY_TIMEOUT.as_secs() }),
                    );
                }
            }
        }
    }
}
