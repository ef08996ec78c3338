//! Session state of a remote connection.
//!
//! Every status change goes through [`RemoteConnectionState::apply`]. Modals
//! detached by a transition are handed back to the caller so they can be
//! unmounted after the state lock is released.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::CommunicationLayerPreference;
use crate::connector::Connector;
use crate::modal::{InstallModal, PendingModal};
use crate::platform::PlatformManager;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Negotiating,
    /// Waiting on the wallet's one-time code; holds the latest code seen.
    AwaitingOtp(Option<String>),
    /// A link or QR code is on screen and the wallet has not answered yet.
    AwaitingApproval,
    /// Trusted on recency alone while the wallet confirms the channel.
    Resumed,
    Authorized,
    Terminated,
}

impl SessionStatus {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Resumed | Self::Authorized)
    }

    pub fn otp_answer(&self) -> Option<&str> {
        match self {
            Self::AwaitingOtp(code) => code.as_deref(),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::AwaitingOtp(_) => "awaiting_otp",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Resumed => "resumed",
            Self::Authorized => "authorized",
            Self::Terminated => "terminated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    BeginNegotiation,
    AwaitApproval,
    AwaitOtp,
    OtpReceived(String),
    TrustedResume,
    Authorized,
    ClientsDisconnected,
    Terminated,
    Disconnected { terminate: bool },
}

/// Modals a transition took out of the state. Unmount them once the lock
/// is gone.
#[derive(Default)]
#[must_use]
pub struct DetachedModals {
    pending: Option<Arc<dyn PendingModal>>,
    install: Option<Arc<dyn InstallModal>>,
    terminate_install: bool,
}

impl DetachedModals {
    pub fn is_empty(&self) -> bool {
        self.pending.is_none() && self.install.is_none()
    }

    pub fn unmount(self) {
        if let Some(pending) = self.pending {
            pending.unmount();
        }
        if let Some(install) = self.install {
            install.unmount(self.terminate_install);
        }
    }
}

#[must_use]
pub struct TransitionOutcome {
    pub changed: bool,
    pub detached: DetachedModals,
}

impl TransitionOutcome {
    fn unchanged() -> Self {
        Self { changed: false, detached: DetachedModals::default() }
    }

    fn changed() -> Self {
        Self { changed: true, detached: DetachedModals::default() }
    }
}

pub struct RemoteConnectionState {
    pub(crate) connector: Option<Arc<dyn Connector>>,
    qrcode_link: Option<String>,
    universal_link: Option<String>,
    deeplink: Option<String>,
    status: SessionStatus,
    pending_modal: Option<Arc<dyn PendingModal>>,
    install_modal: Option<Arc<dyn InstallModal>>,
    rendered_otp: Option<String>,
    attempt: Option<CancellationToken>,
    pub(crate) listener_attached: bool,
    pub use_deeplink: bool,
    pub prefer_desktop: bool,
    pub communication_layer_preference: CommunicationLayerPreference,
    pub platform: PlatformManager,
}

impl RemoteConnectionState {
    pub fn new(
        platform: PlatformManager,
        communication_layer_preference: CommunicationLayerPreference,
        use_deeplink: bool,
        prefer_desktop: bool,
    ) -> Self {
        Self {
            connector: None,
            qrcode_link: None,
            universal_link: None,
            deeplink: None,
            status: SessionStatus::Idle,
            pending_modal: None,
            install_modal: None,
            rendered_otp: None,
            attempt: None,
            listener_attached: false,
            use_deeplink,
            prefer_desktop,
            communication_layer_preference,
            platform,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn authorized(&self) -> bool {
        self.status.is_authorized()
    }

    pub fn otp_answer(&self) -> Option<&str> {
        self.status.otp_answer()
    }

    pub fn connector(&self) -> Option<&Arc<dyn Connector>> {
        self.connector.as_ref()
    }

    pub fn qrcode_link(&self) -> Option<&str> {
        self.qrcode_link.as_deref()
    }

    pub fn universal_link(&self) -> Option<&str> {
        self.universal_link.as_deref()
    }

    pub fn deeplink(&self) -> Option<&str> {
        self.deeplink.as_deref()
    }

    pub fn pending_modal(&self) -> Option<&Arc<dyn PendingModal>> {
        self.pending_modal.as_ref()
    }

    pub fn install_modal(&self) -> Option<&Arc<dyn InstallModal>> {
        self.install_modal.as_ref()
    }

    pub(crate) fn set_links(&mut self, universal_link: String, deeplink: String) {
        self.qrcode_link =
            Some(if self.use_deeplink { deeplink.clone() } else { universal_link.clone() });
        self.universal_link = Some(universal_link);
        self.deeplink = Some(deeplink);
    }

    /// Stores a pending modal unless the session is already authorized.
    pub(crate) fn attach_pending_modal(&mut self, modal: Arc<dyn PendingModal>) -> bool {
        if self.status == SessionStatus::Authorized {
            return false;
        }
        self.pending_modal = Some(modal);
        true
    }

    pub(crate) fn take_pending_modal(&mut self) -> Option<Arc<dyn PendingModal>> {
        self.pending_modal.take()
    }

    pub(crate) fn attach_install_modal(&mut self, modal: Arc<dyn InstallModal>) -> bool {
        if self.status == SessionStatus::Authorized {
            return false;
        }
        self.install_modal = Some(modal);
        true
    }

    /// Records `otp` as shown in the pending modal. Returns `false` when that
    /// value is already on screen.
    pub(crate) fn mark_otp_rendered(&mut self, otp: &str) -> bool {
        if self.rendered_otp.as_deref() == Some(otp) {
            return false;
        }
        self.rendered_otp = Some(otp.to_owned());
        true
    }

    /// Starts a new connection attempt, cancelling the one in flight.
    pub(crate) fn begin_attempt(&mut self) -> CancellationToken {
        if let Some(previous) = self.attempt.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.attempt = Some(token.clone());
        token
    }

    pub fn apply(&mut self, transition: Transition) -> TransitionOutcome {
        match transition {
            Transition::BeginNegotiation => {
                self.status = SessionStatus::Negotiating;
                self.rendered_otp = None;
                TransitionOutcome::changed()
            }
            Transition::AwaitApproval => {
                if self.status == SessionStatus::Authorized {
                    return TransitionOutcome::unchanged();
                }
                self.status = SessionStatus::AwaitingApproval;
                TransitionOutcome::changed()
            }
            Transition::AwaitOtp => match self.status {
                SessionStatus::AwaitingOtp(_)
                | SessionStatus::Authorized
                | SessionStatus::Resumed => TransitionOutcome::unchanged(),
                _ => {
                    self.status = SessionStatus::AwaitingOtp(None);
                    TransitionOutcome::changed()
                }
            },
            Transition::OtpReceived(code) => {
                if self.status.is_authorized() || self.status.otp_answer() == Some(code.as_str()) {
                    return TransitionOutcome::unchanged();
                }
                self.status = SessionStatus::AwaitingOtp(Some(code));
                TransitionOutcome::changed()
            }
            Transition::TrustedResume => {
                self.status = SessionStatus::Resumed;
                TransitionOutcome {
                    changed: true,
                    detached: DetachedModals {
                        install: self.install_modal.take(),
                        ..DetachedModals::default()
                    },
                }
            }
            Transition::Authorized => {
                self.status = SessionStatus::Authorized;
                self.rendered_otp = None;
                TransitionOutcome {
                    changed: true,
                    detached: DetachedModals {
                        pending: self.pending_modal.take(),
                        install: self.install_modal.take(),
                        terminate_install: false,
                    },
                }
            }
            Transition::ClientsDisconnected => {
                self.rendered_otp = None;
                if let SessionStatus::AwaitingOtp(Some(_)) = self.status {
                    self.status = SessionStatus::AwaitingOtp(None);
                    return TransitionOutcome::changed();
                }
                TransitionOutcome::unchanged()
            }
            Transition::Terminated => {
                self.status = SessionStatus::Terminated;
                self.rendered_otp = None;
                TransitionOutcome {
                    changed: true,
                    detached: DetachedModals {
                        pending: self.pending_modal.take(),
                        install: self.install_modal.take(),
                        terminate_install: true,
                    },
                }
            }
            Transition::Disconnected { terminate: true } => {
                self.status = SessionStatus::Terminated;
                self.rendered_otp = None;
                TransitionOutcome {
                    changed: true,
                    detached: DetachedModals {
                        pending: self.pending_modal.take(),
                        ..DetachedModals::default()
                    },
                }
            }
            Transition::Disconnected { terminate: false } => {
                let changed = self.status != SessionStatus::Idle;
                self.status = SessionStatus::Idle;
                TransitionOutcome { changed, detached: DetachedModals::default() }
            }
        }
    }
}
