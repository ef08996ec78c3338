use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::RemoteConnection;
use crate::analytics::TrackingEvent;
use crate::constants::{OTP_POLL_INTERVAL, OTP_TRUST_WINDOW};
use crate::error::SdkError;
use crate::modal::{PendingModal, PendingModalArgs};
use crate::state::{SessionStatus, Transition};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Whether a channel last active at `last_active` (epoch ms) is still inside
/// the OTP trust window at `now`.
pub(crate) fn within_trust_window(last_active: u64, now: u64) -> bool {
    now.saturating_sub(last_active) < OTP_TRUST_WINDOW.as_millis() as u64
}

impl RemoteConnection {
    /// Resumes a known channel. Recent channels are trusted outright; stale
    /// ones wait for the wallet's one-time code.
    pub(crate) async fn reconnect_with_modal_otp(
        &self,
        last_active: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), SdkError> {
        self.analytics().send(TrackingEvent::Reconnect);
        let recent =
            last_active.is_some_and(|last_active| within_trust_window(last_active, now_ms()));

        if recent {
            if self.debug() {
                log::debug!(
                    "[RemoteConnection: reconnect_with_modal_otp()] recently active, skipping otp"
                );
            }
            self.provider().set_connected();
            if let Some(modal) = self.pending_modal_or_create() {
                modal.mount(false);
            }
            self.apply(Transition::TrustedResume);
            return Ok(());
        }

        self.apply(Transition::AwaitOtp);
        if let Some(modal) = self.pending_modal_or_create() {
            modal.mount(true);
        }
        if let Some(otp) = self.wait_for_otp_answer(cancel).await? {
            self.render_otp(&otp);
        }
        Ok(())
    }

    /// Polls the session status once per interval until the wallet pushed a
    /// code. Returns `None` if the session got authorized without one.
    pub(crate) async fn wait_for_otp_answer(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SdkError> {
        loop {
            match self.status() {
                SessionStatus::AwaitingOtp(Some(code)) => return Ok(Some(code)),
                SessionStatus::Terminated => return Err(SdkError::user_rejected()),
                status if status.is_authorized() => return Ok(None),
                _ => {}
            }
            if self.debug() {
                log::trace!("[RemoteConnection: wait_for_otp_answer()] waiting for otp");
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(SdkError::Superseded),
                _ = tokio::time::sleep(OTP_POLL_INTERVAL) => {}
            }
        }
    }

    /// Pushes `otp` into the pending modal unless it is already displayed.
    pub(crate) fn render_otp(&self, otp: &str) {
        let modal = {
            let mut state = self.state();
            let Some(modal) = state.pending_modal().cloned() else {
                return;
            };
            if !state.mark_otp_rendered(otp) {
                return;
            }
            modal
        };
        modal.update_otp_value(otp);
    }

    pub(crate) fn pending_modal_or_create(&self) -> Option<Arc<dyn PendingModal>> {
        if let Some(existing) = self.state().pending_modal().cloned() {
            return Some(existing);
        }

        let weak = self.downgrade();
        let args = PendingModalArgs {
            debug: self.debug(),
            on_disconnect: Some(Arc::new(move || {
                if let Some(remote) = RemoteConnection::from_weak(&weak) {
                    remote.on_otp_modal_disconnect();
                }
            })),
        };
        let modal = self.options().modals.otp(args)?;

        let mut state = self.state();
        if let Some(existing) = state.pending_modal().cloned() {
            return Some(existing);
        }
        state.attach_pending_modal(modal.clone()).then_some(modal)
    }

    /// The user closed the OTP prompt.
    pub(crate) fn on_otp_modal_disconnect(&self) {
        if self.debug() {
            log::debug!("[RemoteConnection: on_otp_modal_disconnect()]");
        }
        let modal = self.state().take_pending_modal();
        if let Some(modal) = modal {
            modal.unmount();
        }
        if let Some(hook) = &self.options().hooks.on_pending_modal_disconnect {
            hook();
        }
    }
}
