use std::sync::Arc;

use super::RemoteConnection;
use crate::modal::InstallModalArgs;
use crate::state::SessionStatus;

impl RemoteConnection {
    /// Mounts the install prompt for `link`, reusing the one already built.
    pub(crate) fn show_install_modal(&self, link: &str) {
        let existing = self.state().install_modal().cloned();
        if let Some(modal) = existing {
            modal.mount(link);
            return;
        }

        let hooks = self.options().hooks.clone();
        let debug = self.debug();
        let terminate_hook = hooks.terminate.clone();
        let args = InstallModalArgs {
            link: link.to_owned(),
            debug,
            prefer_desktop: self.state().prefer_desktop,
            terminate: Arc::new(move || {
                if debug {
                    log::debug!("[RemoteConnection: show_install_modal()] terminate requested");
                }
                if let Some(terminate) = &terminate_hook {
                    terminate();
                }
            }),
            connect_with_extension: hooks.connect_with_extension.clone(),
        };

        let Some(modal) = self.options().modals.install(args) else {
            log::debug!("[RemoteConnection: show_install_modal()] no install modal available");
            return;
        };
        let attached = self.state().attach_install_modal(modal.clone());
        if attached {
            modal.mount(link);
        }
    }

    /// Re-shows whichever prompt belongs to the current attempt.
    pub fn show_active_modal(&self) {
        let (status, pending, install, link) = {
            let state = self.state();
            (
                state.status().clone(),
                state.pending_modal().cloned(),
                state.install_modal().cloned(),
                state.qrcode_link().map(str::to_owned),
            )
        };
        if status.is_authorized() {
            log::debug!("[RemoteConnection: show_active_modal()] already authorized");
            return;
        }
        match (pending, install, link) {
            (Some(pending), _, _) => {
                pending.mount(matches!(status, SessionStatus::AwaitingOtp(_)));
            }
            (None, Some(install), Some(link)) => install.mount(&link),
            (None, None, Some(link)) => self.show_install_modal(&link),
            _ => log::debug!("[RemoteConnection: show_active_modal()] nothing to show"),
        }
    }

    /// Hides every prompt without forgetting it.
    pub fn close_modal(&self) {
        let (pending, install) = {
            let state = self.state();
            (state.pending_modal().cloned(), state.install_modal().cloned())
        };
        if let Some(pending) = pending {
            pending.unmount();
        }
        if let Some(install) = install {
            install.unmount(false);
        }
    }
}
