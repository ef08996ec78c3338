//! Modal handles the connection core mounts and unmounts.
//!
//! Rendering is the embedder's concern; the core only holds handles and
//! drives their lifecycle.

use std::sync::Arc;

/// Callback fired by a modal on a user action.
pub type ModalHook = Arc<dyn Fn() + Send + Sync>;

/// The OTP / "resuming" prompt.
pub trait PendingModal: Send + Sync {
    fn mount(&self, display_otp: bool);

    fn unmount(&self);

    fn update_otp_value(&self, otp: &str);
}

/// The QR / install prompt, or the extension-vs-mobile select prompt.
pub trait InstallModal: Send + Sync {
    fn mount(&self, link: &str);

    fn unmount(&self, should_terminate: bool);
}

#[derive(Clone, Default)]
pub struct PendingModalArgs {
    pub debug: bool,
    pub on_disconnect: Option<ModalHook>,
}

#[derive(Clone)]
pub struct InstallModalArgs {
    pub link: String,
    pub debug: bool,
    pub prefer_desktop: bool,
    pub terminate: ModalHook,
    /// Present when a MetaMask extension is available; renders the select
    /// prompt instead of the plain install prompt.
    pub connect_with_extension: Option<ModalHook>,
}

pub trait ModalFactory: Send + Sync {
    fn otp(&self, args: PendingModalArgs) -> Option<Arc<dyn PendingModal>>;

    fn install(&self, args: InstallModalArgs) -> Option<Arc<dyn InstallModal>>;
}

/// Modals for headless processes: every prompt becomes a log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogModalFactory;

impl ModalFactory for LogModalFactory {
    fn otp(&self, _args: PendingModalArgs) -> Option<Arc<dyn PendingModal>> {
        Some(Arc::new(LogPendingModal))
    }

    fn install(&self, args: InstallModalArgs) -> Option<Arc<dyn InstallModal>> {
        Some(Arc::new(LogInstallModal { select: args.connect_with_extension.is_some() }))
    }
}

struct LogPendingModal;

impl PendingModal for LogPendingModal {
    fn mount(&self, display_otp: bool) {
        if display_otp {
            log::info!("waiting for the one-time code from the wallet");
        } else {
            log::info!("resuming wallet session");
        }
    }

    fn unmount(&self) {}

    fn update_otp_value(&self, otp: &str) {
        if !otp.is_empty() {
            log::info!("confirm code {otp} in the wallet");
        }
    }
}

struct LogInstallModal {
    select: bool,
}

impl InstallModal for LogInstallModal {
    fn mount(&self, link: &str) {
        if self.select {
            log::info!("connect with the extension, or scan with MetaMask mobile: {link}");
        } else {
            log::info!("scan with MetaMask mobile: {link}");
        }
    }

    fn unmount(&self, _should_terminate: bool) {}
}
