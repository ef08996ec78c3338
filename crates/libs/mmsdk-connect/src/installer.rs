//! Routes a user without a reachable wallet to the right install path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::constants::{METAMASK_EXTENSION_DOWNLOAD_URL, METAMASK_MOBILE_INSTALL_URL};
use crate::error::SdkError;
use crate::platform::{PlatformManager, PlatformType};
use crate::remote::{RemoteConnection, StartConnectionExtras};

const PROVIDER_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Installer {
    prefer_desktop: bool,
    debug: bool,
    platform: PlatformManager,
    is_installing: AtomicBool,
    has_installed: AtomicBool,
}

impl Installer {
    pub fn new(platform: PlatformManager, prefer_desktop: bool, debug: bool) -> Self {
        Self {
            prefer_desktop,
            debug,
            platform,
            is_installing: AtomicBool::new(false),
            has_installed: AtomicBool::new(false),
        }
    }

    pub fn is_installing(&self) -> bool {
        self.is_installing.load(Ordering::Acquire)
    }

    pub fn has_installed(&self) -> bool {
        self.has_installed.load(Ordering::Acquire)
    }

    /// Returns `true` when a remote connection was started, `false` when the
    /// user was sent elsewhere.
    pub async fn redirect_to_proper_install(
        &self,
        remote: &RemoteConnection,
        extras: StartConnectionExtras,
    ) -> Result<bool, SdkError> {
        let platform_type = self.platform.platform_type();
        if self.debug {
            log::debug!("[Installer: redirect_to_proper_install()] platform={}", platform_type.as_str());
        }

        if platform_type == PlatformType::MetaMaskMobileWebview {
            self.platform
                .notify_user("Please save your seedphrase and try to reinstall MetaMask Mobile");
            return Ok(false);
        }

        self.is_installing.store(true, Ordering::Release);
        if platform_type == PlatformType::DesktopWeb && self.prefer_desktop {
            self.start_desktop_onboarding();
            return Ok(false);
        }

        match remote.start_connection(extras).await {
            Ok(()) => {
                self.is_installing.store(false, Ordering::Release);
                self.has_installed.store(true, Ordering::Release);
                Ok(true)
            }
            Err(err) => {
                self.is_installing.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Skips the install flow when the extension is already there.
    pub async fn start(
        &self,
        remote: &RemoteConnection,
        wait: bool,
    ) -> Result<bool, SdkError> {
        if wait {
            tokio::time::sleep(PROVIDER_SETTLE_DELAY).await;
        }
        let installed = self.platform.is_metamask_installed();
        if self.debug {
            log::debug!("[Installer: start()] installed={installed}");
        }
        if installed {
            return Ok(true);
        }
        self.redirect_to_proper_install(remote, StartConnectionExtras::default()).await
    }

    fn start_desktop_onboarding(&self) {
        if let Err(err) = self.platform.host().open_link(METAMASK_EXTENSION_DOWNLOAD_URL, "_blank") {
            log::warn!("[Installer: start_desktop_onboarding()] {err}");
        }
    }
}

/// Where to get MetaMask on `platform`.
pub fn install_link(platform: &PlatformManager) -> &'static str {
    if platform.is_desktop_web() {
        METAMASK_EXTENSION_DOWNLOAD_URL
    } else {
        METAMASK_MOBILE_INSTALL_URL
    }
}
