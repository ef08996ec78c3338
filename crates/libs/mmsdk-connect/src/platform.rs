use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::SdkError;
use crate::provider::Provider;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformType {
    DesktopWeb,
    MobileWeb,
    MetaMaskMobileWebview,
    NonBrowser,
    ReactNative,
}

impl PlatformType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DesktopWeb => "web-desktop",
            Self::MobileWeb => "web-mobile",
            Self::MetaMaskMobileWebview => "in-app-browser",
            Self::NonBrowser => "nodejs",
            Self::ReactNative => "react-native",
        }
    }
}

/// What the runtime can do, resolved once when the SDK starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub platform_type: PlatformType,
    /// Deeplinking alone is enough to reach the wallet; no modal is needed.
    pub secure_transport: bool,
    pub has_browser: bool,
    pub has_extension_api: bool,
    pub is_in_app_browser: bool,
}

impl PlatformCapabilities {
    pub fn resolve(platform_type: PlatformType, extension_detected: bool) -> Self {
        let has_browser = matches!(
            platform_type,
            PlatformType::DesktopWeb | PlatformType::MobileWeb | PlatformType::MetaMaskMobileWebview
        );
        Self {
            platform_type,
            secure_transport: matches!(
                platform_type,
                PlatformType::ReactNative | PlatformType::MobileWeb
            ),
            has_browser,
            has_extension_api: has_browser && extension_detected,
            is_in_app_browser: platform_type == PlatformType::MetaMaskMobileWebview,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub url: Option<String>,
    pub title: Option<String>,
    pub favicon: Option<String>,
}

/// Boundary to the embedding runtime and the page it hosts.
pub trait PlatformHost: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// The hosting page, when running inside a browser.
    fn page_info(&self) -> Option<PageInfo>;

    fn open_link(&self, url: &str, target: &str) -> Result<(), SdkError>;

    fn alert(&self, message: &str);

    /// The MetaMask browser extension provider, when one is injected.
    fn extension_provider(&self) -> Option<Arc<dyn Provider>> {
        None
    }

    /// The wallet-injected provider of the MetaMask in-app browser.
    fn injected_provider(&self) -> Option<Arc<dyn Provider>> {
        None
    }
}

/// Host for processes without a browser. Links and notices go to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessHost;

impl PlatformHost for HeadlessHost {
    fn platform_type(&self) -> PlatformType {
        PlatformType::NonBrowser
    }

    fn page_info(&self) -> Option<PageInfo> {
        None
    }

    fn open_link(&self, url: &str, target: &str) -> Result<(), SdkError> {
        log::info!("open {url} (target {target})");
        Ok(())
    }

    fn alert(&self, message: &str) {
        log::warn!("{message}");
    }
}

#[derive(Clone)]
pub struct PlatformManager {
    capabilities: PlatformCapabilities,
    use_deeplink: bool,
    debug: bool,
    host: Arc<dyn PlatformHost>,
}

impl std::fmt::Debug for PlatformManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformManager")
            .field("capabilities", &self.capabilities)
            .field("use_deeplink", &self.use_deeplink)
            .finish()
    }
}

impl PlatformManager {
    pub fn new(host: Arc<dyn PlatformHost>, use_deeplink: bool, debug: bool) -> Self {
        let capabilities = PlatformCapabilities::resolve(
            host.platform_type(),
            host.extension_provider().is_some(),
        );
        Self { capabilities, use_deeplink, debug, host }
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    pub fn platform_type(&self) -> PlatformType {
        self.capabilities.platform_type
    }

    pub fn host(&self) -> &Arc<dyn PlatformHost> {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.capabilities.secure_transport
    }

    pub fn is_browser(&self) -> bool {
        self.capabilities.has_browser
    }

    pub fn is_desktop_web(&self) -> bool {
        self.capabilities.platform_type == PlatformType::DesktopWeb
    }

    pub fn is_mobile_web(&self) -> bool {
        self.capabilities.platform_type == PlatformType::MobileWeb
    }

    pub fn is_react_native(&self) -> bool {
        self.capabilities.platform_type == PlatformType::ReactNative
    }

    pub fn is_metamask_mobile_webview(&self) -> bool {
        self.capabilities.is_in_app_browser
    }

    pub fn is_metamask_installed(&self) -> bool {
        self.capabilities.has_extension_api
    }

    pub fn page_info(&self) -> Option<PageInfo> {
        self.host.page_info()
    }

    /// Opens the wallet through `deeplink` when deeplinks are preferred,
    /// otherwise through `universal_link`. Host failures are logged only.
    pub fn open_deeplink(&self, universal_link: &str, deeplink: &str, target: Option<&str>) {
        let link = if self.use_deeplink { deeplink } else { universal_link };
        let target = target.unwrap_or("_blank");
        if self.debug {
            log::debug!("[PlatformManager: open_deeplink()] {link} target={target}");
        }
        if let Err(err) = self.host.open_link(link, target) {
            log::warn!("[PlatformManager: open_deeplink()] can't open link: {err}");
        }
    }

    /// Shows a notice the way the platform expects: an alert in a browser,
    /// a log line elsewhere.
    pub fn notify_user(&self, message: &str) {
        if self.is_browser() {
            self.host.alert(message);
        } else {
            log::info!("{message}");
        }
    }
}
