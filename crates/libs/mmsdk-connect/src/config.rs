use crate::constants::DEFAULT_SERVER_URL;
use crate::error::SdkError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationLayerPreference {
    #[default]
    Socket,
    PostMessage,
}

impl CommunicationLayerPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::PostMessage => "postmessage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "socket" => Some(Self::Socket),
            "postmessage" | "post_message" => Some(Self::PostMessage),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DappMetadata {
    pub name: Option<String>,
    pub url: Option<String>,
    pub icon_url: Option<String>,
    pub base64_icon: Option<String>,
}

impl DappMetadata {
    pub fn is_empty(&self) -> bool {
        blank(&self.name) && blank(&self.url)
    }

    /// Checks that every URL carried by the metadata is an absolute `http(s)` URL.
    pub fn validate(&self) -> Result<(), SdkError> {
        if let Some(url) = self.url.as_deref() {
            ensure_http_url("url", url)?;
        }
        if let Some(icon_url) = self.icon_url.as_deref() {
            ensure_http_url("icon_url", icon_url)?;
        }
        Ok(())
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

fn ensure_http_url(field: &str, value: &str) -> Result<(), SdkError> {
    let parsed = Url::parse(value).map_err(|err| {
        SdkError::invalid_dapp_metadata(format!("{field} '{value}' is not a valid url: {err}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SdkError::invalid_dapp_metadata(format!(
            "{field} must use http:// or https://, got {scheme}://"
        ))),
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingOptions {
    pub developer_mode: bool,
    pub sdk: bool,
    pub remote_layer: bool,
    pub service_layer: bool,
    pub ecies_layer: bool,
    pub key_exchange_layer: bool,
    pub plaintext: bool,
}

impl LoggingOptions {
    /// Effective per-layer flags; developer mode switches every layer on.
    pub fn runtime(&self) -> Self {
        if !self.developer_mode {
            return self.clone();
        }
        Self {
            developer_mode: true,
            sdk: true,
            remote_layer: true,
            service_layer: true,
            ecies_layer: true,
            key_exchange_layer: true,
            plaintext: self.plaintext,
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.sdk || self.developer_mode
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageOptions {
    pub enabled: bool,
    /// Directory for file-backed persistence. In-memory storage when unset.
    pub path: Option<PathBuf>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self { enabled: true, path: None }
    }
}

/// Options an SDK instance is constructed with.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SdkOptions {
    pub dapp_metadata: DappMetadata,
    pub communication_layer_preference: CommunicationLayerPreference,
    pub transports: Vec<String>,
    pub use_deeplink: bool,
    pub prefer_desktop: bool,
    pub enable_analytics: bool,
    pub extension_only: bool,
    pub check_installation_immediately: bool,
    pub inject_provider: bool,
    pub should_shim_web3: bool,
    pub communication_server_url: Option<String>,
    pub storage: StorageOptions,
    pub logging: LoggingOptions,
    /// Deprecated switch kept so old config files still parse.
    pub enable_debug: Option<bool>,
    #[serde(rename = "_source", alias = "source")]
    pub source: Option<String>,
}

impl Default for SdkOptions {
    fn default() -> Self {
        Self {
            dapp_metadata: DappMetadata::default(),
            communication_layer_preference: CommunicationLayerPreference::Socket,
            transports: Vec::new(),
            use_deeplink: false,
            prefer_desktop: false,
            enable_analytics: true,
            extension_only: false,
            check_installation_immediately: false,
            inject_provider: true,
            should_shim_web3: true,
            communication_server_url: None,
            storage: StorageOptions::default(),
            logging: LoggingOptions::default(),
            enable_debug: None,
            source: None,
        }
    }
}

impl SdkOptions {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SdkError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| SdkError::config(format!("read {}: {err}", path.display())))?;
        Ok(Self::from_toml(&contents)?)
    }

    /// Fills computed defaults. Safe to call more than once.
    pub fn apply_defaults(&mut self) {
        if blank(&self.communication_server_url) {
            self.communication_server_url = Some(DEFAULT_SERVER_URL.to_owned());
        }
        for field in [&mut self.dapp_metadata.name, &mut self.dapp_metadata.url] {
            if let Some(value) = field.as_mut() {
                let trimmed = value.trim();
                if trimmed.len() != value.len() {
                    *value = trimmed.to_owned();
                }
            }
            if blank(field) {
                *field = None;
            }
        }
    }

    pub fn server_url(&self) -> &str {
        self.communication_server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }
}
