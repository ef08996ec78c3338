use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::connector::ChannelConfig;
use crate::error::SdkError;

/// Persistence for the channel config and small dapp-side preferences.
#[async_trait]
pub trait StorageManager: Send + Sync {
    async fn persist_channel_config(&self, config: &ChannelConfig) -> Result<(), SdkError>;

    async fn channel_config(&self) -> Result<Option<ChannelConfig>, SdkError>;

    /// Forgets the persisted channel.
    async fn terminate(&self) -> Result<(), SdkError>;

    async fn item(&self, key: &str) -> Result<Option<String>, SdkError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), SdkError>;

    async fn remove_item(&self, key: &str) -> Result<(), SdkError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    channel: Mutex<Option<ChannelConfig>>,
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageManager for MemoryStorage {
    async fn persist_channel_config(&self, config: &ChannelConfig) -> Result<(), SdkError> {
        *self.channel.lock().expect("channel mutex poisoned") = Some(config.clone());
        Ok(())
    }

    async fn channel_config(&self) -> Result<Option<ChannelConfig>, SdkError> {
        Ok(self.channel.lock().expect("channel mutex poisoned").clone())
    }

    async fn terminate(&self) -> Result<(), SdkError> {
        self.channel.lock().expect("channel mutex poisoned").take();
        Ok(())
    }

    async fn item(&self, key: &str) -> Result<Option<String>, SdkError> {
        Ok(self.items.lock().expect("items mutex poisoned").get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), SdkError> {
        self.items.lock().expect("items mutex poisoned").insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), SdkError> {
        self.items.lock().expect("items mutex poisoned").remove(key);
        Ok(())
    }
}

const CHANNEL_FILE: &str = ".sdk-comm";
const ITEMS_FILE: &str = ".sdk-items.json";

/// JSON files under a directory; one for the channel, one for items.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    items_lock: tokio::sync::Mutex<()>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), items_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        file: &str,
    ) -> Result<Option<T>, SdkError> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SdkError::storage(format!("read {}: {err}", path.display())))
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| SdkError::storage(format!("decode {}: {err}", path.display())))
    }

    async fn write_json<T: serde::Serialize>(&self, file: &str, value: &T) -> Result<(), SdkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| SdkError::storage(format!("create {}: {err}", self.dir.display())))?;
        let path = self.dir.join(file);
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|err| SdkError::storage(err.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| SdkError::storage(format!("write {}: {err}", path.display())))
    }

    async fn update_items<F>(&self, update: F) -> Result<(), SdkError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let _guard = self.items_lock.lock().await;
        let mut items: BTreeMap<String, String> =
            self.read_json(ITEMS_FILE).await?.unwrap_or_default();
        update(&mut items);
        self.write_json(ITEMS_FILE, &items).await
    }
}

#[async_trait]
impl StorageManager for FileStorage {
    async fn persist_channel_config(&self, config: &ChannelConfig) -> Result<(), SdkError> {
        self.write_json(CHANNEL_FILE, config).await
    }

    async fn channel_config(&self) -> Result<Option<ChannelConfig>, SdkError> {
        self.read_json(CHANNEL_FILE).await
    }

    async fn terminate(&self) -> Result<(), SdkError> {
        let path = self.dir.join(CHANNEL_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SdkError::storage(format!("remove {}: {err}", path.display()))),
        }
    }

    async fn item(&self, key: &str) -> Result<Option<String>, SdkError> {
        let items: Option<BTreeMap<String, String>> = self.read_json(ITEMS_FILE).await?;
        Ok(items.and_then(|mut items| items.remove(key)))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), SdkError> {
        let (key, value) = (key.to_owned(), value.to_owned());
        self.update_items(move |items| {
            items.insert(key, value);
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> Result<(), SdkError> {
        let key = key.to_owned();
        self.update_items(move |items| {
            items.remove(&key);
        })
        .await
    }
}
