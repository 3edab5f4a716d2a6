//! Persistence of the last-known device record.
//!
//! The only on-disk format this crate defines: a small JSON record of the
//! device auto-reconnect should try first.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use wishring_types::KnownDevice;

/// Storage for the last successfully connected device.
#[async_trait]
pub trait KnownDeviceStore: Send + Sync {
    /// Loads the record, if one exists and is readable.
    async fn load(&self) -> Result<Option<KnownDevice>>;

    /// Replaces the record.
    async fn save(&self, device: &KnownDevice) -> Result<()>;

    /// Forgets the record.
    async fn clear(&self) -> Result<()>;
}

/// JSON file store.
///
/// A missing file means no record. A corrupt file is treated the same way
/// rather than failing every future auto-reconnect on it.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KnownDeviceStore for JsonFileStore {
    async fn load(&self) -> Result<Option<KnownDevice>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt device record, ignoring");
                Ok(None)
            }
        }
    }

    async fn save(&self, device: &KnownDevice) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(device)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), address = %device.address, "device record saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    record: RwLock<Option<KnownDevice>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with a record.
    pub fn with_record(device: KnownDevice) -> Self {
        Self {
            record: RwLock::new(Some(device)),
        }
    }
}

#[async_trait]
impl KnownDeviceStore for MemoryStore {
    async fn load(&self) -> Result<Option<KnownDevice>> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, device: &KnownDevice) -> Result<()> {
        *self.record.write().await = Some(device.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.record.write().await = None;
        Ok(())
    }
}
