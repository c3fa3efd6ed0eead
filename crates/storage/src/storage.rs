//! Module-scoped storage abstraction
//!
//! A [`Storage`] owns the items of one module plus that module's version.
//! Two implementations ship with this crate:
//!
//! | Implementation | Use Case | Persistence |
//! |----------------|----------|-------------|
//! | [`MemoryStorage`](crate::MemoryStorage) | Testing | No |
//! | [`DatabaseStorage`](crate::DatabaseStorage) | Production | SQLite |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::item::Item;
use crate::notify::{ChangeListener, Dispatcher};

/// Physical partition of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Included in user backups and restored on a new device
    User,
    /// Stays on this device
    Device,
}

impl Partition {
    /// Both partitions, user first
    pub const ALL: [Partition; 2] = [Partition::User, Partition::Device];
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::User => write!(f, "user"),
            Partition::Device => write!(f, "device"),
        }
    }
}

/// Backup classification of a storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Lives in the user partition
    #[default]
    User,
    /// Lives in the device partition
    Device,
    /// Spans both partitions; read and delete only
    Undefined,
}

impl StorageKind {
    /// Partitions this kind reads from and deletes in
    pub fn partitions(self) -> &'static [Partition] {
        match self {
            StorageKind::User => &[Partition::User],
            StorageKind::Device => &[Partition::Device],
            StorageKind::Undefined => &Partition::ALL,
        }
    }

    /// The single partition writes go to, `None` for [`StorageKind::Undefined`]
    pub fn writable_partition(self) -> Option<Partition> {
        match self {
            StorageKind::User => Some(Partition::User),
            StorageKind::Device => Some(Partition::Device),
            StorageKind::Undefined => None,
        }
    }
}

/// Persistence for the items and version of one module
#[async_trait]
pub trait Storage: Send + Sync {
    /// Module name
    fn module(&self) -> &str;

    /// Backup classification
    fn kind(&self) -> StorageKind;

    /// Get the item stored for `key`.
    ///
    /// For [`StorageKind::Undefined`] storages holding `key` in both
    /// partitions, which of the two items is returned is unspecified.
    async fn get(&self, key: &str) -> Result<Option<Item>>;

    /// All items of this module
    async fn get_all(&self) -> Result<Vec<Item>>;

    /// Insert or update `key`, clearing any migrated key
    async fn put(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.put_migrated(key, None, value).await
    }

    /// Insert or update `key`, recording the key it was migrated from
    async fn put_migrated(
        &self,
        key: &str,
        migrated_key: Option<&str>,
        value: Option<&str>,
    ) -> Result<()>;

    /// Insert or update from an existing item (key, value and migrated key)
    async fn put_item(&self, item: &Item) -> Result<()> {
        self.put_migrated(item.key(), item.migrated_key(), item.value()).await
    }

    /// Delete `key`; deleting an absent key succeeds
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete all items, keeping the version
    async fn clear(&self) -> Result<()>;

    /// Delete all items and reset the version to 0
    async fn wipe(&self) -> Result<()>;

    /// Last applied version, 0 when never set
    async fn version(&self) -> Result<i32>;

    /// Persist the applied version
    async fn set_version(&self, version: i32) -> Result<()>;

    /// Copy every item of `other` into this storage, then wipe `other`.
    ///
    /// Keys, values and migrated keys are kept; timestamps are regenerated.
    /// Annexing a storage that shares this module's rows is rejected, since
    /// the final wipe would delete what was just copied.
    async fn annex(&self, other: &dyn Storage) -> Result<()> {
        let overlapping = self
            .kind()
            .partitions()
            .iter()
            .any(|partition| other.kind().partitions().contains(partition));
        if other.module() == self.module() && overlapping {
            return Err(StorageError::InvalidArgument(format!(
                "module '{}' can't annex itself",
                self.module()
            )));
        }

        let items = other.get_all().await?;
        tracing::debug!(
            from = other.module(),
            to = self.module(),
            count = items.len(),
            "annexing storage"
        );
        for item in &items {
            self.put_item(item).await?;
        }
        other.wipe().await
    }

    /// Register a listener delivered through `dispatcher`.
    ///
    /// Returns `false` if the listener was already registered.
    fn register_change_listener(
        &self,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool;

    /// Unregister a listener; unknown listeners are ignored and return `false`
    fn unregister_change_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool;
}
