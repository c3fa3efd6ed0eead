//! Persistent storage over the SQLite record store

use async_trait::async_trait;
use std::sync::Arc;

use crate::database::SqliteDatabase;
use crate::error::{require_key, Result, StorageError};
use crate::item::Item;
use crate::notify::{ChangeListener, ChangeNotifier, Dispatcher};
use crate::storage::{Partition, Storage, StorageKind};

/// [`Storage`] for one module of a [`SqliteDatabase`].
///
/// Cheap to clone; clones share the database and the listener registry.
/// Any number of `DatabaseStorage` values may address the same module, and
/// writes through one are delivered to listeners registered on the others.
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Arc<SqliteDatabase>,
    module: Arc<str>,
    kind: StorageKind,
    notifier: Arc<ChangeNotifier>,
}

impl DatabaseStorage {
    /// Storage for `module` in the partitions selected by `kind`
    pub fn new(db: Arc<SqliteDatabase>, module: impl Into<String>, kind: StorageKind) -> Self {
        Self {
            db,
            module: Arc::from(module.into()),
            kind,
            notifier: Arc::new(ChangeNotifier::new()),
        }
    }

    /// The backing record store
    pub fn database(&self) -> &Arc<SqliteDatabase> {
        &self.db
    }

    fn writable_partition(&self) -> Result<Partition> {
        self.kind
            .writable_partition()
            .ok_or_else(|| StorageError::classification(&self.module))
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    fn module(&self) -> &str {
        &self.module
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        let items = self.db.query(self.kind, Some(&*self.module), Some(key)).await?;
        // For unclassified storages both partitions may answer; either may win
        Ok(items.into_iter().next())
    }

    async fn get_all(&self) -> Result<Vec<Item>> {
        self.db.query(self.kind, Some(&*self.module), None).await
    }

    async fn put_migrated(
        &self,
        key: &str,
        migrated_key: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        let partition = self.writable_partition()?;
        require_key(key)?;
        self.db
            .insert_or_update(partition, &self.module, key, migrated_key, value)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        require_key(key)?;
        self.db.delete(self.kind, Some(&*self.module), Some(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.db.delete(self.kind, Some(&*self.module), None).await?;
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.db.delete(self.kind, Some(&*self.module), None).await?;
        self.db.delete_versions(self.kind, Some(&*self.module)).await?;
        Ok(())
    }

    async fn version(&self) -> Result<i32> {
        self.db.read_version(self.kind, &self.module).await
    }

    async fn set_version(&self, version: i32) -> Result<()> {
        let partition = self.writable_partition()?;
        if version < 0 {
            return Err(StorageError::InvalidArgument(format!(
                "version must not be negative, got {version}"
            )));
        }
        self.db.write_version(partition, &self.module, version).await
    }

    fn register_change_listener(
        &self,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool {
        let registered = self.notifier.register(listener, dispatcher);
        if registered {
            for partition in self.kind.partitions() {
                self.db.observe(*partition, &self.module, &self.notifier);
            }
        }
        registered
    }

    fn unregister_change_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        self.notifier.unregister(listener)
    }
}
