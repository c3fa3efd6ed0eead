//! Tray: versioned multi-process preferences
//!
//! [`Tray`] ties the SQLite record store to per-module storages and
//! preferences, and offers the operations that span every module.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use tray::{DatabaseConfig, StorageKind, Tray};
//!
//! let tray = Tray::open(DatabaseConfig::in_directory("/tmp/app")).await?;
//! let prefs = tray.preferences("settings", 1, StorageKind::User).await?;
//! prefs.put("theme", "dark").await?;
//! assert_eq!(prefs.get_string("theme").await?.as_deref(), Some("dark"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

pub use preferences::{
    migrate, DefaultHooks, JsonFileSource, LegacySource, MemorySource, Migration, MigrationReport,
    Preferences, PreferencesError, SourceImport, Value, VersionHooks,
};
pub use storage::{
    ChangeListener, DatabaseConfig, DatabaseStorage, DispatchQueue, Dispatcher, InlineDispatcher,
    Item, MemoryStorage, Partition, QueueDispatcher, RuntimeDispatcher, SqliteDatabase, Storage,
    StorageError, StorageKind, SynchronousMode,
};

/// Entry point over one record store
#[derive(Clone)]
pub struct Tray {
    db: Arc<SqliteDatabase>,
}

impl Tray {
    /// Open the record store described by `config`
    pub async fn open(config: DatabaseConfig) -> storage::Result<Self> {
        let db = SqliteDatabase::new(config).await?;
        info!(store = %db.identifier(), "Opened tray");
        Ok(Self::new(Arc::new(db)))
    }

    /// Open two throwaway in-memory partitions
    pub async fn in_memory() -> storage::Result<Self> {
        Ok(Self::new(Arc::new(SqliteDatabase::in_memory().await?)))
    }

    /// Wrap an already opened record store
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }

    /// The shared record store
    pub fn database(&self) -> &Arc<SqliteDatabase> {
        &self.db
    }

    /// Storage of one module
    pub fn storage(&self, module: &str, kind: StorageKind) -> DatabaseStorage {
        DatabaseStorage::new(Arc::clone(&self.db), module, kind)
    }

    /// Preferences of one module at `version`, with the default hooks
    pub async fn preferences(
        &self,
        module: &str,
        version: i32,
        kind: StorageKind,
    ) -> preferences::Result<Preferences<DatabaseStorage>> {
        Preferences::new(self.storage(module, kind), version).await
    }

    /// Preferences of one module at `version`, running `hooks` on version changes
    pub async fn preferences_with_hooks<H>(
        &self,
        module: &str,
        version: i32,
        kind: StorageKind,
        hooks: H,
    ) -> preferences::Result<Preferences<DatabaseStorage, H>>
    where
        H: VersionHooks<DatabaseStorage>,
    {
        Preferences::with_hooks(self.storage(module, kind), version, hooks).await
    }

    /// The application's own preferences, named after `app_id`
    pub async fn app_preferences(
        &self,
        app_id: &str,
    ) -> preferences::Result<Preferences<DatabaseStorage>> {
        self.preferences(app_id, 1, StorageKind::User).await
    }

    /// Every item of every module in both partitions
    pub async fn get_all(&self) -> storage::Result<Vec<Item>> {
        self.db.query(StorageKind::Undefined, None, None).await
    }

    /// Names of every module holding items or a version
    pub async fn modules(&self) -> storage::Result<Vec<String>> {
        self.db.modules(StorageKind::Undefined).await
    }

    /// Delete the items of the given modules; versions are kept
    pub async fn clear(&self, modules: &[&str]) -> storage::Result<()> {
        for module in modules {
            self.db.delete(StorageKind::Undefined, Some(*module), None).await?;
        }
        debug!(?modules, "Cleared modules");
        Ok(())
    }

    /// Delete the items of every module except the given ones
    pub async fn clear_but(&self, keep: &[&str]) -> storage::Result<()> {
        let keep: HashSet<&str> = keep.iter().copied().collect();
        for module in self.modules().await? {
            if !keep.contains(module.as_str()) {
                self.db
                    .delete(StorageKind::Undefined, Some(module.as_str()), None)
                    .await?;
            }
        }
        debug!(?keep, "Cleared all other modules");
        Ok(())
    }

    /// Delete every item and every version record
    pub async fn wipe(&self) -> storage::Result<()> {
        let items = self.db.delete(StorageKind::Undefined, None, None).await?;
        let versions = self.db.delete_versions(StorageKind::Undefined, None).await?;
        info!(items, versions, "Wiped tray");
        Ok(())
    }
}
