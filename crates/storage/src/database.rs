//! SQLite record store
//!
//! This module provides the persistent backend behind [`DatabaseStorage`]:
//! two independent SQLite databases (one per [`Partition`]) with versioned
//! schema migrations, row timestamps, and change notification for every
//! write.
//!
//! [`DatabaseStorage`]: crate::DatabaseStorage

use parking_lot::Mutex;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
    Row, SqlitePool,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime};

use crate::error::{Result, StorageError};
use crate::item::{from_millis, to_millis, Item};
use crate::notify::ChangeNotifier;
use crate::storage::{Partition, StorageKind};

/// Key of the version row in the internal table
const VERSION_KEY: &str = "version";

const SELECT_ITEMS: &str = "SELECT module, key, value, migrated_key, created, updated \
     FROM preferences \
     WHERE (? IS NULL OR module = ?) AND (? IS NULL OR key = ?) \
     ORDER BY module, key";

const UPSERT_ITEM: &str = "INSERT INTO preferences \
     (module, key, value, migrated_key, created, updated) \
     VALUES (?, ?, ?, ?, ?, ?) \
     ON CONFLICT (module, key) DO UPDATE SET \
     value = excluded.value, \
     migrated_key = excluded.migrated_key, \
     updated = MAX(created, excluded.updated)";

const DELETE_ITEMS: &str = "DELETE FROM preferences \
     WHERE (? IS NULL OR module = ?) AND (? IS NULL OR key = ?)";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file for the user partition
    pub user_path: String,
    /// Database file for the device partition
    pub device_path: String,
    /// Maximum number of connections in each pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long a write waits for another process holding the lock
    pub busy_timeout: Duration,
    /// Enable WAL mode
    pub wal_mode: bool,
    /// Synchronous mode
    pub synchronous: SynchronousMode,
    /// Label used in logs; derived from `user_path` when unset
    pub identifier: Option<String>,
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy)]
pub enum SynchronousMode {
    /// Off - no synchronization
    Off,
    /// Normal - synchronize at critical moments
    Normal,
    /// Full - synchronize after each write
    Full,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user_path: "tray.db".to_string(),
            device_path: "tray_device.db".to_string(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            wal_mode: true,
            synchronous: SynchronousMode::Normal,
            identifier: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration with explicit database files
    pub fn new(user_path: impl Into<String>, device_path: impl Into<String>) -> Self {
        Self {
            user_path: user_path.into(),
            device_path: device_path.into(),
            ..Default::default()
        }
    }

    /// Place both database files in `dir`
    pub fn in_directory(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("tray.db").to_string_lossy().into_owned(),
            dir.join("tray_device.db").to_string_lossy().into_owned(),
        )
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enable or disable WAL mode
    pub fn wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    /// Set synchronous mode
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }

    /// Set the log identifier
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    fn connect_options(&self, path: &str) -> SqliteConnectOptions {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(self.busy_timeout);

        if self.wal_mode {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        match self.synchronous {
            SynchronousMode::Off => options.synchronous(SqliteSynchronous::Off),
            SynchronousMode::Normal => options.synchronous(SqliteSynchronous::Normal),
            SynchronousMode::Full => options.synchronous(SqliteSynchronous::Full),
        }
    }
}

/// Schema migration definition
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    /// Migration version number
    pub version: i64,
    /// Migration description
    pub description: String,
    /// SQL to execute
    pub sql: String,
    /// Checksum for verification
    pub checksum: String,
}

impl MigrationDefinition {
    /// Create a new migration definition
    pub fn new(version: i64, description: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = format!("{:x}", md5::compute(&sql));

        Self {
            version,
            description: description.into(),
            sql,
            checksum,
        }
    }
}

/// Schema of each partition database
pub fn schema() -> Vec<MigrationDefinition> {
    vec![
        MigrationDefinition::new(
            1,
            "Create preferences table",
            "CREATE TABLE IF NOT EXISTS preferences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                module TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                UNIQUE (module, key)
            )",
        ),
        MigrationDefinition::new(
            2,
            "Add migrated key column",
            "ALTER TABLE preferences ADD COLUMN migrated_key TEXT",
        ),
        MigrationDefinition::new(
            3,
            "Create internal metadata table",
            "CREATE TABLE IF NOT EXISTS internal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                module TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                UNIQUE (module, key)
            )",
        ),
    ]
}

type ObserverMap = HashMap<(Partition, String), Vec<Weak<ChangeNotifier>>>;

/// SQLite-backed record store holding both partitions
pub struct SqliteDatabase {
    user: SqlitePool,
    device: SqlitePool,
    configured_identifier: Option<String>,
    identifier: OnceLock<String>,
    observers: Mutex<ObserverMap>,
}

impl SqliteDatabase {
    /// Open (creating if missing) both partition databases and apply the schema
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if config.user_path == config.device_path {
            return Err(StorageError::Config(
                "user and device partitions must use different files".to_string(),
            ));
        }

        let user = Self::connect(&config, &config.user_path).await?;
        let device = Self::connect(&config, &config.device_path).await?;

        let configured_identifier = config.identifier.clone().or_else(|| {
            Path::new(&config.user_path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        });

        let db = Self::from_pools(user, device, configured_identifier);
        db.migrate(&schema()).await?;
        Ok(db)
    }

    /// Create two independent in-memory databases (for testing)
    pub async fn in_memory() -> Result<Self> {
        let user = Self::connect_memory().await?;
        let device = Self::connect_memory().await?;

        let db = Self::from_pools(user, device, Some("memory".to_string()));
        db.migrate(&schema()).await?;
        Ok(db)
    }

    async fn connect(config: &DatabaseConfig, path: &str) -> Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(config.connect_options(path))
            .await?;
        Ok(pool)
    }

    async fn connect_memory() -> Result<SqlitePool> {
        // Each in-memory connection is its own database; keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(pool)
    }

    fn from_pools(
        user: SqlitePool,
        device: SqlitePool,
        configured_identifier: Option<String>,
    ) -> Self {
        Self {
            user,
            device,
            configured_identifier,
            identifier: OnceLock::new(),
            observers: Mutex::new(HashMap::new()),
        }
    }

    /// Label of this store, resolved once from configuration
    pub fn identifier(&self) -> &str {
        self.identifier.get_or_init(|| {
            self.configured_identifier.clone().unwrap_or_else(|| "tray".to_string())
        })
    }

    /// Get the pool of a partition
    pub fn pool(&self, partition: Partition) -> &SqlitePool {
        match partition {
            Partition::User => &self.user,
            Partition::Device => &self.device,
        }
    }

    /// Apply pending schema migrations to both partitions
    pub async fn migrate(&self, migrations: &[MigrationDefinition]) -> Result<()> {
        for partition in Partition::ALL {
            self.migrate_partition(partition, migrations).await?;
        }
        Ok(())
    }

    async fn migrate_partition(
        &self,
        partition: Partition,
        migrations: &[MigrationDefinition],
    ) -> Result<()> {
        let pool = self.pool(partition);

        // Ensure migrations table exists
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        let rows = sqlx::query("SELECT version, checksum FROM _migrations")
            .fetch_all(pool)
            .await?;
        let mut applied: HashMap<i64, String> = HashMap::new();
        for row in &rows {
            let version: i64 = row.try_get("version")?;
            let checksum: String = row.try_get("checksum")?;
            applied.insert(version, checksum);
        }

        let current_version = applied.keys().copied().max().unwrap_or(0);

        for migration in migrations {
            if let Some(checksum) = applied.get(&migration.version) {
                if *checksum != migration.checksum {
                    return Err(StorageError::Migration(format!(
                        "checksum mismatch for {} migration {}",
                        partition, migration.version
                    )));
                }
                continue;
            }

            if migration.version <= current_version {
                return Err(StorageError::Migration(format!(
                    "{} migration {} is older than applied version {}",
                    partition, migration.version, current_version
                )));
            }

            tracing::info!(
                store = %self.identifier(),
                %partition,
                "Applying migration {} - {}",
                migration.version,
                migration.description
            );

            let mut tx = pool.begin().await?;

            sqlx::query(&migration.sql).execute(&mut *tx).await?;

            sqlx::query("INSERT INTO _migrations (version, description, checksum) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(&migration.description)
                .bind(&migration.checksum)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!("Migration {} applied successfully", migration.version);
        }

        Ok(())
    }

    /// Get the current schema version of a partition
    pub async fn schema_version(&self, partition: Partition) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _migrations")
            .fetch_one(self.pool(partition))
            .await?;

        Ok(version.unwrap_or(0))
    }

    /// Read items of the partitions of `kind`, optionally narrowed to a module and key
    pub async fn query(
        &self,
        kind: StorageKind,
        module: Option<&str>,
        key: Option<&str>,
    ) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for partition in kind.partitions() {
            let rows = sqlx::query(SELECT_ITEMS)
                .bind(module)
                .bind(module)
                .bind(key)
                .bind(key)
                .fetch_all(self.pool(*partition))
                .await?;
            for row in &rows {
                items.push(row_to_item(row)?);
            }
        }
        Ok(items)
    }

    /// Insert or update one row, returning it as stored.
    ///
    /// `created` survives updates; `updated` is stamped on every write.
    pub async fn insert_or_update(
        &self,
        partition: Partition,
        module: &str,
        key: &str,
        migrated_key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Item> {
        let now = to_millis(SystemTime::now());
        let mut tx = self.pool(partition).begin().await?;

        sqlx::query(UPSERT_ITEM)
            .bind(module)
            .bind(key)
            .bind(value)
            .bind(migrated_key)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(SELECT_ITEMS)
            .bind(Some(module))
            .bind(Some(module))
            .bind(Some(key))
            .bind(Some(key))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let item = row_to_item(&row)?;
        tracing::debug!(store = %self.identifier(), %partition, module, key, "stored item");
        self.notify(partition, module, vec![item.clone()]);
        Ok(item)
    }

    /// Delete rows of the partitions of `kind`, returning the number removed
    pub async fn delete(
        &self,
        kind: StorageKind,
        module: Option<&str>,
        key: Option<&str>,
    ) -> Result<u64> {
        let mut affected = 0;
        for partition in kind.partitions() {
            let mut tx = self.pool(*partition).begin().await?;

            let rows = sqlx::query(SELECT_ITEMS)
                .bind(module)
                .bind(module)
                .bind(key)
                .bind(key)
                .fetch_all(&mut *tx)
                .await?;
            let removed = rows.iter().map(row_to_item).collect::<Result<Vec<Item>>>()?;

            let result = sqlx::query(DELETE_ITEMS)
                .bind(module)
                .bind(module)
                .bind(key)
                .bind(key)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            affected += result.rows_affected();

            let mut by_module: HashMap<String, Vec<Item>> = HashMap::new();
            for item in removed {
                by_module.entry(item.module().to_string()).or_default().push(item);
            }
            for (module, items) in by_module {
                self.notify(*partition, &module, items);
            }
        }

        tracing::debug!(
            store = %self.identifier(),
            ?kind,
            ?module,
            ?key,
            affected,
            "deleted items"
        );
        Ok(affected)
    }

    /// Read the version of a module, 0 when none was written.
    ///
    /// For [`StorageKind::Undefined`] the first partition holding a version wins.
    pub async fn read_version(&self, kind: StorageKind, module: &str) -> Result<i32> {
        for partition in kind.partitions() {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT value FROM internal WHERE module = ? AND key = ?")
                    .bind(module)
                    .bind(VERSION_KEY)
                    .fetch_optional(self.pool(*partition))
                    .await?;

            if let Some(value) = value {
                let raw = value.unwrap_or_default();
                return raw.parse::<i32>().map_err(|_| {
                    StorageError::Corruption(format!(
                        "version of module '{module}' is not a number: '{raw}'"
                    ))
                });
            }
        }
        Ok(0)
    }

    /// Persist the version of a module
    pub async fn write_version(
        &self,
        partition: Partition,
        module: &str,
        version: i32,
    ) -> Result<()> {
        let now = to_millis(SystemTime::now());
        sqlx::query(
            "INSERT INTO internal (module, key, value, created, updated) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (module, key) DO UPDATE SET \
             value = excluded.value, updated = MAX(created, excluded.updated)",
        )
        .bind(module)
        .bind(VERSION_KEY)
        .bind(version.to_string())
        .bind(now)
        .bind(now)
        .execute(self.pool(partition))
        .await?;
        Ok(())
    }

    /// Delete version records of the partitions of `kind`; `None` deletes every module's
    pub async fn delete_versions(&self, kind: StorageKind, module: Option<&str>) -> Result<u64> {
        let mut affected = 0;
        for partition in kind.partitions() {
            let result = sqlx::query("DELETE FROM internal WHERE (? IS NULL OR module = ?)")
                .bind(module)
                .bind(module)
                .execute(self.pool(*partition))
                .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    /// Names of every module with items or a version in the partitions of `kind`
    pub async fn modules(&self, kind: StorageKind) -> Result<Vec<String>> {
        let mut modules = BTreeSet::new();
        for partition in kind.partitions() {
            let names: Vec<String> = sqlx::query_scalar(
                "SELECT module FROM preferences UNION SELECT module FROM internal",
            )
            .fetch_all(self.pool(*partition))
            .await?;
            modules.extend(names);
        }
        Ok(modules.into_iter().collect())
    }

    /// Deliver future writes of `module` in `partition` to `notifier`.
    ///
    /// Only a weak reference is kept; dropping the notifier ends the subscription.
    pub fn observe(&self, partition: Partition, module: &str, notifier: &Arc<ChangeNotifier>) {
        let mut observers = self.observers.lock();
        observers.retain(|_, entry| {
            entry.retain(|weak| weak.strong_count() > 0);
            !entry.is_empty()
        });

        let entry = observers.entry((partition, module.to_string())).or_default();
        let weak = Arc::downgrade(notifier);
        if !entry.iter().any(|existing| Weak::ptr_eq(existing, &weak)) {
            entry.push(weak);
        }
    }

    #[cfg(test)]
    pub(crate) fn observed_modules(&self) -> usize {
        self.observers.lock().len()
    }

    fn notify(&self, partition: Partition, module: &str, items: Vec<Item>) {
        let notifiers: Vec<Arc<ChangeNotifier>> = {
            let mut observers = self.observers.lock();
            let key = (partition, module.to_string());
            let Some(entry) = observers.get_mut(&key) else {
                return;
            };
            let live: Vec<Arc<ChangeNotifier>> = entry.iter().filter_map(Weak::upgrade).collect();
            entry.retain(|weak| weak.strong_count() > 0);
            if entry.is_empty() {
                observers.remove(&key);
            }
            live
        };

        for notifier in notifiers {
            notifier.notify(items.clone());
        }
    }

    /// Check that both partitions answer
    pub async fn health_check(&self) -> Result<()> {
        for partition in Partition::ALL {
            sqlx::query("SELECT 1").fetch_one(self.pool(partition)).await?;
        }
        Ok(())
    }

    /// Close both pools
    pub async fn close(&self) {
        self.user.close().await;
        self.device.close().await;
    }
}

fn row_to_item(row: &SqliteRow) -> Result<Item> {
    Ok(Item::from_parts(
        row.try_get::<String, _>("module")?,
        row.try_get::<String, _>("key")?,
        row.try_get::<Option<String>, _>("value")?,
        row.try_get::<Option<String>, _>("migrated_key")?,
        from_millis(row.try_get::<i64, _>("created")?),
        from_millis(row.try_get::<i64, _>("updated")?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChangeListener, InlineDispatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_schema_applied_to_both_partitions() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let latest = schema().last().unwrap().version;

        assert_eq!(db.schema_version(Partition::User).await.unwrap(), latest);
        assert_eq!(db.schema_version(Partition::Device).await.unwrap(), latest);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        db.migrate(&schema()).await.unwrap();

        let version = db.schema_version(Partition::User).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_migration_checksum_mismatch() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let mut tampered = schema();
        tampered[0] = MigrationDefinition::new(1, "Changed", "CREATE TABLE other (id INTEGER)");

        let result = db.migrate(&tampered).await;
        assert!(matches!(result, Err(StorageError::Migration(_))));
    }

    #[tokio::test]
    async fn test_additional_migration() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let mut migrations = schema();
        migrations.push(MigrationDefinition::new(
            4,
            "Index updated column",
            "CREATE INDEX IF NOT EXISTS preferences_updated ON preferences (updated)",
        ));

        db.migrate(&migrations).await.unwrap();
        assert_eq!(db.schema_version(Partition::Device).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insert_preserves_created() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let first = db
            .insert_or_update(Partition::User, "m", "k", None, Some("one"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = db
            .insert_or_update(Partition::User, "m", "k", Some("old"), Some("two"))
            .await
            .unwrap();

        assert_eq!(first.created(), second.created());
        assert!(second.updated() >= second.created());
        assert_eq!(second.value(), Some("two"));
        assert_eq!(second.migrated_key(), Some("old"));
    }

    #[tokio::test]
    async fn test_query_scopes() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        db.insert_or_update(Partition::User, "a", "k1", None, Some("1")).await.unwrap();
        db.insert_or_update(Partition::User, "b", "k1", None, Some("2")).await.unwrap();
        db.insert_or_update(Partition::Device, "a", "k2", None, None).await.unwrap();

        assert_eq!(db.query(StorageKind::User, None, None).await.unwrap().len(), 2);
        assert_eq!(db.query(StorageKind::User, Some("a"), None).await.unwrap().len(), 1);
        assert_eq!(db.query(StorageKind::Undefined, Some("a"), None).await.unwrap().len(), 2);

        let null_item = db.query(StorageKind::Device, Some("a"), Some("k2")).await.unwrap();
        assert_eq!(null_item.len(), 1);
        assert!(null_item[0].value().is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_rows_affected() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        db.insert_or_update(Partition::User, "a", "k1", None, Some("1")).await.unwrap();
        db.insert_or_update(Partition::Device, "a", "k1", None, Some("2")).await.unwrap();

        assert_eq!(db.delete(StorageKind::Undefined, Some("a"), Some("k1")).await.unwrap(), 2);
        assert_eq!(db.delete(StorageKind::Undefined, Some("a"), Some("k1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_versions() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        assert_eq!(db.read_version(StorageKind::User, "m").await.unwrap(), 0);

        db.write_version(Partition::User, "m", 2).await.unwrap();
        db.write_version(Partition::User, "m", 5).await.unwrap();
        assert_eq!(db.read_version(StorageKind::User, "m").await.unwrap(), 5);
        assert_eq!(db.read_version(StorageKind::Device, "m").await.unwrap(), 0);
        assert_eq!(db.read_version(StorageKind::Undefined, "m").await.unwrap(), 5);

        db.delete_versions(StorageKind::Undefined, Some("m")).await.unwrap();
        assert_eq!(db.read_version(StorageKind::User, "m").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_modules_listing() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        db.insert_or_update(Partition::User, "b", "k", None, Some("1")).await.unwrap();
        db.insert_or_update(Partition::Device, "a", "k", None, Some("1")).await.unwrap();
        db.write_version(Partition::User, "c", 1).await.unwrap();

        assert_eq!(db.modules(StorageKind::Undefined).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(db.modules(StorageKind::Device).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_observers_receive_module_writes() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let notifier = Arc::new(ChangeNotifier::new());
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let listener: Arc<dyn ChangeListener> = Arc::new(move |items: &[Item]| {
            sink.fetch_add(items.len(), Ordering::SeqCst);
        });
        notifier.register(listener, Arc::new(InlineDispatcher));
        db.observe(Partition::User, "m", &notifier);

        db.insert_or_update(Partition::User, "m", "k", None, Some("1")).await.unwrap();
        db.insert_or_update(Partition::User, "other", "k", None, Some("1")).await.unwrap();
        db.insert_or_update(Partition::Device, "m", "k", None, Some("1")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        db.delete(StorageKind::User, None, None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(notifier);
        db.insert_or_update(Partition::User, "m", "k", None, Some("2")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_observers_are_pruned() {
        let db = SqliteDatabase::in_memory().await.unwrap();

        let written = Arc::new(ChangeNotifier::new());
        db.observe(Partition::User, "written", &written);
        drop(written);
        db.insert_or_update(Partition::User, "written", "k", None, Some("1")).await.unwrap();
        assert_eq!(db.observed_modules(), 0);

        // Modules nobody writes to again are pruned by the next subscription
        for i in 0..10 {
            let short_lived = Arc::new(ChangeNotifier::new());
            db.observe(Partition::Device, &format!("module_{i}"), &short_lived);
        }
        let kept = Arc::new(ChangeNotifier::new());
        db.observe(Partition::User, "kept", &kept);
        assert_eq!(db.observed_modules(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig::in_directory(temp_dir.path());

        {
            let db = SqliteDatabase::new(config.clone()).await.unwrap();
            db.insert_or_update(Partition::Device, "m", "k", None, Some("v")).await.unwrap();
            db.write_version(Partition::Device, "m", 7).await.unwrap();
            assert_eq!(db.identifier(), "tray");
            db.close().await;
        }

        let db = SqliteDatabase::new(config).await.unwrap();
        let items = db.query(StorageKind::Device, Some("m"), None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(db.read_version(StorageKind::Device, "m").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_same_file_for_both_partitions_rejected() {
        let config = DatabaseConfig::new("same.db", "same.db");
        let result = SqliteDatabase::new(config).await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::new("user.db", "device.db")
            .max_connections(2)
            .connect_timeout(Duration::from_secs(10))
            .busy_timeout(Duration::from_secs(1))
            .wal_mode(false)
            .synchronous(SynchronousMode::Full)
            .identifier("prefs");

        assert_eq!(config.user_path, "user.db");
        assert_eq!(config.device_path, "device.db");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.wal_mode);
        assert!(matches!(config.synchronous, SynchronousMode::Full));
        assert_eq!(config.identifier.as_deref(), Some("prefs"));
    }
}
