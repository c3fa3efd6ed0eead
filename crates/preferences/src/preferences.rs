//! Versioned, typed access to one module
//!
//! A [`Preferences`] owns a [`Storage`] and a target version. The stored
//! version is compared with the target on construction and one of the
//! [`VersionHooks`] runs. A hook that refuses the change fails construction.
//! When the storage itself can't be reached the new version is not written,
//! and every later `put` or `remove` retries the check before touching
//! data. Reads are never gated.

use std::sync::Arc;

use async_trait::async_trait;
use storage::{ChangeListener, Dispatcher, Item, Storage};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{PreferencesError, Result};
use crate::migration::{self, Migration, MigrationReport};
use crate::value::{self, Value};

/// Callbacks run when the stored version differs from the target
#[async_trait]
pub trait VersionHooks<S: Storage + ?Sized>: Send + Sync {
    /// The module has never been versioned
    async fn on_create(&self, _storage: &S, _version: i32) -> Result<()> {
        Ok(())
    }

    /// The stored version is lower than the target
    async fn on_upgrade(&self, storage: &S, old_version: i32, new_version: i32) -> Result<()> {
        Err(PreferencesError::IllegalState(format!(
            "no upgrade path for module '{}' from version {} to {}",
            storage.module(),
            old_version,
            new_version
        )))
    }

    /// The stored version is higher than the target
    async fn on_downgrade(&self, storage: &S, old_version: i32, new_version: i32) -> Result<()> {
        Err(PreferencesError::IllegalState(format!(
            "can't downgrade module '{}' from version {} to {}",
            storage.module(),
            old_version,
            new_version
        )))
    }
}

/// Hooks that accept creation and refuse upgrades and downgrades
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl<S: Storage + ?Sized> VersionHooks<S> for DefaultHooks {}

/// Why a version check did not complete
enum CheckFailure {
    /// A hook refused the change
    Hook(PreferencesError),
    /// The stored version could not be read or written
    Storage(PreferencesError),
}

impl CheckFailure {
    fn into_inner(self) -> PreferencesError {
        match self {
            CheckFailure::Hook(e) | CheckFailure::Storage(e) => e,
        }
    }
}

/// Typed, versioned preferences over a storage
pub struct Preferences<S, H = DefaultHooks> {
    storage: S,
    version: i32,
    hooks: H,
    version_checked: Mutex<bool>,
}

impl<S: Storage> Preferences<S, DefaultHooks> {
    /// Open `storage` at `version` with the default hooks
    pub async fn new(storage: S, version: i32) -> Result<Self> {
        Self::with_hooks(storage, version, DefaultHooks).await
    }
}

impl<S, H> Preferences<S, H>
where
    S: Storage,
    H: VersionHooks<S>,
{
    /// Open `storage` at `version`, running `hooks` on version changes.
    ///
    /// Fails for a version below 1 and with the hook's error when a hook
    /// refuses the change. If the storage can't be reached the check is
    /// retried by the next write.
    pub async fn with_hooks(storage: S, version: i32, hooks: H) -> Result<Self> {
        if version < 1 {
            return Err(PreferencesError::IllegalArgument(format!(
                "version must be at least 1, got {version}"
            )));
        }

        let mut preferences = Self {
            storage,
            version,
            hooks,
            version_checked: Mutex::new(false),
        };

        match preferences.change_version().await {
            Ok(()) => *preferences.version_checked.get_mut() = true,
            Err(CheckFailure::Hook(e)) => {
                warn!(module = preferences.name(), version, error = %e, "Version change refused");
                return Err(e);
            }
            Err(CheckFailure::Storage(e)) => {
                warn!(module = preferences.name(), version, error = %e, "Version check deferred");
            }
        }
        Ok(preferences)
    }

    /// Module name
    pub fn name(&self) -> &str {
        self.storage.module()
    }

    /// Target version
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Version currently recorded in storage
    pub async fn stored_version(&self) -> Result<i32> {
        Ok(self.storage.version().await?)
    }

    /// Underlying storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Version hooks
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Bring the stored version to the target, unless that already happened
    pub async fn ensure_version(&self) -> Result<()> {
        self.lock_version().await.map(|_| ())
    }

    /// Lock the version state, running the check first if it is pending.
    ///
    /// Writes hold the returned guard so `wipe` can't reset the version
    /// between the check and the write.
    async fn lock_version(&self) -> Result<MutexGuard<'_, bool>> {
        let mut checked = self.version_checked.lock().await;
        if *checked {
            return Ok(checked);
        }

        if let Err(failure) = self.change_version().await {
            let e = failure.into_inner();
            warn!(
                module = self.name(),
                version = self.version,
                error = %e,
                "Version change failed"
            );
            return Err(PreferencesError::VersionChange {
                module: self.name().to_string(),
                version: self.version,
                source: Box::new(e),
            });
        }
        *checked = true;
        Ok(checked)
    }

    async fn change_version(&self) -> std::result::Result<(), CheckFailure> {
        let current = self
            .storage
            .version()
            .await
            .map_err(|e| CheckFailure::Storage(e.into()))?;
        let target = self.version;

        if current == target {
            return Ok(());
        }

        let hooked = if current == 0 {
            info!(module = self.name(), version = target, "Creating module");
            self.hooks.on_create(&self.storage, target).await
        } else if current < target {
            info!(module = self.name(), from = current, to = target, "Upgrading module");
            self.hooks.on_upgrade(&self.storage, current, target).await
        } else {
            info!(module = self.name(), from = current, to = target, "Downgrading module");
            self.hooks.on_downgrade(&self.storage, current, target).await
        };
        hooked.map_err(CheckFailure::Hook)?;

        self.storage
            .set_version(target)
            .await
            .map_err(|e| CheckFailure::Storage(e.into()))
    }

    /// Store `value` under `key`
    pub async fn put(&self, key: &str, value: impl Into<Value> + Send) -> Result<()> {
        let stored = value.into().to_stored()?;
        let _checked = self.lock_version().await?;
        debug!(module = self.name(), key, "Put");
        self.storage.put(key, stored.as_deref()).await?;
        Ok(())
    }

    /// Remove `key`
    pub async fn remove(&self, key: &str) -> Result<()> {
        let _checked = self.lock_version().await?;
        debug!(module = self.name(), key, "Remove");
        self.storage.remove(key).await?;
        Ok(())
    }

    /// Item stored under `key`
    pub async fn get(&self, key: &str) -> Result<Item> {
        self.storage
            .get(key)
            .await?
            .ok_or_else(|| PreferencesError::ItemNotFound {
                module: self.name().to_string(),
                key: key.to_string(),
            })
    }

    /// Every item of the module
    pub async fn get_all(&self) -> Result<Vec<Item>> {
        Ok(self.storage.get_all().await?)
    }

    /// Whether `key` is stored
    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.storage.get(key).await?.is_some())
    }

    /// String value; `None` for a stored null
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key).await?.value().map(str::to_string))
    }

    /// String value, or `default` when the key is absent
    pub async fn get_string_or(&self, key: &str, default: Option<&str>) -> Result<Option<String>> {
        or_default(self.get_string(key).await, default.map(str::to_string))
    }

    /// 32-bit integer value
    pub async fn get_int(&self, key: &str) -> Result<i32> {
        value::read_int(&self.get(key).await?)
    }

    /// 32-bit integer value, or `default` when the key is absent
    pub async fn get_int_or(&self, key: &str, default: i32) -> Result<i32> {
        or_default(self.get_int(key).await, default)
    }

    /// 64-bit integer value
    pub async fn get_long(&self, key: &str) -> Result<i64> {
        value::read_long(&self.get(key).await?)
    }

    /// 64-bit integer value, or `default` when the key is absent
    pub async fn get_long_or(&self, key: &str, default: i64) -> Result<i64> {
        or_default(self.get_long(key).await, default)
    }

    /// Float value
    pub async fn get_float(&self, key: &str) -> Result<f32> {
        value::read_float(&self.get(key).await?)
    }

    /// Float value, or `default` when the key is absent
    pub async fn get_float_or(&self, key: &str, default: f32) -> Result<f32> {
        or_default(self.get_float(key).await, default)
    }

    /// Boolean value
    pub async fn get_bool(&self, key: &str) -> Result<bool> {
        value::read_bool(&self.get(key).await?)
    }

    /// Boolean value, or `default` when the key is absent
    pub async fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        or_default(self.get_bool(key).await, default)
    }

    /// Delete every item, keeping the version
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear().await?;
        Ok(())
    }

    /// Delete every item and the version.
    ///
    /// The next write runs the version check again, starting with
    /// `on_create`.
    pub async fn wipe(&self) -> Result<()> {
        let mut checked = self.version_checked.lock().await;
        self.storage.wipe().await?;
        *checked = false;
        Ok(())
    }

    /// Run migrations into this module
    pub async fn migrate(&self, migrations: &[&dyn Migration]) -> Result<MigrationReport> {
        migration::migrate(&self.storage, migrations).await
    }

    /// Move every item of `other` into this module and wipe `other`
    pub async fn annex(&self, other: &dyn Storage) -> Result<()> {
        self.storage.annex(other).await?;
        Ok(())
    }

    /// Register a change listener on the underlying storage
    pub fn register_change_listener(
        &self,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool {
        self.storage.register_change_listener(listener, dispatcher)
    }

    /// Unregister a change listener
    pub fn unregister_change_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        self.storage.unregister_change_listener(listener)
    }
}

fn or_default<T>(result: Result<T>, default: T) -> Result<T> {
    match result {
        Err(e) if e.is_not_found() => Ok(default),
        other => other,
    }
}
