//! One-time data imports into a module
//!
//! A [`Migration`] describes a single key pulled from a foreign source.
//! [`migrate`] runs a batch of them against a [`Storage`], skipping tasks
//! that already ran by comparing the stored item's migrated key.

use async_trait::async_trait;
use storage::{Item, Storage};
use tracing::{debug, warn};

use crate::error::Result;
use crate::value::Value;

/// A single key to import from a foreign source
#[async_trait]
pub trait Migration: Send + Sync {
    /// Key in the foreign source
    fn previous_key(&self) -> &str;

    /// Key the value is stored under
    fn tray_key(&self) -> &str;

    /// Value to import
    async fn data(&self) -> Result<Value>;

    /// Whether the import should run at all
    async fn should_migrate(&self) -> Result<bool> {
        Ok(true)
    }

    /// Called after the attempt, with the stored item or `None` when the
    /// value was rejected
    async fn on_post_migrate(&self, _item: Option<&Item>) -> Result<()> {
        Ok(())
    }
}

/// Outcome counts of a [`migrate`] batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Values written to storage
    pub migrated: usize,
    /// Tasks skipped because the same previous key was imported before
    pub already_migrated: usize,
    /// Tasks whose `should_migrate` returned false
    pub cancelled: usize,
    /// Tasks whose data had an unsupported type
    pub rejected: usize,
}

impl MigrationReport {
    /// Total number of tasks seen
    pub fn total(&self) -> usize {
        self.migrated + self.already_migrated + self.cancelled + self.rejected
    }
}

/// Run `migrations` in order against `storage`.
///
/// Rejected values are logged and reported through `on_post_migrate(None)`,
/// they never fail the batch. Storage errors abort it.
pub async fn migrate<S>(storage: &S, migrations: &[&dyn Migration]) -> Result<MigrationReport>
where
    S: Storage + ?Sized,
{
    let mut report = MigrationReport::default();

    for migration in migrations {
        let previous_key = migration.previous_key();
        let tray_key = migration.tray_key();

        if let Some(existing) = storage.get(tray_key).await? {
            if existing.migrated_key() == Some(previous_key) {
                debug!(
                    module = storage.module(),
                    key = tray_key,
                    previous_key,
                    "Skipping migration, already migrated"
                );
                report.already_migrated += 1;
                continue;
            }
        }

        if !migration.should_migrate().await? {
            debug!(module = storage.module(), key = tray_key, "Migration cancelled");
            report.cancelled += 1;
            continue;
        }

        let data = migration.data().await?;
        if !data.is_supported() {
            warn!(
                module = storage.module(),
                key = tray_key,
                previous_key,
                value_type = data.type_name(),
                "Could not migrate value of unsupported type"
            );
            migration.on_post_migrate(None).await?;
            report.rejected += 1;
            continue;
        }

        let value = data.to_stored()?;
        storage
            .put_migrated(tray_key, Some(previous_key), value.as_deref())
            .await?;
        let item = storage.get(tray_key).await?;
        debug!(module = storage.module(), key = tray_key, previous_key, "Migrated value");
        migration.on_post_migrate(item.as_ref()).await?;
        report.migrated += 1;
    }

    Ok(report)
}
