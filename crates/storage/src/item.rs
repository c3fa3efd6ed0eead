//! Stored preference entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One stored entry of a module.
///
/// Items are snapshots: writing to the storage produces a new `Item`, the
/// old one is never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    module: String,
    key: String,
    value: Option<String>,
    migrated_key: Option<String>,
    created: SystemTime,
    updated: SystemTime,
}

impl Item {
    /// Create a freshly inserted item, both timestamps set to now
    pub fn new(
        module: impl Into<String>,
        key: impl Into<String>,
        value: Option<String>,
        migrated_key: Option<String>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            module: module.into(),
            key: key.into(),
            value,
            migrated_key,
            created: now,
            updated: now,
        }
    }

    /// Rebuild an item read back from a backend.
    ///
    /// `updated` is clamped so it never precedes `created`.
    pub fn from_parts(
        module: impl Into<String>,
        key: impl Into<String>,
        value: Option<String>,
        migrated_key: Option<String>,
        created: SystemTime,
        updated: SystemTime,
    ) -> Self {
        Self {
            module: module.into(),
            key: key.into(),
            value,
            migrated_key,
            created,
            updated: updated.max(created),
        }
    }

    /// Copy of this item carrying a new value, keeping `created`
    pub(crate) fn updated_with(&self, value: Option<String>, migrated_key: Option<String>) -> Self {
        Self {
            module: self.module.clone(),
            key: self.key.clone(),
            value,
            migrated_key,
            created: self.created,
            updated: SystemTime::now().max(self.created),
        }
    }

    /// Module this item belongs to
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Key of the item
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored value, `None` when null was written
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Key this value was migrated from, if the value came from a migration
    pub fn migrated_key(&self) -> Option<&str> {
        self.migrated_key.as_deref()
    }

    /// First insert time
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Last write time
    pub fn updated(&self) -> SystemTime {
        self.updated
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Item{{module='{}', key='{}', value='{}', migratedKey='{}', created={}, updated={}}}",
            self.module,
            self.key,
            self.value.as_deref().unwrap_or("null"),
            self.migrated_key.as_deref().unwrap_or("null"),
            to_millis(self.created),
            to_millis(self.updated),
        )
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for earlier times
pub fn to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Inverse of [`to_millis`]
pub fn from_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_timestamps() {
        let item = Item::new("module", "key", Some("value".to_string()), None);
        assert_eq!(item.created(), item.updated());
        assert_eq!(item.module(), "module");
        assert_eq!(item.key(), "key");
        assert_eq!(item.value(), Some("value"));
        assert!(item.migrated_key().is_none());
    }

    #[test]
    fn test_updated_keeps_created() {
        let item = Item::new("module", "key", Some("a".to_string()), Some("old".to_string()));
        let next = item.updated_with(Some("b".to_string()), None);

        assert_eq!(next.created(), item.created());
        assert!(next.updated() >= next.created());
        assert_eq!(next.value(), Some("b"));
        assert!(next.migrated_key().is_none());
    }

    #[test]
    fn test_from_parts_clamps_updated() {
        let created = from_millis(2_000);
        let item = Item::from_parts("m", "k", None, None, created, from_millis(1_000));
        assert_eq!(item.updated(), created);
    }

    #[test]
    fn test_display_includes_every_field() {
        let item = Item::from_parts(
            "settings",
            "theme",
            Some("dark".to_string()),
            Some("legacy_theme".to_string()),
            from_millis(1_000),
            from_millis(2_000),
        );
        let text = item.to_string();

        for part in ["settings", "theme", "dark", "legacy_theme", "1000", "2000"] {
            assert!(text.contains(part), "{text} is missing {part}");
        }
    }

    #[test]
    fn test_display_null_value() {
        let item = Item::new("m", "k", None, None);
        assert!(item.to_string().contains("value='null'"));
    }

    #[test]
    fn test_millis_round_trip() {
        let time = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(time), 1_700_000_000_123);
        assert_eq!(to_millis(from_millis(-5)), 0);
    }

    #[test]
    fn test_item_serialization() {
        let item = Item::new("m", "k", Some("v".to_string()), None);
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("migratedKey"));

        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
