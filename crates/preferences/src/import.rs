//! Imports from legacy key/value sources
//!
//! [`SourceImport`] turns one key of a [`LegacySource`] into a [`Migration`]:
//! the key is only imported while the source still holds it, and it is
//! removed from the source once the value is stored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use storage::Item;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{PreferencesError, Result};
use crate::migration::Migration;
use crate::value::Value;

/// A foreign key/value store data is imported from
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Whether the source holds `key`
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Value for `key`, if present
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Drop `key` from the source
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory legacy source; clones share their entries
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.write().await.insert(key.into(), value.into());
    }

    /// Number of entries left
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the source is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LegacySource for MemorySource {
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Legacy preferences kept in a flat JSON object file
pub struct JsonFileSource {
    path: PathBuf,
    entries: RwLock<Map<String, JsonValue>>,
}

impl JsonFileSource {
    /// Load the file at `path`. A missing file is an empty source.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<JsonValue>(&contents)? {
                JsonValue::Object(map) => map,
                other => {
                    return Err(PreferencesError::IllegalArgument(format!(
                        "legacy file {} holds {} instead of an object",
                        path.display(),
                        json_kind(&other)
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened legacy source");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys still present in the source
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    async fn write_atomic(&self, contents: &str) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LegacySource for JsonFileSource {
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).map(from_json))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        let contents = serde_json::to_string_pretty(&*entries)?;
        self.write_atomic(&contents).await
    }
}

fn from_json(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => i32::try_from(v).map_or(Value::Long(v), Value::Int),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Bytes(value.to_string().into_bytes()),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Imports `previous_key` of a legacy source into `tray_key`
pub struct SourceImport<'a, S: ?Sized> {
    source: &'a S,
    previous_key: String,
    tray_key: String,
}

impl<'a, S: LegacySource + ?Sized> SourceImport<'a, S> {
    /// Import `previous_key` from `source` into `tray_key`
    pub fn new(
        source: &'a S,
        previous_key: impl Into<String>,
        tray_key: impl Into<String>,
    ) -> Self {
        Self {
            source,
            previous_key: previous_key.into(),
            tray_key: tray_key.into(),
        }
    }

    /// Import a key under its own name
    pub fn same_key(source: &'a S, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(source, key.clone(), key)
    }
}

#[async_trait]
impl<S: LegacySource + ?Sized> Migration for SourceImport<'_, S> {
    fn previous_key(&self) -> &str {
        &self.previous_key
    }

    fn tray_key(&self) -> &str {
        &self.tray_key
    }

    async fn data(&self) -> Result<Value> {
        Ok(self.source.get(&self.previous_key).await?.unwrap_or(Value::Null))
    }

    async fn should_migrate(&self) -> Result<bool> {
        self.source.contains(&self.previous_key).await
    }

    async fn on_post_migrate(&self, item: Option<&Item>) -> Result<()> {
        if item.is_some() {
            self.source.remove(&self.previous_key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::migrate;
    use storage::{MemoryStorage, Storage};
    use tempfile::TempDir;

    const LEGACY: &str = r#"{
        "name": "alice",
        "count": 3,
        "big": 5000000000,
        "enabled": true,
        "ratio": 0.5,
        "tags": ["a", "b"],
        "nothing": null
    }"#;

    #[test]
    fn test_json_conversion() {
        assert_eq!(from_json(&serde_json::json!(3)), Value::Int(3));
        assert_eq!(from_json(&serde_json::json!(5_000_000_000i64)), Value::Long(5_000_000_000));
        assert_eq!(from_json(&serde_json::json!(0.5)), Value::Double(0.5));
        assert_eq!(from_json(&serde_json::json!(true)), Value::Bool(true));
        assert_eq!(from_json(&serde_json::json!(null)), Value::Null);
        assert_eq!(
            from_json(&serde_json::json!([1, 2])),
            Value::Bytes(b"[1,2]".to_vec())
        );
    }

    #[tokio::test]
    async fn test_memory_source_import() {
        let source = MemorySource::new();
        source.insert("old", "value").await;
        let storage = MemoryStorage::new("m");

        let import = SourceImport::new(&source, "old", "new");
        let report = migrate(&storage, &[&import]).await.unwrap();

        assert_eq!(report.migrated, 1);
        assert!(source.is_empty().await);
        let item = storage.get("new").await.unwrap().unwrap();
        assert_eq!(item.value(), Some("value"));
        assert_eq!(item.migrated_key(), Some("old"));
    }

    #[tokio::test]
    async fn test_missing_key_is_cancelled() {
        let source = MemorySource::new();
        let storage = MemoryStorage::new("m");

        let import = SourceImport::same_key(&source, "absent");
        let report = migrate(&storage, &[&import]).await.unwrap();

        assert_eq!(report.cancelled, 1);
        assert!(storage.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_import_removes_migrated_keys_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.json");
        tokio::fs::write(&path, LEGACY).await.unwrap();

        let source = JsonFileSource::open(&path).await.unwrap();
        let storage = MemoryStorage::new("m");
        let keys = ["name", "count", "big", "enabled", "ratio", "tags", "nothing"];
        let imports: Vec<_> = keys.iter().map(|k| SourceImport::same_key(&source, *k)).collect();
        let tasks: Vec<&dyn Migration> = imports.iter().map(|i| i as &dyn Migration).collect();

        let report = migrate(&storage, &tasks).await.unwrap();
        assert_eq!(report.migrated, 5);
        assert_eq!(report.rejected, 2);

        assert_eq!(storage.get("count").await.unwrap().unwrap().value(), Some("3"));
        assert_eq!(storage.get("big").await.unwrap().unwrap().value(), Some("5000000000"));
        assert_eq!(storage.get("enabled").await.unwrap().unwrap().value(), Some("true"));
        assert!(storage.get("nothing").await.unwrap().unwrap().value().is_none());
        assert!(storage.get("ratio").await.unwrap().is_none());

        // Only rejected keys stay behind, on disk too
        let reopened = JsonFileSource::open(&path).await.unwrap();
        let mut left = reopened.keys().await;
        left.sort();
        assert_eq!(left, vec!["ratio".to_string(), "tags".to_string()]);

        let before = storage.get_all().await.unwrap();
        let report = migrate(&storage, &tasks).await.unwrap();
        assert_eq!(report.migrated, 0);
        assert_eq!(report.already_migrated, 5);
        assert_eq!(report.rejected, 2);

        let mut after = storage.get_all().await.unwrap();
        let mut before = before;
        before.sort_by(|a, b| a.key().cmp(b.key()));
        after.sort_by(|a, b| a.key().cmp(b.key()));
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let source = JsonFileSource::open(dir.path().join("none.json")).await.unwrap();
        assert!(source.keys().await.is_empty());
        assert!(!source.contains("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("array.json");
        tokio::fs::write(&path, "[1, 2, 3]").await.unwrap();

        let result = JsonFileSource::open(&path).await;
        assert!(matches!(result, Err(PreferencesError::IllegalArgument(_))));
    }
}
