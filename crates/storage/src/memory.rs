//! In-memory storage for tests and previews

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{require_key, Result, StorageError};
use crate::item::Item;
use crate::notify::{ChangeListener, ChangeNotifier, Dispatcher};
use crate::storage::{Storage, StorageKind};

#[derive(Default)]
struct State {
    items: HashMap<String, Item>,
    version: i32,
}

/// Map-backed [`Storage`].
///
/// Clones share the same data, so two handles on one module behave like two
/// storages over the same database rows.
#[derive(Clone)]
pub struct MemoryStorage {
    module: Arc<str>,
    kind: StorageKind,
    state: Arc<RwLock<State>>,
    notifier: Arc<ChangeNotifier>,
}

impl MemoryStorage {
    /// Create an empty user-classified storage
    pub fn new(module: impl Into<String>) -> Self {
        Self::with_kind(module, StorageKind::User)
    }

    /// Create an empty storage with the given classification
    pub fn with_kind(module: impl Into<String>, kind: StorageKind) -> Self {
        Self {
            module: Arc::from(module.into()),
            kind,
            state: Arc::new(RwLock::new(State::default())),
            notifier: Arc::new(ChangeNotifier::new()),
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.kind.writable_partition() {
            Some(_) => Ok(()),
            None => Err(StorageError::classification(&self.module)),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn module(&self) -> &str {
        &self.module
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        Ok(self.state.read().items.get(key).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Item>> {
        Ok(self.state.read().items.values().cloned().collect())
    }

    async fn put_migrated(
        &self,
        key: &str,
        migrated_key: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        require_key(key)?;

        let value = value.map(str::to_string);
        let migrated_key = migrated_key.map(str::to_string);
        let item = {
            let mut state = self.state.write();
            let item = match state.items.get(key) {
                Some(existing) => existing.updated_with(value, migrated_key),
                None => Item::new(&*self.module, key, value, migrated_key),
            };
            state.items.insert(key.to_string(), item.clone());
            item
        };
        self.notifier.notify(vec![item]);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        require_key(key)?;
        let removed = self.state.write().items.remove(key);
        if let Some(item) = removed {
            self.notifier.notify(vec![item]);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let removed: Vec<Item> = self.state.write().items.drain().map(|(_, item)| item).collect();
        self.notifier.notify(removed);
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        let removed: Vec<Item> = {
            let mut state = self.state.write();
            state.version = 0;
            state.items.drain().map(|(_, item)| item).collect()
        };
        self.notifier.notify(removed);
        Ok(())
    }

    async fn version(&self) -> Result<i32> {
        Ok(self.state.read().version)
    }

    async fn set_version(&self, version: i32) -> Result<()> {
        self.check_writable()?;
        if version < 0 {
            return Err(StorageError::InvalidArgument(format!(
                "version must not be negative, got {version}"
            )));
        }
        self.state.write().version = version;
        Ok(())
    }

    fn register_change_listener(
        &self,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool {
        self.notifier.register(listener, dispatcher)
    }

    fn unregister_change_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        self.notifier.unregister(listener)
    }
}
