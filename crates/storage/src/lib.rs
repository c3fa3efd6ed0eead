//! Storage layer for Tray
//!
//! This crate provides the module-scoped [`Storage`] abstraction, an
//! in-memory implementation, and the SQLite record store with its two
//! backup partitions and change notification.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod error;
pub mod item;
pub mod memory;
pub mod notify;
pub mod persisted;
pub mod storage;

pub use database::{DatabaseConfig, MigrationDefinition, SqliteDatabase, SynchronousMode};
pub use error::{Result, StorageError};
pub use item::Item;
pub use memory::MemoryStorage;
pub use notify::{
    ChangeListener, ChangeNotifier, DispatchQueue, Dispatcher, InlineDispatcher, QueueDispatcher,
    RuntimeDispatcher,
};
pub use persisted::DatabaseStorage;
pub use storage::{Partition, Storage, StorageKind};
