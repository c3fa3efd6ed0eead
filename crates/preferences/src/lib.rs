//! Versioned preferences for Tray
//!
//! Typed values on top of a [`storage::Storage`], a version lifecycle with
//! create/upgrade/downgrade hooks, and one-time imports from legacy
//! key/value sources.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod import;
pub mod migration;
pub mod preferences;
pub mod value;

pub use error::{PreferencesError, Result};
pub use import::{JsonFileSource, LegacySource, MemorySource, SourceImport};
pub use migration::{migrate, Migration, MigrationReport};
pub use preferences::{DefaultHooks, Preferences, VersionHooks};
pub use value::Value;
