//! AnaDB Core Library
//!
//! Versioned, snapshot-based storage for analysis state:
//! - Namespaced key-value stores holding JSON values or raw buffers
//! - Undo entries recording each user action
//! - Content-hashed snapshots forming a parent-linked tree
//! - A database tracking the current snapshot for undo/redo
//! - In-memory and disk storage backends

pub mod config;
pub mod database;
pub mod disk;
pub mod error;
pub mod kvstore;
pub mod object;
pub mod snapshot;
pub mod storage;
pub mod undo;

pub use config::DatabaseConfig;
pub use database::{Database, VerifyReport};
pub use disk::DiskStorage;
pub use error::{Error, Result};
pub use kvstore::{KeyValueStore, NamespacePath, NamespaceScope, ValueKind};
pub use object::ObjectId;
pub use snapshot::{NewSnapshot, Snapshot, SnapshotId};
pub use storage::{MemoryStorage, Storage};
pub use undo::{UndoAction, UndoEntry, User};
