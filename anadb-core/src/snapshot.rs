//! Snapshots: immutable checkpoints of file contents and undo history
//!
//! A [`Snapshot`] is a cheap handle onto one entry of its database's arena.
//! The parent link is stored as an id and resolved through the database, so
//! handles never own their ancestors.

use crate::database::Shared;
use crate::error::Result;
use crate::kvstore::KeyValueStore;
use crate::object::ObjectId;
use crate::undo::{UndoEntry, UndoRecord, User};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Integer id of a snapshot, unique within its database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub i64);

impl From<i64> for SnapshotId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arena entry behind a snapshot handle
pub(crate) struct SnapshotEntry {
    pub id: SnapshotId,
    pub name: String,
    pub auto_save: bool,
    pub parent: Option<SnapshotId>,
    pub contents: ObjectId,
    /// Entries recorded by this snapshot only; ancestors hold the rest
    pub undo: Vec<UndoEntry>,
    /// The only part of a snapshot that may change after commit
    pub data: RwLock<KeyValueStore>,
}

/// On-storage form of a snapshot entry
#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    id: SnapshotId,
    name: String,
    auto_save: bool,
    parent: Option<SnapshotId>,
    contents: ObjectId,
    undo: Vec<UndoRecord>,
    data: Vec<u8>,
}

impl SnapshotEntry {
    /// Encode this entry with `data` standing in for its metadata store
    pub fn encode(&self, data: &KeyValueStore) -> Result<Vec<u8>> {
        let record = SnapshotRecord {
            id: self.id,
            name: self.name.clone(),
            auto_save: self.auto_save,
            parent: self.parent,
            contents: self.contents,
            undo: self.undo.iter().map(UndoEntry::to_record).collect(),
            data: data.serialized_data()?,
        };
        Ok(bincode::serialize(&record)?)
    }

    /// Decode an entry, sharing one `Arc<User>` per distinct user
    pub fn decode(blob: &[u8], users: &mut HashMap<User, Arc<User>>) -> Result<Self> {
        let record: SnapshotRecord = bincode::deserialize(blob)?;
        let undo = record
            .undo
            .into_iter()
            .map(|r| {
                let user = users
                    .entry(r.user.clone())
                    .or_insert_with(|| Arc::new(r.user.clone()))
                    .clone();
                UndoEntry::from_record(r, user)
            })
            .collect();

        Ok(Self {
            id: record.id,
            name: record.name,
            auto_save: record.auto_save,
            parent: record.parent,
            contents: record.contents,
            undo,
            data: RwLock::new(KeyValueStore::from_serialized(&record.data)?),
        })
    }
}

/// Handle to a committed snapshot
#[derive(Clone)]
pub struct Snapshot {
    db: Arc<Shared>,
    entry: Arc<SnapshotEntry>,
}

impl Snapshot {
    pub(crate) fn new(db: Arc<Shared>, entry: Arc<SnapshotEntry>) -> Self {
        Self { db, entry }
    }

    pub fn id(&self) -> SnapshotId {
        self.entry.id
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn is_auto_save(&self) -> bool {
        self.entry.auto_save
    }

    /// Parent snapshot, `None` for a root
    pub fn parent(&self) -> Option<Snapshot> {
        self.entry.parent.and_then(|id| self.db.snapshot(id))
    }

    pub fn parent_id(&self) -> Option<SnapshotId> {
        self.entry.parent
    }

    /// Snapshots whose parent is this one, ascending by id
    pub fn children(&self) -> Vec<Snapshot> {
        self.db.children(self.entry.id)
    }

    /// Whether `id` is this snapshot or one of its ancestors
    pub fn has_ancestor(&self, id: SnapshotId) -> bool {
        let mut cursor = Some(self.clone());
        while let Some(snapshot) = cursor {
            if snapshot.id() == id {
                return true;
            }
            cursor = snapshot.parent();
        }
        false
    }

    /// File state checkpointed by this snapshot
    pub fn file_contents(&self) -> Result<Bytes> {
        self.db.storage.get_object(self.entry.contents)
    }

    pub fn file_contents_hash(&self) -> ObjectId {
        self.entry.contents
    }

    /// Full undo history ending with this snapshot's own entries, oldest first
    pub fn undo_entries(&self) -> Vec<UndoEntry> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(snapshot) = cursor {
            cursor = snapshot.parent();
            chain.push(snapshot);
        }

        chain
            .iter()
            .rev()
            .flat_map(|s| s.entry.undo.iter().cloned())
            .collect()
    }

    /// Undo entries recorded by this snapshot alone
    pub fn own_undo_entries(&self) -> &[UndoEntry] {
        &self.entry.undo
    }

    /// Copy of this snapshot's metadata store
    pub fn read_data(&self) -> KeyValueStore {
        self.entry.data.read().clone()
    }

    /// Merge `data` into this snapshot's metadata and persist it
    pub fn store_data(&self, data: &KeyValueStore) -> Result<()> {
        let mut current = self.entry.data.write();
        let mut merged = current.clone();
        merged.merge(data);

        let blob = self.entry.encode(&merged)?;
        self.db.storage.write_snapshot(self.entry.id, &blob)?;
        *current = merged;

        debug!(
            "Stored {} metadata values on snapshot {}",
            data.value_size(),
            self.entry.id
        );
        Ok(())
    }
}

/// Two handles are equal when they name the same snapshot of the same database
impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.db, &other.db) && self.entry.id == other.entry.id
    }
}

impl Eq for Snapshot {}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.entry.id)
            .field("name", &self.entry.name)
            .field("parent", &self.entry.parent)
            .field("auto_save", &self.entry.auto_save)
            .field("contents", &self.entry.contents)
            .finish()
    }
}

/// Where a new snapshot attaches in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParentChoice {
    Current,
    Root,
    Id(SnapshotId),
}

/// Description of a snapshot to commit
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub(crate) name: String,
    pub(crate) parent: ParentChoice,
    pub(crate) file_contents: Bytes,
    pub(crate) undo: Vec<UndoEntry>,
    pub(crate) data: KeyValueStore,
    pub(crate) auto_save: bool,
}

impl NewSnapshot {
    /// A snapshot attached to the database's current snapshot
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ParentChoice::Current,
            file_contents: Bytes::new(),
            undo: Vec::new(),
            data: KeyValueStore::new(),
            auto_save: false,
        }
    }

    /// Attach to an explicit parent instead of the current snapshot
    pub fn parent(mut self, id: SnapshotId) -> Self {
        self.parent = ParentChoice::Id(id);
        self
    }

    /// Start a new tree with no parent
    pub fn root(mut self) -> Self {
        self.parent = ParentChoice::Root;
        self
    }

    pub fn file_contents(mut self, contents: impl Into<Bytes>) -> Self {
        self.file_contents = contents.into();
        self
    }

    pub fn undo_entries(mut self, entries: Vec<UndoEntry>) -> Self {
        self.undo = entries;
        self
    }

    pub fn undo_entry(mut self, entry: UndoEntry) -> Self {
        self.undo.push(entry);
        self
    }

    pub fn data(mut self, data: KeyValueStore) -> Self {
        self.data = data;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }
}
