//! Storage abstraction layer for AnaDB
//!
//! The database keeps its snapshot arena in memory and hands persistence to
//! a [`Storage`] backend. Backends see only opaque blobs: content-addressed
//! file contents, encoded snapshot records, the current pointer, and the
//! encoded global store.

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::snapshot::SnapshotId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Persistence backend for a database
///
/// All backends must implement this trait
pub trait Storage: Send + Sync {
    /// Identity of the stored database
    fn uuid(&self) -> &str;

    /// Store file contents, returning their content id. Storing the same
    /// bytes twice is a no-op.
    fn put_object(&self, data: &[u8]) -> Result<ObjectId>;

    /// Fetch file contents by content id
    fn get_object(&self, id: ObjectId) -> Result<Bytes>;

    /// Check if an object exists
    fn has_object(&self, id: ObjectId) -> Result<bool>;

    /// Write (or overwrite) an encoded snapshot record
    fn write_snapshot(&self, id: SnapshotId, record: &[u8]) -> Result<()>;

    /// Delete a snapshot record; removing a missing record is a no-op
    fn remove_snapshot(&self, id: SnapshotId) -> Result<()>;

    /// Load every encoded snapshot record, ascending by id
    fn load_snapshots(&self) -> Result<Vec<(SnapshotId, Vec<u8>)>>;

    fn write_current(&self, id: SnapshotId) -> Result<()>;

    fn read_current(&self) -> Result<Option<SnapshotId>>;

    fn write_globals(&self, data: &[u8]) -> Result<()>;

    fn read_globals(&self) -> Result<Option<Vec<u8>>>;
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<ObjectId, Bytes>,
    snapshots: BTreeMap<SnapshotId, Vec<u8>>,
    current: Option<SnapshotId>,
    globals: Option<Vec<u8>>,
}

/// Storage that lives only as long as the process
pub struct MemoryStorage {
    uuid: String,
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn put_object(&self, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::from_data(data);
        self.state
            .lock()
            .objects
            .entry(id)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(id)
    }

    fn get_object(&self, id: ObjectId) -> Result<Bytes> {
        self.state
            .lock()
            .objects
            .get(&id)
            .cloned()
            .ok_or(Error::ObjectNotFound(id))
    }

    fn has_object(&self, id: ObjectId) -> Result<bool> {
        Ok(self.state.lock().objects.contains_key(&id))
    }

    fn write_snapshot(&self, id: SnapshotId, record: &[u8]) -> Result<()> {
        self.state.lock().snapshots.insert(id, record.to_vec());
        Ok(())
    }

    fn remove_snapshot(&self, id: SnapshotId) -> Result<()> {
        self.state.lock().snapshots.remove(&id);
        Ok(())
    }

    fn load_snapshots(&self) -> Result<Vec<(SnapshotId, Vec<u8>)>> {
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }

    fn write_current(&self, id: SnapshotId) -> Result<()> {
        self.state.lock().current = Some(id);
        Ok(())
    }

    fn read_current(&self) -> Result<Option<SnapshotId>> {
        Ok(self.state.lock().current)
    }

    fn write_globals(&self, data: &[u8]) -> Result<()> {
        self.state.lock().globals = Some(data.to_vec());
        Ok(())
    }

    fn read_globals(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().globals.clone())
    }
}
