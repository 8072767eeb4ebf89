//! The snapshot database
//!
//! A [`Database`] owns an arena of snapshot entries keyed by [`SnapshotId`]
//! and a pointer to the current snapshot. Snapshots are only ever added;
//! undo and redo move the current pointer between existing snapshots.
//!
//! ```no_run
//! use anadb_core::{Database, NewSnapshot};
//! use std::path::Path;
//!
//! # fn example() -> anadb_core::Result<()> {
//! let db = Database::open(Path::new("analysis.anadb"))?;
//! let snapshot = db.commit(NewSnapshot::new("initial analysis").file_contents(vec![0x7f, b'E']))?;
//! assert_eq!(db.current_snapshot(), Some(snapshot));
//! # Ok(())
//! # }
//! ```

use crate::config::{DatabaseConfig, CONFIG_FILE};
use crate::disk::DiskStorage;
use crate::error::{Error, Result};
use crate::kvstore::KeyValueStore;
use crate::object::ObjectId;
use crate::snapshot::{NewSnapshot, ParentChoice, Snapshot, SnapshotEntry, SnapshotId};
use crate::storage::{MemoryStorage, Storage};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct State {
    snapshots: BTreeMap<SnapshotId, Arc<SnapshotEntry>>,
    current: Option<SnapshotId>,
    globals: KeyValueStore,
}

impl State {
    /// Timestamp of the newest undo entry on the path from `id` to its root
    fn last_undo_timestamp(&self, mut id: Option<SnapshotId>) -> Option<i64> {
        while let Some(entry) = id.and_then(|id| self.snapshots.get(&id)) {
            if let Some(last) = entry.undo.last() {
                return Some(last.timestamp());
            }
            id = entry.parent;
        }
        None
    }

    fn next_id(&self) -> SnapshotId {
        self.snapshots
            .keys()
            .next_back()
            .map_or(SnapshotId(1), |id| SnapshotId(id.0 + 1))
    }
}

/// State shared by a database and every snapshot handle it gives out
pub(crate) struct Shared {
    config: DatabaseConfig,
    pub(crate) storage: Box<dyn Storage>,
    state: RwLock<State>,
}

impl Shared {
    pub(crate) fn snapshot(self: &Arc<Self>, id: SnapshotId) -> Option<Snapshot> {
        let entry = self.state.read().snapshots.get(&id).cloned()?;
        Some(Snapshot::new(self.clone(), entry))
    }

    pub(crate) fn children(self: &Arc<Self>, id: SnapshotId) -> Vec<Snapshot> {
        let entries: Vec<Arc<SnapshotEntry>> = self
            .state
            .read()
            .snapshots
            .values()
            .filter(|e| e.parent == Some(id))
            .cloned()
            .collect();
        entries
            .into_iter()
            .map(|e| Snapshot::new(self.clone(), e))
            .collect()
    }
}

/// Result of [`Database::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub snapshots: usize,
    pub objects: usize,
    pub undo_entries: usize,
    pub errors: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Handle to a snapshot database; clones share the same database
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Create an empty database that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(Shared {
                config: DatabaseConfig::default(),
                storage: Box::new(MemoryStorage::new()),
                state: RwLock::new(State::default()),
            }),
        }
    }

    /// Open or create a database directory using its stored config
    pub fn open(path: &Path) -> Result<Self> {
        let config = DatabaseConfig::load(path)?;
        Self::open_with_config(path, config)
    }

    /// Open or create a database directory, replacing its stored config
    pub fn open_with_config(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let storage = DiskStorage::open(path, config.object_cache_size)?;
        // An unreadable stored config is replaced, not reported
        let stored = DatabaseConfig::load(path).ok();
        if !path.join(CONFIG_FILE).exists() || stored.as_ref() != Some(&config) {
            config.save(path)?;
        }
        info!("Opening database at {:?}", path);
        Self::with_storage(Box::new(storage), config)
    }

    /// Load a database from any storage backend
    pub fn with_storage(storage: Box<dyn Storage>, config: DatabaseConfig) -> Result<Self> {
        let state = Self::load(storage.as_ref())?;
        debug!(
            "Loaded {} snapshots, current {:?}",
            state.snapshots.len(),
            state.current
        );

        let db = Self {
            shared: Arc::new(Shared {
                config,
                storage,
                state: RwLock::new(state),
            }),
        };

        if db.shared.config.verify_on_open {
            let report = db.verify()?;
            if let Some(first) = report.errors.first() {
                return Err(Error::Integrity(format!(
                    "{} ({} problems found)",
                    first,
                    report.errors.len()
                )));
            }
        }
        Ok(db)
    }

    fn load(storage: &dyn Storage) -> Result<State> {
        let mut users = HashMap::new();
        let mut snapshots = BTreeMap::new();

        for (id, blob) in storage.load_snapshots()? {
            let entry = SnapshotEntry::decode(&blob, &mut users)?;
            if entry.id != id {
                return Err(Error::Integrity(format!(
                    "record stored as snapshot {} claims id {}",
                    id, entry.id
                )));
            }
            // Parents always have smaller ids, so the tree cannot contain a cycle
            if let Some(parent) = entry.parent {
                if parent >= id || !snapshots.contains_key(&parent) {
                    return Err(Error::Integrity(format!(
                        "snapshot {} has invalid parent {}",
                        id, parent
                    )));
                }
            }
            snapshots.insert(id, Arc::new(entry));
        }

        let current = storage.read_current()?;
        if let Some(id) = current {
            if !snapshots.contains_key(&id) {
                return Err(Error::Integrity(format!(
                    "current snapshot {} does not exist",
                    id
                )));
            }
        }

        let globals = match storage.read_globals()? {
            Some(blob) => KeyValueStore::from_serialized(&blob)?,
            None => KeyValueStore::new(),
        };

        Ok(State {
            snapshots,
            current,
            globals,
        })
    }

    pub fn uuid(&self) -> &str {
        self.shared.storage.uuid()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Look up a snapshot of this database by id
    pub fn get_snapshot(&self, id: SnapshotId) -> Option<Snapshot> {
        self.shared.snapshot(id)
    }

    /// The current snapshot, `None` before the first commit
    pub fn current_snapshot(&self) -> Option<Snapshot> {
        let current = self.shared.state.read().current?;
        self.shared.snapshot(current)
    }

    /// All snapshots, ascending by id
    pub fn snapshots(&self) -> Vec<Snapshot> {
        let entries: Vec<Arc<SnapshotEntry>> =
            self.shared.state.read().snapshots.values().cloned().collect();
        entries
            .into_iter()
            .map(|e| Snapshot::new(self.shared.clone(), e))
            .collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.shared.state.read().snapshots.len()
    }

    /// Seal a new snapshot and make it current
    pub fn commit(&self, new: NewSnapshot) -> Result<Snapshot> {
        let mut state = self.shared.state.write();

        let parent = match new.parent {
            ParentChoice::Current => state.current,
            ParentChoice::Root => None,
            ParentChoice::Id(id) => {
                if !state.snapshots.contains_key(&id) {
                    return Err(Error::SnapshotNotFound(id));
                }
                Some(id)
            }
        };

        let mut previous = state.last_undo_timestamp(parent);
        for entry in &new.undo {
            if let Some(prev) = previous {
                if entry.timestamp() < prev {
                    return Err(Error::InvalidSnapshot(format!(
                        "undo entry at {} is older than preceding entry at {}",
                        entry.timestamp(),
                        prev
                    )));
                }
            }
            previous = Some(entry.timestamp());
        }

        let id = state.next_id();
        let contents = self.shared.storage.put_object(&new.file_contents)?;
        let undo_count = new.undo.len();
        let entry = SnapshotEntry {
            id,
            name: new.name,
            auto_save: new.auto_save,
            parent,
            contents,
            undo: new.undo,
            data: RwLock::new(KeyValueStore::new()),
        };

        let blob = entry.encode(&new.data)?;
        self.shared.storage.write_snapshot(id, &blob)?;
        if let Err(e) = self.shared.storage.write_current(id) {
            // An unreferenced record would otherwise reappear on the next load
            if let Err(cleanup) = self.shared.storage.remove_snapshot(id) {
                warn!("Failed to remove record of aborted snapshot {}: {}", id, cleanup);
            }
            return Err(e);
        }

        *entry.data.write() = new.data;
        let entry = Arc::new(entry);
        state.snapshots.insert(id, entry.clone());
        state.current = Some(id);

        info!(
            "Committed snapshot {} {:?} (parent {:?}, {} undo entries, contents {})",
            id, entry.name, parent, undo_count, contents
        );
        Ok(Snapshot::new(self.shared.clone(), entry))
    }

    /// Move the current pointer to an existing snapshot (undo / redo)
    pub fn set_current_snapshot(&self, id: SnapshotId) -> Result<()> {
        let mut state = self.shared.state.write();
        if !state.snapshots.contains_key(&id) {
            return Err(Error::SnapshotNotFound(id));
        }
        self.shared.storage.write_current(id)?;
        state.current = Some(id);
        debug!("Current snapshot is now {}", id);
        Ok(())
    }

    /// Read a global JSON value
    pub fn read_global(&self, key: &str) -> Result<serde_json::Value> {
        self.shared.state.read().globals.get_value(key)
    }

    /// Read a global buffer
    pub fn read_global_data(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.shared.state.read().globals.get_buffer(key)?.to_vec())
    }

    pub fn has_global(&self, key: &str) -> bool {
        self.shared.state.read().globals.has_value(key)
    }

    pub fn global_keys(&self) -> Vec<String> {
        self.shared.state.read().globals.keys()
    }

    /// Write a global JSON value
    pub fn write_global(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.update_globals(|globals| globals.set_value(key, value))
    }

    /// Write a global buffer
    pub fn write_global_data(&self, key: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let data = data.into();
        self.update_globals(move |globals| globals.set_buffer(key, data))
    }

    /// Apply `update` to a copy of the globals and swap it in once persisted
    fn update_globals(&self, update: impl FnOnce(&mut KeyValueStore)) -> Result<()> {
        let mut state = self.shared.state.write();
        let mut globals = state.globals.clone();
        update(&mut globals);
        self.shared.storage.write_globals(&globals.serialized_data()?)?;
        state.globals = globals;
        Ok(())
    }

    /// Recompute every content hash and check undo chronology
    pub fn verify(&self) -> Result<VerifyReport> {
        let (entries, chronology_errors) = {
            let state = self.shared.state.read();
            let mut errors = Vec::new();
            for entry in state.snapshots.values() {
                let mut previous = state.last_undo_timestamp(entry.parent);
                for undo in &entry.undo {
                    if previous.is_some_and(|prev| undo.timestamp() < prev) {
                        errors.push(format!(
                            "snapshot {}: undo history goes back in time at {}",
                            entry.id,
                            undo.timestamp()
                        ));
                    }
                    previous = Some(undo.timestamp());
                }
            }
            let entries: Vec<Arc<SnapshotEntry>> = state.snapshots.values().cloned().collect();
            (entries, errors)
        };

        let mut report = VerifyReport {
            errors: chronology_errors,
            ..Default::default()
        };
        let mut checked: HashSet<ObjectId> = HashSet::new();

        for entry in &entries {
            report.snapshots += 1;

            if checked.insert(entry.contents) {
                report.objects += 1;
                match self.shared.storage.get_object(entry.contents) {
                    Ok(data) => {
                        let actual = ObjectId::from_data(&data);
                        if actual != entry.contents {
                            report.errors.push(format!(
                                "snapshot {}: contents hash to {} instead of {}",
                                entry.id, actual, entry.contents
                            ));
                        }
                    }
                    Err(e) => report
                        .errors
                        .push(format!("snapshot {}: {}", entry.id, e)),
                }
            }

            for undo in &entry.undo {
                report.undo_entries += 1;
                if let Err(e) = undo.verify() {
                    report.errors.push(format!("snapshot {}: {}", entry.id, e));
                }
            }
        }

        if report.is_ok() {
            debug!(
                "Verified {} snapshots, {} objects, {} undo entries",
                report.snapshots, report.objects, report.undo_entries
            );
        } else {
            warn!("Verification found {} problems", report.errors.len());
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Database")
            .field("uuid", &self.uuid())
            .field("snapshots", &state.snapshots.len())
            .field("current", &state.current)
            .finish()
    }
}
