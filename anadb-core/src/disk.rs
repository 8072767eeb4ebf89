//! Disk-persistent storage
//!
//! File contents go to a content-addressed object directory (like git
//! objects); snapshot records, the current pointer, and the global store are
//! small files replaced atomically through a temp file and rename.

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::snapshot::SnapshotId;
use crate::storage::Storage;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Disk-backed storage
///
/// Layout on disk:
/// ```text
/// {root}/
///   uuid                              - database UUID
///   config.json                       - DatabaseConfig
///   current                           - current snapshot id (text)
///   globals.bin                       - encoded global store
///   objects/{hash[0..2]}/{hash[2..]}  - file contents by content id
///   snapshots/{id}.bin                - encoded snapshot records
/// ```
pub struct DiskStorage {
    root: PathBuf,
    uuid: String,
    cache: Mutex<LruCache<ObjectId, Bytes>>,
}

impl DiskStorage {
    /// Open a storage directory, creating it if needed
    pub fn open(root: &Path, cache_size: usize) -> Result<Self> {
        let root = root.to_path_buf();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("snapshots"))?;

        let uuid_path = root.join("uuid");
        let uuid = if uuid_path.exists() {
            fs::read_to_string(&uuid_path)?.trim().to_string()
        } else {
            let uuid = uuid::Uuid::new_v4().to_string();
            write_atomic(&uuid_path, uuid.as_bytes())?;
            debug!("Created database {} at {:?}", uuid, root);
            uuid
        };

        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            root,
            uuid,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn snapshot_path(&self, id: SnapshotId) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.bin", id))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Storage for DiskStorage {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn put_object(&self, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::from_data(data);
        let path = self.object_path(id);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&path, data)?;
        }
        Ok(id)
    }

    fn get_object(&self, id: ObjectId) -> Result<Bytes> {
        if let Some(data) = self.cache.lock().get(&id) {
            return Ok(data.clone());
        }

        let data = read_optional(&self.object_path(id))?.ok_or(Error::ObjectNotFound(id))?;
        let data = Bytes::from(data);
        self.cache.lock().put(id, data.clone());
        Ok(data)
    }

    fn has_object(&self, id: ObjectId) -> Result<bool> {
        Ok(self.object_path(id).exists())
    }

    fn write_snapshot(&self, id: SnapshotId, record: &[u8]) -> Result<()> {
        write_atomic(&self.snapshot_path(id), record)
    }

    fn remove_snapshot(&self, id: SnapshotId) -> Result<()> {
        match fs::remove_file(self.snapshot_path(id)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn load_snapshots(&self) -> Result<Vec<(SnapshotId, Vec<u8>)>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("snapshots"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<i64>) {
                Some(Ok(id)) => SnapshotId(id),
                _ => {
                    warn!("Ignoring unexpected snapshot file {:?}", path);
                    continue;
                }
            };
            records.push((id, fs::read(&path)?));
        }
        records.sort_by_key(|(id, _)| *id);
        Ok(records)
    }

    fn write_current(&self, id: SnapshotId) -> Result<()> {
        write_atomic(&self.root.join("current"), id.to_string().as_bytes())
    }

    fn read_current(&self) -> Result<Option<SnapshotId>> {
        let Some(data) = read_optional(&self.root.join("current"))? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&data);
        let id = text
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Serialization(format!("Invalid current snapshot {:?}: {}", text, e)))?;
        Ok(Some(SnapshotId(id)))
    }

    fn write_globals(&self, data: &[u8]) -> Result<()> {
        write_atomic(&self.root.join("globals.bin"), data)
    }

    fn read_globals(&self) -> Result<Option<Vec<u8>>> {
        read_optional(&self.root.join("globals.bin"))
    }
}
