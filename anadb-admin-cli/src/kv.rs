//! Key-value commands for snapshot metadata and database globals

use anadb_core::{Database, KeyValueStore, NamespacePath, SnapshotId, ValueKind};
use anyhow::{anyhow, bail, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum KvAction {
    /// List keys in the namespace
    Keys,
    /// Print one value
    Get { key: String },
    /// Store a value; text that is not valid JSON is stored as a string
    Set {
        key: String,
        value: String,
        /// Store the raw bytes as a buffer instead of JSON
        #[arg(long)]
        buffer: bool,
    },
}

pub enum Target {
    Snapshot(SnapshotId),
    Globals,
}

/// Split `a/b/c` into namespace segments; empty segments are ignored
pub fn parse_namespace(namespace: Option<&str>) -> NamespacePath {
    namespace
        .map(|ns| {
            ns.split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Run `f` with `path` entered on `store`
fn within<R>(store: &mut KeyValueStore, path: &[String], f: impl FnOnce(&mut KeyValueStore) -> R) -> R {
    match path.split_first() {
        None => f(store),
        Some((head, rest)) => {
            let mut scope = store.namespace(head.clone());
            within(&mut scope, rest, f)
        }
    }
}

fn parse_value(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn render(store: &KeyValueStore, key: &str) -> Result<String> {
    match store.value_kind(key) {
        Some(ValueKind::Buffer) => Ok(hex::encode(store.get_buffer(key)?)),
        Some(ValueKind::Json) => Ok(store.get_value(key)?.to_string()),
        None => Err(anyhow!("Unknown key: {}", key)),
    }
}

pub fn run(db: &Database, target: Target, path: &[String], action: KvAction) -> Result<()> {
    for line in execute(db, target, path, action)? {
        println!("{}", line);
    }
    Ok(())
}

/// Perform `action` and return the lines to print
pub fn execute(db: &Database, target: Target, path: &[String], action: KvAction) -> Result<Vec<String>> {
    match target {
        Target::Snapshot(id) => {
            let snapshot = db
                .get_snapshot(id)
                .ok_or_else(|| anyhow!("Snapshot {} not found", id))?;
            match action {
                KvAction::Keys => {
                    let mut data = snapshot.read_data();
                    Ok(within(&mut data, path, |store| store.keys()))
                }
                KvAction::Get { key } => {
                    let mut data = snapshot.read_data();
                    let line = within(&mut data, path, |store| render(store, &key))?;
                    Ok(vec![line])
                }
                KvAction::Set { key, value, buffer } => {
                    let mut update = KeyValueStore::new();
                    within(&mut update, path, |store| {
                        if buffer {
                            store.set_buffer(key, value.into_bytes());
                        } else {
                            store.set_value(key, &parse_value(&value));
                        }
                    });
                    snapshot.store_data(&update)?;
                    Ok(Vec::new())
                }
            }
        }
        Target::Globals => {
            if !path.is_empty() {
                bail!("Globals have no namespaces");
            }
            match action {
                KvAction::Keys => Ok(db.global_keys()),
                KvAction::Get { key } => {
                    if !db.has_global(&key) {
                        bail!("Unknown key: {}", key);
                    }
                    let line = match db.read_global_data(&key) {
                        Ok(data) => hex::encode(data),
                        Err(e) if e.is_not_found() => db.read_global(&key)?.to_string(),
                        Err(e) => return Err(e.into()),
                    };
                    Ok(vec![line])
                }
                KvAction::Set { key, value, buffer } => {
                    if buffer {
                        db.write_global_data(&key, value.into_bytes())?;
                    } else {
                        db.write_global(&key, &parse_value(&value))?;
                    }
                    Ok(Vec::new())
                }
            }
        }
    }
}
