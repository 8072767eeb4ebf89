//! Disk-backed database integration tests

use anadb_core::{
    Database, DatabaseConfig, Error, KeyValueStore, NewSnapshot, SnapshotId, UndoAction,
    UndoEntry, User,
};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn analyst() -> Arc<User> {
    Arc::new(User::new("u-42", "analyst").with_email("analyst@example.com"))
}

#[test]
fn test_create_database() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();

    assert_eq!(db.uuid().len(), 36);
    assert!(db.current_snapshot().is_none());
    assert!(temp_dir.path().join("config.json").exists());
}

#[test]
fn test_uuid_persists() {
    let temp_dir = TempDir::new().unwrap();
    let uuid = Database::open(temp_dir.path()).unwrap().uuid().to_string();

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.uuid(), uuid);
}

#[test]
fn test_snapshots_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let user = analyst();

    {
        let db = Database::open(temp_dir.path()).unwrap();
        let mut data = KeyValueStore::new();
        data.set_value("arch", &json!("aarch64"));
        data.namespace("view").set_buffer("layout", vec![1, 2, 3]);

        db.commit(
            NewSnapshot::new("initial")
                .file_contents(b"\x7fELF v1".to_vec())
                .undo_entry(UndoEntry::new(
                    user.clone(),
                    1000,
                    vec![UndoAction::from_json("define", &json!({"addr": 16}))],
                ))
                .data(data),
        )
        .unwrap();
        db.commit(
            NewSnapshot::new("autosave")
                .auto_save(true)
                .file_contents(b"\x7fELF v2".to_vec())
                .undo_entry(UndoEntry::new(
                    user.clone(),
                    2000,
                    vec![
                        UndoAction::new("rename", b"main".to_vec()),
                        UndoAction::new("retype", b"int".to_vec()),
                    ],
                )),
        )
        .unwrap();
    }

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.snapshot_count(), 2);

    let current = db.current_snapshot().unwrap();
    assert_eq!(current.id(), SnapshotId(2));
    assert_eq!(current.name(), "autosave");
    assert!(current.is_auto_save());
    assert_eq!(&current.file_contents().unwrap()[..], b"\x7fELF v2");

    let history = current.undo_entries();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp(), 1000);
    assert_eq!(history[1].actions()[0].kind, "rename");
    assert_eq!(history[1].actions()[1].kind, "retype");
    assert_eq!(**history[0].user(), *user);
    // One shared identity per user after loading
    assert!(Arc::ptr_eq(history[0].user(), history[1].user()));

    let root = current.parent().unwrap();
    assert_eq!(root.name(), "initial");
    assert!(root.parent().is_none());

    let mut data = root.read_data();
    assert_eq!(data.get_value("arch").unwrap(), json!("aarch64"));
    assert_eq!(data.namespace("view").get_buffer("layout").unwrap(), &[1, 2, 3]);
}

#[test]
fn test_store_data_and_current_persist() {
    let temp_dir = TempDir::new().unwrap();

    {
        let db = Database::open(temp_dir.path()).unwrap();
        db.commit(NewSnapshot::new("one")).unwrap();
        db.commit(NewSnapshot::new("two")).unwrap();

        let mut notes = KeyValueStore::new();
        notes.set_value("note", &json!("looks packed"));
        db.get_snapshot(SnapshotId(1)).unwrap().store_data(&notes).unwrap();

        db.set_current_snapshot(SnapshotId(1)).unwrap();
        db.write_global("tool_version", &json!("4.1")).unwrap();
    }

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.current_snapshot().unwrap().id(), SnapshotId(1));
    assert_eq!(
        db.get_snapshot(SnapshotId(1)).unwrap().read_data().get_value("note").unwrap(),
        json!("looks packed")
    );
    assert_eq!(db.read_global("tool_version").unwrap(), json!("4.1"));
}

#[test]
fn test_next_id_continues_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Database::open(temp_dir.path()).unwrap();
        db.commit(NewSnapshot::new("one")).unwrap();
    }

    let db = Database::open(temp_dir.path()).unwrap();
    let second = db.commit(NewSnapshot::new("two")).unwrap();
    assert_eq!(second.id(), SnapshotId(2));
    assert_eq!(second.parent_id(), Some(SnapshotId(1)));
}

#[test]
fn test_corrupted_contents_detected_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let hash = {
        let db = Database::open(temp_dir.path()).unwrap();
        db.commit(NewSnapshot::new("one").file_contents(b"original".to_vec()))
            .unwrap()
            .file_contents_hash()
    };

    let hex = hash.to_hex();
    let object_path = temp_dir.path().join("objects").join(&hex[..2]).join(&hex[2..]);
    fs::write(&object_path, b"tampered").unwrap();

    let err = Database::open(temp_dir.path()).unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));

    // Without verification the database opens and verify() reports the damage
    let config = DatabaseConfig {
        verify_on_open: false,
        ..DatabaseConfig::default()
    };
    let db = Database::open_with_config(temp_dir.path(), config).unwrap();
    let report = db.verify().unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn test_dangling_current_pointer_rejected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Database::open(temp_dir.path()).unwrap();
        db.commit(NewSnapshot::new("one")).unwrap();
    }
    fs::write(temp_dir.path().join("current"), "9").unwrap();

    assert!(matches!(
        Database::open(temp_dir.path()),
        Err(Error::Integrity(_))
    ));
}

#[test]
fn test_stored_config_is_used() {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        verify_on_open: false,
        object_cache_size: 2,
        default_user: Some("reverser".to_string()),
    };
    Database::open_with_config(temp_dir.path(), config.clone()).unwrap();

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.config(), &config);
}

#[test]
fn test_explicit_config_replaces_corrupt_stored_config() {
    let temp_dir = TempDir::new().unwrap();
    Database::open(temp_dir.path()).unwrap();
    fs::write(temp_dir.path().join("config.json"), "{ not json").unwrap();

    assert!(matches!(
        Database::open(temp_dir.path()),
        Err(Error::Serialization(_))
    ));

    let config = DatabaseConfig {
        default_user: Some("recovered".to_string()),
        ..DatabaseConfig::default()
    };
    Database::open_with_config(temp_dir.path(), config.clone()).unwrap();

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.config(), &config);
}
