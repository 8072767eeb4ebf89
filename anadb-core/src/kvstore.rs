//! Namespaced key-value storage
//!
//! A `KeyValueStore` maps string keys to either JSON values or raw buffers.
//! Keys live inside namespaces; the active namespace path is pushed with
//! [`KeyValueStore::namespace`] and popped when the returned scope is dropped.
//!
//! JSON values and buffers are distinct slot types. `get_buffer` only sees
//! keys written with `set_buffer`; `get_value` parses either kind of slot as
//! JSON, so a buffer that holds JSON text can be read back as a value.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Full path of a namespace, outermost segment first
pub type NamespacePath = Vec<String>;

/// Storage class of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Json,
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Slot {
    Json(Vec<u8>),
    Buffer(Vec<u8>),
}

impl Slot {
    fn bytes(&self) -> &[u8] {
        match self {
            Slot::Json(data) | Slot::Buffer(data) => data,
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            Slot::Json(_) => ValueKind::Json,
            Slot::Buffer(_) => ValueKind::Buffer,
        }
    }
}

/// Namespaced key-value store
#[derive(Debug, Clone, Default)]
pub struct KeyValueStore {
    /// Namespace path -> key -> slot. Empty namespaces are never kept.
    values: BTreeMap<NamespacePath, BTreeMap<String, Slot>>,
    /// Active namespace stack; not part of the serialized form
    active: NamespacePath,
}

impl KeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from the blob produced by [`serialized_data`](Self::serialized_data)
    pub fn from_serialized(data: &[u8]) -> Result<Self> {
        let values: BTreeMap<NamespacePath, BTreeMap<String, Slot>> = bincode::deserialize(data)?;
        if values.values().any(|ns| ns.is_empty()) {
            return Err(Error::Serialization("empty namespace in store blob".to_string()));
        }
        Ok(Self {
            values,
            active: Vec::new(),
        })
    }

    /// Serialize every namespace into one opaque blob
    pub fn serialized_data(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.values)?)
    }

    /// Enter a namespace; it stays active until the returned scope is dropped.
    ///
    /// The scope must be dropped, not leaked: `std::mem::forget` on it leaves
    /// the namespace pushed for every later call on this store.
    pub fn namespace(&mut self, name: impl Into<String>) -> NamespaceScope<'_> {
        self.active.push(name.into());
        NamespaceScope { store: self }
    }

    /// Currently active namespace path
    pub fn namespace_path(&self) -> &[String] {
        &self.active
    }

    /// Keys visible in the active namespace, sorted
    pub fn keys(&self) -> Vec<String> {
        self.current()
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a key exists in the active namespace
    pub fn has_value(&self, key: &str) -> bool {
        self.slot(key).is_ok()
    }

    /// Storage class of a key in the active namespace
    pub fn value_kind(&self, key: &str) -> Option<ValueKind> {
        self.slot(key).ok().map(Slot::kind)
    }

    /// Read a key as JSON
    pub fn get_value(&self, key: &str) -> Result<serde_json::Value> {
        let slot = self.slot(key)?;
        Ok(serde_json::from_slice(slot.bytes())?)
    }

    /// Read a key as JSON and decode it into `T`
    pub fn get_value_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let slot = self.slot(key)?;
        Ok(serde_json::from_slice(slot.bytes())?)
    }

    /// Read a key written with [`set_buffer`](Self::set_buffer)
    pub fn get_buffer(&self, key: &str) -> Result<&[u8]> {
        match self.slot(key)? {
            Slot::Buffer(data) => Ok(data),
            Slot::Json(_) => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    /// Insert or overwrite a JSON value
    pub fn set_value(&mut self, key: impl Into<String>, value: &serde_json::Value) {
        self.insert(key.into(), Slot::Json(value.to_string().into_bytes()));
    }

    /// Insert or overwrite a value encoded as JSON from any serializable type
    pub fn set_value_as<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        // Encode before touching the map so a failure leaves nothing behind
        let encoded = serde_json::to_vec(value).map_err(Error::serialization)?;
        self.insert(key.into(), Slot::Json(encoded));
        Ok(())
    }

    /// Insert or overwrite a raw buffer
    pub fn set_buffer(&mut self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.insert(key.into(), Slot::Buffer(data.into()));
    }

    /// Remove a key from the active namespace, returning whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(ns) = self.values.get_mut(&self.active) else {
            return false;
        };
        let removed = ns.remove(key).is_some();
        if ns.is_empty() {
            self.values.remove(&self.active);
        }
        removed
    }

    /// Copy every value of `other`, in every namespace, into this store
    pub fn merge(&mut self, other: &KeyValueStore) {
        for (path, entries) in &other.values {
            let ns = self.values.entry(path.clone()).or_default();
            for (key, slot) in entries {
                ns.insert(key.clone(), slot.clone());
            }
        }
    }

    /// Namespace paths that currently hold at least one value
    pub fn namespaces(&self) -> Vec<NamespacePath> {
        self.values.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.value_size() == 0 && self.data_size() == 0
    }

    /// Number of values across all namespaces
    pub fn value_size(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    /// Total payload bytes across all namespaces
    pub fn data_size(&self) -> usize {
        self.values
            .values()
            .flat_map(BTreeMap::values)
            .map(|slot| slot.bytes().len())
            .sum()
    }

    /// Size of the serialized blob
    pub fn value_storage_size(&self) -> usize {
        bincode::serialized_size(&self.values).unwrap_or_default() as usize
    }

    /// Depth of the active namespace stack
    pub fn namespace_size(&self) -> usize {
        self.active.len()
    }

    fn current(&self) -> Option<&BTreeMap<String, Slot>> {
        self.values.get(&self.active)
    }

    fn slot(&self, key: &str) -> Result<&Slot> {
        self.current()
            .and_then(|ns| ns.get(key))
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    fn insert(&mut self, key: String, slot: Slot) {
        self.values
            .entry(self.active.clone())
            .or_default()
            .insert(key, slot);
    }
}

/// Stored contents are compared; the active namespace is not
impl PartialEq for KeyValueStore {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for KeyValueStore {}

/// An active namespace scope; dropping it leaves the namespace
pub struct NamespaceScope<'a> {
    store: &'a mut KeyValueStore,
}

impl Deref for NamespaceScope<'_> {
    type Target = KeyValueStore;

    fn deref(&self) -> &KeyValueStore {
        self.store
    }
}

impl DerefMut for NamespaceScope<'_> {
    fn deref_mut(&mut self) -> &mut KeyValueStore {
        self.store
    }
}

impl Drop for NamespaceScope<'_> {
    fn drop(&mut self) {
        self.store.active.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_store() {
        let store = KeyValueStore::new();
        assert!(store.keys().is_empty());
        assert!(store.is_empty());
        assert_eq!(store.value_size(), 0);
        assert_eq!(store.data_size(), 0);
        assert_eq!(store.namespace_size(), 0);
    }

    #[test]
    fn test_set_and_get_value() {
        let mut store = KeyValueStore::new();
        store.set_value("x", &json!(42));

        assert!(store.has_value("x"));
        assert_eq!(store.get_value("x").unwrap(), json!(42));
        assert_eq!(store.value_kind("x"), Some(ValueKind::Json));
        assert!(!store.is_empty());
    }

    #[test]
    fn test_json_slot_is_not_a_buffer() {
        let mut store = KeyValueStore::new();
        store.set_value("x", &json!(42));

        let err = store.get_buffer("x").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(ref k) if k == "x"));
    }

    #[test]
    fn test_buffer_readable_as_value_when_json() {
        let mut store = KeyValueStore::new();
        store.set_buffer("raw", b"{\"a\":1}".to_vec());

        assert_eq!(store.get_buffer("raw").unwrap(), b"{\"a\":1}");
        assert_eq!(store.get_value("raw").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_missing_vs_corrupt() {
        let mut store = KeyValueStore::new();
        store.set_buffer("bad", vec![0xff, 0x00, 0x13]);

        assert!(matches!(store.get_value("missing"), Err(Error::KeyNotFound(_))));
        assert!(matches!(store.get_buffer("missing"), Err(Error::KeyNotFound(_))));

        match store.get_value("bad") {
            Err(Error::Parse(_)) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_message_is_decoder_text() {
        let mut store = KeyValueStore::new();
        store.set_buffer("bad", b"{not json".to_vec());

        let expected = serde_json::from_slice::<serde_json::Value>(b"{not json")
            .unwrap_err()
            .to_string();
        let err = store.get_value("bad").unwrap_err();
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_overwrite_changes_kind() {
        let mut store = KeyValueStore::new();
        store.set_value("k", &json!("text"));
        store.set_buffer("k", vec![1, 2, 3]);

        assert_eq!(store.value_kind("k"), Some(ValueKind::Buffer));
        assert_eq!(store.get_buffer("k").unwrap(), &[1, 2, 3]);
        assert_eq!(store.value_size(), 1);
    }

    #[test]
    fn test_namespace_scoping() {
        let mut store = KeyValueStore::new();
        {
            let mut ns = store.namespace("a");
            ns.set_value("k", &json!(true));
            assert!(ns.has_value("k"));
            assert_eq!(ns.namespace_size(), 1);
        }

        assert_eq!(store.namespace_size(), 0);
        assert!(!store.has_value("k"));
        assert!(store.keys().is_empty());

        let ns = store.namespace("a");
        assert!(ns.has_value("k"));
        assert_eq!(ns.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_nested_namespaces() {
        let mut store = KeyValueStore::new();
        {
            let mut outer = store.namespace("a");
            outer.set_value("k", &json!(1));
            {
                let mut inner = outer.namespace("b");
                inner.set_value("k", &json!(2));
                assert_eq!(inner.namespace_path(), ["a".to_string(), "b".to_string()]);
                assert_eq!(inner.get_value("k").unwrap(), json!(2));
            }
            assert_eq!(outer.namespace_size(), 1);
            assert_eq!(outer.get_value("k").unwrap(), json!(1));
        }
        assert_eq!(store.namespace_size(), 0);
        assert_eq!(store.value_size(), 2);
        assert_eq!(
            store.namespaces(),
            vec![vec!["a".to_string()], vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn test_slash_in_key_does_not_collide_with_namespace() {
        let mut store = KeyValueStore::new();
        store.set_value("a/k", &json!("top"));
        store.namespace("a").set_value("k", &json!("nested"));

        assert_eq!(store.get_value("a/k").unwrap(), json!("top"));
        assert_eq!(store.namespace("a").get_value("k").unwrap(), json!("nested"));
    }

    #[test]
    fn test_serialized_roundtrip_keeps_all_namespaces() {
        let mut store = KeyValueStore::new();
        store.set_value("top", &json!({"list": [1, 2, 3]}));
        store.set_buffer("blob", vec![0u8, 1, 2, 255]);
        store.namespace("analysis").set_value("functions", &json!(17));

        // Serialized from inside a namespace: the blob still covers everything
        let blob = {
            let ns = store.namespace("analysis");
            ns.serialized_data().unwrap()
        };
        let mut restored = KeyValueStore::from_serialized(&blob).unwrap();

        assert_eq!(restored, store);
        assert_eq!(restored.keys(), store.keys());
        assert_eq!(restored.namespace_size(), 0);
        assert_eq!(restored.get_buffer("blob").unwrap(), &[0u8, 1, 2, 255]);
        assert_eq!(
            restored.namespace("analysis").get_value("functions").unwrap(),
            json!(17)
        );
    }

    #[test]
    fn test_from_serialized_rejects_garbage() {
        let err = KeyValueStore::from_serialized(&[0xde, 0xad]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_sizes_are_consistent() {
        let mut store = KeyValueStore::new();
        store.set_buffer("a", vec![0u8; 10]);
        store.namespace("n").set_value("b", &json!("xy"));

        assert_eq!(store.value_size(), 2);
        // 10 buffer bytes plus the JSON text "\"xy\""
        assert_eq!(store.data_size(), 14);
        assert_eq!(
            store.value_storage_size(),
            store.serialized_data().unwrap().len()
        );
        assert_eq!(store.is_empty(), store.value_size() == 0 && store.data_size() == 0);
    }

    #[test]
    fn test_remove_prunes_namespace() {
        let mut store = KeyValueStore::new();
        store.namespace("tmp").set_value("k", &json!(null));

        assert!(store.namespace("tmp").remove("k"));
        assert!(!store.namespace("tmp").remove("k"));
        assert!(store.namespaces().is_empty());
        assert_eq!(store, KeyValueStore::new());
    }

    #[test]
    fn test_merge_overwrites_and_appends() {
        let mut base = KeyValueStore::new();
        base.set_value("keep", &json!(1));
        base.set_value("replace", &json!("old"));

        let mut update = KeyValueStore::new();
        update.set_value("replace", &json!("new"));
        update.namespace("extra").set_buffer("b", vec![9]);

        base.merge(&update);
        assert_eq!(base.get_value("keep").unwrap(), json!(1));
        assert_eq!(base.get_value("replace").unwrap(), json!("new"));
        assert_eq!(base.namespace("extra").get_buffer("b").unwrap(), &[9]);
    }

    #[test]
    fn test_typed_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Range {
            start: u64,
            end: u64,
        }

        let mut store = KeyValueStore::new();
        store.set_value_as("range", &Range { start: 0x1000, end: 0x2000 }).unwrap();
        let range: Range = store.get_value_as("range").unwrap();
        assert_eq!(range, Range { start: 0x1000, end: 0x2000 });
    }

    #[test]
    fn test_idempotent_reads() {
        let mut store = KeyValueStore::new();
        store.set_value("v", &json!([1, "two"]));
        store.set_buffer("b", vec![3, 4]);

        assert_eq!(store.get_value("v").unwrap(), store.get_value("v").unwrap());
        assert_eq!(store.get_buffer("b").unwrap(), store.get_buffer("b").unwrap());
        assert_eq!(store.keys(), store.keys());
    }
}
