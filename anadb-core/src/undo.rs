//! Undo history records
//!
//! An [`UndoEntry`] captures one undo-able user action: who did it, when,
//! and the ordered list of [`UndoAction`]s it applied. Entries are sealed
//! into a snapshot when it is committed and never change afterwards.

use crate::error::{Error, Result};
use crate::object::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of the user who performed an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }
}

/// One tool-defined action inside an undo entry
///
/// The payload is opaque to the database; `kind` names the action type so
/// the owning tool can dispatch on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoAction {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl UndoAction {
    pub fn new(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Build an action whose payload is JSON text
    pub fn from_json(kind: impl Into<String>, value: &serde_json::Value) -> Self {
        Self::new(kind, value.to_string().into_bytes())
    }

    /// Decode the payload as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Immutable record of one undo-able user action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    timestamp: i64,
    hash: ObjectId,
    user: Arc<User>,
    actions: Vec<UndoAction>,
}

impl UndoEntry {
    /// Seal a new entry; the hash is computed over the ordered actions
    pub fn new(user: Arc<User>, timestamp: i64, actions: Vec<UndoAction>) -> Self {
        let hash = Self::compute_hash(&actions);
        Self {
            timestamp,
            hash,
            user,
            actions,
        }
    }

    /// Seal a new entry stamped with the current time
    pub fn now(user: Arc<User>, actions: Vec<UndoAction>) -> Self {
        Self::new(user, chrono::Utc::now().timestamp(), actions)
    }

    /// Seconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn hash(&self) -> ObjectId {
        self.hash
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// Actions in the order they were applied
    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Check the stored hash against the actions
    pub fn verify(&self) -> Result<()> {
        let actual = Self::compute_hash(&self.actions);
        if actual != self.hash {
            return Err(Error::Integrity(format!(
                "undo entry at {} has hash {} but actions hash to {}",
                self.timestamp, self.hash, actual
            )));
        }
        Ok(())
    }

    fn compute_hash(actions: &[UndoAction]) -> ObjectId {
        ObjectId::from_chunks(
            actions
                .iter()
                .flat_map(|a| [a.kind.as_bytes(), a.payload.as_slice()]),
        )
    }

    pub(crate) fn to_record(&self) -> UndoRecord {
        UndoRecord {
            timestamp: self.timestamp,
            hash: self.hash,
            user: (*self.user).clone(),
            actions: self.actions.clone(),
        }
    }

    /// Rebuild an entry from its record without recomputing the hash, so a
    /// corrupted record is caught by [`verify`](Self::verify) rather than
    /// silently re-sealed
    pub(crate) fn from_record(record: UndoRecord, user: Arc<User>) -> Self {
        Self {
            timestamp: record.timestamp,
            hash: record.hash,
            user,
            actions: record.actions,
        }
    }
}

/// Serialized form of an undo entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UndoRecord {
    pub timestamp: i64,
    pub hash: ObjectId,
    pub user: User,
    pub actions: Vec<UndoAction>,
}
