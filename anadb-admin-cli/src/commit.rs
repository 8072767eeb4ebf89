//! Commit snapshots from the command line

use anadb_core::{Database, NewSnapshot, Snapshot, SnapshotId, UndoAction, UndoEntry, User};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

pub struct CommitRequest {
    pub name: String,
    pub contents: Option<PathBuf>,
    pub parent: Option<SnapshotId>,
    pub root: bool,
    pub auto_save: bool,
    pub user: Option<String>,
    pub actions: Vec<String>,
}

/// Parse `KIND=PAYLOAD`. Payloads that parse as JSON are stored as JSON text,
/// anything else as the literal bytes.
pub fn parse_action(arg: &str) -> Result<UndoAction> {
    let (kind, payload) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Action {:?} is not of the form KIND=PAYLOAD", arg))?;
    if kind.is_empty() {
        return Err(anyhow!("Action {:?} has an empty kind", arg));
    }
    Ok(match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => UndoAction::from_json(kind, &value),
        Err(_) => UndoAction::new(kind, payload.as_bytes().to_vec()),
    })
}

/// Who to record as the acting user: explicit flag, then config, then `$USER`
fn resolve_user(db: &Database, explicit: Option<String>) -> String {
    explicit
        .or_else(|| db.config().default_user.clone())
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn run(db: &Database, request: CommitRequest) -> Result<Snapshot> {
    let contents = match &request.contents {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => Vec::new(),
    };

    let mut new = NewSnapshot::new(request.name)
        .file_contents(contents)
        .auto_save(request.auto_save);
    if request.root {
        new = new.root();
    } else if let Some(parent) = request.parent {
        new = new.parent(parent);
    }

    if !request.actions.is_empty() {
        let actions = request
            .actions
            .iter()
            .map(|arg| parse_action(arg))
            .collect::<Result<Vec<_>>>()?;
        let name = resolve_user(db, request.user);
        let user = Arc::new(User::new(name.clone(), name));
        new = new.undo_entry(UndoEntry::now(user, actions));
    }

    Ok(db.commit(new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_action() {
        let action = parse_action(r#"rename={"addr": 4096, "name": "main"}"#).unwrap();
        assert_eq!(action.kind, "rename");
        assert_eq!(action.to_json().unwrap(), json!({"addr": 4096, "name": "main"}));
    }

    #[test]
    fn test_parse_text_action() {
        let action = parse_action("comment=looks like a packer stub").unwrap();
        assert_eq!(action.payload, b"looks like a packer stub".to_vec());
    }

    #[test]
    fn test_parse_action_errors() {
        assert!(parse_action("no-separator").is_err());
        assert!(parse_action("=payload").is_err());
    }

    #[test]
    fn test_commit_with_actions() {
        let db = Database::in_memory();
        let request = CommitRequest {
            name: "first".to_string(),
            contents: None,
            parent: None,
            root: false,
            auto_save: false,
            user: Some("analyst".to_string()),
            actions: vec!["define=1".to_string(), "name=start".to_string()],
        };

        let snapshot = run(&db, request).unwrap();
        let history = snapshot.undo_entries();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user().name, "analyst");
        assert_eq!(history[0].actions().len(), 2);
        assert_eq!(history[0].actions()[1].kind, "name");
    }

    #[test]
    fn test_commit_without_actions_records_no_history() {
        let db = Database::in_memory();
        let request = CommitRequest {
            name: "empty".to_string(),
            contents: None,
            parent: None,
            root: true,
            auto_save: true,
            user: None,
            actions: Vec::new(),
        };

        let snapshot = run(&db, request).unwrap();
        assert!(snapshot.undo_entries().is_empty());
        assert!(snapshot.is_auto_save());
    }
}
