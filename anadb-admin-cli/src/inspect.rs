//! Read-only inspection commands

use anadb_core::{Database, Snapshot, SnapshotId};
use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

fn lookup(db: &Database, id: SnapshotId) -> Result<Snapshot> {
    db.get_snapshot(id)
        .ok_or_else(|| anyhow!("Snapshot {} not found", id))
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// One summary line per snapshot
fn summary(snapshot: &Snapshot, current: Option<SnapshotId>) -> String {
    let marker = if Some(snapshot.id()) == current { "*" } else { " " };
    let kind = if snapshot.is_auto_save() { "auto" } else { "save" };
    let last = snapshot
        .own_undo_entries()
        .last()
        .map(|entry| format_timestamp(entry.timestamp()))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:>5}  {}  {:<24}  {}",
        marker,
        snapshot.id(),
        kind,
        snapshot.name(),
        last
    )
}

/// Walk from `from` (or the current snapshot) towards the root
pub fn log_lines(db: &Database, from: Option<SnapshotId>, limit: usize) -> Result<Vec<String>> {
    let current = db.current_snapshot().map(|s| s.id());
    let start = match from {
        Some(id) => lookup(db, id)?,
        None => match db.current_snapshot() {
            Some(snapshot) => snapshot,
            None => return Ok(Vec::new()),
        },
    };

    let mut lines = Vec::new();
    let mut cursor = Some(start);
    while let Some(snapshot) = cursor {
        if lines.len() >= limit {
            break;
        }
        lines.push(summary(&snapshot, current));
        cursor = snapshot.parent();
    }
    Ok(lines)
}

pub fn log(db: &Database, from: Option<SnapshotId>, limit: usize) -> Result<()> {
    let lines = log_lines(db, from, limit)?;
    if lines.is_empty() {
        println!("No snapshots");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

pub fn show_lines(db: &Database, id: SnapshotId) -> Result<Vec<String>> {
    let snapshot = lookup(db, id)?;
    let children: Vec<String> = snapshot.children().iter().map(|c| c.id().to_string()).collect();
    let data = snapshot.read_data();

    let mut lines = vec![
        format!("Snapshot:   {}", snapshot.id()),
        format!("Name:       {}", snapshot.name()),
        format!("Auto-save:  {}", snapshot.is_auto_save()),
        format!(
            "Parent:     {}",
            snapshot
                .parent_id()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(root)".to_string())
        ),
        format!("Children:   {}", children.join(", ")),
        format!("Contents:   {}", snapshot.file_contents_hash()),
        format!(
            "Metadata:   {} values, {} bytes, {} namespaces",
            data.value_size(),
            data.data_size(),
            data.namespaces().len()
        ),
        format!("Undo:       {} entries", snapshot.undo_entries().len()),
    ];

    for entry in snapshot.own_undo_entries() {
        let kinds: Vec<&str> = entry.actions().iter().map(|a| a.kind.as_str()).collect();
        lines.push(format!(
            "  {}  {}  {}  [{}]",
            format_timestamp(entry.timestamp()),
            entry.user().name,
            &entry.hash().to_hex()[..12],
            kinds.join(", ")
        ));
    }
    Ok(lines)
}

pub fn show(db: &Database, id: SnapshotId) -> Result<()> {
    for line in show_lines(db, id)? {
        println!("{}", line);
    }
    Ok(())
}

pub fn cat(db: &Database, id: SnapshotId, output: Option<&Path>) -> Result<()> {
    let contents = lookup(db, id)?.file_contents()?;
    debug!("Snapshot {} contents: {} bytes", id, contents.len());
    match output {
        Some(path) => fs::write(path, &contents)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout().write_all(&contents)?,
    }
    Ok(())
}

pub fn verify(db: &Database, quiet: bool) -> Result<()> {
    let report = db.verify()?;
    if !quiet {
        println!("Snapshots:    {}", report.snapshots);
        println!("Objects:      {}", report.objects);
        println!("Undo entries: {}", report.undo_entries);
    }
    for error in &report.errors {
        eprintln!("error: {}", error);
    }
    if !report.is_ok() {
        bail!("Verification failed with {} error(s)", report.errors.len());
    }
    if !quiet {
        println!("OK");
    }
    Ok(())
}
