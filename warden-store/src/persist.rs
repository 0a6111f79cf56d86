//! File persistence for the in-memory repositories.
//!
//! Rules are mirrored to a JSON state file after every mutation and loaded
//! back on startup. The file is written atomically: first to a `.tmp`
//! sibling, then renamed over the final path, so a crash mid-write never
//! corrupts the stored state.
//!
//! Log records go to a journal with one JSON object per line. Appends are
//! plain appends; deletions rewrite the journal with the same tmp + rename
//! dance.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use warden_core::log_record::LogRecord;
use warden_core::rule::Rule;
use warden_core::{Result, WardenError};

/// The shape serialized to / deserialized from the rules state file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedRules {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Write `rules` to `path`, ordered by id so identical sets produce
/// identical files.
pub async fn save_rules(path: &Path, rules: &[Rule]) -> Result<()> {
    let mut rules = rules.to_vec();
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    let json = serde_json::to_string_pretty(&PersistedRules { rules })?;
    write_atomic(path, json.as_bytes()).await?;
    tracing::debug!(path = %path.display(), "persist: rules saved");
    Ok(())
}

/// Load a previously saved rules file.
///
/// * If the file does not exist            → empty (first run).
/// * If the file exists but is malformed   → logs a warning, empty.
pub fn load_rules(path: &Path) -> Vec<Rule> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "persist: no state file found, starting fresh");
        return Vec::new();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "persist: failed to read state file");
            return Vec::new();
        }
    };

    let persisted: PersistedRules = match serde_json::from_str(&data) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "persist: state file is malformed, ignoring");
            return Vec::new();
        }
    };

    let (valid, invalid): (Vec<Rule>, Vec<Rule>) = persisted
        .rules
        .into_iter()
        .partition(|r| r.validate().is_ok());
    for rule in &invalid {
        tracing::warn!(rule_id = %rule.id, "persist: dropping invalid rule from state file");
    }

    tracing::info!(rules = valid.len(), path = %path.display(), "persist: rules restored from file");
    valid
}

/// Append one record to the journal.
pub async fn append_journal(path: &Path, record: &LogRecord) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    ensure_parent(path).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

/// Replace the journal contents with exactly `records`.
pub async fn rewrite_journal(path: &Path, records: &[LogRecord]) -> Result<()> {
    let mut buf = Vec::with_capacity(records.len() * 256);
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf).await
}

/// Replay the journal. Malformed lines are skipped with a warning.
pub fn load_journal(path: &Path) -> Vec<LogRecord> {
    let data = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "persist: failed to read log journal");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(line) {
            Ok(r) => records.push(r),
            Err(e) => {
                tracing::warn!(error = %e, line = lineno + 1, "persist: skipping malformed journal line");
            }
        }
    }
    tracing::info!(records = records.len(), path = %path.display(), "persist: log journal replayed");
    records
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WardenError::Store(format!("create {}: {e}", parent.display())))?;
    }
    Ok(())
}
