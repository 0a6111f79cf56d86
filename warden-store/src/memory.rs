use crate::persist;
use crate::repository::{LogRepository, RuleRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use warden_core::log_record::{LogFilter, LogRecord};
use warden_core::rule::Rule;
use warden_core::{Result, WardenError};

/// Rule storage held in process memory, optionally mirrored to a state file.
///
/// A single lock guards the map so `replace_all` is observed atomically.
/// Mutations are staged on a copy and swapped in only once the state file
/// has been written, so a failed write leaves memory unchanged.
pub struct MemoryRuleRepository {
    rules: RwLock<HashMap<String, Rule>>,
    state_file: Option<PathBuf>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            state_file: None,
        }
    }

    /// Restore from `path` (if present) and persist every later mutation to it.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let restored = persist::load_rules(&path)
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        Self {
            rules: RwLock::new(restored),
            state_file: Some(path),
        }
    }

    async fn flush(&self, rules: &HashMap<String, Rule>) -> Result<()> {
        if let Some(ref path) = self.state_file {
            let snapshot: Vec<Rule> = rules.values().cloned().collect();
            persist::save_rules(path, &snapshot).await?;
        }
        Ok(())
    }
}

impl Default for MemoryRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn find_all(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>> {
        Ok(self.rules.read().await.get(id).cloned())
    }

    async fn insert(&self, rule: Rule) -> Result<Rule> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(WardenError::Store(format!("rule '{}' already exists", rule.id)));
        }
        let mut next = rules.clone();
        next.insert(rule.id.clone(), rule.clone());
        self.flush(&next).await?;
        *rules = next;
        debug!(rule_id = %rule.id, "store: rule inserted");
        Ok(rule)
    }

    async fn update(&self, rule: Rule) -> Result<Option<Rule>> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(&rule.id) {
            return Ok(None);
        }
        let mut next = rules.clone();
        next.insert(rule.id.clone(), rule.clone());
        self.flush(&next).await?;
        *rules = next;
        debug!(rule_id = %rule.id, "store: rule updated");
        Ok(Some(rule))
    }

    async fn delete(&self, id: &str) -> Result<Option<Rule>> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(id) {
            return Ok(None);
        }
        let mut next = rules.clone();
        let removed = next.remove(id);
        self.flush(&next).await?;
        *rules = next;
        debug!(rule_id = %id, "store: rule deleted");
        Ok(removed)
    }

    async fn replace_all(&self, replacement: Vec<Rule>) -> Result<()> {
        let mut rules = self.rules.write().await;
        let next: HashMap<String, Rule> =
            replacement.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.flush(&next).await?;
        *rules = next;
        debug!(rules = rules.len(), "store: rule set replaced");
        Ok(())
    }
}

/// Log storage held in a concurrent map, optionally journaled to disk.
pub struct MemoryLogRepository {
    records: DashMap<String, LogRecord>,
    journal: Option<PathBuf>,
    /// Serializes journal writes with the map mutation they describe.
    write_lock: Mutex<()>,
}

impl MemoryLogRepository {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            journal: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Replay `path` (if present) and append every later record to it.
    pub fn with_journal(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = DashMap::new();
        for record in persist::load_journal(&path) {
            records.insert(record.id.clone(), record);
        }
        Self {
            records,
            journal: Some(path),
            write_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect(&self, filter: &LogFilter) -> Vec<LogRecord> {
        let compiled = filter.compile();
        let mut out: Vec<LogRecord> = self
            .records
            .iter()
            .filter(|e| compiled.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        out
    }

    /// Write the journal as it will look once every record `removed` selects
    /// is gone. The map is left untouched.
    async fn rewrite_without(&self, removed: impl Fn(&LogRecord) -> bool) -> Result<()> {
        if let Some(ref path) = self.journal {
            let mut kept: Vec<LogRecord> = self
                .records
                .iter()
                .filter(|e| !removed(e.value()))
                .map(|e| e.value().clone())
                .collect();
            kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
            persist::rewrite_journal(path, &kept).await?;
        }
        Ok(())
    }
}

impl Default for MemoryLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogRepository for MemoryLogRepository {
    async fn insert(&self, record: LogRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(ref path) = self.journal {
            persist::append_journal(path, &record).await?;
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        Ok(self.collect(filter))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<LogRecord>> {
        Ok(self.records.get(id).map(|e| e.value().clone()))
    }

    async fn count(&self, filter: &LogFilter) -> Result<u64> {
        let compiled = filter.compile();
        Ok(self.records.iter().filter(|e| compiled.matches(e.value())).count() as u64)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.records.contains_key(id) {
            return Ok(false);
        }
        self.rewrite_without(|r| r.id == id).await?;
        self.records.remove(id);
        Ok(true)
    }

    async fn delete_many(&self, filter: &LogFilter) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let compiled = filter.compile();
        let doomed: Vec<String> = self
            .records
            .iter()
            .filter(|e| compiled.matches(e.value()))
            .map(|e| e.key().clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.rewrite_without(|r| compiled.matches(r))
            .await
            .inspect_err(|e| {
                warn!(error = %e, "store: journal rewrite failed, bulk delete abandoned");
            })?;
        for id in &doomed {
            self.records.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use warden_core::rule::default_rules;

    #[tokio::test]
    async fn rule_repository_round_trip() {
        let repo = MemoryRuleRepository::new();
        for rule in default_rules() {
            repo.insert(rule).await.unwrap();
        }
        assert_eq!(repo.find_all().await.unwrap().len(), 2);

        let mut rule = repo.find_by_id("default-api-access").await.unwrap().unwrap();
        rule.priority = 7;
        assert!(repo.update(rule).await.unwrap().is_some());
        assert_eq!(
            repo.find_by_id("default-api-access").await.unwrap().unwrap().priority,
            7
        );

        assert!(repo.delete("default-api-access").await.unwrap().is_some());
        assert!(repo.delete("default-api-access").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let repo = MemoryRuleRepository::new();
        let rule = default_rules().remove(0);
        repo.insert(rule.clone()).await.unwrap();
        assert!(repo.insert(rule).await.is_err());
    }

    #[tokio::test]
    async fn update_of_missing_rule_is_none() {
        let repo = MemoryRuleRepository::new();
        let rule = default_rules().remove(0);
        assert!(repo.update(rule).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_file_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        {
            let repo = MemoryRuleRepository::with_state_file(&path);
            repo.replace_all(default_rules()).await.unwrap();
            repo.delete("default-api-access").await.unwrap();
        }
        let repo = MemoryRuleRepository::with_state_file(&path);
        let rules = repo.find_all().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "block-sensitive-endpoints");
    }

    #[tokio::test]
    async fn logs_come_back_newest_first() {
        let repo = MemoryLogRepository::new();
        let mut old = LogRecord::new("GET", "/old", 200, 1);
        old.timestamp -= chrono::Duration::seconds(10);
        let new = LogRecord::new("GET", "/new", 200, 1);
        repo.insert(old).await.unwrap();
        repo.insert(new).await.unwrap();

        let all = repo.find(&LogFilter::default()).await.unwrap();
        assert_eq!(all[0].url, "/new");
        assert_eq!(all[1].url, "/old");
    }

    #[tokio::test]
    async fn journal_replays_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.jsonl");
        let keep = LogRecord::new("GET", "/keep", 200, 3);
        let gone = LogRecord::new("POST", "/gone", 500, 4);
        {
            let repo = MemoryLogRepository::with_journal(&path);
            repo.insert(keep.clone()).await.unwrap();
            repo.insert(gone.clone()).await.unwrap();
            assert!(repo.delete(&gone.id).await.unwrap());
        }
        let repo = MemoryLogRepository::with_journal(&path);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.find_by_id(&keep.id).await.unwrap(), Some(keep));
    }

    #[tokio::test]
    async fn delete_many_counts_removed() {
        let repo = MemoryLogRepository::new();
        repo.insert(LogRecord::new("GET", "/a", 200, 1)).await.unwrap();
        repo.insert(LogRecord::new("GET", "/b", 404, 1)).await.unwrap();
        repo.insert(LogRecord::new("POST", "/c", 404, 1)).await.unwrap();

        let filter = LogFilter {
            status: Some(404),
            ..Default::default()
        };
        assert_eq!(repo.count(&filter).await.unwrap(), 2);
        assert_eq!(repo.delete_many(&filter).await.unwrap(), 2);
        assert_eq!(repo.count(&LogFilter::default()).await.unwrap(), 1);
    }
}
