use crate::repository::LogRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use warden_core::log_record::{LogFilter, LogRecord, LogStats, RecentActivity};
use warden_core::page::{Page, PageRequest};
use warden_core::{Result, WardenError};

/// Insert-only ledger of request outcomes plus the read side over it.
#[derive(Clone)]
pub struct LogRecorder {
    repo: Arc<dyn LogRepository>,
    recent_limit: usize,
}

impl LogRecorder {
    pub fn new(repo: Arc<dyn LogRepository>, recent_limit: usize) -> Self {
        Self { repo, recent_limit }
    }

    /// Persist one record. Any storage failure surfaces as `LogPersistence`.
    pub async fn append(&self, record: LogRecord) -> Result<()> {
        self.repo
            .insert(record)
            .await
            .map_err(|e| WardenError::LogPersistence(e.to_string()))
    }

    pub async fn list(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<LogRecord>> {
        let records = self.repo.find(filter).await?;
        Ok(page.slice(records))
    }

    pub async fn get(&self, id: &str) -> Result<LogRecord> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| WardenError::LogNotFound(id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.repo.delete(id).await? {
            Ok(())
        } else {
            Err(WardenError::LogNotFound(id.to_string()))
        }
    }

    /// Remove every record, returning how many were deleted.
    pub async fn delete_all(&self) -> Result<u64> {
        let deleted = self.repo.delete_many(&LogFilter::default()).await?;
        info!(deleted, "logs cleared");
        Ok(deleted)
    }

    /// Remove records strictly older than `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = self.repo.delete_many(&LogFilter::before(cutoff)).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "logs purged by retention");
        }
        Ok(deleted)
    }

    /// Aggregate statistics, optionally limited to records at or after `since`.
    pub async fn stats(&self, since: Option<DateTime<Utc>>) -> Result<LogStats> {
        let filter = LogFilter {
            since,
            ..Default::default()
        };
        let records = self.repo.find(&filter).await?;
        Ok(LogStats::from_records(&records, self.recent_limit))
    }

    pub async fn recent(&self, page: PageRequest) -> Result<Page<RecentActivity>> {
        let records = self.repo.find(&LogFilter::default()).await?;
        Ok(page.slice(records).map(|r| RecentActivity::from(&r)))
    }

    /// Every record, newest first.
    pub async fn export(&self) -> Result<Vec<LogRecord>> {
        self.repo.find(&LogFilter::default()).await
    }

    pub async fn count(&self, filter: &LogFilter) -> Result<u64> {
        self.repo.count(filter).await
    }
}
