//! Persistence seams.
//!
//! The rest of Warden only needs find-many, find-by-id, create, update-by-id
//! and delete primitives plus a count; aggregation is layered on top in
//! [`crate::logs`].

use async_trait::async_trait;
use warden_core::log_record::{LogFilter, LogRecord};
use warden_core::rule::Rule;
use warden_core::Result;

/// Rule persistence.
///
/// Request handling fails open on this seam: when `find_all` errors and no
/// fresh snapshot is cached, [`crate::RuleCache::decide`] applies the
/// unmatched defaults (forward and log), so blocking rules go unenforced
/// until loads succeed again. An implementation that can fail at runtime
/// exposes traffic to that window.
///
/// A mutation that returns `Err` must leave the stored set unchanged.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Every stored rule, in no particular order.
    async fn find_all(&self) -> Result<Vec<Rule>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>>;

    async fn insert(&self, rule: Rule) -> Result<Rule>;

    /// Replace the record with `rule.id`. `None` if it does not exist.
    async fn update(&self, rule: Rule) -> Result<Option<Rule>>;

    /// Remove a record, returning it. `None` if it does not exist.
    async fn delete(&self, id: &str) -> Result<Option<Rule>>;

    /// Swap the whole set in one step.
    async fn replace_all(&self, rules: Vec<Rule>) -> Result<()>;
}

/// Append-only ledger of request outcomes. There is no update primitive.
#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn insert(&self, record: LogRecord) -> Result<()>;

    /// Matching records, newest first.
    async fn find(&self, filter: &LogFilter) -> Result<Vec<LogRecord>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<LogRecord>>;

    async fn count(&self, filter: &LogFilter) -> Result<u64>;

    /// Remove one record. `false` if it does not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove every matching record, returning how many went.
    async fn delete_many(&self, filter: &LogFilter) -> Result<u64>;
}
