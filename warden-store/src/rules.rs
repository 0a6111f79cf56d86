use crate::cache::RuleCache;
use crate::repository::RuleRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use warden_core::page::{Page, PageRequest};
use warden_core::rule::{Rule, RuleDraft, RulePatch, default_rules};
use warden_core::{Result, WardenError};

/// Administrative CRUD over rules.
///
/// Every mutation invalidates the [`RuleCache`] before returning, failed
/// ones included, so the next match observes whatever the repository holds.
#[derive(Clone)]
pub struct RuleStore {
    repo: Arc<dyn RuleRepository>,
    cache: Arc<RuleCache>,
}

impl RuleStore {
    pub fn new(repo: Arc<dyn RuleRepository>, cache: Arc<RuleCache>) -> Self {
        Self { repo, cache }
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    pub async fn create(&self, draft: RuleDraft) -> Result<Rule> {
        let rule = draft.into_rule(Uuid::new_v4().to_string(), Utc::now())?;
        self.warn_on_ties(&rule).await?;
        let inserted = self.repo.insert(rule).await;
        self.cache.invalidate();
        let stored = inserted?;
        info!(rule_id = %stored.id, pattern = %stored.path_pattern, "rule created");
        Ok(stored)
    }

    pub async fn update(&self, id: &str, patch: RulePatch) -> Result<Rule> {
        let existing = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| WardenError::RuleNotFound(id.to_string()))?;
        let merged = existing.apply(patch, Utc::now())?;
        self.warn_on_ties(&merged).await?;
        let updated = self.repo.update(merged).await;
        self.cache.invalidate();
        let stored = updated?.ok_or_else(|| WardenError::RuleNotFound(id.to_string()))?;
        info!(rule_id = %id, "rule updated");
        Ok(stored)
    }

    pub async fn delete(&self, id: &str) -> Result<Rule> {
        let deleted = self.repo.delete(id).await;
        self.cache.invalidate();
        let removed = deleted?.ok_or_else(|| WardenError::RuleNotFound(id.to_string()))?;
        info!(rule_id = %id, "rule deleted");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Result<Rule> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| WardenError::RuleNotFound(id.to_string()))
    }

    /// One page of rules in match order, optionally narrowed by a
    /// case-insensitive substring over name and path pattern.
    pub async fn list(&self, page: PageRequest, search: Option<&str>) -> Result<Page<Rule>> {
        let rules = self.cache.all_rules().await?;
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let selected: Vec<Rule> = rules
            .iter()
            .filter(|r| {
                needle.as_deref().is_none_or(|n| {
                    r.name.to_lowercase().contains(n) || r.path_pattern.to_lowercase().contains(n)
                })
            })
            .cloned()
            .collect();
        Ok(page.slice(selected))
    }

    /// Replace the whole rule set with the canonical defaults.
    pub async fn reset_to_defaults(&self) -> Result<Vec<Rule>> {
        let defaults = default_rules();
        let replaced = self.repo.replace_all(defaults.clone()).await;
        self.cache.invalidate();
        replaced?;
        info!(rules = defaults.len(), "rules reset to defaults");
        Ok(defaults)
    }

    /// Install the defaults only when the store holds no rules at all.
    pub async fn seed_defaults_if_empty(&self) -> Result<bool> {
        if !self.repo.find_all().await?.is_empty() {
            return Ok(false);
        }
        self.reset_to_defaults().await?;
        Ok(true)
    }

    async fn warn_on_ties(&self, rule: &Rule) -> Result<()> {
        for other in self.repo.find_all().await? {
            if rule.ties_with(&other) {
                warn!(
                    rule_id = %rule.id,
                    other_id = %other.id,
                    pattern = %rule.path_pattern,
                    priority = rule.priority,
                    "rule shares pattern and priority with another rule; the most recently created one wins"
                );
            }
        }
        Ok(())
    }
}
