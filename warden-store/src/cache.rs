//! Rule Cache & Matcher.
//!
//! The cache holds one immutable [`Snapshot`] of the ordered rule list behind
//! an `ArcSwapOption`. Readers clone the `Arc` and never see a partially
//! built list. A snapshot is served while it is younger than the TTL and was
//! loaded under the current generation; [`RuleCache::invalidate`] bumps the
//! generation and drops the snapshot, so the next read goes to the
//! repository. A reload that raced with an invalidation is stored under its
//! old generation and is therefore never served again.

use crate::repository::RuleRepository;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use warden_core::Result;
use warden_core::matcher::{find_matching, sort_by_precedence};
use warden_core::rule::Rule;

struct Snapshot {
    rules: Arc<Vec<Rule>>,
    generation: u64,
    loaded_at: Instant,
}

/// Policy outcome for one request, resolved from a single snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// The governing enabled rule, if any.
    pub rule: Option<Rule>,
    pub blocked: bool,
    pub log: bool,
    pub forward_target: Option<String>,
}

impl Decision {
    /// Default-allow, default-log, default upstream.
    pub fn unmatched() -> Self {
        Self {
            rule: None,
            blocked: false,
            log: true,
            forward_target: None,
        }
    }

    fn from_rule(rule: Option<&Rule>) -> Self {
        match rule {
            Some(r) => Self {
                blocked: r.blocked,
                log: r.logging_enabled,
                forward_target: r.forward_target.clone(),
                rule: Some(r.clone()),
            },
            None => Self::unmatched(),
        }
    }
}

pub struct RuleCache {
    repo: Arc<dyn RuleRepository>,
    ttl: Duration,
    snapshot: ArcSwapOption<Snapshot>,
    generation: AtomicU64,
    reloads: AtomicU64,
}

impl RuleCache {
    pub fn new(repo: Arc<dyn RuleRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            snapshot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
        }
    }

    /// The full rule set in match order (priority desc, then newest first).
    pub async fn all_rules(&self) -> Result<Arc<Vec<Rule>>> {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(snap) = self.snapshot.load_full()
            && snap.generation == generation
            && snap.loaded_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&snap.rules));
        }

        let mut rules = self.repo.find_all().await?;
        sort_by_precedence(&mut rules);
        let fresh = Arc::new(Snapshot {
            rules: Arc::new(rules),
            generation,
            loaded_at: Instant::now(),
        });
        self.snapshot.rcu(|current| match current {
            Some(cur) if cur.generation > generation => Some(Arc::clone(cur)),
            _ => Some(Arc::clone(&fresh)),
        });
        self.reloads.fetch_add(1, Ordering::Relaxed);
        debug!(rules = fresh.rules.len(), generation, "cache: rule snapshot reloaded");
        Ok(Arc::clone(&fresh.rules))
    }

    /// Discard the snapshot. The next read reloads from the repository.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.snapshot.store(None);
        debug!(generation, "cache: invalidated");
    }

    /// First rule in match order whose pattern prefixes `path` and whose
    /// methods contain `method`.
    pub async fn find_matching_rule(
        &self,
        path: &str,
        method: &str,
        enabled_only: bool,
    ) -> Result<Option<Rule>> {
        let rules = self.all_rules().await?;
        Ok(find_matching(&rules, path, method, enabled_only).cloned())
    }

    /// True iff an enabled matching rule is marked blocked.
    pub async fn should_block(&self, path: &str, method: &str) -> bool {
        self.decide(path, method).await.blocked
    }

    /// The enabled matching rule's logging flag; true when nothing matches.
    pub async fn should_log(&self, path: &str, method: &str) -> bool {
        self.decide(path, method).await.log
    }

    /// The enabled matching rule's forward target, if it has one.
    pub async fn resolve_forward_target(&self, path: &str, method: &str) -> Option<String> {
        self.decide(path, method).await.forward_target
    }

    /// Resolve block, log and forward policy together against one snapshot.
    ///
    /// A failed rule load falls back to the unmatched defaults: allow and
    /// log. Blocking rules are not enforced while the repository errors.
    pub async fn decide(&self, path: &str, method: &str) -> Decision {
        match self.all_rules().await {
            Ok(rules) => Decision::from_rule(find_matching(&rules, path, method, true)),
            Err(e) => {
                warn!(error = %e, path, method, "cache: rule load failed, applying defaults");
                Decision::unmatched()
            }
        }
    }

    /// `(active, total)` rule counts.
    pub async fn counts(&self) -> Result<(usize, usize)> {
        let rules = self.all_rules().await?;
        let active = rules.iter().filter(|r| r.enabled).count();
        Ok((active, rules.len()))
    }

    /// Number of snapshot reloads since startup.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRuleRepository;
    use warden_core::rule::default_rules;

    async fn cache_with_defaults(ttl: Duration) -> (Arc<MemoryRuleRepository>, RuleCache) {
        let repo = Arc::new(MemoryRuleRepository::new());
        repo.replace_all(default_rules()).await.unwrap();
        let cache = RuleCache::new(repo.clone(), ttl);
        (repo, cache)
    }

    #[tokio::test]
    async fn snapshot_is_reused_within_ttl() {
        let (_repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        let a = cache.all_rules().await.unwrap();
        let b = cache.all_rules().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.reload_count(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_reloads() {
        let (_repo, cache) = cache_with_defaults(Duration::ZERO).await;
        cache.all_rules().await.unwrap();
        cache.all_rules().await.unwrap();
        assert_eq!(cache.reload_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let (repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        assert_eq!(cache.all_rules().await.unwrap().len(), 2);

        repo.delete("default-api-access").await.unwrap();
        // Still served from the snapshot until invalidated.
        assert_eq!(cache.all_rules().await.unwrap().len(), 2);

        cache.invalidate();
        assert_eq!(cache.all_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rules_come_back_in_match_order() {
        let (_repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        let rules = cache.all_rules().await.unwrap();
        assert_eq!(rules[0].id, "block-sensitive-endpoints");
        assert_eq!(rules[1].id, "default-api-access");
    }

    #[tokio::test]
    async fn unmatched_requests_are_allowed_and_logged() {
        let (_repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        assert!(!cache.should_block("/posts/1", "GET").await);
        assert!(cache.should_log("/posts/1", "GET").await);
        assert!(cache.resolve_forward_target("/posts/1", "GET").await.is_none());
        assert_eq!(cache.decide("/posts/1", "GET").await, Decision::unmatched());
    }

    #[tokio::test]
    async fn blocked_rule_governs_its_prefix() {
        let (_repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        assert!(cache.should_block("/api/admin/users", "GET").await);
        assert!(!cache.should_block("/api/public/x", "GET").await);
        // PATCH is not listed on either default rule.
        assert!(!cache.should_block("/api/admin/users", "PATCH").await);
    }

    #[tokio::test]
    async fn counts_split_active_and_total() {
        let (repo, cache) = cache_with_defaults(Duration::from_secs(300)).await;
        let mut rule = repo.find_by_id("default-api-access").await.unwrap().unwrap();
        rule.enabled = false;
        repo.update(rule).await.unwrap();
        cache.invalidate();
        assert_eq!(cache.counts().await.unwrap(), (1, 2));
    }

    struct Unavailable;

    #[async_trait::async_trait]
    impl RuleRepository for Unavailable {
        async fn find_all(&self) -> Result<Vec<Rule>> {
            Err(warden_core::WardenError::Store("backend down".into()))
        }
        async fn find_by_id(&self, _: &str) -> Result<Option<Rule>> {
            Ok(None)
        }
        async fn insert(&self, rule: Rule) -> Result<Rule> {
            Ok(rule)
        }
        async fn update(&self, _: Rule) -> Result<Option<Rule>> {
            Ok(None)
        }
        async fn delete(&self, _: &str) -> Result<Option<Rule>> {
            Ok(None)
        }
        async fn replace_all(&self, _: Vec<Rule>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_failure_fails_open() {
        let cache = RuleCache::new(Arc::new(Unavailable), Duration::from_secs(300));
        let decision = cache.decide("/api/admin/users", "GET").await;
        assert!(!decision.blocked);
        assert!(decision.log);
        assert!(decision.rule.is_none());
        assert!(cache.counts().await.is_err());
    }
}
