use chrono::{DateTime, Utc};
use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Caller-facing proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_addr")]
    pub addr: String,
    /// Path prefix the proxy is mounted under; stripped to get the effective path.
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,
    /// Default upstream base URL.
    #[serde(default = "default_upstream_base")]
    pub upstream_base: String,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Header carrying the already-authenticated caller identity.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

/// Admin API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub addr: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Admin API key for authentication (optional).
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Install the default rule set when the store starts empty.
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// 0 disables retention.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// When false, no prometheus counters are updated on the hot path.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_proxy_addr() -> String { "0.0.0.0:5000".into() }
fn default_mount_prefix() -> String { "/api/proxy".into() }
fn default_upstream_base() -> String { "https://jsonplaceholder.typicode.com".into() }
fn default_timeout() -> u64 { 30_000 }
fn default_identity_header() -> String { "x-authenticated-user".into() }
fn default_admin_addr() -> String { "0.0.0.0:9180".into() }
fn default_cache_ttl() -> u64 { 300 }
fn default_retention_days() -> u32 { 30 }
fn default_retention_interval() -> u64 { 3600 }
fn default_recent_limit() -> usize { 10 }
fn default_true() -> bool { true }
fn default_metrics_path() -> String { "/metrics".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: default_proxy_addr(),
            mount_prefix: default_mount_prefix(),
            upstream_base: default_upstream_base(),
            timeout_ms: default_timeout(),
            identity_header: default_identity_header(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
            enabled: true,
            api_key: None,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            seed_defaults: true,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            retention_interval_secs: default_retention_interval(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RulesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl LogsConfig {
    /// Records older than this are due for deletion. `None` when retention
    /// is off or the window reaches past the earliest representable time.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.retention_days == 0 {
            return None;
        }
        let window = chrono::Duration::try_days(i64::from(self.retention_days))?;
        now.checked_sub_signed(window)
    }
}

impl WardenConfig {
    /// Load configuration from YAML file + env overrides.
    ///
    /// A missing file contributes nothing, so defaults plus environment still
    /// apply. Environment keys use a double underscore for nesting, e.g.
    /// `WARDEN_PROXY__UPSTREAM_BASE`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: WardenConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the proxy cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let base: http::Uri = self
            .proxy
            .upstream_base
            .parse()
            .map_err(|e| anyhow::anyhow!("proxy.upstream_base is not a URL: {e}"))?;
        if base.scheme().is_none() || base.authority().is_none() {
            anyhow::bail!("proxy.upstream_base must be an absolute URL");
        }
        if !self.proxy.mount_prefix.starts_with('/') {
            anyhow::bail!("proxy.mount_prefix must start with '/'");
        }
        if self.proxy.timeout_ms == 0 {
            anyhow::bail!("proxy.timeout_ms must be positive");
        }
        Ok(())
    }
}
