use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One request outcome. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub method: String,
    /// Caller-visible path
    pub url: String,
    pub timestamp: DateTime<Utc>,
    /// Status delivered to the caller
    pub status: u16,
    pub response_time_ms: u64,
    /// Set only when a rule governed the decision
    #[serde(default)]
    pub matched_rule_id: Option<String>,
    /// Upstream URL actually called; absent when no call was attempted
    #[serde(default)]
    pub target_url: Option<String>,
    /// Caller identity from the authentication layer
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub metadata: LogMetadata,
}

/// Free-form context attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
}

impl LogRecord {
    pub fn new(method: &str, url: &str, status: u16, response_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            timestamp: Utc::now(),
            status,
            response_time_ms,
            matched_rule_id: None,
            target_url: None,
            requested_by: None,
            metadata: LogMetadata::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Relative date windows accepted by the log listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePreset {
    Today,
    Yesterday,
    Week,
    Month,
}

impl DatePreset {
    /// `(since, until)` bounds relative to `now` (UTC day boundaries).
    pub fn bounds(self, now: DateTime<Utc>) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);
        match self {
            DatePreset::Today => (midnight, None),
            DatePreset::Yesterday => (midnight - Duration::days(1), Some(midnight)),
            DatePreset::Week => (now - Duration::days(7), None),
            DatePreset::Month => (now - Duration::days(30), None),
        }
    }
}

/// Selection criteria for log queries. Empty filter selects everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    /// Inclusive lower bound
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive pattern over method, url and requester
    #[serde(default)]
    pub search: Option<String>,
}

impl LogFilter {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Default::default()
        }
    }

    pub fn before(until: DateTime<Utc>) -> Self {
        Self {
            until: Some(until),
            ..Default::default()
        }
    }

    pub fn with_preset(mut self, preset: DatePreset, now: DateTime<Utc>) -> Self {
        let (since, until) = preset.bounds(now);
        self.since = Some(since);
        self.until = until;
        self
    }

    /// Compile the filter once for repeated evaluation.
    pub fn compile(&self) -> CompiledLogFilter<'_> {
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                // Invalid patterns degrade to a literal search.
                RegexBuilder::new(s)
                    .case_insensitive(true)
                    .build()
                    .or_else(|_| {
                        RegexBuilder::new(&regex::escape(s))
                            .case_insensitive(true)
                            .build()
                    })
            })
            .and_then(|r| r.ok());
        CompiledLogFilter {
            filter: self,
            search,
        }
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        self.compile().matches(record)
    }
}

pub struct CompiledLogFilter<'a> {
    filter: &'a LogFilter,
    search: Option<Regex>,
}

impl CompiledLogFilter<'_> {
    pub fn matches(&self, record: &LogRecord) -> bool {
        let f = self.filter;
        if let Some(ref method) = f.method
            && !record.method.eq_ignore_ascii_case(method)
        {
            return false;
        }
        if f.status.is_some_and(|s| s != record.status) {
            return false;
        }
        if f.since.is_some_and(|since| record.timestamp < since) {
            return false;
        }
        if f.until.is_some_and(|until| record.timestamp >= until) {
            return false;
        }
        if let Some(ref re) = self.search {
            let hit = re.is_match(&record.method)
                || re.is_match(&record.url)
                || record.requested_by.as_deref().is_some_and(|u| re.is_match(u));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Aggregate view over recorded outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStats {
    pub total_requests: u64,
    /// 2xx
    pub successful_requests: u64,
    /// 4xx and 5xx
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub by_method: BTreeMap<String, u64>,
    pub by_status: BTreeMap<u16, u64>,
    pub recent_activity: Vec<RecentActivity>,
}

/// Compact projection used for recent-activity feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentActivity {
    pub id: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
}

impl From<&LogRecord> for RecentActivity {
    fn from(r: &LogRecord) -> Self {
        Self {
            id: r.id.clone(),
            method: r.method.clone(),
            url: r.url.clone(),
            status: r.status,
            timestamp: r.timestamp,
            response_time_ms: r.response_time_ms,
        }
    }
}

impl LogStats {
    /// Aggregate `records`, which must already be ordered newest first.
    pub fn from_records(records: &[LogRecord], recent_limit: usize) -> Self {
        let mut stats = LogStats::default();
        let mut total_ms: u128 = 0;

        for r in records {
            stats.total_requests += 1;
            if r.is_success() {
                stats.successful_requests += 1;
            }
            if r.is_failure() {
                stats.failed_requests += 1;
            }
            total_ms += u128::from(r.response_time_ms);
            *stats.by_method.entry(r.method.clone()).or_default() += 1;
            *stats.by_status.entry(r.status).or_default() += 1;
        }

        if stats.total_requests > 0 {
            stats.average_response_time_ms = total_ms as f64 / stats.total_requests as f64;
        }
        stats.recent_activity = records
            .iter()
            .take(recent_limit)
            .map(RecentActivity::from)
            .collect();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(method: &str, url: &str, status: u16, ms: u64) -> LogRecord {
        LogRecord::new(method, url, status, ms)
    }

    #[test]
    fn stats_on_empty_input_are_zero() {
        let stats = LogStats::from_records(&[], 10);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.average_response_time_ms, 0.0);
        assert!(stats.recent_activity.is_empty());
    }

    #[test]
    fn stats_split_success_and_failure() {
        let records = vec![
            record("GET", "/a", 200, 10),
            record("GET", "/b", 204, 20),
            record("POST", "/c", 302, 30),
            record("POST", "/d", 403, 0),
            record("DELETE", "/e", 500, 40),
        ];
        let stats = LogStats::from_records(&records, 3);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 2);
        assert_eq!(stats.average_response_time_ms, 20.0);
        assert_eq!(stats.by_method["GET"], 2);
        assert_eq!(stats.by_method["POST"], 2);
        assert_eq!(stats.by_status[&500], 1);
        assert_eq!(stats.recent_activity.len(), 3);
        assert_eq!(stats.recent_activity[0].url, "/a");
    }

    #[test]
    fn filter_by_method_and_status() {
        let r = record("get", "/x", 404, 1);
        assert_eq!(r.method, "GET");
        let f = LogFilter {
            method: Some("GET".into()),
            status: Some(404),
            ..Default::default()
        };
        assert!(f.matches(&r));
        let f = LogFilter {
            status: Some(200),
            ..Default::default()
        };
        assert!(!f.matches(&r));
    }

    #[test]
    fn search_is_case_insensitive_over_url_and_user() {
        let mut r = record("GET", "/api/Users", 200, 1);
        r.requested_by = Some("Alice".into());
        let by_url = LogFilter {
            search: Some("users".into()),
            ..Default::default()
        };
        assert!(by_url.matches(&r));
        let by_user = LogFilter {
            search: Some("alice".into()),
            ..Default::default()
        };
        assert!(by_user.matches(&r));
        let miss = LogFilter {
            search: Some("bob".into()),
            ..Default::default()
        };
        assert!(!miss.matches(&r));
    }

    #[test]
    fn invalid_search_pattern_falls_back_to_literal() {
        let r = record("GET", "/weird(path", 200, 1);
        let f = LogFilter {
            search: Some("(path".into()),
            ..Default::default()
        };
        assert!(f.matches(&r));
    }

    #[test]
    fn time_bounds_are_half_open() {
        let r = record("GET", "/", 200, 1);
        assert!(LogFilter::since(r.timestamp).matches(&r));
        assert!(!LogFilter::before(r.timestamp).matches(&r));
    }

    #[test]
    fn yesterday_preset_ends_at_midnight() {
        let now = "2026-03-10T15:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let (since, until) = DatePreset::Yesterday.bounds(now);
        assert_eq!(since.to_rfc3339(), "2026-03-09T00:00:00+00:00");
        assert_eq!(until.unwrap().to_rfc3339(), "2026-03-10T00:00:00+00:00");
    }

    #[test]
    fn metadata_omits_empty_fields() {
        let meta = LogMetadata {
            user_agent: Some("curl/8".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({ "user_agent": "curl/8" }));
    }
}
