use crate::error::{Result, WardenError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PATTERN_LEN: usize = 500;
pub const MAX_PRIORITY: i32 = 1000;

/// A path/method-scoped policy record controlling block, forward and log
/// behaviour for matching requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Path prefix, always starting with `/`
    pub path_pattern: String,

    /// Verbs this rule applies to (never empty)
    pub methods: BTreeSet<HttpMethod>,

    /// Higher wins
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub blocked: bool,

    #[serde(default = "default_true")]
    pub logging_enabled: bool,

    /// Absolute base URL overriding the default upstream
    #[serde(default)]
    pub forward_target: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// HTTP methods a rule can be scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WardenError::Validation(format!("unsupported method: {s}")))
    }
}

impl Rule {
    /// Check if a given HTTP method is covered by this rule.
    pub fn method_allowed(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.as_str().eq_ignore_ascii_case(method))
    }

    /// Structural match: prefix on the path and membership of the method.
    pub fn matches(&self, path: &str, method: &str) -> bool {
        path.starts_with(&self.path_pattern) && self.method_allowed(method)
    }

    /// Two rules that the matcher can only separate by recency.
    pub fn ties_with(&self, other: &Rule) -> bool {
        self.id != other.id
            && self.priority == other.priority
            && self.path_pattern == other.path_pattern
            && !self.methods.is_disjoint(&other.methods)
    }

    /// Check every invariant a stored rule must hold.
    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.chars().count();
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(WardenError::Validation(format!(
                "name must be 1..={MAX_NAME_LEN} characters"
            )));
        }
        if self.path_pattern.is_empty() || self.path_pattern.len() > MAX_PATTERN_LEN {
            return Err(WardenError::Validation(format!(
                "path pattern must be 1..={MAX_PATTERN_LEN} characters"
            )));
        }
        if !self.path_pattern.starts_with('/') {
            return Err(WardenError::Validation(format!(
                "path pattern '{}' must start with '/'",
                self.path_pattern
            )));
        }
        if self.methods.is_empty() {
            return Err(WardenError::Validation("methods must not be empty".into()));
        }
        if !(0..=MAX_PRIORITY).contains(&self.priority) {
            return Err(WardenError::Validation(format!(
                "priority must be within 0..={MAX_PRIORITY}"
            )));
        }
        if let Some(ref target) = self.forward_target {
            validate_forward_target(target)?;
        }
        Ok(())
    }

    /// Merge a partial update into a copy of this rule and validate the result.
    pub fn apply(&self, patch: RulePatch, now: DateTime<Utc>) -> Result<Rule> {
        let mut merged = self.clone();
        if let Some(name) = patch.name {
            merged.name = name.trim().to_string();
        }
        if let Some(pattern) = patch.path_pattern {
            merged.path_pattern = pattern.trim().to_string();
        }
        if let Some(methods) = patch.methods {
            merged.methods = methods;
        }
        if let Some(priority) = patch.priority {
            merged.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            merged.enabled = enabled;
        }
        if let Some(blocked) = patch.blocked {
            merged.blocked = blocked;
        }
        if let Some(logging) = patch.logging_enabled {
            merged.logging_enabled = logging;
        }
        if let Some(target) = patch.forward_target {
            merged.forward_target = normalize_target(Some(target));
        }
        merged.updated_at = now;
        merged.validate()?;
        Ok(merged)
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub path_pattern: String,
    pub methods: BTreeSet<HttpMethod>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    #[serde(default)]
    pub forward_target: Option<String>,
}

impl RuleDraft {
    /// Build a stored rule from this draft, rejecting anything invalid.
    pub fn into_rule(self, id: String, now: DateTime<Utc>) -> Result<Rule> {
        let rule = Rule {
            id,
            name: self.name.trim().to_string(),
            path_pattern: self.path_pattern.trim().to_string(),
            methods: self.methods,
            priority: self.priority,
            enabled: self.enabled,
            blocked: self.blocked,
            logging_enabled: self.logging_enabled,
            forward_target: normalize_target(self.forward_target),
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// Partial update for a rule. Absent fields are left untouched; an empty
/// `forward_target` clears the override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path_pattern: Option<String>,
    #[serde(default)]
    pub methods: Option<BTreeSet<HttpMethod>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub logging_enabled: Option<bool>,
    #[serde(default)]
    pub forward_target: Option<String>,
}

/// The canonical rule set installed by a reset.
///
/// Ids and timestamps are fixed so that repeated resets produce identical
/// records.
pub fn default_rules() -> Vec<Rule> {
    let epoch = DateTime::<Utc>::default();
    let crud: BTreeSet<HttpMethod> = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
    ]
    .into_iter()
    .collect();

    vec![
        Rule {
            id: "block-sensitive-endpoints".to_string(),
            name: "Block Sensitive Endpoints".to_string(),
            path_pattern: "/api/admin".to_string(),
            methods: crud.clone(),
            priority: 10,
            enabled: true,
            blocked: true,
            logging_enabled: true,
            forward_target: None,
            created_at: epoch,
            updated_at: epoch,
        },
        Rule {
            id: "default-api-access".to_string(),
            name: "Default API Access".to_string(),
            path_pattern: "/api".to_string(),
            methods: crud,
            priority: 0,
            enabled: true,
            blocked: false,
            logging_enabled: true,
            forward_target: None,
            created_at: epoch,
            updated_at: epoch,
        },
    ]
}

fn normalize_target(target: Option<String>) -> Option<String> {
    target
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn validate_forward_target(target: &str) -> Result<()> {
    let uri: http::Uri = target
        .parse()
        .map_err(|_| WardenError::Validation(format!("forward target '{target}' is not a URL")))?;
    let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
    if !scheme_ok || uri.authority().is_none() {
        return Err(WardenError::Validation(format!(
            "forward target '{target}' must be an absolute http(s) URL"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(pattern: &str) -> RuleDraft {
        RuleDraft {
            name: "users".into(),
            path_pattern: pattern.into(),
            methods: [HttpMethod::Get].into_iter().collect(),
            priority: 0,
            enabled: true,
            blocked: false,
            logging_enabled: true,
            forward_target: None,
        }
    }

    #[test]
    fn draft_requires_leading_slash() {
        let err = draft("api/users").into_rule("r1".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, WardenError::Validation(_)));
    }

    #[test]
    fn draft_rejects_empty_methods() {
        let mut d = draft("/api");
        d.methods.clear();
        assert!(d.into_rule("r1".into(), Utc::now()).is_err());
    }

    #[test]
    fn draft_rejects_priority_out_of_range() {
        let mut d = draft("/api");
        d.priority = 1001;
        assert!(d.into_rule("r1".into(), Utc::now()).is_err());
        let mut d = draft("/api");
        d.priority = -1;
        assert!(d.into_rule("r1".into(), Utc::now()).is_err());
    }

    #[test]
    fn empty_forward_target_means_no_override() {
        let mut d = draft("/api");
        d.forward_target = Some("   ".into());
        let rule = d.into_rule("r1".into(), Utc::now()).unwrap();
        assert!(rule.forward_target.is_none());
    }

    #[test]
    fn forward_target_must_be_absolute() {
        let mut d = draft("/api");
        d.forward_target = Some("/relative".into());
        assert!(d.into_rule("r1".into(), Utc::now()).is_err());

        let mut d = draft("/api");
        d.forward_target = Some("ftp://files.example.com".into());
        assert!(d.into_rule("r1".into(), Utc::now()).is_err());

        let mut d = draft("/api");
        d.forward_target = Some("https://backup.example.com".into());
        assert!(d.into_rule("r1".into(), Utc::now()).is_ok());
    }

    #[test]
    fn method_names_parse_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("OPTIONS".parse::<HttpMethod>().unwrap(), HttpMethod::Options);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn unknown_method_rejected_on_deserialize() {
        let json = r#"{"name":"x","path_pattern":"/a","methods":["GET","BREW"]}"#;
        assert!(serde_json::from_str::<RuleDraft>(json).is_err());
    }

    #[test]
    fn draft_defaults_allow_and_log() {
        let json = r#"{"name":"x","path_pattern":"/a","methods":["GET"]}"#;
        let d: RuleDraft = serde_json::from_str(json).unwrap();
        assert!(d.enabled);
        assert!(d.logging_enabled);
        assert!(!d.blocked);
        assert_eq!(d.priority, 0);
    }

    #[test]
    fn apply_merges_only_provided_fields() {
        let rule = draft("/api").into_rule("r1".into(), Utc::now()).unwrap();
        let patch = RulePatch {
            blocked: Some(true),
            ..Default::default()
        };
        let later = rule.created_at + chrono::Duration::seconds(5);
        let merged = rule.apply(patch, later).unwrap();
        assert!(merged.blocked);
        assert_eq!(merged.path_pattern, "/api");
        assert_eq!(merged.created_at, rule.created_at);
        assert_eq!(merged.updated_at, later);
    }

    #[test]
    fn apply_rejects_invalid_merge() {
        let rule = draft("/api").into_rule("r1".into(), Utc::now()).unwrap();
        let patch = RulePatch {
            path_pattern: Some("no-slash".into()),
            ..Default::default()
        };
        assert!(rule.apply(patch, Utc::now()).is_err());
    }

    #[test]
    fn apply_empty_target_clears_override() {
        let mut d = draft("/api");
        d.forward_target = Some("https://a.example.com".into());
        let rule = d.into_rule("r1".into(), Utc::now()).unwrap();
        let patch = RulePatch {
            forward_target: Some(String::new()),
            ..Default::default()
        };
        assert!(rule.apply(patch, Utc::now()).unwrap().forward_target.is_none());
    }

    #[test]
    fn default_rules_are_valid_and_stable() {
        let a = default_rules();
        let b = default_rules();
        assert_eq!(a, b);
        for rule in &a {
            rule.validate().unwrap();
        }
        assert!(a.iter().any(|r| r.path_pattern == "/api/admin" && r.blocked));
        assert!(a.iter().any(|r| r.path_pattern == "/api" && !r.blocked));
    }

    #[test]
    fn ties_with_requires_shared_method() {
        let now = Utc::now();
        let a = draft("/api").into_rule("a".into(), now).unwrap();
        let mut b = draft("/api").into_rule("b".into(), now).unwrap();
        assert!(a.ties_with(&b));
        b.methods = [HttpMethod::Post].into_iter().collect();
        assert!(!a.ties_with(&b));
    }
}
