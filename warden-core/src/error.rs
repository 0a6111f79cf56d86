use thiserror::Error;

/// Unified error type for Warden.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Request blocked by proxy rule: {0}")]
    BlockedByRule(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Log persistence failed: {0}")]
    LogPersistence(String),

    #[error("Invalid rule: {0}")]
    Validation(String),

    #[error("Proxy rule not found: {0}")]
    RuleNotFound(String),

    #[error("Log not found: {0}")]
    LogNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            WardenError::BlockedByRule(_) => 403,
            WardenError::Validation(_) => 400,
            WardenError::RuleNotFound(_) | WardenError::LogNotFound(_) => 404,
            WardenError::UpstreamTimeout(_) | WardenError::UpstreamUnreachable(_) => 500,
            _ => 500,
        }
    }

    /// Transport-level failure reaching the upstream.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            WardenError::UpstreamTimeout(_) | WardenError::UpstreamUnreachable(_)
        )
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "error": self.to_string(),
            "status": self.status_code(),
        })
        .to_string()
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(WardenError::BlockedByRule("r1".into()).status_code(), 403);
        assert_eq!(WardenError::UpstreamTimeout("30s".into()).status_code(), 500);
        assert_eq!(WardenError::UpstreamUnreachable("dns".into()).status_code(), 500);
        assert_eq!(WardenError::Validation("path".into()).status_code(), 400);
        assert_eq!(WardenError::RuleNotFound("x".into()).status_code(), 404);
        assert_eq!(WardenError::LogNotFound("x".into()).status_code(), 404);
        assert_eq!(WardenError::LogPersistence("disk".into()).status_code(), 500);
    }

    #[test]
    fn json_body_escapes_message() {
        let err = WardenError::Validation(r#"pattern "api" must start with '/'"#.into());
        let body: serde_json::Value = serde_json::from_slice(&err.to_json_body()).unwrap();
        assert_eq!(body["status"], 400);
        assert!(body["error"].as_str().unwrap().contains(r#""api""#));
    }

    #[test]
    fn upstream_failures_are_classified() {
        assert!(WardenError::UpstreamTimeout("t".into()).is_upstream_failure());
        assert!(WardenError::UpstreamUnreachable("u".into()).is_upstream_failure());
        assert!(!WardenError::Store("s".into()).is_upstream_failure());
    }
}
