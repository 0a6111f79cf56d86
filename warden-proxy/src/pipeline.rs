//! The forwarding pipeline.
//!
//! One inbound request produces exactly one [`ProxyResponse`] and at most one
//! [`LogRecord`]. Policy is resolved once from a single rule snapshot before
//! any network call. Upstream transport failures become a 500 here and never
//! escape.
//!
//! The log write runs after the response is handed back, as a task tracked by
//! the pipeline. [`ForwardingPipeline::drain_logs`] waits for every pending
//! write; the server calls it on shutdown. Persistence failures go to the
//! diagnostic channel only.

use crate::upstream::{OutboundRequest, UpstreamClient, UpstreamResponse};
use bytes::Bytes;
use chrono::Utc;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use warden_core::WardenError;
use warden_core::log_record::LogRecord;
use warden_observability::{MetricsCollector, Outcome};
use warden_store::cache::Decision;
use warden_store::{LogRecorder, RuleCache};

/// What the pipeline needs from an inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path as received, mount prefix included.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<String>,
    /// Identity supplied by the authentication layer.
    pub requested_by: Option<String>,
    pub simulated: bool,
}

impl InboundRequest {
    /// The URL as the caller sent it.
    pub fn caller_url(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{q}", self.path),
            _ => self.path.clone(),
        }
    }
}

/// The single terminal response for a request.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    fn json(status: StatusCode, value: serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn blocked() -> Self {
        Self::json(
            StatusCode::FORBIDDEN,
            serde_json::json!({
                "message": "Request blocked by proxy rule",
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    pub fn failed(error: &WardenError) -> Self {
        Self::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({
                "message": "Proxy request failed",
                "error": error.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    fn relayed(upstream: UpstreamResponse) -> Self {
        let mut headers = HeaderMap::with_capacity(upstream.headers.len());
        for (name, value) in upstream.headers.iter() {
            if value.is_empty() || is_hop_by_hop(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        Self {
            status: upstream.status,
            headers,
            body: upstream.body,
        }
    }
}

pub struct ForwardingPipeline {
    cache: Arc<RuleCache>,
    recorder: LogRecorder,
    upstream: Arc<dyn UpstreamClient>,
    metrics: Arc<MetricsCollector>,
    mount_prefix: String,
    default_base: String,
    pending_logs: TaskTracker,
}

impl ForwardingPipeline {
    pub fn new(
        cache: Arc<RuleCache>,
        recorder: LogRecorder,
        upstream: Arc<dyn UpstreamClient>,
        metrics: Arc<MetricsCollector>,
        mount_prefix: impl Into<String>,
        default_base: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            recorder,
            upstream,
            metrics,
            mount_prefix: mount_prefix.into().trim_end_matches('/').to_string(),
            default_base: default_base.into(),
            pending_logs: TaskTracker::new(),
        }
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    pub fn default_base(&self) -> &str {
        &self.default_base
    }

    /// Log writes spawned but not yet finished.
    pub fn pending_logs(&self) -> usize {
        self.pending_logs.len()
    }

    /// Wait until every spawned log write has finished. Writes spawned while
    /// draining are waited for too.
    pub async fn drain_logs(&self) {
        self.pending_logs.close();
        self.pending_logs.wait().await;
        self.pending_logs.reopen();
    }

    /// Inbound path with the mount prefix removed. The prefix is only
    /// stripped on a segment boundary.
    pub fn effective_path(&self, path: &str) -> String {
        match path.strip_prefix(&self.mount_prefix) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }

    /// Override base (if any) or the default base, joined with the effective
    /// path and the caller's query string.
    pub fn target_url(&self, forward_target: Option<&str>, path: &str, query: Option<&str>) -> String {
        let base = forward_target.unwrap_or(&self.default_base);
        let mut url = format!("{}{}", base.trim_end_matches('/'), path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Run one request through policy, forwarding and logging.
    pub async fn handle(&self, request: InboundRequest) -> ProxyResponse {
        let started = Instant::now();
        let path = self.effective_path(&request.path);
        let method = request.method.as_str().to_string();
        let decision = self.cache.decide(&path, &method).await;

        if decision.blocked {
            warn!(
                method = %method,
                path = %path,
                rule_id = decision.rule.as_ref().map(|r| r.id.as_str()).unwrap_or(""),
                user = request.requested_by.as_deref().unwrap_or("-"),
                "proxy: request blocked by rule"
            );
            let response = ProxyResponse::blocked();
            let elapsed = started.elapsed();
            self.metrics
                .record_request(Outcome::Blocked, &method, 403, elapsed.as_secs_f64());
            if decision.log {
                let mut record = self.record(&request, &decision, 403, elapsed.as_millis());
                record.metadata.blocked = true;
                self.persist(record);
            }
            return response;
        }

        let target = self.target_url(
            decision.forward_target.as_deref(),
            &path,
            request.query.as_deref(),
        );
        let outbound = OutboundRequest {
            method: request.method.clone(),
            url: target.clone(),
            headers: forwardable_headers(&request.headers),
            body: request.body.clone(),
        };

        match self.upstream.send(outbound).await {
            Ok(upstream) => {
                let elapsed = started.elapsed();
                let status = upstream.status.as_u16();
                info!(
                    method = %method,
                    path = %path,
                    target = %target,
                    status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "proxy: request forwarded"
                );
                self.metrics
                    .record_request(Outcome::Forwarded, &method, status, elapsed.as_secs_f64());
                let response = ProxyResponse::relayed(upstream);
                if decision.log {
                    let mut record = self.record(&request, &decision, status, elapsed.as_millis());
                    record.target_url = Some(target);
                    self.persist(record);
                }
                response
            }
            Err(e) => {
                let elapsed = started.elapsed();
                error!(
                    method = %method,
                    path = %path,
                    target = %target,
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "proxy: upstream request failed"
                );
                self.metrics
                    .record_request(Outcome::Failed, &method, 500, elapsed.as_secs_f64());
                let response = ProxyResponse::failed(&e);
                if decision.log {
                    let mut record = self.record(&request, &decision, 500, elapsed.as_millis());
                    record.target_url = Some(target);
                    record.metadata.error = Some(e.to_string());
                    self.persist(record);
                }
                response
            }
        }
    }

    fn record(
        &self,
        request: &InboundRequest,
        decision: &Decision,
        status: u16,
        elapsed_ms: u128,
    ) -> LogRecord {
        let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX);
        let mut record = LogRecord::new(request.method.as_str(), &request.caller_url(), status, elapsed_ms);
        record.requested_by = request.requested_by.clone();
        record.matched_rule_id = decision.rule.as_ref().map(|r| r.id.clone());
        record.metadata.rule_name = decision.rule.as_ref().map(|r| r.name.clone());
        record.metadata.target_api = Some(
            decision
                .forward_target
                .clone()
                .unwrap_or_else(|| self.default_base.clone()),
        );
        record.metadata.user_agent = request
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        record.metadata.client_ip = request.client_ip.clone();
        record.metadata.simulated = request.simulated;
        record
    }

    /// Hand `record` to a tracked task so the caller's response is not held
    /// back by the write.
    fn persist(&self, record: LogRecord) {
        let recorder = self.recorder.clone();
        let metrics = self.metrics.clone();
        self.pending_logs.spawn(async move {
            let id = record.id.clone();
            if let Err(e) = recorder.append(record).await {
                metrics.record_log_failure();
                error!(log_id = %id, error = %e, "proxy: failed to persist log record");
            }
        });
    }
}

/// Inbound headers minus host and content-length; the transport sets both.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers
}

/// Response headers the local transport sets itself.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    *name == header::CONNECTION || *name == header::TRANSFER_ENCODING || *name == header::CONTENT_LENGTH
}
