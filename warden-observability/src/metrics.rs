use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// How the pipeline finished a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rejected by a rule before any upstream call.
    Blocked,
    /// Upstream answered (any status).
    Forwarded,
    /// Transport failure reaching the upstream.
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Blocked => "blocked",
            Outcome::Forwarded => "forwarded",
            Outcome::Failed => "failed",
        }
    }
}

/// Metrics collector, gated behind `enabled`.
///
/// When disabled no registry is created and every record call returns
/// immediately.
pub struct MetricsCollector {
    enabled: bool,
    registry: Option<Registry>,
    pub proxy_requests_total: Option<IntCounterVec>,
    pub proxy_request_duration: Option<HistogramVec>,
    pub log_write_failures: Option<IntCounter>,
    pub rule_cache_reloads: Option<IntGauge>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let proxy_requests_total = IntCounterVec::new(
            Opts::new("warden_proxy_requests_total", "Proxied requests by outcome"),
            &["outcome", "method", "status"],
        )?;

        let proxy_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "warden_proxy_request_duration_seconds",
                "End-to-end pipeline latency",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["outcome"],
        )?;

        let log_write_failures = IntCounter::new(
            "warden_log_write_failures_total",
            "Log records that could not be persisted",
        )?;

        let rule_cache_reloads = IntGauge::new(
            "warden_rule_cache_reloads",
            "Rule snapshot reloads since startup",
        )?;

        registry.register(Box::new(proxy_requests_total.clone()))?;
        registry.register(Box::new(proxy_request_duration.clone()))?;
        registry.register(Box::new(log_write_failures.clone()))?;
        registry.register(Box::new(rule_cache_reloads.clone()))?;

        tracing::debug!("metrics: prometheus registry initialised");

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            proxy_requests_total: Some(proxy_requests_total),
            proxy_request_duration: Some(proxy_request_duration),
            log_write_failures: Some(log_write_failures),
            rule_cache_reloads: Some(rule_cache_reloads),
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            registry: None,
            proxy_requests_total: None,
            proxy_request_duration: None,
            log_write_failures: None,
            rule_cache_reloads: None,
        }
    }

    /// Record one finished request (no-op when disabled).
    #[inline]
    pub fn record_request(&self, outcome: Outcome, method: &str, status: u16, duration_secs: f64) {
        if !self.enabled {
            return;
        }
        if let Some(ref counter) = self.proxy_requests_total {
            let mut buf = itoa::Buffer::new();
            let status_str = buf.format(status);
            counter
                .with_label_values(&[outcome.as_str(), method, status_str])
                .inc();
        }
        if let Some(ref hist) = self.proxy_request_duration {
            hist.with_label_values(&[outcome.as_str()])
                .observe(duration_secs);
        }
    }

    #[inline]
    pub fn record_log_failure(&self) {
        if let Some(ref counter) = self.log_write_failures {
            counter.inc();
        }
    }

    /// Sample the rule cache reload count; called at scrape time.
    pub fn set_cache_reloads(&self, reloads: u64) {
        if let Some(ref gauge) = self.rule_cache_reloads {
            gauge.set(i64::try_from(reloads).unwrap_or(i64::MAX));
        }
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        if let Some(ref registry) = self.registry {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();
            encoder.encode(&metric_families, &mut buffer).unwrap_or(());
            String::from_utf8(buffer).unwrap_or_default()
        } else {
            String::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
