//! Request counters, latency timers and throughput reporting.
//!
//! The sink is injected; nothing here installs a process-wide reporter.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::StatusCode;
use tokio::time::Instant;

use crate::formatter::ProtocolVariant;
use crate::model::UsageInfo;

/// Metric names. Keep these stable; dashboards depend on them.
pub mod names {
    pub const REQUEST_TOTAL: &str = "request_total";
    pub const REQUEST_SUCCESS: &str = "request_success";
    pub const REQUEST_FAILURE: &str = "request_failure";
    pub const FIRST_PKG_COST_TIME: &str = "first_pkg_cost_time";
    pub const REQUEST_COST_TIME: &str = "request_cost_time";
    pub const SPEED: &str = "speed";
    pub const PROMPT_TOKENS: &str = "prompt_tokens";
    pub const COMPLETION_TOKENS: &str = "completion_tokens";
    pub const TOTAL_TOKENS: &str = "total_tokens";
}

pub const TAG_MODEL: &str = "model";
pub const TAG_STREAM: &str = "stream";
pub const TAG_PROTOCOL: &str = "protocol";
pub const TAG_RET_CODE: &str = "ret_code";

/// How the sink should fold a value into its series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Counter increment.
    Add,
    /// Gauge overwrite.
    Set,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Add => "add",
            Aggregation::Set => "set",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricTags(BTreeMap<String, String>);

impl MetricTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Implement this to receive measurements.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `report` may be called from any task; implementations should avoid panicking.
/// - Keep overhead minimal; this is called on the per-chunk hot path.
pub trait MetricsSink: Send + Sync + 'static {
    fn report(&self, values: &[(&str, f64)], tags: &MetricTags, methods: &[Aggregation]);
}

/// Discards everything.
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn report(&self, _values: &[(&str, f64)], _tags: &MetricTags, _methods: &[Aggregation]) {}
}

/// Writes each measurement as a structured `tracing` event.
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn report(&self, values: &[(&str, f64)], tags: &MetricTags, methods: &[Aggregation]) {
        let tags = tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let methods = methods.iter().map(Aggregation::as_str).collect::<Vec<_>>().join(",");
        for (name, value) in values {
            tracing::info!(target: "genstream::metrics", metric = *name, value = *value, %tags, %methods);
        }
    }
}

/// `completion_tokens * 1000 / cost_ms`, or zero when no time elapsed.
pub fn throughput(completion_tokens: u32, cost_ms: u64) -> f64 {
    if cost_ms == 0 {
        0.0
    } else {
        f64::from(completion_tokens) * 1000.0 / cost_ms as f64
    }
}

/// Factory for per-request reporters, held by the aggregator and assembler.
#[derive(Clone)]
pub struct MetricsInstrumentation {
    sink: Arc<dyn MetricsSink>,
    protocol: ProtocolVariant,
}

impl MetricsInstrumentation {
    pub fn new(sink: Arc<dyn MetricsSink>, protocol: ProtocolVariant) -> Self {
        Self { sink, protocol }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), ProtocolVariant::Default)
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.protocol
    }

    /// Count the request and start its clock.
    pub fn begin(&self, model: &str, stream: bool) -> RequestMetrics {
        let tags = MetricTags::new()
            .with(TAG_MODEL, model)
            .with(TAG_STREAM, stream.to_string())
            .with(TAG_PROTOCOL, self.protocol.as_str());
        let rm = RequestMetrics {
            sink: self.sink.clone(),
            tags,
            started: Instant::now(),
        };
        rm.add(names::REQUEST_TOTAL, &rm.tags);
        rm
    }
}

/// Reporter bound to one request's tags and acceptance time.
pub struct RequestMetrics {
    sink: Arc<dyn MetricsSink>,
    tags: MetricTags,
    started: Instant,
}

impl RequestMetrics {
    pub fn tags(&self) -> &MetricTags {
        &self.tags
    }

    /// Whole milliseconds since the request was accepted.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn add(&self, name: &str, tags: &MetricTags) {
        self.sink.report(&[(name, 1.0)], tags, &[Aggregation::Add]);
    }

    /// Report first-packet latency; returns the reported milliseconds.
    pub fn first_token(&self) -> u64 {
        let ms = self.elapsed_ms();
        self.sink.report(
            &[(names::FIRST_PKG_COST_TIME, ms as f64)],
            &self.tags,
            &[Aggregation::Set],
        );
        ms
    }

    /// Report total cost time and throughput; returns `(cost_ms, speed)`.
    pub fn cost(&self, completion_tokens: u32) -> (u64, f64) {
        let ms = self.elapsed_ms();
        let speed = throughput(completion_tokens, ms);
        self.sink.report(
            &[(names::REQUEST_COST_TIME, ms as f64), (names::SPEED, speed)],
            &self.tags,
            &[Aggregation::Set],
        );
        (ms, speed)
    }

    pub fn tokens(&self, usage: &UsageInfo) {
        self.sink.report(
            &[
                (names::PROMPT_TOKENS, f64::from(usage.prompt_tokens())),
                (names::COMPLETION_TOKENS, f64::from(usage.completion_tokens())),
                (names::TOTAL_TOKENS, f64::from(usage.total_tokens())),
            ],
            &self.tags,
            &[Aggregation::Set],
        );
    }

    pub fn success(&self) {
        self.add(names::REQUEST_SUCCESS, &self.tags);
    }

    pub fn failure(&self, status: StatusCode) {
        let tags = self.tags.clone().with(TAG_RET_CODE, status.as_u16().to_string());
        self.add(names::REQUEST_FAILURE, &tags);
    }
}
