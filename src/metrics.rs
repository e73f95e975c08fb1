// Prometheus metrics definitions for the wargames backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Session leases currently held by this process.
    pub static ref HELD_SESSION_LEASES: IntGauge =
        IntGauge::new("wargames_held_session_leases", "Session leases currently held").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total challenge sessions started (new rows only, not idempotent replays).
    pub static ref SESSIONS_STARTED_TOTAL: IntCounter = IntCounter::new(
        "wargames_sessions_started_total",
        "Challenge sessions started",
    )
    .unwrap();

    /// Total messages submitted to challenge agents.
    pub static ref MESSAGES_SUBMITTED_TOTAL: IntCounter = IntCounter::new(
        "wargames_messages_submitted_total",
        "Messages submitted to challenge agents",
    )
    .unwrap();

    /// Total sessions that transitioned to succeeded.
    pub static ref CHALLENGES_SUCCEEDED_TOTAL: IntCounter = IntCounter::new(
        "wargames_challenges_succeeded_total",
        "Challenge sessions transitioned to succeeded",
    )
    .unwrap();

    /// Total badges awarded to users.
    pub static ref BADGES_AWARDED_TOTAL: IntCounter = IntCounter::new(
        "wargames_badges_awarded_total",
        "Badges awarded to users",
    )
    .unwrap();

    /// Total agent-service requests, by outcome (ok, error).
    pub static ref AGENT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wargames_agent_requests_total", "Agent service requests"),
        &["outcome"],
    )
    .unwrap();

    /// Total lease acquisitions that gave up at the wait bound.
    pub static ref SESSION_LOCK_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "wargames_session_lock_timeouts_total",
        "Session lease acquisitions that timed out",
    )
    .unwrap();

    /// Total releases that found the lease already expired and reclaimed.
    pub static ref SESSION_LEASES_LOST_TOTAL: IntCounter = IntCounter::new(
        "wargames_session_leases_lost_total",
        "Session leases lost to expiry before release",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wargames_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Agent-service request duration in seconds.
    pub static ref AGENT_REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "wargames_agent_request_duration_seconds",
            "Agent service request duration in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
    )
    .unwrap();

    /// Time spent waiting to acquire a session lease, in seconds.
    pub static ref SESSION_LOCK_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "wargames_session_lock_wait_seconds",
            "Time spent waiting for a session lease",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "wargames_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HELD_SESSION_LEASES.clone()),
        Box::new(SESSIONS_STARTED_TOTAL.clone()),
        Box::new(MESSAGES_SUBMITTED_TOTAL.clone()),
        Box::new(CHALLENGES_SUCCEEDED_TOTAL.clone()),
        Box::new(BADGES_AWARDED_TOTAL.clone()),
        Box::new(AGENT_REQUESTS_TOTAL.clone()),
        Box::new(SESSION_LOCK_TIMEOUTS_TOTAL.clone()),
        Box::new(SESSION_LEASES_LOST_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(AGENT_REQUEST_DURATION_SECONDS.clone()),
        Box::new(SESSION_LOCK_WAIT_SECONDS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace numeric path segments with `:id`
/// to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/tournaments"), "/api/tournaments");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(normalize_path("/api/challenges/42"), "/api/challenges/:id");
        assert_eq!(
            normalize_path("/api/challenges/42/context"),
            "/api/challenges/:id/context"
        );
    }

    #[test]
    fn test_normalize_path_preserves_non_numeric() {
        assert_eq!(
            normalize_path("/api/tournaments/join"),
            "/api/tournaments/join"
        );
    }

    #[test]
    fn test_counters_increment() {
        let before = MESSAGES_SUBMITTED_TOTAL.get();
        MESSAGES_SUBMITTED_TOTAL.inc();
        assert_eq!(MESSAGES_SUBMITTED_TOTAL.get(), before + 1);
    }
}
