//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_http_requests_total` (counter): requests by method, status
//! - `gateway_http_request_duration_seconds` (histogram): latency distribution
//! - `gateway_stanzas_total` (counter): requests to the messaging server by kind, outcome
//! - `gateway_stanza_roundtrip_seconds` (histogram): time to matching reply
//! - `gateway_pending_requests` (gauge): requests awaiting a reply
//! - `gateway_sessions_active` (gauge): cached live sessions
//! - `gateway_session_handshakes_total` (counter): handshakes by outcome

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr` and describe all metrics.
pub fn init_metrics(addr: SocketAddr) {
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        return;
    }

    describe_counter!("gateway_http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "gateway_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "gateway_stanzas_total",
        "Requests sent to the messaging server, by outcome"
    );
    describe_histogram!(
        "gateway_stanza_roundtrip_seconds",
        "Time from sending a request to receiving its reply"
    );
    describe_gauge!("gateway_pending_requests", "Requests awaiting a reply");
    describe_gauge!("gateway_sessions_active", "Cached live XMPP sessions");
    describe_counter!(
        "gateway_session_handshakes_total",
        "XMPP authentication handshakes, by outcome"
    );

    tracing::info!(address = %addr, "Metrics exporter listening");
}

pub fn record_http_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_stanza(kind: String, outcome: &'static str) {
    counter!("gateway_stanzas_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_roundtrip(elapsed: Duration) {
    histogram!("gateway_stanza_roundtrip_seconds").record(elapsed.as_secs_f64());
}

pub fn pending_added() {
    gauge!("gateway_pending_requests").increment(1.0);
}

pub fn pending_removed() {
    gauge!("gateway_pending_requests").decrement(1.0);
}

pub fn record_active_sessions(count: usize) {
    gauge!("gateway_sessions_active").set(count as f64);
}

pub fn record_handshake(outcome: &'static str) {
    counter!("gateway_session_handshakes_total", "outcome" => outcome).increment(1);
}
