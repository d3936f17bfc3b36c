use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use tracebase_core::model::{Annotation, Endpoint, Span, SpanKind};

/// Base instant shared by the fixtures, in epoch microseconds.
pub fn base_micros() -> i64 {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
        .unwrap()
        .timestamp_micros()
}

pub fn endpoint(service_name: &str) -> Endpoint {
    Endpoint {
        service_name: service_name.to_string(),
        ipv4: Some("10.0.0.1".to_string()),
        ipv6: None,
        port: Some(8080),
    }
}

pub fn span(trace_id: &str, id: &str, service_name: &str) -> Span {
    Span {
        trace_id: trace_id.to_string(),
        id: id.to_string(),
        kind: Some(SpanKind::Server),
        name: "get /v1/orders".to_string(),
        timestamp: base_micros(),
        duration: 150_000,
        local_endpoint: Some(endpoint(service_name)),
        ..Span::default()
    }
}

/// A two-service trace: api serves the request and calls into cache, which
/// times out and errors.
pub fn sample_trace(trace_id: &str) -> Vec<Span> {
    let mut root = span(trace_id, "000000000000000a", "api");
    root.annotations.push(Annotation {
        timestamp: base_micros() + 900_000,
        value: "retry".to_string(),
    });
    root.tags
        .insert("http.path".to_string(), "/v1/orders".to_string());

    let mut child = span(trace_id, "000000000000000b", "cache");
    child.parent_id = Some("000000000000000a".to_string());
    child.kind = Some(SpanKind::Client);
    child.name = "cache.get".to_string();
    child.timestamp = base_micros() + 900_000;
    child.duration = 700_000;
    child.tags = BTreeMap::from([("error".to_string(), "timeout".to_string())]);

    vec![root, child]
}
