use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a span played in an RPC, if any. Spans that model purely local
/// work carry no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    Client,
    Server,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "CLIENT",
            SpanKind::Server => "SERVER",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpanKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CLIENT" => Ok(SpanKind::Client),
            "SERVER" => Ok(SpanKind::Server),
            "PRODUCER" => Ok(SpanKind::Producer),
            "CONSUMER" => Ok(SpanKind::Consumer),
            other => Err(format!("unknown span kind: {other}")),
        }
    }
}

/// The network context a span was recorded in. Service names are lowercase by
/// convention; the store enforces that at the write boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// A timestamped event within a span, e.g. "cache.miss".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Microseconds since epoch.
    pub timestamp: i64,
    pub value: String,
}

/// One timed operation within a trace.
///
/// `timestamp` and `duration` are microseconds; zero means unknown, matching
/// how absent values come back from storage. The storage identity of a span
/// is `(trace_id, id, kind)`; re-ingesting the same triple reuses the
/// stored row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Span {
    pub trace_id: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SpanKind>,
    pub name: String,
    pub timestamp: i64,
    pub duration: i64,
    #[serde(skip_serializing_if = "is_false")]
    pub debug: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Span {
    /// Local service name, if the span carries an endpoint with one.
    pub fn service_name(&self) -> Option<&str> {
        self.local_endpoint
            .as_ref()
            .map(|e| e.service_name.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Whether the span is tagged as errored.
    pub fn is_error(&self) -> bool {
        self.tags.contains_key("error")
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}
