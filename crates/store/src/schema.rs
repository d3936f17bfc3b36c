use std::sync::Arc;

use crate::probe::Capabilities;

/// Idempotent DDL for the current schema generation. Applied on
/// `Store::open`; pre-existing tables from older generations are left
/// untouched, which is what the capability probe then observes.
///
/// The uniqueness constraints are load-bearing: every ingest write is a
/// conditional upsert against one of them.
pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS span_row_id_seq;

CREATE TABLE IF NOT EXISTS spans (
  span_row_id BIGINT PRIMARY KEY DEFAULT nextval('span_row_id_seq'),
  trace_id TEXT NOT NULL,
  id TEXT NOT NULL,
  parent_id TEXT NOT NULL DEFAULT '0',
  kind TEXT NOT NULL DEFAULT '',
  name TEXT NOT NULL DEFAULT '',
  debug BOOLEAN NOT NULL DEFAULT false,
  shared BOOLEAN NOT NULL DEFAULT false,
  start_ts BIGINT,
  duration BIGINT,
  UNIQUE (trace_id, id, kind)
);

CREATE TABLE IF NOT EXISTS annotations (
  span_row_id BIGINT NOT NULL,
  a_key TEXT NOT NULL,
  a_value TEXT,
  a_type INTEGER NOT NULL,
  a_timestamp BIGINT NOT NULL,
  service_name TEXT,
  ipv4 TEXT,
  ipv6 TEXT,
  port INTEGER,
  UNIQUE (span_row_id, a_key, a_timestamp)
);

CREATE TABLE IF NOT EXISTS dependencies (
  day BIGINT NOT NULL,
  parent TEXT NOT NULL,
  child TEXT NOT NULL,
  call_count BIGINT NOT NULL DEFAULT 0,
  error_count BIGINT NOT NULL DEFAULT 0,
  UNIQUE (day, parent, child)
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(start_ts);
CREATE INDEX IF NOT EXISTS idx_annotations_span ON annotations(span_row_id);
CREATE INDEX IF NOT EXISTS idx_annotations_key ON annotations(a_key);
CREATE INDEX IF NOT EXISTS idx_dependencies_day ON dependencies(day);
"#;

/// Timed annotation discriminator in `annotations.a_type`.
pub const TYPE_ANNOTATION: i32 = -1;
/// String (key/value tag) discriminator.
pub const TYPE_TAG: i32 = 6;
/// Legacy boolean/address discriminator; such rows carry remote endpoints
/// and are excluded from local service-name projections.
pub const TYPE_LEGACY_BOOLEAN: i32 = 0;

/// Marker key written for spans that carry an endpoint but no annotations
/// and no tags, so the endpoint is representable as an annotation row.
pub const LOCAL_COMPONENT_KEY: &str = "lc";

/// Frozen per-store knowledge every query consults: the probed capability
/// set, the strict-trace-id toggle, and the column lists already pruned to
/// what the live schema can serve.
#[derive(Debug, Clone)]
pub struct Schema {
    pub capabilities: Capabilities,
    pub strict_trace_id: bool,
    span_fields: Vec<&'static str>,
    annotation_fields: Vec<&'static str>,
    dependency_link_fields: Vec<&'static str>,
}

impl Schema {
    pub fn new(capabilities: Capabilities, strict_trace_id: bool) -> Arc<Self> {
        let span_fields = vec![
            "s.span_row_id",
            "s.trace_id",
            "s.id",
            "s.parent_id",
            "s.kind",
            "s.name",
            "s.debug",
            "s.shared",
            "s.start_ts",
            "s.duration",
        ];

        // A NULL literal keeps row positions stable when a column is absent;
        // the missing column itself is never referenced.
        let annotation_fields = vec![
            "a.span_row_id",
            "a.a_key",
            "a.a_value",
            "a.a_type",
            "a.a_timestamp",
            "a.service_name",
            "a.ipv4",
            if capabilities.ipv6 {
                "a.ipv6"
            } else {
                "NULL AS ipv6"
            },
            "a.port",
        ];

        let dependency_link_fields = vec![
            "parent",
            "child",
            "call_count",
            if capabilities.error_count {
                "error_count"
            } else {
                "NULL AS error_count"
            },
        ];

        Arc::new(Self {
            capabilities,
            strict_trace_id,
            span_fields,
            annotation_fields,
            dependency_link_fields,
        })
    }

    pub fn span_fields(&self) -> String {
        self.span_fields.join(", ")
    }

    pub fn annotation_fields(&self) -> String {
        self.annotation_fields.join(", ")
    }

    pub fn dependency_link_fields(&self) -> String {
        self.dependency_link_fields.join(", ")
    }
}
