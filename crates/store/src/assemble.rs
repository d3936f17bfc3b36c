use std::collections::HashMap;

use tracebase_core::ids::{self, TraceIdPair};
use tracebase_core::model::{Annotation, Endpoint, Span, SpanKind};

use crate::schema::{LOCAL_COMPONENT_KEY, TYPE_ANNOTATION, TYPE_TAG};

/// One row of the span select, column order fixed by
/// `Schema::span_fields`.
#[derive(Debug, Clone)]
pub struct SpanRow {
    pub span_row_id: i64,
    pub trace_id: String,
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    pub start_ts: Option<i64>,
    pub duration: Option<i64>,
    pub debug: Option<bool>,
    pub shared: Option<bool>,
}

/// One row of the annotation select, column order fixed by
/// `Schema::annotation_fields`. On schemas without the ipv6 column the
/// select substitutes a NULL literal, so `ipv6` is simply always absent.
#[derive(Debug, Clone)]
pub struct AnnotationRow {
    pub span_row_id: i64,
    pub a_key: String,
    pub a_value: Option<String>,
    pub a_type: i32,
    pub a_timestamp: Option<i64>,
    pub service_name: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub port: Option<i32>,
}

/// Rehydrates spans from their row form. Missing parents read as absent,
/// missing timestamps and durations as zero, and the local endpoint comes
/// from the first annotation row that names a service.
pub fn assemble(span_rows: &[SpanRow], annotation_rows: &[AnnotationRow]) -> Vec<Span> {
    let mut by_span: HashMap<i64, Vec<&AnnotationRow>> = HashMap::new();
    for row in annotation_rows {
        by_span.entry(row.span_row_id).or_default().push(row);
    }

    let mut spans = Vec::with_capacity(span_rows.len());
    for row in span_rows {
        let mut span = Span {
            trace_id: row.trace_id.clone(),
            id: row.id.clone(),
            parent_id: row
                .parent_id
                .as_deref()
                .filter(|p| !p.is_empty() && *p != "0")
                .map(str::to_string),
            kind: row
                .kind
                .as_deref()
                .filter(|k| !k.is_empty())
                .and_then(|k| k.parse::<SpanKind>().ok()),
            name: row.name.clone(),
            timestamp: row.start_ts.unwrap_or(0),
            duration: row.duration.unwrap_or(0),
            debug: row.debug.unwrap_or(false),
            shared: row.shared.unwrap_or(false),
            ..Span::default()
        };

        for ann in by_span.get(&row.span_row_id).into_iter().flatten() {
            if span.local_endpoint.is_none() {
                span.local_endpoint = endpoint_of(ann);
            }
            match ann.a_type {
                TYPE_ANNOTATION => span.annotations.push(Annotation {
                    timestamp: ann.a_timestamp.unwrap_or(0),
                    value: ann.a_key.clone(),
                }),
                TYPE_TAG => {
                    let value = ann.a_value.clone().unwrap_or_default();
                    if ann.a_key == LOCAL_COMPONENT_KEY && value.is_empty() {
                        continue;
                    }
                    span.tags.insert(ann.a_key.clone(), value);
                }
                _ => {}
            }
        }
        spans.push(span);
    }
    spans
}

fn endpoint_of(row: &AnnotationRow) -> Option<Endpoint> {
    let service_name = row.service_name.clone().filter(|s| !s.is_empty())?;
    Some(Endpoint {
        service_name,
        ipv4: row.ipv4.clone().filter(|ip| !ip.is_empty()),
        ipv6: row.ipv6.clone().filter(|ip| !ip.is_empty()),
        port: row.port.and_then(|p| u16::try_from(p).ok()),
    })
}

/// Buckets spans into traces following the caller's trace-id order. Under
/// lenient matching a 64-bit and a 128-bit spelling of the same trace land
/// in one bucket, keyed by the shared low bits.
pub fn group_traces(spans: Vec<Span>, order: &[TraceIdPair], strict: bool) -> Vec<Vec<Span>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for (i, pair) in order.iter().enumerate() {
        let key = if strict { &pair.full } else { &pair.low };
        index.entry(key.as_str()).or_insert(i);
    }

    let mut buckets: Vec<Vec<Span>> = vec![Vec::new(); order.len()];
    for span in spans {
        let key = if strict {
            span.trace_id.as_str()
        } else {
            ids::low64(&span.trace_id)
        };
        if let Some(&i) = index.get(key) {
            buckets[i].push(span);
        }
    }

    let mut traces: Vec<Vec<Span>> = buckets.into_iter().filter(|b| !b.is_empty()).collect();
    for trace in &mut traces {
        trace.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    }
    traces
}
