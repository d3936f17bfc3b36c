use duckdb::types::Value;
use tracebase_core::error::{Result, TracebaseError};
use tracebase_core::ids::TraceIdPair;
use tracebase_core::query::QueryCriteria;

use crate::schema::{Schema, TYPE_LEGACY_BOOLEAN, TYPE_TAG};

/// A built query: SQL text plus positional parameters, ready to execute.
/// Builders construct these and nothing else; execution lives with the
/// store.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The three span-retrieval entry points. `ByTraceId` and `ByTraceIdSet`
/// build the span-row select directly; `ByCriteria` builds the trace-id
/// resolution query whose results the caller feeds back as a
/// `ByTraceIdSet`.
#[derive(Debug, Clone)]
pub enum SpanQuery {
    ByTraceId(TraceIdPair),
    ByTraceIdSet(Vec<TraceIdPair>),
    ByCriteria(QueryCriteria),
}

/// Matches a stored trace id against the low 64 bits of a pair, so rows
/// written under 64-bit and upgraded 128-bit ids reconcile.
const LOW_BITS_EXPR: &str =
    "CASE WHEN length(s.trace_id) = 32 THEN substr(s.trace_id, 17) ELSE s.trace_id END";

pub fn build(schema: &Schema, query: &SpanQuery) -> Result<SqlQuery> {
    match query {
        SpanQuery::ByTraceId(pair) => Ok(span_rows(schema, std::slice::from_ref(pair))),
        SpanQuery::ByTraceIdSet(pairs) => Ok(span_rows(schema, pairs)),
        SpanQuery::ByCriteria(criteria) => trace_id_query(criteria),
    }
}

fn span_rows(schema: &Schema, pairs: &[TraceIdPair]) -> SqlQuery {
    let (predicate, params) = trace_id_predicate(schema, pairs);
    SqlQuery {
        sql: format!(
            "SELECT {fields} FROM spans s WHERE {predicate} ORDER BY s.trace_id, s.start_ts",
            fields = schema.span_fields(),
        ),
        params,
    }
}

fn trace_id_predicate(schema: &Schema, pairs: &[TraceIdPair]) -> (String, Vec<Value>) {
    if pairs.is_empty() {
        return ("1 = 0".to_string(), Vec::new());
    }
    let params = pairs
        .iter()
        .map(|pair| {
            let id = if schema.strict_trace_id {
                &pair.full
            } else {
                &pair.low
            };
            Value::Text(id.clone())
        })
        .collect::<Vec<_>>();
    let column = if schema.strict_trace_id {
        "s.trace_id"
    } else {
        LOW_BITS_EXPR
    };
    (
        format!("{column} IN ({})", placeholders(pairs.len())),
        params,
    )
}

/// Phase one of a criteria search: resolve the trace ids of the most recent
/// matching traces. Spans join the annotation table once as the base, plus
/// one uniquely aliased copy per tag predicate so that multiple tag
/// conditions never share a row.
fn trace_id_query(criteria: &QueryCriteria) -> Result<SqlQuery> {
    if let Some(remote) = &criteria.remote_service_name {
        return Err(TracebaseError::InvalidArgument(format!(
            "remoteService={remote} unsupported due to missing column spans.remote_service_name"
        )));
    }
    criteria.validate()?;

    let service = criteria.service_name.as_deref().map(str::to_lowercase);

    let mut joins = String::new();
    let mut params: Vec<Value> = Vec::new();
    for (i, (key, value)) in criteria.tags.iter().enumerate() {
        let alias = format!("a{i}");
        let mut on = format!(
            "{join} AND {alias}.a_key = ?",
            join = join_on_span(&alias)
        );
        params.push(Value::Text(key.clone()));
        if !value.is_empty() {
            on.push_str(&format!(
                " AND {alias}.a_type = {TYPE_TAG} AND {alias}.a_value = ?"
            ));
            params.push(Value::Text(value.clone()));
        }
        if let Some(service) = &service {
            on.push_str(&format!(" AND {alias}.service_name = ?"));
            params.push(Value::Text(service.clone()));
        }
        joins.push_str(&format!("\n   JOIN annotations {alias} ON {on}"));
    }

    let mut where_parts = vec!["s.start_ts BETWEEN ? AND ?".to_string()];
    let end_ts = criteria.end_ts * 1000;
    params.push(Value::BigInt(end_ts - criteria.lookback * 1000));
    params.push(Value::BigInt(end_ts));

    if let Some(service) = &service {
        where_parts.push(local_service_name_condition("a"));
        where_parts.push("a.service_name = ?".to_string());
        params.push(Value::Text(service.clone()));
    }
    if let Some(name) = &criteria.span_name {
        where_parts.push("s.name = ?".to_string());
        params.push(Value::Text(name.to_lowercase()));
    }
    match (criteria.min_duration, criteria.max_duration) {
        (Some(min), Some(max)) => {
            where_parts.push("s.duration BETWEEN ? AND ?".to_string());
            params.push(Value::BigInt(min));
            params.push(Value::BigInt(max));
        }
        (Some(min), None) => {
            where_parts.push("s.duration >= ?".to_string());
            params.push(Value::BigInt(min));
        }
        _ => {}
    }

    Ok(SqlQuery {
        sql: format!(
            "SELECT s.trace_id, MAX(s.start_ts) AS latest_ts\n \
             FROM spans s\n   JOIN annotations a ON {base_join}{joins}\n \
             WHERE {where_sql}\n \
             GROUP BY s.trace_id\n \
             ORDER BY latest_ts DESC\n \
             LIMIT {limit}",
            base_join = join_on_span("a"),
            where_sql = where_parts.join(" AND "),
            limit = criteria.limit,
        ),
        params,
    })
}

/// Annotation rows for a page of span row ids, ordered so the assembler's
/// first-row-wins endpoint choice is deterministic.
pub fn annotation_rows(schema: &Schema, span_row_ids: &[i64]) -> SqlQuery {
    if span_row_ids.is_empty() {
        return SqlQuery {
            sql: format!(
                "SELECT {fields} FROM annotations a WHERE 1 = 0",
                fields = schema.annotation_fields()
            ),
            params: Vec::new(),
        };
    }
    SqlQuery {
        sql: format!(
            "SELECT {fields} FROM annotations a WHERE a.span_row_id IN ({ids}) \
             ORDER BY a.span_row_id, a.a_timestamp, a.a_key",
            fields = schema.annotation_fields(),
            ids = placeholders(span_row_ids.len()),
        ),
        params: span_row_ids.iter().map(|id| Value::BigInt(*id)).collect(),
    }
}

pub fn service_names() -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT DISTINCT a.service_name FROM annotations a WHERE {lsnc} \
             ORDER BY a.service_name",
            lsnc = local_service_name_condition("a"),
        ),
        params: Vec::new(),
    }
}

pub fn span_names(service_name: &str) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT DISTINCT s.name FROM spans s \
             JOIN annotations a ON {join} \
             WHERE {lsnc} AND a.service_name = ? AND s.name <> '' \
             ORDER BY s.name",
            join = join_on_span("a"),
            lsnc = local_service_name_condition("a"),
        ),
        params: vec![Value::Text(service_name.to_lowercase())],
    }
}

pub fn autocomplete_values(key: &str) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT DISTINCT a.a_value FROM annotations a \
             WHERE a.a_type = {TYPE_TAG} AND a.a_key = ? \
               AND a.a_value IS NOT NULL AND a.a_value <> '' \
             ORDER BY a.a_value"
        ),
        params: vec![Value::Text(key.to_string())],
    }
}

/// Pre-aggregated link rows for a set of day buckets.
pub fn dependency_links(schema: &Schema, days: &[i64]) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT {fields} FROM dependencies WHERE day IN ({days})",
            fields = schema.dependency_link_fields(),
            days = placeholders(days.len().max(1)),
        ),
        params: if days.is_empty() {
            vec![Value::BigInt(-1)]
        } else {
            days.iter().map(|d| Value::BigInt(*d)).collect()
        },
    }
}

/// Side lookup resolving trace ids to the service names seen in a window.
pub fn trace_services(window: (i64, i64)) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT DISTINCT s.trace_id, a.service_name FROM spans s \
             JOIN annotations a ON {join} \
             WHERE s.start_ts >= ? AND s.start_ts < ? AND {lsnc} \
             ORDER BY s.trace_id, a.service_name",
            join = join_on_span("a"),
            lsnc = local_service_name_condition("a"),
        ),
        params: vec![Value::BigInt(window.0), Value::BigInt(window.1)],
    }
}

pub fn trace_ids_in_window(window: (i64, i64)) -> SqlQuery {
    SqlQuery {
        sql: "SELECT DISTINCT s.trace_id FROM spans s \
              WHERE s.start_ts >= ? AND s.start_ts < ?"
            .to_string(),
        params: vec![Value::BigInt(window.0), Value::BigInt(window.1)],
    }
}

/// The reconstruction cursor: spans left-joined to annotations so spans
/// without tags stay in the tree, ordered by the low 64 bits of the trace
/// id so both spellings of a migrating trace arrive adjacent.
pub fn linker_rows(trace_ids: &[String]) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT DISTINCT {LOW_BITS_EXPR} AS trace_id_low, \
             s.trace_id, s.id, s.parent_id, s.kind, s.shared, \
             a.a_key, a.a_type, a.service_name \
             FROM spans s LEFT JOIN annotations a ON a.span_row_id = s.span_row_id \
             WHERE s.trace_id IN ({ids}) \
             ORDER BY trace_id_low, s.trace_id, s.id, s.kind",
            ids = placeholders(trace_ids.len().max(1)),
        ),
        params: if trace_ids.is_empty() {
            vec![Value::Text(String::new())]
        } else {
            trace_ids
                .iter()
                .map(|id| Value::Text(id.clone()))
                .collect()
        },
    }
}

fn join_on_span(alias: &str) -> String {
    format!("{alias}.span_row_id = s.span_row_id")
}

/// Rows that name the local service: non-empty and not the legacy boolean
/// type, which carries remote addresses.
fn local_service_name_condition(alias: &str) -> String {
    format!(
        "{alias}.service_name IS NOT NULL AND {alias}.service_name <> '' \
         AND {alias}.a_type <> {TYPE_LEGACY_BOOLEAN}"
    )
}

fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}
