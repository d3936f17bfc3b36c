use duckdb::{Statement, params};
use tracebase_core::error::{Result, TracebaseError};
use tracebase_core::ids;
use tracebase_core::model::Span;
use tracebase_core::time;

use crate::Store;
use crate::probe::Capabilities;
use crate::schema::{LOCAL_COMPONENT_KEY, TYPE_ANNOTATION, TYPE_TAG};

const INSERT_SPAN: &str = "INSERT INTO spans \
     (trace_id, id, parent_id, kind, name, debug, shared, start_ts, duration) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT (trace_id, id, kind) DO NOTHING \
     RETURNING span_row_id";

const FIND_SPAN: &str =
    "SELECT span_row_id FROM spans WHERE trace_id = ? AND id = ? AND kind = ?";

const FIND_PARENT_SERVICE: &str = "SELECT a.service_name FROM spans s \
     JOIN annotations a ON a.span_row_id = s.span_row_id \
     WHERE s.trace_id = ? AND s.id = ? \
       AND a.service_name IS NOT NULL AND a.service_name <> '' AND a.a_type <> 0 \
     ORDER BY a.service_name LIMIT 1";

fn insert_annotation_sql(ipv6: bool) -> String {
    let (column, param) = if ipv6 { (", ipv6", ", ?") } else { ("", "") };
    format!(
        "INSERT INTO annotations \
         (span_row_id, a_key, a_value, a_type, a_timestamp, service_name, ipv4{column}, port) \
         VALUES (?, ?, ?, ?, ?, ?, ?{param}, ?) \
         ON CONFLICT (span_row_id, a_key, a_timestamp) DO NOTHING"
    )
}

fn insert_dependency_sql(error_count: bool) -> String {
    if error_count {
        "INSERT INTO dependencies (day, parent, child, call_count, error_count) \
         VALUES (?, ?, ?, 1, ?) \
         ON CONFLICT (day, parent, child) DO UPDATE SET \
           call_count = call_count + 1, \
           error_count = error_count + excluded.error_count"
            .to_string()
    } else {
        "INSERT INTO dependencies (day, parent, child, call_count) \
         VALUES (?, ?, ?, 1) \
         ON CONFLICT (day, parent, child) DO UPDATE SET \
           call_count = call_count + 1"
            .to_string()
    }
}

impl Store {
    /// Persists a batch of spans in one transaction. Re-delivery is safe:
    /// span and annotation writes are conflict-ignoring upserts, and the
    /// dependency counters only advance for spans this call actually
    /// inserted.
    pub fn accept(&self, spans: &[Span]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let capabilities = self.schema.capabilities;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| TracebaseError::Ingest(format!("begin batch failed: {e}")))?;

        {
            let mut insert_span = tx
                .prepare(INSERT_SPAN)
                .map_err(|e| TracebaseError::Ingest(format!("prepare insert span failed: {e}")))?;
            let mut find_span = tx
                .prepare(FIND_SPAN)
                .map_err(|e| TracebaseError::Ingest(format!("prepare find span failed: {e}")))?;
            let mut insert_annotation =
                tx.prepare(&insert_annotation_sql(capabilities.ipv6)).map_err(|e| {
                    TracebaseError::Ingest(format!("prepare insert annotation failed: {e}"))
                })?;

            let mut edges = Vec::new();
            for span in spans {
                if let Some(edge) = write_span(
                    &mut insert_span,
                    &mut find_span,
                    &mut insert_annotation,
                    capabilities,
                    span,
                )? {
                    edges.push(edge);
                }
            }

            // Edges resolve after the whole batch is in, so a parent that
            // arrives later in the same batch still names its service.
            if capabilities.pre_aggregated_dependencies && !edges.is_empty() {
                let mut insert_dependency = tx
                    .prepare(&insert_dependency_sql(capabilities.error_count))
                    .map_err(|e| {
                        TracebaseError::Ingest(format!("prepare insert dependency failed: {e}"))
                    })?;
                let mut find_parent_service =
                    tx.prepare(FIND_PARENT_SERVICE).map_err(|e| {
                        TracebaseError::Ingest(format!("prepare parent lookup failed: {e}"))
                    })?;
                for edge in edges {
                    write_edge(
                        &mut insert_dependency,
                        &mut find_parent_service,
                        capabilities,
                        edge,
                    )?;
                }
            }
        }

        tx.commit()
            .map_err(|e| TracebaseError::Ingest(format!("commit batch failed: {e}")))
    }
}

/// A freshly inserted span whose parent might live in another service.
struct PendingEdge {
    trace_id: String,
    parent_id: String,
    child_service: String,
    day: i64,
    error: i64,
}

fn write_span(
    insert_span: &mut Statement,
    find_span: &mut Statement,
    insert_annotation: &mut Statement,
    capabilities: Capabilities,
    span: &Span,
) -> Result<Option<PendingEdge>> {
    let trace_id = ids::normalize_trace_id(&span.trace_id)?;
    let id = span.id.to_lowercase();
    let parent_id = span
        .parent_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("0")
        .to_lowercase();
    let kind = span.kind.map(|k| k.as_str()).unwrap_or("");
    let name = span.name.to_lowercase();
    let start_ts = (span.timestamp != 0).then_some(span.timestamp);
    let duration = (span.duration != 0).then_some(span.duration);

    let inserted: Option<i64> = {
        let mut rows = insert_span
            .query(params![
                trace_id, id, parent_id, kind, name, span.debug, span.shared, start_ts, duration
            ])
            .map_err(|e| TracebaseError::Ingest(format!("insert span failed: {e}")))?;
        match rows
            .next()
            .map_err(|e| TracebaseError::Ingest(format!("read span row id failed: {e}")))?
        {
            Some(row) => Some(
                row.get(0)
                    .map_err(|e| TracebaseError::Ingest(format!("map span row id failed: {e}")))?,
            ),
            None => None,
        }
    };
    let (span_row_id, fresh) = match inserted {
        Some(row_id) => (row_id, true),
        None => {
            let row_id = find_span
                .query_row(params![trace_id, id, kind], |row| row.get::<_, i64>(0))
                .map_err(|e| TracebaseError::Ingest(format!("find span failed: {e}")))?;
            (row_id, false)
        }
    };

    let endpoint = EndpointColumns::of(span);
    for annotation in &span.annotations {
        write_annotation_row(
            insert_annotation,
            capabilities.ipv6,
            span_row_id,
            &annotation.value,
            None,
            TYPE_ANNOTATION,
            annotation.timestamp,
            &endpoint,
        )?;
    }
    for (key, value) in &span.tags {
        write_annotation_row(
            insert_annotation,
            capabilities.ipv6,
            span_row_id,
            key,
            Some(value.as_str()),
            TYPE_TAG,
            span.timestamp,
            &endpoint,
        )?;
    }
    // Spans with an endpoint but nothing else still need one annotation
    // row, or the service would be invisible to search.
    if span.annotations.is_empty() && span.tags.is_empty() && endpoint.service.is_some() {
        write_annotation_row(
            insert_annotation,
            capabilities.ipv6,
            span_row_id,
            LOCAL_COMPONENT_KEY,
            Some(""),
            TYPE_TAG,
            span.timestamp,
            &endpoint,
        )?;
    }

    if !fresh || span.timestamp == 0 {
        return Ok(None);
    }
    let Some(child_service) = endpoint.service.clone() else {
        return Ok(None);
    };
    if parent_id == "0" {
        return Ok(None);
    }
    Ok(Some(PendingEdge {
        trace_id,
        parent_id,
        child_service,
        day: time::midnight_utc_millis(span.timestamp / 1000),
        error: i64::from(span.is_error()),
    }))
}

fn write_edge(
    insert_dependency: &mut Statement,
    find_parent_service: &mut Statement,
    capabilities: Capabilities,
    edge: PendingEdge,
) -> Result<()> {
    let parent_service: Option<String> = {
        let mut rows = find_parent_service
            .query(params![edge.trace_id, edge.parent_id])
            .map_err(|e| TracebaseError::Ingest(format!("parent lookup failed: {e}")))?;
        match rows
            .next()
            .map_err(|e| TracebaseError::Ingest(format!("read parent service failed: {e}")))?
        {
            Some(row) => Some(row.get(0).map_err(|e| {
                TracebaseError::Ingest(format!("map parent service failed: {e}"))
            })?),
            None => None,
        }
    };

    let Some(parent_service) = parent_service.filter(|p| *p != edge.child_service) else {
        return Ok(());
    };
    if capabilities.error_count {
        insert_dependency
            .execute(params![edge.day, parent_service, edge.child_service, edge.error])
            .map_err(|e| TracebaseError::Ingest(format!("insert dependency failed: {e}")))?;
    } else {
        insert_dependency
            .execute(params![edge.day, parent_service, edge.child_service])
            .map_err(|e| TracebaseError::Ingest(format!("insert dependency failed: {e}")))?;
    }
    Ok(())
}

struct EndpointColumns {
    service: Option<String>,
    ipv4: Option<String>,
    ipv6: Option<String>,
    port: Option<i32>,
}

impl EndpointColumns {
    fn of(span: &Span) -> Self {
        let endpoint = span.local_endpoint.as_ref();
        Self {
            service: span.service_name().map(str::to_lowercase),
            ipv4: endpoint.and_then(|e| e.ipv4.clone()),
            ipv6: endpoint.and_then(|e| e.ipv6.clone()),
            port: endpoint.and_then(|e| e.port).map(i32::from),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_annotation_row(
    insert_annotation: &mut Statement,
    ipv6: bool,
    span_row_id: i64,
    key: &str,
    value: Option<&str>,
    a_type: i32,
    timestamp: i64,
    endpoint: &EndpointColumns,
) -> Result<()> {
    if ipv6 {
        insert_annotation
            .execute(params![
                span_row_id,
                key,
                value,
                a_type,
                timestamp,
                endpoint.service,
                endpoint.ipv4,
                endpoint.ipv6,
                endpoint.port,
            ])
            .map_err(|e| TracebaseError::Ingest(format!("insert annotation failed: {e}")))?;
    } else {
        insert_annotation
            .execute(params![
                span_row_id,
                key,
                value,
                a_type,
                timestamp,
                endpoint.service,
                endpoint.ipv4,
                endpoint.port,
            ])
            .map_err(|e| TracebaseError::Ingest(format!("insert annotation failed: {e}")))?;
    }
    Ok(())
}
