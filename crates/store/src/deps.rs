use std::collections::{BTreeMap, HashMap};

use duckdb::{Connection, params_from_iter};
use tracebase_core::error::{Result, TracebaseError};
use tracebase_core::linker::{self, DependencyLinker};
use tracebase_core::model::{DependencyLink, Endpoint, Span, SpanKind};
use tracebase_core::time;

use crate::Store;
use crate::builder;
use crate::query::fetch_strings;
use crate::schema::{Schema, TYPE_TAG};

impl Store {
    /// Service dependency links for the window ending at `end_ts` (epoch
    /// millis) and reaching `lookback` millis back. Day-granular: the
    /// window widens to whole UTC days, matching the bucketing of the
    /// pre-aggregated table.
    ///
    /// When the dependencies table exists its rows are read and merged;
    /// otherwise links are reconstructed from span trees, streamed one
    /// trace at a time.
    pub fn get_dependencies(&self, end_ts: i64, lookback: i64) -> Result<Vec<DependencyLink>> {
        if end_ts <= 0 {
            return Err(TracebaseError::InvalidArgument(
                "endTs should be positive, in epoch milliseconds".to_string(),
            ));
        }
        if lookback <= 0 {
            return Err(TracebaseError::InvalidArgument(
                "lookback should be positive, in milliseconds".to_string(),
            ));
        }

        let days = time::epoch_days(end_ts, lookback);
        let Some(window) = time::micros_window(&days) else {
            return Ok(Vec::new());
        };

        let conn = self.conn()?;
        if self.schema.capabilities.pre_aggregated_dependencies {
            aggregated_links(&conn, &self.schema, &days, window)
        } else {
            reconstructed_links(&conn, self.schema.strict_trace_id, window)
        }
    }
}

fn aggregated_links(
    conn: &Connection,
    schema: &Schema,
    days: &[i64],
    window: (i64, i64),
) -> Result<Vec<DependencyLink>> {
    let query = builder::dependency_links(schema, days);
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare dependency query failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })
        .map_err(|e| TracebaseError::Store(format!("query dependencies failed: {e}")))?;

    let mut link_rows = Vec::new();
    for row in rows {
        link_rows.push(
            row.map_err(|e| TracebaseError::Store(format!("map dependency row failed: {e}")))?,
        );
    }
    if link_rows.is_empty() {
        return Ok(Vec::new());
    }

    // Rows written before links were service-keyed may carry trace ids in
    // the parent and child columns; anything the lookup cannot resolve
    // passes through unchanged.
    let services = trace_service_map(conn, window)?;
    Ok(linker::merge(link_rows.into_iter().map(
        |(parent, child, call_count, error_count)| DependencyLink {
            parent: resolve(&services, parent),
            child: resolve(&services, child),
            call_count: call_count.max(0) as u64,
            error_count: error_count.unwrap_or(0).max(0) as u64,
        },
    )))
}

fn trace_service_map(conn: &Connection, window: (i64, i64)) -> Result<HashMap<String, String>> {
    let query = builder::trace_services(window);
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare service lookup failed: {e}")))?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| TracebaseError::Store(format!("query service lookup failed: {e}")))?;

    let mut services = HashMap::new();
    for row in rows {
        let (trace_id, service) =
            row.map_err(|e| TracebaseError::Store(format!("map service row failed: {e}")))?;
        services.entry(trace_id).or_insert(service);
    }
    Ok(services)
}

fn resolve(services: &HashMap<String, String>, name: String) -> String {
    services.get(&name).cloned().unwrap_or(name)
}

fn reconstructed_links(
    conn: &Connection,
    strict: bool,
    window: (i64, i64),
) -> Result<Vec<DependencyLink>> {
    let trace_ids = fetch_strings(conn, builder::trace_ids_in_window(window))?;
    if trace_ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = builder::linker_rows(&trace_ids);
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| TracebaseError::Store(format!("prepare linker query failed: {e}")))?;
    let mut rows = stmt
        .query(params_from_iter(query.params.iter()))
        .map_err(|e| TracebaseError::Store(format!("query linker rows failed: {e}")))?;

    let mut grouper = TraceGrouper::new(strict);
    while let Some(row) = rows
        .next()
        .map_err(|e| TracebaseError::Store(format!("advance linker cursor failed: {e}")))?
    {
        grouper.push(LinkerRow {
            trace_id_low: row.get(0).map_err(row_err)?,
            trace_id: row.get(1).map_err(row_err)?,
            id: row.get(2).map_err(row_err)?,
            parent_id: row.get(3).map_err(row_err)?,
            kind: row.get(4).map_err(row_err)?,
            shared: row.get(5).map_err(row_err)?,
            a_key: row.get(6).map_err(row_err)?,
            a_type: row.get(7).map_err(row_err)?,
            service_name: row.get(8).map_err(row_err)?,
        });
    }
    Ok(grouper.finish().link())
}

fn row_err(e: duckdb::Error) -> TracebaseError {
    TracebaseError::Store(format!("map linker row failed: {e}"))
}

struct LinkerRow {
    trace_id_low: String,
    trace_id: String,
    id: String,
    parent_id: Option<String>,
    kind: Option<String>,
    shared: Option<bool>,
    a_key: Option<String>,
    a_type: Option<i32>,
    service_name: Option<String>,
}

struct PendingSpan {
    parent_id: Option<String>,
    shared: bool,
    service: Option<String>,
    error: bool,
}

/// Folds the ordered linker cursor into one trace at a time. The cursor
/// sorts on the grouping key, so a key change means the previous trace is
/// complete and can be linked before the next one accumulates.
struct TraceGrouper {
    strict: bool,
    linker: DependencyLinker,
    current: Option<String>,
    pending: BTreeMap<(String, String, String), PendingSpan>,
}

impl TraceGrouper {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            linker: DependencyLinker::new(),
            current: None,
            pending: BTreeMap::new(),
        }
    }

    fn push(&mut self, row: LinkerRow) {
        let LinkerRow {
            trace_id_low,
            trace_id,
            id,
            parent_id,
            kind,
            shared,
            a_key,
            a_type,
            service_name,
        } = row;

        let group = if self.strict {
            trace_id.clone()
        } else {
            trace_id_low
        };
        if self.current.as_deref() != Some(group.as_str()) {
            self.flush();
            self.current = Some(group);
        }

        let entry = self
            .pending
            .entry((trace_id, id, kind.unwrap_or_default()))
            .or_insert_with(|| PendingSpan {
                parent_id,
                shared: shared.unwrap_or(false),
                service: None,
                error: false,
            });
        if entry.service.is_none() {
            if let Some(service) = service_name.filter(|s| !s.is_empty()) {
                entry.service = Some(service);
            }
        }
        if a_type == Some(TYPE_TAG) && a_key.as_deref() == Some("error") {
            entry.error = true;
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut trace = Vec::with_capacity(self.pending.len());
        for ((trace_id, id, kind_raw), pending) in std::mem::take(&mut self.pending) {
            let mut span = Span {
                trace_id,
                id,
                parent_id: pending.parent_id.filter(|p| !p.is_empty() && *p != "0"),
                kind: kind_raw.parse::<SpanKind>().ok(),
                shared: pending.shared,
                local_endpoint: pending.service.map(|service_name| Endpoint {
                    service_name,
                    ipv4: None,
                    ipv6: None,
                    port: None,
                }),
                ..Span::default()
            };
            if pending.error {
                span.tags.insert("error".to_string(), String::new());
            }
            trace.push(span);
        }
        self.linker.put_trace(&trace);
    }

    fn finish(mut self) -> DependencyLinker {
        self.flush();
        self.linker
    }
}
