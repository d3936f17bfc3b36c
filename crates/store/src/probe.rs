use duckdb::Connection;
use tracebase_core::error::{Result, TracebaseError};

/// Which optional schema features the live database has. Computed once at
/// store construction and frozen; every query builder, the row assembler,
/// and the ingest path consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `annotations.ipv6` column exists.
    pub ipv6: bool,
    /// `dependencies.error_count` column exists.
    pub error_count: bool,
    /// The `dependencies` table exists at all; without it the read path
    /// reconstructs links from raw spans and ingest skips edge rows.
    pub pre_aggregated_dependencies: bool,
}

/// Probes the optional features with one minimal read each. A missing
/// relation or column clears the flag and warns once with the corrective
/// migration; any other failure class aborts construction, since silently
/// degrading on a transient error would corrupt later query construction.
pub fn probe(conn: &Connection) -> Result<Capabilities> {
    let pre_aggregated_dependencies = probe_feature(
        conn,
        "SELECT day FROM dependencies LIMIT 1",
        "dependency links will be reconstructed from raw spans \
         (execute: CREATE TABLE dependencies (day BIGINT NOT NULL, parent TEXT NOT NULL, \
         child TEXT NOT NULL, call_count BIGINT NOT NULL DEFAULT 0, \
         error_count BIGINT NOT NULL DEFAULT 0, UNIQUE (day, parent, child)))",
        "dependencies",
    )?;

    let error_count = probe_feature(
        conn,
        "SELECT error_count FROM dependencies LIMIT 1",
        "dependency links will not have error counts \
         (execute: ALTER TABLE dependencies ADD COLUMN error_count BIGINT)",
        "dependencies.error_count",
    )?;

    let ipv6 = probe_feature(
        conn,
        "SELECT ipv6 FROM annotations LIMIT 1",
        "ipv6 addresses will not be stored \
         (execute: ALTER TABLE annotations ADD COLUMN ipv6 TEXT)",
        "annotations.ipv6",
    )?;

    Ok(Capabilities {
        ipv6,
        error_count,
        pre_aggregated_dependencies,
    })
}

fn probe_feature(conn: &Connection, sql: &str, hint: &str, feature: &str) -> Result<bool> {
    match conn.prepare(sql).and_then(|mut stmt| {
        stmt.query([])?.next()?;
        Ok(())
    }) {
        Ok(()) => Ok(true),
        Err(err) if is_undefined(&err) => {
            tracing::warn!(feature, "schema is missing an optional feature; {hint}");
            Ok(false)
        }
        Err(err) => Err(TracebaseError::Probe(format!(
            "probing {feature} failed: {err}"
        ))),
    }
}

/// Whether an error means "relation or column undefined", as opposed to a
/// connectivity, syntax, or constraint failure. DuckDB reports the former
/// as catalog or binder errors.
pub fn is_undefined(err: &duckdb::Error) -> bool {
    let msg = err.to_string();
    (msg.contains("Catalog Error") || msg.contains("Binder Error"))
        && (msg.contains("does not exist")
            || msg.contains("not found")
            || msg.contains("does not have a column"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::schema::SCHEMA_SQL;

    fn bare_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn full_schema_probes_all_features_present() {
        let conn = bare_conn();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let caps = probe(&conn).unwrap();
        assert!(caps.ipv6);
        assert!(caps.error_count);
        assert!(caps.pre_aggregated_dependencies);
    }

    #[test]
    fn missing_column_reads_as_absent() {
        let conn = bare_conn();
        conn.execute_batch(
            "CREATE TABLE spans (span_row_id BIGINT, trace_id TEXT, id TEXT, parent_id TEXT,
               kind TEXT, name TEXT, debug BOOLEAN, shared BOOLEAN,
               start_ts BIGINT, duration BIGINT);
             CREATE TABLE annotations (span_row_id BIGINT, a_key TEXT, a_value TEXT, a_type INTEGER,
               a_timestamp BIGINT, service_name TEXT, ipv4 TEXT, port INTEGER);
             CREATE TABLE dependencies (day BIGINT, parent TEXT, child TEXT, call_count BIGINT);",
        )
        .unwrap();

        let caps = probe(&conn).unwrap();
        assert!(!caps.ipv6);
        assert!(!caps.error_count);
        assert!(caps.pre_aggregated_dependencies);
    }

    #[test]
    fn missing_table_clears_dependent_features() {
        let conn = bare_conn();
        conn.execute_batch(
            "CREATE TABLE annotations (span_row_id BIGINT, a_key TEXT, a_value TEXT, a_type INTEGER,
               a_timestamp BIGINT, service_name TEXT, ipv4 TEXT, ipv6 TEXT, port INTEGER);",
        )
        .unwrap();

        let caps = probe(&conn).unwrap();
        assert!(caps.ipv6);
        assert!(!caps.error_count);
        assert!(!caps.pre_aggregated_dependencies);
    }

    #[test]
    fn classifier_separates_undefined_from_other_errors() {
        let conn = bare_conn();
        conn.execute_batch("CREATE TABLE annotations (a_key TEXT);")
            .unwrap();

        let missing_table = conn
            .prepare("SELECT day FROM dependencies LIMIT 1")
            .err()
            .expect("table is missing");
        assert!(is_undefined(&missing_table));

        let missing_column = conn
            .prepare("SELECT ipv6 FROM annotations LIMIT 1")
            .err()
            .expect("column is missing");
        assert!(is_undefined(&missing_column));

        let syntax = conn.prepare("SELECT FROM WHERE").err().expect("bad sql");
        assert!(!is_undefined(&syntax));
    }
}
