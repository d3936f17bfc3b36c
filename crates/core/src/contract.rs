use crate::error::Result;
use crate::model::dependency::DependencyLink;
use crate::model::span::Span;
use crate::query::QueryCriteria;

/// Read side of the storage contract the tracing pipeline consumes.
pub trait SpanStore {
    /// All spans of one trace, or empty if the id is unknown.
    fn get_trace(&self, trace_id: &str) -> Result<Vec<Span>>;

    /// Traces matching the criteria, most recent first, one `Vec<Span>` per
    /// trace.
    fn get_traces(&self, criteria: &QueryCriteria) -> Result<Vec<Vec<Span>>>;

    /// Distinct local service names, alphabetical.
    fn get_service_names(&self) -> Result<Vec<String>>;

    /// Distinct span names recorded by a service, alphabetical.
    fn get_span_names(&self, service_name: &str) -> Result<Vec<String>>;

    /// Distinct remote service names called by a service. Stores without a
    /// remote-service column return empty.
    fn get_remote_service_names(&self, service_name: &str) -> Result<Vec<String>>;

    /// The service dependency graph over `[end_ts - lookback, end_ts]`,
    /// both in epoch milliseconds.
    fn get_dependencies(&self, end_ts: i64, lookback: i64) -> Result<Vec<DependencyLink>>;

    /// Distinct values seen for an autocomplete-whitelisted tag key.
    fn get_autocomplete_values(&self, key: &str) -> Result<Vec<String>>;
}

/// Write side of the storage contract.
pub trait SpanConsumer {
    /// Stores a batch of spans. Re-accepting an identical span is a no-op;
    /// any failure aborts the whole batch.
    fn accept(&self, spans: &[Span]) -> Result<()>;
}
