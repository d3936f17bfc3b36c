use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::dependency::DependencyLink;
use crate::model::span::{Span, SpanKind};

/// Folds per-trace span trees into `(parent service, child service)` call
/// and error counts.
///
/// For every span with a known service, the nearest ancestor recorded under
/// a *different*, known service contributes one call (and one error when the
/// span carries an `error` tag). Same-service and service-less intermediates
/// are walked through, so purely local spans never produce edges. A shared
/// server span resolves the client span with the same id as its effective
/// parent, which is how an RPC recorded by both sides yields a single edge.
#[derive(Debug, Default)]
pub struct DependencyLinker {
    links: BTreeMap<(String, String), Counts>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    calls: u64,
    errors: u64,
}

impl DependencyLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes one trace's spans and accumulates its edges. Traces are
    /// independent; the order they are put in does not matter.
    pub fn put_trace(&mut self, trace: &[Span]) {
        let mut by_id: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, span) in trace.iter().enumerate() {
            by_id.entry(span.id.as_str()).or_default().push(idx);
        }

        for (idx, span) in trace.iter().enumerate() {
            let Some(child) = span.service_name() else {
                continue;
            };

            let mut visited = HashSet::from([idx]);
            let mut current = parent_of(trace, &by_id, idx);
            while let Some(ancestor_idx) = current {
                if !visited.insert(ancestor_idx) {
                    break;
                }
                let ancestor = &trace[ancestor_idx];
                match ancestor.service_name() {
                    Some(parent) if parent != child => {
                        let counts = self
                            .links
                            .entry((parent.to_string(), child.to_string()))
                            .or_default();
                        counts.calls += 1;
                        if span.is_error() {
                            counts.errors += 1;
                        }
                        break;
                    }
                    _ => current = parent_of(trace, &by_id, ancestor_idx),
                }
            }
        }
    }

    /// The accumulated links, ordered by `(parent, child)`.
    pub fn link(self) -> Vec<DependencyLink> {
        self.links
            .into_iter()
            .map(|((parent, child), counts)| DependencyLink {
                parent,
                child,
                call_count: counts.calls,
                error_count: counts.errors,
            })
            .collect()
    }
}

/// Resolves the tree position a walk continues from: the client half of a
/// shared span when there is one, otherwise the row the span's parent id
/// names. Rows recorded by both sides of an RPC share an id, so the lookup
/// prefers a server row with a known service, then any row with one.
fn parent_of(trace: &[Span], by_id: &HashMap<&str, Vec<usize>>, idx: usize) -> Option<usize> {
    let span = &trace[idx];

    if span.shared && span.kind == Some(SpanKind::Server) {
        if let Some(rows) = by_id.get(span.id.as_str()) {
            let client = rows
                .iter()
                .copied()
                .find(|&i| i != idx && trace[i].kind == Some(SpanKind::Client));
            if client.is_some() {
                return client;
            }
        }
    }

    let parent_id = span.parent_id.as_deref().filter(|p| !p.is_empty() && *p != "0")?;
    let rows = by_id.get(parent_id)?;
    rows.iter()
        .copied()
        .filter(|&i| i != idx)
        .find(|&i| trace[i].kind == Some(SpanKind::Server) && trace[i].service_name().is_some())
        .or_else(|| {
            rows.iter()
                .copied()
                .filter(|&i| i != idx)
                .find(|&i| trace[i].service_name().is_some())
        })
        .or_else(|| rows.iter().copied().find(|&i| i != idx))
}

/// Sums call and error counts per `(parent, child)` pair. Associative across
/// partitions: merging day buckets separately and then together yields the
/// same totals.
pub fn merge<I>(links: I) -> Vec<DependencyLink>
where
    I: IntoIterator<Item = DependencyLink>,
{
    let mut merged: BTreeMap<(String, String), Counts> = BTreeMap::new();
    for link in links {
        let counts = merged.entry((link.parent, link.child)).or_default();
        counts.calls += link.call_count;
        counts.errors += link.error_count;
    }
    merged
        .into_iter()
        .map(|((parent, child), counts)| DependencyLink {
            parent,
            child,
            call_count: counts.calls,
            error_count: counts.errors,
        })
        .collect()
}
