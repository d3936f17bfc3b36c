use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracebaseError};

/// Criteria for a trace search.
///
/// `end_ts` and `lookback` are milliseconds (the window is
/// `[end_ts - lookback, end_ts]`); durations are microseconds, matching the
/// span model. An empty tag value means "key exists". `limit` caps the
/// number of traces returned, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryCriteria {
    pub service_name: Option<String>,
    /// Not supported by the column set; a query carrying it fails fast.
    pub remote_service_name: Option<String>,
    pub span_name: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
    pub end_ts: i64,
    pub lookback: i64,
    pub limit: usize,
}

impl Default for QueryCriteria {
    fn default() -> Self {
        Self {
            service_name: None,
            remote_service_name: None,
            span_name: None,
            tags: BTreeMap::new(),
            min_duration: None,
            max_duration: None,
            end_ts: 0,
            lookback: 0,
            limit: 10,
        }
    }
}

impl QueryCriteria {
    pub fn validate(&self) -> Result<()> {
        if self.end_ts <= 0 {
            return Err(TracebaseError::InvalidArgument(
                "endTs should be positive, in epoch milliseconds".to_string(),
            ));
        }
        if self.lookback <= 0 {
            return Err(TracebaseError::InvalidArgument(
                "lookback should be positive, in milliseconds".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(TracebaseError::InvalidArgument(
                "limit should be positive".to_string(),
            ));
        }
        if let Some(min) = self.min_duration {
            if min <= 0 {
                return Err(TracebaseError::InvalidArgument(
                    "minDuration should be positive, in microseconds".to_string(),
                ));
            }
            if let Some(max) = self.max_duration
                && max < min
            {
                return Err(TracebaseError::InvalidArgument(
                    "maxDuration should be at least minDuration".to_string(),
                ));
            }
        } else if self.max_duration.is_some() {
            return Err(TracebaseError::InvalidArgument(
                "maxDuration is only valid together with minDuration".to_string(),
            ));
        }
        Ok(())
    }
}
