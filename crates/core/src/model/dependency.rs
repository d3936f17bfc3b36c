use serde::{Deserialize, Serialize};

/// An aggregated edge of the service dependency graph: how many calls (and
/// how many errored) flowed from one service to another inside a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
    /// Zero when the backing store cannot count errors.
    #[serde(default)]
    pub error_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_counts_in_camel_case() {
        let link = DependencyLink {
            parent: "api".into(),
            child: "cache".into(),
            call_count: 3,
            error_count: 1,
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["parent"], "api");
        assert_eq!(json["callCount"], 3);
        assert_eq!(json["errorCount"], 1);
    }
}
