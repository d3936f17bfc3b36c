use crate::error::{Result, TracebaseError};

/// Validates and canonicalizes a trace id: lower-hex, left-padded to 16 or
/// 32 characters. A 128-bit id whose high half is all zeros collapses to its
/// 64-bit form so both spellings address the same trace.
pub fn normalize_trace_id(input: &str) -> Result<String> {
    if input.is_empty() || input.len() > 32 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TracebaseError::InvalidArgument(format!(
            "trace id should be lower-hex encoded with no prefix: {input}"
        )));
    }
    let lower = input.to_ascii_lowercase();
    let padded = if lower.len() <= 16 {
        format!("{lower:0>16}")
    } else {
        format!("{lower:0>32}")
    };
    if padded.len() == 32 && padded[..16].bytes().all(|b| b == b'0') {
        return Ok(padded[16..].to_string());
    }
    Ok(padded)
}

/// The low 64 bits of a trace id, as stored. Ids shorter than 128 bits are
/// already their own low half.
pub fn low64(trace_id: &str) -> &str {
    if trace_id.len() == 32 {
        &trace_id[16..]
    } else {
        trace_id
    }
}

/// A trace id in both the form it was stored under and its low 64 bits.
/// Queries match on the full form under strict trace-id rules and on the low
/// half otherwise, which is what lets 64-bit writers and upgraded 128-bit
/// writers of the same trace land in one result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceIdPair {
    pub full: String,
    pub low: String,
}

impl TraceIdPair {
    pub fn from_stored(full: impl Into<String>) -> Self {
        let full = full.into();
        let low = low64(&full).to_string();
        Self { full, low }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_ids() {
        assert_eq!(normalize_trace_id("a").unwrap(), "000000000000000a");
        assert_eq!(
            normalize_trace_id("48485A3953BB6124").unwrap(),
            "48485a3953bb6124"
        );
    }

    #[test]
    fn keeps_real_128_bit_ids() {
        let id = "463ac35c9f6413ad48485a3953bb6124";
        assert_eq!(normalize_trace_id(id).unwrap(), id);
    }

    #[test]
    fn collapses_zero_high_bits() {
        assert_eq!(
            normalize_trace_id("000000000000000048485a3953bb6124").unwrap(),
            "48485a3953bb6124"
        );
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(normalize_trace_id("").is_err());
        assert!(normalize_trace_id("0x48485a3953bb6124").is_err());
        assert!(normalize_trace_id("463ac35c9f6413ad48485a3953bb61245").is_err());
    }

    #[test]
    fn pair_carries_low_bits() {
        let pair = TraceIdPair::from_stored("463ac35c9f6413ad48485a3953bb6124");
        assert_eq!(pair.low, "48485a3953bb6124");

        let pair = TraceIdPair::from_stored("48485a3953bb6124");
        assert_eq!(pair.low, pair.full);
    }
}
