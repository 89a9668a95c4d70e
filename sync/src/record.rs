//! Shared sync-record encodings.
//!
//! A node publishes at most `MAX_SHARED_SYNCED_INTERVALS_COUNT` intervals
//! from the top of its record, either as a length-prefixed binary list or
//! as a JSON array of `[end, start]` pairs, both descending by end offset.

use serde_json::json;

use crate::interval_set::IntervalSet;

/// Wire format of a shared sync record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    /// u32-BE count, then `(end_be_u64, start_be_u64)` pairs.
    Binary,
    /// JSON array of `[end, start]` pairs.
    Json,
}

/// Encode the top `limit` intervals of `record`, descending.
pub fn encode_record(record: &IntervalSet, limit: usize, format: RecordFormat) -> Vec<u8> {
    let intervals: Vec<(u64, u64)> = record.iter().rev().take(limit).collect();
    match format {
        RecordFormat::Binary => {
            let mut out = Vec::with_capacity(4 + intervals.len() * 16);
            out.extend_from_slice(&(intervals.len() as u32).to_be_bytes());
            for (start, end) in &intervals {
                out.extend_from_slice(&end.to_be_bytes());
                out.extend_from_slice(&start.to_be_bytes());
            }
            out
        }
        RecordFormat::Json => {
            let pairs: Vec<_> = intervals
                .iter()
                .map(|(start, end)| json!([end.to_string(), start.to_string()]))
                .collect();
            serde_json::to_vec(&pairs).expect("interval list is always serializable")
        }
    }
}

/// Decode a shared sync record back into `(start, end)` pairs.
pub fn decode_record(bytes: &[u8], format: RecordFormat) -> Option<Vec<(u64, u64)>> {
    match format {
        RecordFormat::Binary => {
            if bytes.len() < 4 {
                return None;
            }
            let count = u32::from_be_bytes(bytes[..4].try_into().ok()?) as usize;
            let body = &bytes[4..];
            if body.len() != count * 16 {
                return None;
            }
            let mut pairs = Vec::with_capacity(count);
            for entry in body.chunks_exact(16) {
                let end = u64::from_be_bytes(entry[..8].try_into().ok()?);
                let start = u64::from_be_bytes(entry[8..].try_into().ok()?);
                if start >= end {
                    return None;
                }
                pairs.push((start, end));
            }
            Some(pairs)
        }
        RecordFormat::Json => {
            let raw: Vec<[String; 2]> = serde_json::from_slice(bytes).ok()?;
            let mut pairs = Vec::with_capacity(raw.len());
            for [end, start] in raw {
                let end: u64 = end.parse().ok()?;
                let start: u64 = start.parse().ok()?;
                if start >= end {
                    return None;
                }
                pairs.push((start, end));
            }
            Some(pairs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IntervalSet {
        IntervalSet::from_pairs([(0, 10), (20, 30), (40, 50)])
    }

    #[test]
    fn binary_round_trips_descending() {
        let bytes = encode_record(&sample(), 10, RecordFormat::Binary);
        let pairs = decode_record(&bytes, RecordFormat::Binary).unwrap();
        assert_eq!(pairs, vec![(40, 50), (20, 30), (0, 10)]);
    }

    #[test]
    fn json_round_trips_descending() {
        let bytes = encode_record(&sample(), 10, RecordFormat::Json);
        let pairs = decode_record(&bytes, RecordFormat::Json).unwrap();
        assert_eq!(pairs, vec![(40, 50), (20, 30), (0, 10)]);
    }

    #[test]
    fn limit_keeps_highest_offsets() {
        let bytes = encode_record(&sample(), 2, RecordFormat::Binary);
        let pairs = decode_record(&bytes, RecordFormat::Binary).unwrap();
        assert_eq!(pairs, vec![(40, 50), (20, 30)]);
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let mut bytes = encode_record(&sample(), 10, RecordFormat::Binary);
        bytes.pop();
        assert!(decode_record(&bytes, RecordFormat::Binary).is_none());
    }

    #[test]
    fn empty_record_encodes_empty() {
        let empty = IntervalSet::new();
        let pairs =
            decode_record(&encode_record(&empty, 10, RecordFormat::Json), RecordFormat::Json)
                .unwrap();
        assert!(pairs.is_empty());
    }
}
