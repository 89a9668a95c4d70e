use proptest::prelude::*;

use loom_sync::interval_set::IntervalSet;
use loom_sync::record::{decode_record, encode_record, RecordFormat};

/// A strategy producing a list of small raw intervals, possibly
/// overlapping.
fn raw_intervals() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..2_000, 1u64..200), 0..60)
        .prop_map(|pairs| pairs.into_iter().map(|(s, len)| (s, s + len)).collect())
}

fn build(pairs: &[(u64, u64)]) -> IntervalSet {
    IntervalSet::from_pairs(pairs.iter().copied())
}

proptest! {
    /// After any sequence of adds, intervals are disjoint, non-touching,
    /// and sorted.
    #[test]
    fn add_keeps_intervals_disjoint(pairs in raw_intervals()) {
        let set = build(&pairs);
        let intervals: Vec<(u64, u64)> = set.iter().collect();
        for window in intervals.windows(2) {
            prop_assert!(window[0].1 < window[1].0);
        }
        for (s, e) in intervals {
            prop_assert!(s < e);
        }
    }

    /// Membership after adds matches the union of the raw intervals.
    #[test]
    fn is_inside_matches_union(pairs in raw_intervals(), probe in 0u64..2_300) {
        let set = build(&pairs);
        let expected = pairs.iter().any(|&(s, e)| s < probe && probe <= e);
        prop_assert_eq!(set.is_inside(probe), expected);
    }

    /// Deleting a range removes exactly its offsets and nothing else.
    #[test]
    fn delete_removes_exactly_the_range(
        pairs in raw_intervals(),
        del_start in 0u64..2_200,
        del_len in 1u64..300,
    ) {
        let mut set = build(&pairs);
        let before = set.clone();
        let del_end = del_start + del_len;
        set.delete(del_start, del_end);
        for probe in (0u64..2_600).step_by(7) {
            let expected = if del_start < probe && probe <= del_end {
                false
            } else {
                before.is_inside(probe)
            };
            prop_assert_eq!(set.is_inside(probe), expected);
        }
    }

    /// outer_join(a, b) covers exactly the offsets in b but not in a.
    #[test]
    fn outer_join_is_set_difference(a in raw_intervals(), b in raw_intervals()) {
        let a = build(&a);
        let b = build(&b);
        let diff = a.outer_join(&b);
        for probe in (0u64..2_600).step_by(3) {
            prop_assert_eq!(
                diff.is_inside(probe),
                b.is_inside(probe) && !a.is_inside(probe)
            );
        }
    }

    /// Compaction is lossless: deleting the swallowed gaps restores the
    /// original set, and the count honours the target.
    #[test]
    fn compaction_is_lossless(pairs in raw_intervals(), max_count in 1usize..20) {
        let mut set = build(&pairs);
        let before = set.clone();
        let swallowed = set.compact(max_count);
        prop_assert!(set.count() <= max_count);
        let mut restored = set.clone();
        for (s, e) in &swallowed {
            restored.delete(*s, *e);
        }
        prop_assert_eq!(restored, before.clone());
        // The swallowed span is exactly the growth of the set.
        let swallowed_span: u64 = swallowed.iter().map(|(s, e)| e - s).sum();
        prop_assert_eq!(set.sum(), before.sum() + swallowed_span);
    }

    /// cut(at) leaves no offset above `at`.
    #[test]
    fn cut_truncates(pairs in raw_intervals(), at in 0u64..2_300) {
        let mut set = build(&pairs);
        set.cut(at);
        for probe in (at + 1..at + 400).step_by(5) {
            prop_assert!(!set.is_inside(probe));
        }
    }

    /// Sync-record encodings round-trip in both formats.
    #[test]
    fn record_round_trips(pairs in raw_intervals()) {
        let set = build(&pairs);
        for format in [RecordFormat::Binary, RecordFormat::Json] {
            let encoded = encode_record(&set, usize::MAX, format);
            let decoded = decode_record(&encoded, format).expect("decodes");
            let expected: Vec<(u64, u64)> = set.iter().rev().collect();
            prop_assert_eq!(&decoded, &expected);
        }
    }
}
