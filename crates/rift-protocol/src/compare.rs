//! Version comparison for TIE headers and prefix sequences
//!
//! Both comparators answer "is the first argument newer, older or the same
//! as the second" and are antisymmetric: swapping the arguments inverts the
//! answer.

use std::cmp::Ordering;

use crate::types::{PrefixSequence, TieHeader};

/// Relative age of the first operand with respect to the second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderAge {
    Newer,
    Older,
    Same,
}

impl HeaderAge {
    pub fn invert(self) -> Self {
        match self {
            HeaderAge::Newer => HeaderAge::Older,
            HeaderAge::Older => HeaderAge::Newer,
            HeaderAge::Same => HeaderAge::Same,
        }
    }

    fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Greater => HeaderAge::Newer,
            Ordering::Less => HeaderAge::Older,
            Ordering::Equal => HeaderAge::Same,
        }
    }
}

/// Compare two headers of the same TIEID.
///
/// Higher sequence number wins outright. With equal sequence numbers,
/// lifetimes closer than `lifetime_diff2ignore` seconds are the same age,
/// otherwise the longer remaining lifetime is newer. Origination time is
/// not consulted.
pub fn compare_tie_headers(a: &TieHeader, b: &TieHeader, lifetime_diff2ignore: u32) -> HeaderAge {
    debug_assert_eq!(a.tie_id, b.tie_id, "comparing headers of different TIEs");

    match a.seq_nr.cmp(&b.seq_nr) {
        Ordering::Equal => {}
        other => return HeaderAge::from_ordering(other),
    }

    let diff = a.remaining_lifetime.abs_diff(b.remaining_lifetime);
    if diff == 0 || diff < lifetime_diff2ignore {
        return HeaderAge::Same;
    }
    HeaderAge::from_ordering(a.remaining_lifetime.cmp(&b.remaining_lifetime))
}

/// Serial-number comparison of 8-bit transaction ids.
///
/// `a` is newer when it is ahead of `b` by 1..=127 modulo 256. A distance of
/// exactly 128 is ambiguous and yields `None`, as does equality.
pub fn compare_transaction_ids(a: u8, b: u8) -> Option<HeaderAge> {
    match a.wrapping_sub(b) {
        0 | 128 => None,
        1..=127 => Some(HeaderAge::Newer),
        _ => Some(HeaderAge::Older),
    }
}

/// Compare two sequences attached to the same prefix.
///
/// Timestamps further apart than `window_ms` are decided by the timestamp
/// alone. Within the window the transaction id decides; when either id is
/// absent, or the ids are equal or exactly half the space apart, the
/// timestamp decides after all.
pub fn compare_prefix_sequences(a: &PrefixSequence, b: &PrefixSequence, window_ms: u64) -> HeaderAge {
    let a_nanos = a.timestamp.as_nanos();
    let b_nanos = b.timestamp.as_nanos();
    let window_nanos = window_ms as u128 * 1_000_000;

    if a_nanos.abs_diff(b_nanos) < window_nanos {
        if let (Some(a_tid), Some(b_tid)) = (a.transaction_id, b.transaction_id) {
            if let Some(age) = compare_transaction_ids(a_tid, b_tid) {
                return age;
            }
        }
    }

    HeaderAge::from_ordering(a_nanos.cmp(&b_nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LIFETIME_DIFF2IGNORE, PREFIX_SEQUENCE_WINDOW_MS};
    use crate::types::{Direction, IeeeTimestamp, SystemId, TieId, TieType};

    fn header(seq_nr: u32, lifetime: u32) -> TieHeader {
        let tie_id = TieId::new(Direction::South, SystemId::new(9).unwrap(), TieType::Node, 1);
        TieHeader::new(tie_id, seq_nr, lifetime)
    }

    fn compare(a: &TieHeader, b: &TieHeader) -> HeaderAge {
        compare_tie_headers(a, b, LIFETIME_DIFF2IGNORE)
    }

    fn seq(sec: u64, nsec: u32, tid: Option<u8>) -> PrefixSequence {
        PrefixSequence::new(IeeeTimestamp::new(sec, Some(nsec)), tid)
    }

    #[test]
    fn test_higher_sequence_wins() {
        assert_eq!(compare(&header(6, 10), &header(5, 604_800)), HeaderAge::Newer);
        assert_eq!(compare(&header(5, 604_800), &header(6, 10)), HeaderAge::Older);
    }

    #[test]
    fn test_sequence_compared_unsigned() {
        assert_eq!(
            compare(&header(0x8000_0000, 100), &header(1, 100)),
            HeaderAge::Newer
        );
    }

    #[test]
    fn test_compare_with_self_is_same() {
        let h = header(3, 1234);
        assert_eq!(compare(&h, &h), HeaderAge::Same);
    }

    #[test]
    fn test_lifetime_threshold() {
        assert_eq!(compare(&header(5, 600), &header(5, 301)), HeaderAge::Same);
        assert_eq!(compare(&header(5, 600), &header(5, 299)), HeaderAge::Newer);
        assert_eq!(compare(&header(5, 299), &header(5, 600)), HeaderAge::Older);
    }

    #[test]
    fn test_lifetime_far_apart() {
        assert_eq!(compare(&header(5, 600), &header(5, 250)), HeaderAge::Newer);
        assert_eq!(compare(&header(5, 600), &header(5, 350)), HeaderAge::Same);
    }

    #[test]
    fn test_zero_threshold_still_same_for_equal() {
        assert_eq!(
            compare_tie_headers(&header(1, 50), &header(1, 50), 0),
            HeaderAge::Same
        );
        assert_eq!(
            compare_tie_headers(&header(1, 51), &header(1, 50), 0),
            HeaderAge::Newer
        );
    }

    #[test]
    fn test_header_comparison_antisymmetric() {
        let headers = [
            header(0, 0),
            header(1, 0),
            header(1, 299),
            header(1, 300),
            header(1, 301),
            header(1, 604_800),
            header(2, 1),
            header(u32::MAX, 0),
        ];
        for a in &headers {
            assert_eq!(compare(a, a), HeaderAge::Same);
            for b in &headers {
                assert_eq!(compare(a, b), compare(b, a).invert(), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_transaction_id_wraparound() {
        assert_eq!(compare_transaction_ids(1, 255), Some(HeaderAge::Newer));
        assert_eq!(compare_transaction_ids(255, 1), Some(HeaderAge::Older));
        assert_eq!(compare_transaction_ids(10, 5), Some(HeaderAge::Newer));
        assert_eq!(compare_transaction_ids(5, 5), None);
        assert_eq!(compare_transaction_ids(128, 0), None);
    }

    #[test]
    fn test_prefix_sequence_far_apart_uses_timestamp() {
        let earlier = seq(100, 0, Some(200));
        let later = seq(100, 300_000_000, Some(1));
        assert_eq!(
            compare_prefix_sequences(&later, &earlier, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Newer
        );
        assert_eq!(
            compare_prefix_sequences(&earlier, &later, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Older
        );
    }

    #[test]
    fn test_prefix_sequence_within_window_uses_transaction_id() {
        let a = seq(100, 0, Some(7));
        let b = seq(100, 150_000_000, Some(6));
        assert_eq!(
            compare_prefix_sequences(&a, &b, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Newer
        );
        assert_eq!(
            compare_prefix_sequences(&b, &a, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Older
        );
    }

    #[test]
    fn test_prefix_sequence_missing_transaction_id() {
        let a = seq(100, 0, None);
        let b = seq(100, 100_000_000, Some(9));
        assert_eq!(
            compare_prefix_sequences(&a, &b, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Older
        );
        assert_eq!(
            compare_prefix_sequences(&a, &a, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Same
        );
    }

    #[test]
    fn test_prefix_sequence_window_boundary() {
        let a = seq(100, 0, Some(9));
        let b = seq(100, 200_000_000, Some(1));
        assert_eq!(
            compare_prefix_sequences(&a, &b, PREFIX_SEQUENCE_WINDOW_MS),
            HeaderAge::Older
        );
    }
}
