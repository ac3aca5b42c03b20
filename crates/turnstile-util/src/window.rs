//! Sliding-window helpers for frequency caps
//!
//! Event logs are oldest-first lists of epoch-millisecond timestamps. They are
//! persisted as a comma-joined string and pruned to a lifespan on every read.

/// One week in milliseconds
pub const WEEK_MS: i64 = 604_800_000;

/// Drop every timestamp older than `now - lifespan`.
///
/// Entries exactly `lifespan` old are kept.
pub fn prune_timestamps(timestamps: &[i64], lifespan_ms: i64, now_ms: i64) -> Vec<i64> {
    timestamps
        .iter()
        .copied()
        .filter(|&ts| now_ms.saturating_sub(ts) <= lifespan_ms)
        .collect()
}

/// Parse a comma-joined timestamp list, skipping anything that is not a number
pub fn parse_timestamps(value: &str) -> Vec<i64> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

pub fn join_timestamps(timestamps: &[i64]) -> String {
    timestamps
        .iter()
        .map(|ts| ts.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prune_keeps_recent_entries() {
        let now = 10 * WEEK_MS;
        let ts = vec![now - WEEK_MS - 1, now - WEEK_MS, now - 1_000, now];
        assert_eq!(
            prune_timestamps(&ts, WEEK_MS, now),
            vec![now - WEEK_MS, now - 1_000, now]
        );
    }

    #[test]
    fn test_parse_and_join() {
        assert_eq!(parse_timestamps("1,2,3"), vec![1, 2, 3]);
        assert_eq!(parse_timestamps(""), Vec::<i64>::new());
        assert_eq!(parse_timestamps("1,,x,4"), vec![1, 4]);
        assert_eq!(join_timestamps(&[5, 6]), "5,6");
        assert_eq!(join_timestamps(&[]), "");
    }

    #[test]
    fn test_prune_tolerates_extreme_values() {
        let now = 10 * WEEK_MS;
        let stored = parse_timestamps(&format!("{},{},{}", i64::MIN, now, i64::MAX));
        assert_eq!(prune_timestamps(&stored, WEEK_MS, now), vec![now, i64::MAX]);
        assert_eq!(prune_timestamps(&[i64::MIN], WEEK_MS, i64::MAX), Vec::<i64>::new());
    }

    proptest! {
        #[test]
        fn prune_law(
            ts in proptest::collection::vec(0i64..2_000_000, 0..50),
            lifespan in 0i64..1_000_000,
            now in 0i64..2_000_000,
        ) {
            let kept = prune_timestamps(&ts, lifespan, now);
            for t in &kept {
                prop_assert!(now - t <= lifespan);
            }
            let expected = ts.iter().filter(|&&t| t >= now - lifespan).count();
            prop_assert_eq!(kept.len(), expected);
        }
    }
}
