//! Window arithmetic for 15-minute up/down markets
//!
//! Every tradable market instance is keyed to a 900-second window aligned
//! to the epoch. Slugs are deterministic so the current window's market can
//! be looked up without searching.

/// Window length in seconds
pub const WINDOW_SECS: i64 = 900;

/// Start of the window containing `ts`
pub fn current_window_ts(ts: i64) -> i64 {
    ts - ts.rem_euclid(WINDOW_SECS)
}

/// Start of the window after the one containing `ts`
pub fn next_window_ts(ts: i64) -> i64 {
    current_window_ts(ts) + WINDOW_SECS
}

/// Deterministic market slug for an asset window,
/// e.g. `btc-updown-15m-1700000100`
pub fn build_window_slug(asset: crate::types::Asset, window_ts: i64) -> String {
    format!("{}-updown-15m-{}", asset.slug_prefix(), window_ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;

    #[test]
    fn test_current_window_examples() {
        assert_eq!(current_window_ts(1_700_000_123), 1_700_000_100);
        assert_eq!(current_window_ts(1_700_000_100), 1_700_000_100);
        assert_eq!(current_window_ts(1_700_000_999), 1_700_000_100);
    }

    #[test]
    fn test_window_idempotent_within_bucket() {
        let base = current_window_ts(1_700_000_123);
        for offset in 0..WINDOW_SECS {
            assert_eq!(current_window_ts(base + offset), base);
        }
    }

    #[test]
    fn test_next_window_is_current_plus_900() {
        for ts in [0, 1_700_000_123, 1_700_000_899, 1_700_000_900] {
            assert_eq!(next_window_ts(ts), current_window_ts(ts) + 900);
        }
    }

    #[test]
    fn test_build_window_slug() {
        assert_eq!(
            build_window_slug(Asset::BTC, 1_700_000_100),
            "btc-updown-15m-1700000100"
        );
        assert_eq!(
            build_window_slug(Asset::SOL, 1_700_000_100),
            "sol-updown-15m-1700000100"
        );
    }
}
