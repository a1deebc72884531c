use crate::core::{SourceEstimate, SourceKind, TimestampMs};

/// A location signal the coordinator can poll once per tick
///
/// `snapshot` hands out an owned copy so a tick never observes a source
/// halfway through an update.
pub trait PositionSource {
    fn kind(&self) -> SourceKind;

    /// Latest estimate, or `None` if nothing arrived within `staleness_ms` of `now_ms`
    fn snapshot(&self, now_ms: TimestampMs, staleness_ms: u64) -> Option<SourceEstimate>;

    /// Discard all filter state; the next reading reseeds
    fn reset(&mut self);
}

/// True when a reading taken at `timestamp_ms` is still usable at `now_ms`
pub fn is_fresh(timestamp_ms: TimestampMs, now_ms: TimestampMs, staleness_ms: u64) -> bool {
    now_ms.saturating_sub(timestamp_ms) <= staleness_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_window() {
        assert!(is_fresh(1_000, 1_000, 0));
        assert!(is_fresh(1_000, 6_000, 5_000));
        assert!(!is_fresh(1_000, 6_001, 5_000));
        // Readings stamped after `now` are not stale
        assert!(is_fresh(2_000, 1_000, 0));
    }
}
