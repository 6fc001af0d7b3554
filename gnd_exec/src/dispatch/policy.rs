//! Dispatch decision

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use super::Snapshot;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Decide whether the current snapshot should be sent now.
///
/// A send is allowed only when nothing is in flight, and then only if the
/// value differs from the last one sent or the keep-alive interval has passed.
///
/// - `last_sent` of `None` never equals a real snapshot, so it always counts as
///   a change.
/// - `elapsed` of `None` means nothing has been sent yet and counts as overdue.
pub fn should_dispatch(
    current: &Snapshot,
    last_sent: Option<&Snapshot>,
    elapsed: Option<Duration>,
    min_send_interval: Duration,
    in_flight: bool,
) -> bool {
    if in_flight {
        return false;
    }

    let changed = last_sent != Some(current);
    let overdue = elapsed.map(|e| e >= min_send_interval).unwrap_or(true);

    changed || overdue
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[test]
    fn test_change_triggers_send() {
        let last = Snapshot::STOP;
        let current = Snapshot::new(100, 0);

        assert!(should_dispatch(
            &current,
            Some(&last),
            Some(Duration::from_millis(1)),
            INTERVAL,
            false
        ));
    }

    #[test]
    fn test_unchanged_waits_for_keep_alive() {
        let s = Snapshot::new(20, -20);

        assert!(!should_dispatch(&s, Some(&s), Some(Duration::from_millis(49)), INTERVAL, false));
        assert!(should_dispatch(&s, Some(&s), Some(Duration::from_millis(50)), INTERVAL, false));
        assert!(should_dispatch(&s, Some(&s), None, INTERVAL, false));
    }

    #[test]
    fn test_in_flight_always_blocks() {
        let s = Snapshot::new(20, -20);

        assert!(!should_dispatch(&s, None, None, INTERVAL, true));
        assert!(!should_dispatch(&s, Some(&Snapshot::STOP), Some(Duration::from_secs(10)), INTERVAL, true));
    }

    #[test]
    fn test_never_sent_counts_as_changed() {
        assert!(should_dispatch(
            &Snapshot::STOP,
            None,
            Some(Duration::from_millis(0)),
            INTERVAL,
            false
        ));
    }
}
