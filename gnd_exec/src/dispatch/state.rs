//! Dispatcher state machine

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::link::LinkError;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt::Display;
use std::time::{Duration, Instant};

use super::{should_dispatch, Snapshot};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Something which can start transmitting a snapshot.
///
/// `begin_send` must not block on the transport. Its completion is reported
/// later through `Dispatcher::on_send_complete` carrying the same ticket id.
/// An `Err` return means the send never started and no completion will follow.
pub trait SnapshotSink {
    fn begin_send(&mut self, ticket: SendTicket) -> Result<(), LinkError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single send, identified so its completion can be matched to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTicket {
    pub id: u64,
    pub snapshot: Snapshot,
}

/// Counters describing the dispatcher's activity over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Sends handed to the link
    pub sends_started: u64,

    /// Sends which reached the robot on both channels
    pub sends_completed: u64,

    /// Sends which failed to start or failed to deliver
    pub sends_failed: u64,

    /// Sends made only because the keep-alive interval expired
    pub keep_alives: u64,

    /// Emergency or disconnect stops sent
    pub stops: u64,

    /// Completions which matched no outstanding send
    pub stale_completions: u64,
}

/// Tracks what has been sent and decides what to send next.
///
/// The dispatcher never has more than one send outstanding. While it is
/// disarmed (no connection) nothing is ever sent.
#[derive(Debug)]
pub struct Dispatcher {
    min_send_interval: Duration,

    armed: bool,

    /// Id of the outstanding send, if any
    in_flight: Option<u64>,

    next_ticket_id: u64,

    /// `None` until something has been sent since the last reset
    last_sent: Option<Snapshot>,

    last_send_instant: Option<Instant>,

    /// A stop waiting for the outstanding send to finish
    pending_stop: Option<Snapshot>,

    stats: DispatchStats,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why a snapshot is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReason {
    Change,
    KeepAlive,
    Stop,
}

/// The result of asking for an immediate stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The stop was handed to the link straight away
    Sent,

    /// A send was already outstanding, the stop goes out when it completes
    Latched,

    /// There is no connection to send on
    NotArmed,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Dispatcher {
    /// Create a disarmed dispatcher.
    pub fn new(min_send_interval: Duration) -> Self {
        Self {
            min_send_interval,
            armed: false,
            in_flight: None,
            next_ticket_id: 0,
            last_sent: None,
            last_send_instant: None,
            pending_stop: None,
            stats: DispatchStats::default(),
        }
    }

    /// Arm the dispatcher for a fresh connection.
    ///
    /// Forgets the last sent value so the next tick sends whatever is current,
    /// and starts the keep-alive clock from `now`. Completions for sends made
    /// before the reset are ignored when they arrive.
    pub fn reset(&mut self, now: Instant) {
        self.armed = true;
        self.in_flight = None;
        self.last_sent = None;
        self.last_send_instant = Some(now);
        self.pending_stop = None;
    }

    /// Stop sending until the next `reset`.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.in_flight = None;
        self.pending_stop = None;
    }

    /// Periodic update, sends `current` if the dispatch policy allows it.
    ///
    /// A latched stop takes priority over `current`. Returns the ticket of
    /// the send started by this tick, if any.
    pub fn tick<S: SnapshotSink + ?Sized>(
        &mut self,
        now: Instant,
        current: Snapshot,
        sink: &mut S,
    ) -> Option<SendTicket> {
        if !self.armed || self.in_flight.is_some() {
            return None;
        }

        if let Some(stop) = self.pending_stop.take() {
            return self.dispatch(stop, DispatchReason::Stop, now, sink);
        }

        let elapsed = self.last_send_instant.map(|t| now.saturating_duration_since(t));

        if !should_dispatch(
            &current,
            self.last_sent.as_ref(),
            elapsed,
            self.min_send_interval,
            false,
        ) {
            return None;
        }

        let reason = if self.last_sent == Some(current) {
            DispatchReason::KeepAlive
        } else {
            DispatchReason::Change
        };

        self.dispatch(current, reason, now, sink)
    }

    /// Send `snapshot` as soon as the one-outstanding-send rule allows.
    ///
    /// If nothing is in flight the send starts now. Otherwise it is latched
    /// and started from `on_send_complete`, ahead of any routine value.
    pub fn force_send<S: SnapshotSink + ?Sized>(
        &mut self,
        snapshot: Snapshot,
        now: Instant,
        sink: &mut S,
    ) -> StopOutcome {
        if !self.armed {
            return StopOutcome::NotArmed;
        }

        if self.in_flight.is_some() {
            debug!("Send in flight, latching stop {}", snapshot);
            self.pending_stop = Some(snapshot);
            return StopOutcome::Latched;
        }

        self.dispatch(snapshot, DispatchReason::Stop, now, sink);
        StopOutcome::Sent
    }

    /// Record the completion of the send with the given ticket id.
    ///
    /// Completions which don't match the outstanding send are ignored. If a
    /// stop was latched it is started immediately and its ticket returned.
    pub fn on_send_complete<E, S>(
        &mut self,
        ticket_id: u64,
        result: Result<(), E>,
        now: Instant,
        sink: &mut S,
    ) -> Option<SendTicket>
    where
        E: Display,
        S: SnapshotSink + ?Sized,
    {
        if self.in_flight != Some(ticket_id) {
            debug!("Ignoring completion of stale send {}", ticket_id);
            self.stats.stale_completions += 1;
            return None;
        }

        self.in_flight = None;

        match result {
            Ok(()) => self.stats.sends_completed += 1,
            Err(e) => {
                self.stats.sends_failed += 1;
                warn!("Send {} failed: {}", ticket_id, e);
            }
        }

        match self.pending_stop.take() {
            Some(stop) if self.armed => self.dispatch(stop, DispatchReason::Stop, now, sink),
            _ => None,
        }
    }

    /// True if a send is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True if nothing is outstanding and no stop is waiting to go out.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending_stop.is_none()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn last_sent(&self) -> Option<Snapshot> {
        self.last_sent
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn dispatch<S: SnapshotSink + ?Sized>(
        &mut self,
        snapshot: Snapshot,
        reason: DispatchReason,
        now: Instant,
        sink: &mut S,
    ) -> Option<SendTicket> {
        let ticket = SendTicket {
            id: self.next_ticket_id,
            snapshot,
        };
        self.next_ticket_id = self.next_ticket_id.wrapping_add(1);

        // Claim the slot before handing over so a reentrant completion can match it
        self.in_flight = Some(ticket.id);
        self.last_sent = Some(snapshot);
        self.last_send_instant = Some(now);

        match sink.begin_send(ticket) {
            Ok(()) => {
                self.stats.sends_started += 1;
                match reason {
                    DispatchReason::KeepAlive => self.stats.keep_alives += 1,
                    DispatchReason::Stop => {
                        self.stats.stops += 1;
                        info!("Stop {} sent", snapshot);
                    }
                    DispatchReason::Change => (),
                }
                debug!("Send {} started: {} ({:?})", ticket.id, snapshot, reason);
                Some(ticket)
            }
            Err(e) => {
                // No completion will ever arrive for this ticket
                self.in_flight = None;
                self.stats.sends_failed += 1;
                error!("Could not start send of {}: {}", snapshot, e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<SendTicket>,
        refuse: bool,
    }

    impl SnapshotSink for RecordingSink {
        fn begin_send(&mut self, ticket: SendTicket) -> Result<(), LinkError> {
            if self.refuse {
                return Err(LinkError::WorkerStopped);
            }
            self.sent.push(ticket);
            Ok(())
        }
    }

    fn ms(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    fn armed(t0: Instant) -> Dispatcher {
        let mut d = Dispatcher::new(INTERVAL);
        d.reset(t0);
        d
    }

    #[test]
    fn test_disarmed_never_sends() {
        let t0 = Instant::now();
        let mut d = Dispatcher::new(INTERVAL);
        let mut sink = RecordingSink::default();

        for i in 0..20 {
            assert!(d.tick(ms(t0, i * 10), Snapshot::new(100, 0), &mut sink).is_none());
        }
        assert_eq!(d.force_send(Snapshot::STOP, t0, &mut sink), StopOutcome::NotArmed);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_first_tick_after_reset_sends_current() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        // Even an all-zero snapshot goes out since nothing has been sent yet
        let ticket = d.tick(t0, Snapshot::STOP, &mut sink);
        assert_eq!(ticket.map(|t| t.snapshot), Some(Snapshot::STOP));
        assert!(d.is_in_flight());
    }

    #[test]
    fn test_at_most_one_in_flight() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        d.tick(t0, Snapshot::new(100, 0), &mut sink);

        // Rapid changes while the first send is outstanding go nowhere
        for i in 1..50 {
            let v = if i % 2 == 0 { 100 } else { -100 };
            assert!(d.tick(ms(t0, i * 10), Snapshot::new(v, v), &mut sink).is_none());
        }
        assert_eq!(sink.sent.len(), 1);
    }

    #[test]
    fn test_completion_releases_slot() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let ticket = d.tick(t0, Snapshot::new(100, 0), &mut sink).unwrap();
        d.on_send_complete::<LinkError, _>(ticket.id, Ok(()), ms(t0, 5), &mut sink);
        assert!(!d.is_in_flight());

        let next = d.tick(ms(t0, 10), Snapshot::new(100, 100), &mut sink);
        assert_eq!(next.map(|t| t.snapshot), Some(Snapshot::new(100, 100)));
    }

    #[test]
    fn test_failed_completion_also_releases_slot() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let ticket = d.tick(t0, Snapshot::new(100, 0), &mut sink).unwrap();
        d.on_send_complete(ticket.id, Err(LinkError::NotConnected), ms(t0, 5), &mut sink);

        assert!(!d.is_in_flight());
        assert_eq!(d.stats().sends_failed, 1);
    }

    #[test]
    fn test_keep_alive_cadence() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();
        let held = Snapshot::new(100, 0);

        // Tick at 100 Hz for one second, completing each send straight away
        for i in 0..100 {
            let now = ms(t0, i * 10);
            if let Some(t) = d.tick(now, held, &mut sink) {
                d.on_send_complete::<LinkError, _>(t.id, Ok(()), now, &mut sink);
            }
        }

        // One change send then a keep-alive every 50 ms
        assert_eq!(sink.sent.len(), 20);
        assert_eq!(d.stats().keep_alives, 19);
        assert!(sink.sent.iter().all(|t| t.snapshot == held));
    }

    #[test]
    fn test_keep_alive_not_before_interval() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();
        let held = Snapshot::new(0, 50);

        let t = d.tick(t0, held, &mut sink).unwrap();
        d.on_send_complete::<LinkError, _>(t.id, Ok(()), ms(t0, 1), &mut sink);

        assert!(d.tick(ms(t0, 49), held, &mut sink).is_none());
        assert!(d.tick(ms(t0, 50), held, &mut sink).is_some());
    }

    #[test]
    fn test_stop_latched_behind_in_flight_send() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let first = d.tick(t0, Snapshot::new(100, 0), &mut sink).unwrap();
        assert_eq!(d.force_send(Snapshot::STOP, ms(t0, 2), &mut sink), StopOutcome::Latched);
        assert!(!d.is_idle());

        // Routine ticks can't jump ahead of the latched stop
        assert!(d.tick(ms(t0, 3), Snapshot::new(100, 0), &mut sink).is_none());

        let stop = d
            .on_send_complete::<LinkError, _>(first.id, Ok(()), ms(t0, 4), &mut sink)
            .unwrap();
        assert_eq!(stop.snapshot, Snapshot::STOP);
        assert_eq!(sink.sent.len(), 2);
        assert_eq!(d.stats().stops, 1);
    }

    #[test]
    fn test_stop_sent_immediately_when_idle() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        assert_eq!(d.force_send(Snapshot::STOP, t0, &mut sink), StopOutcome::Sent);
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(d.last_sent(), Some(Snapshot::STOP));
    }

    #[test]
    fn test_reconnect_drops_latched_stop() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let first = d.tick(t0, Snapshot::new(100, 0), &mut sink).unwrap();
        d.force_send(Snapshot::STOP, ms(t0, 1), &mut sink);

        // Disarm then re-arm drops the latch, a fresh connection starts clean
        d.disarm();
        d.reset(ms(t0, 2));
        assert!(d.is_idle());

        // The old completion is now stale
        assert!(d
            .on_send_complete::<LinkError, _>(first.id, Ok(()), ms(t0, 3), &mut sink)
            .is_none());
        assert_eq!(d.stats().stale_completions, 1);
    }

    #[test]
    fn test_stale_completion_ignored() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let ticket = d.tick(t0, Snapshot::new(0, 100), &mut sink).unwrap();

        assert!(d
            .on_send_complete::<LinkError, _>(ticket.id + 7, Ok(()), ms(t0, 1), &mut sink)
            .is_none());
        assert!(d.is_in_flight());
    }

    #[test]
    fn test_reset_clears_state() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();

        let t = d.tick(t0, Snapshot::new(100, 0), &mut sink).unwrap();
        d.on_send_complete::<LinkError, _>(t.id, Ok(()), ms(t0, 1), &mut sink);
        assert_eq!(d.last_sent(), Some(Snapshot::new(100, 0)));

        d.reset(ms(t0, 100));
        assert_eq!(d.last_sent(), None);
        assert!(!d.is_in_flight());

        // Same value as before the reset still counts as a change
        let again = d.tick(ms(t0, 101), Snapshot::new(100, 0), &mut sink);
        assert!(again.is_some());
        assert_eq!(d.stats().keep_alives, 0);
    }

    #[test]
    fn test_refused_send_releases_slot() {
        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink {
            refuse: true,
            ..Default::default()
        };

        assert!(d.tick(t0, Snapshot::new(100, 0), &mut sink).is_none());
        assert!(!d.is_in_flight());
        assert_eq!(d.stats().sends_failed, 1);

        sink.refuse = false;
        assert!(d.tick(ms(t0, 60), Snapshot::new(100, 0), &mut sink).is_some());
    }

    #[test]
    fn test_press_release_scenario() {
        use crate::ctrl_state::{ControlState, DriveKey};

        let t0 = Instant::now();
        let mut d = armed(t0);
        let mut sink = RecordingSink::default();
        let mut cs = ControlState::default();

        let step = |d: &mut Dispatcher, cs: &mut ControlState, sink: &mut RecordingSink, at| {
            let now = ms(t0, at);
            let sent = d.tick(now, cs.recompute(), sink);
            if let Some(t) = sent {
                d.on_send_complete::<LinkError, _>(t.id, Ok(()), now + Duration::from_millis(2), sink);
            }
            sent.map(|t| t.snapshot)
        };

        // Connected at rest, the first tick sends the zero state
        assert_eq!(step(&mut d, &mut cs, &mut sink, 10), Some(Snapshot::STOP));

        cs.press(DriveKey::Forward);
        assert_eq!(step(&mut d, &mut cs, &mut sink, 20), Some(Snapshot::new(100, 0)));

        cs.release(DriveKey::Forward);
        assert_eq!(step(&mut d, &mut cs, &mut sink, 30), Some(Snapshot::STOP));

        for at in &[40, 50, 60, 70] {
            assert_eq!(step(&mut d, &mut cs, &mut sink, *at), None);
        }

        assert_eq!(step(&mut d, &mut cs, &mut sink, 80), Some(Snapshot::STOP));
        assert_eq!(d.stats().keep_alives, 1);
        assert_eq!(sink.sent.len(), 4);
    }
}
