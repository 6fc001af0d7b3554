//! End to end scenarios through the link worker, with an in-memory robot behind the transport.

use comms_if::link::{decode_axis_value, Channel, Device, LinkError, Transport};
use gnd_lib::{
    ctrl_state::{ControlState, DriveKey},
    dispatch::Snapshot,
    link_client::LinkClient,
    operator::{self, OperatorCmd},
    params::GndExecParams,
    session_ctrl::{SessionCtrl, SessionState},
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// FAKE ROBOT
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RobotState {
    throttle: i32,
    rotation: i32,
    writes: Vec<(Channel, i32)>,
    connected: bool,
    unplugged: bool,
    write_delay: Duration,
}

#[derive(Clone, Default)]
struct FakeRobot(Arc<Mutex<RobotState>>);

impl FakeRobot {
    fn state(&self) -> std::sync::MutexGuard<'_, RobotState> {
        self.0.lock().unwrap()
    }

    fn outputs(&self) -> Snapshot {
        let s = self.state();
        Snapshot::new(s.throttle, s.rotation)
    }
}

impl Transport for FakeRobot {
    fn scan(&mut self, _timeout: Duration) -> Result<Vec<Device>, LinkError> {
        Ok(vec![
            Device {
                name: "Keyboard".into(),
                address: "tcp://kbd".into(),
            },
            Device {
                name: "ESP32 Robot".into(),
                address: "tcp://robot".into(),
            },
        ])
    }

    fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        if address != "tcp://robot" {
            return Err(LinkError::Connection {
                address: address.into(),
                reason: "no such device".into(),
            });
        }
        self.state().connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.state().connected = false;
        Ok(())
    }

    fn write(&mut self, channel: Channel, payload: &[u8]) -> Result<(), LinkError> {
        let delay = self.state().write_delay;
        thread::sleep(delay);

        let mut s = self.state();
        if !s.connected || s.unplugged {
            return Err(LinkError::NotConnected);
        }

        let value = decode_axis_value(payload).map_err(|e| LinkError::Write {
            channel,
            reason: e.to_string(),
        })?;

        match channel {
            Channel::Throttle => s.throttle = value,
            Channel::Rotation => s.rotation = value,
        }
        s.writes.push((channel, value));
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

struct Harness {
    robot: FakeRobot,
    sess: SessionCtrl<LinkClient>,
    ctrl: ControlState,
}

impl Harness {
    fn new() -> Self {
        let robot = FakeRobot::default();
        let link = LinkClient::spawn(robot.clone()).unwrap();

        Self {
            robot,
            sess: SessionCtrl::new(link, &GndExecParams::default()),
            ctrl: ControlState::default(),
        }
    }

    fn cmd(&mut self, line: &str) {
        let cmd: OperatorCmd = line.parse().unwrap();
        operator::exec(&cmd, &mut self.ctrl, &mut self.sess, Instant::now());
    }

    /// Run control cycles until `done` holds, panicking after a couple of seconds.
    fn run_until<F: Fn(&Self) -> bool>(&mut self, done: F) {
        let deadline = Instant::now() + Duration::from_secs(3);

        while !done(self) {
            assert!(Instant::now() < deadline, "scenario timed out");

            for event in self.sess.link().poll_events() {
                self.sess.handle_event(event, Instant::now());
            }

            let snapshot = self.ctrl.recompute();
            self.sess.tick(Instant::now(), snapshot);

            thread::sleep(Duration::from_millis(2));
        }
    }

    fn connect(&mut self) {
        self.cmd("scan");
        self.run_until(|h| !h.sess.is_scanning());
        assert_eq!(self.sess.devices().len(), 1);

        self.cmd("connect");
        self.run_until(|h| h.sess.state() != SessionState::Connecting);
        assert_eq!(self.sess.state(), SessionState::Connected);
    }
}

// ------------------------------------------------------------------------------------------------
// SCENARIOS
// ------------------------------------------------------------------------------------------------

#[test]
fn drive_and_disconnect() {
    let mut h = Harness::new();
    h.connect();

    h.cmd("press w d");
    h.run_until(|h| h.robot.outputs() == Snapshot::new(100, 100));

    h.cmd("release d");
    h.cmd("speed 40");
    h.run_until(|h| h.robot.outputs() == Snapshot::new(40, 0));

    h.cmd("disconnect");
    h.run_until(|h| h.sess.state() == SessionState::Disconnected);

    // The last thing the robot saw was a stop
    assert_eq!(h.robot.outputs(), Snapshot::STOP);
    assert!(!h.robot.state().connected);

    // Every snapshot went out throttle first
    let writes = h.robot.state().writes.clone();
    assert!(writes.chunks(2).all(|w| w.len() == 2
        && w[0].0 == Channel::Throttle
        && w[1].0 == Channel::Rotation));
}

#[test]
fn emergency_stop_overtakes_slow_send() {
    let mut h = Harness::new();
    h.connect();
    h.robot.state().write_delay = Duration::from_millis(30);

    h.cmd("press w");
    h.run_until(|h| h.sess.dispatcher().is_in_flight());

    h.cmd("stop");
    assert!(h.ctrl.held_keys().is_empty());

    h.run_until(|h| h.sess.dispatcher().is_idle() && h.robot.outputs() == Snapshot::STOP);
    assert_eq!(h.sess.stats().stops, 1);
    assert_eq!(h.sess.state(), SessionState::Connected);
}

#[test]
fn keep_alives_while_holding() {
    let mut h = Harness::new();
    h.connect();

    h.cmd("press s");
    h.run_until(|h| h.robot.outputs() == Snapshot::new(-100, 0));

    let start = Instant::now();
    h.run_until(|_| start.elapsed() >= Duration::from_millis(300));

    // Holding still produces regular sends of the same value
    let stats = h.sess.stats();
    assert!(stats.keep_alives >= 3, "only {} keep-alives", stats.keep_alives);
    assert!(h
        .robot
        .state()
        .writes
        .iter()
        .rev()
        .take(6)
        .all(|&(c, v)| v == if c == Channel::Throttle { -100 } else { 0 }));
}

#[test]
fn lost_connection_is_noticed() {
    let mut h = Harness::new();
    h.connect();

    h.cmd("press a");
    h.run_until(|h| h.robot.outputs() == Snapshot::new(0, -100));

    h.robot.state().unplugged = true;
    h.run_until(|h| h.sess.state() == SessionState::Disconnected);

    assert!(!h.sess.dispatcher().is_armed());
    assert!(h.sess.can_scan());
}
