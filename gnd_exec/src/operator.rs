//! # Operator Commands
//!
//! Commands the operator can issue, either typed at the console or replayed from a script. The
//! same parser serves both, so a script line such as `7.0: press w;` means exactly what typing
//! `press w` would.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use structopt::{clap::AppSettings, StructOpt};

use crate::{
    ctrl_state::{ControlState, DriveKey},
    link_client::Link,
    session_ctrl::{SessionCtrl, SessionState},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "teleop $ ";

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// A command issued by the operator.
#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(
    name = "op",
    global_settings = &[AppSettings::DisableVersion, AppSettings::VersionlessSubcommands]
)]
pub enum OperatorCmd {
    /// Scan for robots
    #[structopt(name = "scan")]
    Scan,

    /// Connect to a robot found by the last scan, the first one if no name is given
    #[structopt(name = "connect")]
    Connect { name: Option<String> },

    /// Stop the robot and close the connection
    #[structopt(name = "disconnect")]
    Disconnect,

    /// Hold down one or more drive keys (w, a, s, d)
    #[structopt(name = "press")]
    Press {
        #[structopt(required = true)]
        keys: Vec<DriveKey>,
    },

    /// Let go of one or more drive keys
    #[structopt(name = "release")]
    Release {
        #[structopt(required = true)]
        keys: Vec<DriveKey>,
    },

    /// Emergency stop, releases every key and zeroes both axes
    #[structopt(name = "stop")]
    Stop,

    /// Set the speed used by the drive keys, 0 to 100
    #[structopt(name = "speed", setting = AppSettings::AllowNegativeNumbers)]
    Speed { value: i32 },

    /// Show connection status and current demands
    #[structopt(name = "status")]
    Status,

    /// Disconnect if needed and exit
    #[structopt(name = "quit")]
    Quit,
}

/// What the control loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl FromStr for OperatorCmd {
    type Err = structopt::clap::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatorCmd::from_iter_safe(std::iter::once("op").chain(s.split_whitespace()))
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Carry out a single operator command.
///
/// Commands which aren't allowed in the current state are reported and
/// ignored, they never stop the control loop.
pub fn exec<L: Link>(
    cmd: &OperatorCmd,
    ctrl: &mut ControlState,
    sess: &mut SessionCtrl<L>,
    now: Instant,
) -> Flow {
    let result = match cmd {
        OperatorCmd::Scan => sess.scan(),
        OperatorCmd::Connect { name } => sess.connect(name.as_deref()),
        OperatorCmd::Disconnect => sess.disconnect(now),
        OperatorCmd::Press { keys } => {
            for k in keys {
                ctrl.press(*k);
            }
            Ok(())
        }
        OperatorCmd::Release { keys } => {
            for k in keys {
                ctrl.release(*k);
            }
            Ok(())
        }
        OperatorCmd::Stop => {
            ctrl.emergency_stop();
            sess.emergency_stop(now);
            Ok(())
        }
        OperatorCmd::Speed { value } => {
            ctrl.set_speed(*value);
            Ok(())
        }
        OperatorCmd::Status => {
            info!("{}", status_line(ctrl, sess));
            Ok(())
        }
        OperatorCmd::Quit => return Flow::Quit,
    };

    if let Err(e) = result {
        warn!("Cannot {:?}: {}", cmd, e);
    }

    Flow::Continue
}

/// One line summary of the connection and the current demands.
pub fn status_line<L: Link>(ctrl: &ControlState, sess: &SessionCtrl<L>) -> String {
    let peer = match (sess.state(), sess.peer()) {
        (SessionState::Disconnected, _) | (_, None) => String::new(),
        (_, Some(d)) => format!(" to {}", d.name),
    };

    let held: String = ctrl.held_keys().iter().map(|k| k.key_char()).collect();

    format!(
        "Status: {}{}  {}  Keys: [{}]",
        sess.state(),
        peer,
        ctrl.readout(),
        held
    )
}

/// Start the console thread, which reads commands from the terminal and forwards them on `tx`.
///
/// Ctrl-C and Ctrl-D are forwarded as [`OperatorCmd::Quit`].
pub fn spawn_console(tx: Sender<OperatorCmd>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || console(tx))
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn console(tx: Sender<OperatorCmd>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            warn!("Console unavailable: {}", e);
            tx.send(OperatorCmd::Quit).ok();
            return;
        }
    };

    loop {
        let cmd = match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str()).ok();

                match line.parse::<OperatorCmd>() {
                    Ok(c) => c,
                    Err(e) => {
                        // Includes help output, which clap reports as an error
                        println!("{}", e.message);
                        continue;
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => OperatorCmd::Quit,
            Err(e) => {
                warn!("Console error: {}", e);
                OperatorCmd::Quit
            }
        };

        let quit = cmd == OperatorCmd::Quit;

        // The control loop has gone, nobody is listening
        if tx.send(cmd).is_err() || quit {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{dispatch::{SendTicket, Snapshot, SnapshotSink}, params::GndExecParams};
    use comms_if::link::LinkError;
    use std::time::Duration;

    #[derive(Default)]
    struct NullLink {
        sends: Vec<SendTicket>,
    }

    impl SnapshotSink for NullLink {
        fn begin_send(&mut self, ticket: SendTicket) -> Result<(), LinkError> {
            self.sends.push(ticket);
            Ok(())
        }
    }

    impl Link for NullLink {
        fn request_scan(&mut self, _timeout: Duration) -> Result<(), LinkError> {
            Ok(())
        }

        fn request_connect(&mut self, _address: &str) -> Result<(), LinkError> {
            Ok(())
        }

        fn request_disconnect(&mut self) -> Result<(), LinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("scan".parse::<OperatorCmd>().unwrap(), OperatorCmd::Scan);
        assert_eq!(
            "connect Robot-1".parse::<OperatorCmd>().unwrap(),
            OperatorCmd::Connect {
                name: Some("Robot-1".into())
            }
        );
        assert_eq!(
            "connect".parse::<OperatorCmd>().unwrap(),
            OperatorCmd::Connect { name: None }
        );
        assert_eq!(
            "press w D".parse::<OperatorCmd>().unwrap(),
            OperatorCmd::Press {
                keys: vec![DriveKey::Forward, DriveKey::Right]
            }
        );
        assert_eq!(
            "  speed   40 ".parse::<OperatorCmd>().unwrap(),
            OperatorCmd::Speed { value: 40 }
        );
        assert_eq!(
            "speed -5".parse::<OperatorCmd>().unwrap(),
            OperatorCmd::Speed { value: -5 }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("press".parse::<OperatorCmd>().is_err());
        assert!("press q".parse::<OperatorCmd>().is_err());
        assert!("speed fast".parse::<OperatorCmd>().is_err());
        assert!("launch".parse::<OperatorCmd>().is_err());
    }

    #[test]
    fn test_exec_keys_and_stop() {
        let mut ctrl = ControlState::new(50);
        let mut sess = SessionCtrl::new(NullLink::default(), &GndExecParams::default());
        let now = Instant::now();

        let press = OperatorCmd::Press {
            keys: vec![DriveKey::Forward, DriveKey::Left],
        };
        assert_eq!(exec(&press, &mut ctrl, &mut sess, now), Flow::Continue);
        assert_eq!(ctrl.recompute(), Snapshot::new(50, -50));

        exec(&OperatorCmd::Stop, &mut ctrl, &mut sess, now);
        assert!(ctrl.held_keys().is_empty());
        assert_eq!(ctrl.snapshot(), Snapshot::STOP);

        // Not connected, so nothing went out
        assert!(sess.link().sends.is_empty());
    }

    #[test]
    fn test_exec_rejected_commands_continue() {
        let mut ctrl = ControlState::default();
        let mut sess = SessionCtrl::new(NullLink::default(), &GndExecParams::default());
        let now = Instant::now();

        assert_eq!(exec(&OperatorCmd::Disconnect, &mut ctrl, &mut sess, now), Flow::Continue);
        assert_eq!(
            exec(&OperatorCmd::Connect { name: None }, &mut ctrl, &mut sess, now),
            Flow::Continue
        );
        assert_eq!(sess.state(), SessionState::Disconnected);
        assert_eq!(exec(&OperatorCmd::Quit, &mut ctrl, &mut sess, now), Flow::Quit);
    }

    #[test]
    fn test_status_line() {
        let mut ctrl = ControlState::new(80);
        let sess = SessionCtrl::new(NullLink::default(), &GndExecParams::default());

        ctrl.press(DriveKey::Right);
        ctrl.recompute();

        assert_eq!(
            status_line(&ctrl, &sess),
            "Status: Disconnected  Throttle:   +0  Rotation:  +80  Speed:  80  Keys: [D]"
        );
    }
}
