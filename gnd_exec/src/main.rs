//! # Ground Executable
//!
//! Keyboard teleoperation of the robot. The operator drives with the `W`, `A`, `S` and `D` keys,
//! either from the console or from a timed script.
//!
//! # Architecture
//!
//! A single control loop runs at a fixed period:
//!
//!     - Operator commands are taken from the console thread or the script
//!     - Completions reported by the link worker are applied
//!     - Demands are recomputed from the held keys
//!     - The dispatcher decides whether to send them
//!
//! All network I/O happens on the link worker thread, so the loop never blocks on the robot.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::{zmq, ZmqTransport};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;

// Internal
use gnd_lib::{
    ctrl_state::ControlState,
    dispatch::Snapshot,
    link_client::LinkClient,
    operator::{self, Flow, OperatorCmd},
    params::GndExecParams,
    session_ctrl::{SessionCtrl, SessionState},
};
use util::{
    logger::{logger_init, LevelFilter},
    script_interpreter::{PendingCmds, ScriptInterpreter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest time spent closing the connection on exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gnd_exec", about = "Keyboard teleoperation of the robot")]
struct Args {
    /// Run this operator script instead of reading commands from the console
    #[structopt(short, long, parse(from_os_str))]
    script: Option<PathBuf>,

    /// Parameter file, relative to the params directory
    #[structopt(long, default_value = "gnd_exec.toml")]
    params: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Where operator commands come from.
enum CmdSource {
    Console(Receiver<OperatorCmd>),
    Script {
        si: ScriptInterpreter<OperatorCmd>,
        start: Instant,
    },
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("gnd_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Teleoperation Ground Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: GndExecParams =
        util::params::load(&args.params).wrap_err("Could not load gnd_exec params")?;

    info!("Parameters loaded");
    debug!("{:#?}", params);

    // ---- INITIALISE COMMAND SOURCE ----

    let mut cmd_source = match args.script {
        Some(ref path) => {
            let si = ScriptInterpreter::new(path).wrap_err("Failed to load script")?;

            info!(
                "Loaded script {:?}, lasts {:.02} s and contains {} commands\n",
                si.script_path(),
                si.get_duration(),
                si.get_num_cmds()
            );

            CmdSource::Script {
                si,
                start: Instant::now(),
            }
        }
        None => {
            let (tx, rx) = channel();
            operator::spawn_console(tx).wrap_err("Failed to start the console")?;

            info!("No script provided, reading commands from the console");
            info!("Type `help` for a list of commands\n");

            CmdSource::Console(rx)
        }
    };

    // ---- INITIALISE NETWORK ----

    let zmq_ctx = zmq::Context::new();

    let link = LinkClient::spawn(ZmqTransport::new(&zmq_ctx, params.transport_options()))
        .wrap_err("Failed to start the link worker")?;
    info!("Link worker started");

    let mut sess = SessionCtrl::new(link, &params);
    let mut ctrl = ControlState::new(params.speed);

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");
    info!("Status: {}", sess.state());

    let tick_period = params.tick_period();
    let mut last_readout = ctrl.snapshot();

    'main: loop {
        let cycle_start = Instant::now();

        // ---- OPERATOR COMMANDS ----

        let (cmds, end_of_input) = cmd_source.take_pending();

        for cmd in cmds.iter() {
            debug!("Operator command: {:?}", cmd);
            if operator::exec(cmd, &mut ctrl, &mut sess, Instant::now()) == Flow::Quit {
                info!("Quit requested");
                break 'main;
            }
        }

        if end_of_input {
            info!("End of operator input");
            break 'main;
        }

        // ---- LINK EVENTS ----

        for event in sess.link().poll_events() {
            sess.handle_event(event, Instant::now());
        }

        // ---- DISPATCH ----

        let snapshot = ctrl.recompute();
        sess.tick(Instant::now(), snapshot);

        if snapshot != last_readout {
            info!("{}", ctrl.readout());
            last_readout = snapshot;
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start;

        match tick_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - tick_period.as_secs_f64()
            ),
        }
    }

    // ---- SHUTDOWN ----

    shutdown(&mut sess, tick_period);

    info!("Dispatch stats: {:?}", sess.stats());
    session.save("dispatch_stats.json", sess.stats());

    // Stops the link worker
    drop(sess);

    session.exit();

    info!("End of execution");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdSource {
    /// Commands due now, and whether the source has run out.
    fn take_pending(&mut self) -> (Vec<OperatorCmd>, bool) {
        match self {
            CmdSource::Console(rx) => {
                let mut cmds = Vec::new();
                loop {
                    match rx.try_recv() {
                        Ok(c) => cmds.push(c),
                        Err(TryRecvError::Empty) => return (cmds, false),
                        Err(TryRecvError::Disconnected) => return (cmds, true),
                    }
                }
            }
            CmdSource::Script { si, start } => {
                match si.get_pending_cmds(start.elapsed().as_secs_f64()) {
                    PendingCmds::None => (vec![], false),
                    PendingCmds::Some(cmds) => (cmds, false),
                    PendingCmds::EndOfScript => (vec![], true),
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Stop the robot and close the connection, giving up after `SHUTDOWN_TIMEOUT`.
fn shutdown(sess: &mut SessionCtrl<LinkClient>, tick_period: Duration) {
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;

    loop {
        let now = Instant::now();

        match sess.state() {
            SessionState::Disconnected => break,
            SessionState::Connected => {
                if let Err(e) = sess.disconnect(now) {
                    warn!("Could not disconnect: {}", e);
                    break;
                }
            }
            SessionState::Connecting | SessionState::Disconnecting => (),
        }

        if now >= deadline {
            warn!("Connection not closed within {:?}, exiting anyway", SHUTDOWN_TIMEOUT);
            break;
        }

        if let Some(event) = sess.link().wait_event(tick_period) {
            sess.handle_event(event, Instant::now());
        }

        sess.tick(Instant::now(), Snapshot::STOP);
    }
}
