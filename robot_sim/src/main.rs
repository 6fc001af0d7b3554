//! # Robot Simulator Executable
//!
//! Stands in for the robot on the far end of the link. It answers scans with its advertised name,
//! accepts throttle and rotation writes and reports its drive outputs. If the ground stops writing
//! for longer than the command timeout the outputs are zeroed (safe mode).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Drive outputs and safe mode.
mod drive;

/// Robot server abstraction.
mod robot_server;

/// Parameters for the robot simulator.
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::{link::LinkResponse, net::zmq};
use log::{info, trace, warn};
use std::time::{Duration, Instant};
use structopt::StructOpt;

// Internal
use drive::DriveState;
use params::RobotSimParams;
use robot_server::{handle_request, RobotServer, RobotServerError};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "robot_sim", about = "Simulated robot for the teleoperation link")]
struct Args {
    /// Parameter file, relative to the params directory
    #[structopt(long, default_value = "robot_sim.toml")]
    params: String,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("robot_sim", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    info!("Robot Simulator Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: RobotSimParams =
        util::params::load(&args.params).wrap_err("Could not load robot_sim params")?;

    info!("Parameters loaded");

    // ---- SERVER INITIALISATION ----

    let ctx = zmq::Context::new();
    let mut server = RobotServer::new(&ctx, &params).wrap_err("Failed to initialise server")?;

    info!(
        "Server initialised, advertising as {:?} on {}",
        params.advertised_name, params.endpoint
    );

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop in safe mode");

    let mut drive = DriveState::new(Duration::from_millis(params.cmd_timeout_ms));
    let mut last_outputs = drive.outputs();
    let mut ground_connected = false;

    loop {
        // Get the next request, a bad request still needs an answer
        let response = match server.recv_request() {
            Ok(Some(req)) => {
                trace!("Request: {:?}", req);
                Some(handle_request(
                    req,
                    &params.advertised_name,
                    &mut drive,
                    Instant::now(),
                ))
            }
            Ok(None) => None,
            Err(RobotServerError::BadRequest(e)) => {
                warn!("Bad request: {}", e);
                Some(LinkResponse::Invalid(e))
            }
            Err(e) => {
                warn!("Server error: {}", e);
                None
            }
        };

        if let Some(r) = response {
            if let Err(e) = server.send_response(&r) {
                warn!("Couldn't send response to the ground: {}", e);
            }
        }

        if drive.check_timeout(Instant::now()) {
            warn!(
                "No demands for {} ms, entering safe mode",
                params.cmd_timeout_ms
            );
        }

        if drive.outputs() != last_outputs {
            last_outputs = drive.outputs();
            info!(
                "Outputs: throttle {:+4}  rotation {:+4}",
                last_outputs.0, last_outputs.1
            );
        }

        if server.connected() != ground_connected {
            ground_connected = server.connected();
            info!(
                "Ground {}",
                if ground_connected { "connected" } else { "disconnected" }
            );
        }
    }
}
