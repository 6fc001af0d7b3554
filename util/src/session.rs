//! # Session
//!
//! Per-run output directory, session clock and background JSON saving.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use erased_serde::Serialize;
use log::{info, warn};
use std::fs;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::thread::JoinHandle;
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Directory and file name timestamps, `strftime` syntax.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Data queued for saving by the background thread.
type SaveItem = (PathBuf, Box<dyn Serialize + Send>);

/// One run of an executable: its own timestamped directory, holding the log
/// file and anything passed to [`Session::save`].
pub struct Session {
    /// `<sw root>/<sessions dir>/<exec>_<timestamp>`
    pub session_root: PathBuf,

    /// `<session_root>/<exec>.log`
    pub log_file_path: PathBuf,

    save_sender: Option<Sender<SaveItem>>,

    save_thread: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{} must point at the software root", crate::host::SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("Failed to create the session directory: {0}")]
    CannotCreateDir(std::io::Error),

    #[error("A session has already been started in this process ({0})")]
    CannotInitEpoch(conquer_once::TryInitError),

    #[error("No session has been started in this process")]
    CannotGetEpoch,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session for `exec_name`, stamping the epoch used by
    /// [`get_elapsed_seconds`].
    ///
    /// `sessions_dir` is relative to the software root. Only one session may
    /// be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        SESSION_EPOCH
            .try_init_once(Utc::now)
            .map_err(SessionError::CannotInitEpoch)?;
        let epoch = get_epoch()?;

        let root = crate::host::get_sw_root().map_err(|_| SessionError::SwRootNotSet)?;
        let session_root = root
            .join(sessions_dir)
            .join(format!("{}_{}", exec_name, epoch.format(TIMESTAMP_FORMAT)));
        fs::create_dir_all(&session_root).map_err(SessionError::CannotCreateDir)?;

        let (tx, rx) = channel();
        let save_root = session_root.clone();
        let save_thread = thread::spawn(move || save_thread(save_root, rx));

        Ok(Session {
            log_file_path: session_root.join(format!("{}.log", exec_name)),
            session_root,
            save_sender: Some(tx),
            save_thread: Some(save_thread),
        })
    }

    /// End the session. Blocks until everything queued with [`Session::save`]
    /// has been written.
    pub fn exit(mut self) {
        // Dropping the sender ends the save thread's loop once the queue is empty
        self.save_sender = None;

        if let Some(jh) = self.save_thread.take() {
            if jh.join().is_err() {
                warn!("Session save thread panicked, some data may not have been written");
            }
        }

        info!("Session data flushed to {:?}", self.session_root);
    }

    /// Queue `data` to be written as pretty JSON at `path`, relative to the
    /// session root. Writing happens on a background thread.
    pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(&self, path: P, data: T) {
        let path = path.as_ref().to_path_buf();

        let queued = self
            .save_sender
            .as_ref()
            .map(|s| s.send((path.clone(), Box::new(data))).is_ok())
            .unwrap_or(false);

        if !queued {
            warn!("Session is closing, {:?} will not be saved", path)
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds since [`Session::new`] was called, or NaN before that.
pub fn get_elapsed_seconds() -> f64 {
    SESSION_EPOCH
        .get()
        .and_then(|e| time::duration_to_seconds(Utc::now() - *e))
        .unwrap_or(std::f64::NAN)
}

/// UTC time at which the session started.
pub fn get_epoch() -> Result<&'static DateTime<Utc>, SessionError> {
    SESSION_EPOCH.get().ok_or(SessionError::CannotGetEpoch)
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn save_thread(session_root: PathBuf, receiver: Receiver<SaveItem>) {
    for (path, data) in receiver {
        let full_path = session_root.join(path);

        match full_path.extension().and_then(|s| s.to_str()) {
            Some("json") => {
                if let Some(parent) = full_path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        warn!("Failed to create the directory for {:?}: {}", full_path, e);
                        continue;
                    }
                }

                let file = match OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .create(true)
                    .open(&full_path)
                {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("Failed to open {:?} for writing: {}", full_path, e);
                        continue;
                    }
                };

                if let Err(e) = serde_json::to_writer_pretty(&file, &data) {
                    warn!("Failed to write JSON to {:?}: {}", full_path, e);
                }
            }
            ext => warn!(
                "Can't save {:?}, only .json is supported (got {:?})",
                full_path, ext
            ),
        }
    }
}
