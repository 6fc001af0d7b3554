//! # Operator script interpreter module
//!
//! This module provides an interpreter for timed operator scripts, allowing
//! a drive session to be replayed without anyone at the console.
//!
//! A script is a sequence of `<seconds>: <command>;` entries, for example:
//!
//! ```text
//! 0.5: scan;
//! 6.0: connect;
//! 7.0: press w;
//! 9.0: release w;
//! ```
//!
//! The command text is parsed by the caller's command type through `FromStr`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use regex::RegexBuilder;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Matches one `<seconds>: <command>;` entry.
const ENTRY_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
struct Entry<C> {
    /// The time the command is supposed to execute at
    exec_time_s: f64,

    /// The command to run
    cmd: C
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use
/// `.get_pending_cmds` to acquire a list of commands that need executing.
pub struct ScriptInterpreter<C> {
    script_path: PathBuf,
    entries: VecDeque<Entry<C>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid command at {0} s: {1}")]
    InvalidCmd(f64, String)
}

/// Commands due for execution.
#[derive(Debug, PartialEq)]
pub enum PendingCmds<C> {
    None,
    Some(Vec<C>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<C> ScriptInterpreter<C>
where
    C: FromStr,
    C::Err: Display
{
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {

        // Get the path in a buffer
        let path = PathBuf::from(script_path.as_ref());

        // Check that the script file exists.
        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        // Load the script into a string
        let script = fs::read_to_string(&path)
            .map_err(ScriptError::ScriptLoadError)?;

        let entries = parse_script(&script)?;

        Ok(ScriptInterpreter {
            script_path: path,
            entries
        })
    }

    /// Create an interpreter from script text held in memory.
    pub fn from_source(script: &str) -> Result<Self, ScriptError> {
        Ok(ScriptInterpreter {
            script_path: PathBuf::new(),
            entries: parse_script(script)?
        })
    }
}

impl<C> ScriptInterpreter<C> {
    /// Return the commands due at `current_time_s`, in script order.
    pub fn get_pending_cmds(&mut self, current_time_s: f64) -> PendingCmds<C> {

        // If the queue is empty the script is over and we return the end of
        // script variant
        if self.entries.is_empty() {
            return PendingCmds::EndOfScript
        }

        let mut cmd_vec: Vec<C> = vec![];

        // Pop entries from the front while their exec time has passed
        while self
            .entries
            .front()
            .map(|e| e.exec_time_s <= current_time_s)
            .unwrap_or(false)
        {
            if let Some(e) = self.entries.pop_front() {
                cmd_vec.push(e.cmd);
            }
        }

        if cmd_vec.is_empty() {
            PendingCmds::None
        }
        else {
            PendingCmds::Some(cmd_vec)
        }
    }

    /// Get the number of commands left in the script
    pub fn get_num_cmds(&self) -> usize {
        self.entries.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.entries.back() {
            Some(e) => e.exec_time_s,
            None => 0f64
        }
    }

    /// The path the script was loaded from, empty for in-memory scripts.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn parse_script<C>(script: &str) -> Result<VecDeque<Entry<C>>, ScriptError>
where
    C: FromStr,
    C::Err: Display
{
    // Empty queue of commands
    let mut queue: VecDeque<Entry<C>> = VecDeque::new();

    // Go through the script executing __the magic regex__.
    let re = RegexBuilder::new(ENTRY_PATTERN)
        .multi_line(true)
        .build()
        .map_err(|e| ScriptError::InvalidCmd(0.0, e.to_string()))?;

    for cap in re.captures_iter(script) {
        let time_str = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let cmd_str = cap.get(3).map(|m| m.as_str()).unwrap_or("");

        // Parse the exec time
        let exec_time_s: f64 = time_str
            .parse()
            .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

        // Parse the command
        let cmd = cmd_str
            .trim()
            .parse::<C>()
            .map_err(|e| ScriptError::InvalidCmd(exec_time_s, e.to_string()))?;

        queue.push_back(Entry {
            exec_time_s,
            cmd
        });
    }

    if queue.is_empty() {
        return Err(ScriptError::ScriptEmpty)
    }

    // Entries are executed in time order regardless of how they were written
    queue
        .make_contiguous()
        .sort_by(|a, b| a.exec_time_s.partial_cmp(&b.exec_time_s).unwrap_or(std::cmp::Ordering::Equal));

    Ok(queue)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Word(String);

    impl FromStr for Word {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if s.is_empty() {
                Err("empty command".into())
            }
            else {
                Ok(Word(s.to_owned()))
            }
        }
    }

    #[test]
    fn test_pending_cmds() {
        let mut si: ScriptInterpreter<Word> = ScriptInterpreter::from_source(
            "0.5: scan;\n 2.0 : press w;\n1.0: connect;\n"
        ).unwrap();

        assert_eq!(si.get_num_cmds(), 3);
        assert_eq!(si.get_duration(), 2.0);

        assert_eq!(si.get_pending_cmds(0.1), PendingCmds::None);
        assert_eq!(
            si.get_pending_cmds(1.0),
            PendingCmds::Some(vec![Word("scan".into()), Word("connect".into())])
        );
        assert_eq!(
            si.get_pending_cmds(5.0),
            PendingCmds::Some(vec![Word("press w".into())])
        );
        assert_eq!(si.get_pending_cmds(6.0), PendingCmds::EndOfScript);
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(
            ScriptInterpreter::<Word>::from_source("nothing to see here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::<Word>::from_source("1.0: ;"),
            Err(ScriptError::InvalidCmd(t, _)) if t == 1.0
        ));
        assert!(matches!(
            ScriptInterpreter::<Word>::new("/no/such/script.txt"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }
}
