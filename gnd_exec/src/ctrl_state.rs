//! # Control State
//!
//! Holds the operator's inputs (which drive keys are held and the speed setting) and derives the
//! throttle and rotation demands from them.
//!
//! Throttle is driven by `W` (forwards) and `S` (backwards), rotation by `D` (right) and `A`
//! (left). Each held key contributes the current speed to its axis, so holding opposing keys
//! cancels out.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info};
use std::fmt;
use std::str::FromStr;

use crate::dispatch::Snapshot;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Lowest speed setting.
pub const MIN_SPEED: i32 = 0;

/// Highest speed setting.
pub const MAX_SPEED: i32 = 100;

/// Speed setting used until the operator changes it.
pub const DEFAULT_SPEED: i32 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The operator's control inputs and the demands derived from them.
#[derive(Debug, Clone)]
pub struct ControlState {
    /// Held flag for each key, indexed by `DriveKey::index`
    held: [bool; 4],

    speed: i32,

    /// Demands as of the last `recompute` or `emergency_stop`
    current: Snapshot,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// One of the four drive keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveKey {
    /// `W`, positive throttle
    Forward,

    /// `A`, negative rotation
    Left,

    /// `S`, negative throttle
    Back,

    /// `D`, positive rotation
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown drive key {0:?}, expected one of w, a, s or d")]
pub struct ParseKeyError(String);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DriveKey {
    pub const ALL: [DriveKey; 4] = [
        DriveKey::Forward,
        DriveKey::Left,
        DriveKey::Back,
        DriveKey::Right,
    ];

    /// The keyboard key bound to this drive key.
    pub fn key_char(&self) -> char {
        match self {
            DriveKey::Forward => 'W',
            DriveKey::Left => 'A',
            DriveKey::Back => 'S',
            DriveKey::Right => 'D',
        }
    }

    fn index(&self) -> usize {
        match self {
            DriveKey::Forward => 0,
            DriveKey::Left => 1,
            DriveKey::Back => 2,
            DriveKey::Right => 3,
        }
    }
}

impl FromStr for DriveKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "w" | "forward" => Ok(DriveKey::Forward),
            "a" | "left" => Ok(DriveKey::Left),
            "s" | "back" => Ok(DriveKey::Back),
            "d" | "right" => Ok(DriveKey::Right),
            _ => Err(ParseKeyError(s.to_owned())),
        }
    }
}

impl fmt::Display for DriveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_char())
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED)
    }
}

impl ControlState {
    /// Create a new control state with no keys held.
    pub fn new(speed: i32) -> Self {
        Self {
            held: [false; 4],
            speed: speed.max(MIN_SPEED).min(MAX_SPEED),
            current: Snapshot::STOP,
        }
    }

    /// Mark `key` as held.
    ///
    /// Returns `false` if the key was already held, in which case nothing
    /// changes. This filters out keyboard auto-repeat.
    pub fn press(&mut self, key: DriveKey) -> bool {
        let held = &mut self.held[key.index()];
        if *held {
            return false;
        }
        *held = true;
        debug!("{} pressed", key);
        true
    }

    /// Mark `key` as released, returning `false` if it wasn't held.
    pub fn release(&mut self, key: DriveKey) -> bool {
        let held = &mut self.held[key.index()];
        if !*held {
            return false;
        }
        *held = false;
        debug!("{} released", key);
        true
    }

    pub fn is_held(&self, key: DriveKey) -> bool {
        self.held[key.index()]
    }

    /// All currently held keys in `W`, `A`, `S`, `D` order.
    pub fn held_keys(&self) -> Vec<DriveKey> {
        DriveKey::ALL
            .iter()
            .copied()
            .filter(|k| self.is_held(*k))
            .collect()
    }

    /// Set the speed, clamped to [`MIN_SPEED`, `MAX_SPEED`]. Returns the value applied.
    pub fn set_speed(&mut self, speed: i32) -> i32 {
        self.speed = speed.max(MIN_SPEED).min(MAX_SPEED);
        info!("Speed set to {}", self.speed);
        self.speed
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    /// Derive the demands from the held keys and speed, store them and return them.
    pub fn recompute(&mut self) -> Snapshot {
        let axis = |pos: DriveKey, neg: DriveKey| {
            let mut v = 0;
            if self.is_held(pos) {
                v += self.speed;
            }
            if self.is_held(neg) {
                v -= self.speed;
            }
            v
        };

        self.current = Snapshot::new(
            axis(DriveKey::Forward, DriveKey::Back),
            axis(DriveKey::Right, DriveKey::Left),
        );
        self.current
    }

    /// Release every key and zero both demands.
    pub fn emergency_stop(&mut self) {
        self.held = [false; 4];
        self.current = Snapshot::STOP;
    }

    /// The demands as of the last recompute.
    pub fn snapshot(&self) -> Snapshot {
        self.current
    }

    /// Operator readout of the current demands.
    pub fn readout(&self) -> String {
        format!(
            "Throttle: {:+4}  Rotation: {:+4}  Speed: {:3}",
            self.current.throttle, self.current.rotation, self.speed
        )
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
