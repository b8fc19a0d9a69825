#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
//! Capability interfaces for the instruments a scan pass drives. Implementations block until the
//! physical operation completes or the supplied timeout elapses.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{MeterError, StageError};

pub type Point = [f64; 3];

#[inline]
#[must_use]
pub fn add(a: Point, b: Point) -> Point {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Input,
    Output,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Input => write!(f, "input"),
            Target::Output => write!(f, "output"),
        }
    }
}

impl FromStr for Target {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Target::Input),
            "output" | "out" => Ok(Target::Output),
            _ => Err(format!("unknown fiber target '{s}'")),
        }
    }
}

pub trait LaserSource {
    fn deactivate(&mut self);
    fn set_parameters(&mut self, wavelength_nm: f64, power_mw: f64);
    fn activate(&mut self);
}

pub trait PositionerStage {
    /// # Errors
    /// Returns a [`StageError`] if the controller refuses the move, faults, or does not finish
    /// within `timeout`.
    fn move_input_to_point(&mut self, point: Point, timeout: Duration) -> Result<(), StageError>;
    fn move_output_to_point(&mut self, point: Point, timeout: Duration) -> Result<(), StageError>;
    fn input_position(&mut self) -> Result<Point, StageError>;
    fn output_position(&mut self) -> Result<Point, StageError>;

    fn move_to(&mut self, target: Target, point: Point, timeout: Duration) -> Result<(), StageError> {
        match target {
            Target::Input => self.move_input_to_point(point, timeout),
            Target::Output => self.move_output_to_point(point, timeout),
        }
    }

    fn position(&mut self, target: Target) -> Result<Point, StageError> {
        match target {
            Target::Input => self.input_position(),
            Target::Output => self.output_position(),
        }
    }
}

pub trait PowerMeter {
    fn setup(&mut self, wavelength_nm: f64);
    /// Reads the coupled power averaged over `passes` acquisitions.
    /// # Errors
    /// Returns a [`MeterError`] on a device fault or if the reading takes longer than `timeout`.
    fn read_power(&mut self, passes: u32, timeout: Duration) -> Result<f64, MeterError>;
}

/// The power meter is shared with other monitoring code in the process, so every access goes
/// through this mutex.
pub type SharedMeter<M> = Arc<Mutex<M>>;

/// Cooperative cancellation flag. Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// When the scan controller polls the [`AbortFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortCheck {
    #[default]
    BeforePass,
    EveryCell,
}

impl FromStr for AbortCheck {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" | "before_pass" => Ok(AbortCheck::BeforePass),
            "cell" | "every_cell" => Ok(AbortCheck::EveryCell),
            _ => Err(format!("unknown abort check '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_flag_clones_share_state() {
        let flag = AbortFlag::new();
        let remote = flag.clone();
        assert!(!flag.is_set());
        remote.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!remote.is_set());
    }

    #[test]
    fn parse_names() {
        assert_eq!("Output".parse::<Target>(), Ok(Target::Output));
        assert_eq!("in".parse::<Target>(), Ok(Target::Input));
        assert!("sideways".parse::<Target>().is_err());
        assert_eq!("cell".parse::<AbortCheck>(), Ok(AbortCheck::EveryCell));
        assert!("never".parse::<AbortCheck>().is_err());
    }
}
