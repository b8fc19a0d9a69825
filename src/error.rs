#![warn(clippy::pedantic)]

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::hardware::{Point, Target};

/// The hardware collaborator that failed to answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Stage,
    PowerMeter,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Stage => write!(f, "positioner stage"),
            Device::PowerMeter => write!(f, "power meter"),
        }
    }
}

/// Why a scan pass did not produce a measured maximum.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    #[error("abort flag was set before the pass began")]
    AbortRequested,
    #[error("failed to move {target} fiber to ({:.3}, {:.3}, {:.3})", point[0], point[1], point[2])]
    MotionFailure { target: Target, point: Point },
    #[error("could not read back the {target} fiber position")]
    PositionUnavailable { target: Target },
    #[error("{device} did not respond within {timeout:?}")]
    HardwareTimeout { device: Device, timeout: Duration },
    #[error("grid contains no valid measurement")]
    NoValidMeasurement,
    #[error("invalid scan region: {0}")]
    InvalidRegion(String),
    #[error("power meter failure: {0}")]
    MeterFailure(String),
    #[error("power meter lock is poisoned")]
    MeterUnavailable,
}

/// Errors reported by a [`PositionerStage`](crate::hardware::PositionerStage).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error("move rejected by the controller")]
    Rejected,
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),
    #[error("stage fault: {0}")]
    Fault(String),
}

/// Errors reported by a [`PowerMeter`](crate::hardware::PowerMeter).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeterError {
    #[error("meter timed out after {0:?}")]
    Timeout(Duration),
    #[error("meter fault: {0}")]
    Fault(String),
}

/// Numerical failures while fitting or evaluating an interpolated surface. These never leave the
/// interpolator as errors; they are carried inside an absent surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("degree {degree} fit needs more than {degree} samples along {axis}, got {got}")]
    InsufficientPoints {
        axis: char,
        degree: usize,
        got: usize,
    },
    #[error("sample coordinates along {0} are not strictly increasing")]
    DegenerateAxis(char),
    #[error("fit matrix is singular")]
    Singular,
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}
