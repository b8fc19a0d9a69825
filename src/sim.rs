#![warn(clippy::pedantic)]
//! Simulated bench: a laser, a two-fiber stage and a power meter sharing one state, for running
//! passes without instruments attached. Every call is traced and appended to a call log.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tracing::trace;

use crate::error::{MeterError, StageError};
use crate::hardware::{LaserSource, Point, PositionerStage, PowerMeter};

/// Coupled power as a function of (input, output) fiber positions.
pub type Field = Box<dyn Fn(Point, Point) -> f64 + Send>;

#[derive(Debug, Clone, Default)]
struct SimState {
    input: Point,
    output: Point,
    laser_on: bool,
    wavelength_nm: f64,
    power_mw: f64,
    moves: usize,
    calls: Vec<String>,
}

/// Handle to the state shared by the simulated instruments.
#[derive(Debug, Clone, Default)]
pub struct SimBench {
    state: Arc<Mutex<SimState>>,
}

impl SimBench {
    #[must_use]
    pub fn new(input: Point, output: Point) -> Self {
        let state = SimState {
            input,
            output,
            ..SimState::default()
        };
        SimBench {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, call: String) {
        trace!("[sim] {call}");
        self.lock().calls.push(call);
    }

    #[must_use]
    pub fn laser(&self) -> SimLaser {
        SimLaser {
            bench: self.clone(),
        }
    }

    #[must_use]
    pub fn stage(&self) -> SimStage {
        SimStage {
            bench: self.clone(),
            fail_move_at: None,
            move_duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn meter(&self, field: Field) -> SimMeter {
        SimMeter {
            bench: self.clone(),
            field,
            noise: 0.0,
            read_duration: Duration::ZERO,
        }
    }

    /// Every instrument call so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn input_position(&self) -> Point {
        self.lock().input
    }

    #[must_use]
    pub fn output_position(&self) -> Point {
        self.lock().output
    }

    #[must_use]
    pub fn laser_on(&self) -> bool {
        self.lock().laser_on
    }

    #[must_use]
    pub fn laser_parameters(&self) -> (f64, f64) {
        let state = self.lock();
        (state.wavelength_nm, state.power_mw)
    }
}

/// Gaussian coupling of each fiber to a fixed optimum in the xy plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianCoupling {
    pub input_peak: [f64; 2],
    pub output_peak: [f64; 2],
    pub peak_power: f64,
    pub waist: f64,
}

impl GaussianCoupling {
    #[must_use]
    pub fn power(&self, input: Point, output: Point) -> f64 {
        let r2 = |p: Point, c: [f64; 2]| (p[0] - c[0]).powi(2) + (p[1] - c[1]).powi(2);
        let w2 = self.waist * self.waist;
        self.peak_power
            * (-2.0 * r2(input, self.input_peak) / w2).exp()
            * (-2.0 * r2(output, self.output_peak) / w2).exp()
    }

    #[must_use]
    pub fn into_field(self) -> Field {
        Box::new(move |input, output| self.power(input, output))
    }
}

/// Everything needed to stand up a simulated bench.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSetup {
    pub input: Point,
    pub output: Point,
    pub coupling: GaussianCoupling,
    pub noise: f64,
    pub fail_move_at: Option<usize>,
}

impl Default for SimSetup {
    fn default() -> Self {
        SimSetup {
            input: [0.0; 3],
            output: [0.0; 3],
            coupling: GaussianCoupling {
                input_peak: [0.0, 0.0],
                output_peak: [0.0, 0.0],
                peak_power: 1.0,
                waist: 5.0,
            },
            noise: 0.0,
            fail_move_at: None,
        }
    }
}

impl SimSetup {
    #[must_use]
    pub fn build(&self) -> (SimBench, SimLaser, SimStage, SimMeter) {
        let bench = SimBench::new(self.input, self.output);
        let mut stage = bench.stage();
        stage.fail_move_at(self.fail_move_at);
        let mut meter = bench.meter(self.coupling.into_field());
        meter.noise(self.noise);
        let laser = bench.laser();
        (bench, laser, stage, meter)
    }
}

pub struct SimLaser {
    bench: SimBench,
}

impl LaserSource for SimLaser {
    fn deactivate(&mut self) {
        self.bench.log("laser.deactivate".into());
        self.bench.lock().laser_on = false;
    }

    fn set_parameters(&mut self, wavelength_nm: f64, power_mw: f64) {
        self.bench
            .log(format!("laser.set_parameters {wavelength_nm} {power_mw}"));
        let mut state = self.bench.lock();
        state.wavelength_nm = wavelength_nm;
        state.power_mw = power_mw;
    }

    fn activate(&mut self) {
        self.bench.log("laser.activate".into());
        self.bench.lock().laser_on = true;
    }
}

pub struct SimStage {
    bench: SimBench,
    fail_move_at: Option<usize>,
    move_duration: Duration,
}

impl SimStage {
    /// Rejects the `n`-th move command (zero-based, counting every move including the one to the
    /// start point).
    pub fn fail_move_at(&mut self, n: Option<usize>) -> &mut Self {
        self.fail_move_at = n;
        self
    }

    /// Simulated travel time; a move whose travel time exceeds its timeout fails with
    /// [`StageError::Timeout`].
    pub fn move_duration(&mut self, duration: Duration) -> &mut Self {
        self.move_duration = duration;
        self
    }

    fn move_fiber(&mut self, output: bool, point: Point, timeout: Duration) -> Result<(), StageError> {
        let name = if output { "output" } else { "input" };
        self.bench.log(format!(
            "stage.move_{name} ({:.3}, {:.3}, {:.3})",
            point[0], point[1], point[2]
        ));
        let mut state = self.bench.lock();
        let n = state.moves;
        state.moves += 1;
        if self.fail_move_at == Some(n) {
            return Err(StageError::Rejected);
        }
        if self.move_duration > timeout {
            return Err(StageError::Timeout(timeout));
        }
        if output {
            state.output = point;
        } else {
            state.input = point;
        }
        Ok(())
    }
}

impl PositionerStage for SimStage {
    fn move_input_to_point(&mut self, point: Point, timeout: Duration) -> Result<(), StageError> {
        self.move_fiber(false, point, timeout)
    }

    fn move_output_to_point(&mut self, point: Point, timeout: Duration) -> Result<(), StageError> {
        self.move_fiber(true, point, timeout)
    }

    fn input_position(&mut self) -> Result<Point, StageError> {
        self.bench.log("stage.input_position".into());
        Ok(self.bench.input_position())
    }

    fn output_position(&mut self) -> Result<Point, StageError> {
        self.bench.log("stage.output_position".into());
        Ok(self.bench.output_position())
    }
}

pub struct SimMeter {
    bench: SimBench,
    field: Field,
    noise: f64,
    read_duration: Duration,
}

impl SimMeter {
    /// Uniform noise of +/- `amplitude` added to every acquisition before averaging.
    pub fn noise(&mut self, amplitude: f64) -> &mut Self {
        self.noise = amplitude.abs();
        self
    }

    /// Simulated acquisition time per reading.
    pub fn read_duration(&mut self, duration: Duration) -> &mut Self {
        self.read_duration = duration;
        self
    }
}

impl fmt::Debug for SimMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimMeter")
            .field("noise", &self.noise)
            .field("read_duration", &self.read_duration)
            .finish_non_exhaustive()
    }
}

impl PowerMeter for SimMeter {
    fn setup(&mut self, wavelength_nm: f64) {
        self.bench.log(format!("meter.setup {wavelength_nm}"));
    }

    fn read_power(&mut self, passes: u32, timeout: Duration) -> Result<f64, MeterError> {
        self.bench.log(format!("meter.read_power {passes}"));
        if self.read_duration > timeout {
            return Err(MeterError::Timeout(timeout));
        }
        let (input, output, on) = {
            let state = self.bench.lock();
            (state.input, state.output, state.laser_on)
        };
        if !on {
            return Ok(0.0);
        }
        let passes = passes.max(1);
        let mut rng = rand::thread_rng();
        let sum: f64 = (0..passes)
            .map(|_| {
                let jitter = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                (self.field)(input, output) + jitter
            })
            .sum();
        Ok(sum / f64::from(passes))
    }
}
