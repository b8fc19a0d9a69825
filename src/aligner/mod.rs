#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
//! Entry point for a single scan-and-refine pass: configures the source, sweeps the grid, finds
//! the measured maximum and refines it on an interpolated surface.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::grid::{meshgrid, SampleGrid, ScanRegion};
use crate::hardware::{
    add, AbortCheck, AbortFlag, LaserSource, Point, PositionerStage, PowerMeter, SharedMeter,
    Target,
};
use crate::interpolate::{
    AbsenceReason, InterpolatedSurface, Interpolation, Interpolator, Surface, DEFAULT_DEPTH,
};
use crate::laser::LaserSettings;
use crate::maxima::find_maximum;
use crate::scan::{ProgressSink, ScanController};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    ConfiguringSource,
    Scanning,
    Aborted,
    MeasurementComplete,
    Interpolating,
    Done,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassState::Idle => "idle",
            PassState::ConfiguringSource => "configuring source",
            PassState::Scanning => "scanning",
            PassState::Aborted => "aborted",
            PassState::MeasurementComplete => "measurement complete",
            PassState::Interpolating => "interpolating",
            PassState::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Bench-level tuning shared by every pass an [`Aligner`] runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignerSettings {
    pub settle_delay: Duration,
    pub laser_settle: Duration,
    pub move_timeout: Duration,
    pub measure_timeout: Duration,
    pub interpolation_depth: usize,
    pub exclude_trailing_edge: bool,
    pub abort_check: AbortCheck,
}

impl Default for AlignerSettings {
    fn default() -> Self {
        AlignerSettings {
            settle_delay: Duration::from_millis(50),
            laser_settle: Duration::from_secs(1),
            move_timeout: Duration::from_secs(10),
            measure_timeout: Duration::from_secs(5),
            interpolation_depth: DEFAULT_DEPTH,
            exclude_trailing_edge: true,
            abort_check: AbortCheck::BeforePass,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub target: Target,
    pub region: ScanRegion,
    /// Meter acquisitions averaged per cell.
    pub passes: u32,
    pub interpolation: Interpolation,
    pub laser: LaserSettings,
}

/// The measured maximum of a pass, in absolute stage coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanResult {
    pub index: (usize, usize),
    pub value: f64,
    pub position: Point,
}

/// Everything a pass hands to its [`CompletionSink`].
///
/// On failure `measured` is `None`, the surface is absent with
/// [`AbsenceReason::NotAttempted`], and `sparse` holds whatever was measured before the pass
/// stopped. That partial grid is for display only.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub success: bool,
    pub measured: Option<ScanResult>,
    pub sparse: SampleGrid,
    pub surface: InterpolatedSurface,
}

impl PassReport {
    #[must_use]
    pub fn measured_position(&self) -> Option<Point> {
        self.measured.map(|m| m.position)
    }

    #[must_use]
    pub fn refined_position(&self) -> Option<Point> {
        self.surface.refined().map(|r| r.position)
    }
}

/// Receives the outcome of a pass. Called exactly once per [`Aligner::find_maxima`] call.
pub trait CompletionSink {
    fn on_complete(&mut self, report: &PassReport);
}

impl<F: FnMut(&PassReport)> CompletionSink for F {
    fn on_complete(&mut self, report: &PassReport) {
        self(report);
    }
}

pub struct Aligner<L, S, M> {
    laser: L,
    stage: S,
    meter: SharedMeter<M>,
    abort: AbortFlag,
    settings: AlignerSettings,
    state: PassState,
}

impl<L, S, M> Aligner<L, S, M>
where
    L: LaserSource,
    S: PositionerStage,
    M: PowerMeter,
{
    #[must_use]
    pub fn new(laser: L, stage: S, meter: SharedMeter<M>, abort: AbortFlag) -> Self {
        Aligner {
            laser,
            stage,
            meter,
            abort,
            settings: AlignerSettings::default(),
            state: PassState::Idle,
        }
    }

    pub fn settings(&mut self, settings: AlignerSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PassState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    fn transition(&mut self, next: PassState) {
        debug!("pass state: {} -> {next}", self.state);
        self.state = next;
    }

    fn interpolator(&self, method: Interpolation) -> Interpolator {
        let mut interp = Interpolator::new(method);
        interp
            .depth(self.settings.interpolation_depth)
            .exclude_trailing_edge(self.settings.exclude_trailing_edge);
        interp
    }

    fn controller(&self, passes: u32) -> ScanController {
        let mut controller = ScanController::new(self.abort.clone());
        controller
            .abort_check(self.settings.abort_check)
            .settle_delay(self.settings.settle_delay)
            .passes(passes)
            .move_timeout(self.settings.move_timeout)
            .measure_timeout(self.settings.measure_timeout);
        controller
    }

    /// Runs one scan-and-refine pass.
    ///
    /// `progress` is called after every measured cell. `completion` is called exactly once,
    /// whatever the outcome, with a report whose `success` flag matches the return value.
    /// Interpolation failures do not fail the pass; they leave the report's surface absent.
    ///
    /// # Errors
    /// Returns the [`ScanError`] that ended the pass.
    pub fn find_maxima<P, C>(
        &mut self,
        request: &ScanRequest,
        progress: &mut P,
        completion: &mut C,
    ) -> Result<PassReport, ScanError>
    where
        P: ProgressSink + ?Sized,
        C: CompletionSink + ?Sized,
    {
        self.state = PassState::Idle;
        let interpolator = self.interpolator(request.interpolation);
        let region = &request.region;
        let mut sparse = SampleGrid::new(region);
        info!(
            "starting {} fiber pass: {} x {} over {} x {}, {} interpolation",
            request.target,
            region.nx(),
            region.ny(),
            region.width(),
            region.height(),
            interpolator.method()
        );

        if self.abort.is_set() {
            return self.fail(
                ScanError::AbortRequested,
                sparse,
                &interpolator,
                region,
                completion,
            );
        }

        self.transition(PassState::ConfiguringSource);
        request
            .laser
            .apply(&mut self.laser, self.settings.laser_settle);

        let scanned = self
            .setup_meter(request.laser.wavelength_nm())
            .and_then(|()| {
                self.transition(PassState::Scanning);
                self.controller(request.passes).run(
                    &mut self.stage,
                    &self.meter,
                    request.target,
                    region,
                    &mut sparse,
                    progress,
                )
            });
        self.laser.deactivate();

        let start = match scanned {
            Ok(start) => start,
            Err(e) => return self.fail(e, sparse, &interpolator, region, completion),
        };
        self.transition(PassState::MeasurementComplete);

        let max = match find_maximum(sparse.intensity.view(), None) {
            Ok(max) => max,
            Err(e) => return self.fail(e, sparse, &interpolator, region, completion),
        };
        let (ix, iy) = max.index;
        let measured = ScanResult {
            index: max.index,
            value: max.value,
            position: add(sparse.offset(ix, iy), start),
        };
        info!(
            "measured maximum {:.6} at cell ({ix}, {iy}), position {:?}",
            measured.value, measured.position
        );

        self.transition(PassState::Interpolating);
        let surface = interpolator.refine(&sparse, region.width(), region.height(), start);
        match &surface.surface {
            Surface::Computed { refined, .. } => info!(
                "refined maximum {:.6} at {:?}",
                refined.value, refined.position
            ),
            Surface::Absent(reason) => info!("no refined maximum: {reason}"),
        }

        self.transition(PassState::Done);
        let report = PassReport {
            success: true,
            measured: Some(measured),
            sparse,
            surface,
        };
        completion.on_complete(&report);
        Ok(report)
    }

    fn setup_meter(&mut self, wavelength_nm: f64) -> Result<(), ScanError> {
        let mut meter = self.meter.lock().map_err(|_| ScanError::MeterUnavailable)?;
        meter.setup(wavelength_nm);
        Ok(())
    }

    fn fail<C: CompletionSink + ?Sized>(
        &mut self,
        error: ScanError,
        sparse: SampleGrid,
        interpolator: &Interpolator,
        region: &ScanRegion,
        completion: &mut C,
    ) -> Result<PassReport, ScanError> {
        self.transition(PassState::Aborted);
        warn!(
            "pass failed after {} of {} cells: {error}",
            sparse.measured_count(),
            region.len()
        );
        let (xs, ys) = interpolator.dense_axes(region.width(), region.height());
        let (x, y) = meshgrid(&xs, &ys);
        let report = PassReport {
            success: false,
            measured: None,
            sparse,
            surface: InterpolatedSurface::absent(x, y, AbsenceReason::NotAttempted),
        };
        completion.on_complete(&report);
        Err(error)
    }
}
