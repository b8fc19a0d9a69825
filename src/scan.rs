#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Device, MeterError, ScanError, StageError};
use crate::grid::{serpentine, SampleGrid, ScanRegion};
use crate::hardware::{
    add, AbortCheck, AbortFlag, Point, PositionerStage, PowerMeter, SharedMeter, Target,
};

/// Receives the fraction of the pass completed and the partially filled grid after every measured
/// cell.
pub trait ProgressSink {
    fn on_progress(&mut self, fraction: f64, snapshot: &SampleGrid);
}

impl<F: FnMut(f64, &SampleGrid)> ProgressSink for F {
    fn on_progress(&mut self, fraction: f64, snapshot: &SampleGrid) {
        self(fraction, snapshot);
    }
}

/// Sequences stage moves and power readings over a sample grid.
#[derive(Debug, Clone)]
pub struct ScanController {
    abort: AbortFlag,
    abort_check: AbortCheck,
    settle_delay: Duration,
    passes: u32,
    move_timeout: Duration,
    measure_timeout: Duration,
}

impl ScanController {
    #[must_use]
    pub fn new(abort: AbortFlag) -> Self {
        ScanController {
            abort,
            abort_check: AbortCheck::BeforePass,
            settle_delay: Duration::from_millis(50),
            passes: 1,
            move_timeout: Duration::from_secs(10),
            measure_timeout: Duration::from_secs(5),
        }
    }

    pub fn abort_check(&mut self, check: AbortCheck) -> &mut Self {
        self.abort_check = check;
        self
    }

    /// Pause between arriving at a cell and reading the meter, for vibration to decay.
    pub fn settle_delay(&mut self, delay: Duration) -> &mut Self {
        self.settle_delay = delay;
        self
    }

    /// Number of meter acquisitions averaged per cell.
    pub fn passes(&mut self, passes: u32) -> &mut Self {
        self.passes = passes.max(1);
        self
    }

    pub fn move_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.move_timeout = timeout;
        self
    }

    pub fn measure_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.measure_timeout = timeout;
        self
    }

    /// Measures every cell of `grid` in serpentine order and returns the absolute start point
    /// the grid coordinates are relative to. `grid` must have been built from `region`.
    ///
    /// Cells measured before a failure keep their values; the remaining cells stay unmeasured.
    ///
    /// # Errors
    /// [`ScanError::AbortRequested`] if the abort flag is set before the pass (or, with
    /// [`AbortCheck::EveryCell`], after any measurement); [`ScanError::MotionFailure`] or
    /// [`ScanError::HardwareTimeout`] if a move fails; meter errors from the per-cell reading.
    pub fn run<S, M, P>(
        &self,
        stage: &mut S,
        meter: &SharedMeter<M>,
        target: Target,
        region: &ScanRegion,
        grid: &mut SampleGrid,
        progress: &mut P,
    ) -> Result<Point, ScanError>
    where
        S: PositionerStage + ?Sized,
        M: PowerMeter + ?Sized,
        P: ProgressSink + ?Sized,
    {
        if self.abort.is_set() {
            return Err(ScanError::AbortRequested);
        }

        let current = stage.position(target).map_err(|e| match e {
            StageError::Timeout(timeout) => ScanError::HardwareTimeout {
                device: Device::Stage,
                timeout,
            },
            StageError::Rejected | StageError::Fault(_) => ScanError::PositionUnavailable { target },
        })?;
        let start = region
            .origin
            .start_point(current, region.width(), region.height());
        debug!("{target} fiber at {current:?}; pass starts at {start:?}");
        self.move_stage(stage, target, start)?;

        for step in serpentine(region.nx(), region.ny()) {
            let point = add(grid.offset(step.ix, step.iy), start);
            self.move_stage(stage, target, point)?;
            if !self.settle_delay.is_zero() {
                thread::sleep(self.settle_delay);
            }

            let value = self.read(meter)?;
            if !grid.record(step.ix, step.iy, value) {
                warn!(
                    "reading {value} at cell ({}, {}) not recorded",
                    step.ix, step.iy
                );
            }
            progress.on_progress(step.progress, grid);

            if self.abort_check == AbortCheck::EveryCell && self.abort.is_set() {
                debug!("abort flag raised after cell ({}, {})", step.ix, step.iy);
                return Err(ScanError::AbortRequested);
            }
        }
        Ok(start)
    }

    fn move_stage<S: PositionerStage + ?Sized>(
        &self,
        stage: &mut S,
        target: Target,
        point: Point,
    ) -> Result<(), ScanError> {
        stage
            .move_to(target, point, self.move_timeout)
            .map_err(|e| {
                warn!("{target} move to {point:?} failed: {e}");
                match e {
                    StageError::Timeout(timeout) => ScanError::HardwareTimeout {
                        device: Device::Stage,
                        timeout,
                    },
                    StageError::Rejected | StageError::Fault(_) => {
                        ScanError::MotionFailure { target, point }
                    }
                }
            })
    }

    fn read<M: PowerMeter + ?Sized>(&self, meter: &SharedMeter<M>) -> Result<f64, ScanError> {
        let mut meter = meter.lock().map_err(|_| ScanError::MeterUnavailable)?;
        meter
            .read_power(self.passes, self.measure_timeout)
            .map_err(|e| match e {
                MeterError::Timeout(timeout) => ScanError::HardwareTimeout {
                    device: Device::PowerMeter,
                    timeout,
                },
                MeterError::Fault(msg) => ScanError::MeterFailure(msg),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::grid::StartPosition;
    use crate::hardware::LaserSource;
    use crate::sim::{SimBench, SimMeter, SimStage};

    fn bench(field: fn(Point, Point) -> f64) -> (SimBench, SimStage, SharedMeter<SimMeter>) {
        let bench = SimBench::new([1.0, 2.0, 3.0], [0.0; 3]);
        bench.laser().activate();
        let stage = bench.stage();
        let meter = Arc::new(Mutex::new(bench.meter(Box::new(field))));
        (bench, stage, meter)
    }

    fn controller(abort: &AbortFlag) -> ScanController {
        let mut c = ScanController::new(abort.clone());
        c.settle_delay(Duration::ZERO);
        c
    }

    fn region(origin: StartPosition, nx: usize, ny: usize) -> ScanRegion {
        ScanRegion::new(origin, 4.0, 2.0, nx, ny).unwrap()
    }

    #[test]
    fn measures_every_cell_in_serpentine_order() {
        let (bench, mut stage, meter) = bench(|p, _| p[0] * 100.0 + p[1]);
        let region = region(StartPosition::Xyz([12.0, 11.0, 7.0]), 4, 2);
        let mut grid = SampleGrid::new(&region);
        let mut fractions = Vec::new();
        let start = controller(&AbortFlag::new())
            .run(
                &mut stage,
                &meter,
                Target::Input,
                &region,
                &mut grid,
                &mut |f: f64, g: &SampleGrid| fractions.push((f, g.measured_count())),
            )
            .unwrap();

        assert_eq!(start, [10.0, 10.0, 7.0]);
        assert_eq!(grid.measured_count(), 8);
        for ix in 0..4 {
            for iy in 0..2 {
                let expected = (10.0 + ix as f64) * 100.0 + 10.0 + iy as f64;
                assert!((grid.intensity[[ix, iy]] - expected).abs() < 1e-9);
            }
        }
        assert_eq!(
            fractions,
            (1..=8).map(|n| (n as f64 / 8.0, n)).collect::<Vec<_>>()
        );

        let moves: Vec<String> = bench
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("stage.move"))
            .collect();
        assert_eq!(
            moves,
            vec![
                "stage.move_input (10.000, 10.000, 7.000)",
                "stage.move_input (10.000, 10.000, 7.000)",
                "stage.move_input (11.000, 10.000, 7.000)",
                "stage.move_input (12.000, 10.000, 7.000)",
                "stage.move_input (13.000, 10.000, 7.000)",
                "stage.move_input (13.000, 11.000, 7.000)",
                "stage.move_input (12.000, 11.000, 7.000)",
                "stage.move_input (11.000, 11.000, 7.000)",
                "stage.move_input (10.000, 11.000, 7.000)",
            ]
        );
    }

    #[test]
    fn start_point_uses_current_z_or_position() {
        let (bench, mut stage, meter) = bench(|_, _| 1.0);
        let c = controller(&AbortFlag::new());

        let xy = region(StartPosition::Xy([5.0, 5.0]), 1, 1);
        let mut grid = SampleGrid::new(&xy);
        let start = c
            .run(&mut stage, &meter, Target::Input, &xy, &mut grid, &mut |_: f64, _: &SampleGrid| {})
            .unwrap();
        assert_eq!(start, [3.0, 4.0, 3.0]);

        let current = region(StartPosition::Current, 1, 1);
        let mut grid = SampleGrid::new(&current);
        let start = c
            .run(&mut stage, &meter, Target::Output, &current, &mut grid, &mut |_: f64, _: &SampleGrid| {})
            .unwrap();
        assert_eq!(start, [0.0; 3]);
        assert_eq!(bench.output_position(), [0.0; 3]);
        assert_eq!(bench.input_position(), [3.0, 4.0, 3.0]);
    }

    #[test]
    fn abort_before_start_touches_no_hardware() {
        let (bench, mut stage, meter) = bench(|_, _| 1.0);
        let calls_before = bench.calls().len();
        let abort = AbortFlag::new();
        abort.set();
        let region = region(StartPosition::Current, 3, 3);
        let mut grid = SampleGrid::new(&region);
        let mut updates = 0;
        let res = controller(&abort).run(
            &mut stage,
            &meter,
            Target::Input,
            &region,
            &mut grid,
            &mut |_: f64, _: &SampleGrid| updates += 1,
        );
        assert_eq!(res, Err(ScanError::AbortRequested));
        assert_eq!(bench.calls().len(), calls_before);
        assert_eq!(updates, 0);
        assert_eq!(grid.measured_count(), 0);
    }

    #[test]
    fn move_failure_stops_at_the_failing_cell() {
        for k in 0..9 {
            let (_, mut stage, meter) = bench(|_, _| 2.0);
            // move 0 goes to the start point, move k + 1 to the k-th visited cell
            stage.fail_move_at(Some(k + 1));
            let region = region(StartPosition::Current, 3, 3);
            let mut grid = SampleGrid::new(&region);
            let res = controller(&AbortFlag::new()).run(
                &mut stage,
                &meter,
                Target::Input,
                &region,
                &mut grid,
                &mut |_: f64, _: &SampleGrid| {},
            );
            assert!(matches!(res, Err(ScanError::MotionFailure { .. })));

            let visited: Vec<(usize, usize)> =
                serpentine(3, 3).map(|s| (s.ix, s.iy)).collect();
            for (n, (ix, iy)) in visited.iter().enumerate() {
                assert_eq!(grid.is_measured(*ix, *iy), n < k, "cell {n} with failure at {k}");
            }
        }
    }

    #[test]
    fn failed_move_to_start_measures_nothing() {
        let (_, mut stage, meter) = bench(|_, _| 2.0);
        stage.fail_move_at(Some(0));
        let region = region(StartPosition::Xy([0.0, 0.0]), 2, 2);
        let mut grid = SampleGrid::new(&region);
        let res = controller(&AbortFlag::new()).run(
            &mut stage,
            &meter,
            Target::Output,
            &region,
            &mut grid,
            &mut |_: f64, _: &SampleGrid| {},
        );
        assert_eq!(
            res,
            Err(ScanError::MotionFailure {
                target: Target::Output,
                point: [-2.0, -1.0, 0.0]
            })
        );
        assert_eq!(grid.measured_count(), 0);
    }

    #[test]
    fn timeouts_are_reported() {
        let (_, mut stage, meter) = bench(|_, _| 2.0);
        stage.move_duration(Duration::from_secs(60));
        let region = region(StartPosition::Current, 2, 2);
        let mut grid = SampleGrid::new(&region);
        let mut c = controller(&AbortFlag::new());
        c.move_timeout(Duration::from_millis(5));
        let res = c.run(&mut stage, &meter, Target::Input, &region, &mut grid, &mut |_: f64, _: &SampleGrid| {});
        assert_eq!(
            res,
            Err(ScanError::HardwareTimeout {
                device: Device::Stage,
                timeout: Duration::from_millis(5)
            })
        );

        let (_, mut stage, meter) = bench(|_, _| 2.0);
        meter.lock().unwrap().read_duration(Duration::from_secs(60));
        let res = c.run(&mut stage, &meter, Target::Input, &region, &mut grid, &mut |_: f64, _: &SampleGrid| {});
        assert!(matches!(
            res,
            Err(ScanError::HardwareTimeout {
                device: Device::PowerMeter,
                ..
            })
        ));
    }

    #[test]
    fn per_cell_abort() {
        let (_, mut stage, meter) = bench(|_, _| 2.0);
        let abort = AbortFlag::new();
        let mut c = controller(&abort);
        c.abort_check(AbortCheck::EveryCell);
        let region = region(StartPosition::Current, 3, 3);
        let mut grid = SampleGrid::new(&region);
        let remote = abort.clone();
        let res = c.run(
            &mut stage,
            &meter,
            Target::Input,
            &region,
            &mut grid,
            &mut |_: f64, g: &SampleGrid| {
                if g.measured_count() == 4 {
                    remote.set();
                }
            },
        );
        assert_eq!(res, Err(ScanError::AbortRequested));
        assert_eq!(grid.measured_count(), 4);
    }

    #[test]
    fn non_finite_readings_stay_unmeasured() {
        let (_, mut stage, meter) = bench(|p, _| if p[0] > 1.5 { f64::NAN } else { 1.0 });
        let region = region(StartPosition::Current, 4, 1);
        let mut grid = SampleGrid::new(&region);
        controller(&AbortFlag::new())
            .run(&mut stage, &meter, Target::Input, &region, &mut grid, &mut |_: f64, _: &SampleGrid| {})
            .unwrap();
        // current x is 1.0, cells sit at x = 1, 2, 3, 4
        assert!(grid.is_measured(0, 0));
        assert_eq!(grid.measured_count(), 1);
    }
}
