#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

use ndarray::Array2;

use crate::error::ScanError;
use crate::hardware::Point;

/// Where a pass is centred. With two or three coordinates the grid is centred on them; with none
/// the pass starts at the fiber's current position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StartPosition {
    Xyz(Point),
    Xy([f64; 2]),
    #[default]
    Current,
}

impl StartPosition {
    /// Interprets a coordinate list of length 3, 2, or anything else (current position).
    #[must_use]
    pub fn from_coords(coords: &[f64]) -> Self {
        match *coords {
            [x, y, z] => StartPosition::Xyz([x, y, z]),
            [x, y] => StartPosition::Xy([x, y]),
            _ => StartPosition::Current,
        }
    }

    /// Corner of the grid in absolute stage coordinates.
    #[must_use]
    pub fn start_point(&self, current: Point, width: f64, height: f64) -> Point {
        match *self {
            StartPosition::Xyz([x, y, z]) => [x - width * 0.5, y - height * 0.5, z],
            StartPosition::Xy([x, y]) => [x - width * 0.5, y - height * 0.5, current[2]],
            StartPosition::Current => current,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRegion {
    pub origin: StartPosition,
    width: f64,
    height: f64,
    nx: usize,
    ny: usize,
}

impl ScanRegion {
    /// # Errors
    /// Returns [`ScanError::InvalidRegion`] for negative or non-finite dimensions, or a zero sample
    /// count along either axis.
    pub fn new(
        origin: StartPosition,
        width: f64,
        height: f64,
        nx: usize,
        ny: usize,
    ) -> Result<Self, ScanError> {
        if !(width.is_finite() && width >= 0.0) || !(height.is_finite() && height >= 0.0) {
            return Err(ScanError::InvalidRegion(format!(
                "grid size {width} x {height} must be finite and non-negative"
            )));
        }
        if nx == 0 || ny == 0 {
            return Err(ScanError::InvalidRegion(format!(
                "grid needs at least one sample per axis, got {nx} x {ny}"
            )));
        }
        Ok(ScanRegion {
            origin,
            width,
            height,
            nx,
            ny,
        })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.width
    }
    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.height
    }
    #[inline]
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }
    #[inline]
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `num` evenly spaced values from `start` towards `stop`. With `endpoint` the last value is `stop`
/// itself; otherwise the interval is right-open.
#[must_use]
pub fn linspace(start: f64, stop: f64, num: usize, endpoint: bool) -> Vec<f64> {
    let divisions = match (num, endpoint) {
        (0, _) => return Vec::new(),
        (1, _) => return vec![start],
        (n, true) => n - 1,
        (n, false) => n,
    };
    let step = (stop - start) / divisions as f64;
    (0..num).map(|i| start + step * i as f64).collect()
}

/// Coordinate arrays of shape `(xs.len(), ys.len())`, indexed `[ix, iy]`.
#[must_use]
pub fn meshgrid(xs: &[f64], ys: &[f64]) -> (Array2<f64>, Array2<f64>) {
    let shape = (xs.len(), ys.len());
    (
        Array2::from_shape_fn(shape, |(ix, _)| xs[ix]),
        Array2::from_shape_fn(shape, |(_, iy)| ys[iy]),
    )
}

/// The directly measured grid of one pass. Unmeasured cells hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub intensity: Array2<f64>,
}

impl SampleGrid {
    /// Sample coordinates spanning `[0, width) x [0, height)`, relative to the pass start point.
    #[must_use]
    pub fn new(region: &ScanRegion) -> Self {
        let xs = linspace(0.0, region.width, region.nx, false);
        let ys = linspace(0.0, region.height, region.ny, false);
        let (x, y) = meshgrid(&xs, &ys);
        SampleGrid {
            x,
            y,
            intensity: Array2::from_elem((region.nx, region.ny), f64::NAN),
        }
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.intensity.dim()
    }

    #[must_use]
    pub fn x_axis(&self) -> Vec<f64> {
        self.x.column(0).to_vec()
    }

    #[must_use]
    pub fn y_axis(&self) -> Vec<f64> {
        self.y.row(0).to_vec()
    }

    #[inline]
    #[must_use]
    pub fn is_measured(&self, ix: usize, iy: usize) -> bool {
        self.intensity
            .get((ix, iy))
            .map_or(false, |value| !value.is_nan())
    }

    #[must_use]
    pub fn measured_count(&self) -> usize {
        self.intensity.iter().filter(|v| !v.is_nan()).count()
    }

    /// Grid coordinate of a cell, relative to the pass start point, z = 0.
    #[inline]
    #[must_use]
    pub fn offset(&self, ix: usize, iy: usize) -> Point {
        [self.x[[ix, iy]], self.y[[ix, iy]], 0.0]
    }

    /// Stores a finite measurement in an unmeasured cell. Returns false, leaving the grid untouched,
    /// if the cell is out of range, already measured, or `value` is not finite.
    pub fn record(&mut self, ix: usize, iy: usize, value: f64) -> bool {
        if !value.is_finite() || self.is_measured(ix, iy) {
            return false;
        }
        match self.intensity.get_mut((ix, iy)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }
}

/// One visited cell: its logical index and the fraction of the pass complete after measuring it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStep {
    pub ix: usize,
    pub iy: usize,
    pub progress: f64,
}

/// Boustrophedon traversal: rows (`iy`) outer, columns (`ix`) inner, ascending on even rows and
/// descending on odd rows.
#[derive(Debug, Clone)]
pub struct Serpentine {
    nx: usize,
    ny: usize,
    posn: usize,
}

#[must_use]
pub fn serpentine(nx: usize, ny: usize) -> Serpentine {
    Serpentine { nx, ny, posn: 0 }
}

impl Iterator for Serpentine {
    type Item = GridStep;
    fn next(&mut self) -> Option<Self::Item> {
        let total = self.nx * self.ny;
        if self.posn >= total {
            return None;
        }
        let iy = self.posn / self.nx;
        let col = self.posn % self.nx;
        self.posn += 1;
        // progress follows the logical position, so it is the same whichever way the row runs
        let progress = self.posn as f64 / total as f64;
        let ix = if iy % 2 == 0 { col } else { self.nx - 1 - col };
        Some(GridStep { ix, iy, progress })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.nx * self.ny - self.posn.min(self.nx * self.ny);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Serpentine {}
