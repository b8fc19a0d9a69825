#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
//! Surface interpolation over a measured sample grid, used to refine the location of the coupled
//! power maximum between the sampled points.

use std::fmt;

use nalgebra::DMatrix;
use ndarray::Array2;
use tracing::{debug, warn};

use crate::error::FitError;
use crate::grid::{linspace, meshgrid, SampleGrid};
use crate::hardware::{add, Point};
use crate::maxima::find_maximum;

mod spline;

use spline::TensorSpline;

pub const DEFAULT_DEPTH: usize = 100;

/// Surface-fitting algorithm applied to a measured grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Linear,
    #[default]
    Cubic,
    Quintic,
    BivariateSpline,
    None,
}

impl Interpolation {
    /// Looks up an algorithm by name, ignoring case and separators. Unrecognized names select
    /// [`Interpolation::None`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let key: String = name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "linear" => Interpolation::Linear,
            "cubic" => Interpolation::Cubic,
            "quintic" => Interpolation::Quintic,
            "bivariatespline" | "bispline" => Interpolation::BivariateSpline,
            "none" | "" => Interpolation::None,
            _ => {
                warn!("unrecognized interpolation '{name}'; interpolation disabled");
                Interpolation::None
            }
        }
    }

    /// Polynomial degree of the spline, or `None` when no surface is fitted.
    #[must_use]
    pub fn degree(self) -> Option<usize> {
        match self {
            Interpolation::Linear => Some(1),
            Interpolation::Cubic | Interpolation::BivariateSpline => Some(3),
            Interpolation::Quintic => Some(5),
            Interpolation::None => None,
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolation::Linear => write!(f, "Linear"),
            Interpolation::Cubic => write!(f, "Cubic"),
            Interpolation::Quintic => write!(f, "Quintic"),
            Interpolation::BivariateSpline => write!(f, "Bivariate Spline"),
            Interpolation::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbsenceReason {
    /// The pass asked for no interpolation.
    NotRequested,
    /// The pass failed before the measurement step completed.
    NotAttempted,
    Failed(FitError),
}

impl fmt::Display for AbsenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsenceReason::NotRequested => write!(f, "interpolation not requested"),
            AbsenceReason::NotAttempted => write!(f, "pass ended before interpolation"),
            AbsenceReason::Failed(e) => write!(f, "interpolation failed: {e}"),
        }
    }
}

/// Maximum of an interpolated surface, with its position in absolute stage coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinedMaximum {
    pub index: (usize, usize),
    pub value: f64,
    pub position: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    Computed {
        intensity: Array2<f64>,
        refined: RefinedMaximum,
    },
    Absent(AbsenceReason),
}

/// The dense grid of a pass and whatever was computed on it.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedSurface {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub surface: Surface,
}

impl InterpolatedSurface {
    #[must_use]
    pub fn absent(x: Array2<f64>, y: Array2<f64>, reason: AbsenceReason) -> Self {
        InterpolatedSurface {
            x,
            y,
            surface: Surface::Absent(reason),
        }
    }

    #[must_use]
    pub fn intensity(&self) -> Option<&Array2<f64>> {
        match &self.surface {
            Surface::Computed { intensity, .. } => Some(intensity),
            Surface::Absent(_) => None,
        }
    }

    #[must_use]
    pub fn refined(&self) -> Option<&RefinedMaximum> {
        match &self.surface {
            Surface::Computed { refined, .. } => Some(refined),
            Surface::Absent(_) => None,
        }
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        matches!(self.surface, Surface::Computed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Interpolator {
    method: Interpolation,
    depth: usize,
    exclude_trailing_edge: bool,
}

impl Interpolator {
    #[must_use]
    pub fn new(method: Interpolation) -> Self {
        Interpolator {
            method,
            depth: DEFAULT_DEPTH,
            exclude_trailing_edge: true,
        }
    }

    /// Samples per axis of the dense grid; clamped to at least 2.
    pub fn depth(&mut self, depth: usize) -> &mut Self {
        self.depth = depth.max(2);
        self
    }

    /// Leave the last row and column of the dense grid out of the refined maximum search.
    pub fn exclude_trailing_edge(&mut self, exclude: bool) -> &mut Self {
        self.exclude_trailing_edge = exclude;
        self
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> Interpolation {
        self.method
    }

    /// Axes of the dense grid, spanning `[0, width] x [0, height]` inclusive.
    #[must_use]
    pub fn dense_axes(&self, width: f64, height: f64) -> (Vec<f64>, Vec<f64>) {
        (
            linspace(0.0, width, self.depth, true),
            linspace(0.0, height, self.depth, true),
        )
    }

    /// Fits the configured surface to `grid` and evaluates it on the dense axes. Returns `None`
    /// for [`Interpolation::None`].
    ///
    /// # Errors
    /// Returns the [`FitError`] that stopped the fit.
    pub fn fit(
        &self,
        grid: &SampleGrid,
        dense_x: &[f64],
        dense_y: &[f64],
    ) -> Result<Option<Array2<f64>>, FitError> {
        let (nx, ny) = grid.shape();
        let spline = match self.method {
            Interpolation::None => return Ok(None),
            Interpolation::BivariateSpline => {
                let finite: Vec<(f64, f64, f64)> = grid
                    .x
                    .iter()
                    .zip(grid.y.iter())
                    .zip(grid.intensity.iter())
                    .filter(|(_, v)| v.is_finite())
                    .map(|((x, y), v)| (*x, *y, *v))
                    .collect();
                let px: Vec<f64> = finite.iter().map(|p| p.0).collect();
                let py: Vec<f64> = finite.iter().map(|p| p.1).collect();
                let pv: Vec<f64> = finite.iter().map(|p| p.2).collect();
                TensorSpline::least_squares(&px, &py, &pv, 3)?
            }
            method => {
                let degree = method.degree().unwrap_or(1);
                let values = DMatrix::from_fn(nx, ny, |i, j| grid.intensity[[i, j]]);
                TensorSpline::interpolate(&grid.x_axis(), &grid.y_axis(), &values, degree)?
            }
        };
        let dense = spline.evaluate_grid(dense_x, dense_y)?;
        Ok(Some(Array2::from_shape_fn(dense.shape(), |(i, j)| {
            dense[(i, j)]
        })))
    }

    /// Interpolates `grid` and locates the refined maximum, mapping it into absolute stage
    /// coordinates with `start`. Every failure is folded into an absent surface.
    ///
    /// The surface is flat beyond the last measured row and column, so the refined position is
    /// clamped to the measured range along with the coordinate it was evaluated at.
    #[must_use]
    pub fn refine(&self, grid: &SampleGrid, width: f64, height: f64, start: Point) -> InterpolatedSurface {
        let (xs, ys) = self.dense_axes(width, height);
        let (x, y) = meshgrid(&xs, &ys);

        let intensity = match self.fit(grid, &xs, &ys) {
            Ok(Some(intensity)) => intensity,
            Ok(None) => return InterpolatedSurface::absent(x, y, AbsenceReason::NotRequested),
            Err(e) => {
                warn!("{} interpolation failed: {e}", self.method);
                return InterpolatedSurface::absent(x, y, AbsenceReason::Failed(e));
            }
        };

        let limit = self
            .exclude_trailing_edge
            .then(|| (self.depth - 1, self.depth - 1));
        let max = match find_maximum(intensity.view(), limit) {
            Ok(max) => max,
            Err(_) => {
                let e = FitError::NonFinite("interpolated surface");
                warn!("{} interpolation failed: {e}", self.method);
                return InterpolatedSurface::absent(x, y, AbsenceReason::Failed(e));
            }
        };
        let (ix, iy) = max.index;
        let ([x_lo, x_hi], [y_lo, y_hi]) = measured_range(grid);
        let position = add(
            [
                x[[ix, iy]].clamp(x_lo, x_hi),
                y[[ix, iy]].clamp(y_lo, y_hi),
                0.0,
            ],
            start,
        );
        debug!(
            "refined maximum {:.4} at dense index ({ix}, {iy}), position {position:?}",
            max.value
        );
        InterpolatedSurface {
            x,
            y,
            surface: Surface::Computed {
                intensity,
                refined: RefinedMaximum {
                    index: max.index,
                    value: max.value,
                    position,
                },
            },
        }
    }
}

/// Extent of the measured cells of `grid` as `([x_min, x_max], [y_min, y_max])`.
fn measured_range(grid: &SampleGrid) -> ([f64; 2], [f64; 2]) {
    let init = ([f64::INFINITY, f64::NEG_INFINITY], [f64::INFINITY, f64::NEG_INFINITY]);
    grid.x
        .iter()
        .zip(grid.y.iter())
        .zip(grid.intensity.iter())
        .filter(|(_, v)| v.is_finite())
        .fold(init, |([x0, x1], [y0, y1]), ((x, y), _)| {
            ([x0.min(*x), x1.max(*x)], [y0.min(*y), y1.max(*y)])
        })
}
