#![warn(clippy::pedantic)]
#![allow(clippy::many_single_char_names, clippy::cast_precision_loss)]

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;

/// B-spline basis of odd degree with not-a-knot end conditions over a set of strictly increasing
/// sample coordinates. The basis has exactly one function per sample.
#[derive(Debug, Clone)]
pub(crate) struct BSplineBasis {
    degree: usize,
    knots: Vec<f64>,
}

impl BSplineBasis {
    pub(crate) fn not_a_knot(points: &[f64], degree: usize, axis: char) -> Result<Self, FitError> {
        let n = points.len();
        if n <= degree {
            return Err(FitError::InsufficientPoints {
                axis,
                degree,
                got: n,
            });
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(FitError::NonFinite("sample coordinates"));
        }
        if points.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::DegenerateAxis(axis));
        }
        // odd degree: drop (degree + 1) / 2 samples from each end as interior knots
        let m = (degree + 1) / 2;
        let mut knots = Vec::with_capacity(n + degree + 1);
        knots.extend(std::iter::repeat(points[0]).take(degree + 1));
        knots.extend_from_slice(&points[m..n - m]);
        knots.extend(std::iter::repeat(points[n - 1]).take(degree + 1));
        Ok(BSplineBasis { degree, knots })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.knots.len() - self.degree - 1
    }

    /// Knot interval containing `x`, which must lie within the knot range.
    fn span(&self, x: f64) -> usize {
        let n = self.len();
        let mut mu = self.degree;
        while mu < n - 1 && x >= self.knots[mu + 1] {
            mu += 1;
        }
        mu
    }

    /// Values of the `degree + 1` basis functions that are non-zero on `span`, written to `out`.
    fn nonzero_basis(&self, x: f64, span: usize, out: &mut [f64], left: &mut [f64], right: &mut [f64]) {
        let t = &self.knots;
        out[0] = 1.0;
        for j in 1..=self.degree {
            left[j] = x - t[span + 1 - j];
            right[j] = t[span + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = out[r] / (right[r + 1] + left[j - r]);
                out[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            out[j] = saved;
        }
    }

    /// `x` limited to the first and last knots, which are the end samples.
    #[inline]
    fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.knots[0], self.knots[self.knots.len() - 1])
    }

    /// `xs.len() x self.len()` matrix of basis function values. Coordinates outside the sampled
    /// range are evaluated at the nearer end, so the spline continues flat past its end samples.
    pub(crate) fn design_matrix(&self, xs: &[f64]) -> DMatrix<f64> {
        let p = self.degree;
        let mut m = DMatrix::zeros(xs.len(), self.len());
        let mut values = vec![0.0; p + 1];
        let mut left = vec![0.0; p + 1];
        let mut right = vec![0.0; p + 1];
        for (row, &x) in xs.iter().enumerate() {
            let x = self.clamp(x);
            let span = self.span(x);
            self.nonzero_basis(x, span, &mut values, &mut left, &mut right);
            for (j, v) in values.iter().enumerate() {
                m[(row, span - p + j)] = *v;
            }
        }
        m
    }
}

/// Tensor-product B-spline surface `s(x, y) = sum_ij c_ij Bx_i(x) By_j(y)`.
#[derive(Debug, Clone)]
pub(crate) struct TensorSpline {
    bx: BSplineBasis,
    by: BSplineBasis,
    coefficients: DMatrix<f64>,
}

impl TensorSpline {
    /// Spline through every value of a rectilinear grid; `values[(i, j)]` sits at `(xs[i], ys[j])`.
    pub(crate) fn interpolate(
        xs: &[f64],
        ys: &[f64],
        values: &DMatrix<f64>,
        degree: usize,
    ) -> Result<Self, FitError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("measured grid"));
        }
        let (bx, by) = rayon::join(
            || BSplineBasis::not_a_knot(xs, degree, 'x'),
            || BSplineBasis::not_a_knot(ys, degree, 'y'),
        );
        let (bx, by) = (bx?, by?);

        let collocation_x = bx.design_matrix(xs).lu();
        let collocation_y = by.design_matrix(ys).lu();
        if !(collocation_x.is_invertible() && collocation_y.is_invertible()) {
            return Err(FitError::Singular);
        }
        let partial = collocation_x.solve(values).ok_or(FitError::Singular)?;
        let coefficients = collocation_y
            .solve(&partial.transpose())
            .ok_or(FitError::Singular)?
            .transpose();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FitError::NonFinite("spline coefficients"));
        }
        Ok(TensorSpline {
            bx,
            by,
            coefficients,
        })
    }

    /// Least-squares bicubic fit to scattered samples. The knots are placed on the distinct x and y
    /// coordinates; the fit is rejected if the samples do not determine every coefficient.
    pub(crate) fn least_squares(
        x: &[f64],
        y: &[f64],
        values: &[f64],
        degree: usize,
    ) -> Result<Self, FitError> {
        if values.iter().chain(x).chain(y).any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("scattered samples"));
        }
        let (xs, ys) = (distinct(x), distinct(y));
        let (bx, by) = rayon::join(
            || BSplineBasis::not_a_knot(&xs, degree, 'x'),
            || BSplineBasis::not_a_knot(&ys, degree, 'y'),
        );
        let (bx, by) = (bx?, by?);
        let (nbx, nby) = (bx.len(), by.len());
        if values.len() < nbx * nby {
            return Err(FitError::Singular);
        }

        let ex = bx.design_matrix(x);
        let ey = by.design_matrix(y);
        let a = DMatrix::from_fn(values.len(), nbx * nby, |p, c| {
            ex[(p, c / nby)] * ey[(p, c % nby)]
        });
        let b = DVector::from_column_slice(values);

        let svd = a.svd(true, true);
        let tolerance = f64::EPSILON * (values.len().max(nbx * nby) as f64) * svd.singular_values.max();
        if svd.rank(tolerance) < nbx * nby {
            return Err(FitError::Singular);
        }
        let solution = svd.solve(&b, tolerance).map_err(|_| FitError::Singular)?;
        let coefficients = DMatrix::from_fn(nbx, nby, |i, j| solution[i * nby + j]);
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FitError::NonFinite("spline coefficients"));
        }
        Ok(TensorSpline {
            bx,
            by,
            coefficients,
        })
    }

    /// Surface values on the grid `xs x ys`, shape `(xs.len(), ys.len())`.
    pub(crate) fn evaluate_grid(&self, xs: &[f64], ys: &[f64]) -> Result<DMatrix<f64>, FitError> {
        let ex = self.bx.design_matrix(xs);
        let ey = self.by.design_matrix(ys);
        let out = ex * &self.coefficients * ey.transpose();
        if out.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("interpolated surface"));
        }
        Ok(out)
    }
}

fn distinct(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_a_partition_of_unity() {
        let points = [0.0, 1.0, 2.5, 3.0, 4.0, 6.0, 7.0];
        for degree in [1, 3, 5] {
            let basis = BSplineBasis::not_a_knot(&points, degree, 'x').unwrap();
            assert_eq!(basis.len(), points.len());
            let xs: Vec<f64> = (0..=70_i32).map(|i| f64::from(i) * 0.1).collect();
            let m = basis.design_matrix(&xs);
            for row in m.row_iter() {
                assert!((row.sum() - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn linear_collocation_is_identity() {
        let points = [0.0, 2.0, 4.0, 6.0];
        let basis = BSplineBasis::not_a_knot(&points, 1, 'x').unwrap();
        let m = basis.design_matrix(&points);
        assert!((m - DMatrix::<f64>::identity(4, 4)).abs().max() < 1e-12);
    }

    #[test]
    fn rejects_bad_axes() {
        assert_eq!(
            BSplineBasis::not_a_knot(&[0.0, 1.0, 2.0], 3, 'y').unwrap_err(),
            FitError::InsufficientPoints {
                axis: 'y',
                degree: 3,
                got: 3
            }
        );
        assert_eq!(
            BSplineBasis::not_a_knot(&[0.0, 0.0, 0.0], 1, 'x').unwrap_err(),
            FitError::DegenerateAxis('x')
        );
    }

    #[test]
    fn cubic_reproduces_cubic_polynomials() {
        let f = |x: f64, y: f64| 0.5 * x * x * x - 2.0 * x * y + y * y + 3.0;
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [0.0, 0.5, 1.5, 2.0, 3.0];
        let values = DMatrix::from_fn(xs.len(), ys.len(), |i, j| f(xs[i], ys[j]));
        let spline = TensorSpline::interpolate(&xs, &ys, &values, 3).unwrap();
        let ex = [0.25, 1.7, 4.9, 5.0];
        let ey = [0.0, 0.1, 2.2, 3.0];
        let out = spline.evaluate_grid(&ex, &ey).unwrap();
        for (i, x) in ex.iter().enumerate() {
            for (j, y) in ey.iter().enumerate() {
                assert!((out[(i, j)] - f(*x, *y)).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn flat_past_the_end_samples() {
        let f = |x: f64, y: f64| x * x - 3.0 * y + x * y;
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = [1.0, 2.0, 3.0, 4.0];
        let values = DMatrix::from_fn(xs.len(), ys.len(), |i, j| f(xs[i], ys[j]));
        for degree in [1, 3] {
            let spline = TensorSpline::interpolate(&xs, &ys, &values, degree).unwrap();
            let out = spline
                .evaluate_grid(&[-2.0, 0.0, 4.0, 4.5, 9.0], &[0.0, 1.0, 4.0, 6.0])
                .unwrap();
            for (i, x) in [0.0, 0.0, 4.0, 4.0, 4.0].iter().enumerate() {
                for (j, y) in [1.0, 1.0, 4.0, 4.0].iter().enumerate() {
                    assert!((out[(i, j)] - f(*x, *y)).abs() < 1e-9, "degree {degree}");
                }
            }
        }
    }

    #[test]
    fn least_squares_matches_interpolation_on_full_grid() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = [0.0, 1.0, 2.0, 3.0, 4.0];
        let f = |x: f64, y: f64| (x * 0.7).sin() + (y * 0.3).cos();
        let mut px = Vec::new();
        let mut py = Vec::new();
        let mut pv = Vec::new();
        for x in xs {
            for y in ys {
                px.push(x);
                py.push(y);
                pv.push(f(x, y));
            }
        }
        let grid = DMatrix::from_fn(5, 5, |i, j| f(xs[i], ys[j]));
        let a = TensorSpline::interpolate(&xs, &ys, &grid, 3).unwrap();
        let b = TensorSpline::least_squares(&px, &py, &pv, 3).unwrap();
        let points = [0.3, 1.9, 3.6];
        let diff = a.evaluate_grid(&points, &points).unwrap() - b.evaluate_grid(&points, &points).unwrap();
        assert!(diff.abs().max() < 1e-8);
    }

    #[test]
    fn least_squares_rejects_underdetermined_samples() {
        // four distinct x and y but only the diagonal is sampled
        let x = [0.0, 1.0, 2.0, 3.0];
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            TensorSpline::least_squares(&x, &x, &v, 3).unwrap_err(),
            FitError::Singular
        );
    }
}
