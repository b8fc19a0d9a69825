#![warn(clippy::pedantic)]

use ndarray::ArrayView2;

use crate::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMaximum {
    pub index: (usize, usize),
    pub value: f64,
}

/// Largest finite value of `intensity`, searched in row-major order (`ix` outer, `iy` inner,
/// both ascending). Ties keep the first cell visited. NaN and infinite cells never win.
///
/// `limit` restricts the search to `[0, limit.0) x [0, limit.1)`.
///
/// # Errors
/// Returns [`ScanError::NoValidMeasurement`] if no cell in the searched range is finite.
pub fn find_maximum(
    intensity: ArrayView2<'_, f64>,
    limit: Option<(usize, usize)>,
) -> Result<GridMaximum, ScanError> {
    let (nx, ny) = intensity.dim();
    let (nx, ny) = limit.map_or((nx, ny), |(lx, ly)| (lx.min(nx), ly.min(ny)));

    let mut best: Option<GridMaximum> = None;
    for ix in 0..nx {
        for iy in 0..ny {
            let value = intensity[[ix, iy]];
            if !value.is_finite() {
                continue;
            }
            if best.map_or(true, |b| value > b.value) {
                best = Some(GridMaximum {
                    index: (ix, iy),
                    value,
                });
            }
        }
    }
    best.ok_or(ScanError::NoValidMeasurement)
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array2};
    use rand::Rng;

    use super::*;

    #[test]
    fn unique_maximum_is_stable() {
        let mut rng = rand::thread_rng();
        let mut data = Array2::from_shape_fn((7, 5), |_| rng.gen_range(-10.0..0.0));
        data[[4, 2]] = 3.0;
        for _ in 0..10 {
            let max = find_maximum(data.view(), None).expect("finite data");
            assert_eq!(max.index, (4, 2));
            assert_eq!(max.value, 3.0);
        }
    }

    #[test]
    fn ties_resolve_to_first_in_row_major_order() {
        let data = array![[0.0, 2.0, 1.0], [2.0, 0.0, 2.0]];
        for _ in 0..5 {
            assert_eq!(find_maximum(data.view(), None).unwrap().index, (0, 1));
        }
    }

    #[test]
    fn unmeasured_cells_are_skipped() {
        let data = array![[f64::NAN, -5.0], [f64::NAN, -7.0]];
        let max = find_maximum(data.view(), None).unwrap();
        assert_eq!(max.index, (0, 1));
        assert_eq!(max.value, -5.0);

        let data = array![[f64::INFINITY, -1.0]];
        assert_eq!(find_maximum(data.view(), None).unwrap().index, (0, 1));
    }

    #[test]
    fn all_unmeasured_is_an_error() {
        let data = Array2::<f64>::from_elem((3, 3), f64::NAN);
        assert_eq!(
            find_maximum(data.view(), None),
            Err(ScanError::NoValidMeasurement)
        );
        let empty = Array2::<f64>::zeros((0, 4));
        assert_eq!(
            find_maximum(empty.view(), None),
            Err(ScanError::NoValidMeasurement)
        );
    }

    #[test]
    fn limit_excludes_trailing_edge() {
        let mut data = Array2::<f64>::zeros((4, 4));
        data[[3, 1]] = 10.0;
        data[[1, 3]] = 9.0;
        data[[2, 2]] = 1.0;
        assert_eq!(find_maximum(data.view(), None).unwrap().index, (3, 1));
        let max = find_maximum(data.view(), Some((3, 3))).unwrap();
        assert_eq!(max.index, (2, 2));
        assert_eq!(max.value, 1.0);
    }
}
