use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use fiberalign::grid::{SampleGrid, ScanRegion, StartPosition};
use fiberalign::interpolate::{Interpolation, Interpolator};
use fiberalign::maxima::find_maximum;

fn noisy_peak(nx: usize, ny: usize) -> SampleGrid {
    let region = ScanRegion::new(StartPosition::Current, 20.0, 20.0, nx, ny).unwrap();
    let mut grid = SampleGrid::new(&region);
    let mut rng = rand::thread_rng();
    for ix in 0..nx {
        for iy in 0..ny {
            let (x, y) = (grid.x[[ix, iy]], grid.y[[ix, iy]]);
            let value = (-((x - 9.0).powi(2) + (y - 11.0).powi(2)) / 20.0).exp()
                + rng.gen_range(-0.01..0.01);
            grid.record(ix, iy, value);
        }
    }
    grid
}

pub fn interpolation(c: &mut Criterion) {
    let grid = noisy_peak(9, 9);
    for method in [
        Interpolation::Linear,
        Interpolation::Cubic,
        Interpolation::Quintic,
        Interpolation::BivariateSpline,
    ] {
        let interp = Interpolator::new(method);
        c.bench_function(&format!("refine 9x9 {method}"), |b| {
            b.iter(|| black_box(interp.refine(black_box(&grid), 20.0, 20.0, [0.0; 3])));
        });
    }
}

pub fn maxima(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let dense = ndarray::Array2::from_shape_fn((500, 500), |_| rng.gen_range(0.0..1.0));
    c.bench_function("find_maximum 500x500", |b| {
        b.iter(|| black_box(find_maximum(black_box(dense.view()), Some((499, 499)))));
    });
}

criterion_group!(benches, interpolation, maxima);
criterion_main!(benches);
