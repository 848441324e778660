#![allow(dead_code)]

use glimpse_count::core::grid::Point;
use glimpse_count::GridConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shape evidence for glimpses at `points` of objects given as (location, shape) pairs,
/// computed the same way the observer does.
pub fn evidence(
    grid: &GridConfig,
    points: &[Point],
    objects: &[(usize, usize)],
    n_shapes: usize,
) -> Vec<Vec<f64>> {
    points
        .iter()
        .map(|&point| {
            let mut row = vec![0.0; n_shapes];
            for &(loc, shape) in objects {
                if grid.is_within(point, loc) {
                    row[shape] += grid.proximity(point, loc);
                }
            }
            row
        })
        .collect()
}

/// Objects per shape.
pub fn hist(objects: &[(usize, usize)], n_shapes: usize) -> Vec<usize> {
    let mut hist = vec![0; n_shapes];
    for &(_, shape) in objects {
        hist[shape] += 1;
    }
    hist
}

/// Glimpse coordinates exactly on the given locations.
pub fn centroids(grid: &GridConfig, locations: &[usize]) -> Vec<Point> {
    locations.iter().map(|&loc| grid.location(loc)).collect()
}
