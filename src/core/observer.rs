//! The observer synthesizes what the resolver gets to see: a sequence of noisy
//! spatial glimpses of objects placed on the grid, and a shape-feature vector
//! for every glimpse.
//!
//! Placement:
//! - `numerosity` distinct locations are drawn uniformly without replacement.
//! - The glimpse sequence visits every object at least once (when it is long enough),
//!   padding with shuffled repeats of the object list, and is shuffled at the end.
//!
//! Noise:
//! - Each coordinate is perturbed by Gaussian noise with scale `nl / 2`, where
//!   `nl = 0.1 * noise_level`. Components larger than `nl` in magnitude are redrawn
//!   with scale `nl` until they fit, so a glimpse never lands further than
//!   `max_dist` from the object it observed.
//!
//! Shape evidence:
//! - Every object gets one shape label. The shape vector of a glimpse holds, per shape,
//!   the summed proximity of all objects of that shape within `max_dist`.

use super::grid::{GridConfig, Point};
use anyhow::{anyhow, bail, ensure, Result};
use rand::{
    seq::{IndexedRandom, IteratorRandom, SliceRandom},
    Rng,
};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

/// Noisy positional observations of a random object placement.
#[derive(Debug, Clone)]
pub struct GlimpseSample {
    /// Observed coordinates, one per glimpse.
    pub xy: Vec<Point>,

    /// Location index of the object each glimpse observed.
    pub objects: Vec<usize>,

    /// Noiseless coordinates of the object each glimpse observed.
    pub object_coords: Vec<Point>,
}

impl GlimpseSample {
    /// Distinct object locations in ascending order.
    pub fn unique_objects(&self) -> Vec<usize> {
        let mut unique = self.objects.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }
}

/// Proximity-weighted shape features for a glimpse sequence.
#[derive(Debug, Clone)]
pub struct ShapeEvidence {
    /// `shape_coords[g][s]` is the evidence for shape `s` in glimpse `g`.
    pub shape_coords: Vec<Vec<f64>>,

    /// Shape label assigned to each occupied location.
    pub shape_map: BTreeMap<usize, usize>,

    /// Number of objects carrying each shape.
    pub shape_hist: Vec<usize>,
}

/// Places `numerosity` objects on the grid and takes `n_glimpses` noisy looks at them.
pub fn sample_glimpses<R: Rng + ?Sized>(
    grid: &GridConfig,
    numerosity: usize,
    noise_level: f64,
    n_glimpses: usize,
    rng: &mut R,
) -> Result<GlimpseSample> {
    ensure!(numerosity > 0, "cannot glimpse an empty grid");
    ensure!(
        numerosity <= grid.num_locations(),
        "cannot place {numerosity} objects on {} locations",
        grid.num_locations()
    );

    let mut objects = (0..grid.num_locations()).choose_multiple(rng, numerosity);
    objects.shuffle(rng);

    let mut glimpsed = objects.clone();
    while glimpsed.len() < n_glimpses {
        let mut repeat = glimpsed.clone();
        repeat.shuffle(rng);
        glimpsed.extend(repeat);
    }
    glimpsed.truncate(n_glimpses);
    glimpsed.shuffle(rng);

    let nl = 0.1 * noise_level;
    let noise_x = truncated_noise(nl, n_glimpses, rng)?;
    let noise_y = truncated_noise(nl, n_glimpses, rng)?;

    let object_coords: Vec<Point> = glimpsed.iter().map(|&obj| grid.location(obj)).collect();
    let xy = object_coords
        .iter()
        .zip(noise_x.iter().zip(&noise_y))
        .map(|(&[x, y], (&dx, &dy))| [x + dx, y + dy])
        .collect();

    Ok(GlimpseSample {
        xy,
        objects: glimpsed,
        object_coords,
    })
}

/// Draws `n` noise components bounded by `nl` in magnitude.
fn truncated_noise<R: Rng + ?Sized>(nl: f64, n: usize, rng: &mut R) -> Result<Vec<f64>> {
    if nl == 0.0 {
        return Ok(vec![0.0; n]);
    }

    let narrow = Normal::new(0.0, nl / 2.0).map_err(|e| anyhow!("invalid noise scale: {e}"))?;
    let wide = Normal::new(0.0, nl).map_err(|e| anyhow!("invalid noise scale: {e}"))?;

    Ok((0..n)
        .map(|_| {
            let mut value: f64 = narrow.sample(rng);
            while value.abs() > nl {
                value = wide.sample(rng);
            }
            value
        })
        .collect())
}

/// Assigns a shape to every glimpsed object and computes the per-glimpse shape vectors.
///
/// # Arguments
///
/// * `shapes` - The shape labels to draw from.
/// * `n_shapes` - Length of each shape vector; every label in `shapes` must be below it.
/// * `same` - Whether all objects in the example share one shape.
pub fn synthesize_shapes<R: Rng + ?Sized>(
    grid: &GridConfig,
    sample: &GlimpseSample,
    shapes: &[usize],
    n_shapes: usize,
    same: bool,
    rng: &mut R,
) -> Result<ShapeEvidence> {
    ensure!(!shapes.is_empty(), "shape set is empty");
    if let Some(&bad) = shapes.iter().find(|&&s| s >= n_shapes) {
        bail!("shape {bad} does not fit into {n_shapes} shape slots");
    }

    let unique = sample.unique_objects();
    let shared = shapes.choose(rng).copied();
    let shape_map: BTreeMap<usize, usize> = unique
        .iter()
        .map(|&obj| {
            let shape = if same {
                shared
            } else {
                shapes.choose(rng).copied()
            };
            (obj, shape.unwrap_or(shapes[0]))
        })
        .collect();

    let mut shape_hist = vec![0; n_shapes];
    for &shape in shape_map.values() {
        shape_hist[shape] += 1;
    }

    let mut shape_coords = vec![vec![0.0; n_shapes]; sample.xy.len()];
    for (glimpse, (&point, row)) in sample.xy.iter().zip(shape_coords.iter_mut()).enumerate() {
        for (&obj, &shape) in &shape_map {
            if grid.is_within(point, obj) {
                row[shape] += grid.proximity(point, obj);
            }
        }

        if row.iter().sum::<f64>() <= 0.0 {
            bail!("glimpse {glimpse} at {point:?} carries no shape evidence");
        }
    }

    Ok(ShapeEvidence {
        shape_coords,
        shape_map,
        shape_hist,
    })
}
