//! Synthesis of labelled toy examples and whole datasets.
//!
//! An example is drawn for a fixed target numerosity, resolved symbolically, and kept only
//! if the resolver needed a number of passes inside the configured window. Fixing the
//! numerosity before resampling keeps the pass window from skewing the distribution of
//! numerosities.
//!
//! Datasets tile the numerosity range evenly. Every example draws from its own seeded
//! generator, so examples are produced in parallel and a seed reproduces a dataset exactly.

use super::{
    grid::{GridConfig, Point},
    observer::{sample_glimpses, synthesize_shapes},
    resolver::{GlimpsedImage, Resolution},
};
use crate::config::GeneratorConfig;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One labelled glimpse sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Observed glimpse coordinates.
    pub xy: Vec<Point>,
    /// Shape evidence per glimpse.
    pub shape: Vec<Vec<f64>>,
    /// The true number of objects.
    pub numerosity: usize,
    /// 1 for occupied locations, 0 otherwise. Ground truth, never shown to the resolver.
    pub locations: Vec<u8>,
    /// Object observed by each glimpse.
    pub objects: Vec<usize>,
    pub object_coords: Vec<Point>,
    pub shape_map: BTreeMap<usize, usize>,
    pub shape_hist: Vec<usize>,
    pub resolution: Resolution,
}

/// A generated dataset together with the configuration that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub config: GeneratorConfig,
    pub grid: GridConfig,
    pub examples: Vec<Example>,
}

impl Dataset {
    /// Writes the dataset in `bincode` format.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .with_context(|| format!("failed to write dataset to {}", path.display()))?;
        Ok(())
    }

    /// Reads a dataset written by [`Dataset::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("failed to read dataset from {}", path.display()))
    }

    /// Writes the dataset as pretty-printed JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        Ok(())
    }
}

/// Synthesizes one example with `num` objects whose resolution takes between
/// `config.min_pass` and `config.max_pass` passes.
///
/// Gives up with an error after `config.max_attempts` rejected draws.
pub fn generate_example<R: Rng + ?Sized>(
    num: usize,
    config: &GeneratorConfig,
    grid: &GridConfig,
    rng: &mut R,
) -> Result<Example> {
    let window = config.min_pass..=config.max_pass;

    for attempt in 1..=config.max_attempts {
        let sample = sample_glimpses(grid, num, grid.noise_level(), config.max_num, rng)?;
        let evidence = synthesize_shapes(
            grid,
            &sample,
            config.shapes.as_slice(),
            config.n_shapes,
            config.same,
            rng,
        )?;

        let mut image = GlimpsedImage::new(
            grid,
            sample.xy.clone(),
            evidence.shape_coords.clone(),
            &evidence.shape_hist,
            (config.min_num, config.max_num),
        );
        let resolution = image.resolve(config.max_pass);

        if !window.contains(&resolution.pass_count) {
            continue;
        }

        if attempt > 1 {
            debug!("numerosity {num}: accepted after {attempt} draws");
        }

        let occupied = sample.unique_objects();
        let locations = (0..grid.num_locations())
            .map(|loc| u8::from(occupied.binary_search(&loc).is_ok()))
            .collect();

        return Ok(Example {
            xy: sample.xy,
            shape: evidence.shape_coords,
            numerosity: num,
            locations,
            objects: sample.objects,
            object_coords: sample.object_coords,
            shape_map: evidence.shape_map,
            shape_hist: evidence.shape_hist,
            resolution,
        });
    }

    bail!(
        "no example with {num} objects resolved in {}..={} passes after {} draws",
        config.min_pass,
        config.max_pass,
        config.max_attempts
    )
}

/// Target numerosities for a dataset: `min..=max` repeated until `size` entries exist.
pub fn numerosity_schedule(min_num: usize, max_num: usize, size: usize) -> Vec<usize> {
    (min_num..=max_num).cycle().take(size).collect()
}

/// The random generator used for example `index` of a run seeded with `seed`.
pub fn example_rng(seed: u64, index: usize) -> StdRng {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&(index as u64).to_le_bytes());
    StdRng::from_seed(bytes)
}

/// Generates a full dataset.
pub fn generate_dataset(config: &GeneratorConfig) -> Result<Dataset> {
    config.validate()?;
    let grid = GridConfig::new(config.grid, config.noise_level)?;
    let nums = numerosity_schedule(config.min_num, config.max_num, config.size);

    info!(
        "generating {} examples, numerosity {}..={}, passes {}..={}, grid {}x{}",
        config.size,
        config.min_num,
        config.max_num,
        config.min_pass,
        config.max_pass,
        config.grid,
        config.grid
    );

    let examples = nums
        .par_iter()
        .enumerate()
        .map(|(i, &num)| {
            let mut rng = example_rng(config.seed, i);
            generate_example(num, config, &grid, &mut rng)
                .with_context(|| format!("example {i} failed"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Dataset {
        config: config.clone(),
        grid,
        examples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_tiles_the_range() {
        assert_eq!(numerosity_schedule(2, 4, 7), vec![2, 3, 4, 2, 3, 4, 2]);
        assert_eq!(numerosity_schedule(1, 1, 3), vec![1, 1, 1]);
    }

    #[test]
    fn example_rngs_differ_per_index() {
        let a: u64 = example_rng(1, 0).random();
        let b: u64 = example_rng(1, 1).random();
        let c: u64 = example_rng(1, 0).random();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn example_respects_the_pass_window() {
        let config = GeneratorConfig {
            min_pass: 2,
            max_pass: 4,
            grid: 3,
            min_num: 2,
            max_num: 5,
            ..Default::default()
        };
        let grid = GridConfig::new(config.grid, config.noise_level).unwrap();
        let mut rng = example_rng(3, 0);

        for num in 2..=5 {
            let example = generate_example(num, &config, &grid, &mut rng).unwrap();
            assert!((2..=4).contains(&example.resolution.pass_count));
            assert_eq!(example.numerosity, num);
            assert_eq!(example.locations.iter().filter(|&&b| b == 1).count(), num);
            assert_eq!(example.xy.len(), 5);
        }
    }

    #[test]
    fn impossible_window_gives_up() {
        // Pass zero needs the bounds to meet, which a 2..=7 range never allows.
        let config = GeneratorConfig {
            min_pass: 0,
            max_pass: 0,
            max_attempts: 20,
            ..Default::default()
        };
        let grid = GridConfig::new(config.grid, config.noise_level).unwrap();
        let mut rng = example_rng(0, 0);
        assert!(generate_example(3, &config, &grid, &mut rng).is_err());
    }
}
