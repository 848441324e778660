//! `GridConfig` describes the fixed K×K lattice of candidate object locations in the
//! normalized [0,1]×[0,1] space, together with the proximity radius implied by the
//! observation noise and the pixel cell each location maps to.
//!
//! Locations are indexed 0..K² in x-major order: location `i` sits in row `i / K`
//! (x coordinate) and column `i % K` (y coordinate). The grid provides conversions
//! between linear indices and (row, column) pairs, and answers the proximity queries
//! needed by both the glimpse synthesizer and the resolver.
//!
//! A run configures the grid once and shares it by reference; nothing mutates it.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Tolerance applied to every "within `max_dist`" comparison.
pub const EPS: f64 = 1e-7;

/// Width of one character bitmap in pixels.
pub const CHAR_WIDTH: usize = 4;

/// Height of one character bitmap in pixels.
pub const CHAR_HEIGHT: usize = 5;

/// A point in the normalized grid space.
pub type Point = [f64; 2];

/// Immutable grid geometry for one dataset-generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of rows (and columns) of the grid.
    side: usize,

    /// Coordinate values shared by both axes, ascending.
    axis: Vec<f64>,

    /// Centroid of every location, indexed by location.
    locations: Vec<Point>,

    /// Observation noise level the proximity radius was derived from.
    noise_level: f64,

    /// Maximum distance at which a glimpse can still refer to a location.
    max_dist: f64,
}

impl GridConfig {
    /// Creates the grid for `side`×`side` locations observed with the given noise level.
    pub fn new(side: usize, noise_level: f64) -> Result<Self> {
        ensure!(side > 0, "grid side must be positive");
        ensure!(
            noise_level.is_finite() && noise_level >= 0.0,
            "noise level must be a non-negative number, got {noise_level}"
        );

        let axis = Self::axis(side);
        let locations = axis
            .iter()
            .flat_map(|&x| axis.iter().map(move |&y| [x, y]))
            .collect();
        let nl = 0.1 * noise_level;

        Ok(Self {
            side,
            axis,
            locations,
            noise_level,
            max_dist: (nl * nl + nl * nl).sqrt(),
        })
    }

    /// Axis values for a grid side. Sides 3 and 9 use the canonical layouts, anything
    /// else is spread evenly over [0.1, 0.9].
    fn axis(side: usize) -> Vec<f64> {
        match side {
            1 => vec![0.1],
            3 => vec![0.2, 0.5, 0.8],
            9 => (1..=9).map(|i| i as f64 / 10.0).collect(),
            _ => {
                let step = 0.8 / (side - 1) as f64;
                let mut values: Vec<f64> = (0..side).map(|i| 0.1 + i as f64 * step).collect();
                values[side - 1] = 0.9;
                values
            }
        }
    }

    /// Number of rows (and columns).
    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    /// Number of locations, `side²`.
    #[inline]
    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    /// Noise level the grid was built for.
    #[inline]
    pub fn noise_level(&self) -> f64 {
        self.noise_level
    }

    /// The proximity radius, `sqrt(2) * 0.1 * noise_level`.
    #[inline]
    pub fn max_dist(&self) -> f64 {
        self.max_dist
    }

    /// Coordinate values shared by both axes.
    #[inline]
    pub fn axis_values(&self) -> &[f64] {
        &self.axis
    }

    /// Centroids of all locations.
    #[inline]
    pub fn locations(&self) -> &[Point] {
        &self.locations
    }

    /// Centroid of location `index`.
    #[inline]
    pub fn location(&self, index: usize) -> Point {
        self.locations[index]
    }

    /// Converts a linear location index into its (row, column) pair.
    #[inline]
    pub fn coordinates(&self, index: usize) -> (usize, usize) {
        (index / self.side, index % self.side)
    }

    /// Converts a (row, column) pair into the linear location index.
    #[inline]
    pub fn index_from_coordinates(&self, row: usize, col: usize) -> usize {
        row * self.side + col
    }

    /// Euclidean distance between `point` and the centroid of location `index`.
    #[inline]
    pub fn distance(&self, point: Point, index: usize) -> f64 {
        let [x, y] = self.locations[index];
        ((point[0] - x).powi(2) + (point[1] - y).powi(2)).sqrt()
    }

    /// Whether location `index` lies within `max_dist` of `point`.
    #[inline]
    pub fn is_within(&self, point: Point, index: usize) -> bool {
        self.distance(point, index) <= self.max_dist + EPS
    }

    /// All locations within `max_dist` of `point`, in ascending index order.
    pub fn within(&self, point: Point) -> Vec<usize> {
        (0..self.num_locations())
            .filter(|&index| self.is_within(point, index))
            .collect()
    }

    /// Proximity weight of location `index` as seen from `point`: 1 at the centroid,
    /// falling linearly to 0 at `max_dist`. A zero radius counts every hit as 1.
    #[inline]
    pub fn proximity(&self, point: Point, index: usize) -> f64 {
        if self.max_dist == 0.0 {
            return 1.0;
        }
        (1.0 - self.distance(point, index) / self.max_dist).max(0.0)
    }

    /// Top-left pixel (x, y) of the character cell for location `index`.
    #[inline]
    pub fn pixel_top_left(&self, index: usize) -> (usize, usize) {
        let (row, col) = self.coordinates(index);
        (row * (CHAR_WIDTH + 2) + 1, col * (CHAR_HEIGHT + 2) + 1)
    }

    /// Canvas size (width, height) in pixels.
    #[inline]
    pub fn pixel_dims(&self) -> (usize, usize) {
        ((CHAR_WIDTH + 2) * self.side, (CHAR_HEIGHT + 2) * self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn canonical_axes() {
        let small = GridConfig::new(3, 1.0).unwrap();
        assert_eq!(small.axis_values(), &[0.2, 0.5, 0.8]);
        assert_eq!(small.num_locations(), 9);

        let large = GridConfig::new(9, 1.0).unwrap();
        assert_eq!(large.num_locations(), 81);
        assert_relative_eq!(large.axis_values()[0], 0.1);
        assert_relative_eq!(large.axis_values()[8], 0.9);

        let five = GridConfig::new(5, 1.0).unwrap();
        assert_relative_eq!(five.axis_values()[2], 0.5, epsilon = 1e-12);
        assert_eq!(five.axis_values()[4], 0.9);
    }

    #[test]
    fn locations_are_x_major() {
        let grid = GridConfig::new(3, 1.0).unwrap();
        assert_eq!(grid.location(1), [0.2, 0.5]);
        assert_eq!(grid.location(3), [0.5, 0.2]);
        assert_eq!(grid.coordinates(5), (1, 2));
        assert_eq!(grid.index_from_coordinates(2, 1), 7);
    }

    #[test]
    fn max_dist_follows_noise() {
        let grid = GridConfig::new(3, 1.6).unwrap();
        assert_relative_eq!(grid.max_dist(), (2.0f64 * 0.16 * 0.16).sqrt(), epsilon = 1e-12);
        assert!(GridConfig::new(0, 1.0).is_err());
        assert!(GridConfig::new(3, -0.5).is_err());
    }

    #[test]
    fn within_is_inclusive_at_the_boundary() {
        let grid = GridConfig::new(3, 1.0).unwrap();
        let edge = [0.2 + grid.max_dist(), 0.2];
        assert_eq!(grid.within(edge), vec![0]);
        assert_relative_eq!(grid.proximity(edge, 0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(grid.proximity([0.2, 0.2], 0), 1.0);
    }

    #[test]
    fn zero_noise_grid_only_sees_exact_hits() {
        let grid = GridConfig::new(3, 0.0).unwrap();
        assert_eq!(grid.within([0.5, 0.5]), vec![4]);
        assert!(grid.within([0.35, 0.5]).is_empty());
        assert_eq!(grid.proximity([0.5, 0.5], 4), 1.0);
    }

    #[test]
    fn pixel_mapping() {
        let grid = GridConfig::new(3, 1.0).unwrap();
        assert_eq!(grid.pixel_top_left(0), (1, 1));
        assert_eq!(grid.pixel_top_left(5), (7, 15));
        assert_eq!(grid.pixel_dims(), (18, 21));
    }
}
