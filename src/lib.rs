//! Symbolic glimpse resolution for numerosity research.
//!
//! The [`core`] modules place objects on a grid, take noisy glimpses of them, and resolve how
//! many objects the glimpses saw. [`config`] holds the run parameters of dataset generation.

pub mod config;
pub mod core;

pub use crate::config::GeneratorConfig;
pub use crate::core::{
    generator::{generate_dataset, Dataset, Example},
    grid::GridConfig,
    resolver::{GlimpsedImage, Resolution},
    summary::Summary,
};
