//! Generates a toy numerosity dataset.
//!
//! Usage: `toy_dataset [config.json] [output_dir]`
//!
//! Without a config file the defaults are used. The dataset is written in `bincode`
//! format to `output_dir` (default `toysets/`) under a name that encodes the parameters,
//! and a summary of the resolver statistics is printed.

use anyhow::{Context, Result};
use glimpse_count::{config::load_config, generate_dataset, GeneratorConfig, Summary};
use log::info;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(Path::new(&path))?,
        None => GeneratorConfig::default(),
    };
    let out_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("toysets"));

    let start = Instant::now();
    let dataset = generate_dataset(&config)?;
    info!(
        "generated {} examples in {:.2?}",
        dataset.examples.len(),
        start.elapsed()
    );

    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(config.dataset_file_name());
    dataset.save(&path)?;
    info!("dataset written to {}", path.display());

    println!("{}", Summary::from_examples(&dataset.examples));

    Ok(())
}
