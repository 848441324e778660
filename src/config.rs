//! Run configuration for dataset generation.
//!
//! Configurations are read from JSON. Every field has a default, so `{}` is a valid
//! configuration. Shape sets can be written as indices (`[0, 1, 2]`, `"012"`) or as
//! letters (`"ABC"`, `["A", "B"]`).

use anyhow::{bail, ensure, Context, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;

/// Letters available as shapes, in shape-index order.
const LETTERS: [char; 17] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'N', 'O', 'P', 'R', 'S', 'U', 'Z',
];

/// Shape index of a letter.
pub fn letter_to_shape(letter: char) -> Result<usize> {
    LETTERS
        .iter()
        .position(|&l| l == letter.to_ascii_uppercase())
        .with_context(|| format!("no shape is drawn as letter {letter:?}"))
}

/// Parses a compact shape string, either all digits or all letters, one shape per char.
pub fn parse_shapes(spec: &str) -> Result<Vec<usize>> {
    let chars: Vec<char> = spec.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    ensure!(!chars.is_empty(), "shape set is empty");

    if chars.iter().all(char::is_ascii_digit) {
        Ok(chars
            .iter()
            .map(|c| c.to_digit(10).unwrap_or_default() as usize)
            .collect())
    } else if chars.iter().all(char::is_ascii_alphabetic) {
        chars.into_iter().map(letter_to_shape).collect()
    } else {
        bail!("shape set {spec:?} mixes digits and letters")
    }
}

/// The set of shape indices objects are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeSet(pub Vec<usize>);

impl ShapeSet {
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for ShapeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for shape in &self.0 {
            write!(f, "{shape}")?;
        }
        Ok(())
    }
}

impl Serialize for ShapeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ShapeSpec {
    Indices(Vec<usize>),
    Compact(String),
    Labels(Vec<String>),
}

impl<'de> Deserialize<'de> for ShapeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Binary formats cannot guess between the spellings.
        if !deserializer.is_human_readable() {
            return Vec::<usize>::deserialize(deserializer).map(ShapeSet);
        }

        let shapes = match ShapeSpec::deserialize(deserializer)? {
            ShapeSpec::Indices(indices) => Ok(indices),
            ShapeSpec::Compact(spec) => parse_shapes(&spec),
            ShapeSpec::Labels(labels) => labels
                .iter()
                .map(|label| match label.parse::<usize>() {
                    Ok(index) => Ok(index),
                    Err(_) => parse_shapes(label).and_then(|parsed| match parsed.as_slice() {
                        [single] => Ok(*single),
                        _ => bail!("shape label {label:?} is not a single shape"),
                    }),
                })
                .collect(),
        };

        shapes.map(ShapeSet).map_err(de::Error::custom)
    }
}

/// Parameters of one dataset-generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Fewest resolver passes an accepted example may need.
    pub min_pass: usize,
    /// Most resolver passes an accepted example may need; also the resolver's pass budget.
    pub max_pass: usize,
    pub min_num: usize,
    pub max_num: usize,
    pub shapes: ShapeSet,
    pub noise_level: f64,
    /// Number of examples.
    pub size: usize,
    /// Length of every shape vector, shared across datasets that should be comparable.
    pub n_shapes: usize,
    /// Whether all objects of an example share one shape.
    pub same: bool,
    /// Grid side length.
    pub grid: usize,
    pub seed: u64,
    /// Resampling attempts per example before giving up on the pass window.
    pub max_attempts: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_pass: 0,
            max_pass: 6,
            min_num: 2,
            max_num: 7,
            shapes: ShapeSet(vec![0, 1, 2, 3, 5, 6, 7, 8]),
            noise_level: 1.6,
            size: 100,
            n_shapes: 10,
            same: false,
            grid: 9,
            seed: 0,
            max_attempts: 10_000,
        }
    }
}

impl GeneratorConfig {
    /// Checks that the parameters describe a satisfiable run.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.grid > 0, "grid side must be positive");
        ensure!(self.min_num > 0, "min_num must be positive");
        ensure!(
            self.min_num <= self.max_num,
            "min_num {} exceeds max_num {}",
            self.min_num,
            self.max_num
        );
        ensure!(
            self.max_num <= self.grid * self.grid,
            "max_num {} does not fit on a {}x{} grid",
            self.max_num,
            self.grid,
            self.grid
        );
        ensure!(
            self.min_pass <= self.max_pass,
            "min_pass {} exceeds max_pass {}",
            self.min_pass,
            self.max_pass
        );
        ensure!(self.size > 0, "size must be positive");
        ensure!(self.max_attempts > 0, "max_attempts must be positive");
        ensure!(!self.shapes.0.is_empty(), "shape set is empty");
        if let Some(&bad) = self.shapes.0.iter().find(|&&s| s >= self.n_shapes) {
            bail!("shape {bad} does not fit into {} shape slots", self.n_shapes);
        }
        ensure!(
            self.noise_level.is_finite() && self.noise_level >= 0.0,
            "noise_level must be a non-negative number"
        );
        Ok(())
    }

    /// File name encoding the run parameters.
    pub fn dataset_file_name(&self) -> String {
        let same = if self.same { "same" } else { "" };
        format!(
            "toy_dataset_num{}-{}_nl-{}_diff{}-{}_{}{}_grid{}_{}.bin",
            self.min_num,
            self.max_num,
            self.noise_level,
            self.min_pass,
            self.max_pass,
            self.shapes,
            same,
            self.grid,
            self.size
        )
    }
}

/// Reads a JSON configuration file and validates it.
pub fn load_config(path: &Path) -> Result<GeneratorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: GeneratorConfig = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
