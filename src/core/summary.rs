//! Aggregate statistics over a generated dataset: how hard the examples are (passes needed),
//! how the numerosities are distributed, and how often the symbolic count is right.

use super::generator::Example;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub by_pass_count: BTreeMap<usize, usize>,
    pub by_numerosity: BTreeMap<usize, usize>,
    pub unresolved: usize,
    pub special_xy: usize,
    pub special_shape: usize,
    /// Examples whose resolved count equals the true numerosity.
    pub correct: usize,
}

impl Summary {
    pub fn from_examples(examples: &[Example]) -> Self {
        let mut summary = Self::default();

        for example in examples {
            let res = &example.resolution;
            summary.total += 1;
            *summary.by_pass_count.entry(res.pass_count).or_default() += 1;
            *summary.by_numerosity.entry(example.numerosity).or_default() += 1;
            summary.unresolved += usize::from(res.unresolved);
            summary.special_xy += usize::from(res.special_xy);
            summary.special_shape += usize::from(res.special_shape);
            summary.correct += usize::from(res.pred_num == example.numerosity);
        }

        summary
    }

    /// Fraction of examples counted correctly by the resolver, 0 for an empty dataset.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "examples:      {}", self.total)?;
        writeln!(f, "accuracy:      {:.2}%", 100.0 * self.accuracy())?;
        writeln!(f, "unresolved:    {}", self.unresolved)?;
        writeln!(f, "special xy:    {}", self.special_xy)?;
        writeln!(f, "special shape: {}", self.special_shape)?;
        writeln!(f, "pass count:")?;
        for (passes, n) in &self.by_pass_count {
            writeln!(f, "  {passes:>3}: {n}")?;
        }
        writeln!(f, "numerosity:")?;
        for (num, n) in &self.by_numerosity {
            writeln!(f, "  {num:>3}: {n}")?;
        }
        Ok(())
    }
}
