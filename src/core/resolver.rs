//! The `GlimpsedImage` resolver recovers how many objects a sequence of noisy glimpses
//! looked at, using nothing but the glimpse coordinates and their shape-feature vectors.
//!
//! State:
//! - Every glimpse owns a candidate set: the grid locations within `max_dist` of it.
//!   Candidate sets only ever shrink (or get pinned to a single location).
//! - Locations are partitioned into empty and filled; a location only moves from empty
//!   to filled.
//! - Lower and upper bounds on the numerosity only tighten.
//!
//! Passes:
//! - Pass 0: the bounds alone may already agree (e.g. the number of distinct shapes
//!   reaches the configured maximum).
//! - Pass 1 (`process_xy`): compute candidate sets, fill every location that some glimpse
//!   sees unambiguously, and detect the case where the union of all candidates is as
//!   small as the lower bound.
//! - Later passes (`resolve_one`): pick the lowest pending ambiguous glimpse that could
//!   still point at an empty location and explain its shape evidence as a sum of
//!   candidate proximities. Exactly one glimpse is handled per pass.
//!
//! After every pass `check_if_done` decides whether the count is settled: either the
//! bounds meet, no glimpse is ambiguous, or no ambiguous glimpse can refer to an empty
//! location any more. Running out of passes (or of glimpses worth trying) leaves the
//! example flagged as unresolved with the lower bound as its estimate.

use super::grid::{GridConfig, Point};
use fxhash::FxHashSet;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative tolerance when comparing proximity sums to shape evidence.
const RTOL: f64 = 1e-5;

/// Absolute tolerance when comparing proximity sums to shape evidence.
const ATOL: f64 = 1e-8;

/// `a` and `b` agree within the resolver's tolerance, scaled by `b`.
#[inline]
fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Outcome of a resolver pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// More passes may still settle the count.
    Pending,
    /// The count is settled.
    Resolved,
    /// Every pending glimpse was tried without success.
    Stalled,
}

/// An ambiguous glimpse that could still refer to an empty location.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingGlimpse {
    /// The glimpse's full candidate list.
    pub candidates: Vec<usize>,
    /// The candidates that are still empty.
    pub empty: Vec<usize>,
}

/// Summary of a finished resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The predicted numerosity (the lower bound when unresolved).
    pub pred_num: usize,
    /// Number of locations proven to hold an object.
    pub count: usize,
    /// Passes spent, including the first one.
    pub pass_count: usize,
    /// The count could not be settled.
    pub unresolved: bool,
    /// The candidate union alone settled the count.
    pub special_xy: bool,
    /// The number of distinct shapes alone settled the count.
    pub special_shape: bool,
    pub lower_bound: usize,
    pub upper_bound: usize,
    /// Shape with the fewest objects (first one on ties).
    pub min_shape: usize,
    /// Number of objects of `min_shape`.
    pub min_num: usize,
    /// Candidate sets right after the first pass.
    pub initial_candidates: Vec<Vec<usize>>,
    /// Filled locations right after the first pass, ascending.
    pub initial_filled: Vec<usize>,
}

/// Resolution state for one example.
#[derive(Debug, Clone)]
pub struct GlimpsedImage<'g> {
    grid: &'g GridConfig,

    xy: Vec<Point>,
    shape_coords: Vec<Vec<f64>>,

    /// Candidate locations per glimpse. Empty until `process_xy` runs.
    candidates: Vec<Vec<usize>>,

    empty_locations: FxHashSet<usize>,
    filled_locations: FxHashSet<usize>,

    lower_bound: usize,
    upper_bound: usize,

    /// Number of filled locations.
    count: usize,

    pass_count: usize,
    pred_num: Option<usize>,

    shape_count: usize,
    special_case_xy: bool,
    special_case_shape: bool,

    min_shape: usize,
    min_num: usize,

    /// Pending ambiguous glimpses keyed by glimpse index, rebuilt by every termination check.
    to_be_resolved: BTreeMap<usize, PendingGlimpse>,

    /// Glimpses whose disambiguation found no explanation.
    attempted: FxHashSet<usize>,
}

impl<'g> GlimpsedImage<'g> {
    /// Creates the resolution state for one example.
    ///
    /// # Arguments
    ///
    /// * `xy` - The observed glimpse coordinates.
    /// * `shape_coords` - One shape-evidence row per glimpse.
    /// * `shape_hist` - Number of objects per shape, only used for reporting.
    /// * `num_range` - The configured `(lower, upper)` bounds on numerosity.
    ///
    /// # Panics
    ///
    /// On malformed input: row count mismatch, negative or non-finite evidence, an
    /// inverted range, or more distinct shapes than the upper bound allows.
    pub fn new(
        grid: &'g GridConfig,
        xy: Vec<Point>,
        shape_coords: Vec<Vec<f64>>,
        shape_hist: &[usize],
        num_range: (usize, usize),
    ) -> Self {
        let (lower, upper) = num_range;
        assert!(lower <= upper, "numerosity range {lower}..={upper} is inverted");
        assert_eq!(
            xy.len(),
            shape_coords.len(),
            "every glimpse needs exactly one shape vector"
        );
        assert!(
            shape_coords
                .iter()
                .flatten()
                .all(|&v| v.is_finite() && v >= 0.0),
            "shape evidence must be finite and non-negative"
        );

        let n_shapes = shape_coords.iter().map(Vec::len).max().unwrap_or(0);
        let shape_count = (0..n_shapes)
            .filter(|&s| {
                shape_coords
                    .iter()
                    .any(|row| row.get(s).is_some_and(|&v| v != 0.0))
            })
            .count();
        assert!(
            shape_count <= upper,
            "{shape_count} distinct shapes observed but at most {upper} objects allowed"
        );

        let (min_shape, min_num) = shape_hist
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, n)| n)
            .unwrap_or((0, 0));

        let special_case_shape = shape_count == upper;

        Self {
            grid,
            xy,
            shape_coords,
            candidates: Vec::new(),
            empty_locations: (0..grid.num_locations()).collect(),
            filled_locations: FxHashSet::default(),
            lower_bound: lower.max(shape_count),
            upper_bound: upper,
            count: 0,
            pass_count: 0,
            pred_num: None,
            shape_count,
            special_case_xy: false,
            special_case_shape,
            min_shape,
            min_num,
            to_be_resolved: BTreeMap::new(),
            attempted: FxHashSet::default(),
        }
    }

    /// Runs the resolver until the count is settled or `max_passes` passes were spent.
    ///
    /// The first pass (`process_xy`) always runs when the bounds do not settle the count
    /// on their own, even if `max_passes` is zero.
    pub fn resolve(&mut self, max_passes: usize) -> Resolution {
        let mut status = if self.check_if_done() {
            Status::Resolved
        } else {
            Status::Pending
        };

        if status == Status::Pending {
            self.process_xy();
            if self.check_if_done() {
                status = Status::Resolved;
            }
        }

        let initial_candidates = self.candidates.clone();
        let initial_filled = self.filled_locations();

        while status == Status::Pending && self.pass_count < max_passes {
            status = self.resolve_one();
        }

        let unresolved = status != Status::Resolved;
        if unresolved {
            debug!(
                "unresolved after {} passes, falling back to lower bound {}",
                self.pass_count, self.lower_bound
            );
            self.pred_num = Some(self.lower_bound);
        }

        Resolution {
            pred_num: self.pred_num.unwrap_or(self.lower_bound),
            count: self.count,
            pass_count: self.pass_count,
            unresolved,
            special_xy: self.special_case_xy,
            special_shape: self.special_case_shape,
            lower_bound: self.lower_bound,
            upper_bound: self.upper_bound,
            min_shape: self.min_shape,
            min_num: self.min_num,
            initial_candidates,
            initial_filled,
        }
    }

    /// Pass 1: computes the candidate set of every glimpse and fills the locations
    /// that unambiguous glimpses point at.
    pub fn process_xy(&mut self) {
        self.pass_count += 1;
        self.candidates = self.xy.iter().map(|&p| self.grid.within(p)).collect();

        let unique: FxHashSet<usize> = self.candidates.iter().flatten().copied().collect();
        if unique.len() == self.lower_bound {
            self.pred_num = Some(self.lower_bound);
            self.upper_bound = self.lower_bound;
            self.special_case_xy = true;
        }

        let unambiguous: Vec<usize> = self
            .candidates
            .iter()
            .filter(|cands| cands.len() == 1)
            .map(|cands| cands[0])
            .collect();

        for loc in unambiguous {
            self.fill(loc);
        }
        debug_assert!(self.lower_bound <= self.upper_bound);

        debug!(
            "pass 1: {} candidate locations, {} filled, bounds {}..={}",
            unique.len(),
            self.count,
            self.lower_bound,
            self.upper_bound
        );
    }

    /// Termination check, run after every pass. Rebuilds the pending map as a side effect.
    pub fn check_if_done(&mut self) -> bool {
        self.to_be_resolved.clear();

        if self.lower_bound == self.upper_bound {
            self.pred_num = Some(self.lower_bound);
            return true;
        }

        if self.pass_count == 0 {
            return false;
        }

        for (glimpse, cands) in self.candidates.iter().enumerate() {
            if cands.len() < 2 {
                continue;
            }
            let empty: Vec<usize> = cands
                .iter()
                .copied()
                .filter(|loc| self.empty_locations.contains(loc))
                .collect();
            if !empty.is_empty() {
                self.to_be_resolved.insert(
                    glimpse,
                    PendingGlimpse {
                        candidates: cands.clone(),
                        empty,
                    },
                );
            }
        }

        if self.to_be_resolved.is_empty() {
            self.pred_num = Some(self.count);
            return true;
        }

        false
    }

    /// The lowest pending glimpse that has not already failed to resolve.
    pub fn next_pending(&self) -> Option<usize> {
        self.to_be_resolved
            .keys()
            .copied()
            .find(|glimpse| !self.attempted.contains(glimpse))
    }

    /// One disambiguation pass. Returns `Stalled` without spending a pass when no
    /// pending glimpse is left to try.
    pub fn resolve_one(&mut self) -> Status {
        let Some(glimpse) = self.next_pending() else {
            return Status::Stalled;
        };

        self.pass_count += 1;
        let cands = self.to_be_resolved[&glimpse].candidates.clone();
        let found = self.use_shape_to_resolve(glimpse, &cands);

        trace!(
            "pass {}: glimpse {} candidates {:?} -> {:?}",
            self.pass_count,
            glimpse,
            cands,
            found
        );

        if found.is_empty() {
            self.attempted.insert(glimpse);
        }

        for loc in found {
            self.toggle(glimpse, loc);
        }
        debug_assert!(self.lower_bound <= self.upper_bound);

        if self.check_if_done() {
            Status::Resolved
        } else {
            Status::Pending
        }
    }

    /// Explains the shape evidence of glimpse `glimpse` with objects at some of `cand_list`.
    ///
    /// Filled candidates are taken as known objects. Sets of empty candidates are tried
    /// in increasing size, each size in lexicographic order, so an empty set or a single
    /// location is always preferred over a larger one. A set explains the glimpse when the
    /// proximities of the known objects and the set sum to the glimpse's total evidence
    /// and can be split into groups matching every positive per-shape entry. At most
    /// `upper_bound - count` new locations are considered. The known candidates and the
    /// first explaining set are returned in `cand_list` order; an empty result means
    /// nothing matched.
    pub fn use_shape_to_resolve(&self, glimpse: usize, cand_list: &[usize]) -> Vec<usize> {
        assert!(
            !cand_list.is_empty(),
            "glimpse {glimpse} has no candidates to disambiguate"
        );

        let point = self.xy[glimpse];
        let row = &self.shape_coords[glimpse];
        let (known, fresh): (Vec<usize>, Vec<usize>) = cand_list
            .iter()
            .copied()
            .partition(|loc| self.filled_locations.contains(loc));

        let mut search = SubsetSearch {
            known: known
                .iter()
                .map(|&loc| self.grid.proximity(point, loc))
                .collect(),
            fresh: fresh
                .iter()
                .map(|&loc| self.grid.proximity(point, loc))
                .collect(),
            entries: row.iter().copied().filter(|&v| v > 0.0).collect(),
            total: row.iter().sum(),
            chosen: Vec::new(),
        };

        let budget = self
            .upper_bound
            .saturating_sub(self.count)
            .min(fresh.len());
        let base: f64 = search.known.iter().sum();

        for size in 0..=budget {
            if search.find(0, size, base) {
                let chosen: Vec<usize> = search.chosen.iter().map(|&i| fresh[i]).collect();
                return cand_list
                    .iter()
                    .copied()
                    .filter(|loc| known.contains(loc) || chosen.contains(loc))
                    .collect();
            }
        }

        Vec::new()
    }

    /// Pins glimpse `glimpse` to `loc` and fills `loc` if it was empty.
    pub fn toggle(&mut self, glimpse: usize, loc: usize) {
        self.candidates[glimpse] = vec![loc];
        self.fill(loc);
    }

    /// Moves `loc` from empty to filled and tightens the lower bound. Idempotent.
    fn fill(&mut self, loc: usize) {
        if self.empty_locations.remove(&loc) {
            self.filled_locations.insert(loc);
        }
        self.count = self.filled_locations.len();
        self.lower_bound = self.lower_bound.max(self.count);
        debug_assert!(
            self.lower_bound <= self.upper_bound,
            "lower bound {} passed upper bound {}",
            self.lower_bound,
            self.upper_bound
        );
    }

    /// Passes spent so far.
    #[inline]
    pub fn pass_count(&self) -> usize {
        self.pass_count
    }

    /// Number of filled locations.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current lower bound on the numerosity.
    #[inline]
    pub fn lower_bound(&self) -> usize {
        self.lower_bound
    }

    /// Current upper bound on the numerosity.
    #[inline]
    pub fn upper_bound(&self) -> usize {
        self.upper_bound
    }

    /// The settled count, if any.
    #[inline]
    pub fn pred_num(&self) -> Option<usize> {
        self.pred_num
    }

    /// Number of distinct shapes with evidence anywhere in the sequence.
    #[inline]
    pub fn shape_count(&self) -> usize {
        self.shape_count
    }

    /// Whether the candidate union settled the count in the first pass.
    #[inline]
    pub fn special_case_xy(&self) -> bool {
        self.special_case_xy
    }

    /// Whether the distinct shapes settled the count before the first pass.
    #[inline]
    pub fn special_case_shape(&self) -> bool {
        self.special_case_shape
    }

    /// Candidate locations per glimpse.
    #[inline]
    pub fn candidates(&self) -> &[Vec<usize>] {
        &self.candidates
    }

    /// Glimpses with more than one candidate.
    pub fn ambiguous_glimpses(&self) -> Vec<usize> {
        (0..self.candidates.len())
            .filter(|&g| self.candidates[g].len() > 1)
            .collect()
    }

    /// Pending ambiguous glimpses from the last termination check.
    #[inline]
    pub fn to_be_resolved(&self) -> &BTreeMap<usize, PendingGlimpse> {
        &self.to_be_resolved
    }

    /// Filled locations in ascending order.
    pub fn filled_locations(&self) -> Vec<usize> {
        let mut filled: Vec<usize> = self.filled_locations.iter().copied().collect();
        filled.sort_unstable();
        filled
    }

    /// Empty locations in ascending order.
    pub fn empty_locations(&self) -> Vec<usize> {
        let mut empty: Vec<usize> = self.empty_locations.iter().copied().collect();
        empty.sort_unstable();
        empty
    }
}

/// Backtracking search for a set of empty candidates that, together with the known
/// objects, explains a glimpse's shape evidence.
struct SubsetSearch {
    /// Proximities of the filled candidates.
    known: Vec<f64>,
    /// Proximities of the empty candidates.
    fresh: Vec<f64>,
    /// Positive per-shape evidence entries.
    entries: Vec<f64>,
    total: f64,
    /// Indices into `fresh` of the set under construction.
    chosen: Vec<usize>,
}

impl SubsetSearch {
    /// Extends `chosen` with `remaining` more indices from `start` on. Leaves the first
    /// explaining set in `chosen` and returns true, or restores `chosen` and returns false.
    fn find(&mut self, start: usize, remaining: usize, sum: f64) -> bool {
        // Proximities are non-negative, so an overshoot only grows.
        if sum > self.total + ATOL + RTOL * self.total.abs() {
            return false;
        }
        if remaining == 0 {
            return is_close(sum, self.total) && self.splits_into_entries();
        }

        for i in start..=self.fresh.len() - remaining {
            self.chosen.push(i);
            if self.find(i + 1, remaining - 1, sum + self.fresh[i]) {
                return true;
            }
            self.chosen.pop();
        }
        false
    }

    /// Whether the known and chosen proximities can be grouped so that every group
    /// matches one per-shape entry.
    fn splits_into_entries(&self) -> bool {
        let mut values: Vec<f64> = self
            .known
            .iter()
            .copied()
            .chain(self.chosen.iter().map(|&i| self.fresh[i]))
            .filter(|&v| v > 0.0)
            .collect();
        values.sort_unstable_by(|a, b| b.total_cmp(a));

        let mut loads = vec![0.0; self.entries.len()];
        assign(&values, &mut loads, &self.entries)
    }
}

fn assign(values: &[f64], loads: &mut [f64], entries: &[f64]) -> bool {
    let Some((&v, rest)) = values.split_first() else {
        return loads.iter().zip(entries).all(|(&l, &e)| is_close(l, e));
    };

    for j in 0..entries.len() {
        if loads[j] + v > entries[j] + ATOL + RTOL * entries[j] {
            continue;
        }
        loads[j] += v;
        if assign(rest, loads, entries) {
            return true;
        }
        loads[j] -= v;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridConfig {
        GridConfig::new(3, 1.6).unwrap()
    }

    #[test]
    fn shape_count_tightens_lower_bound() {
        let grid = grid();
        let image = GlimpsedImage::new(
            &grid,
            vec![[0.2, 0.2], [0.8, 0.8]],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]],
            &[1, 0, 1],
            (1, 5),
        );
        assert_eq!(image.shape_count(), 2);
        assert_eq!(image.lower_bound(), 2);
        assert!(!image.special_case_shape());
    }

    #[test]
    fn min_shape_prefers_the_first_minimum() {
        let grid = grid();
        let mut image = GlimpsedImage::new(
            &grid,
            vec![[0.2, 0.2]],
            vec![vec![1.0, 0.0, 0.0]],
            &[2, 0, 0],
            (1, 5),
        );
        let resolution = image.resolve(4);
        assert_eq!(resolution.min_shape, 1);
        assert_eq!(resolution.min_num, 0);
    }

    #[test]
    fn pass_zero_is_never_done_without_bounds() {
        let grid = grid();
        let mut image = GlimpsedImage::new(
            &grid,
            vec![[0.2, 0.2]],
            vec![vec![1.0]],
            &[1],
            (1, 3),
        );
        assert!(!image.check_if_done());
        assert!(image.to_be_resolved().is_empty());
    }

    #[test]
    fn toggle_is_idempotent() {
        let grid = grid();
        let mut image = GlimpsedImage::new(
            &grid,
            vec![[0.2, 0.35], [0.2, 0.2]],
            vec![vec![0.5], vec![1.0]],
            &[2],
            (1, 9),
        );
        image.process_xy();
        assert_eq!(image.filled_locations(), vec![0]);
        assert_eq!(image.count(), 1);

        image.toggle(0, 0);
        assert_eq!(image.filled_locations(), vec![0]);
        assert_eq!(image.count(), 1);
        assert_eq!(image.candidates()[0], vec![0]);

        image.toggle(0, 0);
        assert_eq!(image.count(), 1);
        assert_eq!(image.empty_locations().len(), 8);
    }

    #[test]
    fn single_candidate_match() {
        let grid = grid();
        let point = [0.2, 0.3];
        let p0 = grid.proximity(point, 0);
        let image = GlimpsedImage::new(&grid, vec![point], vec![vec![p0, 0.0]], &[1, 0], (1, 9));

        assert_eq!(image.use_shape_to_resolve(0, &[0, 1]), vec![0]);
    }

    #[test]
    fn pair_explains_two_shapes() {
        let grid = grid();
        let point = [0.2, 0.35];
        let p = grid.proximity(point, 0);
        let image = GlimpsedImage::new(&grid, vec![point], vec![vec![p, p]], &[1, 1], (1, 9));

        assert_eq!(image.use_shape_to_resolve(0, &[0, 1]), vec![0, 1]);
    }

    #[test]
    fn single_match_wins_over_larger_sets() {
        let grid = GridConfig::new(9, 2.2).unwrap();
        let point = [0.52, 0.53];
        let cands = grid.within(point);
        assert_eq!(cands.len(), 30);

        let image = GlimpsedImage::new(
            &grid,
            vec![point],
            vec![vec![grid.proximity(point, 40)]],
            &[1],
            (1, 9),
        );
        assert_eq!(image.use_shape_to_resolve(0, &cands), vec![40]);
    }

    #[test]
    fn known_objects_explain_the_glimpse() {
        let grid = grid();
        let point = [0.2, 0.3];
        let rows = vec![vec![1.0], vec![grid.proximity(point, 0)]];
        let mut image = GlimpsedImage::new(
            &grid,
            vec![grid.location(0), point],
            rows,
            &[1],
            (1, 9),
        );
        image.process_xy();
        assert_eq!(image.filled_locations(), vec![0]);

        assert_eq!(image.use_shape_to_resolve(1, &[0, 1]), vec![0]);
    }

    #[test]
    fn new_objects_stay_within_the_upper_bound() {
        let grid = grid();
        let point = [0.2, 0.35];
        let p = grid.proximity(point, 0);
        let image = GlimpsedImage::new(&grid, vec![point], vec![vec![p + p]], &[2], (1, 1));

        assert!(image.use_shape_to_resolve(0, &[0, 1]).is_empty());
    }

    #[test]
    fn total_match_needs_every_entry_explained() {
        let grid = grid();
        let point = [0.2, 0.3];
        let (p0, p1) = (grid.proximity(point, 0), grid.proximity(point, 1));
        // The total equals p0 + p1 but no grouping of the two gives these entries.
        let rows = vec![vec![0.5 * (p0 + p1), 0.5 * (p0 + p1)]];
        let image = GlimpsedImage::new(&grid, vec![point], rows, &[1, 1], (1, 9));

        assert!(image.use_shape_to_resolve(0, &[0, 1]).is_empty());
    }

    #[test]
    fn unexplained_evidence_finds_nothing() {
        let grid = grid();
        let image = GlimpsedImage::new(
            &grid,
            vec![[0.2, 0.35]],
            vec![vec![0.9]],
            &[2],
            (1, 9),
        );

        assert!(image.use_shape_to_resolve(0, &[0, 1]).is_empty());
    }

    #[test]
    #[should_panic(expected = "no candidates")]
    fn empty_candidate_list_fails_fast() {
        let grid = grid();
        let image = GlimpsedImage::new(&grid, vec![[0.2, 0.2]], vec![vec![1.0]], &[1], (1, 9));
        image.use_shape_to_resolve(0, &[]);
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn negative_evidence_fails_fast() {
        let grid = grid();
        GlimpsedImage::new(&grid, vec![[0.2, 0.2]], vec![vec![-1.0]], &[1], (1, 9));
    }

    #[test]
    #[should_panic(expected = "exactly one shape vector")]
    fn mismatched_rows_fail_fast() {
        let grid = grid();
        GlimpsedImage::new(&grid, vec![[0.2, 0.2]], vec![], &[1], (1, 9));
    }
}
