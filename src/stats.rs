//! Lazily computed summary statistics for numeric nodes.
//!
//! Statistics are computed from the sample a node retained during normalization and memoized on
//! the node itself, so they are dropped together with the tree. The first caller computes; any
//! concurrent caller for the same node blocks until that result is available.

use std::borrow::Cow;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::StatsError;
use crate::model::{DataNode, NodeKind, Sample};

/// Tunables for [`StatisticsEngine`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatsOptions {
    /// Percentile ranks in `0.0..=100.0`.
    pub percentiles: Vec<f64>,
    /// Above this many finite values, percentiles are estimated from a reservoir sample.
    pub exact_percentile_limit: usize,
    pub reservoir_size: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            percentiles: vec![5.0, 25.0, 50.0, 75.0, 95.0],
            exact_percentile_limit: 100_000,
            reservoir_size: 10_000,
        }
    }
}

/// Summary of one numeric node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResult {
    /// Finite values used.
    pub count: u64,
    pub nan_count: u64,
    pub mean: f64,
    /// Population variance (divides by `count`).
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// `(rank, value)` pairs in the order of [`StatsOptions::percentiles`].
    pub percentiles: Vec<(f64, f64)>,
    pub percentiles_approximate: bool,
    /// True when the node was truncated and only its retained prefix was summarized.
    pub sampled: bool,
    pub sample_size: u64,
    /// Element count of the original value.
    pub population_size: u64,
}

impl StatsResult {
    /// Value at percentile `rank`, if it was requested.
    pub fn percentile(&self, rank: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(r, _)| (*r - rank).abs() < f64::EPSILON)
            .map(|(_, v)| *v)
    }
}

/// Single-pass mean/variance accumulator.
#[derive(Debug, Clone, Copy)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Welford {
    fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn variance(&self) -> f64 {
        if self.count == 0 { f64::NAN } else { self.m2 / self.count as f64 }
    }
}

/// Computes and caches [`StatsResult`]s.
///
/// The cache lives in each [`DataNode`]: the first successful or failed computation for a node is
/// kept, regardless of which engine produced it.
#[derive(Debug, Clone, Default)]
pub struct StatisticsEngine {
    opts: StatsOptions,
}

impl StatisticsEngine {
    pub fn new(opts: StatsOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &StatsOptions {
        &self.opts
    }

    /// Memoized statistics for `node`.
    pub fn stats(&self, node: &DataNode) -> Result<Arc<StatsResult>, StatsError> {
        node.stats
            .get_or_init(|| self.compute(node).map(Arc::new))
            .clone()
    }

    /// Compute statistics for `node` without touching its cache.
    pub fn compute(&self, node: &DataNode) -> Result<StatsResult, StatsError> {
        let values = numeric_values(node)?;

        let mut acc = Welford::new();
        let mut nan_count = 0u64;
        let mut finite = Vec::with_capacity(values.len());
        for &x in values.iter() {
            if x.is_nan() {
                nan_count += 1;
            } else {
                acc.push(x);
                finite.push(x);
            }
        }

        let population_size = node
            .metadata
            .original_extent
            .as_ref()
            .map(|e| e.elements)
            .unwrap_or(values.len() as u64);

        // Past the limit, percentiles describe a sample of the original value, not all of it.
        let approximate = population_size > self.opts.exact_percentile_limit as u64;
        let mut ranked = if approximate && finite.len() > self.opts.reservoir_size {
            reservoir(&finite, self.opts.reservoir_size, node.id.0)
        } else {
            finite
        };
        ranked.sort_by(f64::total_cmp);
        let percentiles = self
            .opts
            .percentiles
            .iter()
            .filter_map(|&p| interpolate(&ranked, p).map(|v| (p, v)))
            .collect();

        let (min, max) = if acc.count == 0 {
            (f64::NAN, f64::NAN)
        } else {
            (acc.min, acc.max)
        };
        let variance = acc.variance();

        Ok(StatsResult {
            count: acc.count,
            nan_count,
            mean: if acc.count == 0 { f64::NAN } else { acc.mean },
            variance,
            std_dev: variance.sqrt(),
            min,
            max,
            percentiles,
            percentiles_approximate: approximate,
            sampled: node.metadata.truncated,
            sample_size: values.len() as u64,
            population_size,
        })
    }
}

fn numeric_values(node: &DataNode) -> Result<Cow<'_, [f64]>, StatsError> {
    let numeric = node.metadata.element_type.is_some_and(|t| t.is_numeric());
    match node.kind {
        NodeKind::Scalar if numeric => node
            .value
            .as_ref()
            .and_then(|v| v.as_f64())
            .map(|x| Cow::Owned(vec![x]))
            .ok_or_else(|| StatsError::unavailable("scalar has no numeric value")),
        NodeKind::Array if numeric => match node.sample() {
            Sample::Numeric(v) => Ok(Cow::Borrowed(v.as_slice())),
            Sample::Empty => Ok(Cow::Owned(Vec::new())),
            _ => Err(StatsError::unavailable("array sample is not numeric")),
        },
        NodeKind::Scalar | NodeKind::Array => Err(StatsError::unavailable(format!(
            "element type {} is not numeric",
            node.metadata
                .element_type
                .map(|t| t.as_str())
                .unwrap_or("unknown")
        ))),
        kind => Err(StatsError::unavailable(format!("{kind} nodes have no statistics"))),
    }
}

/// Algorithm R: a uniform sample of `k` values, reproducible for a given `seed`.
fn reservoir(values: &[f64], k: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(k.min(values.len()));
    for (i, &x) in values.iter().enumerate() {
        if i < k {
            out.push(x);
        } else {
            let j = rng.gen_range(0..=i);
            if j < k {
                out[j] = x;
            }
        }
    }
    out
}

/// Linear interpolation between closest ranks of a sorted slice.
fn interpolate(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
