//! Width selection: weighted optimal partition of the demand histogram.
//!
//! Buckets sorted by ideal width are split into contiguous groups, and each group is served by
//! its largest ideal width, so no member is ever upscaled. Waste is the weighted pixel
//! overshoot `(served - ideal) * weight` summed over buckets.

use crate::demand::DemandBucket;
use serde::{Deserialize, Serialize};
use srcset_lens_common::{Result, SrcsetLensError};
use tracing::info;

/// undershoot costs this many times the same overshoot
pub const UNDERSHOOT_PENALTY: f64 = 4.0;

/// relative tolerance for treating two partition costs as tied
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthSelection {
    widths: Vec<u32>,
    waste: f64,
}

impl WidthSelection {
    /// ascending, distinct
    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    /// total weighted overshoot in px per view
    pub fn waste(&self) -> f64 {
        self.waste
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }
}

/// per-width share of demand it serves and the waste it causes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthCoverage {
    pub width: u32,
    pub share: f64,
    pub waste: f64,
    pub smallest_ideal: u32,
}

fn check_buckets(buckets: &[DemandBucket]) -> Result<()> {
    if buckets.is_empty() {
        return Err(SrcsetLensError::Validation("no demand buckets to select widths from".into()));
    }
    if buckets.windows(2).any(|w| w[0].ideal_width >= w[1].ideal_width) {
        return Err(SrcsetLensError::Validation("demand buckets must be sorted by distinct ideal width".into()));
    }
    if let Some(b) = buckets.iter().find(|b| !(b.weight.is_finite() && b.weight >= 0.0)) {
        return Err(SrcsetLensError::Validation(format!("bucket {} has invalid weight {}", b.ideal_width, b.weight)));
    }
    Ok(())
}

/// drops the zero-width bucket: an element rendered 0px wide downloads nothing
fn drawn(buckets: &[DemandBucket]) -> &[DemandBucket] {
    match buckets.first() {
        Some(first) if first.ideal_width == 0 => &buckets[1..],
        _ => buckets,
    }
}

fn tied(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// prefix sums of `weight` and `weight * ideal_width`
struct PrefixSums {
    w: Vec<f64>,
    wx: Vec<f64>,
}

impl PrefixSums {
    fn new(buckets: &[DemandBucket]) -> Self {
        let mut w = Vec::with_capacity(buckets.len() + 1);
        let mut wx = Vec::with_capacity(buckets.len() + 1);
        w.push(0.0);
        wx.push(0.0);
        for b in buckets {
            w.push(w[w.len() - 1] + b.weight);
            wx.push(wx[wx.len() - 1] + b.weight * b.ideal_width as f64);
        }
        Self { w, wx }
    }

    /// waste of serving buckets `j..i` with the ideal width of bucket `i - 1`
    fn group_cost(&self, buckets: &[DemandBucket], j: usize, i: usize) -> f64 {
        let rep = buckets[i - 1].ideal_width as f64;
        let cost = rep * (self.w[i] - self.w[j]) - (self.wx[i] - self.wx[j]);
        cost.max(0.0)
    }
}

/// Choose up to `n` widths minimizing total weighted waste over sorted `buckets`.
///
/// Among equal-waste partitions the one with the smallest largest width wins, then the
/// smallest second-largest, and so on downward.
pub fn select_widths(buckets: &[DemandBucket], n: usize) -> Result<WidthSelection> {
    if n < 1 {
        return Err(SrcsetLensError::Validation("width count must be at least 1".into()));
    }
    check_buckets(buckets)?;
    let buckets = drawn(buckets);
    if buckets.is_empty() {
        return Err(SrcsetLensError::Validation("element never renders wider than 0px".into()));
    }
    let b = buckets.len();
    if b <= n {
        let widths: Vec<u32> = buckets.iter().map(|x| x.ideal_width).collect();
        info!(requested = n, selected = widths.len(), "every ideal width selected");
        return Ok(WidthSelection { widths, waste: 0.0 });
    }

    let sums = PrefixSums::new(buckets);
    // cost[k][i]: least waste covering buckets 0..i with k groups; parent[k][i]: start of last group
    let mut cost = vec![vec![f64::INFINITY; b + 1]; n + 1];
    let mut parent = vec![vec![0usize; b + 1]; n + 1];
    cost[0][0] = 0.0;
    for k in 1..=n {
        for i in k..=b {
            let mut best = f64::INFINITY;
            for j in (k - 1)..i {
                if cost[k - 1][j].is_finite() {
                    best = best.min(cost[k - 1][j] + sums.group_cost(buckets, j, i));
                }
            }
            // smallest tied start keeps the next representative down as low as possible
            let start = ((k - 1)..i)
                .find(|&j| cost[k - 1][j].is_finite() && tied(cost[k - 1][j] + sums.group_cost(buckets, j, i), best))
                .unwrap_or(k - 1);
            cost[k][i] = best;
            parent[k][i] = start;
        }
    }

    let mut widths = Vec::with_capacity(n);
    let mut i = b;
    for k in (1..=n).rev() {
        widths.push(buckets[i - 1].ideal_width);
        i = parent[k][i];
    }
    widths.reverse();
    let waste = cost[n][b];
    info!(requested = n, buckets = b, waste, "widths selected");
    Ok(WidthSelection { widths, waste })
}

/// Index of the width serving `ideal` in ascending `widths`: the smallest one not below it,
/// else the largest.
fn serving_index(widths: &[u32], ideal: u32) -> usize {
    let idx = widths.partition_point(|&w| w < ideal);
    idx.min(widths.len() - 1)
}

fn bucket_waste(served: u32, bucket: &DemandBucket) -> f64 {
    if served >= bucket.ideal_width {
        (served - bucket.ideal_width) as f64 * bucket.weight
    } else {
        (bucket.ideal_width - served) as f64 * bucket.weight * UNDERSHOOT_PENALTY
    }
}

/// Total waste of serving `buckets` from an arbitrary width set under the selection cost model.
pub fn evaluate_waste(buckets: &[DemandBucket], widths: &[u32]) -> Result<f64> {
    if widths.is_empty() {
        return Err(SrcsetLensError::Validation("no widths to evaluate".into()));
    }
    let mut sorted = widths.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    Ok(drawn(buckets)
        .iter()
        .map(|b| bucket_waste(sorted[serving_index(&sorted, b.ideal_width)], b))
        .sum())
}

/// per-width breakdown of a selection against the buckets it was chosen for
pub fn coverage_report(buckets: &[DemandBucket], selection: &WidthSelection) -> Vec<WidthCoverage> {
    let widths = selection.widths();
    let mut report: Vec<WidthCoverage> = widths
        .iter()
        .map(|&width| WidthCoverage { width, share: 0.0, waste: 0.0, smallest_ideal: width })
        .collect();
    if widths.is_empty() {
        return report;
    }
    for b in drawn(buckets) {
        let entry = &mut report[serving_index(widths, b.ideal_width)];
        entry.share += b.weight;
        entry.waste += bucket_waste(entry.width, b);
        entry.smallest_ideal = entry.smallest_ideal.min(b.ideal_width);
    }
    report
}
