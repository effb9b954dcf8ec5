use crate::context::ContextDataset;
use crate::profiler::{RenderProfile, ViewportRange};
use serde::{Deserialize, Serialize};
use srcset_lens_common::{Result, SrcsetLensError};
use std::collections::BTreeMap;
use tracing::info;

/// share of views whose device needs exactly `ideal_width` physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandBucket {
    pub ideal_width: u32,
    pub weight: f64,
}

/// Physical pixels needed to draw `rendered` CSS px at `density` without upscaling.
///
/// This is `ceil(rendered * density)`, except that a product within 1e-9 of an integer snaps
/// to that integer, so `100.0000000005` gives 100 rather than 101.
pub fn ideal_width(rendered: f64, density: f64) -> u32 {
    let physical = rendered * density;
    let rounded = physical.round();
    let px = if (physical - rounded).abs() < 1e-9 { rounded } else { physical.ceil() };
    px.max(0.0) as u32
}

/// Weighted histogram of ideal widths over samples whose viewport lies in `range`.
///
/// Sorted by ideal width; buckets with no views are omitted. An empty result means no
/// included sample carried views.
pub fn build_demand_histogram(
    dataset: &ContextDataset,
    profile: &RenderProfile,
    range: ViewportRange,
) -> Result<Vec<DemandBucket>> {
    let mut views_by_width: BTreeMap<u32, u64> = BTreeMap::new();
    let mut included_views: u64 = 0;
    let mut included_samples = 0usize;
    for sample in dataset.in_range(range.min, range.max) {
        let rendered = profile.get(sample.viewport_width).ok_or_else(|| {
            SrcsetLensError::Domain(format!(
                "sample viewport {}px lies outside the measured profile {}",
                sample.viewport_width,
                profile.range()
            ))
        })?;
        included_samples += 1;
        if sample.views == 0 {
            continue;
        }
        *views_by_width.entry(ideal_width(rendered, sample.density)).or_insert(0) += sample.views;
        included_views += sample.views;
    }
    info!(
        included_samples,
        excluded_samples = dataset.len() - included_samples,
        buckets = views_by_width.len(),
        "demand histogram built"
    );
    if included_views == 0 {
        return Ok(Vec::new());
    }
    let total = included_views as f64;
    Ok(views_by_width
        .into_iter()
        .map(|(ideal_width, views)| DemandBucket { ideal_width, weight: views as f64 / total })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_profile(min: u32, max: u32, f: impl Fn(u32) -> f64) -> RenderProfile {
        let range = ViewportRange::new(min, max).unwrap();
        RenderProfile::from_measurements(range, range.iter().map(f).collect()).unwrap()
    }

    #[test]
    fn ideal_width_rounds_up() {
        assert_eq!(ideal_width(100.0, 2.0), 200);
        assert_eq!(ideal_width(100.2, 1.0), 101);
        assert_eq!(ideal_width(100.0000000005, 1.0), 100);
        assert_eq!(ideal_width(100.000001, 1.0), 101);
        assert_eq!(ideal_width(133.33333333333334, 3.0), 400);
        assert_eq!(ideal_width(360.0, 2.625), 945);
    }

    #[test]
    fn weights_are_normalized_and_sorted() {
        let ds = ContextDataset::load([("400", "2", "30"), ("300", "1", "50"), ("400", "1", "20"), ("350", "2", "0")]).unwrap();
        let profile = flat_profile(300, 400, |vw| vw as f64 / 2.0);
        let buckets = build_demand_histogram(&ds, &profile, profile.range()).unwrap();
        let widths: Vec<u32> = buckets.iter().map(|b| b.ideal_width).collect();
        assert_eq!(widths, vec![150, 200, 400]);
        let sum: f64 = buckets.iter().map(|b| b.weight).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((buckets[0].weight - 0.5).abs() < 1e-12);
    }

    #[test]
    fn same_ideal_width_merges() {
        let ds = ContextDataset::load([("200", "2", "1"), ("400", "1", "3")]).unwrap();
        let profile = flat_profile(200, 400, |vw| vw as f64);
        let buckets = build_demand_histogram(&ds, &profile, profile.range()).unwrap();
        assert_eq!(buckets, vec![DemandBucket { ideal_width: 400, weight: 1.0 }]);
    }

    #[test]
    fn out_of_range_samples_leave_denominator() {
        let ds = ContextDataset::load([("320", "1", "1"), ("500", "1", "3"), ("1000", "1", "96")]).unwrap();
        let profile = flat_profile(320, 500, |_| 100.0);
        let buckets = build_demand_histogram(&ds, &profile, profile.range()).unwrap();
        assert_eq!(buckets.len(), 1);
        assert!((buckets[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sample_outside_profile_is_domain_error() {
        let ds = ContextDataset::load([("320", "1", "1"), ("900", "1", "1")]).unwrap();
        let profile = flat_profile(320, 800, |_| 100.0);
        let range = ViewportRange::new(320, 1000).unwrap();
        let err = build_demand_histogram(&ds, &profile, range).unwrap_err();
        assert!(matches!(err, SrcsetLensError::Domain(_)), "{err}");
    }

    #[test]
    fn no_included_views_gives_empty() {
        let ds = ContextDataset::load([("320", "1", "0"), ("900", "1", "5")]).unwrap();
        let profile = flat_profile(320, 400, |_| 100.0);
        assert!(build_demand_histogram(&ds, &profile, profile.range()).unwrap().is_empty());
    }
}
