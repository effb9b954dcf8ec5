use crate::context::{load_context_file, ContextDataset};
use crate::demand::{build_demand_histogram, DemandBucket};
use crate::export::{format_recommendation, format_variations, write_outputs};
use crate::profiler::{profile, ProfileRequest, RenderEngine, RenderProfile, ViewportRange};
use crate::widths::{coverage_report, select_widths, WidthCoverage, WidthSelection};
use serde::Serialize;
use srcset_lens_common::{Config, OutputConfig, Result, SrcsetLensError, Stage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// every knob of one pipeline run; CLI flags and config file both resolve into this
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub url: String,
    pub selector: String,
    pub min_viewport: Option<u32>, // None: smallest viewport in the context data
    pub max_viewport: Option<u32>,
    pub viewport_height: u32,
    pub delay: Duration,
    pub count: usize,
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_config(url: impl Into<String>, selector: impl Into<String>, cfg: &Config) -> Self {
        Self {
            url: url.into(),
            selector: selector.into(),
            min_viewport: cfg.profiling.min_viewport,
            max_viewport: cfg.profiling.max_viewport,
            viewport_height: cfg.profiling.viewport_height,
            delay: Duration::from_millis(cfg.profiling.delay_ms),
            count: cfg.selection.count,
            timeout: cfg.profiling.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn profile_request(&self, range: ViewportRange) -> ProfileRequest {
        ProfileRequest {
            url: self.url.clone(),
            selector: self.selector.clone(),
            range,
            viewport_height: self.viewport_height,
            delay: self.delay,
            deadline: self.timeout.map(|t| Instant::now() + t),
        }
    }
}

/// explicit bounds win; otherwise the dataset's own viewport span
pub fn resolve_range(dataset: &ContextDataset, min: Option<u32>, max: Option<u32>) -> Result<ViewportRange> {
    ViewportRange::new(
        min.unwrap_or_else(|| dataset.min_viewport()),
        max.unwrap_or_else(|| dataset.max_viewport()),
    )
}

/// Complete result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub url: String,
    pub selector: String,
    pub range: ViewportRange,
    pub breakpoints: Vec<(u32, f64)>,
    pub buckets: Vec<DemandBucket>,
    pub selection: WidthSelection,
    pub coverage: Vec<WidthCoverage>,
    #[serde(skip)]
    pub profile: RenderProfile,
}

impl Recommendation {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SrcsetLensError::Io(e.into()))
    }

    /// Write the configured artifacts (plus JSON when asked) and return their paths.
    pub fn write(&self, out: &OutputConfig, json: Option<&Path>) -> Result<Vec<PathBuf>> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        if out.write_variations {
            files.push((out.variations_path(), format_variations(&self.profile)));
        }
        if out.write_recommendation {
            files.push((out.recommendation_path(), format_recommendation(&self.url, &self.selector, &self.selection)));
        }
        if let Some(p) = json {
            files.push((p.to_path_buf(), self.to_json().map_err(|e| e.in_stage(Stage::Output))?));
        }
        write_outputs(&files).map_err(|e| e.in_stage(Stage::Output))?;
        Ok(files.into_iter().map(|(p, _)| p).collect())
    }
}

pub fn load_context(path: &Path) -> Result<ContextDataset> {
    let dataset = load_context_file(path).map_err(|e| e.in_stage(Stage::Context))?;
    info!(
        samples = dataset.len(),
        views = dataset.total_views(),
        min_viewport = dataset.min_viewport(),
        max_viewport = dataset.max_viewport(),
        "context loaded"
    );
    Ok(dataset)
}

/// Histogram and selection stages over an already measured profile.
pub fn analyze(
    url: &str,
    selector: &str,
    dataset: &ContextDataset,
    profile: RenderProfile,
    range: ViewportRange,
    count: usize,
) -> Result<Recommendation> {
    let buckets = build_demand_histogram(dataset, &profile, range).map_err(|e| e.in_stage(Stage::Histogram))?;
    let selection = select_widths(&buckets, count).map_err(|e| e.in_stage(Stage::Select))?;
    let coverage = coverage_report(&buckets, &selection);
    Ok(Recommendation {
        url: url.to_owned(),
        selector: selector.to_owned(),
        range,
        breakpoints: profile.breakpoints(),
        buckets,
        selection,
        coverage,
        profile,
    })
}

/// Profile, bucket and select in one run. Nothing is written here; see [`Recommendation::write`].
pub fn recommend<E: RenderEngine>(engine: &E, dataset: &ContextDataset, cfg: &PipelineConfig) -> Result<Recommendation> {
    if cfg.count < 1 {
        return Err(SrcsetLensError::Validation("width count must be at least 1".into()).in_stage(Stage::Select));
    }
    let range = resolve_range(dataset, cfg.min_viewport, cfg.max_viewport).map_err(|e| e.in_stage(Stage::Context))?;
    let profile = profile(engine, &cfg.profile_request(range)).map_err(|e| e.in_stage(Stage::Profile))?;
    analyze(&cfg.url, &cfg.selector, dataset, profile, range, cfg.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_defaults_to_dataset_span() {
        let ds = ContextDataset::load([("360", "3", "1"), ("1920", "1", "1")]).unwrap();
        assert_eq!(resolve_range(&ds, None, None).unwrap(), ViewportRange { min: 360, max: 1920 });
        assert_eq!(resolve_range(&ds, Some(320), None).unwrap(), ViewportRange { min: 320, max: 1920 });
        assert!(resolve_range(&ds, Some(2000), None).is_err());
    }

    #[test]
    fn from_config_carries_profiling_knobs() {
        let mut cfg = Config::default();
        cfg.profiling.delay_ms = 0;
        cfg.profiling.timeout_secs = Some(90);
        cfg.selection.count = 3;
        let pc = PipelineConfig::from_config("https://example.com", "#hero img", &cfg);
        assert!(pc.delay.is_zero());
        assert_eq!(pc.timeout, Some(Duration::from_secs(90)));
        assert_eq!(pc.count, 3);
        assert!(pc.profile_request(ViewportRange { min: 1, max: 2 }).deadline.is_some());
    }
}
