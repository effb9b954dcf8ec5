pub mod context;
pub mod demand;
pub mod export;
pub mod pipeline;
pub mod profiler;
pub mod webdriver;
pub mod widths;

pub use srcset_lens_common::{Result, SrcsetLensError, Stage};

pub use context::{load_context_file, parse_context_text, ContextDataset, ContextSample};
pub use demand::{build_demand_histogram, ideal_width, DemandBucket};
pub use export::{
    format_demand_table, format_recommendation, format_selection_table, format_variations,
    parse_variations, read_variations, write_outputs, VARIATIONS_HEADER,
};
pub use pipeline::{analyze, load_context, recommend, resolve_range, PipelineConfig, Recommendation};
pub use profiler::{
    profile, ProfileRequest, RenderEngine, RenderProfile, RenderSession, Viewport, ViewportRange,
};
pub use webdriver::{WebDriverEngine, WebDriverSession};
pub use widths::{
    coverage_report, evaluate_waste, select_widths, WidthCoverage, WidthSelection,
    UNDERSHOOT_PENALTY,
};
