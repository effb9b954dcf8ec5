pub mod config;
pub use config::{Config, OutputConfig, ProfilingConfig, SelectionConfig, WebDriverConfig};

use thiserror::Error;

/// pipeline stage a fatal error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Context,
    Profile,
    Histogram,
    Select,
    Output,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Context => "context loading",
            Stage::Profile => "viewport profiling",
            Stage::Histogram => "demand histogram",
            Stage::Select => "width selection",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SrcsetLensError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("measurement error: {0}")]
    Measurement(String),
    #[error("domain error: {0}")]
    Domain(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<SrcsetLensError>,
    },
}

impl SrcsetLensError {
    /// tag the error with the stage it escaped from; already-tagged errors keep their stage
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ SrcsetLensError::Stage { .. } => tagged,
            other => SrcsetLensError::Stage { stage, source: Box::new(other) },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            SrcsetLensError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// innermost error, skipping stage tags
    pub fn root(&self) -> &SrcsetLensError {
        match self {
            SrcsetLensError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SrcsetLensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_is_applied_once() {
        let err = SrcsetLensError::Domain("viewport 2000 outside 320..=1920".into())
            .in_stage(Stage::Histogram)
            .in_stage(Stage::Select);
        assert_eq!(err.stage(), Some(Stage::Histogram));
        assert!(matches!(err.root(), SrcsetLensError::Domain(_)));
        assert_eq!(
            err.to_string(),
            "demand histogram failed: domain error: viewport 2000 outside 320..=1920"
        );
    }
}
