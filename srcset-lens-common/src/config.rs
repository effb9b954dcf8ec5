use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    #[serde(default)]
    pub min_viewport: Option<u32>, // clamps the dataset range when set
    #[serde(default)]
    pub max_viewport: Option<u32>,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_viewport_height() -> u32 {
    1000
}
fn default_delay_ms() -> u64 {
    50
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            min_viewport: None,
            max_viewport: None,
            viewport_height: default_viewport_height(),
            delay_ms: default_delay_ms(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:9515".into() // chromedriver's default port
}
fn default_browser() -> String {
    "chrome".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            browser: default_browser(),
            headless: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    5
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { count: default_count() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_variations_file")]
    pub variations_file: String,
    #[serde(default = "default_recommendation_file")]
    pub recommendation_file: String,
    #[serde(default = "default_true")]
    pub write_variations: bool,
    #[serde(default = "default_true")]
    pub write_recommendation: bool,
}

fn default_output_dir() -> String {
    ".".into()
}
fn default_variations_file() -> String {
    "variations.csv".into()
}
fn default_recommendation_file() -> String {
    "recommendation.txt".into()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            variations_file: default_variations_file(),
            recommendation_file: default_recommendation_file(),
            write_variations: true,
            write_recommendation: true,
        }
    }
}

impl OutputConfig {
    pub fn variations_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.variations_file)
    }
    pub fn recommendation_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.recommendation_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub profiling: ProfilingConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn config_path() -> PathBuf {
        if let Ok(env_path) = std::env::var("SRCSET_LENS_CONFIG") {
            return PathBuf::from(env_path); // $SRCSET_LENS_CONFIG overrides default config path
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("srcset-lens")
            .join("config.toml")
    }

    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::SrcsetLensError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::SrcsetLensError::Config(e.to_string()))
    }

    pub fn save(&self) -> crate::Result<PathBuf> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.profiling.viewport_height, 1000);
        assert_eq!(cfg.profiling.delay_ms, 50);
        assert_eq!(cfg.webdriver.endpoint, "http://localhost:9515");
        assert_eq!(cfg.selection.count, 5);
        assert!(cfg.output.write_variations);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = Config::from_toml("[profiling]\nmin_viewport = 320\ndelay_ms = 0\n").unwrap();
        assert_eq!(cfg.profiling.min_viewport, Some(320));
        assert_eq!(cfg.profiling.max_viewport, None);
        assert_eq!(cfg.profiling.delay_ms, 0);
        assert_eq!(cfg.profiling.viewport_height, 1000);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = Config::from_toml("[selection]\ncount = \"many\"").unwrap_err();
        assert!(matches!(err, crate::SrcsetLensError::Config(_)));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.output.variations_file, "variations.csv");
    }

    #[test]
    fn toml_round_trip_preserves_overrides() {
        let mut cfg = Config::default();
        cfg.selection.count = 8;
        cfg.webdriver.browser = "firefox".into();
        let back = Config::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(back.selection.count, 8);
        assert_eq!(back.webdriver.browser, "firefox");
        assert_eq!(
            back.output.recommendation_path(),
            Path::new(".").join("recommendation.txt")
        );
    }
}
