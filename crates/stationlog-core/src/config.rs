use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::downsample::DownsampleOptions;
use crate::error::AnalysisError;
use crate::model::{Language, PlatformKey};
use crate::normalize::EncodingPolicy;
use crate::report::ShowState;

pub const CONFIG_PATH_VAR: &str = "STATIONLOG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "stationlog.toml";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registry document; the bundled one is used when unset.
    pub patterns_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub request: AnalysisRequest,
    pub limits: InputLimits,
    pub classifier: ClassifierConfig,
    pub downsample: DownsampleOptions,
    /// Encoding labels tried in order.
    pub encodings: Vec<String>,
    pub report: ReportConfig,
}

/// Which pattern lists to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRequest {
    pub site: String,
    pub platform: PlatformKey,
    /// Tried in order; the first that yields records wins. Empty means every
    /// test type registered for the platform.
    pub test_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    pub max_file_bytes: u64,
    pub max_lines: usize,
    pub max_line_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub majority_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub language: Language,
    pub show_state: ShowState,
    pub theme: String,
    pub write_charts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patterns_path: None,
            output_dir: PathBuf::from("stationlog-out"),
            request: AnalysisRequest::default(),
            limits: InputLimits::default(),
            classifier: ClassifierConfig::default(),
            downsample: DownsampleOptions::default(),
            encodings: vec!["utf-8".to_string(), "gb18030".to_string()],
            report: ReportConfig::default(),
        }
    }
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            site: "L2AR".to_string(),
            platform: PlatformKey::Simple("MTK".to_string()),
            test_types: Vec::new(),
        }
    }
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 64 * 1024 * 1024,
            max_lines: 2_000_000,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            majority_threshold: crate::classify::DEFAULT_MAJORITY_THRESHOLD,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            show_state: ShowState::Failed,
            theme: "Production Test Log Analysis".to_string(),
            write_charts: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn parse_language(value: &str) -> Result<Language, AnalysisError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "en" | "english" => Ok(Language::En),
        "zh" | "cn" | "chinese" => Ok(Language::Zh),
        other => Err(AnalysisError::InvalidConfig(format!("unknown language: {other}"))),
    }
}

fn parse_show_state(value: &str) -> Result<ShowState, AnalysisError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(ShowState::All),
        "failed" => Ok(ShowState::Failed),
        "passed" => Ok(ShowState::Passed),
        other => Err(AnalysisError::InvalidConfig(format!("unknown show state: {other}"))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AnalysisError> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalysisError::InvalidConfig(format!("{name} must be a number, got {value:?}")))
}

impl PipelineConfig {
    /// Load configuration.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, AnalysisError> {
        let config_path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!(path = %config_path, "loading configuration");
            Self::from_file(&config_path)?
        } else {
            tracing::info!(path = %config_path, "config file not found, using defaults");
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, AnalysisError> {
        toml::from_str(contents).map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
    }

    /// Override settings from `STATIONLOG_*` variables, read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), AnalysisError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("STATIONLOG_PATTERNS") {
            self.patterns_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = var("STATIONLOG_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(site) = var("STATIONLOG_SITE") {
            self.request.site = site;
        }
        if let Some(platform) = var("STATIONLOG_PLATFORM") {
            self.request.platform = PlatformKey::Simple(platform);
        }
        if let Some(types) = var("STATIONLOG_TEST_TYPES") {
            self.request.test_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(encodings) = var("STATIONLOG_ENCODINGS") {
            self.encodings = encodings
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(lang) = var("STATIONLOG_LANGUAGE") {
            self.report.language = parse_language(&lang)?;
        }
        if let Some(show) = var("STATIONLOG_SHOW_STATE") {
            self.report.show_state = parse_show_state(&show)?;
        }
        if let Some(v) = var("STATIONLOG_MAX_FILE_BYTES") {
            self.limits.max_file_bytes = parse_number("STATIONLOG_MAX_FILE_BYTES", &v)?;
        }
        if let Some(v) = var("STATIONLOG_MAX_LINES") {
            self.limits.max_lines = parse_number("STATIONLOG_MAX_LINES", &v)?;
        }
        if let Some(v) = var("STATIONLOG_MAJORITY_THRESHOLD") {
            self.classifier.majority_threshold =
                parse_number("STATIONLOG_MAJORITY_THRESHOLD", &v)?;
        }
        Ok(())
    }

    /// Check that configuration values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.request.site.trim().is_empty() {
            return Err("request.site must not be empty".to_string());
        }
        if self.request.platform.discriminant().trim().is_empty() {
            return Err("request.platform must not be empty".to_string());
        }
        if self.limits.max_file_bytes == 0 {
            return Err("limits.max_file_bytes must be > 0".to_string());
        }
        if self.limits.max_lines == 0 {
            return Err("limits.max_lines must be > 0".to_string());
        }
        if self.limits.max_line_bytes == 0 {
            return Err("limits.max_line_bytes must be > 0".to_string());
        }
        let t = self.classifier.majority_threshold;
        if !(0.0..1.0).contains(&t) {
            return Err(format!("classifier.majority_threshold must be in [0, 1), got {t}"));
        }
        self.downsample.validate()?;
        if self.encodings.is_empty() {
            return Err("encodings must list at least one encoding".to_string());
        }
        Ok(())
    }

    pub fn encoding_policy(&self) -> Result<EncodingPolicy, AnalysisError> {
        EncodingPolicy::from_labels(&self.encodings)
    }
}
