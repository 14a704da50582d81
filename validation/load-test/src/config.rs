//! Configuration loading and management.

use crate::error::ConfigError;
use crate::generator::TileCoord;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Results channel slots per worker.
const CHANNEL_SLOTS_PER_WORKER: usize = 10;

/// Frozen configuration for one load test run, loaded from YAML or built from
/// CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Tile URL with `{z}`, `{x}` and `{y}` placeholders.
    pub url_template: String,
    #[serde(flatten)]
    pub bounds: TileBounds,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub pattern: Pattern,
    #[serde(default)]
    pub fixed_mode: FixedMode,
    /// Wall-clock limit such as `60s`. Without one the run ends on
    /// cancellation or when the request budget is spent.
    #[serde(default)]
    pub duration: Option<String>,
    /// Per-request timeout, also used as the connect timeout.
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_label")]
    pub name: String,
    #[serde(default = "default_label")]
    pub environment: String,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub accept_encoding: Option<String>,
    /// Extra request headers in `Name: value` form.
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>, // Master seed; worker seeds derive from it
    /// Total request budget shared by all workers.
    #[serde(default)]
    pub requests: Option<u64>,
    /// Status codes counted as success when the body drains cleanly.
    #[serde(default = "default_accept_status")]
    pub accept_status: Vec<u16>,
}

fn default_threads() -> usize {
    1
}

fn default_timeout() -> String {
    "1s".to_string()
}

fn default_label() -> String {
    "default".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("results.csv")
}

fn default_accept_status() -> Vec<u16> {
    vec![200, 204, 404]
}

/// Inclusive tile coordinate box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileBounds {
    #[serde(default)]
    pub min_zoom: u32,
    #[serde(default)]
    pub max_zoom: u32,
    #[serde(default)]
    pub min_x: u32,
    #[serde(default)]
    pub max_x: u32,
    #[serde(default)]
    pub min_y: u32,
    #[serde(default)]
    pub max_y: u32,
}

impl TileBounds {
    /// Bounds at a single zoom level.
    pub fn at_zoom(zoom: u32, (min_x, max_x): (u32, u32), (min_y, max_y): (u32, u32)) -> Self {
        Self {
            min_zoom: zoom,
            max_zoom: zoom,
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Check that every axis has `min <= max`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let axes = [
            ("zoom", self.min_zoom, self.max_zoom),
            ("X", self.min_x, self.max_x),
            ("Y", self.min_y, self.max_y),
        ];
        for (axis, min, max) in axes {
            if min > max {
                return Err(ConfigError::InvalidBounds { axis, min, max });
            }
        }
        Ok(())
    }

    pub fn contains(&self, tile: &TileCoord) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&tile.z)
            && (self.min_x..=self.max_x).contains(&tile.x)
            && (self.min_y..=self.max_y).contains(&tile.y)
    }

    pub fn columns(&self) -> u64 {
        self.max_x.saturating_sub(self.min_x) as u64 + 1
    }

    pub fn rows(&self) -> u64 {
        self.max_y.saturating_sub(self.min_y) as u64 + 1
    }

    pub fn zoom_levels(&self) -> u64 {
        self.max_zoom.saturating_sub(self.min_zoom) as u64 + 1
    }

    /// Number of tiles in the box. Inverted axes count as one tile; call
    /// [`TileBounds::validate`] to reject them.
    pub fn tile_count(&self) -> u64 {
        self.zoom_levels()
            .saturating_mul(self.rows())
            .saturating_mul(self.columns())
    }
}

/// Coordinate selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pattern {
    #[default]
    Random,
    Fixed,
}

impl FromStr for Pattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Pattern::Random),
            "fixed" => Ok(Pattern::Fixed),
            other => Err(ConfigError::UnknownPattern(other.to_string())),
        }
    }
}

impl TryFrom<String> for Pattern {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Random => f.write_str("random"),
            Pattern::Fixed => f.write_str("fixed"),
        }
    }
}

/// What the `fixed` pattern repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FixedMode {
    /// Row-major sweep of the whole box, wrapping at the end.
    #[default]
    Sweep,
    /// The minimum corner of the box, forever.
    Single,
}

impl FromStr for FixedMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sweep" => Ok(FixedMode::Sweep),
            "single" => Ok(FixedMode::Single),
            other => Err(ConfigError::UnknownFixedMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for FixedMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FixedMode> for String {
    fn from(mode: FixedMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for FixedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixedMode::Sweep => f.write_str("sweep"),
            FixedMode::Single => f.write_str("single"),
        }
    }
}

impl TestConfig {
    /// Config with defaults for everything but the template and bounds.
    pub fn new(url_template: impl Into<String>, bounds: TileBounds) -> Self {
        Self {
            url_template: url_template.into(),
            bounds,
            threads: default_threads(),
            pattern: Pattern::default(),
            fixed_mode: FixedMode::default(),
            duration: None,
            timeout: default_timeout(),
            name: default_label(),
            environment: default_label(),
            output: default_output(),
            accept_encoding: None,
            headers: Vec::new(),
            seed: None,
            requests: None,
            accept_status: default_accept_status(),
        }
    }

    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url_template.trim().is_empty() {
            return Err(ConfigError::EmptyUrlTemplate);
        }
        self.bounds.validate()?;
        if self.threads == 0 {
            return Err(ConfigError::InvalidThreads);
        }
        if self.accept_status.is_empty() {
            return Err(ConfigError::EmptyAcceptList);
        }
        self.duration_limit()?;
        self.request_timeout()?;
        self.header_map()?;
        Ok(())
    }

    /// Parsed wall-clock limit, if one is configured.
    pub fn duration_limit(&self) -> Result<Option<Duration>, ConfigError> {
        self.duration
            .as_deref()
            .map(|value| parse_duration("duration", value))
            .transpose()
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("timeout", &self.timeout)
    }

    /// Default headers sent with every tile request.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();

        for raw in &self.headers {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidHeader(raw.clone()))?;
            let name = name
                .trim()
                .parse::<HeaderName>()
                .map_err(|_| ConfigError::InvalidHeader(raw.clone()))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| ConfigError::InvalidHeader(raw.clone()))?;
            headers.insert(name, value);
        }

        if let Some(encoding) = self.accept_encoding.as_deref().filter(|e| !e.is_empty()) {
            let value = HeaderValue::from_str(encoding)
                .map_err(|_| ConfigError::InvalidHeader(format!("Accept-Encoding: {}", encoding)))?;
            headers.insert(ACCEPT_ENCODING, value);
        }

        Ok(headers)
    }

    /// Capacity of the bounded results channel.
    pub fn channel_capacity(&self) -> usize {
        self.threads.saturating_mul(CHANNEL_SLOTS_PER_WORKER).max(1)
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        source,
    })
}
