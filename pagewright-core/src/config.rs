//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name inside a site directory
pub const CONFIG_FILE: &str = "site.yml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct matching the site.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub mode: BuildMode,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub build: BuildConfig,

    /// Handler chain, in registration order
    #[serde(default = "default_handlers")]
    pub handlers: Vec<String>,

    #[serde(default)]
    pub reading_time: ReadingTimeConfig,

    // Internal: directory relative paths resolve against
    #[serde(skip)]
    root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            mode: BuildMode::default(),
            site: SiteConfig::default(),
            server: ServerConfig::default(),
            build: BuildConfig::default(),
            handlers: default_handlers(),
            reading_time: ReadingTimeConfig::default(),
            root: None,
        }
    }
}

fn default_handlers() -> Vec<String> {
    crate::handlers::DEFAULT_HANDLERS
        .iter()
        .map(|name| name.to_string())
        .collect()
}

/// How strictly per-file problems are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

impl FromStr for BuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(BuildMode::Development),
            "production" | "prod" => Ok(BuildMode::Production),
            other => Err(ConfigError::Invalid(format!("unknown mode `{}`", other))),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Development => f.write_str("development"),
            BuildMode::Production => f.write_str("production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_pages")]
    pub pages: PathBuf,

    #[serde(default = "default_layouts")]
    pub layouts: PathBuf,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_static")]
    pub r#static: PathBuf,
}

fn default_pages() -> PathBuf {
    PathBuf::from("pages")
}

fn default_layouts() -> PathBuf {
    PathBuf::from("layouts")
}

fn default_output() -> PathBuf {
    PathBuf::from("out")
}

fn default_static() -> PathBuf {
    PathBuf::from("static")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pages: default_pages(),
            layouts: default_layouts(),
            output: default_output(),
            r#static: default_static(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub title: String,

    /// Absolute site URL; enables the sitemap when set
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redirect rules file, resolved against the site directory
    #[serde(default = "default_redirects")]
    pub redirects: Option<PathBuf>,
}

fn default_port() -> u16 {
    3000
}

fn default_redirects() -> Option<PathBuf> {
    Some(PathBuf::from("_redirects"))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            redirects: default_redirects(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Inactivity period after which the build stops waiting
    #[serde(default = "default_quiescence_timeout")]
    pub quiescence_timeout_ms: u64,

    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,

    /// Passes allowed along a single lineage before the branch is abandoned
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,

    #[serde(default = "default_data_file_prefix")]
    pub data_file_prefix: String,
}

fn default_quiescence_timeout() -> u64 {
    5000
}

fn default_idle_poll() -> u64 {
    200
}

fn default_max_passes() -> usize {
    64
}

fn default_data_file_prefix() -> String {
    String::from("_data.")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            quiescence_timeout_ms: default_quiescence_timeout(),
            idle_poll_ms: default_idle_poll(),
            max_passes: default_max_passes(),
            data_file_prefix: default_data_file_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingTimeConfig {
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,
}

fn default_words_per_minute() -> u32 {
    150
}

impl Default for ReadingTimeConfig {
    fn default() -> Self {
        Self {
            words_per_minute: default_words_per_minute(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        config.root = path.parent().map(Path::to_path_buf);

        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults rooted next to it
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::rooted_at(path.parent().unwrap_or(Path::new("."))))
        }
    }

    /// Default configuration rooted at a site directory
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Directory relative paths are resolved against
    pub fn root(&self) -> PathBuf {
        match &self.root {
            Some(root) if !root.as_os_str().is_empty() => root.clone(),
            _ => PathBuf::from("."),
        }
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.pages)
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.layouts)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output)
    }

    pub fn static_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.r#static)
    }

    pub fn redirects_path(&self) -> Option<PathBuf> {
        self.server.redirects.as_ref().map(|p| self.resolve_path(p))
    }

    pub fn quiescence_timeout(&self) -> Duration {
        Duration::from_millis(self.build.quiescence_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.build.idle_poll_ms)
    }

    pub fn is_production(&self) -> bool {
        self.mode == BuildMode::Production
    }

    /// Resolve a path relative to the site directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    /// Reject settings that would keep the build from terminating
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.quiescence_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "build.quiescence_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.build.idle_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "build.idle_poll_ms must be greater than zero".to_string(),
            ));
        }
        if self.build.max_passes == 0 {
            return Err(ConfigError::Invalid(
                "build.max_passes must be greater than zero".to_string(),
            ));
        }
        if self.build.data_file_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "build.data_file_prefix must not be empty".to_string(),
            ));
        }
        if self.reading_time.words_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "reading_time.words_per_minute must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
