//! Project configuration
//!
//! The configuration is resolved once per analysis context and shared
//! read-only by every stage. It is normally stored as `config.toml` in the
//! project directory.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::rating::RankingSeed;
use crate::time::PhaseBoundaries;

/// File name looked up when a project directory is given as config source
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default chasing window in seconds
pub const DEFAULT_CHASING_WINDOW: [f64; 2] = [0.1, 1.2];

/// Default minimum overlap for a pairwise meeting in seconds
pub const DEFAULT_MINIMUM_TIME: f64 = 2.0;

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// EcoHab project configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human readable project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Root directory of the project
    pub project_location: PathBuf,

    /// Animal identifiers in display order
    pub animal_ids: Vec<String>,

    /// Cage identifiers in display order
    pub cages: Vec<String>,

    /// Physical tunnels connecting cages
    #[serde(default)]
    pub tunnels: Vec<String>,

    /// Results directory, relative to `project_location`
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Light/dark phase boundaries
    pub phase: PhaseBoundaries,

    /// Directional antenna labels mapped to their physical tunnel
    #[serde(default)]
    pub tunnel_aliases: BTreeMap<String, String>,

    /// Default stage options for this project
    #[serde(default)]
    pub analysis: AnalysisDefaults,
}

/// Per-project defaults for stage options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chasing_window: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_time: Option<f64>,
}

impl ProjectConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, AnalysisError> {
        Ok(toml::from_str(raw)?)
    }

    /// Check structural invariants. Called before any stage runs.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.animal_ids.is_empty() {
            return Err(AnalysisError::InvalidConfig("animal_ids is empty".to_string()));
        }
        if self.cages.is_empty() {
            return Err(AnalysisError::InvalidConfig("cages is empty".to_string()));
        }

        ensure_unique("animal_ids", &self.animal_ids)?;
        let mut positions = HashSet::new();
        for position in self.cages.iter().chain(self.tunnels.iter()) {
            if !positions.insert(position.as_str()) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "position '{}' is declared more than once",
                    position
                )));
            }
        }

        if self.phase.light_start == self.phase.dark_start {
            return Err(AnalysisError::InvalidConfig(
                "light_start and dark_start must differ".to_string(),
            ));
        }

        for (alias, tunnel) in &self.tunnel_aliases {
            if !self.tunnels.contains(tunnel) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "alias '{}' points to undeclared tunnel '{}'",
                    alias, tunnel
                )));
            }
            if self.cages.contains(alias) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "alias '{}' collides with a cage",
                    alias
                )));
            }
        }

        self.default_options().validate()
    }

    /// Cages followed by tunnels
    pub fn positions(&self) -> Vec<String> {
        self.cages.iter().chain(self.tunnels.iter()).cloned().collect()
    }

    pub fn results_path(&self) -> PathBuf {
        self.project_location.join(&self.results_dir)
    }

    /// Collapse a directional antenna label onto its physical position.
    pub fn physical_position<'a>(&'a self, position: &'a str) -> &'a str {
        self.tunnel_aliases
            .get(position)
            .map(String::as_str)
            .unwrap_or(position)
    }

    pub fn is_cage(&self, position: &str) -> bool {
        self.cages.iter().any(|c| c == position)
    }

    pub fn is_tunnel(&self, position: &str) -> bool {
        let physical = self.physical_position(position);
        self.tunnels.iter().any(|t| t == physical)
    }

    /// Index of an animal in configuration order
    pub fn animal_index(&self, animal_id: &str) -> Option<usize> {
        self.animal_ids.iter().position(|a| a == animal_id)
    }

    /// Stage options seeded from the `[analysis]` table
    pub fn default_options(&self) -> StageOptions {
        let mut options = StageOptions::default();
        if let Some([min, max]) = self.analysis.chasing_window {
            options.chasing_window = ChasingWindow::new(min, max);
        }
        if let Some(minimum_time) = self.analysis.minimum_time {
            options.minimum_time = minimum_time;
        }
        options
    }
}

fn ensure_unique(field: &str, values: &[String]) -> Result<(), AnalysisError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value.as_str()) {
            return Err(AnalysisError::InvalidConfig(format!(
                "duplicate entry '{}' in {}",
                value, field
            )));
        }
    }
    Ok(())
}

/// Where a configuration comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A TOML file, or a project directory containing `config.toml`
    Path(PathBuf),
    /// An already constructed configuration
    Inline(ProjectConfig),
}

impl ConfigSource {
    /// Load and validate the configuration.
    pub fn resolve(self) -> Result<ProjectConfig, AnalysisError> {
        let config = match self {
            ConfigSource::Inline(config) => config,
            ConfigSource::Path(path) => read_config_file(&path)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn read_config_file(path: &Path) -> Result<ProjectConfig, AnalysisError> {
    let file = if path.is_dir() {
        path.join(CONFIG_FILE_NAME)
    } else {
        path.to_path_buf()
    };
    let raw = fs::read_to_string(&file).map_err(|e| {
        AnalysisError::InvalidConfig(format!("cannot read {}: {}", file.display(), e))
    })?;
    let mut config = ProjectConfig::from_toml_str(&raw)?;

    // Relative project locations are anchored at the config file
    if config.project_location.is_relative() {
        let base = file.parent().unwrap_or_else(|| Path::new("."));
        config.project_location = base.join(&config.project_location);
    }
    Ok(config)
}

impl From<ProjectConfig> for ConfigSource {
    fn from(config: ProjectConfig) -> Self {
        ConfigSource::Inline(config)
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<&Path> for ConfigSource {
    fn from(path: &Path) -> Self {
        ConfigSource::Path(path.to_path_buf())
    }
}

impl From<&str> for ConfigSource {
    fn from(path: &str) -> Self {
        ConfigSource::Path(PathBuf::from(path))
    }
}

/// Open interval of seconds between the chaser's tunnel entry and the
/// chased animal's tunnel arrival
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChasingWindow {
    pub min_seconds: f64,
    pub max_seconds: f64,
}

impl ChasingWindow {
    pub fn new(min_seconds: f64, max_seconds: f64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    /// Strict on both ends
    pub fn contains(&self, seconds: f64) -> bool {
        seconds > self.min_seconds && seconds < self.max_seconds
    }
}

impl Default for ChasingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CHASING_WINDOW[0], DEFAULT_CHASING_WINDOW[1])
    }
}

/// Options accepted by every stage
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Persist produced tables
    pub save: bool,
    /// Recompute even when an artifact exists
    pub overwrite: bool,
    /// Chasing detection window
    pub chasing_window: ChasingWindow,
    /// Minimum overlap for a pairwise meeting (strictly exceeded)
    pub minimum_time: f64,
    /// Ratings carried over from a previous recording
    pub prev_ranking: Option<Vec<RankingSeed>>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            save: true,
            overwrite: false,
            chasing_window: ChasingWindow::default(),
            minimum_time: DEFAULT_MINIMUM_TIME,
            prev_ranking: None,
        }
    }
}

impl StageOptions {
    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_chasing_window(mut self, min_seconds: f64, max_seconds: f64) -> Self {
        self.chasing_window = ChasingWindow::new(min_seconds, max_seconds);
        self
    }

    pub fn with_minimum_time(mut self, minimum_time: f64) -> Self {
        self.minimum_time = minimum_time;
        self
    }

    pub fn with_prev_ranking(mut self, seeds: Vec<RankingSeed>) -> Self {
        self.prev_ranking = Some(seeds);
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let ChasingWindow {
            min_seconds,
            max_seconds,
        } = self.chasing_window;
        if !(min_seconds.is_finite() && max_seconds.is_finite())
            || min_seconds < 0.0
            || min_seconds >= max_seconds
        {
            return Err(AnalysisError::InvalidOption(format!(
                "chasing window [{}, {}] must satisfy 0 <= min < max",
                min_seconds, max_seconds
            )));
        }
        if !self.minimum_time.is_finite() || self.minimum_time < 0.0 {
            return Err(AnalysisError::InvalidOption(format!(
                "minimum_time {} must be a non-negative number",
                self.minimum_time
            )));
        }
        Ok(())
    }
}
