//! Configuration module for the deimos pipeline
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! an optional TOML file (`~/.deimos.toml` or `--config`), and CLI flags.

use crate::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default nuclei severity filter
pub const DEFAULT_SEVERITY: &str = "medium,high,critical";

/// Wordlists probed, in order, when none is configured
const WORDLIST_CANDIDATES: &[&str] = &[
    "/usr/share/wordlists/dirb/common.txt",
    "/usr/share/dirb/wordlists/common.txt",
    "/usr/share/seclists/Discovery/Web-Content/common.txt",
];

/// Main configuration structure for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Root directory under which the per-run directory is created
    pub output_root: PathBuf,

    /// Per-tool wall-clock timeout in seconds
    pub timeout: u64,

    /// Parallelism for stages that fan out (DNS checks, per-host nuclei)
    pub jobs: usize,

    /// Optional deadline for the whole run in seconds
    pub deadline: Option<u64>,

    /// Number of top ports handed to the port scanner
    pub top_ports: u16,

    /// Severity filter passed to nuclei
    pub severity: String,

    /// Wordlist for directory discovery
    pub wordlist: Option<PathBuf>,

    /// Search path used to resolve tool executables. `None` means `$PATH`.
    pub tool_path: Option<String>,

    /// Debug logging
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./output"),
            timeout: 300,
            jobs: 4,
            deadline: None,
            top_ports: 1000,
            severity: DEFAULT_SEVERITY.to_string(),
            wordlist: None,
            tool_path: None,
            verbose: false,
        }
    }
}

impl RunConfig {
    /// Set the output root
    pub fn with_output_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.output_root = root.into();
        self
    }

    /// Set the per-tool timeout in seconds
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the fan-out parallelism
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the executable search path
    pub fn with_tool_path<S: Into<String>>(mut self, path: S) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    /// Set the wordlist
    pub fn with_wordlist<P: Into<PathBuf>>(mut self, wordlist: P) -> Self {
        self.wordlist = Some(wordlist.into());
        self
    }

    /// Per-tool timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Run deadline as Duration
    pub fn deadline_duration(&self) -> Option<Duration> {
        self.deadline.map(Duration::from_secs)
    }

    /// Wordlist to hand to the directory brute-forcer, if one exists on disk
    pub fn effective_wordlist(&self) -> Option<PathBuf> {
        match &self.wordlist {
            Some(path) => path.is_file().then(|| path.clone()),
            None => WORDLIST_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file()),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ReconError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ReconError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load `~/.deimos.toml` if it exists, defaults otherwise.
    ///
    /// A file that exists but does not parse is an error rather than being
    /// silently replaced by defaults.
    pub fn load_default_config() -> Result<Self> {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = home_dir.join(".deimos.toml");

        if config_path.is_file() {
            log::debug!("Loading config from {}", config_path.display());
            return Self::from_toml_file(&config_path);
        }

        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(ReconError::ConfigError("Timeout must be greater than 0".to_string()));
        }

        if self.jobs == 0 {
            return Err(ReconError::ConfigError("Jobs must be greater than 0".to_string()));
        }

        if self.top_ports == 0 {
            return Err(ReconError::ConfigError("top_ports must be greater than 0".to_string()));
        }

        if self.deadline == Some(0) {
            return Err(ReconError::ConfigError("Deadline must be greater than 0".to_string()));
        }

        let valid = ["info", "low", "medium", "high", "critical", "unknown"];
        for level in self.severity.split(',').map(str::trim) {
            if !valid.contains(&level) {
                return Err(ReconError::ConfigError(format!(
                    "Unknown severity '{}' (expected one of {})",
                    level,
                    valid.join(", ")
                )));
            }
        }

        if self.output_root.as_os_str().is_empty() {
            return Err(ReconError::ConfigError("Output directory cannot be empty".to_string()));
        }

        Ok(())
    }
}
