//! Configuration management
//!
//! Loads learning thresholds, locator settings, feedback tracking and the
//! webhook server settings from a TOML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::learning::{promotion, Thresholds};
use crate::locator::LocatorSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Outcome learning store
    #[serde(default)]
    pub learning: LearningConfig,
    /// Rule-based classification
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Regression bisection
    #[serde(default)]
    pub locator: LocatorConfig,
    /// PR attribution and title filtering
    #[serde(default)]
    pub feedback: FeedbackConfig,
    /// Webhook server
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning store document (default: `<data_dir>/learning_db.json`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_success_streak")]
    pub success_streak_threshold: u64,
    #[serde(default = "default_success_count")]
    pub success_count_threshold: u64,
    #[serde(default = "default_failure_streak")]
    pub failure_streak_threshold: u64,
    #[serde(default = "default_min_attempts")]
    pub min_attempts_for_demotion: u64,
    /// When false the classifier ignores learned state
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_success_streak() -> u64 {
    promotion::SUCCESS_STREAK_THRESHOLD
}

fn default_success_count() -> u64 {
    promotion::SUCCESS_COUNT_THRESHOLD
}

fn default_failure_streak() -> u64 {
    promotion::FAILURE_STREAK_THRESHOLD
}

fn default_min_attempts() -> u64 {
    promotion::MIN_ATTEMPTS_FOR_DEMOTION
}

fn default_true() -> bool {
    true
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            success_streak_threshold: default_success_streak(),
            success_count_threshold: default_success_count(),
            failure_streak_threshold: default_failure_streak(),
            min_attempts_for_demotion: default_min_attempts(),
            enabled: true,
        }
    }
}

impl LearningConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            success_streak: self.success_streak_threshold,
            success_count: self.success_count_threshold,
            failure_streak: self.failure_streak_threshold,
            min_attempts_for_demotion: self.min_attempts_for_demotion,
        }
    }

    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("learning_db.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base confidence at or above which a rule match is RULE_HIGH
    #[serde(default = "default_high_confidence")]
    pub high_confidence_threshold: f64,
}

fn default_high_confidence() -> f64 {
    crate::classifier::engine::DEFAULT_HIGH_CONFIDENCE_THRESHOLD
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: default_high_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    /// Shell command that builds the checked-out tree
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default = "default_max_history_search")]
    pub max_history_search: usize,
    #[serde(default = "default_max_bisect_attempts")]
    pub max_bisect_attempts: usize,
    #[serde(default = "default_timeout_secs")]
    pub checkout_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub compile_timeout_secs: u64,
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_build_command() -> String {
    "javac src/App.java".to_string()
}

fn default_max_history_search() -> usize {
    crate::locator::engine::DEFAULT_MAX_HISTORY_SEARCH
}

fn default_max_bisect_attempts() -> usize {
    crate::locator::engine::DEFAULT_MAX_BISECT_ATTEMPTS
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            build_command: default_build_command(),
            max_history_search: default_max_history_search(),
            max_bisect_attempts: default_max_bisect_attempts(),
            checkout_timeout_secs: default_timeout_secs(),
            compile_timeout_secs: default_timeout_secs(),
        }
    }
}

impl LocatorConfig {
    pub fn settings(&self) -> LocatorSettings {
        LocatorSettings {
            max_history_search: self.max_history_search,
            max_bisect_attempts: self.max_bisect_attempts,
        }
    }

    pub fn oracle_config(&self) -> crate::locator::GitOracleConfig {
        let mut config =
            crate::locator::GitOracleConfig::new(self.repo_dir.clone(), self.build_command.clone());
        config.checkout_timeout = std::time::Duration::from_secs(self.checkout_timeout_secs);
        config.compile_timeout = std::time::Duration::from_secs(self.compile_timeout_secs);
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// PR attribution database (default: `<data_dir>/pr_tracking.db`)
    #[serde(default)]
    pub attribution_db: Option<PathBuf>,
    /// Title substrings marking PRs opened by the fix pipeline
    #[serde(default = "default_title_markers")]
    pub title_markers: Vec<String>,
}

fn default_title_markers() -> Vec<String> {
    crate::feedback::webhook::DEFAULT_TITLE_MARKERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            attribution_db: None,
            title_markers: default_title_markers(),
        }
    }
}

impl FeedbackConfig {
    pub fn resolved_attribution_db(&self) -> Result<PathBuf> {
        match &self.attribution_db {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("pr_tracking.db")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// GitHub webhook secret
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "build-sentinel", "build-sentinel")
        .context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Print the effective configuration
pub fn show_config(config: &Config, path: &Path) -> Result<()> {
    println!("Configuration: {}", path.display());
    println!();
    println!("[learning]");
    println!("  db_path                   {}", config.learning.resolved_db_path()?.display());
    println!("  enabled                   {}", config.learning.enabled);
    println!("  success_streak_threshold  {}", config.learning.success_streak_threshold);
    println!("  success_count_threshold   {}", config.learning.success_count_threshold);
    println!("  failure_streak_threshold  {}", config.learning.failure_streak_threshold);
    println!("  min_attempts_for_demotion {}", config.learning.min_attempts_for_demotion);
    println!("[classifier]");
    println!("  high_confidence_threshold {}", config.classifier.high_confidence_threshold);
    println!("[locator]");
    println!("  repo_dir                  {}", config.locator.repo_dir.display());
    println!("  build_command             {}", config.locator.build_command);
    println!("  max_history_search        {}", config.locator.max_history_search);
    println!("  max_bisect_attempts       {}", config.locator.max_bisect_attempts);
    println!("  checkout_timeout_secs     {}", config.locator.checkout_timeout_secs);
    println!("  compile_timeout_secs      {}", config.locator.compile_timeout_secs);
    println!("[feedback]");
    println!(
        "  attribution_db            {}",
        config.feedback.resolved_attribution_db()?.display()
    );
    println!("  title_markers             {:?}", config.feedback.title_markers);
    println!("[server]");
    println!("  listen                    {}:{}", config.server.host, config.server.port);
    println!(
        "  webhook_secret            {}",
        if config.server.webhook_secret.is_some() { "set" } else { "not set" }
    );
    Ok(())
}
