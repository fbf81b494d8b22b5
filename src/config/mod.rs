//! Configuration management for hubupdate
//!
//! Settings are read once at startup from a YAML file (default
//! `/config/settings.yml`) and then overridden from the environment. The
//! resulting [`UpdaterConfig`] is handed to the controller explicitly; there is
//! no global configuration state.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{Result, UpdateError};
use std::path::{Path, PathBuf};

/// Default settings location on the appliance.
pub const DEFAULT_CONFIG_PATH: &str = "/config/settings.yml";

/// Environment variable naming an alternative settings file.
pub const CONFIG_PATH_ENV: &str = "HUBUPDATE_CONFIG";

impl UpdaterConfig {
    /// Resolve the settings file path: `HUBUPDATE_CONFIG` or the default.
    pub fn path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from the default path with environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    ///
    /// A missing file yields the defaults. A present but unparsable file is
    /// an error rather than a silent fallback.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_yaml(&content)?
        } else {
            UpdaterConfig::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a settings document. An empty document means all defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(UpdaterConfig::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| UpdateError::Config(format!("invalid settings file: {e}")))
    }

    /// Files the updater appends to while it runs. Snapshots leave them alone.
    pub fn live_files(&self) -> Vec<PathBuf> {
        [&self.logging.file, &self.metrics.file]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: HUBUPDATE_SECTION_KEY
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_env_overrides_from<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Repository
        if let Some(val) = get("HUBUPDATE_REPOSITORY_REPO") {
            self.repository.repo = val;
        }
        if let Some(val) = get("HUBUPDATE_REPOSITORY_BRANCH") {
            self.repository.branch = val;
        }
        if let Some(val) = get("HUBUPDATE_REPOSITORY_BASE_URL") {
            self.repository.base_url = val;
        }
        if let Some(val) = get("HUBUPDATE_REPOSITORY_TIMEOUT_SECS") {
            self.repository.timeout_secs = parse_number("HUBUPDATE_REPOSITORY_TIMEOUT_SECS", &val)?;
        }

        // Intervals
        if let Some(val) = get("HUBUPDATE_INTERVALS_UPDATE_CHECK_SECS") {
            self.intervals.update_check_secs =
                parse_number("HUBUPDATE_INTERVALS_UPDATE_CHECK_SECS", &val)?;
        }

        // Paths
        if let Some(val) = get("HUBUPDATE_PATHS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(val);
        }
        if let Some(val) = get("HUBUPDATE_PATHS_CONFIG_DIR") {
            self.paths.config_dir = PathBuf::from(val);
        }
        if let Some(val) = get("HUBUPDATE_PATHS_BACKUP_DIR") {
            self.paths.backup_dir = PathBuf::from(val);
        }
        if let Some(val) = get("HUBUPDATE_PATHS_COMPOSE_FILE") {
            self.paths.compose_file = PathBuf::from(val);
        }

        // Services
        if let Some(val) = get("HUBUPDATE_SERVICES_STRATEGY") {
            self.services.strategy = val.parse().map_err(UpdateError::Config)?;
        }
        if let Some(val) = get("HUBUPDATE_SERVICES_PROJECT_NAME") {
            self.services.project_name = val;
        }
        if let Some(val) = get("HUBUPDATE_SERVICES_NETWORK") {
            self.services.network = Some(val);
        }
        if let Some(val) = get("HUBUPDATE_SERVICES_EXCLUDED") {
            self.services.excluded = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = get("HUBUPDATE_SERVICES_DOCKER_BINARY") {
            self.services.docker_binary = val;
        }
        if let Some(val) = get("HUBUPDATE_SERVICES_COMPOSE_BINARY") {
            self.services.compose_binary = val;
        }

        // Logging
        if let Some(val) = get("HUBUPDATE_LOGGING_LEVEL") {
            self.logging.level = val;
        }

        Ok(())
    }
}

fn parse_number(key: &str, val: &str) -> Result<u64> {
    val.trim()
        .parse()
        .map_err(|_| UpdateError::Config(format!("{key} must be a number, got '{val}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_live_files_lists_log_and_metrics_outputs() {
        let mut config = UpdaterConfig::default();
        assert!(config.live_files().is_empty());
        config.logging.file = Some(PathBuf::from("/data/config/history.log"));
        config.metrics.file = Some(PathBuf::from("/data/config/metrics.jsonl"));
        assert_eq!(
            config.live_files(),
            vec![
                PathBuf::from("/data/config/history.log"),
                PathBuf::from("/data/config/metrics.jsonl"),
            ]
        );
    }

    #[test]
    fn test_defaults() {
        let config = UpdaterConfig::default();
        assert_eq!(config.repository.repo, "sv-afterglow/data-hub");
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.intervals.update_check_secs, 3600);
        assert_eq!(config.services.strategy, RestartStrategy::Compose);
        assert_eq!(config.services.network_name(), "compose_data-hub");
        assert_eq!(
            config.services.excluded,
            vec!["update_service".to_string(), "watchtower".to_string()]
        );
        assert_eq!(
            config.paths.version_file(),
            PathBuf::from("/data/state/version")
        );
    }

    #[test]
    fn test_root_url() {
        let repo = RepositoryConfig {
            base_url: "http://localhost:8080/".into(),
            repo: "/acme/hub/".into(),
            branch: "stable".into(),
            timeout_secs: 5,
        };
        assert_eq!(repo.root_url(), "http://localhost:8080/acme/hub/stable");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = UpdaterConfig::from_yaml(
            "repository:\n  branch: develop\nintervals:\n  update_check_secs: 60\n",
        )
        .unwrap();
        assert_eq!(config.repository.branch, "develop");
        assert_eq!(config.repository.repo, "sv-afterglow/data-hub");
        assert_eq!(config.intervals.update_check_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_strategy_from_yaml() {
        let config = UpdaterConfig::from_yaml("services:\n  strategy: direct\n").unwrap();
        assert_eq!(config.services.strategy, RestartStrategy::Direct);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = UpdaterConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.repository.branch, "main");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = UpdaterConfig::from_yaml("repository: [unclosed").unwrap_err();
        assert!(matches!(err, UpdateError::Config(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpdaterConfig::load_from_path(&dir.path().join("nope.yml")).unwrap();
        assert_eq!(config.paths.config_dir, PathBuf::from("/config"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, "paths:\n  data_dir: /srv/state\n").unwrap();
        let config = UpdaterConfig::load_from_path(&path).unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/state"));
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("HUBUPDATE_REPOSITORY_BRANCH", "beta"),
            ("HUBUPDATE_INTERVALS_UPDATE_CHECK_SECS", "120"),
            ("HUBUPDATE_PATHS_DATA_DIR", "/tmp/state"),
            ("HUBUPDATE_SERVICES_STRATEGY", "direct"),
            ("HUBUPDATE_SERVICES_EXCLUDED", "updater, ,watchtower"),
        ]);
        let mut config = UpdaterConfig::default();
        config
            .apply_env_overrides_from(|k| vars.get(k).cloned())
            .unwrap();
        assert_eq!(config.repository.branch, "beta");
        assert_eq!(config.intervals.update_check_secs, 120);
        assert_eq!(config.paths.data_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.services.strategy, RestartStrategy::Direct);
        assert_eq!(
            config.services.excluded,
            vec!["updater".to_string(), "watchtower".to_string()]
        );
    }

    #[test]
    fn test_env_override_bad_number() {
        let vars = env(&[("HUBUPDATE_INTERVALS_UPDATE_CHECK_SECS", "hourly")]);
        let mut config = UpdaterConfig::default();
        let err = config
            .apply_env_overrides_from(|k| vars.get(k).cloned())
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_env_override_bad_strategy() {
        let vars = env(&[("HUBUPDATE_SERVICES_STRATEGY", "kubernetes")]);
        let mut config = UpdaterConfig::default();
        assert!(config
            .apply_env_overrides_from(|k| vars.get(k).cloned())
            .is_err());
    }
}
