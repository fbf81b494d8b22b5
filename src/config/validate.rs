//! Settings validation with unknown field detection.

use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;

use super::{MetricsSinkKind, UpdaterConfig};

/// Known top-level settings sections.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "repository",
    "intervals",
    "paths",
    "services",
    "metrics",
    "logging",
];

const KNOWN_REPOSITORY: &[&str] = &["repo", "branch", "base_url", "timeout_secs"];
const KNOWN_INTERVALS: &[&str] = &["update_check_secs"];
const KNOWN_PATHS: &[&str] = &["data_dir", "config_dir", "backup_dir", "compose_file"];
const KNOWN_SERVICES: &[&str] = &[
    "strategy",
    "project_name",
    "network",
    "excluded",
    "docker_binary",
    "compose_binary",
    "command_timeout_secs",
];
const KNOWN_METRICS: &[&str] = &["sink", "file"];
const KNOWN_LOGGING: &[&str] = &["level", "format", "file"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn warn(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warn,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Returns `true` if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Error)
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(map: &serde_yaml::Mapping, prefix: &str, known: &[&str], out: &mut Vec<Diagnostic>) {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in map.keys() {
        let Some(key) = key.as_str() else {
            out.push(Diagnostic::error(prefix, "non-string key"));
            continue;
        };
        if known_set.contains(key) {
            continue;
        }
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        let msg = match suggest_field(key, known) {
            Some(suggestion) => format!("Unknown field '{key}'; {suggestion}"),
            None => format!("Unknown field '{key}'"),
        };
        out.push(Diagnostic::error(path, msg));
    }
}

/// Validate a raw settings document against known field names.
pub fn validate_raw(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let Some(root) = raw.as_mapping() else {
        if raw.is_null() {
            diagnostics.push(Diagnostic::ok("Empty settings; defaults apply"));
        } else {
            diagnostics.push(Diagnostic::error("", "Settings must be a YAML mapping"));
        }
        return diagnostics;
    };

    check_keys(root, "", KNOWN_TOP_LEVEL, &mut diagnostics);

    let sections: [(&str, &[&str]); 6] = [
        ("repository", KNOWN_REPOSITORY),
        ("intervals", KNOWN_INTERVALS),
        ("paths", KNOWN_PATHS),
        ("services", KNOWN_SERVICES),
        ("metrics", KNOWN_METRICS),
        ("logging", KNOWN_LOGGING),
    ];
    for (name, known) in sections {
        if let Some(section) = root.get(name).and_then(Value::as_mapping) {
            check_keys(section, name, known, &mut diagnostics);
        }
    }

    if !has_errors(&diagnostics) {
        diagnostics.push(Diagnostic::ok("All fields recognized"));
    }
    diagnostics
}

/// Semantic checks on a loaded configuration.
pub fn validate_config(config: &UpdaterConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.repository.repo.trim().is_empty() {
        diagnostics.push(Diagnostic::error("repository.repo", "must not be empty"));
    }
    if config.repository.branch.trim().is_empty() {
        diagnostics.push(Diagnostic::error("repository.branch", "must not be empty"));
    }
    if !config.repository.base_url.starts_with("http://")
        && !config.repository.base_url.starts_with("https://")
    {
        diagnostics.push(Diagnostic::error(
            "repository.base_url",
            "must be an http(s) URL",
        ));
    }
    if config.intervals.update_check_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "intervals.update_check_secs",
            "must be greater than zero",
        ));
    } else if config.intervals.update_check_secs < 60 {
        diagnostics.push(Diagnostic::warn(
            "intervals.update_check_secs",
            "checking more than once a minute hammers the release host",
        ));
    }

    let paths: [(&str, &Path); 4] = [
        ("paths.data_dir", &config.paths.data_dir),
        ("paths.config_dir", &config.paths.config_dir),
        ("paths.backup_dir", &config.paths.backup_dir),
        ("paths.compose_file", &config.paths.compose_file),
    ];
    for (name, path) in paths {
        if !path.is_absolute() {
            diagnostics.push(Diagnostic::error(name, "must be an absolute path"));
        }
    }
    if config.paths.backup_dir.starts_with(&config.paths.config_dir) {
        diagnostics.push(Diagnostic::error(
            "paths.backup_dir",
            "must not live inside paths.config_dir",
        ));
    }

    if config.services.project_name.trim().is_empty() {
        diagnostics.push(Diagnostic::error("services.project_name", "must not be empty"));
    }
    if config.services.command_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "services.command_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.metrics.sink == MetricsSinkKind::File && config.metrics.file.is_none() {
        diagnostics.push(Diagnostic::error(
            "metrics.file",
            "required when metrics.sink is 'file'",
        ));
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_suggest_field() {
        assert_eq!(
            suggest_field("repositry", KNOWN_TOP_LEVEL),
            Some("did you mean 'repository'?".to_string())
        );
        assert_eq!(suggest_field("zzzzzzzzzz", KNOWN_TOP_LEVEL), None);
    }

    #[test]
    fn test_valid_raw_settings() {
        let raw: Value =
            serde_yaml::from_str("repository:\n  branch: main\nservices:\n  strategy: compose\n")
                .unwrap();
        let diags = validate_raw(&raw);
        assert!(!has_errors(&diags));
        assert!(diags.iter().any(|d| d.message == "All fields recognized"));
    }

    #[test]
    fn test_unknown_nested_field() {
        let raw: Value = serde_yaml::from_str("paths:\n  data_dri: /data\n").unwrap();
        let diags = validate_raw(&raw);
        let err = diags
            .iter()
            .find(|d| d.level == DiagnosticLevel::Error)
            .unwrap();
        assert_eq!(err.path, "paths.data_dri");
        assert!(err.message.contains("did you mean 'data_dir'?"));
    }

    #[test]
    fn test_non_mapping_settings() {
        let raw: Value = serde_yaml::from_str("- a\n- b\n").unwrap();
        assert!(has_errors(&validate_raw(&raw)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let diags = validate_config(&UpdaterConfig::default());
        assert!(!has_errors(&diags), "{diags:?}");
    }

    #[test]
    fn test_semantic_errors() {
        let mut config = UpdaterConfig::default();
        config.intervals.update_check_secs = 0;
        config.paths.data_dir = "relative/state".into();
        config.metrics.sink = MetricsSinkKind::File;
        let diags = validate_config(&config);
        let paths: Vec<&str> = diags
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .map(|d| d.path.as_str())
            .collect();
        assert!(paths.contains(&"intervals.update_check_secs"));
        assert!(paths.contains(&"paths.data_dir"));
        assert!(paths.contains(&"metrics.file"));
    }

    #[test]
    fn test_backup_inside_config_dir_rejected() {
        let mut config = UpdaterConfig::default();
        config.paths.backup_dir = "/config/backups".into();
        assert!(has_errors(&validate_config(&config)));
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error("paths.data_dir", "must be an absolute path");
        assert_eq!(d.to_string(), "[ERROR] paths.data_dir: must be an absolute path");
        assert_eq!(Diagnostic::ok("fine").to_string(), "[OK] fine");
    }
}
