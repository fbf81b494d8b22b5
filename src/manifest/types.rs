//! Typed manifest model and conversion from the published document.

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{Result, UpdateError};
use crate::version::Version;

/// Compose document location used when a `docker_compose` update step
/// names no path.
pub const DEFAULT_COMPOSE_REMOTE_PATH: &str = "docker/compose/docker-compose.yaml";

/// What to do with a service named in a restart declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    Restart,
    Recreate,
}

impl RestartAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartAction::Restart => "restart",
            RestartAction::Recreate => "recreate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restart" => Some(RestartAction::Restart),
            "recreate" => Some(RestartAction::Recreate),
            _ => None,
        }
    }
}

/// One manifest step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Download `remote_path` and write it to `target_path`.
    ServiceConfig {
        remote_path: String,
        target_path: String,
        permissions: Option<u32>,
    },
    /// Replace the compose document with `remote_path`.
    ComposeUpdate { remote_path: String },
    /// Declare a service (or, without a name, every service) for restart.
    ServiceRestart {
        service: Option<String>,
        action: RestartAction,
    },
    /// Host package request. Not supported on the appliance; skipped.
    SystemPackage { name: String },
    /// Any step type this updater does not know.
    Unsupported { kind: String },
}

impl Step {
    /// Step type as reported in `update_step` events.
    pub fn type_name(&self) -> &str {
        match self {
            Step::ServiceConfig { .. } => "service_config",
            Step::ComposeUpdate { .. } | Step::ServiceRestart { .. } => "docker_compose",
            Step::SystemPackage { .. } => "system_package",
            Step::Unsupported { kind } => kind,
        }
    }

    /// Short human description for logs.
    pub fn describe(&self) -> String {
        match self {
            Step::ServiceConfig {
                remote_path,
                target_path,
                ..
            } => format!("write {remote_path} -> {target_path}"),
            Step::ComposeUpdate { remote_path } => format!("replace compose document from {remote_path}"),
            Step::ServiceRestart { service, action } => format!(
                "{} {}",
                action.as_str(),
                service.as_deref().unwrap_or("all services")
            ),
            Step::SystemPackage { name } => format!("package {name} (skipped)"),
            Step::Unsupported { kind } => format!("unsupported step '{kind}'"),
        }
    }
}

/// A validated update manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: Version,
    /// Minimum installed version this update applies on top of.
    pub requires: Option<Version>,
    pub description: Option<String>,
    pub release_date: Option<String>,
    pub steps: Vec<Step>,
    pub rollback_supported: bool,
}

impl Manifest {
    /// Parse and schema-check a manifest document (YAML or JSON).
    ///
    /// Any failure is [`UpdateError::ManifestUnavailable`] carrying every
    /// schema error found.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            UpdateError::ManifestUnavailable(format!("manifest is not UTF-8: {e}"))
        })?;
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| UpdateError::ManifestUnavailable(format!("malformed manifest: {e}")))?;
        let diagnostics = super::validate::validate_manifest(&value);
        let errors: Vec<String> = diagnostics
            .iter()
            .filter(|d| d.level == crate::config::validate::DiagnosticLevel::Error)
            .map(|d| d.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(UpdateError::ManifestUnavailable(errors.join("; ")));
        }

        // Typed fields come from the text itself: a plain `1.10` read through
        // `Value` would already be the float 1.1.
        let raw: RawManifest = serde_yaml::from_str(text)
            .map_err(|e| UpdateError::ManifestUnavailable(format!("malformed manifest: {e}")))?;
        raw.into_manifest()
    }

    /// `true` if any step is of a type this updater cannot apply.
    pub fn has_unsupported_steps(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::Unsupported { .. }))
    }
}

// ============================================================================
// Raw document
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawManifest {
    version: String,
    #[serde(default)]
    requires: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default)]
    rollback: Option<RawRollback>,
}

#[derive(Debug, Deserialize)]
struct RawRollback {
    #[serde(default = "default_true")]
    supported: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    permissions: Option<Value>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl RawManifest {
    fn into_manifest(self) -> Result<Manifest> {
        let version = parse_version_text(&self.version, "version")?;
        let requires = self
            .requires
            .as_deref()
            .map(|v| parse_version_text(v, "requires"))
            .transpose()?;
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.into_step(i + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Manifest {
            version,
            requires,
            description: self.description,
            release_date: self.release_date,
            steps,
            rollback_supported: self.rollback.map_or(true, |r| r.supported),
        })
    }
}

impl RawStep {
    fn into_step(self, number: usize) -> Result<Step> {
        let missing = |field: &str| {
            UpdateError::ManifestUnavailable(format!("step {number}: missing '{field}'"))
        };
        let step = match self.kind.as_str() {
            "service_config" => Step::ServiceConfig {
                remote_path: self.path.ok_or_else(|| missing("path"))?,
                target_path: self.target.ok_or_else(|| missing("target"))?,
                permissions: match self.permissions.as_ref() {
                    Some(v) => Some(parse_permissions(v).ok_or_else(|| {
                        UpdateError::ManifestUnavailable(format!(
                            "step {number}: invalid permissions"
                        ))
                    })?),
                    None => None,
                },
            },
            "docker_compose" => match self.action.as_deref() {
                Some(action) => Step::ServiceRestart {
                    service: self.service,
                    action: RestartAction::parse(action).ok_or_else(|| {
                        UpdateError::ManifestUnavailable(format!(
                            "step {number}: invalid action '{action}'"
                        ))
                    })?,
                },
                None => Step::ComposeUpdate {
                    remote_path: self
                        .path
                        .unwrap_or_else(|| DEFAULT_COMPOSE_REMOTE_PATH.to_string()),
                },
            },
            "system_package" => Step::SystemPackage {
                name: self
                    .package
                    .or(self.name)
                    .ok_or_else(|| missing("package"))?,
            },
            other => Step::Unsupported {
                kind: other.to_string(),
            },
        };
        Ok(step)
    }
}

// ============================================================================
// Scalar helpers
// ============================================================================

/// Render a YAML scalar as text. Unquoted `644` arrives as a number. Not
/// for versions: a float loses trailing zeros (`1.10` renders as `1.1`).
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_version_text(text: &str, field: &str) -> Result<Version> {
    Version::parse(text)
        .ok_or_else(|| UpdateError::ManifestUnavailable(format!("invalid {field} '{text}'")))
}

/// Parse a 3-digit octal permission string (`"644"`). An unquoted `644`
/// is read by YAML as a decimal integer and is accepted the same way.
pub(crate) fn parse_permissions(value: &Value) -> Option<u32> {
    let s = scalar_to_string(value)?;
    if s.len() != 3 || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(&s, 8).ok()
}

/// Reject remote paths that would leave the repository root.
pub fn check_remote_path(path: &str) -> std::result::Result<(), String> {
    if path.trim().is_empty() {
        return Err("remote path is empty".into());
    }
    if path.starts_with('/') {
        return Err(format!("remote path '{path}' must be relative"));
    }
    if path.split(['/', '\\']).any(|c| c == "..") {
        return Err(format!("remote path '{path}' must not contain '..'"));
    }
    Ok(())
}
