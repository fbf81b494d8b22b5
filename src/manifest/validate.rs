//! Manifest schema validation.
//!
//! Produces the same [`Diagnostic`]s as settings validation so the
//! `validate` command can print both the same way.

use serde_yaml::{Mapping, Value};

use super::types::{check_remote_path, parse_permissions, scalar_to_string, RestartAction};
use crate::config::validate::{has_errors, suggest_field, Diagnostic};
use crate::version::Version;

const KNOWN_TOP_LEVEL: &[&str] = &[
    "version",
    "requires",
    "description",
    "release_date",
    "steps",
    "rollback",
];

const KNOWN_STEP_TYPES: &[&str] = &["service_config", "docker_compose", "system_package"];

const KNOWN_STEP_FIELDS: &[&str] = &[
    "type",
    "path",
    "target",
    "permissions",
    "service",
    "action",
    "package",
    "name",
    "description",
];

/// Check a raw manifest document. An empty error set means
/// [`super::Manifest::parse`] will accept it.
pub fn validate_manifest(raw: &Value) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    let Some(root) = raw.as_mapping() else {
        out.push(Diagnostic::error("", "manifest must be a mapping"));
        return out;
    };

    for key in root.keys() {
        if let Some(key) = key.as_str() {
            if !KNOWN_TOP_LEVEL.contains(&key) {
                out.push(Diagnostic::warn(key, "unknown field ignored"));
            }
        }
    }

    match root.get("version") {
        None => out.push(Diagnostic::error("version", "required")),
        Some(v) => check_version(v, "version", &mut out),
    }
    if let Some(v) = root.get("requires") {
        check_version(v, "requires", &mut out);
    }
    if let Some(v) = root.get("description") {
        if !v.is_string() {
            out.push(Diagnostic::error("description", "must be a string"));
        }
    }

    match root.get("steps") {
        None => out.push(Diagnostic::error("steps", "required")),
        Some(Value::Sequence(steps)) => {
            if steps.is_empty() {
                out.push(Diagnostic::warn("steps", "no steps; update only bumps the version"));
            }
            for (i, step) in steps.iter().enumerate() {
                check_step(step, &format!("steps[{i}]"), &mut out);
            }
        }
        Some(_) => out.push(Diagnostic::error("steps", "must be a list")),
    }

    if let Some(rollback) = root.get("rollback") {
        match rollback.as_mapping() {
            Some(map) => {
                if let Some(supported) = map.get("supported") {
                    if !supported.is_bool() {
                        out.push(Diagnostic::error("rollback.supported", "must be a boolean"));
                    }
                }
                if let Some(steps) = map.get("steps") {
                    if !steps.is_sequence() {
                        out.push(Diagnostic::error("rollback.steps", "must be a list"));
                    }
                }
            }
            None => out.push(Diagnostic::error("rollback", "must be a mapping")),
        }
    }

    if !has_errors(&out) {
        out.push(Diagnostic::ok("Manifest schema valid"));
    }
    out
}

fn check_version(value: &Value, path: &str, out: &mut Vec<Diagnostic>) {
    match scalar_to_string(value) {
        Some(s) if Version::parse(&s).is_some() => {}
        Some(s) => out.push(Diagnostic::error(path, format!("'{s}' is not a version"))),
        None => out.push(Diagnostic::error(path, "must be a version string")),
    }
}

fn check_step(step: &Value, path: &str, out: &mut Vec<Diagnostic>) {
    let Some(map) = step.as_mapping() else {
        out.push(Diagnostic::error(path, "step must be a mapping"));
        return;
    };

    for key in map.keys().filter_map(Value::as_str) {
        if !KNOWN_STEP_FIELDS.contains(&key) {
            out.push(Diagnostic::warn(
                format!("{path}.{key}"),
                "unknown field ignored",
            ));
        }
    }

    let kind = match map.get("type").and_then(Value::as_str) {
        Some(kind) => kind,
        None => {
            out.push(Diagnostic::error(format!("{path}.type"), "required"));
            return;
        }
    };

    match kind {
        "service_config" => {
            check_remote(map, path, true, out);
            match string_field(map, "target") {
                Some(t) if !t.trim().is_empty() => {}
                _ => out.push(Diagnostic::error(format!("{path}.target"), "required")),
            }
            if let Some(p) = map.get("permissions") {
                if parse_permissions(p).is_none() {
                    out.push(Diagnostic::error(
                        format!("{path}.permissions"),
                        "must be a 3-digit octal mode such as \"644\"",
                    ));
                }
            }
        }
        "docker_compose" => match map.get("action") {
            Some(action) => {
                let valid = action
                    .as_str()
                    .and_then(RestartAction::parse)
                    .is_some();
                if !valid {
                    out.push(Diagnostic::error(
                        format!("{path}.action"),
                        "must be 'restart' or 'recreate'",
                    ));
                }
                if let Some(service) = map.get("service") {
                    if !service.is_string() {
                        out.push(Diagnostic::error(
                            format!("{path}.service"),
                            "must be a string",
                        ));
                    }
                }
            }
            None => check_remote(map, path, false, out),
        },
        "system_package" => {
            if string_field(map, "package")
                .or_else(|| string_field(map, "name"))
                .is_none()
            {
                out.push(Diagnostic::error(
                    format!("{path}.package"),
                    "required for system_package",
                ));
            }
        }
        other => {
            let msg = match suggest_field(other, KNOWN_STEP_TYPES) {
                Some(suggestion) => format!("unknown step type '{other}'; {suggestion}"),
                None => format!("unknown step type '{other}'"),
            };
            out.push(Diagnostic::error(format!("{path}.type"), msg));
        }
    }
}

fn string_field<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn check_remote(map: &Mapping, path: &str, required: bool, out: &mut Vec<Diagnostic>) {
    match map.get("path") {
        None if required => out.push(Diagnostic::error(format!("{path}.path"), "required")),
        None => {}
        Some(v) => match v.as_str() {
            Some(remote) => {
                if let Err(e) = check_remote_path(remote) {
                    out.push(Diagnostic::error(format!("{path}.path"), e));
                }
            }
            None => out.push(Diagnostic::error(format!("{path}.path"), "must be a string")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate::DiagnosticLevel;

    fn errors(doc: &str) -> Vec<String> {
        let value: Value = serde_yaml::from_str(doc).unwrap();
        validate_manifest(&value)
            .into_iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .map(|d| d.to_string())
            .collect()
    }

    #[test]
    fn test_valid_manifest() {
        let doc = "version: 1.1.0\nsteps:\n  - type: service_config\n    path: a.conf\n    target: a.conf\n";
        assert!(errors(doc).is_empty());
    }

    #[test]
    fn test_missing_version_and_steps() {
        let errs = errors("description: nothing\n");
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().any(|e| e.contains("version")));
        assert!(errs.iter().any(|e| e.contains("steps")));
    }

    #[test]
    fn test_service_config_requires_target() {
        let errs = errors("version: 1.1.0\nsteps:\n  - type: service_config\n    path: a.conf\n");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("steps[0].target"));
    }

    #[test]
    fn test_bad_permissions() {
        let errs = errors(
            "version: 1.1.0\nsteps:\n  - type: service_config\n    path: a\n    target: b\n    permissions: \"rwx\"\n",
        );
        assert!(errs[0].contains("permissions"));
    }

    #[test]
    fn test_bad_action() {
        let errs = errors("version: 1.1.0\nsteps:\n  - type: docker_compose\n    action: reboot\n");
        assert!(errs[0].contains("steps[0].action"));
    }

    #[test]
    fn test_unknown_type_suggestion() {
        let errs = errors("version: 1.1.0\nsteps:\n  - type: service_confg\n");
        assert!(errs[0].contains("did you mean 'service_config'?"));
    }

    #[test]
    fn test_escaping_remote_path() {
        let errs = errors(
            "version: 1.1.0\nsteps:\n  - type: service_config\n    path: ../../etc/shadow\n    target: x\n",
        );
        assert!(errs[0].contains(".."));
    }

    #[test]
    fn test_system_package_needs_name() {
        let errs = errors("version: 1.1.0\nsteps:\n  - type: system_package\n");
        assert_eq!(errs.len(), 1);
        assert!(errors("version: 1.1.0\nsteps:\n  - type: system_package\n    name: htop\n").is_empty());
    }

    #[test]
    fn test_invalid_requires() {
        let errs = errors("version: 1.1.0\nrequires: latest\nsteps: []\n");
        assert!(errs[0].contains("requires"));
    }
}
