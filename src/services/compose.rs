//! Minimal reading of the compose document.
//!
//! Only the service names and the per-service fields needed to re-create a
//! container by hand are read. Everything else in the document is ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::{Result, UpdateError};

/// Image build instructions of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: Option<String>,
}

/// The parts of one service definition used to run its container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub image: Option<String>,
    pub build: Option<BuildSpec>,
    pub container_name: Option<String>,
    pub ports: Vec<String>,
    /// `KEY=VALUE` (or bare `KEY`) entries.
    pub environment: Vec<String>,
    /// Short-syntax volume specs with host paths resolved.
    pub volumes: Vec<String>,
    pub restart: Option<String>,
    pub command: Vec<String>,
    pub network_mode: Option<String>,
    pub privileged: bool,
}

/// A parsed compose document.
#[derive(Debug, Clone)]
pub struct ComposeDocument {
    services: BTreeMap<String, ServiceDefinition>,
}

impl ComposeDocument {
    /// Read the document at `path`. Relative host paths resolve against its
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Io(std::io::Error::new(
                e.kind(),
                format!("compose document {}: {e}", path.display()),
            ))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&text, &base_dir)
    }

    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)?;
        let mut services = BTreeMap::new();
        if let Some(map) = root.get("services").and_then(Value::as_mapping) {
            for (name, def) in map {
                let Some(name) = name.as_str() else {
                    continue;
                };
                services.insert(name.to_string(), parse_service(name, def, base_dir));
            }
        }
        Ok(Self { services })
    }

    /// Declared service names.
    pub fn service_names(&self) -> BTreeSet<String> {
        self.services.keys().cloned().collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }
}

fn parse_service(name: &str, def: &Value, base_dir: &Path) -> ServiceDefinition {
    let str_field = |key: &str| def.get(key).and_then(Value::as_str).map(str::to_string);

    let build = match def.get("build") {
        Some(Value::String(ctx)) => Some(BuildSpec {
            context: resolve_host_path(ctx, base_dir),
            dockerfile: None,
        }),
        Some(Value::Mapping(m)) => Some(BuildSpec {
            context: resolve_host_path(
                m.get("context").and_then(Value::as_str).unwrap_or("."),
                base_dir,
            ),
            dockerfile: m.get("dockerfile").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    };

    let environment = match def.get("environment") {
        Some(Value::Mapping(m)) => m
            .iter()
            .filter_map(|(k, v)| {
                let k = k.as_str()?;
                Some(match scalar(v) {
                    Some(v) => format!("{k}={v}"),
                    None => k.to_string(),
                })
            })
            .collect(),
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar).collect(),
        _ => Vec::new(),
    };

    let volumes = def
        .get("volumes")
        .and_then(Value::as_sequence)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| parse_volume(v, base_dir))
                .collect()
        })
        .unwrap_or_default();

    let command = match def.get("command") {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar).collect(),
        _ => Vec::new(),
    };

    ServiceDefinition {
        name: name.to_string(),
        image: str_field("image"),
        build,
        container_name: str_field("container_name"),
        ports: def
            .get("ports")
            .and_then(Value::as_sequence)
            .map(|items| items.iter().filter_map(scalar).collect())
            .unwrap_or_default(),
        environment,
        volumes,
        restart: str_field("restart"),
        command,
        network_mode: str_field("network_mode"),
        privileged: def.get("privileged").and_then(Value::as_bool).unwrap_or(false),
    }
}

fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn resolve_host_path(path: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn parse_volume(v: &Value, base_dir: &Path) -> Option<String> {
    match v {
        Value::String(spec) => {
            let mut parts = spec.splitn(2, ':');
            let source = parts.next()?;
            match parts.next() {
                // Relative bind mounts; named volumes pass through.
                Some(rest) if source.starts_with('.') => Some(format!(
                    "{}:{rest}",
                    resolve_host_path(source, base_dir).display()
                )),
                _ => Some(spec.clone()),
            }
        }
        Value::Mapping(m) => {
            let source = m.get("source").and_then(Value::as_str)?;
            let target = m.get("target").and_then(Value::as_str)?;
            let source = if source.starts_with('.') {
                resolve_host_path(source, base_dir).display().to_string()
            } else {
                source.to_string()
            };
            let ro = m.get("read_only").and_then(Value::as_bool).unwrap_or(false);
            Some(if ro {
                format!("{source}:{target}:ro")
            } else {
                format!("{source}:{target}")
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
version: "3.8"
services:
  influxdb:
    image: influxdb:1.8
    restart: unless-stopped
    ports:
      - "8086:8086"
    environment:
      INFLUXDB_DB: boat
      INFLUXDB_HTTP_AUTH_ENABLED: false
    volumes:
      - ./data/influx:/var/lib/influxdb
      - influx-meta:/meta
  system_metrics:
    build:
      context: ../../services/system_metrics
      dockerfile: Dockerfile.arm
    environment:
      - INFLUX_HOST=influxdb
    command: python -u collector.py
    privileged: true
    network_mode: host
  update_service:
    build: ../../services/update_service
volumes:
  influx-meta: {}
"#;

    #[test]
    fn test_service_names() {
        let doc = ComposeDocument::parse(DOC, Path::new("/app/repo/docker/compose")).unwrap();
        let names: Vec<String> = doc.service_names().into_iter().collect();
        assert_eq!(names, vec!["influxdb", "system_metrics", "update_service"]);
    }

    #[test]
    fn test_service_fields() {
        let doc = ComposeDocument::parse(DOC, Path::new("/app/repo/docker/compose")).unwrap();
        let influx = doc.service("influxdb").unwrap();
        assert_eq!(influx.image.as_deref(), Some("influxdb:1.8"));
        assert_eq!(influx.ports, vec!["8086:8086"]);
        assert!(influx
            .environment
            .contains(&"INFLUXDB_HTTP_AUTH_ENABLED=false".to_string()));
        assert_eq!(
            influx.volumes,
            vec![
                "/app/repo/docker/compose/./data/influx:/var/lib/influxdb".to_string(),
                "influx-meta:/meta".to_string()
            ]
        );

        let metrics = doc.service("system_metrics").unwrap();
        let build = metrics.build.as_ref().unwrap();
        assert_eq!(
            build.context,
            PathBuf::from("/app/repo/docker/compose/../../services/system_metrics")
        );
        assert_eq!(build.dockerfile.as_deref(), Some("Dockerfile.arm"));
        assert_eq!(metrics.command, vec!["python", "-u", "collector.py"]);
        assert!(metrics.privileged);
        assert_eq!(metrics.network_mode.as_deref(), Some("host"));
    }

    #[test]
    fn test_document_without_services() {
        let doc = ComposeDocument::parse("version: '3'\n", Path::new(".")).unwrap();
        assert!(doc.service_names().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ComposeDocument::load(&dir.path().join("nope.yaml")).is_err());
    }
}
