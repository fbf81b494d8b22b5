//! Application of individual manifest steps.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PathsConfig;
use crate::error::{Result, UpdateError};
use crate::manifest::{ManifestClient, Step};
use crate::services::ComposeDocument;
use crate::utils::fs::write_atomic;

/// Legacy absolute prefix some manifests use for configuration targets.
const LEGACY_CONFIG_PREFIX: &str = "/data/config/";

/// Outcome of one step.
#[derive(Debug)]
pub struct StepResult {
    pub succeeded: bool,
    pub duration: Duration,
    pub error: Option<UpdateError>,
}

impl StepResult {
    fn from_result(result: Result<()>, started: Instant) -> Self {
        let duration = started.elapsed();
        match result {
            Ok(()) => Self {
                succeeded: true,
                duration,
                error: None,
            },
            Err(e) => Self {
                succeeded: false,
                duration,
                error: Some(e),
            },
        }
    }
}

/// Applies steps against the local filesystem.
#[derive(Clone)]
pub struct StepExecutor {
    client: ManifestClient,
    config_dir: PathBuf,
    compose_file: PathBuf,
}

impl StepExecutor {
    pub fn new(client: ManifestClient, paths: &PathsConfig) -> Self {
        Self {
            client,
            config_dir: paths.config_dir.clone(),
            compose_file: paths.compose_file.clone(),
        }
    }

    /// Apply `step`, numbered `number` (1-based) in its manifest.
    pub async fn apply(&self, number: usize, step: &Step) -> StepResult {
        let started = Instant::now();
        let result = self.try_apply(number, step).await;
        if let Err(e) = &result {
            warn!(step = number, kind = step.type_name(), "Step failed: {}", e);
        }
        StepResult::from_result(result, started)
    }

    async fn try_apply(&self, number: usize, step: &Step) -> Result<()> {
        let failed = |message: String| UpdateError::StepFailed {
            step: number,
            message,
        };

        match step {
            Step::ServiceConfig {
                remote_path,
                target_path,
                permissions,
            } => {
                let target = self.resolve_target(target_path).map_err(failed)?;
                let bytes = self
                    .client
                    .fetch_file(remote_path)
                    .await
                    .map_err(|e| failed(format!("download {remote_path}: {e}")))?;
                write_atomic(&target, &bytes, *permissions)
                    .map_err(|e| failed(format!("write {}: {e}", target.display())))?;
                info!(
                    step = number,
                    target = %target.display(),
                    mode = ?permissions.map(|m| format!("{m:o}")),
                    "Configuration written"
                );
            }
            Step::ComposeUpdate { remote_path } => {
                let bytes = self
                    .client
                    .fetch_file(remote_path)
                    .await
                    .map_err(|e| failed(format!("download {remote_path}: {e}")))?;
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| failed(format!("compose document is not UTF-8: {e}")))?;
                let base = self.compose_file.parent().unwrap_or(Path::new("."));
                ComposeDocument::parse(text, base)
                    .map_err(|e| failed(format!("downloaded compose document is invalid: {e}")))?;
                write_atomic(&self.compose_file, &bytes, None).map_err(|e| {
                    failed(format!("write {}: {e}", self.compose_file.display()))
                })?;
                info!(step = number, "Compose document replaced");
            }
            Step::ServiceRestart { service, action } => {
                debug!(
                    step = number,
                    service = service.as_deref().unwrap_or("*"),
                    action = action.as_str(),
                    "Restart declared"
                );
            }
            Step::SystemPackage { name } => {
                info!(step = number, package = %name, "System packages are not managed here; skipped");
            }
            Step::Unsupported { kind } => {
                return Err(UpdateError::UnknownStepType(kind.clone()));
            }
        }
        Ok(())
    }

    /// Where a `service_config` target lands on disk.
    ///
    /// Relative targets and the legacy `/data/config/` prefix resolve under
    /// the configuration directory. Nothing may resolve outside it.
    pub fn resolve_target(&self, target: &str) -> std::result::Result<PathBuf, String> {
        let rel = match target.strip_prefix(LEGACY_CONFIG_PREFIX) {
            Some(rest) => PathBuf::from(rest),
            None => {
                let path = Path::new(target);
                if path.is_absolute() {
                    path.strip_prefix(&self.config_dir)
                        .map(Path::to_path_buf)
                        .map_err(|_| {
                            format!(
                                "target {target} is outside {}",
                                self.config_dir.display()
                            )
                        })?
                } else {
                    path.to_path_buf()
                }
            }
        };

        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => return Err(format!("target {target} escapes the configuration directory")),
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(format!("target {target} names no file"));
        }
        Ok(self.config_dir.join(clean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::manifest::client::MockFetcher;
    use crate::manifest::RestartAction;
    use std::sync::Arc;

    fn executor(mock: MockFetcher) -> (StepExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().join("state"),
            config_dir: dir.path().join("config"),
            backup_dir: dir.path().join("backups"),
            compose_file: dir.path().join("compose/docker-compose.yaml"),
        };
        let client = ManifestClient::new(Arc::new(mock), &RepositoryConfig::default());
        (StepExecutor::new(client, &paths), dir)
    }

    #[test]
    fn test_resolve_target() {
        let (exec, dir) = executor(MockFetcher::new());
        let config = dir.path().join("config");
        assert_eq!(exec.resolve_target("app.conf").unwrap(), config.join("app.conf"));
        assert_eq!(
            exec.resolve_target("/data/config/influx/influx.conf").unwrap(),
            config.join("influx/influx.conf")
        );
        assert_eq!(
            exec.resolve_target(&config.join("x.conf").display().to_string())
                .unwrap(),
            config.join("x.conf")
        );
        assert!(exec.resolve_target("/etc/passwd").is_err());
        assert!(exec.resolve_target("../outside.conf").is_err());
        assert!(exec.resolve_target("").is_err());
    }

    #[tokio::test]
    async fn test_service_config_writes_with_mode() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .withf(|url| url.ends_with("/config/app.conf"))
            .returning(|_| Ok(b"interval=5\n".to_vec()));
        let (exec, dir) = executor(mock);
        let step = Step::ServiceConfig {
            remote_path: "config/app.conf".into(),
            target_path: "nested/app.conf".into(),
            permissions: Some(0o640),
        };
        let result = exec.apply(1, &step).await;
        assert!(result.succeeded, "{:?}", result.error);

        let written = dir.path().join("config/nested/app.conf");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "interval=5\n");
        #[cfg(unix)]
        assert_eq!(
            crate::utils::fs::file_mode(&written).unwrap(),
            Some(0o640)
        );
    }

    #[tokio::test]
    async fn test_failed_download_is_step_failed() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Err(UpdateError::ManifestUnavailable("404".into())));
        let (exec, dir) = executor(mock);
        let step = Step::ServiceConfig {
            remote_path: "config/app.conf".into(),
            target_path: "app.conf".into(),
            permissions: None,
        };
        let result = exec.apply(3, &step).await;
        assert!(!result.succeeded);
        assert!(matches!(
            result.error,
            Some(UpdateError::StepFailed { step: 3, .. })
        ));
        assert!(!dir.path().join("config/app.conf").exists());
    }

    #[tokio::test]
    async fn test_compose_update_keeps_old_document_on_bad_download() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Ok(b"services: [unterminated".to_vec()));
        let (exec, dir) = executor(mock);
        let compose = dir.path().join("compose/docker-compose.yaml");
        std::fs::create_dir_all(compose.parent().unwrap()).unwrap();
        std::fs::write(&compose, "services: {}\n").unwrap();

        let step = Step::ComposeUpdate {
            remote_path: "docker/compose/docker-compose.yaml".into(),
        };
        assert!(!exec.apply(1, &step).await.succeeded);
        assert_eq!(std::fs::read_to_string(&compose).unwrap(), "services: {}\n");
    }

    #[tokio::test]
    async fn test_compose_update_replaces_document() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Ok(b"services:\n  grafana: {image: grafana}\n".to_vec()));
        let (exec, dir) = executor(mock);
        let step = Step::ComposeUpdate {
            remote_path: "docker/compose/docker-compose.yaml".into(),
        };
        assert!(exec.apply(1, &step).await.succeeded);
        let content =
            std::fs::read_to_string(dir.path().join("compose/docker-compose.yaml")).unwrap();
        assert!(content.contains("grafana"));
    }

    #[tokio::test]
    async fn test_declarations_and_packages_succeed_without_io() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch().never();
        let (exec, _d) = executor(mock);
        let restart = Step::ServiceRestart {
            service: None,
            action: RestartAction::Recreate,
        };
        assert!(exec.apply(1, &restart).await.succeeded);
        let pkg = Step::SystemPackage { name: "htop".into() };
        assert!(exec.apply(2, &pkg).await.succeeded);
    }

    #[tokio::test]
    async fn test_unsupported_step() {
        let (exec, _d) = executor(MockFetcher::new());
        let step = Step::Unsupported {
            kind: "firmware_flash".into(),
        };
        let result = exec.apply(1, &step).await;
        assert!(matches!(result.error, Some(UpdateError::UnknownStepType(_))));
    }
}
