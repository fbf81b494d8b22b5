//! Direct container-runtime strategy.
//!
//! Re-creates each service container with plain `docker` CLI calls, using
//! the service definition from the compose document. Containers are
//! labelled the way the compose tool labels them so either strategy can
//! find them later.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::compose::{ComposeDocument, ServiceDefinition};
use super::runner::{args, CommandOutput, CommandRunner};
use super::{ServiceOrchestrator, PROJECT_LABEL, SERVICE_LABEL};
use crate::config::ServicesConfig;
use crate::error::{Result, UpdateError};

/// Restarts services through the container runtime CLI.
pub struct DirectOrchestrator {
    runner: Arc<dyn CommandRunner>,
    docker: String,
    project: String,
    network: String,
    compose_file: PathBuf,
}

impl DirectOrchestrator {
    pub fn new(config: &ServicesConfig, compose_file: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            docker: config.docker_binary.clone(),
            project: config.project_name.clone(),
            network: config.network_name(),
            compose_file: compose_file.to_path_buf(),
        }
    }

    /// Container name for a service: its `container_name`, or the compose
    /// v1 convention `<project>_<service>_1`.
    pub fn container_name(&self, def: &ServiceDefinition) -> String {
        def.container_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_1", self.project, def.name))
    }

    async fn docker(&self, parts: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&self.docker, &parts).await
    }

    async fn docker_checked(&self, parts: Vec<String>, what: &str) -> Result<CommandOutput> {
        let out = self.docker(parts).await?;
        if !out.success() {
            return Err(UpdateError::RestartFailed(format!(
                "{what}: {}",
                out.diagnostic()
            )));
        }
        Ok(out)
    }

    async fn ensure_network(&self) -> Result<()> {
        let inspect = self
            .docker(args(&["network", "inspect", &self.network]))
            .await?;
        if inspect.success() {
            return Ok(());
        }
        info!(network = %self.network, "Creating network");
        self.docker_checked(
            args(&["network", "create", &self.network]),
            &format!("create network {}", self.network),
        )
        .await?;
        Ok(())
    }

    /// Stop and remove `name` if it exists. Absence is fine.
    async fn remove_container(&self, name: &str) -> Result<()> {
        let inspect = self
            .docker(args(&["inspect", "--format", "{{.State.Running}}", name]))
            .await?;
        if !inspect.success() {
            debug!(container = %name, "Container not found");
            return Ok(());
        }
        if inspect.stdout.trim() == "true" {
            self.docker_checked(args(&["stop", name]), &format!("stop {name}"))
                .await?;
        }
        self.docker_checked(args(&["rm", name]), &format!("remove {name}"))
            .await?;
        Ok(())
    }

    /// Make the service image available; returns the image reference.
    async fn prepare_image(&self, def: &ServiceDefinition) -> Result<String> {
        if let Some(build) = &def.build {
            let tag = def
                .image
                .clone()
                .unwrap_or_else(|| format!("{}_{}", self.project, def.name));
            let mut parts = args(&["build", "-t", &tag]);
            if let Some(dockerfile) = &build.dockerfile {
                parts.push("-f".into());
                parts.push(build.context.join(dockerfile).display().to_string());
            }
            parts.push(build.context.display().to_string());
            self.docker_checked(parts, &format!("build {}", def.name))
                .await?;
            return Ok(tag);
        }

        let image = def.image.clone().ok_or_else(|| {
            UpdateError::RestartFailed(format!("service {} has neither image nor build", def.name))
        })?;
        let pull = self.docker(args(&["pull", &image])).await?;
        if !pull.success() {
            // Offline appliances keep running the image they already have.
            let local = self.docker(args(&["image", "inspect", &image])).await?;
            if !local.success() {
                return Err(UpdateError::RestartFailed(format!(
                    "pull {image}: {}",
                    pull.diagnostic()
                )));
            }
            warn!(image = %image, "Pull failed, using local image: {}", pull.diagnostic());
        }
        Ok(image)
    }

    fn run_args(&self, def: &ServiceDefinition, name: &str, image: &str) -> Vec<String> {
        let mut parts = args(&[
            "run",
            "-d",
            "--name",
            name,
            "--label",
            &format!("{PROJECT_LABEL}={}", self.project),
            "--label",
            &format!("{SERVICE_LABEL}={}", def.name),
        ]);
        match &def.network_mode {
            Some(mode) => {
                parts.push("--network".into());
                parts.push(mode.clone());
            }
            None => {
                parts.push("--network".into());
                parts.push(self.network.clone());
                parts.push("--network-alias".into());
                parts.push(def.name.clone());
            }
        }
        if let Some(restart) = &def.restart {
            parts.push("--restart".into());
            parts.push(restart.clone());
        }
        if def.privileged {
            parts.push("--privileged".into());
        }
        for port in &def.ports {
            parts.push("-p".into());
            parts.push(port.clone());
        }
        for env in &def.environment {
            parts.push("-e".into());
            parts.push(env.clone());
        }
        for volume in &def.volumes {
            parts.push("-v".into());
            parts.push(volume.clone());
        }
        parts.push(image.to_string());
        parts.extend(def.command.iter().cloned());
        parts
    }
}

#[async_trait]
impl ServiceOrchestrator for DirectOrchestrator {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn restart(&self, services: &BTreeSet<String>) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }
        let doc = ComposeDocument::load(&self.compose_file)
            .map_err(|e| UpdateError::RestartFailed(e.to_string()))?;
        let defs = services
            .iter()
            .map(|s| {
                doc.service(s)
                    .ok_or_else(|| UpdateError::UnknownService(s.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.ensure_network().await?;

        // Everything comes down first so ports are free.
        for def in &defs {
            self.remove_container(&self.container_name(def)).await?;
        }

        for def in &defs {
            let name = self.container_name(def);
            let image = self.prepare_image(def).await?;
            self.docker_checked(self.run_args(def, &name, &image), &format!("start {name}"))
                .await?;
            info!(service = %def.name, container = %name, "Service started");
        }
        Ok(())
    }

    async fn running_services(&self) -> Result<BTreeSet<String>> {
        running_services(self.runner.as_ref(), &self.docker, &self.project).await
    }

    async fn remove(&self, services: &BTreeSet<String>) -> Result<()> {
        remove_services(self.runner.as_ref(), &self.docker, &self.project, services).await
    }
}

/// Force-remove all containers, running or not, labelled with `project` and
/// one of `services`.
pub(crate) async fn remove_services(
    runner: &dyn CommandRunner,
    docker: &str,
    project: &str,
    services: &BTreeSet<String>,
) -> Result<()> {
    for service in services {
        let listed = runner
            .run(
                docker,
                &args(&[
                    "ps",
                    "-a",
                    "--filter",
                    &format!("label={PROJECT_LABEL}={project}"),
                    "--filter",
                    &format!("label={SERVICE_LABEL}={service}"),
                    "--format",
                    "{{.Names}}",
                ]),
            )
            .await?;
        if !listed.success() {
            return Err(UpdateError::RestartFailed(format!(
                "list containers of {service}: {}",
                listed.diagnostic()
            )));
        }
        for name in listed.stdout.lines().map(str::trim).filter(|n| !n.is_empty()) {
            let out = runner.run(docker, &args(&["rm", "-f", name])).await?;
            if !out.success() {
                return Err(UpdateError::RestartFailed(format!(
                    "remove {name}: {}",
                    out.diagnostic()
                )));
            }
            info!(service = %service, container = %name, "Container removed");
        }
    }
    Ok(())
}

/// Services of `project` with a running container, by compose label or by
/// container name.
pub(crate) async fn running_services(
    runner: &dyn CommandRunner,
    docker: &str,
    project: &str,
) -> Result<BTreeSet<String>> {
    let format = format!(
        "{{{{.Label \"{PROJECT_LABEL}\"}}}}\t{{{{.Label \"{SERVICE_LABEL}\"}}}}\t{{{{.Names}}}}"
    );
    let out = runner
        .run(docker, &args(&["ps", "--format", &format]))
        .await
        .map_err(|e| UpdateError::VerificationFailed(e.to_string()))?;
    if !out.success() {
        return Err(UpdateError::VerificationFailed(format!(
            "list containers: {}",
            out.diagnostic()
        )));
    }

    let mut running = BTreeSet::new();
    for line in out.stdout.lines() {
        let mut cols = line.split('\t');
        let label_project = cols.next().unwrap_or("").trim();
        let label_service = cols.next().unwrap_or("").trim();
        let name = cols.next().unwrap_or("").trim();

        if label_project == project && !label_service.is_empty() {
            running.insert(label_service.to_string());
        } else if let Some(service) = service_from_container_name(name, project) {
            running.insert(service);
        }
    }
    Ok(running)
}

/// Parse `<project>[_-]<service>[_-]<n>`.
pub(crate) fn service_from_container_name(name: &str, project: &str) -> Option<String> {
    let rest = name.strip_prefix(project)?;
    let rest = rest.strip_prefix(['_', '-'])?;
    let (service, index) = rest.rsplit_once(['_', '-'])?;
    if service.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(service.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runner::MockCommandRunner;
    use mockall::Sequence;

    const COMPOSE: &str = "services:\n  influxdb:\n    image: influxdb:1.8\n    restart: always\n    ports: ['8086:8086']\n";

    fn orchestrator(runner: MockCommandRunner) -> (DirectOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("docker-compose.yaml");
        std::fs::write(&compose, COMPOSE).unwrap();
        let orch = DirectOrchestrator::new(&ServicesConfig::default(), &compose, Arc::new(runner));
        (orch, dir)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_container_name_parsing() {
        assert_eq!(
            service_from_container_name("compose_influxdb_1", "compose"),
            Some("influxdb".into())
        );
        assert_eq!(
            service_from_container_name("compose-system_metrics-2", "compose"),
            Some("system_metrics".into())
        );
        assert_eq!(service_from_container_name("other_influxdb_1", "compose"), None);
        assert_eq!(service_from_container_name("compose_influxdb", "compose"), None);
    }

    #[tokio::test]
    async fn test_restart_sequence() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        let expect = |runner: &mut MockCommandRunner,
                      seq: &mut Sequence,
                      first: &'static str,
                      out: CommandOutput| {
            runner
                .expect_run()
                .withf(move |prog, a| prog == "docker" && a.first().map(String::as_str) == Some(first))
                .times(1)
                .in_sequence(seq)
                .return_once(move |_, _| Ok(out));
        };
        expect(&mut runner, &mut seq, "network", CommandOutput::ok("[]"));
        expect(&mut runner, &mut seq, "inspect", CommandOutput::ok("true\n"));
        expect(&mut runner, &mut seq, "stop", CommandOutput::ok(""));
        expect(&mut runner, &mut seq, "rm", CommandOutput::ok(""));
        expect(&mut runner, &mut seq, "pull", CommandOutput::ok(""));
        runner
            .expect_run()
            .withf(|_, a| {
                a.first().map(String::as_str) == Some("run")
                    && a.contains(&"compose_influxdb_1".to_string())
                    && a.contains(&"com.docker.compose.service=influxdb".to_string())
                    && a.contains(&"8086:8086".to_string())
                    && a.last().map(String::as_str) == Some("influxdb:1.8")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::ok("abc123")));

        let (orch, _d) = orchestrator(runner);
        orch.restart(&set(&["influxdb"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_container_and_offline_pull() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, a| {
            Ok(match a[0].as_str() {
                "inspect" => CommandOutput::failed(1, "No such object"),
                "pull" => CommandOutput::failed(1, "network unreachable"),
                _ => CommandOutput::ok(""),
            })
        });
        let (orch, _d) = orchestrator(runner);
        orch.restart(&set(&["influxdb"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_failure_is_restart_failed() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, a| {
            Ok(match a[0].as_str() {
                "inspect" => CommandOutput::failed(1, "No such object"),
                "run" => CommandOutput::failed(125, "port is already allocated"),
                _ => CommandOutput::ok(""),
            })
        });
        let (orch, _d) = orchestrator(runner);
        let err = orch.restart(&set(&["influxdb"])).await.unwrap_err();
        assert!(matches!(err, UpdateError::RestartFailed(_)));
        assert!(err.to_string().contains("port is already allocated"));
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let runner = MockCommandRunner::new();
        let (orch, _d) = orchestrator(runner);
        let err = orch.restart(&set(&["signalk"])).await.unwrap_err();
        assert!(matches!(err, UpdateError::UnknownService(_)));
    }

    #[tokio::test]
    async fn test_running_services_by_label_and_name() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Ok(CommandOutput::ok(
                "compose\tinfluxdb\tcompose_influxdb_1\n\t\tcompose_grafana_1\nother\tx\tother_x_1\n",
            ))
        });
        let (orch, _d) = orchestrator(runner);
        let running = orch.running_services().await.unwrap();
        assert_eq!(running, set(&["grafana", "influxdb"]));
    }

    #[tokio::test]
    async fn test_remove_by_labels() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .withf(|_, a| {
                a.first().map(String::as_str) == Some("ps")
                    && a.contains(&"-a".to_string())
                    && a.contains(&"label=com.docker.compose.service=signalk".to_string())
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::ok("compose_signalk_1\n")));
        runner
            .expect_run()
            .withf(|_, a| a.join(" ") == "rm -f compose_signalk_1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        // signalk is not in the compose document; removal does not need it.
        let (orch, _d) = orchestrator(runner);
        orch.remove(&set(&["signalk"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_without_containers_is_noop() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, a| a.first().map(String::as_str) == Some("ps"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));
        let (orch, _d) = orchestrator(runner);
        orch.remove(&set(&["signalk"])).await.unwrap();
    }
}
