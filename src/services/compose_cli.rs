//! Compose-tool strategy: `docker-compose -f <file> -p <project> ...`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::docker::{remove_services, running_services};
use super::runner::CommandRunner;
use super::ServiceOrchestrator;
use crate::config::ServicesConfig;
use crate::error::{Result, UpdateError};

/// Restarts services by delegating to the compose tool.
pub struct ComposeOrchestrator {
    runner: Arc<dyn CommandRunner>,
    compose: String,
    docker: String,
    project: String,
    compose_file: PathBuf,
}

impl ComposeOrchestrator {
    pub fn new(config: &ServicesConfig, compose_file: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            compose: config.compose_binary.clone(),
            docker: config.docker_binary.clone(),
            project: config.project_name.clone(),
            compose_file: compose_file.to_path_buf(),
        }
    }

    async fn compose(&self, verb: &[&str], services: &BTreeSet<String>) -> Result<()> {
        let mut parts = vec![
            "-f".to_string(),
            self.compose_file.display().to_string(),
            "-p".to_string(),
            self.project.clone(),
        ];
        parts.extend(verb.iter().map(|s| s.to_string()));
        parts.extend(services.iter().cloned());

        let out = self.runner.run(&self.compose, &parts).await?;
        if !out.success() {
            return Err(UpdateError::RestartFailed(format!(
                "{} {}: {}",
                self.compose,
                verb.join(" "),
                out.diagnostic()
            )));
        }
        debug!(verb = %verb.join(" "), output = %out.stdout.trim(), "Compose command finished");
        Ok(())
    }
}

#[async_trait]
impl ServiceOrchestrator for ComposeOrchestrator {
    fn name(&self) -> &'static str {
        "compose"
    }

    async fn restart(&self, services: &BTreeSet<String>) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }
        self.compose(&["stop"], services).await?;
        self.compose(&["rm", "-f"], services).await?;
        self.compose(&["up", "-d"], services).await?;
        info!(services = ?services, "Services restarted");
        Ok(())
    }

    async fn running_services(&self) -> Result<BTreeSet<String>> {
        running_services(self.runner.as_ref(), &self.docker, &self.project).await
    }

    /// Goes through the runtime: the compose tool refuses services its
    /// document does not declare.
    async fn remove(&self, services: &BTreeSet<String>) -> Result<()> {
        remove_services(self.runner.as_ref(), &self.docker, &self.project, services).await
    }
}
