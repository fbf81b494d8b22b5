//! Managed service lifecycle.
//!
//! The compose document declares the services. A [`ServiceOrchestrator`]
//! stops, re-creates and lists them, either by driving the container
//! runtime directly ([`DirectOrchestrator`]) or by delegating to the
//! compose tool ([`ComposeOrchestrator`]).

pub mod compose;
mod compose_cli;
mod docker;
pub mod runner;

pub use compose::{ComposeDocument, ServiceDefinition};
pub use compose_cli::ComposeOrchestrator;
pub use docker::DirectOrchestrator;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{RestartStrategy, ServicesConfig};
use crate::error::{Result, UpdateError};
use crate::manifest::{Manifest, Step};

/// Label the compose tool puts on every container it creates.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";
/// Label naming the compose service of a container.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Restart strategy over the managed services.
#[async_trait]
pub trait ServiceOrchestrator: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Stop and remove each service's container if present, then re-create
    /// it from the current compose document. Idempotent.
    async fn restart(&self, services: &BTreeSet<String>) -> Result<()>;

    /// Services with at least one running container.
    async fn running_services(&self) -> Result<BTreeSet<String>>;

    /// Stop and remove every container of each service, found by compose
    /// labels. Works for services the compose document no longer declares.
    async fn remove(&self, services: &BTreeSet<String>) -> Result<()>;
}

/// Service names declared by the compose document at `compose_file`,
/// read fresh on every call.
pub fn declared_services(compose_file: &Path) -> Result<BTreeSet<String>> {
    Ok(ComposeDocument::load(compose_file)?.service_names())
}

/// Services an update must restart.
///
/// Without any restart declaration, or with one that names no service, it
/// is every declared service minus `excluded`. Otherwise it is exactly the
/// named services, each of which must be declared.
pub fn compute_restart_set(
    manifest: &Manifest,
    declared: &BTreeSet<String>,
    excluded: &[String],
) -> Result<BTreeSet<String>> {
    let named: Vec<Option<&String>> = manifest
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::ServiceRestart { service, .. } => Some(service.as_ref()),
            _ => None,
        })
        .collect();

    if named.is_empty() || named.iter().any(Option::is_none) {
        let set: BTreeSet<String> = declared
            .iter()
            .filter(|s| !excluded.contains(*s))
            .cloned()
            .collect();
        debug!(services = ?set, "Restarting all non-excluded services");
        return Ok(set);
    }

    let mut set = BTreeSet::new();
    for service in named.into_iter().flatten() {
        if !declared.contains(service) {
            return Err(UpdateError::UnknownService(format!(
                "'{service}' is not declared in the compose document"
            )));
        }
        set.insert(service.clone());
    }
    Ok(set)
}

/// Build the orchestrator selected in configuration.
pub fn build_orchestrator(
    config: &ServicesConfig,
    compose_file: &Path,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ServiceOrchestrator> {
    match config.strategy {
        RestartStrategy::Direct => Arc::new(DirectOrchestrator::new(config, compose_file, runner)),
        RestartStrategy::Compose => {
            Arc::new(ComposeOrchestrator::new(config, compose_file, runner))
        }
    }
}
