//! Post-update verification.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, UpdateError};
use crate::metrics::{MetricEvent, MetricsSink};
use crate::services::{declared_services, ServiceOrchestrator};
use crate::state::VersionStore;
use crate::version::Version;

/// Checks that the appliance runs what the update promised.
pub struct Verifier {
    orchestrator: Arc<dyn ServiceOrchestrator>,
    versions: VersionStore,
    compose_file: PathBuf,
    excluded: Vec<String>,
    metrics: Arc<dyn MetricsSink>,
}

impl Verifier {
    pub fn new(
        orchestrator: Arc<dyn ServiceOrchestrator>,
        versions: VersionStore,
        compose_file: PathBuf,
        excluded: Vec<String>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            orchestrator,
            versions,
            compose_file,
            excluded,
            metrics,
        }
    }

    /// `true` when every non-excluded declared service is running and the
    /// recorded version is `target`. Emits `update_verification`.
    pub async fn verify(&self, target: &Version) -> bool {
        self.report(target).await.is_ok()
    }

    /// Run the checks, emit `update_verification` and return the reason for
    /// a failure.
    pub async fn report(&self, target: &Version) -> Result<()> {
        let result = self.check(target).await;
        self.metrics.emit(&MetricEvent::UpdateVerification {
            success: result.is_ok(),
            version: target.to_string(),
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        match &result {
            Ok(()) => info!(version = %target, "Verification passed"),
            Err(e) => warn!(version = %target, "Verification failed: {}", e),
        }
        result
    }

    /// Same checks as [`Verifier::verify`], reporting why they failed.
    pub async fn check(&self, target: &Version) -> Result<()> {
        let declared = declared_services(&self.compose_file).map_err(|e| {
            UpdateError::VerificationFailed(format!("compose document unreadable: {e}"))
        })?;
        let expected: Vec<&String> = declared
            .iter()
            .filter(|s| !self.excluded.contains(*s))
            .collect();
        if expected.is_empty() {
            return Err(UpdateError::VerificationFailed(
                "compose document declares no managed services".into(),
            ));
        }

        let running = self
            .orchestrator
            .running_services()
            .await
            .map_err(|e| UpdateError::VerificationFailed(e.to_string()))?;
        let missing: Vec<&str> = expected
            .iter()
            .filter(|s| !running.contains(s.as_str()))
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(UpdateError::VerificationFailed(format!(
                "services not running: {}",
                missing.join(", ")
            )));
        }

        let recorded = self
            .versions
            .current()
            .map_err(|e| UpdateError::VerificationFailed(format!("version record: {e}")))?;
        if &recorded != target {
            return Err(UpdateError::VerificationFailed(format!(
                "recorded version {recorded} does not match {target}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct StaticOrchestrator(BTreeSet<String>);

    #[async_trait]
    impl ServiceOrchestrator for StaticOrchestrator {
        fn name(&self) -> &'static str {
            "static"
        }
        async fn restart(&self, _services: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }
        async fn running_services(&self) -> Result<BTreeSet<String>> {
            Ok(self.0.clone())
        }
        async fn remove(&self, _services: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        metrics: Arc<MemorySink>,
    }

    impl Fixture {
        fn new(compose: &str, version: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("docker-compose.yaml"), compose).unwrap();
            std::fs::write(dir.path().join("version.yml"), format!("version: {version}\n"))
                .unwrap();
            Self {
                dir,
                metrics: Arc::new(MemorySink::new()),
            }
        }

        fn verifier(&self, running: &[&str]) -> Verifier {
            Verifier::new(
                Arc::new(StaticOrchestrator(
                    running.iter().map(|s| s.to_string()).collect(),
                )),
                VersionStore::new(self.dir.path().join("version.yml")),
                self.dir.path().join("docker-compose.yaml"),
                vec!["update_service".into(), "watchtower".into()],
                self.metrics.clone(),
            )
        }
    }

    const COMPOSE: &str =
        "services:\n  influxdb: {image: a}\n  grafana: {image: b}\n  update_service: {image: c}\n";

    #[tokio::test]
    async fn test_all_running_and_version_matches() {
        let f = Fixture::new(COMPOSE, "1.1.0");
        let v = f.verifier(&["influxdb", "grafana"]);
        assert!(v.verify(&Version::new(1, 1, 0)).await);
        assert_eq!(f.metrics.by_measurement("update_verification").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_service_fails_even_with_target_version() {
        let f = Fixture::new(COMPOSE, "1.1.0");
        let v = f.verifier(&["influxdb", "update_service"]);
        assert!(!v.verify(&Version::new(1, 1, 0)).await);
        let err = v.check(&Version::new(1, 1, 0)).await.unwrap_err();
        assert!(err.to_string().contains("grafana"));
    }

    #[tokio::test]
    async fn test_version_mismatch_fails() {
        let f = Fixture::new(COMPOSE, "1.0.0");
        let v = f.verifier(&["influxdb", "grafana"]);
        assert!(!v.verify(&Version::new(1, 1, 0)).await);
    }

    #[tokio::test]
    async fn test_empty_declared_set_fails() {
        let f = Fixture::new("services:\n  watchtower: {image: w}\n", "1.1.0");
        let v = f.verifier(&["watchtower"]);
        assert!(!v.verify(&Version::new(1, 1, 0)).await);
    }

    #[tokio::test]
    async fn test_unreadable_compose_fails() {
        let f = Fixture::new(COMPOSE, "1.1.0");
        std::fs::remove_file(f.dir.path().join("docker-compose.yaml")).unwrap();
        let v = f.verifier(&["influxdb", "grafana"]);
        assert!(!v.verify(&Version::new(1, 1, 0)).await);
        let events = f.metrics.events();
        assert!(matches!(
            &events[0],
            MetricEvent::UpdateVerification { success: false, .. }
        ));
    }
}
