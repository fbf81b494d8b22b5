//! Remote release repository access.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::{check_remote_path, Manifest};
use crate::config::RepositoryConfig;
use crate::error::{Result, UpdateError};
use crate::version::Version;

/// Fetch primitive for repository files.
///
/// `HttpFetcher` does real requests; tests supply scripted fetchers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body at `url`.
    ///
    /// A missing file is [`UpdateError::ManifestUnavailable`]; connection
    /// problems and server errors are [`UpdateError::TransientFetch`].
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest`-backed fetcher with a per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hubupdate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdateError::TransientFetch(format!("GET {url}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(UpdateError::ManifestUnavailable(format!("{url} not found")));
        }
        if !status.is_success() {
            return Err(UpdateError::TransientFetch(format!("GET {url}: HTTP {status}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| UpdateError::TransientFetch(format!("GET {url}: {e}")))?;
        debug!(url = %url, bytes = body.len(), "Fetched");
        Ok(body.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct LatestVersion {
    version: Option<String>,
}

/// Resolves repository URLs and turns fetched bytes into versions and
/// manifests.
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use hubupdate::config::RepositoryConfig;
/// use hubupdate::{Fetcher, ManifestClient, Result, Version};
///
/// struct Pinned;
///
/// #[async_trait]
/// impl Fetcher for Pinned {
///     async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
///         Ok(b"version: 1.2.0\n".to_vec())
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let client = ManifestClient::new(Arc::new(Pinned), &RepositoryConfig::default());
/// assert_eq!(client.latest_version().await, Some(Version::new(1, 2, 0)));
/// # })
/// ```
#[derive(Clone)]
pub struct ManifestClient {
    fetcher: Arc<dyn Fetcher>,
    root_url: String,
}

impl ManifestClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, repository: &RepositoryConfig) -> Self {
        Self {
            fetcher,
            root_url: repository.root_url(),
        }
    }

    pub fn version_url(&self) -> String {
        format!("{}/version.yml", self.root_url)
    }

    pub fn manifest_url(&self, version: &Version) -> String {
        format!("{}/updates/{}/manifest.yml", self.root_url, version)
    }

    pub fn file_url(&self, remote_path: &str) -> Result<String> {
        check_remote_path(remote_path).map_err(UpdateError::Validation)?;
        Ok(format!("{}/{}", self.root_url, remote_path))
    }

    /// Latest published version, or `None` when it cannot be determined.
    pub async fn latest_version(&self) -> Option<Version> {
        match self.try_latest_version().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Could not determine latest version: {}", e);
                None
            }
        }
    }

    async fn try_latest_version(&self) -> Result<Version> {
        let bytes = self.fetcher.fetch(&self.version_url()).await?;
        let doc: LatestVersion = serde_yaml::from_slice(&bytes)?;
        let raw = doc
            .version
            .ok_or_else(|| UpdateError::Validation("version.yml has no version".into()))?;
        raw.parse()
    }

    /// Fetch and validate the manifest published for `version`.
    pub async fn fetch_manifest(&self, version: &Version) -> Result<Manifest> {
        let url = self.manifest_url(version);
        let bytes = self.fetcher.fetch(&url).await?;
        let manifest = Manifest::parse(&bytes)?;
        if &manifest.version != version {
            return Err(UpdateError::ManifestUnavailable(format!(
                "manifest at {url} describes {} instead of {version}",
                manifest.version
            )));
        }
        debug!(version = %version, steps = manifest.steps.len(), "Manifest fetched");
        Ok(manifest)
    }

    /// Download a step payload relative to the repository root.
    pub async fn fetch_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        let url = self.file_url(remote_path)?;
        self.fetcher.fetch(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    const ROOT: &str = "https://raw.githubusercontent.com/sv-afterglow/data-hub/main";

    fn client(mock: MockFetcher) -> ManifestClient {
        ManifestClient::new(Arc::new(mock), &RepositoryConfig::default())
    }

    #[test]
    fn test_urls() {
        let c = client(MockFetcher::new());
        assert_eq!(c.version_url(), format!("{ROOT}/version.yml"));
        assert_eq!(
            c.manifest_url(&Version::new(1, 1, 0)),
            format!("{ROOT}/updates/1.1.0/manifest.yml")
        );
        assert_eq!(
            c.file_url("config/app.conf").unwrap(),
            format!("{ROOT}/config/app.conf")
        );
        assert!(c.file_url("../x").is_err());
    }

    #[tokio::test]
    async fn test_latest_version() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .with(eq(format!("{ROOT}/version.yml")))
            .times(1)
            .returning(|_| Ok(b"version: 1.2.0\n".to_vec()));
        assert_eq!(client(mock).latest_version().await, Some(Version::new(1, 2, 0)));
    }

    #[tokio::test]
    async fn test_two_digit_minor_resolves_its_own_manifest() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .with(eq(format!("{ROOT}/version.yml")))
            .returning(|_| Ok(b"version: 1.10\n".to_vec()));
        mock.expect_fetch()
            .with(eq(format!("{ROOT}/updates/1.10.0/manifest.yml")))
            .times(1)
            .returning(|_| Ok(b"version: 1.10\nsteps: []\n".to_vec()));
        let c = client(mock);

        let latest = c.latest_version().await.unwrap();
        assert_eq!(latest, Version::new(1, 10, 0));
        let m = c.fetch_manifest(&latest).await.unwrap();
        assert_eq!(m.version, Version::new(1, 10, 0));
    }

    #[tokio::test]
    async fn test_latest_version_offline_is_none() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Err(UpdateError::TransientFetch("offline".into())));
        assert_eq!(client(mock).latest_version().await, None);
    }

    #[tokio::test]
    async fn test_latest_version_garbage_is_none() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Ok(b"<html>rate limited</html>".to_vec()));
        assert_eq!(client(mock).latest_version().await, None);
    }

    #[tokio::test]
    async fn test_fetch_manifest_version_mismatch() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .returning(|_| Ok(b"version: 1.0.9\nsteps: []\n".to_vec()));
        let err = client(mock)
            .fetch_manifest(&Version::new(1, 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::ManifestUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_manifest_ok() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .with(eq(format!("{ROOT}/updates/1.1.0/manifest.yml")))
            .returning(|_| Ok(b"version: 1.1.0\nsteps: []\n".to_vec()));
        let m = client(mock)
            .fetch_manifest(&Version::new(1, 1, 0))
            .await
            .unwrap();
        assert!(m.steps.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_file_rejects_escape_without_fetching() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch().never();
        assert!(client(mock).fetch_file("/etc/passwd").await.is_err());
    }
}
