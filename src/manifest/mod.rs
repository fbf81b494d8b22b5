//! Update manifests: the typed model, schema validation and the remote
//! repository client.

pub mod client;
mod types;
pub mod validate;

pub use client::{Fetcher, HttpFetcher, ManifestClient};
pub use types::{check_remote_path, Manifest, RestartAction, Step, DEFAULT_COMPOSE_REMOTE_PATH};
