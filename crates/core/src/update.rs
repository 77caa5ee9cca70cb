//! Catalog updater
//!
//! Downloads the latest mappings document over HTTPS, validates that it
//! parses, and stores it in a content-addressed OCI-layout cache
//! (`oci-layout`, `index.json`, `blobs/sha256/<hex>`). The well-known
//! config path consumed by [`crate::mappings::load_builtin_mappings`] is
//! then pointed at the winning blob. At most one writer is expected;
//! last writer wins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::errors::{Result, UpdateError};
use crate::mappings::{builtin_mappings_path, MappingsConfig};

/// Where the latest mappings document is published.
pub const DEFAULT_MAPPINGS_URL: &str =
    "https://raw.githubusercontent.com/refit-dev/refit/main/crates/core/src/builtin_mappings.yaml";

const OCI_LAYOUT_VERSION: &str = "1.0.0";
const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
const MAPPINGS_MEDIA_TYPE: &str = "application/yaml";

/// Configures the update behavior.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// User-Agent header for update requests; `refit/<version>` when empty.
    pub user_agent: String,
    /// Source URL; [`DEFAULT_MAPPINGS_URL`] when empty.
    pub mappings_url: String,
}

/// Minimal HTTP surface the updater needs, mockable in tests.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetch `url`, returning the response body on a 200.
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Vec<u8>>;
}

/// [`HttpFetcher`] backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|err| UpdateError::Fetch {
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(UpdateError::Status {
                status: response.status().as_u16(),
            }
            .into());
        }
        let body = response.bytes().await.map_err(|err| UpdateError::Fetch {
            message: err.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OciLayout {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OciIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType")]
    media_type: String,
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

/// The on-disk cache directory for downloaded mappings documents.
pub fn mappings_cache_dir() -> Option<PathBuf> {
    directories_next::ProjectDirs::from("dev", "refit", "refit")
        .map(|dirs| dirs.cache_dir().join("mappings"))
}

/// Check for and install the latest mappings document.
pub async fn update(opts: &UpdateOptions) -> Result<()> {
    let cache_dir = mappings_cache_dir().ok_or_else(|| {
        crate::errors::RefitError::Internal("could not determine cache directory".to_string())
    })?;
    let config_path = builtin_mappings_path().ok_or_else(|| {
        crate::errors::RefitError::Internal("could not determine config directory".to_string())
    })?;
    update_with(&ReqwestFetcher::default(), &cache_dir, &config_path, opts).await
}

/// Update against an explicit fetcher, cache directory, and config path.
pub async fn update_with(
    fetcher: &dyn HttpFetcher,
    cache_dir: &Path,
    config_path: &Path,
    opts: &UpdateOptions,
) -> Result<()> {
    info!("Checking for mappings update");

    let url = if opts.mappings_url.is_empty() {
        DEFAULT_MAPPINGS_URL
    } else {
        &opts.mappings_url
    };
    let user_agent = if opts.user_agent.is_empty() {
        format!("refit/{}", crate::version())
    } else {
        opts.user_agent.clone()
    };

    debug!(url, "Fetching mappings");
    let body = fetcher.fetch(url, &user_agent).await?;

    // Reject documents that would later fail to load.
    let text = String::from_utf8_lossy(&body);
    MappingsConfig::from_yaml(&text)?;

    if !cache_dir.exists() {
        debug!(path = %cache_dir.display(), "Creating cache directory");
        init_oci_layout(cache_dir)?;
    }

    let hex = hex_digest(&body);
    let digest = format!("sha256:{hex}");
    let blob_path = cache_dir.join("blobs").join("sha256").join(&hex);

    if blob_path.exists() {
        info!(location = %blob_path.display(), "Already have latest mappings");
    } else {
        info!(location = %blob_path.display(), "Saving latest mappings");
        if let Some(parent) = blob_path.parent() {
            std::fs::create_dir_all(parent).map_err(UpdateError::Io)?;
        }
        std::fs::write(&blob_path, &body).map_err(UpdateError::Io)?;
        update_index(cache_dir, &digest, body.len() as u64)?;
    }

    point_config_at_blob(config_path, &blob_path).map_err(UpdateError::Io)?;
    info!(sha256 = %hex, "Mappings checksum");

    Ok(())
}

fn hex_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn init_oci_layout(cache_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(cache_dir.join("blobs").join("sha256")).map_err(UpdateError::Io)?;

    let layout = OciLayout {
        image_layout_version: OCI_LAYOUT_VERSION.to_string(),
    };
    let layout_data = serde_json::to_vec(&layout).map_err(UpdateError::Index)?;
    std::fs::write(cache_dir.join("oci-layout"), layout_data).map_err(UpdateError::Io)?;

    let index = OciIndex {
        schema_version: 2,
        media_type: OCI_INDEX_MEDIA_TYPE.to_string(),
        manifests: Vec::new(),
    };
    let index_data = serde_json::to_vec_pretty(&index).map_err(UpdateError::Index)?;
    std::fs::write(cache_dir.join("index.json"), index_data).map_err(UpdateError::Io)?;

    Ok(())
}

fn update_index(cache_dir: &Path, digest: &str, size: u64) -> Result<()> {
    let index_path = cache_dir.join("index.json");
    let mut index = match std::fs::read(&index_path) {
        Ok(data) if !data.is_empty() => {
            serde_json::from_slice::<OciIndex>(&data).map_err(UpdateError::Index)?
        }
        _ => OciIndex {
            schema_version: 2,
            media_type: OCI_INDEX_MEDIA_TYPE.to_string(),
            manifests: Vec::new(),
        },
    };

    // Drop any stale entry for the same content before appending.
    index.manifests.retain(|manifest| manifest.digest != digest);

    let downloaded_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs().to_string())
        .unwrap_or_default();
    let mut annotations = BTreeMap::new();
    annotations.insert("dev.refit.mappings.downloadedAt".to_string(), downloaded_at);
    index.manifests.push(OciDescriptor {
        media_type: MAPPINGS_MEDIA_TYPE.to_string(),
        digest: digest.to_string(),
        size,
        annotations,
    });

    let data = serde_json::to_vec_pretty(&index).map_err(UpdateError::Index)?;
    std::fs::write(&index_path, data).map_err(UpdateError::Io)?;
    Ok(())
}

/// Point the well-known config path at the given blob (symlink on Unix,
/// copy elsewhere).
fn point_config_at_blob(config_path: &Path, blob_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        if let Ok(current) = std::fs::read_link(config_path) {
            if current == blob_path {
                return Ok(());
            }
        }
        let _ = std::fs::remove_file(config_path);
        std::os::unix::fs::symlink(blob_path, config_path)
    }

    #[cfg(not(unix))]
    {
        let _ = std::fs::remove_file(config_path);
        std::fs::copy(blob_path, config_path).map(|_| ())
    }
}
