//! Mappings catalog and providers
//!
//! The catalog is a YAML document with two top-level keys: `images`
//! (source image pattern, `*` wildcards allowed, to target reference)
//! and `packages` (distro to source package to ordered target list).
//! Lookups go through the [`MappingProvider`] trait so backends other
//! than an in-memory document can be plugged in; providers compose with
//! [`ChainedMappingProvider`], first hit wins.
//!
//! Image maps are insertion-ordered (`IndexMap`), which makes wildcard
//! matching deterministic for a given document: the first pattern in
//! catalog order wins.

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::errors::{MappingsError, Result};
use crate::packages::Distro;

/// The catalog document shipped with the binary.
pub const BUILTIN_MAPPINGS: &str = include_str!("builtin_mappings.yaml");

/// Per-distro package mappings.
pub type PackageMap = IndexMap<Distro, IndexMap<String, Vec<String>>>;

/// A mappings catalog document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingsConfig {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub images: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: PackageMap,
}

impl MappingsConfig {
    /// True when the document carries no mappings at all.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.packages.is_empty()
    }

    /// Parse a catalog document from YAML.
    pub fn from_yaml(document: &str) -> Result<MappingsConfig> {
        serde_yaml::from_str(document).map_err(|err| {
            MappingsError::Parsing {
                message: err.to_string(),
            }
            .into()
        })
    }
}

/// Merge two catalogs; values in `overlay` take precedence.
pub fn merge_mappings(base: &MappingsConfig, overlay: &MappingsConfig) -> MappingsConfig {
    let mut result = base.clone();
    for (pattern, target) in &overlay.images {
        result.images.insert(pattern.clone(), target.clone());
    }
    for (distro, packages) in &overlay.packages {
        let entry = result.packages.entry(*distro).or_default();
        for (source, targets) in packages {
            entry.insert(source.clone(), targets.clone());
        }
    }
    result
}

/// Source of image and package mappings.
///
/// Implementations may perform I/O against an external catalog; these
/// calls are the only suspension points of a conversion, so dropping the
/// conversion future cancels promptly at this boundary.
#[async_trait]
pub trait MappingProvider: Send + Sync {
    /// Returns the target image for a source image, if one is mapped.
    async fn get_image_mapping(&self, source_image: &str) -> Result<Option<String>>;

    /// Returns the target packages for a source package, if mapped.
    async fn get_package_mappings(
        &self,
        distro: Distro,
        source_package: &str,
    ) -> Result<Option<Vec<String>>>;
}

/// Generate the Docker Hub normalization variants of an image base.
///
/// A bare name expands to the library forms (`docker.io/library/x` and
/// friends); an `org/image` pair to the org forms; a fully qualified
/// reference (host containing a dot) only to itself.
pub fn docker_hub_variants(base: &str) -> Vec<String> {
    let mut variants = vec![base.to_string()];
    if base.contains('/') && base.contains('.') {
        return variants;
    }
    let parts: Vec<&str> = base.split('/').collect();
    match parts.len() {
        1 => {
            variants.extend([
                format!("docker.io/{base}"),
                format!("docker.io/library/{base}"),
                format!("registry-1.docker.io/library/{base}"),
                format!("index.docker.io/{base}"),
                format!("index.docker.io/library/{base}"),
            ]);
        }
        2 => {
            let org = parts[0];
            let image = parts[1];
            variants.extend([
                format!("docker.io/{org}/{image}"),
                format!("registry-1.docker.io/{org}/{image}"),
                format!("index.docker.io/{org}/{image}"),
            ]);
        }
        _ => {}
    }
    variants
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{escaped}$")).ok()
}

/// Provider backed by an in-memory catalog document.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMappingProvider {
    mappings: MappingsConfig,
}

impl InMemoryMappingProvider {
    pub fn new(mappings: MappingsConfig) -> Self {
        InMemoryMappingProvider { mappings }
    }
}

#[async_trait]
impl MappingProvider for InMemoryMappingProvider {
    async fn get_image_mapping(&self, source_image: &str) -> Result<Option<String>> {
        if let Some(target) = self.mappings.images.get(source_image) {
            debug!(source = source_image, target = %target, "Found exact image mapping");
            return Ok(Some(target.clone()));
        }

        for variant in docker_hub_variants(source_image) {
            if let Some(target) = self.mappings.images.get(&variant) {
                debug!(source = %variant, target = %target, "Found normalized image mapping");
                return Ok(Some(target.clone()));
            }
        }

        for (pattern, target) in &self.mappings.images {
            if !pattern.contains('*') {
                continue;
            }
            match wildcard_regex(pattern) {
                Some(re) if re.is_match(source_image) => {
                    debug!(pattern = %pattern, source = source_image, target = %target, "Found wildcard image mapping");
                    return Ok(Some(target.clone()));
                }
                _ => {}
            }
        }

        Ok(None)
    }

    async fn get_package_mappings(
        &self,
        distro: Distro,
        source_package: &str,
    ) -> Result<Option<Vec<String>>> {
        let targets = self
            .mappings
            .packages
            .get(&distro)
            .and_then(|packages| packages.get(source_package));
        match targets {
            Some(targets) if !targets.is_empty() => Ok(Some(targets.clone())),
            _ => Ok(None),
        }
    }
}

/// Provider that consults an ordered list of providers; first hit wins.
pub struct ChainedMappingProvider {
    providers: Vec<Box<dyn MappingProvider>>,
}

impl ChainedMappingProvider {
    pub fn new(providers: Vec<Box<dyn MappingProvider>>) -> Self {
        ChainedMappingProvider { providers }
    }
}

#[async_trait]
impl MappingProvider for ChainedMappingProvider {
    async fn get_image_mapping(&self, source_image: &str) -> Result<Option<String>> {
        for provider in &self.providers {
            if let Some(target) = provider.get_image_mapping(source_image).await? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    async fn get_package_mappings(
        &self,
        distro: Distro,
        source_package: &str,
    ) -> Result<Option<Vec<String>>> {
        for provider in &self.providers {
            if let Some(targets) = provider.get_package_mappings(distro, source_package).await? {
                return Ok(Some(targets));
            }
        }
        Ok(None)
    }
}

/// Well-known location of an updated catalog document.
pub fn builtin_mappings_path() -> Option<PathBuf> {
    directories_next::ProjectDirs::from("dev", "refit", "refit")
        .map(|dirs| dirs.config_dir().join("builtin-mappings.yaml"))
}

/// Load the built-in catalog, preferring an updated document at the
/// well-known config path over the embedded one.
pub fn load_builtin_mappings() -> Result<MappingsConfig> {
    if let Some(path) = builtin_mappings_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(document) => match MappingsConfig::from_yaml(&document) {
                    Ok(config) => {
                        debug!(path = %path.display(), "Using updated mappings document");
                        return Ok(config);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Ignoring unparsable updated mappings");
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to read updated mappings");
                }
            }
        }
    }
    MappingsConfig::from_yaml(BUILTIN_MAPPINGS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(document: &str) -> InMemoryMappingProvider {
        InMemoryMappingProvider::new(MappingsConfig::from_yaml(document).unwrap())
    }

    #[test]
    fn test_docker_hub_variants_bare_name() {
        let variants = docker_hub_variants("node");
        assert_eq!(
            variants,
            vec![
                "node",
                "docker.io/node",
                "docker.io/library/node",
                "registry-1.docker.io/library/node",
                "index.docker.io/node",
                "index.docker.io/library/node",
            ]
        );
    }

    #[test]
    fn test_docker_hub_variants_org_image() {
        let variants = docker_hub_variants("myorg/app");
        assert_eq!(
            variants,
            vec![
                "myorg/app",
                "docker.io/myorg/app",
                "registry-1.docker.io/myorg/app",
                "index.docker.io/myorg/app",
            ]
        );
    }

    #[test]
    fn test_docker_hub_variants_fully_qualified() {
        assert_eq!(
            docker_hub_variants("quay.io/org/app"),
            vec!["quay.io/org/app"]
        );
    }

    #[tokio::test]
    async fn test_exact_image_lookup() {
        let p = provider("images:\n  golang: go\n");
        assert_eq!(
            p.get_image_mapping("golang").await.unwrap(),
            Some("go".to_string())
        );
        assert_eq!(p.get_image_mapping("rust").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_normalized_image_lookup() {
        let p = provider("images:\n  docker.io/library/node: node\n");
        assert_eq!(
            p.get_image_mapping("node").await.unwrap(),
            Some("node".to_string())
        );
    }

    #[tokio::test]
    async fn test_wildcard_image_lookup() {
        let p = provider("images:\n  \"gcr.io/distroless/*\": chainguard-base\n");
        assert_eq!(
            p.get_image_mapping("gcr.io/distroless/static-debian12")
                .await
                .unwrap(),
            Some("chainguard-base".to_string())
        );
        assert_eq!(p.get_image_mapping("gcr.io/other/image").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wildcard_insertion_order_wins() {
        let p = provider(
            "images:\n  \"registry.example.com/*\": first\n  \"registry.example.*\": second\n",
        );
        assert_eq!(
            p.get_image_mapping("registry.example.com/app").await.unwrap(),
            Some("first".to_string())
        );
    }

    #[tokio::test]
    async fn test_wildcard_dots_are_literal() {
        let p = provider("images:\n  \"docker.io/*\": hit\n");
        assert_eq!(p.get_image_mapping("dockerXio/app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_package_lookup() {
        let p = provider("packages:\n  debian:\n    abc:\n      - xyz\n      - lmnop\n");
        assert_eq!(
            p.get_package_mappings(Distro::Debian, "abc").await.unwrap(),
            Some(vec!["xyz".to_string(), "lmnop".to_string()])
        );
        assert_eq!(
            p.get_package_mappings(Distro::Fedora, "abc").await.unwrap(),
            None
        );
        assert_eq!(
            p.get_package_mappings(Distro::Debian, "missing").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_empty_package_list_is_a_miss() {
        let p = provider("packages:\n  debian:\n    abc: []\n");
        assert_eq!(
            p.get_package_mappings(Distro::Debian, "abc").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_chained_first_hit_wins() {
        let first = provider("images:\n  golang: go\n");
        let second = provider("images:\n  golang: golang-fips\n  rust: rust\n");
        let chained = ChainedMappingProvider::new(vec![Box::new(first), Box::new(second)]);
        assert_eq!(
            chained.get_image_mapping("golang").await.unwrap(),
            Some("go".to_string())
        );
        assert_eq!(
            chained.get_image_mapping("rust").await.unwrap(),
            Some("rust".to_string())
        );
        assert_eq!(chained.get_image_mapping("zig").await.unwrap(), None);
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = MappingsConfig::from_yaml(
            "images:\n  golang: go\npackages:\n  debian:\n    abc: [xyz]\n",
        )
        .unwrap();
        let overlay = MappingsConfig::from_yaml(
            "images:\n  golang: custom-go\npackages:\n  debian:\n    def: [uvw]\n",
        )
        .unwrap();
        let merged = merge_mappings(&base, &overlay);
        assert_eq!(merged.images.get("golang"), Some(&"custom-go".to_string()));
        let debian = merged.packages.get(&Distro::Debian).unwrap();
        assert_eq!(debian.get("abc"), Some(&vec!["xyz".to_string()]));
        assert_eq!(debian.get("def"), Some(&vec!["uvw".to_string()]));
    }

    #[test]
    fn test_invalid_yaml_is_a_parse_error() {
        let err = MappingsConfig::from_yaml("images: [not, a, map]").unwrap_err();
        assert!(err.to_string().contains("Mappings error"));
    }

    #[test]
    fn test_builtin_document_parses() {
        let config = MappingsConfig::from_yaml(BUILTIN_MAPPINGS).unwrap();
        assert!(!config.images.is_empty());
        assert!(!config.packages.is_empty());
        assert_eq!(config.images.get("golang"), Some(&"go".to_string()));
    }
}
