//! Package-manager detection and RUN command rewriting
//!
//! Recognizes install commands of the supported package managers inside a
//! parsed shell pipeline, collects the requested packages, substitutes
//! them through the mapping provider, and splices a single `apk add -U`
//! over the contiguous package-manager run while leaving the surrounding
//! shell structure untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::errors::Result;
use crate::mappings::MappingProvider;
use crate::shell::{ShellCommand, ShellPart};

/// Install subcommands
pub const SUBCOMMAND_INSTALL: &str = "install";
pub const SUBCOMMAND_ADD: &str = "add";
pub const SUBCOMMAND_UPGRADE: &str = "upgrade";

/// The package providing GNU shadow-utils (useradd, groupadd)
pub const PACKAGE_SHADOW: &str = "shadow";

/// A Linux distribution family, identifying a package-naming namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Debian,
    Fedora,
    Alpine,
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distro::Debian => "debian",
            Distro::Fedora => "fedora",
            Distro::Alpine => "alpine",
        };
        f.write_str(name)
    }
}

/// A package-manager command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Manager {
    AptGet,
    Apt,
    Yum,
    Dnf,
    Microdnf,
    Apk,
}

impl Manager {
    /// Map a shell command word to the package manager it invokes.
    pub fn from_command(command: &str) -> Option<Manager> {
        match command {
            "apt-get" => Some(Manager::AptGet),
            "apt" => Some(Manager::Apt),
            "yum" => Some(Manager::Yum),
            "dnf" => Some(Manager::Dnf),
            "microdnf" => Some(Manager::Microdnf),
            "apk" => Some(Manager::Apk),
            _ => None,
        }
    }

    /// The distribution family this manager belongs to.
    pub fn distro(self) -> Distro {
        match self {
            Manager::AptGet | Manager::Apt => Distro::Debian,
            Manager::Yum | Manager::Dnf | Manager::Microdnf => Distro::Fedora,
            Manager::Apk => Distro::Alpine,
        }
    }

    /// The subcommand that installs packages for this manager.
    pub fn install_keyword(self) -> &'static str {
        match self.distro() {
            Distro::Alpine => SUBCOMMAND_ADD,
            _ => SUBCOMMAND_INSTALL,
        }
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Manager::AptGet => "apt-get",
            Manager::Apt => "apt",
            Manager::Yum => "yum",
            Manager::Dnf => "dnf",
            Manager::Microdnf => "microdnf",
            Manager::Apk => "apk",
        };
        f.write_str(name)
    }
}

/// Outcome of rewriting the package-manager commands within one RUN.
#[derive(Debug, Clone)]
pub struct PackageRewrite {
    pub distro: Distro,
    pub manager: Manager,
    /// Sorted, deduplicated source package names that were requested.
    pub packages: Vec<String>,
    /// The rewritten shell pipeline.
    pub shell: ShellCommand,
}

/// Rewrite the package-manager install commands in `shell`, if any.
///
/// Returns `None` when no install command is present, or when commands of
/// two different distribution families appear in the same pipeline (such
/// a RUN passes through untouched).
pub async fn convert_package_commands(
    shell: &ShellCommand,
    provider: &dyn MappingProvider,
) -> Result<Option<PackageRewrite>> {
    if shell.parts.is_empty() {
        return Ok(None);
    }

    let managers: Vec<Option<Manager>> = shell
        .parts
        .iter()
        .map(|part| Manager::from_command(&part.command))
        .collect();

    let mut distros: Vec<Distro> = managers
        .iter()
        .flatten()
        .map(|manager| manager.distro())
        .collect();
    distros.sort();
    distros.dedup();
    if distros.len() > 1 {
        debug!("Multiple package manager families in one RUN, leaving untouched");
        return Ok(None);
    }
    let Some(&distro) = distros.first() else {
        return Ok(None);
    };

    // The reported manager is the first package-manager command seen.
    let manager = managers
        .iter()
        .flatten()
        .next()
        .copied()
        .unwrap_or(Manager::Apk);

    let keyword = manager.install_keyword();
    let is_install_part = |index: usize| -> bool {
        managers[index].is_some()
            && shell.parts[index]
                .args
                .iter()
                .any(|arg| arg == keyword)
    };

    // Anchor on the first install command, then widen to the contiguous
    // run of package-manager parts around it.
    let Some(anchor) = (0..shell.parts.len()).find(|&i| is_install_part(i)) else {
        return Ok(None);
    };
    let mut start = anchor;
    while start > 0 && managers[start - 1].is_some() {
        start -= 1;
    }
    let mut end = anchor;
    while end + 1 < shell.parts.len() && managers[end + 1].is_some() {
        end += 1;
    }

    // Collect requested packages from the install parts only; parts like
    // `apt-get update` are consumed without contributing packages.
    let mut sources: Vec<String> = Vec::new();
    for index in start..=end {
        if !is_install_part(index) {
            continue;
        }
        for arg in &shell.parts[index].args {
            if arg.starts_with('-')
                || arg == SUBCOMMAND_INSTALL
                || arg == SUBCOMMAND_ADD
                || arg == SUBCOMMAND_UPGRADE
                || arg == keyword
            {
                continue;
            }
            sources.push(arg.clone());
        }
    }
    sources.sort();
    sources.dedup();

    let mut targets: Vec<String> = Vec::new();
    for package in &sources {
        match provider.get_package_mappings(distro, package).await? {
            Some(mapped) => {
                debug!(source = %package, targets = ?mapped, "Found package mapping");
                targets.extend(mapped);
            }
            None => targets.push(package.clone()),
        }
    }
    targets.sort();
    targets.dedup();

    let mut args = Vec::with_capacity(targets.len() + 2);
    args.push(SUBCOMMAND_ADD.to_string());
    args.push("-U".to_string());
    args.extend(targets);

    let mut parts: Vec<ShellPart> = Vec::with_capacity(shell.parts.len() - (end - start));
    parts.extend(shell.parts[..start].iter().cloned());
    parts.push(ShellPart {
        extra_pre: shell.parts[start].extra_pre.clone(),
        command: "apk".to_string(),
        args,
        delimiter: shell.parts[end].delimiter.clone(),
    });
    parts.extend(shell.parts[end + 1..].iter().cloned());

    Ok(Some(PackageRewrite {
        distro,
        manager,
        packages: sources,
        shell: ShellCommand { parts },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::{InMemoryMappingProvider, MappingsConfig};

    fn provider_with_abc() -> InMemoryMappingProvider {
        let config: MappingsConfig = serde_yaml::from_str(
            r#"
packages:
  debian:
    abc:
      - xyz
      - lmnop
"#,
        )
        .unwrap();
        InMemoryMappingProvider::new(config)
    }

    fn empty_provider() -> InMemoryMappingProvider {
        InMemoryMappingProvider::new(MappingsConfig::default())
    }

    async fn rewrite(input: &str, provider: &dyn MappingProvider) -> Option<PackageRewrite> {
        convert_package_commands(&ShellCommand::parse(input), provider)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_and_install_unify() {
        let provider = empty_provider();
        let result = rewrite("apt-get update && apt-get install -y nginx", &provider)
            .await
            .unwrap();
        assert_eq!(result.distro, Distro::Debian);
        assert_eq!(result.manager, Manager::AptGet);
        assert_eq!(result.packages, vec!["nginx"]);
        assert_eq!(result.shell.to_string(), "apk add -U nginx");
    }

    #[tokio::test]
    async fn test_multiple_installs_combine() {
        let provider = empty_provider();
        let result = rewrite(
            "apt-get install -y nginx && apt-get install -y curl && apt-get install -y vim",
            &provider,
        )
        .await
        .unwrap();
        assert_eq!(result.packages, vec!["curl", "nginx", "vim"]);
        assert_eq!(result.shell.to_string(), "apk add -U curl nginx vim");
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let provider = empty_provider();
        let result = rewrite("apt-get install -y nginx nginx curl curl", &provider)
            .await
            .unwrap();
        assert_eq!(result.packages, vec!["curl", "nginx"]);
        assert_eq!(result.shell.to_string(), "apk add -U curl nginx");
    }

    #[tokio::test]
    async fn test_outer_structure_preserved() {
        let provider = empty_provider();
        let result = rewrite(
            "echo hello; apt-get update && apt-get install -y nginx curl vim && apt-get install -y curl nginx && echo goodbye",
            &provider,
        )
        .await
        .unwrap();
        assert_eq!(
            result.shell.to_string(),
            "echo hello ; \\\n    apk add -U curl nginx vim && \\\n    echo goodbye"
        );
    }

    #[tokio::test]
    async fn test_package_mapping_applied() {
        let provider = provider_with_abc();
        let result = rewrite("apt-get update && apt-get install -y abc nginx", &provider)
            .await
            .unwrap();
        assert_eq!(result.packages, vec!["abc", "nginx"]);
        assert_eq!(result.shell.to_string(), "apk add -U lmnop nginx xyz");
    }

    #[tokio::test]
    async fn test_unmapped_package_kept() {
        let provider = provider_with_abc();
        let result = rewrite("yum install -y nginx abc", &provider).await.unwrap();
        // The abc mapping is debian-scoped; fedora lookups miss it.
        assert_eq!(result.distro, Distro::Fedora);
        assert_eq!(result.manager, Manager::Yum);
        assert_eq!(result.shell.to_string(), "apk add -U abc nginx");
    }

    #[tokio::test]
    async fn test_mixed_families_left_untouched() {
        let provider = empty_provider();
        let result = rewrite(
            "apt-get update && apt-get install -y nginx && yum install php",
            &provider,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_alpine_add_normalized() {
        let provider = empty_provider();
        let result = rewrite("apk update && apk add nginx", &provider).await.unwrap();
        assert_eq!(result.distro, Distro::Alpine);
        assert_eq!(result.manager, Manager::Apk);
        assert_eq!(result.shell.to_string(), "apk add -U nginx");
    }

    #[tokio::test]
    async fn test_no_package_manager_command() {
        let provider = empty_provider();
        assert!(rewrite("echo hello world", &provider).await.is_none());
    }

    #[tokio::test]
    async fn test_update_without_install_is_not_converted() {
        let provider = empty_provider();
        assert!(rewrite("apt-get update", &provider).await.is_none());
    }

    #[tokio::test]
    async fn test_version_pins_pass_through() {
        let provider = empty_provider();
        let result = rewrite("apt-get install -y nginx=1.25.3-1", &provider)
            .await
            .unwrap();
        assert_eq!(result.packages, vec!["nginx=1.25.3-1"]);
    }

    #[test]
    fn test_manager_metadata() {
        assert_eq!(Manager::from_command("apt-get"), Some(Manager::AptGet));
        assert_eq!(Manager::from_command("microdnf"), Some(Manager::Microdnf));
        assert_eq!(Manager::from_command("brew"), None);
        assert_eq!(Manager::AptGet.distro(), Distro::Debian);
        assert_eq!(Manager::Dnf.distro(), Distro::Fedora);
        assert_eq!(Manager::Apk.install_keyword(), "add");
        assert_eq!(Manager::Yum.install_keyword(), "install");
        assert_eq!(Manager::AptGet.to_string(), "apt-get");
        assert_eq!(Distro::Debian.to_string(), "debian");
    }
}
