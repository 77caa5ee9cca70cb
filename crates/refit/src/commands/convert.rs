//! The conversion command: read, convert, and emit a Dockerfile.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use refit_core::convert::Options;
use refit_core::dockerfile::Dockerfile;
use refit_core::mappings::MappingsConfig;
use refit_core::update::{self, UpdateOptions};

use crate::cli::Cli;

pub async fn execute(cli: Cli) -> Result<()> {
    if cli.update {
        let update_opts = UpdateOptions {
            user_agent: format!("refit/{}", refit_core::version()),
            ..Default::default()
        };
        update::update(&update_opts)
            .await
            .context("failed to update")?;
        // With no input path, updating is the whole job.
        if cli.path.is_none() {
            return Ok(());
        }
    }

    let Some(path) = cli.path.clone() else {
        bail!("requires at least 1 arg(s), only received 0");
    };

    let is_file = path.as_os_str() != "-";
    let raw: Vec<u8> = if is_file {
        std::fs::read(&path).with_context(|| format!("failed to open file: {}", path.display()))?
    } else {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("failed to read input")?;
        buffer
    };

    let dockerfile = Dockerfile::parse(&String::from_utf8_lossy(&raw));

    let mut opts = Options {
        organization: cli.org.clone(),
        registry: cli.registry.clone(),
        no_built_in: cli.no_builtin,
        ..Default::default()
    };

    if let Some(mappings_path) = &cli.mappings {
        info!(file = %mappings_path.display(), "Loading custom mappings file");
        let document = std::fs::read_to_string(mappings_path)
            .with_context(|| format!("reading mappings file {}", mappings_path.display()))?;
        opts.extra_mappings =
            MappingsConfig::from_yaml(&document).context("unmarshalling package mappings")?;
    } else if cli.no_builtin {
        warn!("Using --no-builtin without --mappings will use default conversion logic without any package/image mappings");
    }

    let converted = dockerfile
        .convert(&opts)
        .await
        .context("converting dockerfile")?;

    if cli.json {
        if cli.in_place {
            bail!("unable to use --in-place and --json flag at same time");
        }
        println!("{}", serde_json::to_string(&converted)?);
        return Ok(());
    }

    let result = converted.to_string();

    if cli.in_place {
        if !is_file {
            bail!("unable to use --in-place flag when processing stdin");
        }
        return write_in_place(&path, &raw, &result);
    }

    print!("{result}");
    Ok(())
}

/// Overwrite the Dockerfile, saving the original alongside it and
/// keeping the original permissions on both files.
fn write_in_place(path: &Path, original: &[u8], result: &str) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("getting file info for {}", path.display()))?;

    let backup_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.bak", ext.to_string_lossy()),
        None => "bak".to_string(),
    });
    info!(path = %backup_path.display(), "Saving dockerfile backup");
    std::fs::write(&backup_path, original)
        .with_context(|| format!("saving dockerfile backup to {}", backup_path.display()))?;

    info!(path = %path.display(), "Overwriting dockerfile");
    std::fs::write(path, result.as_bytes())
        .with_context(|| format!("overwriting {}", path.display()))?;

    #[cfg(unix)]
    {
        let permissions = metadata.permissions();
        std::fs::set_permissions(&backup_path, permissions.clone())?;
        std::fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}
