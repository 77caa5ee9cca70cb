//! Dockerfile conversion orchestrator
//!
//! Drives the rewrite of a parsed Dockerfile: gathers per-stage facts
//! (which stages run commands, which ARGs feed FROM directives), applies
//! the FROM/ARG/RUN conversions through the mapping provider, and
//! inserts `USER root` after converted FROM lines in stages whose RUN
//! directives were rewritten.
//!
//! Conversion is all-or-nothing: it returns a complete new document or
//! an error, never a partially rewritten one. The input is untouched;
//! the output shares no structure with it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::busybox::convert_busybox_commands;
use crate::dockerfile::{
    strip_directive, Dockerfile, DockerfileLine, FromDetails, RunDetails, RunShell,
    DIRECTIVE_ARG, DIRECTIVE_FROM, DIRECTIVE_RUN, DIRECTIVE_USER, KEYWORD_AS,
};
use crate::errors::Result;
use crate::image_ref::{base_filename, build_image_reference, convert_tag, split_image_reference};
use crate::mappings::{
    load_builtin_mappings, ChainedMappingProvider, InMemoryMappingProvider, MappingProvider,
    MappingsConfig,
};
use crate::packages::convert_package_commands;

/// Custom hook for FROM image-reference conversion.
///
/// Receives the original FROM details, the default-converted reference
/// (registry, image, tag, and digest, but no `AS` clause), and whether
/// the stage runs commands. A non-empty successful return replaces the
/// default reference; an error leaves the default in place.
pub type FromLineConverter =
    Arc<dyn Fn(&FromDetails, &str, bool) -> anyhow::Result<String> + Send + Sync>;

/// Conversion options.
#[derive(Clone, Default)]
pub struct Options {
    /// Organization for `cgr.dev/<org>/<image>`; `ORG` when empty.
    pub organization: String,
    /// Alternate `<host>/<namespace>` prefix; overrides `organization`.
    pub registry: String,
    /// Extra in-memory mappings, consulted after the built-in catalog.
    pub extra_mappings: MappingsConfig,
    /// Suppress the built-in catalog entirely.
    pub no_built_in: bool,
    /// Optional hook replacing the default FROM reference conversion.
    pub from_line_converter: Option<FromLineConverter>,
    /// When set, overrides all mapping assembly.
    pub mapping_provider: Option<Arc<dyn MappingProvider>>,
}

impl Dockerfile {
    /// Convert this Dockerfile onto hardened base images.
    ///
    /// Returns a new deep-copied document; `self` is left untouched.
    /// Provider errors abort the conversion and propagate to the caller.
    pub async fn convert(&self, opts: &Options) -> Result<Dockerfile> {
        let provider = assemble_provider(opts)?;

        let stages_with_run = detect_stages_with_run(&self.lines);
        let args_used_as_base = detect_args_used_as_base(&self.lines);

        // Packages installed so far per stage, for the shadow check.
        let mut stage_packages: HashMap<usize, Vec<String>> = HashMap::new();
        let mut lines: Vec<DockerfileLine> = Vec::with_capacity(self.lines.len());

        for line in &self.lines {
            let mut new_line = DockerfileLine {
                raw: line.raw.clone(),
                converted: String::new(),
                extra: line.extra.clone(),
                stage: line.stage,
                from: line.from.clone(),
                run: line.run.clone(),
                arg: line.arg.clone(),
            };

            if let Some(from) = &line.from {
                if should_convert_from(from) {
                    let needs_dev_suffix = stages_with_run.contains(&line.stage);
                    new_line.converted =
                        convert_from_line(from, needs_dev_suffix, provider.as_ref(), opts).await?;
                }
            }

            if let Some(arg) = &line.arg {
                let used_as_base = args_used_as_base.contains(&arg.name);
                if let Some(new_arg) = new_line.arg.as_mut() {
                    new_arg.used_as_base = used_as_base;
                }
                if used_as_base && !arg.default_value.is_empty() {
                    let needs_dev_suffix =
                        arg_needs_dev_suffix(&arg.name, &self.lines, &stages_with_run);
                    let (base, tag) = split_image_reference(&arg.default_value);
                    let stand_in = FromDetails {
                        base: base.to_string(),
                        tag: tag.to_string(),
                        tag_dynamic: tag.contains('$'),
                        orig: arg.default_value.clone(),
                        ..Default::default()
                    };
                    let reference = convert_image_reference(
                        &stand_in,
                        needs_dev_suffix,
                        provider.as_ref(),
                        opts,
                    )
                    .await?;
                    if let Some(new_arg) = new_line.arg.as_mut() {
                        new_arg.default_value = reference.clone();
                    }
                    new_line.converted = format!("{DIRECTIVE_ARG} {}={}", arg.name, reference);
                }
            }

            if let Some(run) = &line.run {
                let before = &run.shell.before;
                if let Some(rewrite) =
                    convert_package_commands(before, provider.as_ref()).await?
                {
                    stage_packages
                        .entry(line.stage)
                        .or_default()
                        .extend(rewrite.packages.iter().cloned());
                    new_line.converted = format!("{DIRECTIVE_RUN} {}", rewrite.shell);
                    new_line.run = Some(RunDetails {
                        distro: Some(rewrite.distro),
                        manager: Some(rewrite.manager),
                        packages: rewrite.packages,
                        shell: RunShell {
                            before: before.clone(),
                            after: Some(rewrite.shell),
                        },
                    });
                } else {
                    let installed = stage_packages
                        .get(&line.stage)
                        .map(|packages| packages.as_slice())
                        .unwrap_or(&[]);
                    if let Some(busybox_shell) = convert_busybox_commands(before, installed) {
                        new_line.converted = format!("{DIRECTIVE_RUN} {busybox_shell}");
                        if let Some(new_run) = new_line.run.as_mut() {
                            new_run.shell.after = Some(busybox_shell);
                        }
                    }
                }
            }

            lines.push(new_line);
        }

        add_user_root_directives(&mut lines);

        Ok(Dockerfile { lines })
    }
}

fn assemble_provider(opts: &Options) -> Result<Arc<dyn MappingProvider>> {
    if let Some(provider) = &opts.mapping_provider {
        return Ok(provider.clone());
    }
    let mut providers: Vec<Box<dyn MappingProvider>> = Vec::new();
    if !opts.no_built_in {
        providers.push(Box::new(InMemoryMappingProvider::new(
            load_builtin_mappings()?,
        )));
    }
    if !opts.extra_mappings.is_empty() {
        providers.push(Box::new(InMemoryMappingProvider::new(
            opts.extra_mappings.clone(),
        )));
    }
    Ok(Arc::new(ChainedMappingProvider::new(providers)))
}

/// Stages that contain at least one RUN directive, judged on raw text.
fn detect_stages_with_run(lines: &[DockerfileLine]) -> HashSet<usize> {
    lines
        .iter()
        .filter(|line| strip_directive(line.raw.trim(), DIRECTIVE_RUN).is_some())
        .map(|line| line.stage)
        .collect()
}

/// Names of ARGs referenced by some FROM directive's base.
fn detect_args_used_as_base(lines: &[DockerfileLine]) -> HashSet<String> {
    let names: Vec<&str> = lines
        .iter()
        .filter_map(|line| line.arg.as_ref())
        .map(|arg| arg.name.as_str())
        .filter(|name| !name.is_empty())
        .collect();

    let mut used: HashSet<String> = HashSet::new();
    for line in lines {
        let Some(from) = &line.from else { continue };
        if !from.base_dynamic {
            continue;
        }
        for name in &names {
            if references_arg(&from.base, name) {
                used.insert(name.to_string());
            }
        }
    }
    used
}

/// Whether `base` references the build argument `name` as `$name` or
/// `${name}`.
fn references_arg(base: &str, name: &str) -> bool {
    if base.contains(&format!("${{{name}}}")) {
        return true;
    }
    let needle = format!("${name}");
    let mut search = base;
    while let Some(idx) = search.find(&needle) {
        let rest = &search[idx + needle.len()..];
        match rest.chars().next() {
            None => return true,
            Some(c) if !c.is_ascii_alphanumeric() && c != '_' => return true,
            _ => {}
        }
        search = rest;
    }
    false
}

/// The -dev decision for an ARG default: OR over the stages whose FROM
/// base references the argument.
fn arg_needs_dev_suffix(
    name: &str,
    lines: &[DockerfileLine],
    stages_with_run: &HashSet<usize>,
) -> bool {
    lines.iter().any(|line| match &line.from {
        Some(from) if from.base_dynamic && references_arg(&from.base, name) => {
            stages_with_run.contains(&line.stage)
        }
        _ => false,
    })
}

/// A FROM is rewritten unless it names scratch, an earlier stage, or a
/// dynamic base.
fn should_convert_from(from: &FromDetails) -> bool {
    from.base != "scratch" && from.parent == 0 && !from.base_dynamic
}

/// Produce the converted image reference (no `FROM`, flags, or alias).
async fn convert_image_reference(
    from: &FromDetails,
    needs_dev_suffix: bool,
    provider: &dyn MappingProvider,
    opts: &Options,
) -> Result<String> {
    let target = provider.get_image_mapping(&from.base).await?;
    let target_image = target.unwrap_or_else(|| base_filename(&from.base).to_string());

    // A catalog target may pin its own tag; that pin wins.
    let (target_base, target_tag) = split_image_reference(&target_image);
    let converted_tag = if !target_tag.is_empty() {
        target_tag.to_string()
    } else {
        convert_tag(base_filename(target_base), &from.tag, needs_dev_suffix)
    };

    let mut reference =
        build_image_reference(target_base, &converted_tag, &opts.registry, &opts.organization);
    if !from.digest.is_empty() {
        reference.push('@');
        reference.push_str(&from.digest);
    }

    if let Some(hook) = &opts.from_line_converter {
        match hook(from, &reference, needs_dev_suffix) {
            Ok(custom) if !custom.is_empty() => reference = custom,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "Custom FROM line conversion failed, using default");
            }
        }
    }

    Ok(reference)
}

/// Produce the full converted FROM directive text.
async fn convert_from_line(
    from: &FromDetails,
    needs_dev_suffix: bool,
    provider: &dyn MappingProvider,
    opts: &Options,
) -> Result<String> {
    let reference = convert_image_reference(from, needs_dev_suffix, provider, opts).await?;

    let mut converted = format!("{DIRECTIVE_FROM} ");
    for flag in &from.flags {
        converted.push_str(flag);
        converted.push(' ');
    }
    converted.push_str(&reference);
    if !from.alias.is_empty() {
        converted.push(' ');
        converted.push_str(KEYWORD_AS);
        converted.push(' ');
        converted.push_str(&from.alias);
    }
    Ok(converted)
}

/// Insert `USER root` after converted FROM lines in stages whose RUN
/// directives were rewritten, unless the stage already switches to root.
fn add_user_root_directives(lines: &mut [DockerfileLine]) {
    let mut stages_with_converted_run: HashSet<usize> = HashSet::new();
    let mut stages_with_user_root: HashSet<usize> = HashSet::new();

    for line in lines.iter() {
        if line.run.is_some() && !line.converted.is_empty() {
            stages_with_converted_run.insert(line.stage);
        }
        if is_user_root(&line.raw) || is_user_root(&line.converted) {
            stages_with_user_root.insert(line.stage);
        }
    }

    for line in lines.iter_mut() {
        if line.from.is_some()
            && stages_with_converted_run.contains(&line.stage)
            && !line.converted.is_empty()
            && !stages_with_user_root.contains(&line.stage)
        {
            line.converted.push('\n');
            line.converted.push_str(DIRECTIVE_USER);
            line.converted.push_str(" root");
            stages_with_user_root.insert(line.stage);
        }
    }
}

fn is_user_root(text: &str) -> bool {
    match strip_directive(text.trim(), DIRECTIVE_USER) {
        Some(_) => text.to_lowercase().contains("root"),
        None => false,
    }
}
