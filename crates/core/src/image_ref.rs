//! Image tag and reference rewriting
//!
//! Computes the target tag for a converted base image (semver
//! truncation, the `chainguard-base` pin, the `jdk`/`jre` prefix, the
//! `-dev` suffix for stages that run commands) and assembles the final
//! image reference under the hardened registry.

/// Default values for reference assembly
pub const DEFAULT_REGISTRY_DOMAIN: &str = "cgr.dev";
pub const DEFAULT_ORG: &str = "ORG";
pub const DEFAULT_IMAGE_TAG: &str = "latest-dev";
pub const CHAINGUARD_BASE: &str = "chainguard-base";

/// Last path segment of an image base.
pub fn base_filename(base: &str) -> &str {
    base.rsplit('/').next().unwrap_or(base)
}

/// Split an image reference into base and tag on the first colon.
pub fn split_image_reference(image_ref: &str) -> (&str, &str) {
    match image_ref.split_once(':') {
        Some((base, tag)) => (base, tag),
        None => (image_ref, ""),
    }
}

/// Reduce a version tag to its `major.minor` (or single-integer) form.
///
/// Strips a variant suffix from the first hyphen and a leading `v` when
/// followed by a digit. Tags that are not semver-like become `latest`.
/// The reduction is a fixed point: applying it twice changes nothing.
pub fn truncate_tag(tag: &str) -> String {
    let mut t = tag;
    if let Some(idx) = t.find('-') {
        t = &t[..idx];
    }
    if let Some(rest) = t.strip_prefix('v') {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            t = rest;
        }
    }

    let parts: Vec<&str> = t.split('.').collect();
    if parts.len() == 1 {
        if parts[0].parse::<u64>().is_ok() {
            return parts[0].to_string();
        }
    } else if let (Ok(major), Ok(minor)) = (parts[0].parse::<u64>(), parts[1].parse::<u64>()) {
        if parts.len() > 2 {
            return format!("{major}.{minor}");
        }
        return t.to_string();
    }

    if t != "latest" {
        return "latest".to_string();
    }
    t.to_string()
}

/// Compute the tag for a converted image.
///
/// `target_basename` is the last path segment of the *target* image
/// (post-mapping); the special cases key off hardened-catalog names.
/// `needs_dev_suffix` selects the build-tooling variant, required when
/// the stage contains at least one RUN.
pub fn convert_tag(target_basename: &str, tag: &str, needs_dev_suffix: bool) -> String {
    // chainguard-base only ships :latest, with no -dev variant.
    if target_basename == CHAINGUARD_BASE {
        return "latest".to_string();
    }

    let mut converted = if tag.is_empty() {
        "latest".to_string()
    } else if tag.contains('$') {
        tag.to_string()
    } else if target_basename == "jdk" || target_basename == "jre" {
        // Java image tags carry an openjdk- prefix; strip it before
        // truncation so reconverting our own output is stable.
        truncate_tag(tag.strip_prefix("openjdk-").unwrap_or(tag))
    } else {
        truncate_tag(tag)
    };

    if (target_basename == "jdk" || target_basename == "jre")
        && converted != "latest"
        && converted != "latest-dev"
    {
        converted = format!("openjdk-{converted}");
    }

    if needs_dev_suffix {
        if converted == "latest" {
            converted = DEFAULT_IMAGE_TAG.to_string();
        } else if !converted.ends_with("-dev") {
            converted.push_str("-dev");
        }
    }

    converted
}

/// Assemble the full target reference from the target image and tag.
///
/// `registry`, when set, replaces the default `cgr.dev/<organization>`
/// prefix entirely.
pub fn build_image_reference(
    target_image: &str,
    tag: &str,
    registry: &str,
    organization: &str,
) -> String {
    let new_base = if !registry.is_empty() {
        format!("{registry}/{target_image}")
    } else {
        let org = if organization.is_empty() {
            DEFAULT_ORG
        } else {
            organization
        };
        format!("{DEFAULT_REGISTRY_DOMAIN}/{org}/{target_image}")
    };

    if tag.is_empty() {
        new_base
    } else {
        format!("{new_base}:{tag}")
    }
}
