//! Dockerfile model and structure-preserving parser
//!
//! The parser splits a Dockerfile into logical instructions, keeping
//! comments and blank lines verbatim in the `extra` field of the line
//! that follows them, so that reserializing an unparsed document is
//! byte-identical to its source. Only `FROM`, `ARG`, and `RUN` receive
//! structured payloads; every other directive is carried opaquely.
//!
//! The parser is total: it never fails, no matter the input.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::packages::{Distro, Manager};
use crate::shell::ShellCommand;

/// Dockerfile directives the converter cares about
pub const DIRECTIVE_FROM: &str = "FROM";
pub const DIRECTIVE_RUN: &str = "RUN";
pub const DIRECTIVE_ARG: &str = "ARG";
pub const DIRECTIVE_USER: &str = "USER";
pub const KEYWORD_AS: &str = "AS";

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// Details of a `FROM` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FromDetails {
    /// Registry path without tag or digest.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Pinned digest (`sha256:…`), if any.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest: String,
    /// Stage alias from `AS <name>`, original case preserved.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,
    /// Stage index of the referenced earlier stage, 0 when none.
    #[serde(skip_serializing_if = "is_zero")]
    pub parent: usize,
    /// True when the base contains a `$` variable reference.
    #[serde(skip_serializing_if = "is_false")]
    pub base_dynamic: bool,
    /// True when the tag contains a `$` variable reference.
    #[serde(skip_serializing_if = "is_false")]
    pub tag_dynamic: bool,
    /// Original full image reference before parsing.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub orig: String,
    /// Options such as `--platform=…` that preceded the image reference.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Details of an `ARG` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgDetails {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_value: String,
    /// True when a later `FROM` references `$NAME` or `${NAME}`.
    #[serde(skip_serializing_if = "is_false")]
    pub used_as_base: bool,
}

/// Parsed shell pipelines of a `RUN` directive, before and after
/// conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunShell {
    pub before: ShellCommand,
    pub after: Option<ShellCommand>,
}

/// Details of a `RUN` directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<Distro>,
    /// Set iff a package-manager install command was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<Manager>,
    /// Source package names observed, sorted and deduplicated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(skip)]
    pub shell: RunShell,
}

/// One logical line of a Dockerfile.
///
/// `raw` holds the original instruction text (spanning continuation
/// lines); `extra` holds the comments and blank lines that preceded it;
/// `converted`, when non-empty, replaces `raw` on output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerfileLine {
    pub raw: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub converted: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extra: String,
    /// 1-based stage index; 0 before the first `FROM`.
    #[serde(skip_serializing_if = "is_zero")]
    pub stage: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<FromDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<ArgDetails>,
}

/// A parsed Dockerfile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dockerfile {
    pub lines: Vec<DockerfileLine>,
}

impl Dockerfile {
    /// Parse Dockerfile text into a structured representation.
    ///
    /// Never fails; directives the converter does not model become opaque
    /// lines carrying only `raw`, `extra`, and `stage`.
    pub fn parse(content: &str) -> Dockerfile {
        let mut parser = Parser::default();
        for line in content.split('\n') {
            parser.feed(line);
        }
        parser.finish()
    }
}

impl fmt::Display for Dockerfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            if !line.extra.is_empty() {
                f.write_str(&line.extra)?;
            }
            if !line.converted.is_empty() {
                f.write_str(&line.converted)?;
                f.write_str("\n")?;
            } else if !line.raw.is_empty() {
                f.write_str(&line.raw)?;
                if i < last {
                    f.write_str("\n")?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Parser {
    lines: Vec<DockerfileLine>,
    extra: String,
    current: String,
    in_multi: bool,
    stage: usize,
    /// Case-folded alias -> stage index.
    aliases: HashMap<String, usize>,
}

impl Parser {
    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();
        let blank = trimmed.is_empty();
        let comment = trimmed.starts_with('#');

        if !self.in_multi {
            if blank || comment {
                self.extra.push_str(line);
                self.extra.push('\n');
                return;
            }
            if trimmed.ends_with('\\') {
                self.in_multi = true;
                self.current.push_str(line);
                self.current.push('\n');
            } else {
                self.current.push_str(line);
                self.emit();
            }
        } else {
            if blank {
                return;
            }
            if comment {
                // Comment lines inside a continuation belong to the
                // instruction so round-tripping stays byte-identical.
                self.current.push_str(line);
                self.current.push('\n');
                return;
            }
            self.current.push_str(line);
            if trimmed.ends_with('\\') {
                self.current.push('\n');
            } else {
                self.in_multi = false;
                self.emit();
            }
        }
    }

    fn finish(mut self) -> Dockerfile {
        if self.in_multi {
            self.emit();
        }
        if !self.extra.is_empty() {
            let trailing = self
                .extra
                .strip_suffix('\n')
                .unwrap_or(&self.extra)
                .to_string();
            self.lines.push(DockerfileLine {
                raw: trailing,
                ..Default::default()
            });
        }
        Dockerfile { lines: self.lines }
    }

    fn emit(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let instruction = std::mem::take(&mut self.current);
        let trimmed = instruction.trim();

        let mut line = DockerfileLine {
            raw: instruction.clone(),
            extra: std::mem::take(&mut self.extra),
            stage: self.stage,
            ..Default::default()
        };

        if let Some(rest) = strip_directive(trimmed, DIRECTIVE_FROM) {
            self.stage += 1;
            line.stage = self.stage;
            line.from = Some(self.parse_from(rest));
        } else if let Some(rest) = strip_directive(trimmed, DIRECTIVE_ARG) {
            line.arg = Some(parse_arg(rest));
        } else if let Some(rest) = strip_directive(trimmed, DIRECTIVE_RUN) {
            line.run = Some(RunDetails {
                shell: RunShell {
                    before: ShellCommand::parse(rest),
                    after: None,
                },
                ..Default::default()
            });
        }

        self.lines.push(line);
    }

    fn parse_from(&mut self, rest: &str) -> FromDetails {
        // Options such as --platform come before the image reference.
        let mut flags: Vec<String> = Vec::new();
        let mut remainder = rest.trim();
        while let Some(token) = remainder.split_whitespace().next() {
            if !token.starts_with("--") {
                break;
            }
            flags.push(token.to_string());
            remainder = remainder[token.len()..].trim_start();
        }

        let mut alias = String::new();
        let mut image_part = remainder;
        if let Some(idx) = find_case_insensitive(remainder, " AS ") {
            alias = remainder[idx + 4..].trim().to_string();
            image_part = remainder[..idx].trim_end();
        }

        let orig = image_part.to_string();

        let mut reference = image_part;
        let mut digest = String::new();
        if let Some((before, after)) = reference.split_once('@') {
            reference = before;
            digest = after.to_string();
        }

        let (base, tag) = match reference.split_once(':') {
            Some((base, tag)) => (base.to_string(), tag.to_string()),
            None => (reference.to_string(), String::new()),
        };

        if !alias.is_empty() {
            self.aliases.insert(alias.to_lowercase(), self.stage);
        }
        let parent = self
            .aliases
            .get(&base.to_lowercase())
            .copied()
            .unwrap_or(0);

        FromDetails {
            base_dynamic: base.contains('$'),
            tag_dynamic: tag.contains('$'),
            base,
            tag,
            digest,
            alias,
            parent,
            orig,
            flags,
        }
    }
}

fn parse_arg(rest: &str) -> ArgDetails {
    match rest.split_once('=') {
        Some((name, default_value)) => ArgDetails {
            name: name.trim().to_string(),
            default_value: default_value.trim().to_string(),
            used_as_base: false,
        },
        None => ArgDetails {
            name: rest.trim().to_string(),
            default_value: String::new(),
            used_as_base: false,
        },
    }
}

/// Strip a case-insensitive directive keyword plus the whitespace after
/// it, returning the trimmed remainder.
pub(crate) fn strip_directive<'a>(instruction: &'a str, directive: &str) -> Option<&'a str> {
    let n = directive.len();
    if instruction.len() <= n || !instruction.is_char_boundary(n) {
        return None;
    }
    if !instruction[..n].eq_ignore_ascii_case(directive) {
        return None;
    }
    let rest = &instruction[n..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some(rest.trim_start())
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let n = needle.len();
    if n == 0 || haystack.len() < n {
        return None;
    }
    (0..=haystack.len() - n).find(|&i| {
        haystack.is_char_boundary(i)
            && haystack.is_char_boundary(i + n)
            && haystack[i..i + n].eq_ignore_ascii_case(needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trips(source: &str) {
        let parsed = Dockerfile::parse(source);
        assert_eq!(parsed.to_string(), source, "round-trip mismatch");
    }

    #[test]
    fn test_round_trip_simple() {
        round_trips("FROM alpine:3.19\nRUN apk add curl\nCMD [\"sh\"]");
    }

    #[test]
    fn test_round_trip_comments_and_blanks() {
        round_trips("# syntax comment\n\nFROM debian:12\n\n# install\nRUN apt-get update\n");
    }

    #[test]
    fn test_round_trip_multiline_run() {
        round_trips("FROM ubuntu\nRUN apt-get update && \\\n    apt-get install -y curl \\\n    vim\n");
    }

    #[test]
    fn test_round_trip_comment_inside_continuation() {
        round_trips("RUN echo one && \\\n# interlude\n    echo two");
    }

    #[test]
    fn test_round_trip_trailing_comment() {
        round_trips("FROM scratch\n# the end");
    }

    #[test]
    fn test_empty_input() {
        let parsed = Dockerfile::parse("");
        assert_eq!(parsed.to_string(), "");
    }

    #[test]
    fn test_trailing_backslash_at_eof() {
        let parsed = Dockerfile::parse("RUN echo hi \\\n");
        assert_eq!(parsed.lines.len(), 1);
        assert!(parsed.lines[0].raw.ends_with("\\\n"));
    }

    #[test]
    fn test_stage_numbering() {
        let parsed = Dockerfile::parse(
            "ARG VERSION=1\nFROM golang:1.23 AS build\nRUN make\nFROM alpine\nCOPY --from=build /a /a",
        );
        let stages: Vec<usize> = parsed.lines.iter().map(|l| l.stage).collect();
        assert_eq!(stages, vec![0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_from_parsing_with_tag_digest_alias() {
        let parsed = Dockerfile::parse("FROM python:3.9-slim@sha256:123456abcdef AS base");
        let from = parsed.lines[0].from.as_ref().unwrap();
        assert_eq!(from.base, "python");
        assert_eq!(from.tag, "3.9-slim");
        assert_eq!(from.digest, "sha256:123456abcdef");
        assert_eq!(from.alias, "base");
        assert_eq!(from.orig, "python:3.9-slim@sha256:123456abcdef");
        assert_eq!(from.parent, 0);
    }

    #[test]
    fn test_from_alias_mixed_case() {
        let parsed = Dockerfile::parse("FROM alpine As Builder\nFROM BUILDER");
        let first = parsed.lines[0].from.as_ref().unwrap();
        assert_eq!(first.alias, "Builder");
        let second = parsed.lines[1].from.as_ref().unwrap();
        assert_eq!(second.parent, 1);
    }

    #[test]
    fn test_from_unknown_alias_has_no_parent() {
        let parsed = Dockerfile::parse("FROM alpine AS base\nFROM other");
        assert_eq!(parsed.lines[1].from.as_ref().unwrap().parent, 0);
    }

    #[test]
    fn test_from_platform_flag() {
        let parsed = Dockerfile::parse("FROM --platform=linux/amd64 golang:1.23.8-bookworm AS build");
        let from = parsed.lines[0].from.as_ref().unwrap();
        assert_eq!(from.flags, vec!["--platform=linux/amd64"]);
        assert_eq!(from.base, "golang");
        assert_eq!(from.tag, "1.23.8-bookworm");
        assert_eq!(from.alias, "build");
    }

    #[test]
    fn test_from_dynamic_base() {
        let parsed = Dockerfile::parse("FROM $BASE");
        let from = parsed.lines[0].from.as_ref().unwrap();
        assert!(from.base_dynamic);
        assert_eq!(from.parent, 0);

        let parsed = Dockerfile::parse("FROM python:${TAG}");
        let from = parsed.lines[0].from.as_ref().unwrap();
        assert!(!from.base_dynamic);
        assert!(from.tag_dynamic);
    }

    #[test]
    fn test_arg_parsing() {
        let parsed = Dockerfile::parse("ARG BASE_IMAGE=node:18\nARG PLAIN");
        let first = parsed.lines[0].arg.as_ref().unwrap();
        assert_eq!(first.name, "BASE_IMAGE");
        assert_eq!(first.default_value, "node:18");
        let second = parsed.lines[1].arg.as_ref().unwrap();
        assert_eq!(second.name, "PLAIN");
        assert_eq!(second.default_value, "");
    }

    #[test]
    fn test_run_shell_attached() {
        let parsed = Dockerfile::parse("RUN apt-get update && apt-get install -y nginx");
        let run = parsed.lines[0].run.as_ref().unwrap();
        assert_eq!(run.shell.before.parts.len(), 2);
        assert_eq!(run.shell.before.parts[0].command, "apt-get");
        assert!(run.shell.after.is_none());
        assert!(run.manager.is_none());
    }

    #[test]
    fn test_lowercase_directives_recognized() {
        let parsed = Dockerfile::parse("from alpine\nrun echo hi\narg X=1");
        assert!(parsed.lines[0].from.is_some());
        assert!(parsed.lines[1].run.is_some());
        assert!(parsed.lines[2].arg.is_some());
    }

    #[test]
    fn test_opaque_directives_untouched() {
        let parsed = Dockerfile::parse("WORKDIR /app\nENV FOO=bar\nCOPY . .");
        for line in &parsed.lines {
            assert!(line.from.is_none());
            assert!(line.run.is_none());
            assert!(line.arg.is_none());
        }
    }

    #[test]
    fn test_extra_attached_to_following_instruction() {
        let parsed = Dockerfile::parse("# comment\nRUN echo hello world\n# trailing");
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0].extra, "# comment\n");
        assert_eq!(parsed.lines[0].raw, "RUN echo hello world");
        assert_eq!(parsed.lines[1].raw, "# trailing");
    }

    #[test]
    fn test_serialize_json_shape() {
        let parsed = Dockerfile::parse("FROM python:3.9");
        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["lines"][0]["raw"], "FROM python:3.9");
        assert_eq!(json["lines"][0]["stage"], 1);
        assert_eq!(json["lines"][0]["from"]["base"], "python");
        assert_eq!(json["lines"][0]["from"]["tag"], "3.9");
        // Empty and false fields are omitted.
        assert!(json["lines"][0]["from"].get("digest").is_none());
        assert!(json["lines"][0]["from"].get("baseDynamic").is_none());
        assert!(json["lines"][0].get("converted").is_none());
    }
}
