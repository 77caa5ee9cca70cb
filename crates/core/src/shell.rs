//! Shell command model and parser
//!
//! A `RUN` directive body is decomposed into an ordered list of simple
//! commands joined by shell control operators (`&&`, `||`, `;`, `|`, `&`).
//! The parser understands backslash-newline continuations and comment lines
//! interposed between continuations, preserving them as leading "extra"
//! text on the following part so nothing from the source is lost.
//!
//! Serialization normalizes to one logical command per physical line with
//! a backslash continuation and a four-space indent, which is the shape
//! emitted for rewritten `RUN` directives.

use serde::Serialize;
use std::fmt;

/// A single simple command within a shell pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellPart {
    /// Whitespace, continuations, and comment lines that preceded this part.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extra_pre: String,
    /// The command word (first token).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Arguments in order; quoted tokens keep their quotes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// The operator joining this part to the next; empty on the last part.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub delimiter: String,
}

/// An ordered sequence of [`ShellPart`]s making up one shell command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommand {
    pub parts: Vec<ShellPart>,
}

impl ShellCommand {
    /// Parse a (possibly line-continued) shell string into parts.
    ///
    /// Control operators are only recognized at the top level, never inside
    /// single or double quotes. `&&` and `||` win over `&` and `|` in
    /// lookahead. The parser is total: arbitrary text produces a best-effort
    /// decomposition rather than an error.
    pub fn parse(input: &str) -> ShellCommand {
        Lexer::new(input).run()
    }

    /// True when there are no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for ShellCommand {
    /// Render one logical command per physical line, continuation-joined.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.parts.len().saturating_sub(1);
        for (i, part) in self.parts.iter().enumerate() {
            if !part.command.is_empty() {
                f.write_str(&part.command)?;
            }
            for arg in &part.args {
                if !part.command.is_empty() || !arg.is_empty() {
                    f.write_str(" ")?;
                }
                f.write_str(arg)?;
            }
            if !part.delimiter.is_empty() {
                f.write_str(" ")?;
                f.write_str(&part.delimiter)?;
            }
            if i < last {
                f.write_str(" \\\n    ")?;
            }
        }
        Ok(())
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    /// Pending whitespace/comments since the last delimiter or token.
    pending: String,
    /// Tokens of the part currently being assembled.
    tokens: Vec<String>,
    /// Extra text captured before the current part's first token.
    part_extra: String,
    parts: Vec<ShellPart>,
    /// Whether a token has been seen since the last newline (comment gate).
    line_has_token: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            pending: String::new(),
            tokens: Vec::new(),
            part_extra: String::new(),
            parts: Vec::new(),
            line_has_token: false,
        }
    }

    fn run(mut self) -> ShellCommand {
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' => {
                    self.chars.next();
                    self.pending.push(c);
                }
                '\n' => {
                    self.chars.next();
                    self.pending.push(c);
                    self.line_has_token = false;
                }
                '\\' => {
                    // Backslash-newline is a continuation; anything else
                    // starts a token.
                    let mut probe = self.chars.clone();
                    probe.next();
                    if probe.peek() == Some(&'\n') {
                        self.chars.next();
                        self.chars.next();
                        self.pending.push('\\');
                        self.pending.push('\n');
                        self.line_has_token = false;
                    } else {
                        self.read_token();
                    }
                }
                '#' if !self.line_has_token => {
                    // Comment line inside a continuation: swallow to EOL.
                    while let Some(&cc) = self.chars.peek() {
                        if cc == '\n' {
                            break;
                        }
                        self.chars.next();
                        self.pending.push(cc);
                    }
                }
                '&' | '|' | ';' => {
                    self.chars.next();
                    let next = self.chars.peek().copied();
                    let delim = match (c, next) {
                        ('&', Some('&')) => {
                            self.chars.next();
                            "&&"
                        }
                        ('|', Some('|')) => {
                            self.chars.next();
                            "||"
                        }
                        ('&', _) => "&",
                        ('|', _) => "|",
                        _ => ";",
                    };
                    self.finish_part(delim);
                }
                _ => self.read_token(),
            }
        }
        self.finish_part("");
        ShellCommand { parts: self.parts }
    }

    /// Consume one token, honoring quotes and escapes.
    fn read_token(&mut self) {
        if self.tokens.is_empty() {
            // Only continuations and comments are worth keeping as extra
            // text; plain spacing between tokens is not.
            let pending = std::mem::take(&mut self.pending);
            if pending.contains('\n') {
                self.part_extra = pending;
            }
        } else {
            self.pending.clear();
        }
        self.line_has_token = true;

        let mut token = String::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\n' | '&' | '|' | ';' => break,
                '\'' => {
                    self.chars.next();
                    token.push('\'');
                    for cc in self.chars.by_ref() {
                        token.push(cc);
                        if cc == '\'' {
                            break;
                        }
                    }
                }
                '"' => {
                    self.chars.next();
                    token.push('"');
                    let mut escaped = false;
                    for cc in self.chars.by_ref() {
                        token.push(cc);
                        if escaped {
                            escaped = false;
                        } else if cc == '\\' {
                            escaped = true;
                        } else if cc == '"' {
                            break;
                        }
                    }
                }
                '\\' => {
                    let mut probe = self.chars.clone();
                    probe.next();
                    match probe.peek() {
                        // Continuation ends the token.
                        Some('\n') => break,
                        // A dangling backslash at end of input is literal.
                        None => {
                            self.chars.next();
                            token.push('\\');
                        }
                        Some(&escaped) => {
                            self.chars.next();
                            self.chars.next();
                            token.push('\\');
                            token.push(escaped);
                        }
                    }
                }
                _ => {
                    self.chars.next();
                    token.push(c);
                }
            }
        }
        if !token.is_empty() {
            self.tokens.push(token);
        }
    }

    fn finish_part(&mut self, delimiter: &str) {
        if self.tokens.is_empty() && delimiter.is_empty() {
            return;
        }
        let mut tokens = std::mem::take(&mut self.tokens).into_iter();
        let command = tokens.next().unwrap_or_default();
        self.parts.push(ShellPart {
            extra_pre: std::mem::take(&mut self.part_extra),
            command,
            args: tokens.collect(),
            delimiter: delimiter.to_string(),
        });
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(command: &str, args: &[&str], delimiter: &str) -> ShellPart {
        ShellPart {
            extra_pre: String::new(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            delimiter: delimiter.to_string(),
        }
    }

    #[test]
    fn test_parse_single_command() {
        let cmd = ShellCommand::parse("echo hello world");
        assert_eq!(
            cmd.parts,
            vec![part("echo", &["hello", "world"], "")]
        );
    }

    #[test]
    fn test_parse_and_chain() {
        let cmd = ShellCommand::parse("apt-get update && apt-get install -y nginx");
        assert_eq!(
            cmd.parts,
            vec![
                part("apt-get", &["update"], "&&"),
                part("apt-get", &["install", "-y", "nginx"], ""),
            ]
        );
    }

    #[test]
    fn test_parse_all_delimiters() {
        let cmd = ShellCommand::parse("a ; b | c || d & e && f");
        let delims: Vec<&str> = cmd.parts.iter().map(|p| p.delimiter.as_str()).collect();
        assert_eq!(delims, vec![";", "|", "||", "&", "&&", ""]);
        let commands: Vec<&str> = cmd.parts.iter().map(|p| p.command.as_str()).collect();
        assert_eq!(commands, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_delimiters_inside_quotes_are_literal() {
        let cmd = ShellCommand::parse(r#"echo "a && b" && echo 'c ; d'"#);
        assert_eq!(
            cmd.parts,
            vec![
                part("echo", &[r#""a && b""#], "&&"),
                part("echo", &["'c ; d'"], ""),
            ]
        );
    }

    #[test]
    fn test_quoted_tokens_keep_quotes() {
        let cmd = ShellCommand::parse(r#"sh -c "apt-get update""#);
        assert_eq!(cmd.parts[0].args, vec!["-c", r#""apt-get update""#]);
    }

    #[test]
    fn test_line_continuation_is_whitespace() {
        let cmd = ShellCommand::parse("apt-get update && \\\n    apt-get install -y nginx");
        assert_eq!(cmd.parts.len(), 2);
        assert_eq!(cmd.parts[0].command, "apt-get");
        assert_eq!(cmd.parts[1].command, "apt-get");
        assert_eq!(cmd.parts[1].args, vec!["install", "-y", "nginx"]);
        assert_eq!(cmd.parts[1].extra_pre, " \\\n    ");
    }

    #[test]
    fn test_comment_between_continuations() {
        let cmd = ShellCommand::parse("echo one && \\\n# note\necho two");
        assert_eq!(cmd.parts.len(), 2);
        assert_eq!(cmd.parts[1].command, "echo");
        assert_eq!(cmd.parts[1].args, vec!["two"]);
        assert!(cmd.parts[1].extra_pre.contains("# note"));
    }

    #[test]
    fn test_hash_inside_token_is_not_comment() {
        let cmd = ShellCommand::parse("echo foo#bar");
        assert_eq!(cmd.parts[0].args, vec!["foo#bar"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(ShellCommand::parse("").is_empty());
        assert!(ShellCommand::parse("   \t  ").is_empty());
    }

    #[test]
    fn test_display_single_part() {
        let cmd = ShellCommand {
            parts: vec![part("apk", &["add", "-U", "nginx"], "")],
        };
        assert_eq!(cmd.to_string(), "apk add -U nginx");
    }

    #[test]
    fn test_display_multi_part_continuations() {
        let cmd = ShellCommand {
            parts: vec![
                part("echo", &["hello"], ";"),
                part("apk", &["add", "-U", "curl", "nginx", "vim"], "&&"),
                part("echo", &["goodbye"], ""),
            ],
        };
        assert_eq!(
            cmd.to_string(),
            "echo hello ; \\\n    apk add -U curl nginx vim && \\\n    echo goodbye"
        );
    }

    #[test]
    fn test_parse_display_parse_is_stable() {
        let first = ShellCommand::parse("echo hi; apt-get update &&  apt-get   install -y curl");
        let rendered = first.to_string();
        let second = ShellCommand::parse(&rendered);
        // Normalization is a fixed point apart from extra_pre bookkeeping.
        let strip = |cmd: &ShellCommand| {
            cmd.parts
                .iter()
                .map(|p| (p.command.clone(), p.args.clone(), p.delimiter.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first), strip(&second));
        assert_eq!(rendered, second.to_string());
    }
}
