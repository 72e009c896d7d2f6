// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parser for os-release files.
//!
//! os-release files are written to be sourced by a POSIX shell. Rather
//! than running a shell, this implements the subset of shell syntax
//! that os-release files use in practice:
//!
//! * `KEY=value` assignments, optionally prefixed with `export`
//! * bare words, with backslash escapes
//! * single-quoted strings, taken literally
//! * double-quoted strings, with backslash escapes for `$`, `` ` ``,
//!   `"` and `\`
//! * `$NAME` and `${NAME}` expansion of previously assigned keys
//! * blank lines and `#` comments
//!
//! Anything else, in particular command substitution, is rejected.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fs_err as fs;
use log::info;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// Values used for keys that are unset or empty.
const DEFAULTS: [(&str, &str); 3] = [
    ("ID", "linux"),
    ("NAME", "Linux"),
    ("PRETTY_NAME", "Linux"),
];

fn default_value(key: &str) -> Option<&'static str> {
    DEFAULTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// One-based line number.
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("expected KEY=value")]
    MissingEquals,

    #[error("invalid variable name {0:?}")]
    InvalidName(String),

    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("trailing backslash")]
    TrailingBackslash,

    #[error("command substitution is not supported")]
    CommandSubstitution,

    #[error("unsupported parameter expansion")]
    InvalidExpansion,

    #[error("unquoted {0:?} is not supported")]
    UnquotedSpecial(char),

    #[error("unexpected text after value: {0:?}")]
    TrailingText(String),
}

use ParseErrorKind::*;

/// Contents of an os-release file.
#[derive(Debug, Default)]
pub struct OsRelease {
    /// Source line of each assignment, without any `export` prefix. A
    /// later assignment to the same key replaces the earlier one, as it
    /// would in the shell.
    lines: HashMap<String, String>,

    /// Expanded value of each key.
    values: HashMap<String, String>,
}

impl OsRelease {
    /// Read the first file in `candidates` that exists. If none of them
    /// exist, an empty `OsRelease` is returned so that every lookup
    /// falls back to the defaults.
    pub fn load(candidates: &[Utf8PathBuf]) -> Result<Self> {
        let Some(path) = candidates.iter().find(|path| path.exists()) else {
            info!("no os-release file found, using defaults");
            return Ok(Self::default());
        };

        info!("reading {path}");
        let src = fs::read_to_string(path)?;
        Self::parse(&src).with_context(|| format!("failed to parse {path}"))
    }

    pub fn parse(src: &str) -> Result<Self, ParseError> {
        let mut os_release = Self::default();

        for (index, line) in src.lines().enumerate() {
            let err = |kind| ParseError {
                line: index + 1,
                kind,
            };

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let assignment = line
                .strip_prefix("export ")
                .map(str::trim_start)
                .unwrap_or(line);
            let (name, value) = assignment.split_once('=').ok_or_else(|| err(MissingEquals))?;
            if !is_valid_name(name) {
                return Err(err(InvalidName(name.to_owned())));
            }

            let value = expand_value(value, &os_release.values).map_err(err)?;
            os_release
                .lines
                .insert(name.to_owned(), assignment.to_owned());
            os_release.values.insert(name.to_owned(), value);
        }

        Ok(os_release)
    }

    /// Get the value of `key`. If the key is unset or empty, the
    /// built-in default is returned, or `None` for keys without a
    /// default.
    pub fn value(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(value) if !value.is_empty() => Some(value.as_str()),
            _ => default_value(key),
        }
    }

    /// Get the `KEY=value` line for `key`, as written in the source
    /// apart from surrounding whitespace and `export`. If the key was
    /// not assigned, a line with the built-in default is returned, or
    /// `None` for keys without a default.
    pub fn line(&self, key: &str) -> Option<String> {
        if let Some(line) = self.lines.get(key) {
            return Some(line.clone());
        }
        default_value(key).map(|value| format!("{key}={value}"))
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

/// Expand the right-hand side of an assignment. `vars` holds the keys
/// assigned on earlier lines.
fn expand_value(src: &str, vars: &HashMap<String, String>) -> Result<String, ParseErrorKind> {
    let mut out = String::new();
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(c) => out.push(c),
                    None => return Err(UnterminatedQuote('\'')),
                }
            },
            '"' => loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c @ ('$' | '`' | '"' | '\\')) => out.push(c),
                        // Other backslashes are kept as-is.
                        Some(c) => {
                            out.push('\\');
                            out.push(c);
                        }
                        None => return Err(UnterminatedQuote('"')),
                    },
                    Some('$') => expand_parameter(&mut chars, vars, &mut out)?,
                    Some('`') => return Err(CommandSubstitution),
                    Some(c) => out.push(c),
                    None => return Err(UnterminatedQuote('"')),
                }
            },
            '\\' => out.push(chars.next().ok_or(TrailingBackslash)?),
            '$' => expand_parameter(&mut chars, vars, &mut out)?,
            '`' => return Err(CommandSubstitution),
            ';' | '&' | '|' | '<' | '>' | '(' | ')' => return Err(UnquotedSpecial(c)),
            c if c.is_whitespace() => {
                // Unquoted whitespace ends the value. Only a comment may
                // follow.
                let rest: String = chars.by_ref().collect();
                let rest = rest.trim_start();
                if rest.is_empty() || rest.starts_with('#') {
                    break;
                }
                return Err(TrailingText(rest.to_owned()));
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Expand a parameter reference. The leading `$` has already been
/// consumed. Unset keys expand to an empty string.
fn expand_parameter(
    chars: &mut Peekable<Chars>,
    vars: &HashMap<String, String>,
    out: &mut String,
) -> Result<(), ParseErrorKind> {
    let mut name = String::new();

    match chars.peek() {
        Some('(') => return Err(CommandSubstitution),
        Some('{') => {
            chars.next();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => return Err(InvalidExpansion),
                }
            }
            // Rejects `${NAME:-default}` and friends.
            if !is_valid_name(&name) {
                return Err(InvalidExpansion);
            }
        }
        Some(&c) if is_name_start(c) => {
            while let Some(&c) = chars.peek() {
                if !is_name_char(c) {
                    break;
                }
                name.push(c);
                chars.next();
            }
        }
        // A `$` not followed by a name is literal.
        _ => {
            out.push('$');
            return Ok(());
        }
    }

    if let Some(value) = vars.get(&name) {
        out.push_str(value);
    }
    Ok(())
}
