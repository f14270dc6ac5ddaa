//! `KEY=value` documents that keep comments, blank lines and key order intact
//! across edits. Used for config records and application `.env` files.

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: usize,
    pub text: String,
    pub problem: &'static str,
}

impl fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.problem, self.text)
    }
}

#[derive(Debug, Clone)]
enum DotenvLine {
    Entry {
        key: String,
        value: String,
        line: usize,
        raw: Option<String>,
    },
    Verbatim(String),
}

#[derive(Debug, Clone, Default)]
pub struct DotenvDocument {
    lines: Vec<DotenvLine>,
}

pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_line(raw: &str, line: usize) -> std::result::Result<Option<(String, String)>, MalformedLine> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let malformed = |problem| MalformedLine {
        line,
        text: raw.to_string(),
        problem,
    };

    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = body.split_once('=').ok_or_else(|| malformed("expected KEY=value"))?;
    let key = key.trim();
    if !is_valid_key(key) {
        return Err(malformed("invalid key"));
    }

    Ok(Some((key.to_string(), unquote(value.trim()).ok_or_else(|| malformed("unterminated quote"))?)))
}

fn unquote(value: &str) -> Option<String> {
    if let Some(rest) = value.strip_prefix('"') {
        let inner = rest.strip_suffix('"')?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some(other) => out.push(other),
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        return Some(out);
    }
    if let Some(rest) = value.strip_prefix('\'') {
        return rest.strip_suffix('\'').map(str::to_string);
    }
    Some(value.to_string())
}

fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

impl DotenvDocument {
    /// Parse, rejecting malformed lines.
    pub fn parse(content: &str) -> std::result::Result<Self, MalformedLine> {
        let mut lines = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            match parse_line(raw, line)? {
                Some((key, value)) => lines.push(DotenvLine::Entry {
                    key,
                    value,
                    line,
                    raw: Some(raw.to_string()),
                }),
                None => lines.push(DotenvLine::Verbatim(raw.to_string())),
            }
        }
        Ok(Self { lines })
    }

    /// Parse, keeping malformed lines verbatim. Application `.env` files are
    /// owned by the application and may contain syntax we don't model.
    pub fn parse_lenient(content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(idx, raw)| match parse_line(raw, idx + 1) {
                Ok(Some((key, value))) => DotenvLine::Entry {
                    key,
                    value,
                    line: idx + 1,
                    raw: Some(raw.to_string()),
                },
                _ => DotenvLine::Verbatim(raw.to_string()),
            })
            .collect();
        Self { lines }
    }

    /// Load leniently; a missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = io::read_file(path, &format!("read {}", path.display()))?;
        Ok(Self::parse_lenient(&content))
    }

    pub fn save(&self, path: &Path, mode: u32) -> Result<()> {
        io::write_file_atomic_with_mode(path, &self.render(), mode, &format!("write {}", path.display()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match l {
            DotenvLine::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace the value in place, or append a new entry.
    pub fn set(&mut self, key: &str, value: &str) {
        for l in self.lines.iter_mut().rev() {
            if let DotenvLine::Entry {
                key: k,
                value: v,
                raw,
                ..
            } = l
            {
                if k == key {
                    if v != value {
                        *v = value.to_string();
                        *raw = None;
                    }
                    return;
                }
            }
        }
        let line = self.lines.len() + 1;
        self.lines.push(DotenvLine::Entry {
            key: key.to_string(),
            value: value.to_string(),
            line,
            raw: None,
        });
    }

    /// Returns true when the key was absent and has been added.
    pub fn set_if_absent(&mut self, key: &str, value: &str) -> bool {
        if self.get(key).is_some_and(|v| !v.is_empty()) {
            return false;
        }
        self.set(key, value);
        true
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|l| !matches!(l, DotenvLine::Entry { key: k, .. } if k == key));
        before != self.lines.len()
    }

    /// `(key, value, line)` for every entry, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, usize)> {
        self.lines.iter().filter_map(|l| match l {
            DotenvLine::Entry { key, value, line, .. } => {
                Some((key.as_str(), value.as_str(), *line))
            }
            DotenvLine::Verbatim(_) => None,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for l in &self.lines {
            match l {
                DotenvLine::Entry {
                    raw: Some(raw), ..
                } => out.push_str(raw),
                DotenvLine::Entry { key, value, .. } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote(value));
                }
                DotenvLine::Verbatim(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

/// Convert a strict-parse failure on a named file into a crate error.
pub fn malformed_to_error(path: &Path, err: MalformedLine) -> Error {
    Error::config_unknown_key(
        err.text.split('=').next().unwrap_or_default().trim().to_string(),
        path.display().to_string(),
        err.line,
        err.problem,
    )
}
