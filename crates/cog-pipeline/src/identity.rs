//! Tile identity resolution from source filenames.
//!
//! Product filenames encode the tile index and acquisition time, e.g.
//! `LS_WATER_3577_9_-39_20180506102018_v1.nc`. A [`TileTemplate`] compiles a
//! product's filename template into a pattern and pulls the `(x, y, time)`
//! coordinates back out; [`FilenameTokens`] is the fallback for sources
//! without a configured template.

use std::path::Path;

use regex::Regex;

use crate::error::{PipelineError, Result};

/// Digit-run pattern used for every template placeholder.
const FIELD_PATTERN: &str = "-?[0-9]*";

/// The `(x, y, time)` coordinates identifying one spatial/temporal unit.
///
/// Derived from a filename, never stored; resolving the same filename with
/// the same template always yields the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIdentity {
    /// Tile index easting (may be negative)
    pub x: i64,
    /// Tile index northing (may be negative)
    pub y: i64,
    /// Time token as it appeared in the filename (e.g. `20180506102018`)
    pub time: Option<String>,
}

/// A filename template compiled to a matching pattern.
///
/// Recognized placeholders: `{x}`, `{y}`, `{time}` (captured) and the
/// anonymous `{}` wildcard (matched but not captured). All placeholders match
/// optionally-signed digit runs; everything else in the template is literal.
#[derive(Debug, Clone)]
pub struct TileTemplate {
    template: String,
    pattern: Regex,
    has_time: bool,
}

impl TileTemplate {
    /// Compile a template string into a matcher.
    pub fn compile(template: &str) -> Result<Self> {
        let mut pattern = String::from("^");
        let mut rest = template;
        let mut has_time = false;

        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "unterminated placeholder in template {template:?}"
                ))
            })? + open;

            pattern.push_str(&regex::escape(&rest[..open]));
            match &rest[open..=close] {
                "{x}" => pattern.push_str(&format!("(?P<x>{FIELD_PATTERN})")),
                "{y}" => pattern.push_str(&format!("(?P<y>{FIELD_PATTERN})")),
                "{time}" => {
                    has_time = true;
                    pattern.push_str(&format!("(?P<time>{FIELD_PATTERN})"));
                }
                "{}" => pattern.push_str(&format!("(?:{FIELD_PATTERN})")),
                other => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "unknown placeholder {other} in template {template:?}"
                    )));
                }
            }
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));

        let pattern = Regex::new(&pattern)
            .map_err(|e| PipelineError::InvalidConfig(format!("bad template {template:?}: {e}")))?;

        Ok(Self {
            template: template.to_string(),
            pattern,
            has_time,
        })
    }

    /// Whether the template declares a `{time}` placeholder.
    pub fn has_time(&self) -> bool {
        self.has_time
    }

    /// Resolve the tile identity from a filename.
    ///
    /// Only the base name is matched; any directory components are stripped.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<TileIdentity> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let mismatch = || PipelineError::TemplateMismatch {
            template: self.template.clone(),
            filename: name.to_string(),
        };

        let captures = self.pattern.captures(name).ok_or_else(mismatch)?;

        let field = |key: &str| -> Result<i64> {
            captures
                .name(key)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(mismatch)
        };

        let x = field("x")?;
        let y = field("y")?;
        let time = if self.has_time {
            let t = captures.name("time").ok_or_else(mismatch)?.as_str();
            if t.is_empty() {
                return Err(mismatch());
            }
            Some(t.to_string())
        } else {
            None
        };

        Ok(TileIdentity { x, y, time })
    }
}

/// Tokens recovered from a filename without a configured template.
///
/// The last three underscore-delimited numeric tokens are taken as
/// `(x, y, datetime)`; the datetime token is sliced into its leading
/// year/month/day digits plus whatever time digits remain. Every field is
/// optional: a token or slice that is not present is simply omitted, so
/// callers must tolerate partial time information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameTokens {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub time: Option<String>,
}

impl FilenameTokens {
    /// Extract tokens from a filename (extension and directories stripped).
    pub fn extract(path: impl AsRef<Path>) -> Self {
        let stem = path
            .as_ref()
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let numeric: Vec<&str> = stem
            .split('_')
            .filter(|t| is_numeric_token(t))
            .collect();

        let mut tokens = Self::default();
        if numeric.len() < 3 {
            return tokens;
        }

        tokens.x = numeric[numeric.len() - 3].parse().ok();
        tokens.y = numeric[numeric.len() - 2].parse().ok();

        let datetime = numeric[numeric.len() - 1];
        tokens.year = slice_digits(datetime, 0, 4);
        tokens.month = slice_digits(datetime, 4, 6);
        tokens.day = slice_digits(datetime, 6, 8);
        if datetime.len() > 8 {
            tokens.time = Some(datetime[8..].to_string());
        }
        tokens
    }
}

fn is_numeric_token(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn slice_digits(token: &str, start: usize, end: usize) -> Option<String> {
    token.get(start..end).map(|s| s.to_string())
}
