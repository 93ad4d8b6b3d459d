//! Include/exclude filter rules.
//!
//! Rules come from a plain-text file on the drive, one per line:
//! `<pattern>[TAB<mode>]`. Blank lines and `#` comments are skipped.
//! A `!` prefix negates the pattern, mode defaults to `both`.
//!
//! Evaluation is first-match-wins in file order: a negated match excludes
//! the path outright, no match at all excludes it by default.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Which destination layout(s) a matched file is copied into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Organized,
    Shuffled,
    Both,
}

impl Mode {
    pub fn organized(self) -> bool {
        !matches!(self, Mode::Shuffled)
    }

    pub fn shuffled(self) -> bool {
        !matches!(self, Mode::Organized)
    }
}

/// A single compiled rule from the include file.
#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
    mode: Mode,
}

/// An ordered list of compiled rules.
#[derive(Debug)]
pub struct FilterSet {
    rules: Vec<Rule>,
}

// `*` must stay inside one path component so that only `**` can cross
// directory levels (e.g. `Artist/**` matches any depth under `Artist/`).
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl FilterSet {
    /// Compile the contents of a rule file.
    ///
    /// Returns a `Config` error for any line with more than two
    /// tab-separated fields, an unknown mode token, or an invalid pattern.
    pub fn parse(text: &str) -> Result<FilterSet> {
        let mut rules = Vec::new();

        for (num, raw) in text.lines().enumerate() {
            let line = num + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() > 2 {
                return Err(SyncError::Config {
                    line,
                    message: format!("expected at most 2 fields, got {}", fields.len()),
                });
            }

            let mode = match fields.get(1).copied() {
                None => Mode::Both,
                Some("both") => Mode::Both,
                Some("organized") => Mode::Organized,
                Some("shuffled") => Mode::Shuffled,
                Some(other) => {
                    return Err(SyncError::Config {
                        line,
                        message: format!("unknown mode {:?}", other),
                    })
                }
            };

            let (glob_text, negated) = match fields[0].strip_prefix('!') {
                Some(rest) => (rest, true),
                None => (fields[0], false),
            };

            let pattern = Pattern::new(glob_text).map_err(|e| SyncError::Config {
                line,
                message: format!("bad pattern {:?}: {}", glob_text, e),
            })?;

            debug!("loading filter {}", fields[0]);
            rules.push(Rule {
                pattern,
                negated,
                mode,
            });
        }

        Ok(FilterSet { rules })
    }

    /// Evaluate a path relative to the library root against the rules.
    ///
    /// Returns the mode of the first matching rule, or `None` when the
    /// first match is negated or no rule matches.
    pub fn evaluate(&self, relative: &Path) -> Option<Mode> {
        for rule in &self.rules {
            if rule.pattern.matches_path_with(relative, MATCH_OPTIONS) {
                if rule.negated {
                    return None;
                }
                return Some(rule.mode);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
