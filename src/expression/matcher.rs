// src/expression/matcher.rs

use std::fmt;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;

use crate::errors::{Result, WatchError};
use crate::expression::Expression;

/// Which part of the path a glob is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScope {
    /// Final path segment only.
    #[default]
    Basename,
    /// The full relative path.
    Wholename,
}

impl fmt::Display for MatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchScope::Basename => f.write_str("basename"),
            MatchScope::Wholename => f.write_str("wholename"),
        }
    }
}

/// Compiled glob used by [`Expression::Match`].
///
/// `*` never crosses a `/`, `**` does, braces and bracket classes are
/// supported and dotfiles are matched like any other name.
#[derive(Clone)]
pub struct GlobPattern {
    pattern: String,
    case_sensitive: bool,
    scope: MatchScope,
    matcher: GlobMatcher,
}

impl GlobPattern {
    pub fn new(pattern: &str, case_sensitive: bool, scope: MatchScope) -> Result<Self> {
        let source = if case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        };

        let glob = GlobBuilder::new(&source)
            .literal_separator(true)
            .build()
            .map_err(|e| WatchError::InvalidExpression(format!("invalid glob '{pattern}': {e}")))?;

        Ok(Self {
            pattern: pattern.to_string(),
            case_sensitive,
            scope,
            matcher: glob.compile_matcher(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn scope(&self) -> MatchScope {
        self.scope
    }

    fn is_match(&self, rel_path: &str) -> bool {
        let subject = match self.scope {
            MatchScope::Basename => basename(rel_path),
            MatchScope::Wholename => rel_path,
        };

        if self.case_sensitive {
            self.matcher.is_match(subject)
        } else {
            self.matcher.is_match(subject.to_lowercase())
        }
    }
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobPattern")
            .field("pattern", &self.pattern)
            .field("case_sensitive", &self.case_sensitive)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.case_sensitive == other.case_sensitive
            && self.scope == other.scope
    }
}

/// Directory segment pattern used by [`Expression::DirName`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPattern {
    pattern: String,
    case_sensitive: bool,
    /// `/pattern/`, pre-lowered for the case-insensitive variant.
    needle: String,
}

impl DirPattern {
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self> {
        if pattern.is_empty() {
            return Err(WatchError::InvalidExpression(
                "dirname pattern must not be empty".to_string(),
            ));
        }
        if pattern.starts_with('/') || pattern.ends_with('/') {
            return Err(WatchError::InvalidExpression(format!(
                "dirname pattern '{pattern}' must not start or end with '/'"
            )));
        }

        let needle = if case_sensitive {
            format!("/{pattern}/")
        } else {
            format!("/{}/", pattern.to_lowercase())
        };

        Ok(Self {
            pattern: pattern.to_string(),
            case_sensitive,
            needle,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn is_match(&self, rel_path: &str) -> bool {
        // Wrap in separators so matches only land on segment boundaries.
        let haystack = format!("/{}/", dirname(rel_path));
        if self.case_sensitive {
            haystack.contains(&self.needle)
        } else {
            haystack.to_lowercase().contains(&self.needle)
        }
    }
}

impl Expression {
    /// Evaluate this expression against a path relative to the project root.
    ///
    /// Fails with `InvalidArgument` if `rel_path` is absolute.
    pub fn evaluate(&self, rel_path: &str) -> Result<bool> {
        if rel_path.starts_with('/') || Path::new(rel_path).is_absolute() {
            return Err(WatchError::InvalidArgument(format!(
                "expected a path relative to the project root, got '{rel_path}'"
            )));
        }
        Ok(self.test(rel_path))
    }

    fn test(&self, rel_path: &str) -> bool {
        match self {
            Expression::AllOf(children) => children.iter().all(|c| c.test(rel_path)),
            Expression::AnyOf(children) => children.iter().any(|c| c.test(rel_path)),
            Expression::Not(child) => !child.test(rel_path),
            Expression::Match(glob) => glob.is_match(rel_path),
            Expression::DirName(dir) => dir.is_match(rel_path),
        }
    }
}

fn basename(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}

fn dirname(rel_path: &str) -> &str {
    match rel_path.rfind('/') {
        Some(idx) => &rel_path[..idx],
        None => ".",
    }
}
