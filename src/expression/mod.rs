// src/expression/mod.rs

//! Path expressions deciding which changed files a trigger reacts to.
//!
//! An [`Expression`] is an immutable boolean tree built once from trigger
//! configuration (see [`parse`]) and evaluated against paths relative to the
//! watched project root (see [`matcher`]).

pub mod matcher;
pub mod parse;

pub use matcher::{DirPattern, GlobPattern, MatchScope};

use std::fmt;

use crate::errors::Result;

/// Boolean expression over a relative file path.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// True iff every child is true. Empty list is vacuously true.
    AllOf(Vec<Expression>),
    /// True iff at least one child is true. Empty list is false.
    AnyOf(Vec<Expression>),
    /// Negation of the child.
    Not(Box<Expression>),
    /// Glob match against the basename or the whole relative path.
    Match(GlobPattern),
    /// Matches a contiguous run of directory segments.
    DirName(DirPattern),
}

impl Expression {
    pub fn all_of(children: impl IntoIterator<Item = Expression>) -> Self {
        Expression::AllOf(children.into_iter().collect())
    }

    pub fn any_of(children: impl IntoIterator<Item = Expression>) -> Self {
        Expression::AnyOf(children.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expression) -> Self {
        Expression::Not(Box::new(child))
    }

    /// Case-sensitive glob match (`match` in config).
    pub fn glob(pattern: &str, scope: MatchScope) -> Result<Self> {
        Ok(Expression::Match(GlobPattern::new(pattern, true, scope)?))
    }

    /// Case-insensitive glob match (`imatch` in config).
    pub fn iglob(pattern: &str, scope: MatchScope) -> Result<Self> {
        Ok(Expression::Match(GlobPattern::new(pattern, false, scope)?))
    }

    /// Case-sensitive directory match (`dirname` in config).
    pub fn dir_name(pattern: &str) -> Result<Self> {
        Ok(Expression::DirName(DirPattern::new(pattern, true)?))
    }

    /// Case-insensitive directory match (`idirname` in config).
    pub fn idir_name(pattern: &str) -> Result<Self> {
        Ok(Expression::DirName(DirPattern::new(pattern, false)?))
    }
}

/// Renders the array form used in config files, e.g.
/// `["anyof", ["match", "*.rs", "basename"], ["dirname", "src"]]`.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::AllOf(children) => write_list(f, "allof", children),
            Expression::AnyOf(children) => write_list(f, "anyof", children),
            Expression::Not(child) => write!(f, "[\"not\", {child}]"),
            Expression::Match(glob) => {
                let tag = if glob.case_sensitive() { "match" } else { "imatch" };
                write!(f, "[\"{tag}\", {:?}, \"{}\"]", glob.pattern(), glob.scope())
            }
            Expression::DirName(dir) => {
                let tag = if dir.case_sensitive() { "dirname" } else { "idirname" };
                write!(f, "[\"{tag}\", {:?}]", dir.pattern())
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, tag: &str, children: &[Expression]) -> fmt::Result {
    write!(f, "[\"{tag}\"")?;
    for child in children {
        write!(f, ", {child}")?;
    }
    f.write_str("]")
}
