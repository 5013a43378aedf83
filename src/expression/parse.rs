// src/expression/parse.rs

//! Building [`Expression`]s from the array form used in config files:
//!
//! ```toml
//! expression = ["allof", ["imatch", "*.rs", "basename"], ["not", ["dirname", "target"]]]
//! ```

use serde::{Deserialize, Deserializer};
use toml::Value;

use crate::errors::{Result, WatchError};
use crate::expression::{Expression, MatchScope};

impl TryFrom<Value> for Expression {
    type Error = WatchError;

    fn try_from(value: Value) -> Result<Self> {
        parse_value(&value)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Expression::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Parse an expression from a TOML value.
pub fn parse_value(value: &Value) -> Result<Expression> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(format!("expected an array, got {value}")))?;

    let (tag, args) = items
        .split_first()
        .ok_or_else(|| invalid("empty expression".to_string()))?;

    let tag = tag
        .as_str()
        .ok_or_else(|| invalid(format!("expression tag must be a string, got {tag}")))?;

    match tag {
        "allof" => Ok(Expression::AllOf(parse_children(args)?)),
        "anyof" => Ok(Expression::AnyOf(parse_children(args)?)),
        "not" => match args {
            [child] => Ok(Expression::not(parse_value(child)?)),
            _ => Err(invalid(format!(
                "'not' takes exactly one sub-expression, got {}",
                args.len()
            ))),
        },
        "match" | "imatch" => {
            let (pattern, scope) = match args {
                [pattern] => (string_arg(tag, pattern)?, MatchScope::Basename),
                [pattern, scope] => (string_arg(tag, pattern)?, parse_scope(scope)?),
                _ => {
                    return Err(invalid(format!(
                        "'{tag}' takes a pattern and an optional scope, got {} arguments",
                        args.len()
                    )));
                }
            };
            if tag == "match" {
                Expression::glob(pattern, scope)
            } else {
                Expression::iglob(pattern, scope)
            }
        }
        "dirname" | "idirname" => match args {
            [pattern] => {
                let pattern = string_arg(tag, pattern)?;
                if tag == "dirname" {
                    Expression::dir_name(pattern)
                } else {
                    Expression::idir_name(pattern)
                }
            }
            _ => Err(invalid(format!(
                "'{tag}' takes exactly one pattern, got {} arguments",
                args.len()
            ))),
        },
        other => Err(invalid(format!("unknown expression tag '{other}'"))),
    }
}

fn parse_children(args: &[Value]) -> Result<Vec<Expression>> {
    args.iter().map(parse_value).collect()
}

fn string_arg<'a>(tag: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("'{tag}' pattern must be a string, got {value}")))
}

fn parse_scope(value: &Value) -> Result<MatchScope> {
    match value.as_str() {
        Some("basename") => Ok(MatchScope::Basename),
        Some("wholename") => Ok(MatchScope::Wholename),
        _ => Err(invalid(format!(
            "match scope must be \"basename\" or \"wholename\", got {value}"
        ))),
    }
}

fn invalid(msg: String) -> WatchError {
    WatchError::InvalidExpression(msg)
}
