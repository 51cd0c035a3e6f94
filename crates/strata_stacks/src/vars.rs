//! Stack variables passed on the command line as `key=value`.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StackError, StackResult};

/// String variables a stack builder may read, with builder-side defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackVars(BTreeMap<String, String>);

impl StackVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a list of `key=value` pairs. Later pairs win.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> StackResult<Self> {
        let mut vars = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| StackError::InvalidVar {
                key: pair.to_string(),
                reason: "expected key=value".to_string(),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StackError::InvalidVar {
                    key: pair.to_string(),
                    reason: "empty key".to_string(),
                });
            }
            vars.set(key, value.trim());
        }
        Ok(vars)
    }

    /// Read and parse a variable, falling back to `default` when unset.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> StackResult<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| StackError::InvalidVar {
                key: key.to_string(),
                reason: format!("cannot parse '{}'", raw),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let vars = StackVars::parse_pairs(&["cidr=10.1.0.0/16", "zone_name = example.com"]).unwrap();
        assert_eq!(vars.get("cidr"), Some("10.1.0.0/16"));
        assert_eq!(vars.get("zone_name"), Some("example.com"));
        assert_eq!(vars.get_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_parse_pairs_rejects_missing_equals() {
        let err = StackVars::parse_pairs(&["cidr"]).unwrap_err();
        assert!(matches!(err, StackError::InvalidVar { .. }));
    }

    #[test]
    fn test_parse_or() {
        let vars = StackVars::new().with("port", "8443").with("bad", "x");
        assert_eq!(vars.parse_or("port", 443u16).unwrap(), 8443);
        assert_eq!(vars.parse_or("unset", 443u16).unwrap(), 443);
        assert!(vars.parse_or("bad", 443u16).is_err());
    }
}
