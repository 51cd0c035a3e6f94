//! Property values and deploy-time references.
//!
//! A [`Value`] is either something known while composing (a literal or a list
//! of values) or a [`Reference`] to an output attribute of another resource.
//! References stay symbolic until the executor resolves them against applied
//! outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A pointer at an output attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// Logical path of the resource that produces the attribute.
    pub target: String,
    /// Name of the output attribute.
    pub attribute: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute)
    }
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Literal(serde_json::Value),
    List(Vec<Value>),
    Reference(Reference),
}

impl Value {
    pub fn null() -> Self {
        Value::Literal(serde_json::Value::Null)
    }

    /// True when no reference remains anywhere inside this value.
    pub fn is_resolved(&self) -> bool {
        match self {
            Value::Literal(_) => true,
            Value::List(items) => items.iter().all(Value::is_resolved),
            Value::Reference(_) => false,
        }
    }

    /// All references nested in this value.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Literal(_) => {}
            Value::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Value::Reference(r) => out.push(r),
        }
    }

    /// Substitute references with whatever `lookup` returns for them.
    ///
    /// References the lookup cannot answer are left in place, so partial
    /// resolution is possible.
    pub fn resolve_with<F>(&self, lookup: &F) -> Value
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            Value::Literal(v) => Value::Literal(v.clone()),
            Value::List(items) => Value::List(items.iter().map(|i| i.resolve_with(lookup)).collect()),
            Value::Reference(r) => match lookup(r) {
                Some(v) => Value::Literal(v),
                None => Value::Reference(r.clone()),
            },
        }
    }

    /// Convert a fully resolved value into plain JSON.
    ///
    /// Returns the first unresolved reference as the error.
    pub fn to_json(&self) -> Result<serde_json::Value, Reference> {
        match self {
            Value::Literal(v) => Ok(v.clone()),
            Value::List(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Value::Reference(r) => Err(r.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Reference(r) => write!(f, "{}", r),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(serde_json::Value::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(serde_json::Value::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Literal(serde_json::Value::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Literal(serde_json::Value::from(n))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Literal(v)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered property map of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.values().all(Value::is_resolved)
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.0.values().flat_map(Value::references).collect()
    }

    /// Distinct logical paths referenced by any property.
    pub fn reference_targets(&self) -> BTreeSet<String> {
        self.references().into_iter().map(|r| r.target.clone()).collect()
    }

    pub fn resolve_with<F>(&self, lookup: &F) -> Properties
    where
        F: Fn(&Reference) -> Option<serde_json::Value>,
    {
        Properties(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.resolve_with(lookup)))
                .collect(),
        )
    }

    /// Plain JSON map, failing on the first unresolved reference.
    pub fn to_json(&self) -> Result<BTreeMap<String, serde_json::Value>, Reference> {
        self.0
            .iter()
            .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Properties(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Properties {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Properties(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_references_are_collected() {
        let value = Value::List(vec![
            Value::from("sg-static"),
            Value::Reference(Reference::new("Db/SecurityGroup", "id")),
            Value::List(vec![Value::Reference(Reference::new("Net/Vpc", "id"))]),
        ]);

        let targets: Vec<_> = value.references().iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["Db/SecurityGroup", "Net/Vpc"]);
        assert!(!value.is_resolved());
    }

    #[test]
    fn test_partial_resolution_keeps_unknown_references() {
        let props = Properties::new()
            .with("vpcId", Reference::new("Net/Vpc", "id"))
            .with("zoneId", Reference::new("Dns/Zone", "id"));

        let resolved = props.resolve_with(&|r: &Reference| {
            (r.target == "Net/Vpc").then(|| json!("vpc-123"))
        });

        assert_eq!(resolved.get("vpcId"), Some(&Value::from("vpc-123")));
        assert!(matches!(resolved.get("zoneId"), Some(Value::Reference(_))));
        assert_eq!(
            resolved.to_json().unwrap_err(),
            Reference::new("Dns/Zone", "id")
        );
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let value = Value::Reference(Reference::new("Net/Vpc", "id"));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            json!({"type": "reference", "value": {"target": "Net/Vpc", "attribute": "id"}})
        );
    }
}
