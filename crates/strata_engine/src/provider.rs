//! Resource provider capability.
//!
//! The engine talks to a cloud only through [`ResourceProvider`]. Every call
//! must be safe to repeat: the engine retries transient failures and a later
//! run may re-send a create whose earlier attempt timed out. Creates carry an
//! [`IdempotencyKey`] so the provider can answer with the resource it already
//! made instead of making a second one.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use strata_core::Outputs;

use crate::error::ProviderResult;

/// Fully resolved properties as sent to a provider.
pub type ResolvedProperties = BTreeMap<String, serde_json::Value>;

/// Stable key identifying "the same create" across retries and runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_resource(kind: &str, logical_path: &str) -> Self {
        Self(format!("{}:{}", kind, logical_path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub logical_path: String,
    pub kind: String,
    pub properties: ResolvedProperties,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub logical_path: String,
    pub kind: String,
    pub provider_id: String,
    pub properties: ResolvedProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub logical_path: String,
    pub kind: String,
    pub provider_id: String,
}

/// What a provider reports after creating a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub provider_id: String,
    pub outputs: Outputs,
}

/// The capability set the executor needs from a cloud.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Create a resource. A repeated call with the same idempotency key must
    /// return the resource created by the first one.
    async fn create(&self, request: CreateRequest) -> ProviderResult<Created>;

    /// Update a resource in place and return its fresh outputs.
    async fn update(&self, request: UpdateRequest) -> ProviderResult<Outputs>;

    /// Delete a resource. Deleting something already gone succeeds.
    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()>;
}

/// Outputs for providers that echo their input: every property plus `id`
/// and an `arn` built from the kind.
pub fn echo_outputs(kind: &str, provider_id: &str, properties: &ResolvedProperties) -> Outputs {
    let mut outputs: Outputs = properties.clone();
    outputs.insert("id".to_string(), serde_json::Value::String(provider_id.to_string()));
    outputs.insert(
        "arn".to_string(),
        serde_json::Value::String(format!("arn:strata:{}:{}", kind, provider_id)),
    );
    outputs
}

/// Short id prefix derived from a kind, e.g. `database.instance` -> `database-instance`.
pub fn kind_slug(kind: &str) -> String {
    kind.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_slug() {
        assert_eq!(kind_slug("database.instance"), "database-instance");
        assert_eq!(kind_slug("DNS::ARecord"), "dns-arecord");
    }

    #[test]
    fn test_echo_outputs_include_id_and_arn() {
        let mut props = ResolvedProperties::new();
        props.insert("cidr".to_string(), serde_json::json!("10.0.0.0/16"));
        let outputs = echo_outputs("network.vpc", "network-vpc-1", &props);

        assert_eq!(outputs["id"], serde_json::json!("network-vpc-1"));
        assert_eq!(outputs["arn"], serde_json::json!("arn:strata:network.vpc:network-vpc-1"));
        assert_eq!(outputs["cidr"], serde_json::json!("10.0.0.0/16"));
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        assert_eq!(
            IdempotencyKey::for_resource("postgres", "Db"),
            IdempotencyKey::for_resource("postgres", "Db")
        );
        assert_ne!(
            IdempotencyKey::for_resource("postgres", "Db"),
            IdempotencyKey::for_resource("mysql", "Db")
        );
    }
}
