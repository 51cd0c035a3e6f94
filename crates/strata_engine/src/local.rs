//! Local simulated cloud.
//!
//! Keeps an inventory of "remote" resources in a JSON file so that plan/apply
//! cycles can be exercised end to end without cloud credentials. Resource ids
//! look like `network-vpc-1a2b3c4d`; outputs echo the properties plus `id`
//! and `arn`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as WriteLock;
use tracing::{debug, info};
use uuid::Uuid;

use strata_core::Outputs;

use crate::error::{EngineError, EngineResult, ProviderError, ProviderResult};
use crate::provider::{
    echo_outputs, kind_slug, CreateRequest, Created, DeleteRequest, ResolvedProperties,
    ResourceProvider, UpdateRequest,
};

/// A resource living in the local inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalResource {
    pub kind: String,
    pub logical_path: String,
    pub properties: ResolvedProperties,
    pub outputs: Outputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Inventory {
    resources: BTreeMap<String, LocalResource>,
    /// idempotency key -> provider id
    keys: BTreeMap<String, String>,
}

/// File-backed simulated provider.
///
/// Mutations copy the inventory, persist the copy, then swap it in. The
/// `writer` lock is held across the write so concurrent calls cannot lose
/// each other's changes.
pub struct LocalProvider {
    path: Option<PathBuf>,
    inventory: Mutex<Inventory>,
    writer: WriteLock<()>,
    latency: Option<Duration>,
}

impl LocalProvider {
    /// Open (or start) an inventory at `path`.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inventory = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| EngineError::Inventory(format!("{:?}: {}", path, e)))?
        } else {
            Inventory::default()
        };
        info!(
            "Local provider inventory at {:?} ({} resources)",
            path,
            inventory.resources.len()
        );
        Ok(Self {
            path: Some(path),
            inventory: Mutex::new(inventory),
            writer: WriteLock::new(()),
            latency: None,
        })
    }

    /// An inventory that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inventory: Mutex::new(Inventory::default()),
            writer: WriteLock::new(()),
            latency: None,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn resources(&self) -> BTreeMap<String, LocalResource> {
        self.inventory.lock().resources.clone()
    }

    async fn save(&self, inventory: &Inventory) -> ProviderResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write = async {
            let json = serde_json::to_vec_pretty(inventory)?;
            atomic_write(path, &json).await
        };
        write
            .await
            .map_err(|e| ProviderError::unavailable(format!("inventory write failed: {}", e)))
    }

    /// Persist `next` and make it the live inventory.
    async fn replace(&self, next: Inventory) -> ProviderResult<()> {
        self.save(&next).await?;
        *self.inventory.lock() = next;
        Ok(())
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Write to a sibling temp file, then rename it over `path`.
async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("inventory");
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    tokio::fs::write(&temp_path, data).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, request: CreateRequest) -> ProviderResult<Created> {
        self.pause().await;
        let _writer = self.writer.lock().await;
        let mut next = self.inventory.lock().clone();
        let now = Utc::now();

        let known = next.keys.get(request.idempotency_key.as_str()).cloned();
        if let Some(id) = known {
            if let Some(existing) = next.resources.get_mut(&id) {
                debug!(
                    "Create of {} reconciled with existing {}",
                    request.logical_path, id
                );
                if existing.properties == request.properties {
                    return Ok(Created {
                        outputs: existing.outputs.clone(),
                        provider_id: id,
                    });
                }
                // An earlier create landed with other properties; bring it up to date.
                let outputs = echo_outputs(&request.kind, &id, &request.properties);
                existing.properties = request.properties;
                existing.outputs = outputs.clone();
                existing.updated_at = now;
                self.replace(next).await?;
                return Ok(Created {
                    provider_id: id,
                    outputs,
                });
            }
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let provider_id = format!("{}-{}", kind_slug(&request.kind), &suffix[..8]);
        let outputs = echo_outputs(&request.kind, &provider_id, &request.properties);

        next.resources.insert(
            provider_id.clone(),
            LocalResource {
                kind: request.kind.clone(),
                logical_path: request.logical_path.clone(),
                properties: request.properties,
                outputs: outputs.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        next.keys
            .insert(request.idempotency_key.as_str().to_string(), provider_id.clone());
        self.replace(next).await?;

        Ok(Created {
            provider_id,
            outputs,
        })
    }

    async fn update(&self, request: UpdateRequest) -> ProviderResult<Outputs> {
        self.pause().await;
        let _writer = self.writer.lock().await;
        let mut next = self.inventory.lock().clone();

        let resource = next.resources.get_mut(&request.provider_id).ok_or_else(|| {
            ProviderError::not_found(format!("no resource with id {}", request.provider_id))
        })?;
        if resource.kind != request.kind {
            return Err(ProviderError::invalid(format!(
                "{} is a {}, not a {}",
                request.provider_id, resource.kind, request.kind
            )));
        }
        let outputs = echo_outputs(&request.kind, &request.provider_id, &request.properties);
        resource.properties = request.properties;
        resource.outputs = outputs.clone();
        resource.updated_at = Utc::now();

        self.replace(next).await?;
        Ok(outputs)
    }

    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()> {
        self.pause().await;
        let _writer = self.writer.lock().await;
        let mut next = self.inventory.lock().clone();

        if next.resources.remove(&request.provider_id).is_none() {
            debug!("Delete of {} found nothing to remove", request.provider_id);
            return Ok(());
        }
        next.keys.retain(|_, id| *id != request.provider_id);
        self.replace(next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::provider::IdempotencyKey;
    use tempfile::tempdir;

    fn create_request(path: &str, kind: &str) -> CreateRequest {
        let mut properties = ResolvedProperties::new();
        properties.insert("name".to_string(), serde_json::json!(path));
        CreateRequest {
            logical_path: path.to_string(),
            kind: kind.to_string(),
            properties,
            idempotency_key: IdempotencyKey::for_resource(kind, path),
        }
    }

    #[tokio::test]
    async fn test_inventory_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cloud.json");

        let provider = LocalProvider::open(&path).unwrap();
        let created = provider
            .create(create_request("Network/Vpc", "network.vpc"))
            .await
            .unwrap();
        assert!(created.provider_id.starts_with("network-vpc-"));
        assert_eq!(created.outputs["id"], serde_json::json!(created.provider_id));

        let reopened = LocalProvider::open(&path).unwrap();
        let resources = reopened.resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[&created.provider_id].logical_path, "Network/Vpc");
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let provider = LocalProvider::in_memory();
        let first = provider.create(create_request("Db", "database.instance")).await.unwrap();
        let again = provider.create(create_request("Db", "database.instance")).await.unwrap();
        assert_eq!(first.provider_id, again.provider_id);
        assert_eq!(provider.resources().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_create_with_new_properties_updates_in_place() {
        let provider = LocalProvider::in_memory();
        let first = provider
            .create(create_request("Net", "network.vpc"))
            .await
            .unwrap();

        let mut changed = create_request("Net", "network.vpc");
        changed
            .properties
            .insert("cidrBlock".to_string(), serde_json::json!("10.9.0.0/16"));
        let again = provider.create(changed.clone()).await.unwrap();

        assert_eq!(again.provider_id, first.provider_id);
        assert_eq!(again.outputs["cidrBlock"], serde_json::json!("10.9.0.0/16"));
        let resources = provider.resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[&first.provider_id].properties, changed.properties);
    }

    #[tokio::test]
    async fn test_concurrent_writes_all_reach_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cloud.json");
        let provider = std::sync::Arc::new(LocalProvider::open(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let provider = provider.clone();
            tasks.spawn(async move {
                provider
                    .create(create_request(&format!("Subnet{}", i), "network.subnet"))
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(LocalProvider::open(&path).unwrap().resources().len(), 8);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "cloud.json")
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let provider = LocalProvider::in_memory();
        let err = provider
            .update(UpdateRequest {
                logical_path: "Db".to_string(),
                kind: "database.instance".to_string(),
                provider_id: "database-instance-missing".to_string(),
                properties: ResolvedProperties::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_is_retry_safe() {
        let provider = LocalProvider::in_memory();
        let created = provider.create(create_request("Db", "database.instance")).await.unwrap();
        let request = DeleteRequest {
            logical_path: "Db".to_string(),
            kind: "database.instance".to_string(),
            provider_id: created.provider_id,
        };

        provider.delete(request.clone()).await.unwrap();
        provider.delete(request).await.unwrap();
        assert!(provider.resources().is_empty());
    }
}
