//! Mock resource provider for testing.
//!
//! Captures every call and answers from an in-memory inventory. Failures,
//! transient errors and latency can be scripted per logical path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use strata_core::Outputs;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    echo_outputs, kind_slug, CreateRequest, Created, DeleteRequest, IdempotencyKey,
    ResolvedProperties, ResourceProvider, UpdateRequest,
};

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedCall {
    pub method: String,
    pub logical_path: String,
    pub kind: String,
    pub provider_id: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
}

#[derive(Debug, Clone)]
struct MockResource {
    kind: String,
    properties: ResolvedProperties,
    outputs: Outputs,
}

/// Scriptable in-memory provider.
#[derive(Clone, Default)]
pub struct MockProvider {
    /// Paths whose calls always fail with the given error.
    failures: Arc<RwLock<HashMap<String, ProviderError>>>,
    /// Paths that fail with a retryable error a number of times first.
    transient: Arc<RwLock<HashMap<String, usize>>>,
    /// Paths whose calls panic.
    panics: Arc<RwLock<HashSet<String>>>,
    /// Artificial latency per path.
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Live resources by provider id.
    resources: Arc<RwLock<HashMap<String, MockResource>>>,
    /// Provider ids handed out per idempotency key.
    keys: Arc<RwLock<HashMap<IdempotencyKey, String>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    next_id: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for `logical_path` fail.
    pub fn fail_on(self, logical_path: impl Into<String>, error: ProviderError) -> Self {
        self.failures.write().insert(logical_path.into(), error);
        self
    }

    /// Fail the first `times` calls for `logical_path` with a retryable error.
    pub fn fail_times(self, logical_path: impl Into<String>, times: usize) -> Self {
        self.transient.write().insert(logical_path.into(), times);
        self
    }

    /// Make every call for `logical_path` panic.
    pub fn panic_on(self, logical_path: impl Into<String>) -> Self {
        self.panics.write().insert(logical_path.into());
        self
    }

    pub fn with_delay(self, logical_path: impl Into<String>, delay: Duration) -> Self {
        self.delays.write().insert(logical_path.into(), delay);
        self
    }

    /// Stop failing calls for `logical_path`.
    pub fn heal(&self, logical_path: &str) {
        self.failures.write().remove(logical_path);
        self.transient.write().remove(logical_path);
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    /// Calls touching `logical_path`, in order.
    pub fn calls_for(&self, logical_path: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.logical_path == logical_path)
            .cloned()
            .collect()
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    pub fn resource_kind(&self, provider_id: &str) -> Option<String> {
        self.resources.read().get(provider_id).map(|r| r.kind.clone())
    }

    pub fn resource_outputs(&self, provider_id: &str) -> Option<Outputs> {
        self.resources.read().get(provider_id).map(|r| r.outputs.clone())
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record_call(&self, call: CapturedCall) {
        self.captured_calls.write().push(call);
    }

    /// Latency and scripted failures shared by every method.
    async fn simulate(&self, logical_path: &str) -> ProviderResult<()> {
        if self.panics.read().contains(logical_path) {
            panic!("scripted panic for {}", logical_path);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.read().get(logical_path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failures.read().get(logical_path).cloned() {
            return Err(error);
        }
        let mut transient = self.transient.write();
        if let Some(remaining) = transient.get_mut(logical_path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::unavailable(format!(
                    "transient failure for {}",
                    logical_path
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, request: CreateRequest) -> ProviderResult<Created> {
        self.record_call(CapturedCall {
            method: "create".to_string(),
            logical_path: request.logical_path.clone(),
            kind: request.kind.clone(),
            provider_id: None,
            idempotency_key: Some(request.idempotency_key.clone()),
        });
        self.simulate(&request.logical_path).await?;

        let existing = self.keys.read().get(&request.idempotency_key).cloned();
        if let Some(id) = existing {
            let mut resources = self.resources.write();
            if let Some(resource) = resources.get_mut(&id) {
                // The earlier create may have carried different properties.
                if resource.properties != request.properties {
                    resource.outputs = echo_outputs(&request.kind, &id, &request.properties);
                    resource.properties = request.properties;
                }
                return Ok(Created {
                    outputs: resource.outputs.clone(),
                    provider_id: id,
                });
            }
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_id = format!("{}-{}", kind_slug(&request.kind), n);
        let outputs = echo_outputs(&request.kind, &provider_id, &request.properties);
        self.resources.write().insert(
            provider_id.clone(),
            MockResource {
                kind: request.kind.clone(),
                properties: request.properties,
                outputs: outputs.clone(),
            },
        );
        self.keys
            .write()
            .insert(request.idempotency_key, provider_id.clone());
        Ok(Created {
            provider_id,
            outputs,
        })
    }

    async fn update(&self, request: UpdateRequest) -> ProviderResult<Outputs> {
        self.record_call(CapturedCall {
            method: "update".to_string(),
            logical_path: request.logical_path.clone(),
            kind: request.kind.clone(),
            provider_id: Some(request.provider_id.clone()),
            idempotency_key: None,
        });
        self.simulate(&request.logical_path).await?;

        let outputs = echo_outputs(&request.kind, &request.provider_id, &request.properties);
        self.resources.write().insert(
            request.provider_id.clone(),
            MockResource {
                kind: request.kind,
                properties: request.properties,
                outputs: outputs.clone(),
            },
        );
        Ok(outputs)
    }

    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()> {
        self.record_call(CapturedCall {
            method: "delete".to_string(),
            logical_path: request.logical_path.clone(),
            kind: request.kind.clone(),
            provider_id: Some(request.provider_id.clone()),
            idempotency_key: None,
        });
        self.simulate(&request.logical_path).await?;

        self.resources.write().remove(&request.provider_id);
        self.keys.write().retain(|_, id| *id != request.provider_id);
        Ok(())
    }
}
