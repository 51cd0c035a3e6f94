//! # strata_engine
//!
//! Applies strata plans against a resource provider.
//!
//! # Features
//!
//! - **Provider Capability**: [`ResourceProvider`] with create/update/delete, idempotent by contract
//! - **Wave Execution**: independent steps run concurrently, bounded by `max_parallelism`
//! - **Failure Isolation**: a failed step skips only what depends on it
//! - **Retry and Timeouts**: exponential backoff for transient errors, per-kind deadlines
//! - **Cancellation**: stops dispatching new work and drains in-flight calls
//! - **Local Provider**: a file-backed simulated cloud for end-to-end runs
//! - **Mock Provider**: scriptable failures and call capture for tests
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::{Composition, Properties};
//! use strata_engine::{EngineConfig, Executor, MockProvider};
//! use strata_state::MemoryStateStore;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = Composition::new("App");
//!     app.root_mut()
//!         .define_resource("Net", "network.vpc", Properties::new().with("cidr", "10.0.0.0/16"))?;
//!
//!     let executor = Executor::new(
//!         Arc::new(MockProvider::new()),
//!         Arc::new(MemoryStateStore::new()),
//!         EngineConfig::default(),
//!     );
//!     let plan = executor.plan(&app)?;
//!     let report = executor.apply(&plan, &CancellationToken::new()).await?;
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod local;
pub mod mock;
pub mod provider;
pub mod report;

pub use config::{EngineConfig, RetryPolicy, DEFAULT_CONFIG_FILE};
pub use error::{
    EngineError, EngineResult, ProviderError, ProviderErrorKind, ProviderResult, SkipReason,
    StepFailure,
};
pub use executor::Executor;
pub use local::{LocalProvider, LocalResource};
pub use mock::{CapturedCall, MockProvider};
pub use provider::{
    CreateRequest, Created, DeleteRequest, IdempotencyKey, ResolvedProperties, ResourceProvider,
    UpdateRequest,
};
pub use report::{RunOutcome, RunReport, StepReport, StepState};
