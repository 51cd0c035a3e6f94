//! # strata_core
//!
//! Composition model and planning for strata.
//!
//! # Architecture
//!
//! - **Constructs**: a tree of named nodes owning resources and exporting outputs
//! - **Values**: literals or lazy references to another resource's outputs
//! - **DependencyGraph**: ordering derived from references and explicit edges
//! - **Planner**: diffs declared resources against last-applied state
//!
//! # Example
//!
//! ```rust
//! use strata_core::{Action, AppliedStates, Composition, Planner, Properties};
//!
//! let mut app = Composition::new("App");
//! let root = app.root_mut();
//! let net = root
//!     .define_resource("Net", "network.vpc", Properties::new().with("cidr", "10.0.0.0/16"))
//!     .unwrap();
//! root.define_resource("Db", "postgres", Properties::new().with("subnetId", net.output("subnetId")))
//!     .unwrap();
//!
//! let plan = Planner::new().plan(&app, &AppliedStates::new()).unwrap();
//! assert_eq!(plan.actions(), vec![("Net", Action::Create), ("Db", Action::Create)]);
//! ```

pub mod construct;
pub mod error;
pub mod graph;
pub mod plan;
pub mod state;
pub mod value;

pub use construct::{Composition, Construct, Resource, ResourceHandle, PATH_SEPARATOR};
pub use error::{CoreError, CoreResult};
pub use graph::DependencyGraph;
pub use plan::{Action, Plan, PlanStep, PlanSummary, Planner, PropertyChange};
pub use state::{lookup_output, AppliedState, AppliedStates, Outputs};
pub use value::{Properties, Reference, Value};
