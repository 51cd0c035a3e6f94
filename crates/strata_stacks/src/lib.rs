//! # strata_stacks
//!
//! Built-in stacks expressed as strata constructs.
//!
//! - [`Network`]: VPC with three public subnets, S3 and Secrets Manager endpoints,
//!   a DB subnet group, an internet-facing load balancer with HTTP->HTTPS redirect,
//!   and a certificate plus apex/wildcard alias records per hosted zone
//! - [`Database`]: Postgres `finance` database with generated credentials
//! - [`Instance`]: service instance with an SSM-managed IAM role
//! - [`FinanceStack`]: all of the above wired together with an app bucket
//! - [`StackRegistry`]: named builders used by the CLI
//!
//! ```rust
//! use strata_stacks::{StackRegistry, StackVars};
//!
//! let registry = StackRegistry::builtin();
//! let app = registry
//!     .build("finance", &StackVars::new().with("cidr", "10.20.0.0/16"))
//!     .unwrap();
//! assert!(app.handle("Network/Vpc").is_ok());
//! ```

pub mod database;
pub mod error;
pub mod finance;
pub mod instance;
pub mod network;
pub mod registry;
pub mod vars;

pub use database::Database;
pub use error::{StackError, StackResult};
pub use finance::FinanceStack;
pub use instance::{Instance, InstanceProps};
pub use network::{HostedZone, Network, NetworkProps};
pub use registry::{StackBuilder, StackDefinition, StackRegistry};
pub use vars::StackVars;
