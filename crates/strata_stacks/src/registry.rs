//! Named stack builders.

use std::collections::BTreeMap;

use tracing::debug;

use strata_core::Composition;

use crate::error::{StackError, StackResult};
use crate::finance::FinanceStack;
use crate::network::{HostedZone, Network, NetworkProps};
use crate::vars::StackVars;

/// Builds a composition from variables.
pub type StackBuilder = fn(&StackVars) -> StackResult<Composition>;

#[derive(Clone)]
pub struct StackDefinition {
    pub name: String,
    pub description: String,
    pub builder: StackBuilder,
}

impl std::fmt::Debug for StackDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Maps stack names to their builders.
#[derive(Debug, Default)]
pub struct StackRegistry {
    stacks: BTreeMap<String, StackDefinition>,
}

impl StackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stacks shipped with strata.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "finance",
            "Network, Postgres database, service instance and app bucket",
            FinanceStack::build,
        );
        registry.register(
            "network",
            "The finance network on its own: VPC, load balancer, DNS and certificates",
            build_network,
        );
        registry
    }

    /// Register a builder. An existing entry with the same name is replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        builder: StackBuilder,
    ) {
        let name = name.into();
        debug!("Registering stack: {}", name);
        self.stacks.insert(
            name.clone(),
            StackDefinition {
                name,
                description: description.into(),
                builder,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&StackDefinition> {
        self.stacks.get(name)
    }

    /// Build the named stack.
    pub fn build(&self, name: &str, vars: &StackVars) -> StackResult<Composition> {
        let definition = self
            .get(name)
            .ok_or_else(|| StackError::StackNotFound(name.to_string()))?;
        (definition.builder)(vars)
    }

    /// Registered stacks, sorted by name.
    pub fn list(&self) -> Vec<&StackDefinition> {
        self.stacks.values().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stacks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

fn build_network(vars: &StackVars) -> StackResult<Composition> {
    let mut app = Composition::new("NetworkStack");
    Network::new(
        app.root_mut(),
        "Network",
        &NetworkProps {
            cidr: vars.get_or("cidr", crate::finance::DEFAULT_CIDR).to_string(),
            hosted_zones: vec![HostedZone::new(
                vars.get_or("zone_id", crate::finance::DEFAULT_ZONE_ID),
                vars.get_or("zone_name", crate::finance::DEFAULT_ZONE_NAME),
            )],
        },
    )?;
    Ok(app)
}
