//! Plans and the planner that produces them.
//!
//! Planning is a pure function of the declared resources and the last
//! applied state: the same inputs always yield the same [`Plan`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::construct::{Composition, Resource};
use crate::error::CoreResult;
use crate::graph::DependencyGraph;
use crate::state::{lookup_output, AppliedStates};
use crate::value::{Properties, Reference, Value};

/// What a plan step does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::NoOp => "no-op",
        }
    }

    fn marker(&self) -> char {
        match self {
            Action::Create => '+',
            Action::Update => '~',
            Action::Delete => '-',
            Action::NoOp => ' ',
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single property difference of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub logical_path: String,
    pub kind: String,
    pub action: Action,
    /// Desired properties; references to resources that are not yet stable
    /// stay unresolved. For deletes, the last applied properties.
    pub properties: Properties,
    /// Set for every action except `Create`.
    pub provider_id: Option<String>,
    /// Last applied properties, for updates and no-ops.
    pub previous: Option<Properties>,
    /// Logical paths this resource depends on.
    pub dependencies: BTreeSet<String>,
    /// Indices of steps that must commit before this one may run.
    pub after: BTreeSet<usize>,
    /// An update whose references could not be resolved while planning.
    /// It may turn out to be a no-op once they are.
    pub deferred: bool,
    pub changes: Vec<PropertyChange>,
}

impl PlanStep {
    fn new(logical_path: &str, kind: &str, action: Action, properties: Properties) -> Self {
        Self {
            logical_path: logical_path.to_string(),
            kind: kind.to_string(),
            action,
            properties,
            provider_id: None,
            previous: None,
            dependencies: BTreeSet::new(),
            after: BTreeSet::new(),
            deferred: false,
            changes: Vec::new(),
        }
    }
}

/// Per-action counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub noop: usize,
}

/// An ordered set of steps reconciling declared and applied state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn actions(&self) -> Vec<(&str, Action)> {
        self.steps
            .iter()
            .map(|s| (s.logical_path.as_str(), s.action))
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match step.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.noop += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action != Action::NoOp)
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.noop
        )
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Planned actions:")?;
        writeln!(f)?;
        for step in &self.steps {
            match step.action {
                Action::NoOp => {
                    writeln!(f, "    {} {} (no changes)", step.kind, step.logical_path)?;
                }
                action => {
                    writeln!(f, "  {} {} {}", action.marker(), step.kind, step.logical_path)?;
                }
            }
            if step.deferred {
                writeln!(f, "      (known after dependencies apply)")?;
            }
            for change in &step.changes {
                let show = |v: &Option<Value>| v.as_ref().map(ToString::to_string).unwrap_or_else(|| "<none>".to_string());
                writeln!(f, "      {}: {} -> {}", change.key, show(&change.old), show(&change.new))?;
            }
        }
        writeln!(f)?;
        write!(f, "Plan: {}", self.summary())
    }
}

/// Diffs declared resources against applied state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, composition: &Composition, applied: &AppliedStates) -> CoreResult<Plan> {
        self.plan_resources(&composition.resources(), applied)
    }

    /// Compute the plan for a flattened set of resources.
    ///
    /// All deletes come first, dependents before their dependencies; the
    /// remaining steps follow the graph's topological order.
    pub fn plan_resources(&self, resources: &[Resource], applied: &AppliedStates) -> CoreResult<Plan> {
        let graph = DependencyGraph::build(resources)?;
        let order = graph.topological_order()?;
        let desired: BTreeMap<&str, &Resource> = resources
            .iter()
            .map(|r| (r.logical_path.as_str(), r))
            .collect();

        // Decide forward steps in dependency order so every target's action is
        // known before its dependents try to resolve references against it.
        let mut forward: Vec<PlanStep> = Vec::with_capacity(order.len());
        let mut stable: BTreeSet<String> = BTreeSet::new();
        let mut deleted: BTreeSet<String> = BTreeSet::new();

        for path in &order {
            let resource = desired[path.as_str()];
            let mut step = match applied.get(path) {
                None => PlanStep::new(path, &resource.kind, Action::Create, resource.properties.clone()),
                Some(state) if state.kind != resource.kind => {
                    debug!(
                        "Replacing {}: kind {} -> {}",
                        path, state.kind, resource.kind
                    );
                    deleted.insert(path.clone());
                    PlanStep::new(path, &resource.kind, Action::Create, resource.properties.clone())
                }
                Some(state) => {
                    let lookup = |r: &Reference| {
                        if stable.contains(&r.target) {
                            lookup_output(applied, r)
                        } else {
                            None
                        }
                    };
                    let resolved = resource.properties.resolve_with(&lookup);
                    let deferred = !resolved.is_resolved();
                    let action = if !deferred && resolved == state.last_properties {
                        Action::NoOp
                    } else {
                        Action::Update
                    };
                    let mut step = PlanStep::new(path, &resource.kind, action, resolved);
                    step.provider_id = Some(state.provider_id.clone());
                    step.previous = Some(state.last_properties.clone());
                    step.deferred = deferred;
                    if action == Action::Update {
                        step.changes = diff_properties(&state.last_properties, &step.properties);
                    }
                    step
                }
            };
            if step.action == Action::NoOp {
                stable.insert(path.clone());
            }
            step.dependencies = resource.dependencies();
            forward.push(step);
        }

        for path in applied.keys() {
            if !desired.contains_key(path.as_str()) {
                deleted.insert(path.clone());
            }
        }

        // Deletes run dependents-first, using the dependencies recorded at apply time.
        let delete_graph = DependencyGraph::from_edges(
            deleted
                .iter()
                .map(|p| (p.clone(), applied[p].dependencies.clone())),
        );
        let delete_order = delete_graph.reverse_topological_order()?;

        let mut steps: Vec<PlanStep> = Vec::with_capacity(delete_order.len() + forward.len());
        let mut delete_index: BTreeMap<String, usize> = BTreeMap::new();
        for path in &delete_order {
            let state = &applied[path];
            let mut step = PlanStep::new(path, &state.kind, Action::Delete, state.last_properties.clone());
            step.provider_id = Some(state.provider_id.clone());
            step.dependencies = state.dependencies.clone();
            if let Some(dependents) = delete_graph.dependents_of(path) {
                step.after = dependents.iter().map(|d| delete_index[d]).collect();
            }
            delete_index.insert(path.clone(), steps.len());
            steps.push(step);
        }

        let mut forward_index: BTreeMap<String, usize> = BTreeMap::new();
        for mut step in forward {
            let mut after: BTreeSet<usize> = step
                .dependencies
                .iter()
                .filter_map(|d| forward_index.get(d).copied())
                .collect();
            if let Some(&i) = delete_index.get(&step.logical_path) {
                after.insert(i);
            }
            step.after = after;
            forward_index.insert(step.logical_path.clone(), steps.len());
            steps.push(step);
        }

        let plan = Plan { steps };
        info!("Computed plan: {}", plan.summary());
        Ok(plan)
    }
}

fn diff_properties(old: &Properties, new: &Properties) -> Vec<PropertyChange> {
    let keys: BTreeSet<&String> = old.iter().map(|(k, _)| k).chain(new.iter().map(|(k, _)| k)).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            (before != after).then(|| PropertyChange {
                key: key.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}
