//! The construct tree.
//!
//! A [`Composition`] owns a root [`Construct`]. Constructs nest, own resources
//! and export named outputs. Every node's logical path is the `/`-joined chain
//! of its ancestors' ids (the root contributes nothing), and names are unique
//! among siblings, which makes every path unique across the composition.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::value::{Properties, Reference, Value};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// A declared resource, rebuilt from composition code on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_path: String,
    pub kind: String,
    pub properties: Properties,
    /// Explicit ordering edges in addition to the ones implied by references.
    pub depends_on: BTreeSet<String>,
}

impl Resource {
    /// Every logical path this resource must be applied after.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.properties.reference_targets();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// A handle to a declared resource, used to wire outputs into other resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    path: String,
    kind: String,
}

impl ResourceHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn reference(&self, attribute: impl Into<String>) -> Reference {
        Reference::new(self.path.clone(), attribute)
    }

    /// A lazy reference to one of this resource's outputs.
    pub fn output(&self, attribute: impl Into<String>) -> Value {
        Value::Reference(self.reference(attribute))
    }

    /// Shorthand for the provider-assigned `id` output.
    pub fn id(&self) -> Value {
        self.output("id")
    }

    pub fn arn(&self) -> Value {
        self.output("arn")
    }
}

/// A named node in the composition tree.
#[derive(Debug, Clone, Default)]
pub struct Construct {
    id: String,
    path: String,
    resources: Vec<Resource>,
    children: Vec<Construct>,
    outputs: BTreeMap<String, Value>,
}

impl Construct {
    fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Logical path of this construct (empty for the root).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn children(&self) -> &[Construct] {
        &self.children
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", self.path, PATH_SEPARATOR, name)
        }
    }

    fn check_name(&self, name: &str) -> CoreResult<String> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) || name.trim() != name {
            return Err(CoreError::InvalidName(name.to_string()));
        }
        let path = self.child_path(name);
        let taken = self.children.iter().any(|c| c.id == name)
            || self.resources.iter().any(|r| r.logical_path == path);
        if taken {
            return Err(CoreError::DuplicatePath(path));
        }
        Ok(path)
    }

    /// Create a nested construct and return it for further composition.
    pub fn child(&mut self, id: &str) -> CoreResult<&mut Construct> {
        let path = self.check_name(id)?;
        debug!("Registering construct: {}", path);
        self.children.push(Construct::new(id, path));
        let index = self.children.len() - 1;
        Ok(&mut self.children[index])
    }

    /// Declare a resource owned by this construct.
    ///
    /// Nothing is sent to a provider; the resource only joins the tree.
    pub fn define_resource(
        &mut self,
        name: &str,
        kind: impl Into<String>,
        properties: Properties,
    ) -> CoreResult<ResourceHandle> {
        let path = self.check_name(name)?;
        let kind = kind.into();
        debug!("Registering resource: {} ({})", path, kind);
        self.resources.push(Resource {
            logical_path: path.clone(),
            kind: kind.clone(),
            properties,
            depends_on: BTreeSet::new(),
        });
        Ok(ResourceHandle { path, kind })
    }

    /// Add an explicit ordering edge: `resource` is applied after `on`.
    ///
    /// `resource` must live in this construct's subtree.
    pub fn add_dependency(&mut self, resource: &ResourceHandle, on: &ResourceHandle) -> CoreResult<()> {
        match self.find_resource_mut(resource.path()) {
            Some(r) => {
                r.depends_on.insert(on.path().to_string());
                Ok(())
            }
            None => Err(CoreError::UnknownReference {
                from: self.path.clone(),
                target: resource.path().to_string(),
                attribute: String::new(),
            }),
        }
    }

    /// Replace a resource property after declaration, e.g. to wire a late grant.
    pub fn set_property(
        &mut self,
        resource: &ResourceHandle,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        match self.find_resource_mut(resource.path()) {
            Some(r) => {
                r.properties.insert(key, value);
                Ok(())
            }
            None => Err(CoreError::UnknownReference {
                from: self.path.clone(),
                target: resource.path().to_string(),
                attribute: String::new(),
            }),
        }
    }

    /// Declare a named output of this construct.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }

    fn find_resource_mut(&mut self, path: &str) -> Option<&mut Resource> {
        if let Some(index) = self.resources.iter().position(|r| r.logical_path == path) {
            return Some(&mut self.resources[index]);
        }
        self.children
            .iter_mut()
            .find_map(|c| c.find_resource_mut(path))
    }

    fn find_resource(&self, path: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.logical_path == path)
            .or_else(|| self.children.iter().find_map(|c| c.find_resource(path)))
    }

    fn find_construct(&self, path: &str) -> Option<&Construct> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_construct(path))
    }

    fn flatten_into(&self, out: &mut Vec<Resource>) {
        out.extend(self.resources.iter().cloned());
        for child in &self.children {
            child.flatten_into(out);
        }
    }
}

/// A whole declared topology.
#[derive(Debug, Clone)]
pub struct Composition {
    name: String,
    root: Construct,
}

impl Composition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Construct::new(name.clone(), ""),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Construct {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Construct {
        &mut self.root
    }

    /// All resources in the tree, ordered by logical path.
    pub fn resources(&self) -> Vec<Resource> {
        let mut out = Vec::new();
        self.root.flatten_into(&mut out);
        out.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));
        out
    }

    /// Look up a handle for an already declared resource.
    pub fn handle(&self, path: &str) -> CoreResult<ResourceHandle> {
        self.root
            .find_resource(path)
            .map(|r| ResourceHandle {
                path: r.logical_path.clone(),
                kind: r.kind.clone(),
            })
            .ok_or_else(|| CoreError::UnknownReference {
                from: self.name.clone(),
                target: path.to_string(),
                attribute: String::new(),
            })
    }

    pub fn construct(&self, path: &str) -> CoreResult<&Construct> {
        self.root
            .find_construct(path)
            .ok_or_else(|| CoreError::UnknownConstruct(path.to_string()))
    }

    /// Read a named output exported by a construct.
    pub fn output(&self, construct_path: &str, name: &str) -> CoreResult<Value> {
        let construct = self.construct(construct_path)?;
        construct
            .outputs
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownOutput {
                construct: construct_path.to_string(),
                name: name.to_string(),
            })
    }
}
