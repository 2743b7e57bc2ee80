use crate::{k8s, Error, Owner};
use std::collections::BTreeMap;

/// A watched resource, validated to carry the identity derived resources are
/// owned by.
#[derive(Clone, Debug)]
pub struct Target {
    resource: k8s::ApiResource,
    object: k8s::DynamicObject,
    owner: Owner,
}

/// Where a watched resource is in its finalizer-gated lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// The resource is live; derived resources are converged.
    Active,

    /// Deletion was requested; derived resources are removed before the
    /// finalizer is released.
    Deleting,
}

// === impl Target ===

impl Target {
    pub fn new(resource: k8s::ApiResource, object: k8s::DynamicObject) -> Result<Self, Error> {
        let missing = |field| Error::MissingField {
            kind: resource.kind.clone(),
            field,
        };
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| missing("metadata.name"))?;
        let uid = object
            .metadata
            .uid
            .clone()
            .ok_or_else(|| missing("metadata.uid"))?;
        let owner = Owner::new(name, resource.kind.clone(), uid);
        Ok(Self {
            resource,
            object,
            owner,
        })
    }

    pub fn resource(&self) -> &k8s::ApiResource {
        &self.resource
    }

    pub fn object(&self) -> &k8s::DynamicObject {
        &self.object
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn name(&self) -> &str {
        self.owner.name()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    /// Returns the namespace, failing for cluster-scoped targets.
    pub fn require_namespace(&self) -> Result<&str, Error> {
        self.namespace().ok_or_else(|| Error::MissingField {
            kind: self.resource.kind.clone(),
            field: "metadata.namespace",
        })
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.object.metadata.annotations.as_ref().unwrap_or(&EMPTY)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.object.metadata.deletion_timestamp.is_some() {
            Lifecycle::Deleting
        } else {
            Lifecycle::Active
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        has_finalizer(&self.object, finalizer)
    }

    /// A JSON view of the resource for template evaluation.
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        serde_json::to_value(&self.object).map_err(|source| Error::Projection {
            kind: self.resource.kind.clone(),
            source,
        })
    }

    /// A short `Kind namespace/name` description for logs.
    pub fn describe(&self) -> String {
        k8s::describe(&self.resource, self.namespace(), self.name())
    }
}

pub(crate) fn has_finalizer(object: &k8s::DynamicObject, finalizer: &str) -> bool {
    object
        .metadata
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == finalizer)
}
