use crate::labels::Selector;
use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    },
    Client, ResourceExt,
};
use thiserror::Error;

/// Errors returned by a [`Store`].
///
/// `NotFound`, `AlreadyExists` and `Conflict` are distinguished from all other
/// failures so that callers can treat them as control flow rather than faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// A declarative object store addressed by API resource, namespace and name.
///
/// `namespace` is `None` for cluster-scoped kinds.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError>;

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(
        &self,
        kind: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replaces an object. Fails with `Conflict` when the object's
    /// `metadata.resourceVersion` is stale.
    async fn update(
        &self,
        kind: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Applies a JSON merge patch.
    async fn patch(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    async fn delete(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    async fn delete_all_of(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<(), StoreError>;
}

/// A [`Store`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

// === impl StoreError ===

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classifies an API server error response.
    fn from_kube(error: kube::Error, id: impl FnOnce() -> String) -> Self {
        match error {
            kube::Error::Api(ref rsp) if rsp.code == 404 => Self::NotFound(id()),
            kube::Error::Api(ref rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
                Self::AlreadyExists(id())
            }
            kube::Error::Api(ref rsp) if rsp.code == 409 => Self::Conflict(id()),
            error => Self::Kube(error),
        }
    }
}

/// Formats an object reference for errors and logs, e.g. `Route istio-system/web`.
pub fn describe(kind: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {ns}/{name}", kind.kind),
        None => format!("{} {name}", kind.kind),
    }
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client, field_manager: impl ToString) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    fn api(&self, kind: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, kind),
            None => Api::all_with(self.client.clone(), kind),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

fn object_name(kind: &ApiResource, object: &DynamicObject) -> Result<String, StoreError> {
    object
        .metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no name", kind.kind)))
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        self.api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, || describe(kind, namespace, name)))
    }

    async fn list(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = self.api(kind, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        kind: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(kind, object)?;
        let namespace = object.namespace();
        self.api(kind, namespace.as_deref())
            .create(&self.post_params(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, || describe(kind, namespace.as_deref(), &name)))
    }

    async fn update(
        &self,
        kind: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object_name(kind, object)?;
        let namespace = object.namespace();
        self.api(kind, namespace.as_deref())
            .replace(&name, &self.post_params(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, || describe(kind, namespace.as_deref(), &name)))
    }

    async fn patch(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api(kind, namespace)
            .patch(name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, || describe(kind, namespace, name)))
    }

    async fn delete(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, || describe(kind, namespace, name)))
    }

    async fn delete_all_of(
        &self,
        kind: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<(), StoreError> {
        // An empty selector would match every object of the kind.
        if selector.is_empty() {
            return Err(StoreError::Invalid(format!(
                "refusing to delete all {} objects without a selector",
                kind.kind
            )));
        }
        let params = ListParams::default().labels(&selector.to_string());
        self.api(kind, namespace)
            .delete_collection(&DeleteParams::background(), &params)
            .await?;
        Ok(())
    }
}
