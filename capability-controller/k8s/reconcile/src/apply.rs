//! Create-or-update of a single derived resource.

use crate::{retry, Backoff, Error};
use capability_controller_core::Owner;
use capability_controller_k8s_api::{
    describe, labels::Map, ApiResource, DynamicObject, Store, StoreError,
};
use serde_json::Value;

/// What applying a desired object did to the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Converges the stored object towards `desired`.
///
/// Only the fields `desired` sets are reconciled; fields the server (or
/// another writer) added are left in place, so defaulting never causes an
/// update. Conflicting updates are re-read and retried. An object recorded
/// under a different owner is left untouched.
pub async fn apply<S: Store + ?Sized>(
    store: &S,
    kind: &ApiResource,
    owner: &Owner,
    desired: &DynamicObject,
    conflicts: &Backoff,
) -> Result<Applied, Error> {
    let is_conflict = |error: &Error| matches!(error, Error::Store(StoreError::Conflict(_)));
    retry(conflicts, is_conflict, move || {
        apply_once(store, kind, owner, desired)
    })
    .await
    .map_err(|error| match error {
        Error::Store(StoreError::Conflict(resource)) => Error::Conflict {
            resource,
            attempts: conflicts.attempts,
        },
        error => error,
    })
}

async fn apply_once<S: Store + ?Sized>(
    store: &S,
    kind: &ApiResource,
    owner: &Owner,
    desired: &DynamicObject,
) -> Result<Applied, Error> {
    let namespace = desired.metadata.namespace.as_deref();
    let name = desired.metadata.name.as_deref().unwrap_or_default();

    let current = match store.get(kind, namespace, name).await {
        Ok(current) => current,
        Err(error) if error.is_not_found() => match store.create(kind, desired).await {
            Ok(_) => {
                tracing::debug!(resource = %describe(kind, namespace, name), "Created");
                return Ok(Applied::Created);
            }
            // Someone else created it first; reconcile against theirs.
            Err(error) if error.is_already_exists() => store.get(kind, namespace, name).await?,
            Err(error) => return Err(error.into()),
        },
        Err(error) => return Err(error.into()),
    };

    if let Some(holder) = owner.foreign_owner(&current) {
        return Err(Error::OwnedElsewhere {
            resource: describe(kind, namespace, name),
            owner: holder,
        });
    }

    if contains(&current, desired) {
        return Ok(Applied::Unchanged);
    }

    store.update(kind, &merge(current, desired)).await?;
    tracing::debug!(resource = %describe(kind, namespace, name), "Updated");
    Ok(Applied::Updated)
}

/// Top-level fields that are never reconciled.
const UNOWNED: &[&str] = &["apiVersion", "kind", "metadata", "status"];

fn owned_fields(object: &DynamicObject) -> impl Iterator<Item = (&String, &Value)> {
    object
        .data
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(k, _)| !UNOWNED.contains(&k.as_str()))
}

/// Checks whether every field `desired` sets has the same value in `current`.
pub(crate) fn contains(current: &DynamicObject, desired: &DynamicObject) -> bool {
    map_contains(&current.metadata.labels, &desired.metadata.labels)
        && map_contains(&current.metadata.annotations, &desired.metadata.annotations)
        && owned_fields(desired).all(|(k, v)| value_contains(current.data.get(k), v))
}

fn map_contains(current: &Option<Map>, desired: &Option<Map>) -> bool {
    desired
        .iter()
        .flatten()
        .all(|(k, v)| current.as_ref().and_then(|c| c.get(k)) == Some(v))
}

fn value_contains(current: Option<&Value>, desired: &Value) -> bool {
    match (current, desired) {
        (None | Some(Value::Null), Value::Null) => true,
        (Some(Value::Object(current)), Value::Object(desired)) => desired
            .iter()
            .all(|(k, v)| value_contains(current.get(k), v)),
        // Lists are owned as a whole, but their elements may be defaulted.
        (Some(Value::Array(current)), Value::Array(desired)) => {
            current.len() == desired.len()
                && current
                    .iter()
                    .zip(desired)
                    .all(|(c, d)| value_contains(Some(c), d))
        }
        (Some(current), desired) => current == desired,
        (None, _) => false,
    }
}

/// Deep-merges the fields `desired` sets into `current`, keeping `current`'s
/// resource version so the update is rejected if it is stale.
pub(crate) fn merge(mut current: DynamicObject, desired: &DynamicObject) -> DynamicObject {
    for (field, desired) in [
        (&mut current.metadata.labels, &desired.metadata.labels),
        (&mut current.metadata.annotations, &desired.metadata.annotations),
    ] {
        if let Some(desired) = desired {
            field
                .get_or_insert_with(Default::default)
                .extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    if !current.data.is_object() {
        current.data = Value::Object(Default::default());
    }
    if let Value::Object(data) = &mut current.data {
        for (k, v) in owned_fields(desired) {
            match data.get_mut(k) {
                Some(existing) => merge_value(existing, v),
                None => {
                    data.insert(k.clone(), v.clone());
                }
            }
        }
    }
    current
}

fn merge_value(current: &mut Value, desired: &Value) {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            for (k, v) in desired {
                match current.get_mut(k) {
                    Some(existing) => merge_value(existing, v),
                    None => {
                        current.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (current, desired) => *current = desired.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn desired() -> DynamicObject {
        object(json!({
            "apiVersion": "networking.istio.io/v1beta1",
            "kind": "Gateway",
            "metadata": {
                "name": "web",
                "namespace": "istio-system",
                "labels": { "platform.opendatahub.io/type": "public" },
            },
            "spec": {
                "servers": [{ "hosts": ["web.example.com"], "port": { "number": 80 } }],
            },
        }))
    }

    #[test]
    fn server_defaults_are_contained() {
        let current = object(json!({
            "apiVersion": "networking.istio.io/v1beta1",
            "kind": "Gateway",
            "metadata": {
                "name": "web",
                "namespace": "istio-system",
                "resourceVersion": "12",
                "labels": {
                    "platform.opendatahub.io/type": "public",
                    "extra": "label",
                },
            },
            "spec": {
                "servers": [{
                    "hosts": ["web.example.com"],
                    "port": { "number": 80, "targetPort": 80 },
                }],
            },
            "status": { "observed": true },
        }));
        assert!(contains(&current, &desired()));
    }

    #[test]
    fn changed_fields_are_not_contained() {
        let mut current = desired();
        current.data["spec"]["servers"][0]["hosts"] = json!(["old.example.com"]);
        assert!(!contains(&current, &desired()));

        let mut current = desired();
        current.metadata.labels = None;
        assert!(!contains(&current, &desired()));

        let mut current = desired();
        current.data["spec"]["servers"] = json!([]);
        assert!(!contains(&current, &desired()));
    }

    #[test]
    fn merges_into_current() {
        let mut current = desired();
        current.metadata.resource_version = Some("7".to_string());
        current.metadata.labels = Some(
            Some(("extra".to_string(), "label".to_string()))
                .into_iter()
                .collect(),
        );
        current.data["spec"]["servers"][0]["hosts"] = json!(["old.example.com"]);
        current.data["spec"]["selector"] = json!({ "istio": "ingressgateway" });

        let merged = merge(current, &desired());
        assert!(contains(&merged, &desired()));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(merged.metadata.labels.as_ref().unwrap()["extra"], "label");
        assert_eq!(
            merged.data["spec"],
            json!({
                "selector": { "istio": "ingressgateway" },
                "servers": [{ "hosts": ["web.example.com"], "port": { "number": 80 } }],
            })
        );
    }
}
