use crate::{retry, Backoff, Error};
use capability_controller_core::Target;
use capability_controller_k8s_api::{DynamicObject, Store, StoreError};

/// Adds `finalizer` to the target if it is missing. Returns whether a write
/// was made.
pub(crate) async fn ensure(
    store: &dyn Store,
    target: &Target,
    finalizer: &str,
    conflicts: &Backoff,
) -> Result<bool, Error> {
    if target.has_finalizer(finalizer) {
        return Ok(false);
    }
    update(store, target, conflicts, move |finalizers| {
        if finalizers.iter().any(|f| f == finalizer) {
            return false;
        }
        finalizers.push(finalizer.to_string());
        true
    })
    .await
}

/// Removes `finalizer` from the target, letting its deletion complete.
pub(crate) async fn release(
    store: &dyn Store,
    target: &Target,
    finalizer: &str,
    conflicts: &Backoff,
) -> Result<bool, Error> {
    update(store, target, conflicts, move |finalizers| {
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        finalizers.len() != before
    })
    .await
}

/// Re-reads the target and updates its finalizers if `edit` changed them.
async fn update(
    store: &dyn Store,
    target: &Target,
    conflicts: &Backoff,
    edit: impl Fn(&mut Vec<String>) -> bool + Sync,
) -> Result<bool, Error> {
    let edit = &edit;
    retry(conflicts, StoreError::is_conflict, move || {
        update_once(store, target, edit)
    })
    .await
    .map_err(|error| match error {
        StoreError::Conflict(resource) => Error::Conflict {
            resource,
            attempts: conflicts.attempts,
        },
        error => error.into(),
    })
}

async fn update_once(
    store: &dyn Store,
    target: &Target,
    edit: &(dyn Fn(&mut Vec<String>) -> bool + Sync),
) -> Result<bool, StoreError> {
    let Some(mut current) = fetch(store, target).await? else {
        return Ok(false);
    };
    let finalizers = current.metadata.finalizers.get_or_insert_with(Vec::new);
    if !edit(finalizers) {
        return Ok(false);
    }
    store.update(target.resource(), &current).await?;
    Ok(true)
}

/// Fetches the current revision of the target. A missing or recreated target
/// yields `None`.
async fn fetch(store: &dyn Store, target: &Target) -> Result<Option<DynamicObject>, StoreError> {
    match store
        .get(target.resource(), target.namespace(), target.name())
        .await
    {
        Ok(current) if current.metadata.uid.as_deref() == Some(target.owner().uid()) => {
            Ok(Some(current))
        }
        Ok(_) => Ok(None),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}
