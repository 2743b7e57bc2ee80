use crate::{retry, Backoff, Error};
use capability_controller_k8s_api::{labels::Map, ApiResource, DynamicObject, Selector, Store};

/// Lists the collaborators matching `selector`, ordered by name.
///
/// Collaborators are created independently of the watched resource, so an
/// empty result is polled with backoff before it is reported as
/// [`Error::CollaboratorNotYetAvailable`]. Other failures are returned at once.
pub(crate) async fn locate(
    store: &dyn Store,
    kind: &ApiResource,
    namespace: &str,
    selector: &Map,
    backoff: &Backoff,
) -> Result<Vec<DynamicObject>, Error> {
    let selector = &Selector::from_map(selector.clone());
    retry(
        backoff,
        |e: &Error| matches!(e, Error::CollaboratorNotYetAvailable { .. }),
        move || list(store, kind, namespace, selector, backoff.attempts),
    )
    .await
}

async fn list(
    store: &dyn Store,
    kind: &ApiResource,
    namespace: &str,
    selector: &Selector,
    attempts: usize,
) -> Result<Vec<DynamicObject>, Error> {
    let mut found = store.list(kind, Some(namespace), selector).await?;
    if found.is_empty() {
        return Err(Error::CollaboratorNotYetAvailable {
            kind: kind.kind.clone(),
            namespace: namespace.to_string(),
            selector: selector.to_string(),
            attempts,
        });
    }
    found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(found)
}
