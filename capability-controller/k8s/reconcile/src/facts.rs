use crate::Error;
use capability_controller_core::Target;
use capability_controller_k8s_api::Store;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Fact annotations a pass wants on the target. `None` removes the key.
pub(crate) type Facts = BTreeMap<&'static str, Option<String>>;

/// The subset of `facts` that differs from the target's annotations, as a
/// merge-patch fragment.
pub(crate) fn changes(annotations: &BTreeMap<String, String>, facts: &Facts) -> Map<String, Value> {
    facts
        .iter()
        .filter(|(key, value)| annotations.get(**key) != value.as_ref())
        .map(|(key, value)| {
            let value = value.clone().map(Value::String).unwrap_or(Value::Null);
            (key.to_string(), value)
        })
        .collect()
}

/// Writes the changed facts in one merge patch. Only the capability's own keys
/// are sent, so capabilities sharing a target never overwrite each other's
/// annotations.
pub(crate) async fn propagate(store: &dyn Store, target: &Target, facts: &Facts) -> Result<bool, Error> {
    let changes = changes(target.annotations(), facts);
    if changes.is_empty() {
        return Ok(false);
    }

    tracing::debug!(keys = ?changes.keys().collect::<Vec<_>>(), "Propagating facts");
    let patch = json!({ "metadata": { "annotations": changes } });
    store
        .patch(target.resource(), target.namespace(), target.name(), &patch)
        .await?;
    Ok(true)
}
