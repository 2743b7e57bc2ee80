//! Discovery and deletion of derived resources through their ownership labels.

use crate::{metrics::Recorder, Error};
use capability_controller_core::{DerivedKind, ModeSet, Owner, Target, Templates};
use capability_controller_k8s_api::{describe, DynamicObject, Store};
use std::collections::{BTreeSet, HashSet};

/// The derived resources an owner holds, as found in the store.
#[derive(Debug)]
pub(crate) enum Inventory<'t> {
    Listed(Vec<Held<'t>>),

    /// Some kind could not be listed. Cleanup then has to assume every known
    /// mode may hold resources of every kind it declares.
    Unknown(Vec<Placed<'t>>),
}

/// A derived kind and the namespace its resources are placed in.
#[derive(Clone, Debug)]
pub(crate) struct Placed<'t> {
    pub kind: &'t DerivedKind,
    pub namespace: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Held<'t> {
    pub placed: Placed<'t>,
    pub objects: Vec<DynamicObject>,
}

/// Identifies a desired object for pruning.
pub(crate) type Key = (String, Option<String>, String);

pub(crate) fn key(api_version: &str, namespace: Option<&str>, name: &str) -> Key {
    (
        api_version.to_string(),
        namespace.map(Into::into),
        name.to_string(),
    )
}

/// Resolves where each derived kind's resources live for `target`.
pub(crate) fn placements<'t>(
    templates: &'t Templates,
    target: &Target,
) -> Result<Vec<Placed<'t>>, Error> {
    templates
        .kinds()
        .iter()
        .map(|kind| {
            let namespace = kind.placement.namespace(target)?.map(Into::into);
            Ok(Placed { kind, namespace })
        })
        .collect()
}

// === impl Inventory ===

impl<'t> Inventory<'t> {
    /// Lists every derived kind in its namespace by owner labels.
    pub(crate) async fn take(store: &dyn Store, placements: Vec<Placed<'t>>, owner: &Owner) -> Self {
        let selector = owner.selector();
        let mut held = Vec::with_capacity(placements.len());
        for placed in placements.iter() {
            let kind = &placed.kind.resource;
            match store
                .list(kind, placed.namespace.as_deref(), &selector)
                .await
            {
                Ok(objects) => held.push(Held {
                    placed: placed.clone(),
                    objects,
                }),
                Err(error) => {
                    tracing::warn!(kind = %kind.kind, %error, "Failed to list owned resources");
                    break;
                }
            }
        }

        if held.len() == placements.len() {
            Self::Listed(held)
        } else {
            Self::Unknown(placements)
        }
    }

    /// The mode labels found on owned resources.
    pub(crate) fn modes(&self, owner: &Owner) -> Option<BTreeSet<String>> {
        match self {
            Self::Listed(held) => Some(
                held.iter()
                    .flat_map(|h| h.objects.iter())
                    .filter_map(|o| owner.mode_of(o))
                    .map(Into::into)
                    .collect(),
            ),
            Self::Unknown(_) => None,
        }
    }

    /// Deletes the resources of every mode not in `requested`, including
    /// resources labeled with modes the capability does not know.
    pub(crate) async fn delete_unused(
        &self,
        store: &dyn Store,
        owner: &Owner,
        known: &ModeSet,
        requested: &ModeSet,
        metrics: Recorder<'_>,
    ) -> Vec<Error> {
        let is_requested = |mode: &str| requested.iter().any(|m| m.as_str() == mode);

        let mut targets = Vec::new();
        match self {
            Self::Listed(held) => {
                for h in held {
                    let modes = h
                        .objects
                        .iter()
                        .filter_map(|o| owner.mode_of(o))
                        .filter(|m| !is_requested(m))
                        .collect::<BTreeSet<_>>();
                    targets.extend(modes.into_iter().map(|m| (&h.placed, m.to_string())));
                }
            }
            Self::Unknown(placements) => {
                for mode in known.iter().filter(|m| !is_requested(m.as_str())) {
                    targets.extend(
                        placements
                            .iter()
                            .filter(|p| p.kind.modes.contains(mode))
                            .map(|p| (p, mode.to_string())),
                    );
                }
            }
        }

        let mut errors = Vec::new();
        for (placed, mode) in targets {
            let kind = &placed.kind.resource;
            let namespace = placed.namespace.as_deref();
            match store
                .delete_all_of(kind, namespace, &owner.mode_selector(&mode))
                .await
            {
                Ok(()) => {
                    tracing::info!(kind = %kind.kind, ?namespace, %mode, "Deleted resources of unused mode");
                    metrics.operation("delete_collection");
                }
                Err(error) => errors.push(error.into()),
            }
        }
        errors
    }

    /// Deletes resources of requested modes that are no longer desired, e.g.
    /// those of a port that was removed from a service.
    pub(crate) async fn prune(
        &self,
        store: &dyn Store,
        owner: &Owner,
        requested: &ModeSet,
        desired: &HashSet<Key>,
        metrics: Recorder<'_>,
    ) -> Vec<Error> {
        let Self::Listed(held) = self else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for h in held {
            let kind = &h.placed.kind.resource;
            for object in h.objects.iter() {
                let Some(mode) = owner.mode_of(object) else {
                    continue;
                };
                if !requested.iter().any(|m| m.as_str() == mode) {
                    continue;
                }
                let namespace = object.metadata.namespace.as_deref();
                let name = object.metadata.name.as_deref().unwrap_or_default();
                if desired.contains(&key(&kind.api_version, namespace, name)) {
                    continue;
                }

                match store.delete(kind, namespace, name).await {
                    Ok(()) => {
                        tracing::info!(resource = %describe(kind, namespace, name), %mode, "Pruned stale resource");
                        metrics.operation("prune");
                    }
                    Err(error) if error.is_not_found() => {}
                    Err(error) => errors.push(error.into()),
                }
            }
        }
        errors
    }

    /// Deletes every resource the owner holds, in all modes.
    pub(crate) async fn delete_all(
        &self,
        store: &dyn Store,
        owner: &Owner,
        metrics: Recorder<'_>,
    ) -> Vec<Error> {
        let placements = match self {
            Self::Listed(held) => held
                .iter()
                .filter(|h| !h.objects.is_empty())
                .map(|h| &h.placed)
                .collect::<Vec<_>>(),
            Self::Unknown(placements) => placements.iter().collect(),
        };

        let selector = owner.selector();
        let mut errors = Vec::new();
        for placed in placements {
            let kind = &placed.kind.resource;
            let namespace = placed.namespace.as_deref();
            match store.delete_all_of(kind, namespace, &selector).await {
                Ok(()) => {
                    tracing::info!(kind = %kind.kind, ?namespace, "Deleted owned resources");
                    metrics.operation("delete_collection");
                }
                Err(error) => errors.push(error.into()),
            }
        }
        errors
    }
}
