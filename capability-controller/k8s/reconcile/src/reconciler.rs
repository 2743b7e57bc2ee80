use crate::{
    apply, cleanup, facts, finalizer, locate, Applied, Backoff, Error, ReconcileMetrics,
};
use capability_controller_core::{Capability, Lifecycle, Mode, ModeSet, Target};
use capability_controller_k8s_api::Store;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time;
use tracing::{info_span, Instrument};

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Bounds a single pass.
    pub timeout: Duration,
    pub conflicts: Backoff,
    pub lookup: Backoff,
}

/// Reconciles watched resources for one capability.
pub struct Reconciler<C> {
    capability: C,
    store: Arc<dyn Store>,
    config: Config,
    metrics: ReconcileMetrics,
}

/// What a converging pass rendered.
struct Rendered {
    keys: HashSet<cleanup::Key>,
    facts: facts::Facts,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            conflicts: Backoff::conflicts(5),
            lookup: Backoff::lookup(5),
        }
    }
}

// === impl Reconciler ===

impl<C: Capability> Reconciler<C> {
    pub fn new(capability: C, store: Arc<dyn Store>, config: Config, metrics: ReconcileMetrics) -> Self {
        Self {
            capability,
            store,
            config,
            metrics,
        }
    }

    pub fn capability(&self) -> &C {
        &self.capability
    }

    /// Runs one pass over `target`, bounded by the configured timeout.
    ///
    /// Nothing is rolled back when a pass fails or times out; the next pass
    /// picks up from whatever state the store is in.
    pub async fn reconcile(&self, target: &Target) -> Result<(), Error> {
        let span = info_span!(
            "reconcile",
            capability = %self.capability.name(),
            target = %target.describe(),
        );
        let start = time::Instant::now();
        let result = match time::timeout(self.config.timeout, self.pass(target))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.timeout)),
        };
        self.metrics
            .reconciled(self.capability.name(), result.as_ref().map(|_| ()), start.elapsed());
        result
    }

    async fn pass(&self, target: &Target) -> Result<(), Error> {
        match target.lifecycle() {
            Lifecycle::Active => self.converge(target).await,
            Lifecycle::Deleting => self.finalize(target).await,
        }
    }

    async fn converge(&self, target: &Target) -> Result<(), Error> {
        let store = &*self.store;
        let capability = &self.capability;
        let owner = target.owner();

        if finalizer::ensure(store, target, capability.finalizer(), &self.config.conflicts).await? {
            tracing::debug!(finalizer = %capability.finalizer(), "Added finalizer");
            self.metrics.operation(capability.name(), "add_finalizer");
        }

        let requested = capability.modes().extract(target.annotations());
        let placements = cleanup::placements(capability.templates(), target)?;
        let inventory = cleanup::Inventory::take(store, placements, owner).await;
        tracing::debug!(
            requested = ?requested.iter().map(Mode::as_str).collect::<Vec<_>>(),
            held = ?inventory.modes(owner),
            "Converging",
        );

        let metrics = self.metrics.recorder(capability.name());
        let mut errors = inventory
            .delete_unused(store, owner, capability.modes().known(), &requested, metrics)
            .await;

        let rendered = if requested.is_empty() {
            Ok(Rendered {
                keys: HashSet::new(),
                facts: facts::Facts::new(),
            })
        } else {
            self.apply_requested(target, &requested, &mut errors).await
        };

        // Facts of modes that are no longer requested are always removed, even
        // when the requested ones could not be rendered.
        let mut facts = capability
            .modes()
            .known()
            .iter()
            .filter(|mode| !requested.contains(*mode))
            .filter_map(|mode| capability.fact(mode))
            .map(|key| (key, None))
            .collect::<facts::Facts>();

        match rendered {
            Ok(rendered) => {
                errors.extend(
                    inventory
                        .prune(store, owner, &requested, &rendered.keys, metrics)
                        .await,
                );
                facts.extend(rendered.facts);
            }
            Err(error) => errors.push(error),
        }

        match facts::propagate(store, target, &facts).await {
            Ok(true) => self.metrics.operation(capability.name(), "patch_facts"),
            Ok(false) => {}
            Err(error) => errors.push(error),
        }

        Error::join(errors)
    }

    /// Renders and applies the resources of every requested mode.
    ///
    /// Failures to apply individual resources are collected in `errors`; the
    /// render itself only succeeds if every resource was rendered, since
    /// pruning against a partial render would delete live resources.
    async fn apply_requested(
        &self,
        target: &Target,
        requested: &ModeSet,
        errors: &mut Vec<Error>,
    ) -> Result<Rendered, Error> {
        let capability = &self.capability;
        let store = &*self.store;

        let selector = capability.selector().resolve(&target.to_value()?)?;
        let collaborators = match capability.collaborator() {
            Some(kind) => {
                let namespace = target.require_namespace()?;
                locate::locate(store, kind, namespace, &selector, &self.config.lookup).await?
            }
            None => Vec::new(),
        };
        let contexts = capability.contexts(target, &selector, &collaborators)?;

        let mut rendered = Rendered {
            keys: HashSet::new(),
            facts: facts::Facts::new(),
        };
        for mode in requested.iter() {
            let mut addresses = Vec::new();
            for context in contexts.iter() {
                for desired in capability.templates().render(mode, context)? {
                    let mut desired = desired.place(target)?;
                    target.owner().stamp(mode, &mut desired.object);

                    let kind = &desired.kind.resource;
                    rendered.keys.insert(cleanup::key(
                        &kind.api_version,
                        desired.namespace(),
                        desired.name(),
                    ));
                    let owner = target.owner();
                    match apply(store, kind, owner, &desired.object, &self.config.conflicts).await {
                        Ok(applied) => {
                            if applied != Applied::Unchanged {
                                tracing::info!(
                                    kind = %kind.kind,
                                    namespace = ?desired.namespace(),
                                    name = %desired.name(),
                                    %mode,
                                    ?applied,
                                    "Applied derived resource",
                                );
                            }
                            self.metrics.applied(capability.name(), applied);
                        }
                        Err(error) => errors.push(error),
                    }
                }
                addresses.extend(capability.address(mode, context));
            }

            if let Some(key) = capability.fact(mode) {
                let value = (!addresses.is_empty()).then(|| addresses.join(";"));
                rendered.facts.insert(key, value);
            }
        }

        Ok(rendered)
    }

    async fn finalize(&self, target: &Target) -> Result<(), Error> {
        let store = &*self.store;
        let capability = &self.capability;
        let finalizer = capability.finalizer();
        if !target.has_finalizer(finalizer) {
            return Ok(());
        }

        let owner = target.owner();
        let placements = cleanup::placements(capability.templates(), target)?;
        let inventory = cleanup::Inventory::take(store, placements, owner).await;
        let metrics = self.metrics.recorder(capability.name());
        Error::join(inventory.delete_all(store, owner, metrics).await)?;

        if finalizer::release(store, target, finalizer, &self.config.conflicts).await? {
            tracing::info!(%finalizer, "Released finalizer");
            self.metrics.operation(capability.name(), "remove_finalizer");
        }
        Ok(())
    }
}
