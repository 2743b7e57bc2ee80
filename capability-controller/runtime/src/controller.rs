use crate::{
    core::{Capability, Target},
    k8s::{ApiResource, Client, DynamicObject},
    reconcile::{Error, Reconciler},
};
use futures::prelude::*;
use kube::{
    runtime::{
        controller::{self, Action},
        watcher, Controller,
    },
    Api,
};
use std::{sync::Arc, time::Duration};

#[derive(Copy, Clone, Debug)]
pub(crate) struct Settings {
    pub concurrency: u16,
    /// Re-queue delay after a successful pass, so that collaborator changes
    /// are eventually picked up.
    pub resync: Duration,
    pub error_requeue: Duration,
}

struct Context<C> {
    reconciler: Reconciler<C>,
    resource: ApiResource,
    settings: Settings,
}

/// Runs passes for every watched resource until shutdown is signaled.
pub(crate) async fn run<C: Capability>(
    reconciler: Reconciler<C>,
    client: Client,
    resource: ApiResource,
    settings: Settings,
    drain: drain::Watch,
) {
    let name = reconciler.capability().name();
    let api = Api::<DynamicObject>::all_with(client, &resource);
    let ctx = Arc::new(Context {
        reconciler,
        resource: resource.clone(),
        settings,
    });

    let passes = Controller::new_with(api, watcher::Config::default(), resource)
        .with_config(controller::Config::default().concurrency(settings.concurrency))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => tracing::trace!(namespace = ?obj.namespace, name = %obj.name, "Reconciled"),
                Err(controller::Error::ReconcilerFailed(..)) => {}
                Err(error) => tracing::warn!(%error, "Controller error"),
            }
        });

    tracing::info!(capability = %name, "Controller started");
    tokio::select! {
        () = passes => tracing::info!(capability = %name, "Controller stopped"),
        handle = drain.signaled() => {
            tracing::info!(capability = %name, "Shutting down");
            drop(handle);
        }
    }
}

async fn reconcile<C: Capability>(
    object: Arc<DynamicObject>,
    ctx: Arc<Context<C>>,
) -> Result<Action, Error> {
    let target = Target::new(ctx.resource.clone(), (*object).clone())?;
    ctx.reconciler.reconcile(&target).await?;
    Ok(Action::requeue(ctx.settings.resync))
}

fn error_policy<C: Capability>(
    object: Arc<DynamicObject>,
    error: &Error,
    ctx: Arc<Context<C>>,
) -> Action {
    tracing::warn!(
        capability = %ctx.reconciler.capability().name(),
        namespace = ?object.metadata.namespace,
        name = ?object.metadata.name,
        %error,
        "Reconciliation failed",
    );
    Action::requeue(ctx.settings.error_requeue)
}
