//! Converges the derived resources of a capability against a [`Store`].
//!
//! A pass over a watched resource either converges it (`Active`) or tears
//! down everything it owns before releasing its finalizer (`Deleting`).
//! Independent steps of a pass run to completion and their failures are
//! reported together; the caller re-queues failed passes.
//!
//! [`Store`]: capability_controller_k8s_api::Store

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod apply;
mod cleanup;
mod error;
mod facts;
mod finalizer;
mod locate;
mod metrics;
mod reconciler;
mod retry;


pub use self::{
    apply::{apply, Applied},
    error::Error,
    metrics::ReconcileMetrics,
    reconciler::{Config, Reconciler},
    retry::{retry, Backoff},
};
