//! Capability controller core
//!
//! A capability (routing, authorization) is granted to a workload by annotating
//! a watched resource. This crate holds everything about a capability that can
//! be computed without talking to the cluster:
//!
//! - which modes a watched resource requests ([`Modes`]);
//! - which collaborators it selects ([`SelectorTemplates`]);
//! - which derived resources each mode requires ([`Templates`]);
//! - how those resources are stamped with their owner ([`Owner`]);
//! - which facts (addresses) are reported back for each mode.
//!
//! ```text
//! [ Target ] -> [ Modes ] -> [ Context ] -> [ Templates ] -> [ Desired ] + [ Owner labels ]
//! ```
//!
//! Reconciling these against a store lives in the `k8s-reconcile` crate.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authorization;
mod capability;
mod error;
mod mode;
mod ownership;
pub mod routing;
mod selector;
mod target;
mod template;

pub use self::{
    capability::Capability,
    error::Error,
    mode::{Mode, ModeSet, Modes},
    ownership::{Owner, OWNER_KIND, OWNER_NAME, OWNER_UID, OWNER_MODE},
    selector::SelectorTemplates,
    target::{Lifecycle, Target},
    template::{Desired, DerivedKind, Placement, Templates},
};
pub use capability_controller_k8s_api as k8s;
