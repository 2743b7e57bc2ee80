#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod resources;
mod store;

pub use self::{
    labels::Selector,
    store::{describe, KubeStore, Store, StoreError},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Service, ServicePort, ServiceSpec},
};
pub use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind, ObjectMeta, ResourceExt, TypeMeta},
    Client, Resource,
};
