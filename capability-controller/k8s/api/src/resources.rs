//! API resources for the kinds this controller watches, looks up and derives.
//!
//! Most derived kinds are third-party custom resources without generated
//! bindings, so they are addressed dynamically.

use k8s_openapi::api::core::v1::Service;
use kube::api::{ApiResource, GroupVersionKind, TypeMeta};

fn custom(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

pub fn service() -> ApiResource {
    ApiResource::erase::<Service>(&())
}

pub fn route() -> ApiResource {
    custom("route.openshift.io", "v1", "Route", "routes")
}

pub fn virtual_service() -> ApiResource {
    custom(
        "networking.istio.io",
        "v1beta1",
        "VirtualService",
        "virtualservices",
    )
}

pub fn gateway() -> ApiResource {
    custom("networking.istio.io", "v1beta1", "Gateway", "gateways")
}

pub fn destination_rule() -> ApiResource {
    custom(
        "networking.istio.io",
        "v1beta1",
        "DestinationRule",
        "destinationrules",
    )
}

pub fn authorization_policy() -> ApiResource {
    custom(
        "security.istio.io",
        "v1beta1",
        "AuthorizationPolicy",
        "authorizationpolicies",
    )
}

pub fn peer_authentication() -> ApiResource {
    custom(
        "security.istio.io",
        "v1beta1",
        "PeerAuthentication",
        "peerauthentications",
    )
}

pub fn auth_config() -> ApiResource {
    custom("authorino.kuadrant.io", "v1beta2", "AuthConfig", "authconfigs")
}

/// Checks whether an object's type metadata names the given resource.
pub fn is_kind(resource: &ApiResource, types: &TypeMeta) -> bool {
    resource.api_version == types.api_version && resource.kind == types.kind
}

/// Parses a `group/version/Kind` reference. The core group is written as
/// `version/Kind`, e.g. `v1/ConfigMap`.
pub fn parse_gvk(s: &str) -> Option<GroupVersionKind> {
    let mut parts = s.rsplitn(3, '/');
    let kind = parts.next().filter(|k| !k.is_empty())?;
    let version = parts.next().filter(|v| !v.is_empty())?;
    let group = parts.next().unwrap_or("");
    if group.contains('/') {
        return None;
    }
    Some(GroupVersionKind::gvk(group, version, kind))
}
