//! Enforces authentication and authorization in front of a workload.
//!
//! The `auth` mode places three resources next to the watched resource, all
//! selecting the workload's pods: an Istio `AuthorizationPolicy` delegating
//! decisions to an external provider, a `PeerAuthentication` requiring mTLS and
//! an Authorino `AuthConfig` validating Kubernetes tokens for the configured
//! audiences.

use crate::{
    k8s::{self, labels::Map, resources},
    Capability, Error, Mode, Modes, Placement, SelectorTemplates, Target, Templates,
};
use serde::Serialize;

pub const MODE_PREFIX: &str = "security.opendatahub.io/enable-";
pub const FINALIZER: &str = "security.opendatahub.io/finalizer";

pub const AUTH: &str = "auth";

#[derive(Clone, Debug)]
pub struct Config {
    /// The extension provider the authorization policy delegates to.
    pub provider: String,
    pub audiences: Vec<String>,
    /// The label Authorino uses to pick up auth configs.
    pub group_key: String,
    pub group_value: String,
    pub cluster_domain: String,
    pub selector: SelectorTemplates,
}

#[derive(Debug)]
pub struct Authorization {
    config: Config,
    modes: Modes,
    templates: Templates,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Context {
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub selector: Map,
    pub provider: String,
    pub audiences: Vec<String>,
    pub group_key: String,
    pub group_value: String,
}

// === impl Config ===

impl Config {
    /// Selects the workload pods named after the target.
    pub fn default_selector() -> SelectorTemplates {
        SelectorTemplates::new(
            Some((
                "app.kubernetes.io/name".to_string(),
                "{{ metadata.name }}".to_string(),
            ))
            .into_iter()
            .collect(),
        )
    }
}

// === impl Authorization ===

impl Authorization {
    pub fn new(config: Config) -> Result<Self, Error> {
        let mut templates = Templates::default();
        templates.add(
            Mode::from(AUTH),
            "authorization/auth.yaml",
            include_str!("../templates/authorization/auth.yaml"),
            [
                (resources::authorization_policy(), Placement::Owner),
                (resources::peer_authentication(), Placement::Owner),
                (resources::auth_config(), Placement::Owner),
            ],
        )?;

        Ok(Self {
            modes: Modes::new(MODE_PREFIX, [AUTH]),
            templates,
            config,
        })
    }
}

impl Capability for Authorization {
    type Context = Context;

    fn name(&self) -> &'static str {
        "authorization"
    }

    fn modes(&self) -> &Modes {
        &self.modes
    }

    fn finalizer(&self) -> &'static str {
        FINALIZER
    }

    fn selector(&self) -> &SelectorTemplates {
        &self.config.selector
    }

    fn templates(&self) -> &Templates {
        &self.templates
    }

    fn contexts(
        &self,
        target: &Target,
        selector: &Map,
        _collaborators: &[k8s::DynamicObject],
    ) -> Result<Vec<Context>, Error> {
        // An empty selector would apply the policies to every workload in the
        // namespace.
        if selector.is_empty() {
            return Err(Error::EmptySelector);
        }

        let namespace = target.require_namespace()?;
        Ok(vec![Context {
            name: target.name().to_string(),
            namespace: namespace.to_string(),
            host: format!(
                "{}.{}.svc.{}",
                target.name(),
                namespace,
                self.config.cluster_domain
            ),
            selector: selector.clone(),
            provider: self.config.provider.clone(),
            audiences: self.config.audiences.clone(),
            group_key: self.config.group_key.clone(),
            group_value: self.config.group_value.clone(),
        }])
    }
}
