//! Exposes a workload's services outside of its namespace.
//!
//! - `external` publishes each service port through the cluster ingress, as a
//!   `Route` plus an ingress `VirtualService`, reachable at
//!   `<svc>-<port>-<ns>.<ingress-domain>`.
//! - `public` publishes each service port inside the mesh through the ingress
//!   gateway, as a `Service`, `Gateway`, `VirtualService` and
//!   `DestinationRule`, reachable at
//!   `<svc>-<port>-<ns>.<gateway-ns>.svc.<cluster-domain>`.
//!
//! All derived resources live in the gateway namespace.

use crate::{
    k8s::{self, labels::Map, resources},
    Capability, Error, Mode, Modes, Placement, SelectorTemplates, Target, Templates,
};
use serde::Serialize;

pub const MODE_PREFIX: &str = "routing.opendatahub.io/export-mode-";
pub const FINALIZER: &str = "routing.opendatahub.io/finalizer";
pub const EXTERNAL_ADDRESSES: &str = "routing.opendatahub.io/external-addresses";
pub const PUBLIC_ADDRESSES: &str = "routing.opendatahub.io/public-addresses";

pub const EXTERNAL: &str = "external";
pub const PUBLIC: &str = "public";

#[derive(Clone, Debug)]
pub struct Config {
    pub gateway_namespace: String,
    pub ingress_service: String,
    pub ingress_selector_key: String,
    pub ingress_selector_value: String,
    pub ingress_domain: String,
    pub cluster_domain: String,
    pub selector: SelectorTemplates,
}

#[derive(Debug)]
pub struct Routing {
    config: Config,
    modes: Modes,
    templates: Templates,
    services: k8s::ApiResource,
}

/// Renders the resources exposing a single service port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Context {
    pub base_name: String,
    pub service_name: String,
    pub service_namespace: String,
    pub service_host: String,
    pub port_name: String,
    pub port: i32,
    pub protocol: &'static str,
    pub external_host: String,
    pub public_host: String,
    pub gateway_namespace: String,
    pub ingress_service: String,
    pub ingress_selector_key: String,
    pub ingress_selector_value: String,
}

// === impl Config ===

impl Config {
    /// Selects services labeled as exported that belong to the target.
    pub fn default_selector() -> SelectorTemplates {
        SelectorTemplates::new(
            [
                ("routing.opendatahub.io/exported", "true"),
                ("app.kubernetes.io/part-of", "{{ metadata.name }}"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        )
    }
}

// === impl Routing ===

impl Routing {
    pub fn new(config: Config) -> Result<Self, Error> {
        let gateway = || Placement::Namespace(config.gateway_namespace.clone());

        let mut templates = Templates::default();
        templates.add(
            Mode::from(EXTERNAL),
            "routing/external.yaml",
            include_str!("../templates/routing/external.yaml"),
            [
                (resources::route(), gateway()),
                (resources::virtual_service(), gateway()),
            ],
        )?;
        templates.add(
            Mode::from(PUBLIC),
            "routing/public.yaml",
            include_str!("../templates/routing/public.yaml"),
            [
                (resources::service(), gateway()),
                (resources::gateway(), gateway()),
                (resources::virtual_service(), gateway()),
                (resources::destination_rule(), gateway()),
            ],
        )?;

        Ok(Self {
            modes: Modes::new(MODE_PREFIX, [EXTERNAL, PUBLIC]),
            templates,
            services: resources::service(),
            config,
        })
    }

    fn context(&self, service: &str, namespace: &str, port: &k8s::ServicePort) -> Context {
        let port_name = port
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| port.port.to_string());
        let base_name = format!("{service}-{port_name}-{namespace}");
        let Config {
            gateway_namespace,
            ingress_service,
            ingress_selector_key,
            ingress_selector_value,
            ingress_domain,
            cluster_domain,
            ..
        } = &self.config;

        Context {
            service_host: format!("{service}.{namespace}.svc.{cluster_domain}"),
            external_host: format!("{base_name}.{ingress_domain}"),
            public_host: format!("{base_name}.{gateway_namespace}.svc.{cluster_domain}"),
            protocol: protocol(&port_name, port.app_protocol.as_deref()),
            service_name: service.to_string(),
            service_namespace: namespace.to_string(),
            port: port.port,
            port_name,
            base_name,
            gateway_namespace: gateway_namespace.clone(),
            ingress_service: ingress_service.clone(),
            ingress_selector_key: ingress_selector_key.clone(),
            ingress_selector_value: ingress_selector_value.clone(),
        }
    }
}

impl Capability for Routing {
    type Context = Context;

    fn name(&self) -> &'static str {
        "routing"
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

    fn collaborator(&self) -> Option<&k8s::ApiResource> {
        Some(&self.services)
    }

    fn contexts(
        &self,
        target: &Target,
        _selector: &Map,
        collaborators: &[k8s::DynamicObject],
    ) -> Result<Vec<Context>, Error> {
        let namespace = target.require_namespace()?;

        let mut contexts = Vec::new();
        for object in collaborators {
            let name = object.metadata.name.clone().unwrap_or_default();
            let service = serde_json::to_value(object)
                .and_then(serde_json::from_value::<k8s::Service>)
                .map_err(|e| Error::Collaborator {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            let ports = service
                .spec
                .and_then(|spec| spec.ports)
                .unwrap_or_default();
            if ports.is_empty() {
                tracing::info!(%namespace, service = %name, "Service exposes no ports");
            }
            for port in ports.iter() {
                contexts.push(self.context(&name, namespace, port));
            }
        }
        Ok(contexts)
    }

    fn fact(&self, mode: &Mode) -> Option<&'static str> {
        match mode.as_str() {
            EXTERNAL => Some(EXTERNAL_ADDRESSES),
            PUBLIC => Some(PUBLIC_ADDRESSES),
            _ => None,
        }
    }

    fn address(&self, mode: &Mode, context: &Context) -> Option<String> {
        match mode.as_str() {
            EXTERNAL => Some(context.external_host.clone()),
            PUBLIC => Some(context.public_host.clone()),
            _ => None,
        }
    }
}

/// Picks the gateway server protocol for a port.
fn protocol(port_name: &str, app_protocol: Option<&str>) -> &'static str {
    let hint = app_protocol.unwrap_or(port_name).to_ascii_lowercase();
    let hint = hint.strip_prefix("kubernetes.io/").unwrap_or(&hint);
    if hint.starts_with("grpc") {
        "GRPC"
    } else if hint.starts_with("http2") || hint.starts_with("h2c") {
        "HTTP2"
    } else {
        "HTTP"
    }
}
