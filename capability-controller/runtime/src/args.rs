use crate::{
    controller::{self, Settings},
    core::{authorization, routing, SelectorTemplates},
    k8s::{labels::Map, resources, KubeStore, Store},
    reconcile::{self, Backoff, ReconcileMetrics, Reconciler},
};
use anyhow::{anyhow, bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{info, info_span, Instrument};

const FIELD_MANAGER: &str = "capability-controller";

#[derive(Debug, Parser)]
#[clap(
    name = "capability-controller",
    about = "Grants routing and authorization capabilities to annotated resources"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "capability_controller=info,warn",
        env = "CAPABILITY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The kind of resource to watch, as `group/version/Kind`.
    #[clap(long, env = "TARGET_KIND")]
    target_kind: String,

    #[clap(long, default_value = "routing,authorization", value_delimiter = ',')]
    capabilities: Vec<CapabilityName>,

    /// The namespace routing resources are created in.
    #[clap(long, default_value = "istio-system", env = "GATEWAY_NAMESPACE")]
    gateway_namespace: String,

    #[clap(long, default_value = "istio-ingressgateway")]
    ingress_service: String,

    /// The label selecting the ingress gateway pods.
    #[clap(long, default_value = "istio=ingressgateway")]
    ingress_selector: LabelArg,

    /// The domain external hosts are created under.
    #[clap(long, env = "INGRESS_DOMAIN")]
    ingress_domain: Option<String>,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// Selects the services to expose, as `key=template`. May be repeated.
    #[clap(long)]
    routing_selector: Vec<LabelArg>,

    /// Selects the workload to secure, as `key=template`. May be repeated.
    #[clap(long)]
    authorization_selector: Vec<LabelArg>,

    #[clap(long, default_value = "opendatahub-auth-provider")]
    authorization_provider: String,

    #[clap(
        long,
        default_value = "https://kubernetes.default.svc",
        value_delimiter = ','
    )]
    audiences: Vec<String>,

    /// The label that assigns auth configs to an authorization server.
    #[clap(
        long,
        default_value = "security.opendatahub.io/authorization-group=default"
    )]
    authorization_group: LabelArg,

    /// The maximum number of passes running at once, per capability.
    #[clap(long, default_value = "8")]
    concurrency: u16,

    #[clap(long, default_value = "30000")]
    reconcile_timeout_ms: u64,

    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "10")]
    error_requeue_secs: u64,

    #[clap(long, default_value = "5")]
    conflict_retries: usize,

    #[clap(long, default_value = "5")]
    lookup_attempts: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CapabilityName {
    Routing,
    Authorization,
}

/// A `key=value` label, where either side may be a template.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LabelArg(String, String);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            target_kind,
            mut capabilities,
            gateway_namespace,
            ingress_service,
            ingress_selector: LabelArg(ingress_selector_key, ingress_selector_value),
            ingress_domain,
            cluster_domain,
            routing_selector,
            authorization_selector,
            authorization_provider,
            audiences,
            authorization_group: LabelArg(group_key, group_value),
            concurrency,
            reconcile_timeout_ms,
            resync_period_secs,
            error_requeue_secs,
            conflict_retries,
            lookup_attempts,
        } = self;

        capabilities.sort();
        capabilities.dedup();
        if capabilities.is_empty() {
            bail!("no capabilities enabled");
        }
        if conflict_retries == 0 || lookup_attempts == 0 {
            bail!("--conflict-retries and --lookup-attempts must be at least 1");
        }
        let gvk = resources::parse_gvk(&target_kind)
            .ok_or_else(|| anyhow!("--target-kind must be group/version/Kind: {target_kind}"))?;

        let config = reconcile::Config {
            timeout: Duration::from_millis(reconcile_timeout_ms),
            conflicts: Backoff::conflicts(conflict_retries),
            lookup: Backoff::lookup(lookup_attempts),
        };
        let settings = Settings {
            concurrency,
            resync: Duration::from_secs(resync_period_secs),
            error_requeue: Duration::from_secs(error_requeue_secs),
        };

        let mut prom = <Registry>::default();
        let metrics =
            ReconcileMetrics::register(prom.sub_registry_with_prefix("capability_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let (resource, _) = kube::discovery::pinned_kind(&client, &gvk).await?;
        info!(kind = %resource.kind, api_version = %resource.api_version, "Watching");
        let store: Arc<dyn Store> = Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER));

        for capability in capabilities {
            match capability {
                CapabilityName::Routing => {
                    let Some(ingress_domain) = ingress_domain.clone() else {
                        bail!("--ingress-domain is required for routing");
                    };
                    let routing = routing::Routing::new(routing::Config {
                        gateway_namespace: gateway_namespace.clone(),
                        ingress_service: ingress_service.clone(),
                        ingress_selector_key: ingress_selector_key.clone(),
                        ingress_selector_value: ingress_selector_value.clone(),
                        ingress_domain,
                        cluster_domain: cluster_domain.clone(),
                        selector: selector_or(&routing_selector, routing::Config::default_selector),
                    })?;
                    let reconciler = Reconciler::new(routing, store.clone(), config, metrics.clone());
                    tokio::spawn(
                        controller::run(
                            reconciler,
                            client.clone(),
                            resource.clone(),
                            settings,
                            runtime.shutdown_handle(),
                        )
                        .instrument(info_span!("routing")),
                    );
                }

                CapabilityName::Authorization => {
                    let authorization = authorization::Authorization::new(authorization::Config {
                        provider: authorization_provider.clone(),
                        audiences: audiences.clone(),
                        group_key: group_key.clone(),
                        group_value: group_value.clone(),
                        cluster_domain: cluster_domain.clone(),
                        selector: selector_or(
                            &authorization_selector,
                            authorization::Config::default_selector,
                        ),
                    })?;
                    let reconciler =
                        Reconciler::new(authorization, store.clone(), config, metrics.clone());
                    tokio::spawn(
                        controller::run(
                            reconciler,
                            client.clone(),
                            resource.clone(),
                            settings,
                            runtime.shutdown_handle(),
                        )
                        .instrument(info_span!("authorization")),
                    );
                }
            }
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn selector_or(labels: &[LabelArg], default: impl FnOnce() -> SelectorTemplates) -> SelectorTemplates {
    if labels.is_empty() {
        return default();
    }
    SelectorTemplates::new(
        labels
            .iter()
            .map(|LabelArg(k, v)| (k.clone(), v.clone()))
            .collect::<Map>(),
    )
}

impl FromStr for CapabilityName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "routing" => Ok(Self::Routing),
            "authorization" => Ok(Self::Authorization),
            s => bail!("unknown capability: {s}"),
        }
    }
}

impl FromStr for LabelArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok(Self(k.trim().to_string(), v.to_string())),
            _ => bail!("expected key=value: {s}"),
        }
    }
}
