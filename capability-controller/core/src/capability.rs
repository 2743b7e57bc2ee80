use crate::{
    k8s::{self, labels::Map},
    Error, Mode, Modes, SelectorTemplates, Target, Templates,
};

/// A capability granted to workloads through annotations on a watched
/// resource.
///
/// Implementations describe *what* a capability requires; converging the
/// cluster towards it is left to the reconciler. Everything here is pure.
pub trait Capability: Send + Sync + 'static {
    /// Per-endpoint data the templates are rendered with.
    type Context: serde::Serialize + std::fmt::Debug + Send + Sync;

    /// A short name used in logs and metrics.
    fn name(&self) -> &'static str;

    fn modes(&self) -> &Modes;

    /// The finalizer that gates the watched resource's deletion on cleanup.
    fn finalizer(&self) -> &'static str;

    fn selector(&self) -> &SelectorTemplates;

    fn templates(&self) -> &Templates;

    /// The kind of collaborator to look up with the resolved selector, if the
    /// capability needs any.
    fn collaborator(&self) -> Option<&k8s::ApiResource> {
        None
    }

    /// Builds a rendering context for every endpoint the target exposes.
    fn contexts(
        &self,
        target: &Target,
        selector: &Map,
        collaborators: &[k8s::DynamicObject],
    ) -> Result<Vec<Self::Context>, Error>;

    /// The annotation a mode's facts are reported under, if any.
    fn fact(&self, _mode: &Mode) -> Option<&'static str> {
        None
    }

    /// The address a mode makes an endpoint reachable at.
    fn address(&self, _mode: &Mode, _context: &Self::Context) -> Option<String> {
        None
    }
}
