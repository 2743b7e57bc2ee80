use thiserror::Error;

/// Errors computing a capability's desired state.
///
/// Every variant indicates a configuration or template defect; none of them
/// can be fixed by retrying the same input.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to resolve selector template {template:?}: {source}")]
    Selector {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("selector template {0:?} resolved to an empty key")]
    EmptySelectorKey(String),

    #[error("selector resolved to no labels")]
    EmptySelector,

    #[error("failed to render template {template}: {source}")]
    Render {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("template {template} produced invalid YAML: {source}")]
    Yaml {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("template {template} produced an invalid object: {source}")]
    Object {
        template: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("template {template} produced {kind}, which mode {mode} does not declare")]
    UndeclaredKind {
        template: String,
        mode: String,
        kind: String,
    },

    #[error("{kind} {name} must be placed in namespace {expected:?}, not {actual:?}")]
    Placement {
        kind: String,
        name: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("failed to project {kind} for template evaluation: {source}")]
    Projection {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} is missing {field}")]
    MissingField { kind: String, field: &'static str },

    #[error("invalid collaborator {name}: {reason}")]
    Collaborator { name: String, reason: String },
}
