use crate::{
    k8s::{self, resources},
    Error, Mode, ModeSet, Target,
};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A kind of resource a capability derives, and where instances live.
#[derive(Clone, Debug)]
pub struct DerivedKind {
    pub resource: k8s::ApiResource,
    pub modes: ModeSet,
    pub placement: Placement,
}

/// The namespace derived resources of a kind are placed in. Cleanup is scoped
/// to this namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// A fixed namespace, e.g. the ingress gateway's.
    Namespace(String),

    /// The watched resource's own namespace.
    Owner,

    /// Cluster-scoped.
    Cluster,
}

/// Renders the desired resources for each mode.
///
/// Each mode has one (possibly multi-document) YAML template. Rendering is a
/// pure function of the mode and a serializable context: templates cannot
/// read anything else, so rendering can be repeated freely.
#[derive(Debug)]
pub struct Templates {
    env: Environment<'static>,
    by_mode: BTreeMap<Mode, &'static str>,
    kinds: Vec<DerivedKind>,
}

/// A rendered resource and the kind it was declared as.
#[derive(Clone, Debug)]
pub struct Desired<'t> {
    pub kind: &'t DerivedKind,
    pub object: k8s::DynamicObject,
}

// === impl Placement ===

impl Placement {
    pub fn namespace<'a>(&'a self, target: &'a Target) -> Result<Option<&'a str>, Error> {
        match self {
            Self::Namespace(ns) => Ok(Some(ns)),
            Self::Owner => target.require_namespace().map(Some),
            Self::Cluster => Ok(None),
        }
    }
}

// === impl Templates ===

impl Default for Templates {
    fn default() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self {
            env,
            by_mode: BTreeMap::new(),
            kinds: Vec::new(),
        }
    }
}

impl Templates {
    /// Registers the template for `mode`, declaring the kinds it may render.
    pub fn add(
        &mut self,
        mode: Mode,
        name: &'static str,
        source: &'static str,
        kinds: impl IntoIterator<Item = (k8s::ApiResource, Placement)>,
    ) -> Result<(), Error> {
        self.env
            .add_template(name, source)
            .map_err(|source| Error::Render {
                template: name.to_string(),
                source,
            })?;

        for (resource, placement) in kinds {
            match self
                .kinds
                .iter_mut()
                .find(|k| k.resource == resource && k.placement == placement)
            {
                Some(kind) => {
                    kind.modes.insert(mode.clone());
                }
                None => self.kinds.push(DerivedKind {
                    resource,
                    modes: Some(mode.clone()).into_iter().collect(),
                    placement,
                }),
            }
        }
        self.by_mode.insert(mode, name);
        Ok(())
    }

    pub fn kinds(&self) -> &[DerivedKind] {
        &self.kinds
    }

    pub fn kinds_for<'t>(&'t self, mode: &'t Mode) -> impl Iterator<Item = &'t DerivedKind> + 't {
        self.kinds.iter().filter(move |k| k.modes.contains(mode))
    }

    /// Renders the resources `mode` requires. Unknown modes render nothing.
    pub fn render<C: Serialize>(&self, mode: &Mode, context: &C) -> Result<Vec<Desired<'_>>, Error> {
        let Some(name) = self.by_mode.get(mode) else {
            return Ok(Vec::new());
        };

        let template = self.env.get_template(name).map_err(|source| Error::Render {
            template: name.to_string(),
            source,
        })?;
        let rendered = template.render(context).map_err(|source| Error::Render {
            template: name.to_string(),
            source,
        })?;

        let mut desired = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&rendered) {
            let value = serde_json::Value::deserialize(document).map_err(|source| Error::Yaml {
                template: name.to_string(),
                source,
            })?;
            if value.is_null() {
                continue;
            }

            let object: k8s::DynamicObject =
                serde_json::from_value(value).map_err(|source| Error::Object {
                    template: name.to_string(),
                    source,
                })?;
            let kind = object
                .types
                .as_ref()
                .and_then(|types| {
                    self.kinds
                        .iter()
                        .find(|k| k.modes.contains(mode) && resources::is_kind(&k.resource, types))
                })
                .ok_or_else(|| Error::UndeclaredKind {
                    template: name.to_string(),
                    mode: mode.to_string(),
                    kind: object
                        .types
                        .as_ref()
                        .map(|t| format!("{}/{}", t.api_version, t.kind))
                        .unwrap_or_else(|| "an untyped object".to_string()),
                })?;
            if object.metadata.name.is_none() {
                return Err(Error::MissingField {
                    kind: kind.resource.kind.clone(),
                    field: "metadata.name",
                });
            }

            desired.push(Desired { kind, object });
        }

        Ok(desired)
    }
}

// === impl Desired ===

impl Desired<'_> {
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    /// Places the object in its kind's namespace.
    ///
    /// Objects that name no namespace are moved into it; objects that name a
    /// different one are rejected, since cleanup would never find them.
    pub fn place(mut self, target: &Target) -> Result<Self, Error> {
        let expected = self.kind.placement.namespace(target)?;
        match (expected, self.object.metadata.namespace.as_deref()) {
            (Some(ns), None) => self.object.metadata.namespace = Some(ns.to_string()),
            (expected, actual) if expected == actual => {}
            (expected, actual) => {
                return Err(Error::Placement {
                    kind: self.kind.resource.kind.clone(),
                    name: self.name().to_string(),
                    expected: expected.map(Into::into),
                    actual: actual.map(Into::into),
                })
            }
        }
        Ok(self)
    }
}
