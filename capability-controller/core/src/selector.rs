use crate::{k8s::labels::Map, Error};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

/// Label selector templates whose keys and values may reference fields of the
/// watched resource, e.g. `app.kubernetes.io/part-of: "{{ metadata.name }}"`.
///
/// Templates are evaluated by a sandboxed, strict evaluator against a
/// read-only projection of the resource in which every object key is
/// lower-cased. Referencing a field that does not exist is an error rather
/// than an empty string, since a silently wrong selector would target the
/// wrong collaborators.
#[derive(Clone, Debug, Default)]
pub struct SelectorTemplates(Map);

impl SelectorTemplates {
    pub fn new(templates: Map) -> Self {
        Self(templates)
    }

    pub fn templates(&self) -> &Map {
        &self.0
    }

    pub fn resolve(&self, source: &Value) -> Result<Map, Error> {
        let projection = project(source.clone());

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let render = |template: &str| {
            env.render_str(template, &projection)
                .map_err(|source| Error::Selector {
                    template: template.to_string(),
                    source,
                })
        };

        let mut resolved = Map::new();
        for (key, value) in self.0.iter() {
            let k = render(key)?;
            if k.trim().is_empty() {
                return Err(Error::EmptySelectorKey(key.clone()));
            }
            let v = render(value)?;
            resolved.insert(k, v);
        }
        Ok(resolved)
    }
}

/// Lower-cases every object key, recursively.
fn project(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), project(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(project).collect()),
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use serde_json::json;

    fn component() -> Value {
        json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {
                "name": "comp1",
                "namespace": "ns1",
                "labels": {
                    "app.kubernetes.io/instance": "Instance-1",
                },
            },
        })
    }

    #[test]
    fn resolves_values() {
        let templates = SelectorTemplates::new(btreemap! {
            "routing.opendatahub.io/exported".to_string() => "true".to_string(),
            "app.kubernetes.io/part-of".to_string() => "{{ metadata.name }}".to_string(),
        });
        let resolved = templates.resolve(&component()).unwrap();
        assert_eq!(
            resolved,
            btreemap! {
                "routing.opendatahub.io/exported".to_string() => "true".to_string(),
                "app.kubernetes.io/part-of".to_string() => "comp1".to_string(),
            }
        );
    }

    #[test]
    fn resolves_keys_over_lower_cased_fields() {
        let templates = SelectorTemplates::new(btreemap! {
            "{{ kind | lower }}.opendatahub.io/name".to_string() => "{{ metadata.name }}".to_string(),
            "instance".to_string() => "{{ metadata.labels[\"app.kubernetes.io/instance\"] }}".to_string(),
            "api".to_string() => "{{ apiversion }}".to_string(),
        });
        let resolved = templates.resolve(&component()).unwrap();
        assert_eq!(resolved["component.opendatahub.io/name"], "comp1");
        assert_eq!(resolved["instance"], "Instance-1", "values keep their case");
        assert_eq!(
            resolved["api"],
            "components.platform.opendatahub.io/v1alpha1"
        );
    }

    #[test]
    fn missing_fields_fail() {
        let templates = SelectorTemplates::new(btreemap! {
            "app".to_string() => "{{ metadata.missing }}".to_string(),
        });
        let error = templates.resolve(&component()).unwrap_err();
        assert!(matches!(error, Error::Selector { .. }), "{error}");

        let templates = SelectorTemplates::new(btreemap! {
            "app".to_string() => "{{ spec.workload.name }}".to_string(),
        });
        assert!(templates.resolve(&component()).is_err());
    }

    #[test]
    fn empty_keys_fail() {
        let templates = SelectorTemplates::new(btreemap! {
            "{{ '' }}".to_string() => "x".to_string(),
        });
        assert!(matches!(
            templates.resolve(&component()),
            Err(Error::EmptySelectorKey(_))
        ));
    }
}
