use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub type Map = BTreeMap<String, String>;

/// Selects resources by exact label matches.
///
/// Derived resources are discovered and deleted exclusively through these
/// selectors, so the rendered form must agree with the store's own matching.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    match_labels: Map,
}

// === Selector ===

impl Selector {
    pub fn from_map(map: Map) -> Self {
        Self { match_labels: map }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    pub fn match_labels(&self) -> &Map {
        &self.match_labels
    }

    /// Returns a selector that additionally requires `key=value`.
    pub fn with(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Checks an object's labels the way the API server evaluates the
    /// selector. Unlabeled objects only match the empty selector.
    pub fn matches(&self, labels: Option<&Map>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Renders the selector in the `k=v,k=v` form accepted by the API server.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for (k, v) in self.match_labels.iter() {
            write!(f, "{sep}{k}={v}")?;
            sep = ",";
        }
        Ok(())
    }
}

impl From<Map> for Selector {
    fn from(map: Map) -> Self {
        Self::from_map(map)
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    fn labels(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_matches() {
        assert!(Selector::default().matches(None), "empty selector, no labels");
        assert!(
            !Selector::from_iter(Some(("foo", "bar"))).matches(None),
            "unlabeled object"
        );

        for (selector, labels, matches, msg) in &[
            (Selector::default(), Map::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                labels(&[("foo", "bar")]),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                labels(&[("foo", "bar")]),
                false,
                "missing label",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                labels(&[("foo", "baz")]),
                false,
                "mismatched value",
            ),
        ] {
            assert_eq!(selector.matches(Some(labels)), *matches, "{}", msg);
        }
    }

    #[test]
    fn displays_as_label_selector() {
        let selector = Selector::from_map(maplit::btreemap! {
            "b".to_string() => "2".to_string(),
            "a".to_string() => "1".to_string(),
        })
        .with("c", "3");
        assert_eq!(selector.to_string(), "a=1,b=2,c=3");
        assert_eq!(Selector::default().to_string(), "");
    }
}
