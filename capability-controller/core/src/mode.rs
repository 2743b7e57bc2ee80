use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

/// A named variant of a capability, e.g. `public` or `external` routing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mode(Arc<str>);

/// The modes a watched resource requests, ordered by name.
pub type ModeSet = BTreeSet<Mode>;

/// The modes a capability knows and the annotation prefix that requests them.
///
/// A mode is requested by annotating the watched resource with
/// `<prefix><mode>: "true"`.
#[derive(Clone, Debug)]
pub struct Modes {
    prefix: String,
    known: ModeSet,
}

// === impl Mode ===

impl Mode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// === impl Modes ===

impl Modes {
    pub fn new<M: Into<Mode>>(prefix: impl ToString, known: impl IntoIterator<Item = M>) -> Self {
        Self {
            prefix: prefix.to_string(),
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn known(&self) -> &ModeSet {
        &self.known
    }

    pub fn get(&self, name: &str) -> Option<&Mode> {
        self.known.iter().find(|m| m.as_str() == name)
    }

    pub fn annotation(&self, mode: &Mode) -> String {
        format!("{}{}", self.prefix, mode)
    }

    /// Returns the valid modes requested by the given annotations.
    ///
    /// Annotations that do not start with the prefix are ignored, as are
    /// requests whose value is not `"true"`. Requests for modes this
    /// capability does not know are logged and dropped.
    pub fn extract(&self, annotations: &BTreeMap<String, String>) -> ModeSet {
        let mut modes = ModeSet::new();
        for (key, value) in annotations.iter() {
            let Some(name) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            if value != "true" {
                continue;
            }
            match self.get(name) {
                Some(mode) => {
                    modes.insert(mode.clone());
                }
                None => {
                    tracing::warn!(annotation = %key, mode = %name, "Ignoring invalid mode");
                }
            }
        }
        modes
    }
}
