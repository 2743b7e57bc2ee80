use crate::{
    k8s::{self, labels::Map, Selector},
    Mode,
};

pub const OWNER_NAME: &str = "platform.opendatahub.io/owner-name";
pub const OWNER_KIND: &str = "platform.opendatahub.io/owner-kind";
pub const OWNER_UID: &str = "platform.opendatahub.io/owner-uid";
pub const OWNER_MODE: &str = "platform.opendatahub.io/type";

/// Identifies the watched resource that owns a set of derived resources.
///
/// Derived resources may live in other namespaces (or be cluster-scoped), so
/// they cannot carry owner references. Instead, the owner and the mode that
/// produced them are recorded as labels, and these labels are the only way
/// derived resources are discovered and deleted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    name: String,
    kind: String,
    uid: String,
}

impl Owner {
    pub fn new(name: impl ToString, kind: impl ToString, uid: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            uid: uid.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Selects every resource owned by this owner, regardless of mode.
    pub fn selector(&self) -> Selector {
        Selector::from_map(self.owner_labels())
    }

    /// Selects the resources this owner holds for a single mode.
    pub fn mode_selector(&self, mode: &str) -> Selector {
        self.selector().with(OWNER_MODE, mode)
    }

    pub fn labels(&self, mode: &Mode) -> Map {
        let mut labels = self.owner_labels();
        labels.insert(OWNER_MODE.to_string(), mode.to_string());
        labels
    }

    /// Merges this owner's labels for `mode` into the object, leaving
    /// unrelated labels untouched.
    pub fn stamp(&self, mode: &Mode, object: &mut k8s::DynamicObject) {
        object
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(self.labels(mode));
    }

    /// Returns the mode label of an object this owner holds, if it is one.
    pub fn mode_of<'o>(&self, object: &'o k8s::DynamicObject) -> Option<&'o str> {
        let labels = object.metadata.labels.as_ref();
        if !self.selector().matches(labels) {
            return None;
        }
        labels?.get(OWNER_MODE).map(String::as_str)
    }

    /// Describes the owner recorded on `object` if it is a different watched
    /// resource.
    ///
    /// Only the name and kind are compared. An object recorded under another
    /// uid was left behind by an earlier incarnation of this owner and may be
    /// adopted. Unlabeled objects have no owner.
    pub fn foreign_owner(&self, object: &k8s::DynamicObject) -> Option<String> {
        let labels = object.metadata.labels.as_ref()?;
        let name = labels.get(OWNER_NAME);
        let kind = labels.get(OWNER_KIND);
        if name.is_none() && kind.is_none() {
            return None;
        }
        if name == Some(&self.name) && kind == Some(&self.kind) {
            return None;
        }
        Some(format!(
            "{} {}",
            kind.map_or("<unknown kind>", String::as_str),
            name.map_or("<unnamed>", String::as_str),
        ))
    }

    fn owner_labels(&self) -> Map {
        [
            (OWNER_NAME, &self.name),
            (OWNER_KIND, &self.kind),
            (OWNER_UID, &self.uid),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }
}
