//! Instance diffs: the planned per-attribute changes for one instance

use crate::state::InstanceState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Whether an attribute change came from configuration or the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffAttrType {
    #[default]
    Input,
    Output,
}

/// Change of a single flattened attribute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDiff {
    pub old: String,
    pub new: String,
    /// New value will only be known after apply
    #[serde(default)]
    pub new_computed: bool,
    /// Attribute is being removed
    #[serde(default)]
    pub new_removed: bool,
    /// Changing this attribute requires replacing the instance
    #[serde(default)]
    pub requires_new: bool,
    #[serde(default)]
    pub attr_type: DiffAttrType,
}

impl AttrDiff {
    pub fn change(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..Self::default()
        }
    }

    pub fn computed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_computed: true,
            ..Self::default()
        }
    }

    pub fn removed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_removed: true,
            ..Self::default()
        }
    }

    pub fn requires_new(mut self, requires_new: bool) -> Self {
        self.requires_new = requires_new;
        self
    }

    pub fn output(mut self) -> Self {
        self.attr_type = DiffAttrType::Output;
        self
    }
}

/// Classification of an instance diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    None,
    Create,
    Update,
    Destroy,
    DestroyCreate,
}

impl ChangeType {
    /// Symbol used when rendering plans
    pub fn symbol(self) -> &'static str {
        match self {
            Self::None => " ",
            Self::Create => "+",
            Self::Update => "~",
            Self::Destroy => "-",
            Self::DestroyCreate => "-/+",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::DestroyCreate => "replace",
        };
        f.write_str(name)
    }
}

/// Planned changes for one resource instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDiff {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrDiff>,
    /// Destroy the existing instance. With attributes this is a replacement.
    #[serde(default)]
    pub destroy: bool,
    /// Destroy an instance left behind by an interrupted replacement
    #[serde(default)]
    pub destroy_deposed: bool,
}

impl InstanceDiff {
    /// A diff that only destroys the instance
    pub fn destroy() -> Self {
        Self {
            destroy: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.destroy && !self.destroy_deposed && self.attributes.is_empty()
    }

    /// True if any attribute change requires replacement
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|attr| attr.requires_new)
    }

    /// True if this diff creates a new instance
    fn creates(&self) -> bool {
        self.attributes
            .get("id")
            .is_some_and(|id| id.new_computed && id.old.is_empty())
    }

    pub fn change_type(&self) -> ChangeType {
        if self.is_empty() {
            return ChangeType::None;
        }
        if self.destroy || self.destroy_deposed {
            if self.attributes.is_empty() {
                return ChangeType::Destroy;
            }
            return ChangeType::DestroyCreate;
        }
        if self.requires_new() {
            return ChangeType::DestroyCreate;
        }
        if self.creates() {
            return ChangeType::Create;
        }
        ChangeType::Update
    }

    /// Attributes this diff leaves computed
    pub fn computed_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.new_computed)
            .map(|(key, _)| key.as_str())
    }

    /// Apply the diff to a state's attributes.
    ///
    /// Removed and computed attributes are dropped; replacements start from
    /// an empty attribute set.
    pub fn apply_to(&self, state: &InstanceState) -> BTreeMap<String, String> {
        let mut attributes = if self.destroy {
            BTreeMap::new()
        } else {
            state.attributes.clone()
        };
        for (key, attr) in &self.attributes {
            if attr.new_removed || attr.new_computed {
                attributes.remove(key);
                remove_children(&mut attributes, key);
            } else {
                attributes.insert(key.clone(), attr.new.clone());
            }
        }
        attributes
    }

    /// Copy `requires_new` flags from another diff onto matching keys
    pub(crate) fn copy_requires_new(&mut self, other: &InstanceDiff) {
        for (key, attr) in &other.attributes {
            if attr.requires_new {
                self.attributes
                    .entry(key.clone())
                    .or_insert_with(|| attr.clone())
                    .requires_new = true;
            }
        }
    }
}

/// Drop all flattened keys nested under a removed or recomputed collection
fn remove_children(attributes: &mut BTreeMap<String, String>, key: &str) {
    let Some(parent) = key
        .strip_suffix(".#")
        .or_else(|| key.strip_suffix(".%"))
    else {
        return;
    };
    let prefix = format!("{parent}.");
    attributes.retain(|k, _| !k.starts_with(&prefix));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_of(entries: Vec<(&str, AttrDiff)>) -> InstanceDiff {
        InstanceDiff {
            attributes: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..InstanceDiff::default()
        }
    }

    #[test]
    fn change_types() {
        assert_eq!(InstanceDiff::default().change_type(), ChangeType::None);
        assert_eq!(InstanceDiff::destroy().change_type(), ChangeType::Destroy);

        let create = diff_of(vec![
            ("id", AttrDiff::computed("").output()),
            ("name", AttrDiff::change("", "a")),
        ]);
        assert_eq!(create.change_type(), ChangeType::Create);

        let update = diff_of(vec![("name", AttrDiff::change("a", "b"))]);
        assert_eq!(update.change_type(), ChangeType::Update);

        let replace = diff_of(vec![("size", AttrDiff::change("1", "2").requires_new(true))]);
        assert_eq!(replace.change_type(), ChangeType::DestroyCreate);

        let mut recreate = create.clone();
        recreate.destroy = true;
        assert_eq!(recreate.change_type(), ChangeType::DestroyCreate);
    }

    #[test]
    fn apply_to_merges_over_state() {
        let state = InstanceState::new("i-1")
            .with_attribute("keep", "k")
            .with_attribute("gone", "g")
            .with_attribute("tags.%", "1")
            .with_attribute("tags.a", "b");
        let diff = diff_of(vec![
            ("gone", AttrDiff::removed("g")),
            ("name", AttrDiff::change("", "n")),
            ("tags.%", AttrDiff::computed("1")),
        ]);
        let attributes = diff.apply_to(&state);
        assert_eq!(attributes.get("keep").map(String::as_str), Some("k"));
        assert_eq!(attributes.get("name").map(String::as_str), Some("n"));
        assert!(!attributes.contains_key("gone"));
        assert!(!attributes.contains_key("tags.%"));
        assert!(!attributes.contains_key("tags.a"));
    }
}
