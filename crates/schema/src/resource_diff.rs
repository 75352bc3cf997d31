//! Diff customization
//!
//! [`ResourceDiff`] wraps a computed [`InstanceDiff`] so resource code can
//! inspect the planned changes and adjust computed attributes before the
//! diff is finalized. The original diff is never mutated; `finish` returns
//! the customized copy.

use crate::config::ResourceConfig;
use crate::diff::{AttrDiff, ChangeType, DiffAttrType, InstanceDiff};
use crate::differ::replacement;
use crate::error::{Error, Result};
use crate::flatmap::{Flattened, flatten_value, join};
use crate::reader::FlatView;
use crate::schema::{Schema, SchemaMap, ValueType};
use crate::state::InstanceState;
use crate::value::Value;

/// Read-write view over a planned diff
#[derive(Debug)]
pub struct ResourceDiff<'a> {
    schema: &'a SchemaMap,
    state: &'a InstanceState,
    config: &'a ResourceConfig,
    diff: InstanceDiff,
}

impl<'a> ResourceDiff<'a> {
    pub fn new(
        schema: &'a SchemaMap,
        state: &'a InstanceState,
        config: &'a ResourceConfig,
        diff: &InstanceDiff,
    ) -> Self {
        Self {
            schema,
            state,
            config,
            diff: diff.clone(),
        }
    }

    fn old_view(&self) -> FlatView {
        FlatView::from_state(self.state)
    }

    fn new_view(&self) -> FlatView {
        FlatView::with_diff(self.state, &self.diff)
    }

    /// Whether the value at `key` differs between old and new.
    ///
    /// Compound keys such as `tags`, `tags.%` or `tags.env` are all
    /// supported. A computed new value always counts as a change.
    pub fn has_change(&self, key: &str) -> bool {
        let old = self.old_view().read(self.schema, key);
        let new = self.new_view().read(self.schema, key);
        if new.computed {
            return true;
        }
        match (old.value, new.value) {
            (None, None) => false,
            (Some(old), Some(new)) => old != new,
            _ => true,
        }
    }

    /// Old and new values at `key`
    pub fn get_change(&self, key: &str) -> (Option<Value>, Option<Value>) {
        let old = self.old_view().read(self.schema, key);
        let new = self.new_view().read(self.schema, key);
        (old.value, new.value)
    }

    /// New value at `key`, `None` if absent or computed
    pub fn get(&self, key: &str) -> Option<Value> {
        self.new_view().read(self.schema, key).value
    }

    /// Whether the new value at `key` is only known after apply
    pub fn new_value_known(&self, key: &str) -> bool {
        !self.new_view().read(self.schema, key).computed
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Whether the planned diff changes anything
    pub fn has_any_changes(&self) -> bool {
        !self.diff.is_empty()
    }

    /// Whether a new instance is created, including as a replacement
    pub fn will_create(&self) -> bool {
        matches!(
            self.diff.change_type(),
            ChangeType::Create | ChangeType::DestroyCreate
        )
    }

    /// Whether an existing instance is updated in place
    pub fn will_update(&self) -> bool {
        self.diff.change_type() == ChangeType::Update
    }

    /// Changed top-level attributes
    pub fn changed_keys(&self) -> Vec<&'a str> {
        self.schema
            .keys()
            .map(String::as_str)
            .filter(|key| self.has_change(key))
            .collect()
    }

    /// Resolve a top-level attribute whose new value the resource may set
    fn computed_schema(&self, key: &str) -> Result<&'a Schema> {
        let invalid = |reason: &str| Error::InvalidCustomization {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let schema = self
            .schema
            .get(key)
            .ok_or_else(|| invalid("only top-level attributes can be customized"))?;
        if !schema.computed {
            return Err(invalid("attribute is not computed"));
        }
        if schema.optional && self.config.is_set(key) {
            return Err(invalid("attribute is set in configuration"));
        }
        Ok(schema)
    }

    /// Drop existing diff entries at or below `key`
    fn clear(&mut self, key: &str) {
        let prefix = format!("{key}.");
        self.diff
            .attributes
            .retain(|k, _| k != key && !k.starts_with(&prefix));
    }

    /// Old flattened keys at or below `key`
    fn old_subtree(&self, key: &str) -> Vec<(String, String)> {
        let prefix = format!("{key}.");
        self.state
            .attributes
            .iter()
            .filter(|(k, _)| *k == key || k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Mark a computed attribute as known only after apply
    pub fn set_new_computed(&mut self, key: &str) -> Result<()> {
        let schema = self.computed_schema(key)?;
        self.clear(key);
        let marker = match schema.ty {
            ValueType::List | ValueType::Set => join(key, "#"),
            ValueType::Map => join(key, "%"),
            _ => key.to_string(),
        };
        let old = self.state.get(&marker).unwrap_or_default().to_string();
        log::trace!("customize: {key} set computed");
        self.diff
            .attributes
            .insert(marker, AttrDiff::computed(old).output());
        Ok(())
    }

    /// Set the planned value of a computed attribute
    pub fn set_new_value(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let schema = self.computed_schema(key)?;
        let value = value.into();
        let mut flat = Flattened::default();
        flatten_value(key, schema, &value, &mut flat).map_err(|err| {
            Error::InvalidCustomization {
                key: key.to_string(),
                reason: err.to_string(),
            }
        })?;

        self.clear(key);
        let old = self.old_subtree(key);
        for (k, new) in &flat.attributes {
            let previous = old
                .iter()
                .find(|(old_key, _)| old_key == k)
                .map(|(_, v)| v.as_str());
            if previous != Some(new.as_str()) {
                self.diff.attributes.insert(
                    k.clone(),
                    AttrDiff::change(previous.unwrap_or_default(), new.clone()).output(),
                );
            }
        }
        for k in &flat.computed {
            let previous = self.state.get(k).unwrap_or_default().to_string();
            self.diff
                .attributes
                .insert(k.clone(), AttrDiff::computed(previous).output());
        }
        for (k, previous) in old {
            if !flat.attributes.contains_key(&k) && !flat.computed.contains(&k) {
                self.diff
                    .attributes
                    .insert(k, AttrDiff::removed(previous).output());
            }
        }
        log::trace!("customize: {key} set to {value}");
        Ok(())
    }

    /// Force replacement because `key` changed.
    ///
    /// Only configurable attributes with a pending change qualify.
    pub fn set_forces_new(&mut self, key: &str) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidCustomization {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let top = key.split('.').next().unwrap_or(key);
        let schema = self
            .schema
            .get(top)
            .ok_or_else(|| invalid("unknown attribute"))?;
        if !schema.required && !schema.optional {
            return Err(invalid("only configurable attributes can force replacement"));
        }
        if !self.has_change(key) {
            return Err(invalid("attribute has no pending change"));
        }
        let prefix = format!("{key}.");
        for (k, attr) in self.diff.attributes.iter_mut() {
            if k == key || k.starts_with(&prefix) {
                attr.requires_new = true;
            }
        }
        Ok(())
    }

    /// Finalize the customized diff.
    ///
    /// A newly forced replacement of an existing instance is recomputed as
    /// a full create diff. Values set on computed attributes carry over.
    pub fn finish(self) -> Result<InstanceDiff> {
        if !self.state.exists() || !self.diff.requires_new() || self.diff.destroy {
            return Ok(self.diff);
        }
        let mut full = replacement(self.schema, self.state, self.config, &self.diff)?;
        for (key, attr) in self.diff.attributes {
            if attr.attr_type == DiffAttrType::Output && key != "id" {
                full.attributes.insert(key, attr);
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaMap {
        [
            ("name", Schema::string().required()),
            ("size", Schema::int().optional()),
            ("tags", Schema::map().optional()),
            ("endpoint", Schema::string().computed()),
            ("zone", Schema::string().optional().computed()),
            ("outputs", Schema::map().computed()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn attrs(entries: &[(&str, AttrDiff)]) -> InstanceDiff {
        InstanceDiff {
            attributes: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..InstanceDiff::default()
        }
    }

    struct Case {
        name: &'static str,
        state: InstanceState,
        diff: InstanceDiff,
        key: &'static str,
        expected: bool,
    }

    #[test]
    fn has_change_cases() {
        let schema = schema();
        let config = ResourceConfig::default();
        let cases = vec![
            Case {
                name: "string change",
                state: InstanceState::new("i").with_attribute("name", "foo"),
                diff: attrs(&[("name", AttrDiff::change("foo", "bar"))]),
                key: "name",
                expected: true,
            },
            Case {
                name: "string unchanged",
                state: InstanceState::new("i").with_attribute("name", "foo"),
                diff: InstanceDiff::default(),
                key: "name",
                expected: false,
            },
            Case {
                name: "map count changed",
                state: InstanceState::new("i").with_attribute("tags.%", "0"),
                diff: attrs(&[
                    ("tags.%", AttrDiff::change("0", "1")),
                    ("tags.foo", AttrDiff::change("", "baz")),
                ]),
                key: "tags.%",
                expected: true,
            },
            Case {
                name: "map parent sees child change",
                state: InstanceState::new("i")
                    .with_attribute("tags.%", "1")
                    .with_attribute("tags.foo", "bar"),
                diff: attrs(&[("tags.foo", AttrDiff::change("bar", "baz"))]),
                key: "tags",
                expected: true,
            },
            Case {
                name: "map count unchanged when a value changes",
                state: InstanceState::new("i")
                    .with_attribute("tags.%", "1")
                    .with_attribute("tags.foo", "bar"),
                diff: attrs(&[("tags.foo", AttrDiff::change("bar", "baz"))]),
                key: "tags.%",
                expected: false,
            },
            Case {
                name: "map value",
                state: InstanceState::new("i")
                    .with_attribute("tags.%", "1")
                    .with_attribute("tags.foo", "bar"),
                diff: attrs(&[("tags.foo", AttrDiff::change("bar", "baz"))]),
                key: "tags.foo",
                expected: true,
            },
            Case {
                name: "computed value",
                state: InstanceState::new("i").with_attribute("endpoint", "a"),
                diff: attrs(&[("endpoint", AttrDiff::computed("a"))]),
                key: "endpoint",
                expected: true,
            },
            Case {
                name: "absent on both sides",
                state: InstanceState::new("i"),
                diff: InstanceDiff::default(),
                key: "endpoint",
                expected: false,
            },
        ];

        for case in cases {
            let rd = ResourceDiff::new(&schema, &case.state, &config, &case.diff);
            assert_eq!(rd.has_change(case.key), case.expected, "{}", case.name);
        }
    }

    #[test]
    fn set_new_value_on_computed() {
        let schema = schema();
        let config = ResourceConfig::default().with("name", "web");
        let state = InstanceState::new("i")
            .with_attribute("name", "old")
            .with_attribute("endpoint", "old.example.com");
        let diff = attrs(&[("name", AttrDiff::change("old", "web"))]);

        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);
        rd.set_new_value("endpoint", "web.example.com").unwrap();
        let (old, new) = rd.get_change("endpoint");
        assert_eq!(old, Some(Value::string("old.example.com")));
        assert_eq!(new, Some(Value::string("web.example.com")));

        let finished = rd.finish().unwrap();
        assert_eq!(
            finished.attributes["endpoint"],
            AttrDiff::change("old.example.com", "web.example.com").output()
        );
        // The input diff is untouched.
        assert!(!diff.attributes.contains_key("endpoint"));
    }

    #[test]
    fn set_new_value_last_write_wins() {
        let schema = schema();
        let config = ResourceConfig::default();
        let state = InstanceState::new("i").with_attribute("endpoint", "a");
        let diff = InstanceDiff::default();
        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);
        rd.set_new_computed("endpoint").unwrap();
        rd.set_new_value("endpoint", "b").unwrap();
        let finished = rd.finish().unwrap();
        assert_eq!(finished.attributes["endpoint"], AttrDiff::change("a", "b").output());
    }

    #[test]
    fn set_new_value_on_computed_map() {
        let schema = schema();
        let config = ResourceConfig::default();
        let state = InstanceState::new("i")
            .with_attribute("outputs.%", "1")
            .with_attribute("outputs.a", "1");
        let diff = InstanceDiff::default();
        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);
        rd.set_new_value("outputs", Value::string_map([("b", "2")])).unwrap();
        let finished = rd.finish().unwrap();
        assert!(!finished.attributes.contains_key("outputs.%"));
        assert!(finished.attributes["outputs.a"].new_removed);
        assert_eq!(finished.attributes["outputs.b"], AttrDiff::change("", "2").output());
    }

    #[test]
    fn customization_rules() {
        let schema = schema();
        let config = ResourceConfig::default().with("zone", "a");
        let state = InstanceState::new("i").with_attribute("name", "x");
        let diff = InstanceDiff::default();
        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);

        assert!(matches!(
            rd.set_new_value("name", "y"),
            Err(Error::InvalidCustomization { .. })
        ));
        // Optional+computed but explicitly configured.
        assert!(rd.set_new_computed("zone").is_err());
        assert!(rd.set_new_computed("tags.a").is_err());
        assert!(rd.set_new_value("endpoint", Value::List(vec![])).is_err());
        // No pending change.
        assert!(rd.set_forces_new("name").is_err());
        // Computed-only attributes cannot force replacement.
        assert!(rd.set_forces_new("endpoint").is_err());
    }

    #[test]
    fn set_forces_new_replaces() {
        let schema = schema();
        let config = ResourceConfig::default().with("size", 2_i64);
        let state = InstanceState::new("i").with_attribute("size", "1");
        let diff = attrs(&[("size", AttrDiff::change("1", "2"))]);
        assert_eq!(diff.change_type(), ChangeType::Update);

        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);
        rd.set_forces_new("size").unwrap();
        let finished = rd.finish().unwrap();
        assert!(finished.attributes["size"].requires_new);
        assert_eq!(finished.change_type(), ChangeType::DestroyCreate);
    }

    #[test]
    fn replacement_counts_as_create() {
        let mut schema = schema();
        schema.insert("size".to_string(), Schema::int().optional().force_new());
        let config = ResourceConfig::default().with("name", "a").with("size", 2_i64);
        let state = InstanceState::new("i")
            .with_attribute("name", "a")
            .with_attribute("size", "1");
        let diff = crate::differ::diff(&schema, Some(&state), &config).unwrap();
        assert_eq!(diff.change_type(), ChangeType::DestroyCreate);

        let rd = ResourceDiff::new(&schema, &state, &config, &diff);
        assert!(rd.will_create());
        assert!(!rd.will_update());

        let fresh = crate::differ::diff(&schema, None, &config).unwrap();
        let empty = InstanceState::default();
        let rd = ResourceDiff::new(&schema, &empty, &config, &fresh);
        assert!(rd.will_create());
    }

    #[test]
    fn forced_replacement_is_full_create_diff() {
        let schema = schema();
        let config = ResourceConfig::default()
            .with("name", "a")
            .with("size", 2_i64)
            .with("tags", Value::string_map([("env", "prod")]));
        let state = InstanceState::new("i")
            .with_attribute("name", "a")
            .with_attribute("size", "1")
            .with_attribute("tags.%", "1")
            .with_attribute("tags.env", "prod")
            .with_attribute("endpoint", "10.0.0.1");
        let diff = crate::differ::diff(&schema, Some(&state), &config).unwrap();
        assert_eq!(diff.change_type(), ChangeType::Update);
        assert!(!diff.attributes.contains_key("name"));

        let mut rd = ResourceDiff::new(&schema, &state, &config, &diff);
        rd.set_forces_new("size").unwrap();
        rd.set_new_value("outputs", Value::string_map([("url", "https://a")]))
            .unwrap();
        let finished = rd.finish().unwrap();

        assert_eq!(finished.change_type(), ChangeType::DestroyCreate);
        assert!(finished.destroy);
        assert!(finished.attributes["size"].requires_new);
        assert_eq!(finished.attributes["name"].new, "a");
        assert_eq!(finished.attributes["tags.env"].new, "prod");
        assert!(finished.attributes["endpoint"].new_computed);
        assert!(finished.attributes["id"].new_computed);
        assert_eq!(finished.attributes["outputs.url"].new, "https://a");
    }

    #[test]
    fn get_reads_planned_values() {
        let schema = schema();
        let config = ResourceConfig::default();
        let state = InstanceState::new("i").with_attribute("name", "a");
        let diff = attrs(&[("zone", AttrDiff::computed(""))]);
        let rd = ResourceDiff::new(&schema, &state, &config, &diff);
        assert!(rd.has_any_changes());
        assert!(rd.will_update());
        assert!(!rd.will_create());
        assert_eq!(rd.get("name"), Some(Value::string("a")));
        assert_eq!(rd.get("zone"), None);
        assert!(!rd.new_value_known("zone"));
        assert_eq!(rd.changed_keys(), vec!["zone"]);
    }
}
