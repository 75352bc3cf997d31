//! Attribute access for resource implementations during apply

use crate::diff::InstanceDiff;
use crate::error::{Error, Result};
use crate::flatmap::{Flattened, flatten_value};
use crate::reader::FlatView;
use crate::schema::SchemaMap;
use crate::state::InstanceState;
use crate::value::Value;
use std::collections::BTreeMap;

/// Attributes of one instance as seen by create, read, update and delete.
///
/// Reads layer values written with [`set`](Self::set) over the planned diff
/// over the prior state.
#[derive(Debug)]
pub struct ResourceData<'a> {
    schema: &'a SchemaMap,
    state: InstanceState,
    diff: Option<&'a InstanceDiff>,
    id: String,
    written: BTreeMap<String, Value>,
}

impl<'a> ResourceData<'a> {
    pub fn new(
        schema: &'a SchemaMap,
        state: Option<&InstanceState>,
        diff: Option<&'a InstanceDiff>,
    ) -> Self {
        let state = state.cloned().unwrap_or_default();
        // A replacement starts over without an ID.
        let id = match diff {
            Some(diff) if diff.destroy => String::new(),
            _ => state.id.clone(),
        };
        Self {
            schema,
            state,
            diff,
            id,
            written: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the instance ID. An empty ID marks the instance as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    fn old_view(&self) -> FlatView {
        FlatView::from_state(&self.state)
    }

    fn new_view(&self) -> FlatView {
        match self.diff {
            Some(diff) => FlatView::with_diff(&self.state, diff),
            None => FlatView::from_state(&self.state),
        }
    }

    fn written(&self, key: &str) -> Option<Value> {
        let (head, rest) = match key.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (key, ""),
        };
        self.written.get(head)?.lookup(rest).cloned()
    }

    /// Current value at `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.written(key) {
            return Some(value);
        }
        self.new_view().read(self.schema, key).value
    }

    /// Value at `key` when it is set to a non-zero value
    pub fn get_ok(&self, key: &str) -> Option<Value> {
        self.get(key).filter(|value| !value.is_zero())
    }

    /// String value at `key`, empty when unset
    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .and_then(|value| value.to_flat_string())
            .unwrap_or_default()
    }

    /// Old and new values at `key`
    pub fn get_change(&self, key: &str) -> (Option<Value>, Option<Value>) {
        (self.old_view().read(self.schema, key).value, self.get(key))
    }

    pub fn has_change(&self, key: &str) -> bool {
        let (old, new) = self.get_change(key);
        old != new
    }

    /// Write a top-level attribute
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let schema = self
            .schema
            .get(key)
            .ok_or_else(|| Error::UnknownAttribute(key.to_string()))?;
        let value = value.into();
        let mut check = Flattened::default();
        flatten_value(key, schema, &value, &mut check)?;
        self.written.insert(key.to_string(), value);
        Ok(())
    }

    /// Whether an attribute has been written during this operation
    pub fn is_written(&self, key: &str) -> bool {
        self.written.contains_key(key)
    }

    /// Produce the resulting state. An empty ID yields an absent state.
    pub fn into_state(self) -> Result<InstanceState> {
        if self.id.is_empty() {
            return Ok(InstanceState::default());
        }
        let mut attributes = self.new_view().attributes().clone();
        for (key, value) in &self.written {
            let prefix = format!("{key}.");
            attributes.retain(|k, _| k != key && !k.starts_with(&prefix));
            let mut flat = Flattened::default();
            if let Some(schema) = self.schema.get(key) {
                flatten_value(key, schema, value, &mut flat)?;
            }
            attributes.extend(flat.attributes);
        }
        attributes.insert("id".to_string(), self.id.clone());
        Ok(InstanceState {
            id: self.id,
            attributes,
            meta: self.state.meta,
            tainted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::AttrDiff;
    use crate::schema::Schema;

    fn schema() -> SchemaMap {
        [
            ("name", Schema::string().required()),
            ("size", Schema::int().optional()),
            ("arn", Schema::string().computed()),
            ("tags", Schema::map().optional().computed()),
            ("zones", Schema::list(Schema::string()).computed()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn create_from_diff() {
        let schema = schema();
        let mut diff = InstanceDiff::default();
        diff.attributes
            .insert("name".to_string(), AttrDiff::change("", "web"));
        diff.attributes
            .insert("id".to_string(), AttrDiff::computed("").output());

        let mut data = ResourceData::new(&schema, None, Some(&diff));
        assert_eq!(data.id(), "");
        assert_eq!(data.get("name"), Some(Value::string("web")));
        assert!(data.has_change("name"));

        data.set_id("i-123");
        data.set("arn", "arn:i-123").unwrap();
        data.set("zones", Value::string_list(["a", "b"])).unwrap();
        assert_eq!(data.get("zones.1"), Some(Value::string("b")));

        let state = data.into_state().unwrap();
        assert_eq!(state.id, "i-123");
        assert_eq!(state.get("id"), Some("i-123"));
        assert_eq!(state.get("name"), Some("web"));
        assert_eq!(state.get("arn"), Some("arn:i-123"));
        assert_eq!(state.get("zones.#"), Some("2"));
    }

    #[test]
    fn set_replaces_whole_collection() {
        let schema = schema();
        let prior = InstanceState::new("i-1")
            .with_attribute("tags.%", "2")
            .with_attribute("tags.a", "1")
            .with_attribute("tags.b", "2");
        let mut data = ResourceData::new(&schema, Some(&prior), None);
        data.set("tags", Value::string_map([("c", "3")])).unwrap();
        let state = data.into_state().unwrap();
        assert_eq!(state.get("tags.%"), Some("1"));
        assert_eq!(state.get("tags.c"), Some("3"));
        assert_eq!(state.get("tags.a"), None);
    }

    #[test]
    fn set_rejects_bad_values() {
        let schema = schema();
        let mut data = ResourceData::new(&schema, None, None);
        assert!(data.set("size", "big").is_err());
        assert_eq!(
            data.set("nope", "x"),
            Err(Error::UnknownAttribute("nope".to_string()))
        );
    }

    #[test]
    fn empty_id_clears_state() {
        let schema = schema();
        let prior = InstanceState::new("i-1").with_attribute("name", "web");
        let mut data = ResourceData::new(&schema, Some(&prior), None);
        assert_eq!(data.get_ok("name"), Some(Value::string("web")));
        assert_eq!(data.get_ok("size"), None);
        data.set_id("");
        assert!(!data.into_state().unwrap().exists());
    }

    #[test]
    fn replacement_starts_without_id() {
        let schema = schema();
        let prior = InstanceState::new("i-1").with_attribute("name", "web");
        let mut diff = InstanceDiff::default();
        diff.destroy = true;
        diff.attributes
            .insert("name".to_string(), AttrDiff::change("web", "web"));
        let data = ResourceData::new(&schema, Some(&prior), Some(&diff));
        assert_eq!(data.id(), "");
        assert_eq!(data.get_string("name"), "web");
    }
}
