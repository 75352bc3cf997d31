//! Schema-driven diff between an instance's state and its configuration

use crate::config::ResourceConfig;
use crate::diff::{AttrDiff, InstanceDiff};
use crate::error::{Error, Result};
use crate::flatmap::{collection_items, decode_primitive, join, set_members};
use crate::schema::{Elem, Schema, SchemaMap, ValueType};
use crate::state::InstanceState;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Compute the diff that takes `state` to `config`.
///
/// When an existing instance needs replacement the diff is recomputed as a
/// full create against the old values, marked `destroy`, and keeps the
/// `requires_new` flags of the attributes that forced it.
pub fn diff(
    schema: &SchemaMap,
    state: Option<&InstanceState>,
    config: &ResourceConfig,
) -> Result<InstanceDiff> {
    let empty = InstanceState::default();
    let state = state.unwrap_or(&empty);

    let first = Differ::new(state, config, state.exists(), false).run(schema)?;
    let replace = state.exists() && (first.requires_new() || state.tainted);
    if !replace {
        let mut result = first;
        if !state.exists() {
            result
                .attributes
                .insert("id".to_string(), AttrDiff::computed("").output());
        }
        return Ok(result);
    }

    log::debug!("instance {} requires replacement, recomputing diff", state.id);
    replacement(schema, state, config, &first)
}

/// Full create diff replacing `state`, keeping the `requires_new` flags of
/// the diff that forced it
pub(crate) fn replacement(
    schema: &SchemaMap,
    state: &InstanceState,
    config: &ResourceConfig,
    forced: &InstanceDiff,
) -> Result<InstanceDiff> {
    let mut result = Differ::new(state, config, false, true).run(schema)?;
    result.copy_requires_new(forced);
    result.destroy = true;
    result
        .attributes
        .insert("id".to_string(), AttrDiff::computed(state.id.clone()).output());
    Ok(result)
}

struct Differ<'a> {
    state: &'a InstanceState,
    config: &'a ResourceConfig,
    /// Changes to force-new attributes only require replacement when the
    /// instance already exists
    exists: bool,
    /// Emit every attribute, used when recomputing a replacement
    all: bool,
    diff: InstanceDiff,
}

impl<'a> Differ<'a> {
    fn new(state: &'a InstanceState, config: &'a ResourceConfig, exists: bool, all: bool) -> Self {
        Self {
            state,
            config,
            exists,
            all,
            diff: InstanceDiff::default(),
        }
    }

    fn run(mut self, schema: &SchemaMap) -> Result<InstanceDiff> {
        if let Some(unknown) = self.config.raw().keys().find(|k| !schema.contains_key(*k)) {
            return Err(Error::UnknownAttribute(unknown.clone()));
        }
        for (name, attr) in schema {
            let config = self.config;
            self.diff_attr(name, attr, config.raw().get(name))?;
        }
        Ok(self.diff)
    }

    fn old(&self, key: &str) -> Option<&'a str> {
        self.state.attributes.get(key).map(String::as_str)
    }

    /// Old flattened keys strictly below `key`
    fn old_children(&self, key: &str) -> Vec<(&'a str, &'a str)> {
        let prefix = format!("{key}.");
        self.state
            .attributes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn push(&mut self, key: impl Into<String>, attr: AttrDiff) {
        self.diff.attributes.insert(key.into(), attr);
    }

    fn requires_new(&self, schema: &Schema) -> bool {
        schema.force_new && self.exists
    }

    fn diff_attr(&mut self, key: &str, schema: &Schema, new: Option<&Value>) -> Result<()> {
        match schema.ty {
            ValueType::String | ValueType::Int | ValueType::Float | ValueType::Bool => {
                self.diff_primitive(key, schema, new)
            }
            ValueType::List => self.diff_list(key, schema, new),
            ValueType::Set => self.diff_set(key, schema, new),
            ValueType::Map => self.diff_map(key, schema, new),
        }
    }

    fn diff_primitive(&mut self, key: &str, schema: &Schema, new: Option<&Value>) -> Result<()> {
        let old = self.old(key);
        let requires_new = self.requires_new(schema);
        let new = match new {
            Some(value) => Some(value.clone()),
            None => schema.default_value(),
        };

        match new {
            Some(Value::Unknown) => {
                self.push(
                    key,
                    AttrDiff::computed(old.unwrap_or_default()).requires_new(requires_new),
                );
            }
            Some(value) => {
                let new = decode_primitive(key, schema.ty, &value)?;
                let old = old.unwrap_or_default();
                if old != new || self.all {
                    self.push(key, AttrDiff::change(old, new).requires_new(requires_new));
                }
            }
            None if schema.computed => {
                if let Some(old) = old
                    && self.all
                {
                    self.push(key, AttrDiff::computed(old).output());
                }
            }
            None => {
                if let Some(old) = old
                    && !old.is_empty()
                {
                    self.push(key, AttrDiff::removed(old).requires_new(requires_new));
                }
            }
        }
        Ok(())
    }

    /// Shared handling for an unconfigured or unknown collection.
    ///
    /// Returns true when the collection was handled.
    fn diff_collection_absent(
        &mut self,
        key: &str,
        count_key: &str,
        schema: &Schema,
        new: Option<&Value>,
    ) -> bool {
        let requires_new = self.requires_new(schema);
        let old_count = self.old(count_key);
        match new {
            Some(Value::Unknown) => {
                self.push(
                    count_key,
                    AttrDiff::computed(old_count.unwrap_or_default()).requires_new(requires_new),
                );
                true
            }
            None if schema.computed => {
                if let Some(old) = old_count
                    && self.all
                {
                    self.push(count_key, AttrDiff::computed(old).output());
                }
                true
            }
            None => {
                let children = self.old_children(key);
                let has_members = children.iter().any(|(k, _)| *k != count_key);
                if has_members {
                    self.push(
                        count_key,
                        AttrDiff::change(old_count.unwrap_or_default(), "0")
                            .requires_new(requires_new),
                    );
                    for (child, old) in children {
                        if child != count_key {
                            self.push(child, AttrDiff::removed(old).requires_new(requires_new));
                        }
                    }
                }
                true
            }
            Some(_) => false,
        }
    }

    fn diff_count(&mut self, count_key: &str, schema: &Schema, new_count: usize) {
        let old_raw = self.old(count_key);
        let old_count = old_raw.and_then(|raw| raw.parse::<usize>().ok()).unwrap_or(0);
        let both_empty = old_raw.is_none() && new_count == 0;
        if both_empty {
            return;
        }
        if old_count != new_count || self.all {
            let requires_new = self.requires_new(schema);
            self.push(
                count_key,
                AttrDiff::change(old_raw.unwrap_or_default(), new_count.to_string())
                    .requires_new(requires_new),
            );
        }
    }

    /// Remove every old key at or below `key`
    fn remove_subtree(&mut self, key: &str, requires_new: bool) {
        if let Some(old) = self.old(key) {
            self.push(key, AttrDiff::removed(old).requires_new(requires_new));
        }
        for (child, old) in self.old_children(key) {
            self.push(child, AttrDiff::removed(old).requires_new(requires_new));
        }
    }

    fn diff_element(&mut self, key: &str, collection: &Schema, item: &Value) -> Result<()> {
        match &collection.elem {
            Some(Elem::Block(block)) => {
                let Some(fields) = item.as_map() else {
                    return Err(Error::SchemaValidation {
                        key: key.to_string(),
                        expected: ValueType::Map,
                        found: item.type_name(),
                    });
                };
                if let Some(unknown) = fields.keys().find(|k| !block.contains_key(*k)) {
                    return Err(Error::UnknownAttribute(join(key, unknown)));
                }
                for (name, field) in block {
                    let field = collection.block_field(field);
                    self.diff_attr(&join(key, name), &field, fields.get(name))?;
                }
                Ok(())
            }
            _ => {
                let elem = collection
                    .element_schema()
                    .unwrap_or_else(|| Schema::string().optional());
                self.diff_attr(key, &elem, Some(item))
            }
        }
    }

    fn diff_list(&mut self, key: &str, schema: &Schema, new: Option<&Value>) -> Result<()> {
        let count_key = join(key, "#");
        if self.diff_collection_absent(key, &count_key, schema, new) {
            return Ok(());
        }
        let Some(value) = new else {
            return Ok(());
        };
        let items = collection_items(key, schema, value)?;
        if matches!(schema.elem, Some(Elem::Block(_))) && items.iter().any(Value::is_unknown) {
            return self.diff_list_unknown(&count_key, schema);
        }

        self.diff_count(&count_key, schema, items.len());
        for (i, item) in items.iter().enumerate() {
            self.diff_element(&join(key, &i.to_string()), schema, item)?;
        }

        let old_count = self
            .old(&count_key)
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);
        let requires_new = self.requires_new(schema);
        for i in items.len()..old_count {
            self.remove_subtree(&join(key, &i.to_string()), requires_new);
        }
        Ok(())
    }

    fn diff_list_unknown(&mut self, count_key: &str, schema: &Schema) -> Result<()> {
        let requires_new = self.requires_new(schema);
        let old = self.old(count_key).unwrap_or_default();
        self.push(count_key, AttrDiff::computed(old).requires_new(requires_new));
        Ok(())
    }

    fn diff_set(&mut self, key: &str, schema: &Schema, new: Option<&Value>) -> Result<()> {
        let count_key = join(key, "#");
        if self.diff_collection_absent(key, &count_key, schema, new) {
            return Ok(());
        }
        let Some(value) = new else {
            return Ok(());
        };
        let items = collection_items(key, schema, value)?;
        // Members cannot be hashed until every value inside them is known.
        if items.iter().any(Value::contains_unknown) {
            return self.diff_list_unknown(&count_key, schema);
        }

        let members = set_members(key, schema, items)?;
        let old_codes: BTreeSet<String> = self
            .old_children(key)
            .into_iter()
            .filter_map(|(child, _)| {
                let rest = &child[key.len() + 1..];
                let code = rest.split('.').next().unwrap_or(rest);
                (code != "#").then(|| code.to_string())
            })
            .collect();

        self.diff_count(&count_key, schema, members.len());
        for (code, item) in &members {
            if self.all || !old_codes.contains(code) {
                self.diff_element(&join(key, code), schema, item)?;
            }
        }
        let requires_new = self.requires_new(schema);
        for code in old_codes.iter().filter(|code| !members.contains_key(*code)) {
            self.remove_subtree(&join(key, code), requires_new);
        }
        Ok(())
    }

    fn diff_map(&mut self, key: &str, schema: &Schema, new: Option<&Value>) -> Result<()> {
        let count_key = join(key, "%");
        if self.diff_collection_absent(key, &count_key, schema, new) {
            return Ok(());
        }
        let Some(value) = new else {
            return Ok(());
        };
        let Some(entries) = value.as_map() else {
            return Err(Error::SchemaValidation {
                key: key.to_string(),
                expected: ValueType::Map,
                found: value.type_name(),
            });
        };

        let requires_new = self.requires_new(schema);
        let elem = schema
            .element_schema()
            .unwrap_or_else(|| Schema::string().optional());
        let old_entries: BTreeMap<&str, &str> = self
            .old_children(key)
            .into_iter()
            .filter(|(child, _)| *child != count_key)
            .map(|(child, old)| (&child[key.len() + 1..], old))
            .collect();

        self.diff_count(&count_key, schema, entries.len());
        for (name, value) in entries {
            let entry_key = join(key, name);
            let old = old_entries.get(name.as_str()).copied();
            if value.is_unknown() {
                self.push(
                    entry_key,
                    AttrDiff::computed(old.unwrap_or_default()).requires_new(requires_new),
                );
                continue;
            }
            let new = decode_primitive(&entry_key, elem.ty, value)?;
            if old != Some(new.as_str()) || self.all {
                self.push(
                    entry_key,
                    AttrDiff::change(old.unwrap_or_default(), new).requires_new(requires_new),
                );
            }
        }
        for (name, old) in old_entries {
            if !entries.contains_key(name) {
                self.push(
                    join(key, name),
                    AttrDiff::removed(old).requires_new(requires_new),
                );
            }
        }
        Ok(())
    }
}
