//! Interpolated resource configuration and its validation

use crate::flatmap::{collection_items, decode_primitive, join};
use crate::schema::{Elem, Schema, SchemaMap, ValueType};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration of one resource after interpolation.
///
/// Values that depend on not-yet-applied resources are [`Value::Unknown`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    raw: BTreeMap<String, Value>,
}

impl ResourceConfig {
    pub fn new(raw: BTreeMap<String, Value>) -> Self {
        Self { raw }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }

    pub fn raw(&self) -> &BTreeMap<String, Value> {
        &self.raw
    }

    /// Value at a dotted address
    pub fn get(&self, address: &str) -> Option<&Value> {
        let (head, rest) = match address.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (address, ""),
        };
        self.raw.get(head)?.lookup(rest)
    }

    /// Whether the address is set to anything, unknown included
    pub fn is_set(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Whether the value at the address is unknown or contains unknowns
    pub fn is_computed(&self, address: &str) -> bool {
        self.get(address).is_some_and(Value::contains_unknown)
    }
}

/// Warnings and errors collected during validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Diagnostics {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

/// Validate a configuration against a schema map
pub fn validate_config(schema: &SchemaMap, config: &ResourceConfig) -> Diagnostics {
    let mut diags = Diagnostics::default();
    validate_fields(schema, config.raw(), "", &mut diags);
    diags
}

fn validate_fields(
    schema: &SchemaMap,
    values: &BTreeMap<String, Value>,
    prefix: &str,
    diags: &mut Diagnostics,
) {
    for key in values.keys() {
        if !schema.contains_key(key) {
            diags.error(format!("{}: invalid or unknown key", join(prefix, key)));
        }
    }
    for (name, attr) in schema {
        let key = join(prefix, name);
        match values.get(name) {
            None if attr.required => {
                diags.error(format!("{key}: required field is not set"));
            }
            None => {}
            Some(_) if attr.is_computed_only() => {
                diags.error(format!("{key}: computed attributes cannot be set"));
            }
            Some(value) => validate_value(&key, attr, value, diags),
        }
    }
}

fn validate_value(key: &str, schema: &Schema, value: &Value, diags: &mut Diagnostics) {
    if value.is_unknown() {
        return;
    }
    match schema.ty {
        ValueType::String | ValueType::Int | ValueType::Float | ValueType::Bool => {
            if let Err(err) = decode_primitive(key, schema.ty, value) {
                diags.error(err.to_string());
                return;
            }
        }
        ValueType::List | ValueType::Set => {
            let items = match collection_items(key, schema, value) {
                Ok(items) => items,
                Err(err) => {
                    diags.error(err.to_string());
                    return;
                }
            };
            if schema.max_items > 0 && items.len() > schema.max_items {
                diags.error(format!(
                    "{key}: attribute supports {} item maximum, config has {}",
                    schema.max_items,
                    items.len()
                ));
            }
            if items.len() < schema.min_items {
                diags.error(format!(
                    "{key}: attribute supports {} item minimum, config has {}",
                    schema.min_items,
                    items.len()
                ));
            }
            for (i, item) in items.iter().enumerate() {
                let item_key = join(key, &i.to_string());
                validate_element(&item_key, schema, item, diags);
            }
        }
        ValueType::Map => {
            let Some(map) = value.as_map() else {
                diags.error(format!("{key}: expected map, got {}", value.type_name()));
                return;
            };
            let elem_ty = match &schema.elem {
                Some(Elem::Schema(elem)) => elem.ty,
                _ => ValueType::String,
            };
            for (k, v) in map {
                if v.is_unknown() {
                    continue;
                }
                if let Err(err) = decode_primitive(&join(key, k), elem_ty, v) {
                    diags.error(err.to_string());
                }
            }
        }
    }
    if let Some(validate) = schema.validate
        && !value.contains_unknown()
        && let Err(message) = validate(value, key)
    {
        diags.error(format!("{key}: {message}"));
    }
}

fn validate_element(key: &str, collection: &Schema, item: &Value, diags: &mut Diagnostics) {
    if item.is_unknown() {
        return;
    }
    match &collection.elem {
        Some(Elem::Block(block)) => match item.as_map() {
            Some(fields) => validate_fields(block, fields, key, diags),
            None => diags.error(format!("{key}: expected block, got {}", item.type_name())),
        },
        Some(Elem::Schema(elem)) => validate_value(key, elem, item, diags),
        None => {}
    }
}
