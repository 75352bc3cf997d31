//! Typed reads over flattened attributes

use crate::diff::InstanceDiff;
use crate::flatmap::{join, parse_primitive};
use crate::schema::{Elem, Schema, SchemaMap, ValueType};
use crate::state::InstanceState;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of reading one address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRead {
    /// `None` when the address is absent
    pub value: Option<Value>,
    /// The value, or part of it, is only known after apply
    pub computed: bool,
}

impl FieldRead {
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

/// What an address resolves to inside a schema map
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Field(&'a Schema),
    Block(&'a SchemaMap),
    MapValue(ValueType),
    Count,
}

/// Resolve a dotted address against a schema map
fn resolve<'a>(schema: &'a SchemaMap, parts: &[&str]) -> Option<Target<'a>> {
    let (first, mut rest) = parts.split_first()?;
    let mut current = Target::Field(schema.get(*first)?);
    while let Some((part, tail)) = rest.split_first() {
        current = match current {
            Target::Field(field) => match field.ty {
                ValueType::List | ValueType::Set => {
                    if *part == "#" {
                        Target::Count
                    } else {
                        match &field.elem {
                            Some(Elem::Block(block)) => Target::Block(block),
                            Some(Elem::Schema(elem)) => Target::Field(elem),
                            None => return None,
                        }
                    }
                }
                ValueType::Map => {
                    if *part == "%" {
                        Target::Count
                    } else {
                        let ty = match &field.elem {
                            Some(Elem::Schema(elem)) => elem.ty,
                            _ => ValueType::String,
                        };
                        // Map keys may contain dots; the rest of the address is the key.
                        return Some(Target::MapValue(ty));
                    }
                }
                _ => return None,
            },
            Target::Block(block) => Target::Field(block.get(*part)?),
            Target::MapValue(_) | Target::Count => return None,
        };
        rest = tail;
    }
    Some(current)
}

/// Read-only view of flattened attributes with computed markers
#[derive(Debug, Clone, Default)]
pub struct FlatView {
    attributes: BTreeMap<String, String>,
    computed: BTreeSet<String>,
}

impl FlatView {
    pub fn new(attributes: BTreeMap<String, String>, computed: BTreeSet<String>) -> Self {
        Self {
            attributes,
            computed,
        }
    }

    /// View of a state as it is
    pub fn from_state(state: &InstanceState) -> Self {
        Self::new(state.attributes.clone(), BTreeSet::new())
    }

    /// View of a state after a diff is applied. Computed keys read as unknown.
    pub fn with_diff(state: &InstanceState, diff: &InstanceDiff) -> Self {
        let attributes = diff.apply_to(state);
        let computed = diff.computed_keys().map(str::to_string).collect();
        Self::new(attributes, computed)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Keys strictly below `prefix`
    fn children<'s>(&'s self, prefix: &str) -> impl Iterator<Item = (&'s str, &'s str)> + use<'s> {
        let start = format!("{prefix}.");
        let skip = start.len();
        self.attributes
            .range(start.clone()..)
            .take_while(move |(k, _)| k.starts_with(&start))
            .map(move |(k, v)| (&k[skip..], v.as_str()))
    }

    /// Whether `key` or anything under it is marked computed
    fn is_computed(&self, key: &str) -> bool {
        let nested = format!("{key}.");
        self.computed
            .iter()
            .any(|k| k == key || k.starts_with(&nested))
    }

    /// Read the value at a dotted address
    pub fn read(&self, schema: &SchemaMap, address: &str) -> FieldRead {
        let parts: Vec<&str> = address.split('.').collect();
        match resolve(schema, &parts) {
            Some(target) => self.read_target(address, target),
            None => FieldRead::default(),
        }
    }

    fn read_target(&self, key: &str, target: Target<'_>) -> FieldRead {
        match target {
            Target::Count => FieldRead {
                value: self
                    .get(key)
                    .and_then(|raw| raw.parse::<f64>().ok())
                    .map(Value::Number),
                computed: self.is_computed(key),
            },
            Target::MapValue(ty) => FieldRead {
                value: self.get(key).map(|raw| parse_primitive(ty, raw)),
                computed: self.is_computed(key),
            },
            Target::Block(block) => self.read_block(key, block),
            Target::Field(schema) => self.read_field(key, schema),
        }
    }

    fn read_field(&self, key: &str, schema: &Schema) -> FieldRead {
        match schema.ty {
            ValueType::String | ValueType::Int | ValueType::Float | ValueType::Bool => FieldRead {
                value: self.get(key).map(|raw| parse_primitive(schema.ty, raw)),
                computed: self.is_computed(key),
            },
            ValueType::List => self.read_list(key, schema),
            ValueType::Set => self.read_set(key, schema),
            ValueType::Map => self.read_map(key, schema),
        }
    }

    fn read_element(&self, key: &str, collection: &Schema) -> FieldRead {
        match &collection.elem {
            Some(Elem::Block(block)) => self.read_block(key, block),
            Some(Elem::Schema(elem)) => self.read_field(key, elem),
            None => FieldRead::default(),
        }
    }

    fn read_list(&self, key: &str, schema: &Schema) -> FieldRead {
        let computed = self.is_computed(key);
        let Some(count) = self.count(key, "#") else {
            return FieldRead {
                value: None,
                computed,
            };
        };
        let items = (0..count)
            .filter_map(|i| self.read_element(&join(key, &i.to_string()), schema).value)
            .collect();
        FieldRead {
            value: Some(Value::List(items)),
            computed,
        }
    }

    fn read_set(&self, key: &str, schema: &Schema) -> FieldRead {
        let computed = self.is_computed(key);
        if self.count(key, "#").is_none() {
            return FieldRead {
                value: None,
                computed,
            };
        }
        let mut codes: Vec<&str> = self
            .children(key)
            .map(|(rest, _)| rest.split('.').next().unwrap_or(rest))
            .filter(|code| *code != "#")
            .collect();
        codes.sort_by_key(|code| (code.parse::<u64>().unwrap_or(u64::MAX), *code));
        codes.dedup();
        let items = codes
            .into_iter()
            .filter_map(|code| self.read_element(&join(key, code), schema).value)
            .collect();
        FieldRead {
            value: Some(Value::Set(items)),
            computed,
        }
    }

    fn read_map(&self, key: &str, schema: &Schema) -> FieldRead {
        let computed = self.is_computed(key);
        let ty = match &schema.elem {
            Some(Elem::Schema(elem)) => elem.ty,
            _ => ValueType::String,
        };
        let entries: BTreeMap<String, Value> = self
            .children(key)
            .filter(|(rest, _)| *rest != "%")
            .map(|(rest, raw)| (rest.to_string(), parse_primitive(ty, raw)))
            .collect();
        if entries.is_empty() && self.get(&join(key, "%")).is_none() {
            return FieldRead {
                value: None,
                computed,
            };
        }
        FieldRead {
            value: Some(Value::Map(entries)),
            computed,
        }
    }

    fn read_block(&self, key: &str, block: &SchemaMap) -> FieldRead {
        let mut fields = BTreeMap::new();
        let mut computed = self.is_computed(key);
        for (name, field) in block {
            let read = self.read_field(&join(key, name), field);
            computed |= read.computed;
            if let Some(value) = read.value {
                fields.insert(name.clone(), value);
            }
        }
        FieldRead {
            value: (!fields.is_empty()).then_some(Value::Map(fields)),
            computed,
        }
    }

    fn count(&self, key: &str, marker: &str) -> Option<usize> {
        self.get(&join(key, marker)).and_then(|raw| raw.parse().ok())
    }
}
