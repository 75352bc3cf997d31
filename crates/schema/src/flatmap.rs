//! Flattening typed values into dotted string keys
//!
//! Lists write `key.#` and `key.N`, maps write `key.%` and `key.K`, sets
//! write `key.#` and `key.CODE` where CODE is the member's hash. Nested blocks
//! extend the key with their field names.

use crate::error::{Error, Result};
use crate::schema::{Elem, Schema, SchemaMap, ValueType};
use crate::value::{Value, format_number, parse_bool};
use std::collections::{BTreeMap, BTreeSet};

/// Flattened attributes plus the keys whose values are not yet known
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flattened {
    pub attributes: BTreeMap<String, String>,
    pub computed: BTreeSet<String>,
}

/// Decode a primitive with weak typing: numbers and bools read from strings
/// and numbers render into string attributes.
pub fn decode_primitive(key: &str, ty: ValueType, value: &Value) -> Result<String> {
    let mismatch = || Error::SchemaValidation {
        key: key.to_string(),
        expected: ty,
        found: value.type_name(),
    };
    match (ty, value) {
        (ValueType::String, Value::String(s)) => Ok(s.clone()),
        (ValueType::String, Value::Number(n)) => Ok(format_number(*n)),
        (ValueType::String, Value::Bool(b)) => Ok(b.to_string()),
        (ValueType::Int, Value::Number(n)) if n.fract() == 0.0 => Ok(format_number(*n)),
        (ValueType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| mismatch()),
        (ValueType::Float, Value::Number(n)) => Ok(format_number(*n)),
        (ValueType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(format_number)
            .map_err(|_| mismatch()),
        (ValueType::Bool, Value::Bool(b)) => Ok(b.to_string()),
        (ValueType::Bool, Value::String(s)) => parse_bool(s)
            .map(|b| b.to_string())
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

/// Typed value of a flattened primitive
pub fn parse_primitive(ty: ValueType, raw: &str) -> Value {
    match ty {
        ValueType::Int | ValueType::Float => raw
            .parse::<f64>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ValueType::Bool => parse_bool(raw)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// Join a prefix and a key segment
pub(crate) fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Flatten every configured attribute of a schema map
pub fn flatten_map(
    schema: &SchemaMap,
    values: &BTreeMap<String, Value>,
) -> Result<Flattened> {
    let mut out = Flattened::default();
    for (key, value) in values {
        let attr = schema
            .get(key)
            .ok_or_else(|| Error::UnknownAttribute(key.clone()))?;
        flatten_value(key, attr, value, &mut out)?;
    }
    Ok(out)
}

/// Flatten one value under `key` following `schema`
pub fn flatten_value(key: &str, schema: &Schema, value: &Value, out: &mut Flattened) -> Result<()> {
    if value.is_unknown() {
        let marker = match schema.ty {
            ValueType::List | ValueType::Set => join(key, "#"),
            ValueType::Map => join(key, "%"),
            _ => key.to_string(),
        };
        out.computed.insert(marker);
        return Ok(());
    }

    match schema.ty {
        ValueType::String | ValueType::Int | ValueType::Float | ValueType::Bool => {
            let raw = decode_primitive(key, schema.ty, value)?;
            out.attributes.insert(key.to_string(), raw);
        }
        ValueType::List => {
            let items = collection_items(key, schema, value)?;
            out.attributes
                .insert(join(key, "#"), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_element(&join(key, &i.to_string()), schema, item, out)?;
            }
        }
        ValueType::Set => {
            let items = collection_items(key, schema, value)?;
            let members = set_members(key, schema, items)?;
            out.attributes
                .insert(join(key, "#"), members.len().to_string());
            for (code, item) in &members {
                flatten_element(&join(key, code), schema, item, out)?;
            }
        }
        ValueType::Map => {
            let Value::Map(map) = value else {
                return Err(Error::SchemaValidation {
                    key: key.to_string(),
                    expected: ValueType::Map,
                    found: value.type_name(),
                });
            };
            out.attributes.insert(join(key, "%"), map.len().to_string());
            let elem = schema.element_schema().unwrap_or_else(Schema::string);
            for (k, v) in map {
                flatten_value(&join(key, k), &elem, v, out)?;
            }
        }
    }
    Ok(())
}

/// Flatten a single collection element, which may be a nested block
pub(crate) fn flatten_element(
    key: &str,
    collection: &Schema,
    item: &Value,
    out: &mut Flattened,
) -> Result<()> {
    match &collection.elem {
        Some(Elem::Block(block)) => {
            if item.is_unknown() {
                out.computed.insert(key.to_string());
                return Ok(());
            }
            let Value::Map(fields) = item else {
                return Err(Error::SchemaValidation {
                    key: key.to_string(),
                    expected: ValueType::Map,
                    found: item.type_name(),
                });
            };
            for (name, field_value) in fields {
                let field = block
                    .get(name)
                    .ok_or_else(|| Error::UnknownAttribute(join(key, name)))?;
                flatten_value(&join(key, name), field, field_value, out)?;
            }
            Ok(())
        }
        _ => {
            let elem = collection.element_schema().unwrap_or_else(Schema::string);
            flatten_value(key, &elem, item, out)
        }
    }
}

/// Items of a list or set value. A bare value is rejected.
pub(crate) fn collection_items<'v>(
    key: &str,
    schema: &Schema,
    value: &'v Value,
) -> Result<&'v [Value]> {
    value.as_list().ok_or_else(|| Error::SchemaValidation {
        key: key.to_string(),
        expected: schema.ty,
        found: value.type_name(),
    })
}

/// Hash set members, keyed and ordered by their hash code.
///
/// Duplicate members collapse into one.
pub fn set_members(
    key: &str,
    schema: &Schema,
    items: &[Value],
) -> Result<BTreeMap<String, Value>> {
    let mut members = BTreeMap::new();
    for item in items {
        let code = hash_member(key, schema, item)?;
        members.insert(code.to_string(), item.clone());
    }
    Ok(members)
}

/// Hash code of a single set member
pub fn hash_member(key: &str, schema: &Schema, item: &Value) -> Result<u32> {
    if let Some(hash) = schema.set_hash {
        return Ok(hash(item));
    }
    let canonical = canonical_form(key, schema, item)?;
    Ok(hash_string(&canonical))
}

/// Stable hash of a string, used as the default set hash
pub fn hash_string(s: &str) -> u32 {
    let digest = blake3::hash(s.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7fff_ffff
}

/// Canonical string of a member: its flattened form without computed-only
/// block fields, which the user never configures.
fn canonical_form(key: &str, schema: &Schema, item: &Value) -> Result<String> {
    let mut flat = Flattened::default();
    match (&schema.elem, item) {
        (Some(Elem::Block(block)), Value::Map(fields)) => {
            for (name, value) in fields {
                let Some(field) = block.get(name) else {
                    return Err(Error::UnknownAttribute(join(key, name)));
                };
                if field.is_computed_only() {
                    continue;
                }
                flatten_value(name, field, value, &mut flat)?;
            }
        }
        _ => flatten_element("", schema, item, &mut flat)?,
    }
    let mut canonical = String::new();
    for (k, v) in &flat.attributes {
        canonical.push_str(k);
        canonical.push('=');
        canonical.push_str(v);
        canonical.push(';');
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_of(entries: Vec<(&str, Schema)>) -> SchemaMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn values_of(entries: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn weak_decoding() {
        assert_eq!(
            decode_primitive("n", ValueType::Int, &Value::string("42")).unwrap(),
            "42"
        );
        assert_eq!(
            decode_primitive("s", ValueType::String, &Value::Number(7.0)).unwrap(),
            "7"
        );
        assert_eq!(
            decode_primitive("b", ValueType::Bool, &Value::string("1")).unwrap(),
            "true"
        );
        assert!(matches!(
            decode_primitive("n", ValueType::Int, &Value::Number(1.5)),
            Err(Error::SchemaValidation { .. })
        ));
        assert!(decode_primitive("s", ValueType::String, &Value::List(vec![])).is_err());
    }

    #[test]
    fn flattens_lists_and_maps() {
        let schema = schema_of(vec![
            ("names", Schema::list(Schema::string()).optional()),
            ("tags", Schema::map().optional()),
        ]);
        let values = values_of(vec![
            ("names", Value::string_list(["a", "b"])),
            ("tags", Value::string_map([("env", "prod")])),
        ]);
        let flat = flatten_map(&schema, &values).unwrap();
        let expected: BTreeMap<String, String> = [
            ("names.#", "2"),
            ("names.0", "a"),
            ("names.1", "b"),
            ("tags.%", "1"),
            ("tags.env", "prod"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(flat.attributes, expected);
        assert!(flat.computed.is_empty());
    }

    #[test]
    fn sets_are_keyed_by_hash() {
        let schema = Schema::set(Schema::string()).optional();
        let mut flat = Flattened::default();
        let value = Value::Set(vec!["x".into(), "y".into(), "x".into()]);
        flatten_value("s", &schema, &value, &mut flat).unwrap();
        assert_eq!(flat.attributes.get("s.#").map(String::as_str), Some("2"));

        let code = hash_member("s", &schema, &Value::string("x")).unwrap();
        assert_eq!(
            flat.attributes.get(&format!("s.{code}")).map(String::as_str),
            Some("x")
        );
    }

    #[test]
    fn set_hash_ignores_computed_only_fields() {
        let block = schema_of(vec![
            ("name", Schema::string().required()),
            ("arn", Schema::string().computed()),
        ]);
        let schema = Schema::set_of_blocks(block).optional();
        let configured = Value::Map(values_of(vec![("name", Value::string("a"))]));
        let observed = Value::Map(values_of(vec![
            ("name", Value::string("a")),
            ("arn", Value::string("arn:1")),
        ]));
        assert_eq!(
            hash_member("s", &schema, &configured).unwrap(),
            hash_member("s", &schema, &observed).unwrap()
        );
    }

    #[test]
    fn unknown_values_mark_computed_keys() {
        let schema = schema_of(vec![
            ("name", Schema::string().optional()),
            ("names", Schema::list(Schema::string()).optional()),
        ]);
        let values = values_of(vec![("name", Value::Unknown), ("names", Value::Unknown)]);
        let flat = flatten_map(&schema, &values).unwrap();
        assert!(flat.attributes.is_empty());
        assert!(flat.computed.contains("name"));
        assert!(flat.computed.contains("names.#"));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let schema = schema_of(vec![("name", Schema::string().optional())]);
        let values = values_of(vec![("nope", Value::string("x"))]);
        assert_eq!(
            flatten_map(&schema, &values),
            Err(Error::UnknownAttribute("nope".to_string()))
        );
    }
}
