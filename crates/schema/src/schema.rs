//! Attribute schemas
//!
//! A [`Schema`] describes one attribute of a resource: its type, whether the
//! user must, may, or cannot set it, whether changing it forces replacement,
//! and for collections the shape of their elements.

use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute name to schema
pub type SchemaMap = BTreeMap<String, Schema>;

/// Validation hook run against configured values. Receives the value and the
/// attribute key, returns an error message on rejection.
pub type ValidateFn = fn(&Value, &str) -> std::result::Result<(), String>;

/// Hash function for set members
pub type SetHashFn = fn(&Value) -> u32;

/// Attribute value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    List,
    Set,
    Map,
}

impl ValueType {
    pub fn is_primitive(self) -> bool {
        matches!(self, Self::String | Self::Int | Self::Float | Self::Bool)
    }

    pub fn is_collection(self) -> bool {
        !self.is_primitive()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

/// Element description for collections
#[derive(Debug, Clone)]
pub enum Elem {
    /// Each element is a single value of this schema
    Schema(Box<Schema>),
    /// Each element is a nested block with its own attributes
    Block(SchemaMap),
}

/// Schema of a single attribute
#[derive(Debug, Clone)]
pub struct Schema {
    pub ty: ValueType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub force_new: bool,
    pub default: Option<Value>,
    /// Environment variable consulted when the attribute is not configured
    pub default_env: Option<String>,
    pub elem: Option<Elem>,
    pub set_hash: Option<SetHashFn>,
    pub validate: Option<ValidateFn>,
    pub min_items: usize,
    /// Zero means unbounded
    pub max_items: usize,
    pub description: String,
}

impl Schema {
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            default: None,
            default_env: None,
            elem: None,
            set_hash: None,
            validate: None,
            min_items: 0,
            max_items: 0,
            description: String::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(ValueType::String)
    }

    pub fn int() -> Self {
        Self::new(ValueType::Int)
    }

    pub fn float() -> Self {
        Self::new(ValueType::Float)
    }

    pub fn bool() -> Self {
        Self::new(ValueType::Bool)
    }

    pub fn map() -> Self {
        Self::new(ValueType::Map)
    }

    /// List whose elements follow `elem`
    pub fn list(elem: Schema) -> Self {
        Self::new(ValueType::List).elem(elem)
    }

    /// Set whose elements follow `elem`
    pub fn set(elem: Schema) -> Self {
        Self::new(ValueType::Set).elem(elem)
    }

    /// List of nested blocks
    pub fn list_of_blocks(block: SchemaMap) -> Self {
        Self::new(ValueType::List).block(block)
    }

    /// Set of nested blocks
    pub fn set_of_blocks(block: SchemaMap) -> Self {
        Self::new(ValueType::Set).block(block)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_env(mut self, var: impl Into<String>) -> Self {
        self.default_env = Some(var.into());
        self
    }

    pub fn elem(mut self, elem: Schema) -> Self {
        self.elem = Some(Elem::Schema(Box::new(elem)));
        self
    }

    pub fn block(mut self, block: SchemaMap) -> Self {
        self.elem = Some(Elem::Block(block));
        self
    }

    pub fn set_hash(mut self, hash: SetHashFn) -> Self {
        self.set_hash = Some(hash);
        self
    }

    pub fn validate_with(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = n;
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Computed and not settable by the user
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// Default value from `default` or `default_env`, if any
    pub fn default_value(&self) -> Option<Value> {
        if let Some(value) = &self.default {
            return Some(value.clone());
        }
        self.default_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(Value::String)
    }

    /// Schema used for a single element of this collection.
    ///
    /// Elements inherit `force_new` from their collection and are always
    /// optional, so a missing element reads as removal.
    pub(crate) fn element_schema(&self) -> Option<Schema> {
        match &self.elem {
            Some(Elem::Schema(elem)) => {
                let mut elem = (**elem).clone();
                elem.force_new |= self.force_new;
                elem.optional = true;
                elem.required = false;
                elem.computed = false;
                Some(elem)
            }
            Some(Elem::Block(_)) => None,
            None if self.ty == ValueType::Map => {
                let mut elem = Schema::string().optional();
                elem.force_new = self.force_new;
                Some(elem)
            }
            None => None,
        }
    }

    /// Schema of a field inside a nested block element, with `force_new`
    /// inherited from the enclosing collection
    pub(crate) fn block_field(&self, field: &Schema) -> Schema {
        let mut field = field.clone();
        field.force_new |= self.force_new;
        field
    }

    /// Check the attribute invariants. `key` is used in error messages.
    pub fn internal_validate(&self, key: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidSchema {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.required && self.optional {
            return invalid("required and optional are mutually exclusive");
        }
        if self.required && self.computed {
            return invalid("required and computed are mutually exclusive");
        }
        if !self.required && !self.optional && !self.computed {
            return invalid("one of required, optional or computed must be set");
        }
        if self.required && self.default.is_some() {
            return invalid("default cannot be set with required");
        }
        if self.required && self.default_env.is_some() {
            return invalid("default_env cannot be set with required");
        }
        if self.is_computed_only() && (self.default.is_some() || self.default_env.is_some()) {
            return invalid("default cannot be set on a computed-only attribute");
        }
        if self.is_computed_only() && self.validate.is_some() {
            return invalid("validate cannot be set on a computed-only attribute");
        }
        if self.ty.is_primitive() && self.elem.is_some() {
            return invalid("elem is only valid on collections");
        }
        if self.max_items > 0 && self.min_items > self.max_items {
            return invalid("min_items is greater than max_items");
        }
        if let Some(default) = &self.default
            && self.ty.is_collection()
            && !default.is_zero()
        {
            return invalid("defaults are only supported on primitives");
        }

        match (&self.ty, &self.elem) {
            (ValueType::List | ValueType::Set, None) => invalid("collections require elem"),
            (ValueType::Map, Some(Elem::Block(_))) => {
                invalid("map elements must be primitives")
            }
            (ValueType::Map, Some(Elem::Schema(elem))) if !elem.ty.is_primitive() => {
                invalid("map elements must be primitives")
            }
            (_, Some(Elem::Schema(elem))) => {
                if elem.ty.is_collection() && elem.ty != ValueType::Map {
                    return invalid("nested collections must use a block");
                }
                Ok(())
            }
            (_, Some(Elem::Block(block))) => validate_map(block, Some(key)),
            _ => Ok(()),
        }
    }
}

/// Validate every attribute of a schema map. Nested blocks pass `parent`.
pub fn validate_map(map: &SchemaMap, parent: Option<&str>) -> Result<()> {
    for (name, schema) in map {
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidSchema {
                key: name.clone(),
                reason: "attribute names cannot be empty or contain dots".to_string(),
            });
        }
        if parent.is_none() && name == "id" {
            return Err(Error::InvalidSchema {
                key: name.clone(),
                reason: "id is reserved".to_string(),
            });
        }
        let key = match parent {
            Some(parent) => format!("{parent}.{name}"),
            None => name.clone(),
        };
        schema.internal_validate(&key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: Vec<(&str, Schema)>) -> SchemaMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn required_and_computed_conflict() {
        let schema = Schema::string().required().computed();
        assert!(matches!(
            schema.internal_validate("a"),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn attribute_must_pick_a_mode() {
        assert!(Schema::string().internal_validate("a").is_err());
        assert!(Schema::string().optional().computed().internal_validate("a").is_ok());
    }

    #[test]
    fn computed_only_cannot_default() {
        let schema = Schema::string().computed().default("x");
        assert!(schema.internal_validate("a").is_err());
    }

    #[test]
    fn lists_need_an_element() {
        let schema = Schema::new(ValueType::List).optional();
        assert!(schema.internal_validate("a").is_err());
        assert!(Schema::list(Schema::string()).optional().internal_validate("a").is_ok());
    }

    #[test]
    fn nested_blocks_are_validated() {
        let block = map_of(vec![("bad", Schema::string())]);
        let schema = Schema::list_of_blocks(block).optional();
        let err = schema.internal_validate("outer").unwrap_err();
        assert_eq!(
            err,
            Error::InvalidSchema {
                key: "outer.bad".to_string(),
                reason: "one of required, optional or computed must be set".to_string(),
            }
        );
    }

    #[test]
    fn id_is_reserved_at_top_level() {
        let map = map_of(vec![("id", Schema::string().computed())]);
        assert!(validate_map(&map, None).is_err());
    }

    #[test]
    fn elements_inherit_force_new() {
        let schema = Schema::list(Schema::string()).optional().force_new();
        let elem = schema.element_schema().unwrap();
        assert!(elem.force_new);
        assert!(elem.optional);
    }
}
