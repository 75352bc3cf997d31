//! `test_computed_resource`: a set of blocks the provider fills in

use super::Meta;
use anyhow::Result;
use declarative::ResourceDefinition;
use schema::flatmap::hash_string;
use schema::{ResourceData, ResourceSchema, Schema, SchemaMap, Value};
use std::collections::BTreeMap;

fn ebs_block_device() -> SchemaMap {
    [
        (
            "delete_on_termination",
            Schema::bool().optional().default(true).force_new(),
        ),
        ("device_name", Schema::string().required().force_new()),
        ("encrypted", Schema::bool().optional().computed().force_new()),
        ("iops", Schema::int().optional().computed().force_new()),
        ("snapshot_id", Schema::string().optional().computed().force_new()),
        ("volume_size", Schema::int().optional().computed().force_new()),
        ("volume_type", Schema::string().optional().computed().force_new()),
    ]
    .into_iter()
    .map(|(name, schema)| (name.to_string(), schema))
    .collect()
}

/// Set identity of a block device: every field, in a fixed order
fn hash_device(value: &Value) -> u32 {
    let field = |name: &str| {
        value
            .lookup(name)
            .and_then(Value::to_flat_string)
            .unwrap_or_default()
    };
    let flag = |name: &str| {
        value
            .lookup(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    let number = |name: &str| {
        value
            .lookup(name)
            .and_then(Value::as_f64)
            .unwrap_or_default()
    };
    hash_string(&format!(
        "{}-{}-{}-{}-{}-{}-{}-",
        flag("delete_on_termination"),
        field("device_name"),
        flag("encrypted"),
        number("iops"),
        field("snapshot_id"),
        number("volume_size"),
        field("volume_type"),
    ))
}

pub fn definition() -> ResourceDefinition<Meta> {
    let schema = ResourceSchema::default()
        .description("Resource whose nested blocks are computed on create")
        .attribute(
            "ebs_block_device",
            Schema::set_of_blocks(ebs_block_device())
                .optional()
                .computed()
                .set_hash(hash_device),
        );
    ResourceDefinition::new(schema, create, read, delete).update(update)
}

fn create(data: &mut ResourceData<'_>, meta: &Meta) -> Result<()> {
    data.set_id("computedTestId");
    read(data, meta)
}

fn read(data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    let device: BTreeMap<String, Value> = [
        ("device_name", Value::from("/dev/sdc")),
        ("delete_on_termination", Value::Bool(true)),
        ("volume_size", Value::Number(10.0)),
        ("volume_type", Value::from("gp2")),
        ("iops", Value::Number(100.0)),
        ("encrypted", Value::Bool(false)),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    data.set("ebs_block_device", Value::Set(vec![Value::Map(device)]))?;
    Ok(())
}

fn update(_data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    Ok(())
}

fn delete(data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    data.set_id("");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::engine;
    use super::*;
    use declarative::{Configuration, NoProgress, ResourceAddress, ResourceBlock};

    fn address() -> ResourceAddress {
        "test_computed_resource.foo".parse().unwrap()
    }

    #[test]
    fn test_hash_ignores_member_order_of_fields() {
        let a = Value::Map(
            [
                ("device_name".to_string(), Value::from("/dev/sdc")),
                ("iops".to_string(), Value::Number(100.0)),
            ]
            .into(),
        );
        let b = Value::Map(
            [
                ("iops".to_string(), Value::Number(100.0)),
                ("device_name".to_string(), Value::from("/dev/sdc")),
            ]
            .into(),
        );
        let c = Value::Map([("device_name".to_string(), Value::from("/dev/sdd"))].into());
        assert_eq!(hash_device(&a), hash_device(&b));
        assert_ne!(hash_device(&a), hash_device(&c));
    }

    #[test]
    fn test_create_computes_block_set() {
        let (engine, store) = engine();
        let config = Configuration::new().resource(ResourceBlock::new(address()));

        let plan = engine.plan(&config, &mut NoProgress).unwrap();
        assert_eq!(plan.summary().additions, 1);

        let report = engine.apply(&config, None, &mut NoProgress).unwrap();
        assert!(report.is_success(), "{:?}", report.outcomes);

        let state = store.snapshot();
        let instance = state.instance(&address()).unwrap();
        assert_eq!(instance.id, "computedTestId");
        assert_eq!(instance.get("ebs_block_device.#"), Some("1"));
        let device_names: Vec<_> = instance
            .attributes
            .iter()
            .filter(|(key, _)| key.ends_with(".device_name"))
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(device_names, vec!["/dev/sdc"]);

        let plan = engine.plan(&config, &mut NoProgress).unwrap();
        assert!(plan.is_empty(), "unexpected changes: {:?}", plan.changes);
    }
}
