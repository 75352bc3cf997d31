//! `test_resource`: one attribute of every shape the schema supports

use super::Meta;
use anyhow::{Result, bail};
use declarative::ResourceDefinition;
use schema::{ResourceData, ResourceSchema, Schema, Value};
use std::collections::BTreeMap;

pub fn definition() -> ResourceDefinition<Meta> {
    let schema = ResourceSchema::default()
        .description("Resource kept only in state")
        .attribute("required", Schema::string().required())
        .attribute("optional", Schema::string().optional())
        .attribute("optional_bool", Schema::bool().optional())
        .attribute("optional_force_new", Schema::string().optional().force_new())
        .attribute("optional_computed_map", Schema::map().optional().computed())
        .attribute("computed_read_only", Schema::string().computed().force_new())
        .attribute(
            "computed_read_only_force_new",
            Schema::string().computed().force_new(),
        )
        .attribute("computed_list", Schema::list(Schema::string()).computed())
        .attribute("set", Schema::set(Schema::string()).optional())
        .attribute("computed_set", Schema::set(Schema::string()).computed())
        .attribute("map", Schema::map().optional())
        .attribute("optional_map", Schema::map().optional())
        .attribute("required_map", Schema::map().required())
        .attribute(
            "map_that_look_like_set",
            Schema::map().optional().elem(Schema::string()),
        )
        .attribute("computed_map", Schema::map().computed())
        .attribute(
            "list_of_map",
            Schema::list(Schema::map().elem(Schema::string())).optional(),
        );
    ResourceDefinition::new(schema, create, read, delete).update(update)
}

fn create(data: &mut ResourceData<'_>, meta: &Meta) -> Result<()> {
    data.set_id("testId");

    if data.get_ok("required").is_none() {
        bail!("missing attribute 'required', but it's required");
    }
    if data.get_ok("required_map").is_none() {
        bail!("missing attribute 'required_map', but it's required");
    }
    read(data, meta)
}

fn read(data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    data.set("computed_read_only", "value_from_api")?;
    data.set("computed_read_only_force_new", "value_from_api")?;
    if data.get_ok("optional_computed_map").is_none() {
        data.set("optional_computed_map", Value::Map(BTreeMap::new()))?;
    }
    data.set("computed_map", Value::string_map([("key1", "value1")]))?;
    data.set("computed_list", Value::string_list(["listval1", "listval2"]))?;
    data.set(
        "computed_set",
        Value::Set(vec![Value::from("setval1"), Value::from("setval2")]),
    )?;
    Ok(())
}

fn update(_data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    Ok(())
}

fn delete(data: &mut ResourceData<'_>, _meta: &Meta) -> Result<()> {
    data.set_id("");
    Ok(())
}
