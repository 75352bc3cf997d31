//! Built-in `test` provider
//!
//! Resources that live only in state, useful for trying configurations
//! and for exercising the engine end to end.

mod computed_resource;
mod test_resource;

use anyhow::Result;
use declarative::SchemaProvider;
use schema::ResourceData;

/// The `test` provider needs no client
pub type Meta = ();

pub fn test_provider() -> schema::Result<SchemaProvider<Meta>> {
    SchemaProvider::builder(configure)
        .resource("test_resource", test_resource::definition())
        .resource("test_computed_resource", computed_resource::definition())
        .build()
}

fn configure(_data: &ResourceData<'_>) -> Result<Meta> {
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ResourceProvider;

    #[test]
    fn test_registry() {
        let provider = test_provider().unwrap();
        let types: Vec<_> = provider.registry().resource_types().collect();
        assert_eq!(types, vec!["test_computed_resource", "test_resource"]);
    }
}
