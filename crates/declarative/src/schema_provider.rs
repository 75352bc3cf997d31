//! Schema-backed providers: write create, read, update and delete only
//!
//! A [`SchemaProvider`] turns a set of [`ResourceDefinition`]s into a full
//! [`ResourceProvider`]. Validation and diffing come from the schemas;
//! apply, refresh and import are routed to the definition's functions with
//! a [`ResourceData`] view of the instance.

use crate::provider::{ApplyError, ConfiguredProvider, ResourceProvider};
use crate::types::ResourceAddress;
use anyhow::{Context, Result};
use schema::{
    Diagnostics, InstanceDiff, InstanceState, Registry, ResourceConfig, ResourceData,
    ResourceSchema,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Create, read, update or delete an instance through its data view
pub type CrudFn<M> = fn(&mut ResourceData<'_>, &M) -> Result<()>;

/// Build the provider's client from its configuration
pub type ConfigureFn<M> = fn(&ResourceData<'_>) -> Result<M>;

/// One resource type of a schema-backed provider
pub struct ResourceDefinition<M> {
    pub schema: ResourceSchema,
    pub create: CrudFn<M>,
    pub read: CrudFn<M>,
    /// Without an update function every change must force a new instance
    pub update: Option<CrudFn<M>>,
    pub delete: CrudFn<M>,
}

impl<M> ResourceDefinition<M> {
    pub fn new(schema: ResourceSchema, create: CrudFn<M>, read: CrudFn<M>, delete: CrudFn<M>) -> Self {
        Self {
            schema,
            create,
            read,
            update: None,
            delete,
        }
    }

    pub fn update(mut self, update: CrudFn<M>) -> Self {
        self.update = Some(update);
        self
    }
}

/// Provider assembled from resource definitions
pub struct SchemaProvider<M> {
    registry: Registry,
    provider_schema: ResourceSchema,
    resources: Arc<BTreeMap<String, ResourceDefinition<M>>>,
    configure: ConfigureFn<M>,
}

impl<M> SchemaProvider<M> {
    pub fn builder(configure: ConfigureFn<M>) -> SchemaProviderBuilder<M> {
        SchemaProviderBuilder {
            provider_schema: ResourceSchema::default(),
            resources: BTreeMap::new(),
            configure,
        }
    }
}

/// Collects resource definitions and validates their schemas once on build
pub struct SchemaProviderBuilder<M> {
    provider_schema: ResourceSchema,
    resources: BTreeMap<String, ResourceDefinition<M>>,
    configure: ConfigureFn<M>,
}

impl<M> SchemaProviderBuilder<M> {
    /// Schema of the provider's own configuration
    pub fn schema(mut self, schema: ResourceSchema) -> Self {
        self.provider_schema = schema;
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, definition: ResourceDefinition<M>) -> Self {
        self.resources.insert(resource_type.into(), definition);
        self
    }

    pub fn build(self) -> schema::Result<SchemaProvider<M>> {
        self.provider_schema.internal_validate()?;
        let registry = self
            .resources
            .iter()
            .fold(Registry::builder(), |builder, (name, definition)| {
                builder.register(name.as_str(), definition.schema.clone())
            })
            .build()?;
        Ok(SchemaProvider {
            registry,
            provider_schema: self.provider_schema,
            resources: Arc::new(self.resources),
            configure: self.configure,
        })
    }
}

impl<M: Send + Sync + 'static> ResourceProvider for SchemaProvider<M> {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, config: &ResourceConfig) -> Diagnostics {
        self.provider_schema.validate(config)
    }

    fn configure(&self, config: &ResourceConfig) -> Result<Box<dyn ConfiguredProvider>> {
        let diff = self.provider_schema.diff(None, config)?;
        let data = self.provider_schema.data(None, Some(&diff));
        let meta = (self.configure)(&data)?;
        Ok(Box::new(SchemaClient {
            resources: Arc::clone(&self.resources),
            meta,
        }))
    }
}

struct SchemaClient<M> {
    resources: Arc<BTreeMap<String, ResourceDefinition<M>>>,
    meta: M,
}

impl<M> SchemaClient<M> {
    fn definition(&self, address: &ResourceAddress) -> Result<&ResourceDefinition<M>> {
        self.resources
            .get(&address.resource_type)
            .with_context(|| format!("unsupported resource type {}", address.resource_type))
    }

    /// Run a write function and turn the data view into the resulting state
    fn finish(
        mut data: ResourceData<'_>,
        operation: CrudFn<M>,
        meta: &M,
    ) -> std::result::Result<Option<InstanceState>, ApplyError> {
        let result = operation(&mut data, meta);
        let state = data.into_state().map_err(anyhow::Error::from)?;
        match result {
            Ok(()) => Ok(Some(state).filter(InstanceState::exists)),
            Err(err) if state.exists() => Err(ApplyError::new(err).with_partial(state)),
            Err(err) => Err(ApplyError::new(err)),
        }
    }
}

impl<M: Send + Sync> ConfiguredProvider for SchemaClient<M> {
    fn apply(
        &self,
        address: &ResourceAddress,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> std::result::Result<Option<InstanceState>, ApplyError> {
        let definition = self.definition(address)?;
        let prior = state.filter(|s| s.exists());

        if diff.destroy || diff.destroy_deposed {
            if let Some(prior) = prior {
                let mut data = definition.schema.data(Some(prior), None);
                (definition.delete)(&mut data, &self.meta)
                    .with_context(|| format!("destroying {address}"))?;
            }
            if diff.attributes.is_empty() {
                return Ok(None);
            }
            let data = definition.schema.data(None, Some(diff));
            return Self::finish(data, definition.create, &self.meta).map_err(|err| {
                if prior.is_some() && err.partial.is_none() {
                    err.with_partial(InstanceState::default())
                } else {
                    err
                }
            });
        }

        match prior {
            None => {
                let data = definition.schema.data(None, Some(diff));
                Self::finish(data, definition.create, &self.meta)
            }
            Some(prior) => {
                let update = definition.update.with_context(|| {
                    format!("{} cannot be updated in place", address.resource_type)
                })?;
                let data = definition.schema.data(Some(prior), Some(diff));
                Self::finish(data, update, &self.meta)
            }
        }
    }

    fn refresh(&self, address: &ResourceAddress, state: &InstanceState) -> Result<Option<InstanceState>> {
        let definition = self.definition(address)?;
        let mut data = definition.schema.data(Some(state), None);
        (definition.read)(&mut data, &self.meta)?;
        if data.id().is_empty() {
            return Ok(None);
        }
        Ok(Some(data.into_state()?))
    }

    fn import(&self, address: &ResourceAddress, id: &str) -> Result<Option<InstanceState>> {
        let definition = self.definition(address)?;
        let mut data = definition.schema.data(None, None);
        data.set_id(id);
        (definition.read)(&mut data, &self.meta)?;
        Ok(Some(data.into_state()?).filter(InstanceState::exists))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{ChangeType, Schema, Value};
    use std::sync::Mutex;

    /// Disks keyed by ID, standing in for a remote API
    #[derive(Default)]
    struct Cloud {
        region: String,
        disks: Mutex<BTreeMap<String, String>>,
    }

    fn configure(data: &ResourceData<'_>) -> Result<Cloud> {
        Ok(Cloud {
            region: data.get_string("region"),
            ..Cloud::default()
        })
    }

    fn create(data: &mut ResourceData<'_>, cloud: &Cloud) -> Result<()> {
        let name = data.get_string("name");
        if name == "broken" {
            data.set_id("disk-broken");
            anyhow::bail!("quota exceeded");
        }
        if name == "full" {
            anyhow::bail!("no capacity left");
        }
        let id = format!("disk-{name}");
        cloud.disks.lock().unwrap().insert(id.clone(), name);
        data.set_id(id);
        read(data, cloud)
    }

    fn read(data: &mut ResourceData<'_>, cloud: &Cloud) -> Result<()> {
        let Some(name) = cloud.disks.lock().unwrap().get(data.id()).cloned() else {
            data.set_id("");
            return Ok(());
        };
        data.set("name", name)?;
        data.set("zone", format!("{}-a", cloud.region))?;
        Ok(())
    }

    fn update(data: &mut ResourceData<'_>, cloud: &Cloud) -> Result<()> {
        let name = data.get_string("name");
        cloud.disks.lock().unwrap().insert(data.id().to_string(), name);
        Ok(())
    }

    fn delete(data: &mut ResourceData<'_>, cloud: &Cloud) -> Result<()> {
        cloud.disks.lock().unwrap().remove(data.id());
        data.set_id("");
        Ok(())
    }

    fn provider() -> SchemaProvider<Cloud> {
        let disk = ResourceSchema::default()
            .attribute("name", Schema::string().required())
            .attribute("size", Schema::int().optional().force_new())
            .attribute("zone", Schema::string().computed());
        SchemaProvider::builder(configure)
            .schema(ResourceSchema::default().attribute("region", Schema::string().required()))
            .resource(
                "cloud_disk",
                ResourceDefinition::new(disk, create, read, delete).update(update),
            )
            .build()
            .unwrap()
    }

    fn address() -> ResourceAddress {
        ResourceAddress::new("cloud_disk", "data")
    }

    fn client(provider: &SchemaProvider<Cloud>) -> Box<dyn ConfiguredProvider> {
        provider
            .configure(&ResourceConfig::default().with("region", "eu"))
            .unwrap()
    }

    fn plan(
        provider: &SchemaProvider<Cloud>,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
    ) -> InstanceDiff {
        let schema = provider.registry().get("cloud_disk").unwrap();
        client(provider).diff(schema, state, config).unwrap()
    }

    #[test]
    fn test_provider_config_is_validated() {
        let provider = provider();
        assert!(!provider.validate(&ResourceConfig::default()).is_ok());
        assert!(provider.validate(&ResourceConfig::default().with("region", "eu")).is_ok());
        let diagnostics =
            provider.validate_resource("cloud_disk", &ResourceConfig::default().with("zone", "x"));
        assert!(!diagnostics.is_ok());
        assert!(!provider.validate_resource("cloud_vm", &ResourceConfig::default()).is_ok());
    }

    #[test]
    fn test_create_read_update_delete() {
        let provider = provider();
        let client = client(&provider);
        let address = address();

        let config = ResourceConfig::default().with("name", "data").with("size", 10_i64);
        let diff = plan(&provider, None, &config);
        assert_eq!(diff.change_type(), ChangeType::Create);

        let state = client.apply(&address, None, &diff).unwrap().unwrap();
        assert_eq!(state.id, "disk-data");
        assert_eq!(state.get("zone"), Some("eu-a"));
        assert_eq!(state.get("size"), Some("10"));

        // Nothing left to do once applied
        assert!(plan(&provider, Some(&state), &config).is_empty());

        let renamed = ResourceConfig::default().with("name", "logs").with("size", 10_i64);
        let diff = plan(&provider, Some(&state), &renamed);
        assert_eq!(diff.change_type(), ChangeType::Update);
        let state = client.apply(&address, Some(&state), &diff).unwrap().unwrap();
        assert_eq!(state.id, "disk-data");
        assert_eq!(state.get("name"), Some("logs"));

        let refreshed = client.refresh(&address, &state).unwrap().unwrap();
        assert_eq!(refreshed.get("name"), Some("logs"));

        let gone = client.apply(&address, Some(&state), &InstanceDiff::destroy()).unwrap();
        assert!(gone.is_none());
        assert!(client.refresh(&address, &state).unwrap().is_none());
    }

    #[test]
    fn test_replace_destroys_then_creates() {
        let provider = provider();
        let client = client(&provider);
        let address = address();

        let config = ResourceConfig::default().with("name", "data").with("size", 10_i64);
        let state = client
            .apply(&address, None, &plan(&provider, None, &config))
            .unwrap()
            .unwrap();

        let bigger = ResourceConfig::default().with("name", "data").with("size", 20_i64);
        let diff = plan(&provider, Some(&state), &bigger);
        assert!(diff.destroy);
        assert_eq!(diff.change_type(), ChangeType::DestroyCreate);

        let replaced = client.apply(&address, Some(&state), &diff).unwrap().unwrap();
        assert_eq!(replaced.id, "disk-data");
        assert_eq!(replaced.get("size"), Some("20"));
    }

    #[test]
    fn test_failed_create_returns_partial_state() {
        let provider = provider();
        let client = client(&provider);
        let config = ResourceConfig::default().with("name", "broken");
        let diff = plan(&provider, None, &config);

        let err = client.apply(&address(), None, &diff).unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.partial.map(|s| s.id), Some("disk-broken".to_string()));
    }

    #[test]
    fn test_failed_replace_reports_deleted_instance() {
        let provider = provider();
        let client = client(&provider);
        let address = address();

        let config = ResourceConfig::default().with("name", "data").with("size", 10_i64);
        let state = client
            .apply(&address, None, &plan(&provider, None, &config))
            .unwrap()
            .unwrap();

        let replacement = ResourceConfig::default().with("name", "full").with("size", 20_i64);
        let diff = plan(&provider, Some(&state), &replacement);
        assert_eq!(diff.change_type(), ChangeType::DestroyCreate);

        let err = client.apply(&address, Some(&state), &diff).unwrap_err();
        assert_eq!(err.to_string(), "no capacity left");
        let partial = err.partial.unwrap();
        assert!(!partial.exists());
        assert!(client.refresh(&address, &state).unwrap().is_none());
    }

    #[test]
    fn test_import_reads_by_id() {
        let provider = provider();
        let client = client(&provider);
        let config = ResourceConfig::default().with("name", "data");
        client
            .apply(&address(), None, &plan(&provider, None, &config))
            .unwrap();

        let imported = client.import(&address(), "disk-data").unwrap().unwrap();
        assert_eq!(imported.get("name"), Some("data"));
        assert!(client.import(&address(), "disk-nope").unwrap().is_none());
        assert_eq!(
            ResourceConfig::default().with("name", "data").get("name"),
            Some(&Value::string("data"))
        );
    }
}
