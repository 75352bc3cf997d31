//! TOML configuration files
//!
//! ```toml
//! [variables]
//! region = "eu-west-1"
//!
//! [[provider]]
//! name = "test"
//!
//! [[resource]]
//! type = "test_resource"
//! name = "web"
//! depends_on = ["test_resource.db"]
//! lifecycle = { prevent_destroy = true }
//! config = { required = "${var.region}", required_map = { key = "value" } }
//!
//! [[output]]
//! name = "web_id"
//! value = "${test_resource.web.id}"
//! ```

use declarative::{Configuration, ProviderBlock, ResourceAddress, ResourceBlock};
use schema::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("resource {resource}: {source}")]
    Resource {
        resource: String,
        source: declarative::BuildError,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    variables: toml::Table,
    #[serde(default, rename = "provider")]
    providers: Vec<ProviderSection>,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceSection>,
    #[serde(default, rename = "output")]
    outputs: Vec<OutputSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderSection {
    name: String,
    #[serde(default)]
    config: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceSection {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    lifecycle: Lifecycle,
    #[serde(default)]
    config: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Lifecycle {
    #[serde(default)]
    prevent_destroy: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSection {
    name: String,
    value: toml::Value,
}

/// Expand `~` and environment variables in a path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

/// Load a configuration file, applying `--var` overrides
pub fn load(path: &Path, overrides: &[(String, String)]) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&content, overrides)?;
    log::debug!(
        "loaded {} resource(s) from {}",
        config.resources.len(),
        path.display()
    );
    Ok(config)
}

/// Parse configuration text
pub fn parse(content: &str, overrides: &[(String, String)]) -> Result<Configuration, ConfigError> {
    let file: ConfigFile = toml::from_str(content)?;
    let mut config = Configuration::new();

    for (name, value) in file.variables {
        config = config.variable(name, to_value(value));
    }
    for (name, value) in overrides {
        if !config.variables.contains_key(name) {
            log::warn!("variable {name} is set but not declared");
        }
        config = config.variable(name.as_str(), value.as_str());
    }

    for section in file.providers {
        let block = section
            .config
            .into_iter()
            .fold(ProviderBlock::new(section.name), |block, (key, value)| {
                block.attr(key, to_value(value))
            });
        config = config.provider(block);
    }

    for section in file.resources {
        let label = format!("{}.{}", section.resource_type, section.name);
        let invalid = |source| ConfigError::Resource {
            resource: label.clone(),
            source,
        };
        let address = label.parse::<ResourceAddress>().map_err(invalid)?;
        let mut block = ResourceBlock::new(address);
        if let Some(provider) = section.provider {
            block = block.provider(provider);
        }
        for dependency in &section.depends_on {
            block = block.depends_on(dependency.parse().map_err(invalid)?);
        }
        if section.lifecycle.prevent_destroy {
            block = block.prevent_destroy();
        }
        for (key, value) in section.config {
            block = block.attr(key, to_value(value));
        }
        config = config.resource(block);
    }

    for section in file.outputs {
        config = config.output(section.name, to_value(section.value));
    }
    Ok(config)
}

/// Convert a TOML value into an attribute value
fn to_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i as f64),
        toml::Value::Float(f) => Value::Number(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(to_value).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(k, v)| (k, to_value(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[variables]
region = "eu"
replicas = 3

[[provider]]
name = "test"
config = { endpoint = "http://localhost" }

[[resource]]
type = "test_resource"
name = "db"
lifecycle = { prevent_destroy = true }
config = { required = "db", required_map = { key = "value" } }

[[resource]]
type = "test_resource"
name = "web"
depends_on = ["test_resource.db"]

[resource.config]
required = "${var.region}"
required_map = { db = "${test_resource.db.id}" }
list_of_map = [{ a = "1" }]

[[output]]
name = "web_id"
value = "${test_resource.web.id}"
"#;

    fn address(s: &str) -> ResourceAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE, &[]).unwrap();

        assert_eq!(config.variables["region"], Value::from("eu"));
        assert_eq!(config.variables["replicas"], Value::Number(3.0));
        assert_eq!(config.providers.len(), 1);
        assert_eq!(
            config.providers[0].config["endpoint"],
            Value::from("http://localhost")
        );

        let db = config.find_resource(&address("test_resource.db")).unwrap();
        assert!(db.prevent_destroy);
        assert_eq!(db.provider_name(), "test");

        let web = config.find_resource(&address("test_resource.web")).unwrap();
        assert!(web.depends_on.contains(&address("test_resource.db")));
        assert_eq!(web.config["required"], Value::from("${var.region}"));
        assert!(matches!(web.config["required_map"], Value::Map(_)));
        assert!(matches!(web.config["list_of_map"], Value::List(_)));

        assert_eq!(config.outputs.len(), 1);
        assert_eq!(config.outputs[0].name, "web_id");
    }

    #[test]
    fn test_var_overrides() {
        let overrides = vec![("region".to_string(), "us".to_string())];
        let config = parse(SAMPLE, &overrides).unwrap();
        assert_eq!(config.variables["region"], Value::from("us"));
    }

    #[test]
    fn test_invalid_address_is_reported() {
        let err = parse(
            r#"
[[resource]]
type = "test_resource"
name = "a.b"
"#,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Resource { .. }));
        assert!(err.to_string().contains("test_resource.a.b"));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(matches!(
            parse("[[module]]\nname = \"x\"\n", &[]),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load(file.path(), &[]).unwrap();
        assert_eq!(config.resources.len(), 2);

        let missing = load(Path::new("/nonexistent/strata.toml"), &[]);
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path(Path::new("~/strata.toml"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path(Path::new("plain.toml")), PathBuf::from("plain.toml"));
    }
}
