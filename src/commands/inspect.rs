//! Commands that only read: validate, graph, show and import

use super::{engine, load_config};
use crate::Context;
use crate::state::FileStateStore;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::{ExecuteOptions, Operation, ResourceAddress, StateStore};

pub fn validate(ctx: &Context) -> Result<()> {
    let config = load_config(ctx)?;
    let report = engine(ctx, ExecuteOptions::default())?.validate(&config)?;

    let mut problems = 0;
    for (address, cause) in report.failures() {
        ui::error(&format!("{address}: {cause}"));
        problems += 1;
    }
    for (subject, cause) in &report.errors {
        ui::error(&format!("{subject}: {cause}"));
        problems += 1;
    }
    if problems > 0 {
        bail!("configuration has {problems} problem(s)");
    }
    if !ctx.quiet {
        ui::success(&format!(
            "Configuration is valid ({} resources)",
            config.resources.len()
        ));
    }
    Ok(())
}

pub fn graph(ctx: &Context, operation: Operation) -> Result<()> {
    let config = load_config(ctx)?;
    let execution = engine(ctx, ExecuteOptions::default())?.graph(&config, operation)?;
    print!("{}", execution.graph.dot());
    Ok(())
}

pub fn show(ctx: &Context, address: Option<&str>, json: bool) -> Result<()> {
    let state = FileStateStore::new(&ctx.state).load()?;

    if let Some(address) = address {
        let parsed: ResourceAddress = address
            .parse()
            .with_context(|| format!("Invalid address '{address}'"))?;
        let Some(resource) = state.get(&parsed) else {
            bail!("{address} is not in state");
        };
        if json {
            println!("{}", serde_json::to_string_pretty(resource)?);
        } else {
            ui::print_resource(address, resource);
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    if state.is_empty() {
        ui::info("State is empty");
        return Ok(());
    }
    for (address, resource) in &state.resources {
        ui::print_resource(&address.to_string(), resource);
    }
    ui::print_outputs(&state.outputs);
    Ok(())
}

pub fn import(ctx: &Context, address: &str, id: &str) -> Result<()> {
    let config = load_config(ctx)?;
    let parsed: ResourceAddress = address
        .parse()
        .with_context(|| format!("Invalid address '{address}'"))?;
    let instance = engine(ctx, ExecuteOptions::default())?.import(&config, &parsed, id)?;
    if !ctx.quiet {
        ui::success(&format!("Imported {address} (id {})", instance.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context(dir: &TempDir, config: &str) -> Context {
        let path = dir.path().join("strata.toml");
        fs::write(&path, config).unwrap();
        Context {
            verbose: 0,
            quiet: true,
            config: path,
            state: dir.path().join("strata.state.json"),
            vars: Vec::new(),
        }
    }

    #[test]
    fn test_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            r#"
[[resource]]
type = "test_resource"
name = "web"
config = { required = "${var.missing}" }
"#,
        );
        assert!(validate(&ctx).is_err());
    }

    #[test]
    fn test_validate_accepts_variables() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(
            &dir,
            r#"
[[resource]]
type = "test_resource"
name = "web"
config = { required = "${var.name}", required_map = { key = "value" } }
"#,
        );
        ctx.vars = vec![("name".into(), "web".into())];
        validate(&ctx).unwrap();
    }

    #[test]
    fn test_import_then_show() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            r#"
[[resource]]
type = "test_resource"
name = "web"
config = { required = "yes", required_map = { key = "value" } }
"#,
        );

        import(&ctx, "test_resource.web", "existing-1").unwrap();
        let state = FileStateStore::new(&ctx.state).load().unwrap();
        let instance = state
            .instance(&"test_resource.web".parse().unwrap())
            .unwrap()
            .clone();
        assert_eq!(instance.id, "existing-1");
        assert_eq!(instance.get("computed_read_only"), Some("value_from_api"));

        show(&ctx, Some("test_resource.web"), true).unwrap();
        assert!(show(&ctx, Some("test_resource.db"), false).is_err());
    }
}
