//! Subcommand implementations

pub mod inspect;
pub mod run;

use crate::Context;
use crate::builtin;
use crate::config;
use crate::state::FileStateStore;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{Configuration, Engine, ExecuteOptions, ResourceAddress};
use std::sync::Arc;

pub(crate) fn load_config(ctx: &Context) -> Result<Configuration> {
    config::load(&ctx.config, &ctx.vars)
        .with_context(|| format!("Failed to load configuration from {}", ctx.config.display()))
}

pub(crate) fn parse_targets(targets: &[String]) -> Result<Vec<ResourceAddress>> {
    targets
        .iter()
        .map(|target| {
            target
                .parse::<ResourceAddress>()
                .with_context(|| format!("Invalid target '{target}'"))
        })
        .collect()
}

/// Engine over the state file with the built-in providers registered
pub(crate) fn engine(ctx: &Context, options: ExecuteOptions) -> Result<Engine> {
    let provider = builtin::test_provider().context("Invalid built-in provider schema")?;
    let store = Arc::new(FileStateStore::new(&ctx.state));
    Ok(Engine::new(store)
        .provider("test", Arc::new(provider))
        .options(options))
}
