//! Commands that walk the graph: plan, apply, refresh and destroy

use super::{engine, load_config, parse_targets};
use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs, PlanArgs, WalkArgs};
use crate::progress::WalkProgress;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::{ExecuteOptions, Plan, RunReport};
use std::fs;
use std::path::Path;

fn options(walk: &WalkArgs, refresh: bool) -> Result<ExecuteOptions> {
    Ok(ExecuteOptions {
        jobs: walk.jobs,
        refresh,
        targets: parse_targets(&walk.targets)?,
    })
}

fn read_plan(path: &Path) -> Result<Plan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read plan file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid plan file {}", path.display()))
}

fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    let content = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;
    fs::write(path, content).with_context(|| format!("Could not write plan file {}", path.display()))
}

/// Ask before changing anything, unless `--yes` was given
fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn finish(ctx: &Context, report: &RunReport) -> Result<()> {
    for (subject, cause) in &report.errors {
        ui::error(&format!("{subject}: {cause}"));
    }
    if !ctx.quiet {
        ui::print_summary(&report.summary);
        ui::print_outputs(&report.state.outputs);
    }
    if report.canceled {
        bail!("run was canceled");
    }
    if !report.is_success() {
        bail!("{} resource(s) failed", report.summary.failed + report.summary.skipped);
    }
    Ok(())
}

pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let engine = engine(ctx, options(&args.walk, !args.no_refresh)?)?;

    let plan = if args.destroy {
        engine.plan_destroy(&config)?
    } else {
        engine.plan(&config, &mut WalkProgress::new(ctx.quiet))?
    };
    ui::print_plan(&plan);

    if plan.has_errors() {
        bail!("planning failed for {} item(s)", plan.errors.len());
    }
    if let Some(out) = &args.out {
        write_plan(out, &plan)?;
        ui::info(&format!("Plan saved to {}", out.display()));
    }
    Ok(())
}

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let engine = engine(ctx, options(&args.walk, !args.no_refresh)?)?;

    let (plan, saved) = match &args.plan {
        Some(path) => (read_plan(path)?, true),
        None => (engine.plan(&config, &mut WalkProgress::new(true))?, false),
    };
    ui::print_plan(&plan);
    if plan.has_errors() {
        bail!("planning failed for {} item(s)", plan.errors.len());
    }
    if plan.is_empty() {
        return Ok(());
    }
    if !saved && !confirm("Apply these changes?", args.yes)? {
        ui::warn("Apply canceled");
        return Ok(());
    }

    let report = engine.apply(&config, Some(&plan), &mut WalkProgress::new(ctx.quiet))?;
    finish(ctx, &report)
}

pub fn refresh(ctx: &Context, args: &WalkArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let engine = engine(ctx, options(args, true)?)?;
    let report = engine.refresh(&config, &mut WalkProgress::new(ctx.quiet))?;
    finish(ctx, &report)
}

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let engine = engine(ctx, options(&args.walk, false)?)?;

    let plan = engine.plan_destroy(&config)?;
    ui::print_plan(&plan);
    if plan.has_errors() {
        bail!("destroy blocked for {} resource(s)", plan.errors.len());
    }
    if plan.is_empty() {
        return Ok(());
    }
    if !confirm("Destroy these resources? This cannot be undone.", args.yes)? {
        ui::warn("Destroy canceled");
        return Ok(());
    }

    let report = engine.apply(&config, Some(&plan), &mut WalkProgress::new(ctx.quiet))?;
    finish(ctx, &report)
}
