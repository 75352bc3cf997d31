use colored::{ColoredString, Colorize};
use declarative::{Plan, PlannedChange, ResourceState, RunSummary};
use schema::{ChangeType, DiffAttrType, Value};
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plans
// ============================================================================

fn change_symbol(change: ChangeType) -> ColoredString {
    let symbol = change.symbol();
    match change {
        ChangeType::Create => symbol.green(),
        ChangeType::Update => symbol.yellow(),
        ChangeType::Destroy => symbol.red(),
        ChangeType::DestroyCreate => symbol.magenta(),
        ChangeType::None => symbol.normal(),
    }
}

/// Lines describing one planned change, attribute by attribute
pub fn change_lines(change: &PlannedChange) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}",
        change_symbol(change.change),
        change.address.to_string().bold()
    )];
    if change.change == ChangeType::Destroy {
        return lines;
    }

    for (key, attr) in &change.diff.attributes {
        if attr.attr_type == DiffAttrType::Output && key == "id" {
            continue;
        }
        let new = if attr.new_computed {
            "<computed>".dimmed().to_string()
        } else if attr.new_removed {
            "<removed>".dimmed().to_string()
        } else {
            format!("{:?}", attr.new)
        };
        let mut line = if attr.old.is_empty() && change.change == ChangeType::Create {
            format!("    {key}: {new}")
        } else {
            format!("    {key}: {:?} => {new}", attr.old)
        };
        if attr.requires_new {
            line.push_str(&format!(" {}", "(forces new resource)".red()));
        }
        lines.push(line);
    }
    lines
}

/// Print a plan and its summary
pub fn print_plan(plan: &Plan) {
    for change in plan.changes.values() {
        println!();
        for line in change_lines(change) {
            println!("  {line}");
        }
    }
    for (subject, cause) in &plan.errors {
        error(&format!("{subject}: {cause}"));
    }

    let summary = plan.summary();
    println!();
    if summary.has_changes() {
        println!(
            "  Plan: {} to add, {} to change, {} to replace, {} to destroy.",
            summary.additions.to_string().green(),
            summary.modifications.to_string().yellow(),
            summary.replacements.to_string().magenta(),
            summary.removals.to_string().red()
        );
    } else if !plan.has_errors() {
        success("No changes. Infrastructure matches the configuration.");
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Print final summary
pub fn print_summary(summary: &RunSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Run completed successfully!", "✓".green().bold());
    } else {
        println!("  {} Run completed with errors", "⚠".yellow().bold());
    }

    let counts = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.destroyed, "destroyed"),
        (summary.refreshed, "refreshed"),
        (summary.imported, "imported"),
        (summary.skipped, "skipped"),
        (summary.canceled, "canceled"),
    ];
    for (count, label) in counts {
        if count > 0 {
            println!("    • {count} resources {label}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print evaluated outputs
pub fn print_outputs(outputs: &BTreeMap<String, Value>) {
    if outputs.is_empty() {
        return;
    }
    section("Outputs");
    for (name, value) in outputs {
        kv(name, &value.to_string());
    }
}

/// Print one resource's recorded attributes
pub fn print_resource(address: &str, resource: &ResourceState) {
    let title = if resource.primary.tainted {
        format!("{address} (tainted)")
    } else {
        address.to_string()
    };
    header(&title);
    kv("provider", &resource.provider);
    if !resource.dependencies.is_empty() {
        let deps: Vec<_> = resource.dependencies.iter().map(ToString::to_string).collect();
        kv("depends on", &deps.join(", "));
    }
    for (key, value) in &resource.primary.attributes {
        kv(key, value);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ResourceAddress;
    use schema::{AttrDiff, InstanceDiff};

    fn planned(diff: InstanceDiff) -> PlannedChange {
        let address: ResourceAddress = "test_resource.web".parse().unwrap();
        PlannedChange::new(address, diff, None)
    }

    #[test]
    fn test_create_lines_hide_id() {
        colored::control::set_override(false);
        let diff = InstanceDiff {
            attributes: [
                ("id".to_string(), AttrDiff::computed("").output()),
                ("required".to_string(), AttrDiff::change("", "yes")),
                ("computed_map.%".to_string(), AttrDiff::computed("")),
            ]
            .into(),
            ..InstanceDiff::default()
        };
        let lines = change_lines(&planned(diff));
        assert_eq!(
            lines,
            vec![
                "+ test_resource.web".to_string(),
                "    computed_map.%: <computed>".to_string(),
                "    required: \"yes\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_replace_lines_mark_forcing_attribute() {
        colored::control::set_override(false);
        let diff = InstanceDiff {
            attributes: [(
                "optional_force_new".to_string(),
                AttrDiff::change("a", "b").requires_new(true),
            )]
            .into(),
            destroy: true,
            ..InstanceDiff::default()
        };
        let lines = change_lines(&planned(diff));
        assert_eq!(lines[0], "-/+ test_resource.web");
        assert_eq!(
            lines[1],
            "    optional_force_new: \"a\" => \"b\" (forces new resource)"
        );
    }

    #[test]
    fn test_destroy_has_single_line() {
        colored::control::set_override(false);
        assert_eq!(
            change_lines(&planned(InstanceDiff::destroy())),
            vec!["- test_resource.web".to_string()]
        );
    }
}
