use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use declarative::Operation;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declared infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "STRATA_CONFIG",
        default_value = "strata.toml"
    )]
    pub config: PathBuf,

    /// State file
    #[arg(
        long,
        global = true,
        env = "STRATA_STATE",
        default_value = "strata.state.json"
    )]
    pub state: PathBuf,

    /// Set a variable, overriding the configuration
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var, global = true)]
    pub vars: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the configuration without touching any resource
    Validate,

    /// Show the changes apply would make
    Plan(PlanArgs),

    /// Create, update and delete resources to match the configuration
    Apply(ApplyArgs),

    /// Update state from the real resources
    Refresh(WalkArgs),

    /// Destroy every managed resource
    Destroy(DestroyArgs),

    /// Adopt an existing resource into state
    Import {
        /// Declared resource address (TYPE.NAME)
        address: String,

        /// ID of the existing resource
        id: String,
    },

    /// Print the dependency graph in Graphviz format
    Graph {
        /// Operation whose graph to print
        #[arg(value_enum, default_value = "plan")]
        operation: GraphOperation,
    },

    /// Show the recorded state
    Show {
        /// Only show this resource (TYPE.NAME)
        address: Option<String>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
pub struct WalkArgs {
    /// Limit the run to a resource and what it depends on (TYPE.NAME)
    #[arg(short, long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,

    /// Number of resources worked on concurrently
    #[arg(short, long, default_value = "10")]
    pub jobs: usize,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Plan the destruction of every managed resource
    #[arg(long)]
    pub destroy: bool,

    /// Diff against recorded state without refreshing it first
    #[arg(long)]
    pub no_refresh: bool,

    /// Save the plan for a later `apply --plan`
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Apply a plan saved with `plan --out`
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Diff against recorded state without refreshing it first
    #[arg(long)]
    pub no_refresh: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphOperation {
    Validate,
    Plan,
    Apply,
    Refresh,
    Destroy,
}

impl From<GraphOperation> for Operation {
    fn from(op: GraphOperation) -> Self {
        match op {
            GraphOperation::Validate => Self::Validate,
            GraphOperation::Plan => Self::Plan,
            GraphOperation::Apply => Self::Apply,
            GraphOperation::Refresh => Self::Refresh,
            GraphOperation::Destroy => Self::Destroy,
        }
    }
}

/// Parse a `KEY=VALUE` variable override
fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("region=eu-west-1").unwrap(),
            ("region".to_string(), "eu-west-1".to_string())
        );
        assert_eq!(
            parse_var("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_var("region").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_apply_args() {
        let cli = Cli::try_parse_from([
            "strata", "apply", "-y", "-t", "test_resource.a", "--jobs", "4", "--var", "x=1",
        ])
        .unwrap();
        assert_eq!(cli.vars, vec![("x".to_string(), "1".to_string())]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.yes);
        assert_eq!(args.walk.jobs, 4);
        assert_eq!(args.walk.targets, vec!["test_resource.a".to_string()]);
    }

    #[test]
    fn test_graph_defaults_to_plan() {
        let cli = Cli::try_parse_from(["strata", "graph"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Graph {
                operation: GraphOperation::Plan
            }
        ));
        assert_eq!(Operation::from(GraphOperation::Destroy), Operation::Destroy);
    }
}
