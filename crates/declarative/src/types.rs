//! Core types for planning and applying resources

use crate::error::BuildError;
use schema::ChangeType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable address of a declared resource: `TYPE.NAME`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    pub resource_type: String,
    pub name: String,
}

impl ResourceAddress {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Provider implied by the type prefix: `test_resource` belongs to `test`
    pub fn implied_provider(&self) -> &str {
        self.resource_type
            .split_once('_')
            .map_or(self.resource_type.as_str(), |(prefix, _)| prefix)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        match s.split_once('.') {
            Some((ty, name)) if valid(ty) && valid(name) && ty != "var" => Ok(Self::new(ty, name)),
            _ => Err(BuildError::InvalidAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

/// The kind of walk being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Validate,
    Plan,
    Apply,
    Refresh,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// What happened to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Replace,
    Destroy,
    Refresh,
    Import,
}

impl Action {
    /// Action performed for a diff, `None` when nothing needs to happen
    pub fn from_change(change: ChangeType) -> Option<Self> {
        match change {
            ChangeType::None => None,
            ChangeType::Create => Some(Self::Create),
            ChangeType::Update => Some(Self::Update),
            ChangeType::Destroy => Some(Self::Destroy),
            ChangeType::DestroyCreate => Some(Self::Replace),
        }
    }

    /// Verb for progress lines
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "Creating",
            Self::Update => "Updating",
            Self::Replace => "Replacing",
            Self::Destroy => "Destroying",
            Self::Refresh => "Refreshing",
            Self::Import => "Importing",
        }
    }

    /// Whether this action modified remote infrastructure
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Refresh)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Replace => "replaced",
            Self::Destroy => "destroyed",
            Self::Refresh => "refreshed",
            Self::Import => "imported",
        };
        f.write_str(name)
    }
}

/// Per-resource result of a walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceOutcome {
    /// The resource's work ran to completion
    Succeeded { action: Action },
    /// The resource's own work failed
    Failed { cause: String },
    /// Not attempted because something it depends on failed
    Skipped { dependency: String },
    /// Nothing to do
    Unchanged,
    /// Not attempted because the walk was canceled
    Canceled,
}

impl ResourceOutcome {
    /// Check if the outcome represents success (no failure of any kind)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Unchanged)
    }

    /// Check if the outcome represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Succeeded { action } if action.is_change())
    }
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { action } => write!(f, "{action}"),
            Self::Failed { cause } => write!(f, "failed: {cause}"),
            Self::Skipped { dependency } => write!(f, "skipped: {dependency} failed"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Summary of a walk's outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub destroyed: usize,
    pub refreshed: usize,
    pub imported: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub canceled: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed + self.imported
    }

    /// Check if execution was fully successful (no failures, skips or cancellation)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.canceled == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes()
            + self.refreshed
            + self.unchanged
            + self.failed
            + self.skipped
            + self.canceled
    }

    /// Add an outcome to the summary
    pub fn add(&mut self, outcome: &ResourceOutcome) {
        match outcome {
            ResourceOutcome::Succeeded { action } => match action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Replace => self.replaced += 1,
                Action::Destroy => self.destroyed += 1,
                Action::Refresh => self.refreshed += 1,
                Action::Import => self.imported += 1,
            },
            ResourceOutcome::Failed { .. } => self.failed += 1,
            ResourceOutcome::Skipped { .. } => self.skipped += 1,
            ResourceOutcome::Unchanged => self.unchanged += 1,
            ResourceOutcome::Canceled => self.canceled += 1,
        }
    }
}

/// Options for engine operations
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of resources worked on concurrently (0 = one per core)
    pub jobs: usize,
    /// Refresh existing resources before diffing them
    pub refresh: bool,
    /// Limit the walk to these resources and what they depend on
    pub targets: Vec<ResourceAddress>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 10,
            refresh: true,
            targets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let address: ResourceAddress = "test_resource.web".parse().unwrap();
        assert_eq!(address, ResourceAddress::new("test_resource", "web"));
        assert_eq!(address.to_string(), "test_resource.web");
        assert_eq!(address.implied_provider(), "test");

        assert!("test_resource".parse::<ResourceAddress>().is_err());
        assert!("var.name".parse::<ResourceAddress>().is_err());
        assert!("a.b.c".parse::<ResourceAddress>().is_err());
        assert!(".web".parse::<ResourceAddress>().is_err());
    }

    #[test]
    fn test_address_without_prefix_is_its_own_provider() {
        assert_eq!(ResourceAddress::new("null", "x").implied_provider(), "null");
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.add(&ResourceOutcome::Succeeded { action: Action::Create });
        summary.add(&ResourceOutcome::Succeeded { action: Action::Replace });
        summary.add(&ResourceOutcome::Succeeded { action: Action::Refresh });
        summary.add(&ResourceOutcome::Unchanged);
        summary.add(&ResourceOutcome::Failed { cause: "boom".into() });
        summary.add(&ResourceOutcome::Skipped { dependency: "a.b".into() });

        assert_eq!(summary.total_changes(), 2);
        assert_eq!(summary.total(), 6);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_outcome_classification() {
        assert!(ResourceOutcome::Unchanged.is_success());
        assert!(!ResourceOutcome::Unchanged.is_change());
        assert!(ResourceOutcome::Succeeded { action: Action::Update }.is_change());
        assert!(!ResourceOutcome::Succeeded { action: Action::Refresh }.is_change());
        assert!(!ResourceOutcome::Canceled.is_success());
    }

    #[test]
    fn test_action_from_change() {
        assert_eq!(Action::from_change(ChangeType::None), None);
        assert_eq!(Action::from_change(ChangeType::DestroyCreate), Some(Action::Replace));
    }
}
