//! Plans - the changes a walk computed but has not carried out

use crate::types::{Operation, ResourceAddress};
use schema::{ChangeType, InstanceDiff, InstanceState, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Planned change of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub address: ResourceAddress,
    pub change: ChangeType,
    pub diff: InstanceDiff,
    /// State the diff was computed against
    pub prior: Option<InstanceState>,
}

impl PlannedChange {
    pub fn new(address: ResourceAddress, diff: InstanceDiff, prior: Option<InstanceState>) -> Self {
        Self {
            address,
            change: diff.change_type(),
            diff,
            prior,
        }
    }
}

/// Result of a plan or destroy-plan walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// `Plan` for convergence, `Destroy` for a full teardown
    pub operation: Operation,
    pub changes: BTreeMap<ResourceAddress, PlannedChange>,
    /// Resources whose planning failed, with the cause
    pub errors: BTreeMap<String, String>,
    /// Outputs as far as they are known before apply
    pub outputs: BTreeMap<String, Value>,
}

impl Plan {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            changes: BTreeMap::new(),
            errors: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Check if the plan changes nothing
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn change(&self, address: &ResourceAddress) -> Option<&PlannedChange> {
        self.changes.get(address)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_changes(self.changes.values())
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of resources to create
    pub additions: usize,
    /// Number of resources to update in place
    pub modifications: usize,
    /// Number of resources to destroy and recreate
    pub replacements: usize,
    /// Number of resources to destroy
    pub removals: usize,
}

impl DiffSummary {
    /// Create a summary from planned changes
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a PlannedChange>) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change {
                ChangeType::Create => summary.additions += 1,
                ChangeType::Update => summary.modifications += 1,
                ChangeType::DestroyCreate => summary.replacements += 1,
                ChangeType::Destroy => summary.removals += 1,
                ChangeType::None => {}
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.modifications + self.replacements + self.removals
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::AttrDiff;

    fn change(name: &str, diff: InstanceDiff) -> PlannedChange {
        PlannedChange::new(ResourceAddress::new("test_server", name), diff, None)
    }

    #[test]
    fn test_summary_by_change_type() {
        let create = InstanceDiff {
            attributes: [("id".to_string(), AttrDiff::computed("").output())].into(),
            ..InstanceDiff::default()
        };
        let update = InstanceDiff {
            attributes: [("name".to_string(), AttrDiff::change("a", "b"))].into(),
            ..InstanceDiff::default()
        };
        let replace = InstanceDiff {
            attributes: [("size".to_string(), AttrDiff::change("C1", "C2").requires_new(true))]
                .into(),
            destroy: true,
            ..InstanceDiff::default()
        };

        let mut plan = Plan::new(Operation::Plan);
        for (name, diff) in [
            ("a", create),
            ("b", update),
            ("c", replace),
            ("d", InstanceDiff::destroy()),
        ] {
            let planned = change(name, diff);
            plan.changes.insert(planned.address.clone(), planned);
        }

        let summary = plan.summary();
        assert_eq!(
            summary,
            DiffSummary {
                additions: 1,
                modifications: 1,
                replacements: 1,
                removals: 1,
            }
        );
        assert_eq!(summary.total(), 4);
        assert!(!plan.is_empty());
        assert!(!plan.has_errors());
    }

    #[test]
    fn test_empty_plan() {
        let plan = Plan::new(Operation::Destroy);
        assert!(plan.is_empty());
        assert!(!plan.summary().has_changes());
    }
}
