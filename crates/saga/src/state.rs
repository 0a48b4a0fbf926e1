//! Placement saga steps.

use serde::{Deserialize, Serialize};

/// The steps of an order placement, in execution order.
///
/// ```text
/// Validate ──► ReserveRows ──► ResolveLocations ──► GroupLines ──► CommitRemote ──► Finalize
///                   │                 │                  │               │              │
///                   └─────────────────┴──────────────────┴───────► compensate ◄─────────┘
/// ```
///
/// Only `CommitRemote` and `Finalize` can leave remote holds that need
/// cancelling; earlier failures just discard local rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementStep {
    Validate,
    ReserveRows,
    ResolveLocations,
    GroupLines,
    CommitRemote,
    Finalize,
}

impl PlacementStep {
    /// Returns the step name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStep::Validate => "validate",
            PlacementStep::ReserveRows => "reserve_rows",
            PlacementStep::ResolveLocations => "resolve_locations",
            PlacementStep::GroupLines => "group_lines",
            PlacementStep::CommitRemote => "commit_remote",
            PlacementStep::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for PlacementStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
