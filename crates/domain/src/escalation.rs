//! Delay/expiry thresholds and the records produced when lines stall.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, OrderLineId, ProblemId};
use serde::{Deserialize, Serialize};

use crate::order::{OrderLine, OrderState};

/// Which threshold table a [`StateThreshold`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdKind {
    /// Past this, the line is flagged `delayed`.
    Delay,
    /// Past this, an [`OrderProblem`] is opened.
    Expire,
}

/// How long a line may sit in `state` before it is considered stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateThreshold {
    pub state: OrderState,
    pub after: Duration,
}

impl StateThreshold {
    pub fn new(state: OrderState, after: Duration) -> Self {
        Self { state, after }
    }

    /// Lines last updated strictly before this instant exceed the threshold.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.after
    }
}

/// Why support was engaged for a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    /// The line sat in one state past its expiry threshold.
    Expired,
}

impl ProblemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProblemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Expired" => Ok(ProblemKind::Expired),
            other => Err(format!("unknown problem kind: {other}")),
        }
    }
}

/// Escalation record. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProblem {
    pub id: ProblemId,
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub kind: ProblemKind,
    /// State the line was in when the problem was opened.
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
}

impl OrderProblem {
    pub fn for_line(line: &OrderLine, kind: ProblemKind, now: DateTime<Utc>) -> Self {
        Self {
            id: ProblemId::new(),
            order_id: line.order_id,
            order_line_id: line.id,
            kind,
            state: line.state,
            created_at: now,
        }
    }
}

/// A line whose confirm-cancel has not yet been accepted by its location.
///
/// Holds a snapshot of the line so the retry loop can address the location
/// even after the order's own rows are gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCancel {
    pub line: OrderLine,
    pub recorded_at: DateTime<Utc>,
    pub attempts: u32,
}

impl PendingCancel {
    pub fn new(line: OrderLine, now: DateTime<Utc>) -> Self {
        Self {
            line,
            recorded_at: now,
            attempts: 0,
        }
    }
}
