//! Saga error types.

use common::{LocationId, OrderLineId};
use domain::{OrderError, ProductId};
use order_store::StoreError;
use thiserror::Error;

use crate::services::GatewayError;

/// One compensating action that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    /// The compensating action, e.g. `start_cancel` or `delete_rows`.
    pub action: &'static str,
    /// What the action targeted (a line or order id).
    pub target: String,
    pub reason: String,
}

impl CompensationFailure {
    pub fn new(action: &'static str, target: impl ToString, reason: impl ToString) -> Self {
        Self {
            action,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} failed: {}", self.action, self.target, self.reason)
    }
}

/// Outcome of the single compensation pass run after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Every compensating action succeeded.
    Completed,
    /// Some actions failed; remote and local state may disagree.
    Incomplete(Vec<CompensationFailure>),
}

impl Compensation {
    pub fn from_failures(failures: Vec<CompensationFailure>) -> Self {
        if failures.is_empty() {
            Compensation::Completed
        } else {
            Compensation::Incomplete(failures)
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Compensation::Completed)
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compensation::Completed => write!(f, "completed"),
            Compensation::Incomplete(failures) => {
                write!(f, "incomplete (")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Errors that can occur during order orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Order, line or referenced entity missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No location reported stock for these products. Nothing was created.
    #[error("No location can supply: {}", join_products(.0))]
    UnavailableItems(Vec<ProductId>),

    /// A location call failed.
    #[error("Location {location} unavailable: {reason}")]
    RemoteUnavailable { location: LocationId, reason: String },

    /// A storage operation failed or matched no rows.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// The order or line is in a state incompatible with the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Some remote commits happened before a later step failed.
    #[error("Partial commit: {cause}; compensation {compensation}")]
    PartialCommit {
        cause: Box<SagaError>,
        compensation: Compensation,
    },

    /// The order is cancelled locally but these lines still await
    /// confirmation from their locations.
    #[error("Cancellation pending confirmation for {} line(s)", .0.len())]
    CancelPending(Vec<OrderLineId>),
}

impl SagaError {
    /// True when remote and local state may have diverged and an operator
    /// must reconcile by hand.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self,
            SagaError::PartialCommit {
                compensation: Compensation::Incomplete(_),
                ..
            }
        )
    }

    pub(crate) fn partial(cause: SagaError, compensation: Compensation) -> Self {
        SagaError::PartialCommit {
            cause: Box::new(cause),
            compensation,
        }
    }
}

fn join_products(products: &[ProductId]) -> String {
    products
        .iter()
        .map(ProductId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<GatewayError> for SagaError {
    fn from(error: GatewayError) -> Self {
        SagaError::RemoteUnavailable {
            location: error.location(),
            reason: error.to_string(),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(error: OrderError) -> Self {
        match error {
            OrderError::InvalidStateTransition { .. } => SagaError::Conflict(error.to_string()),
            other => SagaError::InvalidRequest(other.to_string()),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderState;

    #[test]
    fn test_manual_intervention_only_for_incomplete_compensation() {
        let cause = || SagaError::Conflict("boom".to_string());

        let clean = SagaError::partial(cause(), Compensation::Completed);
        assert!(!clean.requires_manual_intervention());

        let dirty = SagaError::partial(
            cause(),
            Compensation::from_failures(vec![CompensationFailure::new(
                "start_cancel",
                "line-1",
                "timeout",
            )]),
        );
        assert!(dirty.requires_manual_intervention());
        assert!(!cause().requires_manual_intervention());
    }

    #[test]
    fn test_illegal_transition_maps_to_conflict() {
        let error: SagaError = OrderError::InvalidStateTransition {
            from: OrderState::Delivered,
            to: OrderState::Processed,
        }
        .into();
        assert!(matches!(error, SagaError::Conflict(_)));

        let error: SagaError = OrderError::NoItems.into();
        assert!(matches!(error, SagaError::InvalidRequest(_)));
    }

    #[test]
    fn test_unavailable_items_message_lists_products() {
        let error = SagaError::UnavailableItems(vec![ProductId::new("A"), ProductId::new("B")]);
        assert_eq!(error.to_string(), "No location can supply: A, B");
    }

    #[test]
    fn test_compensation_display() {
        let compensation = Compensation::from_failures(vec![
            CompensationFailure::new("start_cancel", "l1", "down"),
            CompensationFailure::new("delete_rows", "o1", "locked"),
        ]);
        assert_eq!(
            compensation.to_string(),
            "incomplete (start_cancel l1 failed: down; delete_rows o1 failed: locked)"
        );
        assert!(Compensation::from_failures(vec![]).is_complete());
    }
}
