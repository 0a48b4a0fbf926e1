//! Orchestration of multi-location orders.
//!
//! An order whose items are spread over several independently run
//! fulfillment locations is placed with a saga: local rows first, then one
//! remote commit per location, with compensating cancels when a later step
//! fails. The same crate holds the two-phase cancellation protocol, the
//! lifecycle updates reported by locations and the background loops that
//! retry unconfirmed cancels and escalate stalled lines.

pub mod cancellation;
pub mod distance;
pub mod error;
pub mod lifecycle;
pub mod placement;
pub mod reconciliation;
pub mod registry;
pub mod services;
pub mod state;

pub use cancellation::OrderCancellationProtocol;
pub use distance::{heuristic_distance, nearest};
pub use error::{Compensation, CompensationFailure, Result, SagaError};
pub use lifecycle::OrderLifecycleSystem;
pub use placement::{OrderPlacementSaga, group_into_lines};
pub use reconciliation::{DelayScan, PendingCancelRetry, RetryReport, ScanReport, ScanWindow};
pub use registry::{LocationRegistry, LocationSnapshot};
pub use services::{
    BillingService, HttpLocationDirectory, HttpLocationGateway, InMemoryBillingService,
    InMemoryLocationDirectory, InMemoryLocationGateway, InMemoryNotifier, LinePhase,
    LocationDirectory, LocationGateway, LoggingBillingService, LoggingNotifier, Notifier,
};
pub use state::PlacementStep;
