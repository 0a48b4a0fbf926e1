//! Collaborator traits and their in-memory implementations.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod billing;
pub mod directory;
pub mod gateway;
pub mod notification;

pub use billing::{BillingError, BillingService, InMemoryBillingService, LoggingBillingService};
pub use directory::{
    DirectoryError, HttpLocationDirectory, InMemoryLocationDirectory, LocationDirectory,
};
pub use gateway::{
    GatewayError, HttpLocationGateway, InMemoryLocationGateway, LineCall, LinePhase, LineRequest,
    LocationGateway, idempotency_key,
};
pub use notification::{
    InMemoryNotifier, LoggingNotifier, NotificationError, Notifier, SentEmail,
};

// Lock helpers that recover the guard from a poisoned lock.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
