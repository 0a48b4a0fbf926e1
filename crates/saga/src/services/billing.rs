//! Billing trait and implementations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use thiserror::Error;

use super::{read, write};

#[derive(Debug, Error)]
#[error("billing failed: {0}")]
pub struct BillingError(pub String);

/// Invoice and bill generation, triggered by order-level state changes.
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Creates and sends the invoice once the whole order ships.
    async fn create_invoice(&self, order: &Order) -> Result<(), BillingError>;

    /// Creates and sends the bill once the whole order is delivered.
    async fn create_bill(&self, order: &Order) -> Result<(), BillingError>;
}

/// Billing service that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBillingService;

#[async_trait]
impl BillingService for LoggingBillingService {
    async fn create_invoice(&self, order: &Order) -> Result<(), BillingError> {
        tracing::info!(order_id = %order.id, total = %order.total_price, "invoice created");
        Ok(())
    }

    async fn create_bill(&self, order: &Order) -> Result<(), BillingError> {
        tracing::info!(order_id = %order.id, total = %order.total_price, "bill created");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryBillingState {
    invoices: Vec<OrderId>,
    bills: Vec<OrderId>,
    fail: bool,
}

/// In-memory billing service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBillingService {
    state: Arc<RwLock<InMemoryBillingState>>,
}

impl InMemoryBillingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        write(&self.state).fail = fail;
    }

    pub fn invoices(&self) -> Vec<OrderId> {
        read(&self.state).invoices.clone()
    }

    pub fn bills(&self) -> Vec<OrderId> {
        read(&self.state).bills.clone()
    }
}

#[async_trait]
impl BillingService for InMemoryBillingService {
    async fn create_invoice(&self, order: &Order) -> Result<(), BillingError> {
        let mut state = write(&self.state);
        if state.fail {
            return Err(BillingError("invoicing unavailable".to_string()));
        }
        state.invoices.push(order.id);
        Ok(())
    }

    async fn create_bill(&self, order: &Order) -> Result<(), BillingError> {
        let mut state = write(&self.state);
        if state.fail {
            return Err(BillingError("billing unavailable".to_string()));
        }
        state.bills.push(order.id);
        Ok(())
    }
}
