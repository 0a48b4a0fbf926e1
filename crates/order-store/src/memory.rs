use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId};
use domain::{
    Order, OrderItem, OrderLine, OrderProblem, OrderState, PendingCancel, StateThreshold,
    ThresholdKind,
};
use tokio::sync::RwLock;

use crate::store::{LineFlag, OrderStore};
use crate::{Result, StoreError};

/// Store operations that can be made to fail in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertOrder,
    UpdateOrder,
    DeleteOrder,
    InsertItems,
    UpdateItems,
    InsertLines,
    UpdateLine,
    UpdateOrderAndLines,
    EscalateLine,
    AddPendingCancel,
    RecordCancelAttempt,
    RemovePendingCancel,
}

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    lines: HashMap<OrderLineId, OrderLine>,
    items: Vec<OrderItem>,
    problems: Vec<OrderProblem>,
    delay_thresholds: HashMap<OrderState, StateThreshold>,
    expire_thresholds: HashMap<OrderState, StateThreshold>,
    pending_cancels: HashMap<OrderLineId, PendingCancel>,
    failing: HashSet<StoreOp>,
}

impl MemoryState {
    fn check(&self, op: StoreOp) -> Result<()> {
        if self.failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("{op:?} disabled")));
        }
        Ok(())
    }

    fn thresholds_mut(&mut self, kind: ThresholdKind) -> &mut HashMap<OrderState, StateThreshold> {
        match kind {
            ThresholdKind::Delay => &mut self.delay_thresholds,
            ThresholdKind::Expire => &mut self.expire_thresholds,
        }
    }

    fn checked_line(&self, line: &OrderLine) -> Result<OrderLine> {
        match self.lines.get(&line.id) {
            Some(stored) if stored.version == line.version => {
                let mut next = line.clone();
                next.version += 1;
                Ok(next)
            }
            _ => Err(StoreError::no_rows("order line", line.id)),
        }
    }

    fn checked_order(&self, order: &Order) -> Result<Order> {
        match self.orders.get(&order.id) {
            Some(stored) if stored.version == order.version => {
                let mut next = order.clone();
                next.version += 1;
                Ok(next)
            }
            _ => Err(StoreError::no_rows("order", order.id)),
        }
    }
}

/// In-memory order store for tests and for running without a database.
///
/// Mirrors the PostgreSQL implementation's semantics, including version
/// checks and zero-row failures.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `op` fail until [`Self::recover`].
    pub async fn fail_on(&self, op: StoreOp) {
        self.state.write().await.failing.insert(op);
    }

    /// Clears an injected failure.
    pub async fn recover(&self, op: StoreOp) {
        self.state.write().await.failing.remove(&op);
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn line_count(&self) -> usize {
        self.state.read().await.lines.len()
    }

    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn problem_count(&self) -> usize {
        self.state.read().await.problems.len()
    }

    /// Returns true if nothing at all is stored for orders, lines or items.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.orders.is_empty() && state.lines.is_empty() && state.items.is_empty()
    }

    /// Overwrites a line verbatim, bypassing version checks. Test setup only.
    pub async fn put_line(&self, line: OrderLine) {
        self.state.write().await.lines.insert(line.id, line);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::InsertOrder)?;
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate {
                entity: "order",
                id: order.id.to_string(),
            });
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        let mut state = self.state.write().await;
        state.check(StoreOp::UpdateOrder)?;
        let next = state.checked_order(order)?;
        state.orders.insert(next.id, next.clone());
        Ok(next)
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::DeleteOrder)?;
        if state.orders.remove(&order_id).is_none() {
            return Err(StoreError::no_rows("order", order_id));
        }
        state.lines.retain(|_, line| line.order_id != order_id);
        state.items.retain(|item| item.order_id != order_id);
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::InsertItems)?;
        if let Some(item) = items.iter().find(|i| !state.orders.contains_key(&i.order_id)) {
            return Err(StoreError::no_rows("order", item.order_id));
        }
        state.items.extend(items.iter().cloned());
        Ok(())
    }

    async fn update_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::UpdateItems)?;
        if let Some(missing) = items
            .iter()
            .find(|i| !state.items.iter().any(|stored| stored.id == i.id))
        {
            return Err(StoreError::no_rows("order item", missing.id));
        }
        for item in items {
            if let Some(stored) = state.items.iter_mut().find(|s| s.id == item.id) {
                stored.order_line_id = item.order_line_id;
                stored.state = item.state;
            }
        }
        Ok(())
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn items_for_line(&self, line_id: OrderLineId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.order_line_id == Some(line_id))
            .cloned()
            .collect())
    }

    async fn insert_lines(&self, lines: &[OrderLine]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::InsertLines)?;
        if let Some(line) = lines.iter().find(|l| !state.orders.contains_key(&l.order_id)) {
            return Err(StoreError::no_rows("order", line.order_id));
        }
        for line in lines {
            state.lines.insert(line.id, line.clone());
        }
        Ok(())
    }

    async fn get_line(&self, line_id: OrderLineId) -> Result<Option<OrderLine>> {
        Ok(self.state.read().await.lines.get(&line_id).cloned())
    }

    async fn lines_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let state = self.state.read().await;
        let mut lines: Vec<_> = state
            .lines
            .values()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.created_at, l.location_id));
        Ok(lines)
    }

    async fn update_line(&self, line: &OrderLine) -> Result<OrderLine> {
        let mut state = self.state.write().await;
        state.check(StoreOp::UpdateLine)?;
        let next = state.checked_line(line)?;
        state.lines.insert(next.id, next.clone());
        Ok(next)
    }

    async fn update_order_and_lines(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> Result<(Order, Vec<OrderLine>)> {
        let mut state = self.state.write().await;
        state.check(StoreOp::UpdateOrderAndLines)?;

        // Validate everything before touching anything.
        let next_order = state.checked_order(order)?;
        let next_lines = lines
            .iter()
            .map(|line| state.checked_line(line))
            .collect::<Result<Vec<_>>>()?;

        state.orders.insert(next_order.id, next_order.clone());
        for line in &next_lines {
            state.lines.insert(line.id, line.clone());
        }
        Ok((next_order, next_lines))
    }

    async fn stale_lines(
        &self,
        order_state: OrderState,
        updated_before: DateTime<Utc>,
        flag: LineFlag,
    ) -> Result<Vec<OrderLine>> {
        let state = self.state.read().await;
        let mut lines: Vec<_> = state
            .lines
            .values()
            .filter(|l| {
                l.state == order_state && l.last_update < updated_before && !flag.is_set(l)
            })
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.last_update);
        Ok(lines)
    }

    async fn thresholds(&self, kind: ThresholdKind) -> Result<Vec<StateThreshold>> {
        let state = self.state.read().await;
        let table = match kind {
            ThresholdKind::Delay => &state.delay_thresholds,
            ThresholdKind::Expire => &state.expire_thresholds,
        };
        let mut thresholds: Vec<_> = table.values().copied().collect();
        thresholds.sort_by_key(|t| t.state.as_str());
        Ok(thresholds)
    }

    async fn set_threshold(&self, kind: ThresholdKind, threshold: StateThreshold) -> Result<()> {
        let mut state = self.state.write().await;
        state.thresholds_mut(kind).insert(threshold.state, threshold);
        Ok(())
    }

    async fn escalate_line(&self, problem: &OrderProblem, line: &OrderLine) -> Result<OrderLine> {
        let mut state = self.state.write().await;
        state.check(StoreOp::EscalateLine)?;
        if state
            .problems
            .iter()
            .any(|p| p.order_line_id == problem.order_line_id && p.kind == problem.kind)
        {
            return Err(StoreError::Duplicate {
                entity: "order problem",
                id: format!("{}/{}", problem.order_line_id, problem.kind),
            });
        }
        let mut flagged = line.clone();
        flagged.problem = true;
        let next = state.checked_line(&flagged)?;
        state.lines.insert(next.id, next.clone());
        state.problems.push(problem.clone());
        Ok(next)
    }

    async fn problems_for_order(&self, order_id: OrderId) -> Result<Vec<OrderProblem>> {
        let state = self.state.read().await;
        Ok(state
            .problems
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn add_pending_cancel(&self, pending: &PendingCancel) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(StoreOp::AddPendingCancel)?;
        state
            .pending_cancels
            .entry(pending.line.id)
            .and_modify(|existing| existing.line = pending.line.clone())
            .or_insert_with(|| pending.clone());
        Ok(())
    }

    async fn pending_cancels(&self) -> Result<Vec<PendingCancel>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state.pending_cancels.values().cloned().collect();
        pending.sort_by_key(|p| p.recorded_at);
        Ok(pending)
    }

    async fn record_cancel_attempt(&self, line_id: OrderLineId) -> Result<u32> {
        let mut state = self.state.write().await;
        state.check(StoreOp::RecordCancelAttempt)?;
        let pending = state
            .pending_cancels
            .get_mut(&line_id)
            .ok_or_else(|| StoreError::no_rows("pending cancel", line_id))?;
        pending.attempts += 1;
        Ok(pending.attempts)
    }

    async fn remove_pending_cancel(&self, line_id: OrderLineId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check(StoreOp::RemovePendingCancel)?;
        Ok(state.pending_cancels.remove(&line_id).is_some())
    }
}
