use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{CustomerId, LocationId, OrderId, OrderItemId, OrderLineId, ProblemId};
use domain::{
    Money, Order, OrderError, OrderItem, OrderLine, OrderProblem, OrderState, PendingCancel,
    ProblemKind, ProductId, StateThreshold, ThresholdKind,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::store::{LineFlag, OrderStore};
use crate::{Result, StoreError};

const ORDER_COLUMNS: &str = "id, customer_id, customer_email, shipping_address, billing_address, \
     order_date, last_update, total_price_cents, total_quantity, state, delayed, problem, version";

const LINE_COLUMNS: &str =
    "id, order_id, location_id, created_at, last_update, state, delayed, problem, version";

const ITEM_COLUMNS: &str =
    "id, order_id, order_line_id, product_id, product_name, quantity, unit_price_cents, state";

const PROBLEM_COLUMNS: &str = "id, order_id, order_line_id, kind, state, created_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let state: String = row.try_get("state")?;
        let shipping: serde_json::Value = row.try_get("shipping_address")?;
        let billing: serde_json::Value = row.try_get("billing_address")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            customer_email: row.try_get("customer_email")?,
            shipping_address: serde_json::from_value(shipping)?,
            billing_address: serde_json::from_value(billing)?,
            order_date: row.try_get("order_date")?,
            last_update: row.try_get("last_update")?,
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            total_quantity: quantity_from_db("orders", row.try_get("total_quantity")?)?,
            state: parse_state("orders", &state)?,
            delayed: row.try_get("delayed")?,
            problem: row.try_get("problem")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_line(row: PgRow) -> Result<OrderLine> {
        let state: String = row.try_get("state")?;

        Ok(OrderLine {
            id: OrderLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            location_id: LocationId::new(row.try_get("location_id")?),
            created_at: row.try_get("created_at")?,
            last_update: row.try_get("last_update")?,
            state: parse_state("order_lines", &state)?,
            delayed: row.try_get("delayed")?,
            problem: row.try_get("problem")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let state: String = row.try_get("state")?;
        let line_id: Option<Uuid> = row.try_get("order_line_id")?;

        Ok(OrderItem {
            id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            order_line_id: line_id.map(OrderLineId::from_uuid),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: quantity_from_db("order_items", row.try_get("quantity")?)?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            state: parse_state("order_items", &state)?,
        })
    }

    fn row_to_problem(row: PgRow) -> Result<OrderProblem> {
        let kind: String = row.try_get("kind")?;
        let state: String = row.try_get("state")?;

        Ok(OrderProblem {
            id: ProblemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            order_line_id: OrderLineId::from_uuid(row.try_get::<Uuid, _>("order_line_id")?),
            kind: kind
                .parse::<ProblemKind>()
                .map_err(|reason| StoreError::Corrupt {
                    table: "order_problems",
                    reason,
                })?,
            state: parse_state("order_problems", &state)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_pending(row: PgRow) -> Result<PendingCancel> {
        let line: serde_json::Value = row.try_get("line")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(PendingCancel {
            line: serde_json::from_value(line)?,
            recorded_at: row.try_get("recorded_at")?,
            attempts: u32::try_from(attempts).map_err(|_| StoreError::Corrupt {
                table: "pending_cancels",
                reason: format!("negative attempt count {attempts}"),
            })?,
        })
    }

    async fn update_order_in(
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<Order> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET state = $2, delayed = $3, problem = $4, last_update = $5, version = version + 1
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.state.as_str())
        .bind(order.delayed)
        .bind(order.problem)
        .bind(order.last_update)
        .bind(order.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::no_rows("order", order.id));
        }
        let mut next = order.clone();
        next.version += 1;
        Ok(next)
    }

    async fn update_line_in(
        tx: &mut Transaction<'_, Postgres>,
        line: &OrderLine,
    ) -> Result<OrderLine> {
        let result = sqlx::query(
            r#"
            UPDATE order_lines
            SET state = $2, delayed = $3, problem = $4, last_update = $5, version = version + 1
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.state.as_str())
        .bind(line.delayed)
        .bind(line.problem)
        .bind(line.last_update)
        .bind(line.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::no_rows("order line", line.id));
        }
        let mut next = line.clone();
        next.version += 1;
        Ok(next)
    }
}

fn parse_state(table: &'static str, raw: &str) -> Result<OrderState> {
    raw.parse()
        .map_err(|e: OrderError| StoreError::Corrupt {
            table,
            reason: e.to_string(),
        })
}

fn quantity_from_db(table: &'static str, raw: i32) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("negative quantity {raw}"),
    })
}

fn quantity_to_db(entity: &'static str, quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::Corrupt {
        table: entity,
        reason: format!("quantity {quantity} out of range"),
    })
}

fn threshold_table(kind: ThresholdKind) -> &'static str {
    match kind {
        ThresholdKind::Delay => "order_state_delay_times",
        ThresholdKind::Expire => "order_state_expire_times",
    }
}

fn flag_column(flag: LineFlag) -> &'static str {
    match flag {
        LineFlag::Delayed => "delayed",
        LineFlag::Problem => "problem",
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(&order.customer_email)
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(serde_json::to_value(&order.billing_address)?)
        .bind(order.order_date)
        .bind(order.last_update)
        .bind(order.total_price.cents())
        .bind(quantity_to_db("orders", order.total_quantity)?)
        .bind(order.state.as_str())
        .bind(order.delayed)
        .bind(order.problem)
        .bind(order.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Duplicate {
                    entity: "order",
                    id: order.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let next = Self::update_order_in(&mut tx, order).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        // Lines and items go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::no_rows("order", order_id));
        }
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(&format!(
                "INSERT INTO order_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.order_line_id.map(|id| id.as_uuid()))
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(quantity_to_db("order_items", item.quantity)?)
            .bind(item.unit_price.cents())
            .bind(item.state.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            let result =
                sqlx::query("UPDATE order_items SET order_line_id = $2, state = $3 WHERE id = $1")
                    .bind(item.id.as_uuid())
                    .bind(item.order_line_id.map(|id| id.as_uuid()))
                    .bind(item.state.as_str())
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::no_rows("order item", item.id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY product_id"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn items_for_line(&self, line_id: OrderLineId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_line_id = $1 ORDER BY product_id"
        ))
        .bind(line_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn insert_lines(&self, lines: &[OrderLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for line in lines {
            sqlx::query(&format!(
                "INSERT INTO order_lines ({LINE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
            ))
            .bind(line.id.as_uuid())
            .bind(line.order_id.as_uuid())
            .bind(line.location_id.as_i64())
            .bind(line.created_at)
            .bind(line.last_update)
            .bind(line.state.as_str())
            .bind(line.delayed)
            .bind(line.problem)
            .bind(line.version)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_line(&self, line_id: OrderLineId) -> Result<Option<OrderLine>> {
        let row = sqlx::query(&format!("SELECT {LINE_COLUMNS} FROM order_lines WHERE id = $1"))
            .bind(line_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_line).transpose()
    }

    async fn lines_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 \
             ORDER BY created_at, location_id"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_line).collect()
    }

    async fn update_line(&self, line: &OrderLine) -> Result<OrderLine> {
        let mut tx = self.pool.begin().await?;
        let next = Self::update_line_in(&mut tx, line).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn update_order_and_lines(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> Result<(Order, Vec<OrderLine>)> {
        let mut tx = self.pool.begin().await?;
        let next_order = Self::update_order_in(&mut tx, order).await?;
        let mut next_lines = Vec::with_capacity(lines.len());
        for line in lines {
            next_lines.push(Self::update_line_in(&mut tx, line).await?);
        }
        tx.commit().await?;
        Ok((next_order, next_lines))
    }

    async fn stale_lines(
        &self,
        state: OrderState,
        updated_before: DateTime<Utc>,
        flag: LineFlag,
    ) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines \
             WHERE state = $1 AND last_update < $2 AND NOT {} \
             ORDER BY last_update",
            flag_column(flag)
        ))
        .bind(state.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_line).collect()
    }

    async fn thresholds(&self, kind: ThresholdKind) -> Result<Vec<StateThreshold>> {
        let table = threshold_table(kind);
        let rows = sqlx::query(&format!("SELECT state, seconds FROM {table} ORDER BY state"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                let seconds: i64 = row.try_get("seconds")?;
                Ok(StateThreshold::new(
                    parse_state(table, &state)?,
                    Duration::seconds(seconds),
                ))
            })
            .collect()
    }

    async fn set_threshold(&self, kind: ThresholdKind, threshold: StateThreshold) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (state, seconds) VALUES ($1, $2) \
             ON CONFLICT (state) DO UPDATE SET seconds = EXCLUDED.seconds",
            threshold_table(kind)
        ))
        .bind(threshold.state.as_str())
        .bind(threshold.after.num_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn escalate_line(&self, problem: &OrderProblem, line: &OrderLine) -> Result<OrderLine> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO order_problems ({PROBLEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(problem.id.as_uuid())
        .bind(problem.order_id.as_uuid())
        .bind(problem.order_line_id.as_uuid())
        .bind(problem.kind.as_str())
        .bind(problem.state.as_str())
        .bind(problem.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_problem_per_line_kind")
            {
                return StoreError::Duplicate {
                    entity: "order problem",
                    id: format!("{}/{}", problem.order_line_id, problem.kind),
                };
            }
            StoreError::Database(e)
        })?;

        let mut flagged = line.clone();
        flagged.problem = true;
        let next = Self::update_line_in(&mut tx, &flagged).await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn problems_for_order(&self, order_id: OrderId) -> Result<Vec<OrderProblem>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROBLEM_COLUMNS} FROM order_problems WHERE order_id = $1 ORDER BY created_at"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_problem).collect()
    }

    async fn add_pending_cancel(&self, pending: &PendingCancel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_cancels (order_line_id, line, recorded_at, attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_line_id) DO UPDATE SET line = EXCLUDED.line
            "#,
        )
        .bind(pending.line.id.as_uuid())
        .bind(serde_json::to_value(&pending.line)?)
        .bind(pending.recorded_at)
        .bind(i32::try_from(pending.attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_cancels(&self) -> Result<Vec<PendingCancel>> {
        let rows = sqlx::query(
            "SELECT line, recorded_at, attempts FROM pending_cancels ORDER BY recorded_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_pending).collect()
    }

    async fn record_cancel_attempt(&self, line_id: OrderLineId) -> Result<u32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE pending_cancels SET attempts = attempts + 1 \
             WHERE order_line_id = $1 RETURNING attempts",
        )
        .bind(line_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let attempts = attempts.ok_or_else(|| StoreError::no_rows("pending cancel", line_id))?;
        u32::try_from(attempts).map_err(|_| StoreError::Corrupt {
            table: "pending_cancels",
            reason: format!("negative attempt count {attempts}"),
        })
    }

    async fn remove_pending_cancel(&self, line_id: OrderLineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_cancels WHERE order_line_id = $1")
            .bind(line_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
