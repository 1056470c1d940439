//! PostgreSQL store
//!
//! Each composite commit runs in one transaction. The trade row is locked
//! with `SELECT ... FOR UPDATE` and written back with a version check;
//! voucher exclusivity relies on a conditional `UPDATE` touching every
//! requested row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    AllocationMode, DeliveryBatch, InventoryFilter, Invoice, InvoiceKind, InvoicePeriod,
    InvoiceRef, PaymentTerms, PeriodKey, PeriodStatus, ScheduleType, Trade, TradeStatus, Voucher,
    VoucherAllocation,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    trade_resource, FulfillmentStore, InventoryQuery, InvoiceDestination, StoreError, StoreResult,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TRADE_COLUMNS: &str = "id, reference, buyer_id, supplier_id, hub_id, grain_type_id, grade, \
     ordered_quantity_kg, price_per_kg, payment_schedule, payment_days, requires_financing, \
     financing_complete, requires_voucher_allocation, allocation_complete, status, version, \
     created_at, updated_at";

const BATCH_COLUMNS: &str = "id, trade_id, grn_number, gross_weight_kg, tare_weight_kg, \
     net_weight_kg, value, loading_date, delivery_date, vehicle_number, driver_name, \
     dispatched_by, received_by, received_at, invoice_ref_kind, invoice_ref_id, created_at";

const VOUCHER_COLUMNS: &str =
    "id, voucher_number, hub_id, grain_type_id, grade, quantity_kg, deposit_date, allocated_to";

const PERIOD_COLUMNS: &str = "id, customer_id, schedule, boundary, status, due_days, batch_ids, \
     amount, invoice_id, opened_at, closed_at";

const INVOICE_COLUMNS: &str = "id, customer_id, kind, period_id, batch_ids, issue_date, due_date, \
     total_amount, amount_due, issued_at";

// ============================================================================
// Row mapping
// ============================================================================

#[derive(Debug, FromRow)]
struct TradeRow {
    id: Uuid,
    reference: String,
    buyer_id: Uuid,
    supplier_id: Uuid,
    hub_id: Uuid,
    grain_type_id: Uuid,
    grade: String,
    ordered_quantity_kg: Decimal,
    price_per_kg: Decimal,
    payment_schedule: String,
    payment_days: i32,
    requires_financing: bool,
    financing_complete: bool,
    requires_voucher_allocation: bool,
    allocation_complete: bool,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unknown {} '{}'", what, value))
}

fn schedule_from(s: &str) -> StoreResult<ScheduleType> {
    ScheduleType::from_str(s).ok_or_else(|| corrupt("schedule", s))
}

fn days_to_db(days: u32) -> StoreResult<i32> {
    i32::try_from(days).map_err(|_| StoreError::Corrupt(format!("day count {} out of range", days)))
}

fn days_from_db(days: i32) -> StoreResult<u32> {
    u32::try_from(days).map_err(|_| StoreError::Corrupt(format!("day count {} out of range", days)))
}

impl TryFrom<TradeRow> for Trade {
    type Error = StoreError;

    fn try_from(row: TradeRow) -> StoreResult<Self> {
        Ok(Trade {
            id: row.id,
            reference: row.reference,
            buyer_id: row.buyer_id,
            supplier_id: row.supplier_id,
            hub_id: row.hub_id,
            grain_type_id: row.grain_type_id,
            grade: row.grade,
            ordered_quantity_kg: row.ordered_quantity_kg,
            price_per_kg: row.price_per_kg,
            payment_terms: PaymentTerms::new(
                schedule_from(&row.payment_schedule)?,
                days_from_db(row.payment_days)?,
            ),
            requires_financing: row.requires_financing,
            financing_complete: row.financing_complete,
            requires_voucher_allocation: row.requires_voucher_allocation,
            allocation_complete: row.allocation_complete,
            status: TradeStatus::from_str(&row.status).ok_or_else(|| corrupt("status", &row.status))?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    trade_id: Uuid,
    grn_number: String,
    gross_weight_kg: Decimal,
    tare_weight_kg: Decimal,
    net_weight_kg: Decimal,
    value: Decimal,
    loading_date: NaiveDate,
    delivery_date: NaiveDate,
    vehicle_number: String,
    driver_name: String,
    dispatched_by: String,
    received_by: String,
    received_at: Option<DateTime<Utc>>,
    invoice_ref_kind: String,
    invoice_ref_id: Uuid,
    created_at: DateTime<Utc>,
}

fn invoice_ref_parts(invoice_ref: &InvoiceRef) -> (&'static str, Uuid) {
    match invoice_ref {
        InvoiceRef::Invoice(id) => ("invoice", *id),
        InvoiceRef::Period(id) => ("period", *id),
    }
}

impl TryFrom<BatchRow> for DeliveryBatch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> StoreResult<Self> {
        let invoice_ref = match row.invoice_ref_kind.as_str() {
            "invoice" => InvoiceRef::Invoice(row.invoice_ref_id),
            "period" => InvoiceRef::Period(row.invoice_ref_id),
            other => return Err(corrupt("invoice reference kind", other)),
        };
        Ok(DeliveryBatch {
            id: row.id,
            trade_id: row.trade_id,
            grn_number: row.grn_number,
            gross_weight_kg: row.gross_weight_kg,
            tare_weight_kg: row.tare_weight_kg,
            net_weight_kg: row.net_weight_kg,
            value: row.value,
            loading_date: row.loading_date,
            delivery_date: row.delivery_date,
            vehicle_number: row.vehicle_number,
            driver_name: row.driver_name,
            dispatched_by: row.dispatched_by,
            received_by: row.received_by,
            received_at: row.received_at,
            invoice_ref,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct VoucherRow {
    id: Uuid,
    voucher_number: String,
    hub_id: Uuid,
    grain_type_id: Uuid,
    grade: String,
    quantity_kg: Decimal,
    deposit_date: NaiveDate,
    allocated_to: Option<Uuid>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            id: row.id,
            voucher_number: row.voucher_number,
            hub_id: row.hub_id,
            grain_type_id: row.grain_type_id,
            grade: row.grade,
            quantity_kg: row.quantity_kg,
            deposit_date: row.deposit_date,
            allocated_to: row.allocated_to,
        }
    }
}

#[derive(Debug, FromRow)]
struct AllocationRow {
    trade_id: Uuid,
    mode: String,
    voucher_ids: Vec<Uuid>,
    total_allocated_kg: Decimal,
    allocated_at: DateTime<Utc>,
}

impl TryFrom<AllocationRow> for VoucherAllocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> StoreResult<Self> {
        Ok(VoucherAllocation {
            trade_id: row.trade_id,
            mode: AllocationMode::from_str(&row.mode).ok_or_else(|| corrupt("mode", &row.mode))?,
            voucher_ids: row.voucher_ids,
            total_allocated_kg: row.total_allocated_kg,
            allocated_at: row.allocated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PeriodRow {
    id: Uuid,
    customer_id: Uuid,
    schedule: String,
    boundary: NaiveDate,
    status: String,
    due_days: i32,
    batch_ids: Vec<Uuid>,
    amount: Decimal,
    invoice_id: Option<Uuid>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PeriodRow> for InvoicePeriod {
    type Error = StoreError;

    fn try_from(row: PeriodRow) -> StoreResult<Self> {
        Ok(InvoicePeriod {
            id: row.id,
            key: PeriodKey {
                customer_id: row.customer_id,
                schedule: schedule_from(&row.schedule)?,
                boundary: row.boundary,
            },
            status: PeriodStatus::from_str(&row.status)
                .ok_or_else(|| corrupt("period status", &row.status))?,
            due_days: days_from_db(row.due_days)?,
            batch_ids: row.batch_ids,
            amount: row.amount,
            invoice_id: row.invoice_id,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    customer_id: Uuid,
    kind: String,
    period_id: Option<Uuid>,
    batch_ids: Vec<Uuid>,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    total_amount: Decimal,
    amount_due: Decimal,
    issued_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(row: InvoiceRow) -> StoreResult<Self> {
        Ok(Invoice {
            id: row.id,
            customer_id: row.customer_id,
            kind: InvoiceKind::from_str(&row.kind).ok_or_else(|| corrupt("invoice kind", &row.kind))?,
            period_id: row.period_id,
            batch_ids: row.batch_ids,
            issue_date: row.issue_date,
            due_date: row.due_date,
            total_amount: row.total_amount,
            amount_due: row.amount_due,
            issued_at: row.issued_at,
        })
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

const TRADE_REFERENCE_CONSTRAINT: &str = "trades_reference_key";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    is_unique_violation(err)
        && err
            .as_database_error()
            .and_then(|db| db.constraint())
            .is_some_and(|name| name == constraint)
}

/// Lock the trade row and check the caller's version
async fn lock_trade(conn: &mut PgConnection, trade_id: Uuid, expected_version: i64) -> StoreResult<()> {
    let version = sqlx::query_scalar::<_, i64>("SELECT version FROM trades WHERE id = $1 FOR UPDATE")
        .bind(trade_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(trade_resource(trade_id)))?;

    if version != expected_version {
        return Err(StoreError::Conflict(trade_resource(trade_id)));
    }
    Ok(())
}

async fn write_trade(conn: &mut PgConnection, trade: &Trade, expected_version: i64) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE trades
        SET ordered_quantity_kg = $1, price_per_kg = $2, payment_schedule = $3, payment_days = $4,
            requires_financing = $5, financing_complete = $6, requires_voucher_allocation = $7,
            allocation_complete = $8, status = $9, version = $10, updated_at = $11
        WHERE id = $12 AND version = $13
        "#,
    )
    .bind(trade.ordered_quantity_kg)
    .bind(trade.price_per_kg)
    .bind(trade.payment_terms.schedule.as_str())
    .bind(days_to_db(trade.payment_terms.days)?)
    .bind(trade.requires_financing)
    .bind(trade.financing_complete)
    .bind(trade.requires_voucher_allocation)
    .bind(trade.allocation_complete)
    .bind(trade.status.as_str())
    .bind(trade.version)
    .bind(trade.updated_at)
    .bind(trade.id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(trade_resource(trade.id)));
    }
    Ok(())
}

async fn insert_invoice(conn: &mut PgConnection, invoice: &Invoice) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoices (id, customer_id, kind, period_id, batch_ids, issue_date, due_date,
                              total_amount, amount_due, issued_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(invoice.id)
    .bind(invoice.customer_id)
    .bind(invoice.kind.as_str())
    .bind(invoice.period_id)
    .bind(invoice.batch_ids.clone())
    .bind(invoice.issue_date)
    .bind(invoice.due_date)
    .bind(invoice.total_amount)
    .bind(invoice.amount_due)
    .bind(invoice.issued_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_period(conn: &mut PgConnection, period: &InvoicePeriod) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoice_periods (id, customer_id, schedule, boundary, status, due_days,
                                     batch_ids, amount, invoice_id, opened_at, closed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(period.id)
    .bind(period.key.customer_id)
    .bind(period.key.schedule.as_str())
    .bind(period.key.boundary)
    .bind(period.status.as_str())
    .bind(days_to_db(period.due_days)?)
    .bind(period.batch_ids.clone())
    .bind(period.amount)
    .bind(period.invoice_id)
    .bind(period.opened_at)
    .bind(period.closed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict(format!("invoice period {}", period.key))
        } else {
            StoreError::Database(e)
        }
    })?;
    Ok(())
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl FulfillmentStore for PgStore {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO trades ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19)",
            TRADE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(trade.id)
            .bind(&trade.reference)
            .bind(trade.buyer_id)
            .bind(trade.supplier_id)
            .bind(trade.hub_id)
            .bind(trade.grain_type_id)
            .bind(&trade.grade)
            .bind(trade.ordered_quantity_kg)
            .bind(trade.price_per_kg)
            .bind(trade.payment_terms.schedule.as_str())
            .bind(days_to_db(trade.payment_terms.days)?)
            .bind(trade.requires_financing)
            .bind(trade.financing_complete)
            .bind(trade.requires_voucher_allocation)
            .bind(trade.allocation_complete)
            .bind(trade.status.as_str())
            .bind(trade.version)
            .bind(trade.created_at)
            .bind(trade.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if violates_constraint(&e, TRADE_REFERENCE_CONSTRAINT) {
                    StoreError::Duplicate {
                        field: "reference",
                        value: trade.reference.clone(),
                    }
                } else if is_unique_violation(&e) {
                    StoreError::Conflict(trade_resource(trade.id))
                } else {
                    StoreError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn get_trade(&self, trade_id: Uuid) -> StoreResult<Option<Trade>> {
        let sql = format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS);
        sqlx::query_as::<_, TradeRow>(&sql)
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Trade::try_from)
            .transpose()
    }

    async fn update_trade(&self, trade: &Trade, expected_version: i64) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        write_trade(&mut conn, trade, expected_version).await
    }

    async fn list_batches(&self, trade_id: Uuid) -> StoreResult<Vec<DeliveryBatch>> {
        let sql = format!(
            "SELECT {} FROM delivery_batches WHERE trade_id = $1 ORDER BY created_at, id",
            BATCH_COLUMNS
        );
        sqlx::query_as::<_, BatchRow>(&sql)
            .bind(trade_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(DeliveryBatch::try_from)
            .collect()
    }

    async fn get_allocation(&self, trade_id: Uuid) -> StoreResult<Option<VoucherAllocation>> {
        sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT trade_id, mode, voucher_ids, total_allocated_kg, allocated_at
            FROM voucher_allocations
            WHERE trade_id = $1
            "#,
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?
        .map(VoucherAllocation::try_from)
        .transpose()
    }

    async fn get_vouchers(&self, voucher_ids: &[Uuid]) -> StoreResult<Vec<Voucher>> {
        let sql = format!("SELECT {} FROM vouchers WHERE id = ANY($1)", VOUCHER_COLUMNS);
        let rows = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(voucher_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Voucher::from).collect())
    }

    async fn latest_period(&self, key: &PeriodKey) -> StoreResult<Option<InvoicePeriod>> {
        let sql = format!(
            "SELECT {} FROM invoice_periods \
             WHERE customer_id = $1 AND schedule = $2 AND boundary = $3 \
             ORDER BY (status = 'open') DESC, opened_at DESC LIMIT 1",
            PERIOD_COLUMNS
        );
        sqlx::query_as::<_, PeriodRow>(&sql)
            .bind(key.customer_id)
            .bind(key.schedule.as_str())
            .bind(key.boundary)
            .fetch_optional(&self.pool)
            .await?
            .map(InvoicePeriod::try_from)
            .transpose()
    }

    async fn get_period(&self, period_id: Uuid) -> StoreResult<Option<InvoicePeriod>> {
        let sql = format!("SELECT {} FROM invoice_periods WHERE id = $1", PERIOD_COLUMNS);
        sqlx::query_as::<_, PeriodRow>(&sql)
            .bind(period_id)
            .fetch_optional(&self.pool)
            .await?
            .map(InvoicePeriod::try_from)
            .transpose()
    }

    async fn list_due_periods(&self, before: NaiveDate) -> StoreResult<Vec<InvoicePeriod>> {
        let sql = format!(
            "SELECT {} FROM invoice_periods WHERE status = 'open' AND boundary < $1 \
             ORDER BY boundary, opened_at",
            PERIOD_COLUMNS
        );
        sqlx::query_as::<_, PeriodRow>(&sql)
            .bind(before)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(InvoicePeriod::try_from)
            .collect()
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        let sql = format!("SELECT {} FROM invoices WHERE id = $1", INVOICE_COLUMNS);
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Invoice::try_from)
            .transpose()
    }

    async fn update_invoice_amount_due(
        &self,
        invoice_id: Uuid,
        expected_due: Decimal,
        new_due: Decimal,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE invoices SET amount_due = $1 WHERE id = $2 AND amount_due = $3")
            .bind(new_due)
            .bind(invoice_id)
            .bind(expected_due)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("invoice {}", invoice_id)));
        }
        Ok(())
    }

    async fn commit_allocation(
        &self,
        trade: &Trade,
        expected_version: i64,
        allocation: &VoucherAllocation,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_trade(&mut tx, trade.id, expected_version).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE vouchers
            SET allocated_to = $1
            WHERE id = ANY($2) AND (allocated_to IS NULL OR allocated_to = $1)
            "#,
        )
        .bind(trade.id)
        .bind(allocation.voucher_ids.clone())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() != allocation.voucher_ids.len() as u64 {
            return Err(StoreError::Conflict(format!(
                "vouchers for {}",
                trade_resource(trade.id)
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO voucher_allocations (trade_id, mode, voucher_ids, total_allocated_kg, allocated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (trade_id) DO UPDATE
            SET mode = EXCLUDED.mode, voucher_ids = EXCLUDED.voucher_ids,
                total_allocated_kg = EXCLUDED.total_allocated_kg, allocated_at = EXCLUDED.allocated_at
            "#,
        )
        .bind(allocation.trade_id)
        .bind(allocation.mode.as_str())
        .bind(allocation.voucher_ids.clone())
        .bind(allocation.total_allocated_kg)
        .bind(allocation.allocated_at)
        .execute(&mut *tx)
        .await?;

        write_trade(&mut tx, trade, expected_version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_delivery(
        &self,
        trade: &Trade,
        expected_version: i64,
        batch: &DeliveryBatch,
        destination: &InvoiceDestination,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_trade(&mut tx, trade.id, expected_version).await?;

        let delivered = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(net_weight_kg), 0) FROM delivery_batches WHERE trade_id = $1",
        )
        .bind(trade.id)
        .fetch_one(&mut *tx)
        .await?;

        let total = delivered.checked_add(batch.net_weight_kg);
        if total.map_or(true, |total| total > trade.ordered_quantity_kg) {
            return Err(StoreError::Conflict(trade_resource(trade.id)));
        }

        match destination {
            InvoiceDestination::Issue(invoice) => insert_invoice(&mut tx, invoice).await?,
            InvoiceDestination::OpenPeriod(period) => insert_period(&mut tx, period).await?,
            InvoiceDestination::AttachToPeriod { period_id, value } => {
                let attached = sqlx::query(
                    r#"
                    UPDATE invoice_periods
                    SET batch_ids = array_append(batch_ids, $1), amount = amount + $2
                    WHERE id = $3 AND status = 'open'
                    "#,
                )
                .bind(batch.id)
                .bind(*value)
                .bind(*period_id)
                .execute(&mut *tx)
                .await?;

                if attached.rows_affected() == 0 {
                    return Err(StoreError::Conflict(format!("invoice period {}", period_id)));
                }
            }
        }

        let (ref_kind, ref_id) = invoice_ref_parts(&batch.invoice_ref);
        let sql = format!(
            "INSERT INTO delivery_batches ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17)",
            BATCH_COLUMNS
        );
        sqlx::query(&sql)
            .bind(batch.id)
            .bind(batch.trade_id)
            .bind(&batch.grn_number)
            .bind(batch.gross_weight_kg)
            .bind(batch.tare_weight_kg)
            .bind(batch.net_weight_kg)
            .bind(batch.value)
            .bind(batch.loading_date)
            .bind(batch.delivery_date)
            .bind(&batch.vehicle_number)
            .bind(&batch.driver_name)
            .bind(&batch.dispatched_by)
            .bind(&batch.received_by)
            .bind(batch.received_at)
            .bind(ref_kind)
            .bind(ref_id)
            .bind(batch.created_at)
            .execute(&mut *tx)
            .await?;

        write_trade(&mut tx, trade, expected_version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_cancellation(
        &self,
        trade: &Trade,
        expected_version: i64,
    ) -> StoreResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        lock_trade(&mut tx, trade.id, expected_version).await?;

        let mut released = sqlx::query_scalar::<_, Uuid>(
            "UPDATE vouchers SET allocated_to = NULL WHERE allocated_to = $1 RETURNING id",
        )
        .bind(trade.id)
        .fetch_all(&mut *tx)
        .await?;
        released.sort();

        sqlx::query("DELETE FROM voucher_allocations WHERE trade_id = $1")
            .bind(trade.id)
            .execute(&mut *tx)
            .await?;

        write_trade(&mut tx, trade, expected_version).await?;
        tx.commit().await?;
        Ok(released)
    }

    async fn close_period(&self, period: &InvoicePeriod, invoice: &Invoice) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(
            r#"
            UPDATE invoice_periods
            SET status = $1, invoice_id = $2, closed_at = $3
            WHERE id = $4 AND status = 'open'
            "#,
        )
        .bind(period.status.as_str())
        .bind(period.invoice_id)
        .bind(period.closed_at)
        .bind(period.id)
        .execute(&mut *tx)
        .await?;

        if closed.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("invoice period {}", period.key)));
        }

        insert_invoice(&mut tx, invoice).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryQuery for PgStore {
    async fn find_available_vouchers(&self, filter: &InventoryFilter) -> StoreResult<Vec<Voucher>> {
        let sql = format!(
            "SELECT {} FROM vouchers \
             WHERE hub_id = $1 AND grain_type_id = $2 AND grade = $3 AND allocated_to IS NULL \
             ORDER BY deposit_date, voucher_number, id",
            VOUCHER_COLUMNS
        );
        let rows = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(filter.hub_id)
            .bind(filter.grain_type_id)
            .bind(&filter.grade)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Voucher::from).collect())
    }
}
