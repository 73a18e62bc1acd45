//! Eligibility store and order journal.
//!
//! The `instruments` table is the source of truth for accumulation state.
//! Writes go through [`Database::update`], a single conditional `UPDATE`
//! whose `WHERE` clause carries the caller's expectation; zero affected rows
//! on an existing instrument is a [`StoreError::Conflict`]. The schema's
//! `CHECK` constraints mirror the record invariants so a bad write fails in
//! the database too.

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

use crate::error::StoreError;
use crate::models::{EligibilityStatus, InstrumentRecord};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Raw `instruments` row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredInstrument {
    instrument_name: String,
    eligibility_status: String,
    base_value: Option<String>,
    first_day_processed: bool,
    default_quantity: i64,
    additional_quantity: i64,
    broker_token: Option<String>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<StoredInstrument> for InstrumentRecord {
    type Error = StoreError;

    fn try_from(row: StoredInstrument) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            name: row.instrument_name.clone(),
            reason,
        };

        let eligibility_status = EligibilityStatus::from_str(&row.eligibility_status).map_err(corrupt)?;
        let base_value = row
            .base_value
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("base_value: {}", e)))?;
        let default_quantity = u32::try_from(row.default_quantity)
            .map_err(|_| corrupt(format!("default_quantity {}", row.default_quantity)))?;
        let additional_quantity = u32::try_from(row.additional_quantity)
            .map_err(|_| corrupt(format!("additional_quantity {}", row.additional_quantity)))?;

        let record = InstrumentRecord {
            instrument_name: row.instrument_name,
            eligibility_status,
            base_value,
            first_day_processed: row.first_day_processed,
            default_quantity,
            additional_quantity,
            broker_token: row.broker_token,
            last_updated: row.last_updated,
        };

        record.check_invariants().map_err(|reason| StoreError::Corrupt {
            name: record.instrument_name.clone(),
            reason,
        })?;
        Ok(record)
    }
}

/// Fields to change in a conditional update. `None` leaves a field alone;
/// for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub eligibility_status: Option<EligibilityStatus>,
    pub base_value: Option<Option<Decimal>>,
    pub first_day_processed: Option<bool>,
    pub default_quantity: Option<u32>,
    pub additional_quantity: Option<u32>,
    pub broker_token: Option<Option<String>>,
}

impl RecordUpdate {
    /// Only refresh `last_updated`.
    pub fn touch() -> Self {
        Self::default()
    }

    /// Open a new eligibility episode.
    pub fn start_episode() -> Self {
        Self {
            eligibility_status: Some(EligibilityStatus::Eligible),
            base_value: Some(None),
            first_day_processed: Some(false),
            ..Self::default()
        }
    }

    /// Close the current episode and drop its anchor.
    pub fn end_episode() -> Self {
        Self {
            eligibility_status: Some(EligibilityStatus::Ineligible),
            base_value: Some(None),
            first_day_processed: Some(false),
            ..Self::default()
        }
    }

    pub fn anchor(price: Decimal) -> Self {
        Self {
            base_value: Some(Some(price)),
            first_day_processed: Some(true),
            ..Self::default()
        }
    }
}

/// The caller's expectation of the stored row, checked atomically with the write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expected {
    pub eligibility_status: Option<EligibilityStatus>,
    pub base_value: Option<Option<Decimal>>,
}

impl Expected {
    /// No expectation. Not allowed for writes touching `base_value`.
    #[cfg(test)]
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status(status: EligibilityStatus) -> Self {
        Self {
            eligibility_status: Some(status),
            base_value: None,
        }
    }

    pub fn base_value(previous: Option<Decimal>) -> Self {
        Self {
            eligibility_status: None,
            base_value: Some(previous),
        }
    }

    pub fn and_status(mut self, status: EligibilityStatus) -> Self {
        self.eligibility_status = Some(status);
        self
    }

    fn is_guarded(&self) -> bool {
        self.eligibility_status.is_some() || self.base_value.is_some()
    }
}

/// Journal row for an order this bot placed (or simulated).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JournalEntry {
    pub id: i64,
    pub run_id: String,
    pub order_id: Option<String>,
    pub instrument_name: String,
    pub broker_token: String,
    pub side: String,
    pub quantity: i64,
    pub purpose: String,
    pub multiplier: i64,
    pub estimated_cost: String,
    pub status: String,
    pub executed_price: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New journal row.
#[derive(Debug, Clone)]
pub struct NewJournalEntry<'a> {
    pub run_id: &'a str,
    pub order_id: Option<&'a str>,
    pub instrument_name: &'a str,
    pub broker_token: &'a str,
    pub side: &'a str,
    pub quantity: u32,
    pub purpose: &'a str,
    pub multiplier: u32,
    pub estimated_cost: Decimal,
    pub status: &'a str,
    pub executed_price: Option<Decimal>,
    pub detail: Option<&'a str>,
}

/// Canonical text form of a decimal as stored in the database.
fn decimal_text(value: Decimal) -> String {
    value.normalize().to_string()
}

impl Database {
    /// Open (or create) the database and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await.context("Failed to run migrations")?;

        Ok(db)
    }

    /// Private in-memory database for tests. A single connection keeps every
    /// query on the same memory database.
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await.context("Failed to run migrations")?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                instrument_name TEXT PRIMARY KEY,
                eligibility_status TEXT NOT NULL DEFAULT 'Ineligible'
                    CHECK (eligibility_status IN ('Eligible', 'Ineligible')),
                base_value TEXT
                    CHECK (base_value IS NULL OR CAST(base_value AS REAL) > 0),
                first_day_processed INTEGER NOT NULL DEFAULT 0,
                default_quantity INTEGER NOT NULL DEFAULT 0 CHECK (default_quantity >= 0),
                additional_quantity INTEGER NOT NULL DEFAULT 0 CHECK (additional_quantity >= 0),
                broker_token TEXT,
                last_updated TEXT NOT NULL,
                CHECK (first_day_processed = 0 OR base_value IS NOT NULL),
                CHECK ((base_value IS NOT NULL) =
                       (eligibility_status = 'Eligible' AND first_day_processed = 1))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                order_id TEXT,
                instrument_name TEXT NOT NULL,
                broker_token TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                purpose TEXT NOT NULL,
                multiplier INTEGER NOT NULL DEFAULT 1,
                estimated_cost TEXT NOT NULL,
                status TEXT NOT NULL,
                executed_price TEXT,
                detail TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_order_journal_instrument ON order_journal(instrument_name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_order_journal_created ON order_journal(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Instruments ====================

    /// All records, ordered by name.
    pub async fn get_all(&self) -> Result<Vec<InstrumentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, StoredInstrument>(
            "SELECT * FROM instruments ORDER BY instrument_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InstrumentRecord::try_from).collect()
    }

    pub async fn get(&self, name: &str) -> Result<Option<InstrumentRecord>, StoreError> {
        let row = sqlx::query_as::<_, StoredInstrument>(
            "SELECT * FROM instruments WHERE instrument_name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstrumentRecord::try_from).transpose()
    }

    /// Insert a record unless one with the same name exists. Returns whether
    /// a row was inserted.
    pub async fn insert_if_absent(&self, record: &InstrumentRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO instruments (
                instrument_name, eligibility_status, base_value, first_day_processed,
                default_quantity, additional_quantity, broker_token, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.instrument_name)
        .bind(record.eligibility_status.as_str())
        .bind(record.base_value.map(decimal_text))
        .bind(record.first_day_processed)
        .bind(i64::from(record.default_quantity))
        .bind(i64::from(record.additional_quantity))
        .bind(&record.broker_token)
        .bind(record.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Create or reconfigure an instrument's purchase settings. Never touches
    /// eligibility or the anchor.
    pub async fn configure(
        &self,
        name: &str,
        broker_token: &str,
        default_quantity: u32,
        additional_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO instruments (
                instrument_name, eligibility_status, first_day_processed,
                default_quantity, additional_quantity, broker_token, last_updated
            ) VALUES (?, 'Ineligible', 0, ?, ?, ?, ?)
            ON CONFLICT(instrument_name) DO UPDATE SET
                default_quantity = excluded.default_quantity,
                additional_quantity = excluded.additional_quantity,
                broker_token = excluded.broker_token,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(name)
        .bind(i64::from(default_quantity))
        .bind(i64::from(additional_quantity))
        .bind(broker_token)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Conditional update: applies `fields` only if the stored row still
    /// matches `expected`, in a single statement.
    pub async fn update(
        &self,
        name: &str,
        fields: &RecordUpdate,
        expected: &Expected,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if fields.base_value.is_some() && !expected.is_guarded() {
            return Err(StoreError::UnguardedBaseValue(name.to_string()));
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE instruments SET last_updated = ");
        qb.push_bind(now);

        if let Some(status) = fields.eligibility_status {
            qb.push(", eligibility_status = ").push_bind(status.as_str());
        }
        if let Some(base_value) = fields.base_value {
            qb.push(", base_value = ").push_bind(base_value.map(decimal_text));
        }
        if let Some(flag) = fields.first_day_processed {
            qb.push(", first_day_processed = ").push_bind(flag);
        }
        if let Some(qty) = fields.default_quantity {
            qb.push(", default_quantity = ").push_bind(i64::from(qty));
        }
        if let Some(qty) = fields.additional_quantity {
            qb.push(", additional_quantity = ").push_bind(i64::from(qty));
        }
        if let Some(token) = &fields.broker_token {
            qb.push(", broker_token = ").push_bind(token.clone());
        }

        qb.push(" WHERE instrument_name = ").push_bind(name.to_string());

        if let Some(status) = expected.eligibility_status {
            qb.push(" AND eligibility_status = ").push_bind(status.as_str());
        }
        if let Some(previous) = expected.base_value {
            qb.push(" AND base_value IS ").push_bind(previous.map(decimal_text));
        }

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return match self.get(name).await? {
                Some(_) => Err(StoreError::Conflict(name.to_string())),
                None => Err(StoreError::NotFound(name.to_string())),
            };
        }

        Ok(())
    }

    /// Set the episode anchor exactly once: succeeds only while the record is
    /// eligible and has no base value.
    pub async fn commit_anchor(
        &self,
        name: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if price <= Decimal::ZERO {
            return Err(StoreError::InvalidAnchor {
                name: name.to_string(),
                price,
            });
        }

        self.update(
            name,
            &RecordUpdate::anchor(price),
            &Expected::base_value(None).and_status(EligibilityStatus::Eligible),
            now,
        )
        .await
    }

    // ==================== Order Journal ====================

    pub async fn record_order(
        &self,
        entry: &NewJournalEntry<'_>,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_journal (
                run_id, order_id, instrument_name, broker_token, side, quantity, purpose,
                multiplier, estimated_cost, status, executed_price, detail, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.run_id)
        .bind(entry.order_id)
        .bind(entry.instrument_name)
        .bind(entry.broker_token)
        .bind(entry.side)
        .bind(i64::from(entry.quantity))
        .bind(entry.purpose)
        .bind(i64::from(entry.multiplier))
        .bind(decimal_text(entry.estimated_cost))
        .bind(entry.status)
        .bind(entry.executed_price.map(decimal_text))
        .bind(entry.detail)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent journal rows first.
    pub async fn recent_orders(&self, limit: i64) -> Result<Vec<JournalEntry>, StoreError> {
        let rows = sqlx::query_as::<_, JournalEntry>(
            "SELECT * FROM order_journal ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
