//! SQLite persistence for the gateway.
//!
//! One `readings_<family>` table per meter family acts as the outbox, next to
//! `energy_state` (delta baselines) and `hourly_energy` (finalized hourly
//! totals). The schema is created, and extended with missing columns, when the
//! store is opened.

use std::{str::FromStr, sync::Arc, time::Duration};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::clock::Clock;
use crate::domain::MeterFamily;
use crate::error::StoreError;

pub mod energy_state;
pub mod hourly_energy;
pub mod outbox;

pub use outbox::Backlog;

/// Handle to the local store; cheap to clone, all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Opens (creating if needed) the database at `url`, e.g. `sqlite://meter-gateway.db`.
    pub async fn open(url: &str, max_connections: u32, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool, clock };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. Pinned to a single connection, since every
    /// SQLite `:memory:` connection is its own database.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool, clock };
        store.migrate().await?;
        Ok(store)
    }

    /// Current time according to the store's clock, in epoch seconds.
    pub fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for family in MeterFamily::ALL {
            self.migrate_family(family).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS energy_state (
                source_address TEXT    NOT NULL,
                unit_id        INTEGER NOT NULL,
                last_counter   INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL,
                PRIMARY KEY (source_address, unit_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hourly_energy (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                hour_bucket    INTEGER NOT NULL,
                family         TEXT    NOT NULL,
                source_address TEXT    NOT NULL,
                unit_id        INTEGER NOT NULL,
                energy_kwh     REAL    NOT NULL,
                finalized_at   INTEGER NOT NULL,
                is_sent        INTEGER NOT NULL DEFAULT 0,
                UNIQUE (hour_bucket, family, source_address, unit_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_hourly_energy_unsent ON hourly_energy (is_sent, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn migrate_family(&self, family: MeterFamily) -> Result<(), StoreError> {
        let table = family.table();

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             ts INTEGER NOT NULL, \
             source_address TEXT NOT NULL, \
             unit_id INTEGER NOT NULL"
        );
        for column in family.columns() {
            ddl.push_str(&format!(", {} {} NOT NULL DEFAULT 0", column.name, column.column_type.sql()));
        }
        ddl.push_str(", is_sent INTEGER NOT NULL DEFAULT 0)");
        sqlx::query(&ddl).execute(&self.pool).await?;

        // Tables created by an older build may lack newer columns.
        let existing: Vec<String> = sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .fetch_all(&self.pool)
            .await?;
        for column in family.columns() {
            if !existing.iter().any(|name| name == column.name) {
                tracing::info!(table, column = column.name, "adding missing column");
                sqlx::query(&format!(
                    "ALTER TABLE {table} ADD COLUMN {} {} NOT NULL DEFAULT 0",
                    column.name,
                    column.column_type.sql()
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_unsent ON {table} (is_sent, id)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_meter_ts ON {table} (unit_id, source_address, ts)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::Store;
    use crate::clock::ManualClock;

    pub async fn store_at(start: i64) -> (Store, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = Store::open_in_memory(clock.clone())
            .await
            .expect("in-memory store opens");
        (store, clock)
    }
}
