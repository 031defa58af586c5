use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::Store;
use crate::domain::{Column, ColumnType, Field, MeasuredValue, MeterFamily, NewReading, Reading};
use crate::error::StoreError;

/// Unsent rows of one family table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Backlog {
    pub unsent: i64,
    pub oldest_unsent_ts: Option<i64>,
}

impl Store {
    /// Inserts `reading` as unsent and returns its id.
    ///
    /// The row timestamp is the store clock, clamped so that it never goes
    /// below the newest timestamp already in the table.
    pub async fn append(&self, reading: &NewReading) -> Result<i64, StoreError> {
        let table = reading.family.table();
        let mut values = Vec::with_capacity(reading.fields.len());
        for field in &reading.fields {
            let column = reading
                .family
                .column(field.name)
                .ok_or_else(|| StoreError::UnknownColumn {
                    table,
                    column: field.name.to_string(),
                })?;
            values.push((column.name, coerce(field.value.sanitized(), column.column_type)));
        }

        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let latest: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX(ts) FROM {table}"))
            .fetch_one(&mut *tx)
            .await?;
        let ts = latest.map_or(now, |latest| latest.max(now));

        let mut builder = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {table} (ts, source_address, unit_id"));
        for (name, _) in &values {
            builder.push(", ").push(*name);
        }
        builder.push(") VALUES (");
        {
            let mut binds = builder.separated(", ");
            binds
                .push_bind(ts)
                .push_bind(reading.source_address.clone())
                .push_bind(reading.unit_id);
            for (_, value) in &values {
                match *value {
                    MeasuredValue::Integer(v) => binds.push_bind(v),
                    MeasuredValue::Real(v) => binds.push_bind(v),
                };
            }
        }
        builder.push(")");

        let id = builder.build().execute(&mut *tx).await?.last_insert_rowid();
        tx.commit().await?;

        Ok(id)
    }

    /// Oldest unsent rows first, at most `limit`.
    pub async fn list_unsent(&self, family: MeterFamily, limit: u32) -> Result<Vec<Reading>, StoreError> {
        let columns: Vec<Column> = family.columns().collect();
        let select_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, ts, source_address, unit_id, is_sent, {select_list} \
             FROM {} WHERE is_sent = 0 ORDER BY id LIMIT ?",
            family.table()
        );

        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let readings = rows
            .iter()
            .map(|row| decode_reading(family, &columns, row))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(readings)
    }

    /// Flags one row as delivered. Returns `false` when the row was already
    /// sent or does not exist.
    pub async fn mark_sent(&self, family: MeterFamily, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET is_sent = 1 WHERE id = ? AND is_sent = 0",
            family.table()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes readings and hourly totals older than `horizon`, sent or not.
    pub async fn purge_older_than(&self, horizon: Duration) -> Result<u64, StoreError> {
        let horizon = i64::try_from(horizon.as_secs()).unwrap_or(i64::MAX);
        let cutoff = self.now().saturating_sub(horizon);

        let mut removed = 0;
        for family in MeterFamily::ALL {
            removed += sqlx::query(&format!("DELETE FROM {} WHERE ts < ?", family.table()))
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        removed += sqlx::query("DELETE FROM hourly_energy WHERE hour_bucket < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed)
    }

    /// Energy counter of the row closest to `target` within `tolerance`
    /// seconds on either side, for one meter instance.
    pub async fn query_near(
        &self,
        family: MeterFamily,
        source_address: &str,
        unit_id: i64,
        target: i64,
        tolerance: i64,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!(
            r#"
            SELECT {counter}
            FROM {table}
            WHERE unit_id = ?
              AND source_address = ?
              AND ts BETWEEN ? AND ?
            ORDER BY ABS(ts - ?), id DESC
            LIMIT 1
            "#,
            counter = family.energy_counter(),
            table = family.table(),
        );

        let counter = sqlx::query_scalar::<_, i64>(&sql)
            .bind(unit_id)
            .bind(source_address)
            .bind(target - tolerance)
            .bind(target + tolerance)
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;

        Ok(counter)
    }

    pub async fn backlog(&self, family: MeterFamily) -> Result<Backlog, StoreError> {
        let backlog = sqlx::query_as::<_, Backlog>(&format!(
            "SELECT COUNT(*) AS unsent, MIN(ts) AS oldest_unsent_ts FROM {} WHERE is_sent = 0",
            family.table()
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(backlog)
    }
}

/// Matches a value to its column's storage class so rows decode back cleanly.
fn coerce(value: MeasuredValue, column_type: ColumnType) -> MeasuredValue {
    match (value, column_type) {
        (MeasuredValue::Real(v), ColumnType::Integer) => MeasuredValue::Integer(v as i64),
        (MeasuredValue::Integer(v), ColumnType::Real) => MeasuredValue::Real(v as f64),
        (value, _) => value,
    }
}

fn decode_reading(family: MeterFamily, columns: &[Column], row: &SqliteRow) -> Result<Reading, sqlx::Error> {
    let mut fields = Vec::with_capacity(columns.len());
    for column in columns {
        let value = match column.column_type {
            ColumnType::Integer => MeasuredValue::Integer(row.try_get(column.name)?),
            ColumnType::Real => MeasuredValue::Real(row.try_get(column.name)?),
        };
        fields.push(Field::new(column.name, value));
    }

    Ok(Reading {
        id: row.try_get("id")?,
        ts: row.try_get("ts")?,
        family,
        source_address: row.try_get("source_address")?,
        unit_id: row.try_get("unit_id")?,
        fields,
        sent: row.try_get::<i64, _>("is_sent")? != 0,
    })
}
