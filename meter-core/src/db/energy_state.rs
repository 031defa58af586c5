use super::Store;
use crate::domain::EnergyState;
use crate::error::StoreError;

impl Store {
    /// Records `observed` as the new baseline of one meter instance and returns
    /// the previous one, atomically. The write happens unconditionally, so a
    /// counter that went backwards becomes the baseline for the next cycle.
    pub async fn swap_energy_baseline(
        &self,
        source_address: &str,
        unit_id: i64,
        observed: u64,
    ) -> Result<Option<u64>, StoreError> {
        let stored = i64::try_from(observed).map_err(|_| StoreError::CounterOutOfRange(observed))?;
        let now = self.now();

        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT last_counter FROM energy_state WHERE source_address = ? AND unit_id = ?",
        )
        .bind(source_address)
        .bind(unit_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO energy_state (source_address, unit_id, last_counter, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (source_address, unit_id) DO UPDATE SET
                last_counter = excluded.last_counter,
                updated_at   = excluded.updated_at
            "#,
        )
        .bind(source_address)
        .bind(unit_id)
        .bind(stored)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(previous.map(|v| u64::try_from(v).unwrap_or(0)))
    }

    pub async fn energy_state(&self, source_address: &str, unit_id: i64) -> Result<Option<EnergyState>, StoreError> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT last_counter, updated_at FROM energy_state WHERE source_address = ? AND unit_id = ?",
        )
        .bind(source_address)
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(last_counter, updated_at)| EnergyState {
            source_address: source_address.to_string(),
            unit_id,
            last_counter: u64::try_from(last_counter).unwrap_or(0),
            updated_at,
        }))
    }
}
