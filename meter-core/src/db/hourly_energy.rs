use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::UtcOffset;

use super::Store;
use crate::domain::{HourBucket, HourlyEnergy, MeterFamily, ENERGY_DELTA_COLUMN};
use crate::error::StoreError;

impl Store {
    /// Sums the per-cycle energy deltas of every meter instance over `hour`
    /// into one unsent `hourly_energy` row each. An hour that was already
    /// finalized is left untouched; returns the number of new rows.
    pub async fn finalize_hour(&self, hour: HourBucket) -> Result<u64, StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0;
        for family in MeterFamily::ALL {
            let sql = format!(
                r#"
                INSERT OR IGNORE INTO hourly_energy
                    (hour_bucket, family, source_address, unit_id, energy_kwh, finalized_at)
                SELECT ?, ?, source_address, unit_id, COALESCE(SUM({ENERGY_DELTA_COLUMN}), 0.0), ?
                FROM {table}
                WHERE ts >= ? AND ts < ?
                GROUP BY source_address, unit_id
                "#,
                table = family.table(),
            );

            inserted += sqlx::query(&sql)
                .bind(hour.start())
                .bind(family.tag())
                .bind(now)
                .bind(hour.start())
                .bind(hour.end())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Start of the most recent hour that has finalized totals, if any.
    pub async fn latest_finalized_hour(&self) -> Result<Option<HourBucket>, StoreError> {
        let start: Option<i64> = sqlx::query_scalar("SELECT MAX(hour_bucket) FROM hourly_energy")
            .fetch_one(&self.pool)
            .await?;

        Ok(start.map(HourBucket::from_start))
    }

    /// UTC offset of the host's local time zone at `ts`, as SQLite's
    /// `localtime` modifier sees it. Follows daylight-saving changes.
    pub async fn local_offset_at(&self, ts: i64) -> Result<UtcOffset, StoreError> {
        let local: i64 = sqlx::query_scalar("SELECT CAST(strftime('%s', ?, 'unixepoch', 'localtime') AS INTEGER)")
            .bind(ts)
            .fetch_one(&self.pool)
            .await?;

        let seconds = local - ts;
        i32::try_from(seconds)
            .ok()
            .and_then(|s| UtcOffset::from_whole_seconds(s).ok())
            .ok_or(StoreError::OffsetOutOfRange(seconds))
    }

    pub async fn list_unsent_hourly(&self, limit: u32) -> Result<Vec<HourlyEnergy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, hour_bucket, family, source_address, unit_id, energy_kwh, is_sent
            FROM hourly_energy
            WHERE is_sent = 0
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_hourly).collect()
    }

    pub async fn mark_hourly_sent(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE hourly_energy SET is_sent = 1 WHERE id = ? AND is_sent = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All finalized totals of one hour, sent or not.
    pub async fn hourly_energy(&self, hour: HourBucket) -> Result<Vec<HourlyEnergy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, hour_bucket, family, source_address, unit_id, energy_kwh, is_sent
            FROM hourly_energy
            WHERE hour_bucket = ?
            ORDER BY family, source_address, unit_id
            "#,
        )
        .bind(hour.start())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_hourly).collect()
    }
}

fn decode_hourly(row: &SqliteRow) -> Result<HourlyEnergy, StoreError> {
    let tag: String = row.try_get("family")?;
    let family = MeterFamily::from_tag(&tag).ok_or(StoreError::UnknownFamily(tag))?;

    Ok(HourlyEnergy {
        id: row.try_get("id")?,
        hour: HourBucket::from_start(row.try_get("hour_bucket")?),
        family,
        source_address: row.try_get("source_address")?,
        unit_id: row.try_get("unit_id")?,
        energy_kwh: row.try_get("energy_kwh")?,
        sent: row.try_get::<i64, _>("is_sent")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::store_at;
    use crate::domain::{MeasuredValue, NewReading};

    const HOUR_START: i64 = 1_717_200_000; // 2024-06-01 00:00:00 UTC

    fn delta_reading(family: MeterFamily, unit_id: i64, kwh: f64) -> NewReading {
        NewReading::new(family, "192.168.100.28", unit_id)
            .with_field(ENERGY_DELTA_COLUMN, MeasuredValue::Real(kwh))
    }

    #[tokio::test]
    async fn finalize_sums_deltas_per_meter_inside_the_hour() {
        let (store, clock) = store_at(HOUR_START - 60).await;
        // Previous hour, must not count.
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 9.0)).await.unwrap();

        clock.set(HOUR_START);
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 0.25)).await.unwrap();
        store.append(&delta_reading(MeterFamily::Ia9mem15, 101, 1.0)).await.unwrap();
        clock.set(HOUR_START + 1_800);
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 0.5)).await.unwrap();
        store.append(&delta_reading(MeterFamily::Ipm2xxx, 1, 3.0)).await.unwrap();
        clock.set(HOUR_START + 3_600);
        // Next hour, must not count.
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 7.0)).await.unwrap();

        let hour = HourBucket::containing(HOUR_START + 10, UtcOffset::UTC);
        assert_eq!(store.finalize_hour(hour).await.unwrap(), 3);

        let totals = store.hourly_energy(hour).await.unwrap();
        let summary: Vec<_> = totals
            .iter()
            .map(|h| (h.family, h.unit_id, h.energy_kwh))
            .collect();
        assert_eq!(
            summary,
            vec![
                (MeterFamily::Ia9mem15, 100, 0.75),
                (MeterFamily::Ia9mem15, 101, 1.0),
                (MeterFamily::Ipm2xxx, 1, 3.0),
            ]
        );
        assert!(totals.iter().all(|h| h.hour == hour && !h.sent));
    }

    #[tokio::test]
    async fn finalizing_twice_does_not_duplicate_totals() {
        let (store, _clock) = store_at(HOUR_START + 5).await;
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 0.5)).await.unwrap();

        let hour = HourBucket::from_start(HOUR_START);
        assert_eq!(store.finalize_hour(hour).await.unwrap(), 1);
        assert_eq!(store.finalize_hour(hour).await.unwrap(), 0);
        assert_eq!(store.list_unsent_hourly(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_hour_produces_no_rows() {
        let (store, _clock) = store_at(HOUR_START).await;
        assert_eq!(store.finalize_hour(HourBucket::from_start(HOUR_START)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hourly_rows_are_marked_sent_once() {
        let (store, _clock) = store_at(HOUR_START + 5).await;
        store.append(&delta_reading(MeterFamily::Ipm2xxx, 1, 2.0)).await.unwrap();
        store.finalize_hour(HourBucket::from_start(HOUR_START)).await.unwrap();

        let pending = store.list_unsent_hourly(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(store.mark_hourly_sent(pending[0].id).await.unwrap());
        assert!(!store.mark_hourly_sent(pending[0].id).await.unwrap());
        assert!(store.list_unsent_hourly(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_finalized_hour_tracks_the_newest_bucket() {
        let (store, clock) = store_at(HOUR_START + 5).await;
        assert_eq!(store.latest_finalized_hour().await.unwrap(), None);

        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 0.5)).await.unwrap();
        clock.set(HOUR_START + 3_605);
        store.append(&delta_reading(MeterFamily::Ia9mem15, 100, 0.5)).await.unwrap();

        let first = HourBucket::from_start(HOUR_START);
        store.finalize_hour(first.next()).await.unwrap();
        store.finalize_hour(first).await.unwrap();

        assert_eq!(store.latest_finalized_hour().await.unwrap(), Some(first.next()));
    }

    #[tokio::test]
    async fn local_offset_is_a_whole_number_of_minutes() {
        let (store, _clock) = store_at(HOUR_START).await;

        let offset = store.local_offset_at(HOUR_START).await.unwrap();
        assert_eq!(offset.whole_seconds() % 60, 0);
        assert!(offset.whole_hours().abs() <= 14);
    }
}
