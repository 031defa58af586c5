use std::{future::Future, sync::Arc, time::Duration, time::Instant};

use meter_core::domain::{HourBucket, MeasuredValue, MeterFamily, NewReading, ENERGY_DELTA_COLUMN, HISTORY_WINDOWS};
use meter_core::Store;
use time::UtcOffset;

use crate::sinks::{ForwardReport, Forwarder};
use crate::sources::read_snapshot;
use crate::transform::EnergyDeltaEngine;

use super::{MeterSource, PipelineError};

/// One meter gateway and the unit ids polled behind it.
pub struct MeterTarget {
    pub family: MeterFamily,
    pub source: Arc<dyn MeterSource>,
    pub unit_ids: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub retention: Duration,
    /// Seconds either side of a history window's target that still count as a match.
    pub history_tolerance: i64,
    /// Fixed offset defining local hour boundaries; `None` follows the host's time zone.
    pub utc_offset: Option<UtcOffset>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub stored: usize,
    pub skipped: usize,
    pub purged: u64,
    pub hours_finalized: u64,
    pub forwarded: ForwardReport,
}

/// Sequential driver: poll every unit, store, purge, finalize hours, forward.
pub struct PollLoop {
    store: Store,
    targets: Vec<MeterTarget>,
    deltas: EnergyDeltaEngine,
    forwarder: Forwarder,
    settings: PollSettings,
    /// Newest hour whose totals have been finalized by this process.
    finalized_through: Option<HourBucket>,
}

impl PollLoop {
    pub fn new(
        store: Store,
        targets: Vec<MeterTarget>,
        deltas: EnergyDeltaEngine,
        forwarder: Forwarder,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            targets,
            deltas,
            forwarder,
            settings,
            finalized_through: None,
        }
    }

    /// Runs cycles until `shutdown` resolves. Shutdown is only observed while
    /// sleeping between cycles, never in the middle of one.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let report = self.run_cycle().await;
            tracing::info!(
                stored = report.stored,
                skipped = report.skipped,
                published = report.forwarded.published,
                "poll cycle complete"
            );

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, stopping poll loop");
                    break;
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        for target in &self.targets {
            for &unit_id in &target.unit_ids {
                match self.poll_unit(target, unit_id).await {
                    Ok(id) => {
                        report.stored += 1;
                        metrics::counter!("gateway_readings_stored_total", "family" => target.family.tag())
                            .increment(1);
                        tracing::debug!(family = %target.family, unit_id, id, "reading stored");
                    }
                    Err(PipelineError::Store(e)) => {
                        report.skipped += 1;
                        metrics::counter!("gateway_store_errors_total").increment(1);
                        tracing::error!(
                            family = %target.family,
                            source = target.source.address(),
                            unit_id,
                            error = %e,
                            "failed to store reading, dropping it"
                        );
                    }
                    Err(e) => {
                        report.skipped += 1;
                        metrics::counter!("gateway_meter_failures_total", "family" => target.family.tag())
                            .increment(1);
                        tracing::warn!(
                            family = %target.family,
                            source = target.source.address(),
                            unit_id,
                            error = %e,
                            "meter skipped this cycle"
                        );
                    }
                }
            }
        }

        match self.store.purge_older_than(self.settings.retention).await {
            Ok(purged) => {
                report.purged = purged;
                if purged > 0 {
                    metrics::counter!("outbox_purged_rows_total").increment(purged);
                    tracing::info!(purged, "purged rows past retention");
                }
            }
            Err(e) => tracing::error!(error = %e, "retention purge failed"),
        }

        report.hours_finalized = self.finalize_completed_hours().await;

        match self.forwarder.forward_batch().await {
            Ok(forwarded) => report.forwarded = forwarded,
            Err(e) => tracing::error!(error = %e, "forwarding failed"),
        }

        metrics::histogram!("poll_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        report
    }

    async fn poll_unit(&self, target: &MeterTarget, unit_id: u8) -> Result<i64, PipelineError> {
        let mut reader = target.source.connect(unit_id).await?;

        let mut reading = NewReading::new(target.family, target.source.address(), i64::from(unit_id));
        let snapshot = read_snapshot(&mut *reader, &mut reading).await;
        reader.disconnect().await;
        snapshot?;

        self.derive_energy(&mut reading).await?;
        let id = self.store.append(&reading).await?;
        Ok(id)
    }

    /// Adds the cycle's energy delta and the look-back window consumption.
    async fn derive_energy(&self, reading: &mut NewReading) -> Result<(), PipelineError> {
        let family = reading.family;
        let counter = reading
            .get(family.energy_counter())
            .map(MeasuredValue::as_counter)
            .unwrap_or(0);

        let delta_kwh = self
            .deltas
            .observe(&reading.source_address, reading.unit_id, counter)
            .await?;
        reading.push(ENERGY_DELTA_COLUMN, MeasuredValue::Real(delta_kwh));

        let current = i64::try_from(counter).unwrap_or(i64::MAX);
        let now = self.store.now();
        for window in HISTORY_WINDOWS {
            let past = self
                .store
                .query_near(
                    family,
                    &reading.source_address,
                    reading.unit_id,
                    now - window.seconds,
                    self.settings.history_tolerance,
                )
                .await?;

            let used = match past {
                Some(past) if past > 0 && current >= past => current - past,
                _ => 0,
            };
            reading.push(window.column, MeasuredValue::Integer(used));
        }

        Ok(())
    }

    /// Finalizes every completed local hour not finalized yet, oldest first.
    /// Stops at the first failure; the remaining hours are retried next cycle.
    async fn finalize_completed_hours(&mut self) -> u64 {
        let now = self.store.now();
        let offset = self.hour_offset(now).await;
        let last_complete = HourBucket::containing(now, offset).previous();

        let mut hour = match self.finalized_through {
            Some(done) => done.next(),
            None => match self.resume_point(now, offset).await {
                Ok(hour) => hour,
                Err(e) => {
                    tracing::error!(error = %e, "could not find the last finalized hour, retrying next cycle");
                    return 0;
                }
            },
        };

        let mut finalized = 0;
        while hour <= last_complete {
            match self.store.finalize_hour(hour).await {
                Ok(rows) => {
                    if rows > 0 {
                        metrics::counter!("hourly_energy_finalized_total").increment(rows);
                        tracing::info!(hour_start = hour.start(), rows, "hourly energy finalized");
                    }
                    finalized += rows;
                    self.finalized_through = Some(hour);
                }
                Err(e) => {
                    tracing::error!(hour_start = hour.start(), error = %e, "hourly finalize failed, retrying next cycle");
                    break;
                }
            }
            hour = hour.next();
        }

        finalized
    }

    /// First hour to look at after a start: the one after the newest stored
    /// total, but never an hour retention has already begun to purge.
    async fn resume_point(&self, now: i64, offset: UtcOffset) -> Result<HourBucket, PipelineError> {
        let retention = i64::try_from(self.settings.retention.as_secs()).unwrap_or(i64::MAX);
        let oldest_whole = HourBucket::containing(now.saturating_sub(retention), offset).next();

        let resume = match self.store.latest_finalized_hour().await? {
            Some(latest) => latest.next().max(oldest_whole),
            None => oldest_whole,
        };
        Ok(resume)
    }

    async fn hour_offset(&self, now: i64) -> UtcOffset {
        if let Some(offset) = self.settings.utc_offset {
            return offset;
        }
        match self.store.local_offset_at(now).await {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!(error = %e, "local offset lookup failed, bucketing hours in UTC");
                UtcOffset::UTC
            }
        }
    }
}
