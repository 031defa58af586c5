use std::sync::Arc;

use meter_core::domain::MeterFamily;
use meter_core::Store;

use crate::pipeline::{PipelineError, TelemetrySink};

use super::TelemetryDocument;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReport {
    pub published: usize,
    pub hourly_published: usize,
    /// Families (and the hourly queue) whose pass stopped on a publish failure.
    pub stalled: usize,
}

/// Drains the outbox into the telemetry sink, oldest first.
///
/// Rows are marked sent only after the sink acknowledged them, so delivery is
/// at-least-once. The first failure stops that queue for this pass and leaves
/// the failed row and everything after it unsent.
pub struct Forwarder {
    store: Store,
    sink: Arc<dyn TelemetrySink>,
    batch_size: u32,
}

impl Forwarder {
    pub fn new(store: Store, sink: Arc<dyn TelemetrySink>, batch_size: u32) -> Self {
        Self {
            store,
            sink,
            batch_size,
        }
    }

    pub async fn forward_batch(&self) -> Result<ForwardReport, PipelineError> {
        let mut report = ForwardReport::default();

        for family in MeterFamily::ALL {
            let readings = self.store.list_unsent(family, self.batch_size).await?;
            for reading in readings {
                let document = TelemetryDocument::from_reading(&reading);
                match self.sink.publish(&document).await {
                    Ok(()) => {
                        self.store.mark_sent(family, reading.id).await?;
                        report.published += 1;
                        metrics::counter!("telemetry_published_total", "family" => family.tag()).increment(1);
                    }
                    Err(e) => {
                        tracing::warn!(
                            family = %family,
                            id = reading.id,
                            error = %e,
                            "publish failed, keeping reading for the next cycle"
                        );
                        metrics::counter!("telemetry_publish_failures_total", "family" => family.tag())
                            .increment(1);
                        report.stalled += 1;
                        break;
                    }
                }
            }
        }

        let hourly = self.store.list_unsent_hourly(self.batch_size).await?;
        for total in hourly {
            let document = TelemetryDocument::from_hourly(&total);
            match self.sink.publish(&document).await {
                Ok(()) => {
                    self.store.mark_hourly_sent(total.id).await?;
                    report.hourly_published += 1;
                    metrics::counter!("telemetry_published_total", "family" => "hourly").increment(1);
                }
                Err(e) => {
                    tracing::warn!(id = total.id, error = %e, "publish of hourly energy failed");
                    metrics::counter!("telemetry_publish_failures_total", "family" => "hourly").increment(1);
                    report.stalled += 1;
                    break;
                }
            }
        }

        if report.published + report.hourly_published > 0 {
            tracing::debug!(
                published = report.published,
                hourly = report.hourly_published,
                "forwarded outbox batch"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records published documents; can be told to fail specific calls.
    #[derive(Default)]
    pub struct RecordingSink {
        pub published: Mutex<Vec<TelemetryDocument>>,
        fail_calls: Mutex<Vec<usize>>,
        fail_all: AtomicBool,
        calls: AtomicUsize,
    }

    impl RecordingSink {
        /// Fails the `n`-th call (1-based) to `publish`.
        pub fn failing_call(n: usize) -> Self {
            let sink = Self::default();
            sink.fail_calls.lock().unwrap().push(n);
            sink
        }

        pub fn set_offline(&self, offline: bool) {
            self.fail_all.store(offline, Ordering::SeqCst);
        }

        pub fn count(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl TelemetrySink for RecordingSink {
        async fn publish(&self, document: &TelemetryDocument) -> Result<(), PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_all.load(Ordering::SeqCst) || self.fail_calls.lock().unwrap().contains(&call) {
                return Err(PipelineError::Publish("broker unavailable".to_string()));
            }
            self.published.lock().unwrap().push(document.clone());
            Ok(())
        }
    }
}
