use anyhow::Result;
use meter_core::{Store, SystemClock};
use std::sync::Arc;
use telemetry_gateway::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::{MeterSource, MeterTarget, PollLoop, PollSettings},
    sinks::{Forwarder, HttpTelemetrySink},
    sources::ModbusTcpSource,
    transform::EnergyDeltaEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = Store::open(&cfg.store.url, cfg.store.max_connections, Arc::new(SystemClock)).await?;

    let sink = HttpTelemetrySink::new(&cfg.telemetry.base_url, &cfg.topic_prefix(), cfg.publish_timeout())?;
    tracing::info!(endpoint = sink.endpoint(), "telemetry sink configured");

    let targets = cfg
        .meters
        .iter()
        .map(|m| {
            let source: Arc<dyn MeterSource> = Arc::new(ModbusTcpSource::new(
                m.host.clone(),
                m.port,
                cfg.connect_timeout(),
                cfg.request_timeout(),
            ));
            MeterTarget {
                family: m.family,
                source,
                unit_ids: m.unit_ids.clone(),
            }
        })
        .collect();

    let settings = PollSettings {
        interval: cfg.poll_interval(),
        retention: cfg.retention(),
        history_tolerance: cfg.poll.history_tolerance_secs,
        utc_offset: cfg.utc_offset()?,
    };

    let poll = PollLoop::new(
        store.clone(),
        targets,
        EnergyDeltaEngine::new(store.clone(), cfg.poll.energy_divisor),
        Forwarder::new(store.clone(), Arc::new(sink), cfg.poll.forward_batch_size),
        settings,
    );

    tracing::info!(
        meters = cfg.meters.len(),
        interval_secs = cfg.poll.interval_secs,
        "starting poll loop"
    );

    poll.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await;

    store.close().await;
    Ok(())
}
