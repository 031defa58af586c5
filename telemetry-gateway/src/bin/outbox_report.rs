//! Prints the unsent backlog of the local outbox, per meter family.
//!
//! Usage: `outbox_report [sqlite-url]` (defaults to the configured store).

use anyhow::Result;
use meter_core::domain::MeterFamily;
use meter_core::{Store, SystemClock};
use std::sync::Arc;
use telemetry_gateway::config::AppConfig;
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    let url = match std::env::args().nth(1) {
        Some(url) => url,
        None => AppConfig::load()?.store.url,
    };

    let store = Store::open(&url, 1, Arc::new(SystemClock)).await?;
    let now = store.now();

    println!("{:<10} {:>10}  {}", "family", "unsent", "oldest unsent");
    for family in MeterFamily::ALL {
        let backlog = store.backlog(family).await?;
        let oldest = match backlog.oldest_unsent_ts {
            Some(ts) => {
                let at = OffsetDateTime::from_unix_timestamp(ts)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|_| ts.to_string());
                format!("{at} ({}s ago)", now - ts)
            }
            None => "-".to_string(),
        };
        println!("{:<10} {:>10}  {}", family.tag(), backlog.unsent, oldest);
    }

    let hourly = store.list_unsent_hourly(u32::MAX).await?;
    println!("{:<10} {:>10}", "hourly", hourly.len());

    store.close().await;
    Ok(())
}
