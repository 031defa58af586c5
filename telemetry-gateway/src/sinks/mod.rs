pub mod document;
pub mod forwarder;
pub mod http;

pub use document::{telemetry_key, TelemetryDocument, HOURLY_ENERGY_KEY};
pub use forwarder::{ForwardReport, Forwarder};
pub use http::HttpTelemetrySink;
