use meter_core::StoreError;

use crate::sinks::TelemetryDocument;

pub mod poll_loop;

pub use poll_loop::{CycleReport, MeterTarget, PollLoop, PollSettings};

/// Failures talking to a meter over the field bus.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("meter rejected register {address} with exception {code}")]
    Exception { address: u16, code: String },
    #[error("register {address}: expected {expected} words, got {got}")]
    ShortResponse { address: u16, expected: u16, got: usize },
}

impl TransportError {
    /// The meter answered but refused this particular register.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Opens per-unit sessions to one meter gateway.
#[async_trait::async_trait]
pub trait MeterSource: Send + Sync {
    /// Human-readable endpoint, used in logs and as the stored source address.
    fn address(&self) -> &str;

    async fn connect(&self, unit_id: u8) -> Result<Box<dyn RegisterReader>, TransportError>;
}

/// An open session to one unit.
#[async_trait::async_trait]
pub trait RegisterReader: Send {
    /// Reads `count` holding registers starting at the 0-based `address`.
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError>;

    async fn disconnect(&mut self);
}

#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, document: &TelemetryDocument) -> Result<(), PipelineError>;
}
