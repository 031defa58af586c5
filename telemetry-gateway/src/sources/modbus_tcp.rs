use std::{io, time::Duration};

use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::pipeline::{MeterSource, RegisterReader, TransportError};

/// Meter gateway reachable over Modbus TCP; one session per unit id.
///
/// Its address is `host:port`, so gateways sharing a host stay distinct.
pub struct ModbusTcpSource {
    host: String,
    port: u16,
    endpoint: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ModbusTcpSource {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let host = host.into();
        Self {
            endpoint: format!("{host}:{port}"),
            host,
            port,
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl MeterSource for ModbusTcpSource {
    fn address(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self, unit_id: u8) -> Result<Box<dyn RegisterReader>, TransportError> {
        let connecting = async {
            let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
                .await?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
            tcp::connect_slave(addr, Slave(unit_id)).await
        };

        let ctx = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    addr: self.endpoint.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "connect",
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })
            }
        };

        tracing::debug!(endpoint = %self.endpoint, unit_id, "modbus session opened");

        Ok(Box::new(ModbusSession {
            ctx,
            request_timeout: self.request_timeout,
        }))
    }
}

struct ModbusSession {
    ctx: Context,
    request_timeout: Duration,
}

#[async_trait::async_trait]
impl RegisterReader for ModbusSession {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let response = tokio::time::timeout(self.request_timeout, self.ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "read",
                timeout_ms: self.request_timeout.as_millis() as u64,
            })?;

        match response {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(code)) => Err(TransportError::Exception {
                address,
                code: format!("{code:?}"),
            }),
            Err(tokio_modbus::Error::Transport(e)) => Err(TransportError::Io(e)),
            Err(e) => Err(TransportError::Protocol(e.to_string())),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            tracing::debug!(error = %e, "modbus disconnect failed");
        }
    }
}
