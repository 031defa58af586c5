pub mod modbus_tcp;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use modbus_tcp::ModbusTcpSource;
pub use snapshot::{read_signal, read_snapshot};
