//! In-memory meters for tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use crate::pipeline::{MeterSource, RegisterReader, TransportError};

#[derive(Debug, Clone, Default)]
pub struct FakeReader {
    registers: HashMap<u16, u16>,
    exceptions: HashSet<u16>,
    fail_after: Option<usize>,
    truncate: bool,
    reads: usize,
}

impl FakeReader {
    pub fn with_f32(mut self, address: u16, value: f32) -> Self {
        self.set_f32(address, value);
        self
    }

    pub fn with_u64(mut self, address: u16, value: u64) -> Self {
        self.set_u64(address, value);
        self
    }

    pub fn with_exception(mut self, address: u16) -> Self {
        self.exceptions.insert(address);
        self
    }

    /// Succeeds for `reads` requests, then fails with an I/O error.
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    pub fn truncating(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn set_f32(&mut self, address: u16, value: f32) {
        let bits = value.to_bits();
        self.registers.insert(address, (bits >> 16) as u16);
        self.registers.insert(address + 1, bits as u16);
    }

    pub fn set_u64(&mut self, address: u16, value: u64) {
        for i in 0..4u16 {
            self.registers.insert(address + i, (value >> (48 - 16 * u32::from(i))) as u16);
        }
    }
}

#[async_trait::async_trait]
impl RegisterReader for FakeReader {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        self.reads += 1;
        if self.fail_after.is_some_and(|limit| self.reads > limit) {
            return Err(TransportError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")));
        }
        if self.exceptions.contains(&address) {
            return Err(TransportError::Exception {
                address,
                code: "IllegalDataAddress".to_string(),
            });
        }

        let mut words: Vec<u16> = (0..count)
            .map(|i| self.registers.get(&(address + i)).copied().unwrap_or(0))
            .collect();
        if self.truncate {
            words.truncate(1);
        }
        Ok(words)
    }

    async fn disconnect(&mut self) {}
}

/// A gateway hosting several fake units. Units not registered refuse to connect.
#[derive(Clone, Default)]
pub struct FakeSource {
    address: String,
    units: Arc<Mutex<HashMap<u8, FakeReader>>>,
}

impl FakeSource {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            units: Arc::default(),
        }
    }

    pub fn with_unit(self, unit_id: u8, reader: FakeReader) -> Self {
        self.units.lock().unwrap().insert(unit_id, reader);
        self
    }

    pub fn set_u64(&self, unit_id: u8, address: u16, value: u64) {
        if let Some(reader) = self.units.lock().unwrap().get_mut(&unit_id) {
            reader.set_u64(address, value);
        }
    }

    pub fn remove_unit(&self, unit_id: u8) {
        self.units.lock().unwrap().remove(&unit_id);
    }
}

#[async_trait::async_trait]
impl MeterSource for FakeSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, unit_id: u8) -> Result<Box<dyn RegisterReader>, TransportError> {
        let reader = self.units.lock().unwrap().get(&unit_id).cloned();
        match reader {
            Some(reader) => Ok(Box::new(reader)),
            None => Err(TransportError::Connect {
                addr: self.address.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}
