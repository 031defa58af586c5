pub mod decode;
pub mod energy;
pub mod reading;
pub mod signal;

pub use energy::{EnergyState, HistoryWindow, HourBucket, HourlyEnergy, HISTORY_WINDOWS};
pub use reading::{Field, MeasuredValue, NewReading, Reading};
pub use signal::{Column, ColumnType, DecodeKind, MeterFamily, Signal, ENERGY_DELTA_COLUMN};
