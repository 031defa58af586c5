//! Register map for the supported meter families.
//!
//! Each family is described by a static table of signals (name, holding
//! register address, decoding rule) instead of one accessor per register.
//! Addresses are 0-based, as sent on the wire.

use super::decode::{decode_f32, decode_u16, decode_u32, decode_u64};
use super::energy::HISTORY_WINDOWS;
use super::reading::MeasuredValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    U16,
    U32,
    F32,
    U64,
}

impl DecodeKind {
    pub fn word_count(self) -> u16 {
        match self {
            Self::U16 => 1,
            Self::U32 | Self::F32 => 2,
            Self::U64 => 4,
        }
    }

    /// Returns `None` only when `words` does not hold exactly `word_count()` words.
    pub fn decode(self, words: &[u16]) -> Option<MeasuredValue> {
        let value = match self {
            Self::U16 => MeasuredValue::Integer(i64::from(decode_u16(words.try_into().ok()?))),
            Self::U32 => MeasuredValue::Integer(i64::from(decode_u32(words.try_into().ok()?))),
            Self::F32 => MeasuredValue::Real(f64::from(decode_f32(words.try_into().ok()?))),
            Self::U64 => {
                let raw = decode_u64(words.try_into().ok()?);
                MeasuredValue::Integer(i64::try_from(raw).unwrap_or(i64::MAX))
            }
        };
        Some(value)
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            Self::F32 => ColumnType::Real,
            Self::U16 | Self::U32 | Self::U64 => ColumnType::Integer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub name: &'static str,
    pub address: u16,
    pub kind: DecodeKind,
}

const fn sig(name: &'static str, address: u16, kind: DecodeKind) -> Signal {
    Signal { name, address, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
}

/// Energy delta attributed to the cycle that produced the reading.
pub const ENERGY_DELTA_COLUMN: &str = "energy_delta_kwh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MeterFamily {
    /// Schneider iA9 MEM15 single-phase energy meter.
    Ia9mem15,
    /// Schneider iPM2xxx three-phase power meter.
    Ipm2xxx,
}

use DecodeKind::{F32, U16, U64};

static IA9MEM15_SIGNALS: &[Signal] = &[
    sig("current_a", 2999, F32),
    sig("voltage_an", 3019, F32),
    sig("active_power_a", 3053, F32),
    sig("active_power_total", 3059, F32),
    sig("apparent_power_total", 3069, F32),
    sig("power_factor_total", 3079, F32),
    sig("internal_temperature", 3099, F32),
    sig("active_energy_delivered_wh", 3203, U64),
];

static IPM2XXX_SIGNALS: &[Signal] = &[
    sig("active_energy_delivered_kwh", 2699, F32),
    sig("active_energy_received_kwh", 2701, F32),
    sig("active_energy_delivered_plus_received_kwh", 2703, F32),
    sig("active_energy_delivered_minus_received_kwh", 2705, F32),
    sig("reactive_energy_delivered_kvarh", 2707, F32),
    sig("reactive_energy_received_kvarh", 2709, F32),
    sig("reactive_energy_delivered_plus_received_kvarh", 2711, F32),
    sig("reactive_energy_delivered_minus_received_kvarh", 2713, F32),
    sig("apparent_energy_delivered_kvah", 2715, F32),
    sig("apparent_energy_received_kvah", 2717, F32),
    sig("apparent_energy_delivered_plus_received_kvah", 2719, F32),
    sig("apparent_energy_delivered_minus_received_kvah", 2721, F32),
    sig("current_a", 2999, F32),
    sig("current_b", 3001, F32),
    sig("current_c", 3003, F32),
    sig("current_avg", 3009, F32),
    sig("current_unbalance_a", 3011, F32),
    sig("current_unbalance_b", 3013, F32),
    sig("current_unbalance_c", 3015, F32),
    sig("current_unbalance_worst", 3017, F32),
    sig("voltage_ab", 3019, F32),
    sig("voltage_bc", 3021, F32),
    sig("voltage_ca", 3023, F32),
    sig("voltage_ll_avg", 3025, F32),
    sig("voltage_an", 3027, F32),
    sig("voltage_bn", 3029, F32),
    sig("voltage_cn", 3031, F32),
    sig("voltage_ln_avg", 3035, F32),
    sig("voltage_unbalance_ab", 3037, F32),
    sig("voltage_unbalance_bc", 3039, F32),
    sig("voltage_unbalance_ca", 3041, F32),
    sig("voltage_unbalance_ll_worst", 3043, F32),
    sig("voltage_unbalance_an", 3045, F32),
    sig("voltage_unbalance_bn", 3047, F32),
    sig("voltage_unbalance_cn", 3049, F32),
    sig("voltage_unbalance_ln_worst", 3051, F32),
    sig("active_power_a", 3053, F32),
    sig("active_power_b", 3055, F32),
    sig("active_power_c", 3057, F32),
    sig("active_power_total", 3059, F32),
    sig("reactive_power_a", 3061, F32),
    sig("reactive_power_b", 3063, F32),
    sig("reactive_power_c", 3065, F32),
    sig("reactive_power_total", 3067, F32),
    sig("apparent_power_a", 3069, F32),
    sig("apparent_power_b", 3071, F32),
    sig("apparent_power_c", 3073, F32),
    sig("apparent_power_total", 3075, F32),
    sig("power_factor_a", 3077, F32),
    sig("power_factor_b", 3079, F32),
    sig("power_factor_c", 3081, F32),
    sig("power_factor_total", 3083, F32),
    sig("displacement_power_factor_a", 3085, F32),
    sig("displacement_power_factor_b", 3087, F32),
    sig("displacement_power_factor_c", 3089, F32),
    sig("displacement_power_factor_total", 3091, F32),
    sig("frequency", 3109, F32),
    sig("active_energy_delivered_wh", 3203, U64),
    sig("active_energy_received_wh", 3207, U64),
    sig("active_energy_delivered_plus_received_wh", 3211, U64),
    sig("active_energy_delivered_minus_received_wh", 3215, U64),
    sig("power_demand_method", 3700, U16),
    sig("power_demand_interval_min", 3701, U16),
    sig("power_demand_subinterval_min", 3702, U16),
    sig("power_demand_elapsed_interval_s", 3703, U16),
    sig("power_demand_elapsed_subinterval_s", 3704, U16),
    sig("current_demand_method", 3710, U16),
    sig("current_demand_interval_min", 3711, U16),
    sig("current_demand_subinterval_min", 3712, U16),
    sig("current_demand_elapsed_interval_s", 3713, U16),
    sig("current_demand_elapsed_subinterval_s", 3714, U16),
];

impl MeterFamily {
    pub const ALL: [MeterFamily; 2] = [MeterFamily::Ia9mem15, MeterFamily::Ipm2xxx];

    pub fn signals(self) -> &'static [Signal] {
        match self {
            Self::Ia9mem15 => IA9MEM15_SIGNALS,
            Self::Ipm2xxx => IPM2XXX_SIGNALS,
        }
    }

    pub fn signal(self, name: &str) -> Option<&'static Signal> {
        self.signals().iter().find(|s| s.name == name)
    }

    /// Tag used in table names and to namespace telemetry keys.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ia9mem15 => "ia9mem15",
            Self::Ipm2xxx => "ipm2xxx",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Ia9mem15 => "readings_ia9mem15",
            Self::Ipm2xxx => "readings_ipm2xxx",
        }
    }

    /// Cumulative, non-resettable active energy counter in Wh.
    pub fn energy_counter(self) -> &'static str {
        "active_energy_delivered_wh"
    }

    /// Measured columns followed by the derived energy columns.
    pub fn columns(self) -> impl Iterator<Item = Column> {
        let measured = self.signals().iter().map(|s| Column {
            name: s.name,
            column_type: s.kind.column_type(),
        });
        let delta = std::iter::once(Column {
            name: ENERGY_DELTA_COLUMN,
            column_type: ColumnType::Real,
        });
        let windows = HISTORY_WINDOWS.iter().map(|w| Column {
            name: w.column,
            column_type: ColumnType::Integer,
        });
        measured.chain(delta).chain(windows)
    }

    pub fn column(self, name: &str) -> Option<Column> {
        self.columns().find(|c| c.name == name)
    }
}

impl std::fmt::Display for MeterFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
