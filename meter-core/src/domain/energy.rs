use time::UtcOffset;

use super::signal::MeterFamily;

/// Last processed cumulative counter of one meter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyState {
    pub source_address: String,
    pub unit_id: i64,
    pub last_counter: u64,
    pub updated_at: i64,
}

/// Look-back window used to report energy consumed over the last `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub column: &'static str,
    pub seconds: i64,
}

pub const HISTORY_WINDOWS: [HistoryWindow; 5] = [
    HistoryWindow {
        column: "energy_used_1m",
        seconds: 60,
    },
    HistoryWindow {
        column: "energy_used_5m",
        seconds: 300,
    },
    HistoryWindow {
        column: "energy_used_30m",
        seconds: 1_800,
    },
    HistoryWindow {
        column: "energy_used_1h",
        seconds: 3_600,
    },
    HistoryWindow {
        column: "energy_used_2h",
        seconds: 7_200,
    },
];

/// A wall-clock hour in a fixed local offset, identified by its start in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourBucket(i64);

impl HourBucket {
    pub fn containing(ts: i64, offset: UtcOffset) -> Self {
        let shift = i64::from(offset.whole_seconds());
        Self((ts + shift).div_euclid(3_600) * 3_600 - shift)
    }

    pub fn from_start(start: i64) -> Self {
        Self(start)
    }

    pub fn start(self) -> i64 {
        self.0
    }

    pub fn previous(self) -> Self {
        Self(self.0 - 3_600)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 3_600)
    }

    /// Exclusive end of the hour.
    pub fn end(self) -> i64 {
        self.0 + 3_600
    }
}

/// Finalized energy total of one meter over one local hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyEnergy {
    pub id: i64,
    pub hour: HourBucket,
    pub family: MeterFamily,
    pub source_address: String,
    pub unit_id: i64,
    pub energy_kwh: f64,
    pub sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn bucket_truncates_to_local_hour() {
        let ts = datetime!(2024-06-01 10:42:17 +07:00).unix_timestamp();
        let bucket = HourBucket::containing(ts, offset!(+07:00));

        assert_eq!(bucket.start(), datetime!(2024-06-01 10:00:00 +07:00).unix_timestamp());
        assert_eq!(bucket.end() - bucket.start(), 3_600);
    }

    #[test]
    fn half_hour_offsets_bucket_on_local_boundaries() {
        let ts = datetime!(2024-06-01 10:15:00 +05:30).unix_timestamp();
        let bucket = HourBucket::containing(ts, offset!(+05:30));

        assert_eq!(bucket.start(), datetime!(2024-06-01 10:00:00 +05:30).unix_timestamp());
    }

    #[test]
    fn bucket_start_is_stable_inside_the_hour() {
        let offset = offset!(UTC);
        let start = datetime!(2024-06-01 00:00:00 UTC).unix_timestamp();
        let first = HourBucket::containing(start, offset);
        let last = HourBucket::containing(start + 3_599, offset);
        let next = HourBucket::containing(start + 3_600, offset);

        assert_eq!(first, last);
        assert_ne!(first, next);
    }
}
