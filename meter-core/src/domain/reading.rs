use super::signal::MeterFamily;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasuredValue {
    Integer(i64),
    Real(f64),
}

impl MeasuredValue {
    /// NaN reals are stored as 0 so a glitching register cannot poison the row.
    pub fn sanitized(self) -> Self {
        match self {
            Self::Real(v) if v.is_nan() => Self::Real(0.0),
            other => other,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::Real(v) => v,
        }
    }

    /// Integer view used for cumulative counters; negative or real values clamp at 0.
    pub fn as_counter(self) -> u64 {
        match self {
            Self::Integer(v) => u64::try_from(v).unwrap_or(0),
            Self::Real(v) if v.is_finite() && v > 0.0 => v as u64,
            Self::Real(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub value: MeasuredValue,
}

impl Field {
    pub fn new(name: &'static str, value: MeasuredValue) -> Self {
        Self { name, value }
    }
}

/// A decoded snapshot awaiting insertion; the store assigns `id` and `ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub family: MeterFamily,
    pub source_address: String,
    pub unit_id: i64,
    pub fields: Vec<Field>,
}

impl NewReading {
    pub fn new(family: MeterFamily, source_address: impl Into<String>, unit_id: i64) -> Self {
        Self {
            family,
            source_address: source_address.into(),
            unit_id,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &'static str, value: MeasuredValue) -> Self {
        self.push(name, value);
        self
    }

    /// Sets `name`, replacing any earlier value for the same field.
    pub fn push(&mut self, name: &'static str, value: MeasuredValue) {
        let value = value.sanitized();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.fields.push(Field::new(name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<MeasuredValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }
}

/// A row of the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub ts: i64,
    pub family: MeterFamily,
    pub source_address: String,
    pub unit_id: i64,
    pub fields: Vec<Field>,
    pub sent: bool,
}

impl Reading {
    pub fn get(&self, name: &str) -> Option<MeasuredValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_replaces_existing_field_and_sanitizes_nan() {
        let mut reading = NewReading::new(MeterFamily::Ia9mem15, "10.0.0.1", 100)
            .with_field("voltage_an", MeasuredValue::Real(230.0));
        reading.push("voltage_an", MeasuredValue::Real(f64::NAN));

        assert_eq!(reading.fields.len(), 1);
        assert_eq!(reading.get("voltage_an"), Some(MeasuredValue::Real(0.0)));
    }

    #[test]
    fn counter_view_clamps_negative_values() {
        assert_eq!(MeasuredValue::Integer(-5).as_counter(), 0);
        assert_eq!(MeasuredValue::Integer(1_050).as_counter(), 1_050);
        assert_eq!(MeasuredValue::Real(12.9).as_counter(), 12);
    }
}
