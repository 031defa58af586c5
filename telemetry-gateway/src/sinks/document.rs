use meter_core::domain::{HourlyEnergy, MeasuredValue, Reading};
use serde_json::{Map, Number, Value};

/// Key under which an hourly energy total is published.
pub const HOURLY_ENERGY_KEY: &str = "hourly_energy_kwh";

/// One telemetry message: a set of namespaced values, optionally timestamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryDocument {
    /// Epoch milliseconds; `None` lets the receiver stamp the message.
    pub ts_ms: Option<i64>,
    pub values: Map<String, Value>,
}

/// `<field>_<family tag>_<unit id>`, unique across families and units on one device.
pub fn telemetry_key(field: &str, family_tag: &str, unit_id: i64) -> String {
    format!("{field}_{family_tag}_{unit_id}")
}

impl TelemetryDocument {
    pub fn from_reading(reading: &Reading) -> Self {
        let tag = reading.family.tag();
        let values = reading
            .fields
            .iter()
            .map(|f| (telemetry_key(f.name, tag, reading.unit_id), json_value(f.value)))
            .collect();

        Self {
            ts_ms: Some(reading.ts * 1_000),
            values,
        }
    }

    pub fn from_hourly(hourly: &HourlyEnergy) -> Self {
        let mut values = Map::new();
        values.insert(
            telemetry_key(HOURLY_ENERGY_KEY, hourly.family.tag(), hourly.unit_id),
            json_value(MeasuredValue::Real(hourly.energy_kwh)),
        );

        Self {
            ts_ms: Some(hourly.hour.start() * 1_000),
            values,
        }
    }

    /// `{"ts": <ms>, "values": {..}}` when timestamped, otherwise the bare values.
    pub fn to_json(&self) -> Value {
        match self.ts_ms {
            Some(ts) => serde_json::json!({ "ts": ts, "values": self.values }),
            None => Value::Object(self.values.clone()),
        }
    }
}

fn json_value(value: MeasuredValue) -> Value {
    match value.sanitized() {
        MeasuredValue::Integer(v) => Value::from(v),
        MeasuredValue::Real(v) => Number::from_f64(v).map_or(Value::from(0), Value::Number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_core::domain::{Field, HourBucket, MeterFamily};

    fn reading() -> Reading {
        Reading {
            id: 7,
            ts: 1_717_200_000,
            family: MeterFamily::Ia9mem15,
            source_address: "192.168.100.28".to_string(),
            unit_id: 100,
            fields: vec![
                Field::new("voltage_an", MeasuredValue::Real(230.5)),
                Field::new("active_energy_delivered_wh", MeasuredValue::Integer(123_456)),
                Field::new("current_a", MeasuredValue::Real(f64::INFINITY)),
            ],
            sent: false,
        }
    }

    #[test]
    fn reading_keys_are_namespaced_by_family_and_unit() {
        let doc = TelemetryDocument::from_reading(&reading());

        assert_eq!(doc.ts_ms, Some(1_717_200_000_000));
        assert_eq!(doc.values["voltage_an_ia9mem15_100"], serde_json::json!(230.5));
        assert_eq!(
            doc.values["active_energy_delivered_wh_ia9mem15_100"],
            serde_json::json!(123_456)
        );
        // Non-finite floats cannot be encoded as JSON numbers.
        assert_eq!(doc.values["current_a_ia9mem15_100"], serde_json::json!(0));
    }

    #[test]
    fn timestamped_documents_wrap_values() {
        let doc = TelemetryDocument::from_reading(&reading());
        let json = doc.to_json();

        assert_eq!(json["ts"], serde_json::json!(1_717_200_000_000i64));
        assert_eq!(json["values"]["voltage_an_ia9mem15_100"], serde_json::json!(230.5));
    }

    #[test]
    fn untimestamped_documents_are_flat() {
        let mut doc = TelemetryDocument::default();
        doc.values.insert("frequency_ipm2xxx_1".to_string(), serde_json::json!(50.0));

        assert_eq!(doc.to_json(), serde_json::json!({ "frequency_ipm2xxx_1": 50.0 }));
    }

    #[test]
    fn hourly_documents_carry_the_hour_start() {
        let hourly = HourlyEnergy {
            id: 1,
            hour: HourBucket::from_start(1_717_200_000),
            family: MeterFamily::Ipm2xxx,
            source_address: "192.168.100.28".to_string(),
            unit_id: 1,
            energy_kwh: 2.5,
            sent: false,
        };

        let doc = TelemetryDocument::from_hourly(&hourly);
        assert_eq!(
            doc.to_json(),
            serde_json::json!({
                "ts": 1_717_200_000_000i64,
                "values": { "hourly_energy_kwh_ipm2xxx_1": 2.5 }
            })
        );
    }
}
