use meter_core::domain::{ColumnType, MeasuredValue, MeterFamily, NewReading, Signal};

use crate::pipeline::{RegisterReader, TransportError};

/// Reads and decodes one signal.
pub async fn read_signal(reader: &mut dyn RegisterReader, signal: &Signal) -> Result<MeasuredValue, TransportError> {
    let count = signal.kind.word_count();
    let words = reader.read_registers(signal.address, count).await?;

    words
        .get(..usize::from(count))
        .and_then(|words| signal.kind.decode(words))
        .ok_or(TransportError::ShortResponse {
            address: signal.address,
            expected: count,
            got: words.len(),
        })
}

/// Reads every signal of `reading.family` into `reading`.
///
/// A register the meter refuses with a Modbus exception is stored as 0 and
/// counted in the returned total; any other transport failure aborts the
/// snapshot.
pub async fn read_snapshot(reader: &mut dyn RegisterReader, reading: &mut NewReading) -> Result<usize, TransportError> {
    let family: MeterFamily = reading.family;
    let mut refused = 0;

    for signal in family.signals() {
        match read_signal(reader, signal).await {
            Ok(value) => reading.push(signal.name, value),
            Err(e) if e.is_exception() => {
                tracing::warn!(
                    family = %family,
                    unit_id = reading.unit_id,
                    signal = signal.name,
                    error = %e,
                    "register refused, storing 0"
                );
                refused += 1;
                reading.push(signal.name, zero(signal));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(refused)
}

fn zero(signal: &Signal) -> MeasuredValue {
    match signal.kind.column_type() {
        ColumnType::Integer => MeasuredValue::Integer(0),
        ColumnType::Real => MeasuredValue::Real(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::FakeReader;

    #[tokio::test]
    async fn snapshot_decodes_every_signal_of_the_family() {
        let mut reader = FakeReader::default()
            .with_f32(3019, 230.5)
            .with_u64(3203, 123_456);
        let mut reading = NewReading::new(MeterFamily::Ia9mem15, "192.168.100.28", 100);

        let refused = read_snapshot(&mut reader, &mut reading).await.unwrap();

        assert_eq!(refused, 0);
        assert_eq!(reading.fields.len(), MeterFamily::Ia9mem15.signals().len());
        assert_eq!(reading.get("voltage_an"), Some(MeasuredValue::Real(230.5)));
        assert_eq!(
            reading.get("active_energy_delivered_wh"),
            Some(MeasuredValue::Integer(123_456))
        );
        assert_eq!(reading.get("current_a"), Some(MeasuredValue::Real(0.0)));
    }

    #[tokio::test]
    async fn refused_registers_are_stored_as_zero() {
        let mut reader = FakeReader::default()
            .with_f32(3019, 231.0)
            .with_exception(3099);
        let mut reading = NewReading::new(MeterFamily::Ia9mem15, "192.168.100.28", 100);

        let refused = read_snapshot(&mut reader, &mut reading).await.unwrap();

        assert_eq!(refused, 1);
        assert_eq!(reading.get("internal_temperature"), Some(MeasuredValue::Real(0.0)));
        assert_eq!(reading.get("voltage_an"), Some(MeasuredValue::Real(231.0)));
    }

    #[tokio::test]
    async fn transport_failures_abort_the_snapshot() {
        let mut reader = FakeReader::default().failing_after(2);
        let mut reading = NewReading::new(MeterFamily::Ia9mem15, "192.168.100.28", 100);

        let err = read_snapshot(&mut reader, &mut reading).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn short_responses_are_rejected() {
        let mut reader = FakeReader::default().truncating();
        let signal = MeterFamily::Ia9mem15.signal("voltage_an").unwrap();

        let err = read_signal(&mut reader, signal).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortResponse { address: 3019, expected: 2, got: 1 }
        ));
    }
}
