//! Pack a channel stream into miniSEED records.
//!
//! Records are cut at the record capacity and at any timestamp
//! discontinuity, so that every emitted record is internally equally
//! spaced. Missing samples become the payload fill value, keeping their
//! position in time.

use chrono::{DateTime, Duration, Utc};

use crate::channel::ChannelIdentity;
use crate::error::ConvertError;
use crate::record::{samples_per_record, DataRecord, FILL_VALUE, MAX_SEQUENCE};

/// Quality indicator written into every record.
pub const QUALITY: char = 'D';

/// The records produced for one channel plus the sequence number the
/// next append should start from.
#[derive(Debug)]
pub struct EncodedStream {
    pub records: Vec<DataRecord>,
    pub next_sequence: u32,
}

/// Encode an ordered `(timestamp, value)` stream for one channel.
///
/// `start_sequence` seeds the per-record sequence numbers; callers
/// appending to existing output pass the successor of the last number
/// on disk. Fails with a `Configuration` error when the record length
/// cannot hold a single sample or the stream outruns the six-digit
/// sequence space.
pub fn encode_stream(
    identity: &ChannelIdentity,
    stream: &[(DateTime<Utc>, Option<f32>)],
    interval_seconds: f64,
    start_sequence: u32,
    record_length: u16,
) -> Result<EncodedStream, ConvertError> {
    let capacity = samples_per_record(record_length);
    if capacity == 0 || !record_length.is_power_of_two() {
        return Err(ConvertError::Configuration(format!(
            "record length {record_length} cannot hold a header and one sample"
        )));
    }
    if start_sequence == 0 || start_sequence > MAX_SEQUENCE {
        return Err(ConvertError::Configuration(format!(
            "starting sequence number {start_sequence} outside 1..={MAX_SEQUENCE}"
        )));
    }
    let interval = Duration::milliseconds((interval_seconds * 1000.0).round() as i64);
    let sample_rate = 1.0 / interval_seconds;

    let mut records = Vec::new();
    let mut sequence = start_sequence;
    let mut batch: Vec<f32> = Vec::with_capacity(capacity);
    let mut batch_start: Option<DateTime<Utc>> = None;
    let mut expected: Option<DateTime<Utc>> = None;

    for &(time, value) in stream {
        let boundary = batch.len() >= capacity || expected.map(|e| time != e) == Some(true);
        if boundary {
            records.push(make_record(
                identity,
                sequence,
                batch_start.take().unwrap_or(time),
                sample_rate,
                record_length,
                std::mem::take(&mut batch),
            )?);
            sequence += 1;
        }
        if batch.is_empty() {
            batch_start = Some(time);
        }
        batch.push(value.unwrap_or(FILL_VALUE));
        expected = Some(time + interval);
    }
    if !batch.is_empty() {
        records.push(make_record(
            identity,
            sequence,
            batch_start.unwrap(),
            sample_rate,
            record_length,
            batch,
        )?);
        sequence += 1;
    }

    Ok(EncodedStream {
        records,
        next_sequence: sequence,
    })
}

fn make_record(
    identity: &ChannelIdentity,
    sequence: u32,
    start_time: DateTime<Utc>,
    sample_rate: f64,
    record_length: u16,
    samples: Vec<f32>,
) -> Result<DataRecord, ConvertError> {
    if sequence > MAX_SEQUENCE {
        return Err(ConvertError::Configuration(String::from(
            "stream exhausts the six-digit sequence number space",
        )));
    }
    Ok(DataRecord {
        sequence_number: sequence,
        quality: QUALITY,
        identity: identity.clone(),
        start_time,
        sample_rate,
        record_length,
        samples,
    })
}
