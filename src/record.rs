//! Encode and decode miniSEED v2 data records.
//!
//! A record is a fixed-length block: 48-byte fixed header, one
//! Blockette 1000, then the FLOAT32 sample payload padded with zeros to
//! the record length. All multi-byte fields are big endian.

use byteorder::{BigEndian, WriteBytesExt};
use chrono::prelude::*;
use chrono::{Duration, Utc};
use std::fmt;
use std::io::prelude::*;

use crate::channel::ChannelIdentity;
use crate::error::ConvertError;

/// Size in bytes of the fixed header.
pub const FIXED_HEADER_SIZE: usize = 48;

/// Offset of Blockette 1000, written directly after the fixed header.
pub const BLOCKETTE1000_OFFSET: usize = 48;

/// Offset of the first sample. Header plus the 8-byte Blockette 1000.
pub const DATA_OFFSET: usize = 56;

/// Record length used unless the caller overrides it.
pub const DEFAULT_RECORD_LENGTH: u16 = 512;

/// Blockette 1000 code for IEEE 32-bit float samples.
pub const ENCODING_FLOAT32: u8 = 4;

/// Payload placeholder for a missing sample. Deliberately a different
/// constant than the IAGA2002 text sentinel; the two conventions are
/// bridged only at encode/decode time.
pub const FILL_VALUE: f32 = 1.0e30;

/// Sequence numbers are six ASCII digits.
pub const MAX_SEQUENCE: u32 = 999_999;

/// How many samples fit in one record of the given length.
pub fn samples_per_record(record_length: u16) -> usize {
    (record_length as usize).saturating_sub(DATA_OFFSET) / 4
}

/// One miniSEED v2 record for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub sequence_number: u32,
    pub quality: char,
    pub identity: ChannelIdentity,
    pub start_time: DateTime<Utc>,
    pub sample_rate: f64,
    pub record_length: u16,
    /// Raw payload values; missing samples hold [`FILL_VALUE`].
    pub samples: Vec<f32>,
}

impl DataRecord {
    /// Spacing between successive samples.
    pub fn interval(&self) -> Duration {
        Duration::milliseconds((1000.0 / self.sample_rate).round() as i64)
    }

    /// Timestamp of sample `index` within this record.
    pub fn sample_time(&self, index: usize) -> DateTime<Utc> {
        self.start_time + self.interval() * index as i32
    }

    /// Payload values with the fill convention mapped back to missing.
    pub fn values(&self) -> Vec<Option<f32>> {
        self.samples
            .iter()
            .map(|&v| if v == FILL_VALUE { None } else { Some(v) })
            .collect()
    }

    /// Serialize to exactly `record_length` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ConvertError> {
        let rec_len = self.record_length as usize;
        if !self.record_length.is_power_of_two() || rec_len < DATA_OFFSET + 4 {
            return Err(ConvertError::Configuration(format!(
                "record length {} cannot hold a header and one sample",
                self.record_length
            )));
        }
        if self.sequence_number > MAX_SEQUENCE {
            return Err(ConvertError::Configuration(format!(
                "sequence number {} exceeds the six-digit field",
                self.sequence_number
            )));
        }
        if DATA_OFFSET + self.samples.len() * 4 > rec_len {
            return Err(ConvertError::Configuration(format!(
                "{} samples exceed a {}-byte record",
                self.samples.len(),
                rec_len
            )));
        }
        let rec_len_power = self.record_length.ilog2() as u8;
        let (factor, multiplier) = decompose_sample_rate(self.sample_rate)?;
        let btime = encode_btime(&self.start_time);

        let mut buf: Vec<u8> = Vec::with_capacity(rec_len);
        buf.write_all(format!("{:06}", self.sequence_number).as_bytes())?;
        buf.push(self.quality as u8);
        buf.push(b' ');
        write_padded(&mut buf, &self.identity.station, 5);
        write_padded(&mut buf, &self.identity.location, 2);
        write_padded(&mut buf, &self.identity.channel, 3);
        write_padded(&mut buf, &self.identity.network, 2);
        buf.write_all(&btime)?;
        buf.write_u16::<BigEndian>(self.samples.len() as u16)?;
        buf.write_i16::<BigEndian>(factor)?;
        buf.write_i16::<BigEndian>(multiplier)?;
        // activity, I/O and data-quality flags
        buf.write_all(&[0, 0, 0])?;
        // one blockette follows
        buf.push(1);
        // time correction
        buf.write_i32::<BigEndian>(0)?;
        buf.write_u16::<BigEndian>(DATA_OFFSET as u16)?;
        buf.write_u16::<BigEndian>(BLOCKETTE1000_OFFSET as u16)?;

        // Blockette 1000: type, next (none), encoding, word order, length power
        buf.write_u16::<BigEndian>(1000)?;
        buf.write_u16::<BigEndian>(0)?;
        buf.push(ENCODING_FLOAT32);
        buf.push(1);
        buf.push(rec_len_power);
        buf.push(0);

        for &v in &self.samples {
            buf.write_f32::<BigEndian>(v)?;
        }
        buf.resize(rec_len, 0);
        Ok(buf)
    }

    /// Parse one record from raw bytes.
    pub fn decode(data: &[u8]) -> Result<DataRecord, ConvertError> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(ConvertError::RecordTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let sequence_number = ascii_field(&data[0..6], "sequence number")?
            .parse::<u32>()
            .map_err(|_| ConvertError::BadHeaderField("sequence number"))?;
        let quality = data[6] as char;
        let station = ascii_field(&data[8..13], "station")?;
        let location = ascii_field(&data[13..15], "location")?;
        let channel = ascii_field(&data[15..18], "channel")?;
        let network = ascii_field(&data[18..20], "network")?;

        let start_time = decode_btime(&data[20..30])?;
        let num_samples = u16::from_be_bytes([data[30], data[31]]) as usize;
        let factor = i16::from_be_bytes([data[32], data[33]]);
        let multiplier = i16::from_be_bytes([data[34], data[35]]);
        let sample_rate = compute_sample_rate(factor, multiplier);

        let data_offset = u16::from_be_bytes([data[44], data[45]]) as usize;
        let first_blockette = u16::from_be_bytes([data[46], data[47]]) as usize;
        let (encoding, word_order, rec_len_power) = find_blockette_1000(data, first_blockette)?;
        if encoding != ENCODING_FLOAT32 {
            return Err(ConvertError::UnsupportedEncoding(encoding));
        }
        let record_length = 1u16 << rec_len_power;

        let needed = data_offset + num_samples * 4;
        if data.len() < needed {
            return Err(ConvertError::RecordTooShort {
                expected: needed,
                actual: data.len(),
            });
        }
        let mut samples = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let off = data_offset + i * 4;
            let bytes = [data[off], data[off + 1], data[off + 2], data[off + 3]];
            samples.push(if word_order == 1 {
                f32::from_be_bytes(bytes)
            } else {
                f32::from_le_bytes(bytes)
            });
        }

        Ok(DataRecord {
            sequence_number,
            quality,
            identity: ChannelIdentity {
                network,
                station,
                location,
                channel,
            },
            start_time,
            sample_rate,
            record_length,
            samples,
        })
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:06} {} | {} | {} Hz | {} samples",
            self.sequence_number,
            self.identity,
            self.start_time.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.sample_rate,
            self.samples.len()
        )
    }
}

fn ascii_field(bytes: &[u8], name: &'static str) -> Result<String, ConvertError> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(_) => Err(ConvertError::BadHeaderField(name)),
    }
}

fn write_padded(buf: &mut Vec<u8>, field: &str, width: usize) {
    let bytes = field.as_bytes();
    for i in 0..width {
        buf.push(if i < bytes.len() { bytes[i] } else { b' ' });
    }
}

/// BTIME: year, day-of-year, h, m, s, unused, 0.0001s fraction.
fn encode_btime(time: &DateTime<Utc>) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0..2].copy_from_slice(&(time.year() as u16).to_be_bytes());
    out[2..4].copy_from_slice(&(time.ordinal() as u16).to_be_bytes());
    out[4] = time.hour() as u8;
    out[5] = time.minute() as u8;
    out[6] = time.second() as u8;
    out[7] = 0;
    let fract = (time.timestamp_subsec_millis() * 10) as u16;
    out[8..10].copy_from_slice(&fract.to_be_bytes());
    out
}

fn decode_btime(bytes: &[u8]) -> Result<DateTime<Utc>, ConvertError> {
    let year = u16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let day = u16::from_be_bytes([bytes[2], bytes[3]]) as u32;
    let fract = u16::from_be_bytes([bytes[8], bytes[9]]) as u32;
    let date = NaiveDate::from_yo_opt(year, day)
        .ok_or_else(|| ConvertError::BadRecordTime(format!("year {year} day {day}")))?;
    let time = NaiveTime::from_hms_milli_opt(
        bytes[4] as u32,
        bytes[5] as u32,
        bytes[6] as u32,
        fract / 10,
    )
    .ok_or_else(|| {
        ConvertError::BadRecordTime(format!("{:02}:{:02}:{:02}", bytes[4], bytes[5], bytes[6]))
    })?;
    Ok(date.and_time(time).and_utc())
}

/// Decompose a sample rate in Hz into the SEED factor/multiplier pair.
fn decompose_sample_rate(rate: f64) -> Result<(i16, i16), ConvertError> {
    if rate <= 0.0 {
        return Err(ConvertError::BadSampleRate(rate));
    }
    if rate >= 1.0 {
        let f = rate.round();
        if f > i16::MAX as f64 {
            return Err(ConvertError::BadSampleRate(rate));
        }
        Ok((f as i16, 1))
    } else {
        let period = (1.0 / rate).round();
        if period > i16::MAX as f64 {
            return Err(ConvertError::BadSampleRate(rate));
        }
        Ok((-(period as i16), 1))
    }
}

fn compute_sample_rate(factor: i16, multiplier: i16) -> f64 {
    let f = factor as f64;
    let m = multiplier as f64;
    match (factor > 0, multiplier > 0) {
        (true, true) => f * m,
        (true, false) => -f / m,
        (false, true) => -m / f,
        (false, false) => 1.0 / (f * m),
    }
}

/// Iterator over concatenated records in a byte slice.
pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RecordReader { data, offset: 0 }
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Result<DataRecord, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.data[self.offset.min(self.data.len())..];
        if remaining.len() < FIXED_HEADER_SIZE {
            return None;
        }
        let record_length = match peek_record_length(remaining) {
            Ok(len) => len,
            Err(e) => {
                self.offset = self.data.len();
                return Some(Err(e));
            }
        };
        if remaining.len() < record_length {
            return None;
        }
        match DataRecord::decode(&remaining[..record_length]) {
            Ok(rec) => {
                self.offset += record_length;
                Some(Ok(rec))
            }
            Err(e) => {
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

fn peek_record_length(data: &[u8]) -> Result<usize, ConvertError> {
    let first_blockette = u16::from_be_bytes([data[46], data[47]]) as usize;
    let (_, _, rec_len_power) = find_blockette_1000(data, first_blockette)?;
    Ok(1usize << rec_len_power)
}

fn find_blockette_1000(data: &[u8], mut offset: usize) -> Result<(u8, u8, u8), ConvertError> {
    loop {
        if offset == 0 || offset + 8 > data.len() {
            return Err(ConvertError::MissingBlockette);
        }
        let blockette_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let next = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        if blockette_type == 1000 {
            return Ok((data[offset + 4], data[offset + 5], data[offset + 6]));
        }
        if next == 0 {
            return Err(ConvertError::MissingBlockette);
        }
        offset = next;
    }
}
