use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("required IAGA2002 header field `{0}` is missing")]
    MissingHeaderField(&'static str),
    #[error("malformed IAGA2002 input at line {line}: {message}")]
    Format { line: usize, message: String },
    #[error("line {line} has {actual} fields but header declares {expected}")]
    FieldCount {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("non-increasing timestamp at line {line}: {timestamp}")]
    TimeOrder {
        line: usize,
        timestamp: DateTime<Utc>,
    },
    #[error("no orientation code for IAGA component `{0}`")]
    UnknownComponent(char),
    #[error("no band code for sampling interval of {0} seconds")]
    UnknownInterval(f64),
    #[error("encoder configuration: {0}")]
    Configuration(String),
    #[error("existing output for {channel} disagrees with input at {timestamp}")]
    DiffConflict {
        channel: String,
        timestamp: DateTime<Utc>,
    },
    #[error("output directory changed for {channel}: sequence was {expected}, found {found}")]
    StaleOutput {
        channel: String,
        expected: u32,
        found: u32,
    },
    #[error("record too short: expected {expected} bytes, got {actual}")]
    RecordTooShort { expected: usize, actual: usize },
    #[error("malformed record header field: {0}")]
    BadHeaderField(&'static str),
    #[error("record has no Blockette 1000")]
    MissingBlockette,
    #[error("unsupported data encoding: {0}")]
    UnsupportedEncoding(u8),
    #[error("cannot represent sample rate {0} as factor/multiplier")]
    BadSampleRate(f64),
    #[error("bad record time field: {0}")]
    BadRecordTime(String),
}
