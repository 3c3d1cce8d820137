//! Convert IAGA2002 geomagnetic observatory files to miniSEED v2.
//!
//! See the IAGA2002 format description at
//! <https://www.ngdc.noaa.gov/IAGA/vdat/IAGA2002/iaga2002format.html>
//! and the SEED manual at <https://www.fdsn.org/pdf/SEEDManual_V2.4.pdf>.
//!
//! Two conversion modes are provided: [`convert_direct`] writes all
//! channels of one input file into a single `.mseed` file, and
//! [`convert_incremental`] appends only the not-yet-persisted suffix of
//! each channel into an MSCAN-style archive directory.

mod archive;
mod channel;
mod convert;
mod encoder;
mod error;
mod iaga;
mod record;

pub use self::archive::{
    commit_update, plan_update, scan_channel, update_channel, AppendStats, ChannelCatalog,
    UpdatePlan,
};
pub use self::channel::{band_code, orientation_code, ChannelIdentity, DEFAULT_NETWORK};
pub use self::convert::{
    convert_direct, convert_incremental, default_output_path, ChannelOutcome, ConvertConfig,
    DirectSummary, UpdateReport,
};
pub use self::encoder::{encode_stream, EncodedStream};
pub use self::error::ConvertError;
pub use self::iaga::{
    parse_iaga2002, read_iaga2002, IagaFile, ObservatoryHeader, SampleRow, MISSING_SENTINEL,
};
pub use self::record::{
    samples_per_record, DataRecord, RecordReader, DATA_OFFSET, DEFAULT_RECORD_LENGTH, FILL_VALUE,
    FIXED_HEADER_SIZE, MAX_SEQUENCE,
};
