//! Incremental append into an MSCAN-style archive directory.
//!
//! Layout: `<dir>/<NET>/<STA>/NET.STA.LOC.CHAN.YEAR.DOY.TIMESTAMP`,
//! where TIMESTAMP is the epoch second at write time. The directory is
//! the single source of truth: prior state is recomputed from the
//! record files on every run and discarded afterwards.

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::channel::ChannelIdentity;
use crate::encoder::encode_stream;
use crate::error::ConvertError;
use crate::record::{DataRecord, RecordReader};

/// Prior output state for one channel, derived from the archive files.
#[derive(Debug, Default)]
pub struct ChannelCatalog {
    /// Timestamp of the last persisted sample, if any output exists.
    pub last_time: Option<DateTime<Utc>>,
    /// Highest sequence number on disk, 0 when no output exists.
    pub last_sequence: u32,
    /// Persisted values keyed by timestamp (milliseconds since epoch);
    /// records from later files win on duplicates.
    values: BTreeMap<i64, Option<f32>>,
}

impl ChannelCatalog {
    /// The persisted value at `time`, or `None` when the archive holds
    /// no sample there.
    pub fn value_at(&self, time: DateTime<Utc>) -> Option<Option<f32>> {
        self.values.get(&time.timestamp_millis()).copied()
    }
}

/// Outcome of one channel's append.
#[derive(Debug)]
pub struct AppendStats {
    pub samples_appended: usize,
    pub records_written: usize,
    /// File created by this append, `None` when nothing was new.
    pub path: Option<PathBuf>,
    pub last_sequence: u32,
}

fn station_dir(directory: &Path, identity: &ChannelIdentity) -> PathBuf {
    directory.join(&identity.network).join(&identity.station)
}

fn file_pattern(identity: &ChannelIdentity) -> Regex {
    let pattern = format!(
        r"^{}\.{}\.{}\.{}\.\d{{4}}\.\d{{3}}\.\d+$",
        regex::escape(&identity.network),
        regex::escape(&identity.station),
        regex::escape(&identity.location),
        regex::escape(&identity.channel),
    );
    Regex::new(&pattern).expect("escaped channel pattern is a valid regex")
}

/// All archive files for a channel, oldest submit time first.
fn channel_files(directory: &Path, identity: &ChannelIdentity) -> Result<Vec<PathBuf>, ConvertError> {
    let dir = station_dir(directory, identity);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = file_pattern(identity);
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if pattern.is_match(name) {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Read every archive file of the channel and rebuild its catalog.
pub fn scan_channel(
    directory: &Path,
    identity: &ChannelIdentity,
) -> Result<ChannelCatalog, ConvertError> {
    let mut catalog = ChannelCatalog::default();
    for path in channel_files(directory, identity)? {
        debug!("reading archive file {}", path.display());
        let bytes = fs::read(&path)?;
        for record in RecordReader::new(&bytes) {
            let record = record?;
            if record.identity != *identity {
                continue;
            }
            catalog.last_sequence = catalog.last_sequence.max(record.sequence_number);
            for (i, value) in record.values().into_iter().enumerate() {
                let time = record.sample_time(i);
                catalog.values.insert(time.timestamp_millis(), value);
                if catalog.last_time.map(|t| time > t).unwrap_or(true) {
                    catalog.last_time = Some(time);
                }
            }
        }
    }
    Ok(catalog)
}

/// Re-derive only the highest sequence number on disk.
fn last_sequence_on_disk(
    directory: &Path,
    identity: &ChannelIdentity,
) -> Result<u32, ConvertError> {
    let mut last = 0;
    for path in channel_files(directory, identity)? {
        let bytes = fs::read(&path)?;
        for record in RecordReader::new(&bytes) {
            let record = record?;
            if record.identity == *identity {
                last = last.max(record.sequence_number);
            }
        }
    }
    Ok(last)
}

/// An append computed from the archive state but not yet written.
/// Produced by [`plan_update`], consumed by [`commit_update`].
#[derive(Debug)]
pub struct UpdatePlan {
    identity: ChannelIdentity,
    /// Highest on-disk sequence number observed while planning.
    expected_sequence: u32,
    samples: usize,
    records: Vec<DataRecord>,
    last_sequence: u32,
}

impl UpdatePlan {
    /// True when the archive already holds every sample of the input.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Compute the suffix of `stream` not yet on disk and encode it.
///
/// Samples at or before the last persisted timestamp are compared
/// against the stored values; any disagreement is a `DiffConflict` and
/// no plan is produced. Nothing is written until the plan is committed.
pub fn plan_update(
    directory: &Path,
    identity: &ChannelIdentity,
    stream: &[(DateTime<Utc>, Option<f32>)],
    interval_seconds: f64,
    record_length: u16,
) -> Result<UpdatePlan, ConvertError> {
    let catalog = scan_channel(directory, identity)?;

    let suffix: Vec<(DateTime<Utc>, Option<f32>)> = match catalog.last_time {
        None => stream.to_vec(),
        Some(last) => {
            for &(time, value) in stream.iter().filter(|(t, _)| *t <= last) {
                match catalog.value_at(time) {
                    Some(stored) if stored != value => {
                        return Err(ConvertError::DiffConflict {
                            channel: identity.to_string(),
                            timestamp: time,
                        });
                    }
                    // A timestamp the archive has no sample for sits in
                    // a persisted gap; records are append-only, so it
                    // cannot be backfilled.
                    _ => {}
                }
            }
            stream.iter().filter(|(t, _)| *t > last).copied().collect()
        }
    };

    if suffix.is_empty() {
        return Ok(UpdatePlan {
            identity: identity.clone(),
            expected_sequence: catalog.last_sequence,
            samples: 0,
            records: Vec::new(),
            last_sequence: catalog.last_sequence,
        });
    }

    let start_sequence = catalog.last_sequence + 1;
    let encoded = encode_stream(identity, &suffix, interval_seconds, start_sequence, record_length)?;

    Ok(UpdatePlan {
        identity: identity.clone(),
        expected_sequence: catalog.last_sequence,
        samples: suffix.len(),
        records: encoded.records,
        last_sequence: encoded.next_sequence - 1,
    })
}

/// Write a planned append as one new archive file.
///
/// Planning and committing are not atomic; the highest on-disk
/// sequence number is re-checked here and a concurrent change fails
/// with `StaleOutput` instead of corrupting the sequence chain.
pub fn commit_update(directory: &Path, plan: UpdatePlan) -> Result<AppendStats, ConvertError> {
    if plan.records.is_empty() {
        info!("{}: no new samples", plan.identity);
        return Ok(AppendStats {
            samples_appended: 0,
            records_written: 0,
            path: None,
            last_sequence: plan.last_sequence,
        });
    }

    let found = last_sequence_on_disk(directory, &plan.identity)?;
    if found != plan.expected_sequence {
        return Err(ConvertError::StaleOutput {
            channel: plan.identity.to_string(),
            expected: plan.expected_sequence,
            found,
        });
    }

    let dir = station_dir(directory, &plan.identity);
    fs::create_dir_all(&dir)?;
    let path = archive_path(&dir, &plan.identity, plan.records[0].start_time);
    info!(
        "{}: appending {} samples in {} records to {}",
        plan.identity,
        plan.samples,
        plan.records.len(),
        path.display()
    );
    let file = fs::File::create(&path)?;
    let mut writer = BufWriter::new(file);
    for record in &plan.records {
        writer.write_all(&record.encode()?)?;
    }
    writer.flush()?;

    Ok(AppendStats {
        samples_appended: plan.samples,
        records_written: plan.records.len(),
        path: Some(path),
        last_sequence: plan.last_sequence,
    })
}

/// Append to the archive the suffix of `stream` not yet on disk.
/// Plans and commits in one step; see [`plan_update`] and
/// [`commit_update`].
pub fn update_channel(
    directory: &Path,
    identity: &ChannelIdentity,
    stream: &[(DateTime<Utc>, Option<f32>)],
    interval_seconds: f64,
    record_length: u16,
) -> Result<AppendStats, ConvertError> {
    let plan = plan_update(directory, identity, stream, interval_seconds, record_length)?;
    commit_update(directory, plan)
}

/// `NET.STA.LOC.CHAN.YEAR.DOY.TIMESTAMP`, nudging the submit timestamp
/// forward if two appends land within the same second.
fn archive_path(dir: &Path, identity: &ChannelIdentity, start: DateTime<Utc>) -> PathBuf {
    let mut stamp = Utc::now().timestamp();
    loop {
        let name = format!(
            "{}.{}.{}.{}.{:04}.{:03}.{}",
            identity.network,
            identity.station,
            identity.location,
            identity.channel,
            start.year(),
            start.ordinal(),
            stamp
        );
        let path = dir.join(name);
        if !path.exists() {
            return path;
        }
        stamp += 1;
    }
}
