use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use iaga2mseed::{
    convert_incremental, scan_channel, ChannelIdentity, ConvertConfig, ConvertError,
};
use tempfile::TempDir;

const HEADER: &str = "\
 Format                 IAGA-2002                                    |
 Source of Data         Natural Resources Canada                     |
 IAGA CODE              YKC                                          |
 Reported               XYZF                                         |
 Data Type              variation                                    |
DATE       TIME         DOY     YKCX      YKCY      YKCZ      YKCF   |
";

fn write_input(dir: &Path, name: &str, minutes: &[(u32, [f64; 4])]) -> PathBuf {
    let path = dir.join(name);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(HEADER.as_bytes()).unwrap();
    for (minute, values) in minutes {
        writeln!(
            file,
            "2021-04-05 00:{:02}:00.000 095  {:>10.2}{:>10.2}{:>10.2}{:>10.2}",
            minute, values[0], values[1], values[2], values[3]
        )
        .unwrap();
    }
    path
}

fn rows(range: std::ops::Range<u32>) -> Vec<(u32, [f64; 4])> {
    range
        .map(|m| {
            let base = m as f64;
            (m, [8000.0 + base, 1200.0 + base, 57000.0 + base, 57800.0 + base])
        })
        .collect()
}

fn x_identity() -> ChannelIdentity {
    ChannelIdentity {
        network: "XX".to_string(),
        station: "YKC".to_string(),
        location: "R0".to_string(),
        channel: "UFX".to_string(),
    }
}

#[test]
fn empty_directory_full_export_then_idempotent() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("mscan");
    fs::create_dir(&archive).unwrap();
    let input = write_input(work.path(), "ykc.min", &rows(0..10));
    let config = ConvertConfig::default();

    let report = convert_incremental(&input, &archive, &config).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.samples_appended(), 40);

    let catalog = scan_channel(&archive, &x_identity()).unwrap();
    assert_eq!(
        catalog.last_time,
        Some(Utc.with_ymd_and_hms(2021, 4, 5, 0, 9, 0).unwrap())
    );
    assert_eq!(catalog.last_sequence, 1);

    // re-running with identical input appends nothing
    let sizes_before = archive_bytes(&archive);
    let report = convert_incremental(&input, &archive, &config).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.samples_appended(), 0);
    assert_eq!(archive_bytes(&archive), sizes_before);
}

#[test]
fn overlapping_input_appends_only_the_suffix() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("mscan");
    fs::create_dir(&archive).unwrap();
    let config = ConvertConfig::default();

    let first = write_input(work.path(), "ykc.1", &rows(0..10));
    convert_incremental(&first, &archive, &config).unwrap();

    // same ten minutes plus five new ones
    let second = write_input(work.path(), "ykc.2", &rows(0..15));
    let report = convert_incremental(&second, &archive, &config).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.samples_appended(), 4 * 5);
    for outcome in &report.outcomes {
        let stats = outcome.result.as_ref().unwrap();
        assert_eq!(stats.samples_appended, 5);
        assert_eq!(stats.last_sequence, 2);
    }

    let catalog = scan_channel(&archive, &x_identity()).unwrap();
    assert_eq!(
        catalog.last_time,
        Some(Utc.with_ymd_and_hms(2021, 4, 5, 0, 14, 0).unwrap())
    );
    assert_eq!(catalog.last_sequence, 2);
}

#[test]
fn revised_value_reports_conflict_for_that_channel_only() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("mscan");
    fs::create_dir(&archive).unwrap();
    let config = ConvertConfig::default();

    let first = write_input(work.path(), "ykc.1", &rows(0..10));
    convert_incremental(&first, &archive, &config).unwrap();

    // revise minute 3 of the X component only, extend all channels
    let mut revised = rows(0..15);
    revised[3].1[0] += 0.5;
    let second = write_input(work.path(), "ykc.2", &revised);
    let report = convert_incremental(&second, &archive, &config).unwrap();
    assert!(!report.is_complete());

    let failed: Vec<String> = report
        .failures()
        .map(|o| o.identity.channel.clone())
        .collect();
    assert_eq!(failed, vec!["UFX".to_string()]);
    for outcome in &report.outcomes {
        match (&outcome.identity.channel[..], &outcome.result) {
            ("UFX", Err(ConvertError::DiffConflict { channel, timestamp })) => {
                assert_eq!(channel.as_str(), "XX.YKC.R0.UFX");
                assert_eq!(
                    *timestamp,
                    Utc.with_ymd_and_hms(2021, 4, 5, 0, 3, 0).unwrap()
                );
            }
            ("UFX", other) => panic!("expected DiffConflict for UFX, got {other:?}"),
            // independent channels still appended their suffix
            (_, Ok(stats)) => assert_eq!(stats.samples_appended, 5),
            (chan, other) => panic!("unexpected outcome for {chan}: {other:?}"),
        }
    }

    // the conflicting channel gained nothing
    let catalog = scan_channel(&archive, &x_identity()).unwrap();
    assert_eq!(catalog.last_sequence, 1);
    assert_eq!(
        catalog.last_time,
        Some(Utc.with_ymd_and_hms(2021, 4, 5, 0, 9, 0).unwrap())
    );
}

#[test]
fn gap_between_runs_is_not_bridged() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("mscan");
    fs::create_dir(&archive).unwrap();
    let config = ConvertConfig::default();

    let first = write_input(work.path(), "ykc.1", &rows(0..5));
    convert_incremental(&first, &archive, &config).unwrap();

    // later samples only, leaving minutes 5..30 absent
    let second = write_input(work.path(), "ykc.2", &rows(30..35));
    let report = convert_incremental(&second, &archive, &config).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.samples_appended(), 4 * 5);

    let catalog = scan_channel(&archive, &x_identity()).unwrap();
    assert_eq!(catalog.last_sequence, 2);
    // nothing was synthesized inside the gap
    assert_eq!(
        catalog.value_at(Utc.with_ymd_and_hms(2021, 4, 5, 0, 10, 0).unwrap()),
        None
    );
    assert_eq!(
        catalog.value_at(Utc.with_ymd_and_hms(2021, 4, 5, 0, 30, 0).unwrap()),
        Some(Some(8030.0))
    );
}

#[test]
fn archive_files_follow_mscan_layout() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("mscan");
    fs::create_dir(&archive).unwrap();
    let input = write_input(work.path(), "ykc.min", &rows(0..5));
    convert_incremental(&input, &archive, &ConvertConfig::default()).unwrap();

    let station_dir = archive.join("XX").join("YKC");
    assert!(station_dir.is_dir());
    let names: Vec<String> = fs::read_dir(&station_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 4);
    for chan in ["UFX", "UFY", "UFZ", "UFF"] {
        assert!(
            names
                .iter()
                .any(|n| n.starts_with(&format!("XX.YKC.R0.{chan}.2021.095."))),
            "no archive file for {chan} in {names:?}"
        );
    }
}

fn archive_bytes(archive: &Path) -> u64 {
    fn walk(dir: &Path, total: &mut u64) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let meta = entry.metadata().unwrap();
            if meta.is_dir() {
                walk(&entry.path(), total);
            } else {
                *total += meta.len();
            }
        }
    }
    let mut total = 0;
    walk(archive, &mut total);
    total
}
