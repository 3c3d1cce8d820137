//! Parse IAGA2002 text into a structured header plus ordered sample rows.
//!
//! See the format description at
//! <https://www.ngdc.noaa.gov/IAGA/vdat/IAGA2002/iaga2002format.html>

use chrono::prelude::*;
use chrono::Utc;
use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ConvertError;

/// The IAGA2002 missing-data sentinel written in data columns.
pub const MISSING_SENTINEL: f64 = 99999.0;

/// Any value at or above this is treated as missing. This covers both
/// the 99999 missing convention and the 88888 not-observed convention.
pub const MISSING_THRESHOLD: f64 = 88888.0;

lazy_static! {
    // Runs of `*` mark not-observed values in some observatory exports.
    static ref STAR_RUN: Regex = Regex::new(r"[*]+").unwrap();
    static ref STAR_REPLACEMENT: String = format!("{MISSING_SENTINEL:.2}");
}

/// The header block of an IAGA2002 file. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ObservatoryHeader {
    /// Station code from the `IAGA CODE` header, 3-4 characters.
    pub station: String,
    /// Reporting institution from the `Source of Data` header.
    pub institution: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    /// The `Data Type` header value, e.g. `definitive` or `variation`.
    pub data_type: Option<String>,
    /// Component letters in data-column order, e.g. `[H, D, Z, F]`.
    pub components: Vec<char>,
    /// Nominal spacing of the data rows, derived from the first two
    /// timestamps.
    pub interval_seconds: f64,
}

impl ObservatoryHeader {
    /// SEED location code: `D0` for definitive data, `R0` for any
    /// other declared data type, blank when the header is silent.
    pub fn location_code(&self) -> &'static str {
        match &self.data_type {
            Some(d) if d.eq_ignore_ascii_case("definitive") => "D0",
            Some(_) => "R0",
            None => "",
        }
    }

    /// Sampling rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        1.0 / self.interval_seconds
    }
}

/// One data line: a timestamp and one value per declared component,
/// where `None` marks a missing value.
#[derive(Debug, Clone)]
pub struct SampleRow {
    pub time: DateTime<Utc>,
    pub values: Vec<Option<f32>>,
}

/// A fully parsed IAGA2002 file.
#[derive(Debug, Clone)]
pub struct IagaFile {
    pub header: ObservatoryHeader,
    pub rows: Vec<SampleRow>,
}

impl IagaFile {
    /// Project the sample rows onto a single component, by its index in
    /// `header.components`.
    pub fn channel_stream(&self, index: usize) -> Vec<(DateTime<Utc>, Option<f32>)> {
        self.rows
            .iter()
            .map(|row| (row.time, row.values[index]))
            .collect()
    }
}

/// Read an IAGA2002 file from disk, transparently decompressing
/// gzipped (`*.gz`) observatory exports.
pub fn read_iaga2002(path: &Path) -> Result<IagaFile, ConvertError> {
    let file = fs::File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        parse_iaga2002(BufReader::new(GzDecoder::new(file)))
    } else {
        parse_iaga2002(BufReader::new(file))
    }
}

/// Parse IAGA2002 text from a BufRead.
///
/// Header lines are keyword/value pairs terminated by `|`; the
/// `DATE TIME DOY` column line separates header from data and carries
/// the ordered component list. Each data line must supply exactly one
/// value per declared component, with strictly increasing timestamps.
pub fn parse_iaga2002<R: BufRead>(reader: R) -> Result<IagaFile, ConvertError> {
    let mut station: Option<String> = None;
    let mut institution: Option<String> = None;
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut elevation: Option<f64> = None;
    let mut data_type: Option<String> = None;
    let mut reported: Option<Vec<char>> = None;
    let mut components: Option<Vec<char>> = None;

    let mut rows: Vec<SampleRow> = Vec::new();
    let mut last_line = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match &components {
            None => {
                if trimmed.starts_with("DATE") {
                    components = Some(parse_column_line(trimmed, reported.as_deref(), line_no)?);
                } else {
                    parse_header_line(
                        trimmed,
                        &mut station,
                        &mut institution,
                        &mut latitude,
                        &mut longitude,
                        &mut elevation,
                        &mut data_type,
                        &mut reported,
                    );
                }
            }
            Some(components) => {
                let row = parse_data_line(trimmed, components.len(), line_no)?;
                if let Some(prev) = rows.last() {
                    if row.time <= prev.time {
                        return Err(ConvertError::TimeOrder {
                            line: line_no,
                            timestamp: row.time,
                        });
                    }
                }
                rows.push(row);
            }
        }
    }

    let station = station.ok_or(ConvertError::MissingHeaderField("IAGA CODE"))?;
    let components = components.ok_or(ConvertError::MissingHeaderField("DATE"))?;
    if rows.len() < 2 {
        return Err(ConvertError::Format {
            line: last_line,
            message: String::from("fewer than two data rows, sampling interval is undefined"),
        });
    }
    let interval = rows[1].time - rows[0].time;
    let interval_seconds = interval.num_milliseconds() as f64 / 1000.0;

    Ok(IagaFile {
        header: ObservatoryHeader {
            station,
            institution,
            latitude,
            longitude,
            elevation,
            data_type,
            components,
            interval_seconds,
        },
        rows,
    })
}

/// Keyword in columns 0-23, value from column 24 up to the trailing `|`.
/// Unrecognized keywords are ignored.
#[allow(clippy::too_many_arguments)]
fn parse_header_line(
    line: &str,
    station: &mut Option<String>,
    institution: &mut Option<String>,
    latitude: &mut Option<f64>,
    longitude: &mut Option<f64>,
    elevation: &mut Option<f64>,
    data_type: &mut Option<String>,
    reported: &mut Option<Vec<char>>,
) {
    // A multi-byte character straddling the keyword/value boundary
    // makes the line unsliceable; treat it like an unknown keyword.
    if line.len() < 24 || !line.is_char_boundary(23) || !line.ends_with('|') {
        return;
    }
    let keyword = line[..23].trim();
    let value = line[23..line.len() - 1].trim();
    if value.is_empty() {
        return;
    }
    match keyword {
        "IAGA CODE" | "IAGA Code" => *station = Some(value.to_string()),
        "Source of Data" => *institution = Some(value.to_string()),
        "Geodetic Latitude" => *latitude = value.parse().ok(),
        "Geodetic Longitude" => *longitude = value.parse().ok(),
        "Elevation" => *elevation = value.parse().ok(),
        "Data Type" => *data_type = Some(value.to_string()),
        "Reported" => *reported = Some(value.chars().collect()),
        _ => {}
    }
}

/// The `DATE TIME DOY <STA>H <STA>D ...` line. The component letter is
/// the last character of each data column name.
fn parse_column_line(
    line: &str,
    reported: Option<&[char]>,
    line_no: usize,
) -> Result<Vec<char>, ConvertError> {
    let columns: Vec<&str> = line
        .split_whitespace()
        .skip(3)
        .filter(|tok| *tok != "|")
        .collect();
    if columns.is_empty() {
        return Err(ConvertError::Format {
            line: line_no,
            message: String::from("DATE line declares no data columns"),
        });
    }
    let components: Vec<char> = columns
        .iter()
        .map(|col| col.chars().last().unwrap_or(' '))
        .collect();
    if let Some(reported) = reported {
        if reported.len() != components.len() {
            return Err(ConvertError::Format {
                line: line_no,
                message: format!(
                    "Reported header declares {} components but DATE line has {} data columns",
                    reported.len(),
                    components.len()
                ),
            });
        }
    }
    Ok(components)
}

fn parse_data_line(
    line: &str,
    num_components: usize,
    line_no: usize,
) -> Result<SampleRow, ConvertError> {
    // `****` columns are not-observed, rewrite to the numeric sentinel
    // before tokenizing so the field count stays right.
    let line = STAR_RUN.replace_all(line, STAR_REPLACEMENT.as_str());
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let expected = 3 + num_components;
    if tokens.len() != expected {
        return Err(ConvertError::FieldCount {
            line: line_no,
            expected,
            actual: tokens.len(),
        });
    }

    let timestamp = format!("{} {}", tokens[0], tokens[1]);
    let time = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| ConvertError::Format {
            line: line_no,
            message: format!("bad timestamp `{timestamp}`: {e}"),
        })?
        .and_utc();

    let mut values = Vec::with_capacity(num_components);
    for tok in &tokens[3..] {
        let v: f64 = tok.parse().map_err(|_| ConvertError::Format {
            line: line_no,
            message: format!("bad value `{tok}`"),
        })?;
        if v >= MISSING_THRESHOLD {
            values.push(None);
        } else {
            values.push(Some(v as f32));
        }
    }
    Ok(SampleRow { time, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    pub const MINUTE_FILE: &str = "\
 Format                 IAGA-2002                                    |
 Source of Data         Geological Survey of Canada                  |
 Station Name           Ottawa                                       |
 IAGA CODE              OTT                                          |
 Geodetic Latitude      45.403                                       |
 Geodetic Longitude     284.448                                      |
 Elevation              75.000                                       |
 Reported               HDZF                                         |
 Data Type              variation                                    |
 # This is a comment line that must be skipped.                      |
DATE       TIME         DOY     OTTH      OTTD      OTTZ      OTTF   |
2021-04-05 00:00:00.000 095     17894.06   -427.56  50385.04  53516.39
2021-04-05 00:01:00.000 095     17894.22   -427.61  50385.13  53516.55
2021-04-05 00:02:00.000 095     17894.35   -427.60  50385.22  53516.69
";

    fn parse(text: &str) -> Result<IagaFile, ConvertError> {
        parse_iaga2002(BufReader::new(text.as_bytes()))
    }

    #[test]
    fn parse_minute_file() {
        let file = parse(MINUTE_FILE).unwrap();
        assert_eq!(file.header.station, "OTT");
        assert_eq!(
            file.header.institution.as_deref(),
            Some("Geological Survey of Canada")
        );
        assert_eq!(file.header.latitude, Some(45.403));
        assert_eq!(file.header.longitude, Some(284.448));
        assert_eq!(file.header.elevation, Some(75.0));
        assert_eq!(file.header.components, vec!['H', 'D', 'Z', 'F']);
        assert_eq!(file.header.interval_seconds, 60.0);
        assert_eq!(file.header.location_code(), "R0");
        assert_eq!(file.rows.len(), 3);
        assert_eq!(file.rows[0].values[0], Some(17894.06));
        assert_eq!(file.rows[2].values[3], Some(53516.69));
    }

    #[test]
    fn location_code_definitive() {
        let text = MINUTE_FILE.replace("variation   ", "definitive  ");
        let file = parse(&text).unwrap();
        assert_eq!(file.header.location_code(), "D0");
    }

    #[test]
    fn missing_sentinel_preserved() {
        let text = MINUTE_FILE.replace("50385.13", "99999.00");
        let file = parse(&text).unwrap();
        assert_eq!(file.rows[1].values[2], None);
        // the neighbours are untouched
        assert_eq!(file.rows[0].values[2], Some(50385.04));
        assert_eq!(file.rows[2].values[2], Some(50385.22));
    }

    #[test]
    fn star_run_is_missing() {
        let text = MINUTE_FILE.replace("53516.55", "********");
        let file = parse(&text).unwrap();
        assert_eq!(file.rows[1].values[3], None);
    }

    #[test]
    fn not_observed_is_missing() {
        let text = MINUTE_FILE.replace("53516.55", "88888.00");
        let file = parse(&text).unwrap();
        assert_eq!(file.rows[1].values[3], None);
    }

    #[test]
    fn multibyte_char_on_keyword_boundary_ignored() {
        // 22 bytes of prefix put the two-byte `Ĝ` across byte 23
        let bad = " Source of Data       Ĝeofizika Instituto                            |";
        let text = MINUTE_FILE.replace(
            " Source of Data         Geological Survey of Canada                  |",
            bad,
        );
        let file = parse(&text).unwrap();
        assert_eq!(file.header.institution, None);
        assert_eq!(file.header.station, "OTT");
    }

    #[test]
    fn star_substitution_uses_the_sentinel() {
        assert_eq!(STAR_REPLACEMENT.as_str(), "99999.00");
    }

    #[test]
    fn missing_iaga_code_fatal() {
        let text = MINUTE_FILE.replace("IAGA CODE", "XAGA CODE");
        match parse(&text) {
            Err(ConvertError::MissingHeaderField("IAGA CODE")) => {}
            other => panic!("expected MissingHeaderField, got {other:?}"),
        }
    }

    #[test]
    fn short_data_line_fatal() {
        let text = MINUTE_FILE.replace("  -427.61  50385.13  53516.55", "");
        match parse(&text) {
            Err(ConvertError::FieldCount {
                line,
                expected: 7,
                actual: 4,
            }) => assert_eq!(line, 13),
            other => panic!("expected FieldCount, got {other:?}"),
        }
    }

    #[test]
    fn non_increasing_timestamp_fatal() {
        let text = MINUTE_FILE.replace("2021-04-05 00:02:00.000", "2021-04-05 00:01:00.000");
        match parse(&text) {
            Err(ConvertError::TimeOrder { line: 14, .. }) => {}
            other => panic!("expected TimeOrder, got {other:?}"),
        }
    }

    #[test]
    fn single_row_fatal() {
        let mut lines: Vec<&str> = MINUTE_FILE.lines().collect();
        lines.truncate(12);
        let text = lines.join("\n");
        assert!(matches!(parse(&text), Err(ConvertError::Format { .. })));
    }

    #[test]
    fn channel_stream_projection() {
        let file = parse(MINUTE_FILE).unwrap();
        let stream = file.channel_stream(1);
        assert_eq!(stream.len(), 3);
        assert_eq!(stream[0].1, Some(-427.56));
        assert_eq!(stream[1].0, file.rows[1].time);
    }
}
