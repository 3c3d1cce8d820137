//! Derive SEED channel identities from IAGA2002 component codes and
//! the sampling interval.

use std::fmt;

use crate::error::ConvertError;

/// Default network code when none is supplied on the command line.
pub const DEFAULT_NETWORK: &str = "XX";

/// The SEED instrument code for a magnetometer.
pub const INSTRUMENT_CODE: char = 'F';

/// The network/station/location/channel tuple addressing one output
/// stream. Two identical (network, station, location, interval,
/// component) inputs always map to the identical identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelIdentity {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl ChannelIdentity {
    /// Build the identity for one component of an observatory stream.
    /// The channel code is `<band><instrument><orientation>` where the
    /// band letter is selected by the sampling interval.
    pub fn new(
        network: &str,
        station: &str,
        location: &str,
        interval_seconds: f64,
        component: char,
    ) -> Result<ChannelIdentity, ConvertError> {
        let band = band_code(interval_seconds)?;
        let orientation = orientation_code(component)?;
        Ok(ChannelIdentity {
            network: network.to_string(),
            station: station.to_string(),
            location: location.to_string(),
            channel: format!("{band}{INSTRUMENT_CODE}{orientation}"),
        })
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// Convert a sampling interval (seconds) to its SEED band code, per
/// Appendix A of the SEED manual (long-period corner branch).
///
/// One-second data maps to `L` and one-minute data to `U`.
pub fn band_code(interval_seconds: f64) -> Result<char, ConvertError> {
    if interval_seconds <= 0.0 {
        return Err(ConvertError::UnknownInterval(interval_seconds));
    }
    let rate = 1.0 / interval_seconds;
    let code = if rate >= 5000.0 {
        return Err(ConvertError::UnknownInterval(interval_seconds));
    } else if rate >= 1000.0 {
        'F'
    } else if rate >= 250.0 {
        'C'
    } else if rate >= 80.0 {
        'H'
    } else if rate >= 10.0 {
        'B'
    } else if rate > 1.0 {
        'M'
    } else if (rate - 1.0).abs() < 1e-9 {
        'L'
    } else if rate >= 0.05 {
        'V'
    } else if rate >= 0.001 {
        'U'
    } else if rate >= 0.0001 {
        'R'
    } else if rate >= 0.00001 {
        'P'
    } else if rate >= 0.000001 {
        'T'
    } else {
        return Err(ConvertError::UnknownInterval(interval_seconds));
    };
    Ok(code)
}

/// SEED orientation code for an IAGA2002 component letter.
pub fn orientation_code(component: char) -> Result<char, ConvertError> {
    match component.to_ascii_uppercase() {
        c @ ('H' | 'D' | 'Z' | 'F' | 'X' | 'Y' | 'E' | 'G' | 'I') => Ok(c),
        other => Err(ConvertError::UnknownComponent(other)),
    }
}
