// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The observation header: `KEY value` metadata describing one dataset.

use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use log::{trace, warn};
use marlu::{hifitime::Epoch, RADec};

use super::meaningful_lines;
use crate::{
    constants::{POL_PRODUCTS, SECONDS_PER_DAY},
    error::ConfigError,
};

/// Which correlation products the dumps contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrType {
    /// Auto-correlations only (`A`)
    Auto,
    /// Cross-correlations only (`C`)
    Cross,
    /// Both (`B`)
    Both,
}

impl CorrType {
    /// Decode the first character of a `CORRTYPE` value, case-insensitively.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Self::Auto),
            'C' => Some(Self::Cross),
            'B' => Some(Self::Both),
            _ => None,
        }
    }

    /// The header letter for this type.
    pub fn as_char(self) -> char {
        match self {
            Self::Auto => 'A',
            Self::Cross => 'C',
            Self::Both => 'B',
        }
    }

    /// Whether the antenna pair `(ant1, ant2)`, with `ant1 <= ant2`, has a
    /// baseline for this correlation type.
    pub fn includes_pair(self, ant1: usize, ant2: usize) -> bool {
        match self {
            Self::Auto => ant1 == ant2,
            Self::Cross => ant1 < ant2,
            Self::Both => ant1 <= ant2,
        }
    }

    /// Number of baselines formed by `n_ant` present antennas.
    pub fn num_baselines(self, n_ant: usize) -> usize {
        match self {
            Self::Auto => n_ant,
            Self::Cross => n_ant * n_ant.saturating_sub(1) / 2,
            Self::Both => n_ant * (n_ant + 1) / 2,
        }
    }

    /// Whether the autocorrelation dump is read.
    pub fn has_autos(self) -> bool {
        self != Self::Cross
    }

    /// Whether the cross-correlation dump is read.
    pub fn has_crosses(self) -> bool {
        self != Self::Auto
    }
}

impl Display for CorrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({})",
            self.as_char(),
            match self {
                Self::Auto => "auto only",
                Self::Cross => "cross only",
                Self::Both => "auto and cross",
            }
        )
    }
}

/// Scalar metadata for one dataset. Immutable once read.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationHeader {
    /// Name of the field, written to `OBJECT`
    pub field_name: String,
    /// Number of scans (time steps) expected in the dumps
    pub n_scans: usize,
    /// Number of correlator inputs
    pub n_inputs: usize,
    /// Number of frequency channels
    pub n_chans: usize,
    /// The correlation products present
    pub corr_type: CorrType,
    /// Integration time \[seconds\]
    pub int_time: f64,
    /// Centre frequency \[MHz\]
    pub cent_freq_mhz: f64,
    /// Total bandwidth \[MHz\]
    pub bandwidth_mhz: f64,
    /// Whether channel frequencies decrease with channel index
    pub invert_freq: bool,
    /// Whether to conjugate the cross-correlations as they are read
    pub conjugate: bool,
    /// Whether to rotate phases to the phase centre
    pub geom_correct: bool,
    /// Reference azimuth \[radians\]
    pub ref_az_rad: f64,
    /// Reference elevation \[radians\]
    pub ref_el_rad: f64,
    /// Hour angle of the phase centre at the start \[hours\]
    pub ha_hrs: Option<f64>,
    /// Right ascension of the phase centre (J2000) \[hours\]
    pub ra_hrs: f64,
    /// Declination of the phase centre (J2000) \[degrees\]
    pub dec_degs: f64,
    /// UTC start of the first scan
    pub start_epoch: Epoch,
    /// Polarisation products, two receptor letters each
    pub pol_products: String,
}

/// Values as they are accumulated while reading the header file.
#[derive(Default)]
struct RawHeader {
    field_name: Option<String>,
    n_scans: Option<usize>,
    n_inputs: Option<usize>,
    n_chans: Option<usize>,
    corr_type: Option<CorrType>,
    int_time: Option<f64>,
    cent_freq_mhz: Option<f64>,
    bandwidth_mhz: Option<f64>,
    invert_freq: bool,
    conjugate: bool,
    geom_correct: Option<bool>,
    ref_az_deg: Option<f64>,
    ref_el_deg: Option<f64>,
    ha_hrs: Option<f64>,
    ra_hrs: Option<f64>,
    dec_degs: Option<f64>,
    date: Option<(i32, u8, u8)>,
    time: Option<(u8, u8, f64)>,
}

fn parse_value<T: std::str::FromStr>(
    file: &str,
    line_num: usize,
    line: &str,
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadLine {
        file: file.to_string(),
        line_num,
        line: line.to_string(),
        reason: format!("could not parse the value of {key}"),
        source_file: file!(),
        source_line: line!(),
    })
}

/// Split a `YYYYMMDD` date.
fn parse_date(value: &str) -> Option<(i32, u8, u8)> {
    if value.len() != 8 || !value.is_ascii() {
        return None;
    }
    let year = value[..4].parse().ok()?;
    let month = value[4..6].parse().ok()?;
    let day = value[6..].parse().ok()?;
    Some((year, month, day))
}

/// Split an `HHMMSS[.s]` time.
fn parse_time(value: &str) -> Option<(u8, u8, f64)> {
    if value.len() < 6 || !value.is_ascii() {
        return None;
    }
    let hour = value[..2].parse().ok()?;
    let minute = value[2..4].parse().ok()?;
    let second = value[4..].parse().ok()?;
    Some((hour, minute, second))
}

impl ObservationHeader {
    /// Read a header file.
    ///
    /// # Errors
    ///
    /// Will return a [`ConfigError`] if the file can't be read, a value can't
    /// be parsed, or a key without a default is missing.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|io_error| ConfigError::FileRead {
            file: path.display().to_string(),
            io_error,
            source_file: file!(),
            source_line: line!(),
        })?;
        Self::from_reader(&path.display().to_string(), BufReader::new(file))
    }

    /// Parse a header from anything readable. `file` names the source in
    /// errors.
    ///
    /// # Errors
    ///
    /// See [`ObservationHeader::read`].
    pub fn from_reader<R: Read>(file: &str, reader: BufReader<R>) -> Result<Self, ConfigError> {
        let mut raw = RawHeader::default();

        for result in meaningful_lines(file, reader.lines()) {
            let (line_num, line) = result?;
            let mut tokens = line.split_whitespace();
            let (key, value) = match (tokens.next(), tokens.next()) {
                (Some(key), Some(value)) => (key, value),
                _ => {
                    warn!("{file} line {line_num}: ignoring <{line}>, expected KEY value");
                    continue;
                }
            };
            let parse_f64 = |v: &str| parse_value::<f64>(file, line_num, &line, key, v);
            let parse_usize = |v: &str| parse_value::<usize>(file, line_num, &line, key, v);
            let parse_bool = |v: &str| parse_value::<i32>(file, line_num, &line, key, v).map(|x| x != 0);

            match key {
                "FIELDNAME" => raw.field_name = Some(value.to_string()),
                "N_SCANS" => raw.n_scans = Some(parse_usize(value)?),
                "N_INPUTS" => raw.n_inputs = Some(parse_usize(value)?),
                "N_CHANS" => raw.n_chans = Some(parse_usize(value)?),
                "CORRTYPE" => {
                    let corr_type = value.chars().next().and_then(CorrType::from_char);
                    raw.corr_type = Some(corr_type.ok_or_else(|| ConfigError::BadLine {
                        file: file.to_string(),
                        line_num,
                        line: line.clone(),
                        reason: "CORRTYPE must be A, C or B".to_string(),
                        source_file: file!(),
                        source_line: line!(),
                    })?);
                }
                "INT_TIME" => raw.int_time = Some(parse_f64(value)?),
                "FREQCENT" => raw.cent_freq_mhz = Some(parse_f64(value)?),
                "BANDWIDTH" => raw.bandwidth_mhz = Some(parse_f64(value)?),
                "INVERT_FREQ" => raw.invert_freq = parse_bool(value)?,
                "CONJUGATE" => raw.conjugate = parse_bool(value)?,
                "GEOM_CORRECT" => raw.geom_correct = Some(parse_bool(value)?),
                "REF_AZ" => raw.ref_az_deg = Some(parse_f64(value)?),
                "REF_EL" => raw.ref_el_deg = Some(parse_f64(value)?),
                "HA_HRS" => raw.ha_hrs = Some(parse_f64(value)?),
                "RA_HRS" => raw.ra_hrs = Some(parse_f64(value)?),
                "DEC_DEGS" => raw.dec_degs = Some(parse_f64(value)?),
                "DATE" => {
                    raw.date = Some(parse_date(value).ok_or_else(|| ConfigError::BadLine {
                        file: file.to_string(),
                        line_num,
                        line: line.clone(),
                        reason: "DATE must be YYYYMMDD".to_string(),
                        source_file: file!(),
                        source_line: line!(),
                    })?);
                }
                "TIME" => {
                    raw.time = Some(parse_time(value).ok_or_else(|| ConfigError::BadLine {
                        file: file.to_string(),
                        line_num,
                        line: line.clone(),
                        reason: "TIME must be HHMMSS[.s]".to_string(),
                        source_file: file!(),
                        source_line: line!(),
                    })?);
                }
                _ => warn!("{file} line {line_num}: unknown key {key}"),
            }
        }

        raw.finish(file)
    }

    /// Number of polarisation products.
    pub fn num_pols(&self) -> usize {
        self.pol_products.len() / 2
    }

    /// The UVFITS polarisation code of the first product: -5 for linear, -1
    /// for circular.
    pub fn pol_type(&self) -> i32 {
        match self.pol_products.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('R') | Some('L') => -1,
            _ => -5,
        }
    }

    /// Centre frequency \[Hz\]
    pub fn cent_freq_hz(&self) -> f64 {
        self.cent_freq_mhz * 1e6
    }

    /// Signed channel width \[Hz\], negative when the band is inverted.
    pub fn freq_delta_hz(&self) -> f64 {
        let sign = if self.invert_freq { -1.0 } else { 1.0 };
        self.bandwidth_mhz / self.n_chans as f64 * 1e6 * sign
    }

    /// Frequency of a channel \[MHz\], as used for phase correction.
    pub fn chan_freq_mhz(&self, chan: usize) -> f64 {
        let sign = if self.invert_freq { -1.0 } else { 1.0 };
        let n = self.n_chans as f64;
        self.cent_freq_mhz + sign * (chan as f64 - n / 2.0) / n * self.bandwidth_mhz
    }

    /// Julian date at the centre of the first scan.
    pub fn start_jd(&self) -> f64 {
        self.start_epoch.to_jde_utc_days() + 0.5 * self.int_time / SECONDS_PER_DAY
    }

    /// Julian date at the centre of scan `scan`.
    pub fn scan_jd(&self, scan: usize) -> f64 {
        self.start_jd() + scan as f64 * self.int_time / SECONDS_PER_DAY
    }

    /// The weight given to every unflagged sample.
    pub fn weight(&self) -> f32 {
        if self.int_time > 0.0 {
            self.int_time as f32
        } else {
            1.0
        }
    }

    /// The J2000 phase centre.
    pub fn phase_centre(&self) -> RADec {
        RADec::from_degrees(self.ra_hrs * 15.0, self.dec_degs)
    }

    /// Check the header supports locked pointing.
    ///
    /// # Errors
    ///
    /// Will return [`ConfigError::LockedPointingWithoutHourAngle`] if `HA_HRS`
    /// was not given.
    pub fn locked_hour_angle_rad(&self, file: &str) -> Result<f64, ConfigError> {
        self.ha_hrs
            .map(|ha| (ha * 15.0).to_radians())
            .ok_or_else(|| ConfigError::LockedPointingWithoutHourAngle {
                file: file.to_string(),
            })
    }
}

impl RawHeader {
    fn finish(self, file: &str) -> Result<ObservationHeader, ConfigError> {
        let missing = |key: &'static str| ConfigError::MissingKey {
            file: file.to_string(),
            key,
        };

        let cent_freq_mhz = self
            .cent_freq_mhz
            .filter(|&f| f != 0.0)
            .ok_or_else(|| missing("FREQCENT"))?;
        let ra_hrs = self.ra_hrs.ok_or_else(|| missing("RA_HRS"))?;
        let dec_degs = self.dec_degs.ok_or_else(|| missing("DEC_DEGS"))?;
        let (year, month, day) = self
            .date
            .filter(|&(y, m, d)| y != 0 && m != 0 && d != 0)
            .ok_or_else(|| missing("DATE"))?;
        let (hour, minute, second) = self.time.unwrap_or((0, 0, 0.0));

        let whole_seconds = second.trunc();
        let nanos = ((second - whole_seconds) * 1e9).round() as u32;
        let start_epoch = Epoch::maybe_from_gregorian_utc(
            year,
            month,
            day,
            hour,
            minute,
            whole_seconds as u8,
            nanos,
        )
        .map_err(|e| ConfigError::BadLine {
            file: file.to_string(),
            line_num: 0,
            line: format!("DATE {year:04}{month:02}{day:02} TIME {hour:02}{minute:02}{second}"),
            reason: format!("not a valid UTC time: {e}"),
            source_file: file!(),
            source_line: line!(),
        })?;

        let n_scans = with_default(self.n_scans.filter(|&n| n != 0), "N_SCANS", 1);
        let n_inputs = with_default(self.n_inputs.filter(|&n| n != 0), "N_INPUTS", 16);
        let n_chans = with_default(self.n_chans.filter(|&n| n != 0), "N_CHANS", 128);
        let corr_type = with_default(self.corr_type, "CORRTYPE", CorrType::Both);
        let int_time = with_default(self.int_time.filter(|&t| t != 0.0), "INT_TIME", 10.0);
        let bandwidth_mhz = with_default(
            self.bandwidth_mhz.filter(|&b| b != 0.0),
            "BANDWIDTH",
            1.28,
        );
        let field_name = with_default(self.field_name, "FIELDNAME", "TEST_32T".to_string());

        let header = ObservationHeader {
            field_name,
            n_scans,
            n_inputs,
            n_chans,
            corr_type,
            int_time,
            cent_freq_mhz,
            bandwidth_mhz,
            invert_freq: self.invert_freq,
            conjugate: self.conjugate,
            geom_correct: self.geom_correct.unwrap_or(true),
            ref_az_rad: self.ref_az_deg.unwrap_or(0.0).to_radians(),
            ref_el_rad: self.ref_el_deg.unwrap_or(90.0).to_radians(),
            ha_hrs: self.ha_hrs,
            ra_hrs,
            dec_degs,
            start_epoch,
            pol_products: POL_PRODUCTS.to_string(),
        };
        trace!("read header from {file}: {header:?}");
        Ok(header)
    }
}

fn with_default<T: std::fmt::Debug>(value: Option<T>, key: &str, default: T) -> T {
    value.unwrap_or_else(|| {
        warn!("{key} unspecified. Assuming: {default:?}");
        default
    })
}
