// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The station table: names and local positions of every antenna.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use log::debug;
use marlu::{XyzGeodetic, ENH};

use super::meaningful_lines;
use crate::{error::ConfigError, pos::ArrayGeometry};

/// Longest antenna name the antenna table can hold.
pub const MAX_ANTENNA_NAME_LEN: usize = 8;

/// One antenna (station).
#[derive(Clone, Debug, PartialEq)]
pub struct Antenna {
    /// Station name
    pub name: String,
    /// 0-based index in the station file
    pub station_num: usize,
    /// Local XYZ position relative to the array centre \[metres\]
    pub position: XyzGeodetic,
    /// Mount type, 0 for alt-az
    pub mount_type: i32,
    /// Feed A polarisation letter
    pub pol_type_a: char,
    /// Feed A orientation \[degrees\]
    pub pol_angle_a: f32,
    /// Feed A calibration
    pub pol_cal_a: f32,
    /// Feed B polarisation letter
    pub pol_type_b: char,
    /// Feed B orientation \[degrees\]
    pub pol_angle_b: f32,
    /// Feed B calibration
    pub pol_cal_b: f32,
}

impl Antenna {
    /// An antenna with the default dipole feeds: X at 0° and Y at 90°.
    pub fn new(name: &str, station_num: usize, position: XyzGeodetic) -> Self {
        Self {
            name: name.chars().take(MAX_ANTENNA_NAME_LEN).collect(),
            station_num,
            position,
            mount_type: 0,
            pol_type_a: 'X',
            pol_angle_a: 0.0,
            pol_cal_a: 0.0,
            pol_type_b: 'Y',
            pol_angle_b: 90.0,
            pol_cal_b: 0.0,
        }
    }
}

/// All stations, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AntennaTable {
    /// The antennas, indexed by station number
    pub antennas: Vec<Antenna>,
}

impl AntennaTable {
    /// Read a station file, converting local east/north/height into XYZ at the
    /// array latitude.
    ///
    /// # Errors
    ///
    /// Will return a [`ConfigError`] if the file can't be read, or a line is
    /// not `name east north height`.
    pub fn read<P: AsRef<Path>>(path: P, geometry: &ArrayGeometry) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|io_error| ConfigError::FileRead {
            file: path.display().to_string(),
            io_error,
            source_file: file!(),
            source_line: line!(),
        })?;
        Self::from_reader(&path.display().to_string(), BufReader::new(file), geometry)
    }

    /// Parse a station table from anything readable.
    ///
    /// # Errors
    ///
    /// See [`AntennaTable::read`].
    pub fn from_reader<R: Read>(
        file: &str,
        reader: BufReader<R>,
        geometry: &ArrayGeometry,
    ) -> Result<Self, ConfigError> {
        let latitude_rad = geometry.latitude_rad();
        let mut antennas: Vec<Antenna> = vec![];
        for result in meaningful_lines(file, reader.lines()) {
            let (line_num, line) = result?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            let coords: Option<Vec<f64>> = fields
                .get(1..4)
                .and_then(|c| c.iter().map(|s| s.parse().ok()).collect());
            let (name, [e, n, h]) = match (fields.first(), coords.as_deref()) {
                (Some(name), Some(&[e, n, h])) => (name, [e, n, h]),
                _ => {
                    return Err(ConfigError::BadLine {
                        file: file.to_string(),
                        line_num,
                        line: line.clone(),
                        reason: "expected: name east north height".to_string(),
                        source_file: file!(),
                        source_line: line!(),
                    })
                }
            };
            let position = ENH { e, n, h }.to_xyz(latitude_rad);
            let antenna = Antenna::new(name, antennas.len(), position);
            debug!(
                "ant {}. Pos (ENH) ({e},{n},{h}).\tPos (XYZ): ({},{},{})",
                antenna.name, antenna.position.x, antenna.position.y, antenna.position.z
            );
            antennas.push(antenna);
        }
        Ok(Self { antennas })
    }

    /// Number of stations.
    pub fn len(&self) -> usize {
        self.antennas.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.antennas.is_empty()
    }

    /// Local XYZ positions of every station.
    pub fn positions(&self) -> Vec<XyzGeodetic> {
        self.antennas.iter().map(|a| a.position).collect()
    }
}
