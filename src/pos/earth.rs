// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The array reference position.

use std::fmt::Display;

use erfa::Ellipsoid;
use marlu::{LatLngHeight, XyzGeocentric};

use super::error::ErfaError;
use crate::constants::{
    DEFAULT_ARRAY_NAME, DEFAULT_HEIGHT_METRES, DEFAULT_LATITUDE_DEGREES,
    DEFAULT_LONGITUDE_DEGREES,
};

/// Where the array is. Antenna positions are local offsets from here.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayGeometry {
    /// Geodetic position of the array centre
    pub location: LatLngHeight,
    /// Name written to the antenna table
    pub name: String,
}

impl Default for ArrayGeometry {
    fn default() -> Self {
        Self::from_lon_lat_degrees(DEFAULT_LONGITUDE_DEGREES, DEFAULT_LATITUDE_DEGREES)
    }
}

impl ArrayGeometry {
    /// An array at the given longitude and latitude \[degrees\], at the default
    /// height.
    pub fn from_lon_lat_degrees(longitude_deg: f64, latitude_deg: f64) -> Self {
        Self {
            location: LatLngHeight {
                longitude_rad: longitude_deg.to_radians(),
                latitude_rad: latitude_deg.to_radians(),
                height_metres: DEFAULT_HEIGHT_METRES,
            },
            name: DEFAULT_ARRAY_NAME.to_string(),
        }
    }

    /// Array latitude \[radians\]
    pub fn latitude_rad(&self) -> f64 {
        self.location.latitude_rad
    }

    /// Array longitude \[radians\]
    pub fn longitude_rad(&self) -> f64 {
        self.location.longitude_rad
    }

    /// The earth-centred position of the array centre on the WGS84 ellipsoid.
    ///
    /// # Errors
    ///
    /// Will return an [`ErfaError`] if the latitude is not within ±90°.
    pub fn to_geocentric(&self) -> Result<XyzGeocentric, ErfaError> {
        let LatLngHeight {
            longitude_rad,
            latitude_rad,
            height_metres,
        } = self.location;
        if !(-std::f64::consts::FRAC_PI_2..=std::f64::consts::FRAC_PI_2).contains(&latitude_rad) {
            return Err(ErfaError {
                source_file: file!(),
                source_line: line!(),
                status: -2,
                function: "eraGd2gc",
                message: format!("latitude {}° is out of range", latitude_rad.to_degrees()),
            });
        }
        let geocentric = erfa::transform::geodetic_to_geocentric(
            Ellipsoid::WGS84,
            longitude_rad,
            latitude_rad,
            height_metres,
        )
        .map_err(|_| ErfaError {
            source_file: file!(),
            source_line: line!(),
            status: -2,
            function: "eraGd2gc",
            message: "illegal geodetic position".to_string(),
        })?;
        Ok(XyzGeocentric {
            x: geocentric[0],
            y: geocentric[1],
            z: geocentric[2],
        })
    }
}

impl Display for ArrayGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.name, self.location)
    }
}
