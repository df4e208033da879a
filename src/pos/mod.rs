// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coordinate and time engine.
//!
//! Everything here is a pure function of the observation time, the array
//! location and the phase centre. [`FrameGeometry`] bundles the quantities the
//! UVW corrector needs for one scan.

pub mod earth;
pub mod error;
pub mod pal;

use log::trace;
use marlu::{HADec, LatLngHeight, RADec, XyzGeodetic};

pub use earth::ArrayGeometry;

use self::pal::{dcc2s, dcs2c, dmxv, dranrm, gmst, prenut, transpose, MeanToApparent};
use crate::constants::MJD_OFFSET;

/// Julian epoch of the mean coordinates of the phase centre.
pub const J2000_EPOCH: f64 = 2000.0;

/// Local mean sidereal time \[radians\] at a modified Julian date and east
/// longitude.
pub fn lmst(mjd: f64, longitude_rad: f64) -> f64 {
    dranrm(gmst(mjd) + longitude_rad)
}

/// Convert a Julian date to a modified Julian date.
pub fn jd_to_mjd(jd: f64) -> f64 {
    jd - MJD_OFFSET
}

/// Rotate a spherical position by `rmat`, normalising the longitude.
pub fn rotate_radec(rmat: [[f64; 3]; 3], ra: f64, dec: f64) -> (f64, f64) {
    let (ra2, dec2) = dcc2s(dmxv(rmat, dcs2c(ra, dec)));
    (dranrm(ra2), dec2)
}

/// Rotate a local XYZ position, expressed in the frame of the current epoch, into
/// the J2000 frame. `lmst` and `lmst2000` are the local sidereal time of the
/// epoch and its J2000 counterpart.
pub fn precess_xyz(
    rmatpr: [[f64; 3]; 3],
    xyz: XyzGeodetic,
    lmst: f64,
    lmst2000: f64,
) -> XyzGeodetic {
    let (sep, cep) = lmst.sin_cos();
    let (s2000, c2000) = lmst2000.sin_cos();

    // x axis at zero right ascension
    let rotated = [
        cep * xyz.x - sep * xyz.y,
        sep * xyz.x + cep * xyz.y,
        xyz.z,
    ];
    let [x2, y2, z2] = dmxv(rmatpr, rotated);

    // back to x pointing at lmst2000
    XyzGeodetic {
        x: c2000 * x2 + s2000 * y2,
        y: -s2000 * x2 + c2000 * y2,
        z: z2,
    }
}

/// Frame quantities for a single instant.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameGeometry {
    /// The modified Julian date these were evaluated at
    pub mjd: f64,
    /// Local mean sidereal time \[radians\]
    pub lmst: f64,
    /// Geocentric apparent phase centre
    pub radec_app: RADec,
    /// Apparent hour angle of the phase centre \[radians\]
    pub ha_app: f64,
    /// Phase centre with only annual aberration applied, in the J2000 frame
    pub radec_aber: RADec,
    /// Matrix undoing precession and nutation from the date back to J2000
    pub rmatpr: [[f64; 3]; 3],
    /// Local sidereal time expressed in the J2000 frame \[radians\]
    pub lmst2000: f64,
    /// Array latitude expressed in the J2000 frame \[radians\]
    pub lat2000: f64,
    /// Hour angle of the aberrated phase centre in the J2000 frame \[radians\]
    pub ha2000: f64,
}

impl FrameGeometry {
    /// Compute the frame quantities at `mjd` for a J2000 phase centre seen
    /// from `array_pos`.
    pub fn new(mjd: f64, array_pos: &LatLngHeight, phase_centre: RADec) -> Self {
        let lmst = lmst(mjd, array_pos.longitude_rad);

        let params = MeanToApparent::new(J2000_EPOCH, mjd);
        let (ra_app, dec_app) = params.mapqkz(phase_centre.ra, phase_centre.dec);
        let ha_app = dranrm(lmst - ra_app);

        let (ra_aber, dec_aber) = params.aberration_only(phase_centre.ra, phase_centre.dec);

        let rmatpr = transpose(prenut(J2000_EPOCH, mjd));
        let (lmst2000, lat2000) = rotate_radec(rmatpr, lmst, array_pos.latitude_rad);
        let ha2000 = dranrm(lmst2000 - ra_aber);

        trace!(
            "mjd {mjd}: lmst {lmst}, lmst2000 {lmst2000}, ha {ha_app}, ha2000 {ha2000}, dec_app {dec_app}, lat2000 {lat2000}"
        );

        Self {
            mjd,
            lmst,
            radec_app: RADec::from_radians(ra_app, dec_app),
            ha_app,
            radec_aber: RADec::from_radians(ra_aber, dec_aber),
            rmatpr,
            lmst2000,
            lat2000,
            ha2000,
        }
    }

    /// Hold the apparent hour angle at `ha_rad`, shifting the J2000 hour angle
    /// by the same amount so the two frames stay consistent.
    #[must_use]
    pub fn with_locked_hour_angle(mut self, ha_rad: f64) -> Self {
        let delta = ha_rad - self.ha_app;
        self.ha_app = dranrm(ha_rad);
        self.ha2000 = dranrm(self.ha2000 + delta);
        self
    }

    /// Phase centre direction in the frame of the epoch.
    pub fn apparent_hadec(&self) -> HADec {
        HADec::from_radians(self.ha_app, self.radec_app.dec)
    }

    /// Phase centre direction in the J2000 frame.
    pub fn j2000_hadec(&self) -> HADec {
        HADec::from_radians(self.ha2000, self.radec_aber.dec)
    }

    /// Rotate an antenna position into the J2000 frame.
    pub fn precess(&self, xyz: XyzGeodetic) -> XyzGeodetic {
        precess_xyz(self.rmatpr, xyz, self.lmst, self.lmst2000)
    }
}
