// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The handful of Starlink PAL / SLALIB routines needed for mean-to-apparent
//! place conversion, written against the safe `erfa` API.
//!
//! Vectors are `[f64; 3]` and matrices `[[f64; 3]; 3]`, so nothing here needs
//! `unsafe`. Derived from <https://github.com/Starlink/pal> commit 7af65f0.

#![allow(clippy::excessive_precision)]

use erfa::{
    aliases::{
        eraAnp, eraC2s, eraEpj, eraEpj2jd, eraEpv00, eraGmst06, eraP06e, eraPdp, eraPmat06, eraPn,
        eraPnm06a, eraRx, eraRxp, eraRxpv, eraRxr, eraRz, eraS2c,
    },
    constants::{ERFA_AULT, ERFA_DAYSEC, ERFA_DJM0},
};

/// Gravitational radius of the Sun x 2 (2*mu/c**2, AU)
const GR2: f64 = 2.0 * 9.87063e-9;

/// Greenwich mean sidereal time \[radians\] (IAU 2006) of a UT1 modified
/// Julian date.
pub fn gmst(ut1_mjd: f64) -> f64 {
    eraGmst06(ERFA_DJM0, ut1_mjd, ERFA_DJM0, ut1_mjd)
}

/// Spherical coordinates (longitude, latitude) \[radians\] to direction cosines.
pub fn dcs2c(a: f64, b: f64) -> [f64; 3] {
    eraS2c(a, b)
}

/// Direction cosines to spherical coordinates (longitude, latitude) \[radians\].
///
/// The vector need not be normalised.
pub fn dcc2s(v: [f64; 3]) -> (f64, f64) {
    eraC2s(v)
}

/// Normalise an angle into the range `[0, 2pi)`.
pub fn dranrm(angle: f64) -> f64 {
    eraAnp(angle)
}

/// Apply a rotation matrix to a vector.
pub fn dmxv(m: [[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    eraRxp(m, v)
}

/// Transpose a 3x3 matrix, giving the inverse of a rotation.
pub fn transpose(m: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut t = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, &x) in row.iter().enumerate() {
            t[j][i] = x;
        }
    }
    t
}

/// Position and velocity of the Earth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EarthPosVel {
    /// Barycentric velocity \[AU/s\]
    pub vel_bary: [f64; 3],
    /// Barycentric position \[AU\]
    pub pos_bary: [f64; 3],
    /// Heliocentric velocity \[AU/s\]
    pub vel_helio: [f64; 3],
    /// Heliocentric position \[AU\]
    pub pos_helio: [f64; 3],
}

/// Barycentric and heliocentric velocity and position of the Earth at a TDB
/// modified Julian date.
///
/// If `deqx` is positive, the vectors are referred to the mean equator and
/// equinox of Julian epoch `deqx`, otherwise to those of `date`.
pub fn evp(date: f64, deqx: f64) -> EarthPosVel {
    // eraEpv00 warns when the date is outside 1900-2100, PAL ignores it too.
    let (_, mut pvh, mut pvb) = eraEpv00(2400000.5, date);

    if deqx > 0.0 {
        let (d1, d2) = eraEpj2jd(deqx);
        let r = eraPmat06(d1, d2);
        pvh = eraRxpv(r, pvh);
        pvb = eraRxpv(r, pvb);
    }

    EarthPosVel {
        vel_bary: pvb[1].map(|x| x / ERFA_DAYSEC),
        pos_bary: pvb[0],
        vel_helio: pvh[1].map(|x| x / ERFA_DAYSEC),
        pos_helio: pvh[0],
    }
}

/// Bias-precession-nutation matrix (IAU 2006/2000A) from mean coordinates of
/// Julian `epoch` to true coordinates at modified Julian `date`.
///
/// The matrix is in the sense `v(true) = rmatpn * v(mean)`.
pub fn prenut(epoch: f64, date: f64) -> [[f64; 3]; 3] {
    let (d1, d2) = eraEpj2jd(epoch);

    // precession from epoch to J2000.0
    let (eps0, psia, oma, _, _, _, _, _, chia, _, _, _, _, _, _, _) = eraP06e(d1, d2);
    let mut r1 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    eraRz(-chia, &mut r1);
    eraRx(oma, &mut r1);
    eraRz(psia, &mut r1);
    eraRx(-eps0, &mut r1);

    // J2000.0 to date
    let r2 = eraPnm06a(ERFA_DJM0, date);

    eraRxr(r2, r1)
}

/// Star-independent mean-to-apparent parameters, as produced by `palMappa`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeanToApparent {
    /// Time interval for proper motion \[Julian years\]
    pub pm_interval: f64,
    /// Barycentric position of the Earth \[AU\]
    pub earth_pos_bary: [f64; 3],
    /// Heliocentric direction of the Earth (unit vector)
    pub earth_dir_helio: [f64; 3],
    /// (Schwarzschild radius of Sun) / (Sun-Earth distance)
    pub gr2e: f64,
    /// Barycentric Earth velocity in units of c
    pub abv: [f64; 3],
    /// `sqrt(1-v^2)` where `v` is the modulus of `abv`
    pub ab1: f64,
    /// Precession / nutation matrix
    pub rmatpn: [[f64; 3]; 3],
}

impl MeanToApparent {
    /// Compute the parameters for mean place at Julian epoch `eq` and
    /// apparent place at TDB modified Julian `date`.
    pub fn new(eq: f64, date: f64) -> Self {
        let earth = evp(date, eq);
        let (e, earth_dir_helio) = eraPn(earth.pos_helio);
        let abv = earth.vel_bary.map(|x| x * ERFA_AULT);
        let (vm, _) = eraPn(abv);

        Self {
            pm_interval: eraEpj(ERFA_DJM0, date) - eq,
            earth_pos_bary: earth.pos_bary,
            earth_dir_helio,
            gr2e: GR2 / e,
            abv,
            ab1: (1.0 - vm * vm).sqrt(),
            rmatpn: prenut(eq, date),
        }
    }

    /// The parameters flattened in the order of PAL's `amprms[21]`.
    pub fn to_array(&self) -> [f64; 21] {
        let mut amprms = [0.0; 21];
        amprms[0] = self.pm_interval;
        amprms[1..4].copy_from_slice(&self.earth_pos_bary);
        amprms[4..7].copy_from_slice(&self.earth_dir_helio);
        amprms[7] = self.gr2e;
        amprms[8..11].copy_from_slice(&self.abv);
        amprms[11] = self.ab1;
        for (i, row) in self.rmatpn.iter().enumerate() {
            amprms[12 + 3 * i..15 + 3 * i].copy_from_slice(row);
        }
        amprms
    }

    /// Relativistic aberration of a unit vector, normalisation omitted.
    fn aberrate(&self, p1: [f64; 3]) -> [f64; 3] {
        let w = 1.0 + eraPdp(p1, self.abv) / (self.ab1 + 1.0);
        let mut p2 = [0.0; 3];
        for i in 0..3 {
            p2[i] = self.ab1 * p1[i] + w * self.abv[i];
        }
        p2
    }

    /// Mean to geocentric apparent place for a star with no proper motion,
    /// parallax or radial velocity (`palMapqkz`). Light deflection,
    /// aberration and precession-nutation are applied.
    pub fn mapqkz(&self, ra: f64, dec: f64) -> (f64, f64) {
        let p = dcs2c(ra, dec);
        let ehn = self.earth_dir_helio;

        // light deflection
        let pde = eraPdp(p, ehn);
        let w = self.gr2e / (1.0 + pde).max(1e-5);
        let mut p1 = [0.0; 3];
        for i in 0..3 {
            p1[i] = p[i] + w * (ehn[i] - pde * p[i]);
        }

        let p3 = dmxv(self.rmatpn, self.aberrate(p1));
        let (ra, dec) = dcc2s(p3);
        (dranrm(ra), dec)
    }

    /// Apply only annual aberration to a direction, staying in the mean frame.
    pub fn aberration_only(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (_, p1) = eraPn(dcs2c(ra, dec));
        let (_, p2) = eraPn(self.aberrate(p1));
        let (ra, dec) = dcc2s(p2);
        (dranrm(ra), dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// SOFA/ERFA test values, the SLA values predate the current precession
    /// models.
    #[test]
    fn test_gmst() {
        assert_abs_diff_eq!(gmst(53736.), 1.754174971870091203, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_routines() {
        let v1 = dcs2c(3.0123, -0.999);
        assert_abs_diff_eq!(v1[0], -0.5366267667260525, epsilon = 1e-12);
        assert_abs_diff_eq!(v1[1], 0.06977111097651444, epsilon = 1e-12);
        assert_abs_diff_eq!(v1[2], -0.8409302618566215, epsilon = 1e-12);

        let drm1 = [
            [0.9930075842721269, 0.05902743090199868, -0.1022335560329612],
            [-0.07113807138648245, 0.9903204657727545, -0.1191836812279541],
            [0.09420887631983825, 0.1256229973879967, 0.9875948309655174],
        ];
        let drm2 = [
            [-0.1681574770810878, 0.1981362273264315, 0.9656423242187410],
            [-0.2285369373983370, 0.9450659587140423, -0.2337117924378156],
            [-0.9589024617479674, -0.2599853247796050, -0.1136384607117296],
        ];
        let v3 = dmxv(drm2, dmxv(drm1, v1));
        assert_abs_diff_eq!(v3[0], -0.7267487768696160, epsilon = 1e-10);
        assert_abs_diff_eq!(v3[1], 0.5011537352639822, epsilon = 1e-12);
        assert_abs_diff_eq!(v3[2], 0.4697671220397141, epsilon = 1e-12);
    }

    #[test]
    fn test_transpose_inverts_rotation() {
        let r = prenut(2000.0, 55927.0);
        let v = dcs2c(1.2, -0.4);
        let back = dmxv(transpose(r), dmxv(r, v));
        for i in 0..3 {
            assert_abs_diff_eq!(back[i], v[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_dcc2s() {
        let (a, b) = dcc2s([100., -50., 25.]);
        assert_abs_diff_eq!(a, -0.4636476090008061, epsilon = 1e-12);
        assert_abs_diff_eq!(b, 0.2199879773954594, epsilon = 1e-12);
    }

    #[test]
    fn test_dranrm() {
        assert_abs_diff_eq!(dranrm(-0.1), 6.183185307179587, epsilon = 1e-12);
    }

    #[test]
    fn test_evp() {
        let result = evp(2010.0, 2012.0);

        let vbex = [
            1.6957348127008098514e-07,
            -9.1093446116039685966e-08,
            -3.9528532243991863036e-08,
        ];
        let pbex = [
            -0.49771075259730546136,
            -0.80273812396332311359,
            -0.34851593942866060383,
        ];
        let vhex = [
            1.6964379181455713805e-07,
            -9.1147224045727438391e-08,
            -3.9553158272334222497e-08,
        ];
        let phex = [
            -0.50169124421419830639,
            -0.80650980174901798492,
            -0.34997162028527262212,
        ];
        for i in 0..3 {
            assert_abs_diff_eq!(result.vel_bary[i], vbex[i], epsilon = 1e-12);
            assert_abs_diff_eq!(result.pos_bary[i], pbex[i], epsilon = 1e-12);
            assert_abs_diff_eq!(result.vel_helio[i], vhex[i], epsilon = 1e-12);
            assert_abs_diff_eq!(result.pos_helio[i], phex[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mappa() {
        let expected = [
            1.9986310746064646082_f64,
            -0.1728200754134739392,
            0.88745394651412767839,
            0.38472374350184274094,
            -0.17245634725219796679,
            0.90374808622520386159,
            0.3917884696321610738,
            2.0075929387510784968e-08,
            -9.9464149073251757597e-05,
            -1.6125306981057062306e-05,
            -6.9897255793245634435e-06,
            0.99999999489900059935,
            0.99999983777998024959,
            -0.00052248206600935195865,
            -0.00022683144398381763045,
            0.00052248547063364874764,
            0.99999986339269864022,
            1.4950491424992534218e-05,
            0.00022682360163333854623,
            -1.5069005133483779417e-05,
            0.99999997416198904698,
        ];

        let amprms = MeanToApparent::new(2010.0, 55927.0).to_array();
        for (a, e) in amprms.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_aberration_is_small() {
        // annual aberration never exceeds ~20.5 arcsec
        let params = MeanToApparent::new(2000.0, 55927.0);
        let (ra, dec) = params.aberration_only(1.0, -0.5);
        let sep = eraPdp(dcs2c(ra, dec), dcs2c(1.0, -0.5)).min(1.0).acos();
        assert!(sep > 0.0);
        assert!(sep < 21.0_f64.to_radians() / 3600.0);
    }

    #[test]
    fn test_mapqkz_close_to_mean_at_j2000() {
        // at J2000 the apparent place differs from mean by aberration and
        // nutation only, well under an arcminute
        let params = MeanToApparent::new(2000.0, 51544.5);
        let (ra, dec) = params.mapqkz(2.0, 0.3);
        assert_abs_diff_eq!(ra, 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(dec, 0.3, epsilon = 1e-3);
    }
}
