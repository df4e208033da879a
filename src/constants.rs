// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All physical constants *must* be double precision.

pub use marlu::constants::VEL_C;

/// Default array latitude \[degrees north\], the 32T site.
pub const DEFAULT_LATITUDE_DEGREES: f64 = -26.703319;
/// Default array longitude \[degrees east\], the 32T site.
pub const DEFAULT_LONGITUDE_DEGREES: f64 = 116.67081;
/// Default array altitude \[metres above sea level\].
pub const DEFAULT_HEIGHT_METRES: f64 = 377.0;
/// Array name written to the `ARRNAM` key of the antenna table.
pub const DEFAULT_ARRAY_NAME: &str = "MWA-32T";
/// Value of the `TELESCOP` key.
pub const TELESCOPE_NAME: &str = "MWA";
/// Value of the `INSTRUME` key.
pub const INSTRUMENT_NAME: &str = "128T";

/// Electrical lengthening of RG6 coax relative to vacuum.
pub const CABLE_VELOCITY_FACTOR: f64 = 1.204;
/// Sidereal seconds per solar second, as used for hour angle tracking.
pub const SIDEREAL_RATE: f64 = 1.00274;
/// Earth's rotation rate \[degrees per day\] (`DEGPDY`).
pub const DEGREES_PER_DAY: f64 = 3.60985e2;
/// TAI - UTC \[s\] written to `IATUTC`.
pub const IAT_UTC: f64 = 33.0;
/// Offset between Julian and Modified Julian dates.
pub const MJD_OFFSET: f64 = 2400000.5;
/// Seconds in a day.
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Polarisation products of the correlator, two receptor letters each.
pub const POL_PRODUCTS: &str = "XXXYYXYY";

/// Default sigma threshold used by the auto-flagger.
pub const DEFAULT_AUTOFLAG_SIGMA: f32 = 5.0;
/// Number of neighbouring channels either side used for local statistics.
pub const DEFAULT_AUTOFLAG_N_NEIGHBOURS: usize = 2;
/// Ratio of the interquartile range to the standard deviation of a Gaussian.
pub const IQR_PER_SIGMA: f32 = 1.35;
/// Number of fine channels in a coarse band for narrowband flagging.
pub const COARSE_BAND_CHANS: usize = 32;
/// Number of channels at each coarse band edge excluded from statistics.
pub const COARSE_BAND_EDGE_CHANS: usize = 6;

/// The directive used in flag files to flag a channel everywhere.
pub const CHAN_ALL_ANT_ALL_TIME: &str = "CHAN_ALL_ANT_ALL_TIME";
