// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! corr2uvfits converts raw correlator output, separate streams of per-channel
//! auto- and cross-correlation samples, into UVFITS, applying the astrometric
//! and instrumental corrections needed to make the visibilities physically
//! meaningful.
//!
//! # Examples
//!
//! Convert a dataset from the library, without the command line.
//!
//! ```rust,no_run
//! use corr2uvfits::{
//!     context::{AntennaTable, ArrayGeometry, InputMapping, ObservationHeader},
//!     convert_observation, ConversionOptionsBuilder,
//! };
//!
//! let header = ObservationHeader::read("header.txt").unwrap();
//! let inputs = InputMapping::read("instr_config.txt").unwrap();
//! let geometry = ArrayGeometry::default();
//! let antennas = AntennaTable::read("antenna_locations.txt", &geometry).unwrap();
//!
//! let options = ConversionOptionsBuilder::default()
//!     .autos_in(Some("autos.dat".into()))
//!     .cross_in(Some("cross.dat".into()))
//!     .uvfits_out("out.uvfits".into())
//!     .build()
//!     .unwrap();
//!
//! convert_observation(&header, &inputs, &antennas, &geometry, &options).unwrap();
//! ```
//!
//! # Details
//!
//! The pipeline runs in this order:
//! - [`mapper`] resolves correlator inputs into antennas and baselines.
//! - [`ingest`] reads one scan at a time from the binary dumps, using the
//!   [`pos`] engine for frame quantities and [`corrections`] for the
//!   UVW and phase corrections.
//! - [`flags`] optionally flags outliers in the assembled [`Observation`].
//! - [`io::uvfits`] writes the random groups file.

pub mod constants;
pub mod context;
pub mod corrections;
pub mod error;
pub mod flags;
pub mod ingest;
pub mod io;
pub mod mapper;
pub mod pipeline;
pub mod pos;
pub mod util;
pub mod visibility;

cfg_if::cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
    }
}

#[cfg(test)]
pub(crate) mod test_common;

pub use error::Corr2UvfitsError;
pub use marlu;
pub use pipeline::{
    convert_observation, ConversionOptions, ConversionOptionsBuilder, ConversionReport,
};
pub use visibility::{Observation, VisibilityFrame};

/// Evaluate `$body`, adding the time it took to `$durations[$name]`.
#[macro_export]
macro_rules! with_increment_duration {
    ($durations:expr, $name:expr, $body:block) => {{
        let _now = std::time::Instant::now();
        let _res = $body;
        *$durations
            .entry($name.into())
            .or_insert(std::time::Duration::default()) += _now.elapsed();
        _res
    }};
}
