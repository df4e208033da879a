// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur in the io module

use thiserror::Error;

use crate::pos::error::ErfaError;

#[derive(Error, Debug)]
/// All the errors that can occur while writing a uvfits file
pub enum UvfitsWriteError {
    /// An error when trying to write to a row that doesn't exist.
    #[error("Tried to write to group {group_num}, but only {num_groups} groups were committed")]
    BadRowNum {
        /// The 0-based group that was going to be written
        group_num: usize,
        /// The number of groups committed in `GCOUNT`
        num_groups: usize,
    },

    /// The file was finalised before every committed group was written.
    #[error("Tried to finalise the uvfits file after writing {current} of {total} groups")]
    NotEnoughRowsWritten {
        /// The number of groups written
        current: usize,
        /// The number of groups committed in `GCOUNT`
        total: usize,
    },

    /// A frame doesn't have the axes the file was created with.
    #[error("Frame at JD {jd} has {n_freq} channels and {n_pol} pols, expected {expected_freq} and {expected_pol}")]
    BadFrameShape {
        /// Julian date of the frame
        jd: f64,
        /// Channels in the frame
        n_freq: usize,
        /// Pols in the frame
        n_pol: usize,
        /// Channels in the file
        expected_freq: usize,
        /// Pols in the file
        expected_pol: usize,
    },

    /// An error from ERFA.
    #[error(transparent)]
    Erfa(#[from] ErfaError),

    /// An error associated with fitsio.
    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    /// An error when converting a Rust string to a C string.
    #[error(transparent)]
    BadString(#[from] std::ffi::NulError),

    /// An IO error.
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
/// All the errors that can occur while reading a uvfits file
pub enum UvfitsReadError {
    /// Error when opening a fits file.
    #[error("{source_file}:{source_line}\nCouldn't open {fits_filename}: {fits_error}")]
    FitsOpen {
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
        /// The filename of the fits file
        fits_filename: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A required key was missing or had the wrong type.
    #[error("{fits_filename}: couldn't read key {key}: {fits_error}")]
    MissingKey {
        /// The key
        key: String,
        /// The filename of the fits file
        fits_filename: String,
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
    },

    /// The primary HDU is not laid out as random groups of complex samples.
    #[error("{fits_filename} is not a uvfits file: {reason}")]
    NotUvfits {
        /// The filename of the fits file
        fits_filename: String,
        /// What was wrong
        reason: String,
    },

    /// A random-group parameter the reader needs is absent.
    #[error("{fits_filename} has no {ptype} random-group parameter")]
    MissingParameter {
        /// The filename of the fits file
        fits_filename: String,
        /// The missing `PTYPE`
        ptype: &'static str,
    },

    /// Groups must be in time order.
    #[error("{fits_filename} group {group}: time went backwards from JD {previous} to {current}")]
    TimeReversed {
        /// The filename of the fits file
        fits_filename: String,
        /// The 0-based group
        group: usize,
        /// The time of the frame being read
        previous: f64,
        /// The time of the offending group
        current: f64,
    },

    /// An error associated with fitsio.
    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),
}
