// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from the coordinate engine.

use thiserror::Error;

#[derive(Error, Debug)]
#[error(
    "{source_file}:{source_line} Call to ERFA function {function} failed with status {status}: {message}"
)]
/// An ERFA routine rejected its inputs.
pub struct ErfaError {
    /// The file where the error originated (usually `file!()`)
    pub source_file: &'static str,
    /// The line number where the error originated (usually `line!()`)
    pub source_line: u32,
    /// The status code ERFA would report
    pub status: i32,
    /// The name of the erfa function called.
    pub function: &'static str,
    /// What was wrong with the input
    pub message: String,
}
