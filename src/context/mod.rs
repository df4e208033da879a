// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The plain-text inputs describing an observation, parsed once at startup.

pub mod header;
pub mod inputs;
pub mod stations;

use std::io::Lines;

pub use header::{CorrType, ObservationHeader};
pub use inputs::{CorrelatorInput, InputMapping};
pub use stations::{Antenna, AntennaTable};

pub use crate::pos::ArrayGeometry;

use crate::error::ConfigError;

/// Number the lines of a text file from 1, skipping blank lines and `#`
/// comments.
pub(crate) fn meaningful_lines<'a, B: std::io::BufRead + 'a>(
    file: &'a str,
    lines: Lines<B>,
) -> impl Iterator<Item = Result<(usize, String), ConfigError>> + 'a {
    lines
        .enumerate()
        .map(move |(idx, line)| {
            line.map(|l| (idx + 1, l))
                .map_err(|io_error| ConfigError::FileRead {
                    file: file.to_string(),
                    io_error,
                    source_file: file!(),
                    source_line: line!(),
                })
        })
        .filter(|result| match result {
            Ok((_, line)) => {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            }
            Err(_) => true,
        })
}
