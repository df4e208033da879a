// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Input and Ouput data file format modules

pub mod error;
pub mod uvfits;

pub use uvfits::{
    decode_baseline, encode_baseline, read_uvfits, write_uvfits, IterStatus, UvfitsIterator,
    UvfitsWriter,
};
