// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Read scans from the raw correlator dumps.
//!
//! Each scan holds one block per correlation product, for input pairs
//! `(i, j)` with `i <= j` in ascending order. Autocorrelation blocks
//! (`i == j`) are `n_chan` little-endian `f32` from the autos stream,
//! cross-correlation blocks are `n_chan` `(re, im)` pairs from the cross
//! stream.

use std::{
    fmt::Display,
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use marlu::{c32, LatLngHeight, XyzGeodetic};

use crate::{
    constants::VEL_C,
    context::{inputs::decode_pol_index, CorrType, InputMapping, ObservationHeader},
    corrections::{cable_delay_m, channel_wavelengths_m, AntennaUvws, ProductCorrection},
    error::{ConfigError, IngestError},
    io::uvfits::encode_baseline,
    mapper::BaselineMapper,
    pos::{jd_to_mjd, FrameGeometry},
    visibility::VisibilityFrame,
};

/// Where an [`IngestSession`] is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestState {
    /// No streams attached yet
    Uninitialized,
    /// Scans can be read
    Ready,
    /// The streams ended cleanly at a scan boundary
    Exhausted,
    /// A read failed part way through a scan
    Failed,
}

impl Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Uninitialized => "uninitialized",
                Self::Ready => "ready",
                Self::Exhausted => "exhausted",
                Self::Failed => "failed",
            }
        )
    }
}

/// Outcome of reading one block.
enum Block {
    Full,
    /// Nothing at all was left in the stream
    Eof,
}

/// Fill `buf` from `reader`, returning how many bytes were read before the
/// stream ended.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads scans from a pair of correlator dumps, correcting each product as it
/// goes.
pub struct IngestSession<'a, R: Read> {
    header: &'a ObservationHeader,
    inputs: &'a InputMapping,
    mapper: &'a BaselineMapper,
    positions: Vec<XyzGeodetic>,
    array_pos: LatLngHeight,
    /// Frame geometry held fixed for locked pointing
    locked_geometry: Option<FrameGeometry>,
    lambdas_m: Vec<f64>,
    autos: Option<R>,
    crosses: Option<R>,
    state: IngestState,
    scan: usize,
    bytes: Vec<u8>,
    floats: Vec<f32>,
    spectrum: Vec<c32>,
}

impl<'a, R: Read> IngestSession<'a, R> {
    /// Prepare a session. Nothing can be read until streams are attached.
    ///
    /// With `locked_ha_rad`, all frame geometry is evaluated at the first
    /// scan and the apparent hour angle is held at the given value.
    pub fn new(
        header: &'a ObservationHeader,
        inputs: &'a InputMapping,
        mapper: &'a BaselineMapper,
        positions: Vec<XyzGeodetic>,
        array_pos: LatLngHeight,
        locked_ha_rad: Option<f64>,
    ) -> Self {
        let locked_geometry = locked_ha_rad.map(|ha_rad| {
            let mjd = jd_to_mjd(header.scan_jd(0));
            FrameGeometry::new(mjd, &array_pos, header.phase_centre()).with_locked_hour_angle(ha_rad)
        });
        let n_chans = header.n_chans;
        Self {
            header,
            inputs,
            mapper,
            positions,
            array_pos,
            locked_geometry,
            lambdas_m: channel_wavelengths_m(header),
            autos: None,
            crosses: None,
            state: IngestState::Uninitialized,
            scan: 0,
            bytes: vec![0; n_chans * 8],
            floats: vec![0.0; n_chans * 2],
            spectrum: vec![c32::default(); n_chans],
        }
    }

    /// Attach the dump streams, making the session ready.
    ///
    /// # Errors
    ///
    /// Will return [`IngestError::MissingStream`] if the correlation type needs
    /// a stream that was not given, or [`IngestError::NotReady`] if streams
    /// were already attached.
    pub fn attach(&mut self, autos: Option<R>, crosses: Option<R>) -> Result<(), IngestError> {
        if self.state != IngestState::Uninitialized {
            return Err(IngestError::NotReady {
                state: self.state.to_string(),
            });
        }
        let corr_type = self.header.corr_type;
        if corr_type.has_autos() && autos.is_none() {
            return Err(IngestError::MissingStream {
                corr_type: corr_type.as_char(),
                kind: "auto",
            });
        }
        if corr_type.has_crosses() && crosses.is_none() {
            return Err(IngestError::MissingStream {
                corr_type: corr_type.as_char(),
                kind: "cross",
            });
        }
        self.autos = autos;
        self.crosses = crosses;
        self.state = IngestState::Ready;
        Ok(())
    }

    /// The current state.
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Number of scans read so far.
    pub fn scans_read(&self) -> usize {
        self.scan
    }

    /// Read and correct the next scan. Returns `Ok(None)` once the streams end
    /// cleanly at a scan boundary.
    ///
    /// # Errors
    ///
    /// Will return an [`IngestError`] if the session is not ready, or a block
    /// is cut short. Either way the session will not read any further.
    pub fn next_scan(&mut self) -> Result<Option<VisibilityFrame>, IngestError> {
        if self.state != IngestState::Ready {
            return Err(IngestError::NotReady {
                state: self.state.to_string(),
            });
        }
        match self.read_scan() {
            Ok(Some(frame)) => {
                self.scan += 1;
                if self.scan == self.header.n_scans + 1 {
                    warn!(
                        "more scans in the dumps than the {} declared by N_SCANS",
                        self.header.n_scans
                    );
                }
                Ok(Some(frame))
            }
            Ok(None) => {
                self.state = IngestState::Exhausted;
                if self.scan < self.header.n_scans {
                    warn!(
                        "only {} of {} scans were present in the dumps",
                        self.scan, self.header.n_scans
                    );
                }
                Ok(None)
            }
            Err(e) => {
                self.state = IngestState::Failed;
                Err(e)
            }
        }
    }

    /// Read one block of `n_chans` samples into `self.floats`.
    fn read_block(&mut self, cross: bool, inp1: usize, inp2: usize) -> Result<Block, IngestError> {
        let n_chans = self.header.n_chans;
        let values_per_chan = if cross { 2 } else { 1 };
        let n_bytes = n_chans * values_per_chan * 4;
        let reader = if cross {
            self.crosses.as_mut()
        } else {
            self.autos.as_mut()
        }
        .ok_or_else(|| IngestError::MissingStream {
            corr_type: self.header.corr_type.as_char(),
            kind: if cross { "cross" } else { "auto" },
        })?;

        let got = read_fully(reader, &mut self.bytes[..n_bytes])?;
        if got == 0 {
            return Ok(Block::Eof);
        }
        if got < n_bytes {
            return Err(IngestError::ShortRead {
                scan: self.scan,
                inp1,
                inp2,
                expected: n_chans,
                got: got / (values_per_chan * 4),
            });
        }
        LittleEndian::read_f32_into(
            &self.bytes[..n_bytes],
            &mut self.floats[..n_chans * values_per_chan],
        );
        Ok(Block::Full)
    }

    fn read_scan(&mut self) -> Result<Option<VisibilityFrame>, IngestError> {
        let (header, inputs, mapper) = (self.header, self.inputs, self.mapper);
        let corr_type = header.corr_type;
        let n_inputs = header.n_inputs;
        let n_chans = header.n_chans;
        let jd = header.scan_jd(self.scan);

        let geom = match &self.locked_geometry {
            Some(geom) => geom.clone(),
            None => FrameGeometry::new(jd_to_mjd(jd), &self.array_pos, header.phase_centre()),
        };
        debug!(
            "scan {}. lmst: {} (radian). HA: {} (radian). HA J2000: {} (radian)",
            self.scan, geom.lmst, geom.ha_app, geom.ha2000
        );
        let uvws = AntennaUvws::new(&self.positions, &geom);

        let mut frame = VisibilityFrame::new(
            jd,
            mapper.num_baselines(),
            n_chans,
            header.num_pols(),
        );
        let weight = header.weight();
        let mut first_block = true;

        for inp1 in 0..n_inputs {
            for inp2 in inp1..n_inputs {
                if corr_type == CorrType::Auto && inp1 != inp2 {
                    continue;
                }
                if corr_type == CorrType::Cross && inp1 == inp2 {
                    continue;
                }

                let input1 = &inputs.inputs[inp1];
                let input2 = &inputs.inputs[inp2];
                let (mut ant1, mut ant2) = (input1.antenna, input2.antenna);
                let (mut pol1, mut pol2) = (input1.pol, input2.pol);
                // UVFITS wants ant1 <= ant2
                let reversed = ant1 > ant2;
                if reversed {
                    std::mem::swap(&mut ant1, &mut ant2);
                    std::mem::swap(&mut pol1, &mut pol2);
                }
                let pol = decode_pol_index(pol1, pol2);
                let cross = inp1 != inp2;

                match self.read_block(cross, inp1, inp2)? {
                    Block::Full => {}
                    Block::Eof if first_block => return Ok(None),
                    Block::Eof => {
                        return Err(IngestError::ShortRead {
                            scan: self.scan,
                            inp1,
                            inp2,
                            expected: n_chans,
                            got: 0,
                        })
                    }
                }
                first_block = false;

                // cross-pol products of one antenna are read but not kept
                if corr_type == CorrType::Cross && ant1 == ant2 {
                    continue;
                }

                let bl = match mapper.baseline_index(ant1, ant2) {
                    Some(bl) => bl,
                    None => continue,
                };

                let uvw = uvws.baseline(ant1, ant2);
                frame.baselines[bl] = encode_baseline(ant1 + 1, ant2 + 1);
                frame.uvws[bl] = uvw / VEL_C;

                let correction = ProductCorrection {
                    w_m: if header.geom_correct { uvw.w } else { 0.0 },
                    cable_delay_m: cable_delay_m(input1.cable_delta_m, input2.cable_delta_m),
                    reversed,
                    conjugate: header.conjugate,
                };
                trace!(
                    "inps {inp1},{inp2}. ants: {ant1},{ant2} pols: {pol1},{pol2}, polind: {pol}, bl_ind: {bl}, w (m): {}, delay (m): {}, blrev: {reversed}",
                    correction.w_m, correction.cable_delay_m
                );

                if cross {
                    for (vis, pair) in self.spectrum.iter_mut().zip(self.floats.chunks_exact(2)) {
                        *vis = c32::new(pair[0], pair[1]);
                    }
                    correction.apply_spectrum(&mut self.spectrum, &self.lambdas_m);
                }

                let sample_weight = if input1.flagged || input2.flagged {
                    -weight
                } else {
                    weight
                };
                for chan in 0..n_chans {
                    let idx = frame.vis_index(bl, chan, pol);
                    frame.vis[idx] = if cross {
                        self.spectrum[chan]
                    } else {
                        c32::new(self.floats[chan], 0.0)
                    };
                    frame.weights[idx] = sample_weight;
                }
            }
        }

        // no product to read means the dumps can never advance
        if first_block {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

impl<'a> IngestSession<'a, BufReader<File>> {
    /// Open the dump files the correlation type needs and attach them.
    ///
    /// # Errors
    ///
    /// Will return an [`IngestError`] if a needed path was not given or a
    /// file can't be opened.
    pub fn open(
        &mut self,
        autos_path: Option<&Path>,
        crosses_path: Option<&Path>,
    ) -> Result<(), IngestError> {
        let corr_type = self.header.corr_type;
        let open = |path: Option<&Path>, wanted: bool, kind: &'static str| {
            match (wanted, path) {
                (false, _) => Ok(None),
                (true, None) => Err(IngestError::MissingStream {
                    corr_type: corr_type.as_char(),
                    kind,
                }),
                (true, Some(path)) => File::open(path)
                    .map(|f| Some(BufReader::new(f)))
                    .map_err(|io_error| IngestError::Open {
                        kind,
                        path: path.display().to_string(),
                        io_error,
                    }),
            }
        };
        let autos = open(autos_path, corr_type.has_autos(), "auto")?;
        let crosses = open(crosses_path, corr_type.has_crosses(), "cross")?;
        self.attach(autos, crosses)
    }
}

impl<'a, R: Read> Iterator for IngestSession<'a, R> {
    type Item = Result<VisibilityFrame, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != IngestState::Ready {
            return None;
        }
        self.next_scan().transpose()
    }
}

/// Check the dump paths and auto-flagging request suit the correlation type.
///
/// # Errors
///
/// Will return a [`ConfigError`] if a dump the correlation type needs is
/// missing, or auto-flagging was asked for without autocorrelations.
pub fn check_streams(
    corr_type: CorrType,
    have_autos: bool,
    have_crosses: bool,
    autoflag: bool,
) -> Result<(), ConfigError> {
    if autoflag && corr_type == CorrType::Cross {
        return Err(ConfigError::AutoFlagUnavailable {
            reason: "CORRTYPE must be auto or both for autoflagging".to_string(),
        });
    }
    if autoflag && !have_autos {
        return Err(ConfigError::AutoFlagUnavailable {
            reason: "autocorrelations are required for autoflagging".to_string(),
        });
    }
    if corr_type.has_autos() && !have_autos {
        return Err(ConfigError::MissingDump {
            corr_type: corr_type.as_char(),
            kind: "auto",
        });
    }
    if corr_type.has_crosses() && !have_crosses {
        return Err(ConfigError::MissingDump {
            corr_type: corr_type.as_char(),
            kind: "cross",
        });
    }
    Ok(())
}
