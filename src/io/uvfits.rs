// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Module for uvfits file format reading and writing
//!
//! Visibilities are stored as random groups in the primary HDU, one group per
//! baseline per time step, followed by an `AIPS AN` binary table describing the
//! antennas.

use std::{
    ffi::CString,
    os::raw::{c_char, c_int},
    path::{Path, PathBuf},
};

use fitsio::{errors::check_status as fits_check_status, FitsFile};
use itertools::izip;
use log::{debug, trace, warn};
use marlu::{c32, hifitime::Epoch, RADec, XyzGeocentric, XyzGeodetic, UVW};

use crate::{
    constants::{DEGREES_PER_DAY, IAT_UTC, INSTRUMENT_NAME, MJD_OFFSET, TELESCOPE_NAME},
    context::{Antenna, AntennaTable},
    pos::pal,
    visibility::{Observation, VisibilityFrame},
};

use super::error::{UvfitsReadError, UvfitsWriteError};

/// Number of random-group parameters written per group.
const NUM_GROUP_PARAMS: usize = 5;

/// From a Julian date, get a formatted date string with the hours, minutes and
/// seconds set to 0.
fn get_truncated_date_string(jd: f64) -> String {
    let (year, month, day, _, _, _, _) = Epoch::from_jde_utc(jd).to_gregorian_utc();
    format!("{year}-{month:02}-{day:02}T00:00:00.0")
}

/// The zero point of the `DATE` parameter.
fn date_zero(jd: f64) -> f64 {
    jd.floor() + 0.5
}

/// Encode a baseline into the uvfits format. Use the miriad convention to
/// handle more than 255 antennas (up to 2048). This is backwards compatible
/// with the standard UVFITS convention. Antenna indices start at 1.
pub fn encode_baseline(ant1: usize, ant2: usize) -> u32 {
    if ant1.max(ant2) > 255 {
        (ant1 * 2048 + ant2 + 65_536) as u32
    } else {
        (ant1 * 256 + ant2) as u32
    }
}

/// Decode a uvfits baseline into the antennas that formed it. Antenna indices
/// start at 1.
pub fn decode_baseline(bl: u32) -> (usize, usize) {
    let bl = bl as usize;
    if bl < 65_536 {
        (bl / 256, bl % 256)
    } else {
        let bl = bl - 65_536;
        (bl / 2048, bl % 2048)
    }
}

/// Owned C strings with a parallel array of mutable pointers, as cfitsio wants
/// for column definitions.
struct CStrings {
    _owned: Vec<CString>,
    ptrs: Vec<*mut c_char>,
}

impl CStrings {
    fn new<T: AsRef<str>>(strings: &[T]) -> Result<Self, std::ffi::NulError> {
        let owned = strings
            .iter()
            .map(|s| CString::new(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let ptrs = owned.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        Ok(Self {
            _owned: owned,
            ptrs,
        })
    }
}

/// A helper struct to write out a uvfits file one time step at a time.
///
/// The number of groups is committed to the header when the file is created,
/// so the caller must know up front how many frames of how many baselines will
/// be written.
pub struct UvfitsWriter {
    /// The path to the uvfits file.
    path: PathBuf,

    /// The open file, positioned on the primary HDU.
    fits: FitsFile,

    /// The number of groups committed in `GCOUNT`.
    total_num_groups: usize,

    /// The number of groups written so far.
    current_num_groups: usize,

    n_freq: usize,
    n_pol: usize,

    /// `PZERO5`, subtracted from each frame's Julian date.
    date_zero: f64,

    /// Julian date of the first frame.
    start_jd: f64,

    /// Centre frequency \[Hz\], also written to the antenna table.
    cent_freq_hz: f64,

    array_name: String,
    array_xyz: XyzGeocentric,

    /// Scratch space for one group.
    group_buf: Vec<f32>,
}

impl UvfitsWriter {
    /// Create a new uvfits file at the specified path, describing the axes of
    /// `obs`. Any frames in `obs` are ignored.
    ///
    /// This will destroy any existing uvfits file at that path.
    ///
    /// # Errors
    ///
    /// Will return an [`UvfitsWriteError`] if:
    /// - there is an existing file at `path` which cannot be removed.
    /// - a fits operation fails.
    pub fn new<T: AsRef<Path>>(
        path: T,
        obs: &Observation,
        num_groups: usize,
        start_jd: f64,
    ) -> Result<Self, UvfitsWriteError> {
        let path = path.as_ref();
        // Delete any file that already exists.
        if path.exists() {
            trace!("file {:?} exists, deleting", path);
            std::fs::remove_file(path)?;
        }

        // Create a new fits file.
        let mut status = 0;
        let c_path = CString::new(path.to_string_lossy().as_ref())?;
        let mut fptr = std::ptr::null_mut();
        trace!("initialising fits file with fitsio_sys ({:?})", path);
        unsafe {
            // ffinit = fits_create_file
            fitsio_sys::ffinit(
                &mut fptr as *mut *mut _, /* O - FITS file pointer                   */
                c_path.as_ptr(),          /* I - name of file to create              */
                &mut status,              /* IO - error status                       */
            );
        }
        fits_check_status(status)?;

        // Initialise the group header. -32 means FLOAT_IMG.
        let mut naxes = [0, 3, obs.n_pol as i64, obs.n_freq as i64, 1, 1];
        trace!("setting group params in fits file ({:?})", path);
        unsafe {
            // ffphpr = fits_write_grphdr
            fitsio_sys::ffphpr(
                fptr,                      /* I - FITS file pointer                        */
                1,                         /* I - does file conform to FITS standard? 1/0  */
                -32,                       /* I - number of bits per data value pixel      */
                naxes.len() as c_int,      /* I - number of axes in the data array         */
                naxes.as_mut_ptr(),        /* I - length of each data axis                 */
                NUM_GROUP_PARAMS as i64,   /* I - number of group parameters (usually 0)   */
                num_groups as i64,         /* I - number of random groups (usually 1 or 0) */
                1,                         /* I - may FITS file have extensions?           */
                &mut status,               /* IO - error status                            */
            );
            fitsio_sys::ffclos(fptr, &mut status);
        }
        fits_check_status(status)?;

        // Reopen with rust-fitsio for the keys.
        let mut u = FitsFile::edit(path)?;
        let hdu = u.hdu(0)?;
        hdu.write_key(&mut u, "BSCALE", 1.0)?;

        let date_zero = date_zero(start_jd);
        for (i, &param) in ["UU", "VV", "WW", "BASELINE", "DATE"].iter().enumerate() {
            let ii = i + 1;
            hdu.write_key(&mut u, &format!("PTYPE{ii}"), param)?;
            hdu.write_key(&mut u, &format!("PSCAL{ii}"), 1.0)?;
            let pzero = if param == "DATE" { date_zero } else { 0.0 };
            hdu.write_key(&mut u, &format!("PZERO{ii}"), pzero)?;
        }
        hdu.write_key(&mut u, "DATE-OBS", get_truncated_date_string(start_jd))?;

        hdu.write_key(&mut u, "CTYPE2", "COMPLEX")?;
        hdu.write_key(&mut u, "CRVAL2", 1.0)?;
        hdu.write_key(&mut u, "CRPIX2", 1.0)?;
        hdu.write_key(&mut u, "CDELT2", 1.0)?;

        hdu.write_key(&mut u, "CTYPE3", "STOKES")?;
        hdu.write_key(&mut u, "CRVAL3", obs.pol_type as i64)?;
        hdu.write_key(&mut u, "CDELT3", if obs.pol_type < 0 { -1_i64 } else { 1 })?;
        hdu.write_key(&mut u, "CRPIX3", 1.0)?;

        hdu.write_key(&mut u, "CTYPE4", "FREQ")?;
        hdu.write_key(&mut u, "CRVAL4", obs.cent_freq_hz)?;
        hdu.write_key(&mut u, "CDELT4", obs.freq_delta_hz)?;
        hdu.write_key(&mut u, "CRPIX4", (obs.n_freq / 2 + 1) as i64)?;

        let ra_deg = obs.phase_centre.ra.to_degrees();
        let dec_deg = obs.phase_centre.dec.to_degrees();
        hdu.write_key(&mut u, "CTYPE5", "RA")?;
        hdu.write_key(&mut u, "CRVAL5", ra_deg)?;
        hdu.write_key(&mut u, "CDELT5", 1_i64)?;
        hdu.write_key(&mut u, "CRPIX5", 1_i64)?;

        hdu.write_key(&mut u, "CTYPE6", "DEC")?;
        hdu.write_key(&mut u, "CRVAL6", dec_deg)?;
        hdu.write_key(&mut u, "CDELT6", 1_i64)?;
        hdu.write_key(&mut u, "CRPIX6", 1_i64)?;

        hdu.write_key(&mut u, "OBSRA", ra_deg)?;
        hdu.write_key(&mut u, "OBSDEC", dec_deg)?;
        hdu.write_key(&mut u, "EPOCH", 2000.0)?;

        hdu.write_key(&mut u, "OBJECT", obs.field_name.as_str())?;
        hdu.write_key(&mut u, "TELESCOP", TELESCOPE_NAME)?;
        hdu.write_key(&mut u, "INSTRUME", INSTRUMENT_NAME)?;

        // This is apparently required...
        let history = CString::new("AIPS WTSCAL =  1.0")?;
        let comment = CString::new(format!(
            "Created by {} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))?;
        unsafe {
            // ffphis = fits_write_history
            fitsio_sys::ffphis(
                u.as_raw(),       /* I - FITS file pointer  */
                history.as_ptr(), /* I - history string     */
                &mut status,      /* IO - error status      */
            );
            // ffpcom = fits_write_comment
            fitsio_sys::ffpcom(
                u.as_raw(),       /* I - FITS file pointer   */
                comment.as_ptr(), /* I - comment string      */
                &mut status,      /* IO - error status       */
            );
        }
        fits_check_status(status)?;

        hdu.write_key(&mut u, "SOFTWARE", env!("CARGO_PKG_NAME"))?;

        debug!(
            "created {:?} with {} groups of {} chans x {} pols",
            path, num_groups, obs.n_freq, obs.n_pol
        );

        Ok(Self {
            path: path.to_path_buf(),
            fits: u,
            total_num_groups: num_groups,
            current_num_groups: 0,
            n_freq: obs.n_freq,
            n_pol: obs.n_pol,
            date_zero,
            start_jd,
            cent_freq_hz: obs.cent_freq_hz,
            array_name: obs.array_name.clone(),
            array_xyz: obs.array_xyz,
            group_buf: Vec::with_capacity(NUM_GROUP_PARAMS + 3 * obs.n_freq * obs.n_pol),
        })
    }

    /// The path being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of groups written so far.
    pub fn num_groups_written(&self) -> usize {
        self.current_num_groups
    }

    /// Append one group per baseline of `frame`.
    ///
    /// # Errors
    ///
    /// Will return an [`UvfitsWriteError`] if the frame's axes don't match the
    /// file, more groups would be written than were committed, or a fits
    /// operation fails.
    pub fn write_frame(&mut self, frame: &VisibilityFrame) -> Result<(), UvfitsWriteError> {
        if frame.n_freq != self.n_freq || frame.n_pol != self.n_pol {
            return Err(UvfitsWriteError::BadFrameShape {
                jd: frame.jd,
                n_freq: frame.n_freq,
                n_pol: frame.n_pol,
                expected_freq: self.n_freq,
                expected_pol: self.n_pol,
            });
        }

        let date = (frame.jd - self.date_zero) as f32;
        let samples_per_baseline = frame.samples_per_baseline();
        let mut status = 0;
        for (&baseline, uvw, vis, weights) in izip!(
            &frame.baselines,
            &frame.uvws,
            frame.vis.chunks_exact(samples_per_baseline),
            frame.weights.chunks_exact(samples_per_baseline),
        ) {
            if self.current_num_groups >= self.total_num_groups {
                return Err(UvfitsWriteError::BadRowNum {
                    group_num: self.current_num_groups,
                    num_groups: self.total_num_groups,
                });
            }

            self.group_buf.clear();
            self.group_buf.extend_from_slice(&[
                uvw.u as f32,
                uvw.v as f32,
                uvw.w as f32,
                baseline as f32,
                date,
            ]);
            for (v, &w) in izip!(vis, weights) {
                self.group_buf.extend_from_slice(&[v.re, v.im, w]);
            }

            unsafe {
                // ffpgpe = fits_write_grppar_flt + fits_write_img_flt
                fitsio_sys::ffpgpe(
                    self.fits.as_raw(),                 /* I - FITS file pointer                      */
                    self.current_num_groups as i64 + 1, /* I - group to write(1 = 1st group)          */
                    1,                                  /* I - first vector element to write(1 = 1st) */
                    self.group_buf.len() as i64,        /* I - number of values to write              */
                    self.group_buf.as_mut_ptr(),        /* I - array of values that are written       */
                    &mut status,                        /* IO - error status                          */
                );
            }
            fits_check_status(status)?;
            self.current_num_groups += 1;
        }
        Ok(())
    }

    /// Check every committed group was written, then append the antenna
    /// table, closing the file.
    ///
    /// # Errors
    ///
    /// Will return an [`UvfitsWriteError`] if fewer groups were written than
    /// committed, or a fits operation fails.
    pub fn finalise(mut self, antennas: &AntennaTable) -> Result<(), UvfitsWriteError> {
        if self.current_num_groups != self.total_num_groups {
            return Err(UvfitsWriteError::NotEnoughRowsWritten {
                current: self.current_num_groups,
                total: self.total_num_groups,
            });
        }
        self.write_antenna_table(antennas)?;
        trace!("finalised {:?}", self.path);
        Ok(())
    }

    fn write_antenna_table(&mut self, antennas: &AntennaTable) -> Result<(), UvfitsWriteError> {
        let uvfits = &mut self.fits;

        let col_names = [
            "ANNAME", "STABXYZ", "NOSTA", "MNTSTA", "STAXOF", "POLTYA", "POLAA", "POLCALA",
            "POLTYB", "POLAB", "POLCALB",
        ];
        let col_formats = [
            "8A", "3D", "1J", "1J", "1E", "1A", "1E", "3E", "1A", "1E", "3E",
        ];
        let col_units = [
            "", "METERS", "", "", "METERS", "", "DEGREES", "", "", "DEGREES", "",
        ];
        let mut c_col_names = CStrings::new(&col_names)?;
        let mut c_col_formats = CStrings::new(&col_formats)?;
        let mut c_col_units = CStrings::new(&col_units)?;
        let extname = CString::new("AIPS AN")?;

        // ffcrtb creates a new binary table in a new HDU, after the primary.
        let mut status = 0;
        unsafe {
            // BINARY_TBL is 2.
            fitsio_sys::ffcrtb(
                uvfits.as_raw(),                 /* I - FITS file pointer                        */
                2,                               /* I - type of table to create                  */
                0,                               /* I - number of rows in the table              */
                col_names.len() as c_int,        /* I - number of columns in the table           */
                c_col_names.ptrs.as_mut_ptr(),   /* I - name of each column                      */
                c_col_formats.ptrs.as_mut_ptr(), /* I - value of TFORMn keyword for each column  */
                c_col_units.ptrs.as_mut_ptr(),   /* I - value of TUNITn keyword for each column  */
                extname.as_ptr(),                /* I - value of EXTNAME keyword, if any         */
                &mut status,                     /* IO - error status                            */
            );
        }
        fits_check_status(status)?;

        let hdu = uvfits.hdu(1)?;
        hdu.write_key(uvfits, "ARRAYX", self.array_xyz.x)?;
        hdu.write_key(uvfits, "ARRAYY", self.array_xyz.y)?;
        hdu.write_key(uvfits, "ARRAYZ", self.array_xyz.z)?;
        hdu.write_key(uvfits, "FREQ", self.cent_freq_hz)?;
        hdu.write_key(uvfits, "FRAME", "ITRF")?;

        // Greenwich mean sidereal time at 0h UT on the first day.
        let mjd = self.start_jd - MJD_OFFSET;
        let gstia0 = pal::gmst(mjd.floor()).to_degrees();
        hdu.write_key(uvfits, "GSTIA0", gstia0)?;
        hdu.write_key(uvfits, "DEGPDY", DEGREES_PER_DAY)?;
        hdu.write_key(uvfits, "RDATE", get_truncated_date_string(self.start_jd))?;

        hdu.write_key(uvfits, "POLARX", 0.0)?;
        hdu.write_key(uvfits, "POLARY", 0.0)?;
        hdu.write_key(uvfits, "UT1UTC", 0.0)?;
        hdu.write_key(uvfits, "DATUTC", 0.0)?;
        hdu.write_key(uvfits, "TIMSYS", "UTC")?;
        hdu.write_key(uvfits, "ARRNAM", self.array_name.as_str())?;
        hdu.write_key(uvfits, "NUMORB", 0_i64)?; // number of orbital parameters in table
        hdu.write_key(uvfits, "NOPCAL", 3_i64)?; // Nr pol calibration values / IF(N_pcal)
        hdu.write_key(uvfits, "FREQID", -1_i64)?; // Frequency setup number
        hdu.write_key(uvfits, "IATUTC", IAT_UTC)?;
        hdu.write_key(uvfits, "NO_IF", 1_i64)?;
        hdu.write_key(uvfits, "XYZHAND", "RIGHT")?;

        // Write to the table row by row.
        for (i, antenna) in antennas.antennas.iter().enumerate() {
            let row = i as i64 + 1;
            let name = CString::new(antenna.name.as_str())?;
            let pol_a = CString::new(antenna.pol_type_a.to_string())?;
            let pol_b = CString::new(antenna.pol_type_b.to_string())?;
            let raw = unsafe { uvfits.as_raw() };
            unsafe {
                // ANNAME. ffpcls = fits_write_col_str
                fitsio_sys::ffpcls(
                    raw,                                        /* I - FITS file pointer                       */
                    1,                                          /* I - number of column to write (1 = 1st col) */
                    row,                                        /* I - first row to write (1 = 1st row)        */
                    1,                                          /* I - first vector element to write (1 = 1st) */
                    1,                                          /* I - number of strings to write              */
                    [name.as_ptr() as *mut c_char].as_mut_ptr(), /* I - array of pointers to strings            */
                    &mut status,                                /* IO - error status                           */
                );
                fits_check_status(status)?;

                let XyzGeodetic { x, y, z } = antenna.position;
                // STABXYZ. ffpcld = fits_write_col_dbl
                fitsio_sys::ffpcld(raw, 2, row, 1, 3, [x, y, z].as_mut_ptr(), &mut status);
                fits_check_status(status)?;

                // NOSTA. ffpclk = fits_write_col_int
                let nosta = antenna.station_num as c_int + 1;
                fitsio_sys::ffpclk(raw, 3, row, 1, 1, [nosta].as_mut_ptr(), &mut status);
                fits_check_status(status)?;

                // MNTSTA
                fitsio_sys::ffpclk(
                    raw,
                    4,
                    row,
                    1,
                    1,
                    [antenna.mount_type as c_int].as_mut_ptr(),
                    &mut status,
                );
                fits_check_status(status)?;

                // STAXOF. ffpcle = fits_write_col_flt
                fitsio_sys::ffpcle(raw, 5, row, 1, 1, [0.0].as_mut_ptr(), &mut status);
                fits_check_status(status)?;

                for (col, pol_type, angle, cal) in [
                    (6, &pol_a, antenna.pol_angle_a, antenna.pol_cal_a),
                    (9, &pol_b, antenna.pol_angle_b, antenna.pol_cal_b),
                ] {
                    // POLTYn
                    fitsio_sys::ffpcls(
                        raw,
                        col,
                        row,
                        1,
                        1,
                        [pol_type.as_ptr() as *mut c_char].as_mut_ptr(),
                        &mut status,
                    );
                    fits_check_status(status)?;
                    // POLn
                    fitsio_sys::ffpcle(raw, col + 1, row, 1, 1, [angle].as_mut_ptr(), &mut status);
                    fits_check_status(status)?;
                    // POLCALn
                    fitsio_sys::ffpcle(
                        raw,
                        col + 2,
                        row,
                        1,
                        3,
                        [cal, 0.0, 0.0].as_mut_ptr(),
                        &mut status,
                    );
                    fits_check_status(status)?;
                }
            }
        }

        Ok(())
    }
}

/// Write a complete observation to a new uvfits file.
///
/// # Errors
///
/// See: [`UvfitsWriter`]
pub fn write_uvfits<T: AsRef<Path>>(path: T, obs: &Observation) -> Result<(), UvfitsWriteError> {
    let start_jd = obs.start_jd().unwrap_or_default();
    let mut writer = UvfitsWriter::new(path, obs, obs.num_groups(), start_jd)?;
    for frame in &obs.frames {
        writer.write_frame(frame)?;
    }
    writer.finalise(&obs.antennas)
}

/// What the reader got back from [`UvfitsIterator::next_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterStatus {
    /// A new time step is in the frame buffer
    NewTime,
    /// Every group has been read
    EndOfData,
}

/// Where each random-group parameter lives and how to scale it.
#[derive(Clone, Debug, Default)]
struct GroupParams {
    pcount: usize,
    uu: usize,
    vv: usize,
    ww: usize,
    baseline: usize,
    /// There may be more than one `DATE` parameter; they are summed.
    date: Vec<usize>,
    pscal: Vec<f64>,
    pzero: Vec<f64>,
}

impl GroupParams {
    #[inline]
    fn value(&self, raw: &[f32], idx: usize) -> f64 {
        raw[idx] as f64 * self.pscal[idx] + self.pzero[idx]
    }

    fn jd(&self, raw: &[f32]) -> f64 {
        self.date.iter().map(|&idx| self.value(raw, idx)).sum()
    }
}

/// Reads a uvfits file one time step at a time into a reusable frame.
pub struct UvfitsIterator {
    fits: FitsFile,
    filename: String,
    meta: Observation,
    params: GroupParams,
    num_groups: usize,
    next_group: usize,
    frame: VisibilityFrame,
    /// Most baselines a frame should hold, given the antenna table
    max_baselines: Option<usize>,
    warned_overrun: bool,
    param_buf: Vec<f32>,
    data_buf: Vec<f32>,
}

fn read_key<T: fitsio::headers::ReadsKey>(
    fits: &mut FitsFile,
    hdu: &fitsio::hdu::FitsHdu,
    key: &str,
    filename: &str,
) -> Result<T, UvfitsReadError> {
    hdu.read_key(fits, key)
        .map_err(|fits_error| UvfitsReadError::MissingKey {
            key: key.to_string(),
            fits_filename: filename.to_string(),
            fits_error,
        })
}

/// Read the `AIPS AN` table, if there is one. Leaves the primary HDU current.
fn read_antenna_table(
    fits: &mut FitsFile,
    filename: &str,
) -> Result<Option<(AntennaTable, String, XyzGeocentric)>, UvfitsReadError> {
    let hdu = match fits.hdu("AIPS AN") {
        Ok(hdu) => hdu,
        Err(_) => {
            warn!("{filename} has no AIPS AN table");
            fits.hdu(0)?;
            return Ok(None);
        }
    };

    let array_name: String = hdu.read_key(fits, "ARRNAM").unwrap_or_default();
    let array_xyz = XyzGeocentric {
        x: read_key(fits, &hdu, "ARRAYX", filename)?,
        y: read_key(fits, &hdu, "ARRAYY", filename)?,
        z: read_key(fits, &hdu, "ARRAYZ", filename)?,
    };

    let names: Vec<String> = hdu.read_col(fits, "ANNAME")?;
    let n_ant = names.len();
    let nosta: Option<Vec<i32>> = hdu.read_col(fits, "NOSTA").ok();
    let mntsta: Option<Vec<i32>> = hdu.read_col(fits, "MNTSTA").ok();
    let poltya: Option<Vec<String>> = hdu.read_col(fits, "POLTYA").ok();
    let polaa: Option<Vec<f32>> = hdu.read_col(fits, "POLAA").ok();
    let poltyb: Option<Vec<String>> = hdu.read_col(fits, "POLTYB").ok();
    let polab: Option<Vec<f32>> = hdu.read_col(fits, "POLAB").ok();

    // STABXYZ is a vector column, which rust-fitsio only reads the first
    // element of.
    let mut status = 0;
    let mut colnum: c_int = 0;
    let mut xyz = vec![0.0_f64; 3 * n_ant];
    let templt = CString::new("STABXYZ").map_err(|_| UvfitsReadError::NotUvfits {
        fits_filename: filename.to_string(),
        reason: "bad column name".to_string(),
    })?;
    unsafe {
        // ffgcno = fits_get_colnum
        fitsio_sys::ffgcno(
            fits.as_raw(),
            0,
            templt.as_ptr() as *mut c_char,
            &mut colnum,
            &mut status,
        );
        fits_check_status(status)?;
        if n_ant > 0 {
            // ffgcvd = fits_read_col_dbl
            fitsio_sys::ffgcvd(
                fits.as_raw(),      /* I - FITS file pointer                       */
                colnum,             /* I - number of column to read (1 = 1st col)  */
                1,                  /* I - first row to read (1 = 1st row)         */
                1,                  /* I - first vector element to read (1 = 1st)  */
                xyz.len() as i64,   /* I - number of values to read                */
                0.0,                /* I - value for null pixels                   */
                xyz.as_mut_ptr(),   /* O - array of values that are read           */
                &mut 0,             /* O - set to 1 if any values are null; else 0 */
                &mut status,        /* IO - error status                           */
            );
            fits_check_status(status)?;
        }
    }

    let first_char = |col: &Option<Vec<String>>, i: usize, default: char| {
        col.as_ref()
            .and_then(|c| c.get(i))
            .and_then(|s| s.trim().chars().next())
            .unwrap_or(default)
    };
    let antennas = names
        .iter()
        .zip(xyz.chunks_exact(3))
        .enumerate()
        .map(|(i, (name, pos))| {
            let station_num = nosta
                .as_ref()
                .and_then(|n| n.get(i))
                .map_or(i, |&n| (n.max(1) - 1) as usize);
            let mut antenna = Antenna::new(
                name.trim(),
                station_num,
                XyzGeodetic {
                    x: pos[0],
                    y: pos[1],
                    z: pos[2],
                },
            );
            if let Some(&mount) = mntsta.as_ref().and_then(|m| m.get(i)) {
                antenna.mount_type = mount;
            }
            antenna.pol_type_a = first_char(&poltya, i, 'X');
            antenna.pol_type_b = first_char(&poltyb, i, 'Y');
            if let Some(&angle) = polaa.as_ref().and_then(|p| p.get(i)) {
                antenna.pol_angle_a = angle;
            }
            if let Some(&angle) = polab.as_ref().and_then(|p| p.get(i)) {
                antenna.pol_angle_b = angle;
            }
            antenna
        })
        .collect();

    fits.hdu(0)?;
    Ok(Some((AntennaTable { antennas }, array_name, array_xyz)))
}

impl UvfitsIterator {
    /// Open a uvfits file and decode everything but the visibilities.
    ///
    /// # Errors
    ///
    /// Will return an [`UvfitsReadError`] if the file can't be opened, or its
    /// primary HDU doesn't describe random groups of complex samples over
    /// `STOKES` and `FREQ` axes.
    pub fn open<T: AsRef<Path>>(path: T) -> Result<Self, UvfitsReadError> {
        let filename = path.as_ref().display().to_string();
        let mut fits = FitsFile::open(path.as_ref()).map_err(|fits_error| {
            UvfitsReadError::FitsOpen {
                fits_error,
                fits_filename: filename.clone(),
                source_file: file!(),
                source_line: line!(),
            }
        })?;
        let hdu = fits.hdu(0)?;
        let not_uvfits = |reason: String| UvfitsReadError::NotUvfits {
            fits_filename: filename.clone(),
            reason,
        };

        let naxis: i64 = read_key(&mut fits, &hdu, "NAXIS", &filename)?;
        if naxis < 4 {
            return Err(not_uvfits(format!("NAXIS is {naxis}")));
        }
        let naxis2: i64 = read_key(&mut fits, &hdu, "NAXIS2", &filename)?;
        if naxis2 != 3 {
            return Err(not_uvfits(format!("NAXIS2 is {naxis2}, expected 3")));
        }
        for (axis, expected) in [(3, "STOKES"), (4, "FREQ")] {
            let ctype: String = read_key(&mut fits, &hdu, &format!("CTYPE{axis}"), &filename)?;
            if ctype.trim() != expected {
                return Err(not_uvfits(format!("CTYPE{axis} is {ctype}, expected {expected}")));
            }
        }
        let n_pol = read_key::<i64>(&mut fits, &hdu, "NAXIS3", &filename)? as usize;
        let n_freq = read_key::<i64>(&mut fits, &hdu, "NAXIS4", &filename)? as usize;
        let pcount = read_key::<i64>(&mut fits, &hdu, "PCOUNT", &filename)? as usize;
        let num_groups = read_key::<i64>(&mut fits, &hdu, "GCOUNT", &filename)? as usize;

        let pol_type = read_key::<f64>(&mut fits, &hdu, "CRVAL3", &filename)?.round() as i32;
        let crval4: f64 = read_key(&mut fits, &hdu, "CRVAL4", &filename)?;
        let freq_delta_hz: f64 = read_key(&mut fits, &hdu, "CDELT4", &filename)?;
        let crpix4: f64 = read_key(&mut fits, &hdu, "CRPIX4", &filename)?;
        // re-reference the frequency axis to the centre pixel
        let cent_freq_hz = crval4 + ((n_freq / 2 + 1) as f64 - crpix4) * freq_delta_hz;

        let ra_deg: f64 = match hdu.read_key(&mut fits, "OBSRA") {
            Ok(ra) => ra,
            Err(_) => read_key(&mut fits, &hdu, "CRVAL5", &filename)?,
        };
        let dec_deg: f64 = match hdu.read_key(&mut fits, "OBSDEC") {
            Ok(dec) => dec,
            Err(_) => read_key(&mut fits, &hdu, "CRVAL6", &filename)?,
        };
        let field_name: String = hdu
            .read_key(&mut fits, "OBJECT")
            .unwrap_or_else(|_| "Undefined".to_string());

        let mut params = GroupParams {
            pcount,
            ..Default::default()
        };
        let (mut uu, mut vv, mut ww, mut baseline) = (None, None, None, None);
        for idx in 0..pcount {
            let ii = idx + 1;
            let ptype: String = read_key(&mut fits, &hdu, &format!("PTYPE{ii}"), &filename)?;
            params
                .pscal
                .push(hdu.read_key(&mut fits, &format!("PSCAL{ii}")).unwrap_or(1.0));
            params
                .pzero
                .push(hdu.read_key(&mut fits, &format!("PZERO{ii}")).unwrap_or(0.0));
            match ptype.trim() {
                "UU" | "UU---SIN" => uu = Some(idx),
                "VV" | "VV---SIN" => vv = Some(idx),
                "WW" | "WW---SIN" => ww = Some(idx),
                "BASELINE" => baseline = Some(idx),
                "DATE" => params.date.push(idx),
                other => debug!("ignoring random-group parameter {other}"),
            }
        }
        let missing = |ptype: &'static str| UvfitsReadError::MissingParameter {
            fits_filename: filename.clone(),
            ptype,
        };
        params.uu = uu.ok_or_else(|| missing("UU"))?;
        params.vv = vv.ok_or_else(|| missing("VV"))?;
        params.ww = ww.ok_or_else(|| missing("WW"))?;
        params.baseline = baseline.ok_or_else(|| missing("BASELINE"))?;
        if params.date.is_empty() {
            return Err(missing("DATE"));
        }

        let (antennas, array_name, array_xyz) = read_antenna_table(&mut fits, &filename)?
            .unwrap_or_else(|| (AntennaTable::default(), String::new(), XyzGeocentric::default()));
        let max_baselines = if antennas.is_empty() {
            None
        } else {
            Some(antennas.len() * (antennas.len() + 1) / 2)
        };

        debug!(
            "{filename}: {num_groups} groups of {n_freq} chans x {n_pol} pols, {} antennas",
            antennas.len()
        );

        let meta = Observation {
            field_name,
            phase_centre: RADec::from_degrees(ra_deg, dec_deg),
            n_freq,
            n_pol,
            pol_type,
            cent_freq_hz,
            freq_delta_hz,
            array_name,
            array_xyz,
            antennas,
            frames: vec![],
        };

        Ok(Self {
            fits,
            filename,
            meta,
            num_groups,
            next_group: 0,
            frame: VisibilityFrame::new(0.0, 0, n_freq, n_pol),
            max_baselines,
            warned_overrun: false,
            param_buf: vec![0.0; params.pcount],
            data_buf: vec![0.0; 3 * n_freq * n_pol],
            params,
        })
    }

    /// Everything about the file except the visibilities. `frames` is empty.
    pub fn metadata(&self) -> &Observation {
        &self.meta
    }

    /// The most recently read time step.
    pub fn frame(&self) -> &VisibilityFrame {
        &self.frame
    }

    /// Total number of groups in the file.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    fn read_params(&mut self, group: usize) -> Result<(), UvfitsReadError> {
        let mut status = 0;
        unsafe {
            // ffggpe = fits_read_grppar_flt
            fitsio_sys::ffggpe(
                self.fits.as_raw(),          /* I - FITS file pointer                       */
                1 + group as i64,            /* I - group to read (1 = 1st group)           */
                1,                           /* I - first vector element to read (1 = 1st)  */
                self.param_buf.len() as i64, /* I - number of values to read                */
                self.param_buf.as_mut_ptr(), /* O - array of values that are returned       */
                &mut status,                 /* IO - error status                           */
            );
        }
        fits_check_status(status)?;
        Ok(())
    }

    fn read_data(&mut self, group: usize) -> Result<(), UvfitsReadError> {
        let mut status = 0;
        unsafe {
            // ffgpve = fits_read_img_flt
            fitsio_sys::ffgpve(
                self.fits.as_raw(),         /* I - FITS file pointer                       */
                1 + group as i64,           /* I - group to read (1 = 1st group)           */
                1,                          /* I - first vector element to read (1 = 1st)  */
                self.data_buf.len() as i64, /* I - number of values to read                */
                0.0,                        /* I - value for undefined pixels              */
                self.data_buf.as_mut_ptr(), /* O - array of values that are returned       */
                &mut 0,                     /* O - set to 1 if any values are null; else 0 */
                &mut status,                /* IO - error status                           */
            );
        }
        fits_check_status(status)?;
        Ok(())
    }

    /// Read every group sharing the next time into the frame buffer.
    ///
    /// # Errors
    ///
    /// Will return an [`UvfitsReadError`] if a group's time is earlier than the
    /// frame being read, or a fits operation fails.
    pub fn next_frame(&mut self) -> Result<IterStatus, UvfitsReadError> {
        if self.next_group >= self.num_groups {
            return Ok(IterStatus::EndOfData);
        }

        let mut frame_jd: Option<f64> = None;
        while self.next_group < self.num_groups {
            let group = self.next_group;
            self.read_params(group)?;
            let jd = self.params.jd(&self.param_buf);
            match frame_jd {
                None => {
                    frame_jd = Some(jd);
                    self.frame.reset(jd, 0);
                }
                Some(current) if jd == current => {}
                Some(current) if jd > current => break,
                Some(current) => {
                    return Err(UvfitsReadError::TimeReversed {
                        fits_filename: self.filename.clone(),
                        group,
                        previous: current,
                        current: jd,
                    })
                }
            }

            self.read_data(group)?;
            let p = &self.params;
            let raw = &self.param_buf;
            self.frame.uvws.push(UVW {
                u: p.value(raw, p.uu),
                v: p.value(raw, p.vv),
                w: p.value(raw, p.ww),
            });
            self.frame
                .baselines
                .push(p.value(raw, p.baseline).round() as u32);
            for sample in self.data_buf.chunks_exact(3) {
                self.frame.vis.push(c32::new(sample[0], sample[1]));
                self.frame.weights.push(sample[2]);
            }
            self.next_group += 1;
        }

        if let Some(max_baselines) = self.max_baselines {
            if self.frame.num_baselines() > max_baselines && !self.warned_overrun {
                warn!(
                    "{}: {} baselines at JD {} but the antenna table allows only {}",
                    self.filename,
                    self.frame.num_baselines(),
                    self.frame.jd,
                    max_baselines
                );
                self.warned_overrun = true;
            }
        }
        trace!(
            "read {} baselines at JD {}",
            self.frame.num_baselines(),
            self.frame.jd
        );
        Ok(IterStatus::NewTime)
    }
}

/// Read a whole uvfits file into memory.
///
/// # Errors
///
/// See: [`UvfitsIterator`]
pub fn read_uvfits<T: AsRef<Path>>(path: T) -> Result<Observation, UvfitsReadError> {
    let mut reader = UvfitsIterator::open(path)?;
    let mut obs = reader.metadata().clone();
    while reader.next_frame()? == IterStatus::NewTime {
        obs.frames.push(reader.frame().clone());
    }
    Ok(obs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use float_cmp::{approx_eq, F64Margin};
    use tempfile::tempdir;

    fn synthetic_observation(jds: &[f64]) -> Observation {
        let antennas = AntennaTable {
            antennas: (0..3)
                .map(|i| {
                    Antenna::new(
                        &format!("Tile{i:03}"),
                        i,
                        XyzGeodetic {
                            x: i as f64 * 10.0,
                            y: -(i as f64),
                            z: 0.5,
                        },
                    )
                })
                .collect(),
        };
        let pairs = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];
        let frames = jds
            .iter()
            .enumerate()
            .map(|(t, &jd)| {
                let mut frame = VisibilityFrame::new(jd, pairs.len(), 4, 4);
                for (bl, &(a1, a2)) in pairs.iter().enumerate() {
                    frame.baselines[bl] = encode_baseline(a1 + 1, a2 + 1);
                    frame.uvws[bl] = UVW {
                        u: 1e-8 * bl as f64,
                        v: -2e-8 * bl as f64,
                        w: 3e-9 * t as f64,
                    };
                }
                for (i, (vis, weight)) in frame.vis.iter_mut().zip(frame.weights.iter_mut()).enumerate() {
                    *vis = c32::new(i as f32, -(t as f32));
                    *weight = if i % 7 == 0 { -8.0 } else { 8.0 };
                }
                frame
            })
            .collect();
        Observation {
            field_name: "TEST".to_string(),
            phase_centre: RADec::from_degrees(60.0, -27.0),
            n_freq: 4,
            n_pol: 4,
            pol_type: -5,
            cent_freq_hz: 100e6,
            freq_delta_hz: 10e3,
            array_name: "MWA-32T".to_string(),
            array_xyz: XyzGeocentric {
                x: -2559454.08,
                y: 5095372.14,
                z: -2849057.18,
            },
            antennas,
            frames,
        }
    }

    #[test]
    fn test_baseline_encoding() {
        assert_eq!(encode_baseline(1, 1), 257);
        assert_eq!(encode_baseline(1, 2), 258);
        assert_eq!(encode_baseline(3, 255), 1023);
        assert_eq!(decode_baseline(258), (1, 2));
        assert_eq!(decode_baseline(1023), (3, 255));

        let wide = encode_baseline(2, 300);
        assert_eq!(wide, 2 * 2048 + 300 + 65_536);
        assert_eq!(decode_baseline(wide), (2, 300));
        assert_eq!(encode_baseline(256, 1), 256 * 2048 + 1 + 65_536);
    }

    #[test]
    fn test_baseline_encoding_round_trips_across_wide_threshold() {
        for ant1 in 1..=300 {
            for ant2 in 1..=300 {
                assert_eq!(
                    decode_baseline(encode_baseline(ant1, ant2)),
                    (ant1, ant2),
                    "ant1={ant1} ant2={ant2}"
                );
            }
        }
    }

    #[test]
    fn test_date_zero() {
        assert_abs_diff_eq!(date_zero(2455927.5), 2455927.5);
        assert_abs_diff_eq!(date_zero(2455927.6), 2455927.5);
        assert_abs_diff_eq!(date_zero(2455928.4), 2455928.5);
        assert_eq!(get_truncated_date_string(2455927.75), "2012-01-01T00:00:00.0");
    }

    #[test]
    fn test_write_then_read_whole_file() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("synthetic.uvfits");
        let jd0 = 2455927.5 + 0.3;
        let obs = synthetic_observation(&[jd0, jd0 + 8.0 / 86400.0]);
        write_uvfits(&path, &obs).unwrap();

        let read = read_uvfits(&path).unwrap();
        assert_eq!(read.num_frames(), 2);
        assert_eq!(read.n_freq, 4);
        assert_eq!(read.n_pol, 4);
        assert_eq!(read.pol_type, -5);
        assert_eq!(read.field_name, "TEST");
        assert_eq!(read.array_name, "MWA-32T");
        assert_abs_diff_eq!(read.cent_freq_hz, 100e6);
        assert_abs_diff_eq!(read.freq_delta_hz, 10e3);
        assert_abs_diff_eq!(read.phase_centre.ra, obs.phase_centre.ra, epsilon = 1e-12);
        assert_abs_diff_eq!(read.array_xyz.x, obs.array_xyz.x);
        assert_eq!(read.antennas.len(), 3);
        assert_eq!(read.antennas.antennas[2].name, "Tile002");
        assert_eq!(read.antennas.antennas[2].station_num, 2);
        assert_abs_diff_eq!(read.antennas.antennas[2].position.x, 20.0);
        assert_eq!(read.antennas.antennas[1].pol_type_b, 'Y');
        assert_abs_diff_eq!(read.antennas.antennas[1].pol_angle_b, 90.0);

        for (expected, got) in obs.frames.iter().zip(read.frames.iter()) {
            // DATE is stored as an f32 offset from midnight
            assert!(approx_eq!(
                f64,
                expected.jd,
                got.jd,
                F64Margin::default().epsilon(1e-6)
            ));
            assert_eq!(expected.baselines, got.baselines);
            assert_eq!(expected.vis, got.vis);
            assert_eq!(expected.weights, got.weights);
            // UVWs are stored as f32
            for (e, g) in expected.uvws.iter().zip(got.uvws.iter()) {
                assert_abs_diff_eq!(e.u as f32 as f64, g.u);
                assert_abs_diff_eq!(e.v as f32 as f64, g.v);
                assert_abs_diff_eq!(e.w as f32 as f64, g.w);
            }
        }
    }

    #[test]
    fn test_header_keys() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("keys.uvfits");
        let jd0 = 2455927.5 + 0.3;
        let obs = synthetic_observation(&[jd0]);
        write_uvfits(&path, &obs).unwrap();

        let mut fptr = FitsFile::open(&path).unwrap();
        let hdu = fptr.hdu(0).unwrap();
        let gcount: i64 = hdu.read_key(&mut fptr, "GCOUNT").unwrap();
        assert_eq!(gcount, 6);
        let pcount: i64 = hdu.read_key(&mut fptr, "PCOUNT").unwrap();
        assert_eq!(pcount, 5);
        let pzero5: f64 = hdu.read_key(&mut fptr, "PZERO5").unwrap();
        assert_abs_diff_eq!(pzero5, 2455927.5);
        let crpix4: i64 = hdu.read_key(&mut fptr, "CRPIX4").unwrap();
        assert_eq!(crpix4, 3);
        let instrument: String = hdu.read_key(&mut fptr, "INSTRUME").unwrap();
        assert_eq!(instrument, "128T");
        let date_obs: String = hdu.read_key(&mut fptr, "DATE-OBS").unwrap();
        assert_eq!(date_obs, "2012-01-01T00:00:00.0");

        let an = fptr.hdu("AIPS AN").unwrap();
        let degpdy: f64 = an.read_key(&mut fptr, "DEGPDY").unwrap();
        assert_abs_diff_eq!(degpdy, 360.985);
        let gstia0: f64 = an.read_key(&mut fptr, "GSTIA0").unwrap();
        assert_abs_diff_eq!(gstia0, pal::gmst(55927.0).to_degrees(), epsilon = 1e-9);
        let nosta: Vec<i32> = an.read_col(&mut fptr, "NOSTA").unwrap();
        assert_eq!(nosta, vec![1, 2, 3]);
    }

    #[test]
    fn test_iterator_reuses_frame() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("iter.uvfits");
        let jd0 = 2455927.5 + 0.3;
        let obs = synthetic_observation(&[jd0, jd0 + 1e-3, jd0 + 2e-3]);
        write_uvfits(&path, &obs).unwrap();

        let mut reader = UvfitsIterator::open(&path).unwrap();
        assert_eq!(reader.num_groups(), 18);
        assert!(reader.metadata().frames.is_empty());
        let mut n = 0;
        while reader.next_frame().unwrap() == IterStatus::NewTime {
            assert_eq!(reader.frame().num_baselines(), 6);
            assert_eq!(reader.frame().vis[0].im, -(n as f32));
            n += 1;
        }
        assert_eq!(n, 3);
        assert_eq!(reader.next_frame().unwrap(), IterStatus::EndOfData);
    }

    #[test]
    fn test_time_going_backwards_is_an_error() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("backwards.uvfits");
        let jd0 = 2455927.5 + 0.3;
        let obs = synthetic_observation(&[jd0 + 1e-3, jd0]);
        write_uvfits(&path, &obs).unwrap();

        let mut reader = UvfitsIterator::open(&path).unwrap();
        assert!(matches!(
            reader.next_frame(),
            Err(UvfitsReadError::TimeReversed { group: 6, .. })
        ));
        assert!(read_uvfits(&path).is_err());
    }

    #[test]
    fn test_group_count_is_enforced() {
        let tmp_dir = tempdir().unwrap();
        let jd0 = 2455927.8;
        let obs = synthetic_observation(&[jd0, jd0 + 1e-3]);

        let path = tmp_dir.path().join("too_many.uvfits");
        let mut writer = UvfitsWriter::new(&path, &obs, 6, jd0).unwrap();
        writer.write_frame(&obs.frames[0]).unwrap();
        assert!(matches!(
            writer.write_frame(&obs.frames[1]),
            Err(UvfitsWriteError::BadRowNum {
                group_num: 6,
                num_groups: 6
            })
        ));

        let path = tmp_dir.path().join("too_few.uvfits");
        let mut writer = UvfitsWriter::new(&path, &obs, 12, jd0).unwrap();
        writer.write_frame(&obs.frames[0]).unwrap();
        assert_eq!(writer.num_groups_written(), 6);
        assert!(matches!(
            writer.finalise(&obs.antennas),
            Err(UvfitsWriteError::NotEnoughRowsWritten {
                current: 6,
                total: 12
            })
        ));
    }

    #[test]
    fn test_frame_shape_is_checked() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("shape.uvfits");
        let obs = synthetic_observation(&[2455927.8]);
        let mut writer = UvfitsWriter::new(&path, &obs, 6, 2455927.8).unwrap();
        let frame = VisibilityFrame::new(2455927.8, 6, 2, 4);
        assert!(matches!(
            writer.write_frame(&frame),
            Err(UvfitsWriteError::BadFrameShape { n_freq: 2, .. })
        ));
    }
}
