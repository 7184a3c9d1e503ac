//! Depression filling after Planchon & Darboux (2001).
//!
//! A water surface initialised far above the terrain is drained from
//! the grid edges inward. Phase one lowers the surface to the terrain
//! wherever a descending path to the edge already exists; phase two
//! sweeps the grid in eight alternating directions, relaxing each cell
//! to the lowest level that still drains through some neighbor with at
//! least the configured gradient. The result is a DEM where every cell
//! with data has a strictly descending path to the border.

use ndarray::Array2;
use tracing::{debug, warn};

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Algorithm, Error, Result};

use crate::neighbors::{neighbor, DIST_FACTOR};

/// Water surface start level. Any terrain above this cannot be
/// processed, which no real-world DEM approaches.
const INIT_ELEVATION: f64 = 50_000.0;

/// Upper bound on the drainage stack in phase one. When reached,
/// settled cells stop spreading uphill and the phase-two sweeps pick
/// up the rest.
const MAX_STACK: usize = 4_000_000;

/// Parameters for [`fill_sinks`].
#[derive(Debug, Clone)]
pub struct FillSinksParams {
    /// Minimum slope (degrees) imposed across filled areas. Zero
    /// produces flat fills.
    pub min_slope: f64,
    /// Cap on phase-two sweep rounds before giving up.
    pub max_iterations: usize,
}

impl Default for FillSinksParams {
    fn default() -> Self {
        Self {
            min_slope: 0.01,
            max_iterations: 1000,
        }
    }
}

/// Result of a fill run.
///
/// `converged` is false when the sweep cap was hit first; the returned
/// surface is then still an upper bound on the fill but may retain
/// flow-blocking flats, and callers decide whether that is acceptable.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub dem: Raster<f64>,
    pub converged: bool,
    pub iterations: usize,
}

/// Fill depressions in `dem`.
///
/// Cells in depressions are raised to the spill level plus the
/// configured minimum gradient toward their drainage neighbor. Valid
/// cells fully enclosed by nodata never drain; they come out as nodata.
pub fn fill_sinks(
    dem: &Raster<f64>,
    params: &FillSinksParams,
    monitor: &dyn Monitor,
) -> Result<FillOutcome> {
    if params.min_slope < 0.0 {
        return Err(Error::invalid_parameter(
            "min_slope",
            params.min_slope,
            "must be non-negative",
        ));
    }
    if params.max_iterations == 0 {
        return Err(Error::invalid_parameter(
            "max_iterations",
            params.max_iterations,
            "must be at least 1",
        ));
    }

    if dem.is_empty() {
        return Ok(FillOutcome {
            dem: dem.clone(),
            converged: true,
            iterations: 0,
        });
    }

    let (rows, cols) = dem.shape();
    let cell_size = dem.cell_size();

    // Gradient step per direction.
    let tan_slope = params.min_slope.to_radians().tan();
    let mut eps = [0.0_f64; 8];
    for dir in 0..8 {
        eps[dir] = tan_slope * DIST_FACTOR[dir] * cell_size;
    }

    // Water surface: terrain height on border cells, the start level
    // elsewhere, NaN on nodata.
    let mut surface = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut border = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if dem.is_nodata_at(row, col) {
                continue;
            }
            let z = unsafe { dem.get_unchecked(row, col) };
            let on_border = (0..8).any(|dir| match neighbor(row, col, dir, rows, cols) {
                Some((nr, nc)) => dem.is_nodata_at(nr, nc),
                None => true,
            });
            if on_border {
                surface[[row, col]] = z;
                border.push((row, col));
            } else {
                surface[[row, col]] = INIT_ELEVATION;
            }
        }
    }

    // Phase one: from every border cell, lower neighbors that already
    // sit above the draining level down to their own terrain height.
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for (i, &(row, col)) in border.iter().enumerate() {
        if !monitor.report_progress(i, border.len()) {
            return Err(Error::Canceled);
        }
        dry_upward(dem, &mut surface, &eps, &mut stack, row, col);
    }

    // Phase two: alternating sweeps until a full round changes nothing.
    let r_last = rows as isize - 1;
    let c_last = cols as isize - 1;
    let scan_r0: [isize; 8] = [0, r_last, 0, r_last, 0, r_last, 0, r_last];
    let scan_c0: [isize; 8] = [0, c_last, c_last, 0, c_last, 0, 0, c_last];
    let scan_dr: [isize; 8] = [0, 0, 1, -1, 0, 0, 1, -1];
    let scan_dc: [isize; 8] = [1, -1, 0, 0, -1, 1, 0, 0];
    let wrap_r: [isize; 8] = [1, -1, -r_last, r_last, 1, -1, -r_last, r_last];
    let wrap_c: [isize; 8] = [-c_last, c_last, -1, 1, c_last, -c_last, 1, -1];

    let mut iterations = 0;
    let mut converged = false;

    'rounds: for round in 0..params.max_iterations {
        iterations = round + 1;

        for scan in 0..8 {
            if !monitor.report_progress(round * 8 + scan, params.max_iterations * 8) {
                return Err(Error::Canceled);
            }
            let mut changed = false;

            let mut r = scan_r0[scan];
            let mut c = scan_c0[scan];
            loop {
                let (row, col) = (r as usize, c as usize);
                if !dem.is_nodata_at(row, col) {
                    let z = unsafe { dem.get_unchecked(row, col) };
                    if surface[[row, col]] > z {
                        for dir in 0..8 {
                            let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
                                continue;
                            };
                            if dem.is_nodata_at(nr, nc) {
                                continue;
                            }
                            let drained = surface[[nr, nc]] + eps[dir];
                            if z >= drained {
                                // Terrain itself clears the neighbor:
                                // settle here and drain uphill cells.
                                surface[[row, col]] = z;
                                changed = true;
                                dry_upward(dem, &mut surface, &eps, &mut stack, row, col);
                                break;
                            }
                            if surface[[row, col]] > drained {
                                surface[[row, col]] = drained;
                                changed = true;
                            }
                        }
                    }
                }

                // Advance along the scan line, wrapping at its end.
                r += scan_dr[scan];
                c += scan_dc[scan];
                if r < 0 || r > r_last || c < 0 || c > c_last {
                    r += wrap_r[scan] - scan_dr[scan];
                    c += wrap_c[scan] - scan_dc[scan];
                    if r < 0 || r > r_last || c < 0 || c > c_last {
                        break;
                    }
                }
            }

            // A sweep that settles nothing means the surface is final.
            if !changed {
                converged = true;
                break 'rounds;
            }
        }
    }

    if !converged {
        warn!(
            iterations,
            "sink filling stopped at the iteration cap without converging"
        );
    }

    // Cells never drained are enclosed by nodata; mark them nodata.
    let mut undrained = 0usize;
    for cell in surface.iter_mut() {
        if *cell >= INIT_ELEVATION {
            *cell = f64::NAN;
            undrained += 1;
        }
    }
    if undrained > 0 {
        debug!(undrained, "cells without a drainage path set to nodata");
    }

    let mut out = dem.with_same_meta::<f64>();
    *out.data_mut() = surface;
    out.set_nodata(dem.nodata());

    Ok(FillOutcome {
        dem: out,
        converged,
        iterations,
    })
}

/// Walk uphill from a settled cell, dropping every neighbor whose
/// terrain already clears the draining level down to terrain height.
fn dry_upward(
    dem: &Raster<f64>,
    surface: &mut Array2<f64>,
    eps: &[f64; 8],
    stack: &mut Vec<(usize, usize)>,
    row: usize,
    col: usize,
) {
    let (rows, cols) = dem.shape();
    stack.clear();
    stack.push((row, col));

    while let Some((cr, cc)) = stack.pop() {
        for dir in 0..8 {
            let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                continue;
            };
            if dem.is_nodata_at(nr, nc) || surface[[nr, nc]] != INIT_ELEVATION {
                continue;
            }
            let z = unsafe { dem.get_unchecked(nr, nc) };
            if z >= surface[[cr, cc]] + eps[dir] {
                surface[[nr, nc]] = z;
                if stack.len() < MAX_STACK {
                    stack.push((nr, nc));
                } else {
                    // The neighbor is settled; only its own uphill
                    // walk is left to the phase-two sweeps.
                    debug!("drainage stack saturated, deferring to sweeps");
                }
            }
        }
    }
}

/// Sink filling as an [`Algorithm`].
#[derive(Debug, Clone, Default)]
pub struct FillSinks;

impl Algorithm for FillSinks {
    type Input = Raster<f64>;
    type Output = FillOutcome;
    type Params = FillSinksParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Fill Sinks"
    }

    fn description(&self) -> &'static str {
        "Remove depressions from a DEM (Planchon & Darboux 2001)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params, monitor: &dyn Monitor) -> Result<Self::Output> {
        fill_sinks(&input, &params, monitor)
    }
}
