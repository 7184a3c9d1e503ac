//! Flow routing models over a conditioned DEM.
//!
//! Four models are supported, all producing a [`FlowField`]:
//!
//! - **D8** (O'Callaghan & Mark, 1984): all flow to the steepest
//!   downslope neighbor.
//! - **Rho8** (Fairfield & Leymarie, 1991): the aspect angle picks one
//!   of the two neighbors straddling it, stochastically in proportion
//!   to the angular remainder.
//! - **D-infinity** (Tarboton, 1997 style): the same two neighbors, but
//!   flow is split deterministically by the angular remainder.
//! - **MFD** (Freeman, 1991): flow is divided among all downslope
//!   neighbors proportional to slope raised to a convergence exponent.
//!
//! Cells with no strictly lower neighbor route nowhere, which keeps the
//! induced drainage graph acyclic regardless of model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use demflow_core::monitor::Monitor;
use demflow_core::raster::{GeoTransform, Raster};
use demflow_core::{Algorithm, Error, Result};

use crate::neighbors::{neighbor, DIST_FACTOR};

/// Routing model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowModel {
    #[default]
    D8,
    Rho8,
    DInfinity,
    Mfd,
}

/// Parameters for [`flow_field`].
#[derive(Debug, Clone)]
pub struct FlowParams {
    pub model: FlowModel,
    /// Slope exponent for MFD partitioning. Higher values concentrate
    /// flow toward the steepest neighbor.
    pub convergence: f64,
    /// RNG seed for Rho8. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            model: FlowModel::D8,
            convergence: 1.1,
            seed: None,
        }
    }
}

/// Per-cell routing decision.
///
/// `None` marks sinks, outlets and nodata cells alike: nothing leaves
/// the cell. The other variants are what the models produce: a single
/// receiver, a two-way angular split, or a full weight vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowDir {
    None,
    /// All flow to one neighbor.
    Single(u8),
    /// D-infinity split between `first` and the next clockwise
    /// neighbor; `frac` is the share going to the latter.
    Split { first: u8, frac: f32 },
    /// MFD weight per neighbor, summing to 1 over nonzero entries.
    Weighted([f32; 8]),
}

impl FlowDir {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, FlowDir::None)
    }

    /// Fraction of this cell's outflow sent toward neighbor `dir`.
    pub fn weight_to(&self, dir: usize) -> f64 {
        match *self {
            FlowDir::None => 0.0,
            FlowDir::Single(d) => {
                if d as usize == dir {
                    1.0
                } else {
                    0.0
                }
            }
            FlowDir::Split { first, frac } => {
                let second = (first as usize + 1) % 8;
                if first as usize == dir {
                    1.0 - frac as f64
                } else if second == dir {
                    frac as f64
                } else {
                    0.0
                }
            }
            FlowDir::Weighted(w) => w[dir] as f64,
        }
    }

    /// Direction carrying the largest share, lowest index on ties.
    pub fn steepest(&self) -> Option<usize> {
        match *self {
            FlowDir::None => None,
            FlowDir::Single(d) => Some(d as usize),
            FlowDir::Split { first, frac } => {
                if frac > 0.5 {
                    Some((first as usize + 1) % 8)
                } else {
                    Some(first as usize)
                }
            }
            FlowDir::Weighted(w) => {
                let mut best = 0;
                let mut best_w = w[0];
                for (i, &wi) in w.iter().enumerate().skip(1) {
                    if wi > best_w {
                        best_w = wi;
                        best = i;
                    }
                }
                if best_w > 0.0 {
                    Some(best)
                } else {
                    None
                }
            }
        }
    }

    /// Iterate over `(direction, weight)` pairs with nonzero weight.
    pub fn outflows(&self) -> Outflows {
        let mut flows = [(0usize, 0.0f64); 8];
        let mut len = 0;
        for dir in 0..8 {
            let w = self.weight_to(dir);
            if w > 0.0 {
                flows[len] = (dir, w);
                len += 1;
            }
        }
        Outflows { flows, len, pos: 0 }
    }
}

/// Iterator returned by [`FlowDir::outflows`].
pub struct Outflows {
    flows: [(usize, f64); 8],
    len: usize,
    pos: usize,
}

impl Iterator for Outflows {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<(usize, f64)> {
        if self.pos < self.len {
            let item = self.flows[self.pos];
            self.pos += 1;
            Some(item)
        } else {
            None
        }
    }
}

/// Routing decisions for a whole grid, plus the geometry needed to
/// turn directions into distances and coordinates.
#[derive(Debug, Clone)]
pub struct FlowField {
    rows: usize,
    cols: usize,
    cell_size: f64,
    transform: GeoTransform,
    dirs: Vec<FlowDir>,
    valid: Vec<bool>,
}

impl FlowField {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> FlowDir {
        self.dirs[row * self.cols + col]
    }

    /// Whether the source DEM had data at this cell.
    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[row * self.cols + col]
    }

    /// Center-to-center distance covered by a step in `dir`.
    #[inline]
    pub fn dir_distance(&self, dir: usize) -> f64 {
        DIST_FACTOR[dir] * self.cell_size
    }

    /// Steepest receiver of `(row, col)`, if any.
    pub fn downslope(&self, row: usize, col: usize) -> Option<(usize, usize)> {
        let dir = self.get(row, col).steepest()?;
        neighbor(row, col, dir, self.rows, self.cols)
    }

    /// Fraction of the outflow of the neighbor in direction `dir` that
    /// enters `(row, col)`. Zero when the neighbor is off-grid.
    pub fn inflow(&self, row: usize, col: usize, dir: usize) -> f64 {
        match neighbor(row, col, dir, self.rows, self.cols) {
            Some((nr, nc)) => self.get(nr, nc).weight_to(crate::neighbors::opposite(dir)),
            None => 0.0,
        }
    }

    /// Check whether shapes of a companion raster match this field.
    pub fn check_shape<T: demflow_core::raster::RasterElement>(
        &self,
        raster: &Raster<T>,
    ) -> Result<()> {
        let (rr, rc) = raster.shape();
        if (rr, rc) != (self.rows, self.cols) {
            return Err(Error::SizeMismatch {
                er: self.rows,
                ec: self.cols,
                ar: rr,
                ac: rc,
            });
        }
        Ok(())
    }
}

/// Compute a [`FlowField`] for `dem` under the chosen model.
///
/// The DEM should be hydrologically conditioned first (see
/// [`crate::fill_sinks`]); unresolved depressions come out as
/// [`FlowDir::None`] cells that truncate every path through them.
pub fn flow_field(dem: &Raster<f64>, params: &FlowParams, monitor: &dyn Monitor) -> Result<FlowField> {
    if !(params.convergence > 0.0) {
        return Err(Error::invalid_parameter(
            "convergence",
            params.convergence.to_string(),
            "must be positive",
        ));
    }

    let (rows, cols) = dem.shape();
    let cell_size = dem.cell_size();

    let dirs: Vec<FlowDir> = match params.model {
        // Rho8 draws from a single RNG stream, so it runs sequentially.
        FlowModel::Rho8 => {
            let mut rng = match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut dirs = Vec::with_capacity(rows * cols);
            for row in 0..rows {
                if !monitor.report_progress(row, rows) {
                    return Err(Error::Canceled);
                }
                for col in 0..cols {
                    dirs.push(cell_rho8(dem, row, col, &mut rng));
                }
            }
            dirs
        }
        model => {
            let row_dirs: Vec<Vec<FlowDir>> = (0..rows)
                .into_par_iter()
                .map(|row| {
                    let mut row_data = vec![FlowDir::None; cols];
                    for col in 0..cols {
                        row_data[col] = match model {
                            FlowModel::D8 => cell_d8(dem, row, col),
                            FlowModel::DInfinity => cell_dinf(dem, row, col),
                            FlowModel::Mfd => cell_mfd(dem, row, col, params.convergence),
                            FlowModel::Rho8 => unreachable!(),
                        };
                    }
                    row_data
                })
                .collect();
            if monitor.is_canceled() {
                return Err(Error::Canceled);
            }
            row_dirs.into_iter().flatten().collect()
        }
    };

    let mut valid = vec![false; rows * cols];
    for row in 0..rows {
        for col in 0..cols {
            valid[row * cols + col] = !dem.is_nodata_at(row, col);
        }
    }

    Ok(FlowField {
        rows,
        cols,
        cell_size,
        transform: dem.transform().clone(),
        dirs,
        valid,
    })
}

/// True when the cell has data and at least one strictly lower
/// neighbor with data.
fn has_downslope(dem: &Raster<f64>, row: usize, col: usize) -> bool {
    let (rows, cols) = dem.shape();
    let center = unsafe { dem.get_unchecked(row, col) };
    for dir in 0..8 {
        if let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) {
            if !dem.is_nodata_at(nr, nc) && unsafe { dem.get_unchecked(nr, nc) } < center {
                return true;
            }
        }
    }
    false
}

fn cell_d8(dem: &Raster<f64>, row: usize, col: usize) -> FlowDir {
    if dem.is_nodata_at(row, col) {
        return FlowDir::None;
    }
    let (rows, cols) = dem.shape();
    let center = unsafe { dem.get_unchecked(row, col) };
    let cell_size = dem.cell_size();

    let mut max_slope = 0.0_f64;
    let mut best: Option<usize> = None;

    for dir in 0..8 {
        let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
            continue;
        };
        if dem.is_nodata_at(nr, nc) {
            continue;
        }
        let drop = center - unsafe { dem.get_unchecked(nr, nc) };
        let slope = drop / (DIST_FACTOR[dir] * cell_size);
        // Strict comparison keeps the lowest direction index on ties.
        if slope > max_slope {
            max_slope = slope;
            best = Some(dir);
        }
    }

    match best {
        Some(dir) => FlowDir::Single(dir as u8),
        None => FlowDir::None,
    }
}

fn cell_rho8(dem: &Raster<f64>, row: usize, col: usize, rng: &mut StdRng) -> FlowDir {
    if dem.is_nodata_at(row, col) || !has_downslope(dem, row, col) {
        return FlowDir::None;
    }
    let Some(aspect) = aspect_deg(dem, row, col) else {
        return FlowDir::None;
    };
    let sector = (aspect / 45.0).floor() as usize % 8;
    let frac = (aspect % 45.0) / 45.0;
    let dir = if rng.gen::<f64>() < frac {
        (sector + 1) % 8
    } else {
        sector
    };
    FlowDir::Single(dir as u8)
}

fn cell_dinf(dem: &Raster<f64>, row: usize, col: usize) -> FlowDir {
    if dem.is_nodata_at(row, col) || !has_downslope(dem, row, col) {
        return FlowDir::None;
    }
    let Some(aspect) = aspect_deg(dem, row, col) else {
        return FlowDir::None;
    };
    let sector = (aspect / 45.0).floor() as usize % 8;
    let frac = (aspect % 45.0) / 45.0;
    FlowDir::Split {
        first: sector as u8,
        frac: frac as f32,
    }
}

fn cell_mfd(dem: &Raster<f64>, row: usize, col: usize, convergence: f64) -> FlowDir {
    if dem.is_nodata_at(row, col) {
        return FlowDir::None;
    }
    let (rows, cols) = dem.shape();
    let center = unsafe { dem.get_unchecked(row, col) };
    let cell_size = dem.cell_size();

    let mut weights = [0.0_f64; 8];
    let mut total = 0.0_f64;

    for dir in 0..8 {
        let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
            continue;
        };
        if dem.is_nodata_at(nr, nc) {
            continue;
        }
        let drop = center - unsafe { dem.get_unchecked(nr, nc) };
        if drop > 0.0 {
            let w = (drop / (DIST_FACTOR[dir] * cell_size)).powf(convergence);
            weights[dir] = w;
            total += w;
        }
    }

    if total <= 0.0 {
        return FlowDir::None;
    }

    let mut out = [0.0_f32; 8];
    for dir in 0..8 {
        out[dir] = (weights[dir] / total) as f32;
    }
    FlowDir::Weighted(out)
}

/// Downslope azimuth in degrees clockwise from north via second-order
/// finite differences on the 4-connected neighbors. `None` on flats.
/// Missing or nodata neighbors are substituted with the center value.
fn aspect_deg(dem: &Raster<f64>, row: usize, col: usize) -> Option<f64> {
    let (rows, cols) = dem.shape();
    let center = unsafe { dem.get_unchecked(row, col) };
    let cell_size = dem.cell_size();

    let sample = |dir: usize| -> f64 {
        match neighbor(row, col, dir, rows, cols) {
            Some((nr, nc)) if !dem.is_nodata_at(nr, nc) => unsafe { dem.get_unchecked(nr, nc) },
            _ => center,
        }
    };

    let z_n = sample(0);
    let z_e = sample(2);
    let z_s = sample(4);
    let z_w = sample(6);

    let zx = (z_e - z_w) / (2.0 * cell_size);
    let zy = (z_n - z_s) / (2.0 * cell_size);

    if zx.abs() < f64::EPSILON && zy.abs() < f64::EPSILON {
        return None;
    }

    // Steepest descent is opposite the gradient; azimuth is measured
    // clockwise from north.
    let mut azimuth = (-zx).atan2(-zy).to_degrees();
    if azimuth < 0.0 {
        azimuth += 360.0;
    }
    Some(azimuth)
}

/// Flow direction as an [`Algorithm`].
#[derive(Debug, Clone, Default)]
pub struct FlowDirection;

impl Algorithm for FlowDirection {
    type Input = Raster<f64>;
    type Output = FlowField;
    type Params = FlowParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Direction"
    }

    fn description(&self) -> &'static str {
        "Route flow from each cell to its downslope neighbors (D8, Rho8, D-infinity or MFD)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params, monitor: &dyn Monitor) -> Result<Self::Output> {
        flow_field(&input, &params, monitor)
    }
}
