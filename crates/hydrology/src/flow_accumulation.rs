//! Weighted flow accumulation over a [`FlowField`].
//!
//! Each cell's value is its own weight plus the weighted sum of the
//! accumulation of every upslope neighbor routing into it. Cells are
//! resolved in dependency order with an explicit work stack and a
//! memo array, so catchments of any depth cost O(cells) total.

use ndarray::Array2;
use tracing::debug;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;

/// Parameters for [`flow_accumulation`].
#[derive(Debug, Clone, Default)]
pub struct AccumulationParams {
    /// Multiply the result by the cell area, yielding contributing
    /// area instead of contributing cell count.
    pub area_scale: bool,
}

const UNVISITED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// Cancellation is polled once per this many resolved cells.
const CANCEL_STRIDE: usize = 4096;

/// Accumulate flow over `flow`.
///
/// `weights` supplies the per-cell contribution; when absent every
/// cell contributes 1. Nodata cells yield nodata and contribute
/// nothing downstream.
pub fn flow_accumulation(
    flow: &FlowField,
    weights: Option<&Raster<f64>>,
    params: &AccumulationParams,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    if let Some(w) = weights {
        flow.check_shape(w)?;
    }

    let (rows, cols) = flow.shape();
    let mut acc = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut state = vec![UNVISITED; rows * cols];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut resolved = 0usize;

    let own_weight = |row: usize, col: usize| -> f64 {
        match weights {
            Some(w) if !w.is_nodata_at(row, col) => unsafe { w.get_unchecked(row, col) },
            Some(_) => 0.0,
            None => 1.0,
        }
    };

    for row in 0..rows {
        if !monitor.report_progress(row, rows) {
            return Err(Error::Canceled);
        }
        for col in 0..cols {
            if !flow.is_valid(row, col) || state[row * cols + col] == DONE {
                continue;
            }
            stack.push((row, col));

            while let Some(&(cr, cc)) = stack.last() {
                let idx = cr * cols + cc;
                match state[idx] {
                    UNVISITED => {
                        state[idx] = IN_PROGRESS;
                        // Queue unresolved upslope contributors first.
                        for dir in 0..8 {
                            let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                                continue;
                            };
                            if flow.is_valid(nr, nc)
                                && flow.inflow(cr, cc, dir) > 0.0
                                && state[nr * cols + nc] == UNVISITED
                            {
                                stack.push((nr, nc));
                            }
                        }
                    }
                    IN_PROGRESS => {
                        stack.pop();
                        let mut total = own_weight(cr, cc);
                        for dir in 0..8 {
                            let w = flow.inflow(cr, cc, dir);
                            if w <= 0.0 {
                                continue;
                            }
                            let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                                continue;
                            };
                            if !flow.is_valid(nr, nc) {
                                continue;
                            }
                            if state[nr * cols + nc] == DONE {
                                total += w * acc[[nr, nc]];
                            } else {
                                // Only reachable through a routing cycle.
                                debug!(row = nr, col = nc, "cyclic inflow ignored");
                            }
                        }
                        acc[[cr, cc]] = total;
                        state[idx] = DONE;

                        resolved += 1;
                        if resolved % CANCEL_STRIDE == 0 && monitor.is_canceled() {
                            return Err(Error::Canceled);
                        }
                    }
                    _ => {
                        stack.pop();
                    }
                }
            }
        }
    }

    if params.area_scale {
        let area = flow.cell_size() * flow.cell_size();
        for v in acc.iter_mut() {
            *v *= area;
        }
    }

    let mut out: Raster<f64> = Raster::from_array(acc);
    out.set_transform(flow.transform().clone());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_direction::{flow_field, FlowModel, FlowParams};
    use demflow_core::monitor::Silent;
    use demflow_core::GeoTransform;

    fn dem_from(f: impl Fn(usize, usize) -> f64, rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, f(row, col)).unwrap();
            }
        }
        dem
    }

    #[test]
    fn diagonal_ramp_concentrates_on_the_diagonal() {
        // Uniform ramp from the NW corner (24) down to the SE corner
        // (0); D8 routes everything diagonally toward the outlet.
        let dem = dem_from(|row, col| (24 - 3 * (row + col)) as f64, 5, 5);
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let acc =
            flow_accumulation(&flow, None, &AccumulationParams::default(), &Silent).unwrap();

        // The main diagonal gains exactly one cell per step; lateral
        // cells run their own diagonals and only merge at the edges.
        for i in 0..4 {
            assert_eq!(acc.get(i, i).unwrap(), (i + 1) as f64, "diagonal cell {i}");
        }
        // The outlet corner collects the whole grid.
        assert_eq!(acc.get(4, 4).unwrap(), 25.0);
        // Accumulation grows strictly along the path from the top.
        let (mut r, mut c) = (0, 0);
        while let Some((nr, nc)) = flow.downslope(r, c) {
            assert!(acc.get(nr, nc).unwrap() > acc.get(r, c).unwrap());
            (r, c) = (nr, nc);
        }
        assert_eq!((r, c), (4, 4));
    }

    #[test]
    fn pit_collects_every_cell() {
        let mut dem = dem_from(|_, _| 10.0, 3, 3);
        dem.set(1, 1, 1.0).unwrap();
        // Tilt the rim so each rim cell strictly prefers the pit.
        for (i, (row, col)) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1), (2, 2)]
            .into_iter()
            .enumerate()
        {
            dem.set(row, col, 10.0 + i as f64 * 0.001).unwrap();
        }

        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let acc =
            flow_accumulation(&flow, None, &AccumulationParams::default(), &Silent).unwrap();
        assert_eq!(acc.get(1, 1).unwrap(), 9.0);
    }

    #[test]
    fn mass_is_conserved_under_mfd() {
        // The surface tilts south and slightly west, so every cell
        // drains and all paths terminate at the SW corner.
        let dem = dem_from(|row, col| (50 - 2 * row) as f64 + 0.1 * col as f64, 6, 6);
        let params = FlowParams {
            model: FlowModel::Mfd,
            ..Default::default()
        };
        let flow = flow_field(&dem, &params, &Silent).unwrap();
        let acc =
            flow_accumulation(&flow, None, &AccumulationParams::default(), &Silent).unwrap();

        // Every cell counts itself at least once.
        for row in 0..6 {
            for col in 0..6 {
                assert!(acc.get(row, col).unwrap() >= 1.0);
            }
        }
        // The single sink gathers the whole grid.
        assert!(flow.get(5, 0).is_none());
        let total = acc.get(5, 0).unwrap();
        assert!((total - 36.0).abs() < 1e-3, "sink total {total}");
    }

    #[test]
    fn weights_raster_replaces_unit_contribution() {
        let dem = dem_from(|row, _| (5 - row) as f64, 4, 3);
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();

        let mut weights = dem_from(|_, _| 2.0, 4, 3);
        weights.set(0, 1, f64::NAN).unwrap();

        let acc = flow_accumulation(
            &flow,
            Some(&weights),
            &AccumulationParams::default(),
            &Silent,
        )
        .unwrap();

        // Column flows straight south; top cell contributes 2.
        assert_eq!(acc.get(0, 0).unwrap(), 2.0);
        assert_eq!(acc.get(1, 0).unwrap(), 4.0);
        // A nodata weight contributes nothing but still routes flow.
        assert_eq!(acc.get(0, 1).unwrap(), 0.0);
        assert_eq!(acc.get(1, 1).unwrap(), 2.0);
    }

    #[test]
    fn area_scaling_multiplies_by_cell_area() {
        let mut dem = dem_from(|row, _| (5 - row) as f64, 3, 3);
        dem.set_transform(GeoTransform::new(0.0, 30.0, 10.0, -10.0));
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let acc = flow_accumulation(
            &flow,
            None,
            &AccumulationParams { area_scale: true },
            &Silent,
        )
        .unwrap();
        assert_eq!(acc.get(0, 0).unwrap(), 100.0);
        assert_eq!(acc.get(2, 0).unwrap(), 300.0);
    }

    #[test]
    fn nodata_cells_stay_nodata() {
        let mut dem = dem_from(|row, _| (5 - row) as f64, 3, 3);
        dem.set(0, 2, f64::NAN).unwrap();
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let acc =
            flow_accumulation(&flow, None, &AccumulationParams::default(), &Silent).unwrap();
        assert!(acc.get(0, 2).unwrap().is_nan());
        assert_eq!(acc.get(1, 2).unwrap(), 1.0);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let dem = dem_from(|row, _| (5 - row) as f64, 3, 3);
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let weights: Raster<f64> = Raster::filled(2, 2, 1.0);
        let err = flow_accumulation(
            &flow,
            Some(&weights),
            &AccumulationParams::default(),
            &Silent,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }
}
