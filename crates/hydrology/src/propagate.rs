//! Generic propagation over the drainage graph.
//!
//! Two traversal shapes cover the derived hydrological fields:
//!
//! - [`wavefront_expand`] grows a cost field upslope from seeded
//!   cells, generation by generation, relaxing each reached cell to
//!   the cheapest value seen so far. Distance to the network and
//!   travel time both reduce to this with a different edge cost.
//! - [`upslope_aggregate`] folds a per-cell value over each cell's
//!   complete upslope area, memoized in dependency order the same way
//!   flow accumulation is.

use ndarray::Array2;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;

/// Fold applied by [`upslope_aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Sum of the value over the cell and its whole upslope area.
    Sum,
    /// Maximum of the value over the cell and its upslope area.
    Max,
    /// Arithmetic mean of the value over the cell and its upslope area.
    Mean,
}

/// Grow `field` upslope from the seeded cells.
///
/// `field` holds NaN for unreached cells and finite costs for seeds.
/// `edge_cost(row, col, dir)` is the cost of stepping from a reached
/// cell against the flow to its upslope neighbor in direction `dir`;
/// a cell reachable several ways keeps its cheapest cost. Cells whose
/// flow path never meets a seed stay NaN.
pub fn wavefront_expand(
    flow: &FlowField,
    field: &mut Array2<f64>,
    seeds: Vec<(usize, usize)>,
    mut edge_cost: impl FnMut(usize, usize, usize) -> f64,
    monitor: &dyn Monitor,
) -> Result<()> {
    let (rows, cols) = flow.shape();
    let mut frontier = seeds;
    let mut next: Vec<(usize, usize)> = Vec::new();
    let mut generation = 0usize;

    while !frontier.is_empty() {
        for &(row, col) in &frontier {
            let here = field[[row, col]];
            for dir in 0..8 {
                let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
                    continue;
                };
                if flow.downslope(nr, nc) != Some((row, col)) {
                    continue;
                }
                let cost = here + edge_cost(row, col, dir);
                let known = field[[nr, nc]];
                if known.is_nan() || known > cost {
                    field[[nr, nc]] = cost;
                    next.push((nr, nc));
                }
            }
        }
        std::mem::swap(&mut frontier, &mut next);
        next.clear();
        generation += 1;
        // Progress is indeterminate; report generations so the
        // monitor gets a cancellation point either way.
        if !monitor.report_progress(generation.min(rows + cols), rows + cols) {
            return Err(Error::Canceled);
        }
    }

    Ok(())
}

/// Fold `values` over every cell's upslope area.
///
/// A neighbor contributes when any share of its outflow enters the
/// cell. Cells without data in the flow field come out NaN; nodata
/// values contribute nothing but still pass their upslope fold along.
pub fn upslope_aggregate(
    flow: &FlowField,
    values: &Raster<f64>,
    fold: Aggregate,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    flow.check_shape(values)?;

    let (rows, cols) = flow.shape();
    // Running (fold state, contributing cell count) per cell.
    let mut acc = Array2::<f64>::zeros((rows, cols));
    let mut count = Array2::<u64>::zeros((rows, cols));
    let mut state = vec![0u8; rows * cols];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    const UNVISITED: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

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
                        let own = if values.is_nodata_at(cr, cc) {
                            None
                        } else {
                            Some(unsafe { values.get_unchecked(cr, cc) })
                        };
                        let mut folded = own;
                        let mut cells = own.map_or(0, |_| 1);

                        for dir in 0..8 {
                            if flow.inflow(cr, cc, dir) <= 0.0 {
                                continue;
                            }
                            let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                                continue;
                            };
                            if !flow.is_valid(nr, nc) || state[nr * cols + nc] != DONE {
                                continue;
                            }
                            let up_count = count[[nr, nc]];
                            if up_count == 0 {
                                continue;
                            }
                            let up = acc[[nr, nc]];
                            folded = Some(match (folded, fold) {
                                (None, _) => up,
                                (Some(f), Aggregate::Sum) | (Some(f), Aggregate::Mean) => f + up,
                                (Some(f), Aggregate::Max) => f.max(up),
                            });
                            cells += up_count;
                        }

                        acc[[cr, cc]] = folded.unwrap_or(0.0);
                        count[[cr, cc]] = cells;
                        state[idx] = DONE;
                    }
                    _ => {
                        stack.pop();
                    }
                }
            }
        }
    }

    let mut out = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    for row in 0..rows {
        for col in 0..cols {
            if !flow.is_valid(row, col) || count[[row, col]] == 0 {
                continue;
            }
            out[[row, col]] = match fold {
                Aggregate::Mean => acc[[row, col]] / count[[row, col]] as f64,
                _ => acc[[row, col]],
            };
        }
    }

    let mut raster: Raster<f64> = Raster::from_array(out);
    raster.set_transform(flow.transform().clone());
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_direction::{flow_field, FlowParams};
    use approx::assert_abs_diff_eq;
    use demflow_core::monitor::Silent;
    use demflow_core::GeoTransform;

    fn south_slope(rows: usize, cols: usize) -> (Raster<f64>, FlowField) {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, (rows - row) as f64).unwrap();
            }
        }
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        (dem, flow)
    }

    #[test]
    fn wavefront_accumulates_step_costs() {
        let (_, flow) = south_slope(5, 3);
        let mut field = Array2::from_elem((5, 3), f64::NAN);
        // Seed the bottom row.
        let seeds: Vec<_> = (0..3).map(|col| (4, col)).collect();
        for &(row, col) in &seeds {
            field[[row, col]] = 0.0;
        }
        wavefront_expand(&flow, &mut field, seeds, |_, _, dir| flow.dir_distance(dir), &Silent)
            .unwrap();

        for row in 0..5 {
            for col in 0..3 {
                assert_abs_diff_eq!(field[[row, col]], (4 - row) as f64, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn wavefront_keeps_cheapest_path() {
        let (_, flow) = south_slope(4, 2);
        let mut field = Array2::from_elem((4, 2), f64::NAN);
        // Seed the outlet row with different costs.
        field[[3, 0]] = 5.0;
        field[[3, 1]] = 0.0;
        wavefront_expand(
            &flow,
            &mut field,
            vec![(3, 0), (3, 1)],
            |_, _, dir| flow.dir_distance(dir),
            &Silent,
        )
        .unwrap();
        // Column 0 feeds straight into its expensive seed.
        assert_abs_diff_eq!(field[[2, 0]], 6.0, epsilon = 1e-9);
        assert_abs_diff_eq!(field[[2, 1]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn unreachable_cells_stay_nan() {
        let (_, flow) = south_slope(3, 2);
        let mut field = Array2::from_elem((3, 2), f64::NAN);
        field[[2, 0]] = 0.0;
        wavefront_expand(&flow, &mut field, vec![(2, 0)], |_, _, _| 1.0, &Silent).unwrap();
        // Column 1 drains to (2, 1), never to the seed.
        assert!(field[[0, 1]].is_nan());
        assert!(field[[2, 1]].is_nan());
    }

    #[test]
    fn sum_matches_unweighted_accumulation_shape() {
        let (dem, flow) = south_slope(4, 2);
        let ones = dem.like(1.0);
        let total = upslope_aggregate(&flow, &ones, Aggregate::Sum, &Silent).unwrap();
        assert_eq!(total.get(0, 0).unwrap(), 1.0);
        assert_eq!(total.get(3, 0).unwrap(), 4.0);
    }

    #[test]
    fn max_and_mean_fold_upslope_values() {
        let (dem, flow) = south_slope(4, 1);
        let mut values = dem.like(0.0);
        for (row, v) in [(0, 2.0), (1, 8.0), (2, 4.0), (3, 6.0)] {
            values.set(row, 0, v).unwrap();
        }
        let max = upslope_aggregate(&flow, &values, Aggregate::Max, &Silent).unwrap();
        assert_eq!(max.get(0, 0).unwrap(), 2.0);
        assert_eq!(max.get(1, 0).unwrap(), 8.0);
        assert_eq!(max.get(3, 0).unwrap(), 8.0);

        let mean = upslope_aggregate(&flow, &values, Aggregate::Mean, &Silent).unwrap();
        assert_eq!(mean.get(0, 0).unwrap(), 2.0);
        assert_eq!(mean.get(1, 0).unwrap(), 5.0);
        assert_eq!(mean.get(3, 0).unwrap(), 5.0);
    }

    #[test]
    fn nodata_value_passes_the_fold_through() {
        let (dem, flow) = south_slope(3, 1);
        let mut values = dem.like(3.0);
        values.set(1, 0, f64::NAN).unwrap();
        let sum = upslope_aggregate(&flow, &values, Aggregate::Sum, &Silent).unwrap();
        assert_eq!(sum.get(0, 0).unwrap(), 3.0);
        // The middle cell contributes nothing of its own.
        assert_eq!(sum.get(1, 0).unwrap(), 3.0);
        assert_eq!(sum.get(2, 0).unwrap(), 6.0);
    }
}
