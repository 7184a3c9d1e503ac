//! Watershed delineation from a channel network.
//!
//! Outlet cells are derived from the network raster: channel cells
//! draining off the network (or off the grid), cells marked with a
//! negative network value (user-forced outlets), and the upslope
//! branches of channel junctions. Basins are grown upslope from each
//! outlet over the drainage graph, highest outlet first, and basins
//! smaller than the configured minimum are dissolved back into the
//! unlabeled background.

use tracing::debug;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;

/// Label for cells belonging to no basin; doubles as the output
/// nodata value.
pub const NO_BASIN: i32 = -1;

/// Parameters for [`watersheds`].
#[derive(Debug, Clone, Default)]
pub struct WatershedParams {
    /// Basins with fewer cells than this are dissolved.
    pub min_size: usize,
}

/// Delineate watersheds draining to each network outlet.
///
/// Basin ids start at 1; ids are assigned from the highest outlet
/// down. Cells that do not drain to any outlet keep [`NO_BASIN`].
pub fn watersheds(
    dem: &Raster<f64>,
    flow: &FlowField,
    network: &Raster<i32>,
    params: &WatershedParams,
    monitor: &dyn Monitor,
) -> Result<Raster<i32>> {
    flow.check_shape(dem)?;
    flow.check_shape(network)?;

    let (rows, cols) = flow.shape();
    let mut outlets: Vec<(usize, usize, f64)> = Vec::new();

    let channel_at = |row: usize, col: usize| -> i32 {
        if network.is_nodata_at(row, col) {
            0
        } else {
            // Bounds already checked by the caller's iteration.
            unsafe { network.get_unchecked(row, col) }
        }
    };

    for row in 0..rows {
        if !monitor.report_progress(row, rows) {
            return Err(Error::Canceled);
        }
        for col in 0..cols {
            let net = channel_at(row, col);
            if net == 0 {
                continue;
            }
            let z = dem.get(row, col)?;

            let downslope = flow.downslope(row, col);
            let leaves_network = match downslope {
                Some((nr, nc)) => channel_at(nr, nc) == 0,
                None => !dem.is_nodata_at(row, col),
            };
            if leaves_network || net < 0 {
                outlets.push((row, col, z));
                continue;
            }

            // Junction splitting: when two or more channel branches
            // converge here, each of the converging cells starts a
            // basin of its own.
            let mut first: Option<(usize, usize, f64)> = None;
            let mut converging = 0usize;
            for dir in 0..8 {
                let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
                    continue;
                };
                if flow.downslope(nr, nc) != Some((row, col)) || channel_at(nr, nc) <= 0 {
                    continue;
                }
                converging += 1;
                let nz = dem.get(nr, nc)?;
                match converging {
                    1 => first = Some((nr, nc, nz)),
                    2 => {
                        if let Some(f) = first.take() {
                            outlets.push(f);
                        }
                        outlets.push((nr, nc, nz));
                    }
                    _ => outlets.push((nr, nc, nz)),
                }
            }
        }
    }
    debug!(outlets = outlets.len(), "basin outlets located");

    let mut basins: Raster<i32> = dem.with_same_meta::<i32>();
    basins.data_mut().fill(NO_BASIN);
    basins.set_nodata(Some(NO_BASIN));

    // Highest outlet first, so nested sub-basins are claimed before
    // the enclosing basin floods over them.
    outlets.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut next_id = 0;
    for (i, &(row, col, _)) in outlets.iter().enumerate() {
        if !monitor.report_progress(i, outlets.len()) {
            return Err(Error::Canceled);
        }
        next_id += 1;
        let size = fill_basin(flow, &mut basins, &mut stack, row, col, NO_BASIN, next_id);
        if size < params.min_size {
            fill_basin(flow, &mut basins, &mut stack, row, col, next_id, NO_BASIN);
            next_id -= 1;
        }
    }

    Ok(basins)
}

/// Relabel the upslope area of `(row, col)` from `from` to `to`,
/// following the drainage graph in reverse. Returns the cell count.
fn fill_basin(
    flow: &FlowField,
    basins: &mut Raster<i32>,
    stack: &mut Vec<(usize, usize)>,
    row: usize,
    col: usize,
    from: i32,
    to: i32,
) -> usize {
    let (rows, cols) = flow.shape();
    if basins.get(row, col).unwrap_or(to) != from {
        return 0;
    }

    stack.clear();
    stack.push((row, col));
    unsafe { basins.set_unchecked(row, col, to) };
    let mut count = 0usize;

    while let Some((cr, cc)) = stack.pop() {
        count += 1;
        for dir in 0..8 {
            let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                continue;
            };
            if flow.downslope(nr, nc) == Some((cr, cc))
                && unsafe { basins.get_unchecked(nr, nc) } == from
            {
                unsafe { basins.set_unchecked(nr, nc, to) };
                stack.push((nr, nc));
            }
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_accumulation::{flow_accumulation, AccumulationParams};
    use crate::flow_direction::{flow_field, FlowParams};
    use demflow_core::monitor::Silent;
    use demflow_core::GeoTransform;

    fn dem_from(values: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::from_vec(values, rows, cols).unwrap();
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        dem
    }

    /// One straight channel down the center column.
    fn simple_scene() -> (Raster<f64>, FlowField, Raster<i32>) {
        let mut values = Vec::new();
        for row in 0..5 {
            for col in 0..5i32 {
                values.push((5 - row) as f64 + (col - 2).abs() as f64 * 4.0);
            }
        }
        let dem = dem_from(values, 5, 5);
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();

        let mut network: Raster<i32> = dem.with_same_meta::<i32>();
        network.set_nodata(Some(0));
        for row in 0..5 {
            network.set(row, 2, 1).unwrap();
        }
        (dem, flow, network)
    }

    #[test]
    fn single_channel_gives_single_basin() {
        let (dem, flow, network) = simple_scene();
        let basins =
            watersheds(&dem, &flow, &network, &WatershedParams::default(), &Silent).unwrap();

        // Everything drains through the channel: one basin, id 1.
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(basins.get(row, col).unwrap(), 1, "cell ({row},{col})");
            }
        }
    }

    #[test]
    fn draining_cells_get_exactly_one_basin() {
        #[rustfmt::skip]
        let values = vec![
            9.0, 9.0, 9.0, 9.0, 9.0,
            8.0, 9.0, 9.0, 9.0, 8.0,
            9.0, 7.0, 9.0, 7.0, 9.0,
            9.0, 9.0, 5.0, 9.0, 9.0,
            9.0, 9.0, 3.0, 9.0, 9.0,
        ];
        let dem = dem_from(values, 5, 5);
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        let acc =
            flow_accumulation(&flow, None, &AccumulationParams::default(), &Silent).unwrap();
        let net = crate::channel_network::extract_channel_network(
            &dem,
            &flow,
            &acc,
            &crate::channel_network::ChannelNetworkParams {
                threshold: 1.5,
                ..Default::default()
            },
            &Silent,
        )
        .unwrap();

        let basins =
            watersheds(&dem, &flow, &net.raster, &WatershedParams::default(), &Silent).unwrap();

        // The two branches above the junction land in distinct basins.
        let left = basins.get(2, 1).unwrap();
        let right = basins.get(2, 3).unwrap();
        assert_ne!(left, NO_BASIN);
        assert_ne!(right, NO_BASIN);
        assert_ne!(left, right);

        // Every cell that drains into the network is labeled.
        for row in 0..5 {
            for col in 0..5 {
                let mut reaches_channel = false;
                let (mut r, mut c) = (row, col);
                for _ in 0..25 {
                    if net.raster.get(r, c).unwrap() > 0 {
                        reaches_channel = true;
                        break;
                    }
                    match flow.downslope(r, c) {
                        Some(next) => (r, c) = next,
                        None => break,
                    }
                }
                if reaches_channel {
                    assert_ne!(basins.get(row, col).unwrap(), NO_BASIN, "({row},{col})");
                }
            }
        }
    }

    #[test]
    fn min_size_dissolves_small_basins() {
        let (dem, flow, network) = simple_scene();

        let unfiltered =
            watersheds(&dem, &flow, &network, &WatershedParams::default(), &Silent).unwrap();
        let filtered = watersheds(
            &dem,
            &flow,
            &network,
            &WatershedParams { min_size: 26 },
            &Silent,
        )
        .unwrap();

        // The scene holds 25 cells total, so every basin dissolves.
        assert!(unfiltered.valid_count() > 0);
        assert_eq!(filtered.valid_count(), 0);
    }

    #[test]
    fn forced_outlet_splits_the_channel() {
        let (dem, flow, mut network) = simple_scene();
        // Mark a mid-channel cell as a forced outlet.
        network.set(2, 2, -1).unwrap();

        let basins =
            watersheds(&dem, &flow, &network, &WatershedParams::default(), &Silent).unwrap();
        let upper = basins.get(0, 2).unwrap();
        let lower = basins.get(4, 2).unwrap();
        assert_ne!(upper, NO_BASIN);
        assert_ne!(lower, NO_BASIN);
        assert_ne!(upper, lower, "forced outlet separates upstream basin");
    }
}
