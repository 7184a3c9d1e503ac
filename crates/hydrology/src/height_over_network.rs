//! Elevation above the channel a cell drains to.

use ndarray::Array2;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::Result;

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;

/// Height of every cell over the channel cell its flow path reaches.
///
/// Channel cells are zero. Cells that never reach the network come
/// out nodata. The value can be negative where a filled DEM routes a
/// cell through terrain above it.
pub fn height_over_network(
    dem: &Raster<f64>,
    flow: &FlowField,
    network: &Raster<i32>,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    flow.check_shape(dem)?;
    flow.check_shape(network)?;

    let (rows, cols) = flow.shape();

    // Carry the channel elevation upslope; each cell ends up with the
    // elevation of the channel cell it drains to. Channel cells keep
    // their own elevation, so the walk never crosses the network.
    let mut base = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let is_channel = |row: usize, col: usize| -> bool {
        !network.is_nodata_at(row, col) && unsafe { network.get_unchecked(row, col) } != 0
    };
    let mut frontier = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if is_channel(row, col) && !dem.is_nodata_at(row, col) {
                base[[row, col]] = unsafe { dem.get_unchecked(row, col) };
                frontier.push((row, col));
            }
        }
    }
    let mut next = Vec::new();
    while !frontier.is_empty() {
        for &(row, col) in &frontier {
            for dir in 0..8 {
                let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) else {
                    continue;
                };
                if flow.downslope(nr, nc) == Some((row, col))
                    && !is_channel(nr, nc)
                    && base[[nr, nc]].is_nan()
                {
                    base[[nr, nc]] = base[[row, col]];
                    next.push((nr, nc));
                }
            }
        }
        std::mem::swap(&mut frontier, &mut next);
        next.clear();
        if monitor.is_canceled() {
            return Err(demflow_core::Error::Canceled);
        }
    }

    let mut heights = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    for row in 0..rows {
        for col in 0..cols {
            let b = base[[row, col]];
            if b.is_finite() && !dem.is_nodata_at(row, col) {
                heights[[row, col]] = unsafe { dem.get_unchecked(row, col) } - b;
            }
        }
    }

    let mut out: Raster<f64> = Raster::from_array(heights);
    out.set_transform(flow.transform().clone());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_direction::{flow_field, FlowParams};
    use demflow_core::monitor::Silent;
    use demflow_core::GeoTransform;

    #[test]
    fn height_is_relative_to_the_receiving_channel() {
        // Valley draining south along the center column.
        let mut dem = Raster::new(4, 3);
        dem.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        for row in 0..4 {
            for col in 0..3i32 {
                dem.set(row, col as usize, (4 - row) as f64 + (col - 1).abs() as f64 * 3.0)
                    .unwrap();
            }
        }
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();

        let mut network: Raster<i32> = dem.with_same_meta::<i32>();
        network.set_nodata(Some(0));
        for row in 0..4 {
            network.set(row, 1, 1).unwrap();
        }

        let hand = height_over_network(&dem, &flow, &network, &Silent).unwrap();
        for row in 0..4 {
            assert_eq!(hand.get(row, 1).unwrap(), 0.0);
            // Hillslopes sit 3 above their receiving channel cell.
            assert_eq!(hand.get(row, 0).unwrap(), 3.0);
            assert_eq!(hand.get(row, 2).unwrap(), 3.0);
        }
    }
}
