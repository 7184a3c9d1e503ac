//! Flow-path distance to the channel network.

use ndarray::Array2;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::Result;

use crate::flow_direction::FlowField;
use crate::propagate::wavefront_expand;

/// Along-flow-path distance from every cell to the nearest channel
/// cell, in map units.
///
/// Channel cells are zero; cells whose flow path never reaches the
/// network come out nodata.
pub fn distance_to_network(
    flow: &FlowField,
    network: &Raster<i32>,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    flow.check_shape(network)?;

    let (rows, cols) = flow.shape();
    let mut field = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut seeds = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if !network.is_nodata_at(row, col) && network.get(row, col)? != 0 {
                field[[row, col]] = 0.0;
                seeds.push((row, col));
            }
        }
    }

    wavefront_expand(flow, &mut field, seeds, |_, _, dir| flow.dir_distance(dir), monitor)?;

    let mut out: Raster<f64> = Raster::from_array(field);
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
    fn distance_grows_upslope_from_the_channel() {
        // Valley draining south along the center column.
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        for row in 0..5 {
            for col in 0..5i32 {
                dem.set(row, col as usize, (5 - row) as f64 + (col - 2).abs() as f64 * 4.0)
                    .unwrap();
            }
        }
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();

        let mut network: Raster<i32> = dem.with_same_meta::<i32>();
        network.set_nodata(Some(0));
        for row in 0..5 {
            network.set(row, 2, 1).unwrap();
        }

        let dist = distance_to_network(&flow, &network, &Silent).unwrap();
        for row in 0..5 {
            assert_eq!(dist.get(row, 2).unwrap(), 0.0);
            // Hillslope cells flow straight east/west to the channel.
            assert_eq!(dist.get(row, 1).unwrap(), 1.0);
            assert_eq!(dist.get(row, 0).unwrap(), 2.0);
        }
    }
}
