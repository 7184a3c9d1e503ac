//! Travel time from every cell to a basin outlet.
//!
//! Channel flow speed is estimated from the basin's time of
//! concentration after Kirpich: the longest flow path L (m) and its
//! relief dh (m) give tc = (0.87 (L/1000)^3 / dh)^0.385 hours, and a
//! uniform speed L/tc. Overland cells move slower than channel cells
//! by a constant ratio.

use ndarray::Array2;
use tracing::debug;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;
use crate::propagate::wavefront_expand;

/// Parameters for [`time_to_outlet`].
#[derive(Debug, Clone)]
pub struct TimeToOutletParams {
    /// Outlet cell as (row, col).
    pub outlet: (usize, usize),
    /// Channel-to-overland speed ratio applied to cells off the
    /// network.
    pub speed_ratio: f64,
}

impl Default for TimeToOutletParams {
    fn default() -> Self {
        Self {
            outlet: (0, 0),
            speed_ratio: 10.0,
        }
    }
}

/// Travel time in hours from each cell to the outlet.
///
/// Only cells draining through the outlet get a value; the rest come
/// out nodata. When `network` is given, steps taken from cells off
/// the network are slowed down by the speed ratio.
pub fn time_to_outlet(
    dem: &Raster<f64>,
    flow: &FlowField,
    network: Option<&Raster<i32>>,
    params: &TimeToOutletParams,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    flow.check_shape(dem)?;
    if let Some(net) = network {
        flow.check_shape(net)?;
    }
    let (rows, cols) = flow.shape();
    let (orow, ocol) = params.outlet;
    if orow >= rows || ocol >= cols {
        return Err(Error::IndexOutOfBounds {
            row: orow,
            col: ocol,
            rows,
            cols,
        });
    }
    if !(params.speed_ratio >= 1.0) {
        return Err(Error::invalid_parameter(
            "speed_ratio",
            params.speed_ratio,
            "must be at least 1",
        ));
    }

    // First pass: plain flow-path distances to the outlet.
    let mut dist = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    dist[[orow, ocol]] = 0.0;
    wavefront_expand(
        flow,
        &mut dist,
        vec![(orow, ocol)],
        |_, _, dir| flow.dir_distance(dir),
        monitor,
    )?;

    // Longest path and its relief fix the channel speed.
    let mut far = (orow, ocol);
    let mut longest = 0.0_f64;
    for row in 0..rows {
        for col in 0..cols {
            let d = dist[[row, col]];
            if d.is_finite() && d > longest {
                longest = d;
                far = (row, col);
            }
        }
    }
    let relief = dem.get(far.0, far.1)? - dem.get(orow, ocol)?;
    let speed = if longest > 0.0 && relief > 0.0 {
        let tc = (0.87 * (longest / 1000.0).powi(3) / relief).powf(0.385);
        longest / tc
    } else {
        // Degenerate basin: single cell or no relief.
        1.0
    };
    debug!(longest, relief, speed, "kirpich channel speed estimated");

    // Second pass: distances weighted into times. The cost of a step
    // depends on whether the moving (upslope) cell is on the network.
    let mut time = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    time[[orow, ocol]] = 0.0;
    let off_network = |row: usize, col: usize| -> bool {
        match network {
            Some(net) => net.is_nodata_at(row, col) || unsafe { net.get_unchecked(row, col) } == 0,
            None => false,
        }
    };
    wavefront_expand(
        flow,
        &mut time,
        vec![(orow, ocol)],
        |row, col, dir| {
            let mut step = flow.dir_distance(dir) / speed;
            if let Some((nr, nc)) = neighbor(row, col, dir, rows, cols) {
                if off_network(nr, nc) {
                    step *= params.speed_ratio;
                }
            }
            step
        },
        monitor,
    )?;

    let mut out: Raster<f64> = Raster::from_array(time);
    out.set_transform(flow.transform().clone());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_direction::{flow_field, FlowParams};
    use demflow_core::monitor::Silent;
    use demflow_core::GeoTransform;

    fn south_slope(rows: usize, cols: usize) -> (Raster<f64>, FlowField) {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, (rows * 100) as f64, 100.0, -100.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, (rows - row) as f64 * 10.0).unwrap();
            }
        }
        let flow = flow_field(&dem, &FlowParams::default(), &Silent).unwrap();
        (dem, flow)
    }

    #[test]
    fn time_increases_along_the_path() {
        let (dem, flow) = south_slope(6, 1);
        let params = TimeToOutletParams {
            outlet: (5, 0),
            ..Default::default()
        };
        let time = time_to_outlet(&dem, &flow, None, &params, &Silent).unwrap();

        assert_eq!(time.get(5, 0).unwrap(), 0.0);
        let mut prev = 0.0;
        for row in (0..5).rev() {
            let t = time.get(row, 0).unwrap();
            assert!(t > prev, "row {row}: {t} <= {prev}");
            prev = t;
        }
    }

    #[test]
    fn off_network_steps_are_slower() {
        let (dem, flow) = south_slope(6, 1);
        let params = TimeToOutletParams {
            outlet: (5, 0),
            speed_ratio: 10.0,
        };

        // Without a network every step is channel speed.
        let channel_only = time_to_outlet(&dem, &flow, None, &params, &Silent).unwrap();

        // Network covering only the lower half.
        let mut network: Raster<i32> = dem.with_same_meta::<i32>();
        network.set_nodata(Some(0));
        for row in 3..6 {
            network.set(row, 0, 1).unwrap();
        }
        let mixed = time_to_outlet(&dem, &flow, Some(&network), &params, &Silent).unwrap();

        // On-network reach is unchanged, overland reach is slower.
        let a = channel_only.get(3, 0).unwrap();
        let b = mixed.get(3, 0).unwrap();
        assert!((a - b).abs() < 1e-12);
        assert!(mixed.get(0, 0).unwrap() > channel_only.get(0, 0).unwrap());
    }

    #[test]
    fn cells_not_draining_to_outlet_are_nodata() {
        let (dem, flow) = south_slope(4, 2);
        let params = TimeToOutletParams {
            outlet: (3, 0),
            ..Default::default()
        };
        let time = time_to_outlet(&dem, &flow, None, &params, &Silent).unwrap();
        assert!(time.get(0, 1).unwrap().is_nan());
        assert!(time.get(2, 0).unwrap().is_finite());
    }

    #[test]
    fn rejects_out_of_bounds_outlet() {
        let (dem, flow) = south_slope(3, 3);
        let params = TimeToOutletParams {
            outlet: (9, 0),
            ..Default::default()
        };
        assert!(time_to_outlet(&dem, &flow, None, &params, &Silent).is_err());
    }
}
