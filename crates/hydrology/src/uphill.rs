//! Upslope summaries of an auxiliary raster, and local flow balance.

use ndarray::Array2;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;
use crate::propagate::{upslope_aggregate, Aggregate};

/// Largest `values` entry found in each cell's upslope area
/// (the cell itself included).
pub fn max_value_uphill(
    flow: &FlowField,
    values: &Raster<f64>,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    upslope_aggregate(flow, values, Aggregate::Max, monitor)
}

/// Mean of `values` over each cell's upslope area.
pub fn mean_value_uphill(
    flow: &FlowField,
    values: &Raster<f64>,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    upslope_aggregate(flow, values, Aggregate::Mean, monitor)
}

/// Net local balance: inflow received from neighbors minus the cell's
/// own outgoing weight.
///
/// Interior cells of a uniform field balance to zero; sources come
/// out negative and sinks positive. Nodata weights yield nodata.
pub fn cell_balance(
    flow: &FlowField,
    weights: &Raster<f64>,
    monitor: &dyn Monitor,
) -> Result<Raster<f64>> {
    flow.check_shape(weights)?;

    let (rows, cols) = flow.shape();
    let mut balance = Array2::<f64>::zeros((rows, cols));

    for row in 0..rows {
        if !monitor.report_progress(row, rows) {
            return Err(Error::Canceled);
        }
        for col in 0..cols {
            if !flow.is_valid(row, col) || weights.is_nodata_at(row, col) {
                continue;
            }
            let w = unsafe { weights.get_unchecked(row, col) };
            let dir = flow.get(row, col);
            if !dir.is_none() {
                balance[[row, col]] -= w;
            }
            for (out_dir, share) in dir.outflows() {
                if let Some((nr, nc)) = neighbor(row, col, out_dir, rows, cols) {
                    balance[[nr, nc]] += w * share;
                }
            }
        }
    }

    for row in 0..rows {
        for col in 0..cols {
            if !flow.is_valid(row, col) || weights.is_nodata_at(row, col) {
                balance[[row, col]] = f64::NAN;
            }
        }
    }

    let mut out: Raster<f64> = Raster::from_array(balance);
    out.set_transform(flow.transform().clone());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_direction::{flow_field, FlowModel, FlowParams};
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
    fn max_value_travels_downhill() {
        let (dem, flow) = south_slope(5, 1);
        let mut values = dem.like(1.0);
        values.set(1, 0, 9.0).unwrap();
        let max = max_value_uphill(&flow, &values, &Silent).unwrap();
        assert_eq!(max.get(0, 0).unwrap(), 1.0);
        for row in 1..5 {
            assert_eq!(max.get(row, 0).unwrap(), 9.0, "row {row}");
        }
    }

    #[test]
    fn mean_value_averages_the_catchment() {
        let (dem, flow) = south_slope(4, 1);
        let mut values = dem.like(0.0);
        for (row, v) in [(0, 4.0), (1, 0.0), (2, 2.0), (3, 6.0)] {
            values.set(row, 0, v).unwrap();
        }
        let mean = mean_value_uphill(&flow, &values, &Silent).unwrap();
        assert_eq!(mean.get(0, 0).unwrap(), 4.0);
        assert_eq!(mean.get(1, 0).unwrap(), 2.0);
        assert_eq!(mean.get(3, 0).unwrap(), 3.0);
    }

    #[test]
    fn uniform_column_balances_to_zero_inside() {
        let (dem, flow) = south_slope(5, 1);
        let ones = dem.like(1.0);
        let balance = cell_balance(&flow, &ones, &Silent).unwrap();

        // Top cell only exports, bottom cell only receives.
        assert_eq!(balance.get(0, 0).unwrap(), -1.0);
        assert_eq!(balance.get(4, 0).unwrap(), 1.0);
        for row in 1..4 {
            assert_eq!(balance.get(row, 0).unwrap(), 0.0, "row {row}");
        }
    }

    #[test]
    fn mfd_balance_sums_fractional_shares() {
        // A peak in the center spreads flow to all eight neighbors.
        let mut dem = Raster::new(3, 3);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        for row in 0..3 {
            for col in 0..3 {
                dem.set(row, col, 1.0).unwrap();
            }
        }
        dem.set(1, 1, 5.0).unwrap();

        let params = FlowParams {
            model: FlowModel::Mfd,
            ..Default::default()
        };
        let flow = flow_field(&dem, &params, &Silent).unwrap();
        let ones = dem.like(1.0);
        let balance = cell_balance(&flow, &ones, &Silent).unwrap();

        assert_eq!(balance.get(1, 1).unwrap(), -1.0);
        let received: f64 = [(0, 0), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1), (2, 2)]
            .iter()
            .map(|&(r, c)| balance.get(r, c).unwrap())
            .sum();
        assert!((received - 1.0).abs() < 1e-6, "neighbors received {received}");
    }
}
