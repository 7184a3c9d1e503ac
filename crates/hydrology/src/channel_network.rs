//! Channel network extraction with Strahler ordering.
//!
//! Channel heads are cells that satisfy the threshold criterion (and
//! have no satisfying neighbor at equal or higher elevation). Each
//! head is traced downslope to mark the channel raster, cells are
//! Strahler-ordered, junctions where several channels meet become
//! segment breakpoints, and head-to-junction reaches come out as
//! polylines with id, length, order and a link to the downstream
//! segment.

use std::collections::HashMap;

use geo_types::{Geometry, LineString};
use tracing::debug;

use demflow_core::monitor::Monitor;
use demflow_core::raster::Raster;
use demflow_core::vector::{AttributeValue, Feature, FeatureCollection};
use demflow_core::{Error, Result};

use crate::flow_direction::FlowField;
use crate::neighbors::neighbor;

/// Raster marker for traced but not yet ordered channel cells.
const HEADER_TRACE: i32 = -1;

/// How the per-cell criterion value selects channel cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdRule {
    /// Channel where criterion > threshold (e.g. flow accumulation).
    #[default]
    Greater,
    /// Channel where criterion < threshold (e.g. curvature).
    Lower,
}

/// Parameters for [`extract_channel_network`].
#[derive(Debug, Clone)]
pub struct ChannelNetworkParams {
    pub threshold: f64,
    pub rule: ThresholdRule,
}

impl Default for ChannelNetworkParams {
    fn default() -> Self {
        Self {
            threshold: 10_000.0,
            rule: ThresholdRule::Greater,
        }
    }
}

/// One head-to-junction (or junction-to-junction) reach.
#[derive(Debug, Clone)]
pub struct ChannelSegment {
    pub id: usize,
    /// Along-path length in map units.
    pub length: f64,
    /// Strahler order at the segment start.
    pub order: i32,
    /// Id of the segment this one drains into, `None` at terminal
    /// outlets.
    pub downstream: Option<usize>,
    /// Cell-center coordinates from start to end.
    pub path: Vec<(f64, f64)>,
}

/// Extraction result: the order raster plus the vectorized reaches.
///
/// In the raster, 0 means no channel (and is the nodata value);
/// positive values are Strahler orders.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    pub raster: Raster<i32>,
    pub segments: Vec<ChannelSegment>,
}

impl ChannelNetwork {
    /// Segments as line features with `id`, `length`, `order` and
    /// `next` attributes.
    pub fn to_features(&self) -> FeatureCollection {
        let mut collection = FeatureCollection::new();
        for seg in &self.segments {
            let line: LineString<f64> = seg.path.iter().copied().collect();
            let mut feature = Feature::new(Geometry::LineString(line));
            feature.set_property("id", AttributeValue::Int(seg.id as i64));
            feature.set_property("length", AttributeValue::Float(seg.length));
            feature.set_property("order", AttributeValue::Int(seg.order as i64));
            feature.set_property(
                "next",
                match seg.downstream {
                    Some(next) => AttributeValue::Int(next as i64),
                    None => AttributeValue::Null,
                },
            );
            collection.push(feature);
        }
        collection
    }
}

/// Extract the channel network from a conditioned DEM.
///
/// `criterion` is compared against the threshold cell by cell; flow
/// accumulation is the usual choice with [`ThresholdRule::Greater`].
pub fn extract_channel_network(
    dem: &Raster<f64>,
    flow: &FlowField,
    criterion: &Raster<f64>,
    params: &ChannelNetworkParams,
    monitor: &dyn Monitor,
) -> Result<ChannelNetwork> {
    flow.check_shape(dem)?;
    flow.check_shape(criterion)?;
    if !params.threshold.is_finite() || params.threshold < 0.0 {
        return Err(Error::invalid_parameter(
            "threshold",
            params.threshold,
            "must be finite and non-negative",
        ));
    }

    let (rows, cols) = flow.shape();
    let meets = |row: usize, col: usize| -> bool {
        if criterion.is_nodata_at(row, col) {
            return false;
        }
        let value = unsafe { criterion.get_unchecked(row, col) };
        match params.rule {
            ThresholdRule::Greater => value > params.threshold,
            ThresholdRule::Lower => value < params.threshold,
        }
    };

    // Channel heads: satisfying cells with no satisfying neighbor at
    // equal or higher elevation.
    let mut starts: Vec<(usize, usize, f64)> = Vec::new();
    for row in 0..rows {
        if !monitor.report_progress(row, rows) {
            return Err(Error::Canceled);
        }
        for col in 0..cols {
            if dem.is_nodata_at(row, col) || !meets(row, col) {
                continue;
            }
            let z = unsafe { dem.get_unchecked(row, col) };
            let is_head = (0..8).all(|dir| match neighbor(row, col, dir, rows, cols) {
                Some((nr, nc)) => {
                    !(meets(nr, nc) && unsafe { dem.get_unchecked(nr, nc) } >= z)
                }
                None => true,
            });
            if is_head {
                starts.push((row, col, z));
            }
        }
    }
    debug!(heads = starts.len(), "channel heads located");

    let mut network: Raster<i32> = dem.with_same_meta::<i32>();
    network.set_nodata(Some(0));

    // Trace each head downslope. A path that reaches an already
    // marked cell shares the rest of its course with a prior trace.
    for &(row, col, _) in &starts {
        if monitor.is_canceled() {
            return Err(Error::Canceled);
        }
        let (mut r, mut c) = (row, col);
        loop {
            unsafe { network.set_unchecked(r, c, HEADER_TRACE) };
            match flow.downslope(r, c) {
                Some((nr, nc)) if network.get(nr, nc)? != HEADER_TRACE => {
                    r = nr;
                    c = nc;
                }
                _ => break,
            }
        }
    }

    let junctions = assign_strahler_orders(dem, flow, &mut network, monitor)?;
    starts.extend(junctions);

    // Ids follow ascending start elevation.
    starts.sort_by(|a, b| a.2.total_cmp(&b.2));
    let index_of: HashMap<(usize, usize), usize> = starts
        .iter()
        .enumerate()
        .map(|(i, &(row, col, _))| ((row, col), i))
        .collect();

    let segments = vectorize(flow, &network, &starts, &index_of, monitor)?;

    Ok(ChannelNetwork {
        raster: network,
        segments,
    })
}

/// Strahler-order every traced cell, in dependency order with an
/// explicit stack. Returns the junction cells found along the way
/// (cells fed by more than one upslope channel cell).
fn assign_strahler_orders(
    dem: &Raster<f64>,
    flow: &FlowField,
    network: &mut Raster<i32>,
    monitor: &dyn Monitor,
) -> Result<Vec<(usize, usize, f64)>> {
    let (rows, cols) = flow.shape();
    let mut junctions = Vec::new();
    let mut expanding = vec![false; rows * cols];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for row in 0..rows {
        if !monitor.report_progress(row, rows) {
            return Err(Error::Canceled);
        }
        for col in 0..cols {
            if network.get(row, col)? != HEADER_TRACE {
                continue;
            }
            stack.push((row, col));

            while let Some(&(cr, cc)) = stack.last() {
                if network.get(cr, cc)? != HEADER_TRACE {
                    stack.pop();
                    continue;
                }
                let idx = cr * cols + cc;
                if !expanding[idx] {
                    expanding[idx] = true;
                    for dir in 0..8 {
                        let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                            continue;
                        };
                        if flow.downslope(nr, nc) == Some((cr, cc))
                            && network.get(nr, nc)? == HEADER_TRACE
                            && !expanding[nr * cols + nc]
                        {
                            stack.push((nr, nc));
                        }
                    }
                    continue;
                }

                let mut max_order = 1;
                let mut max_order_cells = 0;
                let mut upslope_cells = 0;
                for dir in 0..8 {
                    let Some((nr, nc)) = neighbor(cr, cc, dir, rows, cols) else {
                        continue;
                    };
                    if flow.downslope(nr, nc) != Some((cr, cc)) {
                        continue;
                    }
                    let order = network.get(nr, nc)?;
                    if order == 0 {
                        continue;
                    }
                    upslope_cells += 1;
                    if order <= HEADER_TRACE {
                        continue;
                    }
                    if order > max_order {
                        max_order = order;
                        max_order_cells = 1;
                    } else if order == max_order {
                        max_order_cells += 1;
                    }
                }
                if max_order_cells > 1 {
                    max_order += 1;
                }
                if upslope_cells > 1 {
                    // A confluence: the segment starting here needs an
                    // entry of its own.
                    junctions.push((cr, cc, dem.get(cr, cc)?));
                }
                network.set(cr, cc, max_order)?;
                stack.pop();
            }
        }
    }

    Ok(junctions)
}

fn vectorize(
    flow: &FlowField,
    network: &Raster<i32>,
    starts: &[(usize, usize, f64)],
    index_of: &HashMap<(usize, usize), usize>,
    monitor: &dyn Monitor,
) -> Result<Vec<ChannelSegment>> {
    let (rows, cols) = flow.shape();
    let max_steps = rows * cols;
    let mut segments = Vec::with_capacity(starts.len());

    for (i, &(row, col, _)) in starts.iter().enumerate() {
        if !monitor.report_progress(i, starts.len()) {
            return Err(Error::Canceled);
        }

        let mut path = vec![network.pixel_to_geo(col, row)];
        let mut length = 0.0;
        let mut downstream = None;
        let (mut r, mut c) = (row, col);

        for _ in 0..max_steps {
            let Some(dir) = flow.get(r, c).steepest() else {
                break;
            };
            let Some((nr, nc)) = neighbor(r, c, dir, rows, cols) else {
                break;
            };
            path.push(network.pixel_to_geo(nc, nr));
            length += flow.dir_distance(dir);
            r = nr;
            c = nc;
            if let Some(&next) = index_of.get(&(r, c)) {
                if next != i {
                    downstream = Some(next);
                }
                break;
            }
        }

        segments.push(ChannelSegment {
            id: i,
            length,
            order: network.get(row, col)?,
            downstream,
            path,
        });
    }

    Ok(segments)
}
