//! # demflow hydrology
//!
//! Drainage analysis over digital elevation models:
//! - Sink filling: remove depressions for continuous flow (Planchon & Darboux)
//! - Flow direction: D8, Rho8, D-infinity and MFD routing into one flow field
//! - Flow accumulation: weighted upstream contribution
//! - Channel network: threshold extraction, Strahler ordering, vectorized reaches
//! - Watersheds: basin delineation from network outlets
//! - Derived fields: distance to network, travel time to an outlet,
//!   upslope value summaries, cell balance, height over the network

pub mod neighbors;

pub mod channel_network;
pub mod distance_to_network;
pub mod fill_sinks;
pub mod flow_accumulation;
pub mod flow_direction;
pub mod height_over_network;
pub mod propagate;
pub mod time_to_outlet;
pub mod uphill;
pub mod watersheds;

pub use channel_network::{
    extract_channel_network, ChannelNetwork, ChannelNetworkParams, ChannelSegment, ThresholdRule,
};
pub use distance_to_network::distance_to_network;
pub use fill_sinks::{fill_sinks, FillOutcome, FillSinks, FillSinksParams};
pub use flow_accumulation::{flow_accumulation, AccumulationParams};
pub use flow_direction::{flow_field, FlowDir, FlowDirection, FlowField, FlowModel, FlowParams};
pub use height_over_network::height_over_network;
pub use propagate::{upslope_aggregate, wavefront_expand, Aggregate};
pub use time_to_outlet::{time_to_outlet, TimeToOutletParams};
pub use uphill::{cell_balance, max_value_uphill, mean_value_uphill};
pub use watersheds::{watersheds, WatershedParams, NO_BASIN};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::channel_network::{
        extract_channel_network, ChannelNetwork, ChannelNetworkParams, ThresholdRule,
    };
    pub use crate::distance_to_network::distance_to_network;
    pub use crate::fill_sinks::{fill_sinks, FillOutcome, FillSinksParams};
    pub use crate::flow_accumulation::{flow_accumulation, AccumulationParams};
    pub use crate::flow_direction::{flow_field, FlowDir, FlowField, FlowModel, FlowParams};
    pub use crate::height_over_network::height_over_network;
    pub use crate::propagate::{upslope_aggregate, wavefront_expand, Aggregate};
    pub use crate::time_to_outlet::{time_to_outlet, TimeToOutletParams};
    pub use crate::uphill::{cell_balance, max_value_uphill, mean_value_uphill};
    pub use crate::watersheds::{watersheds, WatershedParams, NO_BASIN};
    pub use demflow_core::prelude::*;
}
