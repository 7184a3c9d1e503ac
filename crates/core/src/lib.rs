//! # Demflow Core
//!
//! Core types and traits for the demflow terrain-analysis engine.
//!
//! This crate provides:
//! - `Raster<T>`: generic in-memory raster grid with a no-data sentinel
//! - `GeoTransform`: affine transformation for georeferencing
//! - `Feature` / `FeatureCollection`: vector output model
//! - `Monitor`: cooperative progress reporting and cancellation
//! - The `Algorithm` trait for a consistent algorithm API
//!
//! Raster persistence and reprojection are deliberately not handled here;
//! callers own the grids and hand them to the algorithm crates.

pub mod error;
pub mod monitor;
pub mod raster;
pub mod vector;

pub use error::{Error, Result};
pub use monitor::{CancelFlag, Monitor, Silent};
pub use raster::{GeoTransform, Raster, RasterElement};
pub use vector::{AttributeValue, Feature, FeatureCollection};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::monitor::{Monitor, Silent};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for all demflow algorithms.
///
/// Algorithms are pure functions that transform input data according to
/// parameters, polling a [`Monitor`] for cancellation along the way.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        monitor: &dyn Monitor,
    ) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters and no progress reporting
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default(), &Silent)
    }
}
