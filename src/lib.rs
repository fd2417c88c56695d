//! landcube: A Fast, Modular Landsat Surface-Reflectance Time-Series Processor
//!
//! This library aligns, masks, and statistically summarizes multi-year stacks
//! of Landsat surface-reflectance scenes over a fixed footprint. Each scene
//! is clipped to the footprint's common window, screened through a cascade of
//! validity masks (no-data, spurious values, cloud/shadow, surface water,
//! forest land cover), and reduced to a set of spectral indices; the full
//! time series is then stacked into a cube and summarized with per-pixel
//! temporal statistics over the cross-time forest union mask.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::types::{
    ClipWindow, CloudShadowClass, CsmConvention, GridDescriptor, Hemisphere, LandcoverMap,
    LandcoverRaster, MaskGrid, PixelCrop, ProcError, ProcResult, ProjectionInfo, RawBands,
    ReflBands, Scene, NODATA, NODATA_DN,
};

pub use crate::core::{
    FootprintProcessor, FootprintSummary, IndexCalculator, MaskCascade, PipelineParams,
    SpectralIndex, TemporalAggregator,
};

pub use crate::io::store::SceneStore;
