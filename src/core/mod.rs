//! Core footprint processing modules

pub mod geometry;
pub mod indices;
pub mod landcover;
pub mod masks;
pub mod pipeline;
pub mod reflectance;
pub mod stats;

// Re-export main types
pub use geometry::{crop_grid, ClipParams, ClipResolver};
pub use indices::{IndexCalculator, IndexDiagnostics, SceneIndices, SpectralIndex};
pub use landcover::{select_epoch, LandcoverAligner};
pub use masks::{
    combine, interpret_cloud_shadow, union_fold, valid_count, ForestCombos, ForestMasks,
    MaskCascade, MaskParams, SceneMaskSet,
};
pub use pipeline::{FootprintProcessor, FootprintSummary, PipelineParams};
pub use reflectance::{
    apply_mask, apply_mask_bands, ReflectanceConverter, ReflectanceParams, ReflectanceResult,
};
pub use stats::{
    eval_series, AggregationParams, SeriesStats, StatisticsGrids, TemporalAggregator,
};
