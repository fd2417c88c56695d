use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Raw digital-number band grid as delivered by the ingestion step
pub type RawGrid = Array2<i16>;

/// Scaled surface-reflectance grid (decimal reflectance, sentinel -9999)
pub type ReflGrid = Array2<f32>;

/// Per-pixel validity mask, strictly 0/1
pub type MaskGrid = Array2<u8>;

/// Derived spectral-index grid (sentinel -9999 at invalid pixels)
pub type IndexGrid = Array2<f32>;

/// Time-stacked index cube (date x row x col)
pub type IndexCube = Array3<f32>;

/// Categorical land-cover grid (NLCD class codes)
pub type LandcoverGrid = Array2<i8>;

/// Sentinel marking invalid pixels in float grids
pub const NODATA: f32 = -9999.0;

/// Sentinel marking invalid pixels in raw integer bands
pub const NODATA_DN: i16 = -9999;

/// Fmask cloud/shadow classification codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudShadowClass {
    Clear,
    Water,
    Shadow,
    Cloud,
    Missing,
}

impl CloudShadowClass {
    /// Interpret a raw Fmask code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => CloudShadowClass::Clear,
            1 => CloudShadowClass::Water,
            2 => CloudShadowClass::Shadow,
            4 => CloudShadowClass::Cloud,
            _ => CloudShadowClass::Missing,
        }
    }

    /// Clear-sky and open-water pixels pass the cloud/shadow screen
    pub fn is_usable(&self) -> bool {
        matches!(self, CloudShadowClass::Clear | CloudShadowClass::Water)
    }
}

/// Which Fmask output naming convention the ingestion step should accept.
/// The archive carries both depending on the Fmask version used; the
/// choice is explicit configuration, never inferred from whichever file
/// happens to be found first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsmConvention {
    /// "lndcsmw2" outputs (later Fmask versions)
    FmaskW2,
    /// "lndcsm" outputs (original Fmask)
    FmaskLegacy,
}

/// UTM hemisphere designator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    North,
    South,
}

impl std::fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hemisphere::North => write!(f, "N"),
            Hemisphere::South => write!(f, "S"),
        }
    }
}

/// Map projection descriptor for one scene or land-cover raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionInfo {
    pub projection: String,
    pub utm_zone: i32,
    pub hemisphere: Hemisphere,
    pub datum: String,
    pub units: String,
}

impl ProjectionInfo {
    /// Compact projection tag, e.g. "UTM15N", used to match rasters
    /// across collections
    pub fn tag(&self) -> String {
        format!("{}{}{}", self.projection, self.utm_zone, self.hemisphere)
    }
}

/// Pixel-grid descriptor: corner coordinates and dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDescriptor {
    pub nw_easting: f64,
    pub nw_northing: f64,
    pub se_easting: f64,
    pub se_northing: f64,
    pub ncols: usize,
    pub nrows: usize,
    /// Pixel size in projection units (meters)
    pub pixel_size: f64,
}

/// One scene's crop offsets into its own pixel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelCrop {
    pub west_col: usize,
    pub north_row: usize,
    pub east_col: usize,
    pub south_row: usize,
    /// Columns after clipping (east_col - west_col)
    pub ncols: usize,
    /// Rows after clipping (south_row - north_row)
    pub nrows: usize,
}

/// Common clip window for one footprint.
///
/// The outer boundary is shared by every scene; `crops[i]` is scene i's
/// offsets into its own grid. Built once per footprint and never patched
/// incrementally; any input change requires full recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub west: f64,
    pub north: f64,
    pub east: f64,
    pub south: f64,
    pub pixel_size: f64,
    pub crops: Vec<PixelCrop>,
}

impl ClipWindow {
    /// Clipped grid dimensions (identical for every scene)
    pub fn dims(&self) -> (usize, usize) {
        (self.crops[0].nrows, self.crops[0].ncols)
    }
}

/// Six raw reflectance bands (Landsat TM/ETM+ bands 1-5 and 7)
#[derive(Debug, Clone)]
pub struct RawBands {
    pub b1: RawGrid,
    pub b2: RawGrid,
    pub b3: RawGrid,
    pub b4: RawGrid,
    pub b5: RawGrid,
    pub b7: RawGrid,
}

impl RawBands {
    pub fn as_array(&self) -> [&RawGrid; 6] {
        [&self.b1, &self.b2, &self.b3, &self.b4, &self.b5, &self.b7]
    }
}

/// Six scaled reflectance bands
#[derive(Debug, Clone)]
pub struct ReflBands {
    pub b1: ReflGrid,
    pub b2: ReflGrid,
    pub b3: ReflGrid,
    pub b4: ReflGrid,
    pub b5: ReflGrid,
    pub b7: ReflGrid,
}

impl ReflBands {
    pub fn as_array(&self) -> [&ReflGrid; 6] {
        [&self.b1, &self.b2, &self.b3, &self.b4, &self.b5, &self.b7]
    }
}

/// One footprint observation on one acquisition date
#[derive(Debug, Clone)]
pub struct Scene {
    /// Footprint id, e.g. "p026r027"
    pub footprint: String,
    pub date: NaiveDate,
    pub projection: ProjectionInfo,
    pub grid: GridDescriptor,
    /// Raw integer bands at full (unclipped) scene extent
    pub bands: RawBands,
    /// Raw Fmask classification codes at full scene extent
    pub cs_codes: Array2<u8>,
}

impl Scene {
    pub fn year(&self) -> i32 {
        use chrono::Datelike;
        self.date.year()
    }

    /// "YYYY_DDD" tag used to order and label grids in the time stack
    pub fn date_tag(&self) -> String {
        use chrono::Datelike;
        format!("{:04}_{:03}", self.date.year(), self.date.ordinal())
    }
}

/// Epoch-tagged categorical land-cover raster, full extent
#[derive(Debug, Clone)]
pub struct LandcoverRaster {
    pub epoch: i32,
    pub projection: ProjectionInfo,
    pub grid: GridDescriptor,
    pub classes: LandcoverGrid,
}

/// Land-cover grid clipped to a footprint's common window
#[derive(Debug, Clone)]
pub struct LandcoverMap {
    pub epoch: i32,
    pub crop: PixelCrop,
    pub classes: LandcoverGrid,
}

/// Error types for footprint processing
#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    /// Inconsistent or non-overlapping scene extents; fatal to the footprint
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Land-cover window outside raster bounds; footprint continues
    /// without land-cover enrichment
    #[error("landcover alignment error: {0}")]
    Alignment(String),

    /// Missing or mismatched band/dataset; fatal to a single scene
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Result type for footprint processing operations
pub type ProcResult<T> = Result<T, ProcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csm_code_interpretation() {
        assert!(CloudShadowClass::from_code(0).is_usable());
        assert!(CloudShadowClass::from_code(1).is_usable());
        assert!(!CloudShadowClass::from_code(2).is_usable());
        assert!(!CloudShadowClass::from_code(4).is_usable());
        assert!(!CloudShadowClass::from_code(255).is_usable());
        // undocumented codes are treated as missing
        assert_eq!(CloudShadowClass::from_code(3), CloudShadowClass::Missing);
    }

    #[test]
    fn test_projection_tag() {
        let proj = ProjectionInfo {
            projection: "UTM".to_string(),
            utm_zone: 15,
            hemisphere: Hemisphere::North,
            datum: "NAD83".to_string(),
            units: "meters".to_string(),
        };
        assert_eq!(proj.tag(), "UTM15N");
    }
}
