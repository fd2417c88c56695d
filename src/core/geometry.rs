use crate::types::{ClipWindow, GridDescriptor, PixelCrop, ProcError, ProcResult};
use ndarray::{s, Array2};

/// Clip geometry parameters
#[derive(Debug, Clone)]
pub struct ClipParams {
    /// Inset applied to the common intersection, in pixels.
    /// The default of 3 trims resampling artifacts at scene edges; it was
    /// never derived from the data and is kept as a plain parameter.
    pub buffer_px: usize,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self { buffer_px: 3 }
    }
}

/// Resolves the common clip window across all scenes of a footprint
pub struct ClipResolver {
    params: ClipParams,
}

impl ClipResolver {
    /// Create a resolver with default parameters
    pub fn new() -> Self {
        Self {
            params: ClipParams::default(),
        }
    }

    pub fn with_params(params: ClipParams) -> Self {
        Self { params }
    }

    /// Compute the shared clip window and each scene's pixel-space crop.
    ///
    /// The outer boundary is the intersection of all scene extents, inset
    /// by the buffer on every side. All scenes must share a pixel size; if
    /// not, a warning is emitted and the first observed size is used. A
    /// window with non-positive width or height in any scene is a fatal
    /// geometry error: the shared window underpins every later stage, so
    /// one degenerate scene halts the footprint.
    pub fn resolve(&self, grids: &[GridDescriptor]) -> ProcResult<ClipWindow> {
        if grids.is_empty() {
            return Err(ProcError::Geometry(
                "no scene grids supplied for clip resolution".to_string(),
            ));
        }

        let mut sizes: Vec<f64> = Vec::new();
        for g in grids {
            if !sizes.iter().any(|s| (s - g.pixel_size).abs() < f64::EPSILON) {
                sizes.push(g.pixel_size);
            }
        }
        if sizes.len() > 1 {
            log::warn!(
                "multiple pixel sizes found across {} scenes: {:?}; using {}",
                grids.len(),
                sizes,
                sizes[0]
            );
        }
        let pixel_size = sizes[0];

        let west = grids.iter().map(|g| g.nw_easting).fold(f64::MIN, f64::max)
            + self.params.buffer_px as f64 * pixel_size;
        let north = grids.iter().map(|g| g.nw_northing).fold(f64::MAX, f64::min)
            - self.params.buffer_px as f64 * pixel_size;
        let east = grids.iter().map(|g| g.se_easting).fold(f64::MAX, f64::min)
            - self.params.buffer_px as f64 * pixel_size;
        let south = grids.iter().map(|g| g.se_northing).fold(f64::MIN, f64::max)
            + self.params.buffer_px as f64 * pixel_size;
        log::debug!(
            "clip boundaries with {}px buffer: W={:.1} N={:.1} E={:.1} S={:.1}",
            self.params.buffer_px,
            west,
            north,
            east,
            south
        );

        let mut crops = Vec::with_capacity(grids.len());
        for (i, g) in grids.iter().enumerate() {
            let px = g.pixel_size;
            let west_col = ((west - g.nw_easting) / px) as i64;
            let north_row = ((g.nw_northing - north) / px) as i64;
            let east_col = g.ncols as i64 - ((g.se_easting - east) / px) as i64;
            let south_row = g.nrows as i64 - ((south - g.se_northing) / px) as i64;
            let ncols_clip = east_col - west_col;
            let nrows_clip = south_row - north_row;
            log::debug!(
                "scene {}: cols {}..{} rows {}..{} ({}x{})",
                i,
                west_col,
                east_col,
                north_row,
                south_row,
                ncols_clip,
                nrows_clip
            );

            if west_col < 0
                || north_row < 0
                || east_col > g.ncols as i64
                || south_row > g.nrows as i64
                || ncols_clip <= 0
                || nrows_clip <= 0
            {
                return Err(ProcError::Geometry(format!(
                    "degenerate clip window for scene {}: cols {}..{} (of {}), rows {}..{} (of {})",
                    i, west_col, east_col, g.ncols, north_row, south_row, g.nrows
                )));
            }

            crops.push(PixelCrop {
                west_col: west_col as usize,
                north_row: north_row as usize,
                east_col: east_col as usize,
                south_row: south_row as usize,
                ncols: ncols_clip as usize,
                nrows: nrows_clip as usize,
            });
        }

        Ok(ClipWindow {
            west,
            north,
            east,
            south,
            pixel_size,
            crops,
        })
    }
}

impl Default for ClipResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the clipped sub-grid described by `crop` from a full-extent grid
pub fn crop_grid<T: Clone>(grid: &Array2<T>, crop: &PixelCrop) -> ProcResult<Array2<T>> {
    let (nrows, ncols) = grid.dim();
    if crop.south_row > nrows || crop.east_col > ncols {
        return Err(ProcError::DataIntegrity(format!(
            "crop window {}x{} at ({},{}) exceeds grid {}x{}",
            crop.nrows, crop.ncols, crop.north_row, crop.west_col, nrows, ncols
        )));
    }
    Ok(grid
        .slice(s![
            crop.north_row..crop.south_row,
            crop.west_col..crop.east_col
        ])
        .to_owned())
}
