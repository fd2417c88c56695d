use crate::core::geometry::crop_grid;
use crate::types::{
    ClipWindow, LandcoverMap, LandcoverRaster, PixelCrop, ProcError, ProcResult,
};

/// Pick the land-cover epoch for a scene year from a sorted epoch table.
///
/// The latest epoch not later than the scene year wins; a scene predating
/// every epoch falls back to the earliest one. Returns the index into
/// `epochs`, or `None` when the table is empty.
pub fn select_epoch(epochs: &[i32], year: i32) -> Option<usize> {
    if epochs.is_empty() {
        return None;
    }
    debug_assert!(epochs.windows(2).all(|w| w[0] <= w[1]));
    // partition_point gives the count of epochs <= year
    let n = epochs.partition_point(|&e| e <= year);
    if n == 0 {
        Some(0)
    } else {
        Some(n - 1)
    }
}

/// Aligns epoch-tagged land-cover rasters to a footprint's clip window
pub struct LandcoverAligner;

impl LandcoverAligner {
    pub fn new() -> Self {
        Self
    }

    /// Clip one land-cover raster to the footprint's common window.
    ///
    /// The window boundary is converted to the land-cover raster's own
    /// pixel space (its resolution may differ from the imagery); the
    /// east/south edges then follow from the clipped scene dimensions so
    /// the result overlays the scene grids exactly. A window falling
    /// outside the raster is an alignment error; callers treat it as
    /// non-fatal and continue without land-cover enrichment.
    pub fn align(
        &self,
        raster: &LandcoverRaster,
        window: &ClipWindow,
    ) -> ProcResult<LandcoverMap> {
        let g = &raster.grid;
        let px = g.pixel_size;
        let west_col = ((window.west - g.nw_easting).round() / px) as i64;
        if west_col < 0 {
            return Err(ProcError::Alignment(format!(
                "epoch {}: west column {} < 0",
                raster.epoch, west_col
            )));
        }
        let north_row = ((g.nw_northing - window.north).round() / px) as i64;
        if north_row < 0 {
            return Err(ProcError::Alignment(format!(
                "epoch {}: north row {} < 0",
                raster.epoch, north_row
            )));
        }
        let (nrows_clip, ncols_clip) = window.dims();
        let east_col = west_col + ncols_clip as i64;
        if east_col > g.ncols as i64 {
            return Err(ProcError::Alignment(format!(
                "epoch {}: east column {} > raster ncols {}",
                raster.epoch, east_col, g.ncols
            )));
        }
        let south_row = north_row + nrows_clip as i64;
        if south_row > g.nrows as i64 {
            return Err(ProcError::Alignment(format!(
                "epoch {}: south row {} > raster nrows {}",
                raster.epoch, south_row, g.nrows
            )));
        }

        let crop = PixelCrop {
            west_col: west_col as usize,
            north_row: north_row as usize,
            east_col: east_col as usize,
            south_row: south_row as usize,
            ncols: ncols_clip,
            nrows: nrows_clip,
        };
        log::debug!(
            "epoch {} landcover crop: cols {}..{} rows {}..{}",
            raster.epoch,
            crop.west_col,
            crop.east_col,
            crop.north_row,
            crop.south_row
        );

        let classes = crop_grid(&raster.classes, &crop)?;
        Ok(LandcoverMap {
            epoch: raster.epoch,
            crop,
            classes,
        })
    }

    /// Align every raster whose projection matches the scenes', sorted by
    /// epoch. Rasters that fail alignment are skipped with a warning.
    pub fn align_all(
        &self,
        rasters: &[LandcoverRaster],
        projection_tag: &str,
        window: &ClipWindow,
    ) -> Vec<LandcoverMap> {
        let mut maps: Vec<LandcoverMap> = Vec::new();
        for raster in rasters {
            if raster.projection.tag() != projection_tag {
                log::debug!(
                    "skipping epoch {} landcover raster in {} (footprint is {})",
                    raster.epoch,
                    raster.projection.tag(),
                    projection_tag
                );
                continue;
            }
            match self.align(raster, window) {
                Ok(map) => maps.push(map),
                Err(e) => log::warn!("landcover enrichment skipped: {}", e),
            }
        }
        maps.sort_by_key(|m| m.epoch);
        maps
    }
}

impl Default for LandcoverAligner {
    fn default() -> Self {
        Self::new()
    }
}
