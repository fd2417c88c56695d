use crate::core::geometry::{crop_grid, ClipParams, ClipResolver};
use crate::core::indices::{kttc_component, IndexCalculator, SpectralIndex, KTTC_WET_COEFFS};
use crate::core::landcover::{select_epoch, LandcoverAligner};
use crate::core::masks::{
    interpret_cloud_shadow, union_fold, valid_count, MaskCascade, MaskParams,
};
use crate::core::reflectance::{apply_mask_bands, ReflectanceConverter, ReflectanceParams};
use crate::core::stats::{AggregationParams, StatisticsGrids, TemporalAggregator};
use crate::io::store::{SceneStore, StoreRecord};
use crate::types::{
    ClipWindow, CsmConvention, LandcoverMap, LandcoverRaster, MaskGrid, PixelCrop, ProcError,
    ProcResult, RawBands, Scene,
};
use ndarray::Zip;
use rayon::prelude::*;

/// Parameters for a full footprint run, with the documented defaults
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub clip: ClipParams,
    pub mask: MaskParams,
    pub reflectance: ReflectanceParams,
    pub aggregation: AggregationParams,
    /// Which Fmask output naming the ingestion collaborator should read;
    /// an explicit choice, never inferred from whichever file is found
    /// first. The core stages record it as configuration and never act on
    /// it themselves.
    pub csm_convention: CsmConvention,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            clip: ClipParams::default(),
            mask: MaskParams::default(),
            reflectance: ReflectanceParams::default(),
            aggregation: AggregationParams::default(),
            csm_convention: CsmConvention::FmaskW2,
        }
    }
}

/// Outcome of one scene's pass through the per-scene stages
struct SceneOutcome {
    key: String,
    scsw: MaskGrid,
    forest_all: Option<MaskGrid>,
    zero_denominators: usize,
}

/// Summary of a footprint run
#[derive(Debug)]
pub struct FootprintSummary {
    pub footprint: String,
    pub window: ClipWindow,
    /// Store keys of successfully processed scenes, date order
    pub scene_keys: Vec<String>,
    /// Scenes that failed with the error text; siblings are unaffected
    pub failed_scenes: Vec<(String, String)>,
    /// Pixels in the cross-time union mask, when land cover was available
    pub union_pixels: Option<usize>,
    /// Total zero-denominator pixels recovered during index computation
    pub zero_denominators: usize,
}

/// Drives a footprint through clip, mask, and index stages per scene,
/// then the footprint-wide union and statistics stages.
///
/// Per-scene stages have no cross-scene dependency and run in parallel;
/// the union fold and temporal statistics wait for every scene.
pub struct FootprintProcessor {
    params: PipelineParams,
    store: SceneStore,
}

impl FootprintProcessor {
    pub fn new(store: SceneStore) -> Self {
        Self {
            params: PipelineParams::default(),
            store,
        }
    }

    pub fn with_params(store: SceneStore, params: PipelineParams) -> Self {
        Self { params, store }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    /// Run every per-scene stage plus the union fan-in for one footprint.
    ///
    /// A geometry failure is fatal to the whole footprint. A scene that
    /// fails its own stages is dropped with a logged error; its siblings
    /// and the footprint-wide stages continue without it. Land-cover
    /// alignment failures only disable land-cover enrichment.
    pub fn process_footprint(
        &self,
        scenes: &[Scene],
        landcover: &[LandcoverRaster],
    ) -> ProcResult<FootprintSummary> {
        let footprint = match scenes.first() {
            Some(s) => s.footprint.clone(),
            None => {
                return Err(ProcError::Geometry(
                    "no scenes supplied for footprint processing".to_string(),
                ))
            }
        };
        if let Some(s) = scenes.iter().find(|s| s.footprint != footprint) {
            return Err(ProcError::DataIntegrity(format!(
                "scene {} belongs to footprint {}, not {}",
                s.date_tag(),
                s.footprint,
                footprint
            )));
        }
        let mut order: Vec<usize> = (0..scenes.len()).collect();
        order.sort_by_key(|&i| scenes[i].date);
        // footprint + date is the record key; duplicates would race on the
        // same store directory
        for w in order.windows(2) {
            if scenes[w[0]].date == scenes[w[1]].date {
                return Err(ProcError::DataIntegrity(format!(
                    "duplicate acquisition date {} in footprint {}",
                    scenes[w[0]].date_tag(),
                    footprint
                )));
            }
        }

        log::info!("processing footprint {} with {} scenes", footprint, scenes.len());
        let grids: Vec<_> = order.iter().map(|&i| scenes[i].grid.clone()).collect();
        let window = ClipResolver::with_params(self.params.clip.clone()).resolve(&grids)?;

        // a single projection is required to bring in land cover at all
        let mut tags: Vec<String> = scenes.iter().map(|s| s.projection.tag()).collect();
        tags.sort();
        tags.dedup();
        let landcover_maps = if tags.len() == 1 {
            LandcoverAligner::new().align_all(landcover, &tags[0], &window)
        } else {
            log::warn!(
                "more than one projection found across scenes ({:?}); \
                 skipping land-cover enrichment",
                tags
            );
            Vec::new()
        };
        if landcover_maps.is_empty() {
            log::info!("no land-cover maps aligned; forest masks unavailable");
        }

        // crops[k] matches the k-th scene in date order
        let outcomes: Vec<(String, ProcResult<SceneOutcome>)> = order
            .par_iter()
            .enumerate()
            .map(|(k, &i)| {
                let scene = &scenes[i];
                let crop = window.crops[k];
                (
                    scene.date_tag(),
                    self.process_scene(scene, &crop, &landcover_maps),
                )
            })
            .collect();

        let mut scene_keys = Vec::new();
        let mut failed_scenes = Vec::new();
        let mut successes: Vec<SceneOutcome> = Vec::new();
        let mut zero_denominators = 0usize;
        for (tag, outcome) in outcomes {
            match outcome {
                Ok(o) => {
                    zero_denominators += o.zero_denominators;
                    scene_keys.push(o.key.clone());
                    successes.push(o);
                }
                Err(e) => {
                    log::error!("scene {} failed: {}", tag, e);
                    // drop the partial record; aggregation reads only
                    // complete scenes
                    let key = format!("{}/{}", footprint, tag);
                    if let Err(rm) = self.store.remove_record(&key) {
                        log::warn!("could not remove partial record {}: {}", key, rm);
                    }
                    failed_scenes.push((tag, e.to_string()));
                }
            }
        }

        // fan-in: pure OR-fold over the per-scene forest masks, then a
        // separate pass applying the result to each stored record
        let union = union_fold(successes.iter().filter_map(|o| o.forest_all.as_ref()));
        let union_pixels = match &union {
            Some(u) => {
                let n = valid_count(u);
                log::info!("union mask over all years allows {} pixels", n);
                for outcome in &successes {
                    self.apply_union(outcome, u)?;
                }
                Some(n)
            }
            None => None,
        };

        Ok(FootprintSummary {
            footprint,
            window,
            scene_keys,
            failed_scenes,
            union_pixels,
            zero_denominators,
        })
    }

    fn process_scene(
        &self,
        scene: &Scene,
        crop: &PixelCrop,
        landcover_maps: &[LandcoverMap],
    ) -> ProcResult<SceneOutcome> {
        let key = format!("{}/{}", scene.footprint, scene.date_tag());
        log::info!("processing scene {}", key);
        let mut record = self.store.create_record(&key, "clip")?;
        record.set_attr("projection", &scene.projection)?;
        record.set_attr(
            "clip_bounds",
            [
                self_window_bound(crop, scene, BoundEdge::West),
                self_window_bound(crop, scene, BoundEdge::North),
                self_window_bound(crop, scene, BoundEdge::East),
                self_window_bound(crop, scene, BoundEdge::South),
            ],
        )?;
        record.set_attr("pixel_size", scene.grid.pixel_size)?;

        // clip stage
        let clipped = RawBands {
            b1: crop_grid(&scene.bands.b1, crop)?,
            b2: crop_grid(&scene.bands.b2, crop)?,
            b3: crop_grid(&scene.bands.b3, crop)?,
            b4: crop_grid(&scene.bands.b4, crop)?,
            b5: crop_grid(&scene.bands.b5, crop)?,
            b7: crop_grid(&scene.bands.b7, crop)?,
        };
        let cs_mask = interpret_cloud_shadow(&crop_grid(&scene.cs_codes, crop)?);
        record.write_band("level0/b1_clip", &clipped.b1)?;
        record.write_band("level0/b2_clip", &clipped.b2)?;
        record.write_band("level0/b3_clip", &clipped.b3)?;
        record.write_band("level0/b4_clip", &clipped.b4)?;
        record.write_band("level0/b5_clip", &clipped.b5)?;
        record.write_band("level0/b7_clip", &clipped.b7)?;
        record.write_mask("masks/csmask", &cs_mask)?;
        record.commit_stage("clip")?;

        // reflectance stage
        let converter = ReflectanceConverter::with_params(self.params.reflectance.clone());
        let refl = converter.convert(&clipped)?;
        record.write_grid("level1/b1_refl", &refl.bands.b1)?;
        record.write_grid("level1/b2_refl", &refl.bands.b2)?;
        record.write_grid("level1/b3_refl", &refl.bands.b3)?;
        record.write_grid("level1/b4_refl", &refl.bands.b4)?;
        record.write_grid("level1/b5_refl", &refl.bands.b5)?;
        record.write_grid("level1/b7_refl", &refl.bands.b7)?;
        record.commit_stage("reflectance")?;

        // mask cascade stage
        let cascade = MaskCascade::with_params(self.params.mask.clone());
        let scs = crate::core::masks::combine(&[&refl.nodata, &refl.spurious, &cs_mask]);
        let wetness = kttc_component(&KTTC_WET_COEFFS, &refl.bands, &scs);
        let masks = cascade.compose(refl.nodata, refl.spurious, cs_mask, &wetness);
        let level2 = apply_mask_bands(&refl.bands, &masks.scsw);
        record.write_mask("masks/nodata", &masks.nodata)?;
        record.write_mask("masks/smask", &masks.spurious)?;
        record.write_mask("masks/scsmask", &masks.scs)?;
        record.write_mask("masks/wmask", &masks.water)?;
        record.write_mask("masks/scswmask", &masks.scsw)?;
        record.set_attr("wmask_kttc_wet_threshold", cascade.params().water_threshold)?;
        record.write_grid("level2/b1_refl_scswmask", &level2.b1)?;
        record.write_grid("level2/b2_refl_scswmask", &level2.b2)?;
        record.write_grid("level2/b3_refl_scswmask", &level2.b3)?;
        record.write_grid("level2/b4_refl_scswmask", &level2.b4)?;
        record.write_grid("level2/b5_refl_scswmask", &level2.b5)?;
        record.write_grid("level2/b7_refl_scswmask", &level2.b7)?;
        record.commit_stage("masks")?;

        // index stage
        let (indices, diag) = IndexCalculator::new().compute_all(&level2, &masks.scsw);
        for idx in SpectralIndex::ALL {
            record.write_grid(&format!("level3/{}", idx.name()), indices.get(idx))?;
        }
        record.commit_stage("indices")?;

        // forest-mask stage, when an epoch map is available
        let epochs: Vec<i32> = landcover_maps.iter().map(|m| m.epoch).collect();
        let forest_all = match select_epoch(&epochs, scene.year()) {
            Some(j) => {
                let map = &landcover_maps[j];
                log::info!("scene {} uses {} land-cover epoch", key, map.epoch);
                let forest = cascade.forest_masks(&map.classes);
                let combos = cascade.forest_combos(&masks.scsw, &forest);
                record.write_classes("nlcd/lc_clip", &map.classes)?;
                record.set_attr("nlcd_year", map.epoch)?;
                record.write_mask("masks/forest/deciduous", &forest.deciduous)?;
                record.write_mask("masks/forest/evergreen", &forest.evergreen)?;
                record.write_mask("masks/forest/mixed", &forest.mixed)?;
                record.write_mask("masks/forest/wetlands", &forest.wetland)?;
                record.write_mask("masks/forest/all", &forest.all)?;
                record.write_mask("masks/scswdmask", &combos.deciduous)?;
                record.write_mask("masks/scswemask", &combos.evergreen)?;
                record.write_mask("masks/scswmmask", &combos.mixed)?;
                record.write_mask("masks/scswwmask", &combos.wetland)?;
                record.write_mask("masks/scswfmask", &combos.all)?;
                record.commit_stage("forest masks")?;
                Some(forest.all)
            }
            None => None,
        };

        Ok(SceneOutcome {
            key,
            scsw: masks.scsw,
            forest_all,
            zero_denominators: diag.zero_denominators,
        })
    }

    /// Read-only application of the footprint-wide union mask to one
    /// scene's record
    fn apply_union(&self, outcome: &SceneOutcome, union: &MaskGrid) -> ProcResult<()> {
        let scswu = crate::core::masks::combine(&[&outcome.scsw, union]);
        log::info!(
            "scene {}: complete union mask allows {} pixels",
            outcome.key,
            valid_count(&scswu)
        );
        let mut record = self.store.open_record(&outcome.key)?;
        record.write_mask("masks/forest/union", union)?;
        record.write_mask("masks/scswumask", &scswu)?;
        record.commit_stage("forest union mask")?;
        Ok(())
    }

    /// Stack one index across the footprint's processed scenes and
    /// compute per-pixel temporal statistics. `years`, when given,
    /// restricts the stack to that inclusive year range.
    pub fn aggregate(
        &self,
        footprint: &str,
        index: SpectralIndex,
        years: Option<(i32, i32)>,
    ) -> ProcResult<StatisticsGrids> {
        let all_keys = self.store.record_keys(footprint)?;
        let keys: Vec<String> = all_keys
            .into_iter()
            .filter(|k| match (years, key_year(k)) {
                (Some((y0, y1)), Some(y)) => y >= y0 && y <= y1,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        if keys.is_empty() {
            return Err(ProcError::DataIntegrity(format!(
                "no processed scenes for footprint {} in the requested range",
                footprint
            )));
        }
        log::info!("found {} scenes in specified date range", keys.len());

        let first = self.store.open_record(&keys[0])?;
        let union = first.read_mask("masks/forest/union")?;
        let union_npix = valid_count(&union);

        let mut dates = Vec::with_capacity(keys.len());
        let mut grids = Vec::with_capacity(keys.len());
        for key in &keys {
            let record = self.store.open_record(key)?;
            let scswu = record.read_mask("masks/scswumask")?;
            let grid = record.read_grid(&format!("level3/{}", index.name()))?;
            if scswu.dim() != grid.dim() {
                return Err(ProcError::DataIntegrity(format!(
                    "scene {}: scswumask {:?} does not match index grid {:?}",
                    key,
                    scswu.dim(),
                    grid.dim()
                )));
            }
            let mut masked = grid;
            Zip::from(&mut masked).and(&scswu).for_each(|v, &m| {
                *v *= m as f32;
            });
            let tag = key.rsplit('/').next().unwrap_or(key).to_string();
            let avail = valid_count(&scswu);
            log::info!(
                "grid {} has {} available pixels ({:.1}% of full union mask)",
                tag,
                avail,
                if union_npix > 0 {
                    avail as f64 / union_npix as f64 * 100.0
                } else {
                    0.0
                }
            );
            dates.push(tag);
            grids.push(masked);
        }

        let aggregator = TemporalAggregator::with_params(self.params.aggregation.clone());
        let cube = aggregator.build_cube(&grids)?;
        let stats = aggregator.statistics(&cube, &union)?;

        let (y0, y1) = years.unwrap_or_else(|| {
            let first_year = key_year(&keys[0]).unwrap_or(0);
            let last_year = key_year(keys.last().unwrap()).unwrap_or(0);
            (first_year, last_year)
        });
        let stack_key = format!("{}/stacks/{}-{}_{}", footprint, y0, y1, index.name());
        let mut out = self.store.create_record(&stack_key, "stack")?;
        let q = self.params.aggregation.percentile;
        if let Some(v) = first.attr("projection") {
            out.set_attr("projection", v.clone())?;
        }
        if let Some(v) = first.attr("clip_bounds") {
            out.set_attr("clip_bounds", v.clone())?;
        }
        out.set_attr("percentile", q)?;
        out.set_dates(dates)?;
        out.write_mask("union_mask", &union)?;
        out.write_cube(&format!("{}_cube", index.name()), &cube)?;
        out.write_grid(&format!("{}_nvals", index.name()), &stats.nvals)?;
        out.write_grid(&format!("{}_{}pctile", index.name(), q as i64), &stats.percentile)?;
        out.write_grid(&format!("{}_median", index.name()), &stats.median)?;
        out.write_grid(&format!("{}_mean", index.name()), &stats.mean)?;
        out.write_grid(&format!("{}_std", index.name()), &stats.std)?;
        out.write_grid(&format!("{}_max", index.name()), &stats.max)?;
        out.commit_stage("stats")?;
        log::info!("wrote {} statistics to {}", index, stack_key);

        Ok(stats)
    }
}

enum BoundEdge {
    West,
    North,
    East,
    South,
}

/// Projected coordinate of a crop edge in the scene's own frame
fn self_window_bound(crop: &PixelCrop, scene: &Scene, edge: BoundEdge) -> f64 {
    let g = &scene.grid;
    let px = g.pixel_size;
    match edge {
        BoundEdge::West => g.nw_easting + crop.west_col as f64 * px,
        BoundEdge::North => g.nw_northing - crop.north_row as f64 * px,
        BoundEdge::East => g.nw_easting + crop.east_col as f64 * px,
        BoundEdge::South => g.nw_northing - crop.south_row as f64 * px,
    }
}

/// Year prefix of a "footprint/YYYY_DDD" record key
fn key_year(key: &str) -> Option<i32> {
    let tag = key.rsplit('/').next()?;
    tag.get(0..4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_year_parsing() {
        assert_eq!(key_year("p026r027/1999_203"), Some(1999));
        assert_eq!(key_year("p026r027/2013_001"), Some(2013));
        assert_eq!(key_year("p026r027/stacks"), None);
    }
}
