use crate::types::{CloudShadowClass, IndexGrid, LandcoverGrid, MaskGrid};
use ndarray::{Array2, Zip};

/// NLCD class codes used for forest masking
pub const LC_DECIDUOUS: i8 = 41;
pub const LC_EVERGREEN: i8 = 42;
pub const LC_MIXED: i8 = 43;
/// Wooded wetlands in the NLCD 1992 product
pub const LC_WETLAND_1992: i8 = 91;
/// Wooded wetlands in the NLCD 2001/2006/2011 products
pub const LC_WETLAND_2001: i8 = 90;

/// Mask cascade parameters
#[derive(Debug, Clone)]
pub struct MaskParams {
    /// KTTC wetness value at or above which a pixel is treated as surface
    /// water. Never made data-driven in practice; kept as a parameter with
    /// the long-standing default.
    pub water_threshold: f32,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            water_threshold: -0.012,
        }
    }
}

/// Count of pixels a mask allows
pub fn valid_count(mask: &MaskGrid) -> usize {
    mask.iter().map(|&v| v as usize).sum()
}

/// Pixel-wise AND of any number of 0/1 masks
pub fn combine(masks: &[&MaskGrid]) -> MaskGrid {
    let mut out = masks[0].clone();
    for m in &masks[1..] {
        out = &out * *m;
    }
    out
}

/// Interpret raw Fmask codes into a 0/1 cloud/shadow mask: clear-sky and
/// open-water pixels pass, shadow/cloud/missing do not
pub fn interpret_cloud_shadow(codes: &Array2<u8>) -> MaskGrid {
    codes.mapv(|c| u8::from(CloudShadowClass::from_code(c).is_usable()))
}

/// Per-scene validity masks in cascade order. Every composite equals the
/// pixel-wise AND of its constituents; rebuilding from the same inputs is
/// idempotent.
#[derive(Debug, Clone)]
pub struct SceneMaskSet {
    pub nodata: MaskGrid,
    pub spurious: MaskGrid,
    pub cloud_shadow: MaskGrid,
    /// nodata AND spurious AND cloud_shadow
    pub scs: MaskGrid,
    pub water: MaskGrid,
    /// scs AND water
    pub scsw: MaskGrid,
}

/// Forest-class membership masks derived from a land-cover map
#[derive(Debug, Clone)]
pub struct ForestMasks {
    pub deciduous: MaskGrid,
    pub evergreen: MaskGrid,
    pub mixed: MaskGrid,
    pub wetland: MaskGrid,
    /// OR of the four classes
    pub all: MaskGrid,
}

/// scsw combined with each forest class
#[derive(Debug, Clone)]
pub struct ForestCombos {
    pub deciduous: MaskGrid,
    pub evergreen: MaskGrid,
    pub mixed: MaskGrid,
    pub wetland: MaskGrid,
    pub all: MaskGrid,
}

/// Builds and composes the ordered chain of per-pixel validity masks
pub struct MaskCascade {
    params: MaskParams,
}

impl MaskCascade {
    pub fn new() -> Self {
        Self {
            params: MaskParams::default(),
        }
    }

    pub fn with_params(params: MaskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MaskParams {
        &self.params
    }

    /// Surface-water mask from the KTTC wetness component: pixels at or
    /// above the threshold are water and masked out. Sentinel pixels sit
    /// far below any plausible threshold and pass; the scs mask removes
    /// them in the composite.
    pub fn water_mask(&self, wetness: &IndexGrid) -> MaskGrid {
        log::debug!(
            "creating water mask with threshold KTTC wetness = {}",
            self.params.water_threshold
        );
        wetness.mapv(|w| u8::from(w < self.params.water_threshold))
    }

    /// Compose the scs and scsw stages from their constituents, logging
    /// the pixel count each stage allows
    pub fn compose(
        &self,
        nodata: MaskGrid,
        spurious: MaskGrid,
        cloud_shadow: MaskGrid,
        wetness: &IndexGrid,
    ) -> SceneMaskSet {
        log::info!("cloud/shadow mask allows {} pixels", valid_count(&cloud_shadow));
        let scs = combine(&[&nodata, &spurious, &cloud_shadow]);
        log::info!(
            "combined nodata/spurious/cloud/shadow mask allows {} pixels",
            valid_count(&scs)
        );
        let water = self.water_mask(wetness);
        log::info!("water mask allows {} pixels", valid_count(&water));
        let scsw = combine(&[&scs, &water]);
        log::info!(
            "nodata/spurious/cloud/shadow/water mask allows {} pixels",
            valid_count(&scsw)
        );
        SceneMaskSet {
            nodata,
            spurious,
            cloud_shadow,
            scs,
            water,
            scsw,
        }
    }

    /// Forest-class membership from a land-cover map. Both wooded-wetland
    /// codes are always tested; the designation changed between NLCD
    /// product vintages.
    pub fn forest_masks(&self, landcover: &LandcoverGrid) -> ForestMasks {
        let deciduous = landcover.mapv(|c| u8::from(c == LC_DECIDUOUS));
        let evergreen = landcover.mapv(|c| u8::from(c == LC_EVERGREEN));
        let mixed = landcover.mapv(|c| u8::from(c == LC_MIXED));
        let wetland =
            landcover.mapv(|c| u8::from(c == LC_WETLAND_1992 || c == LC_WETLAND_2001));
        let mut all = MaskGrid::zeros(landcover.dim());
        Zip::from(&mut all)
            .and(&deciduous)
            .and(&evergreen)
            .and(&mixed)
            .and(&wetland)
            .for_each(|a, &d, &e, &m, &w| *a = u8::from((d | e | m | w) != 0));
        log::info!("all-forest mask allows {} pixels", valid_count(&all));
        ForestMasks {
            deciduous,
            evergreen,
            mixed,
            wetland,
            all,
        }
    }

    /// Combine scsw with each forest class
    pub fn forest_combos(&self, scsw: &MaskGrid, forest: &ForestMasks) -> ForestCombos {
        let all = combine(&[scsw, &forest.all]);
        log::info!("complete all-forest mask allows {} pixels", valid_count(&all));
        ForestCombos {
            deciduous: combine(&[scsw, &forest.deciduous]),
            evergreen: combine(&[scsw, &forest.evergreen]),
            mixed: combine(&[scsw, &forest.mixed]),
            wetland: combine(&[scsw, &forest.wetland]),
            all,
        }
    }
}

impl Default for MaskCascade {
    fn default() -> Self {
        Self::new()
    }
}

/// OR-fold of per-scene forest masks across the time series.
///
/// A pure reduction over immutable inputs; applying the result to each
/// scene's stored masks is a separate read-only pass in the pipeline.
pub fn union_fold<'a, I>(masks: I) -> Option<MaskGrid>
where
    I: IntoIterator<Item = &'a MaskGrid>,
{
    let mut iter = masks.into_iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |mut acc, m| {
        Zip::from(&mut acc).and(m).for_each(|a, &b| *a = u8::from((*a | b) != 0));
        acc
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cloud_shadow_interpretation() {
        let codes = array![[0u8, 1, 2], [4, 255, 3]];
        let mask = interpret_cloud_shadow(&codes);
        assert_eq!(mask, array![[1u8, 1, 0], [0, 0, 0]]);
    }

    #[test]
    fn test_water_mask_threshold() {
        let wetness = array![[-0.5f32, -0.012], [-0.013, 0.2]];
        let mask = MaskCascade::new().water_mask(&wetness);
        // exactly at the threshold counts as water
        assert_eq!(mask, array![[1u8, 0], [1, 0]]);
    }

    #[test]
    fn test_scsw_equals_and_of_constituents() {
        let nodata = array![[1u8, 1, 0, 1], [1, 1, 1, 1]];
        let spurious = array![[1u8, 0, 1, 1], [1, 1, 1, 1]];
        let cs = array![[1u8, 1, 1, 0], [1, 1, 0, 1]];
        let wetness = array![[-0.5f32, -0.5, -0.5, -0.5], [0.1, -0.5, 0.1, -0.5]];
        let set = MaskCascade::new().compose(nodata.clone(), spurious.clone(), cs.clone(), &wetness);

        let water = MaskCascade::new().water_mask(&wetness);
        let expected = combine(&[&nodata, &spurious, &cs, &water]);
        assert_eq!(set.scsw, expected);
        // order independence: water first, then the rest
        let alt = combine(&[&water, &cs, &spurious, &nodata]);
        assert_eq!(set.scsw, alt);
        // strictly 0/1
        assert!(set.scsw.iter().all(|&v| v <= 1));
    }

    #[test]
    fn test_forest_masks_both_wetland_vintages() {
        let lc = array![[41i8, 42, 43], [90, 91, 11]];
        let forest = MaskCascade::new().forest_masks(&lc);
        assert_eq!(forest.deciduous, array![[1u8, 0, 0], [0, 0, 0]]);
        assert_eq!(forest.evergreen, array![[0u8, 1, 0], [0, 0, 0]]);
        assert_eq!(forest.mixed, array![[0u8, 0, 1], [0, 0, 0]]);
        assert_eq!(forest.wetland, array![[0u8, 0, 0], [1, 1, 0]]);
        assert_eq!(forest.all, array![[1u8, 1, 1], [1, 1, 0]]);
    }

    #[test]
    fn test_union_fold_is_or_and_idempotent() {
        let a = array![[1u8, 0], [0, 0]];
        let b = array![[0u8, 1], [0, 0]];
        let ab = array![[1u8, 1], [0, 0]];
        let union = union_fold([&a, &b, &ab]).unwrap();
        assert_eq!(union, ab);
        // recomputation from the same inputs is identical
        let again = union_fold([&a, &b, &ab]).unwrap();
        assert_eq!(union, again);
        assert!(union_fold(std::iter::empty()).is_none());
    }
}
