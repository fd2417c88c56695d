use crate::types::{
    MaskGrid, ProcError, ProcResult, RawBands, RawGrid, ReflBands, ReflGrid, NODATA, NODATA_DN,
};
use ndarray::Zip;

/// Reflectance scaling parameters
#[derive(Debug, Clone)]
pub struct ReflectanceParams {
    /// Divisor converting integer DN to decimal reflectance
    pub dn_scale: f32,
}

impl Default for ReflectanceParams {
    fn default() -> Self {
        // LEDAPS surface reflectance is delivered as DN * 10000
        Self { dn_scale: 10000.0 }
    }
}

/// Converts raw integer bands to decimal reflectance and screens
/// no-data and spurious values
pub struct ReflectanceConverter {
    params: ReflectanceParams,
}

/// Scaled bands plus the validity masks produced by the conversion
#[derive(Debug, Clone)]
pub struct ReflectanceResult {
    pub bands: ReflBands,
    /// 0 where the -9999 sentinel appeared in any band
    pub nodata: MaskGrid,
    /// 0 where any band fell outside (0, 1] after scaling
    pub spurious: MaskGrid,
}

impl ReflectanceConverter {
    pub fn new() -> Self {
        Self {
            params: ReflectanceParams::default(),
        }
    }

    pub fn with_params(params: ReflectanceParams) -> Self {
        Self { params }
    }

    /// Scale one band and derive its nodata and spurious-value masks.
    ///
    /// A scaled reflectance is kept only when it lies strictly in
    /// (0.0, 1.0]; everything else becomes the -9999 sentinel.
    pub fn convert_band(&self, raw: &RawGrid) -> (ReflGrid, MaskGrid, MaskGrid) {
        let scale = self.params.dn_scale;
        let nodata = raw.mapv(|dn| u8::from(dn != NODATA_DN));
        let scaled = raw.mapv(|dn| dn as f32 / scale);
        let spurious = scaled.mapv(|r| u8::from(r > 0.0 && r <= 1.0));
        let refl = scaled.mapv(|r| if r > 0.0 && r <= 1.0 { r } else { NODATA });
        (refl, nodata, spurious)
    }

    /// Convert all six bands, combining the per-band masks by pixel-wise
    /// AND. All bands must share the clipped dimensions.
    pub fn convert(&self, bands: &RawBands) -> ProcResult<ReflectanceResult> {
        let dims = bands.b1.dim();
        for (name, b) in [
            ("b2", &bands.b2),
            ("b3", &bands.b3),
            ("b4", &bands.b4),
            ("b5", &bands.b5),
            ("b7", &bands.b7),
        ] {
            if b.dim() != dims {
                return Err(ProcError::DataIntegrity(format!(
                    "band {} dimensions {:?} do not match b1 {:?}",
                    name,
                    b.dim(),
                    dims
                )));
            }
        }

        let (b1, nd1, sp1) = self.convert_band(&bands.b1);
        let (b2, nd2, sp2) = self.convert_band(&bands.b2);
        let (b3, nd3, sp3) = self.convert_band(&bands.b3);
        let (b4, nd4, sp4) = self.convert_band(&bands.b4);
        let (b5, nd5, sp5) = self.convert_band(&bands.b5);
        let (b7, nd7, sp7) = self.convert_band(&bands.b7);

        let nir_pixels = b4.iter().filter(|&&v| v != NODATA).count();
        log::debug!("raw band 4 (NIR) reflectance contains {} data pixels", nir_pixels);

        let mut nodata = nd1;
        for m in [&nd2, &nd3, &nd4, &nd5, &nd7] {
            nodata = &nodata * m;
        }
        let mut spurious = sp1;
        for m in [&sp2, &sp3, &sp4, &sp5, &sp7] {
            spurious = &spurious * m;
        }
        log::info!(
            "nodata mask allows {} pixels",
            nodata.iter().map(|&v| v as usize).sum::<usize>()
        );
        log::info!(
            "spurious values mask allows {} pixels",
            spurious.iter().map(|&v| v as usize).sum::<usize>()
        );

        Ok(ReflectanceResult {
            bands: ReflBands {
                b1,
                b2,
                b3,
                b4,
                b5,
                b7,
            },
            nodata,
            spurious,
        })
    }
}

impl Default for ReflectanceConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace pixels outside the mask with the -9999 sentinel
pub fn apply_mask(grid: &ReflGrid, mask: &MaskGrid) -> ReflGrid {
    let mut out = grid.clone();
    Zip::from(&mut out).and(mask).for_each(|v, &m| {
        if m != 1 {
            *v = NODATA;
        }
    });
    out
}

/// Apply the mask to all six bands at once
pub fn apply_mask_bands(bands: &ReflBands, mask: &MaskGrid) -> ReflBands {
    ReflBands {
        b1: apply_mask(&bands.b1, mask),
        b2: apply_mask(&bands.b2, mask),
        b3: apply_mask(&bands.b3, mask),
        b4: apply_mask(&bands.b4, mask),
        b5: apply_mask(&bands.b5, mask),
        b7: apply_mask(&bands.b7, mask),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_convert_band_scales_and_masks() {
        let raw = array![[5000i16, -9999, 0], [10000, 10001, -5]];
        let (refl, nodata, spurious) = ReflectanceConverter::new().convert_band(&raw);

        assert_abs_diff_eq!(refl[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(refl[[1, 0]], 1.0, epsilon = 1e-6);
        // sentinel, zero, out-of-range, and negative all mask out
        assert_eq!(refl[[0, 1]], NODATA);
        assert_eq!(refl[[0, 2]], NODATA);
        assert_eq!(refl[[1, 1]], NODATA);
        assert_eq!(refl[[1, 2]], NODATA);

        assert_eq!(nodata, array![[1u8, 0, 1], [1, 1, 1]]);
        assert_eq!(spurious, array![[1u8, 0, 0], [1, 0, 0]]);
    }

    #[test]
    fn test_combined_masks_are_and_of_bands() {
        let good = array![[5000i16, 5000], [5000, 5000]];
        let mut b3 = good.clone();
        b3[[0, 0]] = -9999;
        let mut b5 = good.clone();
        b5[[1, 1]] = 20000; // spurious, not nodata
        let bands = RawBands {
            b1: good.clone(),
            b2: good.clone(),
            b3,
            b4: good.clone(),
            b5,
            b7: good.clone(),
        };
        let result = ReflectanceConverter::new().convert(&bands).unwrap();
        assert_eq!(result.nodata, array![[0u8, 1], [1, 1]]);
        assert_eq!(result.spurious, array![[0u8, 1], [1, 0]]);
    }

    #[test]
    fn test_dimension_mismatch_is_integrity_error() {
        let bands = RawBands {
            b1: RawGrid::zeros((4, 4)),
            b2: RawGrid::zeros((4, 4)),
            b3: RawGrid::zeros((4, 4)),
            b4: RawGrid::zeros((4, 3)),
            b5: RawGrid::zeros((4, 4)),
            b7: RawGrid::zeros((4, 4)),
        };
        let result = ReflectanceConverter::new().convert(&bands);
        assert!(matches!(result, Err(crate::types::ProcError::DataIntegrity(_))));
    }

    #[test]
    fn test_apply_mask_is_idempotent() {
        let grid = array![[0.5f32, 0.6], [0.7, 0.8]];
        let mask = array![[1u8, 0], [0, 1]];
        let once = apply_mask(&grid, &mask);
        let twice = apply_mask(&once, &mask);
        assert_eq!(once, twice);
        assert_eq!(once[[0, 1]], NODATA);
        assert_eq!(once[[1, 1]], 0.8);
    }
}
