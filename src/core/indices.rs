use crate::core::reflectance::apply_mask;
use crate::types::{IndexGrid, MaskGrid, ProcError, ReflBands, ReflGrid};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// KTTC (tasseled cap) coefficients for Landsat TM/ETM+ surface
/// reflectance, from Crist [1985]
pub const KTTC_BGT_COEFFS: [f32; 6] = [0.2043, 0.4158, 0.5524, 0.5741, 0.3124, 0.2303];
pub const KTTC_GRN_COEFFS: [f32; 6] = [-0.1603, -0.2819, -0.4934, 0.7940, -0.0002, -0.1446];
pub const KTTC_WET_COEFFS: [f32; 6] = [0.0315, 0.2021, 0.3102, 0.1594, -0.6806, -0.6109];

/// The spectral index products computed per scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// Simple ratio (NIR/red)
    Sr,
    /// Moisture stress index (SWIR1/NIR)
    Msi,
    Ndvi,
    Evi,
    Savi,
    /// Reduced simple ratio
    Rsr,
    /// Normalized difference infrared index
    Ndii,
    /// Normalized burn ratio
    Nbr,
    /// Raw KTTC brightness
    KttcBgt,
    /// Raw KTTC greenness
    KttcGrn,
    /// Raw KTTC wetness
    KttcWet,
    /// Per-scene standardized brightness
    Tcb,
    /// Per-scene standardized greenness
    Tcg,
    /// Per-scene standardized wetness
    Tcw,
    /// Disturbance index (TCB - (TCG + TCW))
    Di,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 15] = [
        SpectralIndex::Sr,
        SpectralIndex::Msi,
        SpectralIndex::Ndvi,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
        SpectralIndex::Rsr,
        SpectralIndex::Ndii,
        SpectralIndex::Nbr,
        SpectralIndex::KttcBgt,
        SpectralIndex::KttcGrn,
        SpectralIndex::KttcWet,
        SpectralIndex::Tcb,
        SpectralIndex::Tcg,
        SpectralIndex::Tcw,
        SpectralIndex::Di,
    ];

    /// Dataset name used in the scene store
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Sr => "sr",
            SpectralIndex::Msi => "msi",
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Evi => "evi",
            SpectralIndex::Savi => "savi",
            SpectralIndex::Rsr => "rsr",
            SpectralIndex::Ndii => "ndii",
            SpectralIndex::Nbr => "nbr",
            SpectralIndex::KttcBgt => "kttc_bgt",
            SpectralIndex::KttcGrn => "kttc_grn",
            SpectralIndex::KttcWet => "kttc_wet",
            SpectralIndex::Tcb => "tcb",
            SpectralIndex::Tcg => "tcg",
            SpectralIndex::Tcw => "tcw",
            SpectralIndex::Di => "di",
        }
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SpectralIndex {
    type Err = ProcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpectralIndex::ALL
            .iter()
            .find(|idx| idx.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ProcError::DataIntegrity(format!("unknown spectral index '{}'", s)))
    }
}

/// All index grids for one scene
#[derive(Debug, Clone)]
pub struct SceneIndices {
    pub sr: IndexGrid,
    pub msi: IndexGrid,
    pub ndvi: IndexGrid,
    pub evi: IndexGrid,
    pub savi: IndexGrid,
    pub rsr: IndexGrid,
    pub ndii: IndexGrid,
    pub nbr: IndexGrid,
    pub kttc_bgt: IndexGrid,
    pub kttc_grn: IndexGrid,
    pub kttc_wet: IndexGrid,
    pub tcb: IndexGrid,
    pub tcg: IndexGrid,
    pub tcw: IndexGrid,
    pub di: IndexGrid,
}

impl SceneIndices {
    pub fn get(&self, index: SpectralIndex) -> &IndexGrid {
        match index {
            SpectralIndex::Sr => &self.sr,
            SpectralIndex::Msi => &self.msi,
            SpectralIndex::Ndvi => &self.ndvi,
            SpectralIndex::Evi => &self.evi,
            SpectralIndex::Savi => &self.savi,
            SpectralIndex::Rsr => &self.rsr,
            SpectralIndex::Ndii => &self.ndii,
            SpectralIndex::Nbr => &self.nbr,
            SpectralIndex::KttcBgt => &self.kttc_bgt,
            SpectralIndex::KttcGrn => &self.kttc_grn,
            SpectralIndex::KttcWet => &self.kttc_wet,
            SpectralIndex::Tcb => &self.tcb,
            SpectralIndex::Tcg => &self.tcg,
            SpectralIndex::Tcw => &self.tcw,
            SpectralIndex::Di => &self.di,
        }
    }
}

/// Diagnostic counters from index computation. Zero denominators are
/// recovered locally (the pixel is set to 0.0) and tallied here, never
/// raised as errors.
#[derive(Debug, Clone, Default)]
pub struct IndexDiagnostics {
    pub zero_denominators: usize,
}

/// Linear KTTC component: dot product of the six bands with the given
/// coefficients, mask reapplied
pub fn kttc_component(coeffs: &[f32; 6], bands: &ReflBands, mask: &MaskGrid) -> IndexGrid {
    let mut out = IndexGrid::zeros(bands.b1.dim());
    let [b1, b2, b3, b4, b5, b7] = bands.as_array();
    Zip::from(&mut out)
        .and(b1)
        .and(b2)
        .and(b3)
        .and(b4)
        .and(b5)
        .for_each(|o, &v1, &v2, &v3, &v4, &v5| {
            *o = coeffs[0] * v1 + coeffs[1] * v2 + coeffs[2] * v3 + coeffs[3] * v4
                + coeffs[4] * v5;
        });
    Zip::from(&mut out).and(b7).for_each(|o, &v7| {
        *o += coeffs[5] * v7;
    });
    apply_mask(&out, mask)
}

/// Computes masked spectral indices from the six reflectance bands of
/// one scene
pub struct IndexCalculator;

impl IndexCalculator {
    pub fn new() -> Self {
        Self
    }

    /// num/den with the zero-denominator policy: an exactly-zero
    /// denominator yields 0.0 and increments the diagnostic count
    pub fn ratio(&self, num: &ReflGrid, den: &ReflGrid, mask: &MaskGrid) -> (IndexGrid, usize) {
        let mut zeros = 0usize;
        let mut out = IndexGrid::zeros(num.dim());
        Zip::from(&mut out).and(num).and(den).for_each(|o, &n, &d| {
            if d == 0.0 {
                zeros += 1;
                *o = 0.0;
            } else {
                *o = n / d;
            }
        });
        if zeros > 0 {
            log::warn!("denominator = 0 at {} locations", zeros);
        }
        (apply_mask(&out, mask), zeros)
    }

    /// (b - a)/(a + b), the normalized-difference form shared by NDVI,
    /// NDII, and NBR
    pub fn normalized_difference(
        &self,
        a: &ReflGrid,
        b: &ReflGrid,
        mask: &MaskGrid,
    ) -> (IndexGrid, usize) {
        let mut zeros = 0usize;
        let mut out = IndexGrid::zeros(a.dim());
        Zip::from(&mut out).and(a).and(b).for_each(|o, &va, &vb| {
            let den = va + vb;
            if den == 0.0 {
                zeros += 1;
                *o = 0.0;
            } else {
                *o = (vb - va) / den;
            }
        });
        if zeros > 0 {
            log::warn!("denominator = 0 at {} locations", zeros);
        }
        (apply_mask(&out, mask), zeros)
    }

    pub fn evi(&self, b1: &ReflGrid, b3: &ReflGrid, b4: &ReflGrid, mask: &MaskGrid) -> (IndexGrid, usize) {
        const G: f32 = 2.5;
        const C1: f32 = 6.0;
        const C2: f32 = 7.5;
        const L: f32 = 1.0;
        let mut zeros = 0usize;
        let mut out = IndexGrid::zeros(b1.dim());
        Zip::from(&mut out)
            .and(b1)
            .and(b3)
            .and(b4)
            .for_each(|o, &v1, &v3, &v4| {
                let den = v4 + C1 * v3 - C2 * v1 + L;
                if den == 0.0 {
                    zeros += 1;
                    *o = 0.0;
                } else {
                    *o = G * (v4 - v3) / den;
                }
            });
        if zeros > 0 {
            log::warn!("denominator = 0 at {} locations", zeros);
        }
        (apply_mask(&out, mask), zeros)
    }

    pub fn savi(&self, b3: &ReflGrid, b4: &ReflGrid, mask: &MaskGrid) -> (IndexGrid, usize) {
        const L: f32 = 0.5;
        let mut zeros = 0usize;
        let mut out = IndexGrid::zeros(b3.dim());
        Zip::from(&mut out).and(b3).and(b4).for_each(|o, &v3, &v4| {
            let den = v4 + v3 + L;
            if den == 0.0 {
                zeros += 1;
                *o = 0.0;
            } else {
                *o = (1.0 + L) * (v4 - v3) / den;
            }
        });
        if zeros > 0 {
            log::warn!("denominator = 0 at {} locations", zeros);
        }
        (apply_mask(&out, mask), zeros)
    }

    /// Reduced simple ratio: SR scaled by the scene's SWIR1 range over
    /// valid pixels. A flat SWIR1 band (zero range) falls back to 0.0
    /// under the zero-denominator policy.
    pub fn rsr(
        &self,
        b3: &ReflGrid,
        b4: &ReflGrid,
        b5: &ReflGrid,
        mask: &MaskGrid,
    ) -> (IndexGrid, usize) {
        let (sr, mut zeros) = self.ratio(b4, b3, mask);
        let mut b5_min = f32::MAX;
        let mut b5_max = f32::MIN;
        Zip::from(b5).and(mask).for_each(|&v, &m| {
            if m == 1 {
                b5_min = b5_min.min(v);
                b5_max = b5_max.max(v);
            }
        });
        let range = b5_max - b5_min;
        let mut out = IndexGrid::zeros(sr.dim());
        Zip::from(&mut out)
            .and(&sr)
            .and(b5)
            .and(mask)
            .for_each(|o, &s, &v5, &m| {
                if m != 1 {
                    return;
                }
                if range == 0.0 {
                    zeros += 1;
                    *o = 0.0;
                } else {
                    *o = s * (1.0 - (v5 - b5_min) / range);
                }
            });
        (apply_mask(&out, mask), zeros)
    }

    /// Standardize a KTTC component per scene: subtract the mean and
    /// divide by the population standard deviation, both over valid
    /// pixels only
    pub fn standardize(&self, kttc: &IndexGrid, mask: &MaskGrid) -> IndexGrid {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        Zip::from(kttc).and(mask).for_each(|&v, &m| {
            if m == 1 {
                sum += v as f64;
                count += 1;
            }
        });
        if count == 0 {
            return apply_mask(&IndexGrid::zeros(kttc.dim()), mask);
        }
        let mean = sum / count as f64;
        let mut var = 0.0f64;
        Zip::from(kttc).and(mask).for_each(|&v, &m| {
            if m == 1 {
                var += (v as f64 - mean).powi(2);
            }
        });
        let std = (var / count as f64).sqrt();
        if std == 0.0 {
            // constant component over the scene; standardized values are 0
            log::warn!("KTTC component has zero variance over valid pixels");
            return apply_mask(&IndexGrid::zeros(kttc.dim()), mask);
        }
        let out = kttc.mapv(|v| ((v as f64 - mean) / std) as f32);
        apply_mask(&out, mask)
    }

    /// Disturbance index from the standardized components
    pub fn disturbance(
        &self,
        tcb: &IndexGrid,
        tcg: &IndexGrid,
        tcw: &IndexGrid,
        mask: &MaskGrid,
    ) -> IndexGrid {
        let mut out = IndexGrid::zeros(tcb.dim());
        Zip::from(&mut out)
            .and(tcb)
            .and(tcg)
            .and(tcw)
            .for_each(|o, &b, &g, &w| *o = b - (g + w));
        apply_mask(&out, mask)
    }

    /// Compute every index product for one scene. `bands` are the
    /// scsw-masked reflectance bands; the mask is reapplied after each
    /// computation.
    pub fn compute_all(&self, bands: &ReflBands, mask: &MaskGrid) -> (SceneIndices, IndexDiagnostics) {
        let mut diag = IndexDiagnostics::default();

        log::debug!("simple ratio (SR)");
        let (sr, z) = self.ratio(&bands.b4, &bands.b3, mask);
        diag.zero_denominators += z;
        log::debug!("moisture stress index (MSI)");
        let (msi, z) = self.ratio(&bands.b5, &bands.b4, mask);
        diag.zero_denominators += z;
        log::debug!("normalized difference vegetation index (NDVI)");
        let (ndvi, z) = self.normalized_difference(&bands.b3, &bands.b4, mask);
        diag.zero_denominators += z;
        log::debug!("enhanced vegetation index (EVI)");
        let (evi, z) = self.evi(&bands.b1, &bands.b3, &bands.b4, mask);
        diag.zero_denominators += z;
        log::debug!("soil-adjusted vegetation index (SAVI)");
        let (savi, z) = self.savi(&bands.b3, &bands.b4, mask);
        diag.zero_denominators += z;
        log::debug!("reduced simple ratio (RSR)");
        let (rsr, z) = self.rsr(&bands.b3, &bands.b4, &bands.b5, mask);
        diag.zero_denominators += z;
        log::debug!("normalized difference infrared index (NDII)");
        let (ndii, z) = self.normalized_difference(&bands.b5, &bands.b4, mask);
        diag.zero_denominators += z;
        log::debug!("normalized burn ratio (NBR)");
        let (nbr, z) = self.normalized_difference(&bands.b7, &bands.b4, mask);
        diag.zero_denominators += z;

        log::debug!("KTTC components and standardized tasseled cap");
        let kttc_bgt = kttc_component(&KTTC_BGT_COEFFS, bands, mask);
        let kttc_grn = kttc_component(&KTTC_GRN_COEFFS, bands, mask);
        let kttc_wet = kttc_component(&KTTC_WET_COEFFS, bands, mask);
        let tcb = self.standardize(&kttc_bgt, mask);
        let tcg = self.standardize(&kttc_grn, mask);
        let tcw = self.standardize(&kttc_wet, mask);
        log::debug!("disturbance index (DI)");
        let di = self.disturbance(&tcb, &tcg, &tcw, mask);

        if diag.zero_denominators > 0 {
            log::info!(
                "index computation recovered {} zero-denominator pixels",
                diag.zero_denominators
            );
        }

        (
            SceneIndices {
                sr,
                msi,
                ndvi,
                evi,
                savi,
                rsr,
                ndii,
                nbr,
                kttc_bgt,
                kttc_grn,
                kttc_wet,
                tcb,
                tcg,
                tcw,
                di,
            },
            diag,
        )
    }
}

impl Default for IndexCalculator {
    fn default() -> Self {
        Self::new()
    }
}
