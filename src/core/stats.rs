use crate::types::{IndexCube, IndexGrid, MaskGrid, ProcError, ProcResult};
use ndarray::{Array2, Axis};

/// Temporal aggregation parameters
#[derive(Debug, Clone)]
pub struct AggregationParams {
    /// Upper percentile reported alongside the median (0-100)
    pub percentile: f64,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self { percentile: 90.0 }
    }
}

/// Statistics of one pixel's filtered time series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub percentile: f32,
    pub median: f32,
    pub mean: f32,
    pub std: f32,
    pub max: f32,
}

/// Per-pixel statistics grids for one index over the full time stack.
/// Pixels outside the union mask hold 0.0 everywhere.
#[derive(Debug, Clone)]
pub struct StatisticsGrids {
    pub nvals: Array2<f32>,
    pub percentile: Array2<f32>,
    pub median: Array2<f32>,
    pub mean: Array2<f32>,
    pub std: Array2<f32>,
    pub max: Array2<f32>,
}

/// Linear-interpolation percentile of an ascending-sorted series. `q` is
/// clamped to 0-100 so a misconfigured parameter degrades to the min or
/// max rather than indexing out of bounds.
fn percentile_sorted(sorted: &[f32], q: f64) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = q.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = (rank - lo as f64) as f32;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Evaluate one pixel's time series.
///
/// Values at or below zero are masked samples (sentinels and mask
/// multiplications), not legitimate measurements, and are discarded.
/// An empty series yields all-zero statistics; a single sample yields
/// that sample with zero spread. Both are ordinary outcomes of sparse
/// coverage, recovered locally rather than raised as errors.
pub fn eval_series(vals: &[f32], q: f64) -> SeriesStats {
    let mut kept: Vec<f32> = vals.iter().copied().filter(|&v| v > 0.0).collect();
    match kept.len() {
        0 => SeriesStats {
            count: 0,
            percentile: 0.0,
            median: 0.0,
            mean: 0.0,
            std: 0.0,
            max: 0.0,
        },
        1 => SeriesStats {
            count: 1,
            percentile: kept[0],
            median: kept[0],
            mean: kept[0],
            std: 0.0,
            max: kept[0],
        },
        n => {
            kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mean = kept.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let var = kept
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            SeriesStats {
                count: n,
                percentile: percentile_sorted(&kept, q),
                median: percentile_sorted(&kept, 50.0),
                mean: mean as f32,
                std: var.sqrt() as f32,
                max: kept[n - 1],
            }
        }
    }
}

/// Stacks per-scene index grids into a time cube and computes per-pixel
/// temporal statistics over the union mask
pub struct TemporalAggregator {
    params: AggregationParams,
}

impl TemporalAggregator {
    pub fn new() -> Self {
        Self {
            params: AggregationParams::default(),
        }
    }

    pub fn with_params(params: AggregationParams) -> Self {
        Self { params }
    }

    /// Stack date-ordered grids into a (date, row, col) cube. The grids
    /// must already carry the scsw and union masking (invalid pixels at
    /// 0 or the sentinel). The cube holds one float per pixel per date
    /// for the whole footprint; this dominates the pipeline's memory
    /// footprint.
    pub fn build_cube(&self, grids: &[IndexGrid]) -> ProcResult<IndexCube> {
        let first = grids.first().ok_or_else(|| {
            ProcError::DataIntegrity("no index grids supplied for aggregation".to_string())
        })?;
        let (nrows, ncols) = first.dim();
        let mut cube = IndexCube::zeros((grids.len(), nrows, ncols));
        for (k, grid) in grids.iter().enumerate() {
            if grid.dim() != (nrows, ncols) {
                return Err(ProcError::DataIntegrity(format!(
                    "grid {} dimensions {:?} do not match cube layer {:?}",
                    k,
                    grid.dim(),
                    (nrows, ncols)
                )));
            }
            cube.index_axis_mut(Axis(0), k).assign(grid);
        }
        log::info!(
            "assembled cube of {} dates x {} rows x {} cols",
            grids.len(),
            nrows,
            ncols
        );
        Ok(cube)
    }

    /// Per-pixel statistics at every union-mask location
    pub fn statistics(&self, cube: &IndexCube, union: &MaskGrid) -> ProcResult<StatisticsGrids> {
        let (ndates, nrows, ncols) = cube.dim();
        if union.dim() != (nrows, ncols) {
            return Err(ProcError::DataIntegrity(format!(
                "union mask {:?} does not match cube layers {:?}",
                union.dim(),
                (nrows, ncols)
            )));
        }
        log::info!(
            "evaluating series of {} dates at {} union mask locations",
            ndates,
            union.iter().map(|&v| v as usize).sum::<usize>()
        );

        let mut out = StatisticsGrids {
            nvals: Array2::zeros((nrows, ncols)),
            percentile: Array2::zeros((nrows, ncols)),
            median: Array2::zeros((nrows, ncols)),
            mean: Array2::zeros((nrows, ncols)),
            std: Array2::zeros((nrows, ncols)),
            max: Array2::zeros((nrows, ncols)),
        };
        let mut series = Vec::with_capacity(ndates);
        let mut evaluated = 0usize;
        for r in 0..nrows {
            for c in 0..ncols {
                if union[[r, c]] != 1 {
                    continue;
                }
                series.clear();
                for k in 0..ndates {
                    series.push(cube[[k, r, c]]);
                }
                let stats = eval_series(&series, self.params.percentile);
                out.nvals[[r, c]] = stats.count as f32;
                out.percentile[[r, c]] = stats.percentile;
                out.median[[r, c]] = stats.median;
                out.mean[[r, c]] = stats.mean;
                out.std[[r, c]] = stats.std;
                out.max[[r, c]] = stats.max;
                evaluated += 1;
                if evaluated % 100_000 == 0 {
                    log::debug!("{} pixels evaluated", evaluated);
                }
            }
        }
        log::info!("{} pixels evaluated", evaluated);
        Ok(out)
    }
}

impl Default for TemporalAggregator {
    fn default() -> Self {
        Self::new()
    }
}
