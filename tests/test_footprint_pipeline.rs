use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use landcube::core::masks::combine;
use landcube::{
    FootprintProcessor, GridDescriptor, Hemisphere, LandcoverRaster, ProcError, ProjectionInfo,
    RawBands, Scene, SceneStore, SpectralIndex,
};
use ndarray::Array2;
use tempfile::TempDir;

fn projection() -> ProjectionInfo {
    ProjectionInfo {
        projection: "UTM".to_string(),
        utm_zone: 15,
        hemisphere: Hemisphere::North,
        datum: "NAD83".to_string(),
        units: "meters".to_string(),
    }
}

fn grid(nw_e: f64, nw_n: f64, n: usize) -> GridDescriptor {
    GridDescriptor {
        nw_easting: nw_e,
        nw_northing: nw_n,
        se_easting: nw_e + n as f64 * 30.0,
        se_northing: nw_n - n as f64 * 30.0,
        ncols: n,
        nrows: n,
        pixel_size: 30.0,
    }
}

/// A 40x40 scene with uniform healthy-vegetation DN values:
/// b3 (red) = 0.10, b4 (NIR) = 0.40 after scaling, so NDVI = 0.6
fn scene(date: (i32, u32, u32), nw_e: f64, nw_n: f64) -> Scene {
    let n = 40;
    let fill = |dn: i16| Array2::from_elem((n, n), dn);
    Scene {
        footprint: "p026r027".to_string(),
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        projection: projection(),
        grid: grid(nw_e, nw_n, n),
        bands: RawBands {
            b1: fill(500),
            b2: fill(800),
            b3: fill(1000),
            b4: fill(4000),
            b5: fill(2000),
            b7: fill(1200),
        },
        cs_codes: Array2::zeros((n, n)),
    }
}

fn landcover(epoch: i32, class: i8) -> LandcoverRaster {
    LandcoverRaster {
        epoch,
        projection: projection(),
        grid: grid(299010.0, 5000030.0, 200),
        classes: Array2::from_elem((200, 200), class),
    }
}

#[test]
fn test_full_footprint_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    // three scenes, one shifted a pixel southeast; one NIR dropout and
    // one cloud pixel inside the common window
    let s1 = {
        let mut s = scene((1999, 7, 22), 300000.0, 5000000.0);
        s.cs_codes[[8, 8]] = 4;
        s
    };
    let s2 = {
        let mut s = scene((2000, 7, 16), 300030.0, 4999970.0);
        s.bands.b4[[10, 10]] = -9999;
        s
    };
    let s3 = scene((2001, 6, 1), 300000.0, 5000000.0);
    let rasters = vec![landcover(1992, 41), landcover(2001, 41)];

    let summary = processor
        .process_footprint(&[s1, s2, s3], &rasters)
        .expect("footprint run");

    assert!(summary.failed_scenes.is_empty());
    assert_eq!(summary.scene_keys.len(), 3);
    // intersection of the two origins, inset by 3 pixels per side
    assert_abs_diff_eq!(summary.window.west, 300120.0);
    assert_abs_diff_eq!(summary.window.north, 4999880.0);
    assert_abs_diff_eq!(summary.window.east, 301110.0);
    assert_abs_diff_eq!(summary.window.south, 4998890.0);
    for crop in &summary.window.crops {
        assert!(crop.west_col < crop.east_col && crop.east_col <= 40);
        assert!(crop.north_row < crop.south_row && crop.south_row <= 40);
        assert_eq!(crop.ncols, 33);
        assert_eq!(crop.nrows, 33);
    }
    // all-forest land cover puts every clipped pixel in the union
    assert_eq!(summary.union_pixels, Some(33 * 33));

    // stored scsw mask decomposes into the AND of its constituents
    let record = processor.store().open_record("p026r027/1999_203").expect("record");
    let nodata = record.read_mask("masks/nodata").expect("nodata");
    let smask = record.read_mask("masks/smask").expect("smask");
    let csmask = record.read_mask("masks/csmask").expect("csmask");
    let wmask = record.read_mask("masks/wmask").expect("wmask");
    let scsw = record.read_mask("masks/scswmask").expect("scswmask");
    assert_eq!(scsw, combine(&[&nodata, &smask, &csmask, &wmask]));
    // the cloud pixel at full-grid (8,8) lands at clipped (4,4)
    assert_eq!(csmask[[4, 4]], 0);
    assert_eq!(scsw[[4, 4]], 0);
    assert_eq!(record.provenance().stage, "forest union mask");

    // scene 2's NIR dropout shows up in its nodata mask at clipped (7,7)
    let record2 = processor.store().open_record("p026r027/2000_198").expect("record");
    let nodata2 = record2.read_mask("masks/nodata").expect("nodata");
    assert_eq!(nodata2[[7, 7]], 0);
    // epoch selection: 2000 predates the 2001 product, so 1992 applies
    assert_eq!(record2.attr("nlcd_year").and_then(|v| v.as_i64()), Some(1992));
    let record3 = processor.store().open_record("p026r027/2001_152").expect("record");
    assert_eq!(record3.attr("nlcd_year").and_then(|v| v.as_i64()), Some(2001));

    // temporal statistics over NDVI
    let stats = processor
        .aggregate("p026r027", SpectralIndex::Ndvi, Some((1999, 2001)))
        .expect("aggregate");
    // an unaffected pixel carries all three dates of NDVI = 0.6
    assert_eq!(stats.nvals[[0, 0]], 3.0);
    assert_abs_diff_eq!(stats.mean[[0, 0]], 0.6, epsilon = 1e-5);
    assert_abs_diff_eq!(stats.median[[0, 0]], 0.6, epsilon = 1e-5);
    assert_abs_diff_eq!(stats.max[[0, 0]], 0.6, epsilon = 1e-5);
    assert_abs_diff_eq!(stats.std[[0, 0]], 0.0, epsilon = 1e-5);
    // the cloud pixel and the dropout pixel each lose one date
    assert_eq!(stats.nvals[[4, 4]], 2.0);
    assert_eq!(stats.nvals[[7, 7]], 2.0);

    // the stack record round-trips the cube and statistics grids
    let stack = processor
        .store()
        .open_record("p026r027/stacks/1999-2001_ndvi")
        .expect("stack record");
    let cube = stack.read_cube("ndvi_cube").expect("cube");
    assert_eq!(cube.dim(), (3, 33, 33));
    let mean = stack.read_grid("ndvi_mean").expect("mean grid");
    assert_eq!(mean, stats.mean);
    assert_eq!(stack.dates().map(|d| d.len()), Some(3));
}

#[test]
fn test_reprocessing_is_idempotent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    let scenes = vec![
        scene((1999, 7, 22), 300000.0, 5000000.0),
        scene((2000, 7, 16), 300030.0, 4999970.0),
    ];
    let rasters = vec![landcover(1992, 41)];

    processor.process_footprint(&scenes, &rasters).expect("first run");
    let first = processor
        .store()
        .open_record("p026r027/1999_203")
        .expect("record")
        .read_mask("masks/scswumask")
        .expect("scswumask");

    processor.process_footprint(&scenes, &rasters).expect("second run");
    let second = processor
        .store()
        .open_record("p026r027/1999_203")
        .expect("record")
        .read_mask("masks/scswumask")
        .expect("scswumask");
    assert_eq!(first, second);
}

#[test]
fn test_failed_scene_does_not_block_aggregation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    // cloud/shadow codes sized against the wrong grid; the scene fails
    // mid-stage with its record already created
    let bad = {
        let mut s = scene((1999, 7, 22), 300000.0, 5000000.0);
        s.cs_codes = Array2::zeros((10, 10));
        s
    };
    let good = scene((2000, 7, 16), 300030.0, 4999970.0);
    let rasters = vec![landcover(1992, 41)];

    let summary = processor
        .process_footprint(&[bad, good], &rasters)
        .expect("footprint run");
    assert_eq!(summary.failed_scenes.len(), 1);
    assert_eq!(summary.failed_scenes[0].0, "1999_203");
    assert_eq!(summary.scene_keys, vec!["p026r027/2000_198"]);

    // the failed scene's partial record is gone from the store
    let keys = processor.store().record_keys("p026r027").expect("keys");
    assert_eq!(keys, vec!["p026r027/2000_198"]);

    // aggregation over the surviving sibling proceeds
    let stats = processor
        .aggregate("p026r027", SpectralIndex::Ndvi, None)
        .expect("aggregate");
    assert_eq!(stats.nvals[[0, 0]], 1.0);
    assert_abs_diff_eq!(stats.mean[[0, 0]], 0.6, epsilon = 1e-5);
}

#[test]
fn test_duplicate_acquisition_dates_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    // same footprint and date map to the same record key
    let scenes = vec![
        scene((1999, 7, 22), 300000.0, 5000000.0),
        scene((1999, 7, 22), 300030.0, 4999970.0),
    ];
    let result = processor.process_footprint(&scenes, &[]);
    assert!(matches!(result, Err(ProcError::DataIntegrity(_))));
}

#[test]
fn test_disjoint_scenes_fail_the_footprint() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    let scenes = vec![
        scene((1999, 7, 22), 300000.0, 5000000.0),
        scene((2000, 7, 16), 500000.0, 5000000.0),
    ];
    let result = processor.process_footprint(&scenes, &[]);
    assert!(matches!(result, Err(ProcError::Geometry(_))));
}

#[test]
fn test_missing_landcover_skips_enrichment() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let store = SceneStore::open(tmp.path()).expect("store");
    let processor = FootprintProcessor::new(store);

    // land-cover raster well east of the footprint: alignment fails,
    // the footprint still processes
    let scenes = vec![scene((1999, 7, 22), 300000.0, 5000000.0)];
    let far = {
        let mut r = landcover(1992, 41);
        r.grid = grid(900000.0, 5001000.0, 200);
        r
    };

    let summary = processor.process_footprint(&scenes, &[far]).expect("run");
    assert!(summary.failed_scenes.is_empty());
    assert_eq!(summary.union_pixels, None);
    let record = processor.store().open_record("p026r027/1999_203").expect("record");
    assert!(record.has_dataset("level3/ndvi"));
    assert!(!record.has_dataset("masks/forest/all"));
}
