use crate::types::{MaskGrid, ProcError, ProcResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Element type of a stored dataset. Masks are stored as i8, raw bands
/// as i16, reflectance/index grids as f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    I8,
    I16,
    F32,
}

/// One named dataset inside a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    /// Payload path relative to the record directory
    pub file: String,
}

/// Who/when/what-stage metadata, overwritten in place each time a stage
/// commits to the record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub created: String,
    pub last_updated: String,
    /// Producing stage, e.g. "clip" or "indices"
    pub stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    key: String,
    provenance: Provenance,
    /// Date tags of the stacked grids, present on stack records only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dates: Option<Vec<String>>,
    /// Small scalar metadata (epoch years, thresholds, UTM bounds)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, serde_json::Value>,
    datasets: BTreeMap<String, DatasetInfo>,
}

/// Hierarchical, self-describing store of per-scene and per-footprint
/// records.
///
/// Each record is a directory holding a JSON manifest plus one
/// gzip-compressed little-endian payload per named dataset. Stages
/// overwrite the datasets they recompute (never append) and refresh the
/// record's provenance when they commit.
pub struct SceneStore {
    root: PathBuf,
}

impl SceneStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> ProcResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Create a fresh record, replacing any previous one under the same key
    pub fn create_record(&self, key: &str, stage: &str) -> ProcResult<StoreRecord> {
        let dir = self.record_dir(key);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        let now = chrono::Utc::now().to_rfc3339();
        let manifest = Manifest {
            key: key.to_string(),
            provenance: Provenance {
                created: now.clone(),
                last_updated: now,
                stage: stage.to_string(),
            },
            dates: None,
            attrs: BTreeMap::new(),
            datasets: BTreeMap::new(),
        };
        let record = StoreRecord { dir, manifest };
        record.persist_manifest()?;
        log::debug!("created record {}", key);
        Ok(record)
    }

    /// Remove a record and its payloads; a key that was never created is
    /// not an error
    pub fn remove_record(&self, key: &str) -> ProcResult<()> {
        let dir = self.record_dir(key);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            log::debug!("removed record {}", key);
        }
        Ok(())
    }

    /// Open an existing record
    pub fn open_record(&self, key: &str) -> ProcResult<StoreRecord> {
        let dir = self.record_dir(key);
        let manifest_path = dir.join("manifest.json");
        if !manifest_path.exists() {
            return Err(ProcError::DataIntegrity(format!(
                "record {} has no manifest at {}",
                key,
                manifest_path.display()
            )));
        }
        let manifest: Manifest = serde_json::from_reader(File::open(manifest_path)?)?;
        Ok(StoreRecord { dir, manifest })
    }

    /// Record keys under one footprint, sorted (date tags sort
    /// chronologically)
    pub fn record_keys(&self, footprint: &str) -> ProcResult<Vec<String>> {
        let dir = self.root.join(footprint);
        let mut keys = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.path().join("manifest.json").exists() {
                    keys.push(format!(
                        "{}/{}",
                        footprint,
                        entry.file_name().to_string_lossy()
                    ));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// One open record: a manifest plus its payload directory
pub struct StoreRecord {
    dir: PathBuf,
    manifest: Manifest,
}

impl StoreRecord {
    pub fn key(&self) -> &str {
        &self.manifest.key
    }

    pub fn provenance(&self) -> &Provenance {
        &self.manifest.provenance
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.manifest.datasets.keys().map(|k| k.as_str()).collect()
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.manifest.datasets.contains_key(name)
    }

    /// Date tags of a stack record's cube layers
    pub fn dates(&self) -> Option<&[String]> {
        self.manifest.dates.as_deref()
    }

    pub fn set_dates(&mut self, dates: Vec<String>) -> ProcResult<()> {
        self.manifest.dates = Some(dates);
        self.persist_manifest()
    }

    /// Attach a small scalar metadata value to the record
    pub fn set_attr<V: Serialize>(&mut self, name: &str, value: V) -> ProcResult<()> {
        self.manifest
            .attrs
            .insert(name.to_string(), serde_json::to_value(value)?);
        self.persist_manifest()
    }

    pub fn attr(&self, name: &str) -> Option<&serde_json::Value> {
        self.manifest.attrs.get(name)
    }

    /// Refresh provenance after a stage has written its outputs
    pub fn commit_stage(&mut self, stage: &str) -> ProcResult<()> {
        self.manifest.provenance.last_updated = chrono::Utc::now().to_rfc3339();
        self.manifest.provenance.stage = stage.to_string();
        self.persist_manifest()
    }

    fn persist_manifest(&self) -> ProcResult<()> {
        let file = File::create(self.dir.join("manifest.json"))?;
        serde_json::to_writer_pretty(file, &self.manifest)?;
        Ok(())
    }

    fn write_payload(&self, rel: &str, bytes: &[u8]) -> ProcResult<()> {
        let path = self.dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?;
        Ok(())
    }

    fn read_payload(&self, rel: &str) -> ProcResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(File::open(self.dir.join(rel))?);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn write_dataset(
        &mut self,
        name: &str,
        dtype: Dtype,
        shape: Vec<usize>,
        bytes: &[u8],
    ) -> ProcResult<()> {
        let rel = format!("{}.bin.gz", name);
        self.write_payload(&rel, bytes)?;
        // overwrites any previous entry under the same name
        self.manifest.datasets.insert(
            name.to_string(),
            DatasetInfo {
                dtype,
                shape,
                file: rel,
            },
        );
        self.persist_manifest()
    }

    fn dataset_info(&self, name: &str, expected: Dtype) -> ProcResult<&DatasetInfo> {
        let info = self.manifest.datasets.get(name).ok_or_else(|| {
            ProcError::DataIntegrity(format!(
                "record {} has no dataset '{}'",
                self.manifest.key, name
            ))
        })?;
        if info.dtype != expected {
            return Err(ProcError::DataIntegrity(format!(
                "dataset '{}' is {:?}, expected {:?}",
                name, info.dtype, expected
            )));
        }
        Ok(info)
    }

    /// Store a 0/1 mask at i8 precision
    pub fn write_mask(&mut self, name: &str, mask: &MaskGrid) -> ProcResult<()> {
        let bytes: Vec<u8> = mask.iter().map(|&v| v as i8 as u8).collect();
        self.write_dataset(name, Dtype::I8, vec![mask.nrows(), mask.ncols()], &bytes)
    }

    pub fn read_mask(&self, name: &str) -> ProcResult<MaskGrid> {
        let info = self.dataset_info(name, Dtype::I8)?;
        let shape = grid_shape(info)?;
        let bytes = self.read_payload(&info.file)?;
        check_len(name, bytes.len(), shape.0 * shape.1)?;
        Array2::from_shape_vec(shape, bytes)
            .map_err(|e| ProcError::DataIntegrity(format!("dataset '{}': {}", name, e)))
    }

    /// Store a categorical (land-cover) grid at i8 precision
    pub fn write_classes(&mut self, name: &str, grid: &Array2<i8>) -> ProcResult<()> {
        let bytes: Vec<u8> = grid.iter().map(|&v| v as u8).collect();
        self.write_dataset(name, Dtype::I8, vec![grid.nrows(), grid.ncols()], &bytes)
    }

    pub fn read_classes(&self, name: &str) -> ProcResult<Array2<i8>> {
        let info = self.dataset_info(name, Dtype::I8)?;
        let shape = grid_shape(info)?;
        let bytes = self.read_payload(&info.file)?;
        check_len(name, bytes.len(), shape.0 * shape.1)?;
        let data: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
        Array2::from_shape_vec(shape, data)
            .map_err(|e| ProcError::DataIntegrity(format!("dataset '{}': {}", name, e)))
    }

    /// Store a raw band grid at i16 precision
    pub fn write_band(&mut self, name: &str, grid: &Array2<i16>) -> ProcResult<()> {
        let mut bytes = Vec::with_capacity(grid.len() * 2);
        for &v in grid.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.write_dataset(name, Dtype::I16, vec![grid.nrows(), grid.ncols()], &bytes)
    }

    pub fn read_band(&self, name: &str) -> ProcResult<Array2<i16>> {
        let info = self.dataset_info(name, Dtype::I16)?;
        let shape = grid_shape(info)?;
        let bytes = self.read_payload(&info.file)?;
        check_len(name, bytes.len(), shape.0 * shape.1 * 2)?;
        let data: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Array2::from_shape_vec(shape, data)
            .map_err(|e| ProcError::DataIntegrity(format!("dataset '{}': {}", name, e)))
    }

    /// Store a float grid (reflectance, index, statistics) at f32
    /// precision
    pub fn write_grid(&mut self, name: &str, grid: &Array2<f32>) -> ProcResult<()> {
        let mut bytes = Vec::with_capacity(grid.len() * 4);
        for &v in grid.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.write_dataset(name, Dtype::F32, vec![grid.nrows(), grid.ncols()], &bytes)
    }

    pub fn read_grid(&self, name: &str) -> ProcResult<Array2<f32>> {
        let info = self.dataset_info(name, Dtype::F32)?;
        let shape = grid_shape(info)?;
        let bytes = self.read_payload(&info.file)?;
        check_len(name, bytes.len(), shape.0 * shape.1 * 4)?;
        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Array2::from_shape_vec(shape, data)
            .map_err(|e| ProcError::DataIntegrity(format!("dataset '{}': {}", name, e)))
    }

    /// Store a time cube at f32 precision
    pub fn write_cube(&mut self, name: &str, cube: &Array3<f32>) -> ProcResult<()> {
        let mut bytes = Vec::with_capacity(cube.len() * 4);
        for &v in cube.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let (d, r, c) = cube.dim();
        self.write_dataset(name, Dtype::F32, vec![d, r, c], &bytes)
    }

    pub fn read_cube(&self, name: &str) -> ProcResult<Array3<f32>> {
        let info = self.dataset_info(name, Dtype::F32)?;
        if info.shape.len() != 3 {
            return Err(ProcError::DataIntegrity(format!(
                "dataset '{}' has rank {}, expected 3",
                name,
                info.shape.len()
            )));
        }
        let (d, r, c) = (info.shape[0], info.shape[1], info.shape[2]);
        let bytes = self.read_payload(&info.file)?;
        check_len(name, bytes.len(), d * r * c * 4)?;
        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Array3::from_shape_vec((d, r, c), data)
            .map_err(|e| ProcError::DataIntegrity(format!("dataset '{}': {}", name, e)))
    }
}

fn grid_shape(info: &DatasetInfo) -> ProcResult<(usize, usize)> {
    if info.shape.len() != 2 {
        return Err(ProcError::DataIntegrity(format!(
            "dataset rank {} where a 2-D grid was expected",
            info.shape.len()
        )));
    }
    Ok((info.shape[0], info.shape[1]))
}

fn check_len(name: &str, actual: usize, expected: usize) -> ProcResult<()> {
    if actual != expected {
        return Err(ProcError::DataIntegrity(format!(
            "dataset '{}' payload is {} bytes, expected {}",
            name, actual, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_mask_round_trip_at_i8() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        let mut record = store.create_record("p026r027/1999_203", "clip").unwrap();

        let mask = array![[1u8, 0, 1], [0, 1, 0]];
        record.write_mask("masks/scswmask", &mask).unwrap();

        let reopened = store.open_record("p026r027/1999_203").unwrap();
        assert_eq!(reopened.read_mask("masks/scswmask").unwrap(), mask);
    }

    #[test]
    fn test_grid_round_trip_at_f32() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        let mut record = store.create_record("p026r027/1999_203", "indices").unwrap();

        let grid = array![[0.123f32, -9999.0], [1.0, -0.5]];
        record.write_grid("level3/ndvi", &grid).unwrap();
        let band = array![[1234i16, -9999], [0, 32767]];
        record.write_band("level0/b4_clip", &band).unwrap();

        let reopened = store.open_record("p026r027/1999_203").unwrap();
        assert_eq!(reopened.read_grid("level3/ndvi").unwrap(), grid);
        assert_eq!(reopened.read_band("level0/b4_clip").unwrap(), band);
    }

    #[test]
    fn test_cube_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        let mut record = store.create_record("p026r027/stacks/ndii", "stack").unwrap();

        let cube = Array3::from_shape_fn((2, 3, 4), |(d, r, c)| (d * 12 + r * 4 + c) as f32);
        record.write_cube("ndii_cube", &cube).unwrap();
        record.set_dates(vec!["1999_203".into(), "2000_198".into()]).unwrap();

        let reopened = store.open_record("p026r027/stacks/ndii").unwrap();
        assert_eq!(reopened.read_cube("ndii_cube").unwrap(), cube);
        assert_eq!(reopened.dates().unwrap().len(), 2);
    }

    #[test]
    fn test_overwrite_replaces_dataset_and_refreshes_provenance() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        let mut record = store.create_record("p026r027/1999_203", "clip").unwrap();
        let created = record.provenance().created.clone();

        record.write_mask("masks/nodata", &array![[1u8, 1]]).unwrap();
        record.commit_stage("reflectance").unwrap();
        record.write_mask("masks/nodata", &array![[0u8, 1]]).unwrap();
        record.commit_stage("masks").unwrap();

        let reopened = store.open_record("p026r027/1999_203").unwrap();
        assert_eq!(reopened.read_mask("masks/nodata").unwrap(), array![[0u8, 1]]);
        assert_eq!(reopened.provenance().stage, "masks");
        assert_eq!(reopened.provenance().created, created);
        assert_eq!(reopened.dataset_names().len(), 1);
    }

    #[test]
    fn test_missing_dataset_is_integrity_error() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        let record = store.create_record("p026r027/1999_203", "clip").unwrap();
        assert!(matches!(
            record.read_mask("masks/absent"),
            Err(ProcError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_record_keys_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = SceneStore::open(tmp.path()).unwrap();
        store.create_record("p026r027/2001_150", "clip").unwrap();
        store.create_record("p026r027/1999_203", "clip").unwrap();
        let keys = store.record_keys("p026r027").unwrap();
        assert_eq!(keys, vec!["p026r027/1999_203", "p026r027/2001_150"]);
    }
}
