//! Persistent storage for per-scene and per-footprint records

pub mod store;

pub use store::{DatasetInfo, Dtype, Provenance, SceneStore, StoreRecord};
