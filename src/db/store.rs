//! File-backed JSON document store for the `devices` and `floors` collections.
//!
//! Each call reads the whole document, and writes rewrite it wholesale. A missing (or blank)
//! file loads as the empty document. The device read-modify-write in [`DocumentStore::update_device`]
//! is serialized by an in-process lock; writers in other processes still race (last save wins).

use crate::models::map::{Device, DeviceDocument, FloorDocument};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const DEVICES_FILE: &str = "devices.json";
pub const FLOORS_FILE: &str = "floors.json";

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: std::io::Error },
    Parse {
        path: PathBuf,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    Encode { path: PathBuf, source: serde_json::Error },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            StoreError::Parse { path, source } => {
                write!(f, "{}: invalid JSON at `{}`: {}", path.display(), source.path(), source.inner())
            }
            StoreError::Encode { path, source } => {
                write!(f, "{}: failed to encode document: {}", path.display(), source)
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Parse { source, .. } => Some(source.inner()),
            StoreError::Encode { source, .. } => Some(source),
        }
    }
}

/// Resolved locations of the two documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub devices: PathBuf,
    pub floors: PathBuf,
}

impl StorePaths {
    /// Device override is honored only when the path exists; floors always live in `data_dir`.
    pub fn resolve(data_dir: &Path, devices_override: Option<&Path>) -> Self {
        let default_devices = data_dir.join(DEVICES_FILE);
        let devices = match devices_override {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(path) => {
                warn!(
                    "Device file override {} does not exist; using {}",
                    path.display(),
                    default_devices.display()
                );
                default_devices
            }
            None => default_devices,
        };
        StorePaths {
            devices,
            floors: data_dir.join(FLOORS_FILE),
        }
    }
}

#[derive(Debug)]
pub struct DocumentStore {
    paths: StorePaths,
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(paths: StorePaths) -> Self {
        DocumentStore {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn load_devices(&self) -> Result<DeviceDocument, StoreError> {
        read_document(&self.paths.devices)
    }

    pub fn load_floors(&self) -> Result<FloorDocument, StoreError> {
        read_document(&self.paths.floors)
    }

    pub fn save_devices(&self, doc: &DeviceDocument) -> Result<(), StoreError> {
        write_document(&self.paths.devices, doc)
    }

    /// Load, mutate the first device whose `id` equals `id`, save, then run `on_saved`.
    ///
    /// `on_saved` runs before the write lock is released, so anything it publishes is ordered
    /// the same way as the writes. Returns `Ok(None)` without writing when no device matches.
    pub fn update_device<F, G>(&self, id: &str, mutate: F, on_saved: G) -> Result<Option<Device>, StoreError>
    where
        F: FnOnce(&mut Device),
        G: FnOnce(&Device),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load_devices()?;
        let Some(device) = doc.devices.iter_mut().find(|d| d.has_id(id)) else {
            return Ok(None);
        };
        mutate(device);
        let updated = device.clone();
        self.save_devices(&doc)?;
        on_saved(&updated);
        Ok(Some(updated))
    }
}

fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found; using empty document", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    let de = &mut serde_json::Deserializer::from_str(&text);
    serde_path_to_error::deserialize(de).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let body = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, body).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
