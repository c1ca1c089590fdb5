//! Persistence of the library's path list.
//!
//! The list is a small JSON document (`{"files": [...]}`) in the
//! per-user config directory. Records themselves live in sidecars; the
//! list only pins which files belong to the library and in what order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LibraryError;

const LIST_FILE: &str = "cantata_library.json";
const LEGACY_LIST_FILE: &str = "tagpile_library.json";

pub trait PathStore: Send + Sync {
    fn load(&self) -> Result<Vec<String>, LibraryError>;
    fn save(&self, paths: &[String]) -> Result<(), LibraryError>;
    fn clear(&self) -> Result<(), LibraryError>;
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredList {
    files: Vec<String>,
}

/// JSON path list in the config directory, with a read-only fallback
/// to the file name an earlier release used. Saves always target the
/// current name, which migrates old installs on first write.
pub struct JsonPathStore {
    file: PathBuf,
    legacy: PathBuf,
}

impl JsonPathStore {
    pub fn new() -> Result<Self, LibraryError> {
        let dir = dirs::config_dir().ok_or(LibraryError::NoConfigDir)?;
        Ok(Self::in_dir(dir))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        JsonPathStore {
            file: dir.join(LIST_FILE),
            legacy: dir.join(LEGACY_LIST_FILE),
        }
    }
}

impl PathStore for JsonPathStore {
    fn load(&self) -> Result<Vec<String>, LibraryError> {
        let data = match std::fs::read(&self.file) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                match std::fs::read(&self.legacy) {
                    Ok(data) => {
                        debug!("library list read from legacy {}", self.legacy.display());
                        data
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        return Ok(Vec::new())
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        let list: StoredList = serde_json::from_slice(&data)?;
        Ok(list.files)
    }

    fn save(&self, paths: &[String]) -> Result<(), LibraryError> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list = StoredList {
            files: paths.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&list)?;
        std::fs::write(&self.file, data)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), LibraryError> {
        match std::fs::remove_file(&self.file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
