//! Locating `<entity>.csv` extracts in the input directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use cdm_model::SourceEntity;

use crate::error::{IngestError, Result};

/// Lists all CSV files in a directory.
///
/// Returns files sorted by filename.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::DirectoryRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Source files found for one run.
#[derive(Debug, Clone, Default)]
pub struct InputInventory {
    pub dir: PathBuf,
    pub files: BTreeMap<SourceEntity, PathBuf>,
    /// Optional entities without a file; staged as empty tables.
    pub missing: Vec<SourceEntity>,
}

impl InputInventory {
    pub fn path(&self, entity: SourceEntity) -> Option<&Path> {
        self.files.get(&entity).map(PathBuf::as_path)
    }
}

/// Maps every known entity to its file in `dir`, matching names
/// case-insensitively.
///
/// A missing required entity is a precondition failure; missing optional
/// entities are listed in [`InputInventory::missing`].
pub fn discover_inputs(dir: &Path) -> Result<InputInventory> {
    let mut files = BTreeMap::new();
    for path in list_csv_files(dir)? {
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match SourceEntity::from_str(stem) {
            Ok(entity) => {
                debug!(%entity, path = %path.display(), "discovered input");
                files.insert(entity, path);
            }
            Err(_) => debug!(path = %path.display(), "ignoring unrelated csv"),
        }
    }

    let mut missing = Vec::new();
    for entity in SourceEntity::ALL {
        if files.contains_key(&entity) {
            continue;
        }
        if entity.is_required() {
            return Err(IngestError::MissingRequiredFile {
                entity,
                dir: dir.to_path_buf(),
            });
        }
        warn!(%entity, "optional input missing, staging an empty table");
        missing.push(entity);
    }

    Ok(InputInventory {
        dir: dir.to_path_buf(),
        files,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn discovers_known_entities_case_insensitively() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Patients.CSV"), "Id\n").unwrap();
        fs::write(dir.path().join("encounters.csv"), "Id\n").unwrap();
        fs::write(dir.path().join("careplans.csv"), "Id\n").unwrap();
        fs::create_dir(dir.path().join("processed")).unwrap();

        let inventory = discover_inputs(dir.path()).unwrap();
        assert_eq!(inventory.files.len(), 2);
        assert!(inventory.path(SourceEntity::Patients).is_some());
        assert_eq!(inventory.missing.len(), 6);
        assert!(!inventory.missing.contains(&SourceEntity::Encounters));
    }

    #[test]
    fn missing_required_file_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("patients.csv"), "Id\n").unwrap();
        let err = discover_inputs(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingRequiredFile {
                entity: SourceEntity::Encounters,
                ..
            }
        ));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempdir().unwrap();
        let err = discover_inputs(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, IngestError::DirectoryNotFound { .. }));
    }
}
