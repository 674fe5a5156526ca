//! Writing repaired files.

use std::fs::{self, File};
use std::path::Path;

use crate::error::{IngestError, Result};

/// Writes `header` and `rows` as CSV to `path`.
///
/// The data goes to a temp file beside the target first and is renamed
/// into place once synced, so readers never see a half-written file.
/// Returns the number of data rows written.
pub fn write_csv_atomic<R: AsRef<[String]>>(
    path: &Path,
    header: &[String],
    rows: &[R],
) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IngestError::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let temp_path = path.with_extension("csv.tmp");
    let file = File::create(&temp_path).map_err(|e| IngestError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(header)
        .map_err(|e| IngestError::csv(&temp_path, e))?;
    for row in rows {
        writer
            .write_record(row.as_ref())
            .map_err(|e| IngestError::csv(&temp_path, e))?;
    }
    let file = writer.into_inner().map_err(|e| IngestError::FileWrite {
        path: temp_path.clone(),
        source: e.into_error(),
    })?;
    file.sync_all().map_err(|e| IngestError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    fs::rename(&temp_path, path).map_err(|e| IngestError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn writes_quoted_csv_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let header = vec!["CODE".to_string(), "DESCRIPTION".to_string()];
        let rows = vec![vec!["1".to_string(), "a, b".to_string()]];
        assert_eq!(write_csv_atomic(&path, &header, &rows).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "CODE,DESCRIPTION\n1,\"a, b\"\n"
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }
}
