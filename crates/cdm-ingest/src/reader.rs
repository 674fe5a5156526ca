//! Reading source extracts as loosely delimited rows.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use crate::error::{IngestError, Result};

/// One data line as split on the nominal delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based line number where the row starts.
    pub line: u64,
    pub fields: Vec<String>,
}

/// A source file: the trusted header and its data rows of any width.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub header: Vec<String>,
    pub rows: Vec<SourceRow>,
}

/// Trims whitespace and a UTF-8 byte order mark from a header name.
pub fn normalize_header(raw: &str) -> String {
    raw.trim().trim_matches('\u{feff}').trim().to_string()
}

/// Reads a file without enforcing arity, so malformed rows reach the
/// repair engine intact. Blank lines are ignored.
pub fn read_source(path: &Path) -> Result<SourceFile> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| IngestError::csv(path, e))?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record
            .map_err(|e| IngestError::csv(path, e))?
            .iter()
            .map(normalize_header)
            .collect::<Vec<_>>(),
        None => {
            return Err(IngestError::EmptyCsv {
                path: path.to_path_buf(),
            });
        }
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(|e| IngestError::csv(path, e))?;
        let line = record.position().map_or(0, csv::Position::line);
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if fields.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        rows.push(SourceRow { line, fields });
    }

    Ok(SourceFile {
        path: path.to_path_buf(),
        header,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn keeps_rows_of_any_width() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conditions.csv");
        fs::write(&path, "\u{feff}START, STOP ,PATIENT\n2020-01-01,,p1\n2020-01-01p1\n\n").unwrap();
        let source = read_source(&path).unwrap();
        assert_eq!(source.header, vec!["START", "STOP", "PATIENT"]);
        assert_eq!(source.rows.len(), 2);
        assert_eq!(source.rows[0].line, 2);
        assert_eq!(source.rows[1].fields, vec!["2020-01-01p1"]);
    }

    #[test]
    fn quoted_delimiters_stay_inside_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("observations.csv");
        fs::write(&path, "CODE,DESCRIPTION\n8302-2,\"Height, body\"\n").unwrap();
        let source = read_source(&path).unwrap();
        assert_eq!(source.rows[0].fields, vec!["8302-2", "Height, body"]);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patients.csv");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            read_source(&path),
            Err(IngestError::EmptyCsv { .. })
        ));
    }
}
