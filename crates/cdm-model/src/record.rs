use std::sync::Arc;

use crate::error::{ModelError, Result};

/// One reconstructed row of an input file.
///
/// The header is shared between all records of a file. Construction fails
/// unless the value count equals the header arity, so a `RawRecord` always
/// lines up column-for-column with its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    header: Arc<[String]>,
    values: Vec<String>,
}

impl RawRecord {
    pub fn new(header: Arc<[String]>, values: Vec<String>) -> Result<Self> {
        if header.len() != values.len() {
            return Err(ModelError::ArityMismatch {
                expected: header.len(),
                actual: values.len(),
            });
        }
        Ok(Self { header, values })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Case-insensitive lookup of a column value.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .map(|idx| self.values[idx].as_str())
    }

    /// Ordered (column, value) pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn rejects_arity_mismatch() {
        let err = RawRecord::new(header(&["id", "start"]), vec!["a".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let record = RawRecord::new(
            header(&["Id", "PATIENT"]),
            vec!["e1".to_string(), "p1".to_string()],
        )
        .unwrap();
        assert_eq!(record.get("patient"), Some("p1"));
        assert_eq!(record.get("ID"), Some("e1"));
        assert_eq!(record.get("missing"), None);
        let pairs: Vec<_> = record.fields().collect();
        assert_eq!(pairs, vec![("Id", "e1"), ("PATIENT", "p1")]);
    }
}
