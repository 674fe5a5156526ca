//! Aggregated view of codes that found no standard concept.

use std::collections::BTreeMap;

use serde::Serialize;

use cdm_model::{ConceptDomain, ConceptMapping};

/// Mapping coverage for one (vocabulary, domain) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    pub vocabulary: String,
    pub domain: ConceptDomain,
    pub total: u64,
    pub unmapped: u64,
    /// Share of unmapped rows, 0 to 100.
    pub unmapped_percent: f64,
}

/// Mapped / unmapped counts keyed by (vocabulary, domain).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmappedReport {
    counts: BTreeMap<(String, ConceptDomain), (u64, u64)>,
}

impl UnmappedReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mapping: &ConceptMapping) {
        self.add(
            &mapping.source_vocabulary,
            mapping.domain,
            1,
            u64::from(!mapping.is_mapped()),
        );
    }

    /// Adds pre-aggregated counts, e.g. from a table scan.
    pub fn add(&mut self, vocabulary: &str, domain: ConceptDomain, total: u64, unmapped: u64) {
        let entry = self
            .counts
            .entry((vocabulary.to_string(), domain))
            .or_default();
        entry.0 += total;
        entry.1 += unmapped;
    }

    pub fn merge(&mut self, other: &UnmappedReport) {
        for ((vocabulary, domain), (total, unmapped)) in &other.counts {
            self.add(vocabulary, *domain, *total, *unmapped);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_unmapped(&self) -> u64 {
        self.counts.values().map(|(_, unmapped)| unmapped).sum()
    }

    pub fn entries(&self) -> Vec<CoverageEntry> {
        self.counts
            .iter()
            .map(|((vocabulary, domain), &(total, unmapped))| CoverageEntry {
                vocabulary: vocabulary.clone(),
                domain: *domain,
                total,
                unmapped,
                unmapped_percent: percent(unmapped, total),
            })
            .collect()
    }
}

impl Serialize for UnmappedReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries().serialize(serializer)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / total as f64).round() / 100.0
}
