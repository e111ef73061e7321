//! Similarity-search hits consumed by taxonomic assignment.

use super::read_count::VariantId;
use super::taxonomy::TaxId;
use super::tsv::{parse_field, required_column, tsv_reader};
use crate::error::{CleanError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One alignment of a variant against a reference sequence of known taxon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub variant_id: VariantId,
    pub target_tax_id: TaxId,
    /// Percent identity in [0, 100].
    pub identity_percent: f64,
}

impl SimilarityHit {
    pub fn new(variant_id: VariantId, target_tax_id: TaxId, identity_percent: f64) -> Self {
        Self {
            variant_id,
            target_tax_id,
            identity_percent,
        }
    }
}

/// Load hits from a TSV file with `variant_id`, `target_tax_id` and
/// `identity_percent` columns.
pub fn read_hits_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<SimilarityHit>> {
    let file = File::open(path)?;
    read_hits(BufReader::new(file))
}

pub fn read_hits<R: Read>(reader: R) -> Result<Vec<SimilarityHit>> {
    let mut rdr = tsv_reader(reader);
    let headers = rdr.headers()?.clone();
    let variant_col = required_column(&headers, &["variant_id"], "hit")?;
    let tax_col = required_column(&headers, &["target_tax_id", "tax_id"], "hit")?;
    let identity_col = required_column(&headers, &["identity_percent", "identity"], "hit")?;

    let mut hits = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let row = idx + 1;
        let identity: f64 = parse_field(&record, identity_col, row, "identity_percent")?;
        if !(0.0..=100.0).contains(&identity) {
            return Err(CleanError::InvalidValue {
                value: identity.to_string(),
                row,
                column: "identity_percent".to_string(),
            });
        }
        hits.push(SimilarityHit {
            variant_id: parse_field(&record, variant_col, row, "variant_id")?,
            target_tax_id: parse_field(&record, tax_col, row, "target_tax_id")?,
            identity_percent: identity,
        });
    }
    Ok(hits)
}
