//! Variant sequences referenced by id from read-count rows.

use super::read_count::VariantId;
use super::tsv::{parse_field, required_column, tsv_reader};
use crate::error::{CleanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A distinct observed DNA sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: VariantId,
    pub sequence: String,
}

/// Lookup from variant id to sequence.
#[derive(Debug, Clone, Default)]
pub struct VariantSet {
    sequences: HashMap<VariantId, String>,
}

impl VariantSet {
    /// Build from variants, rejecting repeated ids.
    pub fn new(variants: Vec<Variant>) -> Result<Self> {
        let mut sequences = HashMap::with_capacity(variants.len());
        for variant in variants {
            if sequences
                .insert(variant.variant_id, variant.sequence.to_ascii_uppercase())
                .is_some()
            {
                return Err(CleanError::Schema(format!(
                    "Duplicate variant id {}",
                    variant.variant_id
                )));
            }
        }
        Ok(Self { sequences })
    }

    /// Load variants from a TSV file with `variant_id` and `sequence` columns.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = tsv_reader(reader);
        let headers = rdr.headers()?.clone();
        let id_col = required_column(&headers, &["variant_id", "id"], "variant")?;
        let seq_col = required_column(&headers, &["sequence"], "variant")?;

        let mut variants = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            let row = idx + 1;
            let sequence = record.get(seq_col).unwrap_or("").to_string();
            if sequence.is_empty() {
                return Err(CleanError::InvalidValue {
                    value: sequence,
                    row,
                    column: "sequence".to_string(),
                });
            }
            variants.push(Variant {
                variant_id: parse_field(&record, id_col, row, "variant_id")?,
                sequence,
            });
        }
        Self::new(variants)
    }

    /// Sequence of a variant, upper-cased.
    pub fn sequence(&self, variant_id: VariantId) -> Option<&str> {
        self.sequences.get(&variant_id).map(String::as_str)
    }

    /// Sequence of a variant, or `MissingSequence`.
    pub fn require(&self, variant_id: VariantId) -> Result<&str> {
        self.sequence(variant_id)
            .ok_or(CleanError::MissingSequence(variant_id))
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Variant ids in ascending order.
    pub fn ids(&self) -> Vec<VariantId> {
        let mut ids: Vec<VariantId> = self.sequences.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<(VariantId, String)> for VariantSet {
    /// Later entries replace earlier ones with the same id.
    fn from_iter<T: IntoIterator<Item = (VariantId, String)>>(iter: T) -> Self {
        Self {
            sequences: iter
                .into_iter()
                .map(|(id, seq)| (id, seq.to_ascii_uppercase()))
                .collect(),
        }
    }
}
