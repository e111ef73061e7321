//! Read-count table shared by every filter stage.
//!
//! Each row is one observation of a variant in a PCR replicate of a biosample,
//! sequenced in a given run for a given marker. Filters never drop rows: they
//! flag them with `filter_delete`, and a flagged row stays flagged.

use super::tsv::{optional_column, parse_field, parse_flag, required_column, tsv_reader};
use crate::error::{CleanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub type RunId = u32;
pub type MarkerId = u32;
pub type BiosampleId = u32;
pub type ReplicateId = u32;
pub type VariantId = u32;

/// Primary key of a read-count observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReadCountKey {
    pub run_id: RunId,
    pub marker_id: MarkerId,
    pub biosample_id: BiosampleId,
    pub replicate_id: ReplicateId,
    pub variant_id: VariantId,
}

/// One observation with its filter decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCountRecord {
    pub run_id: RunId,
    pub marker_id: MarkerId,
    pub biosample_id: BiosampleId,
    pub replicate_id: ReplicateId,
    pub variant_id: VariantId,
    pub read_count: u64,
    pub filter_delete: bool,
    /// Set by the chimera stage on the rows it evaluated.
    pub chimera_borderline: Option<bool>,
}

impl ReadCountRecord {
    /// Create an alive record without annotations.
    pub fn new(
        run_id: RunId,
        marker_id: MarkerId,
        biosample_id: BiosampleId,
        replicate_id: ReplicateId,
        variant_id: VariantId,
        read_count: u64,
    ) -> Self {
        Self {
            run_id,
            marker_id,
            biosample_id,
            replicate_id,
            variant_id,
            read_count,
            filter_delete: false,
            chimera_borderline: None,
        }
    }

    #[inline]
    pub fn key(&self) -> ReadCountKey {
        ReadCountKey {
            run_id: self.run_id,
            marker_id: self.marker_id,
            biosample_id: self.biosample_id,
            replicate_id: self.replicate_id,
            variant_id: self.variant_id,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.filter_delete
    }
}

const READ_COUNT_TABLE: &str = "read count";

/// Table of read-count observations in ingestion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCountTable {
    records: Vec<ReadCountRecord>,
}

impl ReadCountTable {
    /// Create a table, rejecting duplicate primary keys.
    pub fn new(records: Vec<ReadCountRecord>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.key()) {
                return Err(CleanError::Schema(format!(
                    "Duplicate read count key {:?}",
                    record.key()
                )));
            }
        }
        Ok(Self { records })
    }

    /// Load a table from a TSV file.
    ///
    /// Mandatory columns: `run_id`, `marker_id`, `biosample_id`, `replicate_id`
    /// (or `replicate`), `variant_id`, `read_count`. An optional `filter_delete`
    /// column carries flags from an earlier run.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a table from any TSV reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = tsv_reader(reader);
        let headers = rdr.headers()?.clone();

        let run_col = required_column(&headers, &["run_id"], READ_COUNT_TABLE)?;
        let marker_col = required_column(&headers, &["marker_id"], READ_COUNT_TABLE)?;
        let biosample_col = required_column(&headers, &["biosample_id"], READ_COUNT_TABLE)?;
        let replicate_col =
            required_column(&headers, &["replicate_id", "replicate"], READ_COUNT_TABLE)?;
        let variant_col = required_column(&headers, &["variant_id"], READ_COUNT_TABLE)?;
        let count_col = required_column(&headers, &["read_count"], READ_COUNT_TABLE)?;
        let delete_col = optional_column(&headers, &["filter_delete"]);

        let mut records = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            let row = idx + 1;
            let mut rc = ReadCountRecord::new(
                parse_field(&record, run_col, row, "run_id")?,
                parse_field(&record, marker_col, row, "marker_id")?,
                parse_field(&record, biosample_col, row, "biosample_id")?,
                parse_field(&record, replicate_col, row, "replicate_id")?,
                parse_field(&record, variant_col, row, "variant_id")?,
                parse_field(&record, count_col, row, "read_count")?,
            );
            if let Some(col) = delete_col {
                rc.filter_delete = parse_flag(&record, col, row, "filter_delete")?;
            }
            records.push(rc);
        }

        Self::new(records)
    }

    /// Write the table, flags included, to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_tsv(BufWriter::new(file))
    }

    /// Write the table to any writer.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(
            writer,
            "run_id\tmarker_id\tbiosample_id\treplicate_id\tvariant_id\tread_count\tfilter_delete\tchimera_borderline"
        )?;
        for r in &self.records {
            let borderline = match r.chimera_borderline {
                Some(true) => "1",
                Some(false) => "0",
                None => "",
            };
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.run_id,
                r.marker_id,
                r.biosample_id,
                r.replicate_id,
                r.variant_id,
                r.read_count,
                u8::from(r.filter_delete),
                borderline
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    #[inline]
    pub fn records(&self) -> &[ReadCountRecord] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadCountRecord> + '_ {
        self.records.iter()
    }

    /// Rows not yet deleted.
    pub fn alive(&self) -> impl Iterator<Item = &ReadCountRecord> + '_ {
        self.records.iter().filter(|r| r.is_alive())
    }

    pub fn n_alive(&self) -> usize {
        self.alive().count()
    }

    pub fn n_deleted(&self) -> usize {
        self.records.len() - self.n_alive()
    }

    /// Distinct variant ids among alive rows.
    pub fn alive_variant_ids(&self) -> Vec<VariantId> {
        let mut ids: Vec<VariantId> = self.alive().map(|r| r.variant_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Group the indices of alive rows under a composite key.
    ///
    /// Indices within a group keep table order; groups are ordered by key.
    pub fn group_alive_by<K, F>(&self, key: F) -> BTreeMap<K, Vec<usize>>
    where
        K: Ord,
        F: Fn(&ReadCountRecord) -> K,
    {
        let mut groups: BTreeMap<K, Vec<usize>> = BTreeMap::new();
        for (idx, record) in self.records.iter().enumerate() {
            if record.is_alive() {
                groups.entry(key(record)).or_default().push(idx);
            }
        }
        groups
    }

    /// Return a copy with the given rows flagged for deletion.
    ///
    /// Rows already deleted stay deleted; indices out of range are ignored.
    pub fn with_deleted<I>(&self, indices: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut records = self.records.clone();
        for idx in indices {
            if let Some(record) = records.get_mut(idx) {
                record.filter_delete = true;
            }
        }
        Self { records }
    }

    /// Mutable access for stages that annotate rows in a fresh copy.
    pub(crate) fn records_mut(&mut self) -> &mut [ReadCountRecord] {
        &mut self.records
    }

    /// Check that `other` has the same keys in the same order and never revives a row.
    pub fn is_monotonic_successor(&self, other: &ReadCountTable) -> bool {
        self.records.len() == other.records.len()
            && self
                .records
                .iter()
                .zip(other.records.iter())
                .all(|(a, b)| a.key() == b.key() && (!a.filter_delete || b.filter_delete))
    }
}
