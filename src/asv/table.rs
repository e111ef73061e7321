//! Amplicon sequence variant (ASV) table.
//!
//! One row per (run, marker, variant) surviving the filters, with read
//! counts summed over replicates for every biosample of the input.

use crate::data::{
    BiosampleId, MarkerId, Rank, ReadCountTable, RunId, TaxId, Taxonomy, VariantId, VariantSet,
    LINEAGE_RANKS,
};
use crate::error::Result;
use crate::filter::ChimeraBorderline;
use crate::taxassign::LtgAssignment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// LTG call of a variant with names resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsvTaxon {
    pub ltg_tax_id: Option<TaxId>,
    pub ltg_tax_name: Option<String>,
    pub ltg_rank: Option<Rank>,
    pub identity: Option<f64>,
    pub blast_db: Option<String>,
    /// Names along the LTG lineage, phylum to species.
    pub lineage: BTreeMap<Rank, String>,
}

impl AsvTaxon {
    fn from_assignment(assignment: &LtgAssignment, taxonomy: &Taxonomy) -> Self {
        let ltg_tax_id = assignment.ltg_tax_id();
        let lineage = ltg_tax_id
            .and_then(|id| taxonomy.ranked_lineage(id))
            .map(|ranked| {
                ranked
                    .into_iter()
                    .filter(|(rank, _)| LINEAGE_RANKS.contains(rank))
                    .filter_map(|(rank, id)| taxonomy.name(id).map(|n| (rank, n.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            ltg_tax_id,
            ltg_tax_name: ltg_tax_id.and_then(|id| taxonomy.name(id)).map(String::from),
            ltg_rank: assignment.ltg_rank(),
            identity: assignment.identity,
            blast_db: assignment.blast_db.clone(),
            lineage,
        }
    }

    /// Lineage name at a rank, if the LTG reaches it.
    pub fn lineage_name(&self, rank: Rank) -> Option<&str> {
        self.lineage.get(&rank).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsvRow {
    pub run_id: RunId,
    pub marker_id: MarkerId,
    pub variant_id: VariantId,
    pub sequence: String,
    pub sequence_length: usize,
    /// Total over all biosamples.
    pub read_count: u64,
    /// N_ij for every biosample of the input table, zero when absent.
    pub biosample_counts: BTreeMap<BiosampleId, u64>,
    pub chimera_borderline: Option<bool>,
    pub taxon: Option<AsvTaxon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsvTable {
    pub biosamples: Vec<BiosampleId>,
    pub rows: Vec<AsvRow>,
}

impl AsvTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, run_id: RunId, marker_id: MarkerId, variant_id: VariantId) -> Option<&AsvRow> {
        self.rows
            .iter()
            .find(|r| r.run_id == run_id && r.marker_id == marker_id && r.variant_id == variant_id)
    }
}

/// Build the ASV table from the alive rows of a filtered table.
///
/// The borderline flag comes from the chimera borderline table, falling
/// back to the row annotations. Taxa are attached when a taxonomy and LTG
/// assignments are given.
pub fn build_asv_table(
    table: &ReadCountTable,
    variants: &VariantSet,
    borderline: &[ChimeraBorderline],
    assignments: Option<(&Taxonomy, &[LtgAssignment])>,
) -> Result<AsvTable> {
    let biosamples: Vec<BiosampleId> = table
        .iter()
        .map(|r| r.biosample_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let borderline: HashMap<(RunId, MarkerId, VariantId), bool> = borderline
        .iter()
        .map(|b| ((b.run_id, b.marker_id, b.variant_id), b.borderline))
        .collect();
    let taxa: HashMap<VariantId, AsvTaxon> = assignments
        .map(|(taxonomy, assignments)| {
            assignments
                .iter()
                .map(|a| (a.variant_id, AsvTaxon::from_assignment(a, taxonomy)))
                .collect()
        })
        .unwrap_or_default();

    let records = table.records();
    let groups = table.group_alive_by(|r| (r.run_id, r.marker_id, r.variant_id));

    let mut rows = Vec::with_capacity(groups.len());
    for ((run_id, marker_id, variant_id), idx) in groups {
        let sequence = variants.require(variant_id)?.to_string();

        let mut biosample_counts: BTreeMap<BiosampleId, u64> =
            biosamples.iter().map(|&b| (b, 0)).collect();
        let mut row_flag: Option<bool> = None;
        for &i in &idx {
            let r = &records[i];
            *biosample_counts.entry(r.biosample_id).or_default() += r.read_count;
            if let Some(flag) = r.chimera_borderline {
                row_flag = Some(row_flag.unwrap_or(false) || flag);
            }
        }

        rows.push(AsvRow {
            run_id,
            marker_id,
            variant_id,
            sequence_length: sequence.len(),
            sequence,
            read_count: biosample_counts.values().sum(),
            biosample_counts,
            chimera_borderline: borderline
                .get(&(run_id, marker_id, variant_id))
                .copied()
                .or(row_flag),
            taxon: taxa.get(&variant_id).cloned(),
        });
    }

    Ok(AsvTable { biosamples, rows })
}
