//! Polymorphic filter stage used by the pipeline.

use super::chimera::{filter_chimera, ChimeraBorderline, ChimeraParams};
use super::codon_stop::{filter_codon_stop, GeneticCode};
use super::indel::filter_indel;
use super::lfn::{filter_lfn, LfnParams};
use super::min_replicate::filter_min_replicate_number;
use super::pcr_error::filter_pcr_error;
use super::renkonen::filter_renkonen;
use crate::data::{ReadCountTable, VariantSet};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One denoising rule together with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterStage {
    /// Low-frequency noise.
    Lfn(LfnParams),
    /// Variants seen in too few replicates of a biosample.
    MinReplicateNumber { min_replicate_number: usize },
    /// One-edit neighbours of much more abundant variants.
    PcrError { pcr_error_var_prop: f64 },
    /// De-novo chimeras.
    Chimera(ChimeraParams),
    /// Outlier replicates by Renkonen distance.
    Renkonen { renkonen_distance_quantile: f64 },
    /// Variants off the majority length modulo 3.
    Indel,
    /// Variants with a stop codon in every frame.
    CodonStop { genetic_code: GeneticCode },
}

/// Table produced by a stage, plus the chimera borderline table if any.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub table: ReadCountTable,
    pub borderline: Option<Vec<ChimeraBorderline>>,
}

impl From<ReadCountTable> for StageOutput {
    fn from(table: ReadCountTable) -> Self {
        Self {
            table,
            borderline: None,
        }
    }
}

impl FilterStage {
    pub fn name(&self) -> &'static str {
        match self {
            FilterStage::Lfn(_) => "lfn",
            FilterStage::MinReplicateNumber { .. } => "min_replicate_number",
            FilterStage::PcrError { .. } => "pcr_error",
            FilterStage::Chimera(_) => "chimera",
            FilterStage::Renkonen { .. } => "renkonen",
            FilterStage::Indel => "indel",
            FilterStage::CodonStop { .. } => "codon_stop",
        }
    }

    /// Whether the stage reads variant sequences.
    pub fn needs_sequences(&self) -> bool {
        matches!(
            self,
            FilterStage::PcrError { .. }
                | FilterStage::Chimera(_)
                | FilterStage::Indel
                | FilterStage::CodonStop { .. }
        )
    }

    /// Run the stage on the alive rows of `table`.
    pub fn apply(&self, table: &ReadCountTable, variants: &VariantSet) -> Result<StageOutput> {
        let output = match self {
            FilterStage::Lfn(params) => filter_lfn(table, params)?.into(),
            FilterStage::MinReplicateNumber {
                min_replicate_number,
            } => filter_min_replicate_number(table, *min_replicate_number)?.into(),
            FilterStage::PcrError { pcr_error_var_prop } => {
                filter_pcr_error(table, variants, *pcr_error_var_prop)?.into()
            }
            FilterStage::Chimera(params) => {
                let chimera = filter_chimera(table, variants, params)?;
                StageOutput {
                    table: chimera.table,
                    borderline: Some(chimera.borderline),
                }
            }
            FilterStage::Renkonen {
                renkonen_distance_quantile,
            } => filter_renkonen(table, *renkonen_distance_quantile)?.into(),
            FilterStage::Indel => filter_indel(table, variants)?.into(),
            FilterStage::CodonStop { genetic_code } => {
                filter_codon_stop(table, variants, *genetic_code)?.into()
            }
        };
        Ok(output)
    }
}
