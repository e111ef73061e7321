//! Named parameters shared by the filters and the LTG resolver.

use crate::error::{CleanError, Result};
use crate::filter::{
    ChimeraParams, GeneticCode, LfnParams, LfnVariantMode, DEFAULT_MIN_REPLICATE_NUMBER,
    DEFAULT_PCR_ERROR_VAR_PROP, DEFAULT_RENKONEN_DISTANCE_QUANTILE,
};
use crate::taxassign::LtgParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Flat parameter set, usually read from a YAML file.
///
/// Missing keys take their defaults; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    pub lfn_variant_cutoff: f64,
    /// When set, N_ijk / N_ik replaces the N_ijk / N_i ratio.
    pub lfn_variant_replicate_cutoff: Option<f64>,
    pub lfn_biosample_replicate_cutoff: f64,
    pub lfn_read_count_cutoff: u64,
    pub min_replicate_number: usize,
    pub pcr_error_var_prop: f64,
    pub uchime3_denovo_abskew: f64,
    pub renkonen_distance_quantile: f64,
    pub genetic_code: GeneticCode,
    pub skip_filter_indel: bool,
    pub skip_filter_codon_stop: bool,
    pub ltg_rule_threshold: f64,
    pub include_prop: f64,
    pub min_number_of_taxa: usize,
    pub blast_db: Option<String>,
}

impl Default for Params {
    fn default() -> Self {
        let lfn = LfnParams::default();
        let ltg = LtgParams::default();
        let lfn_variant_cutoff = match lfn.variant_mode {
            LfnVariantMode::Variant { cutoff } | LfnVariantMode::VariantReplicate { cutoff } => {
                cutoff
            }
        };
        Self {
            lfn_variant_cutoff,
            lfn_variant_replicate_cutoff: None,
            lfn_biosample_replicate_cutoff: lfn.biosample_replicate_cutoff,
            lfn_read_count_cutoff: lfn.read_count_cutoff,
            min_replicate_number: DEFAULT_MIN_REPLICATE_NUMBER,
            pcr_error_var_prop: DEFAULT_PCR_ERROR_VAR_PROP,
            uchime3_denovo_abskew: ChimeraParams::default().uchime3_denovo_abskew,
            renkonen_distance_quantile: DEFAULT_RENKONEN_DISTANCE_QUANTILE,
            genetic_code: GeneticCode::default(),
            skip_filter_indel: false,
            skip_filter_codon_stop: false,
            ltg_rule_threshold: ltg.ltg_rule_threshold,
            include_prop: ltg.include_prop,
            min_number_of_taxa: ltg.min_number_of_taxa,
            blast_db: None,
        }
    }
}

impl Params {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let params: Params = serde_yaml::from_str(yaml)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(CleanError::from)
    }

    pub fn lfn_params(&self) -> LfnParams {
        let variant_mode = match self.lfn_variant_replicate_cutoff {
            Some(cutoff) => LfnVariantMode::VariantReplicate { cutoff },
            None => LfnVariantMode::Variant {
                cutoff: self.lfn_variant_cutoff,
            },
        };
        LfnParams {
            variant_mode,
            biosample_replicate_cutoff: self.lfn_biosample_replicate_cutoff,
            read_count_cutoff: self.lfn_read_count_cutoff,
        }
    }

    pub fn chimera_params(&self) -> ChimeraParams {
        ChimeraParams::with_abskew(self.uchime3_denovo_abskew)
    }

    pub fn ltg_params(&self) -> LtgParams {
        LtgParams {
            ltg_rule_threshold: self.ltg_rule_threshold,
            include_prop: self.include_prop,
            min_number_of_taxa: self.min_number_of_taxa,
            blast_db: self.blast_db.clone(),
            ..LtgParams::default()
        }
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<()> {
        self.lfn_params().validate()?;
        self.chimera_params().validate()?;
        self.ltg_params().validate()?;
        if self.min_replicate_number < 1 {
            return Err(CleanError::InvalidParameter(
                "min_replicate_number must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pcr_error_var_prop) {
            return Err(CleanError::InvalidParameter(format!(
                "pcr_error_var_prop must be between 0 and 1, got {}",
                self.pcr_error_var_prop
            )));
        }
        if !(self.renkonen_distance_quantile > 0.0 && self.renkonen_distance_quantile < 1.0) {
            return Err(CleanError::InvalidParameter(format!(
                "renkonen_distance_quantile must be in (0, 1), got {}",
                self.renkonen_distance_quantile
            )));
        }
        Ok(())
    }
}
