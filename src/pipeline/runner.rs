//! Pipeline runner for composing and executing filter stages.

use super::params::Params;
use crate::data::{ReadCountTable, VariantSet};
use crate::error::{CleanError, Result};
use crate::filter::{ChimeraBorderline, ChimeraParams, FilterStage, GeneticCode, LfnParams};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Stages to execute, in order.
    pub steps: Vec<FilterStage>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(CleanError::from)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(CleanError::from)
    }
}

/// Row counts before and after one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// 1-based position in the pipeline.
    pub stage: usize,
    pub name: String,
    pub rows: usize,
    pub alive_before: usize,
    pub alive_after: usize,
    pub deleted: usize,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stage {} ({}): {} -> {} alive rows ({} deleted, {} total)",
            self.stage, self.name, self.alive_before, self.alive_after, self.deleted, self.rows
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    /// The given 1-based stage left no alive rows; later stages did not run.
    Exhausted { stage: usize },
}

/// Everything a pipeline run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub name: String,
    pub table: ReadCountTable,
    pub borderline: Vec<ChimeraBorderline>,
    pub reports: Vec<StageReport>,
    pub status: PipelineStatus,
}

impl PipelineOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.status, PipelineStatus::Exhausted { .. })
    }

    /// Stage reports and status as pretty JSON.
    pub fn report_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Report<'a> {
            name: &'a str,
            status: PipelineStatus,
            stages: &'a [StageReport],
        }

        serde_json::to_string_pretty(&Report {
            name: &self.name,
            status: self.status,
            stages: &self.reports,
        })
        .map_err(CleanError::from)
    }
}

/// Builder for constructing and running filter pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<FilterStage>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            stages: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// The standard stage order driven by named parameters.
    ///
    /// LFN, min-replicate, PCR error, chimera, Renkonen, a second
    /// min-replicate pass, then indel and codon stop unless skipped.
    pub fn from_params(params: &Params) -> Result<Self> {
        params.validate()?;

        let mut pipeline = Self::new()
            .name("default")
            .lfn(params.lfn_params())
            .min_replicate_number(params.min_replicate_number)
            .pcr_error(params.pcr_error_var_prop)
            .chimera(params.chimera_params())
            .renkonen(params.renkonen_distance_quantile)
            .min_replicate_number(params.min_replicate_number);
        if !params.skip_filter_indel {
            pipeline = pipeline.indel();
        }
        if !params.skip_filter_codon_stop {
            pipeline = pipeline.codon_stop(params.genetic_code);
        }
        Ok(pipeline)
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Append an arbitrary stage.
    pub fn stage(mut self, stage: FilterStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn lfn(self, params: LfnParams) -> Self {
        self.stage(FilterStage::Lfn(params))
    }

    pub fn min_replicate_number(self, min_replicate_number: usize) -> Self {
        self.stage(FilterStage::MinReplicateNumber {
            min_replicate_number,
        })
    }

    pub fn pcr_error(self, pcr_error_var_prop: f64) -> Self {
        self.stage(FilterStage::PcrError { pcr_error_var_prop })
    }

    pub fn chimera(self, params: ChimeraParams) -> Self {
        self.stage(FilterStage::Chimera(params))
    }

    pub fn renkonen(self, renkonen_distance_quantile: f64) -> Self {
        self.stage(FilterStage::Renkonen {
            renkonen_distance_quantile,
        })
    }

    pub fn indel(self) -> Self {
        self.stage(FilterStage::Indel)
    }

    pub fn codon_stop(self, genetic_code: GeneticCode) -> Self {
        self.stage(FilterStage::CodonStop { genetic_code })
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.stages.clone(),
        }
    }

    /// Run the stages in order on a copy of `table`.
    ///
    /// Stops early, with `PipelineStatus::Exhausted`, after the first stage
    /// that leaves no alive rows.
    pub fn run(&self, table: &ReadCountTable, variants: &VariantSet) -> Result<PipelineOutcome> {
        if table.n_alive() == 0 {
            return Err(CleanError::EmptyData(
                "Read count table has no alive rows".to_string(),
            ));
        }
        if self.stages.iter().any(FilterStage::needs_sequences) {
            for variant_id in table.alive_variant_ids() {
                variants.require(variant_id)?;
            }
        }

        info!(
            "Pipeline '{}': {} stages on {} rows ({} alive)",
            self.name,
            self.stages.len(),
            table.len(),
            table.n_alive()
        );

        let mut current = table.clone();
        let mut borderline = Vec::new();
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut status = PipelineStatus::Completed;

        for (i, stage) in self.stages.iter().enumerate() {
            let alive_before = current.n_alive();
            let output = stage.apply(&current, variants).map_err(|e| {
                CleanError::Pipeline(format!("Stage {} ({}) failed: {}", i + 1, stage.name(), e))
            })?;

            let alive_after = output.table.n_alive();
            let report = StageReport {
                stage: i + 1,
                name: stage.name().to_string(),
                rows: output.table.len(),
                alive_before,
                alive_after,
                deleted: alive_before - alive_after,
            };
            info!("{}", report);
            reports.push(report);

            if let Some(rows) = output.borderline {
                borderline.extend(rows);
            }
            current = output.table;

            if alive_after == 0 {
                warn!(
                    "This filter has deleted all the variants: {}. The analysis will stop here.",
                    stage.name()
                );
                status = PipelineStatus::Exhausted { stage: i + 1 };
                break;
            }
        }

        Ok(PipelineOutcome {
            name: self.name.clone(),
            table: current,
            borderline,
            reports,
            status,
        })
    }
}

/// Run the standard filter sequence with the given parameters.
pub fn run_filters(
    table: &ReadCountTable,
    variants: &VariantSet,
    params: &Params,
) -> Result<PipelineOutcome> {
    Pipeline::from_params(params)?.run(table, variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ReadCountRecord;

    fn create_test_table() -> ReadCountTable {
        ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 500),
            ReadCountRecord::new(1, 1, 1, 2, 1, 450),
            ReadCountRecord::new(1, 1, 1, 1, 2, 300),
            ReadCountRecord::new(1, 1, 1, 2, 2, 320),
            ReadCountRecord::new(1, 1, 1, 1, 3, 200),
        ])
        .unwrap()
    }

    fn create_test_variants() -> VariantSet {
        vec![
            (1, "ACTGGCTTTAACCCGGGAAATTT".to_string()),
            (2, "GGCATTCCAAGTTACGATCAGCT".to_string()),
            (3, "TTTCCAGGAACTTGACCAGTACG".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .name("test")
            .lfn(LfnParams::default())
            .min_replicate_number(2)
            .chimera(ChimeraParams::default())
            .renkonen(0.9)
            .codon_stop(GeneticCode::default());

        let config = pipeline.to_config(Some("Test pipeline"));
        assert_eq!(config.steps.len(), 5);
        assert_eq!(config.name, "test");
    }

    #[test]
    fn test_from_params_order() {
        let names: Vec<&str> = Pipeline::from_params(&Params::default())
            .unwrap()
            .stages()
            .iter()
            .map(FilterStage::name)
            .collect();
        assert_eq!(
            names,
            vec![
                "lfn",
                "min_replicate_number",
                "pcr_error",
                "chimera",
                "renkonen",
                "min_replicate_number",
                "indel",
                "codon_stop"
            ]
        );

        let params = Params {
            skip_filter_indel: true,
            skip_filter_codon_stop: true,
            ..Params::default()
        };
        assert_eq!(Pipeline::from_params(&params).unwrap().stages().len(), 6);
    }

    #[test]
    fn test_pipeline_run_reports() {
        let outcome = Pipeline::new()
            .name("replicates")
            .min_replicate_number(2)
            .run(&create_test_table(), &create_test_variants())
            .unwrap();

        assert_eq!(outcome.status, PipelineStatus::Completed);
        assert_eq!(outcome.reports.len(), 1);
        let report = &outcome.reports[0];
        assert_eq!(report.alive_before, 5);
        assert_eq!(report.alive_after, 4);
        assert_eq!(report.deleted, 1);
        assert!(outcome.table.records()[4].filter_delete);
        assert!(create_test_table().is_monotonic_successor(&outcome.table));
    }

    #[test]
    fn test_pipeline_exhaustion() {
        let outcome = Pipeline::new()
            .min_replicate_number(3)
            .renkonen(0.9)
            .run(&create_test_table(), &create_test_variants())
            .unwrap();

        assert!(outcome.is_exhausted());
        assert_eq!(outcome.status, PipelineStatus::Exhausted { stage: 1 });
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.table.len(), 5);
        assert!(outcome.report_json().unwrap().contains("exhausted"));
    }

    #[test]
    fn test_pipeline_errors() {
        let table = create_test_table();

        // Sequences are checked before any stage runs
        let missing = Pipeline::new()
            .indel()
            .run(&table, &VariantSet::default());
        assert!(matches!(missing, Err(CleanError::MissingSequence(_))));

        let bad_param = Pipeline::new().renkonen(2.0).run(&table, &create_test_variants());
        match bad_param {
            Err(CleanError::Pipeline(msg)) => assert!(msg.starts_with("Stage 1 (renkonen)")),
            other => panic!("expected pipeline error, got {:?}", other),
        }

        let dead = table.with_deleted(0..table.len());
        assert!(matches!(
            Pipeline::new().indel().run(&dead, &create_test_variants()),
            Err(CleanError::EmptyData(_))
        ));
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let pipeline = Pipeline::from_params(&Params::default()).unwrap();
        let config = pipeline.to_config(Some("Default cleaning"));
        let yaml = config.to_yaml().unwrap();

        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(Pipeline::from_config(&parsed).stages().len(), 8);
    }
}
