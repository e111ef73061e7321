//! Amplicon Variant Cleaning Library
//!
//! This library cleans amplicon metabarcoding read counts and assigns the
//! surviving variants to their lowest taxonomic group (LTG).
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (ReadCountTable, VariantSet, Taxonomy, hits)
//! - **filter**: Denoising filters (LFN, min-replicate, PCR error, chimera, Renkonen, indel, codon stop)
//! - **pipeline**: Pipeline composition, named parameters and execution
//! - **taxassign**: LTG consensus from similarity-search hits
//! - **asv**: ASV table data from the cleaned counts
//!
//! Every filter takes a table and returns a new one of the same shape in
//! which more rows carry `filter_delete`. Rows are never removed or revived.
//!
//! # Example
//!
//! ```no_run
//! use ampliclean::prelude::*;
//!
//! // Load data
//! let counts = ReadCountTable::from_tsv("read_counts.tsv").unwrap();
//! let variants = VariantSet::from_tsv("variants.tsv").unwrap();
//!
//! // Run the standard filters
//! let params = Params::default();
//! let outcome = Pipeline::from_params(&params)
//!     .unwrap()
//!     .run(&counts, &variants)
//!     .unwrap();
//!
//! // Assign survivors
//! let taxonomy = Taxonomy::from_tsv("taxonomy.tsv").unwrap();
//! let hits = read_hits_tsv("hits.tsv").unwrap();
//! let ltg = assign_ltg(
//!     &outcome.table.alive_variant_ids(),
//!     &hits,
//!     &taxonomy,
//!     &params.ltg_params(),
//! )
//! .unwrap();
//! ```

pub mod asv;
pub mod data;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod taxassign;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::asv::{build_asv_table, AsvRow, AsvTable, AsvTaxon};
    pub use crate::data::{
        read_hits, read_hits_tsv, BiosampleId, MarkerId, Rank, ReadCountKey, ReadCountRecord,
        ReadCountTable, ReplicateId, RunId, SimilarityHit, TaxId, Taxonomy, TaxonomyNode,
        Variant, VariantId, VariantSet,
    };
    pub use crate::error::{CleanError, Result};
    pub use crate::filter::{
        // Abundance filters
        filter_lfn, filter_min_replicate_number, filter_renkonen, renkonen_distance,
        LfnParams, LfnVariantMode,
        // Sequence filters
        filter_chimera, filter_codon_stop, filter_indel, filter_pcr_error, ChimeraBorderline,
        ChimeraParams, GeneticCode,
        // Stages
        FilterStage, StageOutput,
    };
    pub use crate::pipeline::{
        run_filters, Params, Pipeline, PipelineConfig, PipelineOutcome, PipelineStatus,
        StageReport,
    };
    pub use crate::taxassign::{assign_ltg, LtgAssignment, LtgCall, LtgParams};
}
