//! Denoising filters over read-count tables.
//!
//! Every filter takes a table, evaluates only its alive rows and returns a
//! new table of the same shape with extra rows flagged for deletion.

pub mod chimera;
pub mod codon_stop;
pub mod indel;
pub mod lfn;
pub mod min_replicate;
pub mod pcr_error;
pub mod renkonen;
mod stage;

pub use chimera::{
    filter_chimera, score_recombination, ChimeraBorderline, ChimeraCall, ChimeraOutput,
    ChimeraParams, Recombinant,
};
pub use codon_stop::{filter_codon_stop, GeneticCode};
pub use indel::filter_indel;
pub use lfn::{filter_lfn, LfnParams, LfnVariantMode};
pub use min_replicate::{filter_min_replicate_number, DEFAULT_MIN_REPLICATE_NUMBER};
pub use pcr_error::{filter_pcr_error, DEFAULT_PCR_ERROR_VAR_PROP};
pub use renkonen::{
    filter_renkonen, quantile, renkonen_distance, DEFAULT_RENKONEN_DISTANCE_QUANTILE,
};
pub use stage::{FilterStage, StageOutput};
