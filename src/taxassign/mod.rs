//! Taxonomic assignment of variants from similarity-search hits.

mod ltg;

pub use ltg::{assign_ltg, consensus, LtgAssignment, LtgCall, LtgParams, DEFAULT_IDENTITY_LEVELS};
