//! Data structures for read-count cleaning and taxonomic assignment.

mod hit;
mod read_count;
mod taxonomy;
pub(crate) mod tsv;
mod variant;

pub use hit::{read_hits, read_hits_tsv, SimilarityHit};
pub use read_count::{
    BiosampleId, MarkerId, ReadCountKey, ReadCountRecord, ReadCountTable, ReplicateId, RunId,
    VariantId,
};
pub use taxonomy::{Rank, TaxId, Taxonomy, TaxonomyNode, CONSENSUS_RANKS, LINEAGE_RANKS};
pub use variant::{Variant, VariantSet};
