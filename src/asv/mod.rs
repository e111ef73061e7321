//! ASV table data assembled from filtered read counts.

mod table;

pub use table::{build_asv_table, AsvRow, AsvTable, AsvTaxon};
