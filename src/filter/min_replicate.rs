//! Minimum replicate number filter.
//!
//! A variant seen in fewer PCR replicates of a biosample than required is
//! not reproducible and is deleted from every replicate of that biosample.

use crate::data::ReadCountTable;
use crate::error::{CleanError, Result};
use rayon::prelude::*;
use std::collections::HashSet;

/// Default minimum number of replicates.
pub const DEFAULT_MIN_REPLICATE_NUMBER: usize = 2;

/// Delete variant/biosample combinations present in too few replicates.
///
/// Alive rows are grouped by (run, marker, variant, biosample) and the
/// distinct replicates with a non-zero read count are counted. Groups below
/// `min_replicate_number` have all their alive rows flagged.
///
/// # Arguments
/// * `table` - Read counts, possibly carrying earlier deletions
/// * `min_replicate_number` - Minimum number of replicates (>= 1)
pub fn filter_min_replicate_number(
    table: &ReadCountTable,
    min_replicate_number: usize,
) -> Result<ReadCountTable> {
    if min_replicate_number < 1 {
        return Err(CleanError::InvalidParameter(
            "min_replicate_number must be at least 1".to_string(),
        ));
    }

    let records = table.records();
    let groups =
        table.group_alive_by(|r| (r.run_id, r.marker_id, r.variant_id, r.biosample_id));

    let deleted: Vec<usize> = groups
        .par_iter()
        .flat_map_iter(|(_, rows)| {
            let replicates: HashSet<_> = rows
                .iter()
                .map(|&i| &records[i])
                .filter(|r| r.read_count > 0)
                .map(|r| r.replicate_id)
                .collect();
            if replicates.len() < min_replicate_number {
                rows.clone()
            } else {
                Vec::new()
            }
        })
        .collect();

    Ok(table.with_deleted(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ReadCountRecord;

    fn create_test_table() -> ReadCountTable {
        ReadCountTable::new(vec![
            // Variant 1 in biosample 1: three replicates
            ReadCountRecord::new(1, 1, 1, 1, 1, 100),
            ReadCountRecord::new(1, 1, 1, 2, 1, 120),
            ReadCountRecord::new(1, 1, 1, 3, 1, 90),
            // Variant 2 in biosample 1: one replicate
            ReadCountRecord::new(1, 1, 1, 1, 2, 40),
            // Variant 2 in biosample 2: two replicates
            ReadCountRecord::new(1, 1, 2, 1, 2, 40),
            ReadCountRecord::new(1, 1, 2, 2, 2, 35),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_replicate_deleted() {
        let table = create_test_table();
        let filtered = filter_min_replicate_number(&table, 2).unwrap();

        let flags: Vec<bool> = filtered.iter().map(|r| r.filter_delete).collect();
        assert_eq!(flags, vec![false, false, false, true, false, false]);
    }

    #[test]
    fn test_threshold_three() {
        let table = create_test_table();
        let filtered = filter_min_replicate_number(&table, 3).unwrap();
        assert_eq!(filtered.n_alive(), 3);
        assert!(filtered.alive().all(|r| r.variant_id == 1));
    }

    #[test]
    fn test_dead_rows_do_not_count() {
        // Replicate 3 of variant 1 already deleted: two replicates remain
        let table = create_test_table().with_deleted([2]);
        let filtered = filter_min_replicate_number(&table, 3).unwrap();
        assert_eq!(filtered.n_alive(), 0);
        assert_eq!(filtered.len(), table.len());
    }

    #[test]
    fn test_invalid_threshold() {
        let table = create_test_table();
        assert!(filter_min_replicate_number(&table, 0).is_err());
    }
}
