//! Indel filter for coding markers.
//!
//! Within a run/marker most true variants share the same length modulo 3.
//! Variants off that reading-frame class are likely pseudogenes or
//! sequencing indels.

use crate::data::{ReadCountTable, VariantId, VariantSet};
use crate::error::Result;
use log::debug;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

/// Majority residue of `len mod 3`; ties go to the smaller residue.
fn majority_residue(lengths: &[usize]) -> Option<usize> {
    if lengths.is_empty() {
        return None;
    }
    let mut counts = [0usize; 3];
    for len in lengths {
        counts[len % 3] += 1;
    }
    (0..3).max_by_key(|&residue| (counts[residue], Reverse(residue)))
}

/// Delete variants whose length modulo 3 differs from the run/marker majority.
pub fn filter_indel(table: &ReadCountTable, variants: &VariantSet) -> Result<ReadCountTable> {
    let records = table.records();
    let groups = table.group_alive_by(|r| (r.run_id, r.marker_id));

    let deleted: Vec<Vec<usize>> = groups
        .par_iter()
        .map(|(&(run_id, marker_id), rows)| -> Result<Vec<usize>> {
            let distinct: BTreeSet<VariantId> =
                rows.iter().map(|&idx| records[idx].variant_id).collect();
            let mut lengths = Vec::with_capacity(distinct.len());
            for &variant_id in &distinct {
                lengths.push((variant_id, variants.require(variant_id)?.len()));
            }

            let residue = match majority_residue(
                &lengths.iter().map(|(_, len)| *len).collect::<Vec<_>>(),
            ) {
                Some(r) => r,
                None => return Ok(Vec::new()),
            };
            let off_frame: HashSet<VariantId> = lengths
                .iter()
                .filter(|(_, len)| len % 3 != residue)
                .map(|(id, _)| *id)
                .collect();
            if !off_frame.is_empty() {
                debug!(
                    "Run {} marker {}: {} variants off the majority length residue {}",
                    run_id,
                    marker_id,
                    off_frame.len(),
                    residue
                );
            }

            Ok(rows
                .iter()
                .copied()
                .filter(|&idx| off_frame.contains(&records[idx].variant_id))
                .collect())
        })
        .collect::<Result<_>>()?;

    Ok(table.with_deleted(deleted.into_iter().flatten()))
}
