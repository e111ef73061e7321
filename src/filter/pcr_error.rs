//! PCR error filter.
//!
//! A rare variant one edit away from a much more abundant variant of the
//! same biosample is most likely a polymerase error of that variant.

use crate::data::{ReadCountTable, VariantId, VariantSet};
use crate::error::{CleanError, Result};
use bio::alignment::distance::levenshtein;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// Default abundance ratio below which a one-edit neighbour is an error.
pub const DEFAULT_PCR_ERROR_VAR_PROP: f64 = 0.1;

/// Delete variants that look like PCR errors of a more abundant variant.
///
/// Works per (run, marker, biosample) with read counts summed over
/// replicates. Variant `b` is deleted when some variant `a` is one edit
/// away and `N_b / N_a < pcr_error_var_prop`.
pub fn filter_pcr_error(
    table: &ReadCountTable,
    variants: &VariantSet,
    pcr_error_var_prop: f64,
) -> Result<ReadCountTable> {
    if !(0.0..=1.0).contains(&pcr_error_var_prop) {
        return Err(CleanError::InvalidParameter(
            "pcr_error_var_prop must be between 0 and 1".to_string(),
        ));
    }

    let records = table.records();
    let groups = table.group_alive_by(|r| (r.run_id, r.marker_id, r.biosample_id));

    let deleted: Vec<Vec<usize>> = groups
        .par_iter()
        .map(|(_, rows)| -> Result<Vec<usize>> {
            let mut n_ij: BTreeMap<VariantId, u64> = BTreeMap::new();
            for &idx in rows {
                *n_ij.entry(records[idx].variant_id).or_default() += records[idx].read_count;
            }

            let mut ranked: Vec<(VariantId, u64, &[u8])> = Vec::with_capacity(n_ij.len());
            for (&variant_id, &count) in &n_ij {
                ranked.push((variant_id, count, variants.require(variant_id)?.as_bytes()));
            }
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

            let mut errors: HashSet<VariantId> = HashSet::new();
            for (i, &(b_id, b_count, b_seq)) in ranked.iter().enumerate() {
                let is_error = ranked[..i].iter().any(|&(_, a_count, a_seq)| {
                    a_count > 0
                        && (b_count as f64 / a_count as f64) < pcr_error_var_prop
                        && a_seq.len().abs_diff(b_seq.len()) <= 1
                        && levenshtein(a_seq, b_seq) == 1
                });
                if is_error {
                    errors.insert(b_id);
                }
            }

            Ok(rows
                .iter()
                .copied()
                .filter(|&idx| errors.contains(&records[idx].variant_id))
                .collect())
        })
        .collect::<Result<_>>()?;

    Ok(table.with_deleted(deleted.into_iter().flatten()))
}
