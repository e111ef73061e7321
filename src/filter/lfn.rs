//! Low-frequency noise (LFN) filters.
//!
//! All ratios are computed per (run, marker) over alive rows, with N_ijk the
//! read count of variant i in biosample j and replicate k.

use crate::data::{BiosampleId, ReadCountTable, ReplicateId, VariantId};
use crate::error::{CleanError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the per-variant ratio is normalised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LfnVariantMode {
    /// N_ijk / N_i, where N_i is the variant total in the run/marker.
    Variant { cutoff: f64 },
    /// N_ijk / N_ik, where N_ik is the variant total in replicate k.
    VariantReplicate { cutoff: f64 },
}

/// Thresholds for the LFN filter family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LfnParams {
    pub variant_mode: LfnVariantMode,
    /// Cutoff on N_ijk / N_jk.
    pub biosample_replicate_cutoff: f64,
    /// Minimum absolute read count.
    pub read_count_cutoff: u64,
}

impl Default for LfnParams {
    fn default() -> Self {
        Self {
            variant_mode: LfnVariantMode::Variant { cutoff: 0.001 },
            biosample_replicate_cutoff: 0.001,
            read_count_cutoff: 10,
        }
    }
}

impl LfnParams {
    pub fn validate(&self) -> Result<()> {
        let variant_cutoff = match self.variant_mode {
            LfnVariantMode::Variant { cutoff } | LfnVariantMode::VariantReplicate { cutoff } => {
                cutoff
            }
        };
        for (name, value) in [
            ("lfn variant cutoff", variant_cutoff),
            ("lfn_biosample_replicate_cutoff", self.biosample_replicate_cutoff),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CleanError::InvalidParameter(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[inline]
fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Delete rows that are low-frequency noise.
///
/// A row is deleted when any of the variant ratio, the biosample-replicate
/// ratio or the absolute read count falls below its cutoff.
pub fn filter_lfn(table: &ReadCountTable, params: &LfnParams) -> Result<ReadCountTable> {
    params.validate()?;

    let records = table.records();
    let groups = table.group_alive_by(|r| (r.run_id, r.marker_id));

    let deleted: Vec<usize> = groups
        .par_iter()
        .flat_map_iter(|(_, rows)| {
            let mut n_i: HashMap<VariantId, u64> = HashMap::new();
            let mut n_ik: HashMap<(VariantId, ReplicateId), u64> = HashMap::new();
            let mut n_jk: HashMap<(BiosampleId, ReplicateId), u64> = HashMap::new();
            for &idx in rows {
                let r = &records[idx];
                *n_i.entry(r.variant_id).or_default() += r.read_count;
                *n_ik.entry((r.variant_id, r.replicate_id)).or_default() += r.read_count;
                *n_jk.entry((r.biosample_id, r.replicate_id)).or_default() += r.read_count;
            }

            rows.iter()
                .copied()
                .filter(|&idx| {
                    let r = &records[idx];
                    let variant_noise = match params.variant_mode {
                        LfnVariantMode::Variant { cutoff } => {
                            ratio(r.read_count, n_i[&r.variant_id]) < cutoff
                        }
                        LfnVariantMode::VariantReplicate { cutoff } => {
                            ratio(r.read_count, n_ik[&(r.variant_id, r.replicate_id)]) < cutoff
                        }
                    };
                    let biosample_noise = ratio(r.read_count, n_jk[&(r.biosample_id, r.replicate_id)])
                        < params.biosample_replicate_cutoff;
                    variant_noise || biosample_noise || r.read_count < params.read_count_cutoff
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(table.with_deleted(deleted))
}
