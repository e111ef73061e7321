//! Renkonen distance filter for non-reproducible replicates.
//!
//! Replicates of one biosample should share a composition. A replicate
//! whose mean Renkonen distance to its siblings sits above the configured
//! quantile of all replicate scores in the run/marker is deleted entirely.

use crate::data::{BiosampleId, ReadCountTable, ReplicateId, VariantId};
use crate::error::{CleanError, Result};
use log::debug;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Default quantile of replicate scores above which a replicate is dropped.
pub const DEFAULT_RENKONEN_DISTANCE_QUANTILE: f64 = 0.9;

/// Renkonen distance between two read-count profiles.
///
/// `1 - sum_v min(p1(v), p2(v))` over frequencies. Two empty profiles are at
/// distance 0, an empty and a non-empty profile at distance 1.
pub fn renkonen_distance(a: &HashMap<VariantId, u64>, b: &HashMap<VariantId, u64>) -> f64 {
    let total_a: u64 = a.values().sum();
    let total_b: u64 = b.values().sum();
    match (total_a, total_b) {
        (0, 0) => return 0.0,
        (0, _) | (_, 0) => return 1.0,
        _ => {}
    }

    let shared: f64 = a
        .iter()
        .filter_map(|(variant, &count_a)| {
            b.get(variant).map(|&count_b| {
                (count_a as f64 / total_a as f64).min(count_b as f64 / total_b as f64)
            })
        })
        .sum();

    (1.0 - shared).clamp(0.0, 1.0)
}

/// Linearly interpolated quantile of sorted values (Hyndman & Fan type 7).
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

type SampleKey = (BiosampleId, ReplicateId);

struct ReplicateProfile {
    counts: HashMap<VariantId, u64>,
    rows: Vec<usize>,
}

impl ReplicateProfile {
    fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Score each replicate by its mean distance to the other replicates of its biosample.
fn score_replicates(profiles: &BTreeMap<SampleKey, ReplicateProfile>) -> Vec<(SampleKey, f64)> {
    let mut by_biosample: BTreeMap<BiosampleId, Vec<&SampleKey>> = BTreeMap::new();
    for (key, profile) in profiles {
        if profile.total() > 0 {
            by_biosample.entry(key.0).or_default().push(key);
        }
    }

    let mut scores = Vec::new();
    for (biosample, replicates) in by_biosample {
        if replicates.len() < 2 {
            debug!(
                "Biosample {} has a single non-empty replicate, no Renkonen score",
                biosample
            );
            continue;
        }
        for &key in &replicates {
            let distances: f64 = replicates
                .iter()
                .filter(|&&other| other != key)
                .map(|&other| renkonen_distance(&profiles[key].counts, &profiles[other].counts))
                .sum();
            scores.push((*key, distances / (replicates.len() - 1) as f64));
        }
    }
    scores
}

/// Delete replicates whose composition is an outlier within their run/marker.
///
/// Every alive row of a (biosample, replicate) whose score exceeds the
/// `renkonen_distance_quantile` of all scores in the group is deleted.
pub fn filter_renkonen(
    table: &ReadCountTable,
    renkonen_distance_quantile: f64,
) -> Result<ReadCountTable> {
    if !(renkonen_distance_quantile > 0.0 && renkonen_distance_quantile < 1.0) {
        return Err(CleanError::InvalidParameter(format!(
            "renkonen_distance_quantile must be in (0, 1), got {}",
            renkonen_distance_quantile
        )));
    }

    let records = table.records();
    let groups = table.group_alive_by(|r| (r.run_id, r.marker_id));

    let deleted: Vec<Vec<usize>> = groups
        .par_iter()
        .map(|(&(run_id, marker_id), rows)| {
            let mut profiles: BTreeMap<SampleKey, ReplicateProfile> = BTreeMap::new();
            for &idx in rows {
                let r = &records[idx];
                let profile = profiles
                    .entry((r.biosample_id, r.replicate_id))
                    .or_insert_with(|| ReplicateProfile {
                        counts: HashMap::new(),
                        rows: Vec::new(),
                    });
                *profile.counts.entry(r.variant_id).or_default() += r.read_count;
                profile.rows.push(idx);
            }

            let scores = score_replicates(&profiles);
            let mut sorted: Vec<f64> = scores.iter().map(|(_, s)| *s).collect();
            sorted.sort_by(f64::total_cmp);
            let threshold = match quantile(&sorted, renkonen_distance_quantile) {
                Some(t) => t,
                None => {
                    debug!(
                        "Run {} marker {}: no replicate pairs, Renkonen filter skipped",
                        run_id, marker_id
                    );
                    return Vec::new();
                }
            };

            scores
                .iter()
                .filter(|(_, score)| *score > threshold)
                .flat_map(|(key, _)| profiles[key].rows.iter().copied())
                .collect()
        })
        .collect();

    Ok(table.with_deleted(deleted.into_iter().flatten()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ReadCountRecord;

    fn profile(counts: &[(VariantId, u64)]) -> HashMap<VariantId, u64> {
        counts.iter().copied().collect()
    }

    #[test]
    fn test_renkonen_distance_properties() {
        let a = profile(&[(1, 50), (2, 50)]);
        let b = profile(&[(1, 100)]);
        let c = profile(&[(3, 7)]);

        assert!(renkonen_distance(&a, &a).abs() < 1e-12);
        assert!((renkonen_distance(&a, &b) - 0.5).abs() < 1e-12);
        assert!((renkonen_distance(&a, &b) - renkonen_distance(&b, &a)).abs() < 1e-12);
        assert!((renkonen_distance(&a, &c) - 1.0).abs() < 1e-12);
        assert_eq!(renkonen_distance(&profile(&[]), &a), 1.0);
    }

    #[test]
    fn test_quantile_type7() {
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[3.0], 0.9), Some(3.0));
        let q = quantile(&[0.5, 0.5, 1.0], 0.9).unwrap();
        assert!((q - 0.9).abs() < 1e-12);
        let q = quantile(&[1.0, 2.0, 3.0, 4.0], 0.5).unwrap();
        assert!((q - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_replicate_deleted() {
        let table = ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 50),
            ReadCountRecord::new(1, 1, 1, 1, 2, 50),
            ReadCountRecord::new(1, 1, 1, 2, 1, 50),
            ReadCountRecord::new(1, 1, 1, 2, 2, 50),
            // Replicate 3 shares nothing with its siblings
            ReadCountRecord::new(1, 1, 1, 3, 3, 100),
        ])
        .unwrap();

        let filtered = filter_renkonen(&table, 0.9).unwrap();
        let flags: Vec<bool> = filtered.iter().map(|r| r.filter_delete).collect();
        assert_eq!(flags, vec![false, false, false, false, true]);
        assert!(table.is_monotonic_successor(&filtered));
    }

    #[test]
    fn test_single_replicate_never_deletes() {
        let table = ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 50),
            ReadCountRecord::new(1, 1, 2, 1, 3, 100),
        ])
        .unwrap();

        let filtered = filter_renkonen(&table, 0.5).unwrap();
        assert_eq!(filtered.n_deleted(), 0);
    }

    #[test]
    fn test_two_replicates_share_score() {
        // Both replicates get the same mean distance, so neither exceeds the quantile
        let table = ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 90),
            ReadCountRecord::new(1, 1, 1, 2, 2, 90),
        ])
        .unwrap();

        let filtered = filter_renkonen(&table, 0.1).unwrap();
        assert_eq!(filtered.n_deleted(), 0);
    }

    #[test]
    fn test_deleted_rows_excluded_from_profiles() {
        let table = ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 50),
            ReadCountRecord::new(1, 1, 1, 2, 1, 50),
            ReadCountRecord::new(1, 1, 1, 3, 3, 100),
        ])
        .unwrap()
        .with_deleted([2]);

        let filtered = filter_renkonen(&table, 0.9).unwrap();
        assert_eq!(filtered.n_deleted(), 1);
    }

    #[test]
    fn test_invalid_quantile() {
        let table = ReadCountTable::new(vec![ReadCountRecord::new(1, 1, 1, 1, 1, 5)]).unwrap();
        assert!(filter_renkonen(&table, 0.0).is_err());
        assert!(filter_renkonen(&table, 1.0).is_err());
    }
}
