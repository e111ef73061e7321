//! De-novo chimera detection.
//!
//! Within each (run, marker, biosample, replicate) partition, variants are
//! visited from most to least abundant. A variant is compared with the more
//! abundant variants already found non-chimeric; if the prefix of one and
//! the suffix of another explain it better than either alone, it is a
//! recombinant. Recombinants whose parents are both at least
//! `uchime3_denovo_abskew` times more abundant are chimeras and deleted.
//! Recombinants with less skewed parents are borderline: kept, but reported.

use crate::data::{MarkerId, ReadCountTable, RunId, VariantId, VariantSet};
use crate::error::{CleanError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters of the chimera detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeraParams {
    /// Minimum parent/query abundance ratio for a hard chimera call.
    pub uchime3_denovo_abskew: f64,
    /// Minimum positions on each side of the breakpoint supporting its parent.
    pub min_diffs: usize,
    /// Minimum gain in percent identity of the model over the best parent.
    pub min_divergence: f64,
    /// Parents tried per query, closest first.
    pub max_parents: usize,
}

impl Default for ChimeraParams {
    fn default() -> Self {
        Self {
            uchime3_denovo_abskew: 16.0,
            min_diffs: 3,
            min_divergence: 0.8,
            max_parents: 16,
        }
    }
}

impl ChimeraParams {
    pub fn with_abskew(abskew: f64) -> Self {
        Self {
            uchime3_denovo_abskew: abskew,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.uchime3_denovo_abskew.is_finite() && self.uchime3_denovo_abskew > 0.0) {
            return Err(CleanError::InvalidParameter(format!(
                "uchime3_denovo_abskew must be positive, got {}",
                self.uchime3_denovo_abskew
            )));
        }
        if self.min_diffs == 0 {
            return Err(CleanError::InvalidParameter(
                "chimera min_diffs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_divergence) {
            return Err(CleanError::InvalidParameter(
                "chimera min_divergence must be between 0 and 100".to_string(),
            ));
        }
        if self.max_parents < 2 {
            return Err(CleanError::InvalidParameter(
                "chimera max_parents must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classification of one variant in one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChimeraCall {
    Clean,
    /// Explained by more abundant parents, but below the skew ratio.
    Borderline,
    Chimera,
}

/// Row of the secondary borderline table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChimeraBorderline {
    pub run_id: RunId,
    pub marker_id: MarkerId,
    pub variant_id: VariantId,
    /// True if the variant was borderline in any partition.
    pub borderline: bool,
}

/// Result of the chimera stage.
#[derive(Debug, Clone)]
pub struct ChimeraOutput {
    pub table: ReadCountTable,
    pub borderline: Vec<ChimeraBorderline>,
}

/// Best two-parent explanation of a query sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recombinant {
    /// Query positions before this index come from the left parent.
    pub breakpoint: usize,
    pub mismatches: usize,
    pub left_votes: usize,
    pub right_votes: usize,
    /// Percent identity of the model to the query.
    pub model_identity: f64,
    /// Percent identity of the closest single parent.
    pub parent_identity: f64,
}

impl Recombinant {
    #[inline]
    pub fn divergence(&self) -> f64 {
        self.model_identity - self.parent_identity
    }
}

#[inline]
fn left_base(parent: &[u8], i: usize) -> Option<u8> {
    parent.get(i).copied()
}

/// Parent base aligned on the 3' end of the query.
#[inline]
fn right_base(parent: &[u8], i: usize, query_len: usize) -> Option<u8> {
    (i + parent.len())
        .checked_sub(query_len)
        .and_then(|j| parent.get(j).copied())
}

/// Mismatches of a single parent, aligned on whichever end fits best.
fn single_mismatches(query: &[u8], parent: &[u8]) -> usize {
    let n = query.len();
    let left = (0..n).filter(|&i| left_base(parent, i) != Some(query[i])).count();
    let right = (0..n)
        .filter(|&i| right_base(parent, i, n) != Some(query[i]))
        .count();
    left.min(right)
}

/// Score the model `left[..k] + right[k..]` against `query` for every breakpoint.
///
/// Returns the best breakpoint when each side has at least `min_diffs`
/// positions where the query agrees with that side's parent and not the
/// other, and the model beats both parents by `min_divergence` percent.
pub fn score_recombination(
    query: &[u8],
    left: &[u8],
    right: &[u8],
    min_diffs: usize,
    min_divergence: f64,
) -> Option<Recombinant> {
    let n = query.len();
    if n == 0 {
        return None;
    }

    let mut left_mm = vec![0usize; n + 1];
    let mut left_votes = vec![0usize; n + 1];
    for i in 0..n {
        let q = Some(query[i]);
        let a = left_base(left, i);
        let b = left_base(right, i);
        left_mm[i + 1] = left_mm[i] + usize::from(a != q);
        left_votes[i + 1] = left_votes[i] + usize::from(a == q && b != q);
    }

    let mut right_mm = vec![0usize; n + 1];
    let mut right_votes = vec![0usize; n + 1];
    for i in (0..n).rev() {
        let q = Some(query[i]);
        let a = right_base(left, i, n);
        let b = right_base(right, i, n);
        right_mm[i] = right_mm[i + 1] + usize::from(b != q);
        right_votes[i] = right_votes[i + 1] + usize::from(b == q && a != q);
    }

    let mut best: Option<(usize, usize, usize)> = None;
    for k in 0..=n {
        if left_votes[k] < min_diffs || right_votes[k] < min_diffs {
            continue;
        }
        let mm = left_mm[k] + right_mm[k];
        let support = left_votes[k].min(right_votes[k]);
        let better = match best {
            None => true,
            Some((_, best_mm, best_support)) => {
                mm < best_mm || (mm == best_mm && support > best_support)
            }
        };
        if better {
            best = Some((k, mm, support));
        }
    }
    let (breakpoint, mismatches, _) = best?;

    let parent_mm = single_mismatches(query, left).min(single_mismatches(query, right));
    if mismatches >= parent_mm {
        return None;
    }

    let identity = |mm: usize| 100.0 * (n - mm) as f64 / n as f64;
    let recombinant = Recombinant {
        breakpoint,
        mismatches,
        left_votes: left_votes[breakpoint],
        right_votes: right_votes[breakpoint],
        model_identity: identity(mismatches),
        parent_identity: identity(parent_mm),
    };
    if recombinant.divergence() < min_divergence {
        return None;
    }
    Some(recombinant)
}

/// One variant of a partition, in abundance order.
struct Candidate<'a> {
    row: usize,
    count: u64,
    sequence: &'a [u8],
}

/// Classify every variant of one partition, most abundant first.
fn classify_partition(candidates: &[Candidate<'_>], params: &ChimeraParams) -> Vec<ChimeraCall> {
    let mut calls = vec![ChimeraCall::Clean; candidates.len()];

    for qi in 0..candidates.len() {
        let query = &candidates[qi];

        let mut parents: Vec<(usize, usize)> = (0..qi)
            .filter(|&pi| calls[pi] != ChimeraCall::Chimera && candidates[pi].count > query.count)
            .map(|pi| (pi, single_mismatches(query.sequence, candidates[pi].sequence)))
            .collect();
        if parents.len() < 2 {
            continue;
        }
        parents.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        parents.truncate(params.max_parents);

        let skew_floor = params.uchime3_denovo_abskew * query.count as f64;
        let mut call = ChimeraCall::Clean;
        'pairs: for &(ai, _) in &parents {
            for &(bi, _) in &parents {
                if ai == bi {
                    continue;
                }
                let (a, b) = (&candidates[ai], &candidates[bi]);
                if score_recombination(
                    query.sequence,
                    a.sequence,
                    b.sequence,
                    params.min_diffs,
                    params.min_divergence,
                )
                .is_none()
                {
                    continue;
                }
                if a.count as f64 >= skew_floor && b.count as f64 >= skew_floor {
                    call = ChimeraCall::Chimera;
                    break 'pairs;
                }
                call = ChimeraCall::Borderline;
            }
        }
        calls[qi] = call;
    }

    calls
}

/// Flag chimeric variants and report borderline ones.
///
/// Evaluated rows get `chimera_borderline` set; chimeras are deleted.
/// Rows already deleted are passed through untouched.
pub fn filter_chimera(
    table: &ReadCountTable,
    variants: &VariantSet,
    params: &ChimeraParams,
) -> Result<ChimeraOutput> {
    params.validate()?;

    let records = table.records();
    let partitions = table.group_alive_by(|r| {
        (r.run_id, r.marker_id, r.biosample_id, r.replicate_id)
    });

    let calls: Vec<Vec<(usize, ChimeraCall)>> = partitions
        .par_iter()
        .map(|(_, rows)| -> Result<Vec<(usize, ChimeraCall)>> {
            let mut candidates = Vec::with_capacity(rows.len());
            for &row in rows {
                let r = &records[row];
                candidates.push(Candidate {
                    row,
                    count: r.read_count,
                    sequence: variants.require(r.variant_id)?.as_bytes(),
                });
            }
            candidates.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then(records[a.row].variant_id.cmp(&records[b.row].variant_id))
            });
            let partition_calls = classify_partition(&candidates, params);
            Ok(candidates
                .iter()
                .zip(partition_calls)
                .map(|(c, call)| (c.row, call))
                .collect())
        })
        .collect::<Result<_>>()?;
    let calls: Vec<(usize, ChimeraCall)> = calls.into_iter().flatten().collect();

    let mut table_out = table.with_deleted(
        calls
            .iter()
            .filter(|(_, call)| *call == ChimeraCall::Chimera)
            .map(|(row, _)| *row),
    );

    let mut borderline: BTreeMap<(RunId, MarkerId, VariantId), bool> = BTreeMap::new();
    let out_records = table_out.records_mut();
    for &(row, call) in &calls {
        let is_borderline = call == ChimeraCall::Borderline;
        let r = &mut out_records[row];
        r.chimera_borderline = Some(is_borderline);
        *borderline
            .entry((r.run_id, r.marker_id, r.variant_id))
            .or_insert(false) |= is_borderline;
    }

    let borderline = borderline
        .into_iter()
        .map(|((run_id, marker_id, variant_id), borderline)| ChimeraBorderline {
            run_id,
            marker_id,
            variant_id,
            borderline,
        })
        .collect();

    Ok(ChimeraOutput {
        table: table_out,
        borderline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ReadCountRecord;

    const PARENT_A: &str = "ACGTACGTACGTTGCAACGTAGCTAGCTTACGGATCCAGT";

    /// Swap bases at the given positions to derive a second parent.
    fn mutate(seq: &str, positions: &[usize]) -> String {
        seq.bytes()
            .enumerate()
            .map(|(i, b)| {
                if positions.contains(&i) {
                    match b {
                        b'A' => 'T',
                        b'C' => 'G',
                        b'G' => 'C',
                        _ => 'A',
                    }
                } else {
                    b as char
                }
            })
            .collect()
    }

    fn parent_b() -> String {
        mutate(PARENT_A, &[2, 7, 12, 17, 22, 27, 32, 37])
    }

    fn recombinant() -> String {
        format!("{}{}", &PARENT_A[..20], &parent_b()[20..])
    }

    fn create_test_variants() -> VariantSet {
        vec![
            (1, PARENT_A.to_string()),
            (2, parent_b()),
            (3, recombinant()),
            // A point mutant of parent A
            (4, mutate(PARENT_A, &[30])),
        ]
        .into_iter()
        .collect()
    }

    fn partition(counts: &[(u32, u64)]) -> ReadCountTable {
        ReadCountTable::new(
            counts
                .iter()
                .map(|&(variant, count)| ReadCountRecord::new(1, 1, 1, 1, variant, count))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_score_exact_recombinant() {
        let q = recombinant();
        let b = parent_b();
        let r = score_recombination(q.as_bytes(), PARENT_A.as_bytes(), b.as_bytes(), 3, 0.8)
            .unwrap();
        assert_eq!(r.mismatches, 0);
        assert!(r.breakpoint > 17 && r.breakpoint <= 22);
        assert_eq!(r.left_votes, 4);
        assert_eq!(r.right_votes, 4);
        assert!((r.model_identity - 100.0).abs() < 1e-10);
        assert!((r.parent_identity - 90.0).abs() < 1e-10);

        // Swapping the parents cannot explain the query
        assert!(
            score_recombination(q.as_bytes(), b.as_bytes(), PARENT_A.as_bytes(), 3, 0.8).is_none()
        );
    }

    #[test]
    fn test_point_mutant_is_not_recombinant() {
        let q = mutate(PARENT_A, &[30]);
        let b = parent_b();
        assert!(
            score_recombination(q.as_bytes(), PARENT_A.as_bytes(), b.as_bytes(), 3, 0.8).is_none()
        );
    }

    #[test]
    fn test_chimera_with_ten_fold_parents() {
        let table = partition(&[(1, 600), (2, 500), (3, 50), (4, 400)]);
        let output =
            filter_chimera(&table, &create_test_variants(), &ChimeraParams::with_abskew(10.0))
                .unwrap();

        let flags: Vec<bool> = output.table.iter().map(|r| r.filter_delete).collect();
        assert_eq!(flags, vec![false, false, true, false]);
        assert!(output
            .table
            .iter()
            .all(|r| r.chimera_borderline == Some(false)));
    }

    #[test]
    fn test_low_skew_is_borderline() {
        let table = partition(&[(1, 600), (2, 500), (3, 100)]);
        let output =
            filter_chimera(&table, &create_test_variants(), &ChimeraParams::default()).unwrap();

        assert_eq!(output.table.n_deleted(), 0);
        assert_eq!(output.table.records()[2].chimera_borderline, Some(true));
        assert_eq!(
            output.borderline,
            vec![
                ChimeraBorderline { run_id: 1, marker_id: 1, variant_id: 1, borderline: false },
                ChimeraBorderline { run_id: 1, marker_id: 1, variant_id: 2, borderline: false },
                ChimeraBorderline { run_id: 1, marker_id: 1, variant_id: 3, borderline: true },
            ]
        );
    }

    #[test]
    fn test_more_abundant_recombinant_not_flagged() {
        // The "recombinant" outnumbers one parent, so it cannot be its child
        let table = partition(&[(1, 600), (2, 50), (3, 500)]);
        let output =
            filter_chimera(&table, &create_test_variants(), &ChimeraParams::with_abskew(1.0))
                .unwrap();
        assert_eq!(output.table.n_deleted(), 0);
    }

    #[test]
    fn test_deleted_rows_pass_through() {
        let table = partition(&[(1, 600), (2, 500), (3, 20)]).with_deleted([1]);
        let output =
            filter_chimera(&table, &create_test_variants(), &ChimeraParams::with_abskew(10.0))
                .unwrap();

        // Without parent 2 alive there is no parent pair
        assert_eq!(output.table.n_deleted(), 1);
        assert_eq!(output.table.records()[1].chimera_borderline, None);
        assert!(table.is_monotonic_successor(&output.table));
    }

    #[test]
    fn test_partitions_are_independent() {
        let table = ReadCountTable::new(vec![
            ReadCountRecord::new(1, 1, 1, 1, 1, 600),
            ReadCountRecord::new(1, 1, 1, 1, 2, 500),
            ReadCountRecord::new(1, 1, 1, 2, 3, 20),
        ])
        .unwrap();
        let output =
            filter_chimera(&table, &create_test_variants(), &ChimeraParams::with_abskew(10.0))
                .unwrap();
        assert_eq!(output.table.n_deleted(), 0);
    }

    #[test]
    fn test_invalid_abskew() {
        let table = partition(&[(1, 10)]);
        let params = ChimeraParams::with_abskew(0.0);
        assert!(filter_chimera(&table, &create_test_variants(), &params).is_err());
    }
}
