//! Lowest taxonomic group (LTG) consensus.
//!
//! For each variant the hits are banded by identity levels. When the best
//! hit reaches the rule threshold, the band just below it decides. Weaker
//! variants walk the levels down until a band holds enough distinct taxa.
//! The call is the deepest rank at which at least `include_prop` percent of
//! the band agrees.

use crate::data::{Rank, SimilarityHit, TaxId, Taxonomy, VariantId, CONSENSUS_RANKS};
use crate::error::{CleanError, Result};
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Identity levels tried in order, in percent.
pub const DEFAULT_IDENTITY_LEVELS: [f64; 7] = [100.0, 99.0, 97.0, 95.0, 90.0, 85.0, 80.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LtgParams {
    /// Identity at or above which a band is trusted regardless of taxon count.
    pub ltg_rule_threshold: f64,
    /// Percentage of hits that must agree on a taxon.
    pub include_prop: f64,
    /// Distinct taxa needed to trust a band below the rule threshold.
    pub min_number_of_taxa: usize,
    pub identity_levels: Vec<f64>,
    /// Label of the reference database, copied onto each assignment.
    pub blast_db: Option<String>,
}

impl Default for LtgParams {
    fn default() -> Self {
        Self {
            ltg_rule_threshold: 97.0,
            include_prop: 90.0,
            min_number_of_taxa: 3,
            identity_levels: DEFAULT_IDENTITY_LEVELS.to_vec(),
            blast_db: None,
        }
    }
}

impl LtgParams {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ltg_rule_threshold", self.ltg_rule_threshold),
            ("include_prop", self.include_prop),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CleanError::InvalidParameter(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }
        if self.min_number_of_taxa < 1 {
            return Err(CleanError::InvalidParameter(
                "min_number_of_taxa must be at least 1".to_string(),
            ));
        }
        if self.identity_levels.is_empty()
            || self
                .identity_levels
                .iter()
                .any(|l| !(0.0..=100.0).contains(l))
        {
            return Err(CleanError::InvalidParameter(
                "identity_levels must be non-empty percentages".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the consensus for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LtgCall {
    Taxon { tax_id: TaxId, rank: Rank },
    /// Hits were trusted but disagreed already at the coarsest rank.
    Root { tax_id: TaxId },
    /// No usable hits, or no band was trusted.
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtgAssignment {
    pub variant_id: VariantId,
    pub call: LtgCall,
    /// Identity level of the band that decided.
    pub identity: Option<f64>,
    pub blast_db: Option<String>,
}

impl LtgAssignment {
    pub fn ltg_tax_id(&self) -> Option<TaxId> {
        match self.call {
            LtgCall::Taxon { tax_id, .. } | LtgCall::Root { tax_id } => Some(tax_id),
            LtgCall::Unassigned => None,
        }
    }

    pub fn ltg_rank(&self) -> Option<Rank> {
        match self.call {
            LtgCall::Taxon { rank, .. } => Some(rank),
            LtgCall::Root { .. } => Some(Rank::NoRank),
            LtgCall::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self.call, LtgCall::Unassigned)
    }
}

/// Deepest taxon shared by at least `include_prop` percent of the lineages.
///
/// Ranks are visited from superkingdom to species. At each rank only the
/// lineages through the taxon accepted so far are counted, but the share is
/// taken over all lineages. Returns `None` when even the coarsest carried
/// rank fails.
pub fn consensus(lineages: &[BTreeMap<Rank, TaxId>], include_prop: f64) -> Option<(TaxId, Rank)> {
    let total = lineages.len();
    if total == 0 {
        return None;
    }

    let mut pool: Vec<&BTreeMap<Rank, TaxId>> = lineages.iter().collect();
    let mut accepted = None;
    for rank in CONSENSUS_RANKS {
        let mut counts: BTreeMap<TaxId, usize> = BTreeMap::new();
        for lineage in &pool {
            if let Some(&tax_id) = lineage.get(&rank) {
                *counts.entry(tax_id).or_default() += 1;
            }
        }
        if counts.is_empty() {
            continue;
        }

        // Ascending ids, so keeping only strictly greater counts breaks ties to the smallest id
        let mut best: Option<(TaxId, usize)> = None;
        for (&tax_id, &n) in &counts {
            if best.map_or(true, |(_, best_n)| n > best_n) {
                best = Some((tax_id, n));
            }
        }
        let (tax_id, n) = best?;

        if 100.0 * n as f64 / total as f64 >= include_prop {
            accepted = Some((tax_id, rank));
            pool.retain(|lineage| lineage.get(&rank) == Some(&tax_id));
        } else {
            break;
        }
    }
    accepted
}

/// Hit whose target has been resolved in the taxonomy.
struct ResolvedHit {
    tax_id: TaxId,
    identity: f64,
    lineage: BTreeMap<Rank, TaxId>,
}

fn assign_variant(
    variant_id: VariantId,
    hits: &[ResolvedHit],
    levels: &[f64],
    taxonomy: &Taxonomy,
    params: &LtgParams,
) -> LtgAssignment {
    let mut assignment = LtgAssignment {
        variant_id,
        call: LtgCall::Unassigned,
        identity: None,
        blast_db: params.blast_db.clone(),
    };

    let best = match hits.iter().map(|h| h.identity).max_by(f64::total_cmp) {
        Some(best) => best,
        None => return assignment,
    };

    let band = if best >= params.ltg_rule_threshold {
        // Strong hits: the band just below the best hit decides, whatever its taxon count
        let level = levels.iter().copied().find(|&l| l <= best).unwrap_or(best);
        Some((level, hits.iter().filter(|h| h.identity >= level).collect::<Vec<_>>()))
    } else {
        levels.iter().copied().find_map(|level| {
            let selected: Vec<&ResolvedHit> =
                hits.iter().filter(|h| h.identity >= level).collect();
            let taxa: BTreeSet<TaxId> = selected.iter().map(|h| h.tax_id).collect();
            (!selected.is_empty() && taxa.len() >= params.min_number_of_taxa)
                .then_some((level, selected))
        })
    };

    if let Some((level, selected)) = band {
        let lineages: Vec<BTreeMap<Rank, TaxId>> =
            selected.iter().map(|h| h.lineage.clone()).collect();
        assignment.call = match consensus(&lineages, params.include_prop) {
            Some((tax_id, rank)) => LtgCall::Taxon { tax_id, rank },
            None => LtgCall::Root {
                tax_id: taxonomy.root(),
            },
        };
        assignment.identity = Some(level);
    }

    assignment
}

/// Assign an LTG to every requested variant.
///
/// Returns one assignment per distinct variant id, sorted by id. Hits on
/// tax ids missing from the taxonomy are dropped with a warning.
pub fn assign_ltg(
    variant_ids: &[VariantId],
    hits: &[SimilarityHit],
    taxonomy: &Taxonomy,
    params: &LtgParams,
) -> Result<Vec<LtgAssignment>> {
    params.validate()?;

    let mut levels = params.identity_levels.clone();
    levels.sort_by(|a, b| b.total_cmp(a));
    levels.dedup();

    let mut ids = variant_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    let wanted: BTreeSet<VariantId> = ids.iter().copied().collect();

    let mut by_variant: HashMap<VariantId, Vec<ResolvedHit>> = HashMap::new();
    let mut n_unknown = 0usize;
    for hit in hits.iter().filter(|h| wanted.contains(&h.variant_id)) {
        let resolved = taxonomy.resolve(hit.target_tax_id).and_then(|tax_id| {
            taxonomy
                .ranked_lineage(tax_id)
                .map(|lineage| ResolvedHit {
                    tax_id,
                    identity: hit.identity_percent,
                    lineage,
                })
        });
        match resolved {
            Some(r) => by_variant.entry(hit.variant_id).or_default().push(r),
            None => {
                n_unknown += 1;
                warn!(
                    "Variant {}: target tax id {} not in taxonomy, hit ignored",
                    hit.variant_id, hit.target_tax_id
                );
            }
        }
    }
    if n_unknown > 0 {
        warn!("{} hits ignored for unknown tax ids", n_unknown);
    }

    Ok(ids
        .par_iter()
        .map(|&variant_id| {
            let variant_hits = by_variant
                .get(&variant_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            assign_variant(variant_id, variant_hits, &levels, taxonomy, params)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TaxonomyNode;

    fn create_test_taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            TaxonomyNode::new(1, 1, Rank::NoRank, "root"),
            TaxonomyNode::new(2, 1, Rank::Superkingdom, "Eukaryota"),
            TaxonomyNode::new(3, 2, Rank::Kingdom, "Metazoa"),
            TaxonomyNode::new(4, 3, Rank::Phylum, "Arthropoda"),
            TaxonomyNode::new(5, 4, Rank::Class, "Insecta"),
            TaxonomyNode::new(6, 5, Rank::Order, "Diptera"),
            TaxonomyNode::new(7, 6, Rank::Family, "Chironomidae"),
            TaxonomyNode::new(8, 6, Rank::Family, "Culicidae"),
            TaxonomyNode::new(9, 7, Rank::Genus, "Chironomus"),
            TaxonomyNode::new(10, 9, Rank::Species, "Chironomus riparius"),
            TaxonomyNode::new(11, 9, Rank::Species, "Chironomus plumosus"),
            TaxonomyNode::new(12, 8, Rank::Genus, "Culex"),
            TaxonomyNode::new(13, 12, Rank::Species, "Culex pipiens").with_old_tax_id(99),
            TaxonomyNode::new(20, 1, Rank::Superkingdom, "Bacteria"),
            TaxonomyNode::new(21, 20, Rank::Species, "Escherichia coli"),
        ])
        .unwrap()
    }

    fn hits(variant_id: VariantId, targets: &[(TaxId, f64)]) -> Vec<SimilarityHit> {
        targets
            .iter()
            .map(|&(tax_id, identity)| SimilarityHit::new(variant_id, tax_id, identity))
            .collect()
    }

    fn assign_one(targets: &[(TaxId, f64)], params: &LtgParams) -> LtgAssignment {
        let taxonomy = create_test_taxonomy();
        let mut result = assign_ltg(&[1], &hits(1, targets), &taxonomy, params).unwrap();
        assert_eq!(result.len(), 1);
        result.remove(0)
    }

    #[test]
    fn test_two_hits_same_species() {
        let a = assign_one(&[(10, 99.0), (10, 99.0)], &LtgParams::default());
        assert_eq!(
            a.call,
            LtgCall::Taxon {
                tax_id: 10,
                rank: Rank::Species
            }
        );
        assert_eq!(a.identity, Some(99.0));
        assert_eq!(a.ltg_rank(), Some(Rank::Species));
    }

    #[test]
    fn test_split_families_below_threshold_unassigned() {
        let a = assign_one(&[(10, 80.0), (13, 80.0)], &LtgParams::default());
        assert_eq!(a.call, LtgCall::Unassigned);
        assert_eq!(a.identity, None);
        assert!(!a.is_assigned());
    }

    #[test]
    fn test_split_species_falls_back_to_genus() {
        let a = assign_one(&[(10, 99.5), (11, 99.5)], &LtgParams::default());
        assert_eq!(
            a.call,
            LtgCall::Taxon {
                tax_id: 9,
                rank: Rank::Genus
            }
        );
    }

    #[test]
    fn test_include_prop_over_all_hits() {
        let mut targets = vec![(10, 98.0); 9];
        targets.push((13, 98.0));
        let a = assign_one(&targets, &LtgParams::default());
        assert_eq!(a.ltg_tax_id(), Some(10));
        assert_eq!(a.identity, Some(97.0));
    }

    #[test]
    fn test_rule_threshold_between_levels() {
        let params = LtgParams {
            ltg_rule_threshold: 98.0,
            ..LtgParams::default()
        };

        // Best hit above the threshold: no minimum taxon count applies
        let a = assign_one(&[(10, 98.5), (11, 98.5)], &params);
        assert_eq!(
            a.call,
            LtgCall::Taxon {
                tax_id: 9,
                rank: Rank::Genus
            }
        );
        assert_eq!(a.identity, Some(97.0));

        // Best hit below the threshold: two taxa are not enough
        let b = assign_one(&[(10, 97.5), (11, 97.5)], &params);
        assert_eq!(b.call, LtgCall::Unassigned);
    }

    #[test]
    fn test_strong_hit_below_every_level() {
        let params = LtgParams {
            ltg_rule_threshold: 50.0,
            ..LtgParams::default()
        };
        let a = assign_one(&[(10, 60.0), (10, 55.0)], &params);
        assert_eq!(a.ltg_tax_id(), Some(10));
        assert_eq!(a.identity, Some(60.0));
    }

    #[test]
    fn test_enough_taxa_at_low_identity() {
        let a = assign_one(&[(10, 85.0), (11, 86.0), (13, 85.0)], &LtgParams::default());
        assert_eq!(
            a.call,
            LtgCall::Taxon {
                tax_id: 6,
                rank: Rank::Order
            }
        );
        assert_eq!(a.identity, Some(85.0));
    }

    #[test]
    fn test_disagreement_at_superkingdom_is_root() {
        let a = assign_one(&[(10, 99.0), (21, 99.0)], &LtgParams::default());
        assert_eq!(a.call, LtgCall::Root { tax_id: 1 });
        assert_eq!(a.ltg_rank(), Some(Rank::NoRank));
        assert!(a.is_assigned());
    }

    #[test]
    fn test_alias_and_unknown_tax_ids() {
        let _ = env_logger::builder().is_test(true).try_init();

        let a = assign_one(&[(99, 100.0), (12345, 100.0)], &LtgParams::default());
        assert_eq!(a.ltg_tax_id(), Some(13));

        let b = assign_one(&[(12345, 100.0)], &LtgParams::default());
        assert_eq!(b.call, LtgCall::Unassigned);
    }

    #[test]
    fn test_variants_without_hits() {
        let taxonomy = create_test_taxonomy();
        let params = LtgParams {
            blast_db: Some("coi_2024".to_string()),
            ..LtgParams::default()
        };
        let result = assign_ltg(&[3, 2, 3], &hits(2, &[(10, 100.0)]), &taxonomy, &params).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].variant_id, 2);
        assert!(result[0].is_assigned());
        assert_eq!(result[1].call, LtgCall::Unassigned);
        assert_eq!(result[1].blast_db.as_deref(), Some("coi_2024"));
    }

    #[test]
    fn test_consensus_skips_missing_ranks() {
        let taxonomy = create_test_taxonomy();
        // E. coli has no kingdom to class ranks in this tree
        let lineage = taxonomy.ranked_lineage(21).unwrap();
        assert_eq!(consensus(&[lineage], 90.0), Some((21, Rank::Species)));
        assert_eq!(consensus(&[], 90.0), None);
    }

    #[test]
    fn test_invalid_params() {
        let params = LtgParams {
            include_prop: 120.0,
            ..LtgParams::default()
        };
        assert!(assign_ltg(&[1], &[], &create_test_taxonomy(), &params).is_err());
    }
}
