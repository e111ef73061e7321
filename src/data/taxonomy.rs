//! Taxonomy tree stored as an arena addressed by tax id.
//!
//! Parents are stored as ids, never as references, so the tree can be shared
//! freely between worker threads. Construction validates the tree once;
//! every lookup afterwards can assume a single root, existing parents and no
//! cycles.

use super::tsv::{optional_column, parse_field, required_column, tsv_reader};
use crate::error::{CleanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

pub type TaxId = u32;

/// Taxonomic rank, ordered from coarsest to most specific.
///
/// `NoRank` covers unranked nodes such as the root and clades; it sorts first
/// but carries no specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rank {
    NoRank,
    Superkingdom,
    Kingdom,
    Subkingdom,
    Superphylum,
    Phylum,
    Subphylum,
    Superclass,
    Class,
    Subclass,
    Infraclass,
    Superorder,
    Order,
    Suborder,
    Infraorder,
    Superfamily,
    Family,
    Subfamily,
    Tribe,
    Subtribe,
    Genus,
    Subgenus,
    SpeciesGroup,
    SpeciesSubgroup,
    Species,
    Subspecies,
    Varietas,
    Forma,
}

/// Ranks examined by the LTG consensus, coarsest first.
pub const CONSENSUS_RANKS: [Rank; 8] = [
    Rank::Superkingdom,
    Rank::Kingdom,
    Rank::Phylum,
    Rank::Class,
    Rank::Order,
    Rank::Family,
    Rank::Genus,
    Rank::Species,
];

/// Ranks reported as lineage columns in the ASV table.
pub const LINEAGE_RANKS: [Rank; 6] = [
    Rank::Phylum,
    Rank::Class,
    Rank::Order,
    Rank::Family,
    Rank::Genus,
    Rank::Species,
];

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::NoRank => "no rank",
            Rank::Superkingdom => "superkingdom",
            Rank::Kingdom => "kingdom",
            Rank::Subkingdom => "subkingdom",
            Rank::Superphylum => "superphylum",
            Rank::Phylum => "phylum",
            Rank::Subphylum => "subphylum",
            Rank::Superclass => "superclass",
            Rank::Class => "class",
            Rank::Subclass => "subclass",
            Rank::Infraclass => "infraclass",
            Rank::Superorder => "superorder",
            Rank::Order => "order",
            Rank::Suborder => "suborder",
            Rank::Infraorder => "infraorder",
            Rank::Superfamily => "superfamily",
            Rank::Family => "family",
            Rank::Subfamily => "subfamily",
            Rank::Tribe => "tribe",
            Rank::Subtribe => "subtribe",
            Rank::Genus => "genus",
            Rank::Subgenus => "subgenus",
            Rank::SpeciesGroup => "species group",
            Rank::SpeciesSubgroup => "species subgroup",
            Rank::Species => "species",
            Rank::Subspecies => "subspecies",
            Rank::Varietas => "varietas",
            Rank::Forma => "forma",
        }
    }

    /// Whether the rank takes part in specificity ordering.
    #[inline]
    pub fn is_ranked(&self) -> bool {
        *self != Rank::NoRank
    }
}

impl FromStr for Rank {
    type Err = std::convert::Infallible;

    /// Unknown rank names map to `NoRank`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let rank = match s.trim().to_ascii_lowercase().as_str() {
            "superkingdom" | "domain" => Rank::Superkingdom,
            "kingdom" => Rank::Kingdom,
            "subkingdom" => Rank::Subkingdom,
            "superphylum" => Rank::Superphylum,
            "phylum" => Rank::Phylum,
            "subphylum" => Rank::Subphylum,
            "superclass" => Rank::Superclass,
            "class" => Rank::Class,
            "subclass" => Rank::Subclass,
            "infraclass" => Rank::Infraclass,
            "superorder" => Rank::Superorder,
            "order" => Rank::Order,
            "suborder" => Rank::Suborder,
            "infraorder" => Rank::Infraorder,
            "superfamily" => Rank::Superfamily,
            "family" => Rank::Family,
            "subfamily" => Rank::Subfamily,
            "tribe" => Rank::Tribe,
            "subtribe" => Rank::Subtribe,
            "genus" => Rank::Genus,
            "subgenus" => Rank::Subgenus,
            "species group" => Rank::SpeciesGroup,
            "species subgroup" => Rank::SpeciesSubgroup,
            "species" => Rank::Species,
            "subspecies" => Rank::Subspecies,
            "varietas" => Rank::Varietas,
            "forma" => Rank::Forma,
            _ => Rank::NoRank,
        };
        Ok(rank)
    }
}

impl From<String> for Rank {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(rank) => rank,
            Err(never) => match never {},
        }
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.as_str().to_string()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub tax_id: TaxId,
    /// Equal to `tax_id` for the root.
    pub parent_tax_id: TaxId,
    pub rank: Rank,
    pub name: String,
    /// Retired id that now resolves to this node.
    pub old_tax_id: Option<TaxId>,
}

impl TaxonomyNode {
    pub fn new(tax_id: TaxId, parent_tax_id: TaxId, rank: Rank, name: &str) -> Self {
        Self {
            tax_id,
            parent_tax_id,
            rank,
            name: name.to_string(),
            old_tax_id: None,
        }
    }

    pub fn with_old_tax_id(mut self, old_tax_id: TaxId) -> Self {
        self.old_tax_id = Some(old_tax_id);
        self
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.tax_id == self.parent_tax_id
    }
}

/// Validated taxonomy tree.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    index: HashMap<TaxId, usize>,
    aliases: HashMap<TaxId, TaxId>,
    root: TaxId,
}

impl Taxonomy {
    /// Build and validate a taxonomy.
    ///
    /// A tax id may appear on several rows when it has several retired ids;
    /// such rows must agree on parent, rank and name.
    pub fn new(rows: Vec<TaxonomyNode>) -> Result<Self> {
        let mut nodes: Vec<TaxonomyNode> = Vec::with_capacity(rows.len());
        let mut index: HashMap<TaxId, usize> = HashMap::with_capacity(rows.len());
        let mut old_ids: Vec<(TaxId, TaxId)> = Vec::new();

        for row in rows {
            if let Some(old) = row.old_tax_id {
                old_ids.push((old, row.tax_id));
            }
            match index.get(&row.tax_id) {
                Some(&idx) => {
                    let existing = &nodes[idx];
                    if existing.parent_tax_id != row.parent_tax_id
                        || existing.rank != row.rank
                        || existing.name != row.name
                    {
                        return Err(CleanError::InvalidTaxonomy(format!(
                            "Conflicting rows for tax id {}",
                            row.tax_id
                        )));
                    }
                }
                None => {
                    index.insert(row.tax_id, nodes.len());
                    nodes.push(row);
                }
            }
        }

        if nodes.is_empty() {
            return Err(CleanError::EmptyData("Taxonomy has no nodes".to_string()));
        }

        let mut aliases = HashMap::new();
        for (old, current) in old_ids {
            if !index.contains_key(&old) {
                aliases.insert(old, current);
            }
        }

        let roots: Vec<TaxId> = nodes.iter().filter(|n| n.is_root()).map(|n| n.tax_id).collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => {
                return Err(CleanError::InvalidTaxonomy(
                    "No root node (a node whose parent is itself)".to_string(),
                ))
            }
            _ => {
                return Err(CleanError::InvalidTaxonomy(format!(
                    "Multiple root nodes: {:?}",
                    roots
                )))
            }
        };

        for node in &nodes {
            if !index.contains_key(&node.parent_tax_id) {
                return Err(CleanError::InvalidTaxonomy(format!(
                    "Parent {} of tax id {} does not exist",
                    node.parent_tax_id, node.tax_id
                )));
            }
        }

        let taxonomy = Self {
            nodes,
            index,
            aliases,
            root,
        };
        taxonomy.check_acyclic()?;
        taxonomy.check_rank_order()?;
        Ok(taxonomy)
    }

    /// Load a taxonomy from a TSV file.
    ///
    /// Columns: `tax_id`, `parent_tax_id`, `rank`, `name` (or `name_txt`) and
    /// an optional `old_tax_id`.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = tsv_reader(reader);
        let headers = rdr.headers()?.clone();
        let tax_col = required_column(&headers, &["tax_id"], "taxonomy")?;
        let parent_col = required_column(&headers, &["parent_tax_id"], "taxonomy")?;
        let rank_col = required_column(&headers, &["rank"], "taxonomy")?;
        let name_col = required_column(&headers, &["name", "name_txt"], "taxonomy")?;
        let old_col = optional_column(&headers, &["old_tax_id"]);

        let mut rows = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            let row = idx + 1;
            let rank: Rank = record.get(rank_col).unwrap_or("").to_string().into();
            let mut node = TaxonomyNode::new(
                parse_field(&record, tax_col, row, "tax_id")?,
                parse_field(&record, parent_col, row, "parent_tax_id")?,
                rank,
                record.get(name_col).unwrap_or(""),
            );
            if let Some(col) = old_col {
                node.old_tax_id = parse_old_tax_id(record.get(col).unwrap_or(""), row)?;
            }
            rows.push(node);
        }
        Self::new(rows)
    }

    fn check_acyclic(&self) -> Result<()> {
        // 0 = unvisited, 1 = on the current path, 2 = known to reach the root
        let mut state = vec![0u8; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut path = Vec::new();
            let mut idx = start;
            loop {
                match state[idx] {
                    2 => break,
                    1 => {
                        return Err(CleanError::InvalidTaxonomy(format!(
                            "Cycle through tax id {}",
                            self.nodes[idx].tax_id
                        )))
                    }
                    _ => {}
                }
                state[idx] = 1;
                path.push(idx);
                let node = &self.nodes[idx];
                if node.is_root() {
                    break;
                }
                idx = self.index[&node.parent_tax_id];
            }
            for idx in path {
                state[idx] = 2;
            }
        }
        Ok(())
    }

    fn check_rank_order(&self) -> Result<()> {
        for node in &self.nodes {
            if !node.rank.is_ranked() || node.is_root() {
                continue;
            }
            let ancestor_rank = self
                .lineage_path(node.parent_tax_id)
                .into_iter()
                .flatten()
                .filter_map(|id| self.get(id))
                .map(|n| n.rank)
                .find(Rank::is_ranked);
            if let Some(parent_rank) = ancestor_rank {
                if parent_rank > node.rank {
                    return Err(CleanError::InvalidTaxonomy(format!(
                        "Tax id {} ({}) sits below a more specific rank ({})",
                        node.tax_id, node.rank, parent_rank
                    )));
                }
            }
        }
        Ok(())
    }

    /// Map a tax id or a retired alias to the current tax id.
    pub fn resolve(&self, tax_id: TaxId) -> Option<TaxId> {
        if self.index.contains_key(&tax_id) {
            Some(tax_id)
        } else {
            self.aliases.get(&tax_id).copied()
        }
    }

    /// Node for a tax id, following aliases.
    pub fn get(&self, tax_id: TaxId) -> Option<&TaxonomyNode> {
        self.resolve(tax_id)
            .and_then(|id| self.index.get(&id))
            .map(|&idx| &self.nodes[idx])
    }

    pub fn name(&self, tax_id: TaxId) -> Option<&str> {
        self.get(tax_id).map(|n| n.name.as_str())
    }

    pub fn rank(&self, tax_id: TaxId) -> Option<Rank> {
        self.get(tax_id).map(|n| n.rank)
    }

    #[inline]
    pub fn root(&self) -> TaxId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tax ids from the node up to the root, both included.
    pub fn lineage_path(&self, tax_id: TaxId) -> Option<Vec<TaxId>> {
        let mut node = self.get(tax_id)?;
        let mut path = vec![node.tax_id];
        while !node.is_root() {
            node = &self.nodes[self.index[&node.parent_tax_id]];
            path.push(node.tax_id);
        }
        Some(path)
    }

    /// Rank to tax id along the ancestor path; the node closest to the leaf
    /// wins when a rank repeats.
    pub fn ranked_lineage(&self, tax_id: TaxId) -> Option<BTreeMap<Rank, TaxId>> {
        let path = self.lineage_path(tax_id)?;
        let mut lineage = BTreeMap::new();
        for id in path {
            let rank = self.nodes[self.index[&id]].rank;
            if rank.is_ranked() {
                lineage.entry(rank).or_insert(id);
            }
        }
        Some(lineage)
    }
}

/// Retired ids may be empty, `NaN`, or written as floats (`1234.0`).
fn parse_old_tax_id(raw: &str, row: usize) -> Result<Option<TaxId>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("na") {
        return Ok(None);
    }
    if let Ok(id) = raw.parse::<TaxId>() {
        return Ok(Some(id));
    }
    match raw.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= TaxId::MAX as f64 => Ok(Some(v as TaxId)),
        _ => Err(CleanError::InvalidValue {
            value: raw.to_string(),
            row,
            column: "old_tax_id".to_string(),
        }),
    }
}
