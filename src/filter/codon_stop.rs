//! Stop codon filter for coding markers.
//!
//! A variant with a stop codon in every forward reading frame cannot encode
//! the expected protein and is deleted.

use crate::data::{ReadCountTable, VariantId, VariantSet};
use crate::error::{CleanError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// NCBI translation table, identified by its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct GeneticCode(u8);

impl GeneticCode {
    /// Invertebrate mitochondrial code.
    pub const INVERTEBRATE_MITOCHONDRIAL: GeneticCode = GeneticCode(5);

    pub fn new(id: u8) -> Result<Self> {
        match id {
            1..=6 | 9..=14 => Ok(Self(id)),
            _ => Err(CleanError::InvalidParameter(format!(
                "Unsupported genetic code: {}",
                id
            ))),
        }
    }

    pub fn id(&self) -> u8 {
        self.0
    }

    pub fn stop_codons(&self) -> &'static [&'static [u8; 3]] {
        match self.0 {
            2 => &[b"TAA", b"TAG", b"AGA", b"AGG"],
            3 | 4 | 5 | 9 | 10 | 13 => &[b"TAA", b"TAG"],
            6 => &[b"TGA"],
            14 => &[b"TAG"],
            _ => &[b"TAA", b"TAG", b"TGA"],
        }
    }

    /// True if the reading frame starting at `offset` contains a stop codon.
    pub fn frame_has_stop(&self, sequence: &[u8], offset: usize) -> bool {
        let stops = self.stop_codons();
        sequence
            .get(offset..)
            .map(|frame| {
                frame
                    .chunks_exact(3)
                    .any(|codon| stops.iter().any(|stop| codon == &stop[..]))
            })
            .unwrap_or(false)
    }

    /// True if all three forward frames contain a stop codon.
    pub fn stops_in_all_frames(&self, sequence: &[u8]) -> bool {
        (0..3).all(|offset| self.frame_has_stop(sequence, offset))
    }
}

impl Default for GeneticCode {
    fn default() -> Self {
        Self::INVERTEBRATE_MITOCHONDRIAL
    }
}

impl TryFrom<u8> for GeneticCode {
    type Error = CleanError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<GeneticCode> for u8 {
    fn from(code: GeneticCode) -> u8 {
        code.0
    }
}

impl fmt::Display for GeneticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delete variants with a stop codon in all three forward frames.
pub fn filter_codon_stop(
    table: &ReadCountTable,
    variants: &VariantSet,
    genetic_code: GeneticCode,
) -> Result<ReadCountTable> {
    let candidates = table.alive_variant_ids();
    let stopped: Vec<Option<VariantId>> = candidates
        .par_iter()
        .map(|&variant_id| -> Result<Option<VariantId>> {
            let sequence = variants.require(variant_id)?;
            Ok(genetic_code
                .stops_in_all_frames(sequence.as_bytes())
                .then_some(variant_id))
        })
        .collect::<Result<_>>()?;
    let stopped: HashSet<VariantId> = stopped.into_iter().flatten().collect();

    Ok(table.with_deleted(
        table
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_alive() && stopped.contains(&r.variant_id))
            .map(|(idx, _)| idx),
    ))
}
