//! The consumed feature records and the character state the engine writes into
use std::cmp::Ordering;

use mzpeaks::{CoordinateLike, Mass, Time};

use crate::match_result::MatchResult;

/// The relationship a [`PeakLink`] edge asserts between two peaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkKind {
    /// An alternate adduct ion of the same neutral compound
    Adduct,
    /// An isotopologue satellite of the same ion
    Isotope,
}

/// One directed half of a peak relationship edge. The engine always
/// writes the reciprocal half onto the other peak as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakLink {
    /// The batch-scoped id of the peak at the other end of the edge
    pub linked_peak_id: u32,
    pub kind: LinkKind,
}

impl PeakLink {
    pub fn new(linked_peak_id: u32, kind: LinkKind) -> Self {
        Self {
            linked_peak_id,
            kind,
        }
    }
}

/// The mutable character record owned by a [`PeakFeature`].
///
/// Created empty upstream and written into only by the estimation
/// engine. The link list is ordered and deduplicated: adding an edge
/// that is already present is a no-op, which keeps repeated estimation
/// runs from growing the record.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakCharacter {
    /// Whether any relationship edge has been assigned to this peak
    pub is_linked: bool,
    /// The peak id of the adduct group parent, set for every member of
    /// a linked adduct group including the parent itself
    pub adduct_parent: Option<u32>,
    links: Vec<PeakLink>,
}

impl PeakCharacter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> &[PeakLink] {
        &self.links
    }

    pub fn has_link(&self, link: PeakLink) -> bool {
        self.links.contains(&link)
    }

    /// Append `link` unless an identical edge is already recorded.
    pub fn add_link(&mut self, link: PeakLink) {
        if !self.links.contains(&link) {
            self.links.push(link);
        }
    }

    pub fn iter_links(&self) -> std::slice::Iter<'_, PeakLink> {
        self.links.iter()
    }
}

/// A chromatographic peak feature as produced by the surrounding
/// extraction and annotation stages.
///
/// The engine never creates or destroys features; it reads their
/// positions, isotope weights, identity keys and match results, and
/// mutates only the owned [`PeakCharacter`].
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakFeature {
    /// Unique within one feature batch
    pub peak_id: u32,
    /// Unique within the whole run, the key spectra are stored under
    pub master_peak_id: u64,
    pub mass: f64,
    /// Retention time, in minutes
    pub time: f64,
    /// Which isotopologue this feature was assigned to, `0` meaning
    /// monoisotopic
    pub isotope_weight_number: i32,
    /// The hashed structure key identifying the annotated compound
    pub identity_key: String,
    pub match_results: Vec<MatchResult>,
    pub character: PeakCharacter,
}

impl PeakFeature {
    pub fn new(peak_id: u32, master_peak_id: u64, mass: f64, time: f64) -> Self {
        Self {
            peak_id,
            master_peak_id,
            mass,
            time,
            ..Default::default()
        }
    }

    pub fn is_monoisotopic(&self) -> bool {
        self.isotope_weight_number == 0
    }
}

impl PartialOrd for PeakFeature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.mass
                .total_cmp(&other.mass)
                .then(self.time.total_cmp(&other.time))
                .then(self.peak_id.cmp(&other.peak_id)),
        )
    }
}

impl CoordinateLike<Mass> for PeakFeature {
    fn coordinate(&self) -> f64 {
        self.mass
    }
}

impl CoordinateLike<Time> for PeakFeature {
    fn coordinate(&self) -> f64 {
        self.time
    }
}

const IDENTITY_KEY_LENGTH: usize = 27;
const IDENTITY_KEY_HYPHENS: [usize; 2] = [14, 25];

/// Check that `key` is syntactically a hashed structure key: 27
/// characters, a 14-character and a 10-character uppercase block and a
/// single trailing character separated by hyphens.
///
/// Features carrying a malformed key are excluded from identity
/// grouping; this is a data-quality condition, not an error.
pub fn is_well_formed_identity_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() != IDENTITY_KEY_LENGTH {
        return false;
    }
    bytes.iter().enumerate().all(|(i, b)| {
        if IDENTITY_KEY_HYPHENS.contains(&i) {
            *b == b'-'
        } else {
            b.is_ascii_uppercase()
        }
    })
}
