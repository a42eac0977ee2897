//! High level APIs for estimating peak characters across a feature batch
use itertools::Itertools;
use mzpeaks::{
    coordinate::{SimpleInterval, Span1D},
    prelude::*,
    Tolerance,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::feature::{is_well_formed_identity_key, LinkKind, PeakFeature, PeakLink};
use crate::match_result::MatchResultEvaluator;
use crate::spatial::{SpatialIndex, SpatialIndexError};
use crate::spectrum::SpectrumSource;

/// The mass difference between isotopes `C[13]` and `C[12]`. Not precisely
/// universal, but the majority of expected applications are carbon-based
pub const NEUTRON_SHIFT: f64 = 1.0033548378;

/// An error that might occur while estimating peak characters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CharacterEstimationError {
    #[error("The mass tolerance magnitude must be finite and non-negative, got {0}")]
    InvalidMassTolerance(f64),
    #[error("The time tolerance must be finite and non-negative, got {0}")]
    InvalidTimeTolerance(f64),
    #[error(transparent)]
    IndexError(#[from] SpatialIndexError),
}

/// A closed mass and time window restricting which features one
/// estimation run touches, so a large run can be processed as
/// independent chunks.
///
/// An inverted window selects nothing, which makes the run a no-op
/// rather than an error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkWindow {
    pub mass: SimpleInterval<f64>,
    pub time: SimpleInterval<f64>,
}

impl ChunkWindow {
    pub fn new(mass: SimpleInterval<f64>, time: SimpleInterval<f64>) -> Self {
        Self { mass, time }
    }

    pub fn contains(&self, feature: &PeakFeature) -> bool {
        self.mass.contains(&feature.mass) && self.time.contains(&feature.time)
    }
}

/// The run parameters for one estimation invocation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacterEstimationParams {
    /// The mass accuracy constraint for matching an isotope satellite to
    /// a monoisotopic peak
    pub mass_tolerance: Tolerance,
    /// How far apart in retention time, in minutes, two related peaks
    /// may elute
    pub time_tolerance: f64,
    /// The candidate isotope mass offsets to probe below each satellite.
    /// An empty list skips the isotope pass entirely.
    pub isotope_shifts: Vec<f64>,
    /// Restrict the run to one mass/time window, if set
    pub chunk: Option<ChunkWindow>,
}

impl Default for CharacterEstimationParams {
    fn default() -> Self {
        Self {
            mass_tolerance: Tolerance::Da(0.01),
            time_tolerance: 0.1,
            isotope_shifts: (1..=3).map(|k| k as f64 * NEUTRON_SHIFT).collect(),
            chunk: None,
        }
    }
}

/// Decide which peaks in a feature batch are chemically related and
/// record the relationships in each feature's character.
///
/// Two linking passes run over the batch. The first groups confirmed,
/// monoisotopic, identity-keyed features and marks each group as adduct
/// ions of one neutral compound under a deterministic parent. The second
/// builds a spatial index over the confirmed peaks and attaches nearby
/// isotope-weighted satellites to them.
///
/// # Arguments
/// - `features`: The feature batch to annotate; only each feature's
///   [`PeakCharacter`](crate::feature::PeakCharacter) is mutated
/// - `source`: The spectrum store collaborator, consulted once per
///   satellite candidate ahead of the search loop
/// - `evaluator`: The confidence policy deciding which match results
///   may seed linkage
/// - `params`: Tolerances, isotope shifts and the optional chunk window
///
/// # Note
/// Data-quality problems (malformed identity keys, features without a
/// confirmed match, satellites whose spectrum cannot be loaded) never
/// fail the batch; those features are simply left unlinked. Only
/// precondition violations error.
///
/// Re-running over an already-linked batch reproduces the identical
/// character state, and every link edge written is reciprocal.
pub fn estimate_characters<S: SpectrumSource, E: MatchResultEvaluator>(
    features: &mut [PeakFeature],
    source: &S,
    evaluator: &E,
    params: &CharacterEstimationParams,
) -> Result<(), CharacterEstimationError> {
    PeakCharacterEstimator::new(source, evaluator, params)?.estimate(features)
}

/// The estimation engine behind [`estimate_characters`].
///
/// Nothing in the engine suspends or blocks; one invocation is
/// synchronous and single-threaded because a linking decision needs a
/// complete view of its identity group. Callers that want parallelism
/// run independent chunk windows on separate workers.
#[derive(Debug)]
pub struct PeakCharacterEstimator<'a, S: SpectrumSource, E: MatchResultEvaluator> {
    source: &'a S,
    evaluator: &'a E,
    params: &'a CharacterEstimationParams,
}

impl<'a, S: SpectrumSource, E: MatchResultEvaluator> PeakCharacterEstimator<'a, S, E> {
    /// Create an engine over the given collaborators, failing fast if
    /// `params` violates a precondition.
    pub fn new(
        source: &'a S,
        evaluator: &'a E,
        params: &'a CharacterEstimationParams,
    ) -> Result<Self, CharacterEstimationError> {
        let magnitude = params.mass_tolerance.tol();
        if !(magnitude.is_finite() && magnitude >= 0.0) {
            return Err(CharacterEstimationError::InvalidMassTolerance(magnitude));
        }
        if !(params.time_tolerance.is_finite() && params.time_tolerance >= 0.0) {
            return Err(CharacterEstimationError::InvalidTimeTolerance(
                params.time_tolerance,
            ));
        }
        Ok(Self {
            source,
            evaluator,
            params,
        })
    }

    /// Run both linking passes over `features`.
    pub fn estimate(&self, features: &mut [PeakFeature]) -> Result<(), CharacterEstimationError> {
        let confirmed = self.assign_adduct_links(features);
        self.assign_isotope_links(features, &confirmed)
    }

    fn in_chunk(&self, feature: &PeakFeature) -> bool {
        self.params
            .chunk
            .map(|window| window.contains(feature))
            .unwrap_or(true)
    }

    fn is_reference_confirmed(&self, feature: &PeakFeature) -> bool {
        feature
            .match_results
            .iter()
            .any(|r| self.evaluator.is_reference_matched(r))
    }

    /// Group confirmed monoisotopic features by identity key and link
    /// each group of two or more as adducts of one neutral compound.
    ///
    /// The group member with the lowest peak id becomes the adduct
    /// parent; every member, parent included, records it. Returns the
    /// positions of every feature confirmed by this pass, for the
    /// isotope pass to index.
    fn assign_adduct_links(&self, features: &mut [PeakFeature]) -> Vec<usize> {
        let mut keyed: Vec<(String, usize)> = Vec::new();
        for (i, feature) in features.iter().enumerate() {
            if !self.in_chunk(feature) || !feature.is_monoisotopic() {
                continue;
            }
            if !self.is_reference_confirmed(feature) {
                continue;
            }
            if !is_well_formed_identity_key(&feature.identity_key) {
                debug!(
                    "Skipping malformed identity key {:?} on peak {}",
                    feature.identity_key, feature.peak_id
                );
                continue;
            }
            keyed.push((feature.identity_key.clone(), i));
        }

        let mut confirmed = Vec::new();
        let groups = keyed.into_iter().into_group_map();
        for (key, mut members) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            if members.len() < 2 {
                continue;
            }
            members.sort_unstable_by_key(|&i| features[i].peak_id);
            let parent = members[0];
            let parent_id = features[parent].peak_id;
            for &member in &members[1..] {
                let member_id = features[member].peak_id;
                features[parent]
                    .character
                    .add_link(PeakLink::new(member_id, LinkKind::Adduct));
                features[member]
                    .character
                    .add_link(PeakLink::new(parent_id, LinkKind::Adduct));
            }
            for &member in &members {
                let character = &mut features[member].character;
                character.is_linked = true;
                character.adduct_parent = Some(parent_id);
            }
            trace!(
                "Linked {} adduct peaks of {key} under parent peak {parent_id}",
                members.len()
            );
            confirmed.extend(members);
        }
        confirmed
    }

    /// Attach isotope-weighted satellites to the peaks the adduct pass
    /// confirmed.
    ///
    /// The confirmed peaks are indexed over (mass, time) once, and every
    /// satellite candidate probes the index at each configured isotope
    /// shift below its own mass. Satellite spectra are loaded one time
    /// each before the search loop; a candidate whose spectrum fails to
    /// load, or is empty, is dropped from consideration.
    fn assign_isotope_links(
        &self,
        features: &mut [PeakFeature],
        confirmed: &[usize],
    ) -> Result<(), CharacterEstimationError> {
        if confirmed.is_empty() || self.params.isotope_shifts.is_empty() {
            return Ok(());
        }
        let satellites: Vec<usize> = features
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                self.in_chunk(f) && !f.is_monoisotopic() && !self.is_reference_confirmed(f)
            })
            .map(|(i, _)| i)
            .collect();

        let mut usable = Vec::with_capacity(satellites.len());
        for &satellite in &satellites {
            let feature = &features[satellite];
            match self.source.load_by_key(feature.master_peak_id) {
                Ok(spectrum) if !spectrum.is_empty() => usable.push(satellite),
                Ok(_) => debug!(
                    "Stored spectrum for satellite peak {} is empty, leaving it unlinked",
                    feature.peak_id
                ),
                Err(e) => debug!(
                    "Could not load the spectrum for satellite peak {}: {e}",
                    feature.peak_id
                ),
            }
        }
        if usable.is_empty() {
            return Ok(());
        }

        let index = SpatialIndex::build(
            confirmed.to_vec(),
            |i: &usize| features[*i].mass,
            |i: &usize| features[*i].time,
        )?;
        let time_tolerance = self.params.time_tolerance;
        for satellite in usable {
            let (satellite_id, satellite_mass, satellite_time) = {
                let f = &features[satellite];
                (f.peak_id, f.mass, f.time)
            };
            for shift in self.params.isotope_shifts.iter().copied() {
                let expected_mass = satellite_mass - shift;
                let (mass_lower, mass_upper) = self.params.mass_tolerance.bounds(expected_mass);
                let parents: Vec<usize> = index
                    .range_search(
                        (mass_lower, satellite_time - time_tolerance),
                        (mass_upper, satellite_time + time_tolerance),
                    )
                    .into_iter()
                    .copied()
                    .collect();
                for parent in parents {
                    let parent_id = features[parent].peak_id;
                    features[parent]
                        .character
                        .add_link(PeakLink::new(satellite_id, LinkKind::Isotope));
                    let character = &mut features[satellite].character;
                    character.add_link(PeakLink::new(parent_id, LinkKind::Isotope));
                    character.is_linked = true;
                    trace!(
                        "Linked isotope satellite peak {satellite_id} to monoisotopic peak {parent_id}"
                    );
                }
            }
        }
        Ok(())
    }
}
