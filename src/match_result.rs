//! Reference-library match records and the confidence policies that rank them
use std::cmp::Ordering;

pub type ScoreType = f32;

/// A multi-factor similarity record between one peak feature and one
/// reference compound, produced upstream by a library search route.
///
/// Instances are immutable once attached to a feature; the engine treats
/// them as opaque, score-ranked records and delegates every confidence
/// judgement to a [`MatchResultEvaluator`].
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchResult {
    /// Which search route produced this record
    pub annotator_id: String,
    /// Precedence across routes when total scores tie, smaller wins
    pub priority: i32,
    /// The reference compound this record compares against
    pub reference_id: u64,
    pub is_precursor_mz_match: bool,
    pub is_spectrum_match: bool,
    pub is_time_match: bool,
    pub mass_similarity: ScoreType,
    pub time_similarity: ScoreType,
    pub spectrum_similarity: ScoreType,
    pub matched_peak_fraction: ScoreType,
    /// The ranking key summarizing the sub-scores
    pub total_score: ScoreType,
}

impl MatchResult {
    pub fn new(annotator_id: impl Into<String>, priority: i32, reference_id: u64, total_score: ScoreType) -> Self {
        Self {
            annotator_id: annotator_id.into(),
            priority,
            reference_id,
            total_score,
            ..Default::default()
        }
    }
}

/// A stateless policy classifying and ranking [`MatchResult`] records.
///
/// Workflows with different confidence requirements swap the policy
/// without touching the estimation engine. The crate ships no default
/// policy; the consuming pipeline injects one per run.
pub trait MatchResultEvaluator {
    /// Is this a confirmed-route annotation, eligible to seed linkage?
    fn is_reference_matched(&self, result: &MatchResult) -> bool;

    /// Is this a lower-confidence match worth reporting but not strong
    /// enough to seed linkage?
    fn is_annotation_suggested(&self, result: &MatchResult) -> bool;

    /// Pick the best record by total score. Ties prefer the smaller
    /// `priority` value, then the earlier record in input order.
    fn select_top_hit<'a>(&self, results: &'a [MatchResult]) -> Option<&'a MatchResult> {
        results.iter().reduce(|best, candidate| {
            match candidate.total_score.partial_cmp(&best.total_score) {
                Some(Ordering::Greater) => candidate,
                Some(Ordering::Equal) if candidate.priority < best.priority => candidate,
                _ => best,
            }
        })
    }

    /// All records that pass [`MatchResultEvaluator::is_reference_matched`],
    /// in input order.
    fn select_reference_matched<'a>(&self, results: &'a [MatchResult]) -> Vec<&'a MatchResult> {
        results
            .iter()
            .filter(|r| self.is_reference_matched(r))
            .collect()
    }

    /// All records whose total score reaches `threshold`, in input order.
    fn filter_by_threshold<'a>(
        &self,
        results: &'a [MatchResult],
        threshold: ScoreType,
    ) -> Vec<&'a MatchResult> {
        results
            .iter()
            .filter(|r| r.total_score >= threshold)
            .collect()
    }
}
