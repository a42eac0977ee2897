//! `mzlink` decides which chromatographic peak features in a batch are
//! chemically related: alternate adduct ions of one neutral compound, or
//! isotopologue satellites of one ion. The relationship edges it writes
//! into each feature's character record let downstream steps collapse
//! redundant peaks into a single compound record.
//!
//! The decision machinery is deliberately policy-free: a
//! [`MatchResultEvaluator`] injected per run decides which
//! reference-library matches are trustworthy enough to seed linkage, and
//! a [`SpectrumSource`] collaborator supplies stored spectra by key.
pub mod aggregate;
pub mod estimator;
pub mod feature;
pub mod match_result;
pub mod spatial;
pub mod spectrum;

pub use crate::aggregate::RangeAggregator;
pub use crate::estimator::{
    estimate_characters, CharacterEstimationError, CharacterEstimationParams, ChunkWindow,
    PeakCharacterEstimator, NEUTRON_SHIFT,
};
pub use crate::feature::{
    is_well_formed_identity_key, LinkKind, PeakCharacter, PeakFeature, PeakLink,
};
pub use crate::match_result::{MatchResult, MatchResultEvaluator, ScoreType};
pub use crate::spatial::{SpatialIndex, SpatialIndexError};
pub use crate::spectrum::{
    CachingSpectrumSource, MemorySpectrumSource, SpectrumLoadError, SpectrumSource,
};
