//! The load-by-key contract for the spectrum store collaborator
use std::cell::RefCell;
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;
use mzpeaks::{CentroidPeak, MZPeakSetType};
use thiserror::Error;

/// An error that might occur while loading a stored spectrum
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumLoadError {
    #[error("No spectrum is stored under key {0}")]
    KeyNotFound(u64),
    #[error("The spectrum store format version {0} is not supported")]
    UnsupportedFormatVersion(u8),
    #[error("The spectrum store could not be read: {0}")]
    Unreadable(String),
}

/// Random-access retrieval of deconvolved spectra by their run-scoped
/// key.
///
/// Implementations are expected to be amortized O(1) per load, the way a
/// store fronted by a seek-pointer table built once per file behaves.
/// The store's binary layout is not this crate's concern, only this
/// contract. A failed load is fatal only for the one feature being
/// considered; the estimation engine skips that feature and continues
/// the batch.
pub trait SpectrumSource {
    fn load_by_key(&self, key: u64) -> Result<MZPeakSetType<CentroidPeak>, SpectrumLoadError>;
}

impl<S: SpectrumSource> SpectrumSource for &S {
    fn load_by_key(&self, key: u64) -> Result<MZPeakSetType<CentroidPeak>, SpectrumLoadError> {
        (*self).load_by_key(key)
    }
}

/// A wrapper around any [`SpectrumSource`] that memoizes load results by
/// key, so repeated probes of the same satellite during a search pass
/// cost one underlying load at most.
///
/// Failures are memoized too; a key that could not be read once is not
/// retried. The cache uses interior mutability and is intended for the
/// engine's single-threaded invocation model; it is not for sharing
/// across threads.
#[derive(Debug)]
pub struct CachingSpectrumSource<S: SpectrumSource> {
    inner: S,
    cache: RefCell<
        HashMap<u64, Result<MZPeakSetType<CentroidPeak>, SpectrumLoadError>, BuildIdentityHasher<u64>>,
    >,
}

impl<S: SpectrumSource> CachingSpectrumSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SpectrumSource> SpectrumSource for CachingSpectrumSource<S> {
    fn load_by_key(&self, key: u64) -> Result<MZPeakSetType<CentroidPeak>, SpectrumLoadError> {
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }
        let loaded = self.inner.load_by_key(key);
        self.cache.borrow_mut().insert(key, loaded.clone());
        loaded
    }
}

/// An id-keyed in-memory source, suitable for tests and for batches
/// whose spectra were pre-fetched before estimation begins.
#[derive(Debug, Default, Clone)]
pub struct MemorySpectrumSource {
    spectra: HashMap<u64, MZPeakSetType<CentroidPeak>, BuildIdentityHasher<u64>>,
}

impl MemorySpectrumSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u64, spectrum: MZPeakSetType<CentroidPeak>) {
        self.spectra.insert(key, spectrum);
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

impl SpectrumSource for MemorySpectrumSource {
    fn load_by_key(&self, key: u64) -> Result<MZPeakSetType<CentroidPeak>, SpectrumLoadError> {
        self.spectra
            .get(&key)
            .cloned()
            .ok_or(SpectrumLoadError::KeyNotFound(key))
    }
}
