//! Last-request-wins bookkeeping for network calls whose results re-enter the
//! store asynchronously.
//!
//! Each [`RequestClass`] owns one source. Issuing a token cancels whatever
//! token of the same class was outstanding. Cancellation is cooperative: the
//! request keeps running, and whoever applies its result checks
//! [`CancellationManager::is_current`] first.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Pattern geometry for a freshly selected route.
    Pattern,
    /// A page of the route catalog.
    Search,
}

#[derive(Debug, Clone)]
pub struct RequestToken {
    class: RequestClass,
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl RequestToken {
    pub fn class(&self) -> RequestClass {
        self.class
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lets an in-flight request stop early. Never required for correctness.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct CancellationSource {
    generation: u64,
    outstanding: Option<Arc<AtomicBool>>,
}

impl CancellationSource {
    fn cancel(&mut self) {
        if let Some(flag) = self.outstanding.take() {
            flag.store(true, Ordering::Release);
        }
    }

    fn issue(&mut self, class: RequestClass) -> RequestToken {
        self.cancel();
        self.generation += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.outstanding = Some(cancelled.clone());
        RequestToken {
            class,
            generation: self.generation,
            cancelled,
        }
    }
}

#[derive(Default)]
pub struct CancellationManager {
    sources: FxHashMap<RequestClass, CancellationSource>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Voids the outstanding token of `class` and returns a fresh one.
    pub fn issue(&mut self, class: RequestClass) -> RequestToken {
        self.sources.entry(class).or_default().issue(class)
    }

    pub fn cancel(&mut self, class: RequestClass) {
        if let Some(source) = self.sources.get_mut(&class) {
            source.cancel();
        }
    }

    /// True while `token` is the latest of its class and was not cancelled.
    pub fn is_current(&self, token: &RequestToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        self.sources
            .get(&token.class)
            .map_or(false, |source| source.generation == token.generation)
    }

    /// Marks `token` as finished so a later `cancel` does not touch it.
    pub fn settle(&mut self, token: &RequestToken) {
        if !self.is_current(token) {
            return;
        }
        if let Some(source) = self.sources.get_mut(&token.class) {
            source.outstanding = None;
        }
    }

    /// Whether a request of `class` is issued and not yet settled.
    pub fn in_flight(&self, class: RequestClass) -> bool {
        self.sources
            .get(&class)
            .map_or(false, |source| source.outstanding.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_token_wins() {
        let mut manager = CancellationManager::new();
        let first = manager.issue(RequestClass::Pattern);
        let second = manager.issue(RequestClass::Pattern);

        assert!(first.is_cancelled());
        assert!(!manager.is_current(&first));
        assert!(manager.is_current(&second));
    }

    #[test]
    fn classes_are_independent() {
        let mut manager = CancellationManager::new();
        let pattern = manager.issue(RequestClass::Pattern);
        let search = manager.issue(RequestClass::Search);
        manager.cancel(RequestClass::Search);

        assert!(manager.is_current(&pattern));
        assert!(!manager.is_current(&search));
        assert!(manager.in_flight(RequestClass::Pattern));
        assert!(!manager.in_flight(RequestClass::Search));
    }

    #[test]
    fn settled_token_survives_later_cancel() {
        let mut manager = CancellationManager::new();
        let token = manager.issue(RequestClass::Pattern);
        manager.settle(&token);
        assert!(!manager.in_flight(RequestClass::Pattern));

        manager.cancel(RequestClass::Pattern);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_without_issue_is_harmless() {
        let mut manager = CancellationManager::new();
        manager.cancel(RequestClass::Pattern);
        let token = manager.issue(RequestClass::Pattern);
        assert_eq!(token.generation(), 1);
        assert_eq!(token.class(), RequestClass::Pattern);
    }
}
