//! The replicated application state.
//!
//! State is written only by the [`Router`](crate::Router), one whole
//! mutation at a time. Everything else, continuations included, reads it
//! through a [`StateReader`].

use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// Application state that the router can mutate.
pub trait AppState: Send + Sync + 'static {
    /// A whole state transition.
    type Mutation: Debug + Send + 'static;

    fn apply(&mut self, mutation: Self::Mutation);
}

/// Write side of the state; owned by the router.
pub(crate) struct StateStore<S> {
    inner: Arc<RwLock<S>>,
}

impl<S: AppState> StateStore<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub(crate) fn apply(&self, mutation: S::Mutation) {
        tracing::trace!(?mutation, "RPC: applying mutation");
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.apply(mutation);
    }

    pub(crate) fn reader(&self) -> StateReader<S> {
        StateReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only, cloneable view of the state.
pub struct StateReader<S> {
    inner: Arc<RwLock<S>>,
}

impl<S> Clone for StateReader<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> StateReader<S> {
    /// Run `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.read(S::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Tally(i64);

    impl AppState for Tally {
        type Mutation = i64;

        fn apply(&mut self, mutation: i64) {
            self.0 += mutation;
        }
    }

    #[test]
    fn test_reader_sees_applied_mutations() {
        let store = StateStore::new(Tally::default());
        let reader = store.reader();
        store.apply(5);
        store.apply(-2);
        assert_eq!(reader.read(|t| t.0), 3);
        assert_eq!(reader.clone().snapshot().0, 3);
    }
}
