//! Session cookie allocation.
//!
//! A [`CookieJar`] hands out nonzero cookies that are not currently held by
//! any connection sharing the jar. Endpoints on the same node should share
//! one jar so that their incoming cookies never collide.

use crate::error::{ProtocolError, Result};
use crate::protocol::types::Cookie;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug)]
struct JarState {
    rng: StdRng,
    in_use: HashSet<Cookie>,
}

/// Cloneable handle to a shared cookie allocator.
#[derive(Debug, Clone)]
pub struct CookieJar {
    inner: Arc<Mutex<JarState>>,
}

impl CookieJar {
    /// Seeds the allocator from OS entropy.
    pub fn new() -> Result<Self> {
        let seed = getrandom::u64()
            .map_err(|e| ProtocolError::Custom(format!("Failed to seed cookie jar: {e}")))?;
        Ok(Self::with_seed(seed))
    }

    /// Deterministic allocator for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(JarState {
                rng: StdRng::seed_from_u64(seed),
                in_use: HashSet::new(),
            })),
        }
    }

    /// Draws a fresh cookie that is neither zero nor currently held.
    pub fn allocate(&self) -> Result<Cookie> {
        let mut state = self.inner.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        loop {
            let candidate = state.rng.random::<u64>();
            if let Some(cookie) = Cookie::new(candidate) {
                if state.in_use.insert(cookie) {
                    trace!(%cookie, "Cookie allocated");
                    return Ok(cookie);
                }
            }
        }
    }

    /// Returns a cookie to the pool. False if it was not held.
    pub fn release(&self, cookie: Cookie) -> bool {
        self.state().in_use.remove(&cookie)
    }

    pub fn is_in_use(&self, cookie: Cookie) -> bool {
        self.state().in_use.contains(&cookie)
    }

    /// Number of cookies currently held.
    pub fn in_use(&self) -> usize {
        self.state().in_use.len()
    }

    // Release runs during teardown, where a poisoned set is still usable.
    fn state(&self) -> MutexGuard<'_, JarState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_unique() {
        let jar = CookieJar::with_seed(7);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(jar.allocate().unwrap()));
        }
        assert_eq!(jar.in_use(), 1000);
    }

    #[test]
    fn test_release_returns_cookie() {
        let jar = CookieJar::with_seed(1);
        let cookie = jar.allocate().unwrap();
        assert!(jar.is_in_use(cookie));
        assert!(jar.release(cookie));
        assert!(!jar.is_in_use(cookie));
        assert!(!jar.release(cookie));
        assert_eq!(jar.in_use(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let jar = CookieJar::with_seed(3);
        let other = jar.clone();
        let cookie = jar.allocate().unwrap();
        assert!(other.is_in_use(cookie));
    }

    #[test]
    fn test_entropy_seeded_jar() {
        let jar = CookieJar::new().unwrap();
        assert_ne!(jar.allocate().unwrap(), jar.allocate().unwrap());
    }
}
