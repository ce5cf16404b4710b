//! Rating service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::UserRating;

use super::{Dependency, OperationKey};
use crate::error::SagaError;

/// Highest rating a user can reach.
pub const MAX_STARS: i32 = 100;

/// Stars a user starts with when first seen.
pub const DEFAULT_STARS: i32 = 1;

/// Per-user star ratings, which cap how many books a user may hold.
#[async_trait]
pub trait RatingService: Send + Sync {
    async fn get(&self, username: &str) -> Result<UserRating, SagaError>;

    /// Adds `delta` to the user's stars, clamped to `0..=MAX_STARS`.
    ///
    /// Applied at most once per `key`.
    async fn apply_delta(
        &self,
        username: &str,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryRatingState {
    stars: HashMap<String, i32>,
    applied: HashSet<String>,
    unavailable: bool,
    updates_unavailable: usize,
    updates: usize,
}

/// In-memory rating service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRatingService {
    state: Arc<RwLock<InMemoryRatingState>>,
}

impl InMemoryRatingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`set_stars`](Self::set_stars).
    pub fn with_user(self, username: &str, stars: i32) -> Self {
        self.set_stars(username, stars);
        self
    }

    pub fn set_stars(&self, username: &str, stars: i32) {
        self.write()
            .stars
            .insert(username.to_string(), stars.clamp(0, MAX_STARS));
    }

    /// Current stars, or [`DEFAULT_STARS`] for an unknown user.
    pub fn stars(&self, username: &str) -> i32 {
        self.read()
            .stars
            .get(username)
            .copied()
            .unwrap_or(DEFAULT_STARS)
    }

    /// Makes every call fail as if the rating service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Makes the next `times` rating updates fail as unavailable.
    pub fn fail_next_updates(&self, times: usize) {
        self.write().updates_unavailable = times;
    }

    /// Number of rating updates actually applied.
    pub fn updates(&self) -> usize {
        self.read().updates
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryRatingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryRatingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RatingService for InMemoryRatingService {
    async fn get(&self, username: &str) -> Result<UserRating, SagaError> {
        let state = self.read();
        if state.unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Rating));
        }
        let stars = state.stars.get(username).copied().unwrap_or(DEFAULT_STARS);
        Ok(UserRating { stars })
    }

    async fn apply_delta(
        &self,
        username: &str,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError> {
        let mut state = self.write();
        if state.unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Rating));
        }
        if state.updates_unavailable > 0 {
            state.updates_unavailable -= 1;
            return Err(SagaError::ServiceUnavailable(Dependency::Rating));
        }
        if !state.applied.insert(key.as_str().to_string()) {
            return Ok(());
        }

        let stars = state
            .stars
            .entry(username.to_string())
            .or_insert(DEFAULT_STARS);
        *stars = (*stars + delta).clamp(0, MAX_STARS);
        state.updates += 1;
        Ok(())
    }
}
