//! Circuit breaker registry for managing multiple circuit breakers

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::async_breaker::AsyncCircuitBreaker;
use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerStats, CircuitState};
use crate::call::ExecutionModel;
use crate::error::{ConfigResult, ConfigurationError};

/// Partition of the registry a breaker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    #[default]
    Production,
    Test,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// A registered breaker of either variant
#[derive(Debug, Clone)]
pub enum RegisteredBreaker {
    Blocking(Arc<CircuitBreaker>),
    NonBlocking(Arc<AsyncCircuitBreaker>),
}

impl RegisteredBreaker {
    pub fn name(&self) -> &str {
        match self {
            Self::Blocking(breaker) => breaker.name(),
            Self::NonBlocking(breaker) => breaker.name(),
        }
    }

    pub fn execution_model(&self) -> ExecutionModel {
        match self {
            Self::Blocking(_) => ExecutionModel::Blocking,
            Self::NonBlocking(_) => ExecutionModel::NonBlocking,
        }
    }

    pub async fn state(&self) -> CircuitState {
        match self {
            Self::Blocking(breaker) => breaker.state(),
            Self::NonBlocking(breaker) => breaker.state().await,
        }
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        match self {
            Self::Blocking(breaker) => breaker.stats(),
            Self::NonBlocking(breaker) => breaker.stats().await,
        }
    }

    /// Reset to closed; blocking breakers are reset directly
    pub async fn reset(&self) {
        match self {
            Self::Blocking(breaker) => breaker.reset(),
            Self::NonBlocking(breaker) => breaker.reset().await,
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    breaker: RegisteredBreaker,
    dimension: Dimension,
}

static GLOBAL: Lazy<Arc<CircuitBreakerRegistry>> =
    Lazy::new(|| Arc::new(CircuitBreakerRegistry::new()));

/// Collection of named circuit breakers, partitioned by [`Dimension`]
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Registration>,
    counter: Mutex<u64>,
    default_dimension: RwLock<Dimension>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry defaulting to the production dimension
    pub fn new() -> Self {
        Self::with_default_dimension(Dimension::Production)
    }

    pub fn with_default_dimension(dimension: Dimension) -> Self {
        Self {
            breakers: DashMap::new(),
            counter: Mutex::new(0),
            default_dimension: RwLock::new(dimension),
        }
    }

    /// Process-wide registry used when a decorator is given none
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Generate the next unique breaker name, `cb_<n>`
    pub fn next_name(&self) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("cb_{}", *counter)
    }

    pub fn default_dimension(&self) -> Dimension {
        *self.default_dimension.read()
    }

    pub fn set_default_dimension(&self, dimension: Dimension) {
        *self.default_dimension.write() = dimension;
    }

    /// Register subsequent breakers under [`Dimension::Test`] unless a
    /// decorator says otherwise
    pub fn set_test_mode(&self, enabled: bool) {
        self.set_default_dimension(if enabled {
            Dimension::Test
        } else {
            Dimension::Production
        });
    }

    /// Add a breaker; names are unique across dimensions
    pub fn register(
        &self,
        name: impl Into<String>,
        breaker: RegisteredBreaker,
        dimension: Dimension,
    ) -> ConfigResult<()> {
        let name = name.into();
        match self.breakers.entry(name) {
            Entry::Occupied(occupied) => {
                Err(ConfigurationError::DuplicateBreaker(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(
                    circuit = %vacant.key(),
                    %dimension,
                    model = %breaker.execution_model(),
                    "Registered circuit breaker"
                );
                vacant.insert(Registration { breaker, dimension });
                Ok(())
            }
        }
    }

    /// Look up a breaker registered in `dimension`
    pub fn get(&self, name: &str, dimension: Dimension) -> Option<RegisteredBreaker> {
        self.breakers
            .get(name)
            .filter(|entry| entry.dimension == dimension)
            .map(|entry| entry.breaker.clone())
    }

    /// Sorted names of all breakers in `dimension`
    pub fn list(&self, dimension: Dimension) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.dimension == dimension)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Get stats for all circuit breakers in `dimension`, sorted by name
    pub async fn all_stats(&self, dimension: Dimension) -> Vec<(String, CircuitBreakerStats)> {
        let mut results = Vec::new();
        for (name, breaker) in self.snapshot(dimension) {
            results.push((name, breaker.stats().await));
        }
        results
    }

    /// Reset every breaker in `dimension` to closed
    pub async fn reset_all(&self, dimension: Dimension) {
        let breakers = self.snapshot(dimension);
        for (_, breaker) in &breakers {
            breaker.reset().await;
        }
        tracing::info!(%dimension, count = breakers.len(), "Reset circuit breakers");
    }

    /// Clone handles out of the map so no shard lock is held across an await
    fn snapshot(&self, dimension: Dimension) -> Vec<(String, RegisteredBreaker)> {
        let mut breakers: Vec<(String, RegisteredBreaker)> = self
            .breakers
            .iter()
            .filter(|entry| entry.dimension == dimension)
            .map(|entry| (entry.key().clone(), entry.breaker.clone()))
            .collect();
        breakers.sort_by(|a, b| a.0.cmp(&b.0));
        breakers
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
