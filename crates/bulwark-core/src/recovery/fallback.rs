//! Fallback chains
//!
//! A chain holds alternates sharing the primary's signature. The primary runs
//! first, then each alternate in order; the first success wins. When every
//! call fails the error of the last one tried is returned.

use std::fmt;
use std::sync::Arc;

use crate::call::{
    AsyncCallable, AsyncFn, Blocking, BlockingFn, Callable, ExecutionModel, Metadata, Model,
    NonBlocking, Target,
};
use crate::error::{ConfigResult, ConfigurationError};

type DynCallable<A, T, E> = Arc<dyn Callable<A, Output = T, Error = E>>;
type DynAsyncCallable<A, T, E> = Arc<dyn AsyncCallable<A, Output = T, Error = E>>;

/// A fallback of either execution model, before it is placed in a chain
pub enum Alternate<A, T, E> {
    Blocking {
        callable: DynCallable<A, T, E>,
        metadata: Metadata,
    },
    NonBlocking {
        callable: DynAsyncCallable<A, T, E>,
        metadata: Metadata,
    },
}

impl<A, T, E> Alternate<A, T, E> {
    /// Wrap a blocking target, decorated or not
    pub fn blocking<C>(callable: C) -> Self
    where
        C: Callable<A, Output = T, Error = E> + Target + 'static,
    {
        let metadata = callable.metadata().clone();
        Self::Blocking {
            callable: Arc::new(callable),
            metadata,
        }
    }

    /// Wrap a non-blocking target, decorated or not
    pub fn non_blocking<C>(callable: C) -> Self
    where
        C: AsyncCallable<A, Output = T, Error = E> + Target + 'static,
    {
        let metadata = callable.metadata().clone();
        Self::NonBlocking {
            callable: Arc::new(callable),
            metadata,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Blocking { metadata, .. } | Self::NonBlocking { metadata, .. } => metadata,
        }
    }

    pub fn execution_model(&self) -> ExecutionModel {
        match self {
            Self::Blocking { .. } => ExecutionModel::Blocking,
            Self::NonBlocking { .. } => ExecutionModel::NonBlocking,
        }
    }
}

impl<A, T, E, F> From<BlockingFn<F>> for Alternate<A, T, E>
where
    BlockingFn<F>: Callable<A, Output = T, Error = E> + 'static,
{
    fn from(callable: BlockingFn<F>) -> Self {
        Self::blocking(callable)
    }
}

impl<A, T, E, F> From<AsyncFn<F>> for Alternate<A, T, E>
where
    AsyncFn<F>: AsyncCallable<A, Output = T, Error = E> + 'static,
{
    fn from(callable: AsyncFn<F>) -> Self {
        Self::non_blocking(callable)
    }
}

impl<A, T, E> fmt::Debug for Alternate<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternate")
            .field("model", &self.execution_model())
            .field("metadata", self.metadata())
            .finish()
    }
}

/// Fallback chain for blocking callables
pub struct FallbackChain<A, T, E> {
    alternates: Vec<(DynCallable<A, T, E>, Metadata)>,
}

impl<A, T, E> FallbackChain<A, T, E> {
    pub fn new() -> Self {
        Self {
            alternates: Vec::new(),
        }
    }

    /// Append an alternate; alternates are tried in insertion order
    pub fn add_fallback<C>(&mut self, callable: C) -> &mut Self
    where
        C: Callable<A, Output = T, Error = E> + Target + 'static,
    {
        let metadata = callable.metadata().clone();
        self.alternates.push((Arc::new(callable), metadata));
        self
    }

    pub fn len(&self) -> usize {
        self.alternates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternates.is_empty()
    }

    /// Names of the alternates, in the order they are tried
    pub fn names(&self) -> Vec<&str> {
        self.alternates.iter().map(|(_, meta)| meta.name()).collect()
    }

    /// Run `primary`, falling back through the alternates on failure
    pub fn execute<P>(&self, primary: &P, args: A) -> Result<T, E>
    where
        P: Callable<A, Output = T, Error = E> + ?Sized,
        A: Clone,
    {
        let mut last_error = match primary.call(args.clone()) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        for (callable, metadata) in &self.alternates {
            tracing::debug!(fallback = metadata.name(), "Trying fallback");
            match callable.call(args.clone()) {
                Ok(value) => return Ok(value),
                Err(error) => last_error = error,
            }
        }

        tracing::debug!(tried = self.alternates.len() + 1, "Fallback chain exhausted");
        Err(last_error)
    }
}

impl<A, T, E> Default for FallbackChain<A, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, T, E> fmt::Debug for FallbackChain<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChain")
            .field("alternates", &self.names())
            .finish()
    }
}

/// Fallback chain for non-blocking callables
pub struct AsyncFallbackChain<A, T, E> {
    alternates: Vec<(DynAsyncCallable<A, T, E>, Metadata)>,
}

impl<A, T, E> AsyncFallbackChain<A, T, E> {
    pub fn new() -> Self {
        Self {
            alternates: Vec::new(),
        }
    }

    pub fn add_fallback<C>(&mut self, callable: C) -> &mut Self
    where
        C: AsyncCallable<A, Output = T, Error = E> + Target + 'static,
    {
        let metadata = callable.metadata().clone();
        self.alternates.push((Arc::new(callable), metadata));
        self
    }

    pub fn len(&self) -> usize {
        self.alternates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternates.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.alternates.iter().map(|(_, meta)| meta.name()).collect()
    }

    /// Await `primary`, falling back through the alternates on failure
    pub async fn execute<P>(&self, primary: &P, args: A) -> Result<T, E>
    where
        P: AsyncCallable<A, Output = T, Error = E> + ?Sized,
        A: Clone,
    {
        let mut last_error = match primary.call(args.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        for (callable, metadata) in &self.alternates {
            tracing::debug!(fallback = metadata.name(), "Trying fallback");
            match callable.call(args.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => last_error = error,
            }
        }

        tracing::debug!(tried = self.alternates.len() + 1, "Fallback chain exhausted");
        Err(last_error)
    }
}

impl<A, T, E> Default for AsyncFallbackChain<A, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, T, E> fmt::Debug for AsyncFallbackChain<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFallbackChain")
            .field("alternates", &self.names())
            .finish()
    }
}

/// Builds the chain variant matching a primary's execution model.
///
/// Every alternate must share the primary's model; the first one that does not
/// is reported as [`ConfigurationError::ExecutionModelMismatch`].
pub trait BuildChain<A, T, E>: Model {
    type Chain: Send + Sync + 'static;

    fn build_chain(
        primary: &Metadata,
        alternates: Vec<Alternate<A, T, E>>,
    ) -> ConfigResult<Self::Chain>;
}

fn mismatch<A, T, E>(
    primary: &Metadata,
    model: ExecutionModel,
    alternate: &Alternate<A, T, E>,
) -> ConfigurationError {
    ConfigurationError::model_mismatch(
        primary.name(),
        model,
        alternate.metadata().name(),
        alternate.execution_model(),
    )
}

impl<A, T, E> BuildChain<A, T, E> for Blocking
where
    A: 'static,
    T: 'static,
    E: 'static,
{
    type Chain = FallbackChain<A, T, E>;

    fn build_chain(
        primary: &Metadata,
        alternates: Vec<Alternate<A, T, E>>,
    ) -> ConfigResult<Self::Chain> {
        let mut chain = FallbackChain::new();
        for alternate in alternates {
            match alternate {
                Alternate::Blocking { callable, metadata } => {
                    chain.alternates.push((callable, metadata));
                }
                other => return Err(mismatch(primary, Self::KIND, &other)),
            }
        }
        Ok(chain)
    }
}

impl<A, T, E> BuildChain<A, T, E> for NonBlocking
where
    A: 'static,
    T: 'static,
    E: 'static,
{
    type Chain = AsyncFallbackChain<A, T, E>;

    fn build_chain(
        primary: &Metadata,
        alternates: Vec<Alternate<A, T, E>>,
    ) -> ConfigResult<Self::Chain> {
        let mut chain = AsyncFallbackChain::new();
        for alternate in alternates {
            match alternate {
                Alternate::NonBlocking { callable, metadata } => {
                    chain.alternates.push((callable, metadata));
                }
                other => return Err(mismatch(primary, Self::KIND, &other)),
            }
        }
        Ok(chain)
    }
}
