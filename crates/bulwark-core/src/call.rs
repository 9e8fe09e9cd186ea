//! Callables and execution models
//!
//! Everything bulwark wraps is a [`Target`]: a callable with identity
//! [`Metadata`] and a type-level execution model. Blocking targets implement
//! [`Callable`], non-blocking ones implement [`AsyncCallable`]. The model is
//! fixed by the innermost function and carried through every wrapper, so the
//! choice between the two code paths is made once, at decoration time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::clock::TimeSource;
use crate::recovery::circuit_breaker::{
    AsyncCircuitBreaker, CircuitBreaker, CircuitBreakerConfig, RegisteredBreaker,
};
use crate::recovery::ErrorKinds;

/// Whether a callable blocks its thread or yields to a cooperative scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// Runs to completion on the calling thread
    Blocking,
    /// Returns a future driven by an async runtime
    NonBlocking,
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// Identity of a wrapped function, preserved by every decorator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    doc: Option<String>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
        }
    }

    /// Attach documentation text
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// A blocking callable taking `A` and producing `Result<Output, Error>`
pub trait Callable<A>: Send + Sync {
    type Output;
    type Error;

    fn call(&self, args: A) -> Result<Self::Output, Self::Error>;
}

/// A non-blocking callable taking `A` and resolving to `Result<Output, Error>`
pub trait AsyncCallable<A>: Send + Sync {
    type Output;
    type Error;

    fn call(&self, args: A) -> BoxFuture<'_, Result<Self::Output, Self::Error>>;
}

impl<A, C> Callable<A> for Arc<C>
where
    C: Callable<A> + ?Sized,
{
    type Output = C::Output;
    type Error = C::Error;

    fn call(&self, args: A) -> Result<Self::Output, Self::Error> {
        (**self).call(args)
    }
}

impl<A, C> AsyncCallable<A> for Arc<C>
where
    C: AsyncCallable<A> + ?Sized,
{
    type Output = C::Output;
    type Error = C::Error;

    fn call(&self, args: A) -> BoxFuture<'_, Result<Self::Output, Self::Error>> {
        (**self).call(args)
    }
}

/// Something a decorator can wrap
pub trait Target {
    /// Execution model of the innermost function
    type Model: Model;

    fn metadata(&self) -> &Metadata;

    fn execution_model(&self) -> ExecutionModel {
        <Self::Model as Model>::KIND
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Blocking {}
    impl Sealed for super::NonBlocking {}
}

/// Type-level execution model.
///
/// Selects the circuit breaker variant that matches a target. Implemented only
/// by [`Blocking`] and [`NonBlocking`].
pub trait Model: sealed::Sealed + Send + Sync + 'static {
    const KIND: ExecutionModel;

    /// Breaker variant guarding targets of this model
    type Breaker: Send + Sync + 'static;

    fn build_breaker(
        name: String,
        config: CircuitBreakerConfig,
        expected: ErrorKinds,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<Self::Breaker>;

    /// Registry handle for a breaker built by [`Model::build_breaker`]
    fn registry_handle(breaker: &Arc<Self::Breaker>) -> RegisteredBreaker;
}

/// Marker for blocking targets
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

/// Marker for non-blocking targets
#[derive(Debug, Clone, Copy, Default)]
pub struct NonBlocking;

impl Model for Blocking {
    const KIND: ExecutionModel = ExecutionModel::Blocking;
    type Breaker = CircuitBreaker;

    fn build_breaker(
        name: String,
        config: CircuitBreakerConfig,
        expected: ErrorKinds,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::with_config(name, config)
                .with_expected(expected)
                .with_time_source(clock),
        )
    }

    fn registry_handle(breaker: &Arc<CircuitBreaker>) -> RegisteredBreaker {
        RegisteredBreaker::Blocking(Arc::clone(breaker))
    }
}

impl Model for NonBlocking {
    const KIND: ExecutionModel = ExecutionModel::NonBlocking;
    type Breaker = AsyncCircuitBreaker;

    fn build_breaker(
        name: String,
        config: CircuitBreakerConfig,
        expected: ErrorKinds,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<AsyncCircuitBreaker> {
        Arc::new(
            AsyncCircuitBreaker::with_config(name, config)
                .with_expected(expected)
                .with_time_source(clock),
        )
    }

    fn registry_handle(breaker: &Arc<AsyncCircuitBreaker>) -> RegisteredBreaker {
        RegisteredBreaker::NonBlocking(Arc::clone(breaker))
    }
}

/// A plain blocking function turned into a [`Target`]
pub struct BlockingFn<F> {
    f: F,
    metadata: Metadata,
}

/// A plain async function turned into a [`Target`]
pub struct AsyncFn<F> {
    f: F,
    metadata: Metadata,
}

/// Wrap a blocking closure `Fn(A) -> Result<T, E>`
pub fn blocking<F>(name: impl Into<String>, f: F) -> BlockingFn<F> {
    BlockingFn {
        f,
        metadata: Metadata::new(name),
    }
}

/// Wrap an async closure `Fn(A) -> impl Future<Output = Result<T, E>>`
pub fn non_blocking<F>(name: impl Into<String>, f: F) -> AsyncFn<F> {
    AsyncFn {
        f,
        metadata: Metadata::new(name),
    }
}

impl<F> BlockingFn<F> {
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_doc(doc);
        self
    }
}

impl<F> AsyncFn<F> {
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_doc(doc);
        self
    }
}

impl<F> Target for BlockingFn<F> {
    type Model = Blocking;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<F> Target for AsyncFn<F> {
    type Model = NonBlocking;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<A, T, E, F> Callable<A> for BlockingFn<F>
where
    F: Fn(A) -> Result<T, E> + Send + Sync,
{
    type Output = T;
    type Error = E;

    fn call(&self, args: A) -> Result<T, E> {
        (self.f)(args)
    }
}

impl<A, T, E, F, Fut> AsyncCallable<A> for AsyncFn<F>
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn call(&self, args: A) -> BoxFuture<'_, Result<T, E>> {
        Box::pin((self.f)(args))
    }
}

impl<F> fmt::Debug for BlockingFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingFn")
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<F> fmt::Debug for AsyncFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFn")
            .field("metadata", &self.metadata)
            .finish()
    }
}
