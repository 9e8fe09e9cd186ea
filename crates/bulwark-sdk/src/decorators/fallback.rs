//! `fallback()` decorator

use std::fmt;

use bulwark_core::{
    Alternate, AsyncCallable, AsyncFallbackChain, BuildChain, Callable, ConfigResult,
    FallbackChain, Metadata, Target,
};
use futures::future::BoxFuture;

use super::Decorator;

/// Start configuring a fallback decorator; add alternates with
/// [`FallbackDecorator::or`]
pub fn fallback<A, T, E>() -> FallbackDecorator<A, T, E> {
    FallbackDecorator {
        alternates: Vec::new(),
    }
}

/// Builder for [`WithFallback`] targets
pub struct FallbackDecorator<A, T, E> {
    alternates: Vec<Alternate<A, T, E>>,
}

impl<A, T, E> FallbackDecorator<A, T, E> {
    /// Append an alternate, tried after every earlier one has failed
    pub fn or(mut self, alternate: impl Into<Alternate<A, T, E>>) -> Self {
        self.alternates.push(alternate.into());
        self
    }
}

impl<A, T, E> fmt::Debug for FallbackDecorator<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDecorator")
            .field("alternates", &self.alternates)
            .finish()
    }
}

impl<A, T, E, P> Decorator<P> for FallbackDecorator<A, T, E>
where
    P: Target,
    P::Model: BuildChain<A, T, E>,
{
    type Output = WithFallback<P, <P::Model as BuildChain<A, T, E>>::Chain>;

    fn decorate(self, primary: P) -> ConfigResult<Self::Output> {
        let chain =
            <P::Model as BuildChain<A, T, E>>::build_chain(primary.metadata(), self.alternates)?;
        Ok(WithFallback { primary, chain })
    }
}

/// A target that falls back to alternates when it fails
pub struct WithFallback<P, C> {
    primary: P,
    chain: C,
}

impl<P, C> WithFallback<P, C> {
    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }
}

impl<P: Target, C> Target for WithFallback<P, C> {
    type Model = P::Model;

    fn metadata(&self) -> &Metadata {
        self.primary.metadata()
    }
}

impl<A, T, E, P> Callable<A> for WithFallback<P, FallbackChain<A, T, E>>
where
    P: Callable<A, Output = T, Error = E>,
    A: Clone,
{
    type Output = T;
    type Error = E;

    fn call(&self, args: A) -> Result<T, E> {
        self.chain.execute(&self.primary, args)
    }
}

impl<A, T, E, P> AsyncCallable<A> for WithFallback<P, AsyncFallbackChain<A, T, E>>
where
    P: AsyncCallable<A, Output = T, Error = E>,
    A: Clone + Send + 'static,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;

    fn call(&self, args: A) -> BoxFuture<'_, Result<T, E>> {
        Box::pin(self.chain.execute(&self.primary, args))
    }
}

impl<P: Target, C: fmt::Debug> fmt::Debug for WithFallback<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithFallback")
            .field("metadata", self.primary.metadata())
            .field("chain", &self.chain)
            .finish()
    }
}
