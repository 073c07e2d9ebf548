//! Stage transforms and the worker pools that run them.
//!
//! A stage is a [`Transform`] plus a [`StageDescriptor`] saying how many
//! items may wait in front of it and how many workers apply it. The pools
//! in this module move items between [`BoundedQueue`](crate::queue::BoundedQueue)s
//! and own the per-item bookkeeping around each transform call.

mod descriptor;
mod ordered;
mod pool;
mod runner;

pub use descriptor::{Dispatch, StageDescriptor};
pub use ordered::OrderedStagePool;
pub use pool::{StageHandle, StageWorkerPool};

use crate::context::ResourceScope;
use crate::errors::TransformError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// A per-item transformation from `T` to `U`.
///
/// Transforms may suspend. They read dependencies from the item's
/// [`ResourceScope`] and can register per-item resources on it; the scope
/// outlives the call. An `Err` fails only this item.
#[async_trait]
pub trait Transform<T, U>: Send + Sync
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Applies the transform to one item.
    async fn apply(&self, input: T, scope: &ResourceScope) -> Result<U, TransformError>;
}

#[async_trait]
impl<T, U, X> Transform<T, U> for Arc<X>
where
    T: Send + 'static,
    U: Send + 'static,
    X: Transform<T, U> + ?Sized,
{
    async fn apply(&self, input: T, scope: &ResourceScope) -> Result<U, TransformError> {
        (**self).apply(input, scope).await
    }
}

/// A transform backed by a synchronous closure.
pub struct FnTransform<F> {
    func: F,
}

impl<F> FnTransform<F> {
    /// Creates a transform from `func`.
    pub fn new<T, U>(func: F) -> Self
    where
        F: Fn(T, &ResourceScope) -> Result<U, TransformError> + Send + Sync,
    {
        Self { func }
    }
}

impl<F> Debug for FnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, U, F> Transform<T, U> for FnTransform<F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T, &ResourceScope) -> Result<U, TransformError> + Send + Sync,
{
    async fn apply(&self, input: T, scope: &ResourceScope) -> Result<U, TransformError> {
        (self.func)(input, scope)
    }
}

/// A transform backed by a closure returning a future.
///
/// The future cannot borrow the scope; implement [`Transform`] directly
/// when the transform needs it across an await.
pub struct AsyncFnTransform<F> {
    func: F,
}

impl<F> AsyncFnTransform<F> {
    /// Creates an async transform from `func`.
    pub fn new<T, U, Fut>(func: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<U, TransformError>> + Send,
    {
        Self { func }
    }
}

impl<F> Debug for AsyncFnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTransform").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, U, F, Fut> Transform<T, U> for AsyncFnTransform<F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<U, TransformError>> + Send,
{
    async fn apply(&self, input: T, _scope: &ResourceScope) -> Result<U, TransformError> {
        (self.func)(input).await
    }
}

/// A transform that passes items through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl<T: Send + 'static> Transform<T, T> for Identity {
    async fn apply(&self, input: T, _scope: &ResourceScope) -> Result<T, TransformError> {
        Ok(input)
    }
}
