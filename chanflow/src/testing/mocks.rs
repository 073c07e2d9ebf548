//! Mock transforms for testing.

use crate::context::ResourceScope;
use crate::errors::TransformError;
use crate::stages::{FnTransform, Transform};
use async_trait::async_trait;
use std::time::Duration;

/// Returns a pass-through transform that fails every item matching
/// `predicate`.
pub fn fail_when<T, P>(
    predicate: P,
) -> FnTransform<impl Fn(T, &ResourceScope) -> Result<T, TransformError> + Send + Sync>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync,
{
    FnTransform::new(move |input: T, _scope: &ResourceScope| {
        if predicate(&input) {
            Err(TransformError::new("rejected by predicate"))
        } else {
            Ok(input)
        }
    })
}

/// A transform that sleeps before mapping its input.
pub struct Delayed<D, F> {
    delay: D,
    func: F,
}

impl<D, F> std::fmt::Debug for Delayed<D, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delayed").finish_non_exhaustive()
    }
}

/// Returns a transform that sleeps for `delay` and then applies `func`.
pub fn delayed<T, U, F>(
    delay: Duration,
    func: F,
) -> Delayed<impl Fn(&T) -> Duration + Send + Sync, F>
where
    F: Fn(T) -> U + Send + Sync,
{
    Delayed {
        delay: move |_: &T| delay,
        func,
    }
}

/// Returns a transform whose sleep depends on the input.
pub fn delayed_by<T, U, D, F>(delay: D, func: F) -> Delayed<D, F>
where
    D: Fn(&T) -> Duration + Send + Sync,
    F: Fn(T) -> U + Send + Sync,
{
    Delayed { delay, func }
}

#[async_trait]
impl<T, U, D, F> Transform<T, U> for Delayed<D, F>
where
    T: Send + 'static,
    U: Send + 'static,
    D: Fn(&T) -> Duration + Send + Sync,
    F: Fn(T) -> U + Send + Sync,
{
    async fn apply(&self, input: T, _scope: &ResourceScope) -> Result<U, TransformError> {
        tokio::time::sleep((self.delay)(&input)).await;
        Ok((self.func)(input))
    }
}
