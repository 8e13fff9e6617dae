//! Closure-backed operation.
//!
//! Lets callers and tests supply an operation inline without declaring a type.
//! The closure receives borrowed session and target and must return a future
//! that owns whatever it needs (clone before the `async move`).

use crate::{Operation, OperationFuture, Result};
use std::future::Future;
use std::marker::PhantomData;

/// Operation built from a closure `Fn(&S, &T) -> Future<Output = Result<O>>`.
pub struct FnOperation<S, T, O, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(&S, &T) -> O>,
}

impl<S, T, O, F, Fut> FnOperation<S, T, O, F>
where
    F: Fn(&S, &T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

impl<S, T, O, F, Fut> Operation<S, T> for FnOperation<S, T, O, F>
where
    S: Sync,
    T: Sync,
    F: Fn(&S, &T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, session: &'a S, target: &'a T) -> OperationFuture<'a, O> {
        Box::pin((self.f)(session, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationError;

    #[tokio::test]
    async fn closure_receives_session_and_target() {
        let op = FnOperation::new("concat", |session: &String, target: &String| {
            let joined = format!("{session}->{target}");
            async move { Ok(joined) }
        });

        let out = op
            .execute(&"acct".to_string(), &"t0".to_string())
            .await
            .unwrap();
        assert_eq!(out, "acct->t0");
        assert_eq!(op.name(), "concat");
    }

    #[tokio::test]
    async fn closure_errors_pass_through() {
        let op = FnOperation::new("fail", |_: &(), target: &u16| {
            let status = *target;
            async move { Err::<(), _>(OperationError::Rejected { status }) }
        });

        let err = op.execute(&(), &503).await.unwrap_err();
        assert_eq!(err, OperationError::Rejected { status: 503 });
    }
}
