use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::SqlExecutorError;

/// Where an `_async` operation runs.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Spawned onto a worker pool.
    Pool(Handle),
    /// Run on the calling transaction's own task when awaited.
    Inline { transaction_id: u64 },
}

impl Dispatch {
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Dispatch::Inline { .. })
    }
}

/// Result of an `_async` executor operation.
///
/// Spawned work runs whether or not the future is awaited. Inline work (inside a
/// transaction) runs when the future is awaited, on the awaiting task.
#[must_use = "inline work only runs when the future is awaited"]
pub struct DbFuture<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Spawned(JoinHandle<Result<T, SqlExecutorError>>),
    Inline(BoxFuture<'static, Result<T, SqlExecutorError>>),
    Ready(Option<Result<T, SqlExecutorError>>),
}

impl<T> DbFuture<T> {
    pub(crate) fn spawned(handle: JoinHandle<Result<T, SqlExecutorError>>) -> Self {
        Self {
            inner: Inner::Spawned(handle),
        }
    }

    pub(crate) fn inline<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, SqlExecutorError>> + Send + 'static,
    {
        Self {
            inner: Inner::Inline(Box::pin(future)),
        }
    }

    pub(crate) fn ready(result: Result<T, SqlExecutorError>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// `true` when the work was handed to a worker pool.
    #[must_use]
    pub fn is_spawned(&self) -> bool {
        matches!(self.inner, Inner::Spawned(_))
    }
}

// `T` is only ever moved out of `Ready`, never pinned.
impl<T> Unpin for DbFuture<T> {}

impl<T> Future for DbFuture<T> {
    type Output = Result<T, SqlExecutorError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Spawned(handle) => Pin::new(handle)
                .poll(cx)
                .map(|joined| joined.map_err(SqlExecutorError::from).and_then(|res| res)),
            Inner::Inline(future) => future.as_mut().poll(cx),
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(SqlExecutorError::ExecutionError(
                    "DbFuture polled after completion".into(),
                ))
            })),
        }
    }
}

impl<T> fmt::Debug for DbFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            Inner::Spawned(_) => "Spawned",
            Inner::Inline(_) => "Inline",
            Inner::Ready(_) => "Ready",
        };
        f.debug_tuple("DbFuture").field(&kind).finish()
    }
}
