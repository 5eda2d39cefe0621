//! Handler trait - タスクを処理する外部ハンドラ
//!
//! # 学習ポイント
//! - ジェネリック async trait (`Handler<T>`)
//! - クロージャ adapter (`HandlerFn<F>`)
//! - `Arc<H>` への blanket 実装

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Handler processes one task to completion.
///
/// There is no return value and no error channel: the dispatcher never looks
/// at what the handler did. It may be called from many contexts at once, so
/// implementations must be safe under concurrent invocation (or run with a
/// bounded pool of size 1).
///
/// # 使用例
/// ```ignore
/// struct PrintHandler;
///
/// #[async_trait]
/// impl Handler<String> for PrintHandler {
///     async fn handle(&self, task: String) {
///         println!("{task}");
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    async fn handle(&self, task: T);
}

#[async_trait]
impl<T, H> Handler<T> for Arc<H>
where
    T: Send + 'static,
    H: Handler<T> + ?Sized,
{
    async fn handle(&self, task: T) {
        (**self).handle(task).await
    }
}

/// Adapter that lets an ordinary async closure act as a `Handler`.
///
/// Build it with [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` so that `handle(task)` calls `f(task).await`.
///
/// ```ignore
/// let handler = handler_fn(|n: u32| async move {
///     println!("got {n}");
/// });
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<T, F, Fut> Handler<T> for HandlerFn<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, task: T) {
        (self.f)(task).await
    }
}
