//! Dispatcher - ストリームからタスクを取り出して Handler に流す
//!
//! # ポリシー（concurrency directive）
//! - **n > 0**: n 本のワーカーが同じ source から pull して順に handle する
//! - **n == 0**: dispatch ループ 1 本が pull し、タスクごとに新しいタスクを spawn する
//! - **n < 0**: 何もしない（将来用に予約）
//!
//! # 完了の追跡
//! - 実行コンテキストはすべて `CompletionTracker` に登録される
//! - 登録は spawn する側で、spawn の前に行う（wait() が早すぎるゼロを見ないため）
//! - 解放は `InFlight` の Drop で行うので、panic しても必ず減る
//!
//! # n < 0 の source
//! - pull も drop もしない。Dispatcher が drop されるまで預かるだけ
//!   （channel の受信側が生きているので、送信側の send は失敗しない）

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, error};

use crate::config::Concurrency;
use crate::handler::Handler;
use crate::source::TaskSource;
use crate::tracker::{CompletionTracker, InFlight};

/// Runs a handler over every task of a source and lets callers wait for
/// all of it to finish.
///
/// Execution contexts are tokio tasks, so `start` / `run` must be called
/// from inside a tokio runtime.
///
/// # 使用例
/// ```ignore
/// let dispatcher = Dispatcher::new(handler_fn(|n: u32| async move {
///     println!("task {n}");
/// }));
/// let (tx, source) = channel(16);
/// dispatcher.start(source, 4);
/// for i in 0..100 {
///     tx.send(i).await?;
/// }
/// drop(tx);
/// dispatcher.wait().await;
/// ```
pub struct Dispatcher<T, H> {
    handler: Arc<H>,
    tracker: CompletionTracker,
    /// Sources handed over with a negative directive. Never polled.
    parked: Mutex<Vec<Box<dyn Any + Send>>>,
    _task: PhantomData<fn(T)>,
}

impl<T, H> Dispatcher<T, H>
where
    T: Send + 'static,
    H: Handler<T>,
{
    pub fn new(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<H>) -> Self {
        Self {
            handler,
            tracker: CompletionTracker::new(),
            parked: Mutex::new(Vec::new()),
            _task: PhantomData,
        }
    }

    /// Start consuming `source` under the integer concurrency directive.
    ///
    /// `n > 0` runs a pool of `n` workers, `0` spawns one context per task,
    /// and a negative value does nothing: the source is neither polled nor
    /// dropped until the dispatcher itself is dropped.
    pub fn start<S>(&self, source: S, concurrency: isize)
    where
        S: TaskSource<T>,
    {
        self.start_with(source, Concurrency::from(concurrency));
    }

    pub fn start_with<S>(&self, source: S, concurrency: Concurrency)
    where
        S: TaskSource<T>,
    {
        match concurrency {
            Concurrency::Bounded(workers) => self.spawn_pool(Arc::new(source), workers.get()),
            Concurrency::Unbounded => self.spawn_per_task(Arc::new(source)),
            Concurrency::Disabled => self.park(source),
        }
    }

    /// Shorthand for `start(source, 0)`: one context per task.
    pub fn run<S>(&self, source: S)
    where
        S: TaskSource<T>,
    {
        self.start_with(source, Concurrency::Unbounded);
    }

    /// Wait until every context started so far has terminated.
    ///
    /// Contexts spawned while waiting are covered too, so waiting before the
    /// source is closed returns only after it is closed and drained.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Number of live execution contexts (workers, dispatch loops and
    /// per-task contexts).
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    fn park<S>(&self, source: S)
    where
        S: TaskSource<T>,
    {
        debug!("concurrency disabled; source left untouched");
        let mut parked = match self.parked.lock() {
            Ok(parked) => parked,
            Err(poisoned) => poisoned.into_inner(),
        };
        parked.push(Box::new(source));
    }

    fn spawn_pool<S>(&self, source: Arc<S>, workers: usize)
    where
        S: TaskSource<T>,
    {
        debug!(workers, "starting bounded worker pool");
        for worker_id in 0..workers {
            let in_flight = self.tracker.enter();
            let source = Arc::clone(&source);
            let handler = Arc::clone(&self.handler);

            tokio::spawn(worker_loop(worker_id, source, handler, in_flight));
        }
    }

    fn spawn_per_task<S>(&self, source: Arc<S>)
    where
        S: TaskSource<T>,
    {
        debug!("starting per-task dispatch loop");
        let in_flight = self.tracker.enter();
        let tracker = self.tracker.clone();
        let handler = Arc::clone(&self.handler);

        tokio::spawn(dispatch_loop(source, handler, tracker, in_flight));
    }
}

impl<T, H> std::fmt::Debug for Dispatcher<T, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("outstanding", &self.tracker.outstanding())
            .finish_non_exhaustive()
    }
}

async fn worker_loop<T, H, S>(worker_id: usize, source: Arc<S>, handler: Arc<H>, _in_flight: InFlight)
where
    T: Send + 'static,
    H: Handler<T>,
    S: TaskSource<T>,
{
    let mut handled = 0usize;
    let mut panicked = 0usize;
    while let Some(task) = source.next_task().await {
        if !invoke(handler.as_ref(), task).await {
            panicked += 1;
        }
        handled += 1;
    }
    debug!(worker_id, handled, panicked, "source exhausted; worker exiting");
}

async fn dispatch_loop<T, H, S>(
    source: Arc<S>,
    handler: Arc<H>,
    tracker: CompletionTracker,
    _in_flight: InFlight,
) where
    T: Send + 'static,
    H: Handler<T>,
    S: TaskSource<T>,
{
    let mut spawned = 0usize;
    while let Some(task) = source.next_task().await {
        // 新しいコンテキストの中ではなく、ここで登録する
        let in_flight = tracker.enter();
        let handler = Arc::clone(&handler);

        tokio::spawn(async move {
            let _in_flight = in_flight;
            invoke(handler.as_ref(), task).await;
        });
        spawned += 1;
    }
    debug!(spawned, "source exhausted; dispatch loop exiting");
}

/// Run one handler invocation. A panic is logged and isolated to this task.
async fn invoke<T, H>(handler: &H, task: T) -> bool
where
    T: Send + 'static,
    H: Handler<T>,
{
    match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
        Ok(()) => true,
        Err(payload) => {
            error!(panic = panic_message(payload.as_ref()), "handler panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
