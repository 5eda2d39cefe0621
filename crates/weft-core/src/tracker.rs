//! CompletionTracker - 実行中コンテキストの数を数えるカウンタ
//!
//! # 学習ポイント
//! - AtomicUsize + Notify による「ゼロになるまで待つ」プリミティブ
//! - `Notified::enable` を先に呼んでからカウントを確認する（通知の取りこぼし防止）
//! - RAII ガード（`InFlight`）で、panic 時も必ず `done()` される

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{error, warn};

struct TrackerState {
    outstanding: AtomicUsize,
    zero: Notify,
}

/// Shared counter of outstanding execution contexts.
///
/// Clones share the same count. The count is only changed through
/// `add` / `done` (atomic), never by read-modify-write from outside.
///
/// # 使用例
/// ```ignore
/// let tracker = CompletionTracker::new();
/// let guard = tracker.enter();
/// tokio::spawn(async move {
///     let _guard = guard;
///     // work...
/// });
/// tracker.wait().await;
/// ```
#[derive(Clone)]
pub struct CompletionTracker {
    state: Arc<TrackerState>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TrackerState {
                outstanding: AtomicUsize::new(0),
                zero: Notify::new(),
            }),
        }
    }

    /// Register `n` contexts. Must happen before the covered work starts.
    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.state.outstanding.fetch_add(n, Ordering::AcqRel);
    }

    /// Release one context. Wakes every waiter on the zero crossing.
    ///
    /// A `done()` without a matching `add()` is ignored; the count never
    /// goes below zero.
    pub fn done(&self) {
        let prev = self
            .state
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match prev {
            Ok(1) => self.state.zero.notify_waiters(),
            Ok(_) => {}
            Err(_) => error!("completion tracker released with no outstanding contexts"),
        }
    }

    /// Register one context and return a guard that releases it on drop.
    pub fn enter(&self) -> InFlight {
        self.add(1);
        InFlight {
            tracker: self.clone(),
        }
    }

    /// Wait until the count is zero.
    ///
    /// Returns at the zero crossing it was woken by, even if a new `add`
    /// lands before this waiter is polled again.
    pub async fn wait(&self) {
        let notified = self.state.zero.notified();
        tokio::pin!(notified);
        // 登録してからカウントを読む。順序が逆だと notify_waiters を取りこぼす
        notified.as_mut().enable();

        if self.outstanding() == 0 {
            return;
        }
        // notify_waiters は 1 -> 0 の時だけ呼ばれるので、起こされたら戻ってよい
        notified.await;
    }

    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::Acquire)
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// One registered execution context.
///
/// Dropping it calls `done()`, also while unwinding from a panic.
#[must_use = "dropping the guard releases the context immediately"]
#[derive(Debug)]
pub struct InFlight {
    tracker: CompletionTracker,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("execution context exited while panicking");
        }
        self.tracker.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let tracker = CompletionTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait())
            .await
            .unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn add_zero_is_noop() {
        let tracker = CompletionTracker::new();
        tracker.add(0);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn wait_blocks_until_last_done() {
        let tracker = CompletionTracker::new();
        tracker.add(2);

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait().await }
        });

        tracker.done();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(tracker.outstanding(), 1);

        tracker.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_waiters_are_all_released() {
        let tracker = CompletionTracker::new();
        tracker.add(1);

        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.done();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn waiter_released_by_zero_crossing_despite_new_add() {
        let tracker = CompletionTracker::new();
        tracker.add(1);

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait().await }
        });
        tokio::task::yield_now().await;

        // ゼロを通過した直後に次の start が来る
        tracker.done();
        tracker.add(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(waiter.is_finished());
        assert_eq!(tracker.outstanding(), 1);

        tracker.done();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn done_at_zero_does_not_underflow() {
        let tracker = CompletionTracker::new();
        tracker.done();
        assert_eq!(tracker.outstanding(), 0);

        tracker.add(1);
        assert_eq!(tracker.outstanding(), 1);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let tracker = CompletionTracker::new();
        let guard = tracker.enter();
        assert_eq!(tracker.outstanding(), 1);
        drop(guard);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn guard_releases_when_context_panics() {
        let tracker = CompletionTracker::new();
        let guard = tracker.enter();

        let join = tokio::spawn(async move {
            let _guard = guard;
            panic!("boom");
        });

        assert!(join.await.unwrap_err().is_panic());
        assert_eq!(tracker.outstanding(), 0);
        tokio::time::timeout(Duration::from_millis(100), tracker.wait())
            .await
            .unwrap();
    }
}
