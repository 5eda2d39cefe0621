//! TaskSource port - タスクの入力ストリーム
//!
//! # 設計
//! - `next_task()` は「次のタスク」か「閉じられて空」(None) を返す
//! - `&self` を取るので、複数ワーカーから同時に pull できる
//! - tokio の mpsc::Receiver は単一コンシューマなので Mutex で包む

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

/// Ordered, closable source of tasks.
///
/// Returning `None` is the only termination signal the dispatcher knows:
/// it must mean "closed and fully drained", not "nothing right now".
#[async_trait]
pub trait TaskSource<T>: Send + Sync + 'static {
    async fn next_task(&self) -> Option<T>;
}

/// Lets the caller keep a handle on a source it also hands to a dispatcher.
#[async_trait]
impl<T, S> TaskSource<T> for Arc<S>
where
    T: Send + 'static,
    S: TaskSource<T> + ?Sized,
{
    async fn next_task(&self) -> Option<T> {
        (**self).next_task().await
    }
}

enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

/// `TaskSource` backed by a tokio mpsc channel.
///
/// The source closes when every sender has been dropped; tasks already in
/// the buffer are still handed out before `None`.
pub struct ChannelSource<T> {
    rx: Mutex<Receiver<T>>,
}

impl<T> From<mpsc::Receiver<T>> for ChannelSource<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Mutex::new(Receiver::Bounded(rx)),
        }
    }
}

impl<T> From<mpsc::UnboundedReceiver<T>> for ChannelSource<T> {
    fn from(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            rx: Mutex::new(Receiver::Unbounded(rx)),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> TaskSource<T> for ChannelSource<T> {
    async fn next_task(&self) -> Option<T> {
        // recv の間ロックを握る。待っている puller は順番に 1 件ずつ受け取る
        let mut rx = self.rx.lock().await;
        match &mut *rx {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Bounded channel whose receiving half is ready to hand to a dispatcher.
///
/// `capacity` must be greater than zero (tokio panics otherwise).
pub fn channel<T>(capacity: usize) -> (mpsc::Sender<T>, ChannelSource<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource::from(rx))
}

pub fn unbounded_channel<T>() -> (mpsc::UnboundedSender<T>, ChannelSource<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelSource::from(rx))
}
