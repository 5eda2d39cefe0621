//! weft-core
//!
//! Concurrent task dispatch: pull tasks from one source, run a handler over
//! them with a bounded pool or one context per task, and wait for all of it.
//!
//! # モジュール構成
//! - **dispatcher**: `Dispatcher`（start / run / wait）
//! - **tracker**: `CompletionTracker`（実行中コンテキストのカウンタ）
//! - **handler**: `Handler` trait と closure adapter
//! - **source**: `TaskSource` trait と tokio mpsc ベースの実装
//! - **config**: 並行度 directive（`Concurrency`, `DispatchConfig`）
//! - **error**: 設定まわりのエラー型

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod source;
pub mod tracker;

pub use self::config::{Concurrency, DispatchConfig};
pub use self::dispatcher::Dispatcher;
pub use self::error::WeftError;
pub use self::handler::{Handler, HandlerFn, handler_fn};
pub use self::source::{ChannelSource, TaskSource, channel, unbounded_channel};
pub use self::tracker::{CompletionTracker, InFlight};
