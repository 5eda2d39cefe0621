use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::{Concurrency, DispatchConfig, Dispatcher, Handler, channel};

#[derive(Debug, Deserialize)]
struct ResizePayload {
    name: String,
    width: u64,
}

/// Pretends to resize an image and keeps a running total of pixels.
struct ResizeHandler {
    pixels: AtomicU64,
    handled: AtomicUsize,
}

impl ResizeHandler {
    fn new() -> Self {
        Self {
            pixels: AtomicU64::new(0),
            handled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Handler<Vec<u8>> for ResizeHandler {
    async fn handle(&self, payload: Vec<u8>) {
        let p: ResizePayload = match serde_json::from_slice(&payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("json decode: {e}");
                return;
            }
        };

        sleep(Duration::from_millis(5 + p.width % 7)).await;
        self.pixels.fetch_add(p.width * p.width, Ordering::Relaxed);
        self.handled.fetch_add(1, Ordering::Relaxed);
        info!(name = %p.name, width = p.width, "resized");
    }
}

/// `WEFT_CONFIG` (JSON) > `WEFT_CONCURRENCY` > 4 workers
fn load_concurrency() -> Concurrency {
    if let Ok(raw) = std::env::var("WEFT_CONFIG") {
        match DispatchConfig::from_json(&raw) {
            Ok(config) => return config.concurrency,
            Err(e) => warn!("ignoring WEFT_CONFIG: {e}"),
        }
    }
    if let Ok(raw) = std::env::var("WEFT_CONCURRENCY") {
        match raw.parse() {
            Ok(concurrency) => return concurrency,
            Err(e) => warn!("ignoring WEFT_CONCURRENCY: {e}"),
        }
    }
    Concurrency::from_workers(4)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) handler と dispatcher を用意
    let handler = Arc::new(ResizeHandler::new());
    let dispatcher = Dispatcher::from_arc(Arc::clone(&handler));

    // (B) source を渡して起動
    let concurrency = load_concurrency();
    if concurrency == Concurrency::Disabled {
        // source は預かられたまま pull されないので、送り続けると詰まる
        info!("concurrency disabled; nothing to dispatch");
        return;
    }
    let (tx, source) = channel(8);
    dispatcher.start_with(source, concurrency);
    info!(%concurrency, outstanding = dispatcher.outstanding(), "dispatcher started");

    // (C) タスク投入（payload は JSON bytes）
    for i in 0..32u64 {
        let payload = serde_json::json!({ "name": format!("img-{i:02}.png"), "width": 64 + i });
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("encode failed: {e}");
                continue;
            }
        };
        if tx.send(bytes).await.is_err() {
            warn!("source closed before all tasks were sent");
            break;
        }
    }

    // (D) 閉じてから全完了を待つ
    drop(tx);
    dispatcher.wait().await;

    println!(
        "handled={} pixels={} outstanding={}",
        handler.handled.load(Ordering::Relaxed),
        handler.pixels.load(Ordering::Relaxed),
        dispatcher.outstanding()
    );
}
