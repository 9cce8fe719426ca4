//! Timer abstraction used for acknowledgment timeouts
//!
//! The browser bridge supplies a `setTimeout` based timer; native builds and
//! tests use tokio's clock.

use futures::future::LocalBoxFuture;
use std::time::Duration;

/// Source of sleep futures for the current platform
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Timer backed by `tokio::time`
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[cfg(not(target_arch = "wasm32"))]
impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
