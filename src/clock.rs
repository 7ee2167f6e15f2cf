use async_trait::async_trait;
use std::time::Duration;

/// Suspends the calling flow. Injected so poll loops and inter-source pauses
/// can be driven without real timers in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
