use std::time::Duration;

use tokio::time::Instant;

/// Time source for retry delays and deadlines.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, d: Duration);
}

/// Tokio timer clock. Under a paused runtime (`start_paused`) it advances
/// deterministically, which is what the timing tests rely on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await
    }
}
