use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Sliding 60-second request window, applied only to the configured
/// `default_model` of an `OpenAiCompatibleProvider` instance (§4.1).
/// Disabled entirely when `requests_per_minute <= 0`.
pub struct RateWindow {
    requests_per_minute: i64,
    timestamps: Mutex<Vec<Instant>>,
}

impl RateWindow {
    pub fn new(requests_per_minute: i64) -> Self {
        Self {
            requests_per_minute,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Block until issuing another request would not exceed the window,
    /// then record this request's timestamp. Re-checks the window after
    /// waking so two callers that both saw the window full don't let the
    /// second one through on the first one's wait.
    pub async fn acquire(&self) {
        if self.requests_per_minute <= 0 {
            return;
        }

        let window = Duration::from_secs(60);

        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                timestamps.retain(|t| now.duration_since(*t) < window);

                if (timestamps.len() as i64) < self.requests_per_minute {
                    timestamps.push(now);
                    return;
                }

                window.saturating_sub(now.duration_since(timestamps[0])) + Duration::from_secs(1)
            };

            tracing::info!(wait_secs = wait.as_secs_f64(), "rate limit reached, sleeping");
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_window_never_blocks() {
        let window = RateWindow::new(0);
        for _ in 0..10 {
            window.acquire().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_after_limit_reached() {
        let window = RateWindow::new(2);
        window.acquire().await;
        window.acquire().await;

        let started = Instant::now();
        window.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
