use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default per-device gap between speeding notifications.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Per-IMEI cooldown gate for outbound speeding alerts. The only mutable
/// state shared across connections; constructed once and injected, never a
/// module-level global. Entries are created on first send and kept for the
/// life of the process.
#[derive(Debug)]
pub struct NotificationThrottle {
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an alert for `imei` is currently allowed. Callers mark the
    /// send only after the notification actually went out.
    pub async fn should_notify(&self, imei: &str) -> bool {
        match self.last_sent.lock().await.get(imei) {
            Some(last) => last.elapsed() >= self.cooldown,
            None => true,
        }
    }

    pub async fn mark_sent(&self, imei: &str) {
        self.last_sent
            .lock()
            .await
            .insert(imei.to_string(), Instant::now());
    }
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const IMEI: &str = "123456789012345";

    #[tokio::test(start_paused = true)]
    async fn first_notification_passes() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_notify(IMEI).await);
    }

    #[tokio::test(start_paused = true)]
    async fn within_cooldown_is_suppressed() {
        let throttle = NotificationThrottle::default();
        throttle.mark_sent(IMEI).await;
        advance(Duration::from_secs(60)).await;
        assert!(!throttle.should_notify(IMEI).await);
    }

    #[tokio::test(start_paused = true)]
    async fn after_cooldown_passes_again() {
        let throttle = NotificationThrottle::default();
        throttle.mark_sent(IMEI).await;
        advance(Duration::from_secs(360)).await;
        assert!(throttle.should_notify(IMEI).await);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_are_throttled_independently() {
        let throttle = NotificationThrottle::default();
        throttle.mark_sent(IMEI).await;
        assert!(!throttle.should_notify(IMEI).await);
        assert!(throttle.should_notify("860000000000002").await);
    }

    #[tokio::test(start_paused = true)]
    async fn unmarked_attempts_do_not_reset_the_window() {
        let throttle = NotificationThrottle::default();
        throttle.mark_sent(IMEI).await;
        advance(Duration::from_secs(200)).await;
        // a suppressed attempt must not extend the cooldown
        assert!(!throttle.should_notify(IMEI).await);
        advance(Duration::from_secs(120)).await;
        assert!(throttle.should_notify(IMEI).await);
    }
}
