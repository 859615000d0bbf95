//! Session-side proxy for a rate limiter actor
//!
//! Admission is optimistic: `check_limit` answers from a local cooldown flag
//! and books the action with the limiter actor in the background. A sender
//! can therefore get one message through per cooldown window before the
//! actor's verdict lands.

use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::rate_limiter::{RateLimiterDirectory, RateLimiterHandle};
use crate::error::{ChatError, Result};

/// Invoked when the limiter cannot be reached even after re-resolving it
pub type ErrorCallback = Arc<dyn Fn(ChatError) + Send + Sync>;

#[derive(Clone)]
pub struct RateLimiterClient {
    identity: String,
    directory: RateLimiterDirectory,
    limiter: Arc<Mutex<RateLimiterHandle>>,
    in_cooldown: Arc<AtomicBool>,
    report_error: ErrorCallback,
}

impl RateLimiterClient {
    pub async fn new(
        identity: String,
        directory: RateLimiterDirectory,
        report_error: ErrorCallback,
    ) -> Self {
        let limiter = directory.get(&identity).await;
        Self {
            identity,
            directory,
            limiter: Arc::new(Mutex::new(limiter)),
            in_cooldown: Arc::new(AtomicBool::new(false)),
            report_error,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Admit or refuse one action without waiting on the limiter actor
    pub fn check_limit(&self) -> bool {
        if self.in_cooldown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let client = self.clone();
        tokio::spawn(async move { client.call_limiter().await });
        true
    }

    pub fn in_cooldown(&self) -> bool {
        self.in_cooldown.load(Ordering::Acquire)
    }

    async fn call_limiter(self) {
        match self.register_action().await {
            Ok(cooldown) => {
                if cooldown > 0.0 {
                    debug!("{} cooling down for {:.1}s", self.identity, cooldown);
                    tokio::time::sleep(Duration::from_secs_f64(cooldown)).await;
                }
                self.in_cooldown.store(false, Ordering::Release);
            }
            Err(e) => {
                warn!("Rate limiter for {} failed: {}", self.identity, e);
                (self.report_error)(e);
            }
        }
    }

    /// Book one action, re-resolving the actor once if the handle went stale
    async fn register_action(&self) -> Result<f64> {
        let current = self.limiter.lock().await.clone();
        match current.register_action().await {
            Ok(cooldown) => Ok(cooldown),
            Err(e) => {
                debug!("Re-resolving limiter for {}: {}", self.identity, e);
                let fresh = self.directory.get(&self.identity).await;
                *self.limiter.lock().await = fresh.clone();
                fresh.register_action().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (ErrorCallback, Arc<AtomicUsize>) {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let callback: ErrorCallback = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (callback, errors)
    }

    #[tokio::test]
    async fn test_second_check_refused_while_in_flight() {
        let directory = RateLimiterDirectory::new(Duration::from_secs(60));
        let (callback, _) = counting_callback();
        let client = RateLimiterClient::new("10.1.0.1".to_string(), directory, callback).await;

        assert!(client.check_limit());
        // the background registration has not run yet
        assert!(!client.check_limit());
        assert!(client.in_cooldown());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.in_cooldown());
        assert!(client.check_limit());
    }

    #[tokio::test]
    async fn test_stale_limiter_is_re_resolved() {
        let directory = RateLimiterDirectory::new(Duration::from_millis(20));
        let (callback, errors) = counting_callback();
        let client =
            RateLimiterClient::new("10.1.0.2".to_string(), directory.clone(), callback).await;

        // let the idle actor retire under the client
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.limiter.lock().await.is_stale());

        assert!(client.check_limit());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!client.in_cooldown());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_limiter_reports_once() {
        let directory = RateLimiterDirectory::new(Duration::from_secs(60));
        directory.install_unresponsive("10.1.0.4").await;
        let (callback, errors) = counting_callback();
        let client = RateLimiterClient::new("10.1.0.4".to_string(), directory, callback).await;

        // admitted optimistically; the failure only surfaces afterwards
        assert!(client.check_limit());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        // never cleared, so nothing else gets through on this connection
        assert!(client.in_cooldown());
        assert!(!client.check_limit());
    }

    #[tokio::test]
    async fn test_clients_share_identity_counter() {
        let directory = RateLimiterDirectory::new(Duration::from_secs(60));
        let (callback, _) = counting_callback();
        let a = RateLimiterClient::new("10.1.0.3".to_string(), directory.clone(), callback.clone())
            .await;
        let b = RateLimiterClient::new("10.1.0.3".to_string(), directory.clone(), callback).await;

        assert!(a.check_limit());
        assert!(b.check_limit());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = directory.get("10.1.0.3").await.status().await.unwrap();
        // two registrations are still inside the grace window
        assert_eq!(status, 0.0);
    }
}
