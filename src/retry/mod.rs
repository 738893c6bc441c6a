//! Background re-delivery of pending push notifications.
//!
//! The sweeper periodically drains windows of retry-eligible notifications,
//! drives each through the push dispatcher, and schedules the next attempt
//! with exponential back-off until the retry window is exhausted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notifications::{NotificationStatus, NotificationStore};
use crate::push::{PushDispatcher, PushOutcome};

/// How many (notification, box) pairs one store query may hand back. Bounds
/// sweeper memory to a single window.
const RETRY_WINDOW_BATCH: usize = 200;

/// Upper bound on windows drained per cycle, so a cycle stays finite even
/// when a large eligible set keeps failing with a very short backoff.
const MAX_WINDOWS_PER_CYCLE: usize = 50;

/// Retry policy implementing exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each attempt.
    pub multiplier: f64,
    /// Jitter fraction applied around the computed backoff (0.1 = +-10%).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Backoff for a given attempt count, capped, without jitter.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let raw = self.initial_backoff.as_secs_f64() * self.multiplier.powi(retry_count);
        Duration::from_secs_f64(raw.min(self.max_backoff.as_secs_f64()))
    }

    /// Next attempt timestamp: now + capped backoff with jitter.
    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
        let backoff = self.backoff(retry_count).as_secs_f64();
        let jittered = if self.jitter > 0.0 {
            let spread = backoff * self.jitter;
            backoff + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            backoff
        };
        now + chrono::Duration::milliseconds((jittered.max(0.0) * 1000.0) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3600),
            multiplier: 5.0,
            jitter: 0.1,
        }
    }
}

/// Periodic background task that re-drives pending push notifications.
pub struct RetrySweeper {
    notification_store: Arc<dyn NotificationStore>,
    dispatcher: Arc<PushDispatcher>,
    policy: RetryPolicy,
    /// Maximum elapsed time from creation during which a notification stays
    /// retryable; past it the notification turns FAILED.
    retry_window: chrono::Duration,
    sweep_interval: Duration,
    /// Time-to-live driving the physical purge, enforced once per cycle.
    notification_ttl: chrono::Duration,
}

impl RetrySweeper {
    pub fn new(
        notification_store: Arc<dyn NotificationStore>,
        dispatcher: Arc<PushDispatcher>,
        policy: RetryPolicy,
        retry_window: Duration,
        sweep_interval: Duration,
        notification_ttl: Duration,
    ) -> Self {
        Self {
            notification_store,
            dispatcher,
            policy,
            retry_window: chrono::Duration::from_std(retry_window)
                .unwrap_or_else(|_| chrono::Duration::hours(6)),
            sweep_interval,
            notification_ttl: chrono::Duration::from_std(notification_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(30)),
        }
    }

    /// Main loop - call from a spawned task. Observes `shutdown` between
    /// cycles and between items; an in-flight push is awaited, not abandoned.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Retry sweeper starting (interval={:?}, window={}s)",
            self.sweep_interval,
            self.retry_window.num_seconds()
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {
                    if let Err(e) = self.run_cycle(&shutdown).await {
                        error!("Retry sweep cycle failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Retry sweeper shutting down");
                    break;
                }
            }
        }

        info!("Retry sweeper stopped");
    }

    /// One sweep cycle: drain retry windows, then purge expired rows.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<()> {
        for _ in 0..MAX_WINDOWS_PER_CYCLE {
            let candidates = self
                .notification_store
                .retry_candidates(Utc::now(), RETRY_WINDOW_BATCH)?;
            if candidates.is_empty() {
                break;
            }
            let window_len = candidates.len();

            for (notification, notification_box) in candidates {
                if shutdown.is_cancelled() {
                    debug!("Retry sweep interrupted by shutdown");
                    return Ok(());
                }

                let outcome = self.dispatcher.push(&notification_box, &notification).await;
                match outcome {
                    PushOutcome::Delivered => {
                        self.notification_store.update_status(
                            &notification.notification_id,
                            NotificationStatus::Acknowledged,
                        )?;
                    }
                    PushOutcome::Failed(reason) => {
                        let now = Utc::now();
                        let next = self.policy.next_retry_at(now, notification.retry_count);
                        let deadline = notification.created_at + self.retry_window;

                        if next > deadline {
                            warn!(
                                "Notification {} exhausted its retry window after {} attempts: {}",
                                notification.notification_id,
                                notification.retry_count + 1,
                                reason
                            );
                            self.notification_store.update_status(
                                &notification.notification_id,
                                NotificationStatus::Failed,
                            )?;
                        } else {
                            debug!(
                                "Notification {} push failed ({}), next attempt at {}",
                                notification.notification_id, reason, next
                            );
                            self.notification_store
                                .update_retry_after(&notification.notification_id, next)?;
                        }
                    }
                }
            }

            // A short window means the eligible set is drained
            if window_len < RETRY_WINDOW_BATCH {
                break;
            }
        }

        self.notification_store.purge_expired(self.notification_ttl)?;
        Ok(())
    }
}
