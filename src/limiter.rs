// Sliding-window attempt limiter keyed by (identifier, action), persisted as
// one document per key. The behavior on a store failure is a named policy,
// not an implicit catch-and-ignore: the default fails open (allow and log),
// which favors availability over strict enforcement.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{DocumentStore, StoreError};

pub const RATE_LIMITS_COLLECTION: &str = "rate_limits";

/// What a limit check answers when the store itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Allow the action on transport error (logged). Suitable where locking
    /// users out hurts more than an occasional extra attempt.
    OpenOnTransportError,
    /// Deny the action on transport error.
    ClosedOnTransportError,
}

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub max_attempts: u32,
    pub window_minutes: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptRecord {
    identifier: String,
    action: String,
    first_attempt_at: DateTime<Utc>,
    attempt_count: u32,
    blocked_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
    config: LimiterConfig,
    policy: FailurePolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn DocumentStore>, config: LimiterConfig) -> Self {
        Self::with_policy(store, config, FailurePolicy::OpenOnTransportError)
    }

    pub fn with_policy(
        store: Arc<dyn DocumentStore>,
        config: LimiterConfig,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            config,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns whether the action is allowed right now, recording the
    /// attempt. Never errors: store failures resolve through the configured
    /// [`FailurePolicy`].
    pub async fn check(&self, identifier: &str, action: &str) -> bool {
        match self.check_at(identifier, action, Utc::now()).await {
            Ok(allowed) => allowed,
            Err(err) => match self.policy {
                FailurePolicy::OpenOnTransportError => {
                    warn!(identifier, action, error = %err, "rate limit check failed, failing open");
                    true
                }
                FailurePolicy::ClosedOnTransportError => {
                    warn!(identifier, action, error = %err, "rate limit check failed, failing closed");
                    false
                }
            },
        }
    }

    async fn check_at(
        &self,
        identifier: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let doc_id = format!("{identifier}_{action}");
        let window = Duration::minutes(self.config.window_minutes);

        let existing = self.store.get(RATE_LIMITS_COLLECTION, &doc_id).await?;
        let record = match existing {
            None => {
                self.write_fresh(&doc_id, identifier, action, now).await?;
                return Ok(true);
            }
            Some(doc) => serde_json::from_value::<AttemptRecord>(doc.data)?,
        };

        if let Some(blocked_until) = record.blocked_until {
            if now < blocked_until {
                debug!(identifier, action, %blocked_until, "attempt blocked");
                return Ok(false);
            }
        }

        if now - record.first_attempt_at >= window {
            // Window elapsed: start counting from scratch.
            self.write_fresh(&doc_id, identifier, action, now).await?;
            return Ok(true);
        }

        let attempt_count = record.attempt_count + 1;
        if attempt_count > self.config.max_attempts {
            let blocked_until = record.first_attempt_at + window;
            self.store
                .update(
                    RATE_LIMITS_COLLECTION,
                    &doc_id,
                    serde_json::json!({
                        "attempt_count": attempt_count,
                        "blocked_until": blocked_until,
                    }),
                )
                .await?;
            debug!(identifier, action, attempt_count, "limit reached, blocking until window end");
            Ok(false)
        } else {
            self.store
                .update(
                    RATE_LIMITS_COLLECTION,
                    &doc_id,
                    serde_json::json!({ "attempt_count": attempt_count }),
                )
                .await?;
            Ok(true)
        }
    }

    async fn write_fresh(
        &self,
        doc_id: &str,
        identifier: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = AttemptRecord {
            identifier: identifier.to_string(),
            action: action.to_string(),
            first_attempt_at: now,
            attempt_count: 1,
            blocked_until: None,
        };
        self.store
            .put(
                RATE_LIMITS_COLLECTION,
                doc_id,
                serde_json::to_value(&record)?,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        Document, Filter, MemoryStore, OrderBy, Subscription, WatchKey,
    };
    use async_trait::async_trait;
    use serde_json::Value;

    /// Store double whose every operation fails with a transport error.
    struct DownStore;

    #[async_trait]
    impl DocumentStore for DownStore {
        async fn create(&self, _: &str, _: Value) -> Result<Document, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        async fn put(&self, _: &str, _: &str, _: Value) -> Result<Document, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        async fn update(&self, _: &str, _: &str, _: Value) -> Result<Document, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        async fn query(
            &self,
            _: &str,
            _: &[Filter],
            _: Option<&OrderBy>,
        ) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }
        fn subscribe(&self, _: WatchKey) -> Subscription {
            MemoryStore::new().subscribe(WatchKey::collection("void"))
        }
    }

    fn limiter(max_attempts: u32, window_minutes: i64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            LimiterConfig {
                max_attempts,
                window_minutes,
            },
        )
    }

    #[tokio::test]
    async fn fourth_attempt_within_window_is_denied() {
        let limiter = limiter(3, 10);
        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(limiter.check("203.0.113.7", "booking_submit").await);
        }
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[tokio::test]
    async fn keys_are_isolated_by_identifier_and_action() {
        let limiter = limiter(1, 10);
        assert!(limiter.check("a", "login").await);
        assert!(!limiter.check("a", "login").await);
        // Different action and different identifier both get fresh windows.
        assert!(limiter.check("a", "booking_submit").await);
        assert!(limiter.check("b", "login").await);
    }

    #[tokio::test]
    async fn elapsed_window_resets_the_counter() {
        let limiter = limiter(2, 10);
        let start = Utc::now();
        assert!(limiter.check_at("a", "login", start).await.unwrap());
        assert!(limiter
            .check_at("a", "login", start + Duration::minutes(1))
            .await
            .unwrap());
        assert!(!limiter
            .check_at("a", "login", start + Duration::minutes(2))
            .await
            .unwrap());

        // Past the window the key starts over.
        assert!(limiter
            .check_at("a", "login", start + Duration::minutes(11))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn block_lasts_until_window_end() {
        let limiter = limiter(1, 10);
        let start = Utc::now();
        assert!(limiter.check_at("a", "login", start).await.unwrap());
        assert!(!limiter
            .check_at("a", "login", start + Duration::minutes(1))
            .await
            .unwrap());
        assert!(!limiter
            .check_at("a", "login", start + Duration::minutes(9))
            .await
            .unwrap());
        assert!(limiter
            .check_at("a", "login", start + Duration::minutes(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn transport_error_fails_open_by_default() {
        let limiter = RateLimiter::new(Arc::new(DownStore), LimiterConfig::default());
        assert!(limiter.check("a", "login").await);
    }

    #[tokio::test]
    async fn closed_policy_denies_on_transport_error() {
        let limiter = RateLimiter::with_policy(
            Arc::new(DownStore),
            LimiterConfig::default(),
            FailurePolicy::ClosedOnTransportError,
        );
        assert!(!limiter.check("a", "login").await);
    }
}
