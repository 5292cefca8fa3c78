//! Delivery engine — retry / backoff / rate-limit-aware send.
//!
//! Per-message state machine:
//! `Attempting → { Delivered | Backoff(deadline) → Attempting | Abandoned }`.
//! Rate limits wait the server-specified duration plus a safety margin and
//! retry without consuming the bounded retry budget; permission denials
//! abandon immediately; everything else gets linearly backed-off retries.
//!
//! `deliver` returns the moment a send succeeds; the post-success pacing
//! delay lives in [`DeliveryEngine::throttle`] so the caller can record the
//! delivery before entering any cancellable wait.
//!
//! All waits go through an injectable [`Sleeper`] so the timing behavior is
//! deterministically testable without real elapsed time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::SendError;
use crate::message::Message;
use crate::platform::PlatformClient;

/// Injectable timer for delivery waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timing knobs for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Maximum attempts for transient failures.
    pub max_retries: u32,
    /// Backoff grows linearly: `backoff_base * attempt`.
    pub backoff_base: Duration,
    /// Safety margin added on top of a server-specified rate-limit wait.
    pub flood_margin: Duration,
    /// Post-success throttle for single messages.
    pub delay_single: Duration,
    /// Post-success throttle for grouped/media-album messages.
    pub delay_group: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            flood_margin: Duration::from_secs(5),
            delay_single: Duration::from_secs(2),
            delay_group: Duration::from_secs(4),
        }
    }
}

/// Why a delivery was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// Permanent per-destination failure; never retried.
    PermissionDenied,
    /// The account's credentials were rejected; the caller should disable it.
    AuthFailed(String),
    /// Bounded retries exhausted on transient errors.
    RetriesExhausted(String),
}

/// Terminal result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Abandoned { reason: AbandonReason },
}

/// Internal state machine states. `Delivered`/`Abandoned` are terminal and
/// expressed by returning.
enum State {
    Attempting,
    Backoff(Duration),
}

/// Rate-limit-aware sender.
pub struct DeliveryEngine {
    cfg: DeliveryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl DeliveryEngine {
    pub fn new(cfg: DeliveryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { cfg, sleeper }
    }

    /// Drive one message to a terminal state using the given client.
    pub async fn deliver(
        &self,
        client: &dyn PlatformClient,
        message: &Message,
        destination: &str,
    ) -> DeliveryOutcome {
        let mut attempt: u32 = 1;
        let mut state = State::Attempting;

        loop {
            match state {
                State::Backoff(delay) => {
                    self.sleeper.sleep(delay).await;
                    state = State::Attempting;
                }
                State::Attempting => match client.forward(message, destination).await {
                    Ok(()) => {
                        info!(
                            id = %message.id,
                            source = %message.source,
                            destination = %destination,
                            attempts = attempt,
                            "Forwarded message"
                        );
                        return DeliveryOutcome::Delivered { attempts: attempt };
                    }
                    Err(SendError::RateLimited { retry_after }) => {
                        // Expected, not exceptional: wait it out without
                        // touching the retry budget.
                        warn!(
                            id = %message.id,
                            wait_secs = retry_after.as_secs(),
                            "Rate limited, waiting"
                        );
                        state = State::Backoff(retry_after + self.cfg.flood_margin);
                    }
                    Err(SendError::PermissionDenied { destination }) => {
                        error!(id = %message.id, %destination, "Destination forbids writes");
                        return DeliveryOutcome::Abandoned {
                            reason: AbandonReason::PermissionDenied,
                        };
                    }
                    Err(SendError::AuthFailed { reason }) => {
                        error!(id = %message.id, %reason, "Authentication failed during send");
                        return DeliveryOutcome::Abandoned {
                            reason: AbandonReason::AuthFailed(reason),
                        };
                    }
                    Err(e) => {
                        if attempt < self.cfg.max_retries {
                            let delay = self.cfg.backoff_base * attempt;
                            debug!(
                                id = %message.id,
                                attempt,
                                max = self.cfg.max_retries,
                                error = %e,
                                "Send failed, backing off"
                            );
                            attempt += 1;
                            state = State::Backoff(delay);
                        } else {
                            error!(
                                id = %message.id,
                                attempts = attempt,
                                error = %e,
                                "Retries exhausted, abandoning delivery"
                            );
                            return DeliveryOutcome::Abandoned {
                                reason: AbandonReason::RetriesExhausted(e.to_string()),
                            };
                        }
                    }
                },
            }
        }
    }

    /// Post-success pacing: the fixed inter-message delay, longer for album
    /// messages. Separate from `deliver` so the caller can commit the
    /// delivery first; cancelling this wait loses nothing.
    pub async fn throttle(&self, message: &Message) {
        let delay = if message.grouped {
            self.cfg.delay_group
        } else {
            self.cfg.delay_single
        };
        self.sleeper.sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::channel::ChannelEntity;
    use crate::error::ClientError;
    use crate::platform::Subscription;

    /// Records every sleep instead of waiting.
    struct FakeSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl FakeSleeper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                slept: Mutex::new(Vec::new()),
            })
        }

        fn durations(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for FakeSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    /// Client whose `forward` pops scripted results.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<(), SendError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<(), SendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PlatformClient for ScriptedClient {
        async fn resolve(&self, raw: &str) -> Result<ChannelEntity, ClientError> {
            Ok(ChannelEntity::new(raw, raw))
        }
        async fn subscribe(&self, _channel_id: &str) -> Result<Subscription, ClientError> {
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Ok(Subscription { events: rx })
        }
        async fn forward(&self, _m: &Message, _d: &str) -> Result<(), SendError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SendError::Other {
                    reason: "script exhausted".into(),
                }))
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn connect(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn disconnect(&self) {}
    }

    fn engine(sleeper: Arc<FakeSleeper>) -> DeliveryEngine {
        DeliveryEngine::new(
            DeliveryConfig {
                max_retries: 3,
                backoff_base: Duration::from_secs(2),
                flood_margin: Duration::from_secs(5),
                delay_single: Duration::from_secs(1),
                delay_group: Duration::from_secs(4),
            },
            sleeper,
        )
    }

    fn msg() -> Message {
        Message::text("7", "-1001", "hello there everyone")
    }

    #[tokio::test]
    async fn success_returns_without_waiting() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![Ok(())]);
        let outcome = engine(Arc::clone(&sleeper)).deliver(&client, &msg(), "-1002").await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        // Pacing is the caller's business, after the delivery is recorded.
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test]
    async fn throttle_uses_single_and_album_delays() {
        let sleeper = FakeSleeper::new();
        let engine = engine(Arc::clone(&sleeper));
        engine.throttle(&msg()).await;
        engine.throttle(&msg().with_grouped(true)).await;
        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_secs(1), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn rate_limit_waits_at_least_server_duration_then_retries() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![
            Err(SendError::RateLimited {
                retry_after: Duration::from_secs(40),
            }),
            Ok(()),
        ]);
        let outcome = engine(Arc::clone(&sleeper)).deliver(&client, &msg(), "-1002").await;
        // Retried, not abandoned, and the attempt counter was not consumed.
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        // One sleep: W + margin.
        let slept = sleeper.durations();
        assert_eq!(slept, vec![Duration::from_secs(45)]);
        assert!(slept[0] >= Duration::from_secs(40));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn repeated_rate_limits_never_exhaust_the_budget() {
        let sleeper = FakeSleeper::new();
        let mut script: Vec<Result<(), SendError>> = (0..10)
            .map(|_| {
                Err(SendError::RateLimited {
                    retry_after: Duration::from_secs(1),
                })
            })
            .collect();
        script.push(Ok(()));
        let client = ScriptedClient::new(script);
        let outcome = engine(sleeper).deliver(&client, &msg(), "-1002").await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(client.calls(), 11);
    }

    #[tokio::test]
    async fn permission_denied_abandons_without_retry() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![Err(SendError::PermissionDenied {
            destination: "-1002".into(),
        })]);
        let outcome = engine(Arc::clone(&sleeper)).deliver(&client, &msg(), "-1002").await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Abandoned {
                reason: AbandonReason::PermissionDenied
            }
        );
        assert_eq!(client.calls(), 1);
        assert!(sleeper.durations().is_empty());
    }

    #[tokio::test]
    async fn transient_errors_back_off_linearly_then_succeed() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![
            Err(SendError::Other {
                reason: "flaky".into(),
            }),
            Err(SendError::ConnectionLost {
                reason: "reset".into(),
            }),
            Ok(()),
        ]);
        let outcome = engine(Arc::clone(&sleeper)).deliver(&client, &msg(), "-1002").await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        // base*1, base*2.
        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn retries_exhausted_abandons() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![
            Err(SendError::Other { reason: "a".into() }),
            Err(SendError::Other { reason: "b".into() }),
            Err(SendError::Other { reason: "c".into() }),
        ]);
        let outcome = engine(sleeper).deliver(&client, &msg(), "-1002").await;
        match outcome {
            DeliveryOutcome::Abandoned {
                reason: AbandonReason::RetriesExhausted(r),
            } => assert!(r.contains("c")),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_abandons_with_reason() {
        let sleeper = FakeSleeper::new();
        let client = ScriptedClient::new(vec![Err(SendError::AuthFailed {
            reason: "token revoked".into(),
        })]);
        let outcome = engine(sleeper).deliver(&client, &msg(), "-1002").await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Abandoned {
                reason: AbandonReason::AuthFailed("token revoked".into())
            }
        );
    }
}
