//! Connection supervisor — periodic health check and bounded reconnection.
//!
//! Runs independently of message flow. When the current account's connection
//! goes dead, reconnection is attempted with a fixed delay between attempts
//! up to a configured ceiling; a success resets the attempt counter. Hitting
//! the ceiling is fatal: the supervisor signals a service-wide stop so state
//! can be flushed and the process can exit cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountPool;

/// Supervisor timing knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub check_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

/// Spawn the supervision loop. Sends `true` on the stop channel when
/// reconnection is exhausted or the account pool empties.
pub fn spawn_supervisor(
    pool: Arc<AccountPool>,
    cfg: SupervisorConfig,
    stop: watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut stop_rx = stop.subscribe();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(cfg.check_interval);
        // The first tick fires immediately; skip it so startup connects are
        // not double-checked.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("Supervisor stopping");
                    return;
                }
                _ = tick.tick() => {}
            }

            let account = match pool.current() {
                Ok(a) => a,
                Err(e) => {
                    error!(error = %e, "Account pool is empty, stopping service");
                    let _ = stop.send(true);
                    return;
                }
            };

            if account.client.is_connected().await {
                debug!(account = %account.name, "Health check passed");
                continue;
            }

            warn!(account = %account.name, "Connection dead, reconnecting");
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                if attempts > cfg.max_reconnect_attempts {
                    error!(
                        account = %account.name,
                        max = cfg.max_reconnect_attempts,
                        "Reconnection attempts exhausted, stopping service"
                    );
                    let _ = stop.send(true);
                    return;
                }

                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("Supervisor stopping mid-reconnect");
                        return;
                    }
                    _ = tokio::time::sleep(cfg.reconnect_delay) => {}
                }

                match account.client.connect().await {
                    Ok(()) => {
                        info!(account = %account.name, attempts, "Reconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(
                            account = %account.name,
                            attempt = attempts,
                            max = cfg.max_reconnect_attempts,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::accounts::Account;
    use crate::channel::ChannelEntity;
    use crate::error::{ClientError, SendError};
    use crate::message::Message;
    use crate::platform::{PlatformClient, Subscription};

    /// Client whose liveness and connect results are scripted.
    struct FlakyClient {
        alive: AtomicBool,
        connect_failures_left: Mutex<u32>,
        connects: AtomicU32,
    }

    impl FlakyClient {
        fn dead(connect_failures: u32) -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(false),
                connect_failures_left: Mutex::new(connect_failures),
                connects: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PlatformClient for FlakyClient {
        async fn resolve(&self, raw: &str) -> Result<ChannelEntity, ClientError> {
            Ok(ChannelEntity::new(raw, raw))
        }
        async fn subscribe(&self, _channel_id: &str) -> Result<Subscription, ClientError> {
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Ok(Subscription { events: rx })
        }
        async fn forward(&self, _m: &Message, _d: &str) -> Result<(), SendError> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
        async fn connect(&self) -> Result<(), ClientError> {
            self.connects.fetch_add(1, Ordering::Relaxed);
            let mut left = self.connect_failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ClientError::ConnectFailed {
                    account: "test".into(),
                    reason: "still down".into(),
                });
            }
            self.alive.store(true, Ordering::Relaxed);
            Ok(())
        }
        async fn disconnect(&self) {}
    }

    fn pool_with(client: Arc<FlakyClient>) -> Arc<AccountPool> {
        Arc::new(AccountPool::new(vec![Arc::new(Account::new(
            "a",
            client as Arc<dyn PlatformClient>,
        ))]))
    }

    fn fast_cfg(max: u32) -> SupervisorConfig {
        SupervisorConfig {
            check_interval: Duration::from_millis(10),
            reconnect_delay: Duration::from_millis(1),
            max_reconnect_attempts: max,
        }
    }

    #[tokio::test]
    async fn exhausted_reconnects_signal_stop() {
        let client = FlakyClient::dead(u32::MAX);
        let pool = pool_with(Arc::clone(&client));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = spawn_supervisor(pool, fast_cfg(3), stop_tx);

        tokio::time::timeout(Duration::from_secs(5), stop_rx.changed())
            .await
            .expect("supervisor should signal stop")
            .unwrap();
        assert!(*stop_rx.borrow());
        // Ceiling respected: exactly max attempts were made.
        assert_eq!(client.connects.load(Ordering::Relaxed), 3);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn successful_reconnect_resets_and_continues() {
        let client = FlakyClient::dead(2);
        let pool = pool_with(Arc::clone(&client));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_supervisor(pool, fast_cfg(3), stop_tx.clone());

        // Two failures then success, all within the ceiling.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!*stop_rx.borrow(), "no stop after recovery");
        assert_eq!(client.connects.load(Ordering::Relaxed), 3);

        let _ = stop_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn healthy_connection_needs_no_action() {
        let client = FlakyClient::dead(0);
        client.alive.store(true, Ordering::Relaxed);
        let pool = pool_with(Arc::clone(&client));
        let (stop_tx, _stop_rx) = watch::channel(false);

        let handle = spawn_supervisor(pool, fast_cfg(3), stop_tx.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.connects.load(Ordering::Relaxed), 0);

        let _ = stop_tx.send(true);
        handle.await.unwrap();
    }
}
