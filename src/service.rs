//! Relay service — the event loop tying ingestion, classification,
//! deduplication, delivery, and rotation together.
//!
//! Flow per event: ledger idempotence check → fingerprint/dedup novelty
//! check → classifier → claim → delivery → commit → rotation check. Drops
//! and per-message failures are logged and the loop continues; fatal
//! conditions (empty account pool, reconnection exhaustion) stop the whole
//! service after flushing persisted state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::accounts::AccountPool;
use crate::channel::ChannelEntity;
use crate::config::Config;
use crate::delivery::{AbandonReason, DeliveryEngine, DeliveryOutcome};
use crate::error::{Error, Result};
use crate::filter::{Classifier, Verdict};
use crate::ingest::ListenerRegistry;
use crate::message::Message;
use crate::store::{DedupStore, ForwardLedger, fingerprint, ledger_key};
use crate::supervisor::{SupervisorConfig, spawn_supervisor};

/// Capacity of the central event queue between listeners and the loop.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// A reserved right to deliver one message. Handed out by [`CommitGate`] at
/// most once per fingerprint / ledger triple; consumed by `commit` or
/// returned by `release`.
#[must_use]
pub struct Claim {
    source: String,
    destination: String,
    msg_id: String,
    fp: String,
}

/// Serialized commit path for the ledger and dedup store.
///
/// Listener interleaving means two events with the same fingerprint (or the
/// same ledger triple) can both be mid-flight before either commits. The
/// gate closes that window: claims are taken under one lock against both the
/// persisted state and the in-flight set, so at most one delivery per
/// fingerprint or triple can ever proceed.
pub struct CommitGate {
    ledger: ForwardLedger,
    dedup: DedupStore,
    in_flight: Mutex<HashSet<String>>,
}

impl CommitGate {
    pub fn new(ledger: ForwardLedger, dedup: DedupStore) -> Self {
        Self {
            ledger,
            dedup,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &ForwardLedger {
        &self.ledger
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Atomically re-check both stores and reserve the fingerprint and
    /// ledger triple. `None` means another in-flight or committed delivery
    /// already owns one of them.
    pub fn try_claim(
        &self,
        source: &str,
        destination: &str,
        msg_id: &str,
        fp: &str,
    ) -> Option<Claim> {
        let triple = format!("{}#{msg_id}", ledger_key(source, destination));
        let mut in_flight = self.in_flight.lock().expect("commit gate lock poisoned");

        if self.ledger.already_forwarded(source, destination, msg_id)
            || self.dedup.is_duplicate(fp)
            || in_flight.contains(&triple)
            || in_flight.contains(fp)
        {
            return None;
        }

        in_flight.insert(triple);
        in_flight.insert(fp.to_string());
        Some(Claim {
            source: source.to_string(),
            destination: destination.to_string(),
            msg_id: msg_id.to_string(),
            fp: fp.to_string(),
        })
    }

    /// Record the delivery in both stores and release the claim. Persist
    /// failures are logged; the in-memory state stays authoritative.
    pub async fn commit(&self, claim: Claim, source_desc: &str) {
        if let Err(e) = self
            .ledger
            .record(&claim.source, &claim.destination, &claim.msg_id)
            .await
        {
            warn!(error = %e, "Ledger persist failed, continuing with in-memory state");
        }
        if let Err(e) = self.dedup.record(&claim.fp, source_desc).await {
            warn!(error = %e, "Dedup persist failed, continuing with in-memory state");
        }
        self.release(claim);
    }

    /// Give the claim back without recording anything.
    pub fn release(&self, claim: Claim) {
        let triple = format!("{}#{}", ledger_key(&claim.source, &claim.destination), claim.msg_id);
        let mut in_flight = self.in_flight.lock().expect("commit gate lock poisoned");
        in_flight.remove(&triple);
        in_flight.remove(&claim.fp);
    }

    /// Rewrite both persisted files from in-memory state.
    pub async fn flush(&self) {
        if let Err(e) = self.ledger.flush().await {
            error!(error = %e, "Final ledger flush failed");
        }
        if let Err(e) = self.dedup.flush().await {
            error!(error = %e, "Final dedup flush failed");
        }
    }
}

/// The running relay: owns the pool, the pipeline, and the stop signal.
pub struct RelayService {
    config: Arc<Config>,
    pool: Arc<AccountPool>,
    classifier: Classifier,
    gate: Arc<CommitGate>,
    delivery: DeliveryEngine,
    sources: Vec<ChannelEntity>,
    destination: ChannelEntity,
    stop: watch::Sender<bool>,
}

impl RelayService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        pool: Arc<AccountPool>,
        classifier: Classifier,
        gate: Arc<CommitGate>,
        delivery: DeliveryEngine,
        sources: Vec<ChannelEntity>,
        destination: ChannelEntity,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            pool,
            classifier,
            gate,
            delivery,
            sources,
            destination,
            stop,
        }
    }

    /// Handle for requesting a service-wide stop (e.g. from a SIGINT task).
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop.clone()
    }

    /// Run until stopped. Binds listeners, spawns the supervisor, and drives
    /// the event loop; flushes persisted state before returning.
    pub async fn run(&self) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut registry = ListenerRegistry::new(events_tx);

        let account = self.pool.current()?;
        registry
            .bind_all(&account.client, &self.sources)
            .await
            .map_err(Error::Client)?;

        info!(
            account = %account.name,
            sources = self.sources.len(),
            destination = %self.destination.display_name,
            "Relay started"
        );

        let supervisor = spawn_supervisor(
            Arc::clone(&self.pool),
            SupervisorConfig {
                check_interval: self.config.health_check_interval(),
                reconnect_delay: self.config.reconnect_delay(),
                max_reconnect_attempts: self.config.max_reconnect_attempts,
            },
            self.stop.clone(),
        );

        let mut stop_rx = self.stop.subscribe();
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                maybe_event = events_rx.recv() => match maybe_event {
                    Some(message) => self.handle_event(message, &mut registry).await,
                    None => break,
                },
            }
        }

        registry.unbind_all();
        supervisor.abort();
        self.gate.flush().await;
        info!("Relay stopped, state flushed");
        Ok(())
    }

    /// Process one inbound event. Never propagates an error; everything
    /// non-fatal is logged and the loop moves on.
    async fn handle_event(&self, message: Message, registry: &mut ListenerRegistry) {
        let destination = self.destination.canonical_id.clone();

        if self
            .gate
            .ledger()
            .already_forwarded(&message.source, &destination, &message.id)
        {
            debug!(id = %message.id, "Skipping already-forwarded message");
            return;
        }

        let fp = fingerprint(&message);
        if self.gate.dedup().is_duplicate(&fp) {
            debug!(id = %message.id, fingerprint = %fp, "Skipping duplicate content");
            return;
        }

        let verdict = self.classifier.classify(&message);
        if verdict != Verdict::Pass {
            info!(id = %message.id, verdict = verdict.label(), "Message filtered");
            return;
        }

        let Some(claim) = self
            .gate
            .try_claim(&message.source, &destination, &message.id, &fp)
        else {
            debug!(id = %message.id, "Delivery already in flight or recorded");
            return;
        };

        let account = match self.pool.current() {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "No usable account, stopping service");
                self.gate.release(claim);
                let _ = self.stop.send(true);
                return;
            }
        };

        let mut stop_rx = self.stop.subscribe();
        let outcome = tokio::select! {
            outcome = self.delivery.deliver(account.client.as_ref(), &message, &destination) => outcome,
            _ = stop_rx.changed() => {
                self.gate.release(claim);
                return;
            }
        };

        match outcome {
            DeliveryOutcome::Delivered { .. } => {
                // The forward hit the wire: record it before any further
                // wait, so a stop signal cannot leave a delivered message
                // unrecorded.
                self.gate.commit(claim, &self.describe_source(&message.source)).await;
                self.pool.record_forward();
                tokio::select! {
                    _ = self.delivery.throttle(&message) => {}
                    _ = stop_rx.changed() => return,
                }
                if self.config.rotation.enabled
                    && self.pool.should_rotate(self.config.rotation.threshold)
                {
                    self.rotate(registry).await;
                }
            }
            DeliveryOutcome::Abandoned {
                reason: AbandonReason::AuthFailed(reason),
            } => {
                // Unrecoverable for this account: drop it from rotation and
                // move the listeners, or stop if the pool is empty.
                warn!(account = %account.name, %reason, "Disabling account after auth failure");
                self.gate
                    .commit(claim, &self.describe_source(&message.source))
                    .await;
                self.pool.disable(&account.name);
                match self.pool.current() {
                    Ok(next) => {
                        registry.unbind_all();
                        if let Err(e) = registry.bind_all(&next.client, &self.sources).await {
                            error!(error = %e, "Rebind after account disable failed, stopping");
                            let _ = self.stop.send(true);
                        }
                    }
                    Err(_) => {
                        error!("All accounts disabled, stopping service");
                        let _ = self.stop.send(true);
                    }
                }
            }
            DeliveryOutcome::Abandoned { reason } => {
                // Recorded even though delivery failed: the message will not
                // be retried on a later sighting.
                warn!(id = %message.id, ?reason, "Delivery abandoned");
                self.gate
                    .commit(claim, &self.describe_source(&message.source))
                    .await;
            }
        }
    }

    /// Switch to the next account and rebind every source listener to it.
    ///
    /// Between unbind and rebind no listener is installed; events arriving
    /// in that window are not observed.
    async fn rotate(&self, registry: &mut ListenerRegistry) {
        info!(
            threshold = self.config.rotation.threshold,
            "Rotation threshold reached"
        );
        if !self.pool.advance() {
            return;
        }

        let mut stop_rx = self.stop.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(self.config.switch_delay()) => {}
            _ = stop_rx.changed() => return,
        }

        let account = match self.pool.current() {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "Pool emptied during rotation, stopping");
                let _ = self.stop.send(true);
                return;
            }
        };

        registry.unbind_all();
        if let Err(e) = registry.bind_all(&account.client, &self.sources).await {
            error!(error = %e, "Rebind after rotation failed, stopping");
            let _ = self.stop.send(true);
            return;
        }
        self.pool.reset_counter();
        info!(account = %account.name, "Rotation complete");
    }

    fn describe_source(&self, canonical_id: &str) -> String {
        self.sources
            .iter()
            .find(|c| c.canonical_id == canonical_id)
            .map(|c| format!("{}({})", c.display_name, c.canonical_id))
            .unwrap_or_else(|| canonical_id.to_string())
    }
}
