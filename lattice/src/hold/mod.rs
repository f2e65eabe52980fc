//! HOLD coordinator: the pause/inspect/resolve primitive.
//!
//! A producer yields a decision snapshot and blocks; listeners are notified
//! in registration order; a resolver accepts or overrides the decision, the
//! hold times out into an auto-accept, or it is cancelled. Both the opening
//! snapshot and the terminal resolution are chained into the receipt ledger,
//! the open strictly before any notification and the close strictly before
//! the producer resumes.
//!
//! Holds are single-flight: at most one hold is in `Notified` state at a
//! time. Concurrent producers queue on a fair gate and are admitted in
//! arrival order. Resolution races (resolve vs timeout vs cancel) settle at
//! a single take-the-sender point under the state lock; the first terminal
//! transition wins and later attempts observe `AlreadyResolved`.

pub mod registry;
pub mod types;

pub use registry::{ListenerId, ListenerRegistry};
pub use types::{HoldListener, HoldPoint, HoldState, Resolution, ResolutionKind, Wealth};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::HoldConfig;
use crate::error::{LatticeError, LatticeResult};
use crate::ledger::ReceiptLedger;

/// Source id of receipts recording hold openings.
pub const HOLD_OPEN_SOURCE: &str = "hold-open";
/// Source id of receipts recording hold resolutions.
pub const HOLD_CLOSE_SOURCE: &str = "hold-close";

/// Message from resolve/cancel to the blocked producer.
enum ResolveMsg {
    Resolved {
        kind: ResolutionKind,
        action: String,
        resolver_id: String,
    },
    Cancelled {
        notes: Option<String>,
    },
}

struct PendingHold {
    hold: HoldPoint,
    /// Taken exactly once by whoever finalizes the hold.
    tx: Option<oneshot::Sender<ResolveMsg>>,
}

#[derive(Default)]
struct CoordinatorState {
    pending: Option<PendingHold>,
    /// Terminal kind per hold id, kept so late resolvers can be told
    /// `AlreadyResolved` rather than `UnknownHold`.
    terminal: HashMap<String, ResolutionKind>,
    shutdown: bool,
    opened: u64,
    accepted: u64,
    overridden: u64,
    timed_out: u64,
    cancelled: u64,
    waiting: u64,
}

/// Snapshot counters for the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldStats {
    /// Holds that recorded a hold-open receipt.
    pub opened: u64,
    pub accepted: u64,
    pub overridden: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Producers currently blocked, notified or queued.
    pub pending: u64,
}

pub struct HoldCoordinator {
    ledger: Arc<ReceiptLedger>,
    config: HoldConfig,
    registry: ListenerRegistry,
    /// Single-flight gate. Tokio's mutex wakes waiters in FIFO order, so
    /// queued producers get their turn in arrival order.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for HoldCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .state
            .lock()
            .ok()
            .and_then(|st| st.pending.as_ref().map(|p| p.hold.hold_id.clone()));
        f.debug_struct("HoldCoordinator")
            .field("pending", &pending)
            .finish()
    }
}

impl HoldCoordinator {
    pub fn new(ledger: Arc<ReceiptLedger>, config: HoldConfig) -> Self {
        Self {
            ledger,
            config,
            registry: ListenerRegistry::new(),
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Add a hold observer; it will see every subsequent hold, after those
    /// registered earlier.
    pub async fn register_listener(&self, listener: Arc<dyn HoldListener>) -> ListenerId {
        self.registry.register(listener).await
    }

    /// Remove a hold observer. An in-flight notification pass keeps its
    /// snapshot; the removal takes effect from the next hold.
    pub async fn unregister_listener(&self, id: &str) -> bool {
        self.registry.unregister(id).await
    }

    /// The hold currently in `Notified` state, if any. A hold whose open
    /// receipt is still being written is not visible yet.
    pub fn current_hold(&self) -> Option<HoldPoint> {
        self.state
            .lock()
            .ok()?
            .pending
            .as_ref()
            .filter(|p| p.hold.state == HoldState::Notified)
            .map(|p| p.hold.clone())
    }

    pub fn stats(&self) -> LatticeResult<HoldStats> {
        let st = self.lock_state()?;
        Ok(HoldStats {
            opened: st.opened,
            accepted: st.accepted,
            overridden: st.overridden,
            timed_out: st.timed_out,
            cancelled: st.cancelled,
            pending: st.waiting,
        })
    }

    /// Pause on a decision snapshot until a resolver, the default timeout or
    /// a cancellation produces a terminal [`Resolution`].
    pub async fn yield_point(
        &self,
        source_id: impl Into<String>,
        action_probs: BTreeMap<String, f64>,
        wealth: Wealth,
    ) -> LatticeResult<Resolution> {
        self.yield_point_with_timeout(source_id, action_probs, wealth, None)
            .await
    }

    /// [`yield_point`](Self::yield_point) with a per-call timeout override.
    pub async fn yield_point_with_timeout(
        &self,
        source_id: impl Into<String>,
        action_probs: BTreeMap<String, f64>,
        wealth: Wealth,
        timeout_ms: Option<u64>,
    ) -> LatticeResult<Resolution> {
        // Validation happens before queueing so a malformed snapshot fails
        // fast instead of waiting for its turn.
        let mut hold = HoldPoint::new(source_id, action_probs, wealth)?;

        self.lock_state()?.waiting += 1;
        let result = self.run_hold(&mut hold, timeout_ms).await;
        if let Ok(mut st) = self.state.lock() {
            st.waiting -= 1;
        }
        result
    }

    async fn run_hold(
        &self,
        hold: &mut HoldPoint,
        timeout_ms: Option<u64>,
    ) -> LatticeResult<Resolution> {
        let _gate = self.gate.lock().await;

        // Register the pending hold before the open receipt lands: a
        // resolver reacting to the receipt must always find the hold, and a
        // message sent this early just waits in the channel until the open
        // is durable. The shutdown check shares this critical section, so a
        // concurrent shutdown either cancels the registered hold or this
        // producer sees the flag; neither can miss the other.
        let (tx, mut rx) = oneshot::channel();
        {
            let mut st = self.lock_state()?;
            if st.shutdown {
                drop(st);
                return self.close_unnotified(hold);
            }
            st.pending = Some(PendingHold {
                hold: hold.clone(),
                tx: Some(tx),
            });
        }

        // The open receipt precedes any notification. If it cannot be made
        // durable the hold never happened: unwind and surface the error.
        let open_payload = serde_json::to_value(&*hold)?;
        match self.ledger.append(HOLD_OPEN_SOURCE, open_payload) {
            Ok(receipt) => {
                log::debug!(
                    "[HoldCoordinator] Opened hold {} (receipt {}, fingerprint {})",
                    hold.hold_id,
                    receipt.cid,
                    hold.fingerprint
                );
            }
            Err(e) => {
                let mut st = self.lock_state()?;
                let acknowledged = st.pending.take().map_or(false, |p| p.tx.is_none());
                if acknowledged {
                    // A resolver was acknowledged while the open write was in
                    // flight; keep the id terminal so its retries answer
                    // AlreadyResolved, not UnknownHold.
                    let kind = match rx.try_recv() {
                        Ok(ResolveMsg::Resolved { kind, .. }) => kind,
                        _ => ResolutionKind::Cancelled,
                    };
                    st.terminal.insert(hold.hold_id.clone(), kind);
                }
                return Err(e);
            }
        }
        self.lock_state()?.opened += 1;

        hold.state = HoldState::Notified;
        {
            let mut st = self.lock_state()?;
            if let Some(pending) = st.pending.as_mut() {
                pending.hold.state = HoldState::Notified;
            }
        }
        let listeners = self.registry.snapshot().await;
        for listener in &listeners {
            listener.on_hold_opened(hold).await;
        }

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.config.default_timeout_ms));
        let outcome = if self.config.auto_accept {
            // Immediate auto-accept; a listener that resolved during its
            // notification still wins the claim.
            self.claim_or_take(&mut rx)?
        } else {
            match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(msg)) => Some(msg),
                Ok(Err(_)) => Some(ResolveMsg::Cancelled {
                    notes: Some("resolver channel closed".to_string()),
                }),
                Err(_) => self.claim_or_take(&mut rx)?,
            }
        };

        let resolution = match outcome {
            Some(ResolveMsg::Resolved {
                kind,
                action,
                resolver_id,
            }) => Resolution::resolved(hold, kind, action, resolver_id),
            Some(ResolveMsg::Cancelled { notes }) => Resolution::cancelled(hold, notes),
            None => Resolution::timed_out(hold),
        };

        {
            let mut st = self.lock_state()?;
            st.pending = None;
            st.terminal.insert(hold.hold_id.clone(), resolution.kind);
            match resolution.kind {
                ResolutionKind::Accept => st.accepted += 1,
                ResolutionKind::Override => st.overridden += 1,
                ResolutionKind::TimeoutAutoAccept => st.timed_out += 1,
                ResolutionKind::Cancelled => st.cancelled += 1,
            }
        }

        // The close receipt happens-before the producer resumes.
        self.ledger
            .append(HOLD_CLOSE_SOURCE, serde_json::to_value(&resolution)?)?;
        log::info!(
            "[HoldCoordinator] Hold {} closed: {:?} after {} ms",
            resolution.hold_id,
            resolution.kind,
            resolution.hold_duration_ms
        );

        let listeners = self.registry.snapshot().await;
        for listener in &listeners {
            listener.on_hold_resolved(&resolution).await;
        }

        Ok(resolution)
    }

    /// Claim the hold for local finalization. Returns the resolver's message
    /// when one won the race, `None` when the claim succeeded and the hold
    /// times out (or auto-accepts).
    fn claim_or_take(
        &self,
        rx: &mut oneshot::Receiver<ResolveMsg>,
    ) -> LatticeResult<Option<ResolveMsg>> {
        let claimed = {
            let mut st = self.lock_state()?;
            st.pending.as_mut().and_then(|p| p.tx.take())
        };
        if claimed.is_some() {
            Ok(None)
        } else {
            // A resolver took the sender first; its message is already in
            // the channel because the send happens under the state lock.
            Ok(rx.try_recv().ok())
        }
    }

    /// Close a hold that is being cancelled before notification (shutdown
    /// drain or a yield after shutdown): record the paired receipts, skip
    /// listeners.
    fn close_unnotified(&self, hold: &mut HoldPoint) -> LatticeResult<Resolution> {
        self.ledger
            .append(HOLD_OPEN_SOURCE, serde_json::to_value(&*hold)?)?;
        self.lock_state()?.opened += 1;

        hold.state = HoldState::Cancelled;
        let resolution = Resolution::cancelled(hold, Some("coordinator shutdown".to_string()));
        {
            let mut st = self.lock_state()?;
            st.terminal.insert(hold.hold_id.clone(), resolution.kind);
            st.cancelled += 1;
        }
        self.ledger
            .append(HOLD_CLOSE_SOURCE, serde_json::to_value(&resolution)?)?;
        log::debug!(
            "[HoldCoordinator] Hold {} cancelled before notification",
            hold.hold_id
        );
        Ok(resolution)
    }

    /// Resolve the named pending hold with one of its offered labels.
    /// Returns the kind the blocked producer will observe: `Accept` when
    /// `action` is the hold's own top choice, `Override` otherwise.
    pub fn resolve(
        &self,
        hold_id: &str,
        action: &str,
        resolver_id: &str,
    ) -> LatticeResult<ResolutionKind> {
        let mut st = self.lock_state()?;
        if st.terminal.contains_key(hold_id) {
            return Err(LatticeError::AlreadyResolved {
                hold_id: hold_id.to_string(),
            });
        }
        let pending = match st.pending.as_mut() {
            Some(p) if p.hold.hold_id == hold_id => p,
            _ => {
                return Err(LatticeError::UnknownHold {
                    hold_id: hold_id.to_string(),
                })
            }
        };
        if !pending.hold.offers(action) {
            return Err(LatticeError::InvalidAction {
                hold_id: hold_id.to_string(),
                action: action.to_string(),
            });
        }
        let kind = if action == pending.hold.chosen {
            ResolutionKind::Accept
        } else {
            ResolutionKind::Override
        };
        let tx = pending.tx.take().ok_or_else(|| LatticeError::AlreadyResolved {
            hold_id: hold_id.to_string(),
        })?;
        // Send under the lock so the waiter's claim can never observe the
        // sender taken but the channel still empty.
        if tx
            .send(ResolveMsg::Resolved {
                kind,
                action: action.to_string(),
                resolver_id: resolver_id.to_string(),
            })
            .is_err()
        {
            return Err(LatticeError::AlreadyResolved {
                hold_id: hold_id.to_string(),
            });
        }
        log::info!(
            "[HoldCoordinator] Hold {} resolved by {} -> {} ({:?})",
            hold_id,
            resolver_id,
            action,
            kind
        );
        Ok(kind)
    }

    /// Force the named pending hold to `Cancelled`, unblocking its waiter.
    pub fn cancel(&self, hold_id: &str) -> LatticeResult<()> {
        let mut st = self.lock_state()?;
        if st.terminal.contains_key(hold_id) {
            return Err(LatticeError::AlreadyResolved {
                hold_id: hold_id.to_string(),
            });
        }
        let pending = match st.pending.as_mut() {
            Some(p) if p.hold.hold_id == hold_id => p,
            _ => {
                return Err(LatticeError::UnknownHold {
                    hold_id: hold_id.to_string(),
                })
            }
        };
        let tx = pending.tx.take().ok_or_else(|| LatticeError::AlreadyResolved {
            hold_id: hold_id.to_string(),
        })?;
        if tx
            .send(ResolveMsg::Cancelled { notes: None })
            .is_err()
        {
            return Err(LatticeError::AlreadyResolved {
                hold_id: hold_id.to_string(),
            });
        }
        log::info!("[HoldCoordinator] Hold {} cancelled", hold_id);
        Ok(())
    }

    /// Cancel the notified hold and drain the queue: every queued producer
    /// wakes, records its paired receipts and returns `Cancelled`, in queue
    /// order. Returns once the queue is empty.
    pub async fn shutdown(&self) {
        {
            let mut st = match self.state.lock() {
                Ok(st) => st,
                Err(_) => return,
            };
            st.shutdown = true;
            if let Some(pending) = st.pending.as_mut() {
                if let Some(tx) = pending.tx.take() {
                    let _ = tx.send(ResolveMsg::Cancelled {
                        notes: Some("coordinator shutdown".to_string()),
                    });
                }
            }
        }
        // Queue behind every already-waiting producer; holding the gate
        // means each of them reached its terminal receipt.
        let _gate = self.gate.lock().await;
        log::info!("[HoldCoordinator] Shutdown complete, hold queue drained");
    }

    fn lock_state(&self) -> LatticeResult<MutexGuard<'_, CoordinatorState>> {
        self.state
            .lock()
            .map_err(|_| LatticeError::Storage("coordinator state lock poisoned".to_string()))
    }
}
