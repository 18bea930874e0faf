//! Guarded waiter registry.
//!
//! A mapping from opaque tokens to pending one-shot continuations, protected
//! by a reader/writer lock. Callers park on a value that is not available
//! yet (a token being refreshed, a connection id being assigned) and are
//! resolved exactly once, either with the value or by their own timeout,
//! whichever fires first. The one-shot channel makes double resolution
//! unrepresentable.
//!
//! Bulk resolution drains entries out of the map first and completes the
//! channels only after the lock is released, so a continuation that
//! immediately performs another guarded operation cannot deadlock.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

/// Why a wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The per-waiter deadline elapsed before resolution.
    #[error("wait timed out")]
    TimedOut,
    /// The entry was removed (or the registry dropped) before resolution.
    #[error("wait cancelled")]
    Cancelled,
}

/// Opaque identity of a registered waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterToken(Uuid);

impl WaiterToken {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

/// A registered, not yet resolved wait.
#[derive(Debug)]
pub struct PendingWait<V> {
    token: WaiterToken,
    rx: oneshot::Receiver<V>,
}

impl<V> PendingWait<V> {
    #[must_use]
    pub fn token(&self) -> WaiterToken {
        self.token
    }
}

/// Registry of callers waiting for a value that is not available yet.
///
/// `V` is cloned into every pending waiter on bulk resolution. Callers that
/// already hold the value short-circuit without registering; that fast path
/// belongs to the owner of the cached value, not to the registry.
#[derive(Debug)]
pub struct WaiterRegistry<V> {
    waiters: RwLock<HashMap<WaiterToken, oneshot::Sender<V>>>,
}

impl<V: Clone> WaiterRegistry<V> {
    #[must_use]
    pub fn new() -> Self {
        Self { waiters: RwLock::new(HashMap::new()) }
    }

    /// Registers a waiter; the caller owns the receiving half.
    pub fn register(&self) -> PendingWait<V> {
        let (tx, rx) = oneshot::channel();
        let token = WaiterToken::new();
        self.waiters.write().insert(token, tx);
        PendingWait { token, rx }
    }

    /// Registers and awaits in one call, bounded by `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<V, WaitError> {
        let pending = self.register();
        self.await_pending(pending, timeout).await
    }

    /// Awaits an already-registered wait, bounded by `timeout`. A timed-out
    /// entry is removed from the map; the underlying operation may still
    /// complete later and will simply find no waiter to notify.
    pub async fn await_pending(
        &self,
        pending: PendingWait<V>,
        timeout: Duration,
    ) -> Result<V, WaitError> {
        let PendingWait { token, rx } = pending;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => {
                self.cancel(token);
                trace!(?token, ?timeout, "waiter timed out");
                Err(WaitError::TimedOut)
            }
        }
    }

    /// Resolves a single waiter. Returns `false` when the token is unknown
    /// (already resolved, timed out, or cancelled).
    pub fn resolve(&self, token: WaiterToken, value: V) -> bool {
        let sender = self.waiters.write().remove(&token);
        sender.is_some_and(|tx| tx.send(value).is_ok())
    }

    /// Resolves every pending waiter with a clone of `value` and clears the
    /// map. The channels complete after the write lock is released.
    pub fn resolve_all(&self, value: V) {
        let drained: Vec<oneshot::Sender<V>> = {
            let mut waiters = self.waiters.write();
            waiters.drain().map(|(_, tx)| tx).collect()
        };
        if drained.is_empty() {
            return;
        }
        trace!(count = drained.len(), "resolving pending waiters");
        for tx in drained {
            let _ = tx.send(value.clone());
        }
    }

    /// Removes a waiter without resolving it; its receiver observes
    /// [`WaitError::Cancelled`].
    pub fn cancel(&self, token: WaiterToken) -> bool {
        self.waiters.write().remove(&token).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.read().is_empty()
    }
}

impl<V: Clone> Default for WaiterRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
