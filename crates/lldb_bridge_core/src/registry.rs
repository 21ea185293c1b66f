//! Keyed set of live debugger sessions.
//!
//! The map lock only guards membership. Each session sits behind its own
//! slot lock, which is held for the whole duration of a command, so commands
//! on one session are serialized while different sessions proceed in
//! parallel. The map lock is never held while awaiting a slot lock.

use crate::error::SessionError;
use crate::session::DebuggerSession;
use crate::types::{SessionKey, SessionSummary};
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

type Slot = Arc<Mutex<Option<DebuggerSession>>>;

/// Exclusive access to one registered session.
pub type SessionHandle = OwnedMappedMutexGuard<Option<DebuggerSession>, DebuggerSession>;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Slot>>,
    idle_ttl: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Returns the live session for `key`, creating it with `factory` if absent.
    ///
    /// Concurrent callers for the same key wait on the same slot, so the
    /// factory runs at most once per key. A dead or idle-expired session is
    /// shut down and replaced.
    ///
    /// The factory should return a fully initialized session (attached, for
    /// instance): nothing is registered until it succeeds. If this future is
    /// dropped midway, the half-built session is dropped with it, which kills
    /// its debugger, and the empty slot is unregistered.
    pub async fn get_or_create<F, Fut>(&self, key: &SessionKey, factory: F) -> Result<SessionHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DebuggerSession>>,
    {
        let mut factory = Some(factory);
        loop {
            let slot = {
                let mut sessions = self.sessions.lock().await;
                sessions.entry(key.clone()).or_default().clone()
            };
            // Declared before the slot guard so it runs after the guard is released.
            let _vacancy = VacantSlot {
                registry: self,
                key,
                slot: slot.clone(),
            };
            let mut guard = slot.clone().lock_owned().await;
            if !self.still_registered(key, &slot).await {
                // Removed while we waited; start over with a fresh slot.
                continue;
            }

            if let Some(session) = guard.as_mut() {
                if session.is_alive() && !self.is_stale(session) {
                    tracing::debug!(key = %key, "Reusing debugger session");
                    return Ok(map_guard(guard));
                }
                tracing::info!(key = %key, state = %session.state(), "Replacing dead or idle debugger session");
                if let Some(old) = guard.take() {
                    old.shutdown().await;
                }
            }

            let Some(factory) = factory.take() else {
                return Err(SessionError::SessionNotFound { key: key.clone() });
            };
            match factory().await {
                Ok(session) => {
                    tracing::info!(key = %key, "Registered debugger session");
                    *guard = Some(session);
                    return Ok(map_guard(guard));
                }
                Err(e) => {
                    drop(guard);
                    self.discard_empty(key, &slot).await;
                    return Err(e);
                }
            }
        }
    }

    /// Returns the live session for `key`; dead sessions are evicted.
    pub async fn get(&self, key: &SessionKey) -> Result<SessionHandle> {
        let slot = {
            let sessions = self.sessions.lock().await;
            sessions.get(key).cloned()
        }
        .ok_or_else(|| SessionError::SessionNotFound { key: key.clone() })?;

        let mut guard = slot.clone().lock_owned().await;
        if !self.still_registered(key, &slot).await {
            // Removed while we waited; the remover owns teardown.
            return Err(SessionError::SessionNotFound { key: key.clone() });
        }
        if guard.as_mut().is_some_and(DebuggerSession::is_alive) {
            return Ok(map_guard(guard));
        }

        let dead = guard.take();
        drop(guard);
        self.discard_empty(key, &slot).await;
        if let Some(session) = dead {
            tracing::info!(key = %key, "Evicting dead debugger session");
            session.shutdown().await;
        }
        Err(SessionError::SessionNotFound { key: key.clone() })
    }

    /// Unregisters `key` and tears its session down.
    ///
    /// Waits for any in-flight command on the session to finish first.
    pub async fn remove(&self, key: &SessionKey) -> Result<()> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(key)
        }
        .ok_or_else(|| SessionError::SessionNotFound { key: key.clone() })?;

        let session = slot.lock().await.take();
        match session {
            Some(session) => {
                session.shutdown().await;
                tracing::info!(key = %key, "Removed debugger session");
                Ok(())
            }
            None => Err(SessionError::SessionNotFound { key: key.clone() }),
        }
    }

    pub async fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Summaries of sessions not currently busy with a command.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let slots: Vec<Slot> = self.sessions.lock().await.values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.try_lock().ok()?;
                guard.as_ref().map(DebuggerSession::summary)
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// Shuts down idle-expired or dead sessions that are not in use. Returns their keys.
    pub async fn prune_stale(&self) -> Vec<SessionKey> {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.lock().await;
            sessions.retain(|key, slot| {
                let Ok(mut guard) = slot.clone().try_lock_owned() else {
                    return true;
                };
                let stale = match guard.as_mut() {
                    Some(session) => !session.is_alive() || self.is_stale(session),
                    // Slot left empty by a failed creation.
                    None => true,
                };
                if stale {
                    if let Some(session) = guard.take() {
                        expired.push((key.clone(), session));
                    }
                }
                !stale
            });
        }

        let mut keys = Vec::with_capacity(expired.len());
        for (key, session) in expired {
            tracing::info!(key = %key, idle_secs = session.idle_for().as_secs(), "Pruning debugger session");
            session.shutdown().await;
            keys.push(key);
        }
        keys.sort();
        keys
    }

    /// Tears every session down.
    pub async fn shutdown_all(&self) {
        for key in self.keys().await {
            let _ = self.remove(&key).await;
        }
    }

    fn is_stale(&self, session: &DebuggerSession) -> bool {
        self.idle_ttl.is_some_and(|ttl| session.idle_for() >= ttl)
    }

    async fn still_registered(&self, key: &SessionKey, slot: &Slot) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(key).is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drops the slot for `key` if it is still `slot` and holds no session.
    async fn discard_empty(&self, key: &SessionKey, slot: &Slot) {
        let mut sessions = self.sessions.lock().await;
        remove_if_vacant(&mut sessions, key, slot);
    }
}

fn remove_if_vacant(sessions: &mut HashMap<SessionKey, Slot>, key: &SessionKey, slot: &Slot) {
    let vacant = sessions.get(key).is_some_and(|current| {
        Arc::ptr_eq(current, slot) && current.try_lock().is_ok_and(|guard| guard.is_none())
    });
    if vacant {
        sessions.remove(key);
    }
}

/// Unregisters a slot that creation left empty, including when the creating
/// future is dropped. A slot still locked or holding a session is left alone.
struct VacantSlot<'a> {
    registry: &'a SessionRegistry,
    key: &'a SessionKey,
    slot: Slot,
}

impl Drop for VacantSlot<'_> {
    fn drop(&mut self) {
        // Under contention the slot stays; `get` and `prune_stale` discard empty slots.
        if let Ok(mut sessions) = self.registry.sessions.try_lock() {
            remove_if_vacant(&mut sessions, self.key, &self.slot);
        }
    }
}

fn map_guard(guard: OwnedMutexGuard<Option<DebuggerSession>>) -> SessionHandle {
    // Callers only map guards whose slot holds a session.
    match OwnedMutexGuard::try_map(guard, Option::as_mut) {
        Ok(handle) => handle,
        Err(_) => unreachable!("slot checked to hold a session"),
    }
}
