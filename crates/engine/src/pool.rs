//! Bounded pool of browser sessions
//!
//! A session is held by exactly one worker for the full duration of a
//! context and goes back to the pool when the worker is done with it.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::browser::{BrowserSession, SessionFactory};
use crate::error::{EngineError, EngineResult};

/// A browser session plus what it has already loaded
pub struct BrowserSlot {
    pub session: Box<dyn BrowserSession>,
    /// URLs whose browser cache was already warmed up in this session
    pub warmed_up: HashSet<String>,
}

impl BrowserSlot {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session,
            warmed_up: HashSet::new(),
        }
    }
}

/// Session pool bounded by a semaphore
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<BrowserSlot>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, max_sessions: usize) -> Self {
        Self {
            factory,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Wait for a free slot and hand out an idle or freshly opened session.
    ///
    /// Failing to open a session is fatal for the job.
    pub async fn acquire(&self) -> EngineResult<PooledSession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::JobFatal("Session pool is closed".to_string()))?;

        let reused = self.idle.lock().pop();
        let slot = match reused {
            Some(slot) => slot,
            None => {
                let session = self.factory.open().await.map_err(|e| {
                    EngineError::JobFatal(format!("No browser session available: {}", e))
                })?;
                debug!("Opened new browser session");
                BrowserSlot::new(session)
            }
        };

        Ok(PooledSession {
            slot,
            _permit: permit,
        })
    }

    /// Return a healthy session for reuse
    pub fn release(&self, lease: PooledSession) {
        self.idle.lock().push(lease.slot);
    }

    /// Number of sessions waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Close every idle session
    pub async fn shutdown(&self) {
        self.permits.close();
        let slots = std::mem::take(&mut *self.idle.lock());
        for mut slot in slots {
            if let Err(e) = slot.session.close().await {
                warn!("Failed to close browser session: {}", e);
            }
        }
    }
}

/// Exclusive lease on a session
///
/// Give it back with [`SessionPool::release`] or close it with
/// [`PooledSession::discard`]. A lease that is simply dropped frees its
/// permit but its session is not reused.
pub struct PooledSession {
    slot: BrowserSlot,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn slot(&mut self) -> &mut BrowserSlot {
        &mut self.slot
    }

    /// Close the session instead of returning it, e.g. after a failure left
    /// it in an unknown state
    pub async fn discard(mut self) {
        if let Err(e) = self.slot.session.close().await {
            warn!("Failed to close discarded browser session: {}", e);
        }
    }
}
