//! Session Registry
//!
//! A process-wide index of the calls that currently hold a connection. It exists
//! for observability and cleanup only; sessions never coordinate through it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("call '{0}' already has an active session")]
    AlreadyActive(String),
}

/// A registered call as seen from outside its session.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCall {
    pub call_id: String,
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    calls: Mutex<HashMap<String, ActiveCall>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted call. The entry lives as long as the returned guard.
    pub fn register(
        self: &Arc<Self>,
        call_id: &str,
        connection_id: Uuid,
    ) -> Result<Registration, RegistryError> {
        let mut calls = self.lock();
        if calls.contains_key(call_id) {
            return Err(RegistryError::AlreadyActive(call_id.to_string()));
        }
        calls.insert(
            call_id.to_string(),
            ActiveCall {
                call_id: call_id.to_string(),
                connection_id,
                connected_at: Utc::now(),
            },
        );
        debug!(call_id, active = calls.len(), "Call registered");

        Ok(Registration {
            registry: Arc::clone(self),
            call_id: call_id.to_string(),
        })
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.lock().contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Active calls, oldest connection first.
    pub fn snapshot(&self) -> Vec<ActiveCall> {
        let mut calls: Vec<ActiveCall> = self.lock().values().cloned().collect();
        calls.sort_by_key(|c| c.connected_at);
        calls
    }

    fn remove(&self, call_id: &str) {
        let mut calls = self.lock();
        calls.remove(call_id);
        debug!(call_id, active = calls.len(), "Call deregistered");
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes its call from the registry when dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    call_id: String,
}

impl Registration {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.call_id);
    }
}
