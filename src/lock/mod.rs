//! Per-resource TTL locks.
//!
//! One [`ResourceLock`] singleton exists per resource path. A lock is held
//! until its owner releases it or its TTL lapses; expiry is driven by a
//! single pending timer per lock and, as a backstop, lazily on read, so no
//! reader ever observes an over-TTL lock as held. Acquisition never waits:
//! contention returns a conflict immediately.

pub mod store;

use crate::{storage, HubError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, path::PathBuf, sync::Arc, sync::Weak};
use store::LockStore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// The current holder of a resource lock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub resource_path: String,
    pub resource_type: String,
    pub locked_by: String,
    pub reason: Option<String>,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One append-only history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEvent {
    pub action: String,
    pub agent_id: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Answer to a `check`: held or not, with remaining time when held.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,
}

struct LockInner {
    store: LockStore,
    timer: Option<tokio::task::JoinHandle<()>>,
    /// Incremented on every acquire/release so a stale timer firing late
    /// cannot release a newer lock.
    generation: u64,
}

pub struct ResourceLock {
    resource_path: String,
    default_ttl_ms: i64,
    /// Handed to expiry timers so a timer outliving the registry entry
    /// cannot keep the lock alive.
    self_ref: Weak<ResourceLock>,
    inner: Mutex<LockInner>,
}

impl ResourceLock {
    fn new(
        resource_path: String,
        default_ttl_ms: i64,
        store: LockStore,
        self_ref: Weak<ResourceLock>,
    ) -> Self {
        Self {
            resource_path,
            default_ttl_ms,
            self_ref,
            inner: Mutex::new(LockInner {
                store,
                timer: None,
                generation: 0,
            }),
        }
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    fn release_in(inner: &mut LockInner, record: &LockRecord, action: &str, reason: Option<&str>) -> Result<()> {
        inner.store.clear_current()?;
        inner.store.append_event(&LockEvent {
            action: action.to_string(),
            agent_id: record.locked_by.clone(),
            reason: reason.map(|r| r.to_string()),
            timestamp: Utc::now(),
            expires_at: Some(record.expires_at),
        })?;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.generation += 1;
        Ok(())
    }

    /// Current state; an over-TTL lock is released here with reason
    /// `expired` before answering.
    pub async fn check(&self) -> Result<LockStatus> {
        let mut inner = self.inner.lock().await;
        match inner.store.current()? {
            Some(record) => {
                let now = Utc::now();
                if now > record.expires_at {
                    Self::release_in(&mut inner, &record, "expired", Some("ttl elapsed"))?;
                    debug!("lock on {} lazily expired", self.resource_path);
                    return Ok(LockStatus {
                        locked: false,
                        lock: None,
                        remaining_ms: None,
                    });
                }
                let remaining = (record.expires_at - now).num_milliseconds();
                Ok(LockStatus {
                    locked: true,
                    lock: Some(record),
                    remaining_ms: Some(remaining),
                })
            }
            None => Ok(LockStatus {
                locked: false,
                lock: None,
                remaining_ms: None,
            }),
        }
    }

    /// Acquire or extend the lock. Held by someone else and unexpired is a
    /// conflict with the owner in the body; expired locks are released then
    /// re-acquired. A single-shot timer is scheduled at the new expiry.
    pub async fn acquire(
        &self,
        agent_id: &str,
        reason: Option<String>,
        ttl_ms: Option<i64>,
        resource_type: Option<String>,
    ) -> Result<LockRecord> {
        if agent_id.trim().is_empty() {
            return Err(HubError::Validation("agentId is required".to_string()));
        }
        let ttl_ms = ttl_ms.unwrap_or(self.default_ttl_ms);
        if ttl_ms <= 0 {
            return Err(HubError::Validation("ttlMs must be positive".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        if let Some(existing) = inner.store.current()? {
            if now > existing.expires_at {
                Self::release_in(&mut inner, &existing, "expired", Some("ttl elapsed"))?;
            } else if existing.locked_by != agent_id {
                return Err(HubError::conflict_with(
                    format!("{} is locked by {}", self.resource_path, existing.locked_by),
                    json!({
                        "lockedBy": existing.locked_by,
                        "expiresAt": existing.expires_at,
                    }),
                ));
            } else {
                // Re-lock by the holder: the TTL restarts and the old timer
                // is cancelled below.
                if let Some(timer) = inner.timer.take() {
                    timer.abort();
                }
                inner.generation += 1;
            }
        }

        let record = LockRecord {
            resource_path: self.resource_path.clone(),
            resource_type: resource_type.unwrap_or_else(|| "file".to_string()),
            locked_by: agent_id.to_string(),
            reason,
            locked_at: now,
            expires_at: now + Duration::milliseconds(ttl_ms),
        };
        inner.store.set_current(&record)?;
        inner.store.append_event(&LockEvent {
            action: "locked".to_string(),
            agent_id: record.locked_by.clone(),
            reason: record.reason.clone(),
            timestamp: now,
            expires_at: Some(record.expires_at),
        })?;

        let generation = inner.generation;
        let weak = self.self_ref.clone();
        let sleep = std::time::Duration::from_millis(ttl_ms as u64);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(sleep).await;
            if let Some(lock) = weak.upgrade() {
                lock.expire(generation).await;
            }
        }));

        info!(
            "lock on {} acquired by {} for {}ms",
            self.resource_path, agent_id, ttl_ms
        );
        Ok(record)
    }

    /// Timer fire. A no-op when the lock was released or re-acquired since
    /// the timer was scheduled.
    async fn expire(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        if let Ok(Some(record)) = inner.store.current() {
            if Self::release_in(&mut inner, &record, "expired", Some("ttl elapsed")).is_ok() {
                info!("lock on {} expired", self.resource_path);
            }
        }
    }

    /// Release. Only the holder may unlock unless `force` is set.
    pub async fn unlock(&self, agent_id: &str, force: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .store
            .current()?
            .ok_or_else(|| HubError::NotFound(format!("{} is not locked", self.resource_path)))?;

        if record.locked_by != agent_id && !force {
            return Err(HubError::Forbidden(format!(
                "{} is locked by {}",
                self.resource_path, record.locked_by
            )));
        }

        let action = if record.locked_by != agent_id {
            "force-released"
        } else {
            "released"
        };
        Self::release_in(&mut inner, &record, action, None)?;
        info!("lock on {} {} by {}", self.resource_path, action, agent_id);
        Ok(())
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<LockEvent>> {
        self.inner.lock().await.store.history(limit)
    }
}

/// Lazily creates one [`ResourceLock`] per resource path.
pub struct LockRegistry {
    data_dir: Option<PathBuf>,
    default_ttl_ms: i64,
    locks: RwLock<HashMap<String, Arc<ResourceLock>>>,
}

impl LockRegistry {
    pub fn new(data_dir: Option<PathBuf>, default_ttl_ms: i64) -> Self {
        Self {
            data_dir,
            default_ttl_ms,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, resource_path: &str) -> Result<Arc<ResourceLock>> {
        if resource_path.trim().is_empty() {
            return Err(HubError::Validation("resource path is required".to_string()));
        }

        if let Some(existing) = self.locks.read().await.get(resource_path) {
            return Ok(existing.clone());
        }

        let mut locks = self.locks.write().await;
        if let Some(existing) = locks.get(resource_path) {
            return Ok(existing.clone());
        }

        let store = match &self.data_dir {
            Some(dir) => {
                let class_dir = storage::class_dir(dir, "locks")?;
                LockStore::open(&class_dir.join(storage::db_file_name(resource_path)))?
            }
            None => LockStore::open_in_memory()?,
        };
        let default_ttl_ms = self.default_ttl_ms;
        let path = resource_path.to_string();
        let lock = Arc::new_cyclic(|weak| {
            ResourceLock::new(path, default_ttl_ms, store, weak.clone())
        });
        locks.insert(resource_path.to_string(), lock.clone());
        Ok(lock)
    }
}
