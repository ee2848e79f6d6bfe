//! Distributed reentrant lock over the key/value contract (spec §4.11).
//! The algorithm is backend-agnostic: it only needs compare-and-swap
//! primitives on `Storage`'s key/value surface and the backend's clock,
//! so it lives once here rather than being reimplemented per backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::contract::Storage;

const LOCK_KEY_PREFIX: &str = "storage_lock_id_";
const LOCK_TTL_MINUTES: i64 = 10;
const REFRESH_INTERVAL: Duration = Duration::from_secs(3);
const REFRESH_MAX_FAILURES: u32 = 10;
const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock {0:?} is held by another owner")]
    LockFailed(String),
    #[error("failed to release lock {0:?}")]
    UnlockFailed(String),
    #[error("lock {0:?} not found")]
    LockNotFound(String),
    #[error("lock {0:?} is not owned by this caller")]
    LockNotBelongYou(String),
    #[error("lock {0:?} refresh failed")]
    LockRefreshFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LockRecord {
    owner_id: String,
    lock_count: u32,
    excepted_expire_time: DateTime<Utc>,
}

fn lock_key(lock_id: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{lock_id}")
}

fn registry_key(lock_id: &str, owner_id: &str) -> String {
    format!("{lock_id}\u{0}{owner_id}")
}

lazy_static! {
    /// Background refresh tasks keyed by (lock id, owner id), guarded by
    /// one process-wide lock rather than per-entry locking: entries are
    /// only ever inserted/removed wholesale on `lock`/`unlock`, never
    /// mutated in place.
    static ref REFRESH_TASKS: RwLock<HashMap<String, JoinHandle<()>>> = RwLock::new(HashMap::new());
}

fn stop_refresh_task(lock_id: &str, owner_id: &str) {
    let key = registry_key(lock_id, owner_id);
    if let Some(handle) = REFRESH_TASKS.write().unwrap().remove(&key) {
        handle.abort();
    }
}

fn start_refresh_task(lock_id: &str, owner_id: &str, storage: Arc<dyn Storage>) {
    // A lock re-acquired by the same owner (reentrant increment)
    // replaces its own refresh task rather than running two.
    stop_refresh_task(lock_id, owner_id);

    let key = registry_key(lock_id, owner_id);
    let lock_id = lock_id.to_string();
    let owner_id = owner_id.to_string();
    let handle = tokio::spawn(async move {
        let mut consecutive_failures = 0u32;
        loop {
            tokio::time::sleep(REFRESH_INTERVAL).await;
            match refresh_once(&storage, &lock_id, &owner_id).await {
                Ok(()) => consecutive_failures = 0,
                Err(_) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= REFRESH_MAX_FAILURES {
                        tracing::warn!(lock_id = %lock_id, "lock refresh task exiting after repeated failures");
                        return;
                    }
                }
            }
        }
    });
    REFRESH_TASKS.write().unwrap().insert(key, handle);
}

async fn refresh_once(storage: &Arc<dyn Storage>, lock_id: &str, owner_id: &str) -> Result<(), LockError> {
    let key = lock_key(lock_id);
    let fail = || LockError::LockRefreshFailed(lock_id.to_string());

    let now = storage.get_time().await.map_err(|_| fail())?;
    let current = storage.get_value(&key).await.map_err(|_| fail())?.ok_or_else(fail)?;
    let record: LockRecord = serde_json::from_str(&current).map_err(|_| fail())?;
    if record.owner_id != owner_id {
        return Err(fail());
    }

    let updated = LockRecord {
        owner_id: record.owner_id.clone(),
        lock_count: record.lock_count,
        excepted_expire_time: now + chrono::Duration::minutes(LOCK_TTL_MINUTES),
    };
    let serialized = serde_json::to_string(&updated).map_err(|_| fail())?;
    match storage.kv_compare_and_set(&key, &current, &serialized).await {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(fail()),
    }
}

/// Acquire `lock_id` for `owner_id`, reentrantly: a caller already
/// holding the lock gets its hold count incremented and its lease
/// extended instead of being rejected. Starts (or restarts) a
/// background task that keeps the lease alive every few seconds for as
/// long as the lock is held.
pub async fn lock(storage: Arc<dyn Storage>, lock_id: &str, owner_id: &str) -> Result<(), LockError> {
    let key = lock_key(lock_id);
    let fail = || LockError::LockFailed(lock_id.to_string());

    for _ in 0..MAX_CAS_ATTEMPTS {
        let now = storage.get_time().await.map_err(|_| fail())?;
        let current = storage.get_value(&key).await.map_err(|_| fail())?;

        match current {
            None => {
                let fresh = LockRecord {
                    owner_id: owner_id.to_string(),
                    lock_count: 1,
                    excepted_expire_time: now + chrono::Duration::minutes(LOCK_TTL_MINUTES),
                };
                let serialized = serde_json::to_string(&fresh).map_err(|_| fail())?;
                match storage.kv_insert_if_absent(&key, &serialized).await {
                    Ok(true) => {
                        start_refresh_task(lock_id, owner_id, storage);
                        return Ok(());
                    }
                    Ok(false) => continue,
                    Err(_) => return Err(fail()),
                }
            }
            Some(raw) => {
                let record: LockRecord = serde_json::from_str(&raw).map_err(|_| fail())?;
                if record.owner_id == owner_id {
                    let updated = LockRecord {
                        owner_id: owner_id.to_string(),
                        lock_count: record.lock_count + 1,
                        excepted_expire_time: now + chrono::Duration::minutes(LOCK_TTL_MINUTES),
                    };
                    let serialized = serde_json::to_string(&updated).map_err(|_| fail())?;
                    match storage.kv_compare_and_set(&key, &raw, &serialized).await {
                        Ok(true) => {
                            start_refresh_task(lock_id, owner_id, storage);
                            return Ok(());
                        }
                        Ok(false) => continue,
                        Err(_) => return Err(fail()),
                    }
                } else if record.excepted_expire_time > now {
                    return Err(fail());
                } else {
                    // Held by a dead owner whose lease lapsed: reclaim it
                    // by deleting the stale record, then retry the insert
                    // path on the next loop iteration.
                    match storage.kv_compare_and_delete(&key, &raw).await {
                        Ok(_) => continue,
                        Err(_) => return Err(fail()),
                    }
                }
            }
        }
    }
    Err(fail())
}

/// Release one level of `owner_id`'s hold on `lock_id`. A reentrant
/// lock held N times needs N calls before it is actually released and
/// its refresh task stopped.
pub async fn unlock(storage: Arc<dyn Storage>, lock_id: &str, owner_id: &str) -> Result<(), LockError> {
    let key = lock_key(lock_id);
    let fail = || LockError::UnlockFailed(lock_id.to_string());

    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = storage.get_value(&key).await.map_err(|_| fail())?;
        let Some(raw) = current else {
            return Err(LockError::LockNotFound(lock_id.to_string()));
        };
        let record: LockRecord = serde_json::from_str(&raw).map_err(|_| fail())?;
        if record.owner_id != owner_id {
            return Err(LockError::LockNotBelongYou(lock_id.to_string()));
        }

        if record.lock_count > 1 {
            let updated = LockRecord {
                owner_id: record.owner_id.clone(),
                lock_count: record.lock_count - 1,
                excepted_expire_time: record.excepted_expire_time,
            };
            let serialized = serde_json::to_string(&updated).map_err(|_| fail())?;
            match storage.kv_compare_and_set(&key, &raw, &serialized).await {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(_) => return Err(fail()),
            }
        } else {
            match storage.kv_compare_and_delete(&key, &raw).await {
                Ok(true) => {
                    stop_refresh_task(lock_id, owner_id);
                    return Ok(());
                }
                Ok(false) => continue,
                Err(_) => return Err(fail()),
            }
        }
    }
    Err(fail())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::contract::{Storage, Transaction};
    use crate::query_result::QueryResult;
    use async_trait::async_trait;
    use diagnostics::Diagnostics;
    use row::{Rows, Value};
    use schema::Table;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeKvStorage {
        data: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl Storage for FakeKvStorage {
        async fn table_create(&self, _namespace: &str, _table: &Table) -> Diagnostics {
            Diagnostics::new()
        }
        async fn table_drop(&self, _namespace: &str, _table_name: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn table_list(&self, _namespace: &str) -> Result<Vec<String>, Diagnostics> {
            Ok(vec![])
        }
        async fn namespace_list(&self) -> Result<Vec<String>, Diagnostics> {
            Ok(vec![])
        }
        async fn namespace_create(&self, _namespace: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn namespace_drop(&self, _namespace: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn query(&self, _sql: &str, _args: &[Value]) -> Result<QueryResult, Diagnostics> {
            Ok(QueryResult::new(vec![]))
        }
        async fn exec(&self, _sql: &str, _args: &[Value]) -> Diagnostics {
            Diagnostics::new()
        }
        async fn insert(&self, _namespace: &str, _table_name: &str, _rows: &Rows) -> Diagnostics {
            Diagnostics::new()
        }
        async fn begin(&self) -> Result<Box<dyn Transaction>, Diagnostics> {
            Err(Diagnostics::from_error("transactions not supported by fake"))
        }
        async fn set_key(&self, key: &str, value: &str) -> Diagnostics {
            self.data.lock().unwrap().insert(key.to_string(), value.to_string());
            Diagnostics::new()
        }
        async fn get_value(&self, key: &str) -> Result<Option<String>, Diagnostics> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        async fn delete_key(&self, key: &str) -> Diagnostics {
            self.data.lock().unwrap().remove(key);
            Diagnostics::new()
        }
        async fn list_key(&self, _prefix: &str) -> Result<Vec<(String, String)>, Diagnostics> {
            Ok(self.data.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        async fn kv_insert_if_absent(&self, key: &str, value: &str) -> Result<bool, Diagnostics> {
            let mut data = self.data.lock().unwrap();
            if data.contains_key(key) {
                Ok(false)
            } else {
                data.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }
        async fn kv_compare_and_set(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, Diagnostics> {
            let mut data = self.data.lock().unwrap();
            if data.get(key).map(|v| v.as_str()) == Some(expected) {
                data.insert(key.to_string(), new_value.to_string());
                Ok(true)
            } else {
                Ok(false)
            }
        }
        async fn kv_compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, Diagnostics> {
            let mut data = self.data.lock().unwrap();
            if data.get(key).map(|v| v.as_str()) == Some(expected) {
                data.remove(key);
                Ok(true)
            } else {
                Ok(false)
            }
        }
        async fn get_time(&self) -> Result<DateTime<Utc>, Diagnostics> {
            Ok(Utc::now())
        }
    }

    #[tokio::test]
    async fn second_acquire_by_a_different_owner_is_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(FakeKvStorage::default());
        lock(storage.clone(), "job-1", "owner-a").await.unwrap();
        let err = lock(storage.clone(), "job-1", "owner-b").await.unwrap_err();
        assert_eq!(err, LockError::LockFailed("job-1".to_string()));
    }

    #[tokio::test]
    async fn same_owner_reacquire_is_reentrant() {
        let storage: Arc<dyn Storage> = Arc::new(FakeKvStorage::default());
        lock(storage.clone(), "job-1", "owner-a").await.unwrap();
        lock(storage.clone(), "job-1", "owner-a").await.unwrap();

        // Held twice: one unlock should not release it to another owner.
        unlock(storage.clone(), "job-1", "owner-a").await.unwrap();
        let err = lock(storage.clone(), "job-1", "owner-b").await.unwrap_err();
        assert_eq!(err, LockError::LockFailed("job-1".to_string()));

        unlock(storage.clone(), "job-1", "owner-a").await.unwrap();
        lock(storage.clone(), "job-1", "owner-b").await.unwrap();
    }

    #[tokio::test]
    async fn unlock_by_non_owner_is_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(FakeKvStorage::default());
        lock(storage.clone(), "job-1", "owner-a").await.unwrap();
        let err = unlock(storage.clone(), "job-1", "owner-b").await.unwrap_err();
        assert_eq!(err, LockError::LockNotBelongYou("job-1".to_string()));
    }

    #[tokio::test]
    async fn unlock_of_unknown_lock_reports_not_found() {
        let storage: Arc<dyn Storage> = Arc::new(FakeKvStorage::default());
        let err = unlock(storage, "never-locked", "owner-a").await.unwrap_err();
        assert_eq!(err, LockError::LockNotFound("never-locked".to_string()));
    }
}
