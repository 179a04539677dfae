//! history.rs: bounded in-memory log of shortlist runs, looked up by run id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::ShortlistRequest;
use crate::engine::ShortlistOutcome;
use crate::telemetry::anon_hash;

pub const DEFAULT_RUN_CAPACITY: usize = 2000;
const MAX_RUN_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub request: ShortlistRequest,
    pub outcome: ShortlistOutcome,
}

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<Vec<RunRecord>>,
    cap: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RUN_CAPACITY)
    }
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_RUN_CAPACITY);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    /// Store a run; the oldest entries are evicted beyond capacity.
    pub fn push(&self, record: RunRecord) {
        let mut v = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        v.push(record);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        let v = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        v.iter().rev().find(|r| r.run_id == run_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fresh 12-hex-char run id (hash of clock + process-wide counter).
pub fn next_run_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    anon_hash(&format!("{nanos}:{n}:{}", std::process::id()))
}
