//! history.rs: bounded in-memory log of run reports served on /runs.

use std::sync::Mutex;

use crate::ingest::RunReport;

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<Vec<RunReport>>,
    cap: usize,
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RunReport>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, report: RunReport) {
        let mut v = self.lock();
        v.push(report);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunReport> {
        let v = self.lock();
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn last(&self) -> Option<RunReport> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}
