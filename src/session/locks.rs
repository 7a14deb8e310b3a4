//! Per-program mutual exclusion
//!
//! Calls that read or rewrite a program's dependency manifest take the lock
//! for that program's directory. Calls on different programs never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::protocol::ProgramInfo;

#[derive(Default)]
pub struct ProgramLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl ProgramLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(dir: &Path) -> PathBuf {
        std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
    }

    fn slot(&self, dir: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(Self::key(dir)).or_default().clone()
    }

    /// Wait for exclusive access to a program's directory.
    pub async fn lock(&self, info: &ProgramInfo) -> OwnedMutexGuard<()> {
        self.slot(info.program_dir()).lock_owned().await
    }

    /// Number of programs seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
