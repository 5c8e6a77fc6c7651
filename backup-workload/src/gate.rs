//! Process-local restore gate
//!
//! A readers-writer lock with no protected data. Transfers and scheduled
//! backups hold it shared; the restore cycle holds it exclusively.
//! `tokio::sync::RwLock` queues waiters FIFO, so once an exclusive request
//! is waiting, later shared requests queue behind it.

use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Shared permit, released on drop
pub type SharedPermit = OwnedRwLockReadGuard<()>;

/// Exclusive permit, released on drop
pub type ExclusivePermit = OwnedRwLockWriteGuard<()>;

/// Gate between the workload and the restore cycle
#[derive(Debug, Clone, Default)]
pub struct RestoreGate {
    lock: Arc<RwLock<()>>,
}

impl RestoreGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for shared access
    pub async fn shared(&self) -> SharedPermit {
        self.lock.clone().read_owned().await
    }

    /// Wait for exclusive access
    pub async fn exclusive(&self) -> ExclusivePermit {
        self.lock.clone().write_owned().await
    }

    /// Shared access if immediately available
    pub fn try_shared(&self) -> Option<SharedPermit> {
        self.lock.clone().try_read_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shared_holders_coexist() {
        let gate = RestoreGate::new();
        let _a = gate.shared().await;
        let _b = gate.shared().await;
        assert!(gate.try_shared().is_some());
    }

    #[tokio::test]
    async fn test_exclusive_blocks_shared() {
        let gate = RestoreGate::new();
        let permit = gate.exclusive().await;
        assert!(gate.try_shared().is_none());
        drop(permit);
        assert!(gate.try_shared().is_some());
    }

    #[tokio::test]
    async fn test_waiting_writer_blocks_new_readers() {
        let gate = RestoreGate::new();
        let reader = gate.shared().await;

        let writer_gate = gate.clone();
        let writer = tokio::spawn(async move {
            let _permit = writer_gate.exclusive().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // queued behind the pending writer
        assert!(gate.try_shared().is_none());

        drop(reader);
        writer.await.unwrap();
        assert!(gate.try_shared().is_some());
    }
}
