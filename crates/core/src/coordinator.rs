//! Run-level mutual exclusion.
//!
//! Every workflow writes the same tables and shares one upstream rate budget,
//! so at most one runs at a time, whether started by the scheduler or by hand.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The workflows that compete for the run slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    GallerySync,
    TorrentSync,
    Resync,
    ManualFetch,
    TorrentBackfill,
    MarkReplaced,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::GallerySync => "gallery_sync",
            Workflow::TorrentSync => "torrent_sync",
            Workflow::Resync => "resync",
            Workflow::ManualFetch => "manual_fetch",
            Workflow::TorrentBackfill => "torrent_backfill",
            Workflow::MarkReplaced => "mark_replaced",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("cannot start {requested}: {} is already running", .running.map(|w| w.as_str()).unwrap_or("another run"))]
    Busy {
        requested: Workflow,
        running: Option<Workflow>,
    },

    #[error("run coordinator is closed")]
    Closed,
}

/// Hands out the single run slot.
#[derive(Clone)]
pub struct RunCoordinator {
    slot: Arc<Semaphore>,
    current: Arc<Mutex<Option<Workflow>>>,
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCoordinator {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the slot if it is free.
    pub fn try_acquire(&self, workflow: Workflow) -> Result<RunGuard, CoordinatorError> {
        match self.slot.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.guard(workflow, permit)),
            Err(_) => Err(CoordinatorError::Busy {
                requested: workflow,
                running: self.running(),
            }),
        }
    }

    /// Wait for the slot.
    pub async fn acquire(&self, workflow: Workflow) -> Result<RunGuard, CoordinatorError> {
        let permit = self
            .slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        Ok(self.guard(workflow, permit))
    }

    /// The workflow holding the slot, if any.
    pub fn running(&self) -> Option<Workflow> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, workflow: Workflow, permit: OwnedSemaphorePermit) -> RunGuard {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(workflow);
        RunGuard {
            workflow,
            current: self.current.clone(),
            _permit: permit,
        }
    }
}

/// Holds the run slot until dropped.
pub struct RunGuard {
    workflow: Workflow,
    current: Arc<Mutex<Option<Workflow>>>,
    _permit: OwnedSemaphorePermit,
}

impl RunGuard {
    pub fn workflow(&self) -> Workflow {
        self.workflow
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_run_is_rejected() {
        let coordinator = RunCoordinator::new();
        let guard = coordinator.try_acquire(Workflow::GallerySync).unwrap();
        assert_eq!(coordinator.running(), Some(Workflow::GallerySync));

        let err = coordinator.try_acquire(Workflow::Resync).err().unwrap();
        assert!(matches!(
            err,
            CoordinatorError::Busy {
                requested: Workflow::Resync,
                running: Some(Workflow::GallerySync)
            }
        ));
        assert_eq!(
            err.to_string(),
            "cannot start resync: gallery_sync is already running"
        );

        drop(guard);
        assert_eq!(coordinator.running(), None);
        assert!(coordinator.try_acquire(Workflow::Resync).is_ok());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let coordinator = RunCoordinator::new();
        let other = coordinator.clone();
        let _guard = coordinator.try_acquire(Workflow::TorrentSync).unwrap();
        assert!(other.try_acquire(Workflow::TorrentBackfill).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let coordinator = RunCoordinator::new();
        let guard = coordinator.try_acquire(Workflow::GallerySync).unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let guard = coordinator.acquire(Workflow::ManualFetch).await.unwrap();
                guard.workflow()
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.await.unwrap(), Workflow::ManualFetch);
    }
}
