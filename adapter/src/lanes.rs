// Serialized execution lanes
//
// A lane runs the jobs handed to it one after another, in submission order.
// Different lanes run independently, so a launch blocked on a build never
// holds up stack or variable requests.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

use crate::error::{AdapterError, AdapterResult};

#[derive(Clone)]
pub struct Lane {
    name: &'static str,
    jobs: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl Lane {
    /// Start the lane's worker task
    pub fn spawn(name: &'static str) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                trace!("Lane {} running job", name);
                job.await;
            }
            debug!("Lane {} stopped", name);
        });

        Self { name, jobs }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a job without waiting for it
    pub fn execute<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.send(job.boxed()).is_err() {
            debug!("Lane {} is closed, dropping job", self.name);
        }
    }

    /// Queue a job and wait for its result
    pub async fn compute<F, T>(&self, job: F) -> AdapterResult<T>
    where
        F: Future<Output = AdapterResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(async move {
            tx.send(job.await).ok();
        });
        rx.await
            .map_err(|_| AdapterError::Io(std::io::Error::other(format!("lane {} closed", self.name))))?
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// configurationDone has arrived and is waiting for its answer
    Waiting,
    Released,
}

/// Two-phase handshake between `configurationDone` and launch/attach.
///
/// `configurationDone` announces that it is waiting and stays unanswered until
/// released; launch/attach wait for that announcement before letting the VM
/// run, so no event reaches the client before it has finished configuring.
#[derive(Debug)]
pub struct ConfigurationRendezvous {
    phase: watch::Sender<Phase>,
}

impl ConfigurationRendezvous {
    pub fn new() -> Self {
        Self {
            phase: watch::Sender::new(Phase::Idle),
        }
    }

    /// Called by configurationDone: announce, then wait for the release
    pub async fn arrive_and_wait(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Waiting;
                true
            } else {
                false
            }
        });

        let mut rx = self.phase.subscribe();
        rx.wait_for(|phase| *phase == Phase::Released).await.ok();
    }

    /// Called by launch/attach: wait until configurationDone is pending, then release it
    pub async fn release_when_waiting(&self) {
        let mut rx = self.phase.subscribe();
        rx.wait_for(|phase| *phase != Phase::Idle).await.ok();
        self.release();
    }

    /// Release unconditionally (disconnect)
    pub fn release(&self) {
        self.phase.send_replace(Phase::Released);
    }

    pub fn is_released(&self) -> bool {
        *self.phase.borrow() == Phase::Released
    }
}

impl Default for ConfigurationRendezvous {
    fn default() -> Self {
        Self::new()
    }
}
