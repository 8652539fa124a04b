//! Transport IO worker slots.
//!
//! Every transport owns two worker slots, encoder and decoder. A slot
//! couples the identity of the task occupying it with the signal pipe used
//! to steer that task. Cancellation is cooperative: the slot sends
//! [Signal::Close](crate::Signal::Close) and joins; aborting the task is a
//! logged last resort.

use std::{io::Result, sync::Mutex, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};

use crate::signal::{Signal, SignalPipe};

/// Time a worker gets to wind down after [Signal::Close] before it is
/// aborted.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Worker slot selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadSlot {
    /// The slot of the worker encoding towards Bluetooth.
    Encoder,
    /// The slot of the worker decoding from Bluetooth.
    Decoder,
}

/// One worker slot of a transport.
#[derive(Debug)]
pub(crate) struct TransportThread {
    pipe: SignalPipe,
    task: Mutex<Option<JoinHandle<()>>>,
    running_tx: watch::Sender<bool>,
}

impl TransportThread {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pipe: SignalPipe::new()?,
            task: Mutex::new(None),
            running_tx: watch::channel(false).0,
        })
    }

    /// Whether a worker task occupies this slot.
    ///
    /// The slot stays occupied after the worker exited on its own; it is
    /// freed by [cancel](Self::cancel), which reaps the finished task.
    pub fn is_started(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    /// Whether the occupying worker has entered its event loop.
    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Called by the worker once its event loop is entered: from this point
    /// on the signal pipe is being drained.
    pub fn set_ready(&self) {
        self.running_tx.send_replace(true);
    }

    /// Waits until the occupying worker has entered its event loop.
    pub async fn wait_ready(&self) {
        let mut rx = self.running_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs the closure with exclusive access to the slot, so that checking
    /// for an occupying task and installing a new one is atomic.
    pub fn with_slot<R>(&self, f: impl FnOnce(&mut Option<JoinHandle<()>>) -> R) -> R {
        f(&mut self.task.lock().unwrap())
    }

    pub fn send_signal(&self, signal: Signal) -> Result<()> {
        self.pipe.send(signal)
    }

    pub async fn recv_signal(&self) -> Signal {
        self.pipe.recv().await
    }

    /// Terminates the occupying worker and waits for it to exit.
    ///
    /// A no-op when the slot is empty. Errors from signalling or joining
    /// are logged, not propagated; after return the slot is free and the
    /// running flag is cleared.
    pub async fn cancel(&self) {
        let handle = self.task.lock().unwrap().take();
        let Some(mut handle) = handle else { return };

        if !handle.is_finished() {
            if let Err(err) = self.pipe.send(Signal::Close) {
                log::warn!("Couldn't signal transport worker: {}", err);
            }
        }

        match timeout(JOIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => (),
            Ok(Err(err)) => log::warn!("Couldn't join transport worker: {}", err),
            Err(_elapsed) => {
                log::warn!("Transport worker did not close, aborting it");
                handle.abort();
                if let Err(err) = handle.await {
                    if !err.is_cancelled() {
                        log::warn!("Couldn't join transport worker: {}", err);
                    }
                }
            }
        }

        self.running_tx.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_empty_slot() {
        let th = TransportThread::new().unwrap();
        assert!(!th.is_started());
        th.cancel().await;
        assert!(!th.is_started());
    }

    #[tokio::test]
    async fn ready_wakes_waiter() {
        let th = std::sync::Arc::new(TransportThread::new().unwrap());
        let waiter = {
            let th = th.clone();
            tokio::spawn(async move { th.wait_ready().await })
        };
        assert!(!th.is_running());
        th.set_ready();
        waiter.await.unwrap();
        assert!(th.is_running());
    }

    #[tokio::test]
    async fn cancel_joins_cooperative_worker() {
        let th = std::sync::Arc::new(TransportThread::new().unwrap());
        let handle = {
            let th = th.clone();
            tokio::spawn(async move {
                th.set_ready();
                loop {
                    if th.recv_signal().await == Signal::Close {
                        break;
                    }
                }
            })
        };
        th.with_slot(|slot| *slot = Some(handle));
        th.wait_ready().await;
        th.cancel().await;
        assert!(!th.is_started());
        assert!(!th.is_running());
    }
}
