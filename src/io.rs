//! Integration seam for codec IO workers.
//!
//! The transport core owns the lifecycle of the IO workers but not their
//! audio processing: encoders and decoders for the individual codecs are
//! provided by the embedding daemon through the [AudioIo] factory, similar
//! to how other handler objects are registered with their session. Routines
//! spawned through [Transport::thread_start] receive a [Worker] context and
//! are expected to call [Worker::ready] once their event loop is entered and
//! to terminate when they receive [Signal::Close].

use crate::{signal::Signal, thread::ThreadSlot, transport::Transport, Result};

/// Factory for codec-specific transport IO workers.
pub trait AudioIo: Send + Sync {
    /// Spawns the encoder and/or decoder workers of an A2DP transport, as
    /// appropriate for its codec and direction.
    fn start_a2dp(&self, transport: &Transport) -> Result<()>;

    /// Spawns the SCO worker.
    ///
    /// SCO audio is serviced by a single full-duplex worker in the encoder
    /// slot; both SCO endpoints are bound to it.
    fn start_sco(&self, transport: &Transport) -> Result<()>;
}

/// Context handed to a transport IO worker routine.
pub struct Worker {
    t: Transport,
    slot: ThreadSlot,
}

impl Worker {
    pub(crate) fn new(t: Transport, slot: ThreadSlot) -> Self {
        Self { t, slot }
    }

    /// The transport this worker services.
    pub fn transport(&self) -> &Transport {
        &self.t
    }

    /// The slot this worker occupies.
    pub fn slot(&self) -> ThreadSlot {
        self.slot
    }

    /// Announces that the event loop has been entered and the signal pipe
    /// is being drained.
    pub fn ready(&self) {
        self.t.thread(self.slot).set_ready();
    }

    /// Receives the next control signal.
    pub async fn recv_signal(&self) -> Signal {
        self.t.thread(self.slot).recv_signal().await
    }
}
