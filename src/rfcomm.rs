//! RFCOMM session attached to a SCO transport.
//!
//! The AT command engine that speaks HFP over the RFCOMM channel lives
//! outside of the transport core. This module provides the session object
//! shared between the two: the channel descriptor, the control-signal
//! channel the core uses to steer the engine, and the completion notifier
//! of the codec-selection handshake.

use std::{
    io::Result,
    os::unix::io::{AsRawFd, RawFd},
    sync::Mutex,
};
use tokio::{
    io::unix::AsyncFd,
    sync::{futures::Notified, mpsc, Notify},
};

use crate::sock::{self, OwnedFd};

/// Control signal delivered to the RFCOMM AT engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RfcommSignal {
    /// Initiate a codec-selection handshake for CVSD.
    SetCodecCvsd,
    /// Initiate a codec-selection handshake for mSBC.
    SetCodecMsbc,
    /// Report the local speaker volume to the peer.
    UpdateVolume,
}

/// Shared state of an RFCOMM channel of a SCO transport.
pub struct RfcommSession {
    stream: AsyncFd<OwnedFd>,
    sig_tx: mpsc::UnboundedSender<RfcommSignal>,
    sig_rx: Mutex<Option<mpsc::UnboundedReceiver<RfcommSignal>>>,
    codec_selection_completed: Notify,
}

impl std::fmt::Debug for RfcommSession {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RfcommSession").field("fd", &self.stream.as_raw_fd()).finish()
    }
}

impl RfcommSession {
    pub(crate) fn new(fd: OwnedFd) -> Result<Self> {
        sock::set_nonblocking(&fd)?;
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        Ok(Self {
            stream: AsyncFd::new(fd)?,
            sig_tx,
            sig_rx: Mutex::new(Some(sig_rx)),
            codec_selection_completed: Notify::new(),
        })
    }

    /// Queues a control signal for the AT engine.
    pub fn send_signal(&self, signal: RfcommSignal) {
        if self.sig_tx.send(signal).is_err() {
            log::warn!("Couldn't send RFCOMM signal: {:?}", signal);
        }
    }

    /// Takes the receiving end of the control-signal channel.
    ///
    /// The AT engine calls this once when it attaches to the session.
    pub fn signals(&self) -> Option<mpsc::UnboundedReceiver<RfcommSignal>> {
        self.sig_rx.lock().unwrap().take()
    }

    /// Reads AT data from the RFCOMM channel.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.stream.readable().await?;
            match guard.try_io(|inner| sock::read(inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Writes AT data to the RFCOMM channel.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.stream.writable().await?;
            match guard.try_io(|inner| sock::write(inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Wakes up a codec selection waiting for the handshake to finish.
    ///
    /// The AT engine calls this after it has applied the outcome of the
    /// handshake to the transport, whether the peer accepted the requested
    /// codec or forced another one.
    pub fn notify_codec_selection(&self) {
        self.codec_selection_completed.notify_one();
    }

    pub(crate) fn codec_selection(&self) -> Notified<'_> {
        self.codec_selection_completed.notified()
    }

    /// Shuts the RFCOMM channel down, terminating the AT engine's reader.
    pub(crate) fn shutdown(&self) {
        if let Err(err) = sock::shutdown(self.stream.get_ref(), libc::SHUT_RDWR) {
            log::warn!("Couldn't shutdown RFCOMM channel: {}", err);
        }
    }

    /// Raw descriptor of the RFCOMM channel.
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
