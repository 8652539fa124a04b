//! Control signals for transport IO workers.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::Result;
use tokio::io::unix::AsyncFd;

use crate::sock::{self, OwnedFd};

/// Control signal delivered to a transport IO worker.
///
/// Signals are sent as single-byte records over an OS pipe, so they can be
/// written from any thread and picked up by the worker in its poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Signal {
    /// Wake up the worker without any associated action.
    Ping = 0,
    /// A PCM client connected its descriptor.
    PcmOpen,
    /// A PCM client closed its descriptor.
    PcmClose,
    /// Pause moving audio data.
    PcmPause,
    /// Resume moving audio data.
    PcmResume,
    /// Flush queued audio data and confirm once the output queue is empty.
    PcmSync,
    /// Discard queued audio data.
    PcmDrop,
    /// Terminate the worker event loop.
    Close,
}

/// One-way byte channel used to steer a transport IO worker.
///
/// The write end may be used from any thread; the read end is owned by the
/// worker and polled from its event loop.
#[derive(Debug)]
pub(crate) struct SignalPipe {
    rx: AsyncFd<OwnedFd>,
    tx: OwnedFd,
}

impl SignalPipe {
    pub fn new() -> Result<Self> {
        let (rx, tx) = sock::pipe()?;
        Ok(Self { rx: AsyncFd::new(rx)?, tx })
    }

    /// Queues a signal for the worker. Returns as soon as the record has
    /// been written to the pipe.
    pub fn send(&self, signal: Signal) -> Result<()> {
        let buf = [signal as u8];
        loop {
            match sock::write(&self.tx, &buf) {
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(err),
                Ok(_) => return Ok(()),
            }
        }
    }

    /// Receives the next signal.
    ///
    /// A malformed record or a read failure is reported and treated as
    /// [Signal::Ping], so a worker never has to handle transport errors on
    /// its own control channel.
    pub async fn recv(&self) -> Signal {
        let mut buf = [0; 1];
        let res = loop {
            let mut guard = match self.rx.readable().await {
                Ok(guard) => guard,
                Err(err) => break Err(err),
            };
            match guard.try_io(|inner| sock::read(inner.get_ref(), &mut buf)) {
                Ok(Err(err)) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Ok(res) => break res,
                Err(_would_block) => continue,
            }
        };
        match res {
            Ok(1) => match Signal::from_u8(buf[0]) {
                Some(signal) => signal,
                None => {
                    log::warn!("Invalid transport worker signal: {:#04x}", buf[0]);
                    Signal::Ping
                }
            },
            Ok(_) => {
                log::warn!("Couldn't read transport worker signal: unexpected record size");
                Signal::Ping
            }
            Err(err) => {
                log::warn!("Couldn't read transport worker signal: {}", err);
                Signal::Ping
            }
        }
    }

}
