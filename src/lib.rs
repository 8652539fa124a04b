#![cfg_attr(docsrs, feature(doc_cfg))]

//! # bluepcm — Bluetooth audio bridge transport core
//!
//! This library is the transport core of a daemon that exposes remote
//! Bluetooth audio endpoints to a local audio stack: A2DP streams and
//! HFP/HSP voice links show up as plain PCM endpoints, while the Bluetooth
//! side is brokered with the system Bluetooth daemon (BlueZ) over D-Bus or
//! established directly against the kernel for SCO.
//!
//! The following functionality is provided.
//!
//! * [Transports](Transport)
//!     * creation from configured A2DP streams and SCO voice connections
//!     * reference-counted lifetime across the device registry, IO workers
//!       and PCM clients
//!     * acquisition and release of the Bluetooth socket, with keep-alive
//!     * the A2DP transport state machine driven by the platform daemon
//!     * codec selection, including the RFCOMM-mediated HFP codec switch
//! * [PCM endpoints](Pcm)
//!     * stream parameters derived from the negotiated codec configuration
//!     * pause/resume/drain/drop control of the servicing IO worker
//!     * perceptual volume mapping to and from raw Bluetooth volume
//! * [IO worker slots](ThreadSlot)
//!     * a single-byte [signal pipe](Signal) steering every worker
//!     * cooperative cancellation with bounded join
//! * [codec worker integration](io::AudioIo) for the embedding daemon
//!
//! This library depends on the [tokio] asynchronous runtime; IO workers are
//! tokio tasks.

#[cfg(not(target_os = "linux"))]
compile_error!("bluepcm only supports the Linux operating system.");

use dbus::nonblock::SyncConnection;
use dbus_tokio::connection;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::{spawn_blocking, JoinHandle},
};

mod adapter;
pub mod audio;
mod bluez;
pub mod codec;
mod device;
pub mod io;
mod pcm;
pub mod rfcomm;
mod sco;
mod signal;
mod sock;
mod sys;
mod thread;
mod transport;

pub use crate::{
    adapter::Adapter,
    device::Device,
    pcm::{Pcm, PcmFormat, PcmMode},
    signal::Signal,
    thread::ThreadSlot,
    transport::{A2dpSep, A2dpState, BtSocket, Profile, Transport, TransportType},
};

pub(crate) const TIMEOUT: Duration = Duration::from_secs(120);

/// Transport core error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed error message, if any.
    pub message: String,
}

/// Transport core error kind.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// operation not supported by the transport profile or codec
    NotSupported,
    /// Bluetooth transport input/output failure
    Io,
    /// no worker occupies the targeted thread slot
    NoThread,
    /// invalid argument
    InvalidArguments,
    /// D-Bus error {0}
    DBus(String),
    /// OS error {0:?}
    Os(std::io::ErrorKind),
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<dbus::Error> for Error {
    fn from(err: dbus::Error) -> Self {
        Self {
            kind: ErrorKind::DBus(err.name().unwrap_or_default().to_string()),
            message: err.message().unwrap_or_default().to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self { kind: ErrorKind::Os(err.kind()), message: err.to_string() }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self { kind: ErrorKind::Io, message: err.to_string() }
    }
}

/// Transport core result.
pub type Result<T> = std::result::Result<T, Error>;

/// Bluetooth address.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Creates a new Bluetooth address with the specified value.
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Any Bluetooth address.
    ///
    /// Corresponds to `00:00:00:00:00:00`.
    pub const fn any() -> Self {
        Self([0; 6])
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<[u8; 6]> for Address {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<Address> for [u8; 6] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<Address> for sys::bdaddr_t {
    fn from(mut addr: Address) -> Self {
        addr.0.reverse();
        sys::bdaddr_t { b: addr.0 }
    }
}

/// Invalid Bluetooth address error.
#[derive(Debug, Clone)]
pub struct InvalidAddress(pub String);

impl Display for InvalidAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "invalid Bluetooth address: {}", &self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
    type Err = InvalidAddress;
    fn from_str(s: &str) -> std::result::Result<Self, InvalidAddress> {
        let fields = s
            .split(':')
            .map(|part| u8::from_str_radix(part, 16).map_err(|_| InvalidAddress(s.to_string())))
            .collect::<std::result::Result<Vec<_>, InvalidAddress>>()?;
        Ok(Self(fields.try_into().map_err(|_| InvalidAddress(s.to_string()))?))
    }
}

/// Volume of one PCM channel.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Volume {
    /// Gain in 1/100 dB; 0 is full volume, negative values attenuate.
    pub level: i32,
    /// Whether the channel is muted.
    pub muted: bool,
}

/// Transport core configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Delegate A2DP volume control to the remote device instead of
    /// scaling audio locally.
    pub a2dp_volume_passthrough: bool,
    /// How long a PCM drain waits after the local queue ran empty, giving
    /// the Bluetooth device time to play out its own buffer.
    pub drain_settle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self { a2dp_volume_passthrough: false, drain_settle: Duration::from_millis(200) }
    }
}

/// Notification for the PCM IPC layer.
///
/// The transport core announces its PCM endpoints through these events;
/// the layer that serves PCM clients subscribes with
/// [Context::pcm_events].
#[derive(Debug)]
pub enum PcmEvent {
    /// A PCM endpoint became available.
    Registered(Pcm),
    /// The PCM endpoint published under the path went away.
    Unregistered {
        /// Published identity of the endpoint.
        path: String,
    },
    /// The volume of a PCM endpoint changed.
    VolumeChanged(Pcm),
}

struct ContextInner {
    connection: Option<Arc<SyncConnection>>,
    config: Config,
    audio: Arc<dyn io::AudioIo>,
    pcm_tx: mpsc::UnboundedSender<PcmEvent>,
    pcm_rx: StdMutex<Option<mpsc::UnboundedReceiver<PcmEvent>>>,
    dbus_task: Option<JoinHandle<connection::IOResourceError>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(task) = &self.dbus_task {
            task.abort();
        }
    }
}

/// Shared context of the transport core.
///
/// Carries the D-Bus connection to the platform Bluetooth daemon, the
/// configuration, the codec worker factory and the PCM IPC event channel.
/// Passed to constructors instead of living in process-wide state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.inner.connection {
            Some(connection) => write!(f, "Context {{ {} }}", connection.unique_name()),
            None => write!(f, "Context {{ offline }}"),
        }
    }
}

impl Context {
    /// Creates a context connected to the system Bluetooth daemon over
    /// D-Bus.
    pub async fn new(config: Config, audio: Arc<dyn io::AudioIo>) -> Result<Self> {
        let (resource, connection) = spawn_blocking(connection::new_system_sync).await??;
        let dbus_task = tokio::spawn(resource);
        log::trace!("Connected to D-Bus with unique name {}", connection.unique_name());
        Ok(Self::build(Some(connection), Some(dbus_task), config, audio))
    }

    /// Creates a context without a D-Bus connection.
    ///
    /// SCO transports are fully functional; any operation that needs the
    /// platform daemon fails with a D-Bus error, as if the daemon had
    /// vanished from the bus.
    pub fn offline(config: Config, audio: Arc<dyn io::AudioIo>) -> Self {
        Self::build(None, None, config, audio)
    }

    fn build(
        connection: Option<Arc<SyncConnection>>,
        dbus_task: Option<JoinHandle<connection::IOResourceError>>, config: Config,
        audio: Arc<dyn io::AudioIo>,
    ) -> Self {
        let (pcm_tx, pcm_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ContextInner {
                connection,
                config,
                audio,
                pcm_tx,
                pcm_rx: StdMutex::new(Some(pcm_rx)),
                dbus_task,
            }),
        }
    }

    /// The configuration of this context.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn audio(&self) -> &Arc<dyn io::AudioIo> {
        &self.inner.audio
    }

    pub(crate) fn connection(&self) -> Result<&SyncConnection> {
        self.inner.connection.as_deref().ok_or_else(|| {
            Error::with_message(
                ErrorKind::DBus("org.freedesktop.DBus.Error.Disconnected".to_string()),
                "no D-Bus connection".to_string(),
            )
        })
    }

    pub(crate) fn connection_opt(&self) -> Option<&SyncConnection> {
        self.inner.connection.as_deref()
    }

    /// Takes the receiving end of the PCM IPC event channel.
    ///
    /// Returns `None` on every call but the first.
    pub fn pcm_events(&self) -> Option<mpsc::UnboundedReceiver<PcmEvent>> {
        self.inner.pcm_rx.lock().unwrap().take()
    }

    pub(crate) fn emit_pcm_event(&self, event: PcmEvent) {
        let _ = self.inner.pcm_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_to_string() {
        let addr = Address::new([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13]);
        assert_eq!(addr.to_string(), "00:1A:7D:DA:71:13");
        assert_eq!("00:1A:7D:DA:71:13".parse::<Address>().unwrap(), addr);
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn address_wire_order_is_reversed() {
        let addr = Address::new([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13]);
        let wire: sys::bdaddr_t = addr.into();
        assert_eq!(wire.b, [0x13, 0x71, 0xda, 0x7d, 0x1a, 0x00]);
    }

    #[test]
    fn error_display() {
        let err = Error::with_message(ErrorKind::DBus("org.bluez.Error.Failed".to_string()), "nope".to_string());
        assert_eq!(err.to_string(), "D-Bus error org.bluez.Error.Failed: nope");
        assert_eq!(Error::new(ErrorKind::NoThread).to_string(), "no worker occupies the targeted thread slot");
    }
}
