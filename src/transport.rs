//! Audio transport bookkeeping.
//!
//! A transport represents one live audio session with a remote device: its
//! profile and codec, the Bluetooth socket carrying the audio, up to two
//! PCM endpoints facing local clients and the pair of worker slots moving
//! bytes between the two sides.
//!
//! A [Transport] is a cloneable handle; every clone is a reference in the
//! sense of the ownership model. The device registry holds one, each
//! running worker holds one and every connected PCM client holds one
//! through its [Pcm] handle. [Transport::destroy] detaches the transport
//! from the registry and consumes the caller's handle; the remaining
//! resources are reclaimed when the last clone drops.

use dbus::Path;
use futures::FutureExt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::{
    future::Future,
    os::unix::io::{AsRawFd, RawFd},
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering},
        Arc, Mutex as StdMutex,
    },
};
use strum::Display;
use tokio::{
    io::unix::AsyncFd,
    sync::{Mutex, MutexGuard},
};

use crate::{
    bluez,
    codec::{self, A2dpCodec, HfpCodec},
    io::Worker,
    pcm::{Pcm, PcmId, PcmMode, PcmState, TransportPcm},
    rfcomm::{RfcommSession, RfcommSignal},
    sco::{self, VoiceSetting},
    sock::{self, OwnedFd},
    thread::{ThreadSlot, TransportThread},
    Context, Device, Error, ErrorKind, PcmEvent, Result,
};

/// Bluetooth audio profile of a transport.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
pub enum Profile {
    /// A2DP in the source role: local audio is streamed to the device.
    #[strum(serialize = "A2DP Source")]
    A2dpSource,
    /// A2DP in the sink role: the device streams audio to us.
    #[strum(serialize = "A2DP Sink")]
    A2dpSink,
    /// HFP hands-free unit.
    #[strum(serialize = "HFP Hands-Free")]
    HfpHf,
    /// HFP audio gateway.
    #[strum(serialize = "HFP Audio Gateway")]
    HfpAg,
    /// HSP headset.
    #[strum(serialize = "HSP Headset")]
    HspHs,
    /// HSP audio gateway.
    #[strum(serialize = "HSP Audio Gateway")]
    HspAg,
}

impl Profile {
    /// Whether this is one of the A2DP streaming profiles.
    pub fn is_a2dp(&self) -> bool {
        matches!(self, Self::A2dpSource | Self::A2dpSink)
    }

    /// Whether this profile carries voice over a SCO link.
    pub fn is_sco(&self) -> bool {
        !self.is_a2dp()
    }

    /// Whether this is one of the HSP profiles.
    pub fn is_hsp(&self) -> bool {
        matches!(self, Self::HspHs | Self::HspAg)
    }

    pub(crate) fn dbus_path_tag(&self) -> &'static str {
        match self {
            Self::A2dpSource => "a2dpsrc",
            Self::A2dpSink => "a2dpsnk",
            Self::HfpHf => "hfphf",
            Self::HfpAg => "hfpag",
            Self::HspHs => "hsphs",
            Self::HspAg => "hspag",
        }
    }
}

/// Profile and codec of a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransportType {
    /// Bluetooth audio profile; fixed for the lifetime of the transport.
    pub profile: Profile,
    /// Codec identifier within the profile's codec namespace.
    pub codec: u16,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (", self.profile)?;
        if self.profile.is_a2dp() {
            match A2dpCodec::from_u16(self.codec) {
                Some(codec) => write!(f, "{}", codec)?,
                None => write!(f, "{:#06x}", self.codec)?,
            }
        } else {
            match HfpCodec::from_u16(self.codec) {
                Some(codec) => write!(f, "{}", codec)?,
                None => write!(f, "{:#06x}", self.codec)?,
            }
        }
        write!(f, ")")
    }
}

/// State of an A2DP transport, as reported by the platform daemon.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum A2dpState {
    /// The stream is suspended or not configured.
    Idle = 0,
    /// The remote end asked for streaming; the stream is not active yet.
    Pending,
    /// The stream is active.
    Active,
}

/// Connected Bluetooth socket of a transport.
///
/// The socket is shared between the transport and its workers; it is closed
/// once the last clone drops, so a release can never yank a descriptor out
/// from under a worker that is still polling it.
#[derive(Clone)]
pub struct BtSocket {
    fd: Arc<AsyncFd<OwnedFd>>,
}

impl std::fmt::Debug for BtSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BtSocket").field("fd", &self.as_raw_fd()).finish()
    }
}

impl BtSocket {
    pub(crate) fn new(fd: OwnedFd) -> std::io::Result<Self> {
        Ok(Self { fd: Arc::new(AsyncFd::new(fd)?) })
    }

    /// Receives one Bluetooth frame.
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| sock::read(inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Sends one Bluetooth frame.
    pub async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| sock::write(inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub(crate) fn shutdown(&self) -> std::io::Result<()> {
        sock::shutdown(self.fd.get_ref(), libc::SHUT_RDWR)
    }
}

impl AsRawFd for BtSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Bluetooth side of a transport, guarded by the bt lock.
#[derive(Debug, Default)]
struct BtLink {
    /// `None` while the transport is not acquired.
    sock: Option<BtSocket>,
    mtu_read: u16,
    mtu_write: u16,
}

struct A2dpTransport {
    /// Codec configuration blob, negotiated with the remote endpoint.
    configuration: Mutex<Vec<u8>>,
    state: AtomicU8,
    pcm: TransportPcm,
    pcm_bc: TransportPcm,
    /// Latency reported by the remote device, in 1/100 of a millisecond.
    delay: AtomicU32,
    /// Socket output queue depth right after acquisition, used as the
    /// baseline for latency accounting.
    coutq_init: AtomicI32,
}

impl A2dpTransport {
    fn state(&self) -> A2dpState {
        A2dpState::from_u8(self.state.load(Ordering::Relaxed)).unwrap_or(A2dpState::Idle)
    }
}

struct ScoTransport {
    spk_pcm: TransportPcm,
    mic_pcm: TransportPcm,
    /// Absent for external-telephony back-ends which keep the RFCOMM
    /// channel to themselves.
    rfcomm: StdMutex<Option<Arc<RfcommSession>>>,
}

/// Profile-specific payload and acquire/release flavor of a transport.
enum Backend {
    A2dp(A2dpTransport),
    Sco(ScoTransport),
}

/// Stream endpoint proposal for an A2DP codec selection.
#[derive(Clone, Debug)]
pub struct A2dpSep {
    /// D-Bus path of the remote stream endpoint.
    pub path: Path<'static>,
    /// Proposed codec identifier.
    pub codec: u16,
    /// Proposed codec configuration blob.
    pub configuration: Vec<u8>,
}

pub(crate) struct TransportInner {
    ctx: Context,
    device: Device,
    dbus_owner: Option<String>,
    dbus_path: Path<'static>,
    profile: Profile,
    /// The mutable half of the transport type. Holding this lock
    /// serializes codec reconfiguration.
    codec: Mutex<u16>,
    bt: Mutex<BtLink>,
    thread_enc: TransportThread,
    thread_dec: TransportThread,
    backend: Backend,
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        log::debug!("Freeing transport: {}", self.profile);
    }
}

/// Handle to a live audio session.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Transport {{ {} }}", self.inner.dbus_path)
    }
}

fn pcm_path(device: &Device, profile: Profile, mode: PcmMode) -> String {
    format!("{}/{}/{}", device.dbus_path(), profile.dbus_path_tag(), mode)
}

impl Transport {
    /// Creates an A2DP transport for a configured stream of the platform
    /// daemon.
    ///
    /// The primary PCM endpoint faces the profile direction: a sink
    /// transport decodes from Bluetooth into a client-readable endpoint,
    /// a source transport encodes a client-writable endpoint towards
    /// Bluetooth. The back-channel endpoint is mirrored and only becomes
    /// visible to clients for dual-direction codecs. Endpoints with a
    /// non-zero channel count are announced to the PCM IPC layer.
    pub async fn new_a2dp(
        device: &Device, ty: TransportType, dbus_owner: Option<&str>, dbus_path: Path<'static>,
        configuration: &[u8],
    ) -> Result<Transport> {
        let ctx = device.context().clone();
        let profile = ty.profile;
        let is_sink = profile == Profile::A2dpSink;
        let soft_volume = !ctx.config().a2dp_volume_passthrough;

        let (pcm_mode, pcm_slot) =
            if is_sink { (PcmMode::Source, ThreadSlot::Decoder) } else { (PcmMode::Sink, ThreadSlot::Encoder) };
        let (bc_mode, bc_slot) =
            if is_sink { (PcmMode::Sink, ThreadSlot::Encoder) } else { (PcmMode::Source, ThreadSlot::Decoder) };

        let pcm =
            TransportPcm::new(pcm_mode, pcm_slot, 127, soft_volume, pcm_path(device, profile, pcm_mode));
        let pcm_bc =
            TransportPcm::new(bc_mode, bc_slot, 127, soft_volume, pcm_path(device, profile, bc_mode));

        let t = Transport {
            inner: Arc::new(TransportInner {
                ctx,
                device: device.clone(),
                dbus_owner: dbus_owner.map(|owner| owner.to_string()),
                dbus_path,
                profile,
                codec: Mutex::new(ty.codec),
                bt: Mutex::new(BtLink::default()),
                thread_enc: TransportThread::new()?,
                thread_dec: TransportThread::new()?,
                backend: Backend::A2dp(A2dpTransport {
                    configuration: Mutex::new(configuration.to_vec()),
                    state: AtomicU8::new(A2dpState::Idle as u8),
                    pcm,
                    pcm_bc,
                    delay: AtomicU32::new(0),
                    coutq_init: AtomicI32::new(0),
                }),
            }),
        };

        t.set_codec(ty.codec).await?;
        device.insert_transport(t.inner.dbus_path.to_string(), t.clone()).await;
        t.register_pcms().await;
        Ok(t)
    }

    /// Creates a SCO transport for a voice connection.
    ///
    /// HSP only speaks CVSD, and so does an adapter without eSCO support;
    /// in both cases the requested codec is overridden. When an RFCOMM
    /// descriptor is supplied a fresh [RfcommSession] is attached for the
    /// AT engine; external-telephony back-ends pass `None`.
    pub async fn new_sco(
        device: &Device, mut ty: TransportType, dbus_owner: Option<&str>, dbus_path: Path<'static>,
        rfcomm_fd: Option<std::os::fd::OwnedFd>,
    ) -> Result<Transport> {
        use std::os::fd::IntoRawFd;

        if ty.profile.is_hsp() || !device.adapter().esco_supported() {
            ty.codec = HfpCodec::Cvsd as u16;
        }

        // A single full-duplex worker in the encoder slot services both
        // directions of a SCO link.
        let spk_pcm = TransportPcm::new(
            PcmMode::Sink,
            ThreadSlot::Encoder,
            15,
            false,
            pcm_path(device, ty.profile, PcmMode::Sink),
        );
        let mic_pcm = TransportPcm::new(
            PcmMode::Source,
            ThreadSlot::Encoder,
            15,
            false,
            pcm_path(device, ty.profile, PcmMode::Source),
        );

        let rfcomm = match rfcomm_fd {
            Some(fd) => {
                let fd = unsafe { OwnedFd::new(fd.into_raw_fd()) };
                Some(Arc::new(RfcommSession::new(fd)?))
            }
            None => None,
        };

        let t = Transport {
            inner: Arc::new(TransportInner {
                ctx: device.context().clone(),
                device: device.clone(),
                dbus_owner: dbus_owner.map(|owner| owner.to_string()),
                dbus_path,
                profile: ty.profile,
                codec: Mutex::new(ty.codec),
                bt: Mutex::new(BtLink::default()),
                thread_enc: TransportThread::new()?,
                thread_dec: TransportThread::new()?,
                backend: Backend::Sco(ScoTransport { spk_pcm, mic_pcm, rfcomm: StdMutex::new(rfcomm) }),
            }),
        };

        t.set_codec(ty.codec).await?;
        device.insert_transport(t.inner.dbus_path.to_string(), t.clone()).await;
        t.register_pcms().await;
        Ok(t)
    }

    async fn register_pcms(&self) {
        for pcm in self.pcms() {
            let endpoint = pcm.pcm();
            if endpoint.lock().await.channels > 0 {
                endpoint.registered.store(true, Ordering::Relaxed);
                self.inner.ctx.emit_pcm_event(PcmEvent::Registered(pcm.clone()));
            }
        }
    }

    /// The context this transport was created in.
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// The device this transport belongs to.
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// D-Bus path of the platform daemon's transport object.
    pub fn dbus_path(&self) -> &Path<'static> {
        &self.inner.dbus_path
    }

    /// Bus name of the platform daemon owning the transport, if any.
    pub fn dbus_owner(&self) -> Option<&str> {
        self.inner.dbus_owner.as_deref()
    }

    /// Profile of the transport.
    pub fn profile(&self) -> Profile {
        self.inner.profile
    }

    /// Snapshot of the transport type.
    pub async fn transport_type(&self) -> TransportType {
        TransportType { profile: self.inner.profile, codec: *self.inner.codec.lock().await }
    }

    /// Read and write MTUs of the Bluetooth link.
    pub async fn mtus(&self) -> (u16, u16) {
        let bt = self.inner.bt.lock().await;
        (bt.mtu_read, bt.mtu_write)
    }

    /// The Bluetooth socket, when the transport is acquired.
    pub async fn bt_socket(&self) -> Option<BtSocket> {
        self.inner.bt.lock().await.sock.clone()
    }

    /// The RFCOMM session of a SCO transport, if one is attached.
    pub fn rfcomm(&self) -> Option<Arc<RfcommSession>> {
        match &self.inner.backend {
            Backend::Sco(sco) => sco.rfcomm.lock().unwrap().clone(),
            Backend::A2dp(_) => None,
        }
    }

    /// PCM endpoints of the transport, primary direction first.
    pub fn pcms(&self) -> Vec<Pcm> {
        match &self.inner.backend {
            Backend::A2dp(_) => vec![
                Pcm::new(self.clone(), PcmId::A2dp),
                Pcm::new(self.clone(), PcmId::A2dpBackchannel),
            ],
            Backend::Sco(_) => vec![
                Pcm::new(self.clone(), PcmId::ScoSpeaker),
                Pcm::new(self.clone(), PcmId::ScoMic),
            ],
        }
    }

    /// Primary PCM endpoint of an A2DP transport.
    pub fn a2dp_pcm(&self) -> Option<Pcm> {
        matches!(&self.inner.backend, Backend::A2dp(_)).then(|| Pcm::new(self.clone(), PcmId::A2dp))
    }

    /// Back-channel PCM endpoint of an A2DP transport.
    pub fn a2dp_pcm_backchannel(&self) -> Option<Pcm> {
        matches!(&self.inner.backend, Backend::A2dp(_))
            .then(|| Pcm::new(self.clone(), PcmId::A2dpBackchannel))
    }

    /// Speaker PCM endpoint of a SCO transport.
    pub fn sco_spk_pcm(&self) -> Option<Pcm> {
        matches!(&self.inner.backend, Backend::Sco(_)).then(|| Pcm::new(self.clone(), PcmId::ScoSpeaker))
    }

    /// Microphone PCM endpoint of a SCO transport.
    pub fn sco_mic_pcm(&self) -> Option<Pcm> {
        matches!(&self.inner.backend, Backend::Sco(_)).then(|| Pcm::new(self.clone(), PcmId::ScoMic))
    }

    pub(crate) fn pcm_by_id(&self, id: PcmId) -> &TransportPcm {
        match (&self.inner.backend, id) {
            (Backend::A2dp(a2dp), PcmId::A2dp) => &a2dp.pcm,
            (Backend::A2dp(a2dp), PcmId::A2dpBackchannel) => &a2dp.pcm_bc,
            (Backend::Sco(sco), PcmId::ScoSpeaker) => &sco.spk_pcm,
            (Backend::Sco(sco), PcmId::ScoMic) => &sco.mic_pcm,
            _ => unreachable!("PCM endpoint does not belong to this transport"),
        }
    }

    pub(crate) fn thread(&self, slot: ThreadSlot) -> &TransportThread {
        match slot {
            ThreadSlot::Encoder => &self.inner.thread_enc,
            ThreadSlot::Decoder => &self.inner.thread_dec,
        }
    }

    /// Waits until the worker occupying the slot has entered its event
    /// loop and the signal pipe is being drained.
    pub async fn thread_wait_ready(&self, slot: ThreadSlot) {
        self.thread(slot).wait_ready().await
    }

    /// Whether the worker occupying the slot has entered its event loop.
    pub fn thread_running(&self, slot: ThreadSlot) -> bool {
        self.thread(slot).is_running()
    }

    /// Locks both PCM endpoints, in their fixed order.
    pub(crate) async fn pcms_lock(&self) -> PcmGuards<'_> {
        match &self.inner.backend {
            Backend::A2dp(a2dp) => {
                let first = a2dp.pcm.lock().await;
                let second = a2dp.pcm_bc.lock().await;
                PcmGuards { first, second }
            }
            Backend::Sco(sco) => {
                let first = sco.spk_pcm.lock().await;
                let second = sco.mic_pcm.lock().await;
                PcmGuards { first, second }
            }
        }
    }

    /// Spawns a worker task into the given slot.
    ///
    /// A no-op when the slot is already occupied. The spawned task holds a
    /// transport reference for its lifetime; after the routine returns the
    /// transport is released under the combined PCM lock, so a concurrent
    /// PCM operation can never observe a closed Bluetooth descriptor being
    /// reused.
    pub fn thread_start<F, Fut>(&self, slot: ThreadSlot, name: &str, routine: F) -> Result<()>
    where
        F: FnOnce(Worker) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let profile = self.inner.profile;
        let th = self.thread(slot);
        let t = self.clone();
        let spawned = th.with_slot(move |task| {
            if task.is_some() {
                return false;
            }
            let worker = Worker::new(t.clone(), slot);
            let handle = tokio::spawn(async move {
                if AssertUnwindSafe(routine(worker)).catch_unwind().await.is_err() {
                    log::error!("Transport worker panicked: {}", t.profile());
                }
                let mut pcms = t.pcms_lock().await;
                if let Err(err) = t.release_locked(&mut pcms).await {
                    log::warn!("Couldn't release transport: {}", err);
                }
                drop(pcms);
                log::debug!("Exiting IO worker: {}", t.profile());
            });
            *task = Some(handle);
            true
        });
        if spawned {
            log::debug!("Created new IO worker [{}]: {}", name, profile);
        }
        Ok(())
    }

    /// Starts the IO workers of the transport through the [AudioIo]
    /// factory of the context. A no-op when either slot is occupied.
    ///
    /// [AudioIo]: crate::io::AudioIo
    pub fn start(&self) -> Result<()> {
        if self.inner.thread_enc.is_started() || self.inner.thread_dec.is_started() {
            return Ok(());
        }
        log::debug!("Starting transport: {}", self.inner.profile);
        match &self.inner.backend {
            Backend::A2dp(_) => self.inner.ctx.audio().start_a2dp(self),
            Backend::Sco(_) => self.inner.ctx.audio().start_sco(self),
        }
    }

    /// Terminates both IO workers and waits for them to exit.
    pub async fn stop(&self) {
        self.inner.thread_enc.cancel().await;
        self.inner.thread_dec.cancel().await;
    }

    /// Obtains the Bluetooth socket of the transport.
    ///
    /// When the transport is already acquired the existing socket is
    /// returned without talking to anybody (keep-alive). Otherwise the
    /// socket is obtained from the platform daemon (A2DP) or by opening a
    /// SCO link (SCO), and the link MTUs are recorded.
    pub async fn acquire(&self) -> Result<BtSocket> {
        // SCO needs the codec for the voice setting; the type lock may not
        // be taken under the bt lock.
        let codec = *self.inner.codec.lock().await;
        let mut bt = self.inner.bt.lock().await;
        if let Some(sock) = bt.sock.clone() {
            log::debug!("Reusing transport: {}", sock.as_raw_fd());
            return Ok(sock);
        }
        match &self.inner.backend {
            Backend::A2dp(a2dp) => self.acquire_a2dp(a2dp, &mut bt).await,
            Backend::Sco(_) => self.acquire_sco(codec, &mut bt).await,
        }
    }

    async fn acquire_a2dp(&self, a2dp: &A2dpTransport, bt: &mut BtLink) -> Result<BtSocket> {
        let inner = &*self.inner;
        let owner = inner
            .dbus_owner
            .as_deref()
            .ok_or_else(|| Error::with_message(ErrorKind::Io, "transport has no D-Bus owner".into()))?;
        let connection = inner.ctx.connection()?;

        let try_acquire = a2dp.state() == A2dpState::Pending;
        let (fd, mtu_read, mtu_write) =
            match bluez::acquire_transport(connection, owner, &inner.dbus_path, try_acquire).await {
                Ok(reply) => reply,
                Err(err) => {
                    log::error!("Couldn't acquire transport: {}", err);
                    return Err(err);
                }
            };

        let fd = unsafe { OwnedFd::new(fd.into_fd()) };
        sock::set_nonblocking(&fd)?;

        // A tripled write-MTU output buffer keeps the audio delay low and
        // the transport responsive, while leaving headroom against
        // temporal load spikes.
        let sndbuf = i32::from(mtu_write) * 3;
        if let Err(err) = sock::setsockopt(&fd, libc::SOL_SOCKET, libc::SO_SNDBUF, &sndbuf) {
            log::warn!("Couldn't set socket output buffer size: {}", err);
        }

        match sock::ioctl_read::<libc::c_int>(&fd, libc::TIOCOUTQ as libc::c_ulong) {
            Ok(queued) => a2dp.coutq_init.store(queued, Ordering::Relaxed),
            Err(err) => log::warn!("Couldn't get socket queued bytes: {}", err),
        }

        let sock = BtSocket::new(fd)?;
        log::debug!("New transport: {} (MTU: R:{} W:{})", sock.as_raw_fd(), mtu_read, mtu_write);
        bt.mtu_read = mtu_read;
        bt.mtu_write = mtu_write;
        bt.sock = Some(sock.clone());
        Ok(sock)
    }

    async fn acquire_sco(&self, codec: u16, bt: &mut BtLink) -> Result<BtSocket> {
        let device = &self.inner.device;
        let voice = if codec == HfpCodec::Cvsd as u16 {
            VoiceSetting::Cvsd16Bit
        } else {
            VoiceSetting::Transparent
        };
        let (fd, mtu) = match sco::connect(device.adapter().address(), device.address(), voice).await {
            Ok(link) => link,
            Err(err) => {
                log::error!("Couldn't establish SCO link: {}", err);
                return Err(err.into());
            }
        };
        let sock = BtSocket::new(fd)?;
        log::debug!("New SCO link: {}: {}", device.address(), sock.as_raw_fd());
        bt.mtu_read = mtu;
        bt.mtu_write = mtu;
        bt.sock = Some(sock.clone());
        Ok(sock)
    }

    /// Releases the Bluetooth socket of the transport.
    ///
    /// Takes the combined PCM lock itself; see
    /// [release_locked](Self::release_locked) for callers already holding
    /// it.
    pub async fn release(&self) -> Result<()> {
        let mut pcms = self.pcms_lock().await;
        self.release_locked(&mut pcms).await
    }

    /// Releases the Bluetooth socket while the caller holds the combined
    /// PCM lock, which serializes the close against concurrent PCM
    /// operations. A no-op when the transport is not acquired.
    pub(crate) async fn release_locked(&self, _pcms: &mut PcmGuards<'_>) -> Result<()> {
        let mut bt = self.inner.bt.lock().await;
        match &self.inner.backend {
            Backend::A2dp(a2dp) => self.release_a2dp(a2dp, &mut bt).await,
            Backend::Sco(_) => self.release_sco(&mut bt),
        }
    }

    async fn release_a2dp(&self, a2dp: &A2dpTransport, bt: &mut BtLink) -> Result<()> {
        let Some(fd) = bt.sock.as_ref().map(|sock| sock.as_raw_fd()) else { return Ok(()) };

        // In the idle state the daemon either never handed the socket out
        // or has revoked it already; an explicit release request would only
        // come back as an error.
        if a2dp.state() != A2dpState::Idle {
            if let Some(owner) = self.inner.dbus_owner.as_deref() {
                log::debug!("Releasing transport: {}", self.inner.profile);
                let connection = self.inner.ctx.connection()?;
                if let Err(err) = bluez::release_transport(connection, owner, &self.inner.dbus_path).await
                {
                    log::error!("Couldn't release transport: {}", err);
                    return Err(err);
                }
            }
        }

        log::debug!("Closing BT: {}", fd);
        bt.sock = None;
        Ok(())
    }

    fn release_sco(&self, bt: &mut BtLink) -> Result<()> {
        let Some(sock) = bt.sock.take() else { return Ok(()) };
        log::debug!("Closing SCO: {}", sock.as_raw_fd());
        if let Err(err) = sock.shutdown() {
            log::warn!("Couldn't shutdown SCO socket: {}", err);
        }
        Ok(())
    }

    /// State of an A2DP transport; `None` for SCO transports.
    pub fn a2dp_state(&self) -> Option<A2dpState> {
        match &self.inner.backend {
            Backend::A2dp(a2dp) => Some(a2dp.state()),
            Backend::Sco(_) => None,
        }
    }

    /// Applies a transport state reported by the platform daemon.
    ///
    /// The state is stored unconditionally; the side effect of the
    /// transition is attempted and its failure reported, with the daemon
    /// remaining the source of truth for the state itself.
    pub async fn set_a2dp_state(&self, state: A2dpState) -> Result<()> {
        let Backend::A2dp(a2dp) = &self.inner.backend else {
            return Err(Error::new(ErrorKind::NotSupported));
        };
        a2dp.state.store(state as u8, Ordering::Relaxed);
        match state {
            A2dpState::Pending => {
                // Eagerly open the socket to start receiving audio, but
                // only in the sink role; a source is acquired by the
                // client-driven PCM open path.
                if self.inner.profile == Profile::A2dpSink {
                    self.acquire().await?;
                }
                Ok(())
            }
            A2dpState::Active => self.start(),
            A2dpState::Idle => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Records the latency reported by the remote device, in 1/100 of a
    /// millisecond.
    pub fn set_a2dp_delay(&self, delay: u32) -> Result<()> {
        match &self.inner.backend {
            Backend::A2dp(a2dp) => {
                a2dp.delay.store(delay, Ordering::Relaxed);
                Ok(())
            }
            Backend::Sco(_) => Err(Error::new(ErrorKind::NotSupported)),
        }
    }

    /// Socket output queue depth sampled right after acquisition.
    pub fn a2dp_coutq_init(&self) -> Option<i32> {
        match &self.inner.backend {
            Backend::A2dp(a2dp) => Some(a2dp.coutq_init.load(Ordering::Relaxed)),
            Backend::Sco(_) => None,
        }
    }

    /// Codec configuration blob of an A2DP transport.
    pub async fn a2dp_configuration(&self) -> Option<Vec<u8>> {
        match &self.inner.backend {
            Backend::A2dp(a2dp) => Some(a2dp.configuration.lock().await.clone()),
            Backend::Sco(_) => None,
        }
    }

    /// Applies a codec to the transport and re-derives the PCM parameters
    /// of its endpoints.
    ///
    /// Used at creation time and by the RFCOMM AT engine once the peer
    /// confirmed a codec switch.
    pub async fn set_codec(&self, codec_id: u16) -> Result<()> {
        let mut codec = self.inner.codec.lock().await;
        *codec = codec_id;
        match &self.inner.backend {
            Backend::A2dp(a2dp) => {
                let configuration = a2dp.configuration.lock().await.clone();
                let params = codec::a2dp_pcm_params(codec_id, &configuration)?;
                let mut pcms = self.pcms_lock().await;
                pcms.first.format = params.format;
                if let Some((channels, sampling)) = params.main {
                    pcms.first.channels = channels;
                    pcms.first.sampling = sampling;
                }
                pcms.second.format = params.format;
                if let Some((channels, sampling)) = params.backchannel {
                    pcms.second.channels = channels;
                    pcms.second.sampling = sampling;
                }
            }
            Backend::Sco(_) => {
                let params = codec::sco_pcm_params(codec_id);
                let mut pcms = self.pcms_lock().await;
                for state in [&mut *pcms.first, &mut *pcms.second] {
                    state.format = params.format;
                    state.channels = params.channels;
                    state.sampling = params.sampling;
                }
            }
        }
        Ok(())
    }

    /// Requests an A2DP codec selection on the given stream endpoint.
    ///
    /// When the proposed codec and configuration already match the current
    /// ones this is a no-op. The transport type itself is not updated
    /// here; it changes asynchronously once the platform daemon
    /// reconfigures the transport.
    pub async fn select_codec_a2dp(&self, sep: &A2dpSep) -> Result<()> {
        let Backend::A2dp(a2dp) = &self.inner.backend else {
            return Err(Error::new(ErrorKind::NotSupported));
        };

        // selecting a new codec will change the transport type
        let codec = self.inner.codec.lock().await;

        if *codec == sep.codec && *a2dp.configuration.lock().await == sep.configuration {
            return Ok(());
        }

        let owner = self
            .inner
            .dbus_owner
            .as_deref()
            .ok_or_else(|| Error::with_message(ErrorKind::Io, "transport has no D-Bus owner".into()))?;
        let connection = self.inner.ctx.connection()?;
        if let Err(err) = bluez::set_configuration(connection, owner, &sep.path, &sep.configuration).await
        {
            log::error!("Couldn't set A2DP configuration: {}", err);
            return Err(Error::with_message(ErrorKind::Io, err.to_string()));
        }

        drop(codec);
        Ok(())
    }

    /// Requests a voice codec switch over the RFCOMM channel.
    ///
    /// Only supported for HFP transports with an attached RFCOMM session.
    /// The ongoing audio connection is torn down, the AT engine is asked
    /// to negotiate the codec and the call waits until the handshake
    /// completed. When the codec then differs from the requested one the
    /// peer forced another codec and the switch failed.
    pub async fn select_codec_sco(&self, codec_id: u16) -> Result<()> {
        match self.inner.profile {
            Profile::HfpHf | Profile::HfpAg => (),
            _ => return Err(Error::new(ErrorKind::NotSupported)),
        }

        // with an external-telephony back-end we have no access to RFCOMM
        let Some(rfcomm) = self.rfcomm() else {
            return Err(Error::new(ErrorKind::NotSupported));
        };

        {
            let codec = self.inner.codec.lock().await;
            if *codec == codec_id {
                return Ok(());
            }
        }

        let signal = match HfpCodec::from_u16(codec_id) {
            Some(HfpCodec::Cvsd) => RfcommSignal::SetCodecCvsd,
            Some(HfpCodec::Msbc) => RfcommSignal::SetCodecMsbc,
            _ => return Err(Error::new(ErrorKind::NotSupported)),
        };

        let completed = rfcomm.codec_selection();

        {
            // the ongoing voice connection does not survive a codec switch
            let mut pcms = self.pcms_lock().await;
            pcms.first.release();
            pcms.second.release();
            if let Err(err) = self.release_locked(&mut pcms).await {
                log::warn!("Couldn't release transport: {}", err);
            }
        }

        rfcomm.send_signal(signal);
        completed.await;

        // The AT engine applied the outcome through set_codec; anything
        // other than the requested codec means the peer forced another one.
        if *self.inner.codec.lock().await != codec_id {
            return Err(Error::new(ErrorKind::Io));
        }
        Ok(())
    }

    /// Total delay of a PCM endpoint, in 1/100 of a millisecond.
    pub(crate) async fn pcm_delay(&self, id: PcmId) -> u32 {
        let delay = self.pcm_by_id(id).lock().await.delay;
        match &self.inner.backend {
            Backend::A2dp(a2dp) => a2dp.delay.load(Ordering::Relaxed) + delay,
            // constant processing overhead of the SCO chain
            Backend::Sco(_) => delay + 10,
        }
    }

    pub(crate) async fn pcm_update_volume(&self, id: PcmId) -> Result<()> {
        let inner = &*self.inner;
        let pcm = self.pcm_by_id(id);

        // A software-scaled volume must not additionally reach the device
        // on the sending side, or the audio would be attenuated twice:
        // first by us and then by the Bluetooth speaker or headset.
        let skip = pcm.soft_volume.load(Ordering::Relaxed)
            && matches!(inner.profile, Profile::A2dpSource | Profile::HfpAg | Profile::HspAg);

        if !skip {
            match &inner.backend {
                Backend::A2dp(_) => {
                    let volume = {
                        let state = pcm.lock().await;
                        pcm.propagated_bt_volume(&state.volume)
                    };
                    match (inner.dbus_owner.as_deref(), inner.ctx.connection_opt()) {
                        (Some(owner), Some(connection)) => {
                            if let Err(err) =
                                bluez::set_transport_volume(connection, owner, &inner.dbus_path, volume)
                                    .await
                            {
                                log::warn!("Couldn't set BT device volume: {}", err);
                            }
                        }
                        _ => log::warn!("Couldn't set BT device volume: no D-Bus connection"),
                    }
                }
                Backend::Sco(sco) => {
                    if let Some(rfcomm) = sco.rfcomm.lock().unwrap().clone() {
                        rfcomm.send_signal(RfcommSignal::UpdateVolume);
                    }
                }
            }
        }

        // notify connected clients (including the requester)
        inner.ctx.emit_pcm_event(PcmEvent::VolumeChanged(Pcm::new(self.clone(), id)));
        Ok(())
    }

    /// Tears the transport down and detaches it from the device registry.
    ///
    /// The consumed handle stands in for the registry reference, so a
    /// destroyed transport cannot be dropped twice. Remaining handles
    /// stay valid; the resources go away once the last one drops.
    pub async fn destroy(self) {
        // Withdraw the PCM endpoints first, so no new client arrives in
        // the middle of the teardown.
        for pcm in self.pcms() {
            let endpoint = pcm.pcm();
            if endpoint.registered.swap(false, Ordering::Relaxed) {
                self.inner
                    .ctx
                    .emit_pcm_event(PcmEvent::Unregistered { path: endpoint.dbus_path.clone() });
            }
        }

        if let Backend::Sco(sco) = &self.inner.backend {
            if let Some(rfcomm) = sco.rfcomm.lock().unwrap().take() {
                rfcomm.shutdown();
            }
        }

        // The IO workers have to be gone before resources are released;
        // otherwise a closed and reused descriptor could be observed.
        self.inner.thread_enc.cancel().await;
        self.inner.thread_dec.cancel().await;

        {
            let mut pcms = self.pcms_lock().await;
            pcms.first.release();
            pcms.second.release();
            if let Err(err) = self.release_locked(&mut pcms).await {
                log::warn!("Couldn't release transport: {}", err);
            }
        }

        self.inner.device.remove_transport(&self.inner.dbus_path).await;
    }
}

/// Guards of both PCM endpoints, in their fixed locking order: primary
/// before back-channel, speaker before microphone.
pub(crate) struct PcmGuards<'a> {
    pub first: MutexGuard<'a, PcmState>,
    pub second: MutexGuard<'a, PcmState>,
}

#[cfg(test)]
impl Transport {
    /// Installs a test socket as the acquired Bluetooth socket.
    pub(crate) async fn inject_bt_socket(&self, fd: std::os::fd::OwnedFd) -> BtSocket {
        use std::os::fd::IntoRawFd;
        let fd = unsafe { OwnedFd::new(fd.into_raw_fd()) };
        let sock = BtSocket::new(fd).unwrap();
        let mut bt = self.inner.bt.lock().await;
        bt.mtu_read = 48;
        bt.mtu_write = 48;
        bt.sock = Some(sock.clone());
        sock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{SbcConfig, SBC_MIN_BITPOOL},
        io::AudioIo,
        signal::Signal,
        Adapter, Address, Config, Volume,
    };
    use std::{
        os::fd::FromRawFd,
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };
    use tokio::time::timeout;

    struct TestAudioIo {
        a2dp_starts: AtomicUsize,
        sco_starts: AtomicUsize,
    }

    impl TestAudioIo {
        fn new() -> Arc<Self> {
            Arc::new(Self { a2dp_starts: AtomicUsize::new(0), sco_starts: AtomicUsize::new(0) })
        }
    }

    impl AudioIo for TestAudioIo {
        fn start_a2dp(&self, transport: &Transport) -> Result<()> {
            self.a2dp_starts.fetch_add(1, Ordering::Relaxed);
            spawn_signal_loop(transport, ThreadSlot::Encoder)?;
            spawn_signal_loop(transport, ThreadSlot::Decoder)
        }

        fn start_sco(&self, transport: &Transport) -> Result<()> {
            self.sco_starts.fetch_add(1, Ordering::Relaxed);
            spawn_signal_loop(transport, ThreadSlot::Encoder)
        }
    }

    fn spawn_signal_loop(transport: &Transport, slot: ThreadSlot) -> Result<()> {
        transport.thread_start(slot, "test-io", |worker| async move {
            worker.ready();
            loop {
                match worker.recv_signal().await {
                    Signal::PcmSync => {
                        for pcm in worker.transport().pcms() {
                            pcm.mark_synced();
                        }
                    }
                    Signal::Close => break,
                    _ => (),
                }
            }
        })
    }

    fn test_context(audio: Arc<dyn AudioIo>) -> Context {
        let _ = env_logger::builder().is_test(true).try_init();
        Context::offline(
            Config { drain_settle: Duration::from_millis(50), ..Config::default() },
            audio,
        )
    }

    fn test_device(ctx: &Context, esco_supported: bool) -> Device {
        let adapter = Adapter::new(0, Address::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x00]), esco_supported);
        Device::new(ctx, &adapter, Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
    }

    fn socketpair() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(
            unsafe {
                libc::socketpair(libc::AF_UNIX, libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK, 0, fds.as_mut_ptr())
            },
            0
        );
        unsafe { (std::os::fd::OwnedFd::from_raw_fd(fds[0]), std::os::fd::OwnedFd::from_raw_fd(fds[1])) }
    }

    async fn sco_transport(device: &Device, profile: Profile, codec: u16, rfcomm: bool) -> Transport {
        let rfcomm_fd = rfcomm.then(|| socketpair().0);
        Transport::new_sco(
            device,
            TransportType { profile, codec },
            Some(":1.42"),
            Path::new(format!("/org/bluez/hci0/dev_00_11_22_33_44_55/{}", profile.dbus_path_tag()))
                .unwrap(),
            rfcomm_fd,
        )
        .await
        .unwrap()
    }

    fn sbc_config() -> Vec<u8> {
        SbcConfig {
            frequency: codec::SBC_SAMPLING_FREQ_44100,
            channel_mode: codec::SBC_CHANNEL_MODE_STEREO,
            block_length: codec::SBC_BLOCK_LENGTH_16,
            subbands: codec::SBC_SUBBANDS_8,
            allocation_method: codec::SBC_ALLOCATION_LOUDNESS,
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: 53,
        }
        .bytes()
        .to_vec()
    }

    async fn a2dp_transport(device: &Device, profile: Profile) -> Transport {
        Transport::new_a2dp(
            device,
            TransportType { profile, codec: A2dpCodec::Sbc as u16 },
            None,
            Path::new(format!("/org/bluez/hci0/dev_00_11_22_33_44_55/{}", profile.dbus_path_tag()))
                .unwrap(),
            &sbc_config(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sco_create_forces_cvsd() {
        let ctx = test_context(TestAudioIo::new());

        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HspAg, HfpCodec::Msbc as u16, false).await;
        assert_eq!(t.transport_type().await.codec, HfpCodec::Cvsd as u16);

        let device = test_device(&ctx, false);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Msbc as u16, false).await;
        assert_eq!(t.transport_type().await.codec, HfpCodec::Cvsd as u16);

        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Msbc as u16, false).await;
        assert_eq!(t.transport_type().await.codec, HfpCodec::Msbc as u16);
    }

    #[tokio::test]
    async fn sco_pcm_parameters() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;

        let spk = t.sco_spk_pcm().unwrap();
        let mic = t.sco_mic_pcm().unwrap();
        assert_eq!(spk.mode(), PcmMode::Sink);
        assert_eq!(mic.mode(), PcmMode::Source);
        for pcm in [&spk, &mic] {
            assert_eq!(pcm.format().await, crate::PcmFormat::S16Le);
            assert_eq!(pcm.channels().await, 1);
            assert_eq!(pcm.sampling().await, 8000);
            assert_eq!(pcm.max_bt_volume(), 15);
        }
        assert!(spk.dbus_path().ends_with("/hfphf/sink"));
        assert!(mic.dbus_path().ends_with("/hfphf/source"));
    }

    #[tokio::test]
    async fn pcm_registration_events() {
        let audio = TestAudioIo::new();
        let ctx = test_context(audio);
        let mut events = ctx.pcm_events().unwrap();

        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;

        for direction in ["sink", "source"] {
            match events.recv().await.unwrap() {
                PcmEvent::Registered(pcm) => assert!(pcm.dbus_path().ends_with(direction)),
                event => panic!("unexpected event: {:?}", event),
            }
        }

        // SBC has no back-channel; only the primary endpoint goes public.
        let device = test_device(&ctx, true);
        let t2 = a2dp_transport(&device, Profile::A2dpSource).await;
        match events.recv().await.unwrap() {
            PcmEvent::Registered(pcm) => {
                assert!(pcm.dbus_path().ends_with("/a2dpsrc/sink"));
                assert_eq!(pcm.channels().await, 2);
                assert_eq!(pcm.sampling().await, 44100);
            }
            event => panic!("unexpected event: {:?}", event),
        }
        assert!(timeout(Duration::from_millis(20), events.recv()).await.is_err());

        t.destroy().await;
        for _ in 0..2 {
            assert!(matches!(events.recv().await.unwrap(), PcmEvent::Unregistered { .. }));
        }
        t2.destroy().await;
        assert!(matches!(events.recv().await.unwrap(), PcmEvent::Unregistered { .. }));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;

        let (near, _far) = socketpair();
        t.inject_bt_socket(near).await;
        assert!(t.bt_socket().await.is_some());

        t.release().await.unwrap();
        assert!(t.bt_socket().await.is_none());
        t.release().await.unwrap();
        assert!(t.bt_socket().await.is_none());
    }

    #[tokio::test]
    async fn acquire_keep_alive() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;

        let (near, _far) = socketpair();
        let sock = t.inject_bt_socket(near).await;
        // A real acquisition is impossible here, so a successful return
        // proves the keep-alive short-circuit.
        let again = t.acquire().await.unwrap();
        assert_eq!(again.as_raw_fd(), sock.as_raw_fd());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let audio = TestAudioIo::new();
        let ctx = test_context(audio.clone());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;

        t.start().unwrap();
        t.thread_wait_ready(ThreadSlot::Encoder).await;
        t.start().unwrap();
        assert_eq!(audio.sco_starts.load(Ordering::Relaxed), 1);

        t.stop().await;
        assert!(!t.thread(ThreadSlot::Encoder).is_started());
    }

    #[tokio::test]
    async fn destroy_with_active_workers() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        let dbus_path = t.dbus_path().to_string();

        let (near, _far) = socketpair();
        t.inject_bt_socket(near).await;
        t.start().unwrap();
        t.thread_wait_ready(ThreadSlot::Encoder).await;

        assert!(device.transport(&dbus_path).await.is_some());
        timeout(Duration::from_secs(1), t.clone().destroy()).await.unwrap();

        assert!(device.transport(&dbus_path).await.is_none());
        assert!(!t.thread(ThreadSlot::Encoder).is_started());
        assert!(t.bt_socket().await.is_none());
    }

    #[tokio::test]
    async fn a2dp_state_machine() {
        let audio = TestAudioIo::new();
        let ctx = test_context(audio.clone());
        let device = test_device(&ctx, true);
        let t = a2dp_transport(&device, Profile::A2dpSource).await;
        assert_eq!(t.a2dp_state(), Some(A2dpState::Idle));

        // A source transport defers acquisition to the PCM open path.
        t.set_a2dp_state(A2dpState::Pending).await.unwrap();
        assert!(t.bt_socket().await.is_none());

        t.set_a2dp_state(A2dpState::Active).await.unwrap();
        t.thread_wait_ready(ThreadSlot::Encoder).await;
        assert_eq!(audio.a2dp_starts.load(Ordering::Relaxed), 1);

        // Workers are already running, so another activation is a no-op.
        t.set_a2dp_state(A2dpState::Active).await.unwrap();
        assert_eq!(audio.a2dp_starts.load(Ordering::Relaxed), 1);

        t.set_a2dp_state(A2dpState::Idle).await.unwrap();
        assert!(!t.thread(ThreadSlot::Encoder).is_started());
        assert!(!t.thread(ThreadSlot::Decoder).is_started());

        t.set_a2dp_state(A2dpState::Active).await.unwrap();
        assert_eq!(audio.a2dp_starts.load(Ordering::Relaxed), 2);
        t.clone().destroy().await;
    }

    #[tokio::test]
    async fn a2dp_delay_accounting() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);

        let t = a2dp_transport(&device, Profile::A2dpSource).await;
        t.set_a2dp_delay(150).unwrap();
        assert_eq!(t.a2dp_pcm().unwrap().delay().await, 150);

        let sco = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        assert_eq!(sco.sco_spk_pcm().unwrap().delay().await, 10);
        assert_eq!(sco.set_a2dp_delay(1).unwrap_err().kind, ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn drain_semantics() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        let spk = t.sco_spk_pcm().unwrap();

        assert_eq!(spk.drain().await.unwrap_err().kind, ErrorKind::NoThread);

        t.start().unwrap();
        t.thread_wait_ready(ThreadSlot::Encoder).await;
        let before = Instant::now();
        spk.drain().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(50));
    }

    fn attach_codec_engine(t: &Transport, accept: bool) {
        let rfcomm = t.rfcomm().unwrap();
        let mut signals = rfcomm.signals().unwrap();
        let t = t.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let codec = match signal {
                    RfcommSignal::SetCodecCvsd => HfpCodec::Cvsd,
                    RfcommSignal::SetCodecMsbc => HfpCodec::Msbc,
                    RfcommSignal::UpdateVolume => continue,
                };
                if accept {
                    t.set_codec(codec as u16).await.unwrap();
                }
                t.rfcomm().unwrap().notify_codec_selection();
            }
        });
    }

    #[tokio::test]
    async fn hfp_codec_switch() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, true).await;
        attach_codec_engine(&t, true);

        let (near, _far) = socketpair();
        t.inject_bt_socket(near).await;

        t.select_codec_sco(HfpCodec::Msbc as u16).await.unwrap();
        assert_eq!(t.transport_type().await.codec, HfpCodec::Msbc as u16);
        // the switch released the ongoing voice connection
        assert!(t.bt_socket().await.is_none());
        assert_eq!(t.sco_spk_pcm().unwrap().sampling().await, 16000);
    }

    #[tokio::test]
    async fn hfp_codec_switch_rejected_by_peer() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, true).await;
        attach_codec_engine(&t, false);

        let err = t.select_codec_sco(HfpCodec::Msbc as u16).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert_eq!(t.transport_type().await.codec, HfpCodec::Cvsd as u16);
    }

    #[tokio::test]
    async fn codec_select_unsupported() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);

        // HSP cannot switch codecs at all.
        let t = sco_transport(&device, Profile::HspAg, HfpCodec::Cvsd as u16, true).await;
        assert_eq!(
            t.select_codec_sco(HfpCodec::Msbc as u16).await.unwrap_err().kind,
            ErrorKind::NotSupported
        );

        // Neither can HFP without an RFCOMM channel.
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        assert_eq!(
            t.select_codec_sco(HfpCodec::Msbc as u16).await.unwrap_err().kind,
            ErrorKind::NotSupported
        );

        // Selecting the current codec is a successful no-op.
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, true).await;
        t.select_codec_sco(HfpCodec::Cvsd as u16).await.unwrap();

        // A2DP selection on a SCO transport is refused.
        let sep = A2dpSep {
            path: Path::new("/org/bluez/hci0/dev_00_11_22_33_44_55/sep1").unwrap(),
            codec: A2dpCodec::Sbc as u16,
            configuration: sbc_config(),
        };
        assert_eq!(t.select_codec_a2dp(&sep).await.unwrap_err().kind, ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn a2dp_codec_select_no_op() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = a2dp_transport(&device, Profile::A2dpSource).await;

        // Proposing the current codec and configuration succeeds without
        // any RPC, which an offline context would otherwise fail.
        let sep = A2dpSep {
            path: Path::new("/org/bluez/hci0/dev_00_11_22_33_44_55/sep1").unwrap(),
            codec: A2dpCodec::Sbc as u16,
            configuration: sbc_config(),
        };
        t.select_codec_a2dp(&sep).await.unwrap();

        // A different configuration requires the RPC, which must fail
        // without a D-Bus connection.
        let mut other = sep.clone();
        other.configuration[3] = 35;
        assert!(t.select_codec_a2dp(&other).await.is_err());
    }

    #[tokio::test]
    async fn volume_reaches_rfcomm_engine() {
        let ctx = test_context(TestAudioIo::new());
        let mut events = ctx.pcm_events().unwrap();
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, true).await;
        let rfcomm = t.rfcomm().unwrap();
        let mut signals = rfcomm.signals().unwrap();

        // skip the registration events
        for _ in 0..2 {
            events.recv().await.unwrap();
        }

        let spk = t.sco_spk_pcm().unwrap();
        spk.set_volume(0, Volume { level: -1200, muted: false }).await.unwrap();
        assert_eq!(signals.recv().await, Some(RfcommSignal::UpdateVolume));
        assert!(matches!(events.recv().await.unwrap(), PcmEvent::VolumeChanged(_)));

        assert_eq!(spk.volume().await[0], Volume { level: -1200, muted: false });
        assert_eq!(
            spk.set_volume(1, Volume::default()).await.unwrap_err().kind,
            ErrorKind::InvalidArguments
        );
    }

    #[tokio::test]
    async fn soft_volume_gateway_skips_peer() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpAg, HfpCodec::Cvsd as u16, true).await;
        let rfcomm = t.rfcomm().unwrap();
        let mut signals = rfcomm.signals().unwrap();

        let spk = t.sco_spk_pcm().unwrap();
        spk.set_soft_volume(true);
        spk.set_volume(0, Volume { level: -600, muted: false }).await.unwrap();
        assert!(timeout(Duration::from_millis(20), signals.recv()).await.is_err());

        // A hands-free unit propagates even with software volume.
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, true).await;
        let rfcomm = t.rfcomm().unwrap();
        let mut signals = rfcomm.signals().unwrap();
        let spk = t.sco_spk_pcm().unwrap();
        spk.set_soft_volume(true);
        spk.set_volume(0, Volume { level: -600, muted: false }).await.unwrap();
        assert_eq!(signals.recv().await, Some(RfcommSignal::UpdateVolume));
    }

    #[tokio::test]
    async fn pcm_open_close() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        let spk = t.sco_spk_pcm().unwrap();

        let (near, _far) = socketpair();
        spk.open(near).await.unwrap();

        let (near, _far) = socketpair();
        assert_eq!(spk.open(near).await.unwrap_err().kind, ErrorKind::InvalidArguments);

        spk.close().await.unwrap();
        let (near, _far) = socketpair();
        spk.open(near).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_returns_reference() {
        let ctx = test_context(TestAudioIo::new());
        let device = test_device(&ctx, true);
        let t = sco_transport(&device, Profile::HfpHf, HfpCodec::Cvsd as u16, false).await;
        let dbus_path = t.dbus_path().to_string();

        let found = device.transport(&dbus_path).await.unwrap();
        assert_eq!(found.dbus_path(), t.dbus_path());
        assert!(device.transport("/does/not/exist").await.is_none());
        assert_eq!(device.transports().await.len(), 1);
    }
}
