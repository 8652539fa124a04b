//! PCM endpoints of a transport.
//!
//! Every transport exposes up to two PCM endpoints, one per direction of
//! audio flow. An endpoint carries the client descriptor, the stream
//! parameters derived from the transport codec and the per-channel volume.
//! The descriptor is opened and closed only under the endpoint lock, which
//! is what allows the release path to close Bluetooth resources without
//! racing a connected client.

use std::{
    os::unix::io::AsRawFd,
    sync::atomic::{AtomicBool, Ordering},
};
use strum::Display;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::{
    audio,
    signal::Signal,
    sock::OwnedFd,
    thread::ThreadSlot,
    transport::Transport,
    Error, ErrorKind, Result, Volume,
};

/// Direction of a PCM endpoint, from the point of view of the local client.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum PcmMode {
    /// Clients read audio that originates from the Bluetooth link.
    Source,
    /// Clients write audio that is sent towards the Bluetooth link.
    Sink,
}

/// Sample format of a PCM endpoint.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PcmFormat {
    /// 16-bit signed little-endian.
    #[strum(serialize = "S16_LE")]
    S16Le,
    /// 24-bit signed little-endian in a 32-bit container.
    #[strum(serialize = "S24_4LE")]
    S24Le,
    /// 32-bit signed little-endian.
    #[strum(serialize = "S32_4LE")]
    S32Le,
}

impl PcmFormat {
    /// Number of significant bits per sample.
    pub fn bit_width(&self) -> u8 {
        match self {
            Self::S16Le => 16,
            Self::S24Le => 24,
            Self::S32Le => 32,
        }
    }

    /// Number of bytes per sample, including container padding.
    pub fn byte_width(&self) -> u8 {
        match self {
            Self::S16Le => 2,
            Self::S24Le => 4,
            Self::S32Le => 4,
        }
    }
}

/// Mutable state of a PCM endpoint, guarded by the endpoint lock.
#[derive(Debug)]
pub(crate) struct PcmState {
    /// Client descriptor; `None` when no client is connected.
    pub fd: Option<OwnedFd>,
    pub format: PcmFormat,
    pub channels: u8,
    pub sampling: u32,
    pub volume: [Volume; 2],
    /// Local PCM-side delay, in 1/100 of a millisecond.
    pub delay: u32,
}

impl PcmState {
    /// Closes the client descriptor, if any.
    pub fn release(&mut self) {
        if let Some(fd) = self.fd.take() {
            log::debug!("Closing PCM: {}", fd.as_raw_fd());
        }
    }
}

pub(crate) struct TransportPcm {
    pub mode: PcmMode,
    /// Worker slot that services this endpoint.
    pub thread: ThreadSlot,
    /// Upper bound of the raw Bluetooth volume (A2DP 127, SCO 15).
    pub max_bt_volume: u16,
    /// Volume is scaled locally instead of being delegated to the peer.
    pub soft_volume: AtomicBool,
    /// Whether the endpoint has been announced to the PCM IPC layer.
    pub registered: AtomicBool,
    /// Signalled by the worker once its output queue ran empty after a
    /// [Signal::PcmSync].
    pub synced: Notify,
    /// Identity under which the endpoint is published to PCM clients.
    pub dbus_path: String,
    pub state: Mutex<PcmState>,
}

impl std::fmt::Debug for TransportPcm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TransportPcm").field("path", &self.dbus_path).field("mode", &self.mode).finish()
    }
}

impl TransportPcm {
    pub fn new(
        mode: PcmMode, thread: ThreadSlot, max_bt_volume: u16, soft_volume: bool, dbus_path: String,
    ) -> Self {
        Self {
            mode,
            thread,
            max_bt_volume,
            soft_volume: AtomicBool::new(soft_volume),
            registered: AtomicBool::new(false),
            synced: Notify::new(),
            dbus_path,
            state: Mutex::new(PcmState {
                fd: None,
                format: PcmFormat::S16Le,
                channels: 0,
                sampling: 0,
                volume: [Volume::default(); 2],
                delay: 0,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, PcmState> {
        self.state.lock().await
    }

    /// Converts a volume level in 1/100 dB into the raw Bluetooth volume of
    /// this endpoint.
    pub fn volume_level_to_bt(&self, level: i32) -> u16 {
        let volume = (audio::decibel_to_loudness(f64::from(level) / 100.0)
            * f64::from(self.max_bt_volume))
        .round();
        volume.clamp(0.0, f64::from(self.max_bt_volume)) as u16
    }

    /// Converts a raw Bluetooth volume of this endpoint into a volume level
    /// in 1/100 dB.
    pub fn volume_bt_to_level(&self, volume: u16) -> i32 {
        let level = audio::loudness_to_decibel(f64::from(volume) / f64::from(self.max_bt_volume));
        (level.clamp(-96.0, 96.0) * 100.0).round() as i32
    }

    /// Raw Bluetooth volume to report to the peer: the mean of the channel
    /// levels, or zero as soon as any channel is muted.
    pub fn propagated_bt_volume(&self, volume: &[Volume; 2]) -> u16 {
        if volume[0].muted || volume[1].muted {
            return 0;
        }
        self.volume_level_to_bt((volume[0].level + volume[1].level) / 2)
    }
}

/// Identifies one PCM endpoint within a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PcmId {
    A2dp,
    A2dpBackchannel,
    ScoSpeaker,
    ScoMic,
}

/// Handle to a PCM endpoint of a transport.
///
/// The handle owns a transport reference; PCM clients of the external IPC
/// layer keep their transport alive through it.
#[derive(Clone)]
pub struct Pcm {
    t: Transport,
    id: PcmId,
}

impl std::fmt::Debug for Pcm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Pcm {{ {} }}", self.pcm().dbus_path)
    }
}

impl Pcm {
    pub(crate) fn new(t: Transport, id: PcmId) -> Self {
        Self { t, id }
    }

    pub(crate) fn pcm(&self) -> &TransportPcm {
        self.t.pcm_by_id(self.id)
    }

    /// The transport this endpoint belongs to.
    pub fn transport(&self) -> &Transport {
        &self.t
    }

    /// Direction of the endpoint.
    pub fn mode(&self) -> PcmMode {
        self.pcm().mode
    }

    /// Identity under which the endpoint is published to PCM clients.
    pub fn dbus_path(&self) -> &str {
        &self.pcm().dbus_path
    }

    /// Upper bound of the raw Bluetooth volume of this endpoint.
    pub fn max_bt_volume(&self) -> u16 {
        self.pcm().max_bt_volume
    }

    /// Whether volume is scaled locally instead of by the peer.
    pub fn is_soft_volume(&self) -> bool {
        self.pcm().soft_volume.load(Ordering::Relaxed)
    }

    /// Selects between local and peer-side volume scaling.
    pub fn set_soft_volume(&self, soft_volume: bool) {
        self.pcm().soft_volume.store(soft_volume, Ordering::Relaxed);
    }

    /// Sample format of the endpoint.
    pub async fn format(&self) -> PcmFormat {
        self.pcm().lock().await.format
    }

    /// Channel count of the endpoint.
    pub async fn channels(&self) -> u8 {
        self.pcm().lock().await.channels
    }

    /// Sampling rate of the endpoint.
    pub async fn sampling(&self) -> u32 {
        self.pcm().lock().await.sampling
    }

    /// Per-channel volume of the endpoint.
    pub async fn volume(&self) -> [Volume; 2] {
        self.pcm().lock().await.volume
    }

    /// Approximate audio delay of the endpoint, in 1/100 of a millisecond.
    pub async fn delay(&self) -> u32 {
        self.t.pcm_delay(self.id).await
    }

    /// Connects a client descriptor to the endpoint.
    pub async fn open(&self, fd: std::os::fd::OwnedFd) -> Result<()> {
        use std::os::fd::IntoRawFd;
        let pcm = self.pcm();
        let mut state = pcm.lock().await;
        if state.fd.is_some() {
            return Err(Error::with_message(ErrorKind::InvalidArguments, "PCM already connected".into()));
        }
        let fd = unsafe { OwnedFd::new(fd.into_raw_fd()) };
        log::debug!("PCM opened: {}: {}", pcm.dbus_path, fd.as_raw_fd());
        state.fd = Some(fd);
        drop(state);
        self.send_signal(Signal::PcmOpen)
    }

    /// Disconnects the client descriptor from the endpoint.
    pub async fn close(&self) -> Result<()> {
        self.pcm().lock().await.release();
        self.send_signal(Signal::PcmClose)
    }

    /// Pauses moving audio data. Returns as soon as the signal is queued.
    pub fn pause(&self) -> Result<()> {
        self.send_signal(Signal::PcmPause)?;
        log::debug!("PCM paused: {}", self.pcm().dbus_path);
        Ok(())
    }

    /// Resumes moving audio data. Returns as soon as the signal is queued.
    pub fn resume(&self) -> Result<()> {
        self.send_signal(Signal::PcmResume)?;
        log::debug!("PCM resumed: {}", self.pcm().dbus_path);
        Ok(())
    }

    /// Discards queued audio data. Returns as soon as the signal is queued.
    pub fn discard(&self) -> Result<()> {
        self.send_signal(Signal::PcmDrop)?;
        log::debug!("PCM dropped: {}", self.pcm().dbus_path);
        Ok(())
    }

    /// Drains queued audio data.
    ///
    /// Returns once the servicing worker confirmed an empty output queue
    /// and the configured settle time has passed, giving the Bluetooth
    /// device a chance to play out its own buffer. Fails with
    /// [ErrorKind::NoThread] when no worker occupies the servicing slot.
    pub async fn drain(&self) -> Result<()> {
        let pcm = self.pcm();
        let th = self.t.thread(pcm.thread);
        if !th.is_started() {
            return Err(Error::new(ErrorKind::NoThread));
        }
        let synced = pcm.synced.notified();
        th.send_signal(Signal::PcmSync)?;
        synced.await;
        // The platform has no drain primitive, so after the local queue ran
        // empty the remote device still holds unplayed audio.
        tokio::time::sleep(self.t.context().config().drain_settle).await;
        log::debug!("PCM drained: {}", pcm.dbus_path);
        Ok(())
    }

    /// Confirms an empty output queue to a pending [drain](Self::drain).
    ///
    /// Called by the servicing worker while handling [Signal::PcmSync].
    pub fn mark_synced(&self) {
        self.pcm().synced.notify_one();
    }

    /// Sets the volume of one channel and propagates the change.
    pub async fn set_volume(&self, channel: usize, volume: Volume) -> Result<()> {
        {
            let pcm = self.pcm();
            let mut state = pcm.lock().await;
            if channel >= usize::from(state.channels.max(1)) {
                return Err(Error::with_message(
                    ErrorKind::InvalidArguments,
                    format!("invalid channel: {}", channel),
                ));
            }
            state.volume[channel] = volume;
        }
        self.update_volume().await
    }

    /// Propagates the current volume to the peer and to PCM clients.
    ///
    /// Peer propagation is skipped when the volume is scaled locally by a
    /// profile that would otherwise scale twice (A2DP source, HFP/HSP
    /// gateway); PCM clients are notified in every case.
    pub async fn update_volume(&self) -> Result<()> {
        self.t.pcm_update_volume(self.id).await
    }

    fn send_signal(&self, signal: Signal) -> Result<()> {
        self.t.thread(self.pcm().thread).send_signal(signal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(max_bt_volume: u16) -> TransportPcm {
        TransportPcm::new(PcmMode::Sink, ThreadSlot::Encoder, max_bt_volume, true, "/test".into())
    }

    #[test]
    fn volume_round_trip_a2dp() {
        let pcm = pcm(127);
        for volume in 0..=127 {
            assert_eq!(pcm.volume_level_to_bt(pcm.volume_bt_to_level(volume)), volume);
        }
    }

    #[test]
    fn volume_round_trip_sco() {
        let pcm = pcm(15);
        for volume in 0..=15 {
            assert_eq!(pcm.volume_level_to_bt(pcm.volume_bt_to_level(volume)), volume);
        }
    }

    #[test]
    fn volume_level_bounds() {
        let pcm = pcm(127);
        assert_eq!(pcm.volume_level_to_bt(0), 127);
        assert_eq!(pcm.volume_level_to_bt(-9600), 0);
        assert_eq!(pcm.volume_level_to_bt(9600), 127);
        assert_eq!(pcm.volume_bt_to_level(127), 0);
        assert_eq!(pcm.volume_bt_to_level(0), -9600);
    }

    #[test]
    fn muted_channel_propagates_zero() {
        let pcm = pcm(127);
        let volume = [Volume { level: 0, muted: false }, Volume { level: 0, muted: true }];
        assert_eq!(pcm.propagated_bt_volume(&volume), 0);
        let volume = [Volume { level: 0, muted: false }, Volume { level: 0, muted: false }];
        assert_eq!(pcm.propagated_bt_volume(&volume), 127);
    }

    #[test]
    fn propagated_volume_is_channel_mean() {
        let pcm = pcm(127);
        let volume = [Volume { level: -1000, muted: false }, Volume { level: -2000, muted: false }];
        assert_eq!(pcm.propagated_bt_volume(&volume), pcm.volume_level_to_bt(-1500));
    }
}
