//! Raw SCO sockets.
//!
//! SCO links are established directly against the kernel, without involving
//! the Bluetooth daemon. The voice setting of the socket selects between
//! controller-side CVSD transcoding and transparent (mSBC) frames.

use libc::{c_int, AF_BLUETOOTH, EAGAIN, EINPROGRESS, SOCK_SEQPACKET, SOL_SOCKET, SO_ERROR};
use std::io::{Error, ErrorKind, Result};
use tokio::io::unix::AsyncFd;

use crate::{
    sock::{self, OwnedFd, SysSockAddr},
    sys,
    sys::{bt_voice, sco_options, sockaddr_sco},
    Address,
};

/// Voice setting of a SCO link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum VoiceSetting {
    /// 16-bit CVSD, transcoded by the controller.
    Cvsd16Bit = sys::BT_VOICE_CVSD_16BIT,
    /// Transparent frames, for host-side codecs such as mSBC.
    Transparent = sys::BT_VOICE_TRANSPARENT,
}

/// A SCO socket address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SocketAddr {
    /// Adapter or device address.
    pub addr: Address,
}

impl SysSockAddr for SocketAddr {
    type SysSockAddr = sockaddr_sco;

    fn into_sys_sock_addr(self) -> Self::SysSockAddr {
        sockaddr_sco { sco_family: AF_BLUETOOTH as _, sco_bdaddr: self.addr.into() }
    }
}

/// Opens a SCO socket on the adapter with the given address, applies the
/// voice setting and connects it to the device.
///
/// Returns the connected socket together with its MTU.
pub(crate) async fn connect(
    adapter_addr: Address, device_addr: Address, voice: VoiceSetting,
) -> Result<(OwnedFd, u16)> {
    let fd = sock::socket(AF_BLUETOOTH, SOCK_SEQPACKET, sys::BTPROTO_SCO)?;
    sock::bind(&fd, SocketAddr { addr: adapter_addr })?;
    sock::setsockopt(&fd, libc::SOL_BLUETOOTH, sys::BT_VOICE, &bt_voice { setting: voice as u16 })?;

    let fd = AsyncFd::new(fd)?;
    match sock::connect(fd.get_ref(), SocketAddr { addr: device_addr }) {
        Ok(()) => (),
        Err(err) if err.raw_os_error() == Some(EINPROGRESS) || err.raw_os_error() == Some(EAGAIN) => {
            loop {
                let mut guard = fd.writable().await?;
                match guard.try_io(|inner| {
                    let err: c_int = sock::getsockopt(inner.get_ref(), SOL_SOCKET, SO_ERROR)?;
                    match err {
                        0 => Ok(()),
                        EINPROGRESS | EAGAIN => Err(ErrorKind::WouldBlock.into()),
                        _ => Err(Error::from_raw_os_error(err)),
                    }
                }) {
                    Ok(result) => break result,
                    Err(_would_block) => continue,
                }
            }?;
        }
        Err(err) => return Err(err),
    }

    let fd = fd.into_inner();
    let opts: sco_options = sock::getsockopt(&fd, sys::SOL_SCO, sys::SCO_OPTIONS)?;
    Ok((fd, opts.mtu))
}
