//! System native types and constants.

use libc::sa_family_t;

#[repr(packed)]
#[repr(C)]
#[derive(Clone)]
pub struct bdaddr_t {
    pub b: [u8; 6],
}

pub const BTPROTO_SCO: i32 = 2;

pub const SOL_SCO: i32 = 17;
pub const SCO_OPTIONS: i32 = 0x01;

#[repr(C)]
#[derive(Clone)]
pub struct sco_options {
    pub mtu: u16,
}

#[repr(C)]
#[derive(Clone)]
pub struct sockaddr_sco {
    pub sco_family: sa_family_t,
    pub sco_bdaddr: bdaddr_t,
}

/// Voice setting of a synchronous (SCO/eSCO) link.
pub const BT_VOICE: i32 = 11;

#[repr(C)]
#[derive(Clone)]
pub struct bt_voice {
    pub setting: u16,
}

pub const BT_VOICE_TRANSPARENT: u16 = 0x0003;
pub const BT_VOICE_CVSD_16BIT: u16 = 0x0060;
