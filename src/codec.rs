//! Audio codec identifiers, configuration blobs and PCM parameter tables.
//!
//! A2DP codec configurations travel as opaque byte blobs negotiated between
//! stream endpoints. This module knows the wire layout of the blobs for the
//! supported codecs and derives the local PCM parameters (sample format,
//! channel count, sampling rate) from them.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use strum::Display;

use crate::{pcm::PcmFormat, Error, ErrorKind, Result};

/// A2DP audio codec identifier.
///
/// The values of the standardized codecs are their A2DP media codec type;
/// vendor codecs carry crate-assigned identifiers since their wire identity
/// is the vendor/codec id pair inside the configuration blob.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum A2dpCodec {
    /// Low-complexity subband codec, mandatory for every A2DP device.
    #[strum(serialize = "SBC")]
    Sbc = 0x00,
    /// MPEG-1/2 audio (most commonly MP3).
    #[strum(serialize = "MP3")]
    Mpeg12 = 0x01,
    /// MPEG-2/4 AAC.
    #[strum(serialize = "AAC")]
    Aac = 0x02,
    /// Qualcomm aptX.
    #[strum(serialize = "aptX")]
    Aptx = 0xff01,
    /// Qualcomm aptX HD.
    #[strum(serialize = "aptX HD")]
    AptxHd = 0xff02,
    /// Sony LDAC.
    #[strum(serialize = "LDAC")]
    Ldac = 0xff03,
    /// Qualcomm FastStream, a bidirectional SBC derivative.
    #[strum(serialize = "FastStream")]
    FastStream = 0xff04,
}

/// HFP audio codec identifier, as used by the `AT+BAC` negotiation.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum HfpCodec {
    /// Codec not negotiated yet.
    #[strum(serialize = "N/A")]
    Undefined = 0x00,
    /// Continuously variable slope delta modulation.
    #[strum(serialize = "CVSD")]
    Cvsd = 0x01,
    /// Modified SBC over transparent eSCO.
    #[strum(serialize = "mSBC")]
    Msbc = 0x02,
}

pub const SBC_SAMPLING_FREQ_16000: u8 = 1 << 3;
pub const SBC_SAMPLING_FREQ_32000: u8 = 1 << 2;
pub const SBC_SAMPLING_FREQ_44100: u8 = 1 << 1;
pub const SBC_SAMPLING_FREQ_48000: u8 = 1;

pub const SBC_CHANNEL_MODE_MONO: u8 = 1 << 3;
pub const SBC_CHANNEL_MODE_DUAL_CHANNEL: u8 = 1 << 2;
pub const SBC_CHANNEL_MODE_STEREO: u8 = 1 << 1;
pub const SBC_CHANNEL_MODE_JOINT_STEREO: u8 = 1;

pub const SBC_BLOCK_LENGTH_4: u8 = 1 << 3;
pub const SBC_BLOCK_LENGTH_8: u8 = 1 << 2;
pub const SBC_BLOCK_LENGTH_12: u8 = 1 << 1;
pub const SBC_BLOCK_LENGTH_16: u8 = 1;

pub const SBC_SUBBANDS_4: u8 = 1 << 1;
pub const SBC_SUBBANDS_8: u8 = 1;

pub const SBC_ALLOCATION_SNR: u8 = 1 << 1;
pub const SBC_ALLOCATION_LOUDNESS: u8 = 1;

pub const SBC_MIN_BITPOOL: u8 = 2;
pub const SBC_MAX_BITPOOL: u8 = 250;

/// SBC codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SbcConfig {
    pub frequency: u8,
    pub channel_mode: u8,
    pub block_length: u8,
    pub subbands: u8,
    pub allocation_method: u8,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
}

impl SbcConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let blob: &[u8; 4] = check_len(blob)?;
        Ok(Self {
            frequency: blob[0] >> 4,
            channel_mode: blob[0] & 0x0f,
            block_length: blob[1] >> 4,
            subbands: (blob[1] >> 2) & 0x03,
            allocation_method: blob[1] & 0x03,
            min_bitpool: blob[2],
            max_bitpool: blob[3],
        })
    }

    pub fn bytes(&self) -> [u8; 4] {
        [
            self.frequency << 4 | self.channel_mode,
            self.block_length << 4 | self.subbands << 2 | self.allocation_method,
            self.min_bitpool,
            self.max_bitpool,
        ]
    }
}

pub const MPEG_LAYER_MP1: u8 = 1 << 2;
pub const MPEG_LAYER_MP2: u8 = 1 << 1;
pub const MPEG_LAYER_MP3: u8 = 1;

pub const MPEG_CHANNEL_MODE_MONO: u8 = 1 << 3;
pub const MPEG_CHANNEL_MODE_DUAL_CHANNEL: u8 = 1 << 2;
pub const MPEG_CHANNEL_MODE_STEREO: u8 = 1 << 1;
pub const MPEG_CHANNEL_MODE_JOINT_STEREO: u8 = 1;

pub const MPEG_SAMPLING_FREQ_16000: u8 = 1 << 5;
pub const MPEG_SAMPLING_FREQ_22050: u8 = 1 << 4;
pub const MPEG_SAMPLING_FREQ_24000: u8 = 1 << 3;
pub const MPEG_SAMPLING_FREQ_32000: u8 = 1 << 2;
pub const MPEG_SAMPLING_FREQ_44100: u8 = 1 << 1;
pub const MPEG_SAMPLING_FREQ_48000: u8 = 1;

/// MPEG-1/2 audio codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MpegConfig {
    pub layer: u8,
    pub crc: bool,
    pub channel_mode: u8,
    pub frequency: u8,
    pub vbr: bool,
    pub bitrate: u16,
}

impl MpegConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let blob: &[u8; 4] = check_len(blob)?;
        Ok(Self {
            layer: blob[0] >> 5,
            crc: blob[0] & 0x10 != 0,
            channel_mode: blob[0] & 0x0f,
            frequency: blob[1] & 0x3f,
            vbr: blob[2] & 0x80 != 0,
            bitrate: u16::from(blob[2] & 0x7f) << 8 | u16::from(blob[3]),
        })
    }

    pub fn bytes(&self) -> [u8; 4] {
        [
            self.layer << 5 | if self.crc { 0x10 } else { 0 } | self.channel_mode,
            self.frequency & 0x3f,
            if self.vbr { 0x80 } else { 0 } | (self.bitrate >> 8) as u8 & 0x7f,
            self.bitrate as u8,
        ]
    }
}

pub const AAC_OBJECT_TYPE_MPEG2_AAC_LC: u8 = 0x80;
pub const AAC_OBJECT_TYPE_MPEG4_AAC_LC: u8 = 0x40;

pub const AAC_CHANNELS_1: u8 = 1 << 1;
pub const AAC_CHANNELS_2: u8 = 1;

pub const AAC_SAMPLING_FREQ_8000: u16 = 1 << 11;
pub const AAC_SAMPLING_FREQ_11025: u16 = 1 << 10;
pub const AAC_SAMPLING_FREQ_12000: u16 = 1 << 9;
pub const AAC_SAMPLING_FREQ_16000: u16 = 1 << 8;
pub const AAC_SAMPLING_FREQ_22050: u16 = 1 << 7;
pub const AAC_SAMPLING_FREQ_24000: u16 = 1 << 6;
pub const AAC_SAMPLING_FREQ_32000: u16 = 1 << 5;
pub const AAC_SAMPLING_FREQ_44100: u16 = 1 << 4;
pub const AAC_SAMPLING_FREQ_48000: u16 = 1 << 3;
pub const AAC_SAMPLING_FREQ_64000: u16 = 1 << 2;
pub const AAC_SAMPLING_FREQ_88200: u16 = 1 << 1;
pub const AAC_SAMPLING_FREQ_96000: u16 = 1;

/// MPEG-2/4 AAC codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AacConfig {
    pub object_type: u8,
    /// 12-bit sampling frequency mask.
    pub frequency: u16,
    pub channels: u8,
    pub vbr: bool,
    pub bitrate: u32,
}

impl AacConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let blob: &[u8; 6] = check_len(blob)?;
        Ok(Self {
            object_type: blob[0],
            frequency: u16::from(blob[1]) << 4 | u16::from(blob[2] >> 4),
            channels: (blob[2] >> 2) & 0x03,
            vbr: blob[3] & 0x80 != 0,
            bitrate: u32::from(blob[3] & 0x7f) << 16 | u32::from(blob[4]) << 8 | u32::from(blob[5]),
        })
    }

    pub fn bytes(&self) -> [u8; 6] {
        [
            self.object_type,
            (self.frequency >> 4) as u8,
            (self.frequency as u8 & 0x0f) << 4 | self.channels << 2,
            if self.vbr { 0x80 } else { 0 } | (self.bitrate >> 16) as u8 & 0x7f,
            (self.bitrate >> 8) as u8,
            self.bitrate as u8,
        ]
    }
}

pub const APTX_VENDOR_ID: u32 = 0x0000004f;
pub const APTX_CODEC_ID: u16 = 0x0001;
pub const APTX_HD_VENDOR_ID: u32 = 0x000000d7;
pub const APTX_HD_CODEC_ID: u16 = 0x0024;
pub const LDAC_VENDOR_ID: u32 = 0x0000012d;
pub const LDAC_CODEC_ID: u16 = 0x00aa;
pub const FASTSTREAM_VENDOR_ID: u32 = 0x0000000a;
pub const FASTSTREAM_CODEC_ID: u16 = 0x0001;

pub const APTX_CHANNEL_MODE_MONO: u8 = 1;
pub const APTX_CHANNEL_MODE_STEREO: u8 = 1 << 1;

pub const APTX_SAMPLING_FREQ_16000: u8 = 1 << 3;
pub const APTX_SAMPLING_FREQ_32000: u8 = 1 << 2;
pub const APTX_SAMPLING_FREQ_44100: u8 = 1 << 1;
pub const APTX_SAMPLING_FREQ_48000: u8 = 1;

/// aptX and aptX HD codec configuration.
///
/// aptX HD shares the aptX layout followed by four reserved octets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AptxConfig {
    pub frequency: u8,
    pub channel_mode: u8,
}

impl AptxConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let payload = check_vendor(blob, APTX_VENDOR_ID, APTX_CODEC_ID, 1)?;
        Ok(Self { frequency: payload[0] >> 4, channel_mode: payload[0] & 0x0f })
    }

    pub fn parse_hd(blob: &[u8]) -> Result<Self> {
        let payload = check_vendor(blob, APTX_HD_VENDOR_ID, APTX_HD_CODEC_ID, 5)?;
        Ok(Self { frequency: payload[0] >> 4, channel_mode: payload[0] & 0x0f })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut blob = vendor_header(APTX_VENDOR_ID, APTX_CODEC_ID);
        blob.push(self.frequency << 4 | self.channel_mode);
        blob
    }

    pub fn bytes_hd(&self) -> Vec<u8> {
        let mut blob = vendor_header(APTX_HD_VENDOR_ID, APTX_HD_CODEC_ID);
        blob.push(self.frequency << 4 | self.channel_mode);
        blob.extend_from_slice(&[0; 4]);
        blob
    }
}

pub const LDAC_SAMPLING_FREQ_44100: u8 = 1 << 5;
pub const LDAC_SAMPLING_FREQ_48000: u8 = 1 << 4;
pub const LDAC_SAMPLING_FREQ_88200: u8 = 1 << 3;
pub const LDAC_SAMPLING_FREQ_96000: u8 = 1 << 2;
pub const LDAC_SAMPLING_FREQ_176400: u8 = 1 << 1;
pub const LDAC_SAMPLING_FREQ_192000: u8 = 1;

pub const LDAC_CHANNEL_MODE_MONO: u8 = 1 << 2;
pub const LDAC_CHANNEL_MODE_DUAL_CHANNEL: u8 = 1 << 1;
pub const LDAC_CHANNEL_MODE_STEREO: u8 = 1;

/// LDAC codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LdacConfig {
    pub frequency: u8,
    pub channel_mode: u8,
}

impl LdacConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let payload = check_vendor(blob, LDAC_VENDOR_ID, LDAC_CODEC_ID, 2)?;
        Ok(Self { frequency: payload[0] & 0x3f, channel_mode: payload[1] & 0x07 })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut blob = vendor_header(LDAC_VENDOR_ID, LDAC_CODEC_ID);
        blob.extend_from_slice(&[self.frequency, self.channel_mode]);
        blob
    }
}

pub const FASTSTREAM_DIRECTION_MUSIC: u8 = 1;
pub const FASTSTREAM_DIRECTION_VOICE: u8 = 1 << 1;

pub const FASTSTREAM_SAMPLING_FREQ_MUSIC_48000: u8 = 1;
pub const FASTSTREAM_SAMPLING_FREQ_MUSIC_44100: u8 = 1 << 1;
pub const FASTSTREAM_SAMPLING_FREQ_VOICE_16000: u8 = 1 << 1;

/// FastStream codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FastStreamConfig {
    pub direction: u8,
    pub frequency_music: u8,
    pub frequency_voice: u8,
}

impl FastStreamConfig {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let payload = check_vendor(blob, FASTSTREAM_VENDOR_ID, FASTSTREAM_CODEC_ID, 2)?;
        Ok(Self {
            direction: payload[0] & 0x03,
            frequency_music: payload[1] >> 4,
            frequency_voice: payload[1] & 0x0f,
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut blob = vendor_header(FASTSTREAM_VENDOR_ID, FASTSTREAM_CODEC_ID);
        blob.extend_from_slice(&[self.direction, self.frequency_music << 4 | self.frequency_voice]);
        blob
    }
}

fn check_len<const N: usize>(blob: &[u8]) -> Result<&[u8; N]> {
    blob.try_into().map_err(|_| {
        Error::with_message(
            ErrorKind::InvalidArguments,
            format!("invalid codec configuration size: {}", blob.len()),
        )
    })
}

fn vendor_header(vendor_id: u32, codec_id: u16) -> Vec<u8> {
    let mut blob = vendor_id.to_le_bytes().to_vec();
    blob.extend_from_slice(&codec_id.to_le_bytes());
    blob
}

fn check_vendor(blob: &[u8], vendor_id: u32, codec_id: u16, payload_len: usize) -> Result<&[u8]> {
    if blob.len() != 6 + payload_len {
        return Err(Error::with_message(
            ErrorKind::InvalidArguments,
            format!("invalid codec configuration size: {}", blob.len()),
        ));
    }
    let vendor = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    let codec = u16::from_le_bytes([blob[4], blob[5]]);
    if (vendor, codec) != (vendor_id, codec_id) {
        return Err(Error::with_message(
            ErrorKind::InvalidArguments,
            format!("unexpected vendor codec: {:#010x}:{:#06x}", vendor, codec),
        ));
    }
    Ok(&blob[6..])
}

/// PCM stream parameters derived from a codec configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PcmParams {
    pub format: PcmFormat,
    pub channels: u8,
    pub sampling: u32,
}

/// PCM parameters of both directions of an A2DP transport.
///
/// The back-channel is populated for dual-direction codecs only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct A2dpPcmParams {
    pub format: PcmFormat,
    pub main: Option<(u8, u32)>,
    pub backchannel: Option<(u8, u32)>,
}

fn channels(table: &[(u8, u8)], mode: u8) -> Result<u8> {
    table.iter().find(|(bit, _)| *bit == mode).map(|(_, ch)| *ch).ok_or_else(|| {
        Error::with_message(ErrorKind::InvalidArguments, format!("invalid channel mode: {:#04x}", mode))
    })
}

fn sampling<T: Copy + Eq + Into<u32>>(table: &[(T, u32)], freq: T) -> Result<u32> {
    table.iter().find(|(bit, _)| *bit == freq).map(|(_, rate)| *rate).ok_or_else(|| {
        let freq: u32 = freq.into();
        Error::with_message(ErrorKind::InvalidArguments, format!("invalid sampling frequency: {:#06x}", freq))
    })
}

/// Derives the PCM parameters of an A2DP transport from its codec identifier
/// and the negotiated configuration blob.
///
/// An unknown codec identifier is a programming error, because transports
/// can only be created or reconfigured with codecs this module knows about.
pub(crate) fn a2dp_pcm_params(codec_id: u16, configuration: &[u8]) -> Result<A2dpPcmParams> {
    let codec = match A2dpCodec::from_u16(codec_id) {
        Some(codec) => codec,
        None => panic!("unsupported A2DP codec: {:#06x}", codec_id),
    };

    let format = match codec {
        A2dpCodec::AptxHd => PcmFormat::S24Le,
        // The LDAC library internally encodes from 31-bit integers or
        // floats, so the best PCM sample choice is signed 32-bit.
        A2dpCodec::Ldac => PcmFormat::S32Le,
        _ => PcmFormat::S16Le,
    };

    let mut main = None;
    let mut backchannel = None;

    match codec {
        A2dpCodec::Sbc => {
            let config = SbcConfig::parse(configuration)?;
            main = Some((
                channels(
                    &[
                        (SBC_CHANNEL_MODE_MONO, 1),
                        (SBC_CHANNEL_MODE_DUAL_CHANNEL, 2),
                        (SBC_CHANNEL_MODE_STEREO, 2),
                        (SBC_CHANNEL_MODE_JOINT_STEREO, 2),
                    ],
                    config.channel_mode,
                )?,
                sampling(
                    &[
                        (SBC_SAMPLING_FREQ_16000, 16000),
                        (SBC_SAMPLING_FREQ_32000, 32000),
                        (SBC_SAMPLING_FREQ_44100, 44100),
                        (SBC_SAMPLING_FREQ_48000, 48000),
                    ],
                    config.frequency,
                )?,
            ));
        }
        A2dpCodec::Mpeg12 => {
            let config = MpegConfig::parse(configuration)?;
            main = Some((
                channels(
                    &[
                        (MPEG_CHANNEL_MODE_MONO, 1),
                        (MPEG_CHANNEL_MODE_DUAL_CHANNEL, 2),
                        (MPEG_CHANNEL_MODE_STEREO, 2),
                        (MPEG_CHANNEL_MODE_JOINT_STEREO, 2),
                    ],
                    config.channel_mode,
                )?,
                sampling(
                    &[
                        (MPEG_SAMPLING_FREQ_16000, 16000),
                        (MPEG_SAMPLING_FREQ_22050, 22050),
                        (MPEG_SAMPLING_FREQ_24000, 24000),
                        (MPEG_SAMPLING_FREQ_32000, 32000),
                        (MPEG_SAMPLING_FREQ_44100, 44100),
                        (MPEG_SAMPLING_FREQ_48000, 48000),
                    ],
                    config.frequency,
                )?,
            ));
        }
        A2dpCodec::Aac => {
            let config = AacConfig::parse(configuration)?;
            main = Some((
                channels(&[(AAC_CHANNELS_1, 1), (AAC_CHANNELS_2, 2)], config.channels)?,
                sampling(
                    &[
                        (AAC_SAMPLING_FREQ_8000, 8000),
                        (AAC_SAMPLING_FREQ_11025, 11025),
                        (AAC_SAMPLING_FREQ_12000, 12000),
                        (AAC_SAMPLING_FREQ_16000, 16000),
                        (AAC_SAMPLING_FREQ_22050, 22050),
                        (AAC_SAMPLING_FREQ_24000, 24000),
                        (AAC_SAMPLING_FREQ_32000, 32000),
                        (AAC_SAMPLING_FREQ_44100, 44100),
                        (AAC_SAMPLING_FREQ_48000, 48000),
                        (AAC_SAMPLING_FREQ_64000, 64000),
                        (AAC_SAMPLING_FREQ_88200, 88200),
                        (AAC_SAMPLING_FREQ_96000, 96000),
                    ],
                    config.frequency,
                )?,
            ));
        }
        A2dpCodec::Aptx | A2dpCodec::AptxHd => {
            let config = match codec {
                A2dpCodec::Aptx => AptxConfig::parse(configuration)?,
                _ => AptxConfig::parse_hd(configuration)?,
            };
            main = Some((
                channels(
                    &[(APTX_CHANNEL_MODE_MONO, 1), (APTX_CHANNEL_MODE_STEREO, 2)],
                    config.channel_mode,
                )?,
                sampling(
                    &[
                        (APTX_SAMPLING_FREQ_16000, 16000),
                        (APTX_SAMPLING_FREQ_32000, 32000),
                        (APTX_SAMPLING_FREQ_44100, 44100),
                        (APTX_SAMPLING_FREQ_48000, 48000),
                    ],
                    config.frequency,
                )?,
            ));
        }
        A2dpCodec::Ldac => {
            let config = LdacConfig::parse(configuration)?;
            main = Some((
                channels(
                    &[
                        (LDAC_CHANNEL_MODE_MONO, 1),
                        (LDAC_CHANNEL_MODE_DUAL_CHANNEL, 2),
                        (LDAC_CHANNEL_MODE_STEREO, 2),
                    ],
                    config.channel_mode,
                )?,
                sampling(
                    &[
                        (LDAC_SAMPLING_FREQ_44100, 44100),
                        (LDAC_SAMPLING_FREQ_48000, 48000),
                        (LDAC_SAMPLING_FREQ_88200, 88200),
                        (LDAC_SAMPLING_FREQ_96000, 96000),
                        (LDAC_SAMPLING_FREQ_176400, 176400),
                        (LDAC_SAMPLING_FREQ_192000, 192000),
                    ],
                    config.frequency,
                )?,
            ));
        }
        A2dpCodec::FastStream => {
            let config = FastStreamConfig::parse(configuration)?;
            if config.direction & FASTSTREAM_DIRECTION_MUSIC != 0 {
                main = Some((
                    2,
                    sampling(
                        &[
                            (FASTSTREAM_SAMPLING_FREQ_MUSIC_44100, 44100),
                            (FASTSTREAM_SAMPLING_FREQ_MUSIC_48000, 48000),
                        ],
                        config.frequency_music,
                    )?,
                ));
            }
            if config.direction & FASTSTREAM_DIRECTION_VOICE != 0 {
                backchannel = Some((
                    1,
                    sampling(
                        &[(FASTSTREAM_SAMPLING_FREQ_VOICE_16000, 16000)],
                        config.frequency_voice,
                    )?,
                ));
            }
        }
    }

    Ok(A2dpPcmParams { format, main, backchannel })
}

/// Derives the PCM parameters of a SCO transport from its codec identifier.
///
/// SCO audio is always 16-bit mono; only the sampling rate depends on the
/// codec. A not-yet-negotiated codec maps to a zero rate.
pub(crate) fn sco_pcm_params(codec_id: u16) -> PcmParams {
    let sampling = match HfpCodec::from_u16(codec_id) {
        Some(HfpCodec::Cvsd) => 8000,
        Some(HfpCodec::Msbc) => 16000,
        Some(HfpCodec::Undefined) => 0,
        None => {
            log::debug!("Unsupported SCO codec: {:#06x}", codec_id);
            0
        }
    };
    PcmParams { format: PcmFormat::S16Le, channels: 1, sampling }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sbc_44100_stereo() -> SbcConfig {
        SbcConfig {
            frequency: SBC_SAMPLING_FREQ_44100,
            channel_mode: SBC_CHANNEL_MODE_STEREO,
            block_length: SBC_BLOCK_LENGTH_16,
            subbands: SBC_SUBBANDS_8,
            allocation_method: SBC_ALLOCATION_LOUDNESS,
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: 53,
        }
    }

    #[test]
    fn sbc_round_trip() {
        let config = sbc_44100_stereo();
        assert_eq!(SbcConfig::parse(&config.bytes()).unwrap(), config);
    }

    #[test]
    fn sbc_params() {
        let params = a2dp_pcm_params(A2dpCodec::Sbc as u16, &sbc_44100_stereo().bytes()).unwrap();
        assert_eq!(params.format, PcmFormat::S16Le);
        assert_eq!(params.main, Some((2, 44100)));
        assert_eq!(params.backchannel, None);
    }

    #[test]
    fn sbc_mono_16000() {
        let config = SbcConfig {
            frequency: SBC_SAMPLING_FREQ_16000,
            channel_mode: SBC_CHANNEL_MODE_MONO,
            ..sbc_44100_stereo()
        };
        let params = a2dp_pcm_params(A2dpCodec::Sbc as u16, &config.bytes()).unwrap();
        assert_eq!(params.main, Some((1, 16000)));
    }

    #[test]
    fn sbc_invalid_size() {
        let err = a2dp_pcm_params(A2dpCodec::Sbc as u16, &[0; 3]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
    }

    #[test]
    fn mpeg_params() {
        let config = MpegConfig {
            layer: MPEG_LAYER_MP3,
            crc: false,
            channel_mode: MPEG_CHANNEL_MODE_JOINT_STEREO,
            frequency: MPEG_SAMPLING_FREQ_32000,
            vbr: true,
            bitrate: 0x7fff,
        };
        assert_eq!(MpegConfig::parse(&config.bytes()).unwrap(), config);
        let params = a2dp_pcm_params(A2dpCodec::Mpeg12 as u16, &config.bytes()).unwrap();
        assert_eq!(params.main, Some((2, 32000)));
    }

    #[test]
    fn aac_params() {
        let config = AacConfig {
            object_type: AAC_OBJECT_TYPE_MPEG2_AAC_LC,
            frequency: AAC_SAMPLING_FREQ_44100,
            channels: AAC_CHANNELS_2,
            vbr: true,
            bitrate: 320000,
        };
        assert_eq!(AacConfig::parse(&config.bytes()).unwrap(), config);
        let params = a2dp_pcm_params(A2dpCodec::Aac as u16, &config.bytes()).unwrap();
        assert_eq!(params.format, PcmFormat::S16Le);
        assert_eq!(params.main, Some((2, 44100)));
    }

    #[test]
    fn aptx_hd_is_24_bit() {
        let config =
            AptxConfig { frequency: APTX_SAMPLING_FREQ_48000, channel_mode: APTX_CHANNEL_MODE_STEREO };
        let params = a2dp_pcm_params(A2dpCodec::AptxHd as u16, &config.bytes_hd()).unwrap();
        assert_eq!(params.format, PcmFormat::S24Le);
        assert_eq!(params.main, Some((2, 48000)));
    }

    #[test]
    fn ldac_is_32_bit() {
        let config =
            LdacConfig { frequency: LDAC_SAMPLING_FREQ_96000, channel_mode: LDAC_CHANNEL_MODE_STEREO };
        let params = a2dp_pcm_params(A2dpCodec::Ldac as u16, &config.bytes()).unwrap();
        assert_eq!(params.format, PcmFormat::S32Le);
        assert_eq!(params.main, Some((2, 96000)));
    }

    #[test]
    fn faststream_directions() {
        let config = FastStreamConfig {
            direction: FASTSTREAM_DIRECTION_MUSIC | FASTSTREAM_DIRECTION_VOICE,
            frequency_music: FASTSTREAM_SAMPLING_FREQ_MUSIC_44100,
            frequency_voice: FASTSTREAM_SAMPLING_FREQ_VOICE_16000,
        };
        let params = a2dp_pcm_params(A2dpCodec::FastStream as u16, &config.bytes()).unwrap();
        assert_eq!(params.main, Some((2, 44100)));
        assert_eq!(params.backchannel, Some((1, 16000)));

        let music_only = FastStreamConfig { direction: FASTSTREAM_DIRECTION_MUSIC, ..config };
        let params = a2dp_pcm_params(A2dpCodec::FastStream as u16, &music_only.bytes()).unwrap();
        assert_eq!(params.main, Some((2, 44100)));
        assert_eq!(params.backchannel, None);
    }

    #[test]
    fn vendor_mismatch() {
        let mut blob = LdacConfig {
            frequency: LDAC_SAMPLING_FREQ_44100,
            channel_mode: LDAC_CHANNEL_MODE_STEREO,
        }
        .bytes();
        blob[0] ^= 0xff;
        assert_eq!(LdacConfig::parse(&blob).unwrap_err().kind, ErrorKind::InvalidArguments);
    }

    #[test]
    #[should_panic(expected = "unsupported A2DP codec")]
    fn unknown_codec_panics() {
        let _ = a2dp_pcm_params(0x1234, &[]);
    }

    #[test]
    fn sco_params() {
        let cvsd = sco_pcm_params(HfpCodec::Cvsd as u16);
        assert_eq!((cvsd.format, cvsd.channels, cvsd.sampling), (PcmFormat::S16Le, 1, 8000));
        let msbc = sco_pcm_params(HfpCodec::Msbc as u16);
        assert_eq!((msbc.format, msbc.channels, msbc.sampling), (PcmFormat::S16Le, 1, 16000));
        let undefined = sco_pcm_params(HfpCodec::Undefined as u16);
        assert_eq!(undefined.sampling, 0);
    }
}
