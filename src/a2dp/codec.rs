//! Audio Codec Support for A2DP
//!
//! Codec capability blobs as exchanged over AVDTP, parsed per codec family,
//! plus the intersection logic used to pick one concrete configuration from
//! a local and a peer capability set.
//!
//! ## Blob layout
//!
//! ```text
//! [0] LOSC  [1] media type << 4  [2] codec type  [3..] codec specific
//! ```
//!
//! Vendor codecs (type `0xFF`) carry a little-endian vendor id and codec id
//! before their own fields.

use super::A2dpError;
use crate::constants::CODEC_INFO_LEN;

/// Media type nibble for audio
const MEDIA_TYPE_AUDIO: u8 = 0x00;

/// Supported audio codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CodecType {
    /// SBC (Sub-Band Coding) - Mandatory codec for A2DP
    Sbc = 0x00,
    /// MPEG-1,2 Audio (MP3)
    Mpeg12Audio = 0x01,
    /// MPEG-2,4 AAC
    Mpeg24Aac = 0x02,
    /// Vendor-specific codec
    VendorSpecific = 0xFF,
}

impl CodecType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Sbc),
            0x01 => Some(Self::Mpeg12Audio),
            0x02 => Some(Self::Mpeg24Aac),
            0xFF => Some(Self::VendorSpecific),
            _ => None,
        }
    }
}

/// Codec identity used for local preference ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecIndex {
    /// SBC
    Sbc,
    /// MPEG-2,4 AAC
    Aac,
    /// Qualcomm aptX
    Aptx,
    /// Qualcomm aptX HD
    AptxHd,
    /// Sony LDAC
    Ldac,
}

impl CodecIndex {
    /// Vendor id and vendor codec id for vendor codecs
    #[must_use]
    pub const fn vendor_ids(self) -> Option<(u32, u16)> {
        match self {
            Self::Aptx => Some((0x0000_004F, 0x0001)),
            Self::AptxHd => Some((0x0000_00D7, 0x0024)),
            Self::Ldac => Some((0x0000_012D, 0x00AA)),
            Self::Sbc | Self::Aac => None,
        }
    }

    /// AVDTP codec type carrying this codec
    #[must_use]
    pub const fn codec_type(self) -> CodecType {
        match self {
            Self::Sbc => CodecType::Sbc,
            Self::Aac => CodecType::Mpeg24Aac,
            Self::Aptx | Self::AptxHd | Self::Ldac => CodecType::VendorSpecific,
        }
    }

    /// Highest-quality-first ordering used when no preference is configured
    #[must_use]
    pub const fn default_priorities() -> [CodecIndex; 5] {
        [Self::Ldac, Self::AptxHd, Self::Aptx, Self::Aac, Self::Sbc]
    }
}

/// Raw codec information element, at most `CODEC_INFO_LEN` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    len: u8,
    data: [u8; CODEC_INFO_LEN],
}

impl CodecInfo {
    /// Copy a codec information element
    ///
    /// # Errors
    /// Returns `A2dpError::InvalidCodecInfo` if the LOSC byte does not match
    /// the slice length or the element does not fit
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, A2dpError> {
        if bytes.len() < 3 || bytes.len() > CODEC_INFO_LEN {
            return Err(A2dpError::InvalidCodecInfo);
        }
        if usize::from(bytes[0]) + 1 != bytes.len() {
            return Err(A2dpError::InvalidCodecInfo);
        }
        let mut data = [0u8; CODEC_INFO_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len() as u8,
            data,
        })
    }

    /// Element bytes including the LOSC byte
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Codec type byte
    #[must_use]
    pub fn codec_type(&self) -> Option<CodecType> {
        CodecType::from_u8(self.data[2])
    }

    /// Vendor id and codec id of a vendor element
    #[must_use]
    pub fn vendor_ids(&self) -> Option<(u32, u16)> {
        if self.codec_type() != Some(CodecType::VendorSpecific) || self.len < 9 {
            return None;
        }
        let d = &self.data;
        let vendor = u32::from_le_bytes([d[3], d[4], d[5], d[6]]);
        let codec = u16::from_le_bytes([d[7], d[8]]);
        Some((vendor, codec))
    }

    /// Codec identity of this element, if it is one the core knows
    #[must_use]
    pub fn codec_index(&self) -> Option<CodecIndex> {
        if self.data[1] >> 4 != MEDIA_TYPE_AUDIO {
            return None;
        }
        match self.codec_type()? {
            CodecType::Sbc => Some(CodecIndex::Sbc),
            CodecType::Mpeg24Aac => Some(CodecIndex::Aac),
            CodecType::VendorSpecific => {
                let ids = self.vendor_ids()?;
                [CodecIndex::Aptx, CodecIndex::AptxHd, CodecIndex::Ldac]
                    .into_iter()
                    .find(|index| index.vendor_ids() == Some(ids))
            }
            CodecType::Mpeg12Audio => None,
        }
    }

    /// True if the element parses as a known codec
    #[must_use]
    pub fn is_valid(&self) -> bool {
        CodecCapabilities::parse(self).is_ok()
    }
}

/// Codec capabilities for different codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecCapabilities {
    /// SBC codec capabilities
    Sbc(SbcCapabilities),
    /// AAC codec capabilities
    Aac(AacCapabilities),
    /// aptX or aptX HD capabilities
    Aptx(AptxCapabilities),
    /// LDAC capabilities
    Ldac(LdacCapabilities),
}

/// SBC (Sub-Band Coding) Codec Capabilities
///
/// SBC is the mandatory codec for A2DP and provides good audio quality
/// with reasonable computational requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcCapabilities {
    /// Sampling frequency support (bitfield)
    pub sampling_frequencies: SbcSamplingFrequency,
    /// Channel mode support (bitfield)
    pub channel_modes: SbcChannelMode,
    /// Block length support (bitfield)
    pub block_lengths: SbcBlockLength,
    /// Subbands support (bitfield)
    pub subbands: SbcSubbands,
    /// Allocation method support (bitfield)
    pub allocation_methods: SbcAllocationMethod,
    /// Minimum bitpool value (2-250)
    pub min_bitpool: u8,
    /// Maximum bitpool value (2-250)
    pub max_bitpool: u8,
}

/// SBC Sampling Frequency Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcSamplingFrequency(pub u8);

impl SbcSamplingFrequency {
    /// 16000 Hz
    pub const HZ_16000: u8 = 0x08;
    /// 32000 Hz
    pub const HZ_32000: u8 = 0x04;
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x02;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [Self::HZ_44100, Self::HZ_48000, Self::HZ_32000, Self::HZ_16000];

    /// Create with all frequencies supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::HZ_16000 | Self::HZ_32000 | Self::HZ_44100 | Self::HZ_48000)
    }

    /// Check if frequency is supported
    #[must_use]
    pub const fn supports(&self, freq: u8) -> bool {
        (self.0 & freq) != 0
    }
}

/// SBC Channel Mode Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcChannelMode(pub u8);

impl SbcChannelMode {
    /// Mono
    pub const MONO: u8 = 0x08;
    /// Dual Channel
    pub const DUAL_CHANNEL: u8 = 0x04;
    /// Stereo
    pub const STEREO: u8 = 0x02;
    /// Joint Stereo
    pub const JOINT_STEREO: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [Self::JOINT_STEREO, Self::STEREO, Self::DUAL_CHANNEL, Self::MONO];

    /// Create with all modes supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::MONO | Self::DUAL_CHANNEL | Self::STEREO | Self::JOINT_STEREO)
    }

    /// Check if mode is supported
    #[must_use]
    pub const fn supports(&self, mode: u8) -> bool {
        (self.0 & mode) != 0
    }
}

/// SBC Block Length Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcBlockLength(pub u8);

impl SbcBlockLength {
    /// 4 blocks
    pub const BLOCKS_4: u8 = 0x08;
    /// 8 blocks
    pub const BLOCKS_8: u8 = 0x04;
    /// 12 blocks
    pub const BLOCKS_12: u8 = 0x02;
    /// 16 blocks
    pub const BLOCKS_16: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [Self::BLOCKS_16, Self::BLOCKS_12, Self::BLOCKS_8, Self::BLOCKS_4];

    /// Create with all block lengths supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::BLOCKS_4 | Self::BLOCKS_8 | Self::BLOCKS_12 | Self::BLOCKS_16)
    }
}

/// SBC Subbands Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcSubbands(pub u8);

impl SbcSubbands {
    /// 4 subbands
    pub const SUBBANDS_4: u8 = 0x02;
    /// 8 subbands
    pub const SUBBANDS_8: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::SUBBANDS_8, Self::SUBBANDS_4];

    /// Create with all subbands supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SUBBANDS_4 | Self::SUBBANDS_8)
    }
}

/// SBC Allocation Method Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcAllocationMethod(pub u8);

impl SbcAllocationMethod {
    /// SNR allocation method
    pub const SNR: u8 = 0x02;
    /// Loudness allocation method
    pub const LOUDNESS: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::LOUDNESS, Self::SNR];

    /// Create with all allocation methods supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SNR | Self::LOUDNESS)
    }
}

/// AAC Codec Capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacCapabilities {
    /// Object type support (bitfield)
    pub object_types: u8,
    /// Sampling frequency support, 12-bit field
    pub sampling_frequencies: u16,
    /// Channel count support (bitfield)
    pub channels: u8,
    /// Variable bit rate support
    pub vbr: bool,
    /// Maximum bit rate in bits per second (23 bits)
    pub bitrate: u32,
}

impl AacCapabilities {
    /// MPEG-2 AAC LC
    pub const OBJECT_MPEG2_LC: u8 = 0x80;
    /// MPEG-4 AAC LC
    pub const OBJECT_MPEG4_LC: u8 = 0x40;
    /// MPEG-4 AAC LTP
    pub const OBJECT_MPEG4_LTP: u8 = 0x20;
    /// MPEG-4 AAC scalable
    pub const OBJECT_MPEG4_SCALABLE: u8 = 0x10;
    /// 44100 Hz
    pub const HZ_44100: u16 = 0x010;
    /// 48000 Hz
    pub const HZ_48000: u16 = 0x008;
    /// 88200 Hz
    pub const HZ_88200: u16 = 0x002;
    /// 96000 Hz
    pub const HZ_96000: u16 = 0x001;
    /// One channel
    pub const CHANNELS_1: u8 = 0x08;
    /// Two channels
    pub const CHANNELS_2: u8 = 0x04;

    const OBJECT_PREFERENCE: [u8; 4] = [
        Self::OBJECT_MPEG2_LC,
        Self::OBJECT_MPEG4_LC,
        Self::OBJECT_MPEG4_LTP,
        Self::OBJECT_MPEG4_SCALABLE,
    ];
    const CHANNEL_PREFERENCE: [u8; 2] = [Self::CHANNELS_2, Self::CHANNELS_1];

    /// 44.1k, then 48k, then the remaining bits from high to low
    fn pick_frequency(common: u16) -> Option<u16> {
        if common & Self::HZ_44100 != 0 {
            return Some(Self::HZ_44100);
        }
        if common & Self::HZ_48000 != 0 {
            return Some(Self::HZ_48000);
        }
        (0..12).rev().map(|bit| 1u16 << bit).find(|bit| common & bit != 0)
    }
}

impl Default for AacCapabilities {
    fn default() -> Self {
        Self {
            object_types: Self::OBJECT_MPEG2_LC,
            sampling_frequencies: Self::HZ_44100 | Self::HZ_48000,
            channels: Self::CHANNELS_1 | Self::CHANNELS_2,
            vbr: true,
            bitrate: 320_000,
        }
    }
}

/// aptX / aptX HD Codec Capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AptxCapabilities {
    /// aptX HD variant
    pub hd: bool,
    /// Sampling frequency support (high nibble bitfield)
    pub sampling_frequencies: u8,
    /// Channel mode support (low nibble bitfield)
    pub channel_modes: u8,
}

impl AptxCapabilities {
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x20;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x10;
    /// Stereo
    pub const STEREO: u8 = 0x02;

    /// Capabilities of the standard or HD variant
    #[must_use]
    pub const fn new(hd: bool) -> Self {
        Self {
            hd,
            sampling_frequencies: Self::HZ_44100 | Self::HZ_48000,
            channel_modes: Self::STEREO,
        }
    }
}

/// LDAC Codec Capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdacCapabilities {
    /// Sampling frequency support (bitfield)
    pub sampling_frequencies: u8,
    /// Channel mode support (bitfield)
    pub channel_modes: u8,
}

impl LdacCapabilities {
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x20;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x10;
    /// 88200 Hz
    pub const HZ_88200: u8 = 0x08;
    /// 96000 Hz
    pub const HZ_96000: u8 = 0x04;
    /// 176400 Hz
    pub const HZ_176400: u8 = 0x02;
    /// 192000 Hz
    pub const HZ_192000: u8 = 0x01;
    /// Mono
    pub const MONO: u8 = 0x04;
    /// Dual channel
    pub const DUAL: u8 = 0x02;
    /// Stereo
    pub const STEREO: u8 = 0x01;

    const FREQ_PREFERENCE: [u8; 6] = [
        Self::HZ_44100,
        Self::HZ_48000,
        Self::HZ_88200,
        Self::HZ_96000,
        Self::HZ_176400,
        Self::HZ_192000,
    ];
    const CHANNEL_PREFERENCE: [u8; 3] = [Self::STEREO, Self::DUAL, Self::MONO];
}

impl Default for LdacCapabilities {
    fn default() -> Self {
        Self {
            sampling_frequencies: Self::HZ_44100 | Self::HZ_48000 | Self::HZ_88200 | Self::HZ_96000,
            channel_modes: Self::STEREO | Self::DUAL,
        }
    }
}

/// First preferred bit present in `common`
fn pick(common: u8, preference: &[u8]) -> Option<u8> {
    preference.iter().copied().find(|bit| common & bit != 0)
}

/// True if `value` has exactly one bit set and it is allowed by `caps`
const fn single_bit_in(value: u8, caps: u8) -> bool {
    value.count_ones() == 1 && value & caps == value
}

impl CodecCapabilities {
    /// Parse a codec information element
    ///
    /// # Errors
    /// Returns `A2dpError::UnsupportedCodec` for codecs the core does not
    /// know and `A2dpError::InvalidCodecInfo` for malformed elements
    pub fn parse(info: &CodecInfo) -> Result<Self, A2dpError> {
        let d = info.as_bytes();
        let index = info.codec_index().ok_or(A2dpError::UnsupportedCodec)?;
        match index {
            CodecIndex::Sbc => {
                if d.len() != 7 {
                    return Err(A2dpError::InvalidCodecInfo);
                }
                let sbc = SbcCapabilities {
                    sampling_frequencies: SbcSamplingFrequency(d[3] >> 4),
                    channel_modes: SbcChannelMode(d[3] & 0x0F),
                    block_lengths: SbcBlockLength(d[4] >> 4),
                    subbands: SbcSubbands((d[4] >> 2) & 0x03),
                    allocation_methods: SbcAllocationMethod(d[4] & 0x03),
                    min_bitpool: d[5],
                    max_bitpool: d[6],
                };
                sbc.validate()?;
                Ok(Self::Sbc(sbc))
            }
            CodecIndex::Aac => {
                if d.len() != 9 {
                    return Err(A2dpError::InvalidCodecInfo);
                }
                Ok(Self::Aac(AacCapabilities {
                    object_types: d[3],
                    sampling_frequencies: (u16::from(d[4]) << 4) | u16::from(d[5] >> 4),
                    channels: d[5] & 0x0C,
                    vbr: d[6] & 0x80 != 0,
                    bitrate: (u32::from(d[6] & 0x7F) << 16) | (u32::from(d[7]) << 8) | u32::from(d[8]),
                }))
            }
            CodecIndex::Aptx | CodecIndex::AptxHd => {
                let hd = index == CodecIndex::AptxHd;
                let expected = if hd { 14 } else { 10 };
                if d.len() != expected {
                    return Err(A2dpError::InvalidCodecInfo);
                }
                Ok(Self::Aptx(AptxCapabilities {
                    hd,
                    sampling_frequencies: d[9] & 0xF0,
                    channel_modes: d[9] & 0x0F,
                }))
            }
            CodecIndex::Ldac => {
                if d.len() != 11 {
                    return Err(A2dpError::InvalidCodecInfo);
                }
                Ok(Self::Ldac(LdacCapabilities {
                    sampling_frequencies: d[9] & 0x3F,
                    channel_modes: d[10] & 0x07,
                }))
            }
        }
    }

    /// Codec identity
    #[must_use]
    pub const fn codec_index(&self) -> CodecIndex {
        match self {
            Self::Sbc(_) => CodecIndex::Sbc,
            Self::Aac(_) => CodecIndex::Aac,
            Self::Aptx(aptx) => {
                if aptx.hd {
                    CodecIndex::AptxHd
                } else {
                    CodecIndex::Aptx
                }
            }
            Self::Ldac(_) => CodecIndex::Ldac,
        }
    }

    /// Default local capabilities of a codec
    #[must_use]
    pub fn local_default(index: CodecIndex) -> Self {
        match index {
            CodecIndex::Sbc => Self::Sbc(SbcCapabilities::default()),
            CodecIndex::Aac => Self::Aac(AacCapabilities::default()),
            CodecIndex::Aptx => Self::Aptx(AptxCapabilities::new(false)),
            CodecIndex::AptxHd => Self::Aptx(AptxCapabilities::new(true)),
            CodecIndex::Ldac => Self::Ldac(LdacCapabilities::default()),
        }
    }

    /// Encode into a codec information element
    #[must_use]
    pub fn encode(&self) -> CodecInfo {
        let mut data = [0u8; CODEC_INFO_LEN];
        data[1] = MEDIA_TYPE_AUDIO << 4;
        data[2] = self.codec_index().codec_type() as u8;
        if let Some((vendor, codec)) = self.codec_index().vendor_ids() {
            data[3..7].copy_from_slice(&vendor.to_le_bytes());
            data[7..9].copy_from_slice(&codec.to_le_bytes());
        }
        let len: u8 = match self {
            Self::Sbc(sbc) => {
                data[3] = (sbc.sampling_frequencies.0 << 4) | sbc.channel_modes.0;
                data[4] = (sbc.block_lengths.0 << 4) | (sbc.subbands.0 << 2) | sbc.allocation_methods.0;
                data[5] = sbc.min_bitpool;
                data[6] = sbc.max_bitpool;
                7
            }
            Self::Aac(aac) => {
                data[3] = aac.object_types;
                data[4] = (aac.sampling_frequencies >> 4) as u8;
                data[5] = (((aac.sampling_frequencies & 0x0F) as u8) << 4) | aac.channels;
                data[6] = (if aac.vbr { 0x80 } else { 0 }) | ((aac.bitrate >> 16) as u8 & 0x7F);
                data[7] = (aac.bitrate >> 8) as u8;
                data[8] = aac.bitrate as u8;
                9
            }
            Self::Aptx(aptx) => {
                data[9] = aptx.sampling_frequencies | aptx.channel_modes;
                if aptx.hd { 14 } else { 10 }
            }
            Self::Ldac(ldac) => {
                data[9] = ldac.sampling_frequencies;
                data[10] = ldac.channel_modes;
                11
            }
        };
        data[0] = len - 1;
        CodecInfo { len, data }
    }

    /// Pick one concrete configuration supported by both capability sets
    ///
    /// Returns `None` if the codecs differ or nothing intersects.
    #[must_use]
    pub fn select_config(&self, peer: &Self) -> Option<Self> {
        match (self, peer) {
            (Self::Sbc(local), Self::Sbc(remote)) => local.select_with(remote).map(Self::Sbc),
            (Self::Aac(local), Self::Aac(remote)) => {
                let object_types = pick(
                    local.object_types & remote.object_types,
                    &AacCapabilities::OBJECT_PREFERENCE,
                )?;
                let sampling_frequencies = AacCapabilities::pick_frequency(
                    local.sampling_frequencies & remote.sampling_frequencies,
                )?;
                let channels = pick(local.channels & remote.channels, &AacCapabilities::CHANNEL_PREFERENCE)?;
                let bitrate = match (local.bitrate, remote.bitrate) {
                    (0, rate) | (rate, 0) => rate,
                    (a, b) => a.min(b),
                };
                Some(Self::Aac(AacCapabilities {
                    object_types,
                    sampling_frequencies,
                    channels,
                    vbr: local.vbr && remote.vbr,
                    bitrate,
                }))
            }
            (Self::Aptx(local), Self::Aptx(remote)) if local.hd == remote.hd => {
                let freq = pick(
                    local.sampling_frequencies & remote.sampling_frequencies,
                    &[AptxCapabilities::HZ_44100, AptxCapabilities::HZ_48000],
                )?;
                let channel = pick(local.channel_modes & remote.channel_modes, &[AptxCapabilities::STEREO])?;
                Some(Self::Aptx(AptxCapabilities {
                    hd: local.hd,
                    sampling_frequencies: freq,
                    channel_modes: channel,
                }))
            }
            (Self::Ldac(local), Self::Ldac(remote)) => {
                let freq = pick(
                    local.sampling_frequencies & remote.sampling_frequencies,
                    &LdacCapabilities::FREQ_PREFERENCE,
                )?;
                let channel = pick(
                    local.channel_modes & remote.channel_modes,
                    &LdacCapabilities::CHANNEL_PREFERENCE,
                )?;
                Some(Self::Ldac(LdacCapabilities {
                    sampling_frequencies: freq,
                    channel_modes: channel,
                }))
            }
            _ => None,
        }
    }

    /// True if `config` is a single concrete configuration allowed by `self`
    #[must_use]
    pub fn accepts_config(&self, config: &Self) -> bool {
        match (self, config) {
            (Self::Sbc(caps), Self::Sbc(cfg)) => {
                single_bit_in(cfg.sampling_frequencies.0, caps.sampling_frequencies.0)
                    && single_bit_in(cfg.channel_modes.0, caps.channel_modes.0)
                    && single_bit_in(cfg.block_lengths.0, caps.block_lengths.0)
                    && single_bit_in(cfg.subbands.0, caps.subbands.0)
                    && single_bit_in(cfg.allocation_methods.0, caps.allocation_methods.0)
                    && cfg.min_bitpool >= caps.min_bitpool
                    && cfg.max_bitpool <= caps.max_bitpool
            }
            (Self::Aac(caps), Self::Aac(cfg)) => {
                single_bit_in(cfg.object_types, caps.object_types)
                    && cfg.sampling_frequencies.count_ones() == 1
                    && cfg.sampling_frequencies & caps.sampling_frequencies != 0
                    && single_bit_in(cfg.channels, caps.channels)
                    && (!cfg.vbr || caps.vbr)
            }
            (Self::Aptx(caps), Self::Aptx(cfg)) => {
                caps.hd == cfg.hd
                    && single_bit_in(cfg.sampling_frequencies, caps.sampling_frequencies)
                    && single_bit_in(cfg.channel_modes, caps.channel_modes)
            }
            (Self::Ldac(caps), Self::Ldac(cfg)) => {
                single_bit_in(cfg.sampling_frequencies, caps.sampling_frequencies)
                    && single_bit_in(cfg.channel_modes, caps.channel_modes)
            }
            _ => false,
        }
    }
}

impl SbcCapabilities {
    /// Validate SBC capabilities
    ///
    /// # Errors
    /// Returns error if bitpool values are invalid
    pub const fn validate(&self) -> Result<(), A2dpError> {
        if self.min_bitpool < 2 || self.min_bitpool > 250 {
            return Err(A2dpError::InvalidCodecInfo);
        }
        if self.max_bitpool < 2 || self.max_bitpool > 250 {
            return Err(A2dpError::InvalidCodecInfo);
        }
        if self.min_bitpool > self.max_bitpool {
            return Err(A2dpError::InvalidCodecInfo);
        }
        Ok(())
    }

    /// Check if this capability set is compatible with another
    #[must_use]
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        (self.sampling_frequencies.0 & other.sampling_frequencies.0) != 0
            && (self.channel_modes.0 & other.channel_modes.0) != 0
            && (self.block_lengths.0 & other.block_lengths.0) != 0
            && (self.subbands.0 & other.subbands.0) != 0
            && (self.allocation_methods.0 & other.allocation_methods.0) != 0
            && self.max_bitpool >= other.min_bitpool
            && self.min_bitpool <= other.max_bitpool
    }

    /// Best single configuration common to both capability sets
    #[must_use]
    pub fn select_with(&self, peer: &Self) -> Option<Self> {
        if !self.is_compatible_with(peer) {
            return None;
        }
        Some(Self {
            sampling_frequencies: SbcSamplingFrequency(pick(
                self.sampling_frequencies.0 & peer.sampling_frequencies.0,
                &SbcSamplingFrequency::PREFERENCE,
            )?),
            channel_modes: SbcChannelMode(pick(
                self.channel_modes.0 & peer.channel_modes.0,
                &SbcChannelMode::PREFERENCE,
            )?),
            block_lengths: SbcBlockLength(pick(
                self.block_lengths.0 & peer.block_lengths.0,
                &SbcBlockLength::PREFERENCE,
            )?),
            subbands: SbcSubbands(pick(self.subbands.0 & peer.subbands.0, &SbcSubbands::PREFERENCE)?),
            allocation_methods: SbcAllocationMethod(pick(
                self.allocation_methods.0 & peer.allocation_methods.0,
                &SbcAllocationMethod::PREFERENCE,
            )?),
            min_bitpool: self.min_bitpool.max(peer.min_bitpool),
            max_bitpool: self.max_bitpool.min(peer.max_bitpool),
        })
    }
}

impl Default for SbcCapabilities {
    fn default() -> Self {
        Self {
            sampling_frequencies: SbcSamplingFrequency::all(),
            channel_modes: SbcChannelMode::all(),
            block_lengths: SbcBlockLength::all(),
            subbands: SbcSubbands::all(),
            allocation_methods: SbcAllocationMethod::all(),
            min_bitpool: 2,
            max_bitpool: 53,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbc_info(freq_chan: u8, block_sub_alloc: u8, min: u8, max: u8) -> CodecInfo {
        CodecInfo::from_bytes(&[0x06, 0x00, 0x00, freq_chan, block_sub_alloc, min, max]).unwrap()
    }

    #[test]
    fn test_codec_info_rejects_bad_losc() {
        assert_eq!(
            CodecInfo::from_bytes(&[0x07, 0x00, 0x00, 0xFF, 0xFF, 2, 53]),
            Err(A2dpError::InvalidCodecInfo)
        );
        assert_eq!(CodecInfo::from_bytes(&[0x01]), Err(A2dpError::InvalidCodecInfo));
    }

    #[test]
    fn test_sbc_parse_all_capabilities() {
        let info = sbc_info(0xFF, 0xFF, 2, 53);
        let caps = CodecCapabilities::parse(&info).unwrap();
        assert_eq!(caps, CodecCapabilities::Sbc(SbcCapabilities::default()));
        assert_eq!(caps.encode(), info);
    }

    #[test]
    fn test_sbc_parse_rejects_bitpool() {
        let info = sbc_info(0xFF, 0xFF, 60, 20);
        assert_eq!(CodecCapabilities::parse(&info), Err(A2dpError::InvalidCodecInfo));
    }

    #[test]
    fn test_sbc_select_prefers_44100_joint_stereo() {
        let local = SbcCapabilities::default();
        // peer: 44.1k|48k, stereo|joint, 16 blocks, 8 subbands, loudness, bitpool 10..35
        let peer = CodecCapabilities::parse(&sbc_info(0x33, 0x15, 10, 35)).unwrap();
        let CodecCapabilities::Sbc(peer) = peer else {
            panic!("expected SBC");
        };
        let config = local.select_with(&peer).unwrap();
        assert_eq!(config.sampling_frequencies.0, SbcSamplingFrequency::HZ_44100);
        assert_eq!(config.channel_modes.0, SbcChannelMode::JOINT_STEREO);
        assert_eq!(config.block_lengths.0, SbcBlockLength::BLOCKS_16);
        assert_eq!(config.subbands.0, SbcSubbands::SUBBANDS_8);
        assert_eq!(config.min_bitpool, 10);
        assert_eq!(config.max_bitpool, 35);

        let local_caps = CodecCapabilities::Sbc(local);
        assert!(local_caps.accepts_config(&CodecCapabilities::Sbc(config)));
        assert!(!local_caps.accepts_config(&local_caps));
    }

    #[test]
    fn test_sbc_select_no_overlap() {
        let mut local = SbcCapabilities::default();
        local.sampling_frequencies = SbcSamplingFrequency(SbcSamplingFrequency::HZ_16000);
        let mut peer = SbcCapabilities::default();
        peer.sampling_frequencies = SbcSamplingFrequency(SbcSamplingFrequency::HZ_48000);
        assert!(local.select_with(&peer).is_none());
    }

    #[test]
    fn test_aac_encode_parse() {
        let caps = CodecCapabilities::Aac(AacCapabilities::default());
        let info = caps.encode();
        assert_eq!(info.as_bytes().len(), 9);
        assert_eq!(info.codec_index(), Some(CodecIndex::Aac));
        assert_eq!(CodecCapabilities::parse(&info).unwrap(), caps);
    }

    #[test]
    fn test_aac_select_bitrate_and_channels() {
        let local = CodecCapabilities::Aac(AacCapabilities::default());
        let peer = CodecCapabilities::Aac(AacCapabilities {
            object_types: AacCapabilities::OBJECT_MPEG2_LC | AacCapabilities::OBJECT_MPEG4_LC,
            sampling_frequencies: AacCapabilities::HZ_48000,
            channels: AacCapabilities::CHANNELS_2,
            vbr: false,
            bitrate: 256_000,
        });
        let CodecCapabilities::Aac(config) = local.select_config(&peer).unwrap() else {
            panic!("expected AAC");
        };
        assert_eq!(config.object_types, AacCapabilities::OBJECT_MPEG2_LC);
        assert_eq!(config.sampling_frequencies, AacCapabilities::HZ_48000);
        assert_eq!(config.channels, AacCapabilities::CHANNELS_2);
        assert!(!config.vbr);
        assert_eq!(config.bitrate, 256_000);
    }

    #[test]
    fn test_vendor_codec_identity() {
        let aptx = CodecCapabilities::local_default(CodecIndex::Aptx).encode();
        assert_eq!(aptx.codec_type(), Some(CodecType::VendorSpecific));
        assert_eq!(aptx.vendor_ids(), Some((0x4F, 0x0001)));
        assert_eq!(aptx.codec_index(), Some(CodecIndex::Aptx));

        let hd = CodecCapabilities::local_default(CodecIndex::AptxHd).encode();
        assert_eq!(hd.codec_index(), Some(CodecIndex::AptxHd));
        assert_eq!(hd.as_bytes().len(), 14);

        let ldac = CodecCapabilities::local_default(CodecIndex::Ldac).encode();
        assert_eq!(ldac.codec_index(), Some(CodecIndex::Ldac));
        assert!(ldac.is_valid());
    }

    #[test]
    fn test_aptx_and_hd_do_not_match() {
        let aptx = CodecCapabilities::local_default(CodecIndex::Aptx);
        let hd = CodecCapabilities::local_default(CodecIndex::AptxHd);
        assert!(aptx.select_config(&hd).is_none());
        assert!(aptx.select_config(&aptx).is_some());
    }

    #[test]
    fn test_unknown_vendor_codec() {
        let info = CodecInfo::from_bytes(&[0x08, 0x00, 0xFF, 0x11, 0x22, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(info.codec_index(), None);
        assert!(!info.is_valid());
        assert_eq!(CodecCapabilities::parse(&info), Err(A2dpError::UnsupportedCodec));
    }
}
