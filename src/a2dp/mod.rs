//! A2DP (Advanced Audio Distribution Profile) session support
//!
//! Codec negotiation and per-stream bookkeeping for A2DP. The AVDTP
//! signaling engine itself is an external collaborator; this module only
//! consumes its results (discovery, capabilities, configuration requests)
//! and decides which local endpoint and codec configuration each stream
//! uses.
//!
//! ## Architecture
//!
//! - **Codec**: capability blobs and configuration selection per codec family
//! - **Catalog**: peer endpoints collected while discovering one peer
//! - **Negotiator**: codec selection, content protection, active peer tracking
//! - **Fan-out**: bounded outbound frame queue per stream
//!
//! ## Usage
//!
//! ```rust
//! use bondybird_av::a2dp::{CodecIndex, CodecNegotiator, SepType};
//!
//! let mut negotiator = CodecNegotiator::new(SepType::Source, false);
//! negotiator.set_priorities(&[CodecIndex::Aac, CodecIndex::Sbc]).unwrap();
//! assert_eq!(negotiator.priorities()[0], CodecIndex::Aac);
//! ```

pub mod catalog;
pub mod codec;
pub mod fanout;
pub mod negotiator;

pub use catalog::*;
pub use codec::*;
pub use fanout::*;
pub use negotiator::*;

use crate::constants::{CP_INFO_LEN, CP_LOSC, SCMS_T_ID};

/// Stream endpoint type, seen from the side that owns the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SepType {
    /// Audio source (sends audio)
    Source,
    /// Audio sink (receives audio)
    Sink,
}

impl SepType {
    /// Endpoint type a peer must expose to talk to this one
    #[must_use]
    pub const fn complement(self) -> Self {
        match self {
            SepType::Source => SepType::Sink,
            SepType::Sink => SepType::Source,
        }
    }
}

/// AVDTP service category reported with a configuration reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceCategory {
    /// Content protection
    Protect = 4,
    /// Media codec
    Codec = 7,
}

/// Status carried in configuration responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum A2dpStatus {
    /// Configuration accepted
    Success = 0x00,
    /// Generic failure
    Fail = 0x0A,
    /// Endpoint busy
    Busy = 0x0B,
    /// Codec type not supported
    WrongCodec = 0xC1,
    /// Content protection type not supported
    BadCpType = 0xE0,
}

/// A2DP Errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum A2dpError {
    /// Invalid stream endpoint
    InvalidEndpoint,
    /// Codec not supported
    UnsupportedCodec,
    /// Codec information element is malformed
    InvalidCodecInfo,
    /// No peer endpoint matches any local codec
    NoCompatibleEndpoint,
    /// Content protection requirements not met
    ContentProtection,
    /// Peer is not known to the negotiator
    UnknownPeer,
    /// Peer capability storage is full
    CatalogFull,
    /// Stream configuration failed
    ConfigurationFailed,
}

/// SCMS-T copy permission signalled in the media packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CpFlag {
    /// Copy freely
    CopyFree = 0x00,
    /// Copy once
    CopyOnce = 0x01,
    /// Copy never
    CopyNever = 0x02,
}

/// Content protection descriptors advertised by one endpoint
///
/// Only the first descriptor is kept; `count` still reports how many the
/// peer advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtectInfo {
    /// Number of descriptors advertised
    pub count: u8,
    /// First descriptor: LOSC followed by the little-endian scheme id
    pub info: [u8; CP_INFO_LEN],
}

impl ProtectInfo {
    /// No protection advertised
    pub const NONE: Self = Self {
        count: 0,
        info: [0; CP_INFO_LEN],
    };

    /// A single SCMS-T descriptor
    #[must_use]
    pub const fn scms_t() -> Self {
        Self {
            count: 1,
            info: crate::constants::SCMS_T_DESCRIPTOR,
        }
    }

    /// Build from the descriptor bytes received from the transport
    #[must_use]
    pub fn from_bytes(count: u8, bytes: &[u8]) -> Self {
        let mut info = [0u8; CP_INFO_LEN];
        let len = bytes.len().min(CP_INFO_LEN);
        info[..len].copy_from_slice(&bytes[..len]);
        Self { count, info }
    }

    /// True if one of the stored descriptors is SCMS-T
    #[must_use]
    pub fn has_scms_t(&self) -> bool {
        let step = usize::from(CP_LOSC) + 1;
        (0..usize::from(self.count))
            .map(|n| n * step)
            .take_while(|offset| offset + step <= CP_INFO_LEN)
            .any(|offset| {
                let d = &self.info[offset..offset + step];
                d[0] == CP_LOSC && u16::from_le_bytes([d[1], d[2]]) == SCMS_T_ID
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_info_scms_t() {
        assert!(ProtectInfo::scms_t().has_scms_t());
        assert!(!ProtectInfo::NONE.has_scms_t());
        assert!(!ProtectInfo::from_bytes(1, &[0x02, 0x01, 0x00]).has_scms_t());
        // count says zero even though bytes look valid
        assert!(!ProtectInfo::from_bytes(0, &[0x02, 0x02, 0x00]).has_scms_t());
    }

    #[test]
    fn test_sep_type_complement() {
        assert_eq!(SepType::Source.complement(), SepType::Sink);
        assert_eq!(SepType::Sink.complement(), SepType::Source);
    }
}
