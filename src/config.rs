//! Session configuration
//!
//! [`AvOptions`] is supplied once with the enable request and stays
//! read-only until the core is disabled. [`AvFeatures`] is the feature
//! bitmask shared between the local configuration and what is learned about
//! each AVRCP peer.

use crate::a2dp::{CodecIndex, SepType};
use crate::avrcp::EventId;
use crate::avrcp::pdu::PassThroughSet;
use crate::constants::{
    DEFAULT_ACCEPT_TIMEOUT, DEFAULT_CONTROL_COMMAND_TIMEOUT, DEFAULT_FANOUT_QUEUE_DEPTH,
    DEFAULT_INTERIM_TIMEOUT, DEFAULT_RC_OPEN_TIMEOUT, DEFAULT_ROLE_SWITCH_TIMEOUT,
    DEFAULT_SIGNALLING_TIMEOUT, DEFAULT_STATUS_COMMAND_TIMEOUT, MAX_CODECS, MAX_COMPANY_IDS,
    MAX_SUPPORTED_EVENTS, METADATA_COMPANY_ID,
};
use core::time::Duration;
use heapless::Vec;

/// AV feature bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvFeatures(pub u16);

impl AvFeatures {
    /// Remote control target
    pub const RCTG: u16 = 0x0001;
    /// Advanced control (absolute volume)
    pub const ADV_CTRL: u16 = 0x0002;
    /// Remote control controller
    pub const RCCT: u16 = 0x0004;
    /// Vendor-dependent commands
    pub const VENDOR: u16 = 0x0008;
    /// Metadata PDUs
    pub const METADATA: u16 = 0x0010;
    /// Browsing channel
    pub const BROWSE: u16 = 0x0020;
    /// Delay reporting
    pub const DELAY_REPORT: u16 = 0x0040;
    /// Stay central on audio links
    pub const MASTER: u16 = 0x0080;
    /// Do not suspend streams for SCO
    pub const NO_SCO_SUSPEND: u16 = 0x0100;
    /// Player application settings
    pub const APP_SETTING: u16 = 0x0200;
    /// Cover art
    pub const COVER_ART: u16 = 0x0400;
    /// Reject incoming connections while enabled
    pub const REJECT: u16 = 0x0800;
    /// Group navigation pass-through
    pub const GROUP_NAVIGATION: u16 = 0x1000;

    /// No feature
    pub const NONE: Self = Self(0);

    /// True if every bit of `bits` is set
    #[must_use]
    pub const fn supports(&self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    /// True if any bit of `bits` is set
    #[must_use]
    pub const fn any(&self, bits: u16) -> bool {
        self.0 & bits != 0
    }

    /// Copy with `bits` set
    #[must_use]
    pub const fn with(self, bits: u16) -> Self {
        Self(self.0 | bits)
    }

    /// Copy with `bits` cleared
    #[must_use]
    pub const fn without(self, bits: u16) -> Self {
        Self(self.0 & !bits)
    }

    /// Features a peer is assumed to have before discovery finished
    ///
    /// A local controller assumes a target on the other side and vice versa.
    #[must_use]
    pub const fn assumed_peer(self) -> Self {
        let mut peer = 0;
        if self.any(Self::RCCT) {
            peer |= Self::RCTG;
        }
        if self.any(Self::RCTG) {
            peer |= Self::RCCT;
        }
        Self(peer)
    }
}

/// Immutable configuration of the session core
///
/// # Example
///
/// ```rust
/// use bondybird_av::{AvFeatures, AvOptions};
/// use bondybird_av::a2dp::{CodecIndex, SepType};
///
/// let options = AvOptions::default()
///     .with_role(SepType::Sink)
///     .with_features(AvFeatures(AvFeatures::RCCT | AvFeatures::METADATA))
///     .with_codec_priorities(&[CodecIndex::Aac, CodecIndex::Sbc]);
/// assert_eq!(options.codec_priorities[0], CodecIndex::Aac);
/// ```
#[derive(Debug, Clone)]
pub struct AvOptions {
    /// Local audio role
    pub role: SepType,
    /// Local feature bitmask
    pub features: AvFeatures,
    /// Codec preference, most preferred first
    pub codec_priorities: Vec<CodecIndex, MAX_CODECS>,
    /// SCMS-T content protection enabled
    pub content_protection: bool,
    /// Company ids reported to GetCapabilities
    pub company_ids: Vec<u32, MAX_COMPANY_IDS>,
    /// Notification events reported to GetCapabilities and accepted for registration
    pub supported_events: Vec<EventId, MAX_SUPPORTED_EVENTS>,
    /// Pass-through operations accepted from peers
    pub supported_pass_through: PassThroughSet,
    /// Signaling timer for incoming peers
    pub signalling_timeout: Duration,
    /// Incoming connection collision window
    pub accept_timeout: Duration,
    /// Role switch guard
    pub role_switch_timeout: Duration,
    /// Delay before opening AVRCP after a stream opened as acceptor
    pub rc_open_timeout: Duration,
    /// AVRCP status command timeout
    pub status_command_timeout: Duration,
    /// AVRCP control command timeout
    pub control_command_timeout: Duration,
    /// AVRCP interim response timeout
    pub interim_timeout: Duration,
    /// Outbound audio fan-out queue depth
    pub fanout_queue_depth: usize,
    /// Never use absolute volume, even if the peer supports it
    pub absolute_volume_disabled: bool,
}

impl Default for AvOptions {
    fn default() -> Self {
        let mut company_ids = Vec::new();
        let _ = company_ids.push(METADATA_COMPANY_ID);
        let mut supported_events = Vec::new();
        let _ = supported_events.extend_from_slice(&[
            EventId::PlayStatusChanged,
            EventId::TrackChanged,
            EventId::PlayPositionChanged,
            EventId::AppSettingChanged,
            EventId::VolumeChanged,
        ]);
        Self {
            role: SepType::Source,
            features: AvFeatures(
                AvFeatures::RCTG
                    | AvFeatures::RCCT
                    | AvFeatures::VENDOR
                    | AvFeatures::METADATA
                    | AvFeatures::ADV_CTRL,
            ),
            codec_priorities: Vec::from_slice(&CodecIndex::default_priorities()).unwrap_or_default(),
            content_protection: false,
            company_ids,
            supported_events,
            supported_pass_through: PassThroughSet::default(),
            signalling_timeout: DEFAULT_SIGNALLING_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            role_switch_timeout: DEFAULT_ROLE_SWITCH_TIMEOUT,
            rc_open_timeout: DEFAULT_RC_OPEN_TIMEOUT,
            status_command_timeout: DEFAULT_STATUS_COMMAND_TIMEOUT,
            control_command_timeout: DEFAULT_CONTROL_COMMAND_TIMEOUT,
            interim_timeout: DEFAULT_INTERIM_TIMEOUT,
            fanout_queue_depth: DEFAULT_FANOUT_QUEUE_DEPTH,
            absolute_volume_disabled: false,
        }
    }
}

impl AvOptions {
    /// Set the local audio role
    #[must_use]
    pub fn with_role(mut self, role: SepType) -> Self {
        self.role = role;
        self
    }

    /// Set the feature bitmask
    #[must_use]
    pub fn with_features(mut self, features: AvFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set the codec preference (extra entries are dropped)
    #[must_use]
    pub fn with_codec_priorities(mut self, order: &[CodecIndex]) -> Self {
        self.codec_priorities.clear();
        for codec in order.iter().take(MAX_CODECS) {
            let _ = self.codec_priorities.push(*codec);
        }
        self
    }

    /// Enable or disable SCMS-T content protection
    #[must_use]
    pub fn with_content_protection(mut self, enabled: bool) -> Self {
        self.content_protection = enabled;
        self
    }

    /// Set the events reported to peers (extra entries are dropped)
    #[must_use]
    pub fn with_supported_events(mut self, events: &[EventId]) -> Self {
        self.supported_events.clear();
        for event in events.iter().take(MAX_SUPPORTED_EVENTS) {
            let _ = self.supported_events.push(*event);
        }
        self
    }

    /// Set the accepted pass-through operations
    #[must_use]
    pub fn with_pass_through(mut self, ops: PassThroughSet) -> Self {
        self.supported_pass_through = ops;
        self
    }

    /// Set the fan-out queue depth
    #[must_use]
    pub fn with_fanout_queue_depth(mut self, depth: usize) -> Self {
        self.fanout_queue_depth = depth;
        self
    }

    /// Disable absolute volume
    #[must_use]
    pub fn with_absolute_volume_disabled(mut self, disabled: bool) -> Self {
        self.absolute_volume_disabled = disabled;
        self
    }

    /// Set the signaling timer
    #[must_use]
    pub fn with_signalling_timeout(mut self, timeout: Duration) -> Self {
        self.signalling_timeout = timeout;
        self
    }

    /// Set the AVRCP command timeouts (status, control, interim)
    #[must_use]
    pub fn with_command_timeouts(mut self, status: Duration, control: Duration, interim: Duration) -> Self {
        self.status_command_timeout = status;
        self.control_command_timeout = control;
        self.interim_timeout = interim;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assumed_peer_features() {
        assert_eq!(
            AvFeatures(AvFeatures::RCCT).assumed_peer(),
            AvFeatures(AvFeatures::RCTG)
        );
        assert_eq!(
            AvFeatures(AvFeatures::RCTG | AvFeatures::RCCT).assumed_peer(),
            AvFeatures(AvFeatures::RCTG | AvFeatures::RCCT)
        );
        assert_eq!(AvFeatures(AvFeatures::METADATA).assumed_peer(), AvFeatures::NONE);
    }

    #[test]
    fn test_feature_bits() {
        let features = AvFeatures::NONE.with(AvFeatures::RCTG | AvFeatures::ADV_CTRL);
        assert!(features.supports(AvFeatures::RCTG | AvFeatures::ADV_CTRL));
        assert!(!features.supports(AvFeatures::RCTG | AvFeatures::BROWSE));
        assert!(features.any(AvFeatures::RCTG | AvFeatures::BROWSE));
        assert!(!features.without(AvFeatures::ADV_CTRL).any(AvFeatures::ADV_CTRL));
    }

    #[test]
    fn test_default_options() {
        let options = AvOptions::default();
        assert_eq!(options.signalling_timeout, Duration::from_secs(8));
        assert_eq!(options.codec_priorities.len(), 5);
        assert_eq!(options.codec_priorities[0], CodecIndex::Ldac);
        assert!(options.supported_events.contains(&EventId::VolumeChanged));
    }
}
