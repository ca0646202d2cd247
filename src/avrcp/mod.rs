//! AVRCP (Audio/Video Remote Control Profile) engine
//!
//! Everything that happens on a remote-control link once it is open:
//! transaction labels and their timeouts, the notification subscription
//! procedure, absolute volume, player application settings and the
//! metadata PDU codec. The AVCTP transport is an external collaborator; this
//! module builds and parses the vendor-dependent payloads it carries.
//!
//! ## Architecture
//!
//! - **PDU**: metadata header, command builders, response parsing, inbound
//!   command validation
//! - **Transactions**: pool of 16 labels, each with its timeout token
//! - **Notifications**: per-peer registration state of every supported event
//! - **Device**: per-peer control block (features, volume, settings cache)
//! - **Engine**: drives the controller procedures over the above
//! - **Items**: folder item list builder for browsing responses
//!
//! ## Usage
//!
//! ```rust
//! use bondybird_av::avrcp::{EventId, pdu};
//!
//! let cmd = pdu::register_notification(EventId::VolumeChanged, 0).unwrap();
//! assert_eq!(cmd[0], 0x31);
//! assert_eq!(cmd[4], EventId::VolumeChanged as u8);
//! ```

pub mod device;
pub mod engine;
pub mod items;
pub mod notification;
pub mod pdu;
pub mod transaction;

pub use device::*;
pub use engine::*;
pub use items::*;
pub use notification::*;
pub use transaction::*;

/// AV/C command type and response code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageCode {
    /// Control command
    Control = 0x00,
    /// Status command
    Status = 0x01,
    /// Specific inquiry command
    SpecificInquiry = 0x02,
    /// Notify command
    Notify = 0x03,
    /// General inquiry command
    GeneralInquiry = 0x04,
    /// Not implemented
    NotImplemented = 0x08,
    /// Accepted
    Accepted = 0x09,
    /// Rejected
    Rejected = 0x0A,
    /// In transition
    InTransition = 0x0B,
    /// Implemented / stable
    Stable = 0x0C,
    /// Changed
    Changed = 0x0D,
    /// Interim
    Interim = 0x0F,
}

impl MessageCode {
    /// Decode a raw ctype/response byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Control,
            0x01 => Self::Status,
            0x02 => Self::SpecificInquiry,
            0x03 => Self::Notify,
            0x04 => Self::GeneralInquiry,
            0x08 => Self::NotImplemented,
            0x09 => Self::Accepted,
            0x0A => Self::Rejected,
            0x0B => Self::InTransition,
            0x0C => Self::Stable,
            0x0D => Self::Changed,
            0x0F => Self::Interim,
            _ => return None,
        })
    }

    /// True for command types
    #[must_use]
    pub const fn is_command(self) -> bool {
        (self as u8) < Self::NotImplemented as u8
    }

    /// True for inquiry commands
    #[must_use]
    pub const fn is_inquiry(self) -> bool {
        matches!(self, Self::SpecificInquiry | Self::GeneralInquiry)
    }
}

/// AVRCP metadata PDU identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PduId {
    /// GetCapabilities
    GetCapabilities = 0x10,
    /// ListPlayerApplicationSettingAttributes
    ListAppAttributes = 0x11,
    /// ListPlayerApplicationSettingValues
    ListAppValues = 0x12,
    /// GetCurrentPlayerApplicationSettingValue
    GetCurrentAppValues = 0x13,
    /// SetPlayerApplicationSettingValue
    SetAppValues = 0x14,
    /// GetElementAttributes
    GetElementAttributes = 0x20,
    /// GetPlayStatus
    GetPlayStatus = 0x30,
    /// RegisterNotification
    RegisterNotification = 0x31,
    /// SetAbsoluteVolume
    SetAbsoluteVolume = 0x50,
    /// SetAddressedPlayer
    SetAddressedPlayer = 0x60,
    /// GetFolderItems (browsing)
    GetFolderItems = 0x71,
}

impl PduId {
    /// Decode a raw PDU id
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x10 => Self::GetCapabilities,
            0x11 => Self::ListAppAttributes,
            0x12 => Self::ListAppValues,
            0x13 => Self::GetCurrentAppValues,
            0x14 => Self::SetAppValues,
            0x20 => Self::GetElementAttributes,
            0x30 => Self::GetPlayStatus,
            0x31 => Self::RegisterNotification,
            0x50 => Self::SetAbsoluteVolume,
            0x60 => Self::SetAddressedPlayer,
            0x71 => Self::GetFolderItems,
            _ => return None,
        })
    }

    /// Command type this PDU must be sent with
    #[must_use]
    pub const fn command_type(self) -> MessageCode {
        match self {
            Self::RegisterNotification => MessageCode::Notify,
            Self::SetAppValues | Self::SetAbsoluteVolume | Self::SetAddressedPlayer => {
                MessageCode::Control
            }
            _ => MessageCode::Status,
        }
    }
}

/// Notification event identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EventId {
    /// Playback status changed
    PlayStatusChanged = 0x01,
    /// Track changed
    TrackChanged = 0x02,
    /// Reached end of track
    TrackReachedEnd = 0x03,
    /// Reached start of track
    TrackReachedStart = 0x04,
    /// Playback position changed
    PlayPositionChanged = 0x05,
    /// Battery status changed
    BatteryStatusChanged = 0x06,
    /// System status changed
    SystemStatusChanged = 0x07,
    /// Player application setting changed
    AppSettingChanged = 0x08,
    /// Now playing content changed
    NowPlayingChanged = 0x09,
    /// Available players changed
    AvailablePlayersChanged = 0x0A,
    /// Addressed player changed
    AddressedPlayerChanged = 0x0B,
    /// UIDs changed
    UidsChanged = 0x0C,
    /// Absolute volume changed
    VolumeChanged = 0x0D,
}

impl EventId {
    /// Decode a raw event id
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::PlayStatusChanged,
            0x02 => Self::TrackChanged,
            0x03 => Self::TrackReachedEnd,
            0x04 => Self::TrackReachedStart,
            0x05 => Self::PlayPositionChanged,
            0x06 => Self::BatteryStatusChanged,
            0x07 => Self::SystemStatusChanged,
            0x08 => Self::AppSettingChanged,
            0x09 => Self::NowPlayingChanged,
            0x0A => Self::AvailablePlayersChanged,
            0x0B => Self::AddressedPlayerChanged,
            0x0C => Self::UidsChanged,
            0x0D => Self::VolumeChanged,
            _ => return None,
        })
    }

    /// Events the controller subscribes to once the peer lists them
    ///
    /// Volume is handled by its own registration; battery and system status
    /// and the browsing-only events are never requested.
    #[must_use]
    pub const fn is_interesting(self) -> bool {
        matches!(
            self,
            Self::PlayStatusChanged
                | Self::TrackChanged
                | Self::PlayPositionChanged
                | Self::AppSettingChanged
                | Self::NowPlayingChanged
                | Self::AddressedPlayerChanged
                | Self::UidsChanged
        )
    }
}

/// Status carried in AVRCP metadata responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AvrcStatus {
    /// Invalid command
    BadCommand = 0x00,
    /// Invalid parameter
    BadParameter = 0x01,
    /// Parameter content error
    NotFound = 0x02,
    /// Internal error
    InternalError = 0x03,
    /// Operation completed without error
    NoError = 0x04,
    /// No response from the peer (local status)
    Timeout = crate::constants::AVRC_STS_TIMEOUT,
}

impl AvrcStatus {
    /// Decode a raw status byte; unknown values map to `InternalError`
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::BadCommand,
            0x01 => Self::BadParameter,
            0x02 => Self::NotFound,
            0x04 => Self::NoError,
            crate::constants::AVRC_STS_TIMEOUT => Self::Timeout,
            _ => Self::InternalError,
        }
    }
}

/// GetCapabilities capability id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CapabilityId {
    /// Company ids supported by the target
    CompanyId = 0x02,
    /// Notification events supported by the target
    EventsSupported = 0x03,
}

/// Pass-through operation ids used by the core
pub mod op {
    /// Volume up
    pub const VOLUME_UP: u8 = 0x41;
    /// Volume down
    pub const VOLUME_DOWN: u8 = 0x42;
    /// Play
    pub const PLAY: u8 = 0x44;
    /// Stop
    pub const STOP: u8 = 0x45;
    /// Pause
    pub const PAUSE: u8 = 0x46;
    /// Forward
    pub const FORWARD: u8 = 0x4B;
    /// Backward
    pub const BACKWARD: u8 = 0x4C;
    /// Vendor unique (group navigation)
    pub const VENDOR_UNIQUE: u8 = 0x7E;
    /// Group navigation: next group
    pub const NEXT_GROUP: u16 = 0x0000;
    /// Group navigation: previous group
    pub const PREV_GROUP: u16 = 0x0001;
}

/// AVRCP Errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvrcpError {
    /// All transaction labels are in use
    NoLabels,
    /// Label does not belong to a pending transaction
    UnknownLabel,
    /// Payload does not match the PDU layout
    Malformed,
    /// Message does not fit the payload buffer
    BufferFull,
    /// Peer (or the local validator) rejected the command
    Rejected(AvrcStatus),
    /// No connected AVRCP peer matches
    NotConnected,
    /// Feature not supported on this connection
    NotSupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_code_classification() {
        assert!(MessageCode::Notify.is_command());
        assert!(!MessageCode::Interim.is_command());
        assert!(MessageCode::GeneralInquiry.is_inquiry());
        assert_eq!(MessageCode::from_u8(0x0F), Some(MessageCode::Interim));
        assert_eq!(MessageCode::from_u8(0x0E), None);
    }

    #[test]
    fn test_pdu_command_types() {
        assert_eq!(PduId::RegisterNotification.command_type(), MessageCode::Notify);
        assert_eq!(PduId::SetAbsoluteVolume.command_type(), MessageCode::Control);
        assert_eq!(PduId::GetCapabilities.command_type(), MessageCode::Status);
    }

    #[test]
    fn test_interesting_events_exclude_blacklist() {
        assert!(EventId::TrackChanged.is_interesting());
        assert!(!EventId::BatteryStatusChanged.is_interesting());
        assert!(!EventId::SystemStatusChanged.is_interesting());
        assert!(!EventId::VolumeChanged.is_interesting());
    }

    #[test]
    fn test_status_decode() {
        assert_eq!(AvrcStatus::from_u8(0xFE), AvrcStatus::Timeout);
        assert_eq!(AvrcStatus::from_u8(0x42), AvrcStatus::InternalError);
    }
}
