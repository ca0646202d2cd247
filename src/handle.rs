//! Typed handles for the session tables
//!
//! Every table in the session core is a fixed-size arena addressed by a small
//! integer. These newtypes keep the different index spaces apart and do all
//! bounds checking in one place, so an out-of-range value coming from a
//! collaborator is rejected at the boundary with `AvError::InvalidHandle`.
//!
//! ## Stream handle layout
//!
//! A stream handle carries the channel type in its upper bits and the
//! one-based table index in the low bits:
//!
//! ```text
//! handle = (index + 1) | channel_mask
//! ```

use crate::AvError;
use crate::constants::{LINK_SLOTS, MAX_LINKS, MAX_RC_SESSIONS, MAX_STREAMS, MAX_TRANSACTION_LABELS};

/// Channel bits of a stream handle
const CHANNEL_MASK: u8 = 0xC0;

/// Media channel type of a Stream Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Audio stream
    Audio,
    /// Video stream
    Video,
}

impl Channel {
    /// Channel bits as placed in the stream handle
    #[must_use]
    pub const fn mask(self) -> u8 {
        match self {
            Channel::Audio => 0x40,
            Channel::Video => 0x80,
        }
    }

    /// Decode the channel bits of a raw handle
    #[must_use]
    pub const fn from_mask(bits: u8) -> Option<Self> {
        match bits & CHANNEL_MASK {
            0x40 => Some(Channel::Audio),
            0x80 => Some(Channel::Video),
            _ => None,
        }
    }
}

/// Index into the Stream Session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamIndex(u8);

impl StreamIndex {
    /// Create a checked stream index
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if `index >= MAX_STREAMS`
    pub fn new(index: usize) -> Result<Self, AvError> {
        if index < MAX_STREAMS {
            Ok(Self(index as u8))
        } else {
            Err(AvError::InvalidHandle)
        }
    }

    /// Table position
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// All valid stream indices in table order
    pub fn all() -> impl Iterator<Item = StreamIndex> {
        (0..MAX_STREAMS as u8).map(StreamIndex)
    }
}

/// Stream Session handle as exchanged with the transport and upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamHandle(u8);

impl StreamHandle {
    /// Build the handle of a table slot
    #[must_use]
    pub const fn from_index(channel: Channel, index: StreamIndex) -> Self {
        Self((index.0 + 1) | channel.mask())
    }

    /// Wrap a raw handle received from a collaborator
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if the channel bits are unknown or the
    /// derived index is outside the stream table
    pub fn from_raw(raw: u8) -> Result<Self, AvError> {
        let handle = Self(raw);
        handle.index()?;
        Ok(handle)
    }

    /// Raw handle value
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Channel type encoded in the handle
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if the channel bits are unknown
    pub fn channel(self) -> Result<Channel, AvError> {
        Channel::from_mask(self.0).ok_or(AvError::InvalidHandle)
    }

    /// Table index encoded in the handle
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if the handle does not address a slot
    pub fn index(self) -> Result<StreamIndex, AvError> {
        self.channel()?;
        let low = self.0 & !CHANNEL_MASK;
        if low == 0 {
            return Err(AvError::InvalidHandle);
        }
        StreamIndex::new(usize::from(low - 1))
    }
}

/// Index into the Link Session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkIndex(u8);

impl LinkIndex {
    /// Reserved slot for peers with only a remote-control connection
    pub const RC_ONLY: Self = Self(MAX_LINKS as u8);

    /// Create a checked link index (the reserved slot included)
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if `index >= LINK_SLOTS`
    pub fn new(index: usize) -> Result<Self, AvError> {
        if index < LINK_SLOTS {
            Ok(Self(index as u8))
        } else {
            Err(AvError::InvalidHandle)
        }
    }

    /// Table position
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// True for the RC-only reservation
    #[must_use]
    pub const fn is_rc_only(self) -> bool {
        self.0 as usize == MAX_LINKS
    }

    /// Bit of this link in a per-stream link mask
    #[must_use]
    pub const fn bit(self) -> u8 {
        1 << self.0
    }
}

/// Index into the Remote-Control Session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RcIndex(u8);

impl RcIndex {
    /// Create a checked RC session index
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if `index >= MAX_RC_SESSIONS`
    pub fn new(index: usize) -> Result<Self, AvError> {
        if index < MAX_RC_SESSIONS {
            Ok(Self(index as u8))
        } else {
            Err(AvError::InvalidHandle)
        }
    }

    /// Table position
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

/// Remote-Control handle issued by the AVRCP collaborator
///
/// The value space is owned by the collaborator and unrelated to stream
/// handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RcHandle(pub u8);

/// AVRCP transaction label (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label(u8);

impl Label {
    /// Create a checked label
    ///
    /// # Errors
    /// Returns `AvError::InvalidParameter` if `value >= 16`
    pub fn new(value: u8) -> Result<Self, AvError> {
        if usize::from(value) < MAX_TRANSACTION_LABELS {
            Ok(Self(value))
        } else {
            Err(AvError::InvalidParameter)
        }
    }

    /// Raw label value
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_handle_layout() {
        let index = StreamIndex::new(0).unwrap();
        let handle = StreamHandle::from_index(Channel::Audio, index);
        assert_eq!(handle.raw(), 0x41);
        assert_eq!(handle.index().unwrap(), index);
        assert_eq!(handle.channel().unwrap(), Channel::Audio);

        let video = StreamHandle::from_index(Channel::Video, StreamIndex::new(2).unwrap());
        assert_eq!(video.raw(), 0x83);
        assert_eq!(video.index().unwrap().get(), 2);
    }

    #[test]
    fn test_stream_handle_rejects_out_of_range() {
        assert_eq!(StreamHandle::from_raw(0x40), Err(AvError::InvalidHandle));
        assert_eq!(StreamHandle::from_raw(0x01), Err(AvError::InvalidHandle));
        let too_far = 0x40 | (MAX_STREAMS as u8 + 1);
        assert_eq!(StreamHandle::from_raw(too_far), Err(AvError::InvalidHandle));
        assert!(StreamHandle::from_raw(0x40 | MAX_STREAMS as u8).is_ok());
    }

    #[test]
    fn test_link_index_reserved_slot() {
        assert!(LinkIndex::RC_ONLY.is_rc_only());
        assert_eq!(LinkIndex::new(MAX_LINKS).unwrap(), LinkIndex::RC_ONLY);
        assert!(!LinkIndex::new(0).unwrap().is_rc_only());
        assert!(LinkIndex::new(LINK_SLOTS).is_err());
        assert_eq!(LinkIndex::new(3).unwrap().bit(), 0x08);
    }

    #[test]
    fn test_label_bounds() {
        assert_eq!(Label::new(15).unwrap().get(), 15);
        assert!(Label::new(16).is_err());
        assert!(RcIndex::new(MAX_RC_SESSIONS).is_err());
    }
}
