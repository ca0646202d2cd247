//! Folder item list builder
//!
//! Builds a GetFolderItems browsing response. Items are appended one at a
//! time until all requested items are in or the packet is full, whichever
//! comes first; a list cut short by capacity is still a valid response. Only
//! a response that could not take a single item is a failure, answered with
//! a reject.
//!
//! ```text
//! [pdu, len_hi, len_lo, status, uid_counter(2), item_count(2), items...]
//! item = [type, len(2), body...]
//! ```

use super::{AvrcStatus, PduId};
use super::pdu::Payload;
use crate::constants::{MAX_AVRCP_PAYLOAD, MIN_FOLDER_ITEMS_LEFT};

/// UTF-8 character set id
pub const CHARSET_UTF8: u16 = 0x006A;

const HEADER_LEN: usize = 3;
const ITEM_COUNT_OFFSET: usize = 6;

/// One media attribute of a media element item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaAttribute<'a> {
    /// Attribute id
    pub id: u32,
    /// UTF-8 value
    pub value: &'a [u8],
}

/// One browsable item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseItem<'a> {
    /// Media player
    Player {
        /// Player id
        id: u16,
        /// Major player type bitmask
        major_type: u8,
        /// Player sub type bitmask
        sub_type: u32,
        /// Play status
        play_status: u8,
        /// Feature bitmask
        features: [u8; 16],
        /// Display name
        name: &'a [u8],
    },
    /// Folder
    Folder {
        /// Folder UID
        uid: u64,
        /// Folder type
        folder_type: u8,
        /// Folder can be played
        playable: bool,
        /// Display name
        name: &'a [u8],
    },
    /// Media element
    Media {
        /// Element UID
        uid: u64,
        /// Media type
        media_type: u8,
        /// Display name
        name: &'a [u8],
        /// Attributes
        attributes: &'a [MediaAttribute<'a>],
    },
}

impl BrowseItem<'_> {
    const fn type_code(&self) -> u8 {
        match self {
            Self::Player { .. } => 0x01,
            Self::Folder { .. } => 0x02,
            Self::Media { .. } => 0x03,
        }
    }

    /// Encoded body length, or `None` if a field overflows its length prefix
    fn body_len(&self) -> Option<usize> {
        let len = match self {
            Self::Player { name, .. } => 28 + name.len(),
            Self::Folder { name, .. } => 14 + name.len(),
            Self::Media {
                name, attributes, ..
            } => {
                if attributes.len() > usize::from(u8::MAX) {
                    return None;
                }
                14 + name.len()
                    + attributes
                        .iter()
                        .map(|a| 8 + a.value.len())
                        .sum::<usize>()
            }
        };
        u16::try_from(len).ok().map(usize::from)
    }

    fn encode(&self, out: &mut Payload, body_len: usize) -> Result<(), ()> {
        out.push(self.type_code()).map_err(|_| ())?;
        let body_len = u16::try_from(body_len).map_err(|_| ())?;
        out.extend_from_slice(&body_len.to_be_bytes())?;
        match self {
            Self::Player {
                id,
                major_type,
                sub_type,
                play_status,
                features,
                name,
            } => {
                out.extend_from_slice(&id.to_be_bytes())?;
                out.push(*major_type).map_err(|_| ())?;
                out.extend_from_slice(&sub_type.to_be_bytes())?;
                out.push(*play_status).map_err(|_| ())?;
                out.extend_from_slice(features)?;
                put_name(out, name)
            }
            Self::Folder {
                uid,
                folder_type,
                playable,
                name,
            } => {
                out.extend_from_slice(&uid.to_be_bytes())?;
                out.push(*folder_type).map_err(|_| ())?;
                out.push(u8::from(*playable)).map_err(|_| ())?;
                put_name(out, name)
            }
            Self::Media {
                uid,
                media_type,
                name,
                attributes,
            } => {
                out.extend_from_slice(&uid.to_be_bytes())?;
                out.push(*media_type).map_err(|_| ())?;
                put_name(out, name)?;
                let count = u8::try_from(attributes.len()).map_err(|_| ())?;
                out.push(count).map_err(|_| ())?;
                for attr in *attributes {
                    out.extend_from_slice(&attr.id.to_be_bytes())?;
                    put_name(out, attr.value)?;
                }
                Ok(())
            }
        }
    }
}

fn put_name(out: &mut Payload, name: &[u8]) -> Result<(), ()> {
    out.extend_from_slice(&CHARSET_UTF8.to_be_bytes())?;
    let len = u16::try_from(name.len()).map_err(|_| ())?;
    out.extend_from_slice(&len.to_be_bytes())?;
    out.extend_from_slice(name)
}

/// Built folder item response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderItems {
    /// Browsing payload ready to send
    pub payload: Payload,
    /// Items that made it into the response
    pub count: u16,
}

/// Build a GetFolderItems response within `capacity` bytes
///
/// `capacity` is clamped to `MAX_AVRCP_PAYLOAD`.
///
/// # Errors
/// Returns the status to reject with when not a single item could be
/// added: `InternalError` if the first item did not fit, `BadParameter` if
/// it was malformed or the list was empty
pub fn build_folder_items(
    uid_counter: u16,
    items: &[BrowseItem<'_>],
    capacity: usize,
) -> Result<FolderItems, AvrcStatus> {
    let capacity = capacity.min(MAX_AVRCP_PAYLOAD);
    let mut out = Payload::new();
    let header = [
        PduId::GetFolderItems as u8,
        0,
        0,
        AvrcStatus::NoError as u8,
        (uid_counter >> 8) as u8,
        uid_counter as u8,
        0,
        0,
    ];
    out.extend_from_slice(&header)
        .map_err(|()| AvrcStatus::InternalError)?;

    let mut count: u16 = 0;
    let mut failure = AvrcStatus::BadParameter;
    for item in items {
        let left = capacity.saturating_sub(out.len());
        if left <= MIN_FOLDER_ITEMS_LEFT {
            failure = AvrcStatus::InternalError;
            break;
        }
        let Some(body_len) = item.body_len() else {
            failure = AvrcStatus::BadParameter;
            break;
        };
        if HEADER_LEN + body_len > left {
            failure = AvrcStatus::InternalError;
            break;
        }
        let mark = out.len();
        if item.encode(&mut out, body_len).is_err() {
            out.truncate(mark);
            failure = AvrcStatus::InternalError;
            break;
        }
        count += 1;
    }

    if count == 0 {
        debug!("[AVRCP] folder items: nothing added, status {:?}", failure);
        return Err(failure);
    }
    if usize::from(count) < items.len() {
        debug!("[AVRCP] folder items truncated to {} of {}", count, items.len());
    }

    let param_len = (out.len() - HEADER_LEN) as u16;
    out[1..3].copy_from_slice(&param_len.to_be_bytes());
    out[ITEM_COUNT_OFFSET..ITEM_COUNT_OFFSET + 2].copy_from_slice(&count.to_be_bytes());
    Ok(FolderItems { payload: out, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &[u8]) -> BrowseItem<'_> {
        BrowseItem::Folder {
            uid: 1,
            folder_type: 0,
            playable: false,
            name,
        }
    }

    #[test]
    fn test_folder_items_layout() {
        let items = [folder(b"Music")];
        let built = build_folder_items(0x0102, &items, MAX_AVRCP_PAYLOAD).unwrap();
        assert_eq!(built.count, 1);
        let p = &built.payload;
        assert_eq!(p[0], 0x71);
        assert_eq!(usize::from(u16::from_be_bytes([p[1], p[2]])), p.len() - 3);
        assert_eq!(p[3], AvrcStatus::NoError as u8);
        assert_eq!(&p[4..6], &[0x01, 0x02]);
        assert_eq!(&p[6..8], &[0x00, 0x01]);
        assert_eq!(p[8], 0x02);
        assert_eq!(u16::from_be_bytes([p[9], p[10]]), 14 + 5);
    }

    #[test]
    fn test_truncates_at_capacity() {
        let items = [folder(b"aaaaaaaaaa"), folder(b"bbbbbbbbbb"), folder(b"cccccccccc")];
        // header 8 + two items of 3 + 24 bytes
        let built = build_folder_items(0, &items, 8 + 2 * 27 + 10).unwrap();
        assert_eq!(built.count, 2);
        assert_eq!(&built.payload[6..8], &[0, 2]);
    }

    #[test]
    fn test_first_item_not_fitting_fails() {
        let items = [folder(&[b'x'; 100])];
        assert_eq!(build_folder_items(0, &items, 64), Err(AvrcStatus::InternalError));
    }

    #[test]
    fn test_oversized_lengths_refused() {
        let mut out = Payload::new();
        let long = std::vec![b'x'; usize::from(u16::MAX) + 1];
        assert_eq!(put_name(&mut out, &long), Err(()));

        let mut out = Payload::new();
        let item = folder(b"Music");
        assert_eq!(item.encode(&mut out, usize::from(u16::MAX) + 1), Err(()));
        // a length prefix never wraps into a short frame
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_empty_list_fails() {
        assert_eq!(
            build_folder_items(0, &[], MAX_AVRCP_PAYLOAD),
            Err(AvrcStatus::BadParameter)
        );
    }

    #[test]
    fn test_media_item_with_attributes() {
        let attrs = [MediaAttribute { id: 1, value: b"Title" }];
        let items = [BrowseItem::Media {
            uid: 9,
            media_type: 0,
            name: b"Song",
            attributes: &attrs,
        }];
        let built = build_folder_items(0, &items, MAX_AVRCP_PAYLOAD).unwrap();
        let body_len = u16::from_be_bytes([built.payload[9], built.payload[10]]);
        assert_eq!(usize::from(body_len), 14 + 4 + 8 + 5);
        assert_eq!(built.payload.len(), 8 + 3 + usize::from(body_len));
    }
}
