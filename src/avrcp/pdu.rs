//! AVRCP metadata PDU codec
//!
//! Vendor-dependent metadata payloads as handed to and received from the
//! AVCTP collaborator, starting at the PDU id (the company id travels
//! separately):
//!
//! ```text
//! [pdu_id, packet_type, param_len_hi, param_len_lo, params...]
//! ```
//!
//! Commands are built here for the controller procedures, responses are
//! parsed into [`Response`], and inbound commands are screened by
//! [`check_meta_command`] and [`check_pass_through`] before anything reaches
//! the upper layer.

use super::{AvrcStatus, AvrcpError, CapabilityId, EventId, MessageCode, PduId, op};
use crate::constants::{
    MAX_APP_SETTING_VALUES, MAX_APP_SETTINGS, MAX_AVRCP_PAYLOAD, MAX_COMPANY_IDS,
    MAX_SUPPORTED_EVENTS, METADATA_COMPANY_ID, MIN_META_CMD_LEN,
};
use heapless::Vec;

/// Size of the metadata header preceding the parameters
pub const META_HEADER_LEN: usize = 4;

/// Packet type of an unfragmented PDU
const PACKET_SINGLE: u8 = 0x00;

/// Vendor-dependent payload buffer
pub type Payload = Vec<u8, MAX_AVRCP_PAYLOAD>;

/// Player application setting (attribute id, value) pairs
pub type AppSettingValues = Vec<(u8, u8), MAX_APP_SETTINGS>;

/// Metadata header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MetaHeader {
    /// Raw PDU id
    pub pdu: u8,
    /// Fragmentation packet type
    pub packet_type: u8,
    /// Declared parameter length
    pub param_len: u16,
}

/// Split a metadata payload into header and declared parameters
///
/// # Errors
/// Returns `AvrcpError::Malformed` if the payload is shorter than the header
/// or than the declared parameter length
pub fn parse_header(data: &[u8]) -> Result<(MetaHeader, &[u8]), AvrcpError> {
    if data.len() < META_HEADER_LEN {
        return Err(AvrcpError::Malformed);
    }
    let header = MetaHeader {
        pdu: data[0],
        packet_type: data[1],
        param_len: u16::from_be_bytes([data[2], data[3]]),
    };
    let params = data[META_HEADER_LEN..]
        .get(..usize::from(header.param_len))
        .ok_or(AvrcpError::Malformed)?;
    Ok((header, params))
}

fn build(pdu: u8, params: &[u8]) -> Result<Payload, AvrcpError> {
    let len = u16::try_from(params.len()).map_err(|_| AvrcpError::BufferFull)?;
    let mut out = Payload::new();
    out.extend_from_slice(&[pdu, PACKET_SINGLE])
        .map_err(|()| AvrcpError::BufferFull)?;
    out.extend_from_slice(&len.to_be_bytes())
        .map_err(|()| AvrcpError::BufferFull)?;
    out.extend_from_slice(params)
        .map_err(|()| AvrcpError::BufferFull)?;
    Ok(out)
}

/// Incrementally written parameter block
struct Params(Payload);

impl Params {
    const fn new() -> Self {
        Self(Vec::new())
    }

    fn u8(&mut self, value: u8) -> Result<&mut Self, AvrcpError> {
        self.0.push(value).map_err(|_| AvrcpError::BufferFull)?;
        Ok(self)
    }

    fn bytes(&mut self, value: &[u8]) -> Result<&mut Self, AvrcpError> {
        self.0
            .extend_from_slice(value)
            .map_err(|()| AvrcpError::BufferFull)?;
        Ok(self)
    }

    fn finish(&self, pdu: PduId) -> Result<Payload, AvrcpError> {
        build(pdu as u8, &self.0)
    }
}

fn count(len: usize) -> Result<u8, AvrcpError> {
    u8::try_from(len).map_err(|_| AvrcpError::BufferFull)
}

/// GetCapabilities command
///
/// # Errors
/// Never fails in practice; the signature matches the other builders
pub fn get_capabilities(capability: CapabilityId) -> Result<Payload, AvrcpError> {
    build(PduId::GetCapabilities as u8, &[capability as u8])
}

/// RegisterNotification command; `interval` only matters for play position
///
/// # Errors
/// As for [`get_capabilities`]
pub fn register_notification(event: EventId, interval: u32) -> Result<Payload, AvrcpError> {
    let i = interval.to_be_bytes();
    build(
        PduId::RegisterNotification as u8,
        &[event as u8, i[0], i[1], i[2], i[3]],
    )
}

/// ListPlayerApplicationSettingAttributes command
///
/// # Errors
/// As for [`get_capabilities`]
pub fn list_app_attributes() -> Result<Payload, AvrcpError> {
    build(PduId::ListAppAttributes as u8, &[])
}

/// ListPlayerApplicationSettingValues command
///
/// # Errors
/// As for [`get_capabilities`]
pub fn list_app_values(attr: u8) -> Result<Payload, AvrcpError> {
    build(PduId::ListAppValues as u8, &[attr])
}

/// GetCurrentPlayerApplicationSettingValue command
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if too many attributes are given
pub fn get_current_app_values(attrs: &[u8]) -> Result<Payload, AvrcpError> {
    let mut params = Params::new();
    params.u8(count(attrs.len())?)?.bytes(attrs)?;
    params.finish(PduId::GetCurrentAppValues)
}

/// SetPlayerApplicationSettingValue command
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if too many pairs are given
pub fn set_app_values(values: &[(u8, u8)]) -> Result<Payload, AvrcpError> {
    let mut params = Params::new();
    params.u8(count(values.len())?)?;
    for (attr, value) in values {
        params.u8(*attr)?.u8(*value)?;
    }
    params.finish(PduId::SetAppValues)
}

/// GetElementAttributes command for the currently playing element
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if too many attributes are given
pub fn get_element_attributes(attrs: &[u32]) -> Result<Payload, AvrcpError> {
    let mut params = Params::new();
    params.bytes(&[0; 8])?.u8(count(attrs.len())?)?;
    for attr in attrs {
        params.bytes(&attr.to_be_bytes())?;
    }
    params.finish(PduId::GetElementAttributes)
}

/// GetPlayStatus command
///
/// # Errors
/// As for [`get_capabilities`]
pub fn get_play_status() -> Result<Payload, AvrcpError> {
    build(PduId::GetPlayStatus as u8, &[])
}

/// SetAbsoluteVolume command (bit 7 is reserved and cleared)
///
/// # Errors
/// As for [`get_capabilities`]
pub fn set_absolute_volume(volume: u8) -> Result<Payload, AvrcpError> {
    build(PduId::SetAbsoluteVolume as u8, &[volume & crate::constants::MAX_VOLUME])
}

/// Reject response carrying `status`
///
/// # Errors
/// As for [`get_capabilities`]
pub fn reject(pdu: u8, status: AvrcStatus) -> Result<Payload, AvrcpError> {
    build(pdu, &[status as u8])
}

/// GetCapabilities response listing company ids
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if the list is too long
pub fn capabilities_company_ids(ids: &[u32]) -> Result<Payload, AvrcpError> {
    let mut params = Params::new();
    params
        .u8(CapabilityId::CompanyId as u8)?
        .u8(count(ids.len())?)?;
    for id in ids {
        params.bytes(&id.to_be_bytes()[1..])?;
    }
    params.finish(PduId::GetCapabilities)
}

/// GetCapabilities response listing supported events
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if the list is too long
pub fn capabilities_events(events: &[EventId]) -> Result<Payload, AvrcpError> {
    let mut params = Params::new();
    params
        .u8(CapabilityId::EventsSupported as u8)?
        .u8(count(events.len())?)?;
    for event in events {
        params.u8(*event as u8)?;
    }
    params.finish(PduId::GetCapabilities)
}

/// RegisterNotification response for the volume event
///
/// # Errors
/// As for [`get_capabilities`]
pub fn volume_changed(volume: u8) -> Result<Payload, AvrcpError> {
    build(
        PduId::RegisterNotification as u8,
        &[EventId::VolumeChanged as u8, volume & crate::constants::MAX_VOLUME],
    )
}

/// Value carried by a notification response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationValue {
    /// Playback status
    PlayStatus(u8),
    /// UID of the new track (all ones when nothing is selected)
    Track(u64),
    /// Playback position in milliseconds
    PlayPosition(u32),
    /// Changed player application settings
    AppSettings(AppSettingValues),
    /// Absolute volume
    Volume(u8),
    /// Addressed player
    AddressedPlayer {
        /// Player id
        player_id: u16,
        /// UID counter
        uid_counter: u16,
    },
    /// UID counter
    UidCounter(u16),
    /// Event carries no value
    None,
}

/// UID reported when no track is selected
pub const NO_TRACK: u64 = u64::MAX;

/// Parsed metadata response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Company ids supported by the peer
    CompanyIds(Vec<u32, MAX_COMPANY_IDS>),
    /// Events supported by the peer
    Events(Vec<u8, MAX_SUPPORTED_EVENTS>),
    /// Notification (interim or changed)
    Notification {
        /// Raw event id
        event: u8,
        /// Event value
        value: NotificationValue,
    },
    /// Player application setting attributes
    AppAttributes(Vec<u8, MAX_APP_SETTINGS>),
    /// Values of one attribute
    AppValues(Vec<u8, MAX_APP_SETTING_VALUES>),
    /// Current setting values
    CurrentAppValues(AppSettingValues),
    /// SetPlayerApplicationSettingValue acknowledged
    AppValuesSet,
    /// Element attributes, raw parameter block
    ElementAttributes(Payload),
    /// Play status
    PlayStatus {
        /// Track length in ms
        length: u32,
        /// Position in ms
        position: u32,
        /// Playback status
        status: u8,
    },
    /// Volume actually set by the peer
    AbsoluteVolume(u8),
    /// Peer rejected the command, or it timed out locally
    Error(AvrcStatus),
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AvrcpError> {
        if self.data.len() < n {
            return Err(AvrcpError::Malformed);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, AvrcpError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, AvrcpError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, AvrcpError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, AvrcpError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn setting_pairs(&mut self) -> Result<AppSettingValues, AvrcpError> {
        let n = self.u8()?;
        let mut pairs = AppSettingValues::new();
        for _ in 0..n {
            let attr = self.u8()?;
            let value = self.u8()?;
            pairs
                .push((attr, value))
                .map_err(|_| AvrcpError::BufferFull)?;
        }
        Ok(pairs)
    }
}

/// Parse a metadata response
///
/// `Rejected` and `NotImplemented` responses become [`Response::Error`] with
/// the carried status (or `BadCommand` when the peer sent none).
///
/// # Errors
/// Returns `AvrcpError::Malformed` if the payload does not match the PDU, or
/// `AvrcpError::BufferFull` if the peer lists more entries than fit
pub fn parse_response(code: MessageCode, data: &[u8]) -> Result<(u8, Response), AvrcpError> {
    let (header, params) = parse_header(data)?;
    let mut r = Reader { data: params };

    if matches!(code, MessageCode::Rejected | MessageCode::NotImplemented) {
        let status = r.u8().map_or(AvrcStatus::BadCommand, AvrcStatus::from_u8);
        return Ok((header.pdu, Response::Error(status)));
    }

    let pdu = PduId::from_u8(header.pdu).ok_or(AvrcpError::Malformed)?;
    let response = match pdu {
        PduId::GetCapabilities => {
            let capability = r.u8()?;
            let n = r.u8()?;
            if capability == CapabilityId::CompanyId as u8 {
                let mut ids = Vec::new();
                for _ in 0..n {
                    let b = r.take(3)?;
                    ids.push(u32::from_be_bytes([0, b[0], b[1], b[2]]))
                        .map_err(|_| AvrcpError::BufferFull)?;
                }
                Response::CompanyIds(ids)
            } else if capability == CapabilityId::EventsSupported as u8 {
                let mut events = Vec::new();
                for _ in 0..n {
                    events.push(r.u8()?).map_err(|_| AvrcpError::BufferFull)?;
                }
                Response::Events(events)
            } else {
                return Err(AvrcpError::Malformed);
            }
        }
        PduId::RegisterNotification => {
            let event = r.u8()?;
            let value = match EventId::from_u8(event) {
                Some(EventId::PlayStatusChanged) => NotificationValue::PlayStatus(r.u8()?),
                Some(EventId::TrackChanged) => NotificationValue::Track(r.u64()?),
                Some(EventId::PlayPositionChanged) => NotificationValue::PlayPosition(r.u32()?),
                Some(EventId::AppSettingChanged) => {
                    NotificationValue::AppSettings(r.setting_pairs()?)
                }
                Some(EventId::VolumeChanged) => {
                    NotificationValue::Volume(r.u8()? & crate::constants::MAX_VOLUME)
                }
                Some(EventId::AddressedPlayerChanged) => NotificationValue::AddressedPlayer {
                    player_id: r.u16()?,
                    uid_counter: r.u16()?,
                },
                Some(EventId::UidsChanged) => NotificationValue::UidCounter(r.u16()?),
                _ => NotificationValue::None,
            };
            Response::Notification { event, value }
        }
        PduId::ListAppAttributes => {
            let n = r.u8()?;
            let mut attrs = Vec::new();
            for _ in 0..n {
                attrs.push(r.u8()?).map_err(|_| AvrcpError::BufferFull)?;
            }
            Response::AppAttributes(attrs)
        }
        PduId::ListAppValues => {
            let n = r.u8()?;
            let mut values = Vec::new();
            for _ in 0..n {
                values.push(r.u8()?).map_err(|_| AvrcpError::BufferFull)?;
            }
            Response::AppValues(values)
        }
        PduId::GetCurrentAppValues => Response::CurrentAppValues(r.setting_pairs()?),
        PduId::SetAppValues => Response::AppValuesSet,
        PduId::GetElementAttributes => Response::ElementAttributes(
            Vec::from_slice(params).map_err(|()| AvrcpError::BufferFull)?,
        ),
        PduId::GetPlayStatus => Response::PlayStatus {
            length: r.u32()?,
            position: r.u32()?,
            status: r.u8()?,
        },
        PduId::SetAbsoluteVolume => {
            Response::AbsoluteVolume(r.u8()? & crate::constants::MAX_VOLUME)
        }
        PduId::SetAddressedPlayer | PduId::GetFolderItems => {
            Response::Error(AvrcStatus::from_u8(r.u8()?))
        }
    };
    Ok((header.pdu, response))
}

/// What to do with an inbound metadata command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaVerdict {
    /// Hand the command to the upper layer
    Forward,
    /// Answer locally; nothing reaches the upper layer
    Respond {
        /// Response code
        code: MessageCode,
        /// Response payload
        payload: Payload,
    },
}

fn reject_verdict(pdu: u8, status: AvrcStatus) -> Result<MetaVerdict, AvrcpError> {
    Ok(MetaVerdict::Respond {
        code: MessageCode::Rejected,
        payload: reject(pdu, status)?,
    })
}

/// Screen an inbound metadata command
///
/// GetCapabilities is answered from `company_ids`/`events`; RegisterNotification
/// is length- and event-checked; everything else with a valid PDU/command
/// type pairing is forwarded.
///
/// # Errors
/// Returns `AvrcpError::BufferFull` if a local response does not fit
pub fn check_meta_command(
    code: MessageCode,
    data: &[u8],
    company_ids: &[u32],
    events: &[EventId],
) -> Result<MetaVerdict, AvrcpError> {
    let raw_pdu = data.first().copied().unwrap_or(0);
    if MIN_META_CMD_LEN + data.len() > MAX_AVRCP_PAYLOAD {
        warn!("[AVRCP] metadata command too long: {}", data.len());
        return reject_verdict(raw_pdu, AvrcStatus::BadParameter);
    }
    let Some(pdu) = PduId::from_u8(raw_pdu) else {
        return reject_verdict(raw_pdu, AvrcStatus::BadCommand);
    };
    if pdu == PduId::GetFolderItems || pdu.command_type() != code {
        return reject_verdict(raw_pdu, AvrcStatus::BadCommand);
    }
    let param_len = data
        .get(2..4)
        .map_or(0, |b| u16::from_be_bytes([b[0], b[1]]));

    match pdu {
        PduId::GetCapabilities => {
            if data.len() != META_HEADER_LEN + 1 || param_len != 1 {
                return reject_verdict(raw_pdu, AvrcStatus::InternalError);
            }
            let payload = match data[META_HEADER_LEN] {
                c if c == CapabilityId::CompanyId as u8 => capabilities_company_ids(company_ids)?,
                c if c == CapabilityId::EventsSupported as u8 => capabilities_events(events)?,
                _ => return reject_verdict(raw_pdu, AvrcStatus::BadParameter),
            };
            Ok(MetaVerdict::Respond {
                code: MessageCode::Stable,
                payload,
            })
        }
        PduId::RegisterNotification => {
            if data.len() != META_HEADER_LEN + 5 || param_len != 5 {
                return reject_verdict(raw_pdu, AvrcStatus::InternalError);
            }
            let event = data[META_HEADER_LEN];
            if !events.iter().any(|e| *e as u8 == event) {
                debug!("[AVRCP] registration for unsupported event {}", event);
                return reject_verdict(raw_pdu, AvrcStatus::BadParameter);
            }
            Ok(MetaVerdict::Forward)
        }
        _ => Ok(MetaVerdict::Forward),
    }
}

/// Bitmask of accepted pass-through operation ids (16 ids per word)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PassThroughSet(pub [u16; 8]);

impl PassThroughSet {
    /// No operation accepted
    pub const NONE: Self = Self([0; 8]);

    /// Accept `op_id`
    #[must_use]
    pub const fn with(mut self, op_id: u8) -> Self {
        if op_id < 0x80 {
            self.0[(op_id >> 4) as usize] |= 1 << (op_id & 0x0F);
        }
        self
    }

    /// True if `op_id` is accepted
    #[must_use]
    pub const fn supports(&self, op_id: u8) -> bool {
        op_id < 0x80 && self.0[(op_id >> 4) as usize] & (1 << (op_id & 0x0F)) != 0
    }
}

impl Default for PassThroughSet {
    /// Playback and volume keys
    fn default() -> Self {
        Self::NONE
            .with(op::VOLUME_UP)
            .with(op::VOLUME_DOWN)
            .with(op::PLAY)
            .with(op::STOP)
            .with(op::PAUSE)
            .with(op::FORWARD)
            .with(op::BACKWARD)
    }
}

/// Outcome of screening a pass-through command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassThroughVerdict {
    /// Response code sent back to the peer
    pub response: MessageCode,
    /// Command is handed to the upper layer
    pub forward: bool,
}

/// Screen an inbound pass-through command
///
/// `group_navigation` enables the vendor-unique group navigation operation.
#[must_use]
pub fn check_pass_through(
    code: MessageCode,
    op_id: u8,
    data: &[u8],
    supported: &PassThroughSet,
    group_navigation: bool,
) -> PassThroughVerdict {
    let inquiry = code.is_inquiry();
    let response = if op_id == op::VENDOR_UNIQUE {
        group_navigation_response(data, inquiry, group_navigation)
    } else if supported.supports(op_id) {
        if inquiry { MessageCode::Stable } else { MessageCode::Accepted }
    } else {
        MessageCode::NotImplemented
    };
    PassThroughVerdict {
        response,
        forward: response == MessageCode::Accepted,
    }
}

fn group_navigation_response(data: &[u8], inquiry: bool, enabled: bool) -> MessageCode {
    if !enabled || data.len() != 5 {
        return MessageCode::NotImplemented;
    }
    let company = u32::from_be_bytes([0, data[0], data[1], data[2]]);
    let operation = u16::from_be_bytes([data[3], data[4]]);
    if company != METADATA_COMPANY_ID {
        return MessageCode::NotImplemented;
    }
    match (inquiry, operation <= op::PREV_GROUP) {
        (true, true) => MessageCode::Stable,
        (true, false) => MessageCode::NotImplemented,
        (false, true) => MessageCode::Accepted,
        (false, false) => MessageCode::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: [EventId; 2] = [EventId::PlayStatusChanged, EventId::VolumeChanged];

    #[test]
    fn test_register_notification_layout() {
        let cmd = register_notification(EventId::PlayPositionChanged, 2000).unwrap();
        assert_eq!(&cmd[..], &[0x31, 0x00, 0x00, 0x05, 0x05, 0x00, 0x00, 0x07, 0xD0]);
    }

    #[test]
    fn test_get_element_attributes_layout() {
        let cmd = get_element_attributes(&[1, 2]).unwrap();
        assert_eq!(cmd[0], 0x20);
        assert_eq!(u16::from_be_bytes([cmd[2], cmd[3]]), 8 + 1 + 8);
        assert_eq!(cmd[12], 2);
        assert_eq!(&cmd[13..17], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_parse_header_rejects_short_params() {
        assert_eq!(parse_header(&[0x10, 0, 0, 3, 1]), Err(AvrcpError::Malformed));
        assert_eq!(parse_header(&[0x10, 0]), Err(AvrcpError::Malformed));
        let (header, params) = parse_header(&[0x10, 0, 0, 1, 3, 0xAA]).unwrap();
        assert_eq!(header.pdu, 0x10);
        assert_eq!(params, &[3]);
    }

    #[test]
    fn test_parse_capabilities_responses() {
        let rsp = capabilities_company_ids(&[METADATA_COMPANY_ID]).unwrap();
        let (pdu, parsed) = parse_response(MessageCode::Stable, &rsp).unwrap();
        assert_eq!(pdu, PduId::GetCapabilities as u8);
        match parsed {
            Response::CompanyIds(ids) => assert_eq!(&ids[..], &[METADATA_COMPANY_ID]),
            other => panic!("unexpected {other:?}"),
        }

        let rsp = capabilities_events(&EVENTS).unwrap();
        match parse_response(MessageCode::Stable, &rsp).unwrap().1 {
            Response::Events(events) => assert_eq!(&events[..], &[0x01, 0x0D]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification_values() {
        let data = [0x31, 0, 0, 9, 0x02, 0, 0, 0, 0, 0, 0, 0, 7];
        let (_, rsp) = parse_response(MessageCode::Interim, &data).unwrap();
        assert_eq!(
            rsp,
            Response::Notification {
                event: 0x02,
                value: NotificationValue::Track(7)
            }
        );

        let data = [0x31, 0, 0, 2, 0x0D, 0xC5];
        let (_, rsp) = parse_response(MessageCode::Changed, &data).unwrap();
        assert_eq!(
            rsp,
            Response::Notification {
                event: 0x0D,
                value: NotificationValue::Volume(0x45)
            }
        );
    }

    #[test]
    fn test_oversized_lists_refused() {
        let mut rsp = std::vec![0x11, 0, 0, 9, 8];
        rsp.extend(1..=8u8);
        match parse_response(MessageCode::Stable, &rsp).unwrap().1 {
            Response::AppAttributes(attrs) => assert_eq!(attrs.len(), MAX_APP_SETTINGS),
            other => panic!("unexpected {other:?}"),
        }

        let mut rsp = std::vec![0x11, 0, 0, 10, 9];
        rsp.extend(1..=9u8);
        assert_eq!(parse_response(MessageCode::Stable, &rsp), Err(AvrcpError::BufferFull));
    }

    #[test]
    fn test_parse_rejected_response() {
        let rsp = reject(0x31, AvrcStatus::BadParameter).unwrap();
        let (pdu, parsed) = parse_response(MessageCode::Rejected, &rsp).unwrap();
        assert_eq!(pdu, 0x31);
        assert_eq!(parsed, Response::Error(AvrcStatus::BadParameter));

        let (_, parsed) = parse_response(MessageCode::NotImplemented, &[0x50, 0, 0, 0]).unwrap();
        assert_eq!(parsed, Response::Error(AvrcStatus::BadCommand));
    }

    #[test]
    fn test_get_capabilities_answered_locally() {
        let cmd = get_capabilities(CapabilityId::EventsSupported).unwrap();
        let verdict = check_meta_command(MessageCode::Status, &cmd, &[METADATA_COMPANY_ID], &EVENTS).unwrap();
        let MetaVerdict::Respond { code, payload } = verdict else {
            panic!("expected local response");
        };
        assert_eq!(code, MessageCode::Stable);
        assert_eq!(&payload[4..], &[0x03, 2, 0x01, 0x0D]);
    }

    #[test]
    fn test_get_capabilities_bad_id_and_length() {
        let verdict = check_meta_command(MessageCode::Status, &[0x10, 0, 0, 1, 0x07], &[], &EVENTS).unwrap();
        assert_eq!(
            verdict,
            MetaVerdict::Respond {
                code: MessageCode::Rejected,
                payload: reject(0x10, AvrcStatus::BadParameter).unwrap()
            }
        );

        let verdict = check_meta_command(MessageCode::Status, &[0x10, 0, 0, 2, 0x03, 0], &[], &EVENTS).unwrap();
        assert_eq!(
            verdict,
            MetaVerdict::Respond {
                code: MessageCode::Rejected,
                payload: reject(0x10, AvrcStatus::InternalError).unwrap()
            }
        );
    }

    #[test]
    fn test_register_notification_screening() {
        let ok = register_notification(EventId::VolumeChanged, 0).unwrap();
        assert_eq!(
            check_meta_command(MessageCode::Notify, &ok, &[], &EVENTS).unwrap(),
            MetaVerdict::Forward
        );

        let unsupported = register_notification(EventId::TrackChanged, 0).unwrap();
        assert!(matches!(
            check_meta_command(MessageCode::Notify, &unsupported, &[], &EVENTS).unwrap(),
            MetaVerdict::Respond { code: MessageCode::Rejected, .. }
        ));

        // wrong command type for the PDU
        assert_eq!(
            check_meta_command(MessageCode::Status, &ok, &[], &EVENTS).unwrap(),
            MetaVerdict::Respond {
                code: MessageCode::Rejected,
                payload: reject(0x31, AvrcStatus::BadCommand).unwrap()
            }
        );
    }

    #[test]
    fn test_oversized_metadata_command_rejected() {
        let mut data = [0u8; MAX_AVRCP_PAYLOAD - MIN_META_CMD_LEN + 1];
        data[0] = 0x20;
        assert_eq!(
            check_meta_command(MessageCode::Status, &data, &[], &EVENTS).unwrap(),
            MetaVerdict::Respond {
                code: MessageCode::Rejected,
                payload: reject(0x20, AvrcStatus::BadParameter).unwrap()
            }
        );
    }

    #[test]
    fn test_pass_through_screening() {
        let set = PassThroughSet::default();
        let v = check_pass_through(MessageCode::Control, op::PLAY, &[], &set, false);
        assert_eq!(v, PassThroughVerdict { response: MessageCode::Accepted, forward: true });

        let v = check_pass_through(MessageCode::SpecificInquiry, op::PLAY, &[], &set, false);
        assert_eq!(v, PassThroughVerdict { response: MessageCode::Stable, forward: false });

        let v = check_pass_through(MessageCode::Control, 0x20, &[], &set, false);
        assert_eq!(v, PassThroughVerdict { response: MessageCode::NotImplemented, forward: false });
    }

    #[test]
    fn test_group_navigation() {
        let set = PassThroughSet::NONE;
        let next = [0x00, 0x19, 0x58, 0x00, 0x00];
        let bad = [0x00, 0x19, 0x58, 0x00, 0x05];
        assert_eq!(
            check_pass_through(MessageCode::Control, op::VENDOR_UNIQUE, &next, &set, true).response,
            MessageCode::Accepted
        );
        assert_eq!(
            check_pass_through(MessageCode::Control, op::VENDOR_UNIQUE, &bad, &set, true).response,
            MessageCode::Rejected
        );
        assert_eq!(
            check_pass_through(MessageCode::Control, op::VENDOR_UNIQUE, &next, &set, false).response,
            MessageCode::NotImplemented
        );
    }
}
