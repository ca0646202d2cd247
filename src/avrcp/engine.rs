//! AVRCP controller engine
//!
//! Drives the controller side of every connected peer target: capability
//! discovery, the chain of notification registrations, the one-time bring-up
//! that follows it, absolute volume and the commands issued on behalf of the
//! upper layer.
//!
//! Responses come back through [`RcEngine::handle_vendor_response`] and
//! [`RcEngine::handle_pass_through_response`]. An expired transaction timer
//! reaches [`RcEngine::handle_timeout`], which turns it into a `Timeout`
//! status and runs it through the same handlers as a reject from the peer.
//!
//! ## Subscription chain
//!
//! ```text
//! GetCapabilities(company) -> GetCapabilities(events) -> Register(e1)
//!   interim(e1) -> Register(e2) -> ... -> interim(en)
//!   -> [ListAppAttributes -> ListAppValues* -> GetCurrentAppValues]
//!   -> GetElementAttributes (once per connection)
//! ```

use super::pdu::{self, NO_TRACK, NotificationValue, Payload, Response};
use super::{
    AppSetting, AvrcStatus, AvrcpError, CapabilityId, CommandKind, DeviceControlBlock,
    DeviceTable, EventId, MessageCode, PduId, Transaction, TransactionPool,
};
use crate::config::{AvFeatures, AvOptions};
use crate::constants::{
    MAX_APP_SETTING_VALUES, MAX_APP_SETTINGS, MAX_TRANSACTION_LABELS, MAX_VOLUME,
    METADATA_COMPANY_ID, PLAY_POSITION_INTERVAL,
};
use crate::events::UpperEvent;
use crate::handle::{Label, RcHandle};
use crate::interfaces::{AvrcpTransport, TimerKind, TimerService, TimerToken, UpperCallback};
use crate::timer::TimerTable;
use crate::{AvError, BluetoothAddress};
use core::time::Duration;
use heapless::Vec;

/// Element attributes fetched for the track now playing: title, artist,
/// album, track number, number of tracks, genre, playing time
pub const TRACK_ATTRIBUTES: [u32; 7] = [1, 2, 3, 4, 5, 6, 7];

/// First extended player application setting attribute
const FIRST_EXTENDED_APP_ATTR: u8 = 0x80;

const PLAY_STATUS_PLAYING: u8 = 0x01;

/// Collaborators the engine drives
pub trait RcPlatform: AvrcpTransport + TimerService + UpperCallback {}

impl<T> RcPlatform for T where T: AvrcpTransport + TimerService + UpperCallback {}

type Parsed = Result<(u8, Response), AvrcpError>;

/// Controller state of every connected AVRCP peer
#[derive(Debug)]
pub struct RcEngine {
    devices: DeviceTable,
    pool: TransactionPool,
    timers: TimerTable<MAX_TRANSACTION_LABELS>,
    local_features: AvFeatures,
    status_timeout: Duration,
    control_timeout: Duration,
    interim_timeout: Duration,
    absolute_volume_disabled: bool,
}

impl Default for RcEngine {
    fn default() -> Self {
        Self::new(&AvOptions::default())
    }
}

impl RcEngine {
    /// Engine with no connected peer
    #[must_use]
    pub fn new(options: &AvOptions) -> Self {
        Self {
            devices: DeviceTable::new(),
            pool: TransactionPool::new(),
            timers: TimerTable::new(),
            local_features: options.features,
            status_timeout: options.status_command_timeout,
            control_timeout: options.control_command_timeout,
            interim_timeout: options.interim_timeout,
            absolute_volume_disabled: options.absolute_volume_disabled,
        }
    }

    /// Apply a new configuration; connected peers are kept
    pub fn configure(&mut self, options: &AvOptions) {
        self.local_features = options.features;
        self.status_timeout = options.status_command_timeout;
        self.control_timeout = options.control_command_timeout;
        self.interim_timeout = options.interim_timeout;
        self.absolute_volume_disabled = options.absolute_volume_disabled;
    }

    /// Control block of `peer`
    #[must_use]
    pub fn device(&self, peer: &BluetoothAddress) -> Option<&DeviceControlBlock> {
        self.devices.by_addr(peer)
    }

    /// Control block of the peer on `handle`
    #[must_use]
    pub fn device_by_handle(&self, handle: RcHandle) -> Option<&DeviceControlBlock> {
        self.devices.by_handle(handle)
    }

    /// Transactions waiting for a response
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pool.in_use()
    }

    /// Control channel to `peer` is up
    pub fn connected<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        peer: BluetoothAddress,
        features: AvFeatures,
    ) {
        debug!("[AVRCP] {:?} connected, features {:?}", handle, features);
        if !self
            .devices
            .insert(DeviceControlBlock::connected(handle, peer, features))
        {
            error!("[AVRCP] device table full, {:?} not tracked", handle);
            return;
        }
        self.start_procedures(p, handle);
    }

    /// Peer features learned or changed
    pub fn features_changed<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        features: AvFeatures,
    ) {
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            warn!("[AVRCP] features for unknown {:?}", handle);
            return;
        };
        dev.features = features;
        self.start_procedures(p, handle);
    }

    /// Browsing channel opened or closed
    pub fn browse_changed(&mut self, handle: RcHandle, connected: bool) {
        if let Some(dev) = self.devices.by_handle_mut(handle) {
            dev.browse_connected = connected;
        }
    }

    /// Control channel closed; every pending transaction on it is dropped
    pub fn disconnected<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
    ) -> Option<DeviceControlBlock> {
        let labels: Vec<Label, MAX_TRANSACTION_LABELS> = self.pool.labels_for(handle).collect();
        for label in labels {
            self.finish(p, label);
        }
        self.devices.remove(handle)
    }

    /// Forget every peer and pending transaction
    pub fn reset<P: RcPlatform>(&mut self, p: &mut P) {
        self.timers.cancel_all(p);
        self.pool = TransactionPool::new();
        self.devices.clear();
    }

    fn volume_allowed(&self, peer: AvFeatures) -> bool {
        !self.absolute_volume_disabled
            && self.local_features.any(AvFeatures::ADV_CTRL)
            && peer.supports(AvFeatures::RCTG | AvFeatures::ADV_CTRL)
    }

    fn start_procedures<P: RcPlatform>(&mut self, p: &mut P, handle: RcHandle) {
        let Some(dev) = self.devices.by_handle(handle) else {
            return;
        };
        let features = dev.features;
        let query = !dev.capabilities_requested
            && features.supports(AvFeatures::RCTG | AvFeatures::METADATA)
            && self.local_features.any(AvFeatures::RCCT);

        if self.volume_allowed(features) {
            if let Err(e) = self.register_volume(p, handle) {
                warn!("[AVRCP] volume registration on {:?} failed: {:?}", handle, e);
            }
        }
        if query {
            if let Some(dev) = self.devices.by_handle_mut(handle) {
                dev.capabilities_requested = true;
            }
            if let Err(e) = self.query_capabilities(p, handle, CapabilityId::CompanyId) {
                warn!("[AVRCP] capability query on {:?} failed: {:?}", handle, e);
            }
        }
    }

    fn handle_of(&self, peer: &BluetoothAddress) -> Result<RcHandle, AvrcpError> {
        self.devices
            .by_addr(peer)
            .map(|d| d.handle)
            .ok_or(AvrcpError::NotConnected)
    }

    fn issue<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        kind: CommandKind,
        timeout: Duration,
        send: impl FnOnce(&mut P, Label) -> Result<(), AvError>,
    ) -> Result<Label, AvrcpError> {
        let peer = self
            .devices
            .by_handle(handle)
            .ok_or(AvrcpError::NotConnected)?
            .peer;
        let label = self.pool.reserve(Transaction { handle, peer, kind })?;
        if let Err(e) = send(p, label) {
            warn!("[AVRCP] {:?} not sent: {:?}", kind, e);
            self.pool.release(label);
            return Err(AvrcpError::NotConnected);
        }
        self.timers
            .arm(p, TimerKind::AvrcpTransaction(label), timeout);
        Ok(label)
    }

    fn send_metadata<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        kind: CommandKind,
        payload: &[u8],
    ) -> Result<Label, AvrcpError> {
        let (code, timeout) = match kind {
            CommandKind::Notification(_) => (MessageCode::Notify, self.interim_timeout),
            CommandKind::Control(_) => (MessageCode::Control, self.control_timeout),
            _ => (MessageCode::Status, self.status_timeout),
        };
        self.issue(p, handle, kind, timeout, |p, label| {
            p.send_vendor(handle, label, code, METADATA_COMPANY_ID, payload)
        })
    }

    fn finish<P: TimerService>(&mut self, p: &mut P, label: Label) {
        self.timers.cancel(p, TimerKind::AvrcpTransaction(label));
        self.pool.release(label);
    }

    fn query_capabilities<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        capability: CapabilityId,
    ) -> Result<Label, AvrcpError> {
        let payload = pdu::get_capabilities(capability)?;
        self.send_metadata(
            p,
            handle,
            CommandKind::Status(PduId::GetCapabilities),
            &payload,
        )
    }

    fn request_track_info<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
    ) -> Result<Label, AvrcpError> {
        let payload = pdu::get_element_attributes(&TRACK_ATTRIBUTES)?;
        self.send_metadata(
            p,
            handle,
            CommandKind::Status(PduId::GetElementAttributes),
            &payload,
        )
    }

    fn request_play_status<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
    ) -> Result<Label, AvrcpError> {
        let payload = pdu::get_play_status()?;
        self.send_metadata(p, handle, CommandKind::Status(PduId::GetPlayStatus), &payload)
    }

    fn request_app_attributes<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
    ) -> Result<Label, AvrcpError> {
        if let Some(dev) = self.devices.by_handle_mut(handle) {
            dev.app_settings.attrs.clear();
            dev.app_settings.cursor = 0;
        }
        let payload = pdu::list_app_attributes()?;
        self.send_metadata(
            p,
            handle,
            CommandKind::Status(PduId::ListAppAttributes),
            &payload,
        )
    }

    fn request_app_values<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        attr: u8,
    ) -> Result<Label, AvrcpError> {
        let payload = pdu::list_app_values(attr)?;
        self.send_metadata(p, handle, CommandKind::Status(PduId::ListAppValues), &payload)
    }

    fn register_volume<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
    ) -> Result<Option<Label>, AvrcpError> {
        let dev = self
            .devices
            .by_handle(handle)
            .ok_or(AvrcpError::NotConnected)?;
        if !self.volume_allowed(dev.features) {
            return Err(AvrcpError::NotSupported);
        }
        if dev
            .volume_label
            .is_some_and(|label| self.pool.get(label).is_some())
        {
            return Ok(None);
        }
        let payload = pdu::register_notification(EventId::VolumeChanged, 0)?;
        let label = self.send_metadata(
            p,
            handle,
            CommandKind::Notification(EventId::VolumeChanged),
            &payload,
        )?;
        if let Some(dev) = self.devices.by_handle_mut(handle) {
            dev.volume_label = Some(label);
        }
        Ok(Some(label))
    }

    /// Set the absolute volume of a peer target
    ///
    /// Returns `Ok(None)` without sending anything when the peer already
    /// reported this volume.
    ///
    /// # Errors
    /// Returns `AvrcpError::NotConnected` for an unknown peer,
    /// `AvrcpError::NotSupported` if absolute volume is unavailable and
    /// `AvrcpError::NoLabels` when every label is in use
    pub fn set_absolute_volume<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
        volume: u8,
    ) -> Result<Option<Label>, AvrcpError> {
        let volume = volume & MAX_VOLUME;
        let dev = self.devices.by_addr(peer).ok_or(AvrcpError::NotConnected)?;
        if !self.volume_allowed(dev.features) {
            return Err(AvrcpError::NotSupported);
        }
        if dev.volume == Some(volume) {
            debug!("[AVRCP] volume {} already set", volume);
            return Ok(None);
        }
        let handle = dev.handle;
        let payload = pdu::set_absolute_volume(volume)?;
        self.send_metadata(
            p,
            handle,
            CommandKind::Control(PduId::SetAbsoluteVolume),
            &payload,
        )
        .map(Some)
    }

    /// Subscribe to volume changes of a peer target
    ///
    /// Returns `Ok(None)` if a registration is already pending.
    ///
    /// # Errors
    /// As for [`RcEngine::set_absolute_volume`]
    pub fn register_volume_changed<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
    ) -> Result<Option<Label>, AvrcpError> {
        let handle = self.handle_of(peer)?;
        self.register_volume(p, handle)
    }

    /// Fetch the attributes of the track now playing
    ///
    /// # Errors
    /// Returns `AvrcpError::NotConnected` for an unknown peer and
    /// `AvrcpError::NoLabels` when every label is in use
    pub fn get_element_attributes<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
    ) -> Result<Label, AvrcpError> {
        let handle = self.handle_of(peer)?;
        self.request_track_info(p, handle)
    }

    /// Fetch the play status
    ///
    /// # Errors
    /// As for [`RcEngine::get_element_attributes`]
    pub fn get_play_status<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
    ) -> Result<Label, AvrcpError> {
        let handle = self.handle_of(peer)?;
        self.request_play_status(p, handle)
    }

    /// Query the player application settings and their current values
    ///
    /// # Errors
    /// As for [`RcEngine::get_element_attributes`]
    pub fn list_app_settings<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
    ) -> Result<Label, AvrcpError> {
        let handle = self.handle_of(peer)?;
        self.request_app_attributes(p, handle)
    }

    /// Change player application settings
    ///
    /// # Errors
    /// As for [`RcEngine::get_element_attributes`]
    pub fn set_app_settings<P: RcPlatform>(
        &mut self,
        p: &mut P,
        peer: &BluetoothAddress,
        values: &[(u8, u8)],
    ) -> Result<Label, AvrcpError> {
        let handle = self.handle_of(peer)?;
        let payload = pdu::set_app_values(values)?;
        self.send_metadata(p, handle, CommandKind::Control(PduId::SetAppValues), &payload)
    }

    /// Send a pass-through command
    ///
    /// # Errors
    /// As for [`RcEngine::get_element_attributes`]
    pub fn send_pass_through<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        op_id: u8,
        pressed: bool,
    ) -> Result<Label, AvrcpError> {
        let timeout = self.control_timeout;
        self.issue(p, handle, CommandKind::PassThrough(op_id), timeout, |p, label| {
            p.send_pass_through(handle, label, op_id, pressed)
        })
    }

    /// Send a vendor-dependent command on behalf of the upper layer
    ///
    /// # Errors
    /// As for [`RcEngine::get_element_attributes`]
    pub fn send_vendor_command<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        code: MessageCode,
        company_id: u32,
        data: &[u8],
    ) -> Result<Label, AvrcpError> {
        let timeout = if code == MessageCode::Control {
            self.control_timeout
        } else {
            self.status_timeout
        };
        self.issue(p, handle, CommandKind::Vendor, timeout, |p, label| {
            p.send_vendor(handle, label, code, company_id, data)
        })
    }

    /// Record the volume the local target reported in its own response
    ///
    /// Only a CHANGED volume notification or an ACCEPTED SetAbsoluteVolume
    /// updates the cache.
    pub fn local_response(&mut self, handle: RcHandle, code: MessageCode, data: &[u8]) {
        let Ok((_, response)) = pdu::parse_response(code, data) else {
            return;
        };
        let volume = match (code, response) {
            (
                MessageCode::Changed,
                Response::Notification {
                    value: NotificationValue::Volume(volume),
                    ..
                },
            )
            | (MessageCode::Accepted, Response::AbsoluteVolume(volume)) => volume,
            _ => return,
        };
        if let Some(dev) = self.devices.by_handle_mut(handle) {
            dev.volume = Some(volume);
        }
    }

    /// Pass-through response from a peer
    pub fn handle_pass_through_response<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        label: Label,
        code: MessageCode,
        op_id: u8,
        pressed: bool,
    ) {
        let pending = self.pool.get(label).is_some_and(|t| {
            t.handle == handle && matches!(t.kind, CommandKind::PassThrough(_))
        });
        if !pending {
            debug!("[AVRCP] pass-through response on free label {}", label.get());
            return;
        }
        self.finish(p, label);
        p.deliver(UpperEvent::RemoteResponse {
            rc: handle,
            label,
            code,
            op_id,
            pressed,
        });
    }

    /// Vendor-dependent response from a peer
    pub fn handle_vendor_response<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        label: Label,
        code: MessageCode,
        data: &[u8],
    ) {
        let Some(txn) = self.pool.get(label).copied() else {
            debug!("[AVRCP] response on free label {}", label.get());
            return;
        };
        if txn.handle != handle {
            warn!("[AVRCP] label {} belongs to {:?}", label.get(), txn.handle);
            return;
        }
        match txn.kind {
            CommandKind::Vendor => {
                self.finish(p, label);
                let Ok(data) = Payload::from_slice(data) else {
                    warn!("[AVRCP] vendor response of {} bytes does not fit", data.len());
                    p.deliver(UpperEvent::CommandRejected {
                        peer: txn.peer,
                        pdu: None,
                        status: AvrcStatus::InternalError,
                    });
                    return;
                };
                p.deliver(UpperEvent::VendorResponse {
                    rc: handle,
                    label,
                    code,
                    data,
                });
            }
            CommandKind::PassThrough(_) => {
                warn!("[AVRCP] vendor response on pass-through label {}", label.get());
            }
            CommandKind::Notification(event) => {
                let parsed = pdu::parse_response(code, data);
                self.on_notification(p, label, txn, event, code, parsed);
            }
            CommandKind::Status(id) | CommandKind::Control(id) => {
                let parsed = pdu::parse_response(code, data);
                self.finish(p, label);
                self.on_result(p, txn, id, code, parsed);
            }
        }
    }

    /// Transaction timer expired
    ///
    /// Returns false if the token is not an AVRCP transaction timer.
    pub fn handle_timeout<P: RcPlatform>(&mut self, p: &mut P, token: TimerToken) -> bool {
        let TimerKind::AvrcpTransaction(label) = token.kind else {
            return false;
        };
        if !self.timers.expire(token) {
            return true;
        }
        let Some(txn) = self.pool.release(label) else {
            return true;
        };
        warn!("[AVRCP] label {} timed out: {:?}", label.get(), txn.kind);

        let timed_out: Parsed = Ok((0, Response::Error(AvrcStatus::Timeout)));
        match txn.kind {
            CommandKind::Notification(event) => {
                self.on_notification(p, label, txn, event, MessageCode::Rejected, timed_out);
            }
            CommandKind::Status(id) | CommandKind::Control(id) => {
                self.on_result(p, txn, id, MessageCode::Rejected, timed_out);
            }
            CommandKind::PassThrough(_) | CommandKind::Vendor => {
                p.deliver(UpperEvent::CommandTimeout {
                    peer: txn.peer,
                    pdu: None,
                    event: None,
                });
            }
        }
        true
    }

    fn on_notification<P: RcPlatform>(
        &mut self,
        p: &mut P,
        label: Label,
        txn: Transaction,
        event: EventId,
        code: MessageCode,
        parsed: Parsed,
    ) {
        if event == EventId::VolumeChanged {
            self.on_volume_notification(p, label, txn, code, parsed);
            return;
        }
        match parsed {
            Ok((_, Response::Notification { event: raw, value })) if raw == event as u8 => {
                match code {
                    MessageCode::Interim => self.on_interim(p, label, txn, event, value),
                    MessageCode::Changed => self.on_changed(p, label, txn, event, value),
                    _ => warn!("[AVRCP] {:?} notification with code {:?}", event, code),
                }
            }
            Ok((_, Response::Error(status))) => self.drop_event(p, label, txn, event, status),
            Ok(_) | Err(_) => {
                warn!("[AVRCP] malformed {:?} notification", event);
                self.drop_event(p, label, txn, event, AvrcStatus::InternalError);
            }
        }
    }

    fn on_interim<P: RcPlatform>(
        &mut self,
        p: &mut P,
        label: Label,
        txn: Transaction,
        event: EventId,
        value: NotificationValue,
    ) {
        // the label stays with the registration until the change arrives
        self.timers.cancel(p, TimerKind::AvrcpTransaction(label));
        let handle = txn.handle;
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        dev.notifications.mark_interim(event);
        let track = match &value {
            NotificationValue::Track(uid) if *uid != NO_TRACK => {
                dev.playing_uid = *uid;
                true
            }
            _ => false,
        };
        p.deliver(UpperEvent::Notification {
            peer: txn.peer,
            event,
            value,
            interim: true,
        });

        if event == EventId::PlayStatusChanged || track {
            if let Err(e) = self.request_play_status(p, handle) {
                warn!("[AVRCP] play status request failed: {:?}", e);
            }
        }
        self.register_next(p, handle);
    }

    fn on_changed<P: RcPlatform>(
        &mut self,
        p: &mut P,
        label: Label,
        txn: Transaction,
        event: EventId,
        value: NotificationValue,
    ) {
        self.finish(p, label);
        let handle = txn.handle;
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        dev.notifications.mark_changed(event);
        let fetch_track = match &value {
            NotificationValue::PlayStatus(status) => *status == PLAY_STATUS_PLAYING,
            NotificationValue::Track(uid) if *uid != NO_TRACK => {
                dev.playing_uid = *uid;
                true
            }
            NotificationValue::AppSettings(values) => {
                dev.app_settings.current.clone_from(values);
                false
            }
            _ => false,
        };

        self.register(p, handle, event);
        p.deliver(UpperEvent::Notification {
            peer: txn.peer,
            event,
            value,
            interim: false,
        });
        if fetch_track {
            if let Err(e) = self.request_track_info(p, handle) {
                warn!("[AVRCP] track info request failed: {:?}", e);
            }
        }
    }

    fn drop_event<P: RcPlatform>(
        &mut self,
        p: &mut P,
        label: Label,
        txn: Transaction,
        event: EventId,
        status: AvrcStatus,
    ) {
        self.finish(p, label);
        if let Some(dev) = self.devices.by_handle_mut(txn.handle) {
            dev.notifications.remove(event);
        }
        p.deliver(failure(
            txn.peer,
            PduId::RegisterNotification,
            Some(event),
            status,
        ));
        self.register_next(p, txn.handle);
    }

    fn register<P: RcPlatform>(&mut self, p: &mut P, handle: RcHandle, event: EventId) {
        let interval = if event == EventId::PlayPositionChanged {
            PLAY_POSITION_INTERVAL
        } else {
            0
        };
        let sent = pdu::register_notification(event, interval).and_then(|payload| {
            self.send_metadata(p, handle, CommandKind::Notification(event), &payload)
        });
        match sent {
            Ok(label) => {
                if let Some(dev) = self.devices.by_handle_mut(handle) {
                    dev.notifications.mark_registered(event, label);
                }
            }
            Err(e) => warn!("[AVRCP] register {:?} failed: {:?}", event, e),
        }
    }

    /// Register the next pending event, or start the bring-up once all are in
    fn register_next<P: RcPlatform>(&mut self, p: &mut P, handle: RcHandle) {
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        if let Some(event) = dev.notifications.next_unregistered() {
            self.register(p, handle, event);
            return;
        }
        if dev.app_settings.query_started {
            return;
        }
        dev.app_settings.query_started = true;
        if dev.features.any(AvFeatures::APP_SETTING) {
            match self.request_app_attributes(p, handle) {
                Ok(_) => return,
                Err(e) => warn!("[AVRCP] app settings query failed: {:?}", e),
            }
        }
        self.procedure_complete(p, handle);
    }

    fn procedure_complete<P: RcPlatform>(&mut self, p: &mut P, handle: RcHandle) {
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        if dev.procedure_complete {
            return;
        }
        dev.procedure_complete = true;
        debug!("[AVRCP] {:?} bring-up complete", handle);
        if let Err(e) = self.request_track_info(p, handle) {
            warn!("[AVRCP] track info request failed: {:?}", e);
        }
    }

    fn on_volume_notification<P: RcPlatform>(
        &mut self,
        p: &mut P,
        label: Label,
        txn: Transaction,
        code: MessageCode,
        parsed: Parsed,
    ) {
        let handle = txn.handle;
        let expected = self.devices.by_handle(handle).and_then(|d| d.volume_label);
        if expected != Some(label) {
            debug!("[AVRCP] volume response on label {} discarded", label.get());
            self.finish(p, label);
            return;
        }

        match parsed {
            Ok((
                _,
                Response::Notification {
                    value: NotificationValue::Volume(volume),
                    ..
                },
            )) => match code {
                MessageCode::Interim => {
                    self.timers.cancel(p, TimerKind::AvrcpTransaction(label));
                    p.deliver(UpperEvent::VolumeChanged {
                        peer: txn.peer,
                        volume,
                        code,
                    });
                }
                MessageCode::Changed => {
                    self.finish(p, label);
                    if let Some(dev) = self.devices.by_handle_mut(handle) {
                        dev.volume = Some(volume);
                        dev.volume_label = None;
                    }
                    if let Err(e) = self.register_volume(p, handle) {
                        warn!("[AVRCP] volume re-registration failed: {:?}", e);
                    }
                    p.deliver(UpperEvent::VolumeChanged {
                        peer: txn.peer,
                        volume,
                        code,
                    });
                }
                _ => warn!("[AVRCP] volume notification with code {:?}", code),
            },
            Ok((_, Response::Error(status))) => {
                self.finish(p, label);
                self.volume_failed(p, txn, status);
            }
            Ok(_) | Err(_) => {
                warn!("[AVRCP] malformed volume notification");
                self.finish(p, label);
                self.volume_failed(p, txn, AvrcStatus::InternalError);
            }
        }
    }

    /// A refused volume registration turns absolute volume off for the connection
    fn volume_failed<P: RcPlatform>(&mut self, p: &mut P, txn: Transaction, status: AvrcStatus) {
        let Some(dev) = self.devices.by_handle_mut(txn.handle) else {
            return;
        };
        dev.volume_label = None;
        if status == AvrcStatus::Timeout {
            p.deliver(failure(
                txn.peer,
                PduId::RegisterNotification,
                Some(EventId::VolumeChanged),
                status,
            ));
            return;
        }
        warn!("[AVRCP] {:?} refused volume registration: {:?}", txn.handle, status);
        dev.features = dev.features.without(AvFeatures::ADV_CTRL);
        let features = dev.features;
        p.deliver(UpperEvent::RcFeatures {
            rc: txn.handle,
            peer: txn.peer,
            features,
        });
    }

    fn on_result<P: RcPlatform>(
        &mut self,
        p: &mut P,
        txn: Transaction,
        id: PduId,
        code: MessageCode,
        parsed: Parsed,
    ) {
        let handle = txn.handle;
        let peer = txn.peer;
        let response = match parsed {
            Ok((_, response)) => response,
            Err(e) => {
                warn!("[AVRCP] malformed {:?} response: {:?}", id, e);
                Response::Error(AvrcStatus::InternalError)
            }
        };

        match response {
            Response::Error(status) => {
                p.deliver(failure(peer, id, None, status));
                // skip forward so the bring-up still completes
                if matches!(
                    id,
                    PduId::ListAppAttributes | PduId::ListAppValues | PduId::GetCurrentAppValues
                ) {
                    self.procedure_complete(p, handle);
                }
            }
            Response::CompanyIds(_) => {
                if let Err(e) = self.query_capabilities(p, handle, CapabilityId::EventsSupported)
                {
                    warn!("[AVRCP] event query failed: {:?}", e);
                }
            }
            Response::Events(events) => {
                let Some(dev) = self.devices.by_handle_mut(handle) else {
                    return;
                };
                let kept = dev.notifications.populate(&events);
                debug!("[AVRCP] {:?} subscribing to {} events", handle, kept);
                self.register_next(p, handle);
            }
            Response::AppAttributes(attrs) => self.on_app_attributes(p, handle, &attrs),
            Response::AppValues(values) => self.on_app_values(p, handle, values),
            Response::CurrentAppValues(values) => {
                if let Some(dev) = self.devices.by_handle_mut(handle) {
                    dev.app_settings.current.clone_from(&values);
                }
                p.deliver(UpperEvent::AppSettings { peer, values });
                self.procedure_complete(p, handle);
            }
            Response::AppValuesSet => debug!("[AVRCP] {:?} settings applied", handle),
            Response::ElementAttributes(data) => p.deliver(UpperEvent::TrackInfo { peer, data }),
            Response::PlayStatus {
                length,
                position,
                status,
            } => p.deliver(UpperEvent::PlayStatus {
                peer,
                length,
                position,
                status,
            }),
            Response::AbsoluteVolume(volume) => {
                if code == MessageCode::Accepted {
                    if let Some(dev) = self.devices.by_handle_mut(handle) {
                        dev.volume = Some(volume);
                    }
                }
                p.deliver(UpperEvent::VolumeChanged { peer, volume, code });
            }
            Response::Notification { .. } => {
                warn!("[AVRCP] notification answering {:?}", id);
            }
        }
    }

    fn on_app_attributes<P: RcPlatform>(&mut self, p: &mut P, handle: RcHandle, attrs: &[u8]) {
        let list = match app_setting_list(attrs) {
            Ok(list) => list,
            Err(e) => {
                warn!("[AVRCP] {:?} app attribute list unusable: {:?}", handle, e);
                self.procedure_complete(p, handle);
                return;
            }
        };
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        let settings = &mut dev.app_settings;
        settings.attrs = list;
        settings.cursor = 0;
        let first = settings.attrs.first().map(|s| s.attr);

        match first {
            Some(attr) => {
                if let Err(e) = self.request_app_values(p, handle, attr) {
                    warn!("[AVRCP] app values query failed: {:?}", e);
                    self.procedure_complete(p, handle);
                }
            }
            None => self.procedure_complete(p, handle),
        }
    }

    fn on_app_values<P: RcPlatform>(
        &mut self,
        p: &mut P,
        handle: RcHandle,
        values: Vec<u8, MAX_APP_SETTING_VALUES>,
    ) {
        let Some(dev) = self.devices.by_handle_mut(handle) else {
            return;
        };
        let peer = dev.peer;
        let settings = &mut dev.app_settings;
        if let Some(setting) = settings.attrs.get_mut(settings.cursor) {
            setting.values = values;
        }
        settings.cursor += 1;
        if let Some(next) = settings.attrs.get(settings.cursor).map(|s| s.attr) {
            if let Err(e) = self.request_app_values(p, handle, next) {
                warn!("[AVRCP] app values query failed: {:?}", e);
                self.procedure_complete(p, handle);
            }
            return;
        }

        let attrs = settings.attrs.clone();
        let ids: Vec<u8, MAX_APP_SETTINGS> = attrs.iter().map(|s| s.attr).collect();
        p.deliver(UpperEvent::AppSettingAttributes { peer, attrs });
        let sent = pdu::get_current_app_values(&ids).and_then(|payload| {
            self.send_metadata(
                p,
                handle,
                CommandKind::Status(PduId::GetCurrentAppValues),
                &payload,
            )
        });
        if let Err(e) = sent {
            warn!("[AVRCP] current values query failed: {:?}", e);
            self.procedure_complete(p, handle);
        }
    }
}

fn failure(
    peer: BluetoothAddress,
    pdu: PduId,
    event: Option<EventId>,
    status: AvrcStatus,
) -> UpperEvent {
    if status == AvrcStatus::Timeout {
        UpperEvent::CommandTimeout {
            peer,
            pdu: Some(pdu),
            event,
        }
    } else {
        UpperEvent::CommandRejected {
            peer,
            pdu: Some(pdu),
            status,
        }
    }
}

/// Player settings to query, extended attributes left out
fn app_setting_list(attrs: &[u8]) -> Result<Vec<AppSetting, MAX_APP_SETTINGS>, AvrcpError> {
    let mut list = Vec::new();
    for attr in attrs
        .iter()
        .copied()
        .filter(|a| *a < FIRST_EXTENDED_APP_ATTR)
    {
        list.push(AppSetting {
            attr,
            values: Vec::new(),
        })
        .map_err(|_| AvrcpError::BufferFull)?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avrcp::op;
    use crate::interfaces::RcRole;

    const PEER: BluetoothAddress = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);
    const RC: RcHandle = RcHandle(3);

    #[derive(Default)]
    struct Mock {
        sent: std::vec::Vec<(Label, MessageCode, std::vec::Vec<u8>)>,
        pass_through: std::vec::Vec<(Label, u8, bool)>,
        armed: std::vec::Vec<TimerToken>,
        cancelled: std::vec::Vec<TimerToken>,
        upper: std::vec::Vec<UpperEvent>,
    }

    impl AvrcpTransport for Mock {
        fn open_rc(
            &mut self,
            _role: RcRole,
            _peer: Option<BluetoothAddress>,
        ) -> Result<RcHandle, AvError> {
            Ok(RC)
        }
        fn close_rc(&mut self, _handle: RcHandle) {}
        fn open_browse(&mut self, _handle: RcHandle) {}
        fn close_browse(&mut self, _handle: RcHandle) {}
        fn send_pass_through(
            &mut self,
            _handle: RcHandle,
            label: Label,
            op_id: u8,
            pressed: bool,
        ) -> Result<(), AvError> {
            self.pass_through.push((label, op_id, pressed));
            Ok(())
        }
        fn respond_pass_through(
            &mut self,
            _handle: RcHandle,
            _label: Label,
            _code: MessageCode,
            _op_id: u8,
            _pressed: bool,
        ) {
        }
        fn send_vendor(
            &mut self,
            _handle: RcHandle,
            label: Label,
            code: MessageCode,
            _company_id: u32,
            data: &[u8],
        ) -> Result<(), AvError> {
            self.sent.push((label, code, data.to_vec()));
            Ok(())
        }
        fn respond_vendor(
            &mut self,
            _handle: RcHandle,
            _label: Label,
            _code: MessageCode,
            _company_id: u32,
            _data: &[u8],
        ) {
        }
        fn respond_browse(&mut self, _handle: RcHandle, _label: Label, _data: &[u8]) {}
    }

    impl TimerService for Mock {
        fn arm(&mut self, token: TimerToken, _after: Duration) {
            self.armed.push(token);
        }
        fn cancel(&mut self, token: TimerToken) {
            self.cancelled.push(token);
        }
    }

    impl UpperCallback for Mock {
        fn deliver(&mut self, event: UpperEvent) {
            self.upper.push(event);
        }
    }

    impl Mock {
        /// Label and PDU id of the last command sent
        fn last(&self) -> (Label, u8) {
            let (label, _, data) = self.sent.last().unwrap();
            (*label, data[0])
        }

        fn pdus_since(&self, n: usize) -> std::vec::Vec<u8> {
            self.sent[n..].iter().map(|(_, _, d)| d[0]).collect()
        }

        fn token(&self, label: Label) -> TimerToken {
            *self
                .armed
                .iter()
                .rev()
                .find(|t| t.kind == TimerKind::AvrcpTransaction(label))
                .unwrap()
        }

        fn count(&self, f: impl Fn(&UpperEvent) -> bool) -> usize {
            self.upper.iter().filter(|e| f(e)).count()
        }
    }

    fn rsp(id: PduId, params: &[u8]) -> std::vec::Vec<u8> {
        let mut out = std::vec![id as u8, 0];
        out.extend_from_slice(&(params.len() as u16).to_be_bytes());
        out.extend_from_slice(params);
        out
    }

    fn track(uid: u64) -> std::vec::Vec<u8> {
        let mut params = std::vec![EventId::TrackChanged as u8];
        params.extend_from_slice(&uid.to_be_bytes());
        rsp(PduId::RegisterNotification, &params)
    }

    /// Connect a metadata target and answer both capability queries
    fn subscribed(events: &[EventId], extra: u16) -> (RcEngine, Mock) {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        let features = AvFeatures(AvFeatures::RCTG | AvFeatures::METADATA | extra);
        engine.connected(&mut p, RC, PEER, features);

        let (label, id) = p.last();
        assert_eq!(id, PduId::GetCapabilities as u8);
        let ids = pdu::capabilities_company_ids(&[METADATA_COMPANY_ID]).unwrap();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &ids);

        let (label, id) = p.last();
        assert_eq!(id, PduId::GetCapabilities as u8);
        let list = pdu::capabilities_events(events).unwrap();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &list);
        (engine, p)
    }

    #[test]
    fn test_subscription_chain_and_bring_up() {
        let (mut engine, mut p) =
            subscribed(&[EventId::PlayStatusChanged, EventId::TrackChanged], 0);
        let (label, id) = p.last();
        assert_eq!(id, PduId::RegisterNotification as u8);
        assert_eq!(p.sent.last().unwrap().1, MessageCode::Notify);
        assert_eq!(p.sent.last().unwrap().2[4], EventId::PlayStatusChanged as u8);

        let n = p.sent.len();
        let interim = rsp(PduId::RegisterNotification, &[0x01, PLAY_STATUS_PLAYING]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Interim, &interim);
        assert_eq!(
            p.pdus_since(n),
            [PduId::GetPlayStatus as u8, PduId::RegisterNotification as u8]
        );
        assert_eq!(p.sent.last().unwrap().2[4], EventId::TrackChanged as u8);

        let (track_label, _) = p.last();
        engine.handle_vendor_response(&mut p, RC, track_label, MessageCode::Interim, &track(7));
        let dev = engine.device(&PEER).unwrap();
        assert_eq!(dev.playing_uid, 7);
        assert!(dev.procedure_complete);
        assert!(!dev.features.any(AvFeatures::APP_SETTING));
        assert_eq!(p.last().1, PduId::GetElementAttributes as u8);
        assert_eq!(
            p.count(|e| matches!(e, UpperEvent::Notification { interim: true, .. })),
            2
        );
    }

    #[test]
    fn test_registration_timeout_reports_once() {
        let (mut engine, mut p) =
            subscribed(&[EventId::PlayStatusChanged, EventId::TrackChanged], 0);
        let (label, _) = p.last();
        let in_use = engine.pending();
        let token = p.token(label);

        assert!(engine.handle_timeout(&mut p, token));
        let timeouts = |p: &Mock| {
            p.count(|e| {
                matches!(
                    e,
                    UpperEvent::CommandTimeout {
                        event: Some(EventId::PlayStatusChanged),
                        ..
                    }
                )
            })
        };
        assert_eq!(timeouts(&p), 1);
        let dev = engine.device(&PEER).unwrap();
        assert!(dev.notifications.get(EventId::PlayStatusChanged).is_none());
        // skipped forward to the next event
        assert_eq!(p.sent.last().unwrap().2[4], EventId::TrackChanged as u8);
        assert_eq!(engine.pending(), in_use);

        // a second delivery of the same expiry is stale
        assert!(engine.handle_timeout(&mut p, token));
        assert_eq!(timeouts(&p), 1);
    }

    #[test]
    fn test_changed_reregisters_and_fetches_track() {
        let (mut engine, mut p) = subscribed(&[EventId::TrackChanged], 0);
        let (label, _) = p.last();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Interim, &track(1));

        let n = p.sent.len();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Changed, &track(2));
        assert_eq!(
            p.pdus_since(n),
            [
                PduId::RegisterNotification as u8,
                PduId::GetElementAttributes as u8
            ]
        );
        assert_eq!(p.sent[n].2[4], EventId::TrackChanged as u8);
        assert_eq!(engine.device(&PEER).unwrap().playing_uid, 2);
        assert_eq!(
            p.count(|e| matches!(e, UpperEvent::Notification { interim: false, .. })),
            1
        );
    }

    #[test]
    fn test_app_settings_bring_up() {
        let (mut engine, mut p) =
            subscribed(&[EventId::PlayStatusChanged], AvFeatures::APP_SETTING);
        let (label, _) = p.last();
        let interim = rsp(PduId::RegisterNotification, &[0x01, 0x00]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Interim, &interim);
        assert_eq!(p.last().1, PduId::ListAppAttributes as u8);

        // extended attribute 0x81 is ignored
        let (label, _) = p.last();
        let attrs = rsp(PduId::ListAppAttributes, &[3, 0x02, 0x03, 0x81]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &attrs);
        assert_eq!(p.last().1, PduId::ListAppValues as u8);
        assert_eq!(p.sent.last().unwrap().2[4], 0x02);

        let values = rsp(PduId::ListAppValues, &[2, 1, 2]);
        let (label, _) = p.last();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &values);
        assert_eq!(p.sent.last().unwrap().2[4], 0x03);
        let (label, _) = p.last();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &values);
        assert_eq!(p.last().1, PduId::GetCurrentAppValues as u8);
        assert_eq!(
            p.count(|e| matches!(e, UpperEvent::AppSettingAttributes { attrs, .. } if attrs.len() == 2)),
            1
        );

        let (label, _) = p.last();
        let current = rsp(PduId::GetCurrentAppValues, &[2, 0x02, 1, 0x03, 2]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &current);
        assert_eq!(p.last().1, PduId::GetElementAttributes as u8);
        let dev = engine.device(&PEER).unwrap();
        assert_eq!(&dev.app_settings.current[..], &[(0x02, 1), (0x03, 2)]);
        assert!(dev.procedure_complete);
    }

    #[test]
    fn test_rejected_volume_registration_disables_absolute_volume() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCTG | AvFeatures::ADV_CTRL));
        assert_eq!(p.sent.len(), 1);
        let (label, id) = p.last();
        assert_eq!(id, PduId::RegisterNotification as u8);
        assert_eq!(p.sent[0].2[4], EventId::VolumeChanged as u8);

        let reject = pdu::reject(0x31, AvrcStatus::BadParameter).unwrap();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Rejected, &reject);
        let dev = engine.device(&PEER).unwrap();
        assert!(!dev.features.any(AvFeatures::ADV_CTRL));
        assert_eq!(dev.volume_label, None);
        assert!(matches!(p.upper.last(), Some(UpperEvent::RcFeatures { .. })));
        assert_eq!(engine.pending(), 0);

        assert_eq!(
            engine.set_absolute_volume(&mut p, &PEER, 10),
            Err(AvrcpError::NotSupported)
        );
        assert_eq!(
            engine.register_volume_changed(&mut p, &PEER),
            Err(AvrcpError::NotSupported)
        );
        assert_eq!(p.sent.len(), 1);
    }

    #[test]
    fn test_volume_cache_and_echo_suppression() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCTG | AvFeatures::ADV_CTRL));
        let (label, _) = p.last();

        let interim = pdu::volume_changed(0x20).unwrap();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Interim, &interim);
        assert_eq!(engine.device(&PEER).unwrap().volume, None);
        assert!(matches!(
            p.upper.last(),
            Some(UpperEvent::VolumeChanged { volume: 0x20, code: MessageCode::Interim, .. })
        ));

        let changed = pdu::volume_changed(0x30).unwrap();
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Changed, &changed);
        assert_eq!(engine.device(&PEER).unwrap().volume, Some(0x30));
        // re-registered right away
        assert_eq!(p.sent.len(), 2);
        assert_eq!(p.last().1, PduId::RegisterNotification as u8);

        assert_eq!(engine.set_absolute_volume(&mut p, &PEER, 0x30), Ok(None));
        assert_eq!(p.sent.len(), 2);

        let label = engine.set_absolute_volume(&mut p, &PEER, 0x40).unwrap().unwrap();
        assert_eq!(p.sent.last().unwrap().1, MessageCode::Control);
        let accepted = rsp(PduId::SetAbsoluteVolume, &[0x3F]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Accepted, &accepted);
        assert_eq!(engine.device(&PEER).unwrap().volume, Some(0x3F));
    }

    #[test]
    fn test_local_response_updates_volume_cache() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCCT));

        let rsp = pdu::volume_changed(0x11).unwrap();
        engine.local_response(RC, MessageCode::Interim, &rsp);
        assert_eq!(engine.device(&PEER).unwrap().volume, None);
        engine.local_response(RC, MessageCode::Changed, &rsp);
        assert_eq!(engine.device(&PEER).unwrap().volume, Some(0x11));
    }

    #[test]
    fn test_status_timeout_reports_once() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCTG));
        let label = engine.get_play_status(&mut p, &PEER).unwrap();

        let token = p.token(label);
        assert!(engine.handle_timeout(&mut p, token));
        assert_eq!(engine.pending(), 0);
        assert_eq!(
            p.count(|e| matches!(
                e,
                UpperEvent::CommandTimeout {
                    pdu: Some(PduId::GetPlayStatus),
                    event: None,
                    ..
                }
            )),
            1
        );

        // a late response finds the label free
        let late = rsp(PduId::GetPlayStatus, &[0; 9]);
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Stable, &late);
        assert_eq!(p.count(|e| matches!(e, UpperEvent::PlayStatus { .. })), 0);
    }

    #[test]
    fn test_pass_through_round_trip() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCTG));
        let label = engine
            .send_pass_through(&mut p, RC, op::PLAY, true)
            .unwrap();
        assert_eq!(p.pass_through, [(label, op::PLAY, true)]);

        engine.handle_pass_through_response(
            &mut p,
            RC,
            label,
            MessageCode::Accepted,
            op::PLAY,
            true,
        );
        assert_eq!(engine.pending(), 0);
        assert!(matches!(
            p.upper.last(),
            Some(UpperEvent::RemoteResponse { code: MessageCode::Accepted, .. })
        ));
    }

    #[test]
    fn test_oversized_vendor_response_rejected() {
        let mut engine = RcEngine::default();
        let mut p = Mock::default();
        engine.connected(&mut p, RC, PEER, AvFeatures(AvFeatures::RCTG));
        let label = engine
            .send_vendor_command(&mut p, RC, MessageCode::Control, 0x0000_1234, &[1])
            .unwrap();

        let big = std::vec![0u8; crate::constants::MAX_AVRCP_PAYLOAD + 1];
        engine.handle_vendor_response(&mut p, RC, label, MessageCode::Accepted, &big);
        assert_eq!(engine.pending(), 0);
        assert!(matches!(
            p.upper.last(),
            Some(UpperEvent::CommandRejected {
                pdu: None,
                status: AvrcStatus::InternalError,
                ..
            })
        ));
        assert_eq!(p.count(|e| matches!(e, UpperEvent::VendorResponse { .. })), 0);
    }

    #[test]
    fn test_app_setting_list_bounded() {
        let list = app_setting_list(&[0x01, 0x80, 0x02, 0xFF]).unwrap();
        let attrs: std::vec::Vec<u8> = list.iter().map(|s| s.attr).collect();
        assert_eq!(attrs, [0x01, 0x02]);

        let many: std::vec::Vec<u8> = (1..=MAX_APP_SETTINGS as u8 + 1).collect();
        assert_eq!(app_setting_list(&many).map(|l| l.len()), Err(AvrcpError::BufferFull));
    }

    #[test]
    fn test_disconnect_releases_labels() {
        let (mut engine, mut p) = subscribed(&[EventId::PlayStatusChanged], 0);
        assert!(engine.pending() > 0);
        assert!(engine.disconnected(&mut p, RC).is_some());
        assert_eq!(engine.pending(), 0);
        assert!(engine.device(&PEER).is_none());
        assert!(!p.cancelled.is_empty());
        assert_eq!(
            engine.get_play_status(&mut p, &PEER),
            Err(AvrcpError::NotConnected)
        );
    }
}
