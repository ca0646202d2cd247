//! Remote-control sessions
//!
//! Keeps the RC Session table, the single RC-only listener and the
//! stream/RC relation in step with AVCTP events, runs the top-level
//! machine and screens inbound AVRCP commands before they reach the
//! upper layer.

use super::state::{self, TopAction, TopEvent};
use super::RcSession;
use crate::avrcp::pdu::{self, MetaVerdict};
use crate::avrcp::MessageCode;
use crate::config::AvFeatures;
use crate::constants::{MAX_ACTIONS, MAX_RC_SESSIONS, METADATA_COMPANY_ID};
use crate::events::{
    ApiRequest, AvrcpEvent, AvrcpMessage, AvrcpServiceEntry, AvrcpServiceRecord, UpperEvent,
};
use crate::handle::{Label, LinkIndex, RcHandle, RcIndex, StreamIndex};
use crate::interfaces::{AvPlatform, RcRole, TimerKind};
use crate::manager::{RcDiscTarget, SessionManager};
use crate::processor::{self, Route};
use crate::{AvError, BluetoothAddress};
use heapless::Vec;

/// First AVRCP version with vendor-dependent and metadata commands
const AVRCP_1_3: u16 = 0x0103;
/// First AVRCP version with advertised categories and browsing
const AVRCP_1_4: u16 = 0x0104;
/// Supported-features bit: category 2 (volume and advanced control)
const SUPF_CATEGORY_2: u16 = 0x0002;
/// Supported-features bit: browsing
const SUPF_BROWSING: u16 = 0x0040;

/// Peer features advertised by its AVRCP records
fn peer_features(record: &AvrcpServiceRecord) -> AvFeatures {
    let entries: [(Option<AvrcpServiceEntry>, u16); 2] = [
        (record.target, AvFeatures::RCTG),
        (record.controller, AvFeatures::RCCT),
    ];
    let mut features = AvFeatures::NONE;
    for (entry, role) in entries {
        let Some(entry) = entry else {
            continue;
        };
        features = features.with(role);
        if entry.version >= AVRCP_1_3 {
            features = features.with(AvFeatures::VENDOR | AvFeatures::METADATA);
        }
        if entry.version >= AVRCP_1_4 {
            if entry.features & SUPF_CATEGORY_2 != 0 {
                features = features.with(AvFeatures::ADV_CTRL);
            }
            if entry.features & SUPF_BROWSING != 0 {
                features = features.with(AvFeatures::BROWSE);
            }
        }
    }
    features
}

impl<P: AvPlatform> SessionManager<'_, P> {
    /// Feed the top-level machine and return its actions
    fn top_event(&mut self, event: TopEvent) -> Vec<TopAction, MAX_ACTIONS> {
        let t = state::transition(self.top, event);
        if t.next != self.top {
            debug!("[RC] top {:?} -> {:?} on {:?}", self.top, t.next, event);
        }
        self.top = t.next;
        t.actions
    }

    /// Requests that go through the top-level machine
    pub(crate) fn top_request(&mut self, request: &ApiRequest) -> Result<(), AvError> {
        let Route::TopLevel(event) = processor::route_request(request) else {
            return Err(AvError::InvalidState);
        };
        let actions = self.top_event(event);
        if actions.is_empty() {
            debug!("[RC] {:?} ignored without a remote-control link", event);
            return Err(AvError::NotConnected);
        }
        for action in actions {
            match action {
                TopAction::Disable => self.disable(),
                TopAction::FreeRsp => debug!("[RC] response dropped, no remote-control link"),
                TopAction::RcRemoteCmd
                | TopAction::RcVendorCmd
                | TopAction::RcVendorRsp
                | TopAction::RcMetaRsp
                | TopAction::RcCloseReq => self.rc_request(request)?,
                action => warn!("[RC] unexpected {:?} for a request", action),
            }
        }
        Ok(())
    }

    fn rc_request(&mut self, request: &ApiRequest) -> Result<(), AvError> {
        match *request {
            ApiRequest::RemoteCmd { rc, op_id, pressed } => {
                self.engine
                    .send_pass_through(&mut self.platform, rc, op_id, pressed)?;
            }
            ApiRequest::VendorCmd {
                rc,
                code,
                company_id,
                ref data,
            } => {
                self.engine
                    .send_vendor_command(&mut self.platform, rc, code, company_id, data)?;
            }
            ApiRequest::VendorRsp {
                rc,
                label,
                code,
                company_id,
                ref data,
            } => {
                self.platform.respond_vendor(rc, label, code, company_id, data);
                self.engine.local_response(rc, code, data);
            }
            ApiRequest::MetaRsp {
                rc,
                label,
                code,
                ref data,
            } => {
                self.platform
                    .respond_vendor(rc, label, code, METADATA_COMPANY_ID, data);
                self.engine.local_response(rc, code, data);
            }
            ApiRequest::RcClose(rc) => {
                self.tables.rcs.find(rc).ok_or(AvError::InvalidHandle)?;
                self.platform.close_rc(rc);
            }
            _ => return Err(AvError::InvalidState),
        }
        Ok(())
    }

    /// Handle one AVCTP event
    pub(crate) fn avrcp_event(&mut self, event: AvrcpEvent) {
        match event {
            AvrcpEvent::Opened { rc, peer } => {
                if self.top_event(TopEvent::AvrcOpen).contains(&TopAction::RcOpened) {
                    self.rc_opened(rc, peer);
                }
            }
            AvrcpEvent::Closed { rc } => self.rc_closed(rc),
            AvrcpEvent::BrowseOpened { rc } => self.browse_changed(rc, true),
            AvrcpEvent::BrowseClosed { rc } => self.browse_changed(rc, false),
            AvrcpEvent::Message { rc, label, msg } => {
                if self.top_event(TopEvent::AvrcMsg).contains(&TopAction::RcMsg) {
                    self.rc_msg(rc, label, msg);
                } else {
                    debug!("[RC] message on {:?} dropped", rc);
                }
            }
        }
    }

    fn rc_opened(&mut self, handle: RcHandle, peer: BluetoothAddress) {
        let stream = self.tables.streams.by_peer(peer).next();
        if let Some(stream) = stream {
            self.timers
                .cancel(&mut self.platform, TimerKind::RcOpen(stream));
        }
        let Some(rc) = self.tables.rcs.find(handle) else {
            warn!("[RC] open on unknown {:?}", handle);
            return;
        };
        if self.tables.rcs.acceptor() == Some(rc) {
            self.tables.rcs.set_acceptor(None);
        }

        if let Some(stream) = stream {
            self.bind_opened(rc, stream, peer);
        } else if !self.tables.links.get(LinkIndex::RC_ONLY).in_use {
            // RC-only peer: it holds the spare link until a stream adopts it
            self.tables.links.occupy(LinkIndex::RC_ONLY, peer);
            if let Some(session) = self.tables.rcs.get_mut(rc) {
                session.link = LinkIndex::RC_ONLY;
            }
            self.tables.rcs.set_acceptor(Some(rc));
        } else {
            warn!("[RC] no link left for {:?}, closing {:?}", peer, handle);
            self.platform.close_rc(handle);
            return;
        }

        let local = self.options.features;
        let Some(session) = self.tables.rcs.get_mut(rc) else {
            return;
        };
        session.connected = true;
        session.peer = peer;
        let learned = session.features != AvFeatures::NONE;
        if !learned {
            session.features = local.assumed_peer();
        }
        let features = session.features;
        let role = session.role;
        if !learned {
            self.rc_disc(RcDiscTarget::Rc(rc), peer);
        }

        info!("[RC] {:?} opened to {:?}", handle, peer);
        self.platform.deliver(UpperEvent::RcOpened {
            rc: handle,
            peer,
            features,
        });
        self.engine
            .connected(&mut self.platform, handle, peer, features);
        if local.any(AvFeatures::BROWSE)
            && features.any(AvFeatures::BROWSE)
            && role == RcRole::Initiator
        {
            self.platform.open_browse(handle);
        }
        self.ensure_listener();
    }

    /// Tie an opened session to the stream of its peer
    fn bind_opened(&mut self, rc: RcIndex, stream: StreamIndex, peer: BluetoothAddress) {
        let previous = self.tables.relations.rc_of(stream);
        let previous_session = previous.and_then(|p| self.rc_session(p));
        match (previous, previous_session) {
            (Some(previous), Some(other)) if previous != rc && !other.connected => {
                // the stream's own listener becomes the RC-only listener
                self.tables.relations.unbind_rc(previous);
                if let Some(session) = self.tables.rcs.get_mut(previous) {
                    session.link = LinkIndex::RC_ONLY;
                }
                self.tables.rcs.set_acceptor(Some(previous));
                if let Some(session) = self.tables.rcs.get_mut(rc) {
                    session.link = other.link;
                }
                self.tables.relations.bind(stream, rc);
            }
            (Some(previous), Some(_)) if previous != rc => {
                warn!("[RC] {:?} already has a connected session", stream);
            }
            _ => {
                let link = self
                    .tables
                    .links
                    .find(&peer)
                    .or_else(|| LinkIndex::new(stream.get()).ok());
                if let (Some(link), Some(session)) = (link, self.tables.rcs.get_mut(rc)) {
                    session.link = link;
                }
                self.tables.relations.bind(stream, rc);
            }
        }
    }

    fn rc_closed(&mut self, handle: RcHandle) {
        let mut peer = self
            .engine
            .disconnected(&mut self.platform, handle)
            .map_or(BluetoothAddress::EMPTY, |dcb| dcb.peer);

        if let Some(rc) = self.tables.rcs.find(handle) {
            let mut closed = None;
            if let Some(session) = self.tables.rcs.get_mut(rc) {
                session.connected = false;
                session.browse = false;
                session.features = AvFeatures::NONE;
                closed = Some(*session);
            }
            if let Some(stream) = self.tables.relations.unbind_rc(rc) {
                peer = self.tables.streams.get(stream).peer;
            }
            if let Some(session) = closed {
                let rc_only = self.tables.links.get(LinkIndex::RC_ONLY);
                if session.link.is_rc_only() && rc_only.in_use && rc_only.peer == session.peer {
                    self.tables.links.release(LinkIndex::RC_ONLY);
                }
                if peer.is_empty() {
                    peer = session.peer;
                }
                // the channel is already down, only the slot goes
                self.tables.rcs.free(rc);
                if self.tables.rcs.acceptor() == Some(rc) {
                    self.tables.rcs.set_acceptor(None);
                }
            }
        }

        if !self.tables.rcs.any_connected() {
            self.top_event(TopEvent::AvrcNone);
        }
        info!("[RC] {:?} closed", handle);
        self.platform.deliver(UpperEvent::RcClosed { rc: handle, peer });
        self.ensure_listener();
    }

    fn browse_changed(&mut self, handle: RcHandle, up: bool) {
        let Some(session) = self
            .tables
            .rcs
            .find(handle)
            .and_then(|rc| self.tables.rcs.get_mut(rc))
        else {
            warn!("[RC] browse change on unknown {:?}", handle);
            return;
        };
        session.browse = up;
        let peer = session.peer;
        self.engine.browse_changed(handle, up);
        let event = if up {
            UpperEvent::BrowseOpened { rc: handle, peer }
        } else {
            UpperEvent::BrowseClosed { rc: handle, peer }
        };
        self.platform.deliver(event);
    }

    /// Screen one inbound AVRCP message
    fn rc_msg(&mut self, handle: RcHandle, label: Label, msg: AvrcpMessage) {
        if self.tables.rcs.find(handle).is_none() {
            warn!("[RC] message on unknown {:?}", handle);
            return;
        }
        let local = self.options.features;

        match msg {
            AvrcpMessage::PassThrough {
                code,
                op_id,
                pressed,
                data,
            } => {
                if !code.is_command() {
                    self.engine.handle_pass_through_response(
                        &mut self.platform,
                        handle,
                        label,
                        code,
                        op_id,
                        pressed,
                    );
                    return;
                }
                if !local.any(AvFeatures::RCTG) {
                    self.platform.respond_pass_through(
                        handle,
                        label,
                        MessageCode::NotImplemented,
                        op_id,
                        pressed,
                    );
                    return;
                }
                let verdict = pdu::check_pass_through(
                    code,
                    op_id,
                    &data,
                    &self.options.supported_pass_through,
                    local.any(AvFeatures::GROUP_NAVIGATION),
                );
                self.platform
                    .respond_pass_through(handle, label, verdict.response, op_id, pressed);
                if verdict.forward {
                    self.platform.deliver(UpperEvent::RemoteCommand {
                        rc: handle,
                        label,
                        op_id,
                        pressed,
                    });
                }
            }
            AvrcpMessage::Vendor {
                code,
                subunit_panel,
                company_id,
                data,
            } => {
                if !code.is_command() {
                    self.engine
                        .handle_vendor_response(&mut self.platform, handle, label, code, &data);
                    return;
                }
                if !subunit_panel {
                    self.platform.respond_vendor(
                        handle,
                        label,
                        MessageCode::NotImplemented,
                        company_id,
                        &data,
                    );
                    return;
                }
                if company_id == METADATA_COMPANY_ID && local.any(AvFeatures::METADATA) {
                    match pdu::check_meta_command(
                        code,
                        &data,
                        &self.options.company_ids,
                        &self.options.supported_events,
                    ) {
                        Ok(MetaVerdict::Forward) => {
                            self.platform.deliver(UpperEvent::MetaMessage {
                                rc: handle,
                                label,
                                code,
                                data,
                            });
                        }
                        Ok(MetaVerdict::Respond { code, payload }) => {
                            self.platform.respond_vendor(
                                handle,
                                label,
                                code,
                                METADATA_COMPANY_ID,
                                &payload,
                            );
                        }
                        Err(e) => {
                            warn!("[RC] metadata command unusable: {:?}", e);
                            self.platform.respond_vendor(
                                handle,
                                label,
                                MessageCode::NotImplemented,
                                company_id,
                                &data,
                            );
                        }
                    }
                } else if local.any(AvFeatures::VENDOR) {
                    self.platform.deliver(UpperEvent::VendorCommand {
                        rc: handle,
                        label,
                        code,
                        company_id,
                        data,
                    });
                } else {
                    self.platform.respond_vendor(
                        handle,
                        label,
                        MessageCode::NotImplemented,
                        company_id,
                        &data,
                    );
                }
            }
            AvrcpMessage::Browse { data } => {
                if local.any(AvFeatures::BROWSE) {
                    self.platform.deliver(UpperEvent::BrowseMessage {
                        rc: handle,
                        label,
                        data,
                    });
                } else {
                    warn!("[RC] browse message without browsing support");
                }
            }
        }
    }

    /// Start an AVRCP record search for `peer`; one runs at a time
    pub(crate) fn rc_disc(&mut self, target: RcDiscTarget, peer: BluetoothAddress) {
        if let Some((_, busy)) = self.rc_disc {
            debug!("[RC] search for {:?} still running, {:?} skipped", busy, peer);
            return;
        }
        match self.platform.find_avrcp(peer) {
            Ok(()) => self.rc_disc = Some((target, peer)),
            Err(e) => warn!("[RC] AVRCP search for {:?} failed: {:?}", peer, e),
        }
    }

    /// AVRCP record search finished
    pub(crate) fn rc_disc_done(&mut self, peer: BluetoothAddress, record: Option<AvrcpServiceRecord>) {
        let Some((target, expected)) = self.rc_disc.take() else {
            debug!("[RC] unsolicited AVRCP record for {:?}", peer);
            return;
        };
        if expected != peer {
            self.rc_disc = Some((target, expected));
            return;
        }
        let local = self.options.features;
        let found = record.as_ref().map(peer_features);

        let rc = match target {
            RcDiscTarget::Rc(rc) => Some(rc),
            RcDiscTarget::Stream(stream) => self.tables.relations.rc_of(stream),
        }
        .filter(|rc| self.tables.rcs.get(*rc).is_some_and(|s| s.connected));
        if let Some(rc) = rc {
            let features = found.unwrap_or_else(|| local.assumed_peer());
            let Some(session) = self.tables.rcs.get_mut(rc) else {
                return;
            };
            session.features = features;
            let handle = session.handle;
            debug!("[RC] {:?} peer features {:?}", handle, features);
            self.platform.deliver(UpperEvent::RcFeatures {
                rc: handle,
                peer,
                features,
            });
            self.engine
                .features_changed(&mut self.platform, handle, features);
            return;
        }

        let RcDiscTarget::Stream(stream) = target else {
            return;
        };
        let features = found.unwrap_or(AvFeatures::NONE);
        let complementary = (local.any(AvFeatures::RCCT) && features.any(AvFeatures::RCTG))
            || (local.any(AvFeatures::RCTG) && features.any(AvFeatures::RCCT));
        let link = self.tables.links.find(&peer);
        if let (true, Some(link)) = (complementary, link) {
            if let Some(rc) = self.rc_create(RcRole::Initiator, Some(stream), link) {
                if let Some(session) = self.tables.rcs.get_mut(rc) {
                    session.features = features;
                }
                return;
            }
        }
        let session = self.tables.streams.get_mut(stream);
        if session.use_rc {
            session.use_rc = false;
            info!("[RC] no remote control towards {:?}", peer);
            self.platform.deliver(UpperEvent::RcOpenFailed { peer });
        }
    }

    /// Create an RC session, reusing the stream's own where possible
    pub(crate) fn rc_create(
        &mut self,
        role: RcRole,
        stream: Option<StreamIndex>,
        link: LinkIndex,
    ) -> Option<RcIndex> {
        let mut peer = None;
        if let Some(stream) = stream {
            if let Some(existing) = self.tables.relations.rc_of(stream) {
                let session = self.rc_session(existing)?;
                match role {
                    RcRole::Acceptor => {
                        if let Some(session) = self.tables.rcs.get_mut(existing) {
                            session.link = link;
                        }
                        return Some(existing);
                    }
                    RcRole::Initiator if session.connected => return Some(existing),
                    RcRole::Initiator => self.del_rc(existing),
                }
            }
            if role == RcRole::Initiator {
                peer = Some(self.tables.streams.get(stream).peer);
            }
        } else if role == RcRole::Initiator {
            warn!("[RC] initiator session needs a stream");
            return None;
        }

        let handle = match self.platform.open_rc(role, peer) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[RC] open {:?} failed: {:?}", role, e);
                return None;
            }
        };
        let session = RcSession::new(handle, role, link, peer.unwrap_or(BluetoothAddress::EMPTY));
        let index = match self.tables.rcs.insert(session) {
            Ok(index) => index,
            Err(e) => {
                warn!("[RC] no session slot for {:?}: {:?}", handle, e);
                self.platform.close_rc(handle);
                return None;
            }
        };
        if let Some(stream) = stream {
            self.tables.relations.bind(stream, index);
        }
        if link.is_rc_only() {
            self.tables.rcs.set_acceptor(Some(index));
        }
        debug!("[RC] {:?} created as {:?} on {:?}", handle, role, link);
        Some(index)
    }

    /// Keep one listener for peers that connect AVRCP before any stream
    pub(crate) fn ensure_listener(&mut self) {
        if self.disabling
            || !self.options.features.any(AvFeatures::RCTG)
            || self.tables.rcs.acceptor().is_some()
            || self.tables.streams.registered() == 0
        {
            return;
        }
        self.rc_create(RcRole::Acceptor, None, LinkIndex::RC_ONLY);
    }

    /// Close an RC session; unconnected and initiator sessions are freed at once
    pub(crate) fn del_rc(&mut self, rc: RcIndex) {
        let Some(session) = self.rc_session(rc) else {
            return;
        };
        if let Some(stream) = self.tables.relations.unbind_rc(rc) {
            self.timers
                .cancel(&mut self.platform, TimerKind::RcOpen(stream));
        }
        if !session.connected || session.role == RcRole::Initiator {
            self.tables.rcs.free(rc);
        }
        debug!("[RC] closing {:?}", session.handle);
        self.platform.close_rc(session.handle);
        if self.tables.rcs.acceptor() == Some(rc) {
            self.tables.rcs.set_acceptor(None);
        }
    }

    /// Close the sessions tied to streams, or every session while disabling
    pub(crate) fn close_all_rc(&mut self) {
        let doomed: Vec<RcIndex, MAX_RC_SESSIONS> = self
            .tables
            .rcs
            .iter()
            .filter(|(rc, _)| self.disabling || self.tables.relations.stream_of(*rc).is_some())
            .map(|(rc, _)| rc)
            .collect();
        for rc in doomed {
            self.del_rc(rc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::TopState;
    use crate::avrcp::op;
    use crate::avrcp::pdu::Payload;
    use crate::config::AvOptions;
    use crate::events::{Event, SdpEvent, TransportEvent};
    use crate::manager::tests::*;

    fn slot(n: usize) -> StreamIndex {
        StreamIndex::new(n).unwrap()
    }

    fn label(n: u8) -> Label {
        Label::new(n).unwrap()
    }

    fn avrcp(manager: &mut Manager<'_>, path: &mut MockPath, event: AvrcpEvent) {
        manager.handle_event(Event::Avrcp(event), path);
    }

    fn target_record(version: u16, features: u16) -> Option<AvrcpServiceRecord> {
        Some(AvrcpServiceRecord {
            target: Some(AvrcpServiceEntry { version, features }),
            controller: None,
        })
    }

    /// Open a stream locally, then let discovery bring up an initiator session
    fn with_initiator_rc(manager: &mut Manager<'_>, path: &mut MockPath) -> RcHandle {
        let handle = manager.tables().streams.get(slot(0)).handle.unwrap();
        open_as_initiator(manager, path, handle, PEER_A);
        manager.handle_event(
            Event::Sdp(SdpEvent::AvrcpRecord {
                peer: PEER_A,
                record: target_record(0x0104, 0x0001),
            }),
            path,
        );
        let (role, peer, rc) = *manager.platform().rc_opens.last().unwrap();
        assert_eq!((role, peer), (RcRole::Initiator, Some(PEER_A)));
        avrcp(manager, path, AvrcpEvent::Opened { rc, peer: PEER_A });
        rc
    }

    #[test]
    fn test_peer_features_from_records() {
        let record = AvrcpServiceRecord {
            target: Some(AvrcpServiceEntry {
                version: 0x0104,
                features: SUPF_CATEGORY_2 | SUPF_BROWSING,
            }),
            controller: Some(AvrcpServiceEntry {
                version: 0x0100,
                features: 0,
            }),
        };
        let features = peer_features(&record);
        assert!(features.supports(
            AvFeatures::RCTG
                | AvFeatures::RCCT
                | AvFeatures::VENDOR
                | AvFeatures::METADATA
                | AvFeatures::ADV_CTRL
                | AvFeatures::BROWSE
        ));

        // browsing bit only counts from 1.4 on
        let old = peer_features(&AvrcpServiceRecord {
            target: Some(AvrcpServiceEntry {
                version: 0x0103,
                features: SUPF_BROWSING,
            }),
            controller: None,
        });
        assert!(!old.any(AvFeatures::BROWSE));
        assert!(old.supports(AvFeatures::METADATA));
        assert_eq!(peer_features(&AvrcpServiceRecord::default()), AvFeatures::NONE);
    }

    #[test]
    fn test_rc_only_peer_gets_spare_link() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let listener = manager.tables().rcs.acceptor().unwrap();

        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });

        let rc_only = manager.tables().links.get(LinkIndex::RC_ONLY);
        assert!(rc_only.in_use);
        assert_eq!(rc_only.peer, PEER_A);
        assert_eq!(manager.tables().rcs.acceptor(), Some(listener));
        assert!(manager.tables().rcs.get(listener).unwrap().connected);
        assert_eq!(manager.top_state(), TopState::Open);
        assert_eq!(manager.platform().avrcp_searches, [PEER_A]);
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::RcOpened { rc: RcHandle(1), .. }
        )));
        // nothing listens while the RC-only peer holds the slot
        assert_eq!(manager.platform().rc_opens.len(), 1);
    }

    #[test]
    fn test_stream_adopts_rc_only_session() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let listener = manager.tables().rcs.acceptor().unwrap();
        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });

        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        let own = manager.tables().relations.rc_of(slot(0)).unwrap();
        assert_ne!(own, listener);
        transport(
            &mut manager,
            &mut path,
            TransportEvent::ConfigIndication {
                handle,
                peer: PEER_A,
                label: 1,
                codec: config_bytes(crate::a2dp::CodecIndex::Sbc),
                protect: crate::a2dp::ProtectInfo::NONE,
            },
        );
        transport(&mut manager, &mut path, TransportEvent::Opened { handle, peer: PEER_A, mtu: 672 });

        let link = LinkIndex::new(0).unwrap();
        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(listener));
        assert_eq!(manager.tables().rcs.get(listener).unwrap().link, link);
        assert!(!manager.tables().links.get(LinkIndex::RC_ONLY).in_use);
        // the stream's own listener now waits for RC-only peers
        assert_eq!(manager.tables().rcs.acceptor(), Some(own));
        assert_eq!(manager.tables().rcs.get(own).unwrap().link, LinkIndex::RC_ONLY);
    }

    #[test]
    fn test_open_on_spare_listener_swaps_roles() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let listener = manager.tables().rcs.acceptor().unwrap();
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        let own = manager.tables().relations.rc_of(slot(0)).unwrap();

        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });

        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(listener));
        assert_eq!(manager.tables().rcs.acceptor(), Some(own));
        assert_eq!(manager.tables().rcs.get(own).unwrap().link, LinkIndex::RC_ONLY);
        assert_eq!(
            manager.tables().rcs.get(listener).unwrap().link,
            LinkIndex::new(0).unwrap()
        );
        assert_eq!(manager.platform().rc_opens.len(), 2);
    }

    #[test]
    fn test_initiator_session_from_discovery() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let listener = manager.tables().rcs.acceptor();

        let rc = with_initiator_rc(&mut manager, &mut path);
        let index = manager.tables().rcs.find(rc).unwrap();
        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(index));
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::RcOpened { features, .. } if features.any(AvFeatures::RCTG)
        )));
        // features came from the record, no second search
        assert_eq!(manager.platform().avrcp_searches.len(), 1);

        avrcp(&mut manager, &mut path, AvrcpEvent::Closed { rc });
        assert_eq!(manager.tables().rcs.find(rc), None);
        assert_eq!(manager.tables().rcs.acceptor(), listener);
        assert_eq!(manager.top_state(), TopState::Init);
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::RcClosed { peer, .. } if *peer == PEER_A
        )));
    }

    /// Initiator session on stream 0 towards `PEER_A`, RC-only session with `PEER_B`
    fn with_two_sessions(manager: &mut Manager<'_>, path: &mut MockPath) -> (RcHandle, RcHandle) {
        let listener = manager.tables().rcs.acceptor().unwrap();
        let spare = manager.tables().rcs.get(listener).unwrap().handle;
        let initiator = with_initiator_rc(manager, path);
        avrcp(manager, path, AvrcpEvent::Opened { rc: spare, peer: PEER_B });
        assert_eq!(manager.tables().rcs.acceptor(), Some(listener));
        assert_eq!(manager.top_state(), TopState::Open);
        (initiator, spare)
    }

    #[test]
    fn test_closing_initiator_keeps_rc_only_session() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let (initiator, spare) = with_two_sessions(&mut manager, &mut path);
        let rc_only = manager.tables().rcs.find(spare).unwrap();

        avrcp(&mut manager, &mut path, AvrcpEvent::Closed { rc: initiator });

        assert_eq!(manager.tables().rcs.find(initiator), None);
        assert_eq!(manager.tables().relations.rc_of(slot(0)), None);
        let session = manager.tables().rcs.get(rc_only).unwrap();
        assert!(session.connected);
        assert_eq!(session.peer, PEER_B);
        assert_eq!(session.link, LinkIndex::RC_ONLY);
        assert_eq!(manager.tables().relations.stream_of(rc_only), None);
        let link = manager.tables().links.get(LinkIndex::RC_ONLY);
        assert!(link.in_use);
        assert_eq!(link.peer, PEER_B);
        assert_eq!(manager.tables().rcs.acceptor(), Some(rc_only));
        assert_eq!(manager.top_state(), TopState::Open);
    }

    #[test]
    fn test_closing_rc_only_session_keeps_initiator() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let (initiator, spare) = with_two_sessions(&mut manager, &mut path);
        let bound = manager.tables().rcs.find(initiator).unwrap();
        let opens = manager.platform().rc_opens.len();

        avrcp(&mut manager, &mut path, AvrcpEvent::Closed { rc: spare });

        assert_eq!(manager.tables().rcs.find(spare), None);
        assert!(!manager.tables().links.get(LinkIndex::RC_ONLY).in_use);
        let session = manager.tables().rcs.get(bound).unwrap();
        assert!(session.connected);
        assert_eq!(session.peer, PEER_A);
        assert_eq!(session.link, LinkIndex::new(0).unwrap());
        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(bound));
        assert_eq!(manager.top_state(), TopState::Open);
        // the closed channel is not closed again, a fresh listener replaces it
        assert!(!manager.platform().rc_closes.contains(&spare));
        assert_eq!(manager.platform().rc_opens.len(), opens + 1);
        let (role, peer, fresh) = *manager.platform().rc_opens.last().unwrap();
        assert_eq!((role, peer), (RcRole::Acceptor, None));
        assert_eq!(
            manager.tables().rcs.acceptor(),
            manager.tables().rcs.find(fresh)
        );
    }

    #[test]
    fn test_no_target_on_peer_reports_failure() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        manager.handle_event(
            Event::Sdp(SdpEvent::AvrcpRecord { peer: PEER_A, record: None }),
            &mut path,
        );
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::RcOpenFailed { peer } if *peer == PEER_A
        )));
        assert!(!manager.tables().streams.get(slot(0)).use_rc);
    }

    #[test]
    fn test_last_stream_close_drops_session() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let rc = with_initiator_rc(&mut manager, &mut path);

        transport(&mut manager, &mut path, TransportEvent::Closed { handle });
        assert!(manager.platform().rc_closes.contains(&rc));
        assert_eq!(manager.tables().relations.rc_of(slot(0)), None);

        avrcp(&mut manager, &mut path, AvrcpEvent::Closed { rc });
        assert_eq!(manager.top_state(), TopState::Init);
    }

    #[test]
    fn test_pass_through_screened() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });

        for op_id in [op::PLAY, 0x60] {
            avrcp(
                &mut manager,
                &mut path,
                AvrcpEvent::Message {
                    rc: RcHandle(1),
                    label: label(3),
                    msg: AvrcpMessage::PassThrough {
                        code: MessageCode::Control,
                        op_id,
                        pressed: true,
                        data: heapless::Vec::new(),
                    },
                },
            );
        }
        assert_eq!(
            manager.platform().pass_responses,
            [
                (RcHandle(1), MessageCode::Accepted, op::PLAY),
                (RcHandle(1), MessageCode::NotImplemented, 0x60),
            ]
        );
        let forwarded = manager
            .platform()
            .events
            .iter()
            .filter(|e| matches!(e, UpperEvent::RemoteCommand { .. }))
            .count();
        assert_eq!(forwarded, 1);
    }

    #[test]
    fn test_pass_through_refused_without_target() {
        let negotiator = negotiator();
        let options =
            AvOptions::default().with_features(AvFeatures(AvFeatures::RCCT | AvFeatures::METADATA));
        let (mut manager, _) = enabled(&negotiator, options);
        let mut path = MockPath::default();
        let rc = with_initiator_rc(&mut manager, &mut path);

        avrcp(
            &mut manager,
            &mut path,
            AvrcpEvent::Message {
                rc,
                label: label(1),
                msg: AvrcpMessage::PassThrough {
                    code: MessageCode::Control,
                    op_id: op::PLAY,
                    pressed: true,
                    data: heapless::Vec::new(),
                },
            },
        );
        assert_eq!(
            manager.platform().pass_responses,
            [(rc, MessageCode::NotImplemented, op::PLAY)]
        );
        assert!(!manager.platform().delivered(|e| matches!(e, UpperEvent::RemoteCommand { .. })));
    }

    #[test]
    fn test_vendor_commands_routed() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });
        let data = Payload::from_slice(&[0xAA, 0xBB]).unwrap();

        avrcp(
            &mut manager,
            &mut path,
            AvrcpEvent::Message {
                rc: RcHandle(1),
                label: label(2),
                msg: AvrcpMessage::Vendor {
                    code: MessageCode::Control,
                    subunit_panel: false,
                    company_id: 0x0000_1234,
                    data: data.clone(),
                },
            },
        );
        assert_eq!(
            manager.platform().vendor_responses,
            [(RcHandle(1), MessageCode::NotImplemented, 0x0000_1234, std::vec![0xAA, 0xBB])]
        );

        avrcp(
            &mut manager,
            &mut path,
            AvrcpEvent::Message {
                rc: RcHandle(1),
                label: label(4),
                msg: AvrcpMessage::Vendor {
                    code: MessageCode::Control,
                    subunit_panel: true,
                    company_id: 0x0000_1234,
                    data,
                },
            },
        );
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::VendorCommand { company_id: 0x0000_1234, .. }
        )));
    }

    #[test]
    fn test_browse_needs_local_support() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });
        avrcp(
            &mut manager,
            &mut path,
            AvrcpEvent::Message {
                rc: RcHandle(1),
                label: label(5),
                msg: AvrcpMessage::Browse {
                    data: Payload::from_slice(&[0x71]).unwrap(),
                },
            },
        );
        assert!(!manager.platform().delivered(|e| matches!(e, UpperEvent::BrowseMessage { .. })));
    }

    #[test]
    fn test_top_requests_need_open_session() {
        let negotiator = negotiator();
        let (mut manager, _) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        assert_eq!(
            manager.request(ApiRequest::RemoteCmd {
                rc: RcHandle(1),
                op_id: op::PLAY,
                pressed: true,
            }),
            Err(AvError::NotConnected)
        );
        // responses with nowhere to go are dropped quietly
        assert_eq!(
            manager.request(ApiRequest::MetaRsp {
                rc: RcHandle(1),
                label: label(1),
                code: MessageCode::Stable,
                data: Payload::new(),
            }),
            Ok(())
        );

        avrcp(&mut manager, &mut path, AvrcpEvent::Opened { rc: RcHandle(1), peer: PEER_A });
        assert_eq!(manager.request(ApiRequest::RcClose(RcHandle(9))), Err(AvError::InvalidHandle));
        manager.request(ApiRequest::RcClose(RcHandle(1))).unwrap();
        assert_eq!(manager.platform().rc_closes, [RcHandle(1)]);
    }
}
