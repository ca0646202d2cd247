//! Stream and link handling
//!
//! Executes the stream machine's actions, turns AVDTP completions into
//! stream events and keeps the Link Session table in step with the
//! signaling channels. Connection collisions, role switches and the
//! re-homing of an RC-only AVRCP connection onto a newly opened stream
//! are handled here.

use super::stream::{self, StreamAction, StreamContext, StreamEvent, StreamState};
use super::{Collision, RoleWait, find_link_slot};
use crate::a2dp::{
    A2dpStatus, GetConfigOutcome, ProtectInfo, Selection, SepType, UserConfigOutcome,
};
use crate::config::AvFeatures;
use crate::constants::{MAX_RC_SESSIONS, MAX_STREAMS};
use crate::events::{TransportEvent, UpperEvent};
use crate::handle::{Channel, LinkIndex, StreamHandle, StreamIndex};
use crate::interfaces::{AvPlatform, CodecDataPath, LinkRole, RcRole, TimerKind};
use crate::manager::{FollowUp, RcDiscTarget, SessionManager};
use crate::{AvError, BluetoothAddress};
use bt_hci::param::BdAddr;
use heapless::Vec;

/// Bit of a stream slot in the connected masks
const fn stream_bit(index: StreamIndex) -> u8 {
    1 << index.get()
}

impl<P: AvPlatform> SessionManager<'_, P> {
    /// Feed one event to a stream machine and run the resulting actions
    pub(crate) fn stream_event(&mut self, index: StreamIndex, event: StreamEvent) {
        let session = self.tables.streams.get(index);
        if !session.is_registered() {
            return;
        }
        let ctx = StreamContext {
            started: session.started,
            start_pending: session.start_pending,
            reconfig_count: session.reconfig_count,
            local_source: self.options.role == SepType::Source,
        };
        let from = session.state;
        let t = stream::transition(from, event, &ctx);
        if t.next != from {
            debug!("[AV] {:?} {:?} -> {:?} on {:?}", index, from, t.next, event);
        }
        self.tables.streams.get_mut(index).state = t.next;
        for action in t.actions {
            self.stream_action(index, action);
        }
    }

    fn stream_action(&mut self, index: StreamIndex, action: StreamAction) {
        let session = self.tables.streams.get(index);
        let Some(handle) = session.handle else {
            return;
        };
        let peer = session.peer;
        trace!("[AV] {:?} action {:?}", handle, action);

        match action {
            StreamAction::FindService => {
                if !self.role_switch_needed(index, RoleWait::Open) {
                    self.find_service(index);
                }
            }
            StreamAction::Connect => {
                self.tables
                    .streams
                    .get_mut(index)
                    .collision
                    .clear(Collision::INC_TIMER);
                self.timers.cancel(&mut self.platform, TimerKind::Accept(index));
                if self.tables.links.find(&peer).is_some() {
                    self.follow(FollowUp::Stream(index, StreamEvent::Connected));
                } else if let Err(e) = self.platform.connect(handle, peer) {
                    warn!("[AV] {:?} connect failed: {:?}", handle, e);
                    self.follow(FollowUp::Stream(index, StreamEvent::OpenFail));
                }
            }
            StreamAction::Discover => {
                if let Err(e) = self.platform.discover(handle, peer) {
                    warn!("[AV] {:?} discover failed: {:?}", handle, e);
                    self.follow(FollowUp::Stream(index, StreamEvent::DiscoverFail));
                }
            }
            StreamAction::FetchCaps => self.fetch_next_caps(index, handle, peer),
            StreamAction::SetConfig => self.set_config(index, handle, peer),
            StreamAction::OpenStream => {
                if let Err(e) = self.platform.open(handle) {
                    warn!("[AV] {:?} open failed: {:?}", handle, e);
                    self.follow(FollowUp::Stream(index, StreamEvent::OpenFail));
                }
            }
            StreamAction::StartStream => {
                if !self.role_switch_needed(index, RoleWait::Start) {
                    self.start_stream(index);
                }
            }
            StreamAction::SuspendStream => {
                if let Err(e) = self.platform.suspend(handle) {
                    warn!("[AV] {:?} suspend failed: {:?}", handle, e);
                    self.follow(FollowUp::Stream(index, StreamEvent::SuspendFail));
                }
            }
            StreamAction::CloseStream => {
                if let Err(e) = self.platform.close(handle) {
                    warn!("[AV] {:?} close failed: {:?}", handle, e);
                    self.follow(FollowUp::Stream(index, StreamEvent::Closed));
                }
            }
            StreamAction::Reconfigure => {
                let session = self.tables.streams.get_mut(index);
                session.reconfig_count += 1;
                let target = session.reconfig.or(session.selection);
                let sent = target.is_some_and(|sel| {
                    self.platform
                        .reconfigure(handle, &sel.config, sel.protect)
                        .is_ok()
                });
                if !sent {
                    self.follow(FollowUp::Stream(index, StreamEvent::ReconfigFail));
                }
            }
            StreamAction::Disconnect => {
                let in_use = self.tables.streams.by_peer(peer).any(|i| {
                    i != index && self.tables.streams.get(i).state != StreamState::Init
                });
                if !in_use && !peer.is_empty() {
                    self.platform.disconnect(peer);
                }
            }
            StreamAction::DeferOpen => {
                let session = self.tables.streams.get_mut(index);
                if session.collision.has(Collision::INC_TIMER) {
                    session.collision.set(Collision::API_CALLED);
                    debug!("[AV] {:?} open held until the accept timer fires", handle);
                } else {
                    let target = session.pending_open.take().unwrap_or(peer);
                    session.collision = Collision::default();
                    session.state = StreamState::Init;
                    self.follow(FollowUp::Open(index, target));
                }
            }
            StreamAction::ReportOpened => self.report_opened(index, handle, peer),
            StreamAction::ReportOpenFailed => {
                warn!("[AV] {:?} open to {:?} failed", handle, peer);
                self.platform.deliver(UpperEvent::OpenFailed { handle, peer });
                self.stream_reset(index);
            }
            StreamAction::ReportClosed => {
                info!("[AV] {:?} closed", handle);
                self.platform.deliver(UpperEvent::Closed { handle, peer });
                self.stream_reset(index);
            }
            StreamAction::ReportStarted { initiator } => {
                let session = self.tables.streams.get_mut(index);
                session.started = true;
                session.start_pending = false;
                session.initiator = initiator;
                let info = self.negotiator.lock(|n| n.process_start(index));
                self.platform.deliver(UpperEvent::Started {
                    handle,
                    initiator,
                    no_rtp_header: info.no_rtp_header,
                });
            }
            StreamAction::ReportStartFailed => {
                self.tables.streams.get_mut(index).start_pending = false;
                self.platform.deliver(UpperEvent::StartFailed { handle });
            }
            StreamAction::ReportSuspended { initiator } => {
                let session = self.tables.streams.get_mut(index);
                session.started = false;
                session.co_started = false;
                session.start_pending = false;
                session.initiator = initiator;
                self.negotiator.lock(|n| n.process_stop(index));
                self.platform.deliver(UpperEvent::Suspended { handle, initiator });
            }
            StreamAction::ReportReconfigured { ok } => {
                let session = self.tables.streams.get_mut(index);
                if ok {
                    if let Some(selection) = session.reconfig.take() {
                        session.selection = Some(selection);
                    }
                    session.reconfig_count = 0;
                } else {
                    session.reconfig = None;
                }
                self.report_codec_state(peer);
                self.platform.deliver(UpperEvent::Reconfigured { handle, ok });
            }
            StreamAction::ClearQueue => {
                let dropped = self.tables.streams.get_mut(index).fanout.clear();
                self.count_dropped(index, dropped);
            }
        }
    }

    fn count_dropped(&self, index: StreamIndex, dropped: usize) {
        if dropped > 0 {
            self.negotiator.lock(|n| {
                for _ in 0..dropped {
                    n.data_packet_dropped(index);
                }
            });
        }
    }

    fn find_service(&mut self, index: StreamIndex) {
        let session = self.tables.streams.get_mut(index);
        let Some(handle) = session.handle else {
            return;
        };
        let peer = session.peer;
        session.sdp_started = true;
        if let Err(e) = self
            .platform
            .find_a2dp(handle, peer, self.options.role.complement())
        {
            warn!("[AV] {:?} service search failed: {:?}", handle, e);
            self.tables.streams.get_mut(index).sdp_started = false;
            self.follow(FollowUp::Stream(index, StreamEvent::SdpDone { found: false }));
        }
    }

    /// A2DP record search finished
    pub(crate) fn a2dp_record(&mut self, index: StreamIndex, peer: BluetoothAddress, found: bool) {
        let session = self.tables.streams.get_mut(index);
        session.sdp_started = false;
        if session.peer != peer {
            warn!("[AV] A2DP record for {:?} does not match {:?}", peer, index);
            return;
        }
        self.stream_event(index, StreamEvent::SdpDone { found });
    }

    fn fetch_next_caps(&mut self, index: StreamIndex, handle: StreamHandle, peer: BluetoothAddress) {
        let session = self.tables.streams.get_mut(index);
        let seid = session.peer_seids.get(session.caps_cursor).copied();
        session.caps_cursor += 1;
        let sent = match seid {
            Some(seid) => match self.platform.get_capabilities(handle, peer, seid) {
                Ok(()) => true,
                Err(e) => {
                    warn!("[AV] {:?} get capabilities failed: {:?}", handle, e);
                    false
                }
            },
            None => {
                debug!("[AV] {:?} no peer endpoint left to query", handle);
                false
            }
        };
        if !sent {
            self.follow(FollowUp::Stream(index, StreamEvent::CapsFail));
        }
    }

    fn set_config(&mut self, index: StreamIndex, handle: StreamHandle, peer: BluetoothAddress) {
        let role = self.options.role;
        let session = self.tables.streams.get_mut(index);
        let selection = if session.state == StreamState::Reconfig {
            session.reconfig_count += 1;
            session.reconfig.or(session.selection)
        } else {
            session.selection
        };
        let local_seid =
            selection.and_then(|sel| session.local_endpoint(role, &sel.config).map(|e| e.seid));

        let sent = match (selection, local_seid) {
            (Some(sel), Some(local_seid)) => self
                .platform
                .set_config(handle, peer, local_seid, sel.seid, &sel.config, sel.protect)
                .is_ok(),
            _ => false,
        };
        if !sent {
            warn!("[AV] {:?} set configuration not sent", handle);
            self.follow(FollowUp::Stream(index, StreamEvent::ConfigConfirm { ok: false }));
        }
    }

    fn start_stream(&mut self, index: StreamIndex) {
        let session = self.tables.streams.get_mut(index);
        let Some(handle) = session.handle else {
            return;
        };
        session.start_pending = true;
        session.initiator = true;
        if let Err(e) = self.platform.start(handle) {
            warn!("[AV] {:?} start failed: {:?}", handle, e);
            self.follow(FollowUp::Stream(index, StreamEvent::StartFail));
        }
    }

    fn report_opened(&mut self, index: StreamIndex, handle: StreamHandle, peer: BluetoothAddress) {
        self.conn_up(index);
        let mtu = self.tables.streams.get(index).mtu;
        let codec = self.negotiator.lock(|n| {
            n.process_open(index, mtu);
            n.peer(index).codec_config.and_then(|c| c.codec_index())
        });

        let in_place = self.reconfig_in_place(index);
        let session = self.tables.streams.get_mut(index);
        session.reconfig_count = 0;
        session.collision = Collision::default();
        let acceptor = session.acceptor;
        let use_rc = session.use_rc;
        let reconfig_after_open = core::mem::take(&mut session.reconfig_after_open);
        self.timers.cancel(&mut self.platform, TimerKind::Accept(index));

        info!("[AV] {:?} opened to {:?}, codec {:?}", handle, peer, codec);
        self.platform.deliver(UpperEvent::Opened { handle, peer, codec });
        self.check_start(index);

        if acceptor {
            // give the peer the chance to open AVRCP first
            self.timers.arm(
                &mut self.platform,
                TimerKind::RcOpen(index),
                self.options.rc_open_timeout,
            );
        } else if use_rc && !self.peer_rc_connected(peer) {
            self.rc_disc(RcDiscTarget::Stream(index), peer);
        }
        if reconfig_after_open {
            self.follow(FollowUp::Stream(index, StreamEvent::ApiReconfig { in_place }));
        }
    }

    /// Forget everything about the stream's peer
    pub(crate) fn stream_reset(&mut self, index: StreamIndex) {
        if self.connected & stream_bit(index) != 0 {
            self.conn_down(index);
        }
        self.negotiator.lock(|n| n.process_close(index));
        let dropped = self.tables.streams.get_mut(index).on_disconnected();
        self.count_dropped(index, dropped);
        for kind in [
            TimerKind::Accept(index),
            TimerKind::RoleSwitch(index),
            TimerKind::RcOpen(index),
        ] {
            self.timers.cancel(&mut self.platform, kind);
        }
    }

    /// Handle one AVDTP event
    pub(crate) fn transport_event(&mut self, event: TransportEvent, path: &mut impl CodecDataPath) {
        match event {
            TransportEvent::SignalingConnected { peer } => self.sig_connect(peer),
            TransportEvent::SignalingDisconnected { peer } => self.sig_disconnect(peer),
            event => {
                let Some(handle) = event.handle() else {
                    return;
                };
                match self.tables.streams.lookup(handle) {
                    Ok(index) => self.stream_transport_event(index, handle, event, path),
                    Err(_) => warn!("[AV] transport event for unknown {:?}", handle),
                }
            }
        }
    }

    fn stream_transport_event(
        &mut self,
        index: StreamIndex,
        handle: StreamHandle,
        event: TransportEvent,
        path: &mut impl CodecDataPath,
    ) {
        match event {
            TransportEvent::DiscoverResult {
                peer,
                num_seps,
                num_sinks,
                num_sources,
                seids,
                ..
            } => {
                self.negotiator.lock(|n| {
                    n.process_discovery_result(index, peer, num_seps, num_sinks, num_sources);
                });
                let empty = seids.is_empty();
                let session = self.tables.streams.get_mut(index);
                session.peer_seids = seids;
                session.caps_cursor = 0;
                let next = if empty {
                    StreamEvent::DiscoverFail
                } else {
                    StreamEvent::DiscoverOk
                };
                self.stream_event(index, next);
            }
            TransportEvent::DiscoverFailed { .. } => {
                self.stream_event(index, StreamEvent::DiscoverFail);
            }
            TransportEvent::Capabilities {
                peer,
                sep_info_index,
                seid,
                codec,
                protect,
                ..
            } => self.capabilities(index, peer, &codec, sep_info_index, seid, protect),
            TransportEvent::CapabilitiesFailed {
                peer,
                sep_info_index,
                ..
            } => self.capabilities(index, peer, &[], sep_info_index, 0, ProtectInfo::NONE),
            TransportEvent::ConfigIndication {
                peer,
                label,
                codec,
                protect,
                ..
            } => self.config_indication(index, handle, peer, label, &codec, protect),
            TransportEvent::ConfigConfirm { ok, .. } => {
                self.stream_event(index, StreamEvent::ConfigConfirm { ok });
            }
            TransportEvent::Opened { peer, mtu, .. } => {
                let session = self.tables.streams.get_mut(index);
                session.mtu = mtu;
                let state = session.state;
                if !session.is_connected() {
                    if let Err(e) = self.tables.streams.bind_peer(index, peer) {
                        warn!("[AV] {:?} opened by unexpected peer: {:?}", handle, e);
                    }
                }
                if state == StreamState::Reconfig {
                    self.negotiator.lock(|n| n.update_mtu(index, mtu));
                }
                self.stream_event(index, StreamEvent::OpenOk);
            }
            TransportEvent::OpenFailed { .. } => self.stream_event(index, StreamEvent::OpenFail),
            TransportEvent::StartConfirm { ok, .. } => {
                let next = if ok {
                    StreamEvent::StartOk
                } else {
                    StreamEvent::StartFail
                };
                self.stream_event(index, next);
            }
            TransportEvent::StartIndication { .. } => {
                self.stream_event(index, StreamEvent::StartIndication);
            }
            TransportEvent::SuspendConfirm { ok, .. } => {
                let next = if ok {
                    StreamEvent::SuspendOk
                } else {
                    StreamEvent::SuspendFail
                };
                self.stream_event(index, next);
            }
            TransportEvent::SuspendIndication { .. } => {
                self.stream_event(index, StreamEvent::SuspendIndication);
            }
            TransportEvent::Closed { .. } => self.stream_event(index, StreamEvent::Closed),
            TransportEvent::ReconfigureConfirm { ok, .. } => {
                let next = if ok {
                    StreamEvent::ReconfigOk
                } else {
                    StreamEvent::ReconfigFail
                };
                self.stream_event(index, next);
            }
            TransportEvent::DelayReport { delay, .. } => {
                self.negotiator.lock(|n| n.process_delay_report(index, delay));
                self.platform.deliver(UpperEvent::DelayReport { handle, delay });
            }
            TransportEvent::Media { frame, .. } => {
                match self.negotiator.lock(|n| n.peer(index).codec_config) {
                    Some(codec) => path.deliver_sink_frame(&codec, &frame),
                    None => warn!("[AV] {:?} media before configuration", handle),
                }
            }
            TransportEvent::SignalingConnected { .. } | TransportEvent::SignalingDisconnected { .. } => {}
        }
    }

    fn capabilities(
        &mut self,
        index: StreamIndex,
        peer: BluetoothAddress,
        codec: &[u8],
        sep_info_index: u8,
        seid: u8,
        protect: ProtectInfo,
    ) {
        let outcome = self.negotiator.lock(|n| {
            n.process_get_config(index, peer, codec, sep_info_index, seid, protect)
        });
        match outcome {
            Ok(GetConfigOutcome::Pending) => self.stream_action(index, StreamAction::FetchCaps),
            Ok(GetConfigOutcome::Selected(selection)) => {
                self.report_codec_state(peer);
                if selection.reconfigure {
                    self.start_reconfig(index, selection);
                    return;
                }
                let session = self.tables.streams.get_mut(index);
                session.selection = Some(selection);
                if session.state == StreamState::Opening {
                    self.stream_event(index, StreamEvent::CapsSelected);
                }
            }
            Err(e) => {
                warn!("[AV] {:?} codec selection failed: {:?}", index, e);
                self.stream_event(index, StreamEvent::CapsFail);
            }
        }
    }

    fn config_indication(
        &mut self,
        index: StreamIndex,
        handle: StreamHandle,
        peer: BluetoothAddress,
        label: u8,
        codec: &[u8],
        protect: ProtectInfo,
    ) {
        let session = self.tables.streams.get(index);
        let state = session.state;
        let busy = matches!(
            state,
            StreamState::Open | StreamState::Reconfig | StreamState::Closing
        ) || (session.is_connected() && session.peer != peer);
        if busy || self.tables.streams.bind_peer(index, peer).is_err() {
            warn!("[AV] {:?} configuration from {:?} refused in {:?}", handle, peer, state);
            self.platform
                .config_response(handle, label, A2dpStatus::Busy, None);
            return;
        }

        match self
            .negotiator
            .lock(|n| n.process_set_config(index, peer, codec, protect))
        {
            Ok(accept) => {
                debug!("[AV] {:?} configured by peer with {:?}", handle, accept.codec);
                self.tables.streams.get_mut(index).acceptor = true;
                self.platform
                    .config_response(handle, label, A2dpStatus::Success, None);
                self.stream_event(index, StreamEvent::ConfigIndication { accepted: true });
            }
            Err(reject) => {
                self.platform.config_response(
                    handle,
                    label,
                    reject.status,
                    Some(reject.category),
                );
                self.stream_event(index, StreamEvent::ConfigIndication { accepted: false });
                if state == StreamState::Init {
                    self.tables.streams.get_mut(index).peer = BluetoothAddress::EMPTY;
                }
            }
        }
    }

    /// Incoming signaling channel
    fn sig_connect(&mut self, peer: BluetoothAddress) {
        if self.tables.links.find(&peer).is_some() {
            debug!("[AV] signaling to {:?} already known", peer);
            return;
        }
        let Some(index) = find_link_slot(&self.tables.streams, &self.tables.links, &peer) else {
            warn!("[AV] no stream slot for {:?}, dropping signaling", peer);
            self.platform.disconnect(peer);
            return;
        };
        let Ok(link) = LinkIndex::new(index.get()) else {
            return;
        };
        self.tables.links.occupy(link, peer);

        let session = self.tables.streams.get(index);
        if session.state == StreamState::Opening && session.peer == peer {
            if session.sdp_started {
                // our own open is still searching; hold it back like an incoming one
                self.tables
                    .streams
                    .get_mut(index)
                    .collision
                    .set(Collision::INC_TIMER);
                self.timers.arm(
                    &mut self.platform,
                    TimerKind::Accept(index),
                    self.options.accept_timeout,
                );
            } else {
                self.follow(FollowUp::Stream(index, StreamEvent::Connected));
            }
            return;
        }

        if let Err(e) = self.tables.streams.bind_peer(index, peer) {
            warn!("[AV] {:?} cannot take {:?}: {:?}", index, peer, e);
            self.platform.disconnect(peer);
            self.tables.links.release(link);
            return;
        }
        if self.options.features.any(AvFeatures::RCTG) {
            self.rc_create(RcRole::Acceptor, Some(index), link);
        }
        let session = self.tables.streams.get_mut(index);
        session.use_rc = true;
        info!("[AV] {:?} accepted signaling from {:?}", index, peer);
        self.stream_event(index, StreamEvent::Accept);
        self.check_pending_links();

        self.tables
            .streams
            .get_mut(index)
            .collision
            .set(Collision::INC_TIMER);
        self.timers.arm(
            &mut self.platform,
            TimerKind::Accept(index),
            self.options.accept_timeout,
        );
    }

    fn sig_disconnect(&mut self, peer: BluetoothAddress) {
        debug!("[AV] signaling to {:?} lost", peer);
        let streams: Vec<StreamIndex, MAX_STREAMS> = self.tables.streams.by_peer(peer).collect();
        for index in streams {
            self.stream_event(index, StreamEvent::SignalingDown);
        }
        let leftover: Vec<StreamIndex, MAX_STREAMS> = self
            .tables
            .streams
            .by_peer(peer)
            .filter(|i| self.tables.streams.get(*i).state == StreamState::Init)
            .collect();
        for index in leftover {
            self.stream_reset(index);
        }
        if let Some(link) = self.tables.links.find(&peer) {
            self.tables.links.release(link);
        }
        if self.tables.links.in_use().next().is_none() {
            self.timers.cancel(&mut self.platform, TimerKind::Signalling);
        }
    }

    /// Report links whose peer connected signaling but opened nothing yet
    pub(crate) fn check_pending_links(&mut self) {
        let pending: Vec<(LinkIndex, BluetoothAddress), MAX_STREAMS> = self
            .tables
            .links
            .in_use()
            .filter(|(_, l)| l.conn_mask == 0)
            .map(|(i, l)| (i, l.peer))
            .collect();
        if pending.is_empty() {
            return;
        }
        self.timers.arm(
            &mut self.platform,
            TimerKind::Signalling,
            self.options.signalling_timeout,
        );
        for (link, peer) in pending {
            let handle = StreamIndex::new(link.get())
                .ok()
                .and_then(|i| self.tables.streams.get(i).handle);
            if let Some(handle) = handle {
                self.platform
                    .deliver(UpperEvent::PendingConnection { handle, peer });
            }
        }
    }

    /// Collision window of an incoming connection ended
    pub(crate) fn accept_timer_fired(&mut self, index: StreamIndex) {
        let session = self.tables.streams.get_mut(index);
        if !session.collision.has(Collision::INC_TIMER) {
            return;
        }
        session.collision.clear(Collision::INC_TIMER);
        match session.state {
            StreamState::Opening if session.sdp_started => {
                session.collision.set(Collision::INC_TIMER);
                self.timers.arm(
                    &mut self.platform,
                    TimerKind::Accept(index),
                    self.options.accept_timeout,
                );
            }
            StreamState::Opening => {
                self.follow(FollowUp::Stream(index, StreamEvent::Connected));
            }
            StreamState::Incoming if session.collision.has(Collision::API_CALLED) => {
                session.collision.clear(Collision::API_CALLED);
                debug!("[AV] {:?} peer stayed silent, running the held open", index);
                self.follow(FollowUp::Stream(index, StreamEvent::ApiOpen));
            }
            _ => {}
        }
    }

    /// Delayed AVRCP open after a stream opened as acceptor
    pub(crate) fn rc_open_timer_fired(&mut self, index: StreamIndex) {
        let session = self.tables.streams.get(index);
        if session.state != StreamState::Open {
            return;
        }
        let peer = session.peer;
        if !self.peer_rc_connected(peer) {
            self.rc_disc(RcDiscTarget::Stream(index), peer);
        }
    }

    pub(crate) fn peer_rc_connected(&self, peer: BluetoothAddress) -> bool {
        self.tables
            .rcs
            .iter()
            .any(|(_, s)| s.connected && s.peer == peer)
    }

    fn audio_connected(&self) -> Vec<StreamIndex, MAX_STREAMS> {
        self.tables
            .streams
            .iter()
            .filter(|(i, s)| s.channel == Channel::Audio && self.connected & stream_bit(*i) != 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Stream opened: account it on its link and adopt an RC-only AVRCP connection
    fn conn_up(&mut self, index: StreamIndex) {
        let peer = self.tables.streams.get(index).peer;
        let link = self.tables.links.find(&peer).or_else(|| {
            let link = LinkIndex::new(index.get()).ok()?;
            if self.tables.links.get(link).in_use {
                return None;
            }
            self.tables.links.occupy(link, peer);
            Some(link)
        });
        let bit = stream_bit(index);
        self.connected |= bit;
        if let Some(link) = link {
            self.tables.links.get_mut(link).conn_mask |= bit;
            self.rehome_rc_only(index, peer, link);
        }

        let audio = self.audio_connected();
        if audio.len() >= 2 {
            for i in &audio {
                let addr: BdAddr = self.tables.streams.get(*i).peer.into();
                self.platform.allow_role_switch(&addr, false);
            }
        }
    }

    /// Move the AVRCP connection of an RC-only peer onto the stream that just opened
    fn rehome_rc_only(&mut self, index: StreamIndex, peer: BluetoothAddress, link: LinkIndex) {
        let rc_only = self.tables.links.get(LinkIndex::RC_ONLY);
        if !rc_only.in_use || rc_only.peer != peer {
            return;
        }
        let connected = self
            .tables
            .rcs
            .iter()
            .find(|(_, s)| s.connected && s.link == LinkIndex::RC_ONLY && s.peer == peer)
            .map(|(i, _)| i);
        let Some(rc) = connected else {
            return;
        };

        self.tables.links.release(LinkIndex::RC_ONLY);
        let previous = self.tables.relations.rc_of(index);
        self.tables.relations.bind(index, rc);
        if let Some(session) = self.tables.rcs.get_mut(rc) {
            session.link = link;
        }
        debug!("[RC] {:?} re-homed onto {:?}", rc, index);

        let acceptor = self.tables.rcs.acceptor();
        let was_acceptor = acceptor == Some(rc);
        match previous {
            Some(previous) if previous != rc && (was_acceptor || acceptor.is_none()) => {
                // the stream's own listener takes over the RC-only slot
                if let Some(session) = self.tables.rcs.get_mut(previous) {
                    session.link = LinkIndex::RC_ONLY;
                }
                self.tables.rcs.set_acceptor(Some(previous));
            }
            Some(previous) if previous != rc => self.del_rc(previous),
            _ if was_acceptor => {
                self.tables.rcs.set_acceptor(None);
                self.ensure_listener();
            }
            _ => {}
        }
    }

    fn conn_down(&mut self, index: StreamIndex) {
        let bit = stream_bit(index);
        self.connected &= !bit;
        let peer = self.tables.streams.get(index).peer;
        if let Some(link) = self.tables.links.find(&peer) {
            self.tables.links.get_mut(link).conn_mask &= !bit;
        }
        self.timers.cancel(&mut self.platform, TimerKind::RcOpen(index));
        if let Some(rc) = self.tables.relations.rc_of(index) {
            self.del_rc(rc);
        }
        if self.connected == 0 {
            self.close_all_rc();
        }
        self.ensure_listener();

        let audio = self.audio_connected();
        if let [only] = audio[..] {
            let addr: BdAddr = self.tables.streams.get(only).peer.into();
            self.platform.allow_role_switch(&addr, true);
        }
    }

    /// Start a newly opened audio stream alongside the ones already streaming
    fn check_start(&mut self, index: StreamIndex) {
        if self.tables.streams.get(index).channel != Channel::Audio {
            return;
        }
        let others_started = self
            .audio_connected()
            .iter()
            .any(|i| *i != index && self.tables.streams.get(*i).started);
        if others_started {
            self.tables.streams.get_mut(index).co_started = true;
            self.follow(FollowUp::Stream(index, StreamEvent::ApiStart));
        }
    }

    /// Ask to become central before an open or start; true if the operation is held
    fn role_switch_needed(&mut self, index: StreamIndex, wait: RoleWait) -> bool {
        let session = self.tables.streams.get(index);
        if session.channel != Channel::Audio {
            return false;
        }
        let addr: BdAddr = session.peer.into();
        let others = self.audio_connected().iter().any(|i| *i != index);
        let wanted = others || self.options.features.any(AvFeatures::MASTER);
        if !wanted || self.platform.role(&addr) != LinkRole::Peripheral {
            return false;
        }
        match self.platform.request_role_switch(&addr) {
            Ok(()) => {
                debug!("[AV] {:?} waiting for role switch ({:?})", index, wait);
                self.tables.streams.get_mut(index).role_wait = Some(wait);
                self.timers.arm(
                    &mut self.platform,
                    TimerKind::RoleSwitch(index),
                    self.options.role_switch_timeout,
                );
                true
            }
            Err(e) => {
                warn!("[AV] role switch request refused: {:?}", e);
                false
            }
        }
    }

    /// Role switch finished for every stream waiting on `peer`
    pub(crate) fn role_changed(&mut self, peer: BluetoothAddress, success: bool) {
        let waiting: Vec<StreamIndex, MAX_STREAMS> = self
            .tables
            .streams
            .by_peer(peer)
            .filter(|i| self.tables.streams.get(*i).role_wait.is_some())
            .collect();
        for index in waiting {
            self.timers
                .cancel(&mut self.platform, TimerKind::RoleSwitch(index));
            self.resume_after_role_switch(index, success);
        }
    }

    /// Continue the operation held for a role switch
    pub(crate) fn resume_after_role_switch(&mut self, index: StreamIndex, success: bool) {
        let session = self.tables.streams.get_mut(index);
        let Some(wait) = session.role_wait.take() else {
            return;
        };
        let state = session.state;
        match (wait, success) {
            (RoleWait::Open, true) if state == StreamState::Opening => self.find_service(index),
            (RoleWait::Start, true) if state == StreamState::Open => self.start_stream(index),
            (RoleWait::Open, false) => {
                self.follow(FollowUp::Stream(index, StreamEvent::SdpDone { found: false }));
            }
            (RoleWait::Start, false) => {
                self.follow(FollowUp::Stream(index, StreamEvent::StartFail));
            }
            _ => debug!("[AV] {:?} left {:?} before the role switch ended", index, wait),
        }
    }

    /// Local open of a stream slot
    pub(crate) fn api_open(&mut self, index: StreamIndex, peer: BluetoothAddress) -> Result<(), AvError> {
        if peer.is_empty() {
            return Err(AvError::InvalidParameter);
        }
        let session = self.tables.streams.get(index);
        match session.state {
            StreamState::Init => {
                self.tables.streams.bind_peer(index, peer)?;
                let session = self.tables.streams.get_mut(index);
                session.use_rc = true;
                session.acceptor = false;
            }
            StreamState::Incoming if session.peer == peer => {
                self.tables.streams.get_mut(index).pending_open = Some(peer);
            }
            _ => return Err(AvError::InvalidState),
        }
        self.stream_event(index, StreamEvent::ApiOpen);
        Ok(())
    }

    pub(crate) fn api_start(&mut self, index: StreamIndex) -> Result<(), AvError> {
        match self.tables.streams.get(index).state {
            StreamState::Open | StreamState::Reconfig => {
                self.stream_event(index, StreamEvent::ApiStart);
                Ok(())
            }
            _ => Err(AvError::InvalidState),
        }
    }

    pub(crate) fn api_stop(&mut self, index: StreamIndex, suspend: bool) -> Result<(), AvError> {
        if self.tables.streams.get(index).state != StreamState::Open {
            return Err(AvError::InvalidState);
        }
        self.stream_event(index, StreamEvent::ApiStop { suspend });
        Ok(())
    }

    /// Reconfigure an open stream to the codec parameters in `codec`
    pub(crate) fn api_reconfigure(
        &mut self,
        index: StreamIndex,
        codec: &crate::a2dp::CodecInfo,
    ) -> Result<(), AvError> {
        let session = self.tables.streams.get(index);
        if session.state != StreamState::Open {
            return Err(AvError::InvalidState);
        }
        let peer = session.peer;
        let caps = crate::a2dp::CodecCapabilities::parse(codec)?;
        let outcome = self
            .negotiator
            .lock(|n| n.set_codec_audio_config(&peer, caps))?;
        self.apply_codec_outcome(peer, outcome)
    }

    pub(crate) fn api_rc_open(&mut self, index: StreamIndex) -> Result<(), AvError> {
        let peer = self.tables.streams.get(index).peer;
        if peer.is_empty() {
            return Err(AvError::NotConnected);
        }
        if self.peer_rc_connected(peer) {
            return Ok(());
        }
        self.tables.streams.get_mut(index).use_rc = true;
        self.rc_disc(RcDiscTarget::Stream(index), peer);
        Ok(())
    }

    /// Tear down every stream and RC session of a peer
    pub(crate) fn disconnect_peer(&mut self, peer: BluetoothAddress) -> Result<(), AvError> {
        let streams: Vec<StreamIndex, MAX_STREAMS> = self.tables.streams.by_peer(peer).collect();
        let rc_only = self.tables.links.get(LinkIndex::RC_ONLY);
        let rc_only_peer = rc_only.in_use && rc_only.peer == peer;
        if streams.is_empty() && !rc_only_peer {
            return Err(AvError::NotConnected);
        }
        for index in streams {
            self.stream_event(index, StreamEvent::ApiClose);
        }
        let handles: Vec<crate::handle::RcHandle, MAX_RC_SESSIONS> = self
            .tables
            .rcs
            .iter()
            .filter(|(_, s)| s.connected && s.peer == peer)
            .map(|(_, s)| s.handle)
            .collect();
        for handle in handles {
            self.platform.close_rc(handle);
        }
        self.platform.disconnect(peer);
        Ok(())
    }

    /// Act on the result of a codec preference change
    pub(crate) fn apply_codec_outcome(
        &mut self,
        peer: BluetoothAddress,
        outcome: UserConfigOutcome,
    ) -> Result<(), AvError> {
        self.report_codec_state(peer);
        match outcome {
            UserConfigOutcome::Unchanged | UserConfigOutcome::Deferred => Ok(()),
            UserConfigOutcome::Reconfigure(selection) => {
                let index = self
                    .negotiator
                    .lock(|n| n.find_peer(&peer))
                    .ok_or(AvError::NotConnected)?;
                self.start_reconfig(index, selection);
                Ok(())
            }
        }
    }

    fn reconfig_in_place(&self, index: StreamIndex) -> bool {
        let session = self.tables.streams.get(index);
        match (session.selection, session.reconfig) {
            (Some(current), Some(next)) => current.sep_info_index == next.sep_info_index,
            _ => false,
        }
    }

    /// Switch a stream to `selection`, now or once it is open
    fn start_reconfig(&mut self, index: StreamIndex, selection: Selection) {
        self.tables.streams.get_mut(index).reconfig = Some(selection);
        let in_place = self.reconfig_in_place(index);
        let session = self.tables.streams.get_mut(index);
        match session.state {
            StreamState::Open => {
                self.stream_event(index, StreamEvent::ApiReconfig { in_place });
            }
            StreamState::Incoming | StreamState::Opening => session.reconfig_after_open = true,
            StreamState::Init => session.reconfig = None,
            state => debug!("[AV] {:?} reconfiguration ignored in {:?}", index, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::a2dp::{A2dpStatus, CodecIndex, ProtectInfo, SepType};
    use crate::av::{Collision, StreamState};
    use crate::config::{AvFeatures, AvOptions};
    use crate::constants::{DEFAULT_ACCEPT_TIMEOUT, DEFAULT_RC_OPEN_TIMEOUT, DEFAULT_SIGNALLING_TIMEOUT};
    use crate::events::{ApiRequest, AvrcpEvent, CodecBytes, Event, TransportEvent, UpperEvent};
    use crate::handle::{Channel, LinkIndex, RcIndex, StreamHandle, StreamIndex};
    use crate::interfaces::{LinkRole, RcRole, TimerKind};
    use crate::manager::tests::*;

    fn slot(n: usize) -> StreamIndex {
        StreamIndex::new(n).unwrap()
    }

    fn timer_token(manager: &Manager<'_>, kind: TimerKind) -> crate::interfaces::TimerToken {
        manager
            .platform()
            .armed
            .iter()
            .rev()
            .find(|(t, _)| t.kind == kind)
            .unwrap()
            .0
    }

    #[test]
    fn test_incoming_signaling_arms_timers() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let listener = manager.tables().rcs.acceptor().unwrap();

        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });

        let link = LinkIndex::new(0).unwrap();
        assert_eq!(manager.tables().links.find(&PEER_A), Some(link));
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Incoming));
        assert_eq!(manager.platform().armed_kind(TimerKind::Signalling), Some(DEFAULT_SIGNALLING_TIMEOUT));
        assert_eq!(manager.platform().armed_kind(TimerKind::Accept(slot(0))), Some(DEFAULT_ACCEPT_TIMEOUT));
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::PendingConnection { peer, .. } if *peer == PEER_A
        )));

        // a listener of its own for the stream, the RC-only one stays put
        let own = manager.tables().relations.rc_of(slot(0)).unwrap();
        assert_ne!(own, listener);
        assert_eq!(manager.tables().rcs.get(own).unwrap().link, link);
        assert_eq!(manager.tables().rcs.acceptor(), Some(listener));
        assert_eq!(manager.tables().rcs.get(listener).unwrap().link, LinkIndex::RC_ONLY);
    }

    #[test]
    fn test_peer_configures_and_opens() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        transport(
            &mut manager,
            &mut path,
            TransportEvent::ConfigIndication {
                handle,
                peer: PEER_A,
                label: 3,
                codec: config_bytes(CodecIndex::Sbc),
                protect: ProtectInfo::NONE,
            },
        );
        assert_eq!(manager.platform().config_responses, [(3, A2dpStatus::Success)]);
        // the source learns the peer endpoints itself
        assert_eq!(manager.platform().discovers, [handle]);

        transport(&mut manager, &mut path, TransportEvent::Opened { handle, peer: PEER_A, mtu: 895 });
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Open));
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::Opened { codec: Some(CodecIndex::Sbc), .. }
        )));
        assert_eq!(manager.platform().armed_kind(TimerKind::RcOpen(slot(0))), Some(DEFAULT_RC_OPEN_TIMEOUT));
        assert_eq!(manager.tables().links.get(LinkIndex::new(0).unwrap()).conn_mask, 1);
        assert!(manager.platform().avrcp_searches.is_empty());

        // nobody opened AVRCP in time: look the peer up ourselves
        let token = timer_token(&manager, TimerKind::RcOpen(slot(0)));
        manager.handle_event(Event::Timer(token), &mut path);
        assert_eq!(manager.platform().avrcp_searches, [PEER_A]);
    }

    /// AVRCP from `PEER_A` lands on the spare listener before any stream
    fn rc_only_peer(manager: &mut Manager<'_>, path: &mut MockPath) -> RcIndex {
        let listener = manager.tables().rcs.acceptor().unwrap();
        let rc = manager.tables().rcs.get(listener).unwrap().handle;
        manager.handle_event(Event::Avrcp(AvrcpEvent::Opened { rc, peer: PEER_A }), path);
        assert_eq!(manager.tables().links.get(LinkIndex::RC_ONLY).peer, PEER_A);
        listener
    }

    fn accept_stream(manager: &mut Manager<'_>, path: &mut MockPath, handle: StreamHandle) {
        transport(
            manager,
            path,
            TransportEvent::ConfigIndication {
                handle,
                peer: PEER_A,
                label: 1,
                codec: config_bytes(CodecIndex::Sbc),
                protect: ProtectInfo::NONE,
            },
        );
        transport(manager, path, TransportEvent::Opened { handle, peer: PEER_A, mtu: 672 });
    }

    #[test]
    fn test_rehome_drops_own_listener_when_another_listens() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let rc_only = rc_only_peer(&mut manager, &mut path);
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        let own = manager.tables().relations.rc_of(slot(0)).unwrap();
        let own_handle = manager.tables().rcs.get(own).unwrap().handle;

        // the RC-only session gave up the listener role before the stream opened
        manager.tables.rcs.set_acceptor(None);
        manager.ensure_listener();
        let fresh = manager.tables().rcs.acceptor().unwrap();
        assert_ne!(fresh, rc_only);

        accept_stream(&mut manager, &mut path, handle);

        let link = LinkIndex::new(0).unwrap();
        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(rc_only));
        assert_eq!(manager.tables().rcs.get(rc_only).unwrap().link, link);
        assert!(manager.tables().rcs.get(rc_only).unwrap().connected);
        assert!(!manager.tables().links.get(LinkIndex::RC_ONLY).in_use);
        // the stream's own listener is not needed any more
        assert_eq!(manager.tables().rcs.find(own_handle), None);
        assert!(manager.platform().rc_closes.contains(&own_handle));
        assert_eq!(manager.tables().rcs.acceptor(), Some(fresh));
        assert_eq!(manager.tables().rcs.get(fresh).unwrap().link, LinkIndex::RC_ONLY);
    }

    #[test]
    fn test_rehome_without_own_listener_opens_a_new_one() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        let rc_only = rc_only_peer(&mut manager, &mut path);
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        let own = manager.tables().relations.rc_of(slot(0)).unwrap();
        manager.del_rc(own);
        assert_eq!(manager.tables().relations.rc_of(slot(0)), None);
        let opens = manager.platform().rc_opens.len();

        accept_stream(&mut manager, &mut path, handle);

        assert_eq!(manager.tables().relations.rc_of(slot(0)), Some(rc_only));
        assert_eq!(
            manager.tables().rcs.get(rc_only).unwrap().link,
            LinkIndex::new(0).unwrap()
        );
        assert!(!manager.tables().links.get(LinkIndex::RC_ONLY).in_use);
        // the adopted session stops listening, a fresh one takes the spare slot
        assert_eq!(manager.platform().rc_opens.len(), opens + 1);
        let (role, peer, fresh) = *manager.platform().rc_opens.last().unwrap();
        assert_eq!((role, peer), (RcRole::Acceptor, None));
        let listener = manager.tables().rcs.acceptor().unwrap();
        assert_ne!(listener, rc_only);
        assert_eq!(manager.tables().rcs.get(listener).unwrap().handle, fresh);
        assert_eq!(manager.tables().rcs.get(listener).unwrap().link, LinkIndex::RC_ONLY);
    }

    #[test]
    fn test_configuration_refused_while_open() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        transport(
            &mut manager,
            &mut path,
            TransportEvent::ConfigIndication {
                handle,
                peer: PEER_A,
                label: 7,
                codec: config_bytes(CodecIndex::Sbc),
                protect: ProtectInfo::NONE,
            },
        );
        assert_eq!(manager.platform().config_responses, [(7, A2dpStatus::Busy)]);
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Open));
    }

    #[test]
    fn test_unusable_configuration_rejected() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        transport(
            &mut manager,
            &mut path,
            TransportEvent::ConfigIndication {
                handle,
                peer: PEER_A,
                label: 1,
                codec: CodecBytes::from_slice(&[0x02, 0x00, 0xFF]).unwrap(),
                protect: ProtectInfo::NONE,
            },
        );
        assert_eq!(manager.platform().config_responses, [(1, A2dpStatus::WrongCodec)]);
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Init));
        let index = manager.tables().streams.lookup(handle).unwrap();
        assert!(!manager.tables().streams.get(index).is_connected());
    }

    #[test]
    fn test_second_stream_to_same_peer_rejected() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let second = manager
            .register(Channel::Audio, &[endpoint(1, CodecIndex::Sbc)])
            .unwrap();
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        assert_eq!(
            manager.request(ApiRequest::Open { handle: second, peer: PEER_A }),
            Err(crate::AvError::InvalidState)
        );
        manager.request(ApiRequest::Open { handle: second, peer: PEER_B }).unwrap();
        assert_eq!(manager.stream_state(second), Ok(StreamState::Opening));
    }

    #[test]
    fn test_local_open_waits_out_collision_window() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        manager.request(ApiRequest::Open { handle, peer: PEER_A }).unwrap();

        let collision = manager.tables().streams.get(slot(0)).collision;
        assert!(collision.has(Collision::API_CALLED));
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Incoming));
        assert!(manager.platform().a2dp_searches.is_empty());

        let token = timer_token(&manager, TimerKind::Accept(slot(0)));
        manager.handle_event(Event::Timer(token), &mut path);
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Opening));
        assert_eq!(manager.platform().a2dp_searches, [(PEER_A, SepType::Sink)]);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        transport(&mut manager, &mut path, TransportEvent::SignalingConnected { peer: PEER_A });
        manager.request(ApiRequest::Open { handle, peer: PEER_A }).unwrap();
        let stale = timer_token(&manager, TimerKind::Accept(slot(0)));
        manager.handle_event(Event::Timer(stale), &mut path);
        // the held open ran and re-armed nothing; a repeat of the same token is stale
        manager.handle_event(Event::Timer(stale), &mut path);
        assert_eq!(manager.platform().a2dp_searches.len(), 1);
    }

    #[test]
    fn test_open_held_for_role_switch() {
        let negotiator = negotiator();
        let features = AvOptions::default().features.with(AvFeatures::MASTER);
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default().with_features(features));
        let mut path = MockPath::default();
        manager.platform_mut().role = Some(LinkRole::Peripheral);

        manager.request(ApiRequest::Open { handle, peer: PEER_A }).unwrap();
        assert_eq!(manager.platform().role_switches.len(), 1);
        assert!(manager.platform().a2dp_searches.is_empty());
        assert!(manager.platform().armed_kind(TimerKind::RoleSwitch(slot(0))).is_some());

        manager.handle_event(Event::RoleChanged { peer: PEER_A, success: true }, &mut path);
        assert_eq!(manager.platform().a2dp_searches, [(PEER_A, SepType::Sink)]);
        assert!(manager
            .platform()
            .cancelled
            .iter()
            .any(|t| t.kind == TimerKind::RoleSwitch(slot(0))));
    }

    #[test]
    fn test_failed_role_switch_fails_open() {
        let negotiator = negotiator();
        let features = AvOptions::default().features.with(AvFeatures::MASTER);
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default().with_features(features));
        let mut path = MockPath::default();
        manager.platform_mut().role = Some(LinkRole::Peripheral);
        manager.request(ApiRequest::Open { handle, peer: PEER_A }).unwrap();
        manager.handle_event(Event::RoleChanged { peer: PEER_A, success: false }, &mut path);
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Init));
        assert!(manager.platform().delivered(|e| matches!(e, UpperEvent::OpenFailed { .. })));
    }

    #[test]
    fn test_signaling_loss_closes_stream() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        transport(&mut manager, &mut path, TransportEvent::SignalingDisconnected { peer: PEER_A });

        assert_eq!(manager.stream_state(handle), Ok(StreamState::Init));
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::Closed { peer, .. } if *peer == PEER_A
        )));
        assert_eq!(manager.tables().links.in_use().count(), 0);
        assert_eq!(manager.encoder_params(), None);
    }

    #[test]
    fn test_suspend_round_trip() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        manager.request(ApiRequest::Start(handle)).unwrap();
        transport(&mut manager, &mut path, TransportEvent::StartConfirm { handle, ok: true });
        assert!(manager.tables().streams.get(slot(0)).started);

        manager.request(ApiRequest::Stop { handle, suspend: true }).unwrap();
        assert_eq!(manager.platform().suspends, [handle]);
        transport(&mut manager, &mut path, TransportEvent::SuspendConfirm { handle, ok: true });
        assert!(!manager.tables().streams.get(slot(0)).started);
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::Suspended { initiator: true, .. }
        )));
        assert_eq!(
            manager.request(ApiRequest::Stop { handle, suspend: true }),
            Ok(())
        );
    }

    #[test]
    fn test_codec_change_reopens_on_other_endpoint() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        let mut path = MockPath::default();
        open_as_initiator(&mut manager, &mut path, handle, PEER_A);
        assert_eq!(
            manager.platform().set_configs[0].2.codec_index(),
            Some(CodecIndex::Aac)
        );

        manager
            .request(ApiRequest::SetCodecUserConfig { peer: PEER_A, codec: CodecIndex::Sbc })
            .unwrap();
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Reconfig));
        assert_eq!(manager.platform().closes, [handle]);

        transport(&mut manager, &mut path, TransportEvent::Closed { handle });
        let (local_seid, peer_seid, codec) = manager.platform().set_configs[1];
        assert_eq!((local_seid, peer_seid), (1, 2));
        assert_eq!(codec.codec_index(), Some(CodecIndex::Sbc));

        transport(&mut manager, &mut path, TransportEvent::ConfigConfirm { handle, ok: true });
        transport(&mut manager, &mut path, TransportEvent::Opened { handle, peer: PEER_A, mtu: 672 });
        assert_eq!(manager.stream_state(handle), Ok(StreamState::Open));
        assert!(manager.platform().delivered(|e| matches!(e, UpperEvent::Reconfigured { ok: true, .. })));
        assert!(manager.platform().delivered(|e| matches!(
            e,
            UpperEvent::CodecState { current: Some(CodecIndex::Sbc), .. }
        )));
    }

    #[test]
    fn test_requests_need_matching_state() {
        let negotiator = negotiator();
        let (mut manager, handle) = enabled(&negotiator, AvOptions::default());
        assert_eq!(manager.request(ApiRequest::Start(handle)), Err(crate::AvError::InvalidState));
        assert_eq!(
            manager.request(ApiRequest::Stop { handle, suspend: false }),
            Err(crate::AvError::InvalidState)
        );
        assert_eq!(
            manager.request(ApiRequest::Open { handle, peer: crate::BluetoothAddress::EMPTY }),
            Err(crate::AvError::InvalidParameter)
        );
        assert_eq!(
            manager.request(ApiRequest::Disconnect(PEER_A)),
            Err(crate::AvError::NotConnected)
        );
    }
}
