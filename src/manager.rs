//! Session manager
//!
//! [`SessionManager`] owns every table of the session core, the AVRCP
//! engine and the top-level state, and performs the actions the state
//! machines return. It is driven by one event at a time:
//!
//! * [`SessionManager::handle_event`] for anything taken off the router queue
//! * [`SessionManager::request`] for direct calls from the owning task
//!
//! Events raised while one is being processed (a stream machine feeding
//! itself, a deferred open) go to a follow-up queue that is drained before
//! either call returns, so callers always observe a settled state.
//!
//! The stream and link handlers live in [`crate::av::connection`]; the
//! remote-control handlers in [`crate::av::rc`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bondybird_av::a2dp::{CodecNegotiator, SepType, SharedNegotiator};
//! use bondybird_av::{AvOptions, AvPlatform, CodecDataPath, Event, SessionManager};
//!
//! static NEGOTIATOR: SharedNegotiator =
//!     SharedNegotiator::new(CodecNegotiator::new(SepType::Source, false));
//!
//! fn bring_up<P: AvPlatform>(platform: P, path: &mut impl CodecDataPath) {
//!     let mut manager = SessionManager::new(platform, &NEGOTIATOR);
//!     manager.handle_event(
//!         Event::Api(bondybird_av::ApiRequest::Enable(AvOptions::default())),
//!         path,
//!     );
//! }
//! ```

use crate::a2dp::{EncoderParams, Enqueue, SharedNegotiator};
use crate::av::{
    LocalEndpoint, RcSession, SessionTables, StreamEvent, StreamState, TopState,
};
use crate::avrcp::RcEngine;
use crate::config::AvOptions;
use crate::constants::{FOLLOW_UP_DEPTH, MAX_FANOUT_QUEUE, MAX_STREAMS};
use crate::events::{ApiRequest, Event, SdpEvent, UpperEvent};
use crate::handle::{Channel, RcIndex, StreamHandle, StreamIndex};
use crate::interfaces::{AvPlatform, CodecDataPath, TimerKind, TimerToken};
use crate::processor::{self, Route};
use crate::timer::TimerTable;
use crate::{AvError, BluetoothAddress};
use heapless::{Deque, Vec};

/// Work queued while an event is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    /// Feed an event to a stream machine
    Stream(StreamIndex, StreamEvent),
    /// Retry a local open held back by a collision
    Open(StreamIndex, BluetoothAddress),
}

/// Owner of an AVRCP service search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RcDiscTarget {
    /// Search started for a stream
    Stream(StreamIndex),
    /// Search started for an RC-only session
    Rc(RcIndex),
}

/// A2DP/AVRCP session manager
pub struct SessionManager<'a, P: AvPlatform> {
    pub(crate) platform: P,
    pub(crate) negotiator: &'a SharedNegotiator,
    pub(crate) options: AvOptions,
    pub(crate) enabled: bool,
    pub(crate) disabling: bool,
    pub(crate) timers: TimerTable<32>,
    pub(crate) follow_ups: Deque<FollowUp, FOLLOW_UP_DEPTH>,
    pub(crate) tables: SessionTables,
    /// Opened streams, one bit per stream slot
    pub(crate) connected: u8,
    pub(crate) engine: RcEngine,
    pub(crate) top: TopState,
    pub(crate) rc_disc: Option<(RcDiscTarget, BluetoothAddress)>,
}

impl<'a, P: AvPlatform> SessionManager<'a, P> {
    /// Disabled manager; nothing but `Enable` is accepted until enabled
    pub fn new(platform: P, negotiator: &'a SharedNegotiator) -> Self {
        let options = AvOptions::default();
        Self {
            platform,
            negotiator,
            engine: RcEngine::new(&options),
            options,
            enabled: false,
            disabling: false,
            timers: TimerTable::new(),
            follow_ups: Deque::new(),
            tables: SessionTables::default(),
            connected: 0,
            top: TopState::Init,
            rc_disc: None,
        }
    }

    /// Platform
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Platform, mutably
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// `Enable` has been processed and `Disable` has not
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Top-level state
    pub const fn top_state(&self) -> TopState {
        self.top
    }

    /// Options applied by the last `Enable`
    pub const fn options(&self) -> &AvOptions {
        &self.options
    }

    /// Entity tables
    pub const fn tables(&self) -> &SessionTables {
        &self.tables
    }

    /// AVRCP engine
    pub const fn engine(&self) -> &RcEngine {
        &self.engine
    }

    /// State of a registered stream
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if the handle is not registered
    pub fn stream_state(&self, handle: StreamHandle) -> Result<StreamState, AvError> {
        let index = self.tables.streams.lookup(handle)?;
        Ok(self.tables.streams.get(index).state)
    }

    /// Encoder parameters of the active peer
    pub fn encoder_params(&self) -> Option<EncoderParams> {
        self.negotiator.lock(|n| n.encoder_params())
    }

    /// Process one router event
    ///
    /// API requests are executed even while disabled (so `Enable` gets
    /// through); a failing request is logged. Every other event is dropped
    /// while disabled.
    pub fn handle_event(&mut self, event: Event, path: &mut impl CodecDataPath) {
        let route = processor::route(&event);
        trace!("[ROUTER] {:?}", route);

        match event {
            Event::Api(request) => {
                if let Err(e) = self.request(request) {
                    warn!("[ROUTER] request failed: {:?}", e);
                }
                return;
            }
            _ if !self.enabled => {
                debug!("[ROUTER] disabled, {:?} dropped", route);
                return;
            }
            Event::Transport(event) => {
                if !self.known_stream(route) {
                    return;
                }
                self.transport_event(event, path);
            }
            Event::Avrcp(event) => self.avrcp_event(event),
            Event::Sdp(SdpEvent::AvrcpRecord { peer, record }) => self.rc_disc_done(peer, record),
            Event::Sdp(SdpEvent::A2dpRecord { peer, found, .. }) => {
                if let Route::Stream(handle) = route {
                    if let Ok(index) = self.tables.streams.lookup(handle) {
                        self.a2dp_record(index, peer, found);
                    }
                }
            }
            Event::RoleChanged { peer, success } => self.role_changed(peer, success),
            Event::Timer(token) => self.timer_expired(token),
            Event::SourceDataReady => self.source_data_ready(path),
        }
        self.drain();
    }

    fn known_stream(&self, route: Route) -> bool {
        match route {
            Route::Stream(handle) if self.tables.streams.lookup(handle).is_err() => {
                warn!("[ROUTER] event for unknown stream {:?}", handle);
                false
            }
            _ => true,
        }
    }

    /// Execute an API request directly
    ///
    /// # Errors
    /// Returns `AvError::NotEnabled` for anything but `Enable` before the
    /// manager is enabled, and the request's own error otherwise
    pub fn request(&mut self, request: ApiRequest) -> Result<(), AvError> {
        let result = match request {
            ApiRequest::Enable(options) => self.enable(options),
            _ if !self.enabled => Err(AvError::NotEnabled),
            request => self.dispatch_request(request),
        };
        self.drain();
        result
    }

    fn dispatch_request(&mut self, request: ApiRequest) -> Result<(), AvError> {
        if let Route::TopLevel(_) = processor::route_request(&request) {
            return self.top_request(&request);
        }
        match request {
            ApiRequest::Register { channel, endpoints } => {
                self.register(channel, &endpoints).map(|_| ())
            }
            ApiRequest::Deregister(handle) => {
                let index = self.tables.streams.lookup(handle)?;
                self.deregister_index(index);
                Ok(())
            }
            ApiRequest::Open { handle, peer } => {
                let index = self.tables.streams.lookup(handle)?;
                self.api_open(index, peer)
            }
            ApiRequest::Close(handle) => {
                let index = self.tables.streams.lookup(handle)?;
                self.stream_event(index, StreamEvent::ApiClose);
                Ok(())
            }
            ApiRequest::Disconnect(peer) => self.disconnect_peer(peer),
            ApiRequest::Start(handle) => {
                let index = self.tables.streams.lookup(handle)?;
                self.api_start(index)
            }
            ApiRequest::Stop { handle, suspend } => {
                let index = self.tables.streams.lookup(handle)?;
                self.api_stop(index, suspend)
            }
            ApiRequest::Reconfigure { handle, codec } => {
                let index = self.tables.streams.lookup(handle)?;
                self.api_reconfigure(index, &codec)
            }
            ApiRequest::DelayReport { handle, delay } => {
                let index = self.tables.streams.lookup(handle)?;
                if !self.tables.streams.get(index).is_connected() {
                    return Err(AvError::NotConnected);
                }
                self.platform.delay_report(handle, delay)
            }
            ApiRequest::RcOpen(handle) => {
                let index = self.tables.streams.lookup(handle)?;
                self.api_rc_open(index)
            }
            ApiRequest::BrowseRsp { rc, label, data } => {
                let index = self.tables.rcs.find(rc).ok_or(AvError::InvalidHandle)?;
                if !self.tables.rcs.get(index).is_some_and(|s| s.browse) {
                    return Err(AvError::NotConnected);
                }
                self.platform.respond_browse(rc, label, &data);
                Ok(())
            }
            ApiRequest::SetAbsoluteVolume { peer, volume } => self
                .engine
                .set_absolute_volume(&mut self.platform, &peer, volume)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::RegisterVolumeChanged(peer) => self
                .engine
                .register_volume_changed(&mut self.platform, &peer)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::GetElementAttributes(peer) => self
                .engine
                .get_element_attributes(&mut self.platform, &peer)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::GetPlayStatus(peer) => self
                .engine
                .get_play_status(&mut self.platform, &peer)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::ListAppSettings(peer) => self
                .engine
                .list_app_settings(&mut self.platform, &peer)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::SetAppSettings { peer, values } => self
                .engine
                .set_app_settings(&mut self.platform, &peer, &values)
                .map(|_| ())
                .map_err(AvError::from),
            ApiRequest::SetActivePeer(peer) => {
                if self.negotiator.lock(|n| n.set_active_peer(&peer)) {
                    Ok(())
                } else {
                    Err(AvError::NotConnected)
                }
            }
            ApiRequest::SetCodecUserConfig { peer, codec } => {
                let outcome = self
                    .negotiator
                    .lock(|n| n.set_codec_user_config(&peer, codec))?;
                self.apply_codec_outcome(peer, outcome)
            }
            ApiRequest::SetCodecAudioConfig { peer, caps } => {
                let outcome = self
                    .negotiator
                    .lock(|n| n.set_codec_audio_config(&peer, caps))?;
                self.apply_codec_outcome(peer, outcome)
            }
            ApiRequest::Enable(_) => Err(AvError::AlreadyEnabled),
            // top-level requests were handled above
            ApiRequest::Disable
            | ApiRequest::RemoteCmd { .. }
            | ApiRequest::VendorCmd { .. }
            | ApiRequest::VendorRsp { .. }
            | ApiRequest::MetaRsp { .. }
            | ApiRequest::RcClose(_) => Err(AvError::InvalidState),
        }
    }

    fn enable(&mut self, options: AvOptions) -> Result<(), AvError> {
        if self.enabled {
            return Err(AvError::AlreadyEnabled);
        }
        let options = AvOptions {
            fanout_queue_depth: options.fanout_queue_depth.clamp(1, MAX_FANOUT_QUEUE),
            ..options
        };
        self.negotiator.lock(|n| {
            n.reset(options.role, options.content_protection);
            n.set_priorities(&options.codec_priorities)
        })?;
        self.engine.configure(&options);
        self.tables = SessionTables::default();
        self.follow_ups.clear();
        self.connected = 0;
        self.top = TopState::Init;
        self.rc_disc = None;
        self.options = options;
        self.enabled = true;
        self.disabling = false;

        info!("[AV] enabled, role {:?} features {:?}", self.options.role, self.options.features);
        self.platform.deliver(UpperEvent::Enabled);
        Ok(())
    }

    /// Register a stream slot
    ///
    /// The first registration also creates the AVRCP acceptor listener when
    /// the local target role is enabled.
    ///
    /// # Errors
    /// Returns `AvError::NotEnabled` before `Enable`, `AvError::NoResources`
    /// if all slots are taken and `AvError::InvalidParameter` for too many
    /// endpoints
    pub fn register(
        &mut self,
        channel: Channel,
        endpoints: &[LocalEndpoint],
    ) -> Result<StreamHandle, AvError> {
        if !self.enabled {
            return Err(AvError::NotEnabled);
        }
        let handle =
            self.tables
                .streams
                .register(channel, endpoints, self.options.fanout_queue_depth)?;
        self.ensure_listener();
        debug!("[AV] registered {:?}", handle);
        self.platform.deliver(UpperEvent::Registered { handle });
        Ok(handle)
    }

    /// Tear down and free one stream slot
    pub(crate) fn deregister_index(&mut self, index: StreamIndex) {
        let session = self.tables.streams.get(index);
        let Some(handle) = session.handle else {
            return;
        };
        let peer = session.peer;
        let state = session.state;

        if state != StreamState::Init {
            if let Err(e) = self.platform.close(handle) {
                debug!("[AV] close on deregister failed: {:?}", e);
            }
        }
        if let Some(rc) = self.tables.relations.rc_of(index) {
            self.del_rc(rc);
        }
        if self.tables.streams.get(index).is_connected() {
            self.stream_reset(index);
        }
        for kind in [TimerKind::Accept(index), TimerKind::RoleSwitch(index), TimerKind::RcOpen(index)] {
            self.timers.cancel(&mut self.platform, kind);
        }
        self.tables.streams.deregister(index);
        self.negotiator.lock(|n| n.process_close(index));

        if !peer.is_empty() && self.tables.streams.by_peer(peer).next().is_none() {
            self.platform.disconnect(peer);
            if let Some(link) = self.tables.links.find(&peer) {
                self.tables.links.release(link);
            }
        }
        if self.tables.streams.registered() == 0 {
            if let Some(acceptor) = self.tables.rcs.acceptor() {
                self.del_rc(acceptor);
                self.tables.rcs.set_acceptor(None);
            }
        }
        debug!("[AV] deregistered {:?}", handle);
        self.platform.deliver(UpperEvent::Deregistered { handle });
    }

    /// Close everything and return to the disabled state
    pub(crate) fn disable(&mut self) {
        self.disabling = true;
        self.close_all_rc();
        let slots: Vec<StreamIndex, MAX_STREAMS> =
            self.tables.streams.iter().map(|(i, _)| i).collect();
        for index in slots {
            self.deregister_index(index);
        }
        self.engine.reset(&mut self.platform);
        self.timers.cancel_all(&mut self.platform);
        self.follow_ups.clear();
        self.tables = SessionTables::default();
        self.connected = 0;
        self.rc_disc = None;
        self.top = TopState::Init;
        self.enabled = false;
        self.disabling = false;

        info!("[AV] disabled");
        self.platform.deliver(UpperEvent::Disabled);
    }

    /// Queue work for after the current event
    pub(crate) fn follow(&mut self, next: FollowUp) {
        if self.follow_ups.push_back(next).is_err() {
            error!("[ROUTER] follow-up queue full, event dropped");
        }
    }

    /// Run queued follow-ups until none are left
    pub(crate) fn drain(&mut self) {
        while let Some(next) = self.follow_ups.pop_front() {
            match next {
                FollowUp::Stream(index, event) => self.stream_event(index, event),
                FollowUp::Open(index, peer) => {
                    if let Err(e) = self.api_open(index, peer) {
                        warn!("[AV] deferred open of {:?} failed: {:?}", index, e);
                    }
                }
            }
        }
    }

    fn timer_expired(&mut self, token: TimerToken) {
        if self.engine.handle_timeout(&mut self.platform, token) {
            return;
        }
        if !self.timers.expire(token) {
            trace!("[AV] stale timer {:?}", token);
            return;
        }
        match token.kind {
            TimerKind::Signalling => self.check_pending_links(),
            TimerKind::Accept(index) => self.accept_timer_fired(index),
            TimerKind::RoleSwitch(index) => {
                warn!("[AV] role switch for {:?} timed out, proceeding", index);
                self.resume_after_role_switch(index, true);
            }
            TimerKind::RcOpen(index) => self.rc_open_timer_fired(index),
            TimerKind::AvrcpTransaction(_) => {}
        }
    }

    /// Pull frames from the producer and fan them out to every started audio stream
    ///
    /// Frames left queued by an earlier refused write go out first.
    fn source_data_ready(&mut self, path: &mut impl CodecDataPath) {
        let targets: Vec<StreamIndex, MAX_STREAMS> = self
            .tables
            .streams
            .iter()
            .filter(|(_, s)| s.channel == Channel::Audio && s.started)
            .map(|(i, _)| i)
            .collect();
        for index in &targets {
            self.flush_fanout(*index);
        }
        while let Some(frame) = self.negotiator.lock(|n| n.next_source_frame(path)) {
            if targets.is_empty() {
                trace!("[FANOUT] no started stream, frame dropped");
                break;
            }
            for index in &targets {
                let queue = &mut self.tables.streams.get_mut(*index).fanout;
                if queue.push(frame.clone()) == Enqueue::DroppedOldest {
                    self.negotiator.lock(|n| n.data_packet_dropped(*index));
                }
            }
            for index in &targets {
                self.flush_fanout(*index);
            }
        }
    }

    fn flush_fanout(&mut self, index: StreamIndex) {
        let Some(handle) = self.tables.streams.get(index).handle else {
            return;
        };
        while let Some(frame) = self.tables.streams.get_mut(index).fanout.pop() {
            if let Err(e) = self.platform.write(handle, &frame) {
                trace!("[FANOUT] {:?} write refused: {:?}", handle, e);
                if self.tables.streams.get_mut(index).fanout.requeue(frame) == Enqueue::DroppedOldest {
                    self.negotiator.lock(|n| n.data_packet_dropped(index));
                }
                break;
            }
        }
    }

    /// Deliver the codec state of `peer` to the upper layer
    pub(crate) fn report_codec_state(&mut self, peer: BluetoothAddress) {
        let (current, selectable) = self.negotiator.lock(|n| {
            let current = n
                .find_peer(&peer)
                .and_then(|i| n.peer(i).codec_config)
                .and_then(|c| c.codec_index());
            (current, n.priorities())
        });
        self.platform.deliver(UpperEvent::CodecState {
            peer,
            current,
            selectable,
        });
    }

    pub(crate) fn rc_session(&self, index: RcIndex) -> Option<RcSession> {
        self.tables.rcs.get(index).copied()
    }
}
