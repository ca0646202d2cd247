//! Entity tables
//!
//! Fixed-size arenas for Link, Stream and Remote-Control Sessions, addressed
//! through the typed indices in [`crate::handle`]. Stream slots live for the
//! whole enabled period; "disconnected" means the slot has no peer address.
//!
//! Link slot `n` belongs to stream slot `n`. The slot after the regular
//! links ([`LinkIndex::RC_ONLY`]) is reserved for a peer that connected AVRCP
//! before any stream existed.
//!
//! [`Relations`] records which RC session belongs to which stream. It is a
//! partial bijection: binding an RC to a stream unbinds whatever either side
//! was bound to before.

use super::StreamState;
use crate::a2dp::{CodecInfo, FanoutQueue, Selection, SepType};
use crate::config::AvFeatures;
use crate::constants::{
    LINK_SLOTS, MAX_LINKS, MAX_LOCAL_ENDPOINTS, MAX_PEER_ENDPOINTS, MAX_RC_SESSIONS, MAX_STREAMS,
};
use crate::handle::{Channel, LinkIndex, RcHandle, RcIndex, StreamHandle, StreamIndex};
use crate::interfaces::RcRole;
use crate::{AvError, BluetoothAddress};
use heapless::Vec;

/// Local stream endpoint offered on a stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEndpoint {
    /// Local stream endpoint identifier
    pub seid: u8,
    /// Endpoint type
    pub kind: SepType,
    /// Codec capabilities of the endpoint
    pub codec: CodecInfo,
}

/// Incoming connection collision flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Collision(pub u8);

impl Collision {
    /// Accept timer running after an incoming signaling connect
    pub const INC_TIMER: u8 = 0x01;
    /// Local open arrived while the accept timer was running
    pub const API_CALLED: u8 = 0x02;

    /// True if `bit` is set
    #[must_use]
    pub const fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Set `bit`
    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    /// Clear `bit`
    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }
}

/// Operation held until a role switch completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoleWait {
    /// Stream open
    Open,
    /// Stream start
    Start,
}

/// One Stream Session slot
#[derive(Debug)]
pub struct StreamSession {
    /// Media channel
    pub channel: Channel,
    /// Handle issued at registration; `None` while the slot is free
    pub handle: Option<StreamHandle>,
    /// Peer, `EMPTY` while disconnected
    pub peer: BluetoothAddress,
    /// Local endpoints
    pub endpoints: Vec<LocalEndpoint, MAX_LOCAL_ENDPOINTS>,
    /// Sub-state-machine state
    pub state: StreamState,
    /// Reconfiguration attempts since the last success
    pub reconfig_count: u8,
    /// Remote control may be opened for this stream
    pub use_rc: bool,
    /// Collision flags
    pub collision: Collision,
    /// Operation waiting for a role switch
    pub role_wait: Option<RoleWait>,
    /// Open request held during a collision or role switch
    pub pending_open: Option<BluetoothAddress>,
    /// Outbound frames waiting for the transport
    pub fanout: FanoutQueue,
    /// Media is flowing
    pub started: bool,
    /// Started together with other audio streams
    pub co_started: bool,
    /// Local start request outstanding
    pub start_pending: bool,
    /// Last start or suspend was requested locally
    pub initiator: bool,
    /// The peer configured this stream
    pub acceptor: bool,
    /// Peer endpoints to query, in discovery order
    pub peer_seids: Vec<u8, MAX_PEER_ENDPOINTS>,
    /// Next entry of `peer_seids` to query
    pub caps_cursor: usize,
    /// Service discovery for this stream is running
    pub sdp_started: bool,
    /// Configuration in use
    pub selection: Option<Selection>,
    /// Configuration being applied by a reconfiguration
    pub reconfig: Option<Selection>,
    /// Reconfigure as soon as the stream opens
    pub reconfig_after_open: bool,
    /// Media MTU
    pub mtu: u16,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            channel: Channel::Audio,
            handle: None,
            peer: BluetoothAddress::EMPTY,
            endpoints: Vec::new(),
            state: StreamState::Init,
            reconfig_count: 0,
            use_rc: false,
            collision: Collision::default(),
            role_wait: None,
            pending_open: None,
            fanout: FanoutQueue::default(),
            started: false,
            co_started: false,
            start_pending: false,
            initiator: false,
            acceptor: false,
            peer_seids: Vec::new(),
            caps_cursor: 0,
            sdp_started: false,
            selection: None,
            reconfig: None,
            reconfig_after_open: false,
            mtu: 0,
        }
    }
}

impl StreamSession {
    /// Slot is registered
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.handle.is_some()
    }

    /// Slot has a peer
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.peer.is_empty()
    }

    /// Forget the peer and everything negotiated with it; registration is kept
    pub fn on_disconnected(&mut self) -> usize {
        let dropped = self.fanout.clear();
        let depth = self.fanout.depth();
        *self = Self {
            channel: self.channel,
            handle: self.handle,
            endpoints: core::mem::take(&mut self.endpoints),
            fanout: FanoutQueue::new(depth),
            ..Self::default()
        };
        dropped
    }

    /// Local endpoint to pair with a peer configuration
    #[must_use]
    pub fn local_endpoint(&self, role: SepType, config: &CodecInfo) -> Option<&LocalEndpoint> {
        let codec = config.codec_index();
        self.endpoints
            .iter()
            .find(|e| e.kind == role && e.codec.codec_index() == codec)
            .or_else(|| self.endpoints.iter().find(|e| e.kind == role))
    }
}

/// Stream Session table
#[derive(Debug)]
pub struct StreamTable {
    slots: [StreamSession; MAX_STREAMS],
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    /// Table with every slot free
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| StreamSession::default()),
        }
    }

    /// Take the first free slot for `channel`
    ///
    /// # Errors
    /// Returns `AvError::NoResources` if every slot is registered and
    /// `AvError::InvalidParameter` if too many endpoints are given
    pub fn register(
        &mut self,
        channel: Channel,
        endpoints: &[LocalEndpoint],
        fanout_depth: usize,
    ) -> Result<StreamHandle, AvError> {
        let index = StreamIndex::all()
            .find(|i| !self.slots[i.get()].is_registered())
            .ok_or(AvError::NoResources)?;
        let endpoints = Vec::from_slice(endpoints).map_err(|()| AvError::InvalidParameter)?;
        let handle = StreamHandle::from_index(channel, index);
        self.slots[index.get()] = StreamSession {
            channel,
            handle: Some(handle),
            endpoints,
            fanout: FanoutQueue::new(fanout_depth),
            ..StreamSession::default()
        };
        Ok(handle)
    }

    /// Free a slot
    pub fn deregister(&mut self, index: StreamIndex) {
        self.slots[index.get()] = StreamSession::default();
    }

    /// Slot of a registered handle
    ///
    /// # Errors
    /// Returns `AvError::InvalidHandle` if the handle is malformed or not registered
    pub fn lookup(&self, handle: StreamHandle) -> Result<StreamIndex, AvError> {
        let index = handle.index()?;
        if self.slots[index.get()].handle == Some(handle) {
            Ok(index)
        } else {
            Err(AvError::InvalidHandle)
        }
    }

    /// Session in slot `index`
    #[must_use]
    pub fn get(&self, index: StreamIndex) -> &StreamSession {
        &self.slots[index.get()]
    }

    /// Session in slot `index`, mutably
    pub fn get_mut(&mut self, index: StreamIndex) -> &mut StreamSession {
        &mut self.slots[index.get()]
    }

    /// Registered slots
    pub fn iter(&self) -> impl Iterator<Item = (StreamIndex, &StreamSession)> {
        StreamIndex::all()
            .map(|i| (i, &self.slots[i.get()]))
            .filter(|(_, s)| s.is_registered())
    }

    /// Slots connected to `peer`
    pub fn by_peer(&self, peer: BluetoothAddress) -> impl Iterator<Item = StreamIndex> + '_ {
        self.iter()
            .filter(move |(_, s)| !peer.is_empty() && s.peer == peer)
            .map(|(i, _)| i)
    }

    /// Slot bound to (`peer`, `channel`)
    #[must_use]
    pub fn find(&self, peer: &BluetoothAddress, channel: Channel) -> Option<StreamIndex> {
        self.by_peer(*peer)
            .find(|i| self.slots[i.get()].channel == channel)
    }

    /// Bind a peer to a slot
    ///
    /// # Errors
    /// Returns `AvError::InvalidState` if the slot already has another peer or
    /// another slot is bound to the same (peer, channel)
    pub fn bind_peer(&mut self, index: StreamIndex, peer: BluetoothAddress) -> Result<(), AvError> {
        let session = &self.slots[index.get()];
        if !session.is_registered() || peer.is_empty() {
            return Err(AvError::InvalidHandle);
        }
        if session.peer == peer {
            return Ok(());
        }
        if session.is_connected() {
            return Err(AvError::InvalidState);
        }
        if let Some(other) = self.find(&peer, session.channel) {
            warn!("[AV] {:?} already bound to {:?}", peer, other);
            return Err(AvError::InvalidState);
        }
        self.slots[index.get()].peer = peer;
        Ok(())
    }

    /// Number of registered slots
    #[must_use]
    pub fn registered(&self) -> usize {
        self.iter().count()
    }
}

/// One Link Session (signaling link to a peer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSession {
    /// Peer
    pub peer: BluetoothAddress,
    /// Opened streams on this link, one bit per stream slot
    pub conn_mask: u8,
    /// Slot taken
    pub in_use: bool,
}

/// Link Session table, RC-only reservation included
#[derive(Debug, Default)]
pub struct LinkTable {
    slots: [LinkSession; LINK_SLOTS],
}

impl LinkTable {
    /// Regular link to `peer`
    #[must_use]
    pub fn find(&self, peer: &BluetoothAddress) -> Option<LinkIndex> {
        if peer.is_empty() {
            return None;
        }
        (0..MAX_LINKS)
            .find(|n| self.slots[*n].in_use && self.slots[*n].peer == *peer)
            .and_then(|n| LinkIndex::new(n).ok())
    }

    /// Slot `index`
    #[must_use]
    pub fn get(&self, index: LinkIndex) -> &LinkSession {
        &self.slots[index.get()]
    }

    /// Slot `index`, mutably
    pub fn get_mut(&mut self, index: LinkIndex) -> &mut LinkSession {
        &mut self.slots[index.get()]
    }

    /// Take slot `index` for `peer`
    pub fn occupy(&mut self, index: LinkIndex, peer: BluetoothAddress) {
        self.slots[index.get()] = LinkSession {
            peer,
            conn_mask: 0,
            in_use: true,
        };
    }

    /// Free slot `index`
    pub fn release(&mut self, index: LinkIndex) {
        self.slots[index.get()] = LinkSession::default();
    }

    /// Regular links in use
    pub fn in_use(&self) -> impl Iterator<Item = (LinkIndex, &LinkSession)> {
        (0..MAX_LINKS)
            .filter_map(|n| LinkIndex::new(n).ok())
            .map(|i| (i, &self.slots[i.get()]))
            .filter(|(_, l)| l.in_use)
    }
}

/// Pick the link slot for a new signaling connection from `peer`
///
/// Slot `n` is usable when its link is free and stream slot `n` is
/// registered. A stream already bound to `peer` wins over the first
/// unbound one.
#[must_use]
pub fn find_link_slot(
    streams: &StreamTable,
    links: &LinkTable,
    peer: &BluetoothAddress,
) -> Option<StreamIndex> {
    let usable = |i: &StreamIndex| {
        LinkIndex::new(i.get()).is_ok_and(|l| !links.get(l).in_use)
    };
    let candidates = || streams.iter().filter(|(i, _)| usable(i));
    candidates()
        .find(|(_, s)| s.peer == *peer)
        .or_else(|| candidates().find(|(_, s)| !s.is_connected()))
        .map(|(i, _)| i)
}

/// One Remote-Control Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcSession {
    /// Handle issued by the AVRCP engine
    pub handle: RcHandle,
    /// Local role
    pub role: RcRole,
    /// Control channel is up
    pub connected: bool,
    /// Browsing channel is up
    pub browse: bool,
    /// Owning link slot
    pub link: LinkIndex,
    /// Peer features
    pub features: AvFeatures,
    /// Peer, `EMPTY` for a listener nobody connected to yet
    pub peer: BluetoothAddress,
}

impl RcSession {
    /// Not yet connected session
    #[must_use]
    pub const fn new(handle: RcHandle, role: RcRole, link: LinkIndex, peer: BluetoothAddress) -> Self {
        Self {
            handle,
            role,
            connected: false,
            browse: false,
            link,
            features: AvFeatures::NONE,
            peer,
        }
    }
}

/// Remote-Control Session table
#[derive(Debug, Default)]
pub struct RcTable {
    slots: [Option<RcSession>; MAX_RC_SESSIONS],
    acceptor: Option<RcIndex>,
}

impl RcTable {
    /// Store a new session
    ///
    /// # Errors
    /// Returns `AvError::NoResources` if the table is full
    pub fn insert(&mut self, session: RcSession) -> Result<RcIndex, AvError> {
        if let Some(existing) = self.find(session.handle) {
            error!("[RC] duplicate handle {:?}, replacing", session.handle);
            self.slots[existing.get()] = Some(session);
            return Ok(existing);
        }
        let n = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AvError::NoResources)?;
        self.slots[n] = Some(session);
        RcIndex::new(n)
    }

    /// Session with `handle`
    #[must_use]
    pub fn find(&self, handle: RcHandle) -> Option<RcIndex> {
        self.iter()
            .find(|(_, s)| s.handle == handle)
            .map(|(i, _)| i)
    }

    /// Session `index`
    #[must_use]
    pub fn get(&self, index: RcIndex) -> Option<&RcSession> {
        self.slots[index.get()].as_ref()
    }

    /// Session `index`, mutably
    pub fn get_mut(&mut self, index: RcIndex) -> Option<&mut RcSession> {
        self.slots[index.get()].as_mut()
    }

    /// Drop session `index`
    pub fn free(&mut self, index: RcIndex) -> Option<RcSession> {
        if self.acceptor == Some(index) {
            self.acceptor = None;
        }
        self.slots[index.get()].take()
    }

    /// Acceptor listener slot
    #[must_use]
    pub const fn acceptor(&self) -> Option<RcIndex> {
        self.acceptor
    }

    /// Designate the acceptor listener
    pub fn set_acceptor(&mut self, index: Option<RcIndex>) {
        self.acceptor = index;
    }

    /// True if any control channel is up
    #[must_use]
    pub fn any_connected(&self) -> bool {
        self.iter().any(|(_, s)| s.connected)
    }

    /// First session owned by `link`
    #[must_use]
    pub fn on_link(&self, link: LinkIndex) -> Option<RcIndex> {
        self.iter().find(|(_, s)| s.link == link).map(|(i, _)| i)
    }

    /// Live sessions
    pub fn iter(&self) -> impl Iterator<Item = (RcIndex, &RcSession)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(n, s)| Some((RcIndex::new(n).ok()?, s.as_ref()?)))
    }
}

/// Stream to Remote-Control Session relation
#[derive(Debug, Default)]
pub struct Relations {
    stream_to_rc: [Option<RcIndex>; MAX_STREAMS],
}

impl Relations {
    /// Bind `rc` to `stream`, dropping any previous binding of either
    pub fn bind(&mut self, stream: StreamIndex, rc: RcIndex) {
        self.unbind_rc(rc);
        self.stream_to_rc[stream.get()] = Some(rc);
    }

    /// Remove the binding of `stream`
    pub fn unbind_stream(&mut self, stream: StreamIndex) -> Option<RcIndex> {
        self.stream_to_rc[stream.get()].take()
    }

    /// Remove the binding of `rc`
    pub fn unbind_rc(&mut self, rc: RcIndex) -> Option<StreamIndex> {
        let stream = self.stream_of(rc)?;
        self.stream_to_rc[stream.get()] = None;
        Some(stream)
    }

    /// RC session of `stream`
    #[must_use]
    pub fn rc_of(&self, stream: StreamIndex) -> Option<RcIndex> {
        self.stream_to_rc[stream.get()]
    }

    /// Stream owning `rc`
    #[must_use]
    pub fn stream_of(&self, rc: RcIndex) -> Option<StreamIndex> {
        StreamIndex::all().find(|s| self.stream_to_rc[s.get()] == Some(rc))
    }
}

/// All entity tables
#[derive(Debug, Default)]
pub struct SessionTables {
    /// Link Sessions
    pub links: LinkTable,
    /// Stream Sessions
    pub streams: StreamTable,
    /// Remote-Control Sessions
    pub rcs: RcTable,
    /// Stream to RC relation
    pub relations: Relations,
}
