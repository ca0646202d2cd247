//! Peer endpoint catalog
//!
//! Everything learned about one peer while its stream is being set up:
//! discovery counters, the endpoints received through get-capabilities,
//! and the configuration eventually chosen for it. One catalog exists per
//! Stream Session slot.

use super::{CodecIndex, CodecInfo, ProtectInfo, SepType};
use crate::BluetoothAddress;
use crate::constants::MAX_PEER_ENDPOINTS;
use heapless::Vec;

/// One endpoint advertised by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    /// Index of the discovery result this endpoint came from
    pub sep_info_index: u8,
    /// Peer stream endpoint identifier
    pub seid: u8,
    /// Codec capabilities advertised by the peer
    pub codec: CodecInfo,
    /// Content protection advertised by the peer
    pub protect: ProtectInfo,
}

/// Result of feeding one capability response into the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityIntake {
    /// More capability responses are expected
    Pending,
    /// All peer endpoints are known (or storage is full)
    Complete,
}

/// Per-peer endpoint catalog
#[derive(Debug, Clone)]
pub struct PeerCatalog {
    /// Peer address, `EMPTY` when the slot is unused
    pub addr: BluetoothAddress,
    /// Endpoints discovered on the peer
    pub num_seps: u8,
    /// Sink endpoints discovered on the peer
    pub num_sinks: u8,
    /// Source endpoints discovered on the peer
    pub num_sources: u8,
    /// Sink capability responses received so far
    pub num_rx_sinks: u8,
    /// Source capability responses received so far
    pub num_rx_sources: u8,
    sinks: Vec<PeerEndpoint, MAX_PEER_ENDPOINTS>,
    sources: Vec<PeerEndpoint, MAX_PEER_ENDPOINTS>,
    /// Position in `sinks` of the endpoint the stream is bound to
    pub selected_sink: Option<usize>,
    /// Position in `sources` of the endpoint the stream is bound to
    pub selected_source: Option<usize>,
    /// Codec configuration in use (or proposed by the peer)
    pub codec_config: Option<CodecInfo>,
    /// The peer configured us (we are the AVDTP acceptor)
    pub acceptor: bool,
    /// A reconfiguration must be issued once capabilities are known
    pub reconfig_needed: bool,
    /// A user codec choice is waiting for capabilities; it overrides the
    /// configuration the peer proposed
    pub user_override: bool,
    /// Stream is open
    pub opened: bool,
    /// Media MTU reported at open
    pub mtu: u16,
    /// Endpoint type to connect to on the peer
    pub uuid_to_connect: Option<SepType>,
    /// Content protection negotiated on this stream
    pub content_protect_active: bool,
}

impl Default for PeerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerCatalog {
    /// Empty catalog
    #[must_use]
    pub const fn new() -> Self {
        Self {
            addr: BluetoothAddress::EMPTY,
            num_seps: 0,
            num_sinks: 0,
            num_sources: 0,
            num_rx_sinks: 0,
            num_rx_sources: 0,
            sinks: Vec::new(),
            sources: Vec::new(),
            selected_sink: None,
            selected_source: None,
            codec_config: None,
            acceptor: false,
            reconfig_needed: false,
            user_override: false,
            opened: false,
            mtu: 0,
            uuid_to_connect: None,
            content_protect_active: false,
        }
    }

    /// Forget everything about the current peer
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Bind the catalog to a peer, resetting it if it belonged to another one
    pub fn bind(&mut self, addr: BluetoothAddress) {
        if self.addr != addr {
            self.reset();
            self.addr = addr;
        }
    }

    /// Record the discovery counters and restart capability collection
    pub fn record_discovery(&mut self, num_seps: u8, num_sinks: u8, num_sources: u8, local: SepType) {
        self.num_seps = num_seps;
        self.num_sinks = num_sinks;
        self.num_sources = num_sources;
        self.num_rx_sinks = 0;
        self.num_rx_sources = 0;
        self.sinks.clear();
        self.sources.clear();
        self.selected_sink = None;
        self.selected_source = None;
        self.uuid_to_connect = Some(local.complement());
    }

    /// Feed one capability response for an endpoint of type `kind`
    ///
    /// Invalid codecs are counted but not stored.
    pub fn intake(&mut self, kind: SepType, endpoint: Option<PeerEndpoint>) -> CapabilityIntake {
        let (received, expected, store) = match kind {
            SepType::Sink => {
                self.num_rx_sinks = self.num_rx_sinks.saturating_add(1);
                (self.num_rx_sinks, self.num_sinks, &mut self.sinks)
            }
            SepType::Source => {
                self.num_rx_sources = self.num_rx_sources.saturating_add(1);
                (self.num_rx_sources, self.num_sources, &mut self.sources)
            }
        };
        if let Some(endpoint) = endpoint {
            if store.push(endpoint).is_err() {
                debug!("[CODEC] peer endpoint storage full, ignoring seid {}", endpoint.seid);
            }
        }
        if received >= expected || store.is_full() {
            CapabilityIntake::Complete
        } else {
            CapabilityIntake::Pending
        }
    }

    /// True once every advertised endpoint of `kind` has been answered
    #[must_use]
    pub fn capabilities_complete(&self, kind: SepType) -> bool {
        match kind {
            SepType::Sink => self.num_rx_sinks >= self.num_sinks || self.sinks.is_full(),
            SepType::Source => self.num_rx_sources >= self.num_sources || self.sources.is_full(),
        }
    }

    /// Stored endpoints of `kind`
    #[must_use]
    pub fn endpoints(&self, kind: SepType) -> &[PeerEndpoint] {
        match kind {
            SepType::Sink => &self.sinks,
            SepType::Source => &self.sources,
        }
    }

    /// First stored endpoint of `kind` carrying `codec` that passes `usable`
    pub fn find(
        &self,
        kind: SepType,
        codec: CodecIndex,
        usable: impl Fn(&PeerEndpoint) -> bool,
    ) -> Option<usize> {
        self.endpoints(kind)
            .iter()
            .position(|ep| ep.codec.codec_index() == Some(codec) && usable(ep))
    }

    /// Endpoint the stream is bound to
    #[must_use]
    pub fn selected(&self, kind: SepType) -> Option<&PeerEndpoint> {
        let position = match kind {
            SepType::Sink => self.selected_sink,
            SepType::Source => self.selected_source,
        }?;
        self.endpoints(kind).get(position)
    }

    /// Bind the stream to the endpoint at `position`
    pub fn select(&mut self, kind: SepType, position: usize) {
        match kind {
            SepType::Sink => self.selected_sink = Some(position),
            SepType::Source => self.selected_source = Some(position),
        }
    }

    /// True if an endpoint has been bound for `kind`
    #[must_use]
    pub fn has_selection(&self, kind: SepType) -> bool {
        self.selected(kind).is_some()
    }
}
