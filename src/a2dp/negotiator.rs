//! Codec negotiation
//!
//! The negotiator consumes the results of AVDTP discovery and
//! get-capabilities for each stream, picks the local codec configuration
//! and peer endpoint to use, validates configurations proposed by peers,
//! and tracks which peer is "active" for the encoder.
//!
//! ## Selection
//!
//! As initiator the local codec preference list is walked in order and the
//! first codec with a compatible peer endpoint wins. As acceptor the codec
//! the peer already proposed is kept and only the matching endpoint is
//! looked up. Selection runs once per discovery: a repeated "all
//! capabilities received" signal returns the finalized result unchanged.
//!
//! ## Sharing
//!
//! The audio producer pulls frames from another execution context, so the
//! negotiator is kept in a [`SharedNegotiator`] guarded by a critical-section
//! mutex.

use super::{
    A2dpError, A2dpStatus, CapabilityIntake, CodecCapabilities, CodecIndex, CodecInfo, CpFlag,
    MediaFrame, PeerCatalog, PeerEndpoint, ProtectInfo, SepType, ServiceCategory,
};
use crate::BluetoothAddress;
use crate::constants::{MAX_CODECS, MAX_STREAMS};
use crate::handle::StreamIndex;
use crate::interfaces::CodecDataPath;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use heapless::Vec;

/// Peer endpoint and configuration chosen for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Discovery index of the chosen peer endpoint
    pub sep_info_index: u8,
    /// Peer endpoint identifier
    pub seid: u8,
    /// Codec configuration to use
    pub config: CodecInfo,
    /// Content protection to request, if any
    pub protect: Option<ProtectInfo>,
    /// The stream must be reconfigured to apply this selection
    pub reconfigure: bool,
}

impl Selection {
    /// Codec of the selected configuration
    #[must_use]
    pub fn codec(&self) -> Option<CodecIndex> {
        self.config.codec_index()
    }
}

/// Result of a get-capabilities response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetConfigOutcome {
    /// Waiting for more peer endpoints
    Pending,
    /// Selection made (or already made earlier)
    Selected(Selection),
}

/// Reject details for a peer-proposed configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigReject {
    /// Status returned to the peer
    pub status: A2dpStatus,
    /// Offending service category
    pub category: ServiceCategory,
}

/// Accepted peer-proposed configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAccept {
    /// Codec of the accepted configuration
    pub codec: CodecIndex,
    /// Protection state changed; a reconfiguration follows once capabilities are known
    pub reconfig_needed: bool,
}

/// Result of a user or audio configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserConfigOutcome {
    /// Nothing to do on the transport
    Unchanged,
    /// Peer capabilities are still being collected; applied once complete
    Deferred,
    /// Stream must be reconfigured with this selection
    Reconfigure(Selection),
}

/// Parameters exposed to the encoder for the active peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    /// Smallest MTU among open streams to the peer
    pub peer_mtu: u16,
    /// Active codec configuration
    pub config: CodecInfo,
    /// Content protection header is prepended to every frame
    pub content_protect: bool,
    /// Last sink delay report, in 1/10 ms
    pub delay: u16,
}

/// Information returned when a stream starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartInfo {
    /// Media packets carry no RTP header
    pub no_rtp_header: bool,
}

/// Codec negotiator
#[derive(Debug)]
pub struct CodecNegotiator {
    local_role: SepType,
    local_codecs: Vec<CodecCapabilities, MAX_CODECS>,
    user_preference: Option<CodecIndex>,
    peers: [PeerCatalog; MAX_STREAMS],
    delays: [u16; MAX_STREAMS],
    active: Option<StreamIndex>,
    active_config: Option<CodecInfo>,
    content_protect_enabled: bool,
    content_protect_flag: CpFlag,
    dropped_frames: u32,
}

impl CodecNegotiator {
    /// Create a negotiator with no local codecs
    #[must_use]
    pub const fn new(local_role: SepType, content_protection: bool) -> Self {
        Self {
            local_role,
            local_codecs: Vec::new(),
            user_preference: None,
            peers: [const { PeerCatalog::new() }; MAX_STREAMS],
            delays: [0; MAX_STREAMS],
            active: None,
            active_config: None,
            content_protect_enabled: content_protection,
            content_protect_flag: if content_protection {
                CpFlag::CopyNever
            } else {
                CpFlag::CopyFree
            },
            dropped_frames: 0,
        }
    }

    /// Reset all peer state and apply a new role and protection policy
    pub fn reset(&mut self, local_role: SepType, content_protection: bool) {
        let codecs = self.local_codecs.clone();
        *self = Self::new(local_role, content_protection);
        self.local_codecs = codecs;
    }

    /// Replace the local codec list with defaults in the given preference order
    ///
    /// # Errors
    /// Returns `A2dpError::CatalogFull` if more than `MAX_CODECS` are given
    pub fn set_priorities(&mut self, order: &[CodecIndex]) -> Result<(), A2dpError> {
        let mut codecs: Vec<CodecCapabilities, MAX_CODECS> = Vec::new();
        for index in order {
            if codecs.iter().any(|c| c.codec_index() == *index) {
                continue;
            }
            codecs
                .push(CodecCapabilities::local_default(*index))
                .map_err(|_| A2dpError::CatalogFull)?;
        }
        self.local_codecs = codecs;
        Ok(())
    }

    /// Local codecs in preference order
    #[must_use]
    pub fn priorities(&self) -> Vec<CodecIndex, MAX_CODECS> {
        self.local_codecs.iter().map(CodecCapabilities::codec_index).collect()
    }

    /// Replace the local capabilities of one codec
    ///
    /// # Errors
    /// Returns `A2dpError::UnsupportedCodec` if the codec is not in the local list
    pub fn set_local_capabilities(&mut self, caps: CodecCapabilities) -> Result<(), A2dpError> {
        let slot = self
            .local_codecs
            .iter_mut()
            .find(|c| c.codec_index() == caps.codec_index())
            .ok_or(A2dpError::UnsupportedCodec)?;
        *slot = caps;
        Ok(())
    }

    /// Local endpoint role
    #[must_use]
    pub const fn local_role(&self) -> SepType {
        self.local_role
    }

    /// Content protection flag inserted in outbound media
    #[must_use]
    pub const fn content_protect_flag(&self) -> CpFlag {
        self.content_protect_flag
    }

    /// Catalog of a stream slot
    #[must_use]
    pub fn peer(&self, index: StreamIndex) -> &PeerCatalog {
        &self.peers[index.get()]
    }

    /// Stream slot whose catalog belongs to `addr`
    #[must_use]
    pub fn find_peer(&self, addr: &BluetoothAddress) -> Option<StreamIndex> {
        if addr.is_empty() {
            return None;
        }
        StreamIndex::all().find(|index| self.peers[index.get()].addr == *addr)
    }

    /// Currently active peer
    #[must_use]
    pub const fn active_peer(&self) -> Option<StreamIndex> {
        self.active
    }

    /// Codec configuration of the active peer
    #[must_use]
    pub const fn active_config(&self) -> Option<CodecInfo> {
        self.active_config
    }

    /// Frames dropped on the outbound path since creation
    #[must_use]
    pub const fn dropped_frames(&self) -> u32 {
        self.dropped_frames
    }

    fn local_caps(&self, index: CodecIndex) -> Option<&CodecCapabilities> {
        self.local_codecs.iter().find(|c| c.codec_index() == index)
    }

    /// Peer endpoint passes the content protection policy
    fn protection_usable(&self, endpoint: &PeerEndpoint) -> bool {
        self.content_protect_flag == CpFlag::CopyFree || endpoint.protect.has_scms_t()
    }

    /// Record AVDTP discovery results for a stream
    pub fn process_discovery_result(
        &mut self,
        index: StreamIndex,
        addr: BluetoothAddress,
        num_seps: u8,
        num_sinks: u8,
        num_sources: u8,
    ) {
        debug!(
            "[CODEC] discovery {:?}: seps {} sinks {} sources {}",
            index, num_seps, num_sinks, num_sources
        );
        let role = self.local_role;
        let catalog = &mut self.peers[index.get()];
        catalog.bind(addr);
        catalog.record_discovery(num_seps, num_sinks, num_sources, role);
    }

    /// Feed one get-capabilities response
    ///
    /// # Errors
    /// Returns `A2dpError::NoCompatibleEndpoint` once all capabilities are
    /// known and no endpoint can be used
    pub fn process_get_config(
        &mut self,
        index: StreamIndex,
        addr: BluetoothAddress,
        codec: &[u8],
        sep_info_index: u8,
        seid: u8,
        protect: ProtectInfo,
    ) -> Result<GetConfigOutcome, A2dpError> {
        let kind = self.local_role.complement();
        let endpoint = CodecInfo::from_bytes(codec)
            .ok()
            .filter(CodecInfo::is_valid)
            .map(|codec| PeerEndpoint {
                sep_info_index,
                seid,
                codec,
                protect,
            });
        if endpoint.is_none() {
            debug!("[CODEC] seid {} carries an unusable codec", seid);
        }

        let catalog = &mut self.peers[index.get()];
        catalog.bind(addr);
        if catalog.intake(kind, endpoint) == CapabilityIntake::Pending {
            return Ok(GetConfigOutcome::Pending);
        }

        if let Some(selection) = self.current_selection(index) {
            return Ok(GetConfigOutcome::Selected(selection));
        }
        let selection = self.select(index)?;
        Ok(GetConfigOutcome::Selected(selection))
    }

    /// Finalized selection of a stream, if any
    fn current_selection(&self, index: StreamIndex) -> Option<Selection> {
        let kind = self.local_role.complement();
        let catalog = &self.peers[index.get()];
        let endpoint = catalog.selected(kind)?;
        let config = catalog.codec_config?;
        Some(Selection {
            sep_info_index: endpoint.sep_info_index,
            seid: endpoint.seid,
            config,
            protect: catalog.content_protect_active.then(ProtectInfo::scms_t),
            reconfigure: false,
        })
    }

    /// Run selection over the stored peer endpoints
    fn select(&mut self, index: StreamIndex) -> Result<Selection, A2dpError> {
        let kind = self.local_role.complement();
        let catalog = &self.peers[index.get()];

        let proposed = if catalog.acceptor && !catalog.user_override {
            catalog.codec_config.and_then(|config| config.codec_index())
        } else {
            None
        };

        let (position, config) = match proposed {
            Some(codec) => {
                let position = catalog
                    .find(kind, codec, |ep| self.protection_usable(ep))
                    .ok_or(A2dpError::NoCompatibleEndpoint)?;
                let config = catalog.codec_config.ok_or(A2dpError::ConfigurationFailed)?;
                (position, config)
            }
            None => self.walk_preferences(index)?,
        };

        let content_protect = self.content_protect_enabled
            && self.peers[index.get()].endpoints(kind)[position].protect.has_scms_t();
        let is_active = self.active == Some(index);

        let catalog = &mut self.peers[index.get()];
        catalog.select(kind, position);
        catalog.codec_config = Some(config);
        catalog.content_protect_active = content_protect;
        let reconfigure = catalog.acceptor && catalog.reconfig_needed;
        catalog.reconfig_needed = false;
        catalog.user_override = false;
        let endpoint = catalog.endpoints(kind)[position];
        if is_active {
            self.active_config = Some(config);
        }

        debug!(
            "[CODEC] {:?} selected seid {} codec {:?}",
            index,
            endpoint.seid,
            config.codec_index()
        );
        Ok(Selection {
            sep_info_index: endpoint.sep_info_index,
            seid: endpoint.seid,
            config,
            protect: content_protect.then(ProtectInfo::scms_t),
            reconfigure,
        })
    }

    /// Walk local codecs (user preference first) and pick the first usable pair
    fn walk_preferences(&self, index: StreamIndex) -> Result<(usize, CodecInfo), A2dpError> {
        let kind = self.local_role.complement();
        let catalog = &self.peers[index.get()];
        let preferred = self.user_preference.and_then(|codec| self.local_caps(codec));
        let ordered = preferred
            .into_iter()
            .chain(self.local_codecs.iter().filter(|c| Some(c.codec_index()) != self.user_preference));

        for local in ordered {
            let codec = local.codec_index();
            let Some(position) = catalog.find(kind, codec, |ep| self.protection_usable(ep)) else {
                continue;
            };
            let endpoint = &catalog.endpoints(kind)[position];
            let Ok(peer_caps) = CodecCapabilities::parse(&endpoint.codec) else {
                continue;
            };
            if let Some(config) = local.select_config(&peer_caps) {
                return Ok((position, config.encode()));
            }
        }
        Err(A2dpError::NoCompatibleEndpoint)
    }

    /// Validate a configuration proposed by the peer
    ///
    /// # Errors
    /// Returns the reject status and category to send back to the peer
    pub fn process_set_config(
        &mut self,
        index: StreamIndex,
        addr: BluetoothAddress,
        codec: &[u8],
        protect: ProtectInfo,
    ) -> Result<ConfigAccept, ConfigReject> {
        if protect.count != 0
            && (!self.content_protect_enabled || protect.count != 1 || !protect.has_scms_t())
        {
            warn!("[CODEC] set config rejected: content protection {}", protect.count);
            return Err(ConfigReject {
                status: A2dpStatus::BadCpType,
                category: ServiceCategory::Protect,
            });
        }

        let wrong_codec = ConfigReject {
            status: A2dpStatus::WrongCodec,
            category: ServiceCategory::Codec,
        };
        let info = CodecInfo::from_bytes(codec).map_err(|_| wrong_codec)?;
        let config = CodecCapabilities::parse(&info).map_err(|_| wrong_codec)?;
        let supported = self
            .local_caps(config.codec_index())
            .is_some_and(|local| local.accepts_config(&config));
        if !supported {
            warn!("[CODEC] set config rejected: codec {:?}", config.codec_index());
            return Err(wrong_codec);
        }

        let role = self.local_role;
        let is_active = self.active == Some(index);
        let catalog = &mut self.peers[index.get()];
        catalog.bind(addr);
        let reconfig_needed = match role {
            SepType::Sink => false,
            SepType::Source => {
                let wants_protection = protect.count == 1;
                let changed = wants_protection != catalog.content_protect_active;
                catalog.content_protect_active = wants_protection;
                changed
            }
        };
        catalog.codec_config = Some(info);
        catalog.acceptor = true;
        catalog.reconfig_needed = reconfig_needed;
        if is_active {
            self.active_config = Some(info);
        }

        Ok(ConfigAccept {
            codec: config.codec_index(),
            reconfig_needed,
        })
    }

    /// Stream opened
    pub fn process_open(&mut self, index: StreamIndex, mtu: u16) {
        let catalog = &mut self.peers[index.get()];
        catalog.opened = true;
        catalog.mtu = mtu;
        if self.active.is_none() {
            self.active = Some(index);
            self.active_config = self.peers[index.get()].codec_config;
            debug!("[CODEC] {:?} became the active peer", index);
        }
    }

    /// Stream closed: forget the peer
    pub fn process_close(&mut self, index: StreamIndex) {
        if self.active == Some(index) {
            self.active = None;
            self.active_config = None;
        }
        self.delays[index.get()] = 0;
        self.peers[index.get()].reset();
    }

    /// Stream started
    #[must_use]
    pub fn process_start(&self, index: StreamIndex) -> StartInfo {
        let catalog = &self.peers[index.get()];
        let is_aptx = catalog.codec_config.and_then(|c| c.codec_index()) == Some(CodecIndex::Aptx);
        StartInfo {
            no_rtp_header: is_aptx && !catalog.content_protect_active,
        }
    }

    /// Stream stopped
    pub fn process_stop(&self, index: StreamIndex) {
        debug!("[CODEC] {:?} stopped", index);
    }

    /// Outbound frame discarded by the fan-out queue
    pub fn data_packet_dropped(&mut self, index: StreamIndex) {
        self.dropped_frames = self.dropped_frames.wrapping_add(1);
        debug!("[CODEC] {:?} dropped frame, total {}", index, self.dropped_frames);
    }

    /// Sink delay report
    pub fn process_delay_report(&mut self, index: StreamIndex, delay: u16) {
        self.delays[index.get()] = delay;
    }

    /// Media MTU changed
    pub fn update_mtu(&mut self, index: StreamIndex, mtu: u16) {
        self.peers[index.get()].mtu = mtu;
    }

    /// Designate the active peer; the empty address clears it
    ///
    /// Returns false if the peer is unknown.
    pub fn set_active_peer(&mut self, addr: &BluetoothAddress) -> bool {
        if addr.is_empty() {
            self.active = None;
            self.active_config = None;
            return true;
        }
        let Some(index) = self.find_peer(addr) else {
            return false;
        };
        self.active = Some(index);
        if let Some(config) = self.peers[index.get()].codec_config {
            self.active_config = Some(config);
        }
        true
    }

    /// Encoder parameters for the active peer
    #[must_use]
    pub fn encoder_params(&self) -> Option<EncoderParams> {
        let index = self.active?;
        let catalog = &self.peers[index.get()];
        let config = self.active_config.or(catalog.codec_config)?;
        let peer_mtu = self
            .peers
            .iter()
            .filter(|p| p.opened && p.addr == catalog.addr)
            .map(|p| p.mtu)
            .min()
            .unwrap_or(catalog.mtu);
        Some(EncoderParams {
            peer_mtu,
            config,
            content_protect: catalog.content_protect_active,
            delay: self.delays[index.get()],
        })
    }

    /// Prefer `codec` for `addr` and re-run selection
    ///
    /// # Errors
    /// Returns `A2dpError::UnknownPeer` if no stream belongs to `addr` and
    /// `A2dpError::UnsupportedCodec` if the codec is not available locally
    pub fn set_codec_user_config(
        &mut self,
        addr: &BluetoothAddress,
        codec: CodecIndex,
    ) -> Result<UserConfigOutcome, A2dpError> {
        if self.local_caps(codec).is_none() {
            return Err(A2dpError::UnsupportedCodec);
        }
        self.user_preference = Some(codec);
        self.reselect(addr)
    }

    /// Narrow the local capabilities of one codec and re-run selection
    ///
    /// # Errors
    /// As for [`CodecNegotiator::set_codec_user_config`]
    pub fn set_codec_audio_config(
        &mut self,
        addr: &BluetoothAddress,
        caps: CodecCapabilities,
    ) -> Result<UserConfigOutcome, A2dpError> {
        self.set_local_capabilities(caps)?;
        self.reselect(addr)
    }

    fn reselect(&mut self, addr: &BluetoothAddress) -> Result<UserConfigOutcome, A2dpError> {
        let index = self.find_peer(addr).ok_or(A2dpError::UnknownPeer)?;
        let kind = self.local_role.complement();
        let catalog = &self.peers[index.get()];
        if !catalog.capabilities_complete(kind) {
            debug!("[CODEC] {:?} capabilities incomplete, deferring reconfig", index);
            let catalog = &mut self.peers[index.get()];
            catalog.reconfig_needed = true;
            catalog.user_override = true;
            return Ok(UserConfigOutcome::Deferred);
        }

        let previous = catalog.codec_config;
        let (position, config) = self.walk_preferences(index)?;
        if previous == Some(config) {
            return Ok(UserConfigOutcome::Unchanged);
        }

        let content_protect = self.content_protect_enabled
            && self.peers[index.get()].endpoints(kind)[position].protect.has_scms_t();
        let catalog = &mut self.peers[index.get()];
        catalog.select(kind, position);
        catalog.codec_config = Some(config);
        catalog.content_protect_active = content_protect;
        catalog.reconfig_needed = false;
        catalog.user_override = false;
        let endpoint = catalog.endpoints(kind)[position];
        if self.active == Some(index) {
            self.active_config = Some(config);
        }
        Ok(UserConfigOutcome::Reconfigure(Selection {
            sep_info_index: endpoint.sep_info_index,
            seid: endpoint.seid,
            config,
            protect: content_protect.then(ProtectInfo::scms_t),
            reconfigure: true,
        }))
    }

    /// Pull the next outbound frame, adding the content protection header when active
    pub fn next_source_frame(&self, path: &mut impl CodecDataPath) -> Option<MediaFrame> {
        let mut frame = path.read_source_frame()?;
        let protected = self
            .active
            .is_some_and(|index| self.peers[index.get()].content_protect_active);
        if protected && frame.data.insert(0, self.content_protect_flag as u8).is_err() {
            warn!("[CODEC] frame too large for protection header");
            return None;
        }
        Some(frame)
    }
}

/// Negotiator shared between the event context and the audio producer
pub struct SharedNegotiator {
    inner: Mutex<CriticalSectionRawMutex, RefCell<CodecNegotiator>>,
}

impl SharedNegotiator {
    /// Wrap a negotiator
    #[must_use]
    pub const fn new(negotiator: CodecNegotiator) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(negotiator)),
        }
    }

    /// Run `f` with exclusive access to the negotiator
    pub fn lock<R>(&self, f: impl FnOnce(&mut CodecNegotiator) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2dp::{AacCapabilities, SbcCapabilities};

    const PEER: BluetoothAddress = BluetoothAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    fn idx(n: usize) -> StreamIndex {
        StreamIndex::new(n).unwrap()
    }

    fn negotiator(order: &[CodecIndex]) -> CodecNegotiator {
        let mut n = CodecNegotiator::new(SepType::Source, false);
        n.set_priorities(order).unwrap();
        n
    }

    fn caps(codec: CodecIndex) -> CodecInfo {
        CodecCapabilities::local_default(codec).encode()
    }

    /// Discovers `codecs` as peer sinks and feeds their capabilities
    fn feed(n: &mut CodecNegotiator, index: StreamIndex, codecs: &[CodecIndex]) -> Result<GetConfigOutcome, A2dpError> {
        n.process_discovery_result(index, PEER, codecs.len() as u8, codecs.len() as u8, 0);
        let mut outcome = Ok(GetConfigOutcome::Pending);
        for (i, codec) in codecs.iter().enumerate() {
            outcome = n.process_get_config(
                index,
                PEER,
                caps(*codec).as_bytes(),
                i as u8,
                i as u8 + 1,
                ProtectInfo::NONE,
            );
        }
        outcome
    }

    #[test]
    fn test_initiator_follows_local_preference() {
        // local order [C, A, B] with C = LDAC, peer offers {A = AAC, B = SBC}
        let mut n = negotiator(&[CodecIndex::Ldac, CodecIndex::Aac, CodecIndex::Sbc]);
        let outcome = feed(&mut n, idx(0), &[CodecIndex::Aac, CodecIndex::Sbc]).unwrap();
        let GetConfigOutcome::Selected(selection) = outcome else {
            panic!("selection expected");
        };
        assert_eq!(selection.codec(), Some(CodecIndex::Aac));
        assert_eq!(selection.seid, 1);
        assert!(!selection.reconfigure);
        assert_eq!(n.peer(idx(0)).selected(SepType::Sink).unwrap().seid, 1);
    }

    #[test]
    fn test_pending_until_all_capabilities() {
        let mut n = negotiator(&[CodecIndex::Sbc]);
        n.process_discovery_result(idx(0), PEER, 2, 2, 0);
        let first = n
            .process_get_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), 0, 1, ProtectInfo::NONE)
            .unwrap();
        assert_eq!(first, GetConfigOutcome::Pending);
        // malformed codec still completes the batch
        let second = n
            .process_get_config(idx(0), PEER, &[0x02, 0x00], 1, 2, ProtectInfo::NONE)
            .unwrap();
        assert!(matches!(second, GetConfigOutcome::Selected(_)));
    }

    #[test]
    fn test_repeated_completion_is_idempotent() {
        let mut n = negotiator(&[CodecIndex::Aac, CodecIndex::Sbc]);
        let GetConfigOutcome::Selected(first) = feed(&mut n, idx(0), &[CodecIndex::Sbc, CodecIndex::Aac]).unwrap()
        else {
            panic!("selection expected");
        };
        // preference changes after the selection was finalized
        n.set_priorities(&[CodecIndex::Sbc]).unwrap();
        let again = n
            .process_get_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), 0, 1, ProtectInfo::NONE)
            .unwrap();
        assert_eq!(again, GetConfigOutcome::Selected(first));
        assert_eq!(first.codec(), Some(CodecIndex::Aac));
    }

    #[test]
    fn test_acceptor_and_initiator_agree() {
        let order = [CodecIndex::Aac, CodecIndex::Sbc];
        let peer_codecs = [CodecIndex::Sbc, CodecIndex::Aac];

        let mut initiator = negotiator(&order);
        let GetConfigOutcome::Selected(by_initiator) = feed(&mut initiator, idx(0), &peer_codecs).unwrap() else {
            panic!("selection expected");
        };

        let mut acceptor = negotiator(&order);
        let proposal = by_initiator.config;
        acceptor
            .process_set_config(idx(0), PEER, proposal.as_bytes(), ProtectInfo::NONE)
            .unwrap();
        let GetConfigOutcome::Selected(by_acceptor) = feed(&mut acceptor, idx(0), &peer_codecs).unwrap() else {
            panic!("selection expected");
        };
        assert_eq!(by_initiator.codec(), by_acceptor.codec());
        assert_eq!(by_initiator.seid, by_acceptor.seid);
    }

    #[test]
    fn test_acceptor_without_matching_endpoint_fails() {
        let mut n = negotiator(&[CodecIndex::Aac, CodecIndex::Sbc]);
        n.process_set_config(idx(0), PEER, caps_config_aac().as_bytes(), ProtectInfo::NONE)
            .unwrap();
        assert_eq!(
            feed(&mut n, idx(0), &[CodecIndex::Sbc]),
            Err(A2dpError::NoCompatibleEndpoint)
        );
    }

    fn caps_config_aac() -> CodecInfo {
        let local = CodecCapabilities::Aac(AacCapabilities::default());
        local.select_config(&local).unwrap().encode()
    }

    #[test]
    fn test_content_protection_skips_unprotected_endpoints() {
        let mut n = CodecNegotiator::new(SepType::Source, true);
        n.set_priorities(&[CodecIndex::Aac, CodecIndex::Sbc]).unwrap();
        n.process_discovery_result(idx(0), PEER, 2, 2, 0);
        n.process_get_config(idx(0), PEER, caps(CodecIndex::Aac).as_bytes(), 0, 1, ProtectInfo::NONE)
            .unwrap();
        let outcome = n
            .process_get_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), 1, 2, ProtectInfo::scms_t())
            .unwrap();
        let GetConfigOutcome::Selected(selection) = outcome else {
            panic!("selection expected");
        };
        assert_eq!(selection.codec(), Some(CodecIndex::Sbc));
        assert_eq!(selection.protect, Some(ProtectInfo::scms_t()));
        assert!(n.peer(idx(0)).content_protect_active);
    }

    #[test]
    fn test_set_config_protection_checks() {
        let config = CodecCapabilities::Sbc(SbcCapabilities::default().select_with(&SbcCapabilities::default()).unwrap())
            .encode();

        let mut plain = negotiator(&[CodecIndex::Sbc]);
        let reject = plain
            .process_set_config(idx(0), PEER, config.as_bytes(), ProtectInfo::scms_t())
            .unwrap_err();
        assert_eq!(reject.status, A2dpStatus::BadCpType);
        assert_eq!(reject.category, ServiceCategory::Protect);

        let mut protected = CodecNegotiator::new(SepType::Source, true);
        protected.set_priorities(&[CodecIndex::Sbc]).unwrap();
        let two = ProtectInfo::from_bytes(2, &crate::constants::SCMS_T_DESCRIPTOR);
        assert!(protected.process_set_config(idx(0), PEER, config.as_bytes(), two).is_err());
        let accept = protected
            .process_set_config(idx(0), PEER, config.as_bytes(), ProtectInfo::scms_t())
            .unwrap();
        assert!(accept.reconfig_needed);
        // same protection again: nothing changed
        let accept = protected
            .process_set_config(idx(0), PEER, config.as_bytes(), ProtectInfo::scms_t())
            .unwrap();
        assert!(!accept.reconfig_needed);
    }

    #[test]
    fn test_set_config_wrong_codec() {
        let mut n = negotiator(&[CodecIndex::Sbc]);
        let reject = n
            .process_set_config(idx(0), PEER, caps_config_aac().as_bytes(), ProtectInfo::NONE)
            .unwrap_err();
        assert_eq!(reject.status, A2dpStatus::WrongCodec);
        assert_eq!(reject.category, ServiceCategory::Codec);
        // capability sets (several bits) are not configurations
        assert!(
            n.process_set_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), ProtectInfo::NONE)
                .is_err()
        );
        assert!(!n.peer(idx(0)).acceptor);
    }

    #[test]
    fn test_first_open_becomes_active_and_close_clears() {
        let mut n = negotiator(&[CodecIndex::Sbc]);
        feed(&mut n, idx(1), &[CodecIndex::Sbc]).unwrap();
        n.process_open(idx(1), 672);
        assert_eq!(n.active_peer(), Some(idx(1)));
        assert!(n.active_config().is_some());

        n.process_open(idx(2), 800);
        assert_eq!(n.active_peer(), Some(idx(1)));

        n.process_close(idx(1));
        assert_eq!(n.active_peer(), None);
        assert!(n.peer(idx(1)).addr.is_empty());
    }

    #[test]
    fn test_set_active_peer() {
        let mut n = negotiator(&[CodecIndex::Sbc]);
        feed(&mut n, idx(0), &[CodecIndex::Sbc]).unwrap();
        assert!(!n.set_active_peer(&BluetoothAddress::new([9; 6])));
        assert!(n.set_active_peer(&PEER));
        assert_eq!(n.active_peer(), Some(idx(0)));
        assert!(n.set_active_peer(&BluetoothAddress::EMPTY));
        assert_eq!(n.active_peer(), None);
    }

    #[test]
    fn test_encoder_params_use_smallest_mtu() {
        let mut n = negotiator(&[CodecIndex::Sbc]);
        feed(&mut n, idx(0), &[CodecIndex::Sbc]).unwrap();
        feed(&mut n, idx(1), &[CodecIndex::Sbc]).unwrap();
        n.process_open(idx(0), 895);
        n.process_open(idx(1), 672);
        n.process_delay_report(idx(0), 1500);
        let params = n.encoder_params().unwrap();
        assert_eq!(params.peer_mtu, 672);
        assert_eq!(params.delay, 1500);
        assert!(!params.content_protect);
    }

    #[test]
    fn test_user_config_deferred_until_capabilities_complete() {
        let mut n = negotiator(&[CodecIndex::Sbc, CodecIndex::Aac]);
        n.process_discovery_result(idx(0), PEER, 2, 2, 0);
        n.process_get_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), 0, 1, ProtectInfo::NONE)
            .unwrap();
        assert_eq!(
            n.set_codec_user_config(&PEER, CodecIndex::Aac).unwrap(),
            UserConfigOutcome::Deferred
        );
        let outcome = n
            .process_get_config(idx(0), PEER, caps(CodecIndex::Aac).as_bytes(), 1, 2, ProtectInfo::NONE)
            .unwrap();
        let GetConfigOutcome::Selected(selection) = outcome else {
            panic!("selection expected");
        };
        assert_eq!(selection.codec(), Some(CodecIndex::Aac));
    }

    #[test]
    fn test_deferred_user_config_overrides_peer_proposal() {
        let mut n = negotiator(&[CodecIndex::Sbc, CodecIndex::Aac]);
        let sbc = CodecCapabilities::Sbc(SbcCapabilities::default().select_with(&SbcCapabilities::default()).unwrap())
            .encode();
        n.process_set_config(idx(0), PEER, sbc.as_bytes(), ProtectInfo::NONE)
            .unwrap();
        n.process_discovery_result(idx(0), PEER, 2, 2, 0);
        n.process_get_config(idx(0), PEER, caps(CodecIndex::Sbc).as_bytes(), 0, 1, ProtectInfo::NONE)
            .unwrap();
        assert_eq!(
            n.set_codec_user_config(&PEER, CodecIndex::Aac).unwrap(),
            UserConfigOutcome::Deferred
        );

        let outcome = n
            .process_get_config(idx(0), PEER, caps(CodecIndex::Aac).as_bytes(), 1, 2, ProtectInfo::NONE)
            .unwrap();
        let GetConfigOutcome::Selected(selection) = outcome else {
            panic!("selection expected");
        };
        assert_eq!(selection.codec(), Some(CodecIndex::Aac));
        assert_eq!(selection.seid, 2);
        assert!(selection.reconfigure);
        assert!(!n.peer(idx(0)).user_override);
        assert_eq!(n.peer(idx(0)).codec_config, Some(selection.config));
    }

    #[test]
    fn test_user_config_reconfigures_when_complete() {
        let mut n = negotiator(&[CodecIndex::Sbc, CodecIndex::Aac]);
        feed(&mut n, idx(0), &[CodecIndex::Sbc, CodecIndex::Aac]).unwrap();
        let UserConfigOutcome::Reconfigure(selection) = n.set_codec_user_config(&PEER, CodecIndex::Aac).unwrap()
        else {
            panic!("reconfigure expected");
        };
        assert_eq!(selection.codec(), Some(CodecIndex::Aac));
        assert!(selection.reconfigure);
        assert_eq!(
            n.set_codec_user_config(&PEER, CodecIndex::Aac).unwrap(),
            UserConfigOutcome::Unchanged
        );
        assert_eq!(
            n.set_codec_user_config(&BluetoothAddress::new([7; 6]), CodecIndex::Aac),
            Err(A2dpError::UnknownPeer)
        );
        assert_eq!(
            n.set_codec_user_config(&PEER, CodecIndex::Ldac),
            Err(A2dpError::UnsupportedCodec)
        );
    }

    #[test]
    fn test_shared_negotiator_lock() {
        let shared = SharedNegotiator::new(CodecNegotiator::new(SepType::Sink, false));
        shared.lock(|n| n.set_priorities(&[CodecIndex::Sbc])).unwrap();
        assert_eq!(shared.lock(|n| n.priorities().len()), 1);
        assert_eq!(shared.lock(|n| n.local_role()), SepType::Sink);
    }
}
