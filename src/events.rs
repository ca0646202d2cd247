//! Router input and upper-layer output
//!
//! Everything that reaches the session core is an [`Event`] posted to the
//! router queue: application requests, transport completions, AVRCP
//! traffic, discovery results, role changes and timer expiries. Everything
//! the core reports goes out as one [`UpperEvent`] through
//! [`crate::interfaces::UpperCallback`].

use crate::BluetoothAddress;
use crate::av::LocalEndpoint;
use crate::a2dp::{CodecCapabilities, CodecIndex, CodecInfo, MediaFrame, ProtectInfo};
use crate::avrcp::pdu::{AppSettingValues, NotificationValue, Payload};
use crate::avrcp::{AppSetting, AvrcStatus, EventId, MessageCode, PduId};
use crate::config::{AvFeatures, AvOptions};
use crate::constants::{
    CODEC_INFO_LEN, MAX_APP_SETTINGS, MAX_CODECS, MAX_LOCAL_ENDPOINTS, MAX_PEER_ENDPOINTS,
};
use crate::handle::{Channel, Label, RcHandle, StreamHandle};
use crate::interfaces::TimerToken;
use heapless::Vec;

/// Raw codec information element as carried by transport events
pub type CodecBytes = Vec<u8, CODEC_INFO_LEN>;

/// Inbound event processed by the router
#[derive(Debug, Clone)]
pub enum Event {
    /// Application request
    Api(ApiRequest),
    /// AVDTP signaling or media event
    Transport(TransportEvent),
    /// AVCTP event
    Avrcp(AvrcpEvent),
    /// Service discovery result
    Sdp(SdpEvent),
    /// Role switch towards `peer` finished
    RoleChanged {
        /// Peer of the ACL link
        peer: BluetoothAddress,
        /// Local side is now central
        success: bool,
    },
    /// Timer expiry
    Timer(TimerToken),
    /// The encoder has outbound frames ready
    SourceDataReady,
}

/// Application request
#[derive(Debug, Clone)]
pub enum ApiRequest {
    /// Enable the core with the given configuration
    Enable(AvOptions),
    /// Close everything and disable the core
    Disable,
    /// Register a stream slot for `channel` with its local endpoints
    Register {
        /// Media channel
        channel: Channel,
        /// Local stream endpoints
        endpoints: Vec<LocalEndpoint, MAX_LOCAL_ENDPOINTS>,
    },
    /// Release a registered stream slot
    Deregister(StreamHandle),
    /// Open a stream to `peer`
    Open {
        /// Registered stream
        handle: StreamHandle,
        /// Peer to connect
        peer: BluetoothAddress,
    },
    /// Close a stream
    Close(StreamHandle),
    /// Close every stream and RC session of a peer
    Disconnect(BluetoothAddress),
    /// Start streaming
    Start(StreamHandle),
    /// Stop streaming; `suspend` also suspends the AVDTP stream
    Stop {
        /// Stream
        handle: StreamHandle,
        /// Suspend instead of close
        suspend: bool,
    },
    /// Reconfigure an open stream
    Reconfigure {
        /// Stream
        handle: StreamHandle,
        /// New configuration
        codec: CodecInfo,
    },
    /// Report the sink delay, in 1/10 ms
    DelayReport {
        /// Stream
        handle: StreamHandle,
        /// Delay
        delay: u16,
    },
    /// Open a remote-control session to the peer of a stream
    RcOpen(StreamHandle),
    /// Close a remote-control session
    RcClose(RcHandle),
    /// Send a pass-through command
    RemoteCmd {
        /// Session
        rc: RcHandle,
        /// Operation id
        op_id: u8,
        /// Key pressed (false: released)
        pressed: bool,
    },
    /// Send a vendor-dependent command
    VendorCmd {
        /// Session
        rc: RcHandle,
        /// Command type
        code: MessageCode,
        /// Company id
        company_id: u32,
        /// Payload
        data: Payload,
    },
    /// Answer a vendor-dependent command
    VendorRsp {
        /// Session
        rc: RcHandle,
        /// Label of the command
        label: Label,
        /// Response code
        code: MessageCode,
        /// Company id
        company_id: u32,
        /// Payload
        data: Payload,
    },
    /// Answer a metadata command
    MetaRsp {
        /// Session
        rc: RcHandle,
        /// Label of the command
        label: Label,
        /// Response code
        code: MessageCode,
        /// Payload
        data: Payload,
    },
    /// Answer a browsing command
    BrowseRsp {
        /// Session
        rc: RcHandle,
        /// Label of the command
        label: Label,
        /// Payload
        data: Payload,
    },
    /// Set the absolute volume of a peer target
    SetAbsoluteVolume {
        /// Peer
        peer: BluetoothAddress,
        /// Volume, 0..=0x7F
        volume: u8,
    },
    /// Subscribe to volume changes of a peer target
    RegisterVolumeChanged(BluetoothAddress),
    /// Fetch the attributes of the track now playing
    GetElementAttributes(BluetoothAddress),
    /// Fetch the play status
    GetPlayStatus(BluetoothAddress),
    /// Query the player application settings
    ListAppSettings(BluetoothAddress),
    /// Change player application settings
    SetAppSettings {
        /// Peer
        peer: BluetoothAddress,
        /// (attribute, value) pairs
        values: AppSettingValues,
    },
    /// Designate the peer whose stream feeds the encoder
    SetActivePeer(BluetoothAddress),
    /// Prefer a codec for a peer
    SetCodecUserConfig {
        /// Peer
        peer: BluetoothAddress,
        /// Preferred codec
        codec: CodecIndex,
    },
    /// Narrow the local capabilities of a codec for a peer
    SetCodecAudioConfig {
        /// Peer
        peer: BluetoothAddress,
        /// Capabilities to apply
        caps: CodecCapabilities,
    },
}

/// AVDTP signaling and media event
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Signaling channel connected
    SignalingConnected {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Signaling channel disconnected
    SignalingDisconnected {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Discovery finished
    DiscoverResult {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Endpoints on the peer
        num_seps: u8,
        /// Sink endpoints on the peer
        num_sinks: u8,
        /// Source endpoints on the peer
        num_sources: u8,
        /// Identifiers of the usable peer endpoints, in discovery order
        seids: Vec<u8, MAX_PEER_ENDPOINTS>,
    },
    /// Discovery failed
    DiscoverFailed {
        /// Stream
        handle: StreamHandle,
    },
    /// Capabilities of one peer endpoint
    Capabilities {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Discovery index of the endpoint
        sep_info_index: u8,
        /// Peer endpoint identifier
        seid: u8,
        /// Codec information element
        codec: CodecBytes,
        /// Content protection advertised
        protect: ProtectInfo,
    },
    /// Capability request for one endpoint failed
    CapabilitiesFailed {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Discovery index of the endpoint
        sep_info_index: u8,
    },
    /// Peer proposes a configuration
    ConfigIndication {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Signaling label to answer with
        label: u8,
        /// Proposed codec configuration
        codec: CodecBytes,
        /// Proposed content protection
        protect: ProtectInfo,
    },
    /// Local configuration request answered
    ConfigConfirm {
        /// Stream
        handle: StreamHandle,
        /// Accepted by the peer
        ok: bool,
    },
    /// Stream opened
    Opened {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Media channel MTU
        mtu: u16,
    },
    /// Stream open failed
    OpenFailed {
        /// Stream
        handle: StreamHandle,
    },
    /// Local start request answered
    StartConfirm {
        /// Stream
        handle: StreamHandle,
        /// Accepted by the peer
        ok: bool,
    },
    /// Peer started the stream
    StartIndication {
        /// Stream
        handle: StreamHandle,
    },
    /// Local suspend request answered
    SuspendConfirm {
        /// Stream
        handle: StreamHandle,
        /// Accepted by the peer
        ok: bool,
    },
    /// Peer suspended the stream
    SuspendIndication {
        /// Stream
        handle: StreamHandle,
    },
    /// Stream closed
    Closed {
        /// Stream
        handle: StreamHandle,
    },
    /// Local reconfigure request answered
    ReconfigureConfirm {
        /// Stream
        handle: StreamHandle,
        /// Accepted by the peer
        ok: bool,
    },
    /// Peer reported its sink delay
    DelayReport {
        /// Stream
        handle: StreamHandle,
        /// Delay in 1/10 ms
        delay: u16,
    },
    /// Inbound media frame
    Media {
        /// Stream
        handle: StreamHandle,
        /// Frame
        frame: MediaFrame,
    },
}

impl TransportEvent {
    /// Local stream the event belongs to; `None` for link-level events
    #[must_use]
    pub const fn handle(&self) -> Option<StreamHandle> {
        match self {
            Self::SignalingConnected { .. } | Self::SignalingDisconnected { .. } => None,
            Self::DiscoverResult { handle, .. }
            | Self::DiscoverFailed { handle }
            | Self::Capabilities { handle, .. }
            | Self::CapabilitiesFailed { handle, .. }
            | Self::ConfigIndication { handle, .. }
            | Self::ConfigConfirm { handle, .. }
            | Self::Opened { handle, .. }
            | Self::OpenFailed { handle }
            | Self::StartConfirm { handle, .. }
            | Self::StartIndication { handle }
            | Self::SuspendConfirm { handle, .. }
            | Self::SuspendIndication { handle }
            | Self::Closed { handle }
            | Self::ReconfigureConfirm { handle, .. }
            | Self::DelayReport { handle, .. }
            | Self::Media { handle, .. } => Some(*handle),
        }
    }
}

/// AVCTP event
#[derive(Debug, Clone)]
pub enum AvrcpEvent {
    /// Control channel opened
    Opened {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Control channel closed
    Closed {
        /// Session
        rc: RcHandle,
    },
    /// Browsing channel opened
    BrowseOpened {
        /// Session
        rc: RcHandle,
    },
    /// Browsing channel closed
    BrowseClosed {
        /// Session
        rc: RcHandle,
    },
    /// Command or response received
    Message {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Message
        msg: AvrcpMessage,
    },
}

/// AVCTP message
#[derive(Debug, Clone)]
pub enum AvrcpMessage {
    /// Pass-through command or response
    PassThrough {
        /// Command type or response code
        code: MessageCode,
        /// Operation id
        op_id: u8,
        /// Key pressed (false: released)
        pressed: bool,
        /// Operation data (vendor-unique payload)
        data: Vec<u8, 8>,
    },
    /// Vendor-dependent command or response
    Vendor {
        /// Command type or response code
        code: MessageCode,
        /// Addressed to the panel subunit
        subunit_panel: bool,
        /// Company id
        company_id: u32,
        /// Payload
        data: Payload,
    },
    /// Browsing command
    Browse {
        /// Payload
        data: Payload,
    },
}

/// One AVRCP service record entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvrcpServiceEntry {
    /// Profile version, e.g. 0x0104
    pub version: u16,
    /// Supported features attribute
    pub features: u16,
}

/// AVRCP records found on a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvrcpServiceRecord {
    /// Target record
    pub target: Option<AvrcpServiceEntry>,
    /// Controller record
    pub controller: Option<AvrcpServiceEntry>,
}

/// Service discovery result
#[derive(Debug, Clone)]
pub enum SdpEvent {
    /// AVRCP search finished; `None` if the search failed
    AvrcpRecord {
        /// Peer
        peer: BluetoothAddress,
        /// Records found
        record: Option<AvrcpServiceRecord>,
    },
    /// A2DP search finished
    A2dpRecord {
        /// Stream that asked
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Matching record found
        found: bool,
    },
}

/// Event reported to the upper layer
#[derive(Debug, Clone)]
pub enum UpperEvent {
    /// Core enabled
    Enabled,
    /// Core disabled
    Disabled,
    /// Stream slot registered
    Registered {
        /// Stream
        handle: StreamHandle,
    },
    /// Stream slot released
    Deregistered {
        /// Stream
        handle: StreamHandle,
    },
    /// A peer connected to us; the stream is being set up
    PendingConnection {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Stream opened
    Opened {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Negotiated codec
        codec: Option<CodecIndex>,
    },
    /// Stream open failed
    OpenFailed {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Stream closed
    Closed {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Stream started
    Started {
        /// Stream
        handle: StreamHandle,
        /// Started on local request
        initiator: bool,
        /// Media packets carry no RTP header
        no_rtp_header: bool,
    },
    /// Start request failed
    StartFailed {
        /// Stream
        handle: StreamHandle,
    },
    /// Stream suspended
    Suspended {
        /// Stream
        handle: StreamHandle,
        /// Suspended on local request
        initiator: bool,
    },
    /// Reconfiguration finished
    Reconfigured {
        /// Stream
        handle: StreamHandle,
        /// New configuration in effect
        ok: bool,
    },
    /// Peer sink delay
    DelayReport {
        /// Stream
        handle: StreamHandle,
        /// Delay in 1/10 ms
        delay: u16,
    },
    /// Codec selection changed
    CodecState {
        /// Peer
        peer: BluetoothAddress,
        /// Codec in use
        current: Option<CodecIndex>,
        /// Codecs available locally, in preference order
        selectable: Vec<CodecIndex, MAX_CODECS>,
    },
    /// Remote-control session opened
    RcOpened {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Peer features known so far
        features: AvFeatures,
    },
    /// Remote-control session could not be opened
    RcOpenFailed {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Remote-control session closed
    RcClosed {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Peer features learned or changed
    RcFeatures {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Peer features
        features: AvFeatures,
    },
    /// Browsing channel opened
    BrowseOpened {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Browsing channel closed
    BrowseClosed {
        /// Session
        rc: RcHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Pass-through command accepted from a peer
    RemoteCommand {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Operation id
        op_id: u8,
        /// Key pressed (false: released)
        pressed: bool,
    },
    /// Pass-through response from a peer
    RemoteResponse {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Response code
        code: MessageCode,
        /// Operation id
        op_id: u8,
        /// Key pressed (false: released)
        pressed: bool,
    },
    /// Vendor-dependent command from a peer
    VendorCommand {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Command type
        code: MessageCode,
        /// Company id
        company_id: u32,
        /// Payload
        data: Payload,
    },
    /// Vendor-dependent response from a peer
    VendorResponse {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Response code
        code: MessageCode,
        /// Payload
        data: Payload,
    },
    /// Metadata command for the local target
    MetaMessage {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Command type
        code: MessageCode,
        /// Payload
        data: Payload,
    },
    /// Browsing command for the local target
    BrowseMessage {
        /// Session
        rc: RcHandle,
        /// Transaction label
        label: Label,
        /// Payload
        data: Payload,
    },
    /// Peer volume reported or set
    VolumeChanged {
        /// Peer
        peer: BluetoothAddress,
        /// Volume, 0..=0x7F
        volume: u8,
        /// Response code it arrived with
        code: MessageCode,
    },
    /// Notification from a peer target
    Notification {
        /// Peer
        peer: BluetoothAddress,
        /// Event
        event: EventId,
        /// Value
        value: NotificationValue,
        /// Interim (true) or changed (false)
        interim: bool,
    },
    /// Player application setting attributes and their values
    AppSettingAttributes {
        /// Peer
        peer: BluetoothAddress,
        /// Attributes
        attrs: Vec<AppSetting, MAX_APP_SETTINGS>,
    },
    /// Current player application settings
    AppSettings {
        /// Peer
        peer: BluetoothAddress,
        /// (attribute, value) pairs
        values: AppSettingValues,
    },
    /// Element attributes of the track now playing, raw parameter block
    TrackInfo {
        /// Peer
        peer: BluetoothAddress,
        /// Attributes
        data: Payload,
    },
    /// Play status
    PlayStatus {
        /// Peer
        peer: BluetoothAddress,
        /// Track length in ms
        length: u32,
        /// Position in ms
        position: u32,
        /// Playback status
        status: u8,
    },
    /// A command got no response in time
    CommandTimeout {
        /// Peer
        peer: BluetoothAddress,
        /// Metadata PDU, `None` for pass-through and raw vendor commands
        pdu: Option<PduId>,
        /// Event of a notification registration
        event: Option<EventId>,
    },
    /// A command was rejected by the peer
    CommandRejected {
        /// Peer
        peer: BluetoothAddress,
        /// Metadata PDU
        pdu: Option<PduId>,
        /// Status carried by the reject
        status: AvrcStatus,
    },
}
