//! Collaborator interfaces
//!
//! The session core never touches a radio, a socket or a clock. Everything
//! it needs from the outside world goes through the traits below, and
//! everything the outside world reports comes back as an [`crate::Event`]
//! posted to the router queue.
//!
//! A platform implements all control-plane traits on one value, which then
//! satisfies [`AvPlatform`] through the blanket implementation. The codec
//! data path is separate because it is driven from the audio producer.

use crate::BluetoothAddress;
use crate::a2dp::{A2dpStatus, CodecInfo, MediaFrame, ProtectInfo, SepType, ServiceCategory};
use crate::avrcp::MessageCode;
use crate::events::UpperEvent;
use crate::handle::{Label, RcHandle, StreamHandle, StreamIndex};
use crate::AvError;
use bt_hci::param::BdAddr;
use core::time::Duration;

/// Timer categories armed by the session core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Waiting for an incoming peer to start signaling
    Signalling,
    /// Incoming connection collision window of a stream
    Accept(StreamIndex),
    /// Role switch guard of a stream
    RoleSwitch(StreamIndex),
    /// Delayed AVRCP open after a stream opened
    RcOpen(StreamIndex),
    /// Pending AVRCP transaction
    AvrcpTransaction(Label),
}

/// Armed timer identity
///
/// The generation changes every time a timer of the same kind is re-armed
/// or cancelled, so an expiry carrying an older token is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken {
    /// Timer category
    pub kind: TimerKind,
    /// Arm generation
    pub generation: u16,
}

/// One-shot timers
///
/// An expiry is reported by posting `Event::Timer(token)`.
pub trait TimerService {
    /// Arm a one-shot timer
    fn arm(&mut self, token: TimerToken, after: Duration);
    /// Cancel a timer; an expiry already posted is discarded by generation
    fn cancel(&mut self, token: TimerToken);
}

/// AVDTP signaling and media engine
///
/// Requests complete asynchronously through `TransportEvent`s.
pub trait AvdtpTransport {
    /// Open the signaling channel to `peer`
    ///
    /// # Errors
    /// Returns `AvError::TransportError` if the request cannot be issued
    fn connect(&mut self, handle: StreamHandle, peer: BluetoothAddress) -> Result<(), AvError>;
    /// Tear down the signaling channel to `peer`
    fn disconnect(&mut self, peer: BluetoothAddress);
    /// Discover the peer's stream endpoints
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn discover(&mut self, handle: StreamHandle, peer: BluetoothAddress) -> Result<(), AvError>;
    /// Fetch the capabilities of one peer endpoint
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn get_capabilities(
        &mut self,
        handle: StreamHandle,
        peer: BluetoothAddress,
        seid: u8,
    ) -> Result<(), AvError>;
    /// Configure a peer endpoint
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn set_config(
        &mut self,
        handle: StreamHandle,
        peer: BluetoothAddress,
        local_seid: u8,
        peer_seid: u8,
        codec: &CodecInfo,
        protect: Option<ProtectInfo>,
    ) -> Result<(), AvError>;
    /// Answer a configuration request from the peer
    fn config_response(
        &mut self,
        handle: StreamHandle,
        label: u8,
        status: A2dpStatus,
        category: Option<ServiceCategory>,
    );
    /// Open the configured stream
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn open(&mut self, handle: StreamHandle) -> Result<(), AvError>;
    /// Start streaming
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn start(&mut self, handle: StreamHandle) -> Result<(), AvError>;
    /// Suspend streaming
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn suspend(&mut self, handle: StreamHandle) -> Result<(), AvError>;
    /// Close the stream
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn close(&mut self, handle: StreamHandle) -> Result<(), AvError>;
    /// Reconfigure a suspended stream
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn reconfigure(
        &mut self,
        handle: StreamHandle,
        codec: &CodecInfo,
        protect: Option<ProtectInfo>,
    ) -> Result<(), AvError>;
    /// Send a delay report (sink role)
    ///
    /// # Errors
    /// As for [`AvdtpTransport::connect`]
    fn delay_report(&mut self, handle: StreamHandle, delay: u16) -> Result<(), AvError>;
    /// Send one media frame
    ///
    /// # Errors
    /// Returns `AvError::QueueFull` if the transport cannot take the frame now
    fn write(&mut self, handle: StreamHandle, frame: &MediaFrame) -> Result<(), AvError>;
}

/// Remote-control session role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RcRole {
    /// Local side opens the connection
    Initiator,
    /// Local side listens for the peer
    Acceptor,
}

/// AVCTP engine
pub trait AvrcpTransport {
    /// Create an AVRCP connection; an acceptor without `peer` listens for anyone
    ///
    /// # Errors
    /// Returns `AvError::NoResources` if the engine has no free handle
    fn open_rc(
        &mut self,
        role: RcRole,
        peer: Option<BluetoothAddress>,
    ) -> Result<RcHandle, AvError>;
    /// Close an AVRCP connection or listener
    fn close_rc(&mut self, handle: RcHandle);
    /// Open the browsing channel
    fn open_browse(&mut self, handle: RcHandle);
    /// Close the browsing channel
    fn close_browse(&mut self, handle: RcHandle);
    /// Send a pass-through command
    ///
    /// # Errors
    /// Returns `AvError::TransportError` if the command cannot be sent
    fn send_pass_through(
        &mut self,
        handle: RcHandle,
        label: Label,
        op_id: u8,
        pressed: bool,
    ) -> Result<(), AvError>;
    /// Answer a pass-through command
    fn respond_pass_through(
        &mut self,
        handle: RcHandle,
        label: Label,
        code: MessageCode,
        op_id: u8,
        pressed: bool,
    );
    /// Send a vendor-dependent command
    ///
    /// # Errors
    /// As for [`AvrcpTransport::send_pass_through`]
    fn send_vendor(
        &mut self,
        handle: RcHandle,
        label: Label,
        code: MessageCode,
        company_id: u32,
        data: &[u8],
    ) -> Result<(), AvError>;
    /// Answer a vendor-dependent command
    fn respond_vendor(
        &mut self,
        handle: RcHandle,
        label: Label,
        code: MessageCode,
        company_id: u32,
        data: &[u8],
    );
    /// Answer a browsing command
    fn respond_browse(&mut self, handle: RcHandle, label: Label, data: &[u8]);
}

/// Service discovery
///
/// Results come back as `SdpEvent`s.
pub trait ServiceDiscovery {
    /// Look up the peer's AVRCP target and controller records
    ///
    /// # Errors
    /// Returns `AvError::TransportError` if the search cannot be started
    fn find_avrcp(&mut self, peer: BluetoothAddress) -> Result<(), AvError>;
    /// Look up the peer's A2DP record of the given endpoint type
    ///
    /// # Errors
    /// As for [`ServiceDiscovery::find_avrcp`]
    fn find_a2dp(&mut self, handle: StreamHandle, peer: BluetoothAddress, kind: SepType) -> Result<(), AvError>;
}

/// Upper application callback
pub trait UpperCallback {
    /// Report one externally visible transition
    fn deliver(&mut self, event: UpperEvent);
}

/// Baseband role on an ACL link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkRole {
    /// Central (master)
    Central,
    /// Peripheral (slave)
    Peripheral,
    /// No ACL link to the peer
    Unknown,
}

/// Link policy control
pub trait LinkPolicy {
    /// Current local role towards `peer`
    fn role(&self, peer: &BdAddr) -> LinkRole;
    /// Ask the controller to become central towards `peer`
    ///
    /// The outcome arrives as `Event::RoleChanged`.
    ///
    /// # Errors
    /// Returns `AvError::TransportError` if the request is refused outright
    fn request_role_switch(&mut self, peer: &BdAddr) -> Result<(), AvError>;
    /// Allow or forbid role switches initiated by `peer`
    fn allow_role_switch(&mut self, peer: &BdAddr, allow: bool);
}

/// Encoded audio path
pub trait CodecDataPath {
    /// Next encoded outbound frame, if the encoder has one ready
    fn read_source_frame(&mut self) -> Option<MediaFrame>;
    /// Hand an inbound frame to the decoder
    fn deliver_sink_frame(&mut self, codec: &CodecInfo, frame: &MediaFrame);
}

/// Everything the event context needs from the platform
pub trait AvPlatform:
    AvdtpTransport + AvrcpTransport + ServiceDiscovery + UpperCallback + LinkPolicy + TimerService
{
}

impl<T> AvPlatform for T where
    T: AvdtpTransport + AvrcpTransport + ServiceDiscovery + UpperCallback + LinkPolicy + TimerService
{
}
