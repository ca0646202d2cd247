//! Router task
//!
//! One task owns the [`SessionManager`] and serializes everything that
//! touches it: events posted by the Bluetooth stack (transport
//! completions, AVRCP traffic, discovery results, timer expiries),
//! application requests coming through [`crate::api`], and the "source
//! data ready" signal raised by the encoder.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bondybird_av::a2dp::{CodecNegotiator, SepType, SharedNegotiator};
//! use bondybird_av::{AvPlatform, CodecDataPath, SessionManager, processor};
//!
//! static NEGOTIATOR: SharedNegotiator =
//!     SharedNegotiator::new(CodecNegotiator::new(SepType::Source, false));
//!
//! async fn av_task<P: AvPlatform>(platform: P, mut path: impl CodecDataPath) -> ! {
//!     let mut manager = SessionManager::new(platform, &NEGOTIATOR);
//!     processor::run(&mut manager, &mut path).await
//! }
//! ```
//!
//! Stack glue posts its events with [`post`] from async code or
//! [`try_post`] from callbacks; the encoder calls [`signal_source_ready`].
//!
//! # Routing
//!
//! Every event is classified by [`route`] before it reaches the manager:
//! remote-control requests and AVRCP open/message events go through the
//! top-level machine, everything carrying a stream handle goes to that
//! stream's machine, and link-level events are resolved by peer address.

use crate::av::TopEvent;
use crate::events::{ApiRequest, AvrcpEvent, Event, SdpEvent, TransportEvent};
use crate::handle::{RcHandle, StreamHandle};
use crate::interfaces::{AvPlatform, CodecDataPath};
use crate::manager::SessionManager;
use crate::{
    AvError, BluetoothAddress, EVENT_CHANNEL, REQUEST_CHANNEL, RESPONSE_CHANNEL, Response,
    SOURCE_READY,
};
use embassy_futures::select::{Either3, select3};

/// Where an event is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// Top-level machine
    TopLevel(TopEvent),
    /// Stream machine of the slot behind the handle
    Stream(StreamHandle),
    /// Link-level, resolved by peer
    Link(BluetoothAddress),
    /// RC session
    Rc(RcHandle),
    /// The manager itself (enable, registration, timers, media)
    Manager,
}

/// Classify an application request
#[must_use]
pub fn route_request(request: &ApiRequest) -> Route {
    match *request {
        ApiRequest::Disable => Route::TopLevel(TopEvent::ApiDisable),
        ApiRequest::RemoteCmd { .. } => Route::TopLevel(TopEvent::ApiRemoteCmd),
        ApiRequest::VendorCmd { .. } => Route::TopLevel(TopEvent::ApiVendorCmd),
        ApiRequest::VendorRsp { .. } => Route::TopLevel(TopEvent::ApiVendorRsp),
        ApiRequest::MetaRsp { .. } => Route::TopLevel(TopEvent::ApiMetaRsp),
        ApiRequest::RcClose(_) => Route::TopLevel(TopEvent::ApiRcClose),

        ApiRequest::Deregister(handle)
        | ApiRequest::Open { handle, .. }
        | ApiRequest::Close(handle)
        | ApiRequest::Start(handle)
        | ApiRequest::Stop { handle, .. }
        | ApiRequest::Reconfigure { handle, .. }
        | ApiRequest::DelayReport { handle, .. }
        | ApiRequest::RcOpen(handle) => Route::Stream(handle),

        ApiRequest::BrowseRsp { rc, .. } => Route::Rc(rc),

        ApiRequest::Disconnect(peer)
        | ApiRequest::SetAbsoluteVolume { peer, .. }
        | ApiRequest::RegisterVolumeChanged(peer)
        | ApiRequest::GetElementAttributes(peer)
        | ApiRequest::GetPlayStatus(peer)
        | ApiRequest::ListAppSettings(peer)
        | ApiRequest::SetAppSettings { peer, .. }
        | ApiRequest::SetActivePeer(peer)
        | ApiRequest::SetCodecUserConfig { peer, .. }
        | ApiRequest::SetCodecAudioConfig { peer, .. } => Route::Link(peer),

        ApiRequest::Enable(_) | ApiRequest::Register { .. } => Route::Manager,
    }
}

/// Classify a router event
#[must_use]
pub fn route(event: &Event) -> Route {
    match event {
        Event::Api(request) => route_request(request),
        Event::Transport(
            TransportEvent::SignalingConnected { peer }
            | TransportEvent::SignalingDisconnected { peer },
        ) => Route::Link(*peer),
        Event::Transport(event) => event.handle().map_or(Route::Manager, Route::Stream),
        Event::Avrcp(AvrcpEvent::Opened { .. }) => Route::TopLevel(TopEvent::AvrcOpen),
        Event::Avrcp(AvrcpEvent::Message { .. }) => Route::TopLevel(TopEvent::AvrcMsg),
        Event::Avrcp(
            AvrcpEvent::Closed { rc }
            | AvrcpEvent::BrowseOpened { rc }
            | AvrcpEvent::BrowseClosed { rc },
        ) => Route::Rc(*rc),
        Event::Sdp(SdpEvent::AvrcpRecord { peer, .. }) | Event::RoleChanged { peer, .. } => {
            Route::Link(*peer)
        }
        Event::Sdp(SdpEvent::A2dpRecord { handle, .. }) => Route::Stream(*handle),
        Event::Timer(_) | Event::SourceDataReady => Route::Manager,
    }
}

/// Post an event to the router, waiting for queue space
pub async fn post(event: Event) {
    EVENT_CHANNEL.send(event).await;
}

/// Post an event to the router from a context that cannot wait
///
/// # Errors
/// Returns `AvError::QueueFull` if the router queue is full
pub fn try_post(event: Event) -> Result<(), AvError> {
    EVENT_CHANNEL.try_send(event).map_err(|_| {
        warn!("[ROUTER] event queue full");
        AvError::QueueFull
    })
}

/// Tell the router the encoder has frames ready
pub fn signal_source_ready() {
    SOURCE_READY.signal(());
}

/// Execute one application request and build its response
pub fn execute<P: AvPlatform>(manager: &mut SessionManager<'_, P>, request: ApiRequest) -> Response {
    let result = match request {
        ApiRequest::Register {
            channel,
            endpoints,
        } => manager
            .register(channel, &endpoints)
            .map(Response::Registered),
        request => manager.request(request).map(|()| Response::Done),
    };
    result.unwrap_or_else(Response::Error)
}

/// Run the router
///
/// Never returns; spawn it as its own task. Events, requests and the
/// source-ready signal are served in arrival order, one at a time.
pub async fn run<P: AvPlatform>(
    manager: &mut SessionManager<'_, P>,
    path: &mut impl CodecDataPath,
) -> ! {
    info!("[ROUTER] running");
    loop {
        match select3(
            EVENT_CHANNEL.receive(),
            REQUEST_CHANNEL.receive(),
            SOURCE_READY.wait(),
        )
        .await
        {
            Either3::First(event) => manager.handle_event(event, path),
            Either3::Second(request) => {
                trace!("[ROUTER] request {:?}", route_request(&request));
                let response = execute(manager, request);
                RESPONSE_CHANNEL.send(response).await;
            }
            Either3::Third(()) => manager.handle_event(Event::SourceDataReady, path),
        }
    }
}
