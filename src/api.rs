//! Application API
//!
//! Async functions that hand a request to the router task through a static
//! channel and wait for its verdict. They only report whether the request
//! was accepted; the outcome of anything involving the peer arrives later
//! as an [`crate::UpperEvent`] through the platform's
//! [`crate::interfaces::UpperCallback`].
//!
//! [`crate::processor::run`] must be running for these to complete.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bondybird_av::api;
//! use bondybird_av::av::LocalEndpoint;
//! use bondybird_av::handle::Channel;
//! use bondybird_av::{AvError, AvOptions, BluetoothAddress};
//!
//! # async fn example(endpoints: &[LocalEndpoint]) -> Result<(), AvError> {
//! api::enable(AvOptions::default()).await?;
//! let handle = api::register(Channel::Audio, endpoints).await?;
//! api::open(handle, BluetoothAddress::new([0x00, 0x1B, 0xDC, 0x0F, 0x33, 0x21])).await?;
//! # Ok(())
//! # }
//! ```

use crate::a2dp::{CodecCapabilities, CodecIndex, CodecInfo};
use crate::av::LocalEndpoint;
use crate::avrcp::pdu::{AppSettingValues, Payload};
use crate::avrcp::{AvrcpError, BrowseItem, MessageCode, build_folder_items};
use crate::events::ApiRequest;
use crate::handle::{Channel, Label, RcHandle, StreamHandle};
use crate::{AvError, AvOptions, BluetoothAddress, REQUEST_CHANNEL, RESPONSE_CHANNEL, Response};
use heapless::Vec;

async fn submit(request: ApiRequest) -> Result<(), AvError> {
    REQUEST_CHANNEL.sender().send(request).await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Done => Ok(()),
        Response::Error(e) => Err(e),
        Response::Registered(_) => Err(AvError::InvalidState),
    }
}

/// Enable the session core with the given options.
///
/// # Errors
///
/// Returns `AvError::AlreadyEnabled` if it is already enabled.
pub async fn enable(options: AvOptions) -> Result<(), AvError> {
    submit(ApiRequest::Enable(options)).await
}

/// Disable the session core, closing every stream and RC session.
///
/// # Errors
///
/// Returns `AvError::NotEnabled` if it was not enabled.
pub async fn disable() -> Result<(), AvError> {
    submit(ApiRequest::Disable).await
}

/// Register a stream slot with its local endpoints.
///
/// # Errors
///
/// Returns `AvError::InvalidParameter` for too many endpoints and
/// `AvError::NoResources` when every slot is taken.
pub async fn register(
    channel: Channel,
    endpoints: &[LocalEndpoint],
) -> Result<StreamHandle, AvError> {
    let endpoints = Vec::from_slice(endpoints).map_err(|()| AvError::InvalidParameter)?;
    REQUEST_CHANNEL
        .sender()
        .send(ApiRequest::Register { channel, endpoints })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Registered(handle) => Ok(handle),
        Response::Error(e) => Err(e),
        Response::Done => Err(AvError::InvalidState),
    }
}

/// Free a stream slot, closing its stream first.
///
/// # Errors
///
/// Returns `AvError::InvalidHandle` if the handle is not registered.
pub async fn deregister(handle: StreamHandle) -> Result<(), AvError> {
    submit(ApiRequest::Deregister(handle)).await
}

/// Open a stream to a peer.
///
/// # Errors
///
/// Returns an error if the handle is unknown or the slot is busy.
pub async fn open(handle: StreamHandle, peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::Open { handle, peer }).await
}

/// Close a stream.
///
/// # Errors
///
/// Returns `AvError::InvalidHandle` if the handle is not registered.
pub async fn close(handle: StreamHandle) -> Result<(), AvError> {
    submit(ApiRequest::Close(handle)).await
}

/// Close every stream and RC session to a peer.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if nothing is connected to the peer.
pub async fn disconnect(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::Disconnect(peer)).await
}

/// Start streaming.
///
/// # Errors
///
/// Returns `AvError::InvalidState` unless the stream is open.
pub async fn start(handle: StreamHandle) -> Result<(), AvError> {
    submit(ApiRequest::Start(handle)).await
}

/// Stop streaming, suspending the stream when `suspend` is set.
///
/// # Errors
///
/// Returns `AvError::InvalidState` unless the stream is open.
pub async fn stop(handle: StreamHandle, suspend: bool) -> Result<(), AvError> {
    submit(ApiRequest::Stop { handle, suspend }).await
}

/// Reconfigure an open stream.
///
/// # Errors
///
/// Returns an error if the stream is not open or the codec is not usable.
pub async fn reconfigure(handle: StreamHandle, codec: CodecInfo) -> Result<(), AvError> {
    submit(ApiRequest::Reconfigure { handle, codec }).await
}

/// Report the sink's rendering delay in 1/10 ms.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if the stream has no peer.
pub async fn delay_report(handle: StreamHandle, delay: u16) -> Result<(), AvError> {
    submit(ApiRequest::DelayReport { handle, delay }).await
}

/// Open an RC session for the peer of a stream.
///
/// # Errors
///
/// Returns an error if the stream has no peer.
pub async fn rc_open(handle: StreamHandle) -> Result<(), AvError> {
    submit(ApiRequest::RcOpen(handle)).await
}

/// Close an RC session.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no session is open.
pub async fn rc_close(rc: RcHandle) -> Result<(), AvError> {
    submit(ApiRequest::RcClose(rc)).await
}

/// Send a pass-through command.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no session is open.
pub async fn remote_cmd(rc: RcHandle, op_id: u8, pressed: bool) -> Result<(), AvError> {
    submit(ApiRequest::RemoteCmd { rc, op_id, pressed }).await
}

/// Send a vendor-dependent command.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no session is open.
pub async fn vendor_cmd(
    rc: RcHandle,
    code: MessageCode,
    company_id: u32,
    data: Payload,
) -> Result<(), AvError> {
    submit(ApiRequest::VendorCmd {
        rc,
        code,
        company_id,
        data,
    })
    .await
}

/// Answer a vendor-dependent command.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no session is open.
pub async fn vendor_rsp(
    rc: RcHandle,
    label: Label,
    code: MessageCode,
    company_id: u32,
    data: Payload,
) -> Result<(), AvError> {
    submit(ApiRequest::VendorRsp {
        rc,
        label,
        code,
        company_id,
        data,
    })
    .await
}

/// Answer a metadata command.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no session is open.
pub async fn meta_rsp(
    rc: RcHandle,
    label: Label,
    code: MessageCode,
    data: Payload,
) -> Result<(), AvError> {
    submit(ApiRequest::MetaRsp {
        rc,
        label,
        code,
        data,
    })
    .await
}

/// Answer a browsing command.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if the browsing channel is down.
pub async fn browse_rsp(rc: RcHandle, label: Label, data: Payload) -> Result<(), AvError> {
    submit(ApiRequest::BrowseRsp { rc, label, data }).await
}

/// Answer a GetFolderItems command with as many items as fit `capacity`.
///
/// Returns the number of items sent.
///
/// # Errors
///
/// Returns `AvrcpError::Rejected` if not a single item could be encoded,
/// or the error of the browse response itself.
pub async fn folder_items_rsp(
    rc: RcHandle,
    label: Label,
    uid_counter: u16,
    items: &[BrowseItem<'_>],
    capacity: usize,
) -> Result<u16, AvError> {
    let built = build_folder_items(uid_counter, items, capacity).map_err(AvrcpError::Rejected)?;
    browse_rsp(rc, label, built.payload).await?;
    Ok(built.count)
}

/// Set the peer's absolute volume (0..=0x7F).
///
/// # Errors
///
/// Returns an error if the peer has no RC session or does not support it.
pub async fn set_absolute_volume(peer: BluetoothAddress, volume: u8) -> Result<(), AvError> {
    submit(ApiRequest::SetAbsoluteVolume { peer, volume }).await
}

/// Register for the peer's volume change notification.
///
/// # Errors
///
/// Returns an error if the peer has no RC session.
pub async fn register_volume_changed(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::RegisterVolumeChanged(peer)).await
}

/// Request the attributes of the peer's current track.
///
/// # Errors
///
/// Returns an error if the peer has no RC session.
pub async fn get_element_attributes(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::GetElementAttributes(peer)).await
}

/// Request the peer's play status.
///
/// # Errors
///
/// Returns an error if the peer has no RC session.
pub async fn get_play_status(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::GetPlayStatus(peer)).await
}

/// List the peer's player application settings.
///
/// # Errors
///
/// Returns an error if the peer has no RC session.
pub async fn list_app_settings(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::ListAppSettings(peer)).await
}

/// Change player application settings on the peer.
///
/// # Errors
///
/// Returns an error if the peer has no RC session.
pub async fn set_app_settings(
    peer: BluetoothAddress,
    values: AppSettingValues,
) -> Result<(), AvError> {
    submit(ApiRequest::SetAppSettings { peer, values }).await
}

/// Make a peer the active audio peer.
///
/// # Errors
///
/// Returns `AvError::NotConnected` if no stream to the peer is open.
pub async fn set_active_peer(peer: BluetoothAddress) -> Result<(), AvError> {
    submit(ApiRequest::SetActivePeer(peer)).await
}

/// Prefer a codec for a peer, reconfiguring if it is in use.
///
/// # Errors
///
/// Returns an error if the peer is unknown or has no endpoint for the codec.
pub async fn set_codec_user_config(
    peer: BluetoothAddress,
    codec: CodecIndex,
) -> Result<(), AvError> {
    submit(ApiRequest::SetCodecUserConfig { peer, codec }).await
}

/// Change audio parameters of the current codec for a peer.
///
/// # Errors
///
/// Returns an error if the peer is unknown or the parameters do not match.
pub async fn set_codec_audio_config(
    peer: BluetoothAddress,
    caps: CodecCapabilities,
) -> Result<(), AvError> {
    submit(ApiRequest::SetCodecAudioConfig { peer, caps }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::StreamState;
    use crate::manager::SessionManager;
    use crate::manager::tests::{Manager, MockPlatform, endpoint, negotiator};
    use crate::processor::execute;
    use embassy_futures::{block_on, join::join};

    async fn serve(manager: &mut Manager<'_>, count: usize) {
        for _ in 0..count {
            let request = REQUEST_CHANNEL.receive().await;
            RESPONSE_CHANNEL.send(execute(manager, request)).await;
        }
    }

    #[test]
    fn test_requests_round_trip_through_router() {
        let negotiator = negotiator();
        let mut manager = SessionManager::new(MockPlatform::default(), &negotiator);

        let app = async {
            enable(AvOptions::default()).await.unwrap();
            assert_eq!(enable(AvOptions::default()).await, Err(AvError::AlreadyEnabled));
            let handle = register(Channel::Audio, &[endpoint(1, CodecIndex::Sbc)])
                .await
                .unwrap();
            assert_eq!(start(handle).await, Err(AvError::InvalidState));
            handle
        };
        let (handle, ()) = block_on(join(app, serve(&mut manager, 4)));

        assert_eq!(manager.stream_state(handle), Ok(StreamState::Init));
        assert!(manager.is_enabled());
    }

    #[test]
    fn test_register_rejects_oversized_endpoint_list() {
        let endpoints = [endpoint(1, CodecIndex::Sbc); crate::constants::MAX_LOCAL_ENDPOINTS + 1];
        assert_eq!(
            block_on(register(Channel::Audio, &endpoints)),
            Err(AvError::InvalidParameter)
        );
    }
}
