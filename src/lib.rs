#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

mod fmt;

pub mod a2dp;
mod address;
pub mod api;
pub mod av;
pub mod avrcp;
pub mod config;
pub mod constants;
pub mod events;
pub mod handle;
pub mod interfaces;
pub mod manager;
pub mod processor;
pub mod timer;

use crate::a2dp::A2dpError;
use crate::avrcp::AvrcpError;
use crate::constants::{EVENT_QUEUE_DEPTH, MAX_CHANNELS};
use crate::handle::StreamHandle;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

pub use address::BluetoothAddress;
pub use config::{AvFeatures, AvOptions};
pub use events::{ApiRequest, Event, UpperEvent};
pub use interfaces::{AvPlatform, CodecDataPath};
pub use manager::SessionManager;

/// Events posted by the stack glue, consumed by [`processor::run`]
pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH> =
    Channel::new();

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, ApiRequest, MAX_CHANNELS> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_CHANNELS> =
    Channel::new();

/// Raised by the encoder when it has frames for the active stream
pub(crate) static SOURCE_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Session core errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvError {
    /// `Enable` received while already enabled
    AlreadyEnabled,
    /// Operation needs `Enable` first
    NotEnabled,
    /// Handle does not name a registered slot
    InvalidHandle,
    /// Malformed or out-of-range argument
    InvalidParameter,
    /// Operation not allowed in the current state
    InvalidState,
    /// No free slot, link, label or buffer space
    NoResources,
    /// No connection to the peer or session
    NotConnected,
    /// Router queue is full
    QueueFull,
    /// A collaborator refused the request
    TransportError,
    /// Codec or endpoint failure
    A2dp(A2dpError),
    /// Remote control failure
    Avrcp(AvrcpError),
}

impl From<A2dpError> for AvError {
    fn from(e: A2dpError) -> Self {
        Self::A2dp(e)
    }
}

impl From<AvrcpError> for AvError {
    fn from(e: AvrcpError) -> Self {
        Self::Avrcp(e)
    }
}

/// Reply to a request executed by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Request accepted
    Done,
    /// Stream slot registered
    Registered(StreamHandle),
    /// Request refused
    Error(AvError),
}
