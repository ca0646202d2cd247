//! Per-peer AVRCP control block

use super::NotificationTracker;
use super::pdu::AppSettingValues;
use crate::BluetoothAddress;
use crate::config::AvFeatures;
use crate::constants::{MAX_APP_SETTING_VALUES, MAX_APP_SETTINGS, MAX_RC_DEVICES};
use crate::handle::{Label, RcHandle};
use heapless::Vec;

/// One player application setting attribute and its allowed values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSetting {
    /// Attribute id
    pub attr: u8,
    /// Allowed values
    pub values: Vec<u8, MAX_APP_SETTING_VALUES>,
}

/// Player application settings learned from the peer
#[derive(Debug, Clone, Default)]
pub struct AppSettingsCache {
    /// Attributes, values filled in as they are listed
    pub attrs: Vec<AppSetting, MAX_APP_SETTINGS>,
    /// Attribute whose values are being listed
    pub cursor: usize,
    /// Current values
    pub current: AppSettingValues,
    /// Query issued once all notifications were registered
    pub query_started: bool,
}

/// Connected AVRCP peer
#[derive(Debug, Clone, Default)]
pub struct DeviceControlBlock {
    /// Connection handle
    pub handle: RcHandle,
    /// Peer address
    pub peer: BluetoothAddress,
    /// Control channel connected
    pub connected: bool,
    /// Browsing channel connected
    pub browse_connected: bool,
    /// Peer features
    pub features: AvFeatures,
    /// Notification subscriptions
    pub notifications: NotificationTracker,
    /// Player application settings
    pub app_settings: AppSettingsCache,
    /// UID of the track now playing
    pub playing_uid: u64,
    /// Last volume confirmed by the peer
    pub volume: Option<u8>,
    /// Label of the pending volume registration
    pub volume_label: Option<Label>,
    /// Capability query sent
    pub capabilities_requested: bool,
    /// Post-registration bring-up already ran
    pub procedure_complete: bool,
}

impl DeviceControlBlock {
    /// Block for a freshly connected peer
    #[must_use]
    pub fn connected(handle: RcHandle, peer: BluetoothAddress, features: AvFeatures) -> Self {
        Self {
            handle,
            peer,
            connected: true,
            features,
            ..Self::default()
        }
    }
}

/// Connected AVRCP peers
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<DeviceControlBlock, MAX_RC_DEVICES>,
}

impl DeviceTable {
    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Add a connected peer, replacing a stale block for the same handle or address
    ///
    /// Returns false if the table is full.
    pub fn insert(&mut self, block: DeviceControlBlock) -> bool {
        self.devices
            .retain(|d| d.handle != block.handle && d.peer != block.peer);
        self.devices.push(block).is_ok()
    }

    /// Remove the peer on `handle`
    pub fn remove(&mut self, handle: RcHandle) -> Option<DeviceControlBlock> {
        let n = self.devices.iter().position(|d| d.handle == handle)?;
        Some(self.devices.swap_remove(n))
    }

    /// Peer on `handle`
    #[must_use]
    pub fn by_handle(&self, handle: RcHandle) -> Option<&DeviceControlBlock> {
        self.devices.iter().find(|d| d.handle == handle)
    }

    /// Peer on `handle`, mutably
    pub fn by_handle_mut(&mut self, handle: RcHandle) -> Option<&mut DeviceControlBlock> {
        self.devices.iter_mut().find(|d| d.handle == handle)
    }

    /// Peer with address `peer`, mutably
    pub fn by_addr_mut(&mut self, peer: &BluetoothAddress) -> Option<&mut DeviceControlBlock> {
        self.devices.iter_mut().find(|d| d.peer == *peer)
    }

    /// Peer with address `peer`
    #[must_use]
    pub fn by_addr(&self, peer: &BluetoothAddress) -> Option<&DeviceControlBlock> {
        self.devices.iter().find(|d| d.peer == *peer)
    }

    /// Connected peers
    pub fn iter(&self) -> impl Iterator<Item = &DeviceControlBlock> {
        self.devices.iter()
    }

    /// Forget every peer
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}
