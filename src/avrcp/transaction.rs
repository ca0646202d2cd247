//! AVRCP transaction labels
//!
//! Every outbound command holds one of 16 labels until its final response
//! arrives or its timer fires. A label in use is never handed out again
//! until it has been released.

use super::{AvrcpError, EventId, PduId};
use crate::BluetoothAddress;
use crate::constants::MAX_TRANSACTION_LABELS;
use crate::handle::{Label, RcHandle};

/// What a pending transaction is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandKind {
    /// Status command
    Status(PduId),
    /// Control command
    Control(PduId),
    /// Notification registration
    Notification(EventId),
    /// Pass-through command
    PassThrough(u8),
    /// Vendor command issued by the upper layer
    Vendor,
}

impl CommandKind {
    /// PDU the response will carry, if any
    #[must_use]
    pub const fn pdu(self) -> Option<PduId> {
        match self {
            Self::Status(pdu) | Self::Control(pdu) => Some(pdu),
            Self::Notification(_) => Some(PduId::RegisterNotification),
            Self::PassThrough(_) | Self::Vendor => None,
        }
    }
}

/// One pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Connection the command went out on
    pub handle: RcHandle,
    /// Peer the command was sent to
    pub peer: BluetoothAddress,
    /// Command kind
    pub kind: CommandKind,
}

/// Fixed pool of transaction labels
#[derive(Debug)]
pub struct TransactionPool {
    slots: [Option<Transaction>; MAX_TRANSACTION_LABELS],
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionPool {
    /// All labels free
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_TRANSACTION_LABELS],
        }
    }

    /// Take the lowest free label
    ///
    /// # Errors
    /// Returns `AvrcpError::NoLabels` when all labels are in use
    pub fn reserve(&mut self, transaction: Transaction) -> Result<Label, AvrcpError> {
        let position = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AvrcpError::NoLabels)?;
        self.slots[position] = Some(transaction);
        trace!("[AVRCP] label {} reserved", position);
        Label::new(position as u8).map_err(|_| AvrcpError::NoLabels)
    }

    /// Pending transaction on `label`
    #[must_use]
    pub fn get(&self, label: Label) -> Option<&Transaction> {
        self.slots.get(usize::from(label.get()))?.as_ref()
    }

    /// Free `label`, returning what was pending on it
    pub fn release(&mut self, label: Label) -> Option<Transaction> {
        let released = self.slots.get_mut(usize::from(label.get()))?.take();
        if released.is_some() {
            trace!("[AVRCP] label {} released", label.get());
        }
        released
    }

    /// Labels currently pending on `handle`
    pub fn labels_for(&self, handle: RcHandle) -> impl Iterator<Item = Label> + '_ {
        self.slots.iter().enumerate().filter_map(move |(n, slot)| {
            slot.as_ref()
                .filter(|t| t.handle == handle)
                .and_then(|_| Label::new(n as u8).ok())
        })
    }

    /// Number of labels in use
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
