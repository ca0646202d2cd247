//! Notification subscription state
//!
//! Per peer, the list of events the controller subscribes to and where each
//! registration stands. Registrations are issued one at a time: the next
//! unregistered event is only requested once the previous one got its
//! interim response, timed out or was rejected.

use super::EventId;
use crate::constants::MAX_SUPPORTED_EVENTS;
use crate::handle::Label;
use heapless::Vec;

/// Registration state of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationStatus {
    /// Not requested yet (or completed by a changed response)
    NotRegistered,
    /// Request sent, waiting for the interim response
    Registered,
    /// Interim received, waiting for a change
    Interim,
}

/// One event the controller subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Event id
    pub event: EventId,
    /// Label of the pending registration
    pub label: Option<Label>,
    /// Registration state
    pub status: RegistrationStatus,
}

/// Subscriptions of one peer
#[derive(Debug, Clone, Default)]
pub struct NotificationTracker {
    events: Vec<Subscription, MAX_SUPPORTED_EVENTS>,
}

impl NotificationTracker {
    /// No subscription
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Replace the list with the interesting events among `supported`
    ///
    /// Returns the number of events kept.
    pub fn populate(&mut self, supported: &[u8]) -> usize {
        self.events.clear();
        for event in supported.iter().filter_map(|raw| EventId::from_u8(*raw)) {
            if !event.is_interesting() || self.position(event).is_some() {
                continue;
            }
            let entry = Subscription {
                event,
                label: None,
                status: RegistrationStatus::NotRegistered,
            };
            if self.events.push(entry).is_err() {
                break;
            }
        }
        self.events.len()
    }

    /// Forget every subscription
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// True if no event is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn position(&self, event: EventId) -> Option<usize> {
        self.events.iter().position(|s| s.event == event)
    }

    /// Subscription of `event`
    #[must_use]
    pub fn get(&self, event: EventId) -> Option<&Subscription> {
        self.events.iter().find(|s| s.event == event)
    }

    /// First event still waiting to be registered
    #[must_use]
    pub fn next_unregistered(&self) -> Option<EventId> {
        self.events
            .iter()
            .find(|s| s.status == RegistrationStatus::NotRegistered)
            .map(|s| s.event)
    }

    /// Registration for `event` sent on `label`
    pub fn mark_registered(&mut self, event: EventId, label: Label) {
        if let Some(n) = self.position(event) {
            self.events[n].label = Some(label);
            self.events[n].status = RegistrationStatus::Registered;
        }
    }

    /// Interim response received for `event`
    pub fn mark_interim(&mut self, event: EventId) {
        if let Some(n) = self.position(event) {
            self.events[n].status = RegistrationStatus::Interim;
        }
    }

    /// Changed response received; `event` must be registered again
    pub fn mark_changed(&mut self, event: EventId) {
        if let Some(n) = self.position(event) {
            self.events[n].label = None;
            self.events[n].status = RegistrationStatus::NotRegistered;
        }
    }

    /// Drop `event` for the rest of the connection
    pub fn remove(&mut self, event: EventId) -> bool {
        match self.position(event) {
            Some(n) => {
                self.events.remove(n);
                true
            }
            None => false,
        }
    }

    /// Event whose pending registration uses `label`
    #[must_use]
    pub fn event_for_label(&self, label: Label) -> Option<EventId> {
        self.events
            .iter()
            .find(|s| s.label == Some(label) && s.status != RegistrationStatus::NotRegistered)
            .map(|s| s.event)
    }

    /// Tracked events in subscription order
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.events.iter()
    }
}
