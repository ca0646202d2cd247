//! Armed timer bookkeeping
//!
//! Remembers the generation of every armed timer so expiries can be matched
//! against the latest arm. Re-arming or cancelling a kind bumps the
//! generation; an expiry whose token no longer matches is stale and dropped.

use crate::interfaces::{TimerKind, TimerService, TimerToken};
use core::time::Duration;
use heapless::FnvIndexMap;

/// Armed timers keyed by kind (`N` must be a power of two)
#[derive(Debug)]
pub struct TimerTable<const N: usize> {
    next_generation: u16,
    armed: FnvIndexMap<TimerKind, u16, N>,
}

impl<const N: usize> Default for TimerTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TimerTable<N> {
    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_generation: 0,
            armed: FnvIndexMap::new(),
        }
    }

    /// Arm (or re-arm) a timer of `kind`
    pub fn arm(&mut self, service: &mut impl TimerService, kind: TimerKind, after: Duration) {
        self.cancel(service, kind);
        self.next_generation = self.next_generation.wrapping_add(1);
        let token = TimerToken {
            kind,
            generation: self.next_generation,
        };
        if self.armed.insert(kind, token.generation).is_err() {
            error!("[ROUTER] timer table full, {:?} not armed", kind);
            return;
        }
        service.arm(token, after);
    }

    /// Cancel the timer of `kind` if armed
    pub fn cancel(&mut self, service: &mut impl TimerService, kind: TimerKind) {
        if let Some(generation) = self.armed.remove(&kind) {
            service.cancel(TimerToken { kind, generation });
        }
    }

    /// True if a timer of `kind` is armed
    #[must_use]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Consume an expiry; false if the token is stale
    pub fn expire(&mut self, token: TimerToken) -> bool {
        if self.armed.get(&token.kind) == Some(&token.generation) {
            self.armed.remove(&token.kind);
            true
        } else {
            debug!("[ROUTER] stale timer {:?}", token.kind);
            false
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all(&mut self, service: &mut impl TimerService) {
        for (kind, generation) in &self.armed {
            service.cancel(TimerToken {
                kind: *kind,
                generation: *generation,
            });
        }
        self.armed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        armed: Vec<TimerToken>,
        cancelled: Vec<TimerToken>,
    }

    impl TimerService for Recorder {
        fn arm(&mut self, token: TimerToken, _after: Duration) {
            self.armed.push(token);
        }

        fn cancel(&mut self, token: TimerToken) {
            self.cancelled.push(token);
        }
    }

    #[test]
    fn test_rearm_makes_old_token_stale() {
        let mut svc = Recorder::default();
        let mut table = TimerTable::<8>::new();
        table.arm(&mut svc, TimerKind::Signalling, Duration::from_secs(8));
        table.arm(&mut svc, TimerKind::Signalling, Duration::from_secs(8));
        assert_eq!(svc.cancelled.len(), 1);

        let first = svc.armed[0];
        let second = svc.armed[1];
        assert!(!table.expire(first));
        assert!(table.expire(second));
        assert!(!table.is_armed(TimerKind::Signalling));
        // delivered twice
        assert!(!table.expire(second));
    }

    #[test]
    fn test_cancel_drops_later_expiry() {
        let mut svc = Recorder::default();
        let mut table = TimerTable::<8>::new();
        table.arm(&mut svc, TimerKind::Signalling, Duration::from_secs(1));
        table.cancel(&mut svc, TimerKind::Signalling);
        assert!(!table.expire(svc.armed[0]));
        assert_eq!(svc.cancelled, svc.armed);
    }

    #[test]
    fn test_cancel_all() {
        let mut svc = Recorder::default();
        let mut table = TimerTable::<8>::new();
        table.arm(&mut svc, TimerKind::Signalling, Duration::from_secs(1));
        table.arm(
            &mut svc,
            TimerKind::AvrcpTransaction(crate::handle::Label::new(3).unwrap()),
            Duration::from_secs(2),
        );
        table.cancel_all(&mut svc);
        assert_eq!(svc.cancelled.len(), 2);
        assert!(!table.is_armed(TimerKind::Signalling));
    }
}
