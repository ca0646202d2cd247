//! Top-level connection state machine
//!
//! Two states: `Init` (no AVRCP link open) and `Open` (at least one). The
//! remote-control API requests only act while `Open`; in `Init` they are
//! dropped, except that buffered responses and browse messages are freed.

use super::Transition;

/// Top-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopState {
    /// No AVRCP link open
    #[default]
    Init,
    /// At least one AVRCP link open
    Open,
}

/// Events handled by the top-level machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopEvent {
    /// Disable requested
    ApiDisable,
    /// Pass-through command requested
    ApiRemoteCmd,
    /// Vendor-dependent command requested
    ApiVendorCmd,
    /// Vendor-dependent response requested
    ApiVendorRsp,
    /// Metadata response requested
    ApiMetaRsp,
    /// RC close requested
    ApiRcClose,
    /// AVRCP control channel opened
    AvrcOpen,
    /// AVRCP message received
    AvrcMsg,
    /// No AVRCP control channel left
    AvrcNone,
}

/// Actions of the top-level machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopAction {
    /// Tear everything down
    Disable,
    /// Drop a response that has nowhere to go
    FreeRsp,
    /// Bind and report an opened RC session
    RcOpened,
    /// Drop a browse message that has nowhere to go
    FreeBrowseMsg,
    /// Send a pass-through command
    RcRemoteCmd,
    /// Send a vendor-dependent command
    RcVendorCmd,
    /// Send a vendor-dependent response
    RcVendorRsp,
    /// Send a metadata response
    RcMetaRsp,
    /// Close an RC session
    RcCloseReq,
    /// Validate and dispatch an inbound message
    RcMsg,
}

/// Top-level transition table
#[must_use]
pub fn transition(state: TopState, event: TopEvent) -> Transition<TopState, TopAction> {
    use TopAction as A;
    use TopEvent as E;
    use TopState::{Init, Open};

    match (state, event) {
        (_, E::ApiDisable) => Transition::with(Init, [A::Disable]),
        (_, E::AvrcOpen) => Transition::with(Open, [A::RcOpened]),

        (Init, E::ApiMetaRsp) => Transition::with(Init, [A::FreeRsp]),
        (Init, E::AvrcMsg) => Transition::with(Init, [A::FreeBrowseMsg]),
        (Init, _) => Transition::to(Init),

        (Open, E::ApiRemoteCmd) => Transition::with(Open, [A::RcRemoteCmd]),
        (Open, E::ApiVendorCmd) => Transition::with(Open, [A::RcVendorCmd]),
        (Open, E::ApiVendorRsp) => Transition::with(Open, [A::RcVendorRsp]),
        (Open, E::ApiMetaRsp) => Transition::with(Open, [A::RcMetaRsp]),
        (Open, E::ApiRcClose) => Transition::with(Open, [A::RcCloseReq]),
        (Open, E::AvrcMsg) => Transition::with(Open, [A::RcMsg]),
        (Open, E::AvrcNone) => Transition::to(Init),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_ignores_rc_requests() {
        for event in [
            TopEvent::ApiRemoteCmd,
            TopEvent::ApiVendorCmd,
            TopEvent::ApiVendorRsp,
            TopEvent::ApiRcClose,
            TopEvent::AvrcNone,
        ] {
            let t = transition(TopState::Init, event);
            assert_eq!(t.next, TopState::Init);
            assert!(t.actions.is_empty(), "{event:?}");
        }
    }

    #[test]
    fn test_init_frees_undeliverable() {
        assert_eq!(
            transition(TopState::Init, TopEvent::ApiMetaRsp).actions[..],
            [TopAction::FreeRsp]
        );
        assert_eq!(
            transition(TopState::Init, TopEvent::AvrcMsg).actions[..],
            [TopAction::FreeBrowseMsg]
        );
    }

    #[test]
    fn test_open_and_close_cycle() {
        let t = transition(TopState::Init, TopEvent::AvrcOpen);
        assert_eq!(t.next, TopState::Open);
        assert_eq!(t.actions[..], [TopAction::RcOpened]);

        let t = transition(TopState::Open, TopEvent::AvrcOpen);
        assert_eq!(t.next, TopState::Open);

        let t = transition(TopState::Open, TopEvent::AvrcMsg);
        assert_eq!(t.actions[..], [TopAction::RcMsg]);

        let t = transition(TopState::Open, TopEvent::AvrcNone);
        assert_eq!(t.next, TopState::Init);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_disable_from_any_state() {
        for state in [TopState::Init, TopState::Open] {
            let t = transition(state, TopEvent::ApiDisable);
            assert_eq!(t.next, TopState::Init);
            assert_eq!(t.actions[..], [TopAction::Disable]);
        }
    }
}
