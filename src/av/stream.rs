//! Stream sub-state machine
//!
//! One instance per Stream Session. The machine only decides; the session
//! manager performs every [`StreamAction`] against the transport, the
//! negotiator and the upper layer, and feeds completions back in as
//! [`StreamEvent`]s.
//!
//! ```text
//!  Init --ApiOpen--> Opening --SdpDone--> (Connect) --Connected--> (Discover)
//!    |                 | DiscoverOk -> (FetchCaps) -> CapsSelected -> (SetConfig)
//!    |                 | ConfigConfirm -> (OpenStream) -> OpenOk
//!    +--Accept/ConfigInd--> Incoming --OpenOk--------------------------+
//!                                                                      v
//!  Closing <--ApiClose-- Open <--ReconfigOk/OpenOk-- Reconfig <--ApiReconfig
//! ```

use super::Transition;
use crate::constants::RECONFIG_RETRY;

/// Stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// Idle
    #[default]
    Init,
    /// Peer connected to us; waiting for it to configure and open
    Incoming,
    /// Local open in progress
    Opening,
    /// Stream open (possibly started)
    Open,
    /// Reconfiguration in progress
    Reconfig,
    /// Close in progress
    Closing,
}

/// Input of the stream machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamEvent {
    /// Local open
    ApiOpen,
    /// Local close
    ApiClose,
    /// Local start
    ApiStart,
    /// Local stop; `suspend` also suspends the AVDTP stream
    ApiStop {
        /// Suspend the transport stream
        suspend: bool,
    },
    /// Local reconfiguration
    ApiReconfig {
        /// Same codec: reconfigure in place instead of close and reopen
        in_place: bool,
    },
    /// Peer opened signaling to us
    Accept,
    /// Signaling channel to the peer is up
    Connected,
    /// A2DP service search finished
    SdpDone {
        /// Peer has a matching A2DP record
        found: bool,
    },
    /// Peer endpoints discovered
    DiscoverOk,
    /// Discovery failed
    DiscoverFail,
    /// Codec selection finished
    CapsSelected,
    /// No usable peer endpoint
    CapsFail,
    /// Peer proposed a configuration
    ConfigIndication {
        /// Configuration accepted
        accepted: bool,
    },
    /// Local configuration answered
    ConfigConfirm {
        /// Accepted by the peer
        ok: bool,
    },
    /// Stream opened
    OpenOk,
    /// Stream open failed
    OpenFail,
    /// Local start accepted
    StartOk,
    /// Local start refused
    StartFail,
    /// Peer started the stream
    StartIndication,
    /// Local suspend accepted
    SuspendOk,
    /// Local suspend refused
    SuspendFail,
    /// Peer suspended the stream
    SuspendIndication,
    /// Reconfiguration accepted
    ReconfigOk,
    /// Reconfiguration refused
    ReconfigFail,
    /// Stream closed
    Closed,
    /// Signaling channel lost
    SignalingDown,
}

/// Output of the stream machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamAction {
    /// Look up the peer's A2DP record
    FindService,
    /// Open the signaling channel
    Connect,
    /// Discover peer endpoints
    Discover,
    /// Fetch the capabilities of the next peer endpoint
    FetchCaps,
    /// Configure the selected peer endpoint
    SetConfig,
    /// Open the configured stream
    OpenStream,
    /// Start streaming
    StartStream,
    /// Suspend streaming
    SuspendStream,
    /// Close the stream
    CloseStream,
    /// Reconfigure the stream
    Reconfigure,
    /// Drop the signaling channel if nothing else uses it
    Disconnect,
    /// Hold a local open until the incoming collision window ends
    DeferOpen,
    /// Report the opened stream
    ReportOpened,
    /// Report a failed open
    ReportOpenFailed,
    /// Report the closed stream
    ReportClosed,
    /// Report a start
    ReportStarted {
        /// Started on local request
        initiator: bool,
    },
    /// Report a failed start
    ReportStartFailed,
    /// Report a suspend
    ReportSuspended {
        /// Suspended on local request
        initiator: bool,
    },
    /// Report the reconfiguration outcome
    ReportReconfigured {
        /// New configuration in effect
        ok: bool,
    },
    /// Drop queued outbound frames
    ClearQueue,
}

/// Session facts the transition table depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamContext {
    /// Media is flowing
    pub started: bool,
    /// Local start outstanding
    pub start_pending: bool,
    /// Reconfiguration attempts so far
    pub reconfig_count: u8,
    /// Local side is the audio source
    pub local_source: bool,
}

impl StreamContext {
    const fn retries_left(&self) -> bool {
        self.reconfig_count < RECONFIG_RETRY
    }
}

type T = Transition<StreamState, StreamAction>;

/// Stream transition table
#[must_use]
pub fn transition(state: StreamState, event: StreamEvent, ctx: &StreamContext) -> T {
    match state {
        StreamState::Init => init(event),
        StreamState::Incoming => incoming(event, ctx),
        StreamState::Opening => opening(event),
        StreamState::Open => open(event, ctx),
        StreamState::Reconfig => reconfig(event, ctx),
        StreamState::Closing => closing(event),
    }
}

fn init(event: StreamEvent) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::ApiOpen => T::with(S::Opening, [A::FindService]),
        E::Accept | E::ConfigIndication { accepted: true } => T::to(S::Incoming),
        _ => T::to(S::Init),
    }
}

fn incoming(event: StreamEvent, ctx: &StreamContext) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::ApiOpen => T::with(S::Incoming, [A::DeferOpen]),
        // the source side learns the peer endpoints itself so it can
        // reconfigure once it knows them
        E::ConfigIndication { accepted: true } if ctx.local_source => {
            T::with(S::Incoming, [A::Discover])
        }
        E::DiscoverOk => T::with(S::Incoming, [A::FetchCaps]),
        E::OpenOk => T::with(S::Open, [A::ReportOpened]),
        E::OpenFail | E::Closed | E::SignalingDown => T::with(S::Init, [A::ReportOpenFailed]),
        E::ApiClose => T::with(S::Closing, [A::Disconnect]),
        _ => T::to(S::Incoming),
    }
}

fn opening(event: StreamEvent) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::SdpDone { found: true } => T::with(S::Opening, [A::Connect]),
        E::SdpDone { found: false } => T::with(S::Init, [A::ReportOpenFailed]),
        E::Connected => T::with(S::Opening, [A::Discover]),
        E::DiscoverOk => T::with(S::Opening, [A::FetchCaps]),
        E::CapsSelected => T::with(S::Opening, [A::SetConfig]),
        E::DiscoverFail | E::CapsFail | E::ConfigConfirm { ok: false } | E::OpenFail => {
            T::with(S::Init, [A::Disconnect, A::ReportOpenFailed])
        }
        E::ConfigIndication { accepted: true } => T::to(S::Incoming),
        E::ConfigConfirm { ok: true } => T::with(S::Opening, [A::OpenStream]),
        E::OpenOk => T::with(S::Open, [A::ReportOpened]),
        E::ApiClose => T::with(S::Closing, [A::Disconnect]),
        E::Closed | E::SignalingDown => T::with(S::Init, [A::ReportOpenFailed]),
        _ => T::to(S::Opening),
    }
}

fn open(event: StreamEvent, ctx: &StreamContext) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::ApiStart if ctx.started => T::with(S::Open, [A::ReportStarted { initiator: true }]),
        E::ApiStart if ctx.start_pending => T::to(S::Open),
        E::ApiStart => T::with(S::Open, [A::StartStream]),
        // acceptor discovery may finish after the peer opened the stream
        E::DiscoverOk => T::with(S::Open, [A::FetchCaps]),
        E::StartOk => T::with(S::Open, [A::ReportStarted { initiator: true }]),
        E::StartFail => T::with(S::Open, [A::ReportStartFailed]),
        E::StartIndication => T::with(S::Open, [A::ReportStarted { initiator: false }]),
        E::ApiStop { suspend: true } if ctx.started => {
            T::with(S::Open, [A::ClearQueue, A::SuspendStream])
        }
        E::ApiStop { .. } => T::with(
            S::Open,
            [A::ClearQueue, A::ReportSuspended { initiator: true }],
        ),
        E::SuspendOk => T::with(S::Open, [A::ReportSuspended { initiator: true }]),
        E::SuspendIndication => T::with(
            S::Open,
            [A::ClearQueue, A::ReportSuspended { initiator: false }],
        ),
        E::ApiReconfig { .. } if !ctx.retries_left() => {
            T::with(S::Open, [A::ReportReconfigured { ok: false }])
        }
        E::ApiReconfig { in_place: true } if ctx.started => {
            T::with(S::Reconfig, [A::ClearQueue, A::SuspendStream])
        }
        E::ApiReconfig { in_place: true } => T::with(S::Reconfig, [A::Reconfigure]),
        E::ApiReconfig { in_place: false } => T::with(S::Reconfig, [A::CloseStream]),
        E::ApiClose => T::with(S::Closing, [A::ClearQueue, A::CloseStream]),
        E::Closed | E::SignalingDown => T::with(S::Init, [A::ReportClosed]),
        _ => T::to(S::Open),
    }
}

fn reconfig(event: StreamEvent, ctx: &StreamContext) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::SuspendOk => T::with(S::Reconfig, [A::Reconfigure]),
        E::SuspendFail => T::with(S::Open, [A::ReportReconfigured { ok: false }]),
        E::ReconfigOk => T::with(S::Open, [A::ReportReconfigured { ok: true }]),
        E::ReconfigFail if ctx.retries_left() => T::with(S::Reconfig, [A::Reconfigure]),
        E::ReconfigFail => T::with(
            S::Closing,
            [A::ReportReconfigured { ok: false }, A::CloseStream],
        ),
        // close-and-reopen path
        E::Closed => T::with(S::Reconfig, [A::SetConfig]),
        E::ConfigConfirm { ok: true } => T::with(S::Reconfig, [A::OpenStream]),
        E::ConfigConfirm { ok: false } if ctx.retries_left() => {
            T::with(S::Reconfig, [A::SetConfig])
        }
        E::ConfigConfirm { ok: false } | E::OpenFail => T::with(
            S::Init,
            [
                A::Disconnect,
                A::ReportReconfigured { ok: false },
                A::ReportClosed,
            ],
        ),
        E::OpenOk => T::with(S::Open, [A::ReportReconfigured { ok: true }]),
        E::SignalingDown => T::with(
            S::Init,
            [A::ReportReconfigured { ok: false }, A::ReportClosed],
        ),
        E::ApiClose => T::with(S::Closing, [A::CloseStream]),
        E::ApiStart => T::with(S::Reconfig, [A::ReportStartFailed]),
        _ => T::to(S::Reconfig),
    }
}

fn closing(event: StreamEvent) -> T {
    use StreamAction as A;
    use StreamEvent as E;
    use StreamState as S;

    match event {
        E::Closed => T::with(S::Init, [A::Disconnect, A::ReportClosed]),
        E::SignalingDown => T::with(S::Init, [A::ReportClosed]),
        _ => T::to(S::Closing),
    }
}
