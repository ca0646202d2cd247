//! `BondyBird` AV Constants
//!
//! Capacities, protocol constants and default timer values used throughout
//! the A2DP/AVRCP session core. All tables are fixed-size, so every limit
//! the core enforces is listed here.

use core::time::Duration;

/// Maximum number of Stream Sessions (local stream endpoints registered at once)
pub const MAX_STREAMS: usize = 6;

/// Maximum number of peer devices with a signaling link
pub const MAX_LINKS: usize = 6;

/// Link table slots: the regular links plus the reserved RC-only slot
pub const LINK_SLOTS: usize = MAX_LINKS + 1;

/// Maximum number of Remote-Control Sessions (one per stream plus the acceptor listeners)
pub const MAX_RC_SESSIONS: usize = MAX_STREAMS + 2;

/// Maximum number of AVRCP peers tracked by the transaction engine
pub const MAX_RC_DEVICES: usize = MAX_LINKS;

/// Number of AVRCP transaction labels (4-bit label space)
pub const MAX_TRANSACTION_LABELS: usize = 16;

/// Maximum number of local stream endpoints per Stream Session
pub const MAX_LOCAL_ENDPOINTS: usize = 8;

/// Maximum number of peer endpoints stored per direction for one peer
pub const MAX_PEER_ENDPOINTS: usize = 8;

/// Maximum number of codecs in the local preference list
pub const MAX_CODECS: usize = 8;

/// Size of an AVDTP media codec capability blob
pub const CODEC_INFO_LEN: usize = 20;

/// Length of a content protection descriptor (scheme id + one data byte)
pub const CP_INFO_LEN: usize = 3;

/// SCMS-T content protection scheme identifier
pub const SCMS_T_ID: u16 = 0x0002;

/// SCMS-T descriptor as carried in the protection capability
pub const SCMS_T_DESCRIPTOR: [u8; CP_INFO_LEN] = [0x02, 0x02, 0x00];

/// Length-of-service-capability value for the content protection element
pub const CP_LOSC: u8 = 2;

/// Maximum AVRCP vendor-dependent / browsing payload handled in one message
pub const MAX_AVRCP_PAYLOAD: usize = 512;

/// Minimum length of a vendor-dependent metadata command
pub const MIN_META_CMD_LEN: usize = 20;

/// Minimum space that must remain for another folder item to be attempted
pub const MIN_FOLDER_ITEMS_LEFT: usize = 17;

/// Maximum number of notification events tracked per AVRCP peer
pub const MAX_SUPPORTED_EVENTS: usize = 16;

/// Maximum number of player application setting attributes cached per peer
pub const MAX_APP_SETTINGS: usize = 8;

/// Maximum number of values per player application setting attribute
pub const MAX_APP_SETTING_VALUES: usize = 8;

/// Maximum number of company ids reported by the capability responder
pub const MAX_COMPANY_IDS: usize = 4;

/// Bluetooth SIG company identifier carried in AVRCP metadata PDUs
pub const METADATA_COMPANY_ID: u32 = 0x0000_1958;

/// Absolute volume upper bound (7-bit)
pub const MAX_VOLUME: u8 = 0x7F;

/// Maximum depth of the per-stream outbound audio fan-out queue
pub const MAX_FANOUT_QUEUE: usize = 8;

/// Default depth of the outbound audio fan-out queue
pub const DEFAULT_FANOUT_QUEUE_DEPTH: usize = 5;

/// Maximum size of one encoded media frame
pub const MAX_MEDIA_FRAME: usize = 1024;

/// Depth of the router event queue
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Depth of the API request and response channels
pub const MAX_CHANNELS: usize = 4;

/// Depth of the internal follow-up queue drained after each event
pub const FOLLOW_UP_DEPTH: usize = 16;

/// Maximum number of actions produced by a single state transition
pub const MAX_ACTIONS: usize = 4;

/// Number of reconfiguration attempts before giving up
pub const RECONFIG_RETRY: u8 = 6;

/// Signaling timer armed when a peer connects as initiator
pub const DEFAULT_SIGNALLING_TIMEOUT: Duration = Duration::from_millis(8000);

/// Collision (accept) timer armed on an incoming signaling channel
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Role switch guard timer
pub const DEFAULT_ROLE_SWITCH_TIMEOUT: Duration = Duration::from_millis(1000);

/// Delay before opening AVRCP after a stream opened as acceptor
pub const DEFAULT_RC_OPEN_TIMEOUT: Duration = Duration::from_millis(3500);

/// Timeout for AVRCP status commands
pub const DEFAULT_STATUS_COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for AVRCP control commands
pub const DEFAULT_CONTROL_COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout waiting for the interim response of a notification registration
pub const DEFAULT_INTERIM_TIMEOUT: Duration = Duration::from_millis(2000);

/// Local status synthesized when a peer never answers an AVRCP command
pub const AVRC_STS_TIMEOUT: u8 = 0xFE;

/// Playback position interval requested when registering for position changes
pub const PLAY_POSITION_INTERVAL: u32 = 2000;
