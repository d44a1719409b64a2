//! BMP message bodies, dispatched on message type (§4.2).
//!
//! <https://datatracker.ietf.org/doc/html/rfc7854>

pub(crate) mod initiation_message;
pub(crate) mod peer_down_notification;
pub(crate) mod peer_up_notification;
pub(crate) mod route_mirroring;
pub(crate) mod route_monitoring;
pub(crate) mod stats_report;
pub(crate) mod termination_message;

pub use initiation_message::*;
pub use peer_down_notification::*;
pub use peer_up_notification::*;
pub use route_mirroring::parse_route_mirroring;
pub use route_monitoring::*;
pub use stats_report::parse_stats_report;
