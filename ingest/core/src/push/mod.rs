//! Push Channel
//!
//! Long-lived server-push connection delivering workspace events, with
//! resumable reconnection.
//!
//! # Design Philosophy
//!
//! The connection owns nothing but its loop. Events and state changes flow
//! out on one typed channel ([`ConnectionNotice`]), and callers read the
//! current status and metrics from a shared snapshot. Transport errors are
//! handled inside the loop (backoff and reconnect) and only ever surface as
//! notices; a malformed event is reported and skipped without touching the
//! connection.
//!
//! On reconnect the last seen `eventId` is sent as `lastEventId`, so a server
//! that keeps history can replay what was missed.

mod backoff;
mod connection;
mod event;
mod metrics;
mod transport;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionNotice, ConnectionStatus, PushConfig, PushConnection, EVENT_PATH};
pub use event::PushEvent;
pub use metrics::ConnectionMetrics;
pub use transport::{split_lines, HttpPushTransport, PushStream, PushTransport};
