//! pulse-agent — samples runtime metrics and ships them to a Pulse server.
//!
//! Two loops share one local [`MemoryStore`](pulse_state::MemoryStore):
//! the [`Collector`] polls `sysinfo` every poll interval, and the
//! [`Reporter`] sends the store's contents through the [`Sender`] every
//! report interval. Both stop on a `watch` shutdown signal.

pub mod collector;
pub mod reporter;
pub mod sender;

pub use collector::{Collector, SystemSampler, POLL_COUNT};
pub use reporter::Reporter;
pub use sender::{SendError, Sender, DEFAULT_BACKOFF};
