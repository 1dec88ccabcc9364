//! # shamba-ingest
//!
//! The two inbound channels: a push webhook whose payload dialects are
//! normalized into one internal event, and a pull-polling fallback with a
//! bounded dedup set. Both converge on the engine's shared pipeline.

pub mod polling;
pub mod webhook;

pub use polling::{Poller, PollerStats, ReceivedSource};
pub use webhook::{WebhookReply, WebhookRouter};
